//! Bot runner: the polling loop that ties monitoring, replication and payouts together.
//!
//! Each cycle:
//! - Polls the master's swaps since the watermark
//! - Replicates each new swap for every follower, in feed order
//! - Books settled swaps, realizes profit and distributes commissions
//! - Records one copy trade row per follower outcome
//! - Persists the watermark for crash recovery

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::{DateTime, Utc};
use statrs::statistics::Statistics;
use tokio::sync::watch;
use tokio::time::interval;
use tracing::{debug, error, info, warn};

use crate::db::{CopyTradeRecord, Database};
use crate::models::{partition_outcomes, Follower, MasterTrade, Settlement, SwapOutcome};
use crate::trading::{
    lamports_to_sol, ActivityFeed, CommissionEngine, CopyConfig, DistributionConfig,
    ExecutionContext, FollowerRegistry, ProportionalExecutor, TradeMonitor,
};

/// Profits sampled for the status report.
const STATS_SAMPLE: i64 = 1_000;

/// Totals for one poll cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub trades: usize,
    pub outcomes: usize,
    pub executed: usize,
    pub commissions_paid: u64,
}

/// Main bot runner.
pub struct Bot {
    config: CopyConfig,
    db: Database,
    monitor: TradeMonitor,
    registry: FollowerRegistry,
    executor: ProportionalExecutor,
    commissions: CommissionEngine,
    watermark: DateTime<Utc>,

    // Shutdown signal, also seen by in-flight follower tasks
    shutdown: watch::Sender<bool>,
}

impl Bot {
    /// Wire up a bot. Fails on invalid configuration.
    pub fn new(
        config: CopyConfig,
        distribution: DistributionConfig,
        db: Database,
        feed: Arc<dyn ActivityFeed>,
        ctx: ExecutionContext,
    ) -> Result<Self> {
        config.validate()?;
        let commissions = CommissionEngine::new(distribution)?;

        let monitor = TradeMonitor::new(
            feed,
            config.master_account.clone(),
            config.base_mint.clone(),
            config.feed_page_limit,
        );
        let registry = FollowerRegistry::new(
            db.clone(),
            config.master_account.clone(),
            config.min_active_balance,
        );
        let watermark = Utc::now() - chrono::Duration::seconds(config.initial_lookback_secs);
        let (shutdown, _) = watch::channel(false);

        Ok(Self {
            config,
            db,
            monitor,
            registry,
            executor: ProportionalExecutor::new(ctx),
            commissions,
            watermark,
            shutdown,
        })
    }

    pub fn watermark(&self) -> DateTime<Utc> {
        self.watermark
    }

    /// Restore the watermark from a previous session.
    pub async fn initialize(&mut self) -> Result<()> {
        info!("Initializing bot...");

        let state = self.db.init_bot_state().await?;
        if let Some(watermark) = state.watermark() {
            info!(
                watermark = %watermark,
                trades_seen = state.trades_seen,
                "Resuming from previous session"
            );
            self.watermark = watermark;
        }

        let followers = self.registry.followers().await?;
        info!(
            master = %self.config.master_account,
            followers = followers.len(),
            active = followers.iter().filter(|f| f.active).count(),
            watermark = %self.watermark,
            "Bot initialized"
        );

        Ok(())
    }

    /// Main run loop.
    pub async fn run(&mut self) -> Result<()> {
        info!(
            dry_run = self.config.dry_run,
            poll_interval = self.config.poll_interval_secs,
            "Starting bot run loop"
        );

        let mut poll_interval = interval(Duration::from_secs(self.config.poll_interval_secs));

        // Register shutdown handler
        let shutdown = self.shutdown.clone();
        tokio::spawn(async move {
            tokio::signal::ctrl_c().await.ok();
            info!("Shutdown signal received");
            shutdown.send_replace(true);
        });

        let mut stop = self.shutdown.subscribe();
        while !*stop.borrow() {
            tokio::select! {
                _ = poll_interval.tick() => {}
                _ = stop.changed() => break,
            }

            match self.tick().await {
                Ok(report) if report.trades > 0 => info!(
                    trades = report.trades,
                    outcomes = report.outcomes,
                    executed = report.executed,
                    commissions = report.commissions_paid,
                    "Cycle complete"
                ),
                Ok(_) => debug!("No new master trades"),
                Err(e) => error!(error = %e, "Error in bot tick"),
            }
        }

        // Graceful shutdown
        self.db.mark_bot_stopped().await?;
        info!("Bot shutdown complete");

        Ok(())
    }

    /// Single poll cycle.
    pub async fn tick(&mut self) -> Result<CycleReport> {
        let trades = self.monitor.poll_since(self.watermark).await;
        let mut report = CycleReport::default();

        // Feed order: a trade is dispatched only after the previous one finished.
        // A trade is marked seen only once it can be replicated; on a storage
        // failure the cycle stops and the watermark stays behind the trade.
        for trade in &trades {
            if *self.shutdown.borrow() {
                break;
            }

            let followers = match self.registry.followers().await {
                Ok(followers) => followers,
                Err(e) => {
                    warn!(origin = %trade.short_ref(), error = %e, "Follower lookup failed, retrying next cycle");
                    break;
                }
            };

            match self.db.mark_trade_seen(&self.config.master_account, trade).await {
                Ok(true) => {}
                Ok(false) => {
                    debug!(origin = %trade.short_ref(), "Trade already processed");
                    self.advance_watermark(trade);
                    continue;
                }
                Err(e) => {
                    warn!(origin = %trade.short_ref(), error = %e, "Failed to mark trade, retrying next cycle");
                    break;
                }
            }

            let outcomes = self.replicate(trade, &followers).await;
            report.trades += 1;
            report.outcomes += outcomes.len();

            for outcome in &outcomes {
                if outcome.is_success() {
                    report.executed += 1;
                }
                report.commissions_paid += self.record_outcome(trade, outcome).await;
            }

            self.advance_watermark(trade);
        }

        self.db
            .record_cycle(
                self.watermark,
                report.trades as i64,
                report.outcomes as i64,
                report.executed as i64,
                report.commissions_paid as i64,
            )
            .await?;

        Ok(report)
    }

    fn advance_watermark(&mut self, trade: &MasterTrade) {
        if trade.observed_at > self.watermark {
            self.watermark = trade.observed_at;
        }
    }

    async fn replicate(&self, trade: &MasterTrade, followers: &[Follower]) -> Vec<SwapOutcome> {
        info!(
            origin = %trade.short_ref(),
            input = %trade.input_mint,
            output = %trade.output_mint,
            followers = followers.len(),
            "Replicating master trade"
        );

        let outcomes = self
            .executor
            .replicate(trade, followers, self.shutdown.subscribe())
            .await;

        let (successes, failures) = partition_outcomes(&outcomes);
        info!(
            origin = %trade.short_ref(),
            succeeded = successes.len(),
            failed = failures.len(),
            "Replication finished"
        );

        outcomes
    }

    /// Book an outcome and charge its fee. Returns the fee charged.
    ///
    /// Ledger failures are logged and never abort the cycle.
    async fn record_outcome(&self, trade: &MasterTrade, outcome: &SwapOutcome) -> u64 {
        let mut row = CopyTradeRecord::from_outcome(&self.config.master_account, trade, outcome);
        let mut charged = 0;

        if let Ok(swap) = &outcome.result {
            if !swap.simulated {
                match self.settle(trade, outcome).await {
                    Ok((profit, fee)) => {
                        row.realized_profit = profit;
                        row.fee = fee.map(|f| f as i64);
                        charged = fee.unwrap_or(0);
                    }
                    Err(e) => error!(
                        origin = %trade.short_ref(),
                        follower = %outcome.follower_ref,
                        error = %e,
                        "Failed to settle swap in ledger"
                    ),
                }
            }
        }

        if let Err(e) = self.db.record_trade(&row).await {
            error!(
                origin = %trade.short_ref(),
                follower = %outcome.follower_ref,
                error = %e,
                "Failed to record copy trade"
            );
        }

        charged
    }

    /// Fill, then profit, then distribution. Returns (realized profit, fee charged).
    async fn settle(&self, trade: &MasterTrade, outcome: &SwapOutcome) -> Result<(Option<i64>, Option<u64>)> {
        let Ok(swap) = &outcome.result else {
            return Ok((None, None));
        };
        let follower = outcome.follower_ref.as_str();

        let profit = self
            .db
            .apply_fill(
                follower,
                &self.config.base_mint,
                &trade.input_mint,
                &trade.output_mint,
                Settlement {
                    input_amount: swap.realized_input_amount,
                    output_amount: swap.realized_output_amount,
                },
            )
            .await?;

        let Some(profit) = profit else {
            return Ok((None, None));
        };

        let upline = self
            .db
            .upline_chain(follower, self.commissions.config().max_upline_depth)
            .await?;
        let Some(distribution) = self.commissions.settle(follower, profit, &upline) else {
            debug!(follower = %follower, profit = profit, "No fee due");
            return Ok((Some(profit), None));
        };

        if let Err(e) = self
            .db
            .apply_distribution(
                follower,
                &self.config.master_account,
                &self.config.platform_account,
                &trade.origin_ref,
                &distribution,
            )
            .await
        {
            error!(follower = %follower, fee = distribution.fee, error = %e, "Fee not collected");
            return Ok((Some(profit), None));
        }

        Ok((Some(profit), Some(distribution.fee)))
    }

    /// Get current stats.
    pub async fn get_stats(&self) -> Result<BotStats> {
        BotStats::load(&self.db, &self.config).await
    }
}

/// Bot statistics.
#[derive(Debug, Clone)]
pub struct BotStats {
    pub master_account: String,
    pub followers: usize,
    pub active_followers: usize,
    pub trades_seen: i64,
    pub total_outcomes: i64,
    pub executed: i64,
    pub skipped: i64,
    pub failed: i64,
    pub commissions_paid: u64,
    pub closed_positions: usize,
    pub mean_profit: f64,
    pub profit_std_dev: f64,
    pub win_rate: f64,
    pub platform_balance: u64,
    pub watermark: Option<DateTime<Utc>>,
    pub is_running: bool,
    pub dry_run: bool,
}

impl BotStats {
    pub async fn load(db: &Database, config: &CopyConfig) -> Result<Self> {
        let registry = FollowerRegistry::new(
            db.clone(),
            config.master_account.clone(),
            config.min_active_balance,
        );
        let followers = registry.followers().await?;
        let (total_outcomes, executed, skipped, failed) = db.get_copy_trade_stats().await?;
        let state = db.get_bot_state().await?;

        let profits: Vec<f64> = db
            .realized_profits(STATS_SAMPLE)
            .await?
            .into_iter()
            .map(|p| p as f64)
            .collect();
        let closed_positions = profits.len();
        let (mean_profit, profit_std_dev, win_rate) = if profits.is_empty() {
            (0.0, 0.0, 0.0)
        } else {
            let wins = profits.iter().filter(|p| **p > 0.0).count() as f64;
            let std_dev = if profits.len() > 1 {
                profits.iter().std_dev()
            } else {
                0.0
            };
            (profits.iter().mean(), std_dev, wins / profits.len() as f64)
        };

        Ok(Self {
            master_account: config.master_account.clone(),
            followers: followers.len(),
            active_followers: followers.iter().filter(|f| f.active).count(),
            trades_seen: state.as_ref().map(|s| s.trades_seen).unwrap_or(0),
            total_outcomes,
            executed,
            skipped,
            failed,
            commissions_paid: state
                .as_ref()
                .map(|s| s.commissions_paid.max(0) as u64)
                .unwrap_or(0),
            closed_positions,
            mean_profit,
            profit_std_dev,
            win_rate,
            platform_balance: db.balance(&config.platform_account).await?,
            watermark: state.as_ref().and_then(|s| s.watermark()),
            is_running: state.as_ref().map(|s| s.is_running).unwrap_or(false),
            dry_run: config.dry_run,
        })
    }
}

impl std::fmt::Display for BotStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "=== Bot Statistics ===")?;
        writeln!(f, "Master:           {}", self.master_account)?;
        writeln!(f, "Followers:        {} ({} active)", self.followers, self.active_followers)?;
        writeln!(f, "Master Trades:    {}", self.trades_seen)?;
        writeln!(f, "Outcomes:         {} (Executed: {}, Skipped: {}, Failed: {})",
            self.total_outcomes, self.executed, self.skipped, self.failed)?;
        writeln!(f, "Closed Positions: {} (Win Rate: {:.1}%)", self.closed_positions, self.win_rate * 100.0)?;
        writeln!(f, "Mean Profit:      {:.0} lamports (σ {:.0})", self.mean_profit, self.profit_std_dev)?;
        writeln!(f, "Fees Collected:   {} SOL", lamports_to_sol(self.commissions_paid))?;
        writeln!(f, "Platform Balance: {} SOL", lamports_to_sol(self.platform_balance))?;
        match self.watermark {
            Some(w) => writeln!(f, "Watermark:        {}", w.format("%Y-%m-%d %H:%M:%S"))?,
            None => writeln!(f, "Watermark:        -")?,
        }
        writeln!(f, "Status:           {} {}",
            if self.is_running { "Running" } else { "Stopped" },
            if self.dry_run { "(Dry Run)" } else { "" })?;
        Ok(())
    }
}
