//! Proportional execution engine.
//!
//! Replicates one master trade for every follower. Each follower runs in its own
//! task behind a shared permit pool, so a stuck or failing follower never holds
//! up the others. Results arrive over a channel in completion order.
//!
//! Per follower:
//! 1. skip inactive followers
//! 2. check the delegation
//! 3. size the trade: `min(allocated, granted)`, further capped by the held
//!    quantity when selling a token back
//! 4. quote the swap
//! 5. re-read the delegation immediately before submitting
//! 6. submit and wait for finality, bounded by the finality timeout
//!
//! Cancellation is honored up to submission. Once a swap is submitted the task
//! waits for its settlement (still bounded) so a landed swap is never reported as
//! cancelled.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use tokio::sync::{mpsc, watch, Semaphore};
use tracing::{debug, info, warn};

use crate::api::QuoteResponse;
use crate::db::Database;
use crate::models::{ExecutedSwap, FailureReason, Follower, MasterTrade, Settlement, SwapOutcome};

use super::{CopyConfig, DelegationManager};

const DEFAULT_SETTLEMENT_POLL: Duration = Duration::from_secs(1);

/// Executable quote for a follower-sized swap.
#[derive(Debug, Clone)]
pub struct Quote {
    pub in_amount: u64,
    pub out_amount: u64,
    /// Lowest acceptable output after slippage
    pub min_out_amount: u64,
    /// Raw route, forwarded to the executor unchanged
    pub route: QuoteResponse,
}

impl Quote {
    /// Build from a route response; `min_out = floor(out * (1 - slippage_bps / 10000))`.
    pub fn from_response(route: QuoteResponse, slippage_bps: u16) -> Result<Self> {
        let in_amount: u64 = route
            .in_amount
            .parse()
            .context("Quote inAmount is not an integer")?;
        let out_amount: u64 = route
            .out_amount
            .parse()
            .context("Quote outAmount is not an integer")?;

        let keep = Decimal::from(10_000u16.saturating_sub(slippage_bps)) / Decimal::from(10_000u16);
        let min_out_amount = (Decimal::from(out_amount) * keep)
            .floor()
            .to_u64()
            .unwrap_or(0);

        Ok(Self {
            in_amount,
            out_amount,
            min_out_amount,
            route,
        })
    }
}

#[async_trait]
pub trait QuoteSource: Send + Sync {
    async fn quote(
        &self,
        input_mint: &str,
        output_mint: &str,
        amount: u64,
        slippage_bps: u16,
    ) -> Result<Quote>;
}

/// A swap ready for submission under a follower's delegation.
#[derive(Debug, Clone)]
pub struct SwapOrder {
    pub follower_ref: String,
    pub input_mint: String,
    pub output_mint: String,
    pub amount: u64,
    pub quote: Quote,
}

/// Where a submitted swap stands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SettlementStatus {
    Pending,
    Settled(Settlement),
    Reverted(String),
}

#[async_trait]
pub trait SwapVenue: Send + Sync {
    /// Submit the swap. Returns the transaction reference.
    async fn submit(&self, order: &SwapOrder) -> Result<String>;

    /// Current status of a submitted swap.
    async fn settlement(&self, tx_ref: &str, order: &SwapOrder) -> Result<SettlementStatus>;
}

/// Handles and limits the engine works with.
#[derive(Clone)]
pub struct ExecutionContext {
    pub quotes: Arc<dyn QuoteSource>,
    pub venue: Arc<dyn SwapVenue>,
    pub delegations: Arc<DelegationManager>,
    pub ledger: Database,
    pub base_mint: String,
    pub slippage_bps: u16,
    pub max_concurrent_swaps: usize,
    pub finality_timeout: Duration,
    pub settlement_poll: Duration,
    pub dry_run: bool,
}

impl ExecutionContext {
    pub fn new(
        config: &CopyConfig,
        quotes: Arc<dyn QuoteSource>,
        venue: Arc<dyn SwapVenue>,
        delegations: Arc<DelegationManager>,
        ledger: Database,
    ) -> Self {
        Self {
            quotes,
            venue,
            delegations,
            ledger,
            base_mint: config.base_mint.clone(),
            slippage_bps: config.slippage_bps,
            max_concurrent_swaps: config.max_concurrent_swaps.max(1),
            finality_timeout: Duration::from_secs(config.finality_timeout_secs),
            settlement_poll: DEFAULT_SETTLEMENT_POLL,
            dry_run: config.dry_run,
        }
    }
}

/// Fans a master trade out to followers.
pub struct ProportionalExecutor {
    ctx: ExecutionContext,
}

impl ProportionalExecutor {
    pub fn new(ctx: ExecutionContext) -> Self {
        Self { ctx }
    }

    /// Replicate `trade` for each follower. Returns exactly one outcome per
    /// follower, in completion order.
    pub async fn replicate(
        &self,
        trade: &MasterTrade,
        followers: &[Follower],
        cancel: watch::Receiver<bool>,
    ) -> Vec<SwapOutcome> {
        if followers.is_empty() {
            return Vec::new();
        }

        let (tx, mut rx) = mpsc::channel(followers.len());
        let permits = Arc::new(Semaphore::new(self.ctx.max_concurrent_swaps));

        for follower in followers.iter().cloned() {
            let ctx = self.ctx.clone();
            let trade = trade.clone();
            let tx = tx.clone();
            let permits = permits.clone();
            let mut cancel = cancel.clone();

            tokio::spawn(async move {
                let follower_ref = follower.account_ref.clone();

                let permit = tokio::select! {
                    permit = permits.acquire_owned() => Some(permit),
                    _ = cancelled(&mut cancel) => None,
                };
                let result = match permit {
                    Some(Ok(_permit)) => replicate_one(&ctx, &trade, &follower, &mut cancel).await,
                    Some(Err(_)) => Err(FailureReason::TaskAborted),
                    None => Err(FailureReason::Cancelled),
                };

                let _ = tx.send(SwapOutcome { follower_ref, result }).await;
            });
        }
        drop(tx);

        let mut outcomes = Vec::with_capacity(followers.len());
        while let Some(outcome) = rx.recv().await {
            log_outcome(trade, &outcome);
            outcomes.push(outcome);
        }

        // A task that panicked never reported
        let mut reported: HashMap<&str, usize> = HashMap::new();
        for outcome in &outcomes {
            *reported.entry(outcome.follower_ref.as_str()).or_default() += 1;
        }
        let mut missing = Vec::new();
        for follower in followers {
            match reported.get_mut(follower.account_ref.as_str()) {
                Some(count) if *count > 0 => *count -= 1,
                _ => missing.push(follower.account_ref.clone()),
            }
        }
        for follower_ref in missing {
            warn!(origin = %trade.short_ref(), follower = %follower_ref, "Follower task aborted");
            outcomes.push(SwapOutcome::failure(follower_ref, FailureReason::TaskAborted));
        }

        outcomes
    }
}

async fn replicate_one(
    ctx: &ExecutionContext,
    trade: &MasterTrade,
    follower: &Follower,
    cancel: &mut watch::Receiver<bool>,
) -> std::result::Result<ExecutedSwap, FailureReason> {
    let order = tokio::select! {
        order = prepare_order(ctx, trade, follower) => order?,
        _ = cancelled(cancel) => return Err(FailureReason::Cancelled),
    };

    // Revocation can land between the first check and now
    let Some(delegation) = ctx.delegations.current(&follower.account_ref).await else {
        return Err(FailureReason::DelegationInactive);
    };
    if trade.input_mint == ctx.base_mint && delegation.usable_amount() < order.amount {
        debug!(
            follower = %follower.account_ref,
            granted = delegation.granted_amount,
            amount = order.amount,
            "Delegation ceiling lowered before submission"
        );
        return Err(FailureReason::DelegationInactive);
    }

    if *cancel.borrow() {
        return Err(FailureReason::Cancelled);
    }

    if ctx.dry_run {
        return Ok(ExecutedSwap {
            tx_ref: "simulated".to_string(),
            realized_input_amount: order.quote.in_amount,
            realized_output_amount: order.quote.out_amount,
            simulated: true,
        });
    }

    let tx_ref = ctx
        .venue
        .submit(&order)
        .await
        .map_err(|e| FailureReason::SubmissionFailed(format!("{:#}", e)))?;

    debug!(follower = %follower.account_ref, tx = %tx_ref, "Swap submitted");

    let settlement = tokio::time::timeout(ctx.finality_timeout, await_settlement(ctx, &tx_ref, &order))
        .await
        .map_err(|_| FailureReason::Timeout)??;

    Ok(ExecutedSwap {
        tx_ref,
        realized_input_amount: settlement.input_amount,
        realized_output_amount: settlement.output_amount,
        simulated: false,
    })
}

/// Steps 1 to 4: eligibility, sizing and quoting.
async fn prepare_order(
    ctx: &ExecutionContext,
    trade: &MasterTrade,
    follower: &Follower,
) -> std::result::Result<SwapOrder, FailureReason> {
    if !follower.active {
        return Err(FailureReason::Inactive);
    }

    let Some(delegation) = ctx.delegations.current(&follower.account_ref).await else {
        return Err(FailureReason::DelegationInactive);
    };

    // Buying spends base-mint lamports under the allocation and delegation
    // ceiling. Selling is sized in token units from the follower's holding.
    let amount = if trade.input_mint == ctx.base_mint {
        follower.allocated_amount.min(delegation.usable_amount())
    } else {
        let held = match ctx.ledger.position(&follower.account_ref, &trade.input_mint).await {
            Ok(position) => position.map(|p| p.held()).unwrap_or(0),
            Err(e) => {
                warn!(follower = %follower.account_ref, error = %e, "Position lookup failed");
                0
            }
        };
        trade.scaled_exit(held)
    };

    if amount == 0 {
        return Err(FailureReason::AmountTooSmall);
    }

    let quote = match ctx
        .quotes
        .quote(&trade.input_mint, &trade.output_mint, amount, ctx.slippage_bps)
        .await
    {
        Ok(quote) if quote.out_amount > 0 => quote,
        Ok(_) => return Err(FailureReason::QuoteUnavailable),
        Err(e) => {
            debug!(follower = %follower.account_ref, error = %e, "Quote failed");
            return Err(FailureReason::QuoteUnavailable);
        }
    };

    Ok(SwapOrder {
        follower_ref: follower.account_ref.clone(),
        input_mint: trade.input_mint.clone(),
        output_mint: trade.output_mint.clone(),
        amount,
        quote,
    })
}

async fn await_settlement(
    ctx: &ExecutionContext,
    tx_ref: &str,
    order: &SwapOrder,
) -> std::result::Result<Settlement, FailureReason> {
    loop {
        match ctx.venue.settlement(tx_ref, order).await {
            Ok(SettlementStatus::Settled(settlement)) => return Ok(settlement),
            Ok(SettlementStatus::Reverted(reason)) => return Err(FailureReason::Reverted(reason)),
            Ok(SettlementStatus::Pending) => {}
            Err(e) => debug!(tx = %tx_ref, error = %e, "Settlement check failed"),
        }
        tokio::time::sleep(ctx.settlement_poll).await;
    }
}

/// Resolves once cancellation is requested. Never resolves if the sender is gone.
async fn cancelled(cancel: &mut watch::Receiver<bool>) {
    loop {
        if *cancel.borrow_and_update() {
            return;
        }
        if cancel.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

fn log_outcome(trade: &MasterTrade, outcome: &SwapOutcome) {
    match &outcome.result {
        Ok(swap) => info!(
            origin = %trade.short_ref(),
            follower = %outcome.follower_ref,
            tx = %swap.tx_ref,
            input = swap.realized_input_amount,
            output = swap.realized_output_amount,
            "Swap replicated"
        ),
        Err(reason) if reason.status() == "skipped" => debug!(
            origin = %trade.short_ref(),
            follower = %outcome.follower_ref,
            reason = %reason,
            "Follower skipped"
        ),
        Err(reason) => warn!(
            origin = %trade.short_ref(),
            follower = %outcome.follower_ref,
            reason = %reason,
            "Replication failed"
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trading::delegation::tests::FakeAuthority;
    use crate::trading::config::WRAPPED_SOL_MINT;
    use anyhow::bail;
    use chrono::Utc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    const USDC: &str = "EPjFWdd5AufqSSqeM2qN1xzybapC8G4wEGGkZwyTDt1v";

    fn route(in_amount: u64, out_amount: u64) -> QuoteResponse {
        QuoteResponse {
            input_mint: WRAPPED_SOL_MINT.to_string(),
            in_amount: in_amount.to_string(),
            output_mint: USDC.to_string(),
            out_amount: out_amount.to_string(),
            other_amount_threshold: String::new(),
            slippage_bps: 50,
            price_impact_pct: "0".to_string(),
            route_plan: vec![],
        }
    }

    /// Quotes 1:2, optionally failing.
    struct FakeQuotes {
        fail: bool,
        /// Runs while the quote is in flight
        on_quote: Option<Box<dyn Fn() + Send + Sync>>,
    }

    #[async_trait]
    impl QuoteSource for FakeQuotes {
        async fn quote(&self, _i: &str, _o: &str, amount: u64, slippage_bps: u16) -> Result<Quote> {
            if let Some(hook) = &self.on_quote {
                hook();
            }
            if self.fail {
                bail!("no route");
            }
            Quote::from_response(route(amount, amount * 2), slippage_bps)
        }
    }

    #[derive(Default)]
    struct FakeVenue {
        submitted: Mutex<Vec<SwapOrder>>,
        reject_for: Option<String>,
        revert_for: Option<String>,
        hang_for: Option<String>,
        polls: AtomicUsize,
    }

    #[async_trait]
    impl SwapVenue for FakeVenue {
        async fn submit(&self, order: &SwapOrder) -> Result<String> {
            if self.reject_for.as_deref() == Some(order.follower_ref.as_str()) {
                bail!("executor busy");
            }
            self.submitted.lock().unwrap().push(order.clone());
            Ok(format!("sig-{}", order.follower_ref))
        }

        async fn settlement(&self, _tx_ref: &str, order: &SwapOrder) -> Result<SettlementStatus> {
            let polls = self.polls.fetch_add(1, Ordering::SeqCst);
            let follower = Some(order.follower_ref.as_str());
            if self.hang_for.as_deref() == follower {
                return Ok(SettlementStatus::Pending);
            }
            if self.revert_for.as_deref() == follower {
                return Ok(SettlementStatus::Reverted("slippage exceeded".to_string()));
            }
            if polls == 0 {
                return Ok(SettlementStatus::Pending);
            }
            // Realized output differs from the quote
            Ok(SettlementStatus::Settled(Settlement {
                input_amount: order.amount,
                output_amount: order.quote.out_amount - 1,
            }))
        }
    }

    struct Harness {
        authority: Arc<FakeAuthority>,
        venue: Arc<FakeVenue>,
        executor: ProportionalExecutor,
        ledger: Database,
    }

    async fn harness(quotes: FakeQuotes, venue: FakeVenue) -> Harness {
        let ledger = Database::new("sqlite::memory:").await.unwrap();
        let authority = Arc::new(FakeAuthority::default());
        let delegations = Arc::new(DelegationManager::new(authority.clone(), ledger.clone()));
        let venue = Arc::new(venue);

        let config = CopyConfig {
            master_account: "master".to_string(),
            platform_account: "platform".to_string(),
            dry_run: false,
            max_concurrent_swaps: 2,
            ..Default::default()
        };
        let mut ctx = ExecutionContext::new(
            &config,
            Arc::new(quotes),
            venue.clone(),
            delegations,
            ledger.clone(),
        );
        ctx.finality_timeout = Duration::from_millis(200);
        ctx.settlement_poll = Duration::from_millis(5);

        Harness {
            authority,
            venue,
            executor: ProportionalExecutor::new(ctx),
            ledger,
        }
    }

    fn quotes() -> FakeQuotes {
        FakeQuotes {
            fail: false,
            on_quote: None,
        }
    }

    impl Harness {
        async fn delegate(&self, follower: &str, amount: u64) {
            self.ledger
                .record_delegation(follower, WRAPPED_SOL_MINT, &FakeAuthority::account_for(follower), amount)
                .await
                .unwrap();
            self.authority.activate(follower, amount);
        }
    }

    fn buy_trade() -> MasterTrade {
        MasterTrade {
            input_mint: WRAPPED_SOL_MINT.to_string(),
            output_mint: USDC.to_string(),
            input_amount: 5_000_000_000,
            output_amount: 900_000_000,
            master_input_balance: 20_000_000_000,
            observed_at: Utc::now(),
            origin_ref: "master-sig-1".to_string(),
        }
    }

    fn no_cancel() -> watch::Receiver<bool> {
        watch::channel(false).1
    }

    fn find<'a>(outcomes: &'a [SwapOutcome], follower: &str) -> &'a SwapOutcome {
        outcomes.iter().find(|o| o.follower_ref == follower).unwrap()
    }

    #[test]
    fn test_quote_min_out_applies_slippage() {
        let quote = Quote::from_response(route(1_000, 10_001), 50).unwrap();
        assert_eq!(quote.min_out_amount, 9_950);
        assert!(Quote::from_response(
            QuoteResponse {
                out_amount: "abc".to_string(),
                ..route(1, 1)
            },
            50
        )
        .is_err());
    }

    #[tokio::test]
    async fn test_one_outcome_per_follower() {
        let h = harness(quotes(), FakeVenue::default()).await;
        h.delegate("a", 1_000).await;
        h.delegate("c", 1_000).await;

        let followers = vec![
            Follower::new("a", 1_000, true),
            Follower::new("b", 1_000, false),
            Follower::new("c", 0, true),
            Follower::new("d", 1_000, true),
        ];

        let outcomes = h.executor.replicate(&buy_trade(), &followers, no_cancel()).await;
        assert_eq!(outcomes.len(), followers.len());
        assert!(find(&outcomes, "a").is_success());
        assert_eq!(find(&outcomes, "b").failure_reason(), Some(&FailureReason::Inactive));
        assert_eq!(find(&outcomes, "c").failure_reason(), Some(&FailureReason::AmountTooSmall));
        assert_eq!(
            find(&outcomes, "d").failure_reason(),
            Some(&FailureReason::DelegationInactive)
        );
    }

    #[tokio::test]
    async fn test_zero_allocation_is_too_small() {
        let h = harness(quotes(), FakeVenue::default()).await;
        h.delegate("alice", 1_000).await;

        let outcomes = h
            .executor
            .replicate(&buy_trade(), &[Follower::new("alice", 0, true)], no_cancel())
            .await;
        assert_eq!(outcomes[0].failure_reason(), Some(&FailureReason::AmountTooSmall));
        assert!(h.venue.submitted.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_revocation_before_submission_is_caught() {
        let authority_slot: Arc<Mutex<Option<Arc<FakeAuthority>>>> = Arc::new(Mutex::new(None));
        let slot = authority_slot.clone();
        let revoking_quotes = FakeQuotes {
            fail: false,
            on_quote: Some(Box::new(move || {
                if let Some(authority) = slot.lock().unwrap().as_ref() {
                    authority.deactivate("alice");
                }
            })),
        };

        let h = harness(revoking_quotes, FakeVenue::default()).await;
        h.delegate("alice", 1_000).await;
        *authority_slot.lock().unwrap() = Some(h.authority.clone());

        let outcomes = h
            .executor
            .replicate(&buy_trade(), &[Follower::new("alice", 1_000, true)], no_cancel())
            .await;
        assert_eq!(
            outcomes[0].failure_reason(),
            Some(&FailureReason::DelegationInactive)
        );
        assert!(h.venue.submitted.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_amount_capped_by_delegation_and_realized_from_settlement() {
        let h = harness(quotes(), FakeVenue::default()).await;
        h.delegate("alice", 400).await;

        let outcomes = h
            .executor
            .replicate(&buy_trade(), &[Follower::new("alice", 1_000, true)], no_cancel())
            .await;

        let swap = outcomes[0].result.as_ref().unwrap();
        assert_eq!(swap.tx_ref, "sig-alice");
        assert_eq!(swap.realized_input_amount, 400);
        // Quote said 800; settlement reports what actually moved
        assert_eq!(swap.realized_output_amount, 799);
        assert!(!swap.simulated);
    }

    #[tokio::test]
    async fn test_sell_capped_by_holdings() {
        let h = harness(quotes(), FakeVenue::default()).await;
        h.delegate("alice", 1_000_000).await;
        h.delegate("bob", 1_000_000).await;
        h.ledger
            .apply_fill(
                "alice",
                WRAPPED_SOL_MINT,
                WRAPPED_SOL_MINT,
                USDC,
                Settlement {
                    input_amount: 100,
                    output_amount: 250,
                },
            )
            .await
            .unwrap();

        // Master exits its whole holding
        let sell = MasterTrade {
            input_mint: USDC.to_string(),
            output_mint: WRAPPED_SOL_MINT.to_string(),
            input_amount: 900_000_000,
            output_amount: 5_000_000_000,
            master_input_balance: 900_000_000,
            ..buy_trade()
        };
        let followers = vec![
            Follower::new("alice", 1_000_000, true),
            Follower::new("bob", 1_000_000, true),
        ];
        let outcomes = h.executor.replicate(&sell, &followers, no_cancel()).await;

        assert_eq!(
            find(&outcomes, "alice").result.as_ref().unwrap().realized_input_amount,
            250
        );
        assert_eq!(
            find(&outcomes, "bob").failure_reason(),
            Some(&FailureReason::AmountTooSmall)
        );
    }

    #[tokio::test]
    async fn test_partial_sell_sized_in_token_units() {
        let h = harness(quotes(), FakeVenue::default()).await;
        // Lamport caps far below the token holding
        h.delegate("alice", 10).await;
        h.ledger
            .apply_fill(
                "alice",
                WRAPPED_SOL_MINT,
                WRAPPED_SOL_MINT,
                USDC,
                Settlement {
                    input_amount: 100,
                    output_amount: 250,
                },
            )
            .await
            .unwrap();

        // Master sells 40% of what it held
        let sell = MasterTrade {
            input_mint: USDC.to_string(),
            output_mint: WRAPPED_SOL_MINT.to_string(),
            input_amount: 400,
            output_amount: 90,
            master_input_balance: 1_000,
            ..buy_trade()
        };
        let outcomes = h
            .executor
            .replicate(&sell, &[Follower::new("alice", 10, true)], no_cancel())
            .await;

        let swap = outcomes[0].result.as_ref().unwrap();
        assert_eq!(swap.realized_input_amount, 100);
        let submitted = h.venue.submitted.lock().unwrap();
        assert_eq!(submitted[0].amount, 100);
        assert_eq!(submitted[0].input_mint, USDC);
    }

    #[tokio::test]
    async fn test_quote_unavailable() {
        let h = harness(
            FakeQuotes {
                fail: true,
                on_quote: None,
            },
            FakeVenue::default(),
        )
        .await;
        h.delegate("alice", 1_000).await;

        let outcomes = h
            .executor
            .replicate(&buy_trade(), &[Follower::new("alice", 1_000, true)], no_cancel())
            .await;
        assert_eq!(outcomes[0].failure_reason(), Some(&FailureReason::QuoteUnavailable));
    }

    #[tokio::test]
    async fn test_stuck_follower_times_out_without_blocking_others() {
        let venue = FakeVenue {
            hang_for: Some("slow".to_string()),
            revert_for: Some("unlucky".to_string()),
            reject_for: Some("rejected".to_string()),
            ..Default::default()
        };
        let h = harness(quotes(), venue).await;
        for f in ["slow", "fast", "unlucky", "rejected"] {
            h.delegate(f, 1_000).await;
        }

        let followers: Vec<Follower> = ["slow", "fast", "unlucky", "rejected"]
            .iter()
            .map(|f| Follower::new(*f, 1_000, true))
            .collect();
        let outcomes = h.executor.replicate(&buy_trade(), &followers, no_cancel()).await;

        assert_eq!(outcomes.len(), 4);
        assert_eq!(find(&outcomes, "slow").failure_reason(), Some(&FailureReason::Timeout));
        assert!(find(&outcomes, "fast").is_success());
        assert_eq!(
            find(&outcomes, "unlucky").failure_reason(),
            Some(&FailureReason::Reverted("slippage exceeded".to_string()))
        );
        assert!(matches!(
            find(&outcomes, "rejected").failure_reason(),
            Some(FailureReason::SubmissionFailed(_))
        ));
    }

    #[tokio::test]
    async fn test_cancelled_before_submission() {
        let h = harness(quotes(), FakeVenue::default()).await;
        h.delegate("alice", 1_000).await;

        let (tx, rx) = watch::channel(true);
        let outcomes = h
            .executor
            .replicate(&buy_trade(), &[Follower::new("alice", 1_000, true)], rx)
            .await;
        drop(tx);

        assert_eq!(outcomes[0].failure_reason(), Some(&FailureReason::Cancelled));
        assert!(h.venue.submitted.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_dry_run_simulates_from_quote() {
        let mut h = harness(quotes(), FakeVenue::default()).await;
        h.executor.ctx.dry_run = true;
        h.delegate("alice", 1_000).await;

        let outcomes = h
            .executor
            .replicate(&buy_trade(), &[Follower::new("alice", 1_000, true)], no_cancel())
            .await;

        let swap = outcomes[0].result.as_ref().unwrap();
        assert!(swap.simulated);
        assert_eq!(swap.realized_output_amount, 2_000);
        assert_eq!(outcomes[0].status(), "simulated");
        assert!(h.venue.submitted.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_followers_each_get_an_outcome() {
        let h = harness(quotes(), FakeVenue::default()).await;
        h.delegate("alice", 1_000).await;

        let followers = vec![
            Follower::new("alice", 1_000, true),
            Follower::new("alice", 1_000, true),
        ];
        let outcomes = h.executor.replicate(&buy_trade(), &followers, no_cancel()).await;
        assert_eq!(outcomes.len(), 2);
    }
}
