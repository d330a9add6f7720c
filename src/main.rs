//! Memeflow copy-trading service
//!
//! Replicates a master wallet's swaps for every subscribed follower in
//! proportion to their allocation, and distributes the performance fee on
//! realized profit through the referral network.

mod api;
mod bot;
mod db;
mod models;
mod trading;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use crate::api::{
    ChainDelegationAuthority, ChainSwapVenue, ExecutorClient, ExecutorKeypair, JupiterClient,
    RpcClient, DEFAULT_RPC_URL,
};
use crate::bot::{Bot, BotStats};
use crate::db::Database;
use crate::models::Rank;
use crate::trading::{
    lamports_to_sol, CommissionEngine, CopyConfig, DelegationManager, ExecutionContext,
    FollowerRegistry,
};

/// Memeflow copy-trading CLI.
#[derive(Parser)]
#[command(name = "memeflow")]
#[command(about = "Replicate a master wallet's swaps for its followers", long_about = None)]
struct Cli {
    /// Database file path
    #[arg(short, long, env = "DATABASE_URL", default_value = "sqlite:./memeflow.db?mode=rwc")]
    database: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Solana RPC endpoint
    #[arg(long, env = "RPC_URL", default_value = DEFAULT_RPC_URL)]
    rpc_url: String,

    /// Swap executor service endpoint
    #[arg(long, env = "EXECUTOR_URL")]
    executor_url: Option<String>,

    /// Executor keypair file (solana-keygen JSON)
    #[arg(long, env = "EXECUTOR_KEYPAIR")]
    executor_keypair: Option<PathBuf>,

    /// Master wallet to replicate
    #[arg(long, env = "MASTER_ACCOUNT")]
    master: Option<String>,

    /// Account receiving undistributed commission
    #[arg(long, env = "PLATFORM_ACCOUNT")]
    platform: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Clone)]
enum Commands {
    /// Start the copy-trading loop
    Run {
        /// Polling interval in seconds
        #[arg(short, long)]
        interval: Option<u64>,

        /// Maximum concurrent follower swaps
        #[arg(long)]
        concurrency: Option<usize>,

        /// Slippage tolerance in basis points
        #[arg(long)]
        slippage_bps: Option<u16>,

        /// Dry run (quote only, never submit)
        #[arg(long, conflicts_with = "live")]
        dry_run: bool,

        /// Submit real swaps even if the stored configuration says dry run
        #[arg(long)]
        live: bool,
    },

    /// Show current configuration
    Config,

    /// Show bot status and statistics
    Status,

    /// List followers of the master
    Followers,

    /// Subscribe a follower to the master
    Follow {
        /// Follower wallet address
        account: String,

        /// Allocation per master trade, in lamports
        lamports: u64,
    },

    /// Pause a follower
    Unfollow {
        /// Follower wallet address
        account: String,
    },

    /// Link an account to its sponsor
    Sponsor {
        account: String,
        sponsor: String,

        /// Rank of the account (V1..V8, or Unranked)
        #[arg(short, long)]
        rank: Option<String>,
    },

    /// Prepare a delegation for the follower to sign
    Grant {
        follower: String,
        mint: String,

        /// Delegated ceiling, in the mint's smallest unit
        lamports: u64,
    },

    /// Prepare a delegation revocation
    Revoke { follower: String, mint: String },

    /// Show a follower's on-chain delegation
    Delegation { follower: String },

    /// Preview the fee split for a realized profit
    Preview {
        follower: String,

        /// Realized profit in lamports (may be negative)
        #[arg(allow_hyphen_values = true)]
        profit: i64,
    },

    /// Show recent copy trades
    History {
        #[arg(short, long, default_value = "20")]
        limit: i64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    // Setup logging
    let log_level = match cli.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    // Initialize database
    let db = Database::new(&cli.database).await?;
    let mut config = load_config(&cli, &db).await?;

    match cli.command.clone() {
        Commands::Run {
            interval,
            concurrency,
            slippage_bps,
            dry_run,
            live,
        } => {
            if let Some(interval) = interval {
                config.poll_interval_secs = interval;
            }
            if let Some(concurrency) = concurrency {
                config.max_concurrent_swaps = concurrency;
            }
            if let Some(slippage_bps) = slippage_bps {
                config.slippage_bps = slippage_bps;
            }
            config.dry_run = run_mode(config.dry_run, dry_run, live);
            config.validate()?;

            let distribution = db.load_distribution_config().await?;
            let rpc = Arc::new(RpcClient::new(cli.rpc_url.clone())?);
            let executor = executor_client(&cli)?;
            let delegations = Arc::new(DelegationManager::new(
                Arc::new(ChainDelegationAuthority::new(executor.clone(), rpc.clone())),
                db.clone(),
            ));
            let venue = Arc::new(ChainSwapVenue::new(executor.clone(), rpc.clone(), config.base_mint.clone()));
            let ctx = ExecutionContext::new(
                &config,
                Arc::new(JupiterClient::new()?),
                venue,
                delegations,
                db.clone(),
            );

            info!(
                master = %config.master_account,
                executor = %executor.executor_pubkey(),
                interval = config.poll_interval_secs,
                dry_run = config.dry_run,
                "Starting copy-trading bot"
            );

            let mut bot = Bot::new(config.clone(), distribution, db.clone(), rpc, ctx)?;
            bot.initialize().await?;

            println!("\n=== Memeflow Copy-Trading Bot ===");
            println!("Master:           {}", config.master_account);
            println!("Polling interval: {}s", config.poll_interval_secs);
            println!("Watching since:   {}", bot.watermark().format("%Y-%m-%d %H:%M:%S"));
            println!("Mode: {}", if config.dry_run { "DRY RUN (no real swaps)" } else { "LIVE TRADING" });
            println!("\nPress Ctrl+C to stop.\n");

            // Run the bot
            if let Err(e) = bot.run().await {
                tracing::error!(error = %e, "Bot error");
            }

            // Show final stats
            let stats = bot.get_stats().await?;
            println!("\n{}", stats);
        }

        Commands::Config => {
            let distribution = db.load_distribution_config().await?;

            println!("\n=== Copy Configuration ===\n");
            println!("  Master:               {}", display_or_unset(&config.master_account));
            println!("  Platform:             {}", display_or_unset(&config.platform_account));
            println!("  Base Mint:            {}", config.base_mint);
            println!("  Poll Interval:        {}s", config.poll_interval_secs);
            println!("  Initial Lookback:     {}s", config.initial_lookback_secs);
            println!("  Max Concurrent Swaps: {}", config.max_concurrent_swaps);
            println!("  Finality Timeout:     {}s", config.finality_timeout_secs);
            println!("  Slippage:             {} bps", config.slippage_bps);
            println!("  Min Active Balance:   {} SOL", lamports_to_sol(config.min_active_balance));

            println!("\n=== Commission Distribution ===\n");
            println!("  Performance Fee:      {}%", distribution.fee_pct);
            println!("  Master Share:         {}%", distribution.master_pct);
            println!("  Network Pool:         {}%", distribution.network_pct());
            println!("  Max Upline Depth:     {}", distribution.max_upline_depth);
            println!("\n  {:<8} {:>8} {:>12}", "LEVEL", "PCT", "MIN RANK");
            for (i, (pct, rank)) in distribution
                .level_pct
                .iter()
                .zip(distribution.rank_requirement.iter())
                .enumerate()
            {
                println!("  {:<8} {:>7}% {:>12}", i + 1, pct, rank);
            }
        }

        Commands::Status => {
            if db.get_bot_state().await?.is_none() {
                println!("No bot session found. Run 'memeflow run' to start the bot.");
                return Ok(());
            }
            if config.master_account.is_empty() {
                println!("Master account is not configured.");
                return Ok(());
            }

            let stats = BotStats::load(&db, &config).await?;
            println!("\n{}", stats);
        }

        Commands::Followers => {
            let registry = FollowerRegistry::new(
                db.clone(),
                require(&config.master_account, "master")?,
                config.min_active_balance,
            );
            let followers = registry.followers().await?;

            if followers.is_empty() {
                println!("No followers. Use 'memeflow follow <account> <lamports>' to add one.");
                return Ok(());
            }

            println!(
                "\n{:<44} {:>14} {:>14} {:>8} {:>10}",
                "ACCOUNT", "ALLOCATION", "BALANCE", "ACTIVE", "DELEGATION"
            );
            println!("{}", "-".repeat(94));

            for follower in followers {
                let balance = db.balance(&follower.account_ref).await?;
                let delegation = db
                    .get_delegation(&follower.account_ref)
                    .await?
                    .map(|d| d.status)
                    .unwrap_or_else(|| "-".to_string());
                println!(
                    "{:<44} {:>14} {:>14} {:>8} {:>10}",
                    truncate(&follower.account_ref, 44),
                    lamports_to_sol(follower.allocated_amount),
                    lamports_to_sol(balance),
                    if follower.active { "yes" } else { "no" },
                    delegation
                );
            }
        }

        Commands::Follow { account, lamports } => {
            let master = require(&config.master_account, "master")?;
            db.upsert_copy_settings(&account, master, lamports, true).await?;
            println!(
                "{} now follows {} with {} SOL per trade",
                account,
                master,
                lamports_to_sol(lamports)
            );
        }

        Commands::Unfollow { account } => {
            let master = require(&config.master_account, "master")?;
            if db.set_copy_active(&account, master, false).await? {
                println!("Paused: {}", account);
            } else {
                println!("{} does not follow {}", account, master);
            }
        }

        Commands::Sponsor {
            account,
            sponsor,
            rank,
        } => {
            db.set_sponsor(&account, &sponsor).await?;
            if let Some(rank) = rank {
                let rank: Rank = rank.parse()?;
                db.set_rank(&account, Some(rank)).await?;
            }
            println!("{} sponsored by {}", account, sponsor);
        }

        Commands::Grant {
            follower,
            mint,
            lamports,
        } => {
            let delegations = delegation_manager(&cli, &db)?;
            let prepared = delegations.grant(&follower, &mint, lamports).await?;

            println!("Delegation account: {}", prepared.delegation_account);
            println!("\nTransaction for {} to sign:\n{}", follower, prepared.transaction);
        }

        Commands::Revoke { follower, mint } => {
            let delegations = delegation_manager(&cli, &db)?;
            let prepared = delegations.revoke(&follower, &mint).await?;

            println!("Revoked locally; copying stops immediately.");
            println!("\nTransaction for {} to sign:\n{}", follower, prepared.transaction);
        }

        Commands::Delegation { follower } => {
            let record = db.get_delegation(&follower).await?;
            let Some(record) = record else {
                println!("No delegation on record for {}", follower);
                return Ok(());
            };

            println!("\n=== Delegation: {} ===", follower);
            println!("Account:     {}", record.delegation_account);
            println!("Mint:        {}", record.mint);
            println!("Granted:     {}", record.granted_amount);
            println!("Local State: {}", record.status);

            let delegations = delegation_manager(&cli, &db)?;
            match delegations.current(&follower).await {
                Some(d) => println!("On Chain:    active, {} usable", d.usable_amount()),
                None => println!("On Chain:    inactive"),
            }
        }

        Commands::Preview { follower, profit } => {
            let engine = CommissionEngine::new(db.load_distribution_config().await?)?;
            let upline = db
                .upline_chain(&follower, engine.config().max_upline_depth)
                .await?;

            let Some(d) = engine.settle(&follower, profit, &upline) else {
                println!("No fee due on a profit of {} lamports.", profit);
                return Ok(());
            };

            println!("\n=== Fee Preview: {} ===", follower);
            println!("Realized Profit:  {}", d.realized_profit);
            println!("Fee:              {}", d.fee);
            println!("Master Share:     {}", d.master_share);
            println!("Network Pool:     {}", d.network_pool);

            println!("\n  {:<6} {:<44} {:>8} {:>12}", "LEVEL", "RECIPIENT", "PCT", "AMOUNT");
            for line in &d.lines {
                println!(
                    "  {:<6} {:<44} {:>7}% {:>12}",
                    line.level,
                    truncate(&line.recipient_ref, 44),
                    line.percentage,
                    line.amount
                );
            }
            println!("\nPlatform Residual: {}", d.platform_residual);
        }

        Commands::History { limit } => {
            let trades = db.recent_copy_trades(limit).await?;

            if trades.is_empty() {
                println!("No copy trades yet.");
                return Ok(());
            }

            println!(
                "\n{:<20} {:<14} {:<14} {:>14} {:>10} {:>12}",
                "TIME", "FOLLOWER", "ORIGIN", "INPUT", "STATUS", "PROFIT"
            );
            println!("{}", "-".repeat(89));

            for t in trades {
                println!(
                    "{:<20} {:<14} {:<14} {:>14} {:>10} {:>12}",
                    t.created_at.get(..19).unwrap_or(&t.created_at),
                    truncate(&t.follower_ref, 14),
                    truncate(&t.origin_ref, 14),
                    t.input_amount,
                    t.status,
                    t.realized_profit
                        .map(|p| p.to_string())
                        .unwrap_or_else(|| "-".to_string())
                );
                if let Some(err) = &t.error_message {
                    println!("  └ {}", err);
                }
            }
        }
    }

    Ok(())
}

/// Defaults, then the stored settings row, then CLI flags and environment.
async fn load_config(cli: &Cli, db: &Database) -> Result<CopyConfig> {
    let mut config = db.load_copy_config().await?;
    if let Some(master) = &cli.master {
        config.master_account = master.clone();
    }
    if let Some(platform) = &cli.platform {
        config.platform_account = platform.clone();
    }
    Ok(config)
}

/// Dry-run setting after the `run` flags. Without a flag the layered
/// configuration decides.
fn run_mode(configured: bool, dry_run: bool, live: bool) -> bool {
    if dry_run {
        true
    } else if live {
        false
    } else {
        configured
    }
}

fn executor_client(cli: &Cli) -> Result<Arc<ExecutorClient>> {
    let url = cli
        .executor_url
        .as_deref()
        .context("Executor URL is not configured (--executor-url or EXECUTOR_URL)")?;
    let path = cli
        .executor_keypair
        .as_deref()
        .context("Executor keypair is not configured (--executor-keypair or EXECUTOR_KEYPAIR)")?;

    let keypair = ExecutorKeypair::from_file(path)?;
    Ok(Arc::new(ExecutorClient::new(url, keypair)?))
}

fn delegation_manager(cli: &Cli, db: &Database) -> Result<DelegationManager> {
    let rpc = Arc::new(RpcClient::new(cli.rpc_url.clone())?);
    let authority = ChainDelegationAuthority::new(executor_client(cli)?, rpc);
    Ok(DelegationManager::new(Arc::new(authority), db.clone()))
}

fn require<'a>(value: &'a str, name: &str) -> Result<&'a str> {
    if value.is_empty() {
        anyhow::bail!("No {} account configured (--{} or environment)", name, name);
    }
    Ok(value)
}

fn display_or_unset(value: &str) -> &str {
    if value.is_empty() {
        "(unset)"
    } else {
        value
    }
}

/// Truncate a string with ellipsis if too long.
fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let head: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", head)
    }
}
