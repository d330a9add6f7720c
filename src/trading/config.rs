//! Copy-trading and commission configuration.

use anyhow::{bail, Result};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use crate::models::{Rank, MAX_UPLINE_DEPTH};

/// Wrapped SOL mint; native SOL balances are reported against it.
pub const WRAPPED_SOL_MINT: &str = "So11111111111111111111111111111111111111112";

pub const LAMPORTS_PER_SOL: u64 = 1_000_000_000;

/// Configuration for monitoring and replication.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CopyConfig {
    /// Wallet whose swaps are replicated
    pub master_account: String,

    /// Account that receives undistributed commission
    pub platform_account: String,

    /// Mint profits are measured in
    pub base_mint: String,

    /// Seconds between poll cycles
    pub poll_interval_secs: u64,

    /// How far back the first cycle looks (seconds)
    pub initial_lookback_secs: i64,

    /// Upper bound on concurrent follower swaps
    pub max_concurrent_swaps: usize,

    /// Bound on waiting for a submitted swap to finalize (seconds)
    pub finality_timeout_secs: u64,

    /// Slippage tolerance in basis points
    pub slippage_bps: u16,

    /// Signatures fetched per poll
    pub feed_page_limit: u32,

    /// Ledger balance below which a follower is treated as inactive (lamports)
    pub min_active_balance: u64,

    /// Quote but never submit
    pub dry_run: bool,
}

impl Default for CopyConfig {
    fn default() -> Self {
        Self {
            master_account: String::new(),
            platform_account: String::new(),
            base_mint: WRAPPED_SOL_MINT.to_string(),
            poll_interval_secs: 60,
            initial_lookback_secs: 3600,
            max_concurrent_swaps: 4,
            finality_timeout_secs: 60,
            slippage_bps: 50,
            feed_page_limit: 100,
            min_active_balance: LAMPORTS_PER_SOL / 10,
            dry_run: true,
        }
    }
}

impl CopyConfig {
    pub fn validate(&self) -> Result<()> {
        if self.master_account.is_empty() {
            bail!("Master account is not configured");
        }
        if self.platform_account.is_empty() {
            bail!("Platform account is not configured");
        }
        if self.max_concurrent_swaps == 0 {
            bail!("max_concurrent_swaps must be at least 1");
        }
        if self.poll_interval_secs == 0 {
            bail!("poll_interval_secs must be at least 1");
        }
        if self.slippage_bps >= 10_000 {
            bail!("slippage_bps must be below 10000");
        }
        Ok(())
    }
}

/// Performance-fee split and per-level commission table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DistributionConfig {
    /// Total performance fee, percent of realized profit
    pub fee_pct: Decimal,

    /// Master trader's part of the fee, percent of realized profit
    pub master_pct: Decimal,

    /// Commission per network level (index 0 = level 1), percent of realized profit
    pub level_pct: [Decimal; MAX_UPLINE_DEPTH],

    /// Minimum rank an upline needs to be paid at each level
    pub rank_requirement: [Rank; MAX_UPLINE_DEPTH],

    /// Levels walked, at most 8
    pub max_upline_depth: usize,
}

impl Default for DistributionConfig {
    fn default() -> Self {
        Self {
            fee_pct: dec!(30),
            master_pct: dec!(10),
            level_pct: [
                dec!(5),
                dec!(4),
                dec!(3),
                dec!(2),
                dec!(2),
                dec!(2),
                dec!(1),
                dec!(1),
            ],
            rank_requirement: [
                Rank::Unranked,
                Rank::V1,
                Rank::V2,
                Rank::V3,
                Rank::V4,
                Rank::V5,
                Rank::V6,
                Rank::V7,
            ],
            max_upline_depth: MAX_UPLINE_DEPTH,
        }
    }
}

impl DistributionConfig {
    /// Percent of profit reserved for the network.
    pub fn network_pct(&self) -> Decimal {
        self.fee_pct - self.master_pct
    }

    pub fn level_pct_total(&self) -> Decimal {
        self.level_pct.iter().copied().sum()
    }

    pub fn validate(&self) -> Result<()> {
        if self.fee_pct < Decimal::ZERO || self.fee_pct > dec!(100) {
            bail!("fee_pct must be within 0..=100, got {}", self.fee_pct);
        }
        if self.master_pct < Decimal::ZERO || self.master_pct > self.fee_pct {
            bail!(
                "master_pct ({}) must be within 0..=fee_pct ({})",
                self.master_pct,
                self.fee_pct
            );
        }
        if let Some((i, pct)) = self
            .level_pct
            .iter()
            .enumerate()
            .find(|(_, p)| **p < Decimal::ZERO)
        {
            bail!("level {} percentage is negative: {}", i + 1, pct);
        }
        if self.level_pct_total() > self.network_pct() {
            bail!(
                "level percentages sum to {} but only {} is available to the network",
                self.level_pct_total(),
                self.network_pct()
            );
        }
        if self.max_upline_depth == 0 || self.max_upline_depth > MAX_UPLINE_DEPTH {
            bail!(
                "max_upline_depth must be within 1..={}, got {}",
                MAX_UPLINE_DEPTH,
                self.max_upline_depth
            );
        }
        Ok(())
    }
}

/// Lamports to SOL for display.
pub fn lamports_to_sol(lamports: u64) -> Decimal {
    Decimal::from(lamports) / Decimal::from(LAMPORTS_PER_SOL)
}
