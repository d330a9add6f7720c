//! Performance-fee split and multi-level commission distribution.
//!
//! For a realized profit `p`:
//! - `fee = floor(p * fee_pct)` is charged to the follower
//! - `master_share = floor(p * master_pct)` goes to the master trader
//! - each network level `L` pays `floor(p * level_pct[L])` to the upline at `L`
//!   if its rank meets `rank_requirement[L]`
//! - whatever is left of `fee` stays with the platform
//!
//! Level amounts are computed against the original profit, never a running
//! remainder. A level whose upline is missing or under-ranked is forfeited to the
//! platform; it is not passed up to the next qualifying upline.

use anyhow::Result;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tracing::{debug, warn};

use crate::models::{CommissionLine, Distribution, UplineChain};

use super::DistributionConfig;

/// `floor(amount * pct / 100)`.
pub fn apply_pct(amount: u64, pct: Decimal) -> u64 {
    (Decimal::from(amount) * pct / dec!(100))
        .floor()
        .to_u64()
        .unwrap_or(0)
}

/// Computes commission payouts. Pure and deterministic for a given upline snapshot.
#[derive(Debug, Clone)]
pub struct CommissionEngine {
    config: DistributionConfig,
}

impl CommissionEngine {
    /// Create an engine, rejecting inconsistent percentage tables.
    pub fn new(config: DistributionConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &DistributionConfig {
        &self.config
    }

    pub fn fee(&self, realized_profit: u64) -> u64 {
        apply_pct(realized_profit, self.config.fee_pct)
    }

    pub fn master_share(&self, realized_profit: u64) -> u64 {
        apply_pct(realized_profit, self.config.master_pct)
    }

    /// Commission lines owed to the follower's uplines.
    ///
    /// Empty for zero or negative profit and for malformed chains.
    pub fn distribute(
        &self,
        follower_ref: &str,
        realized_profit: i64,
        upline: &UplineChain,
    ) -> Vec<CommissionLine> {
        self.settle(follower_ref, realized_profit, upline)
            .map(|d| d.lines)
            .unwrap_or_default()
    }

    /// Full fee breakdown, or `None` when nothing should be charged.
    pub fn settle(
        &self,
        follower_ref: &str,
        realized_profit: i64,
        upline: &UplineChain,
    ) -> Option<Distribution> {
        if realized_profit < 0 {
            debug!(follower = %follower_ref, profit = realized_profit, "Loss, no fee");
            return None;
        }
        let profit = realized_profit as u64;
        if profit == 0 {
            return None;
        }

        if let Err(e) = upline.check_acyclic(follower_ref) {
            warn!(follower = %follower_ref, error = %e, "Malformed upline chain, skipping distribution");
            return None;
        }

        let fee = self.fee(profit);
        let master_share = self.master_share(profit);
        let network_pool = fee.saturating_sub(master_share);

        let depth = self.config.max_upline_depth.min(upline.len());
        let mut lines = Vec::with_capacity(depth);

        for level in 1..=depth {
            let pct = self.config.level_pct[level - 1];
            if pct.is_zero() {
                continue;
            }
            let Some(node) = upline.at_level(level) else {
                break;
            };

            let requirement = self.config.rank_requirement[level - 1];
            if !node.meets(requirement) {
                debug!(
                    follower = %follower_ref,
                    level = level,
                    upline = %node.account_ref,
                    rank = ?node.rank,
                    required = %requirement,
                    "Level forfeited by rank compression"
                );
                continue;
            }

            let amount = apply_pct(profit, pct);
            if amount == 0 {
                continue;
            }

            lines.push(CommissionLine {
                recipient_ref: node.account_ref.clone(),
                level: level as u8,
                percentage: pct,
                amount,
            });
        }

        let paid: u64 = lines.iter().map(|l| l.amount).sum();
        let platform_residual = network_pool.saturating_sub(paid);

        Some(Distribution {
            realized_profit: profit,
            fee,
            master_share,
            network_pool,
            lines,
            platform_residual,
        })
    }
}
