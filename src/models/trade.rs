//! Trade models: master swaps observed on-chain and per-follower replication outcomes.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A swap executed by the master wallet.
///
/// Immutable once observed and identified by `origin_ref`, the on-chain
/// transaction signature.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MasterTrade {
    /// Mint the master spent
    pub input_mint: String,

    /// Mint the master received
    pub output_mint: String,

    /// Amount spent, in the input mint's smallest unit
    pub input_amount: u64,

    /// Amount received, in the output mint's smallest unit
    pub output_amount: u64,

    /// Master's holding of the input mint before the swap; 0 when unknown
    #[serde(default)]
    pub master_input_balance: u64,

    /// Block time of the transaction
    pub observed_at: DateTime<Utc>,

    /// Transaction signature
    pub origin_ref: String,
}

impl MasterTrade {
    /// Part of `held` to sell when mirroring this trade as an exit.
    ///
    /// Scales the follower's holding by the fraction of its holding the master
    /// sold; the whole holding when that fraction is unknown or at least one.
    pub fn scaled_exit(&self, held: u64) -> u64 {
        if self.master_input_balance == 0 || self.input_amount >= self.master_input_balance {
            return held;
        }
        (held as u128 * self.input_amount as u128 / self.master_input_balance as u128) as u64
    }

    /// Short form of the origin signature for log lines.
    pub fn short_ref(&self) -> &str {
        let end = self.origin_ref.len().min(12);
        &self.origin_ref[..end]
    }
}

/// Why a follower's replication did not produce a settled swap.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailureReason {
    /// Follower opted out or is below the minimum active balance
    Inactive,
    /// No active on-chain delegation at check time
    DelegationInactive,
    /// Computed input amount is zero
    AmountTooSmall,
    /// Quote service returned nothing usable
    QuoteUnavailable,
    /// Finality was not reached within the configured bound
    Timeout,
    /// The cycle was cancelled while the swap was in flight
    Cancelled,
    /// Transaction landed but failed on-chain
    Reverted(String),
    /// The execution endpoint rejected or failed the submission
    SubmissionFailed(String),
    /// The follower task ended without reporting
    TaskAborted,
}

impl FailureReason {
    /// Status label used for `copy_trades.status`.
    pub fn status(&self) -> &'static str {
        match self {
            FailureReason::Inactive
            | FailureReason::DelegationInactive
            | FailureReason::AmountTooSmall => "skipped",
            _ => "failed",
        }
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::Inactive => write!(f, "inactive"),
            FailureReason::DelegationInactive => write!(f, "delegation inactive"),
            FailureReason::AmountTooSmall => write!(f, "amount too small"),
            FailureReason::QuoteUnavailable => write!(f, "quote unavailable"),
            FailureReason::Timeout => write!(f, "timeout"),
            FailureReason::Cancelled => write!(f, "cancelled"),
            FailureReason::Reverted(msg) => write!(f, "reverted: {}", msg),
            FailureReason::SubmissionFailed(msg) => write!(f, "submission failed: {}", msg),
            FailureReason::TaskAborted => write!(f, "task aborted"),
        }
    }
}

/// Amounts actually moved by a confirmed swap, read from the settled transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settlement {
    pub input_amount: u64,
    pub output_amount: u64,
}

/// Result of replicating one master trade for one follower. Terminal for the cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SwapOutcome {
    pub follower_ref: String,
    pub result: Result<ExecutedSwap, FailureReason>,
}

/// A swap that reached finality.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutedSwap {
    /// Transaction signature, or `simulated` in dry-run mode
    pub tx_ref: String,
    pub realized_input_amount: u64,
    pub realized_output_amount: u64,
    /// True when produced from a quote instead of a submission
    #[serde(default)]
    pub simulated: bool,
}

impl SwapOutcome {
    pub fn failure(follower_ref: impl Into<String>, reason: FailureReason) -> Self {
        Self {
            follower_ref: follower_ref.into(),
            result: Err(reason),
        }
    }

    pub fn success(follower_ref: impl Into<String>, swap: ExecutedSwap) -> Self {
        Self {
            follower_ref: follower_ref.into(),
            result: Ok(swap),
        }
    }

    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }

    pub fn failure_reason(&self) -> Option<&FailureReason> {
        self.result.as_ref().err()
    }

    /// Status label used for `copy_trades.status`.
    pub fn status(&self) -> &'static str {
        match &self.result {
            Ok(swap) if swap.simulated => "simulated",
            Ok(_) => "executed",
            Err(reason) => reason.status(),
        }
    }
}

/// Split outcomes into successes and failures, keeping arrival order.
pub fn partition_outcomes(outcomes: &[SwapOutcome]) -> (Vec<&SwapOutcome>, Vec<&SwapOutcome>) {
    outcomes.iter().partition(|o| o.is_success())
}
