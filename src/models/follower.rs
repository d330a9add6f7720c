//! Follower and delegation models.

use serde::{Deserialize, Serialize};

/// A subscribed account replicating the master.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Follower {
    /// Wallet address (base58)
    pub account_ref: String,

    /// Capital ceiling committed per master trade, in lamports
    pub allocated_amount: u64,

    /// Opted in and above the minimum active balance
    pub active: bool,
}

impl Follower {
    pub fn new(account_ref: impl Into<String>, allocated_amount: u64, active: bool) -> Self {
        Self {
            account_ref: account_ref.into(),
            allocated_amount,
            active,
        }
    }
}

/// Authoritative delegation state as read from chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Delegation {
    pub follower_ref: String,

    /// Ceiling the executor may swap on the follower's behalf
    pub granted_amount: u64,

    pub active: bool,
}

impl Delegation {
    /// Amount usable right now; zero once revoked.
    pub fn usable_amount(&self) -> u64 {
        if self.active {
            self.granted_amount
        } else {
            0
        }
    }
}

/// Handle returned when a delegation is prepared.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DelegationRef {
    /// On-chain account that will hold the delegation state
    pub delegation_account: String,

    /// Unsigned transaction (base64) for the follower's wallet to sign
    pub transaction: String,
}
