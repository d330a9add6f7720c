//! Data models for master trades, followers, delegations and the referral network.

mod follower;
mod network;
mod trade;

pub use follower::{Delegation, DelegationRef, Follower};
pub use network::{
    CommissionLine, Distribution, Rank, UplineChain, UplineNode, MAX_UPLINE_DEPTH,
};
pub use trade::{partition_outcomes, ExecutedSwap, FailureReason, MasterTrade, Settlement, SwapOutcome};
