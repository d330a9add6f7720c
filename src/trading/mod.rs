//! Copy-trading logic: trade detection, replication, delegation and commissions.

mod commission;
mod config;
mod delegation;
mod executor;
mod monitor;
mod registry;

pub use commission::CommissionEngine;
pub use config::{lamports_to_sol, CopyConfig, DistributionConfig};
pub use delegation::{DelegationAuthority, DelegationManager};
pub use executor::{
    ExecutionContext, ProportionalExecutor, Quote, QuoteSource, SettlementStatus, SwapOrder,
    SwapVenue,
};
pub use monitor::{ActivityFeed, TradeMonitor};
pub use registry::FollowerRegistry;
