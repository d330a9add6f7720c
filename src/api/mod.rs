//! Upstream clients: Solana RPC, Jupiter quotes and the swap executor.

mod chain;
mod executor_client;
mod jupiter_client;
mod rpc_client;
mod types;

pub use chain::{ChainDelegationAuthority, ChainSwapVenue};
pub use executor_client::{ExecutorClient, ExecutorKeypair};
pub use jupiter_client::JupiterClient;
pub use rpc_client::{RpcClient, DEFAULT_RPC_URL};
pub use types::*;
