//! On-chain implementations of the swap venue and delegation authority.
//!
//! Submissions and delegation transactions go through the executor service;
//! settlement and delegation state are read straight from the RPC node.

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use tracing::{debug, warn};

use crate::models::{Delegation, DelegationRef, Settlement};
use crate::trading::{DelegationAuthority, SettlementStatus, SwapOrder, SwapVenue};

use super::executor_client::ExecutorClient;
use super::rpc_client::RpcClient;
use super::types::SwapSubmission;

const DISCRIMINATOR_LEN: usize = 8;
const PUBKEY_LEN: usize = 32;
const DELEGATION_ACCOUNT_LEN: usize = DISCRIMINATOR_LEN + PUBKEY_LEN * 2 + 8 + 1 + 1;

/// Decoded delegated-authority account.
///
/// Layout: `discriminator[8] | user[32] | swap_executor[32] | delegated_amount u64 LE
/// | is_active u8 | bump u8`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DelegationAccount {
    pub user: String,
    pub swap_executor: String,
    pub delegated_amount: u64,
    pub is_active: bool,
    pub bump: u8,
}

pub fn decode_delegation_account(data: &[u8]) -> Result<DelegationAccount> {
    if data.len() < DELEGATION_ACCOUNT_LEN {
        bail!(
            "Delegation account too short: {} bytes, expected {}",
            data.len(),
            DELEGATION_ACCOUNT_LEN
        );
    }

    let mut offset = DISCRIMINATOR_LEN;
    let user = bs58::encode(&data[offset..offset + PUBKEY_LEN]).into_string();
    offset += PUBKEY_LEN;
    let swap_executor = bs58::encode(&data[offset..offset + PUBKEY_LEN]).into_string();
    offset += PUBKEY_LEN;

    let mut amount = [0u8; 8];
    amount.copy_from_slice(&data[offset..offset + 8]);
    offset += 8;

    let is_active = match data[offset] {
        0 => false,
        1 => true,
        other => bail!("Invalid is_active flag: {}", other),
    };

    Ok(DelegationAccount {
        user,
        swap_executor,
        delegated_amount: u64::from_le_bytes(amount),
        is_active,
        bump: data[offset + 1],
    })
}

/// Swaps submitted through the executor and settled on chain.
pub struct ChainSwapVenue {
    executor: Arc<ExecutorClient>,
    rpc: Arc<RpcClient>,
    base_mint: String,
}

impl ChainSwapVenue {
    pub fn new(executor: Arc<ExecutorClient>, rpc: Arc<RpcClient>, base_mint: impl Into<String>) -> Self {
        Self {
            executor,
            rpc,
            base_mint: base_mint.into(),
        }
    }
}

#[async_trait]
impl SwapVenue for ChainSwapVenue {
    async fn submit(&self, order: &SwapOrder) -> Result<String> {
        let submission = SwapSubmission {
            follower: order.follower_ref.clone(),
            input_mint: order.input_mint.clone(),
            output_mint: order.output_mint.clone(),
            amount: order.amount.to_string(),
            minimum_out_amount: order.quote.min_out_amount.to_string(),
            quote: order.quote.route.clone(),
        };
        self.executor.submit_swap(&submission).await
    }

    async fn settlement(&self, tx_ref: &str, order: &SwapOrder) -> Result<SettlementStatus> {
        let Some(status) = self.rpc.get_signature_status(tx_ref).await? else {
            return Ok(SettlementStatus::Pending);
        };
        if let Some(err) = status.err {
            return Ok(SettlementStatus::Reverted(err.to_string()));
        }
        if !status.is_settled() {
            return Ok(SettlementStatus::Pending);
        }

        let Some(record) = self.rpc.get_transaction(tx_ref).await? else {
            debug!(tx = %tx_ref, "Settled but transaction not yet indexed");
            return Ok(SettlementStatus::Pending);
        };
        if record.is_failed() {
            let reason = record
                .meta
                .as_ref()
                .and_then(|m| m.err.as_ref())
                .map(|e| e.to_string())
                .unwrap_or_else(|| "unknown error".to_string());
            return Ok(SettlementStatus::Reverted(reason));
        }

        let deltas = record.balance_deltas(&order.follower_ref, &self.base_mint);

        let input_amount = deltas
            .get(&order.input_mint)
            .filter(|d| **d < 0)
            .and_then(|d| u64::try_from(d.unsigned_abs()).ok())
            .unwrap_or(order.amount);

        let output_amount = match deltas
            .get(&order.output_mint)
            .filter(|d| **d > 0)
            .and_then(|d| u64::try_from(*d).ok())
        {
            Some(amount) => amount,
            None => {
                warn!(
                    tx = %tx_ref,
                    follower = %order.follower_ref,
                    "Output balance change not found, using minimum out"
                );
                order.quote.min_out_amount
            }
        };

        Ok(SettlementStatus::Settled(Settlement {
            input_amount,
            output_amount,
        }))
    }
}

/// Delegations prepared by the executor and read from their on-chain accounts.
pub struct ChainDelegationAuthority {
    executor: Arc<ExecutorClient>,
    rpc: Arc<RpcClient>,
}

impl ChainDelegationAuthority {
    pub fn new(executor: Arc<ExecutorClient>, rpc: Arc<RpcClient>) -> Self {
        Self { executor, rpc }
    }
}

#[async_trait]
impl DelegationAuthority for ChainDelegationAuthority {
    async fn prepare_grant(&self, follower_ref: &str, mint: &str, amount: u64) -> Result<DelegationRef> {
        let response = self
            .executor
            .prepare_delegation(follower_ref, mint, amount)
            .await?;
        if response.delegation_account.is_empty() {
            bail!("Executor did not return a delegation account");
        }
        Ok(DelegationRef {
            delegation_account: response.delegation_account,
            transaction: response.transaction,
        })
    }

    async fn prepare_revoke(&self, follower_ref: &str, mint: &str) -> Result<DelegationRef> {
        let response = self.executor.prepare_revocation(follower_ref, mint).await?;
        Ok(DelegationRef {
            delegation_account: response.delegation_account,
            transaction: response.transaction,
        })
    }

    async fn read(&self, delegation_account: &str) -> Result<Option<Delegation>> {
        let Some(info) = self.rpc.get_account_info(delegation_account).await? else {
            return Ok(None);
        };

        let data = STANDARD
            .decode(&info.data.0)
            .context("Delegation account data is not base64")?;
        let account = decode_delegation_account(&data)?;

        Ok(Some(Delegation {
            follower_ref: account.user,
            granted_amount: account.delegated_amount,
            active: account.is_active,
        }))
    }
}
