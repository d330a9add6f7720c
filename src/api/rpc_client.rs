//! Solana JSON-RPC client for activity, transaction and account lookups.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use tracing::debug;

use crate::trading::ActivityFeed;

use super::types::*;

pub const DEFAULT_RPC_URL: &str = "https://api.mainnet-beta.solana.com";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Client for a Solana RPC node (read-only operations).
pub struct RpcClient {
    client: Client,
    url: String,
    next_id: AtomicU64,
}

impl RpcClient {
    /// Create a client for the given RPC endpoint.
    pub fn new(url: impl Into<String>) -> Result<Self> {
        let client = Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            url: url.into(),
            next_id: AtomicU64::new(1),
        })
    }

    /// Issue one JSON-RPC call. `Ok(None)` when the node returns a null result.
    async fn call<T: DeserializeOwned>(&self, method: &str, params: Value) -> Result<Option<T>> {
        let request = RpcRequest {
            jsonrpc: "2.0",
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            method,
            params,
        };

        debug!(method = %method, "RPC call");

        let response = self
            .client
            .post(&self.url)
            .json(&request)
            .send()
            .await
            .with_context(|| format!("Failed to send {}", method))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("{} request failed: {} - {}", method, status, body);
        }

        let body: RpcResponse<T> = response
            .json()
            .await
            .with_context(|| format!("Failed to parse {} response", method))?;

        if let Some(err) = body.error {
            anyhow::bail!("{} returned error {}: {}", method, err.code, err.message);
        }

        Ok(body.result)
    }

    /// Most recent signatures touching an address, newest first.
    pub async fn get_signatures_for_address(
        &self,
        address: &str,
        limit: u32,
    ) -> Result<Vec<SignatureInfo>> {
        let params = json!([address, { "limit": limit.min(1000), "commitment": "confirmed" }]);
        Ok(self
            .call("getSignaturesForAddress", params)
            .await?
            .unwrap_or_default())
    }

    /// Parsed transaction, or `None` if the node does not have it yet.
    pub async fn get_transaction(&self, signature: &str) -> Result<Option<TransactionRecord>> {
        let params = json!([signature, {
            "encoding": "jsonParsed",
            "commitment": "confirmed",
            "maxSupportedTransactionVersion": 0
        }]);
        self.call("getTransaction", params).await
    }

    /// Confirmation status of a single signature.
    pub async fn get_signature_status(&self, signature: &str) -> Result<Option<SignatureStatus>> {
        let params = json!([[signature], { "searchTransactionHistory": true }]);
        let statuses: Option<RpcContextValue<Vec<Option<SignatureStatus>>>> =
            self.call("getSignatureStatuses", params).await?;

        Ok(statuses
            .and_then(|s| s.value.into_iter().next())
            .flatten())
    }

    /// Raw account data, or `None` if the account does not exist.
    pub async fn get_account_info(&self, address: &str) -> Result<Option<AccountInfo>> {
        let params = json!([address, { "encoding": "base64", "commitment": "confirmed" }]);
        let info: Option<RpcContextValue<Option<AccountInfo>>> =
            self.call("getAccountInfo", params).await?;
        Ok(info.and_then(|i| i.value))
    }
}

#[async_trait]
impl ActivityFeed for RpcClient {
    async fn recent_signatures(&self, account: &str, limit: u32) -> Result<Vec<SignatureInfo>> {
        self.get_signatures_for_address(account, limit).await
    }

    async fn transaction(&self, signature: &str) -> Result<Option<TransactionRecord>> {
        self.get_transaction(signature).await
    }
}
