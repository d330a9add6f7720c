//! Client for the platform swap executor.
//!
//! The executor service owns the on-chain copy-trade program. It builds and lands
//! delegated swaps and prepares delegation / revocation transactions for
//! followers to sign. Every request body is signed with the executor keypair:
//! - `X-Executor-Pubkey`: base58 public key
//! - `X-Executor-Timestamp`: unix seconds
//! - `X-Executor-Signature`: hex ed25519 signature over `timestamp || "." || body`

use std::path::Path;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use chrono::Utc;
use ed25519_dalek::{Signer, SigningKey};
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use super::types::*;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Executor keypair loaded from a Solana CLI keypair file.
pub struct ExecutorKeypair {
    signing_key: SigningKey,
}

impl ExecutorKeypair {
    /// Parse the 64-byte JSON array format written by `solana-keygen`.
    pub fn from_json(contents: &str) -> Result<Self> {
        let bytes: Vec<u8> =
            serde_json::from_str(contents).context("Keypair file is not a JSON byte array")?;
        let bytes: [u8; 64] = bytes
            .try_into()
            .map_err(|v: Vec<u8>| anyhow!("Keypair must be 64 bytes, got {}", v.len()))?;
        let signing_key = SigningKey::from_keypair_bytes(&bytes)
            .map_err(|e| anyhow!("Invalid executor keypair: {}", e))?;

        Ok(Self { signing_key })
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read keypair {}", path.display()))?;
        Self::from_json(&contents)
    }

    /// Base58 public key.
    pub fn pubkey(&self) -> String {
        bs58::encode(self.signing_key.verifying_key().as_bytes()).into_string()
    }

    /// Hex signature over `timestamp || "." || body`.
    pub fn sign_request(&self, timestamp: i64, body: &[u8]) -> String {
        let mut message = timestamp.to_string().into_bytes();
        message.push(b'.');
        message.extend_from_slice(body);
        hex::encode(self.signing_key.sign(&message).to_bytes())
    }
}

/// Authenticated client for the executor service.
pub struct ExecutorClient {
    http: Client,
    base_url: String,
    keypair: ExecutorKeypair,
}

impl ExecutorClient {
    pub fn new(base_url: impl Into<String>, keypair: ExecutorKeypair) -> Result<Self> {
        let http = Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            http,
            base_url: base_url.into(),
            keypair,
        })
    }

    pub fn executor_pubkey(&self) -> String {
        self.keypair.pubkey()
    }

    fn build_headers(&self, body: &[u8]) -> Result<HeaderMap> {
        let timestamp = Utc::now().timestamp();
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert("X-Executor-Pubkey", HeaderValue::from_str(&self.keypair.pubkey())?);
        headers.insert("X-Executor-Timestamp", HeaderValue::from_str(&timestamp.to_string())?);
        headers.insert(
            "X-Executor-Signature",
            HeaderValue::from_str(&self.keypair.sign_request(timestamp, body))?,
        );
        Ok(headers)
    }

    async fn post<B: Serialize, T: DeserializeOwned>(&self, path: &str, payload: &B) -> Result<T> {
        let url = format!("{}{}", self.base_url, path);
        let body = serde_json::to_vec(payload)?;

        debug!(url = %url, "Executor request");

        let response = self
            .http
            .post(&url)
            .headers(self.build_headers(&body)?)
            .body(body)
            .send()
            .await
            .with_context(|| format!("Failed to reach executor at {}", path))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            anyhow::bail!("Executor {} failed: {} - {}", path, status, text);
        }

        response
            .json()
            .await
            .with_context(|| format!("Failed to parse executor {} response", path))
    }

    /// Submit a delegated swap. Returns the transaction signature.
    pub async fn submit_swap(&self, submission: &SwapSubmission) -> Result<String> {
        let response: SwapSubmissionResponse = self.post("/swaps", submission).await?;
        Ok(response.signature)
    }

    /// Build the delegation transaction for a follower to sign.
    pub async fn prepare_delegation(
        &self,
        user: &str,
        token_mint: &str,
        amount: u64,
    ) -> Result<DelegationResponse> {
        let request = DelegationRequest {
            user: user.to_string(),
            token_mint: token_mint.to_string(),
            amount: Some(amount.to_string()),
        };
        self.post("/delegations", &request).await
    }

    /// Build the revocation transaction for a follower to sign.
    pub async fn prepare_revocation(&self, user: &str, token_mint: &str) -> Result<DelegationResponse> {
        let request = DelegationRequest {
            user: user.to_string(),
            token_mint: token_mint.to_string(),
            amount: None,
        };
        self.post("/delegations/revoke", &request).await
    }
}
