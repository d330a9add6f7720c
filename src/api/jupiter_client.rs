//! Jupiter aggregator client for swap quotes.

use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use backoff::ExponentialBackoff;
use reqwest::{Client, StatusCode};
use tracing::{debug, warn};

use crate::trading::{Quote, QuoteSource};

use super::types::QuoteResponse;

pub const JUPITER_QUOTE_URL: &str = "https://quote-api.jup.ag/v6";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);
const MAX_RETRY_ELAPSED: Duration = Duration::from_secs(8);

/// Client for the Jupiter quote API.
pub struct JupiterClient {
    client: Client,
    base_url: String,
}

impl JupiterClient {
    pub fn new() -> Result<Self> {
        Self::with_base_url(JUPITER_QUOTE_URL.to_string())
    }

    /// Create with custom base URL (for testing).
    pub fn with_base_url(base_url: String) -> Result<Self> {
        let client = Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self { client, base_url })
    }

    /// Fetch a single quote without retrying.
    async fn fetch_quote(
        &self,
        input_mint: &str,
        output_mint: &str,
        amount: u64,
        slippage_bps: u16,
    ) -> std::result::Result<QuoteResponse, backoff::Error<anyhow::Error>> {
        let url = format!(
            "{}/quote?inputMint={}&outputMint={}&amount={}&slippageBps={}",
            self.base_url, input_mint, output_mint, amount, slippage_bps
        );

        debug!(url = %url, "Fetching quote");

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .context("Failed to fetch quote")
            .map_err(backoff::Error::transient)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let err = anyhow!("Quote request failed: {} - {}", status, body);
            // No route or bad mint will not improve with retries
            return Err(if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
                backoff::Error::transient(err)
            } else {
                backoff::Error::permanent(err)
            });
        }

        response
            .json()
            .await
            .context("Failed to parse quote response")
            .map_err(backoff::Error::permanent)
    }
}

#[async_trait]
impl QuoteSource for JupiterClient {
    async fn quote(
        &self,
        input_mint: &str,
        output_mint: &str,
        amount: u64,
        slippage_bps: u16,
    ) -> Result<Quote> {
        let policy = ExponentialBackoff {
            initial_interval: Duration::from_millis(250),
            max_elapsed_time: Some(MAX_RETRY_ELAPSED),
            ..Default::default()
        };

        let response = backoff::future::retry(policy, || {
            self.fetch_quote(input_mint, output_mint, amount, slippage_bps)
        })
        .await
        .map_err(|e| {
            warn!(error = %e, input = %input_mint, output = %output_mint, "Quote unavailable");
            e
        })?;

        Quote::from_response(response, slippage_bps)
    }
}
