//! Master wallet activity monitor.
//!
//! Each poll reads one page of recent signatures for the master, keeps the
//! successful ones newer than the watermark, and turns those that look like swaps
//! into [`MasterTrade`]s in chronological order.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use futures::stream::{self, StreamExt};
use tracing::{debug, info, warn};

use crate::api::{SignatureInfo, TransactionRecord};
use crate::models::MasterTrade;

/// Concurrent transaction fetches per poll.
const FETCH_CONCURRENCY: usize = 8;

const SWAP_LOG_MARKERS: [&str; 3] = ["Instruction: Swap", "Program log: Swap", "Instruction: Route"];

/// Read access to an account's transaction history.
#[async_trait]
pub trait ActivityFeed: Send + Sync {
    /// Most recent signatures for `account`, newest first.
    async fn recent_signatures(&self, account: &str, limit: u32) -> Result<Vec<SignatureInfo>>;

    async fn transaction(&self, signature: &str) -> Result<Option<TransactionRecord>>;
}

/// Whether any log line marks a swap or aggregator route.
pub fn is_swap(logs: &[String]) -> bool {
    logs.iter()
        .any(|line| SWAP_LOG_MARKERS.iter().any(|marker| line.contains(marker)))
}

/// Normalize a swap from the master's balance changes.
///
/// The mint with the largest decrease is the input, the one with the largest
/// increase the output. `None` when the transaction failed or either side is missing.
pub fn extract_trade(
    signature: &str,
    record: &TransactionRecord,
    master: &str,
    base_mint: &str,
) -> Option<MasterTrade> {
    if record.is_failed() {
        return None;
    }

    let deltas = record.balance_deltas(master, base_mint);

    let (input_mint, spent) = deltas
        .iter()
        .filter(|(_, d)| **d < 0)
        .min_by(|a, b| a.1.cmp(b.1).then_with(|| a.0.cmp(b.0)))?;
    let (output_mint, received) = deltas
        .iter()
        .filter(|(_, d)| **d > 0)
        .max_by(|a, b| a.1.cmp(b.1).then_with(|| b.0.cmp(a.0)))?;

    let observed_at = record
        .block_time
        .and_then(|t| Utc.timestamp_opt(t, 0).single())
        .unwrap_or_else(Utc::now);

    Some(MasterTrade {
        input_mint: input_mint.clone(),
        output_mint: output_mint.clone(),
        input_amount: u64::try_from(spent.unsigned_abs()).ok()?,
        output_amount: u64::try_from(*received).ok()?,
        master_input_balance: record.pre_balance(master, input_mint, base_mint),
        observed_at,
        origin_ref: signature.to_string(),
    })
}

/// Polls the master's activity feed.
pub struct TradeMonitor {
    feed: Arc<dyn ActivityFeed>,
    master: String,
    base_mint: String,
    page_limit: u32,
}

impl TradeMonitor {
    pub fn new(
        feed: Arc<dyn ActivityFeed>,
        master: impl Into<String>,
        base_mint: impl Into<String>,
        page_limit: u32,
    ) -> Self {
        Self {
            feed,
            master: master.into(),
            base_mint: base_mint.into(),
            page_limit,
        }
    }

    /// Swaps observed at or after `since`, oldest first.
    ///
    /// Stops at the first transaction that cannot be fetched, so everything
    /// returned precedes any gap. Upstream failures yield an empty list; the
    /// next poll retries.
    pub async fn poll_since(&self, since: DateTime<Utc>) -> Vec<MasterTrade> {
        let signatures = match self.feed.recent_signatures(&self.master, self.page_limit).await {
            Ok(signatures) => signatures,
            Err(e) => {
                warn!(master = %self.master, error = %e, "Activity feed unavailable");
                return Vec::new();
            }
        };

        let cutoff = since.timestamp();
        let mut fresh: Vec<String> = signatures
            .into_iter()
            .filter(|s| s.err.is_none())
            .filter(|s| s.block_time.map(|t| t >= cutoff).unwrap_or(false))
            .map(|s| s.signature)
            .collect();
        fresh.reverse();

        if fresh.is_empty() {
            return Vec::new();
        }
        debug!(count = fresh.len(), "New master transactions");

        let records: Vec<(String, Result<Option<TransactionRecord>>)> = stream::iter(fresh)
            .map(|signature| async move {
                let record = self.feed.transaction(&signature).await;
                (signature, record)
            })
            .buffered(FETCH_CONCURRENCY)
            .collect()
            .await;

        let mut trades = Vec::new();
        for (signature, record) in records {
            let record = match record {
                Ok(Some(record)) => record,
                Ok(None) => {
                    debug!(signature = %signature, "Transaction not yet available");
                    break;
                }
                Err(e) => {
                    warn!(signature = %signature, error = %e, "Failed to fetch transaction");
                    break;
                }
            };

            let logs = record
                .meta
                .as_ref()
                .map(|m| m.log_messages.as_slice())
                .unwrap_or_default();
            if !is_swap(logs) {
                continue;
            }

            match extract_trade(&signature, &record, &self.master, &self.base_mint) {
                Some(trade) => {
                    info!(
                        origin = %trade.short_ref(),
                        input = %trade.input_mint,
                        output = %trade.output_mint,
                        amount = trade.input_amount,
                        "Master swap detected"
                    );
                    trades.push(trade);
                }
                None => debug!(signature = %signature, "Swap without extractable amounts"),
            }
        }

        trades
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::bail;
    use serde_json::json;
    use std::collections::HashMap;

    const MASTER: &str = "Master111";
    const SOL: &str = "So11111111111111111111111111111111111111112";
    const BONK: &str = "DezXAZ8z7PnrnRJjz3wXBoRgixCa6xjnB7YaB1pPB263";

    fn swap_record(block_time: i64, logs: &[&str], spent_lamports: u64, received: u64) -> TransactionRecord {
        serde_json::from_value(json!({
            "slot": 1,
            "blockTime": block_time,
            "meta": {
                "err": null,
                "fee": 5000,
                "preBalances": [10_000_000_000u64, 0],
                "postBalances": [10_000_000_000u64 - spent_lamports - 5000, 0],
                "preTokenBalances": [],
                "postTokenBalances": [{
                    "accountIndex": 1,
                    "mint": BONK,
                    "owner": MASTER,
                    "uiTokenAmount": {"amount": received.to_string(), "decimals": 5}
                }],
                "logMessages": logs
            },
            "transaction": {"signatures": ["x"], "message": {"accountKeys": [MASTER, "Ata"]}}
        }))
        .unwrap()
    }

    fn sig(signature: &str, block_time: i64, failed: bool) -> SignatureInfo {
        serde_json::from_value(json!({
            "signature": signature,
            "slot": 1,
            "err": if failed { json!({"InstructionError": [0, "Custom"]}) } else { json!(null) },
            "blockTime": block_time
        }))
        .unwrap()
    }

    struct FakeFeed {
        signatures: Vec<SignatureInfo>,
        records: HashMap<String, TransactionRecord>,
        down: bool,
    }

    #[async_trait]
    impl ActivityFeed for FakeFeed {
        async fn recent_signatures(&self, _account: &str, limit: u32) -> Result<Vec<SignatureInfo>> {
            if self.down {
                bail!("connection refused");
            }
            Ok(self.signatures.iter().take(limit as usize).cloned().collect())
        }

        async fn transaction(&self, signature: &str) -> Result<Option<TransactionRecord>> {
            Ok(self.records.get(signature).cloned())
        }
    }

    fn at(ts: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(ts, 0).unwrap()
    }

    #[test]
    fn test_is_swap() {
        let logs = |l: &str| vec![l.to_string()];
        assert!(is_swap(&logs("Program log: Instruction: Swap")));
        assert!(is_swap(&logs("Program log: Instruction: Route")));
        assert!(is_swap(&logs("Program log: Swap2")));
        assert!(!is_swap(&logs("Program log: Instruction: Transfer")));
        assert!(!is_swap(&[]));
    }

    #[test]
    fn test_extract_buy() {
        let record = swap_record(1_000, &["Program log: Instruction: Route"], 2_000_000_000, 777);
        let trade = extract_trade("sigA", &record, MASTER, SOL).unwrap();
        assert_eq!(trade.input_mint, SOL);
        assert_eq!(trade.input_amount, 2_000_000_000);
        assert_eq!(trade.output_mint, BONK);
        assert_eq!(trade.output_amount, 777);
        assert_eq!(trade.origin_ref, "sigA");
        assert_eq!(trade.observed_at, at(1_000));
        assert_eq!(trade.master_input_balance, 10_000_000_000);
    }

    #[test]
    fn test_extract_requires_both_sides() {
        // Only the fee moved: nothing spent on a swap, nothing received
        let record = swap_record(1_000, &["Program log: Instruction: Swap"], 0, 0);
        assert!(extract_trade("sigA", &record, MASTER, SOL).is_none());
    }

    #[tokio::test]
    async fn test_poll_filters_and_orders() {
        let mut records = HashMap::new();
        records.insert(
            "new".to_string(),
            swap_record(300, &["Program log: Instruction: Swap"], 1_000, 10),
        );
        records.insert(
            "mid".to_string(),
            swap_record(200, &["Program log: Instruction: Route"], 2_000, 20),
        );
        records.insert(
            "transfer".to_string(),
            swap_record(250, &["Program log: Instruction: Transfer"], 3_000, 30),
        );
        records.insert(
            "old".to_string(),
            swap_record(100, &["Program log: Instruction: Swap"], 4_000, 40),
        );

        let feed = FakeFeed {
            signatures: vec![
                sig("new", 300, false),
                sig("transfer", 250, false),
                sig("failed", 220, true),
                sig("mid", 200, false),
                sig("old", 100, false),
            ],
            records,
            down: false,
        };
        let monitor = TradeMonitor::new(Arc::new(feed), MASTER, SOL, 100);

        let trades = monitor.poll_since(at(101)).await;
        let refs: Vec<&str> = trades.iter().map(|t| t.origin_ref.as_str()).collect();
        assert_eq!(refs, vec!["mid", "new"]);

        // A trade in the watermark's own second is still returned
        let trades = monitor.poll_since(at(300)).await;
        assert_eq!(trades.len(), 1);
        assert_eq!(trades[0].origin_ref, "new");

        assert!(monitor.poll_since(at(301)).await.is_empty());
    }

    #[tokio::test]
    async fn test_poll_stops_at_unfetchable_transaction() {
        let mut records = HashMap::new();
        records.insert(
            "old".to_string(),
            swap_record(100, &["Program log: Instruction: Swap"], 4_000, 40),
        );
        records.insert(
            "new".to_string(),
            swap_record(300, &["Program log: Instruction: Swap"], 1_000, 10),
        );

        // "mid" is listed but its body is not available yet
        let feed = FakeFeed {
            signatures: vec![
                sig("new", 300, false),
                sig("mid", 200, false),
                sig("old", 100, false),
            ],
            records,
            down: false,
        };
        let monitor = TradeMonitor::new(Arc::new(feed), MASTER, SOL, 100);

        let trades = monitor.poll_since(at(0)).await;
        let refs: Vec<&str> = trades.iter().map(|t| t.origin_ref.as_str()).collect();
        assert_eq!(refs, vec!["old"]);
    }

    #[tokio::test]
    async fn test_transport_failure_yields_nothing() {
        let feed = FakeFeed {
            signatures: vec![sig("a", 10, false)],
            records: HashMap::new(),
            down: true,
        };
        let monitor = TradeMonitor::new(Arc::new(feed), MASTER, SOL, 100);
        assert!(monitor.poll_since(at(0)).await.is_empty());
    }
}
