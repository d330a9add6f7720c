//! Wire types for Solana JSON-RPC, the Jupiter quote API and the swap executor.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

// ==================== JSON-RPC envelope ====================

#[derive(Debug, Clone, Serialize)]
pub struct RpcRequest<'a> {
    pub jsonrpc: &'static str,
    pub id: u64,
    pub method: &'a str,
    pub params: Value,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RpcResponse<T> {
    pub result: Option<T>,
    pub error: Option<RpcError>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RpcError {
    pub code: i64,
    pub message: String,
}

/// `{ context, value }` wrapper used by several RPC methods.
#[derive(Debug, Clone, Deserialize)]
pub struct RpcContextValue<T> {
    pub value: T,
}

// ==================== Signatures / statuses ====================

/// Entry from `getSignaturesForAddress`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignatureInfo {
    pub signature: String,
    pub slot: u64,
    #[serde(default)]
    pub err: Option<Value>,
    #[serde(default)]
    pub block_time: Option<i64>,
    #[serde(default)]
    pub confirmation_status: Option<String>,
}

/// Entry from `getSignatureStatuses`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignatureStatus {
    pub slot: u64,
    #[serde(default)]
    pub confirmations: Option<u64>,
    #[serde(default)]
    pub err: Option<Value>,
    #[serde(default)]
    pub confirmation_status: Option<String>,
}

impl SignatureStatus {
    pub fn is_settled(&self) -> bool {
        matches!(
            self.confirmation_status.as_deref(),
            Some("confirmed") | Some("finalized")
        )
    }
}

// ==================== Transactions ====================

/// `getTransaction` result with `jsonParsed` encoding.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionRecord {
    pub slot: u64,
    #[serde(default)]
    pub block_time: Option<i64>,
    pub meta: Option<TransactionMeta>,
    pub transaction: ParsedTransaction,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionMeta {
    #[serde(default)]
    pub err: Option<Value>,
    #[serde(default)]
    pub fee: u64,
    #[serde(default)]
    pub pre_balances: Vec<u64>,
    #[serde(default)]
    pub post_balances: Vec<u64>,
    #[serde(default)]
    pub pre_token_balances: Vec<TokenBalance>,
    #[serde(default)]
    pub post_token_balances: Vec<TokenBalance>,
    #[serde(default)]
    pub log_messages: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenBalance {
    pub account_index: usize,
    pub mint: String,
    #[serde(default)]
    pub owner: Option<String>,
    pub ui_token_amount: UiTokenAmount,
}

impl TokenBalance {
    pub fn raw_amount(&self) -> u64 {
        self.ui_token_amount.amount.parse().unwrap_or(0)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UiTokenAmount {
    pub amount: String,
    #[serde(default)]
    pub decimals: u8,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ParsedTransaction {
    #[serde(default)]
    pub signatures: Vec<String>,
    pub message: ParsedMessage,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParsedMessage {
    pub account_keys: Vec<AccountKey>,
}

/// Account key as rendered by `jsonParsed` (object) or `json` (bare string).
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum AccountKey {
    Parsed { pubkey: String },
    Plain(String),
}

impl AccountKey {
    pub fn pubkey(&self) -> &str {
        match self {
            AccountKey::Parsed { pubkey } => pubkey,
            AccountKey::Plain(key) => key,
        }
    }
}

impl TransactionRecord {
    /// Whether the transaction failed on-chain.
    pub fn is_failed(&self) -> bool {
        self.meta.as_ref().map(|m| m.err.is_some()).unwrap_or(true)
    }

    /// Net balance change per mint for accounts owned by `owner`.
    ///
    /// Lamport changes on `owner`'s own account are folded into `native_mint`,
    /// with the transaction fee added back when `owner` paid it.
    pub fn balance_deltas(&self, owner: &str, native_mint: &str) -> HashMap<String, i128> {
        let mut deltas: HashMap<String, i128> = HashMap::new();
        let Some(meta) = &self.meta else {
            return deltas;
        };

        for pre in meta.pre_token_balances.iter().filter(|b| b.owner.as_deref() == Some(owner)) {
            *deltas.entry(pre.mint.clone()).or_default() -= pre.raw_amount() as i128;
        }
        for post in meta.post_token_balances.iter().filter(|b| b.owner.as_deref() == Some(owner)) {
            *deltas.entry(post.mint.clone()).or_default() += post.raw_amount() as i128;
        }

        let keys = &self.transaction.message.account_keys;
        if let Some(index) = keys.iter().position(|k| k.pubkey() == owner) {
            if let (Some(pre), Some(post)) = (meta.pre_balances.get(index), meta.post_balances.get(index)) {
                let mut lamports = *post as i128 - *pre as i128;
                if index == 0 {
                    lamports += meta.fee as i128;
                }
                if lamports != 0 {
                    *deltas.entry(native_mint.to_string()).or_default() += lamports;
                }
            }
        }

        deltas.retain(|_, d| *d != 0);
        deltas
    }

    /// Balance `owner` held of `mint` before the transaction.
    pub fn pre_balance(&self, owner: &str, mint: &str, native_mint: &str) -> u64 {
        let Some(meta) = &self.meta else {
            return 0;
        };

        if mint == native_mint {
            let keys = &self.transaction.message.account_keys;
            return keys
                .iter()
                .position(|k| k.pubkey() == owner)
                .and_then(|index| meta.pre_balances.get(index))
                .copied()
                .unwrap_or(0);
        }

        meta.pre_token_balances
            .iter()
            .filter(|b| b.owner.as_deref() == Some(owner) && b.mint == mint)
            .map(|b| b.raw_amount())
            .sum()
    }
}

// ==================== Accounts ====================

/// `getAccountInfo` value with base64 encoding.
#[derive(Debug, Clone, Deserialize)]
pub struct AccountInfo {
    pub lamports: u64,
    pub owner: String,
    /// `[data, "base64"]`
    pub data: (String, String),
}

// ==================== Jupiter ====================

/// Quote response from the Jupiter v6 `/quote` endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuoteResponse {
    pub input_mint: String,
    pub in_amount: String,
    pub output_mint: String,
    pub out_amount: String,
    #[serde(default)]
    pub other_amount_threshold: String,
    #[serde(default)]
    pub slippage_bps: u16,
    #[serde(default)]
    pub price_impact_pct: String,
    #[serde(default)]
    pub route_plan: Vec<Value>,
}

// ==================== Swap executor ====================

/// Body of `POST /swaps`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SwapSubmission {
    pub follower: String,
    pub input_mint: String,
    pub output_mint: String,
    pub amount: String,
    pub minimum_out_amount: String,
    pub quote: QuoteResponse,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SwapSubmissionResponse {
    pub signature: String,
}

/// Body of `POST /delegations` and `POST /delegations/revoke`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DelegationRequest {
    pub user: String,
    pub token_mint: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub amount: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DelegationResponse {
    #[serde(default)]
    pub delegation_account: String,
    pub transaction: String,
}
