//! Database persistence for the copier.
//!
//! Stores everything needed to resume after restart:
//! - Bot state and the poll watermark
//! - Follower copy settings and delegation accounts
//! - The sponsor tree and ranks
//! - Seen master trades (to avoid replicating twice)
//! - Wallet balances, positions, copy trades and commissions
//! - System settings overriding the commission table

mod ledger;

use std::collections::HashSet;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use sqlx::{sqlite::SqlitePoolOptions, SqlitePool};

use crate::models::{MasterTrade, Rank, SwapOutcome, UplineChain, UplineNode};
use crate::trading::{CopyConfig, DistributionConfig};

use ledger::AccountLocks;

/// Sponsor links followed before a chain is declared cyclic at ingestion.
const MAX_SPONSOR_WALK: usize = 10_000;

const DISTRIBUTION_SETTINGS_KEY: &str = "distribution";
const COPY_SETTINGS_KEY: &str = "copy";

/// Database connection pool plus per-account write serialization.
#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
    locks: std::sync::Arc<AccountLocks>,
}

/// Bot state stored in database.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct BotState {
    pub id: i64,
    pub last_watermark: Option<String>,
    pub trades_seen: i64,
    pub outcomes_recorded: i64,
    pub swaps_executed: i64,
    pub commissions_paid: i64,
    pub is_running: bool,
    pub last_poll_at: Option<String>,
    pub started_at: String,
    pub updated_at: String,
}

impl BotState {
    pub fn watermark(&self) -> Option<DateTime<Utc>> {
        self.last_watermark
            .as_deref()
            .and_then(|w| DateTime::parse_from_rfc3339(w).ok())
            .map(|w| w.with_timezone(&Utc))
    }
}

/// A follower's copy settings for one master.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct CopySettings {
    pub follower_ref: String,
    pub master_ref: String,
    pub allocated_amount: i64,
    pub is_active: bool,
    pub updated_at: String,
}

impl CopySettings {
    pub fn allocated_amount(&self) -> u64 {
        self.allocated_amount.max(0) as u64
    }
}

/// Locally recorded delegation account.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct StoredDelegation {
    pub follower_ref: String,
    pub mint: String,
    pub delegation_account: String,
    pub granted_amount: i64,
    pub status: String,
    pub updated_at: String,
}

/// Row for `copy_trades`.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct CopyTradeRecord {
    pub id: String,
    pub follower_ref: String,
    pub master_ref: String,
    pub origin_ref: String,
    pub input_mint: String,
    pub output_mint: String,
    pub master_input_amount: i64,
    pub input_amount: i64,
    pub output_amount: i64,
    pub status: String,
    pub tx_ref: Option<String>,
    pub realized_profit: Option<i64>,
    pub fee: Option<i64>,
    pub error_message: Option<String>,
    pub created_at: String,
}

impl CopyTradeRecord {
    /// Row describing one follower's outcome for a master trade.
    pub fn from_outcome(master_ref: &str, trade: &MasterTrade, outcome: &SwapOutcome) -> Self {
        let (input_amount, output_amount, tx_ref, error_message) = match &outcome.result {
            Ok(swap) => (
                swap.realized_input_amount as i64,
                swap.realized_output_amount as i64,
                Some(swap.tx_ref.clone()),
                None,
            ),
            Err(reason) => (0, 0, None, Some(reason.to_string())),
        };

        Self {
            id: uuid::Uuid::new_v4().to_string(),
            follower_ref: outcome.follower_ref.clone(),
            master_ref: master_ref.to_string(),
            origin_ref: trade.origin_ref.clone(),
            input_mint: trade.input_mint.clone(),
            output_mint: trade.output_mint.clone(),
            master_input_amount: trade.input_amount as i64,
            input_amount,
            output_amount,
            status: outcome.status().to_string(),
            tx_ref,
            realized_profit: None,
            fee: None,
            error_message,
            created_at: Utc::now().to_rfc3339(),
        }
    }
}

/// Row for `affiliate_commissions`.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct CommissionRecord {
    pub id: String,
    pub origin_ref: String,
    pub follower_ref: String,
    pub recipient_ref: String,
    pub level: i64,
    pub percentage: String,
    pub amount: i64,
    pub created_at: String,
}

impl Database {
    /// Create a new database connection.
    pub async fn new(database_url: &str) -> Result<Self> {
        // Every in-memory connection is a separate database
        let in_memory = database_url.contains(":memory:");
        let options = if in_memory {
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            SqlitePoolOptions::new().max_connections(5)
        };

        let pool = options
            .connect(database_url)
            .await
            .context("Failed to connect to database")?;

        let db = Self {
            pool,
            locks: Default::default(),
        };
        db.run_migrations().await?;

        Ok(db)
    }

    /// Run all database migrations.
    async fn run_migrations(&self) -> Result<()> {
        // Bot state table
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS bot_state (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                last_watermark TEXT,
                trades_seen INTEGER NOT NULL DEFAULT 0,
                outcomes_recorded INTEGER NOT NULL DEFAULT 0,
                swaps_executed INTEGER NOT NULL DEFAULT 0,
                commissions_paid INTEGER NOT NULL DEFAULT 0,
                is_running INTEGER NOT NULL DEFAULT 0,
                last_poll_at TEXT,
                started_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
                updated_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        // Follower settings (written by the settings UI)
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS copy_settings (
                follower_ref TEXT NOT NULL,
                master_ref TEXT NOT NULL,
                allocated_amount INTEGER NOT NULL DEFAULT 0,
                is_active INTEGER NOT NULL DEFAULT 1,
                created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
                updated_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
                PRIMARY KEY (follower_ref, master_ref)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        // Platform balances
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS wallets (
                account_ref TEXT PRIMARY KEY,
                balance INTEGER NOT NULL DEFAULT 0 CHECK (balance >= 0),
                updated_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        // Balance movements
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS transactions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                account_ref TEXT NOT NULL,
                amount INTEGER NOT NULL,
                balance_after INTEGER NOT NULL,
                reason TEXT NOT NULL,
                created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        // Referral tree
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS sponsors (
                account_ref TEXT PRIMARY KEY,
                sponsor_ref TEXT,
                rank INTEGER,
                created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
                updated_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        // Delegation accounts (state lives on chain)
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS delegations (
                follower_ref TEXT PRIMARY KEY,
                mint TEXT NOT NULL,
                delegation_account TEXT NOT NULL,
                granted_amount INTEGER NOT NULL,
                status TEXT NOT NULL DEFAULT 'pending',
                created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
                updated_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        // Seen master trades (to avoid duplicates)
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS seen_trades (
                origin_ref TEXT PRIMARY KEY,
                master_ref TEXT NOT NULL,
                input_mint TEXT NOT NULL,
                output_mint TEXT NOT NULL,
                input_amount INTEGER NOT NULL,
                observed_at TEXT NOT NULL,
                seen_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        // Follower positions at cost
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS positions (
                follower_ref TEXT NOT NULL,
                mint TEXT NOT NULL,
                quantity INTEGER NOT NULL DEFAULT 0,
                cost_basis INTEGER NOT NULL DEFAULT 0,
                updated_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
                PRIMARY KEY (follower_ref, mint)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        // Copy trades
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS copy_trades (
                id TEXT PRIMARY KEY,
                follower_ref TEXT NOT NULL,
                master_ref TEXT NOT NULL,
                origin_ref TEXT NOT NULL,
                input_mint TEXT NOT NULL,
                output_mint TEXT NOT NULL,
                master_input_amount INTEGER NOT NULL,
                input_amount INTEGER NOT NULL DEFAULT 0,
                output_amount INTEGER NOT NULL DEFAULT 0,
                status TEXT NOT NULL,
                tx_ref TEXT,
                realized_profit INTEGER,
                fee INTEGER,
                error_message TEXT,
                created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        // Commission lines
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS affiliate_commissions (
                id TEXT PRIMARY KEY,
                origin_ref TEXT NOT NULL,
                follower_ref TEXT NOT NULL,
                recipient_ref TEXT NOT NULL,
                level INTEGER NOT NULL,
                percentage TEXT NOT NULL,
                amount INTEGER NOT NULL,
                created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        // System settings (JSON values)
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS system_settings (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        // Indexes
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_copy_settings_master ON copy_settings(master_ref)")
            .execute(&self.pool)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_copy_trades_status ON copy_trades(status)")
            .execute(&self.pool)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_copy_trades_origin ON copy_trades(origin_ref)")
            .execute(&self.pool)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_transactions_account ON transactions(account_ref)")
            .execute(&self.pool)
            .await?;
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_commissions_recipient ON affiliate_commissions(recipient_ref)",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    // ==================== Bot State ====================

    /// Initialize or get bot state.
    pub async fn init_bot_state(&self) -> Result<BotState> {
        sqlx::query(
            r#"
            INSERT INTO bot_state (id, is_running, started_at, updated_at)
            VALUES (1, 1, datetime('now'), datetime('now'))
            ON CONFLICT(id) DO UPDATE SET
                is_running = 1,
                started_at = datetime('now'),
                updated_at = datetime('now')
            "#,
        )
        .execute(&self.pool)
        .await?;

        self.get_bot_state()
            .await?
            .context("Bot state not initialized")
    }

    /// Get current bot state.
    pub async fn get_bot_state(&self) -> Result<Option<BotState>> {
        sqlx::query_as::<_, BotState>("SELECT * FROM bot_state WHERE id = 1")
            .fetch_optional(&self.pool)
            .await
            .context("Failed to read bot state")
    }

    /// Record a finished cycle and advance the watermark.
    pub async fn record_cycle(
        &self,
        watermark: DateTime<Utc>,
        trades_seen: i64,
        outcomes_recorded: i64,
        swaps_executed: i64,
        commissions_paid: i64,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE bot_state SET
                last_watermark = ?,
                trades_seen = trades_seen + ?,
                outcomes_recorded = outcomes_recorded + ?,
                swaps_executed = swaps_executed + ?,
                commissions_paid = commissions_paid + ?,
                last_poll_at = datetime('now'),
                updated_at = datetime('now')
            WHERE id = 1
            "#,
        )
        .bind(watermark.to_rfc3339())
        .bind(trades_seen)
        .bind(outcomes_recorded)
        .bind(swaps_executed)
        .bind(commissions_paid)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Mark bot as stopped.
    pub async fn mark_bot_stopped(&self) -> Result<()> {
        sqlx::query("UPDATE bot_state SET is_running = 0, updated_at = datetime('now') WHERE id = 1")
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    // ==================== System Settings ====================

    pub async fn get_setting<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        let row: Option<(String,)> = sqlx::query_as("SELECT value FROM system_settings WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;

        row.map(|(value,)| {
            serde_json::from_str(&value).with_context(|| format!("Invalid system setting {}", key))
        })
        .transpose()
    }

    pub async fn put_setting<T: Serialize>(&self, key: &str, value: &T) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO system_settings (key, value, updated_at)
            VALUES (?, ?, datetime('now'))
            ON CONFLICT(key) DO UPDATE SET
                value = excluded.value,
                updated_at = datetime('now')
            "#,
        )
        .bind(key)
        .bind(serde_json::to_string(value)?)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Commission table: stored override, or the compiled defaults.
    pub async fn load_distribution_config(&self) -> Result<DistributionConfig> {
        Ok(self
            .get_setting(DISTRIBUTION_SETTINGS_KEY)
            .await?
            .unwrap_or_default())
    }

    pub async fn save_distribution_config(&self, config: &DistributionConfig) -> Result<()> {
        config.validate()?;
        self.put_setting(DISTRIBUTION_SETTINGS_KEY, config).await
    }

    /// Copy settings: stored override (missing fields defaulted), or the compiled defaults.
    pub async fn load_copy_config(&self) -> Result<CopyConfig> {
        Ok(self.get_setting(COPY_SETTINGS_KEY).await?.unwrap_or_default())
    }

    // ==================== Copy Settings ====================

    /// Subscribe or update a follower. Normally written by the settings UI.
    pub async fn upsert_copy_settings(
        &self,
        follower_ref: &str,
        master_ref: &str,
        allocated_amount: u64,
        is_active: bool,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO copy_settings (follower_ref, master_ref, allocated_amount, is_active)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(follower_ref, master_ref) DO UPDATE SET
                allocated_amount = excluded.allocated_amount,
                is_active = excluded.is_active,
                updated_at = datetime('now')
            "#,
        )
        .bind(follower_ref)
        .bind(master_ref)
        .bind(i64::try_from(allocated_amount).context("Allocation out of range")?)
        .bind(is_active)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn set_copy_active(&self, follower_ref: &str, master_ref: &str, is_active: bool) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE copy_settings SET is_active = ?, updated_at = datetime('now')
            WHERE follower_ref = ? AND master_ref = ?
            "#,
        )
        .bind(is_active)
        .bind(follower_ref)
        .bind(master_ref)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    pub async fn list_copy_settings(&self, master_ref: &str) -> Result<Vec<CopySettings>> {
        sqlx::query_as::<_, CopySettings>(
            r#"
            SELECT follower_ref, master_ref, allocated_amount, is_active, updated_at
            FROM copy_settings WHERE master_ref = ?
            ORDER BY created_at, follower_ref
            "#,
        )
        .bind(master_ref)
        .fetch_all(&self.pool)
        .await
        .context("Failed to fetch copy settings")
    }

    // ==================== Delegations ====================

    pub async fn record_delegation(
        &self,
        follower_ref: &str,
        mint: &str,
        delegation_account: &str,
        granted_amount: u64,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO delegations (follower_ref, mint, delegation_account, granted_amount, status)
            VALUES (?, ?, ?, ?, 'pending')
            ON CONFLICT(follower_ref) DO UPDATE SET
                mint = excluded.mint,
                delegation_account = excluded.delegation_account,
                granted_amount = excluded.granted_amount,
                status = 'pending',
                updated_at = datetime('now')
            "#,
        )
        .bind(follower_ref)
        .bind(mint)
        .bind(delegation_account)
        .bind(i64::try_from(granted_amount).context("Delegation amount out of range")?)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Revoke the follower's delegation for `mint`. Returns false when none matched.
    pub async fn mark_delegation_revoked(&self, follower_ref: &str, mint: &str) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE delegations SET status = 'revoked', updated_at = datetime('now')
            WHERE follower_ref = ? AND mint = ?
            "#,
        )
        .bind(follower_ref)
        .bind(mint)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Delegation account address, unless revoked locally.
    pub async fn delegation_account(&self, follower_ref: &str) -> Result<Option<String>> {
        let row: Option<(String,)> = sqlx::query_as(
            "SELECT delegation_account FROM delegations WHERE follower_ref = ? AND status != 'revoked'",
        )
        .bind(follower_ref)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|(account,)| account))
    }

    pub async fn get_delegation(&self, follower_ref: &str) -> Result<Option<StoredDelegation>> {
        sqlx::query_as::<_, StoredDelegation>(
            r#"
            SELECT follower_ref, mint, delegation_account, granted_amount, status, updated_at
            FROM delegations WHERE follower_ref = ?
            "#,
        )
        .bind(follower_ref)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch delegation")
    }

    // ==================== Sponsors ====================

    /// Link `account_ref` under `sponsor_ref`.
    ///
    /// Rejects self-sponsorship and any link that would close a cycle.
    pub async fn set_sponsor(&self, account_ref: &str, sponsor_ref: &str) -> Result<()> {
        if account_ref == sponsor_ref {
            bail!("{} cannot sponsor itself", account_ref);
        }

        let mut current = sponsor_ref.to_string();
        for _ in 0..MAX_SPONSOR_WALK {
            match self.sponsor_of(&current).await? {
                Some(next) if next == account_ref => {
                    bail!(
                        "Sponsoring {} under {} would create a cycle",
                        account_ref,
                        sponsor_ref
                    );
                }
                Some(next) => current = next,
                None => break,
            }
        }

        sqlx::query(
            r#"
            INSERT INTO sponsors (account_ref, sponsor_ref) VALUES (?, ?)
            ON CONFLICT(account_ref) DO UPDATE SET
                sponsor_ref = excluded.sponsor_ref,
                updated_at = datetime('now')
            "#,
        )
        .bind(account_ref)
        .bind(sponsor_ref)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn set_rank(&self, account_ref: &str, rank: Option<Rank>) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO sponsors (account_ref, rank) VALUES (?, ?)
            ON CONFLICT(account_ref) DO UPDATE SET
                rank = excluded.rank,
                updated_at = datetime('now')
            "#,
        )
        .bind(account_ref)
        .bind(rank.map(|r| r.level() as i64))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn sponsor_of(&self, account_ref: &str) -> Result<Option<String>> {
        let row: Option<(Option<String>,)> =
            sqlx::query_as("SELECT sponsor_ref FROM sponsors WHERE account_ref = ?")
                .bind(account_ref)
                .fetch_optional(&self.pool)
                .await?;

        Ok(row.and_then(|(sponsor,)| sponsor))
    }

    pub async fn rank_of(&self, account_ref: &str) -> Result<Option<Rank>> {
        let row: Option<(Option<i64>,)> = sqlx::query_as("SELECT rank FROM sponsors WHERE account_ref = ?")
            .bind(account_ref)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.and_then(|(rank,)| rank).and_then(Rank::from_level))
    }

    /// Snapshot of the follower's uplines, nearest first, at most `depth` long.
    ///
    /// Stops at the first repeated account and keeps it, so the chain fails
    /// the acyclicity check downstream.
    pub async fn upline_chain(&self, follower_ref: &str, depth: usize) -> Result<UplineChain> {
        let mut nodes = Vec::with_capacity(depth);
        let mut visited: HashSet<String> = HashSet::from([follower_ref.to_string()]);
        let mut current = follower_ref.to_string();

        while nodes.len() < depth {
            let Some(sponsor) = self.sponsor_of(&current).await? else {
                break;
            };
            let rank = self.rank_of(&sponsor).await?;
            nodes.push(UplineNode::new(sponsor.clone(), rank));

            if !visited.insert(sponsor.clone()) {
                break;
            }
            current = sponsor;
        }

        Ok(UplineChain::new(nodes))
    }

    // ==================== Seen Trades ====================

    /// Check if a master trade was already processed.
    pub async fn has_seen_trade(&self, origin_ref: &str) -> Result<bool> {
        let result: Option<(i64,)> = sqlx::query_as("SELECT 1 FROM seen_trades WHERE origin_ref = ?")
            .bind(origin_ref)
            .fetch_optional(&self.pool)
            .await?;

        Ok(result.is_some())
    }

    /// Mark a master trade as seen. Returns false if it already was.
    pub async fn mark_trade_seen(&self, master_ref: &str, trade: &MasterTrade) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT OR IGNORE INTO seen_trades
                (origin_ref, master_ref, input_mint, output_mint, input_amount, observed_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&trade.origin_ref)
        .bind(master_ref)
        .bind(&trade.input_mint)
        .bind(&trade.output_mint)
        .bind(trade.input_amount as i64)
        .bind(trade.observed_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    pub async fn get_seen_trade_count(&self) -> Result<i64> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM seen_trades")
            .fetch_one(&self.pool)
            .await?;

        Ok(count)
    }

    // ==================== Copy Trades ====================

    pub async fn record_trade(&self, row: &CopyTradeRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO copy_trades (
                id, follower_ref, master_ref, origin_ref, input_mint, output_mint,
                master_input_amount, input_amount, output_amount, status, tx_ref,
                realized_profit, fee, error_message, created_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&row.id)
        .bind(&row.follower_ref)
        .bind(&row.master_ref)
        .bind(&row.origin_ref)
        .bind(&row.input_mint)
        .bind(&row.output_mint)
        .bind(row.master_input_amount)
        .bind(row.input_amount)
        .bind(row.output_amount)
        .bind(&row.status)
        .bind(&row.tx_ref)
        .bind(row.realized_profit)
        .bind(row.fee)
        .bind(&row.error_message)
        .bind(&row.created_at)
        .execute(&self.pool)
        .await
        .context("Failed to record copy trade")?;

        Ok(())
    }

    pub async fn recent_copy_trades(&self, limit: i64) -> Result<Vec<CopyTradeRecord>> {
        sqlx::query_as::<_, CopyTradeRecord>(
            "SELECT * FROM copy_trades ORDER BY created_at DESC, id LIMIT ?",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .context("Failed to fetch copy trades")
    }

    pub async fn trades_for_origin(&self, origin_ref: &str) -> Result<Vec<CopyTradeRecord>> {
        sqlx::query_as::<_, CopyTradeRecord>("SELECT * FROM copy_trades WHERE origin_ref = ?")
            .bind(origin_ref)
            .fetch_all(&self.pool)
            .await
            .context("Failed to fetch copy trades")
    }

    /// Copy trade counts: (total, executed, skipped, failed).
    pub async fn get_copy_trade_stats(&self) -> Result<(i64, i64, i64, i64)> {
        let (total, executed, skipped, failed): (i64, i64, i64, i64) = sqlx::query_as(
            r#"
            SELECT
                COUNT(*),
                COALESCE(SUM(CASE WHEN status IN ('executed', 'simulated') THEN 1 ELSE 0 END), 0),
                COALESCE(SUM(CASE WHEN status = 'skipped' THEN 1 ELSE 0 END), 0),
                COALESCE(SUM(CASE WHEN status = 'failed' THEN 1 ELSE 0 END), 0)
            FROM copy_trades
            "#,
        )
        .fetch_one(&self.pool)
        .await?;

        Ok((total, executed, skipped, failed))
    }

    /// Realized profits of settled copy trades, newest first.
    pub async fn realized_profits(&self, limit: i64) -> Result<Vec<i64>> {
        let rows: Vec<(i64,)> = sqlx::query_as(
            r#"
            SELECT realized_profit FROM copy_trades
            WHERE realized_profit IS NOT NULL
            ORDER BY created_at DESC LIMIT ?
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(|(p,)| p).collect())
    }

    // ==================== Commissions ====================

    pub async fn commissions_for(&self, recipient_ref: &str) -> Result<Vec<CommissionRecord>> {
        sqlx::query_as::<_, CommissionRecord>(
            "SELECT * FROM affiliate_commissions WHERE recipient_ref = ? ORDER BY created_at DESC",
        )
        .bind(recipient_ref)
        .fetch_all(&self.pool)
        .await
        .context("Failed to fetch commissions")
    }

    pub async fn commissions_for_origin(&self, origin_ref: &str) -> Result<Vec<CommissionRecord>> {
        sqlx::query_as::<_, CommissionRecord>(
            "SELECT * FROM affiliate_commissions WHERE origin_ref = ? ORDER BY level",
        )
        .bind(origin_ref)
        .fetch_all(&self.pool)
        .await
        .context("Failed to fetch commissions")
    }

    /// Get the connection pool (for advanced queries).
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ExecutedSwap, FailureReason};

    async fn db() -> Database {
        Database::new("sqlite::memory:").await.unwrap()
    }

    fn trade(origin: &str) -> MasterTrade {
        MasterTrade {
            input_mint: "SOL".to_string(),
            output_mint: "BONK".to_string(),
            input_amount: 1_000,
            output_amount: 50_000,
            master_input_balance: 0,
            observed_at: Utc::now(),
            origin_ref: origin.to_string(),
        }
    }

    #[tokio::test]
    async fn test_bot_state_watermark() {
        let db = db().await;
        let state = db.init_bot_state().await.unwrap();
        assert!(state.is_running);
        assert!(state.watermark().is_none());

        let now = Utc::now();
        db.record_cycle(now, 2, 6, 3, 40).await.unwrap();
        db.record_cycle(now, 1, 3, 1, 10).await.unwrap();
        let state = db.get_bot_state().await.unwrap().unwrap();
        assert_eq!(state.watermark().unwrap().timestamp(), now.timestamp());
        assert_eq!(state.trades_seen, 3);
        assert_eq!(state.commissions_paid, 50);

        db.mark_bot_stopped().await.unwrap();
        assert!(!db.get_bot_state().await.unwrap().unwrap().is_running);
    }

    #[tokio::test]
    async fn test_seen_trades_dedupe() {
        let db = db().await;
        assert!(!db.has_seen_trade("sig1").await.unwrap());
        assert!(db.mark_trade_seen("master", &trade("sig1")).await.unwrap());
        assert!(!db.mark_trade_seen("master", &trade("sig1")).await.unwrap());
        assert!(db.has_seen_trade("sig1").await.unwrap());
        assert_eq!(db.get_seen_trade_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_sponsor_cycles_rejected() {
        let db = db().await;
        db.set_sponsor("b", "a").await.unwrap();
        db.set_sponsor("c", "b").await.unwrap();

        assert!(db.set_sponsor("a", "a").await.is_err());
        assert!(db.set_sponsor("a", "c").await.is_err());
        assert_eq!(db.sponsor_of("a").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_upline_chain_with_ranks() {
        let db = db().await;
        db.set_sponsor("f", "u1").await.unwrap();
        db.set_sponsor("u1", "u2").await.unwrap();
        db.set_sponsor("u2", "u3").await.unwrap();
        db.set_rank("u1", Some(Rank::V2)).await.unwrap();
        db.set_rank("u3", Some(Rank::V5)).await.unwrap();

        let chain = db.upline_chain("f", 8).await.unwrap();
        let nodes: Vec<(&str, Option<Rank>)> = (1..=chain.len())
            .filter_map(|level| chain.at_level(level))
            .map(|n| (n.account_ref.as_str(), n.rank))
            .collect();
        assert_eq!(
            nodes,
            vec![("u1", Some(Rank::V2)), ("u2", None), ("u3", Some(Rank::V5))]
        );

        assert_eq!(db.upline_chain("f", 2).await.unwrap().len(), 2);
        assert!(db.upline_chain("u3", 8).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_upline_chain_flags_corrupt_cycle() {
        let db = db().await;
        db.set_sponsor("f", "a").await.unwrap();
        db.set_sponsor("a", "b").await.unwrap();
        // Written behind the ingestion check
        sqlx::query("INSERT INTO sponsors (account_ref, sponsor_ref) VALUES ('b', 'a')")
            .execute(db.pool())
            .await
            .unwrap();

        let chain = db.upline_chain("f", 8).await.unwrap();
        assert_eq!(chain.len(), 3);
        assert!(chain.check_acyclic("f").is_err());
    }

    #[tokio::test]
    async fn test_distribution_settings_override() {
        let db = db().await;
        assert_eq!(
            db.load_distribution_config().await.unwrap(),
            DistributionConfig::default()
        );

        let mut config = DistributionConfig::default();
        config.max_upline_depth = 4;
        db.save_distribution_config(&config).await.unwrap();
        assert_eq!(db.load_distribution_config().await.unwrap().max_upline_depth, 4);

        config.max_upline_depth = 0;
        assert!(db.save_distribution_config(&config).await.is_err());
    }

    #[tokio::test]
    async fn test_partial_copy_settings_fill_defaults() {
        let db = db().await;
        tokio_test::assert_ok!(db.load_copy_config().await);

        db.put_setting("copy", &serde_json::json!({"master_account": "M", "slippage_bps": 100}))
            .await
            .unwrap();
        let config = db.load_copy_config().await.unwrap();
        assert_eq!(config.master_account, "M");
        assert_eq!(config.slippage_bps, 100);
        assert_eq!(config.poll_interval_secs, CopyConfig::default().poll_interval_secs);
    }

    #[tokio::test]
    async fn test_copy_trade_rows() {
        let db = db().await;
        let t = trade("sig1");
        let ok = SwapOutcome::success(
            "alice",
            ExecutedSwap {
                tx_ref: "tx1".to_string(),
                realized_input_amount: 500,
                realized_output_amount: 24_000,
                simulated: false,
            },
        );
        let skipped = SwapOutcome::failure("bob", FailureReason::AmountTooSmall);

        let mut row = CopyTradeRecord::from_outcome("master", &t, &ok);
        row.realized_profit = Some(12);
        db.record_trade(&row).await.unwrap();
        db.record_trade(&CopyTradeRecord::from_outcome("master", &t, &skipped))
            .await
            .unwrap();

        let rows = db.trades_for_origin("sig1").await.unwrap();
        assert_eq!(rows.len(), 2);
        let bob = rows.iter().find(|r| r.follower_ref == "bob").unwrap();
        assert_eq!(bob.status, "skipped");
        assert_eq!(bob.error_message.as_deref(), Some("amount too small"));

        assert_eq!(db.get_copy_trade_stats().await.unwrap(), (2, 1, 1, 0));
        assert_eq!(db.realized_profits(10).await.unwrap(), vec![12]);
    }

    #[tokio::test]
    async fn test_delegation_records() {
        let db = db().await;
        db.record_delegation("alice", "SOL", "acct1", 1_000).await.unwrap();
        assert_eq!(db.delegation_account("alice").await.unwrap().as_deref(), Some("acct1"));

        assert!(!db.mark_delegation_revoked("alice", "BONK").await.unwrap());
        assert_eq!(db.delegation_account("alice").await.unwrap().as_deref(), Some("acct1"));

        assert!(db.mark_delegation_revoked("alice", "SOL").await.unwrap());
        assert!(db.delegation_account("alice").await.unwrap().is_none());
        assert_eq!(db.get_delegation("alice").await.unwrap().unwrap().status, "revoked");

        db.record_delegation("alice", "SOL", "acct2", 2_000).await.unwrap();
        assert_eq!(db.delegation_account("alice").await.unwrap().as_deref(), Some("acct2"));
    }
}
