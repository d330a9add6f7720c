//! Balance-moving ledger operations.
//!
//! Every operation locks the accounts it touches (in sorted order, through
//! [`AccountLocks`]) and runs in a single SQL transaction, so two credits or
//! debits on the same account never interleave.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use chrono::Utc;
use sqlx::SqliteConnection;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, info};

use crate::models::{Distribution, Settlement};

use super::{CommissionRecord, Database};

/// Per-account async locks.
#[derive(Default)]
pub struct AccountLocks {
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl AccountLocks {
    /// Lock every listed account, in sorted order so callers cannot deadlock.
    pub async fn lock_all<'a, I>(&self, accounts: I) -> Vec<OwnedMutexGuard<()>>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let ordered: BTreeSet<&str> = accounts.into_iter().collect();

        let handles: Vec<Arc<Mutex<()>>> = {
            let mut locks = self.locks.lock().await;
            ordered
                .iter()
                .map(|account| locks.entry(account.to_string()).or_default().clone())
                .collect()
        };

        let mut guards = Vec::with_capacity(handles.len());
        for handle in handles {
            guards.push(handle.lock_owned().await);
        }
        guards
    }
}

/// A follower's holding of one mint, at cost in the base mint.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct StoredPosition {
    pub follower_ref: String,
    pub mint: String,
    pub quantity: i64,
    pub cost_basis: i64,
    pub updated_at: String,
}

impl StoredPosition {
    pub fn held(&self) -> u64 {
        self.quantity.max(0) as u64
    }

    #[cfg(test)]
    pub fn cost(&self) -> u64 {
        self.cost_basis.max(0) as u64
    }
}

fn to_ledger(amount: u64) -> Result<i64> {
    i64::try_from(amount).context("Amount exceeds ledger range")
}

/// Apply a signed balance change and log it. Rejects overdrafts.
async fn adjust_balance(
    conn: &mut SqliteConnection,
    account_ref: &str,
    delta: i64,
    reason: &str,
) -> Result<u64> {
    let current: Option<(i64,)> = sqlx::query_as("SELECT balance FROM wallets WHERE account_ref = ?")
        .bind(account_ref)
        .fetch_optional(&mut *conn)
        .await?;
    let current = current.map(|(b,)| b).unwrap_or(0);

    let next = current
        .checked_add(delta)
        .context("Balance overflow")?;
    if next < 0 {
        bail!(
            "Insufficient balance for {}: has {}, needs {}",
            account_ref,
            current,
            -delta
        );
    }

    sqlx::query(
        r#"
        INSERT INTO wallets (account_ref, balance, updated_at) VALUES (?, ?, datetime('now'))
        ON CONFLICT(account_ref) DO UPDATE SET
            balance = excluded.balance,
            updated_at = datetime('now')
        "#,
    )
    .bind(account_ref)
    .bind(next)
    .execute(&mut *conn)
    .await?;

    sqlx::query("INSERT INTO transactions (account_ref, amount, balance_after, reason) VALUES (?, ?, ?, ?)")
        .bind(account_ref)
        .bind(delta)
        .bind(next)
        .bind(reason)
        .execute(&mut *conn)
        .await?;

    Ok(next as u64)
}

async fn insert_commission(conn: &mut SqliteConnection, row: &CommissionRecord) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO affiliate_commissions
            (id, origin_ref, follower_ref, recipient_ref, level, percentage, amount, created_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&row.id)
    .bind(&row.origin_ref)
    .bind(&row.follower_ref)
    .bind(&row.recipient_ref)
    .bind(row.level)
    .bind(&row.percentage)
    .bind(row.amount)
    .bind(&row.created_at)
    .execute(&mut *conn)
    .await?;

    Ok(())
}

async fn load_position(
    conn: &mut SqliteConnection,
    follower_ref: &str,
    mint: &str,
) -> Result<(u64, u64)> {
    let row: Option<(i64, i64)> =
        sqlx::query_as("SELECT quantity, cost_basis FROM positions WHERE follower_ref = ? AND mint = ?")
            .bind(follower_ref)
            .bind(mint)
            .fetch_optional(&mut *conn)
            .await?;

    Ok(row
        .map(|(q, c)| (q.max(0) as u64, c.max(0) as u64))
        .unwrap_or((0, 0)))
}

async fn store_position(
    conn: &mut SqliteConnection,
    follower_ref: &str,
    mint: &str,
    quantity: u64,
    cost_basis: u64,
) -> Result<()> {
    if quantity == 0 {
        sqlx::query("DELETE FROM positions WHERE follower_ref = ? AND mint = ?")
            .bind(follower_ref)
            .bind(mint)
            .execute(&mut *conn)
            .await?;
        return Ok(());
    }

    sqlx::query(
        r#"
        INSERT INTO positions (follower_ref, mint, quantity, cost_basis, updated_at)
        VALUES (?, ?, ?, ?, datetime('now'))
        ON CONFLICT(follower_ref, mint) DO UPDATE SET
            quantity = excluded.quantity,
            cost_basis = excluded.cost_basis,
            updated_at = datetime('now')
        "#,
    )
    .bind(follower_ref)
    .bind(mint)
    .bind(to_ledger(quantity)?)
    .bind(to_ledger(cost_basis)?)
    .execute(&mut *conn)
    .await?;

    Ok(())
}

impl Database {
    // ==================== Balances ====================

    pub async fn balance(&self, account_ref: &str) -> Result<u64> {
        let row: Option<(i64,)> = sqlx::query_as("SELECT balance FROM wallets WHERE account_ref = ?")
            .bind(account_ref)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(|(b,)| b.max(0) as u64).unwrap_or(0))
    }

    /// Add to an account. Returns the new balance.
    pub async fn credit(&self, account_ref: &str, amount: u64, reason: &str) -> Result<u64> {
        let _guards = self.locks.lock_all([account_ref]).await;
        let mut tx = self.pool.begin().await?;
        let balance = adjust_balance(&mut *tx, account_ref, to_ledger(amount)?, reason).await?;
        tx.commit().await?;
        Ok(balance)
    }

    /// Take from an account. Fails without effect on overdraft.
    pub async fn debit(&self, account_ref: &str, amount: u64, reason: &str) -> Result<u64> {
        let _guards = self.locks.lock_all([account_ref]).await;
        let mut tx = self.pool.begin().await?;
        let balance = adjust_balance(&mut *tx, account_ref, -to_ledger(amount)?, reason).await?;
        tx.commit().await?;
        Ok(balance)
    }

    /// Movements for an account, newest first: (amount, balance_after, reason, created_at).
    pub async fn account_history(
        &self,
        account_ref: &str,
        limit: i64,
    ) -> Result<Vec<(i64, i64, String, String)>> {
        sqlx::query_as(
            r#"
            SELECT amount, balance_after, reason, created_at FROM transactions
            WHERE account_ref = ? ORDER BY id DESC LIMIT ?
            "#,
        )
        .bind(account_ref)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .context("Failed to fetch account history")
    }

    // ==================== Positions ====================

    pub async fn position(&self, follower_ref: &str, mint: &str) -> Result<Option<StoredPosition>> {
        sqlx::query_as::<_, StoredPosition>(
            "SELECT * FROM positions WHERE follower_ref = ? AND mint = ?",
        )
        .bind(follower_ref)
        .bind(mint)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch position")
    }

    /// Book a settled swap against the follower's positions.
    ///
    /// - base -> token opens or extends the token position at cost
    /// - token -> base closes the sold quantity and returns the realized profit
    /// - token -> token moves the sold cost basis onto the new token
    ///
    /// Returns `Some(profit)` only when a position was closed into the base mint.
    pub async fn apply_fill(
        &self,
        follower_ref: &str,
        base_mint: &str,
        input_mint: &str,
        output_mint: &str,
        fill: Settlement,
    ) -> Result<Option<i64>> {
        let _guards = self.locks.lock_all([follower_ref]).await;
        let mut tx = self.pool.begin().await?;

        let realized = if input_mint == base_mint {
            let (quantity, cost) = load_position(&mut *tx, follower_ref, output_mint).await?;
            store_position(
                &mut *tx,
                follower_ref,
                output_mint,
                quantity.saturating_add(fill.output_amount),
                cost.saturating_add(fill.input_amount),
            )
            .await?;
            None
        } else {
            let (quantity, cost) = load_position(&mut *tx, follower_ref, input_mint).await?;
            let sold = fill.input_amount.min(quantity);
            let cost_of_sold = if quantity == 0 {
                0
            } else {
                (cost as u128 * sold as u128 / quantity as u128) as u64
            };
            let remaining = quantity - sold;
            let remaining_cost = if remaining == 0 { 0 } else { cost - cost_of_sold };
            store_position(&mut *tx, follower_ref, input_mint, remaining, remaining_cost).await?;

            if output_mint == base_mint {
                if sold == 0 {
                    None
                } else {
                    Some(to_ledger(fill.output_amount)? - to_ledger(cost_of_sold)?)
                }
            } else {
                let (out_quantity, out_cost) = load_position(&mut *tx, follower_ref, output_mint).await?;
                store_position(
                    &mut *tx,
                    follower_ref,
                    output_mint,
                    out_quantity.saturating_add(fill.output_amount),
                    out_cost.saturating_add(cost_of_sold),
                )
                .await?;
                None
            }
        };

        tx.commit().await?;

        if let Some(profit) = realized {
            debug!(follower = %follower_ref, mint = %input_mint, profit = profit, "Position closed");
        }
        Ok(realized)
    }

    // ==================== Commissions ====================

    pub async fn record_commission(&self, row: &CommissionRecord) -> Result<()> {
        let mut conn = self.pool.acquire().await?;
        insert_commission(&mut *conn, row).await
    }

    /// Settle a performance fee in one transaction.
    ///
    /// Debits the follower's fee, then credits the master share, each commission
    /// line and the platform residual. Nothing is applied if any step fails.
    pub async fn apply_distribution(
        &self,
        follower_ref: &str,
        master_ref: &str,
        platform_ref: &str,
        origin_ref: &str,
        distribution: &Distribution,
    ) -> Result<()> {
        if distribution.fee == 0 {
            return Ok(());
        }

        let mut accounts = vec![follower_ref, master_ref, platform_ref];
        accounts.extend(distribution.lines.iter().map(|l| l.recipient_ref.as_str()));
        let _guards = self.locks.lock_all(accounts).await;

        let mut tx = self.pool.begin().await?;
        let reason = |what: &str| format!("{} ({})", what, origin_ref);

        adjust_balance(
            &mut *tx,
            follower_ref,
            -to_ledger(distribution.fee)?,
            &reason("performance fee"),
        )
        .await
        .with_context(|| format!("Failed to charge fee to {}", follower_ref))?;

        if distribution.master_share > 0 {
            adjust_balance(
                &mut *tx,
                master_ref,
                to_ledger(distribution.master_share)?,
                &reason("master share"),
            )
            .await?;
        }

        let created_at = Utc::now().to_rfc3339();
        for line in &distribution.lines {
            adjust_balance(
                &mut *tx,
                &line.recipient_ref,
                to_ledger(line.amount)?,
                &reason(&format!("level {} commission", line.level)),
            )
            .await?;

            insert_commission(
                &mut *tx,
                &CommissionRecord {
                    id: uuid::Uuid::new_v4().to_string(),
                    origin_ref: origin_ref.to_string(),
                    follower_ref: follower_ref.to_string(),
                    recipient_ref: line.recipient_ref.clone(),
                    level: line.level as i64,
                    percentage: line.percentage.to_string(),
                    amount: to_ledger(line.amount)?,
                    created_at: created_at.clone(),
                },
            )
            .await?;
        }

        if distribution.platform_residual > 0 {
            adjust_balance(
                &mut *tx,
                platform_ref,
                to_ledger(distribution.platform_residual)?,
                &reason("platform residual"),
            )
            .await?;
        }

        tx.commit().await?;

        info!(
            follower = %follower_ref,
            origin = %origin_ref,
            fee = distribution.fee,
            master = distribution.master_share,
            network = distribution.paid_to_network(),
            residual = distribution.platform_residual,
            "Commission distributed"
        );

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::CommissionLine;
    use rust_decimal_macros::dec;

    const SOL: &str = "SOL";

    async fn db() -> Database {
        Database::new("sqlite::memory:").await.unwrap()
    }

    fn fill(input_amount: u64, output_amount: u64) -> Settlement {
        Settlement {
            input_amount,
            output_amount,
        }
    }

    #[tokio::test]
    async fn test_credit_debit_and_overdraft() {
        let db = db().await;
        assert_eq!(db.credit("alice", 1_000, "deposit").await.unwrap(), 1_000);
        assert_eq!(db.debit("alice", 300, "withdrawal").await.unwrap(), 700);

        let err = db.debit("alice", 701, "withdrawal").await.unwrap_err();
        assert!(err.to_string().contains("Insufficient balance"));
        assert_eq!(db.balance("alice").await.unwrap(), 700);
        assert_eq!(db.balance("nobody").await.unwrap(), 0);

        let history = db.account_history("alice", 10).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].0, -300);
        assert_eq!(history[0].1, 700);
    }

    #[tokio::test]
    async fn test_concurrent_credits_serialize() {
        let db = db().await;
        let mut handles = Vec::new();
        for _ in 0..20 {
            let db = db.clone();
            handles.push(tokio::spawn(async move {
                db.credit("shared", 5, "commission").await.unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(db.balance("shared").await.unwrap(), 100);
    }

    #[tokio::test]
    async fn test_position_book_realizes_profit() {
        let db = db().await;

        // Buy 500 BONK for 100, then 500 more for 300
        assert_eq!(db.apply_fill("f", SOL, SOL, "BONK", fill(100, 500)).await.unwrap(), None);
        assert_eq!(db.apply_fill("f", SOL, SOL, "BONK", fill(300, 500)).await.unwrap(), None);
        let position = db.position("f", "BONK").await.unwrap().unwrap();
        assert_eq!(position.held(), 1_000);
        assert_eq!(position.cost(), 400);

        // Sell half for 260: cost of sold is 200
        let profit = db.apply_fill("f", SOL, "BONK", SOL, fill(500, 260)).await.unwrap();
        assert_eq!(profit, Some(60));

        // Sell the rest at a loss
        let profit = db.apply_fill("f", SOL, "BONK", SOL, fill(500, 150)).await.unwrap();
        assert_eq!(profit, Some(-50));
        assert!(db.position("f", "BONK").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_token_to_token_carries_cost() {
        let db = db().await;
        db.apply_fill("f", SOL, SOL, "BONK", fill(100, 1_000)).await.unwrap();
        assert_eq!(db.apply_fill("f", SOL, "BONK", "WIF", fill(1_000, 40)).await.unwrap(), None);

        assert!(db.position("f", "BONK").await.unwrap().is_none());
        let wif = db.position("f", "WIF").await.unwrap().unwrap();
        assert_eq!((wif.held(), wif.cost()), (40, 100));

        assert_eq!(db.apply_fill("f", SOL, "WIF", SOL, fill(40, 130)).await.unwrap(), Some(30));
    }

    #[tokio::test]
    async fn test_selling_untracked_token_realizes_nothing() {
        let db = db().await;
        assert_eq!(db.apply_fill("f", SOL, "BONK", SOL, fill(10, 99)).await.unwrap(), None);
    }

    fn distribution() -> Distribution {
        Distribution {
            realized_profit: 100,
            fee: 30,
            master_share: 10,
            network_pool: 20,
            lines: vec![
                CommissionLine {
                    recipient_ref: "u1".to_string(),
                    level: 1,
                    percentage: dec!(5),
                    amount: 5,
                },
                CommissionLine {
                    recipient_ref: "u3".to_string(),
                    level: 3,
                    percentage: dec!(5),
                    amount: 5,
                },
            ],
            platform_residual: 10,
        }
    }

    #[tokio::test]
    async fn test_apply_distribution_moves_every_share() {
        let db = db().await;
        db.credit("follower", 100, "deposit").await.unwrap();

        db.apply_distribution("follower", "master", "platform", "sig1", &distribution())
            .await
            .unwrap();

        assert_eq!(db.balance("follower").await.unwrap(), 70);
        assert_eq!(db.balance("master").await.unwrap(), 10);
        assert_eq!(db.balance("u1").await.unwrap(), 5);
        assert_eq!(db.balance("u3").await.unwrap(), 5);
        assert_eq!(db.balance("platform").await.unwrap(), 10);

        let rows = db.commissions_for_origin("sig1").await.unwrap();
        let levels: Vec<i64> = rows.iter().map(|r| r.level).collect();
        assert_eq!(levels, vec![1, 3]);
        assert_eq!(rows[0].percentage, "5");
    }

    #[tokio::test]
    async fn test_apply_distribution_is_atomic() {
        let db = db().await;
        db.credit("follower", 29, "deposit").await.unwrap();

        assert!(db
            .apply_distribution("follower", "master", "platform", "sig1", &distribution())
            .await
            .is_err());

        assert_eq!(db.balance("follower").await.unwrap(), 29);
        assert_eq!(db.balance("master").await.unwrap(), 0);
        assert!(db.commissions_for_origin("sig1").await.unwrap().is_empty());
    }
}
