//! Delegation lifecycle: grant, revoke, and authoritative activity checks.
//!
//! A delegation authorizes the executor to swap up to a ceiling on a follower's
//! behalf. Only the delegation account address is stored locally; its state is
//! always read back from chain, since the follower can revoke it directly.

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::db::Database;
use crate::models::{Delegation, DelegationRef};

/// Source of truth for delegation state.
#[async_trait]
pub trait DelegationAuthority: Send + Sync {
    /// Prepare a delegation for the follower to sign.
    async fn prepare_grant(&self, follower_ref: &str, mint: &str, amount: u64) -> Result<DelegationRef>;

    /// Prepare a revocation for the follower to sign.
    async fn prepare_revoke(&self, follower_ref: &str, mint: &str) -> Result<DelegationRef>;

    /// Read a delegation account. `Ok(None)` if it does not exist.
    async fn read(&self, delegation_account: &str) -> Result<Option<Delegation>>;
}

/// Issues and checks delegations.
pub struct DelegationManager {
    authority: Arc<dyn DelegationAuthority>,
    db: Database,
}

impl DelegationManager {
    pub fn new(authority: Arc<dyn DelegationAuthority>, db: Database) -> Self {
        Self { authority, db }
    }

    /// Authorize the executor to swap up to `amount` of `mint` for the follower.
    ///
    /// Does not move funds. The returned transaction must be signed by the
    /// follower before the delegation becomes active.
    pub async fn grant(&self, follower_ref: &str, mint: &str, amount: u64) -> Result<DelegationRef> {
        if amount == 0 {
            bail!("Delegation amount must be positive");
        }

        let delegation = self
            .authority
            .prepare_grant(follower_ref, mint, amount)
            .await
            .with_context(|| format!("Failed to prepare delegation for {}", follower_ref))?;

        self.db
            .record_delegation(follower_ref, mint, &delegation.delegation_account, amount)
            .await?;

        info!(
            follower = %follower_ref,
            mint = %mint,
            amount = amount,
            account = %delegation.delegation_account,
            "Delegation prepared"
        );

        Ok(delegation)
    }

    /// Prepare the revocation and stop using the delegation locally.
    ///
    /// Fails when the follower has no delegation recorded for `mint`.
    pub async fn revoke(&self, follower_ref: &str, mint: &str) -> Result<DelegationRef> {
        match self.db.get_delegation(follower_ref).await? {
            Some(record) if record.mint == mint => {}
            Some(record) => bail!(
                "{} delegated {}, not {}",
                follower_ref,
                record.mint,
                mint
            ),
            None => bail!("No delegation on record for {}", follower_ref),
        }

        let revocation = self
            .authority
            .prepare_revoke(follower_ref, mint)
            .await
            .with_context(|| format!("Failed to prepare revocation for {}", follower_ref))?;

        self.db.mark_delegation_revoked(follower_ref, mint).await?;

        info!(follower = %follower_ref, mint = %mint, "Delegation revoked");

        Ok(revocation)
    }

    /// Current on-chain delegation, or `None` when it cannot be confirmed active.
    ///
    /// Every failure path reads as inactive.
    pub async fn current(&self, follower_ref: &str) -> Option<Delegation> {
        let account = match self.db.delegation_account(follower_ref).await {
            Ok(Some(account)) => account,
            Ok(None) => {
                debug!(follower = %follower_ref, "No delegation on record");
                return None;
            }
            Err(e) => {
                warn!(follower = %follower_ref, error = %e, "Delegation lookup failed");
                return None;
            }
        };

        match self.authority.read(&account).await {
            Ok(Some(delegation)) if delegation.follower_ref != follower_ref => {
                warn!(
                    follower = %follower_ref,
                    account = %account,
                    owner = %delegation.follower_ref,
                    "Delegation account belongs to another wallet"
                );
                None
            }
            Ok(Some(delegation)) if delegation.active => Some(delegation),
            Ok(_) => None,
            Err(e) => {
                warn!(follower = %follower_ref, account = %account, error = %e, "Delegation read failed");
                None
            }
        }
    }

    pub async fn is_active(&self, follower_ref: &str) -> bool {
        self.current(follower_ref).await.is_some()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// In-memory authority keyed by delegation account.
    #[derive(Default)]
    pub(crate) struct FakeAuthority {
        pub accounts: Mutex<HashMap<String, Delegation>>,
        pub fail_reads: bool,
    }

    impl FakeAuthority {
        pub fn account_for(follower_ref: &str) -> String {
            format!("deleg-{}", follower_ref)
        }

        /// Simulate the follower signing the grant.
        pub fn activate(&self, follower_ref: &str, amount: u64) {
            self.accounts.lock().unwrap().insert(
                Self::account_for(follower_ref),
                Delegation {
                    follower_ref: follower_ref.to_string(),
                    granted_amount: amount,
                    active: true,
                },
            );
        }

        /// Simulate the follower revoking directly on chain.
        pub fn deactivate(&self, follower_ref: &str) {
            if let Some(d) = self
                .accounts
                .lock()
                .unwrap()
                .get_mut(&Self::account_for(follower_ref))
            {
                d.active = false;
            }
        }
    }

    #[async_trait]
    impl DelegationAuthority for FakeAuthority {
        async fn prepare_grant(&self, follower_ref: &str, _mint: &str, _amount: u64) -> Result<DelegationRef> {
            Ok(DelegationRef {
                delegation_account: Self::account_for(follower_ref),
                transaction: "grant-tx".to_string(),
            })
        }

        async fn prepare_revoke(&self, follower_ref: &str, _mint: &str) -> Result<DelegationRef> {
            Ok(DelegationRef {
                delegation_account: Self::account_for(follower_ref),
                transaction: "revoke-tx".to_string(),
            })
        }

        async fn read(&self, delegation_account: &str) -> Result<Option<Delegation>> {
            if self.fail_reads {
                bail!("rpc unavailable");
            }
            Ok(self.accounts.lock().unwrap().get(delegation_account).cloned())
        }
    }

    async fn setup(authority: FakeAuthority) -> (Arc<FakeAuthority>, DelegationManager) {
        let db = Database::new("sqlite::memory:").await.unwrap();
        let authority = Arc::new(authority);
        let manager = DelegationManager::new(authority.clone(), db);
        (authority, manager)
    }

    #[tokio::test]
    async fn test_grant_records_account_but_not_state() {
        let (authority, manager) = setup(FakeAuthority::default()).await;

        let r = manager.grant("alice", "SOL", 1_000).await.unwrap();
        assert_eq!(r.delegation_account, "deleg-alice");
        assert_eq!(r.transaction, "grant-tx");

        // Not signed yet
        assert!(!manager.is_active("alice").await);

        authority.activate("alice", 1_000);
        let current = manager.current("alice").await.unwrap();
        assert_eq!(current.granted_amount, 1_000);
    }

    #[tokio::test]
    async fn test_rejects_zero_grant() {
        let (_, manager) = setup(FakeAuthority::default()).await;
        assert!(manager.grant("alice", "SOL", 0).await.is_err());
    }

    #[tokio::test]
    async fn test_external_revocation_is_observed() {
        let (authority, manager) = setup(FakeAuthority::default()).await;
        manager.grant("alice", "SOL", 500).await.unwrap();
        authority.activate("alice", 500);
        assert!(manager.is_active("alice").await);

        authority.deactivate("alice");
        assert!(!manager.is_active("alice").await);
    }

    #[tokio::test]
    async fn test_local_revoke_stops_use() {
        let (authority, manager) = setup(FakeAuthority::default()).await;
        manager.grant("alice", "SOL", 500).await.unwrap();
        authority.activate("alice", 500);

        let r = manager.revoke("alice", "SOL").await.unwrap();
        assert_eq!(r.transaction, "revoke-tx");
        assert!(!manager.is_active("alice").await);
    }

    #[tokio::test]
    async fn test_revoke_requires_the_delegated_mint() {
        let (authority, manager) = setup(FakeAuthority::default()).await;
        manager.grant("alice", "SOL", 500).await.unwrap();
        authority.activate("alice", 500);

        assert!(manager.revoke("alice", "BONK").await.is_err());
        assert!(manager.is_active("alice").await);

        assert!(manager.revoke("bob", "SOL").await.is_err());
    }

    #[tokio::test]
    async fn test_fails_closed() {
        let (_, manager) = setup(FakeAuthority::default()).await;
        assert!(!manager.is_active("nobody").await);

        let (authority, manager) = setup(FakeAuthority {
            fail_reads: true,
            ..Default::default()
        })
        .await;
        manager.grant("alice", "SOL", 500).await.unwrap();
        authority.activate("alice", 500);
        assert!(!manager.is_active("alice").await);
    }

    #[tokio::test]
    async fn test_foreign_account_is_rejected() {
        let (authority, manager) = setup(FakeAuthority::default()).await;
        manager.grant("alice", "SOL", 500).await.unwrap();
        authority.accounts.lock().unwrap().insert(
            FakeAuthority::account_for("alice"),
            Delegation {
                follower_ref: "mallory".to_string(),
                granted_amount: 500,
                active: true,
            },
        );
        assert!(!manager.is_active("alice").await);
    }
}
