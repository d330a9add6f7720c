//! Follower registry backed by the copy settings store.

use anyhow::Result;
use tracing::debug;

use crate::db::Database;
use crate::models::Follower;

/// Current followers of one master and whether each may trade.
pub struct FollowerRegistry {
    db: Database,
    master: String,
    min_active_balance: u64,
}

impl FollowerRegistry {
    pub fn new(db: Database, master: impl Into<String>, min_active_balance: u64) -> Self {
        Self {
            db,
            master: master.into(),
            min_active_balance,
        }
    }

    /// Every follower subscribed to the master.
    ///
    /// A follower is active when its settings are enabled and its ledger balance
    /// is at least the minimum active balance.
    pub async fn followers(&self) -> Result<Vec<Follower>> {
        let settings = self.db.list_copy_settings(&self.master).await?;
        let mut followers = Vec::with_capacity(settings.len());

        for s in settings {
            let allocated = s.allocated_amount();
            let balance = self.db.balance(&s.follower_ref).await?;
            let active = s.is_active && balance >= self.min_active_balance;
            if s.is_active && !active {
                debug!(
                    follower = %s.follower_ref,
                    balance = balance,
                    required = self.min_active_balance,
                    "Balance below minimum"
                );
            }
            followers.push(Follower::new(s.follower_ref, allocated, active));
        }

        Ok(followers)
    }
}
