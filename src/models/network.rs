//! Referral network models: ranks, upline chains and commission lines.

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};

/// Deepest upline level that can earn commission.
pub const MAX_UPLINE_DEPTH: usize = 8;

/// Network rank. Ordered: `Unranked < V1 < … < V8`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Rank {
    Unranked,
    V1,
    V2,
    V3,
    V4,
    V5,
    V6,
    V7,
    V8,
}

impl Rank {
    pub const ALL: [Rank; 9] = [
        Rank::Unranked,
        Rank::V1,
        Rank::V2,
        Rank::V3,
        Rank::V4,
        Rank::V5,
        Rank::V6,
        Rank::V7,
        Rank::V8,
    ];

    /// Numeric level as stored by the settings collaborator (0 = unranked).
    pub fn level(&self) -> u8 {
        *self as u8
    }

    pub fn from_level(level: i64) -> Option<Rank> {
        usize::try_from(level).ok().and_then(|i| Rank::ALL.get(i).copied())
    }
}

impl fmt::Display for Rank {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rank::Unranked => write!(f, "Unranked"),
            other => write!(f, "V{}", other.level()),
        }
    }
}

impl FromStr for Rank {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.eq_ignore_ascii_case("unranked") || s == "0" {
            return Ok(Rank::Unranked);
        }
        let digits = s.strip_prefix(['V', 'v']).unwrap_or(s);
        let level: i64 = digits
            .parse()
            .map_err(|_| anyhow!("Invalid rank: {}", s))?;
        Rank::from_level(level).ok_or_else(|| anyhow!("Rank out of range: {}", s))
    }
}

/// One ancestor in a follower's sponsorship chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UplineNode {
    pub account_ref: String,

    /// None when the account has never been ranked
    pub rank: Option<Rank>,
}

impl UplineNode {
    pub fn new(account_ref: impl Into<String>, rank: Option<Rank>) -> Self {
        Self {
            account_ref: account_ref.into(),
            rank,
        }
    }

    /// Whether this node satisfies a level's minimum rank.
    pub fn meets(&self, requirement: Rank) -> bool {
        match self.rank {
            Some(rank) => rank >= requirement,
            None => requirement == Rank::Unranked,
        }
    }
}

/// Snapshot of a follower's ancestors, index 0 being the direct sponsor (level 1).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UplineChain {
    nodes: Vec<UplineNode>,
}

impl UplineChain {
    /// Build a chain, keeping at most `MAX_UPLINE_DEPTH` nodes.
    pub fn new(mut nodes: Vec<UplineNode>) -> Self {
        nodes.truncate(MAX_UPLINE_DEPTH);
        Self { nodes }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Node at a 1-based level.
    pub fn at_level(&self, level: usize) -> Option<&UplineNode> {
        level.checked_sub(1).and_then(|i| self.nodes.get(i))
    }

    /// A chain is malformed if it repeats an account or loops back to the follower.
    pub fn check_acyclic(&self, follower_ref: &str) -> Result<()> {
        let mut seen = HashSet::with_capacity(self.nodes.len() + 1);
        seen.insert(follower_ref);
        for (i, node) in self.nodes.iter().enumerate() {
            if node.account_ref.is_empty() {
                return Err(anyhow!("Empty account at level {}", i + 1));
            }
            if !seen.insert(node.account_ref.as_str()) {
                return Err(anyhow!(
                    "Account {} repeats at level {}",
                    node.account_ref,
                    i + 1
                ));
            }
        }
        Ok(())
    }
}

/// One commission payment to an upline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommissionLine {
    pub recipient_ref: String,

    /// 1-based network level
    pub level: u8,

    /// Percent of realized profit
    pub percentage: rust_decimal::Decimal,

    /// Lamports
    pub amount: u64,
}

/// Full breakdown of one performance-fee event.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Distribution {
    pub realized_profit: u64,

    /// Total performance fee charged to the follower
    pub fee: u64,

    /// Credited to the master trader
    pub master_share: u64,

    /// `fee - master_share`
    pub network_pool: u64,

    pub lines: Vec<CommissionLine>,

    /// Unpaid levels plus rounding dust, kept by the platform
    pub platform_residual: u64,
}

impl Distribution {
    pub fn paid_to_network(&self) -> u64 {
        self.lines.iter().map(|l| l.amount).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.fee == 0
    }
}
