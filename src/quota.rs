//! Quota gate -- the per-account usage allowance consulted before each job.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Remaining/used counts for one account
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotaSnapshot {
    /// Units the account may consume
    pub limit: u64,
    /// Units consumed so far
    pub used: u64,
}

impl QuotaSnapshot {
    /// Units left before the limit is reached
    pub fn remaining(&self) -> u64 {
        self.limit.saturating_sub(self.used)
    }

    /// True once `used >= limit`
    pub fn is_exhausted(&self) -> bool {
        self.used >= self.limit
    }

    /// Snapshot after one more unit has been consumed
    #[must_use]
    pub fn consumed_one(&self) -> Self {
        Self {
            limit: self.limit,
            used: self.used.saturating_add(1),
        }
    }
}

/// Remote quota service
///
/// The batch asks before every job and reports the new usage count after
/// every success.
#[async_trait]
pub trait QuotaGate: Send + Sync {
    /// Current allowance for `account_id`
    async fn get_quota(&self, account_id: &str) -> Result<QuotaSnapshot>;

    /// Record that `account_id` has now used `new_count` units
    async fn report_usage(&self, account_id: &str, new_count: u64) -> Result<()>;
}

/// Quota gate that never refuses and ignores usage reports
///
/// Useful for self-hosted conversion services without accounting.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnlimitedQuota;

#[async_trait]
impl QuotaGate for UnlimitedQuota {
    async fn get_quota(&self, _account_id: &str) -> Result<QuotaSnapshot> {
        Ok(QuotaSnapshot {
            limit: u64::MAX,
            used: 0,
        })
    }

    async fn report_usage(&self, _account_id: &str, _new_count: u64) -> Result<()> {
        Ok(())
    }
}
