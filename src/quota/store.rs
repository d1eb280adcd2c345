//! Principal store seam for quota bookkeeping, plus the in-memory
//! implementation.
//!
//! The consume operations are the contract that matters: check-and-increment
//! must be one indivisible step in every implementation, because the gap in
//! a read-then-write version is exactly where two concurrent requests both
//! observe capacity and both get admitted.

use async_trait::async_trait;
use chrono::{DateTime, Months, Utc};
use std::collections::HashMap;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::error::StoreError;

use super::models::QuotaSnapshot;

/// Read/update access to the quota-relevant fields of principal records.
#[async_trait]
pub trait PrincipalStore: Send + Sync {
    async fn quota_snapshot(
        &self,
        principal_id: Uuid,
    ) -> Result<Option<QuotaSnapshot>, StoreError>;

    /// Atomically increment trial usage iff the result stays within `cap`.
    /// Returns the post-increment count, or `None` when the cap holds.
    async fn consume_trial(
        &self,
        principal_id: Uuid,
        cap: i64,
    ) -> Result<Option<i64>, StoreError>;

    /// Atomically increment monthly usage iff the result stays within
    /// `cap`, folding the periodic reset into the same indivisible update:
    /// a crossed reset date zeroes the counter and advances the date by one
    /// period before counting this consume.
    async fn consume_monthly(
        &self,
        principal_id: Uuid,
        cap: i64,
        now: DateTime<Utc>,
    ) -> Result<Option<i64>, StoreError>;
}

/// Process-local principal store for tests and single-node deployments.
/// The single lock makes each consume operation atomic.
#[derive(Default)]
pub struct MemoryPrincipalStore {
    principals: Mutex<HashMap<Uuid, QuotaSnapshot>>,
}

impl MemoryPrincipalStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn upsert(&self, snapshot: QuotaSnapshot) {
        let mut principals = self.principals.lock().await;
        principals.insert(snapshot.principal_id, snapshot);
    }

    pub async fn set_email_verified(&self, principal_id: Uuid, verified: bool) {
        let mut principals = self.principals.lock().await;
        if let Some(principal) = principals.get_mut(&principal_id) {
            principal.email_verified = verified;
        }
    }
}

#[async_trait]
impl PrincipalStore for MemoryPrincipalStore {
    async fn quota_snapshot(
        &self,
        principal_id: Uuid,
    ) -> Result<Option<QuotaSnapshot>, StoreError> {
        let principals = self.principals.lock().await;
        Ok(principals.get(&principal_id).cloned())
    }

    async fn consume_trial(
        &self,
        principal_id: Uuid,
        cap: i64,
    ) -> Result<Option<i64>, StoreError> {
        let mut principals = self.principals.lock().await;
        let principal = principals
            .get_mut(&principal_id)
            .ok_or(StoreError::NotFound)?;
        if principal.trial_generations_used >= cap {
            return Ok(None);
        }
        principal.trial_generations_used += 1;
        Ok(Some(principal.trial_generations_used))
    }

    async fn consume_monthly(
        &self,
        principal_id: Uuid,
        cap: i64,
        now: DateTime<Utc>,
    ) -> Result<Option<i64>, StoreError> {
        let mut principals = self.principals.lock().await;
        let principal = principals
            .get_mut(&principal_id)
            .ok_or(StoreError::NotFound)?;
        if principal.monthly_reset_at <= now {
            principal.monthly_generation_count = 0;
            principal.monthly_reset_at = now
                .checked_add_months(Months::new(1))
                .unwrap_or(principal.monthly_reset_at);
        }
        if principal.monthly_generation_count >= cap {
            return Ok(None);
        }
        principal.monthly_generation_count += 1;
        Ok(Some(principal.monthly_generation_count))
    }
}
