//! Credential persistence seam and the in-memory implementation.
//!
//! The contract every implementation must honor: `rotate` is one atomic
//! unit. Either the predecessor is revoked and the successor inserted, or
//! neither happens. A caller that loses a rotation race observes
//! `RotateOutcome::Superseded`, never a half-rotated family.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::error::StoreError;

use super::models::{NewCredential, RefreshCredential, RevokedReason};

/// Result of an atomic revoke-and-replace.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RotateOutcome {
    /// This caller won: predecessor revoked, successor live.
    Rotated,
    /// The predecessor was no longer live; some other caller got there
    /// first (or it expired in between).
    Superseded,
}

/// Durable refresh-credential storage.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Insert a fresh row. Fails with `StoreError::Conflict` when the
    /// secret hash already exists.
    async fn insert(
        &self,
        credential: NewCredential,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    async fn find_by_hash(
        &self,
        secret_hash: &[u8],
    ) -> Result<Option<RefreshCredential>, StoreError>;

    /// Atomically revoke `predecessor_id` (reason `rotated`, touching
    /// `last_used_at`) and insert `successor` in its family.
    async fn rotate(
        &self,
        predecessor_id: Uuid,
        successor: NewCredential,
        now: DateTime<Utc>,
    ) -> Result<RotateOutcome, StoreError>;

    /// Revoke one credential. Returns whether a live row was actually
    /// revoked; revoking twice is a no-op, not an error.
    async fn revoke(
        &self,
        credential_id: Uuid,
        reason: RevokedReason,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError>;

    /// Revoke every live credential in a family. Returns the count revoked.
    async fn revoke_family(
        &self,
        family_id: Uuid,
        reason: RevokedReason,
        now: DateTime<Utc>,
    ) -> Result<u64, StoreError>;

    /// Delete rows expired before `now` and rows revoked longer than
    /// `revoked_retention` ago. Never touches live rows.
    async fn sweep(
        &self,
        now: DateTime<Utc>,
        revoked_retention: Duration,
    ) -> Result<u64, StoreError>;
}

/// Process-local credential store for tests and single-node deployments.
/// One lock around the whole map makes every operation atomic.
#[derive(Default)]
pub struct MemoryCredentialStore {
    rows: Mutex<HashMap<Uuid, RefreshCredential>>,
}

impl MemoryCredentialStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Count of live credentials in one family; the invariant says this is
    /// never more than one.
    pub async fn live_in_family(&self, family_id: Uuid, now: DateTime<Utc>) -> usize {
        let rows = self.rows.lock().await;
        rows.values()
            .filter(|row| row.family_id == family_id && row.is_live(now))
            .count()
    }

    /// Count of live credentials across all families.
    pub async fn live_count(&self, now: DateTime<Utc>) -> usize {
        let rows = self.rows.lock().await;
        rows.values().filter(|row| row.is_live(now)).count()
    }

    pub async fn row_count(&self) -> usize {
        self.rows.lock().await.len()
    }
}

fn materialize(credential: NewCredential, now: DateTime<Utc>) -> RefreshCredential {
    RefreshCredential {
        id: credential.id,
        principal_id: credential.principal_id,
        secret_hash: credential.secret_hash,
        family_id: credential.family_id,
        expires_at: credential.expires_at,
        ip_address: credential.ip_address,
        user_agent: credential.user_agent,
        is_revoked: false,
        revoked_reason: None,
        revoked_at: None,
        last_used_at: None,
        created_at: now,
    }
}

#[async_trait]
impl CredentialStore for MemoryCredentialStore {
    async fn insert(
        &self,
        credential: NewCredential,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut rows = self.rows.lock().await;
        if rows
            .values()
            .any(|row| row.secret_hash == credential.secret_hash)
        {
            return Err(StoreError::Conflict);
        }
        rows.insert(credential.id, materialize(credential, now));
        Ok(())
    }

    async fn find_by_hash(
        &self,
        secret_hash: &[u8],
    ) -> Result<Option<RefreshCredential>, StoreError> {
        let rows = self.rows.lock().await;
        Ok(rows
            .values()
            .find(|row| row.secret_hash == secret_hash)
            .cloned())
    }

    async fn rotate(
        &self,
        predecessor_id: Uuid,
        successor: NewCredential,
        now: DateTime<Utc>,
    ) -> Result<RotateOutcome, StoreError> {
        let mut rows = self.rows.lock().await;
        // Check the successor hash before mutating anything so a conflict
        // leaves the predecessor untouched.
        if rows
            .values()
            .any(|row| row.secret_hash == successor.secret_hash)
        {
            return Err(StoreError::Conflict);
        }
        let Some(predecessor) = rows.get_mut(&predecessor_id) else {
            return Ok(RotateOutcome::Superseded);
        };
        if !predecessor.is_live(now) {
            return Ok(RotateOutcome::Superseded);
        }
        predecessor.is_revoked = true;
        predecessor.revoked_reason = Some(RevokedReason::Rotated);
        predecessor.revoked_at = Some(now);
        predecessor.last_used_at = Some(now);
        rows.insert(successor.id, materialize(successor, now));
        Ok(RotateOutcome::Rotated)
    }

    async fn revoke(
        &self,
        credential_id: Uuid,
        reason: RevokedReason,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let mut rows = self.rows.lock().await;
        let Some(row) = rows.get_mut(&credential_id) else {
            return Ok(false);
        };
        if row.is_revoked {
            return Ok(false);
        }
        row.is_revoked = true;
        row.revoked_reason = Some(reason);
        row.revoked_at = Some(now);
        Ok(true)
    }

    async fn revoke_family(
        &self,
        family_id: Uuid,
        reason: RevokedReason,
        now: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        let mut rows = self.rows.lock().await;
        let mut revoked = 0;
        for row in rows.values_mut() {
            if row.family_id == family_id && !row.is_revoked {
                row.is_revoked = true;
                row.revoked_reason = Some(reason);
                row.revoked_at = Some(now);
                revoked += 1;
            }
        }
        Ok(revoked)
    }

    async fn sweep(
        &self,
        now: DateTime<Utc>,
        revoked_retention: Duration,
    ) -> Result<u64, StoreError> {
        let retention = chrono::Duration::from_std(revoked_retention)
            .unwrap_or_else(|_| chrono::Duration::days(7));
        let cutoff = now - retention;
        let mut rows = self.rows.lock().await;
        let before = rows.len();
        rows.retain(|_, row| {
            let expired = row.expires_at <= now;
            let stale_revoked = row
                .revoked_at
                .is_some_and(|revoked_at| row.is_revoked && revoked_at <= cutoff);
            !expired && !stale_revoked
        });
        Ok(u64::try_from(before - rows.len()).unwrap_or(0))
    }
}
