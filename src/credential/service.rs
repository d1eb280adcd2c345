//! Refresh-credential lifecycle: issue, rotate, revoke, reuse detection.
//!
//! Flow Overview:
//! 1) Login issues a credential under a brand-new family id.
//! 2) Refresh exchanges a live credential for a successor in one atomic
//!    store operation; the old row is revoked with reason `rotated`.
//! 3) Presenting an already-rotated credential is treated as theft: the
//!    entire family is revoked and a high-severity audit event is emitted.
//!    A lost rotation race looks identical at this layer and is handled
//!    the same conservative way.

use anyhow::{Context, Result};
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use rand::{RngCore, rngs::OsRng};
use serde_json::json;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

use crate::audit::{AuditEvent, AuditKind, AuditSink};
use crate::error::StoreError;

use super::models::{NewCredential, RefreshCredential, RequestContext, RevokedReason};
use super::store::{CredentialStore, RotateOutcome};

/// Attempts to find an unused secret hash before giving up.
const INSERT_ATTEMPTS: usize = 3;

/// Why a credential operation was refused.
#[derive(Debug, Error)]
pub enum CredentialError {
    /// Unknown, expired, or revoked-for-mundane-reasons credential. The
    /// caller must authenticate again; no alarm is raised.
    #[error("invalid refresh credential")]
    Invalid,
    /// A consumed credential was replayed. The family has been revoked and
    /// every device on it must authenticate again.
    #[error("refresh credential reuse detected")]
    ReuseDetected,
    #[error("credential store unavailable")]
    Store(#[from] StoreError),
}

/// Raw secret handed to the client plus the row coordinates kept server-side.
#[derive(Clone, Debug)]
pub struct IssuedCredential {
    pub secret: String,
    pub credential_id: Uuid,
    pub family_id: Uuid,
    pub expires_at: DateTime<Utc>,
}

/// Create a new refresh secret. The raw value is only ever returned to the
/// client; the store holds a hash.
pub(crate) fn generate_refresh_secret() -> Result<String> {
    let mut bytes = [0u8; 32];
    OsRng
        .try_fill_bytes(&mut bytes)
        .context("failed to generate refresh secret")?;
    Ok(URL_SAFE_NO_PAD.encode(bytes))
}

/// Hash a refresh secret for storage and lookup.
pub(crate) fn hash_refresh_secret(secret: &str) -> Vec<u8> {
    let mut hasher = Sha256::new();
    hasher.update(secret.as_bytes());
    hasher.finalize().to_vec()
}

pub struct CredentialService {
    store: Arc<dyn CredentialStore>,
    audit: Arc<dyn AuditSink>,
    refresh_ttl: Duration,
}

impl CredentialService {
    #[must_use]
    pub fn new(
        store: Arc<dyn CredentialStore>,
        audit: Arc<dyn AuditSink>,
        refresh_ttl: Duration,
    ) -> Self {
        Self {
            store,
            audit,
            refresh_ttl,
        }
    }

    #[must_use]
    pub fn store(&self) -> &Arc<dyn CredentialStore> {
        &self.store
    }

    /// Issue a credential under a brand-new family. Exactly one live
    /// credential exists for the family immediately afterwards.
    pub async fn issue(
        &self,
        principal_id: Uuid,
        context: &RequestContext,
    ) -> Result<IssuedCredential, CredentialError> {
        let now = Utc::now();
        let family_id = Uuid::new_v4();
        let expires_at = self.expiry(now);

        for _ in 0..INSERT_ATTEMPTS {
            let (secret, credential) =
                fresh_credential(principal_id, family_id, context, expires_at)
                    .map_err(StoreError::Backend)?;
            let credential_id = credential.id;
            match self.store.insert(credential, now).await {
                Ok(()) => {
                    self.audit.record(
                        AuditEvent::new(AuditKind::CredentialIssued)
                            .with_principal(principal_id)
                            .with_metadata(json!({ "family_id": family_id })),
                    );
                    return Ok(IssuedCredential {
                        secret,
                        credential_id,
                        family_id,
                        expires_at,
                    });
                }
                // Hash collision: try again with a fresh secret.
                Err(StoreError::Conflict) => {}
                Err(err) => return Err(err.into()),
            }
        }

        Err(unique_secret_exhausted())
    }

    /// Exchange a presented secret for a successor credential. Returns the
    /// new credential and the owning principal id.
    pub async fn rotate(
        &self,
        presented_secret: &str,
        context: &RequestContext,
    ) -> Result<(IssuedCredential, Uuid), CredentialError> {
        let now = Utc::now();
        let secret_hash = hash_refresh_secret(presented_secret);
        let Some(credential) = self.store.find_by_hash(&secret_hash).await? else {
            return Err(CredentialError::Invalid);
        };

        if credential.is_revoked {
            return Err(self.handle_revoked_presentation(&credential, now).await?);
        }
        if credential.is_expired(now) {
            return Err(CredentialError::Invalid);
        }

        let principal_id = credential.principal_id;
        let family_id = credential.family_id;
        let expires_at = self.expiry(now);

        for _ in 0..INSERT_ATTEMPTS {
            let (secret, successor) =
                fresh_credential(principal_id, family_id, context, expires_at)
                    .map_err(StoreError::Backend)?;
            let credential_id = successor.id;
            match self.store.rotate(credential.id, successor, now).await {
                Ok(RotateOutcome::Rotated) => {
                    self.audit.record(
                        AuditEvent::new(AuditKind::CredentialRotated)
                            .with_principal(principal_id)
                            .with_metadata(json!({ "family_id": family_id })),
                    );
                    return Ok((
                        IssuedCredential {
                            secret,
                            credential_id,
                            family_id,
                            expires_at,
                        },
                        principal_id,
                    ));
                }
                Ok(RotateOutcome::Superseded) => {
                    // Lost the race for a still-live row: indistinguishable
                    // from a replayed theft at this layer, so the family dies.
                    return Err(self
                        .flag_reuse(&credential, now, "concurrent_rotation")
                        .await?);
                }
                Err(StoreError::Conflict) => {}
                Err(err) => return Err(err.into()),
            }
        }

        Err(unique_secret_exhausted())
    }

    /// Revoke the single credential matching the presented secret.
    /// Idempotent; unknown secrets acknowledge silently.
    pub async fn revoke_one(&self, presented_secret: &str) -> Result<u64, CredentialError> {
        let secret_hash = hash_refresh_secret(presented_secret);
        let Some(credential) = self.store.find_by_hash(&secret_hash).await? else {
            return Ok(0);
        };
        let revoked = self
            .store
            .revoke(credential.id, RevokedReason::Logout, Utc::now())
            .await?;
        Ok(u64::from(revoked))
    }

    /// Revoke the whole family of the presented secret (logout-everywhere).
    pub async fn revoke_family_of(&self, presented_secret: &str) -> Result<u64, CredentialError> {
        let secret_hash = hash_refresh_secret(presented_secret);
        let Some(credential) = self.store.find_by_hash(&secret_hash).await? else {
            return Ok(0);
        };
        let revoked = self
            .store
            .revoke_family(credential.family_id, RevokedReason::LogoutAll, Utc::now())
            .await?;
        self.audit.record(
            AuditEvent::new(AuditKind::FamilyRevoked)
                .with_principal(credential.principal_id)
                .with_metadata(json!({
                    "family_id": credential.family_id,
                    "reason": RevokedReason::LogoutAll.as_str(),
                    "revoked": revoked,
                })),
        );
        Ok(revoked)
    }

    /// Delete long-dead rows. Background maintenance, never the hot path.
    pub async fn sweep(&self, revoked_retention: Duration) -> Result<u64, StoreError> {
        self.store.sweep(Utc::now(), revoked_retention).await
    }

    fn expiry(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let ttl = ChronoDuration::from_std(self.refresh_ttl)
            .unwrap_or_else(|_| ChronoDuration::days(7));
        now + ttl
    }

    async fn handle_revoked_presentation(
        &self,
        credential: &RefreshCredential,
        now: DateTime<Utc>,
    ) -> Result<CredentialError, CredentialError> {
        match credential.revoked_reason {
            // The secret was already exchanged once: replay of a consumed
            // credential, the theft signal this whole design exists for.
            Some(RevokedReason::Rotated) => self.flag_reuse(credential, now, "replay").await,
            // Family already dead from an earlier detection; repeat replays
            // stay on the reuse path but there is nothing left to revoke.
            Some(RevokedReason::ReuseDetected) => {
                self.audit.record(
                    AuditEvent::new(AuditKind::CredentialReuse)
                        .with_principal(credential.principal_id)
                        .with_metadata(json!({
                            "family_id": credential.family_id,
                            "trigger": "repeat_replay",
                        })),
                );
                Ok(CredentialError::ReuseDetected)
            }
            _ => Ok(CredentialError::Invalid),
        }
    }

    /// Revoke the family and emit the high-severity reuse event.
    async fn flag_reuse(
        &self,
        credential: &RefreshCredential,
        now: DateTime<Utc>,
        trigger: &str,
    ) -> Result<CredentialError, CredentialError> {
        let revoked = self
            .store
            .revoke_family(credential.family_id, RevokedReason::ReuseDetected, now)
            .await?;
        self.audit.record(
            AuditEvent::new(AuditKind::CredentialReuse)
                .with_principal(credential.principal_id)
                .with_metadata(json!({
                    "family_id": credential.family_id,
                    "trigger": trigger,
                    "revoked": revoked,
                })),
        );
        Ok(CredentialError::ReuseDetected)
    }
}

fn fresh_credential(
    principal_id: Uuid,
    family_id: Uuid,
    context: &RequestContext,
    expires_at: DateTime<Utc>,
) -> Result<(String, NewCredential)> {
    let secret = generate_refresh_secret()?;
    let credential = NewCredential {
        id: Uuid::new_v4(),
        principal_id,
        secret_hash: hash_refresh_secret(&secret),
        family_id,
        expires_at,
        ip_address: context.ip_address,
        user_agent: context.user_agent.clone(),
    };
    Ok((secret, credential))
}

fn unique_secret_exhausted() -> CredentialError {
    CredentialError::Store(StoreError::Backend(anyhow::anyhow!(
        "failed to generate a unique refresh secret"
    )))
}

#[cfg(test)]
mod tests {
    use super::{
        CredentialError, CredentialService, generate_refresh_secret, hash_refresh_secret,
    };
    use crate::audit::{AuditKind, RecordingAuditSink};
    use crate::credential::models::RequestContext;
    use crate::credential::store::{CredentialStore, MemoryCredentialStore};
    use anyhow::Result;
    use base64::Engine;
    use base64::engine::general_purpose::URL_SAFE_NO_PAD;
    use chrono::Utc;
    use std::sync::Arc;
    use std::time::Duration;
    use uuid::Uuid;

    fn service() -> (
        CredentialService,
        Arc<MemoryCredentialStore>,
        Arc<RecordingAuditSink>,
    ) {
        let store = Arc::new(MemoryCredentialStore::new());
        let audit = Arc::new(RecordingAuditSink::new());
        let service = CredentialService::new(
            store.clone(),
            audit.clone(),
            Duration::from_secs(7 * 24 * 3600),
        );
        (service, store, audit)
    }

    #[test]
    fn refresh_secret_decodes_to_32_bytes() -> Result<()> {
        let secret = generate_refresh_secret()?;
        let bytes = URL_SAFE_NO_PAD.decode(secret.as_bytes())?;
        assert_eq!(bytes.len(), 32);
        Ok(())
    }

    #[test]
    fn hashing_is_stable_and_discriminating() {
        assert_eq!(hash_refresh_secret("a"), hash_refresh_secret("a"));
        assert_ne!(hash_refresh_secret("a"), hash_refresh_secret("b"));
    }

    #[tokio::test]
    async fn issue_creates_one_live_credential() -> Result<()> {
        let (service, store, audit) = service();
        let principal = Uuid::new_v4();
        let issued = service.issue(principal, &RequestContext::default()).await?;

        assert_eq!(store.live_in_family(issued.family_id, Utc::now()).await, 1);
        assert_eq!(audit.count(AuditKind::CredentialIssued), 1);

        let stored = store
            .find_by_hash(&hash_refresh_secret(&issued.secret))
            .await?
            .expect("credential stored by hash");
        assert_eq!(stored.principal_id, principal);
        Ok(())
    }

    #[tokio::test]
    async fn rotate_keeps_the_family_and_changes_the_secret() -> Result<()> {
        let (service, store, _) = service();
        let principal = Uuid::new_v4();
        let first = service.issue(principal, &RequestContext::default()).await?;

        let (second, rotated_principal) = service
            .rotate(&first.secret, &RequestContext::default())
            .await?;
        assert_eq!(rotated_principal, principal);
        assert_eq!(second.family_id, first.family_id);
        assert_ne!(second.secret, first.secret);
        assert_eq!(store.live_in_family(first.family_id, Utc::now()).await, 1);
        Ok(())
    }

    #[tokio::test]
    async fn unknown_secret_is_invalid() {
        let (service, _, _) = service();
        let result = service
            .rotate("no-such-secret", &RequestContext::default())
            .await;
        assert!(matches!(result, Err(CredentialError::Invalid)));
    }

    #[tokio::test]
    async fn replaying_a_rotated_secret_revokes_the_family() -> Result<()> {
        let (service, store, audit) = service();
        let principal = Uuid::new_v4();
        let first = service.issue(principal, &RequestContext::default()).await?;
        let (second, _) = service
            .rotate(&first.secret, &RequestContext::default())
            .await?;

        // Replay of the consumed secret: reuse detected, family revoked.
        let replay = service
            .rotate(&first.secret, &RequestContext::default())
            .await;
        assert!(matches!(replay, Err(CredentialError::ReuseDetected)));
        assert_eq!(store.live_in_family(first.family_id, Utc::now()).await, 0);
        assert_eq!(audit.count(AuditKind::CredentialReuse), 1);

        // The successor fell with the family.
        let follow_up = service
            .rotate(&second.secret, &RequestContext::default())
            .await;
        assert!(matches!(follow_up, Err(CredentialError::ReuseDetected)));
        Ok(())
    }

    #[tokio::test]
    async fn logout_is_idempotent() -> Result<()> {
        let (service, _, _) = service();
        let issued = service
            .issue(Uuid::new_v4(), &RequestContext::default())
            .await?;
        assert_eq!(service.revoke_one(&issued.secret).await?, 1);
        assert_eq!(service.revoke_one(&issued.secret).await?, 0);
        assert_eq!(service.revoke_one("never-issued").await?, 0);
        Ok(())
    }

    #[tokio::test]
    async fn logged_out_secret_is_invalid_not_reuse() -> Result<()> {
        let (service, _, audit) = service();
        let issued = service
            .issue(Uuid::new_v4(), &RequestContext::default())
            .await?;
        service.revoke_one(&issued.secret).await?;

        let result = service
            .rotate(&issued.secret, &RequestContext::default())
            .await;
        assert!(matches!(result, Err(CredentialError::Invalid)));
        assert_eq!(audit.count(AuditKind::CredentialReuse), 0);
        Ok(())
    }

    #[tokio::test]
    async fn logout_everywhere_revokes_the_whole_family() -> Result<()> {
        let (service, store, _) = service();
        let principal = Uuid::new_v4();
        let first = service.issue(principal, &RequestContext::default()).await?;
        let (second, _) = service
            .rotate(&first.secret, &RequestContext::default())
            .await?;

        let revoked = service.revoke_family_of(&second.secret).await?;
        assert_eq!(revoked, 1);
        assert_eq!(store.live_in_family(first.family_id, Utc::now()).await, 0);
        Ok(())
    }
}
