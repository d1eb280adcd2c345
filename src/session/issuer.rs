//! Session issuance: composes the credential lifecycle with the bearer
//! signer behind the login/refresh/logout surface.

use chrono::Utc;
use std::sync::Arc;
use thiserror::Error;
use tracing::error;
use uuid::Uuid;

use crate::credential::{CredentialError, CredentialService, RequestContext};
use crate::error::StoreError;
use crate::quota::PrincipalStore;

use super::bearer::BearerSigner;

/// Token pair handed back on login and refresh.
#[derive(Clone, Debug)]
pub struct SessionTokens {
    pub bearer: String,
    pub bearer_expires_at: chrono::DateTime<Utc>,
    pub refresh_secret: String,
    pub refresh_expires_at: chrono::DateTime<Utc>,
}

/// Logout scope: just this credential, or every device on the family.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EndSessionScope {
    One,
    All,
}

/// Why a session operation was refused. Every variant is an expected,
/// user-facing outcome except `StoreUnavailable`, which is the only one
/// worth alerting on.
#[derive(Debug, Error)]
pub enum SessionError {
    /// Caller must authenticate again; no alarm raised.
    #[error("invalid refresh credential")]
    InvalidCredential,
    /// A consumed credential was replayed; the family is gone and every
    /// device on it must authenticate again.
    #[error("refresh credential reuse detected")]
    CredentialReuseDetected,
    /// The principal record backing the session does not exist.
    #[error("unknown principal")]
    UnknownPrincipal,
    #[error("backing store unavailable")]
    StoreUnavailable(#[source] StoreError),
}

impl From<CredentialError> for SessionError {
    fn from(err: CredentialError) -> Self {
        match err {
            CredentialError::Invalid => Self::InvalidCredential,
            CredentialError::ReuseDetected => Self::CredentialReuseDetected,
            CredentialError::Store(err) => Self::StoreUnavailable(err),
        }
    }
}

pub struct SessionIssuer {
    credentials: CredentialService,
    principals: Arc<dyn PrincipalStore>,
    signer: BearerSigner,
}

impl SessionIssuer {
    #[must_use]
    pub fn new(
        credentials: CredentialService,
        principals: Arc<dyn PrincipalStore>,
        signer: BearerSigner,
    ) -> Self {
        Self {
            credentials,
            principals,
            signer,
        }
    }

    #[must_use]
    pub fn credentials(&self) -> &CredentialService {
        &self.credentials
    }

    #[must_use]
    pub fn signer(&self) -> &BearerSigner {
        &self.signer
    }

    /// Start a session after the caller has authenticated the principal:
    /// a fresh credential family plus a minted bearer token.
    ///
    /// # Errors
    /// Returns `UnknownPrincipal` for ids without a backing record, or a
    /// store failure.
    pub async fn issue_session(
        &self,
        principal_id: Uuid,
        context: &RequestContext,
    ) -> Result<SessionTokens, SessionError> {
        let claims = self.claims_snapshot(principal_id).await?;
        let issued = self.credentials.issue(principal_id, context).await?;
        let (bearer, bearer_expires_at) = self
            .mint(principal_id, claims)
            .map_err(SessionError::StoreUnavailable)?;
        Ok(SessionTokens {
            bearer,
            bearer_expires_at,
            refresh_secret: issued.secret,
            refresh_expires_at: issued.expires_at,
        })
    }

    /// Exchange a refresh secret for a rotated credential and a fresh
    /// bearer token with current plan claims.
    pub async fn refresh_session(
        &self,
        refresh_secret: &str,
        context: &RequestContext,
    ) -> Result<SessionTokens, SessionError> {
        let (issued, principal_id) = self.credentials.rotate(refresh_secret, context).await?;
        let claims = self.claims_snapshot(principal_id).await?;
        let (bearer, bearer_expires_at) = self
            .mint(principal_id, claims)
            .map_err(SessionError::StoreUnavailable)?;
        Ok(SessionTokens {
            bearer,
            bearer_expires_at,
            refresh_secret: issued.secret,
            refresh_expires_at: issued.expires_at,
        })
    }

    /// End a session. Idempotent; returns how many credentials were
    /// actually revoked.
    pub async fn end_session(
        &self,
        refresh_secret: &str,
        scope: EndSessionScope,
    ) -> Result<u64, SessionError> {
        let revoked = match scope {
            EndSessionScope::One => self.credentials.revoke_one(refresh_secret).await?,
            EndSessionScope::All => self.credentials.revoke_family_of(refresh_secret).await?,
        };
        Ok(revoked)
    }

    async fn claims_snapshot(
        &self,
        principal_id: Uuid,
    ) -> Result<(crate::quota::Plan, bool), SessionError> {
        match self.principals.quota_snapshot(principal_id).await {
            Ok(Some(snapshot)) => Ok((snapshot.plan, snapshot.email_verified)),
            Ok(None) => {
                error!(%principal_id, "session requested for unknown principal");
                Err(SessionError::UnknownPrincipal)
            }
            Err(err) => Err(SessionError::StoreUnavailable(err)),
        }
    }

    fn mint(
        &self,
        principal_id: Uuid,
        (plan, email_verified): (crate::quota::Plan, bool),
    ) -> Result<(String, chrono::DateTime<Utc>), StoreError> {
        self.signer
            .mint(principal_id, plan, email_verified, Utc::now())
            .map_err(StoreError::Backend)
    }
}
