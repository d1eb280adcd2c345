//! Short-lived signed bearer tokens carrying the principal and a snapshot
//! of plan-relevant claims.
//!
//! Bearer tokens are cheap to verify offline; everything durable lives
//! with the refresh credential. Claims can go stale within the short TTL
//! and refresh on the next rotation.

use anyhow::{Context, Result, anyhow};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

use crate::quota::Plan;

pub const MIN_BEARER_TTL_SECONDS: u64 = 60;
pub const MAX_BEARER_TTL_SECONDS: u64 = 3600;

/// Claims asserted by a bearer token.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BearerClaims {
    /// Principal id.
    pub sub: Uuid,
    pub iss: String,
    pub iat: i64,
    pub exp: i64,
    pub jti: Uuid,
    pub plan: Plan,
    pub email_verified: bool,
}

/// Mints and verifies bearer tokens with a shared HMAC key.
pub struct BearerSigner {
    issuer: String,
    ttl: ChronoDuration,
    encoding: EncodingKey,
    decoding: DecodingKey,
}

impl BearerSigner {
    /// # Errors
    /// Returns an error when the TTL falls outside the allowed range; a
    /// long-lived bearer token would defeat the point of rotation.
    pub fn new(secret: &SecretString, issuer: String, ttl: Duration) -> Result<Self> {
        if !(MIN_BEARER_TTL_SECONDS..=MAX_BEARER_TTL_SECONDS).contains(&ttl.as_secs()) {
            return Err(anyhow!(
                "bearer token ttl out of range: {}s",
                ttl.as_secs()
            ));
        }
        let key_bytes = secret.expose_secret().as_bytes();
        Ok(Self {
            issuer,
            ttl: ChronoDuration::from_std(ttl).context("invalid bearer ttl")?,
            encoding: EncodingKey::from_secret(key_bytes),
            decoding: DecodingKey::from_secret(key_bytes),
        })
    }

    /// Mint a token for `principal_id` with the given claims snapshot.
    /// Returns the encoded token and its expiry.
    ///
    /// # Errors
    /// Returns an error if encoding fails.
    pub fn mint(
        &self,
        principal_id: Uuid,
        plan: Plan,
        email_verified: bool,
        now: DateTime<Utc>,
    ) -> Result<(String, DateTime<Utc>)> {
        let expires_at = now + self.ttl;
        let claims = BearerClaims {
            sub: principal_id,
            iss: self.issuer.clone(),
            iat: now.timestamp(),
            exp: expires_at.timestamp(),
            jti: Uuid::new_v4(),
            plan,
            email_verified,
        };
        let token = encode(&Header::default(), &claims, &self.encoding)
            .context("failed to encode bearer token")?;
        Ok((token, expires_at))
    }

    /// Verify signature, expiry, and issuer; returns the claims snapshot.
    ///
    /// # Errors
    /// Returns an error for tampered, expired, or foreign-issuer tokens.
    pub fn verify(&self, token: &str) -> Result<BearerClaims> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[self.issuer.as_str()]);
        let data = decode::<BearerClaims>(token, &self.decoding, &validation)
            .context("failed to verify bearer token")?;
        Ok(data.claims)
    }
}
