//! Refresh credential rows and lifecycle vocabulary.

use chrono::{DateTime, Utc};
use std::net::IpAddr;
use uuid::Uuid;

/// Why a credential stopped being usable.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RevokedReason {
    /// Exchanged for a successor during a normal refresh.
    Rotated,
    /// An already-rotated credential was presented again; the whole family
    /// was revoked in response.
    ReuseDetected,
    Logout,
    LogoutAll,
    /// Removed by background cleanup after expiry.
    ExpiredCleanup,
}

impl RevokedReason {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Rotated => "rotated",
            Self::ReuseDetected => "reuse_detected",
            Self::Logout => "logout",
            Self::LogoutAll => "logout_all",
            Self::ExpiredCleanup => "expired_cleanup",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "rotated" => Some(Self::Rotated),
            "reuse_detected" => Some(Self::ReuseDetected),
            "logout" => Some(Self::Logout),
            "logout_all" => Some(Self::LogoutAll),
            "expired_cleanup" => Some(Self::ExpiredCleanup),
            _ => None,
        }
    }
}

/// One issued refresh secret. Only the hash of the secret is ever stored;
/// the raw value exists client-side and nowhere else.
#[derive(Clone, Debug)]
pub struct RefreshCredential {
    pub id: Uuid,
    pub principal_id: Uuid,
    pub secret_hash: Vec<u8>,
    /// Shared by every credential descended from one login event.
    pub family_id: Uuid,
    pub expires_at: DateTime<Utc>,
    pub ip_address: Option<IpAddr>,
    pub user_agent: Option<String>,
    pub is_revoked: bool,
    pub revoked_reason: Option<RevokedReason>,
    pub revoked_at: Option<DateTime<Utc>>,
    pub last_used_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl RefreshCredential {
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }

    /// A live credential is the family's chain tip: not revoked, not expired.
    #[must_use]
    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        !self.is_revoked && !self.is_expired(now)
    }
}

/// Insert payload for a fresh credential row.
#[derive(Clone, Debug)]
pub struct NewCredential {
    pub id: Uuid,
    pub principal_id: Uuid,
    pub secret_hash: Vec<u8>,
    pub family_id: Uuid,
    pub expires_at: DateTime<Utc>,
    pub ip_address: Option<IpAddr>,
    pub user_agent: Option<String>,
}

/// Request context captured at issue/rotation time for audit visibility.
#[derive(Clone, Debug, Default)]
pub struct RequestContext {
    pub ip_address: Option<IpAddr>,
    pub user_agent: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::{NewCredential, RefreshCredential, RevokedReason};
    use chrono::{Duration, Utc};
    use uuid::Uuid;

    #[test]
    fn reason_names_round_trip() {
        for reason in [
            RevokedReason::Rotated,
            RevokedReason::ReuseDetected,
            RevokedReason::Logout,
            RevokedReason::LogoutAll,
            RevokedReason::ExpiredCleanup,
        ] {
            assert_eq!(RevokedReason::parse(reason.as_str()), Some(reason));
        }
        assert_eq!(RevokedReason::parse("unknown"), None);
    }

    #[test]
    fn liveness_requires_unrevoked_and_unexpired() {
        let now = Utc::now();
        let fresh = NewCredential {
            id: Uuid::new_v4(),
            principal_id: Uuid::new_v4(),
            secret_hash: vec![1, 2, 3],
            family_id: Uuid::new_v4(),
            expires_at: now + Duration::days(7),
            ip_address: None,
            user_agent: None,
        };
        let mut credential = RefreshCredential {
            id: fresh.id,
            principal_id: fresh.principal_id,
            secret_hash: fresh.secret_hash,
            family_id: fresh.family_id,
            expires_at: fresh.expires_at,
            ip_address: None,
            user_agent: None,
            is_revoked: false,
            revoked_reason: None,
            revoked_at: None,
            last_used_at: None,
            created_at: now,
        };
        assert!(credential.is_live(now));

        credential.is_revoked = true;
        assert!(!credential.is_live(now));

        credential.is_revoked = false;
        assert!(!credential.is_live(now + Duration::days(8)));
    }
}
