//! Static policy table: endpoint class -> counting window limits.
//!
//! The table is explicit and compile-time constant on purpose; no hidden
//! global state and no per-request mutation of policy.

use std::time::Duration;

/// What to do when the shared counter store cannot be reached.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FailurePolicy {
    /// Permit the request; losing rate limiting briefly beats a full outage.
    Open,
    /// Deny the request; brute-force protection holds even during outages.
    Closed,
}

/// Fixed-window counting policy for one endpoint class.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LimitPolicy {
    /// Hits allowed per window.
    pub limit: u64,
    pub window: Duration,
    /// Successful requests do not count against the limit.
    pub skip_successful: bool,
    /// Failed requests do not count against the limit.
    pub skip_failed: bool,
    pub on_store_failure: FailurePolicy,
}

impl LimitPolicy {
    /// Counting is deferred until the caller reports the request outcome.
    #[must_use]
    pub const fn defers_counting(&self) -> bool {
        self.skip_successful || self.skip_failed
    }
}

/// Endpoint classes with independent counting windows.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EndpointClass {
    /// Authenticated content generation.
    Generation,
    /// Unauthenticated (guest) content generation.
    GuestGeneration,
    Login,
    Registration,
    PasswordReset,
    EmailVerification,
    /// General API traffic.
    Api,
    /// Expensive API endpoints.
    HeavyApi,
    Admin,
}

impl EndpointClass {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Generation => "generation",
            Self::GuestGeneration => "guest_generation",
            Self::Login => "login",
            Self::Registration => "registration",
            Self::PasswordReset => "password_reset",
            Self::EmailVerification => "email_verification",
            Self::Api => "api",
            Self::HeavyApi => "heavy_api",
            Self::Admin => "admin",
        }
    }

    /// The policy table. Auth-sensitive classes fail closed so credential
    /// stuffing cannot hide behind a counter-store outage; general traffic
    /// fails open to avoid turning that outage into a full one.
    #[must_use]
    pub const fn policy(self) -> LimitPolicy {
        match self {
            Self::Generation => LimitPolicy {
                limit: 5,
                window: Duration::from_secs(60),
                skip_successful: false,
                skip_failed: false,
                on_store_failure: FailurePolicy::Open,
            },
            Self::GuestGeneration => LimitPolicy {
                limit: 1,
                window: Duration::from_secs(3600),
                skip_successful: false,
                skip_failed: false,
                on_store_failure: FailurePolicy::Closed,
            },
            Self::Login => LimitPolicy {
                limit: 3,
                window: Duration::from_secs(900),
                // Only failed attempts count; a user logging in and out all
                // day is not a brute-force signal.
                skip_successful: true,
                skip_failed: false,
                on_store_failure: FailurePolicy::Closed,
            },
            Self::Registration => LimitPolicy {
                limit: 2,
                window: Duration::from_secs(3600),
                skip_successful: false,
                skip_failed: false,
                on_store_failure: FailurePolicy::Closed,
            },
            Self::PasswordReset => LimitPolicy {
                limit: 2,
                window: Duration::from_secs(3600),
                skip_successful: false,
                skip_failed: false,
                on_store_failure: FailurePolicy::Closed,
            },
            Self::EmailVerification => LimitPolicy {
                limit: 2,
                window: Duration::from_secs(600),
                skip_successful: false,
                skip_failed: false,
                on_store_failure: FailurePolicy::Closed,
            },
            Self::Api => LimitPolicy {
                limit: 60,
                window: Duration::from_secs(60),
                skip_successful: false,
                skip_failed: false,
                on_store_failure: FailurePolicy::Open,
            },
            Self::HeavyApi => LimitPolicy {
                limit: 10,
                window: Duration::from_secs(60),
                skip_successful: false,
                skip_failed: false,
                on_store_failure: FailurePolicy::Open,
            },
            Self::Admin => LimitPolicy {
                limit: 100,
                window: Duration::from_secs(60),
                skip_successful: false,
                skip_failed: false,
                on_store_failure: FailurePolicy::Open,
            },
        }
    }
}

/// Paths that always pass, checked before identity resolution.
const BYPASS_PATHS: &[&str] = &["/health", "/metrics", "/status"];

/// Whether a request path skips admission control entirely.
#[must_use]
pub fn bypasses_admission(path: &str) -> bool {
    BYPASS_PATHS.contains(&path)
}

#[cfg(test)]
mod tests {
    use super::{EndpointClass, FailurePolicy, bypasses_admission};
    use std::time::Duration;

    #[test]
    fn login_counts_only_failures() {
        let policy = EndpointClass::Login.policy();
        assert_eq!(policy.limit, 3);
        assert_eq!(policy.window, Duration::from_secs(900));
        assert!(policy.skip_successful);
        assert!(!policy.skip_failed);
        assert!(policy.defers_counting());
    }

    #[test]
    fn auth_sensitive_classes_fail_closed() {
        for class in [
            EndpointClass::Login,
            EndpointClass::Registration,
            EndpointClass::PasswordReset,
            EndpointClass::EmailVerification,
        ] {
            assert_eq!(class.policy().on_store_failure, FailurePolicy::Closed);
        }
        assert_eq!(
            EndpointClass::Api.policy().on_store_failure,
            FailurePolicy::Open
        );
    }

    #[test]
    fn generation_limits_split_by_authentication() {
        assert_eq!(EndpointClass::Generation.policy().limit, 5);
        assert_eq!(EndpointClass::GuestGeneration.policy().limit, 1);
        assert_eq!(
            EndpointClass::GuestGeneration.policy().window,
            Duration::from_secs(3600)
        );
    }

    #[test]
    fn bypass_paths_skip_admission() {
        assert!(bypasses_admission("/health"));
        assert!(bypasses_admission("/metrics"));
        assert!(bypasses_admission("/status"));
        assert!(!bypasses_admission("/v1/auth/login"));
        assert!(!bypasses_admission("/healthz"));
    }
}
