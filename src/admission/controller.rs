//! Admission decisions over fixed counting windows.
//!
//! Flow Overview:
//! 1) Resolve the class policy and the current window start.
//! 2) Atomically increment the window counter, or only peek it for classes
//!    that defer counting until the request outcome is known.
//! 3) Deny with the window's remaining seconds when the limit is crossed,
//!    emitting a security audit event.
//!
//! Counter-store failures never propagate: each class resolves them to a
//! permit or a deny according to its configured failure policy.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tracing::error;

use crate::audit::{AuditEvent, AuditKind, AuditSink};
use crate::identity::ClientIdentity;

use super::counter::CounterStore;
use super::policy::{EndpointClass, FailurePolicy, LimitPolicy};

/// Outcome of an admission check.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AdmissionDecision {
    Permit,
    Deny { retry_after_seconds: u64 },
}

/// How a handled request ended, reported back for outcome-deferred classes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RequestOutcome {
    Success,
    Failure,
}

/// Per-identity, per-class request gate.
pub struct AdmissionController {
    store: Arc<dyn CounterStore>,
    audit: Arc<dyn AuditSink>,
}

impl AdmissionController {
    #[must_use]
    pub fn new(store: Arc<dyn CounterStore>, audit: Arc<dyn AuditSink>) -> Self {
        Self { store, audit }
    }

    /// Decide whether a request proceeds.
    pub async fn check(&self, identity: &ClientIdentity, class: EndpointClass) -> AdmissionDecision {
        self.check_at(identity, class, Utc::now()).await
    }

    /// Report how a previously admitted request ended. Only classes that
    /// skip successful or failed requests count anything here; for all
    /// other classes this is a no-op because `check` already counted.
    pub async fn report_outcome(
        &self,
        identity: &ClientIdentity,
        class: EndpointClass,
        outcome: RequestOutcome,
    ) {
        self.report_outcome_at(identity, class, outcome, Utc::now())
            .await;
    }

    /// `check` against a provided instant; admission is a pure function of
    /// the counter state and `now`.
    pub async fn check_at(
        &self,
        identity: &ClientIdentity,
        class: EndpointClass,
        now: DateTime<Utc>,
    ) -> AdmissionDecision {
        let policy = class.policy();
        let window = CountingWindow::at(now, &policy);
        let key = window.key(identity, class);

        let count = if policy.defers_counting() {
            self.store.peek(&key).await
        } else {
            self.store.increment(&key, window.remaining).await
        };

        match count {
            Ok(count) => {
                // Deferred classes have not counted this request yet, so the
                // boundary is inclusive; counted classes compare post-increment.
                let over = if policy.defers_counting() {
                    count >= policy.limit
                } else {
                    count > policy.limit
                };
                if over {
                    self.deny(identity, class, window.retry_after_seconds())
                } else {
                    AdmissionDecision::Permit
                }
            }
            Err(err) => {
                error!(
                    endpoint_class = class.as_str(),
                    "admission counter store unavailable: {err}"
                );
                match policy.on_store_failure {
                    FailurePolicy::Open => AdmissionDecision::Permit,
                    FailurePolicy::Closed => {
                        self.deny(identity, class, window.retry_after_seconds())
                    }
                }
            }
        }
    }

    pub async fn report_outcome_at(
        &self,
        identity: &ClientIdentity,
        class: EndpointClass,
        outcome: RequestOutcome,
        now: DateTime<Utc>,
    ) {
        let policy = class.policy();
        if !policy.defers_counting() {
            return;
        }
        let qualifies = match outcome {
            RequestOutcome::Success => !policy.skip_successful,
            RequestOutcome::Failure => !policy.skip_failed,
        };
        if !qualifies {
            return;
        }
        let window = CountingWindow::at(now, &policy);
        let key = window.key(identity, class);
        if let Err(err) = self.store.increment(&key, window.remaining).await {
            error!(
                endpoint_class = class.as_str(),
                "failed to record request outcome: {err}"
            );
        }
    }

    fn deny(
        &self,
        identity: &ClientIdentity,
        class: EndpointClass,
        retry_after_seconds: u64,
    ) -> AdmissionDecision {
        self.audit.record(
            AuditEvent::new(AuditKind::RateLimitExceeded)
                .with_identity(identity.key())
                .with_endpoint_class(class.as_str()),
        );
        AdmissionDecision::Deny {
            retry_after_seconds,
        }
    }
}

/// One fixed counting window, aligned to multiples of the window length.
struct CountingWindow {
    start_unix: i64,
    /// Time left until the window rolls over.
    remaining: Duration,
}

impl CountingWindow {
    fn at(now: DateTime<Utc>, policy: &LimitPolicy) -> Self {
        let window_secs = policy.window.as_secs().max(1);
        let now_unix = now.timestamp();
        let span = i64::try_from(window_secs).unwrap_or(i64::MAX);
        let start_unix = now_unix.div_euclid(span) * span;
        let remaining_secs = u64::try_from(start_unix + span - now_unix).unwrap_or(window_secs);
        Self {
            start_unix,
            remaining: Duration::from_secs(remaining_secs),
        }
    }

    fn key(&self, identity: &ClientIdentity, class: EndpointClass) -> String {
        format!("{}:{}:{}", class.as_str(), identity, self.start_unix)
    }

    fn retry_after_seconds(&self) -> u64 {
        self.remaining.as_secs()
    }
}
