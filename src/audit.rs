//! Security audit sink and structured event types.
//!
//! Every denial and credential lifecycle transition that matters for abuse
//! detection flows through one `AuditSink`. The default sink logs structured
//! `tracing` events; deployments that ship events to a SIEM implement the
//! trait and fan out from there.

use serde_json::Value;
use tracing::{error, info, warn};
use uuid::Uuid;

/// What happened, from a security point of view.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AuditKind {
    RateLimitExceeded,
    CredentialIssued,
    CredentialRotated,
    CredentialReuse,
    FamilyRevoked,
    SweepCompleted,
}

impl AuditKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::RateLimitExceeded => "rate_limit_exceeded",
            Self::CredentialIssued => "credential_issued",
            Self::CredentialRotated => "credential_rotated",
            Self::CredentialReuse => "credential_reuse",
            Self::FamilyRevoked => "family_revoked",
            Self::SweepCompleted => "sweep_completed",
        }
    }
}

/// A single structured audit event.
#[derive(Clone, Debug)]
pub struct AuditEvent {
    pub kind: AuditKind,
    /// Rate-limit identity key (`user:<id>` or `ip:<addr>`), when known.
    pub identity: Option<String>,
    pub principal_id: Option<Uuid>,
    pub endpoint_class: Option<&'static str>,
    pub metadata: Value,
}

impl AuditEvent {
    #[must_use]
    pub fn new(kind: AuditKind) -> Self {
        Self {
            kind,
            identity: None,
            principal_id: None,
            endpoint_class: None,
            metadata: Value::Null,
        }
    }

    #[must_use]
    pub fn with_identity(mut self, identity: String) -> Self {
        self.identity = Some(identity);
        self
    }

    #[must_use]
    pub fn with_principal(mut self, principal_id: Uuid) -> Self {
        self.principal_id = Some(principal_id);
        self
    }

    #[must_use]
    pub fn with_endpoint_class(mut self, class: &'static str) -> Self {
        self.endpoint_class = Some(class);
        self
    }

    #[must_use]
    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = metadata;
        self
    }
}

/// Audit event consumer.
pub trait AuditSink: Send + Sync {
    fn record(&self, event: AuditEvent);
}

/// Default sink: structured `tracing` output, severity by event kind.
#[derive(Clone, Debug)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn record(&self, event: AuditEvent) {
        let identity = event.identity.as_deref().unwrap_or("-");
        let principal = event
            .principal_id
            .map_or_else(|| "-".to_string(), |id| id.to_string());
        let class = event.endpoint_class.unwrap_or("-");
        match event.kind {
            // Reuse of a consumed credential is the theft signal; keep it loud.
            AuditKind::CredentialReuse => error!(
                kind = event.kind.as_str(),
                identity,
                principal_id = %principal,
                metadata = %event.metadata,
                "security audit"
            ),
            AuditKind::RateLimitExceeded => warn!(
                kind = event.kind.as_str(),
                identity,
                endpoint_class = class,
                metadata = %event.metadata,
                "security audit"
            ),
            _ => info!(
                kind = event.kind.as_str(),
                identity,
                principal_id = %principal,
                endpoint_class = class,
                metadata = %event.metadata,
                "security audit"
            ),
        }
    }
}

/// Captures events in memory for inspection; used by tests and local tooling.
#[derive(Debug, Default)]
pub struct RecordingAuditSink {
    events: std::sync::Mutex<Vec<AuditEvent>>,
}

impl RecordingAuditSink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything recorded so far.
    #[must_use]
    pub fn events(&self) -> Vec<AuditEvent> {
        self.events.lock().map(|events| events.clone()).unwrap_or_default()
    }

    /// Count of recorded events of one kind.
    #[must_use]
    pub fn count(&self, kind: AuditKind) -> usize {
        self.events()
            .iter()
            .filter(|event| event.kind == kind)
            .count()
    }
}

impl AuditSink for RecordingAuditSink {
    fn record(&self, event: AuditEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{AuditEvent, AuditKind, AuditSink, RecordingAuditSink};
    use serde_json::json;
    use uuid::Uuid;

    #[test]
    fn kind_names_are_stable() {
        assert_eq!(AuditKind::CredentialReuse.as_str(), "credential_reuse");
        assert_eq!(AuditKind::RateLimitExceeded.as_str(), "rate_limit_exceeded");
    }

    #[test]
    fn builder_sets_fields() {
        let principal = Uuid::new_v4();
        let event = AuditEvent::new(AuditKind::FamilyRevoked)
            .with_principal(principal)
            .with_identity("ip:10.0.0.1".to_string())
            .with_metadata(json!({"revoked": 3}));
        assert_eq!(event.principal_id, Some(principal));
        assert_eq!(event.identity.as_deref(), Some("ip:10.0.0.1"));
        assert_eq!(event.metadata["revoked"], 3);
    }

    #[test]
    fn recording_sink_counts_by_kind() {
        let sink = RecordingAuditSink::new();
        sink.record(AuditEvent::new(AuditKind::CredentialIssued));
        sink.record(AuditEvent::new(AuditKind::CredentialReuse));
        sink.record(AuditEvent::new(AuditKind::CredentialReuse));
        assert_eq!(sink.count(AuditKind::CredentialReuse), 2);
        assert_eq!(sink.events().len(), 3);
    }
}
