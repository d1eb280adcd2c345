//! Background cleanup of long-dead credential rows.
//!
//! Rotation and logout only mark rows revoked; physical deletion happens
//! here, on a fixed cadence, well away from the request hot path. The
//! sweeper holds no locks that foreground rotation or consumption wait on.

use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::error;

use crate::audit::{AuditEvent, AuditKind, AuditSink};

use super::store::CredentialStore;

#[derive(Clone, Copy, Debug)]
pub struct SweeperConfig {
    interval: Duration,
    revoked_retention: Duration,
}

impl SweeperConfig {
    /// Default sweeper: hourly passes, revoked rows kept for 7 days so
    /// reuse investigations still have the evidence.
    #[must_use]
    pub fn new() -> Self {
        Self {
            interval: Duration::from_secs(3600),
            revoked_retention: Duration::from_secs(7 * 24 * 3600),
        }
    }

    #[must_use]
    pub fn with_interval_seconds(mut self, seconds: u64) -> Self {
        self.interval = Duration::from_secs(seconds);
        self
    }

    #[must_use]
    pub fn with_revoked_retention_seconds(mut self, seconds: u64) -> Self {
        self.revoked_retention = Duration::from_secs(seconds);
        self
    }

    #[must_use]
    pub fn normalize(self) -> Self {
        let interval = if self.interval.is_zero() {
            Duration::from_secs(1)
        } else {
            self.interval
        };
        Self {
            interval,
            revoked_retention: self.revoked_retention,
        }
    }

    #[must_use]
    pub fn interval(&self) -> Duration {
        self.interval
    }

    #[must_use]
    pub fn revoked_retention(&self) -> Duration {
        self.revoked_retention
    }
}

impl Default for SweeperConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Spawn the background task that periodically deletes dead rows.
pub fn spawn_sweeper(
    store: Arc<dyn CredentialStore>,
    audit: Arc<dyn AuditSink>,
    config: SweeperConfig,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let config = config.normalize();
        loop {
            match store
                .sweep(chrono::Utc::now(), config.revoked_retention())
                .await
            {
                Ok(0) => {}
                Ok(deleted) => {
                    audit.record(
                        AuditEvent::new(AuditKind::SweepCompleted)
                            .with_metadata(json!({ "deleted": deleted })),
                    );
                }
                // Keep sweeping; a failed pass just leaves rows for the next one.
                Err(err) => error!("credential sweep failed: {err}"),
            }
            sleep(config.interval()).await;
        }
    })
}
