//! Refresh-credential lifecycle: issuance, rotation, revocation, reuse
//! detection, and background cleanup.

pub mod models;
pub mod repo;
pub mod service;
pub mod store;
pub mod sweep;

pub use models::{NewCredential, RefreshCredential, RequestContext, RevokedReason};
pub use repo::PgCredentialStore;
pub use service::{CredentialError, CredentialService, IssuedCredential};
pub use store::{CredentialStore, MemoryCredentialStore, RotateOutcome};
pub use sweep::{SweeperConfig, spawn_sweeper};
