//! # Custode (Session Security & Admission Control Core)
//!
//! `custode` answers one question for every inbound request: is this caller
//! allowed to act right now, and if not, why? It is the security core behind
//! an account surface, composed of three cooperating components plus a thin
//! issuer that ties them together.
//!
//! ## Refresh-Credential Lifecycle
//!
//! Refresh secrets rotate on every use. Each login starts a credential
//! *family*; rotation atomically revokes the old row and inserts its
//! successor, so a family has at most one live credential at any instant.
//! Presenting an already-rotated secret is treated as credential theft: the
//! whole family is revoked and a high-severity audit event is raised.
//!
//! - **Hash-only storage:** raw secrets never touch the database; rows hold
//!   a SHA-256 hash with a uniqueness constraint.
//! - **Short-lived bearers:** access is asserted by a signed bearer token
//!   snapshotting plan claims, re-minted on every rotation.
//!
//! ## Admission Control
//!
//! Fixed-window counters keyed by `(identity, endpoint class, window)`.
//! Identity comes from the authenticated subject, or from a proxy-validated
//! client address: forwarding headers are believed only when the direct
//! peer is in the configured trusted-proxy set. Counter-store outages
//! resolve per class: auth-sensitive classes fail closed, general traffic
//! fails open.
//!
//! ## Quota Ledger
//!
//! Generation consumption checks-and-increments in a single atomic store
//! operation against trial or monthly caps. Trial caps depend on email
//! verification; monthly resets fold into the same consume. Denials carry
//! machine-readable reasons so callers can render the right next action.

pub mod admission;
pub mod audit;
pub mod credential;
pub mod error;
pub mod identity;
pub mod quota;
pub mod session;
