//! Usage-quota bookkeeping against trial and plan caps.

pub mod ledger;
pub mod models;
pub mod repo;
pub mod store;

pub use ledger::QuotaLedger;
pub use models::{
    Plan, Platform, PlatformAccess, QuotaDecision, QuotaDenial, QuotaPolicy, QuotaSnapshot,
};
pub use repo::PgPrincipalStore;
pub use store::{MemoryPrincipalStore, PrincipalStore};
