//! Request admission control: fixed-window rate limiting per identity and
//! endpoint class.

pub mod controller;
pub mod counter;
pub mod policy;

pub use controller::{AdmissionController, AdmissionDecision, RequestOutcome};
pub use counter::{CounterStore, MemoryCounterStore};
pub use policy::{EndpointClass, FailurePolicy, LimitPolicy, bypasses_admission};
