//! Session issuance over the credential lifecycle and bearer signer.

pub mod bearer;
pub mod issuer;

pub use bearer::{BearerClaims, BearerSigner};
pub use issuer::{EndSessionScope, SessionError, SessionIssuer, SessionTokens};
