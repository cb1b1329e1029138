//! Authentication for the kubelink control plane.
//!
//! Provides agent credential signing/validation and registration token
//! issuance and redemption.

pub mod claims;
pub mod credential;
pub mod registration;

pub use claims::AgentClaims;
pub use credential::{CredentialError, CredentialManager};
pub use registration::{CredentialIssuer, IssuedToken, Redemption, RegistrationError};
