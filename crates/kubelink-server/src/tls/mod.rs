//! TLS configuration for the control plane listener.

pub mod config;

pub use config::{PemKind, TlsConfigError, TlsMode};
