//! kubelink Protocol Buffers
//!
//! Generated protobuf code for the kubelink gRPC API.
//!
//! This crate contains:
//! - `TunnelService` for the agent's long-lived bidirectional stream
//! - `RegistrationService` for redeeming registration tokens
//! - `AgentTokenService` for managing registration tokens
//! - `ClusterService` for connectivity status and tunneled calls

#![allow(clippy::derive_partial_eq_without_eq)]

/// kubelink v1 API definitions.
///
/// All generated types and services are included here.
pub mod v1 {
    tonic::include_proto!("kubelink.v1");
}

// Re-export v1 as the default API version for convenience
pub use v1::*;

// Re-export prost_types so downstream crates build timestamps without a direct dependency
pub use prost_types;
