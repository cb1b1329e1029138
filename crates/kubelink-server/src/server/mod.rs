//! gRPC server implementations for the kubelink control plane.

pub mod cluster_svc;
pub mod interceptor;
pub mod registration_svc;
pub mod token_svc;
pub mod tunnel_svc;

#[cfg(test)]
mod cluster_svc_tests;
#[cfg(test)]
pub(crate) mod test_helpers;
#[cfg(test)]
mod token_svc_tests;

pub use cluster_svc::ClusterServiceImpl;
pub use interceptor::{admin_interceptor, agent_interceptor};
pub use registration_svc::{RegistrationServiceImpl, registration_error_to_status};
pub use token_svc::AgentTokenServiceImpl;
pub use tunnel_svc::TunnelServiceImpl;

/// Unix seconds as a protobuf timestamp.
pub(crate) const fn timestamp(seconds: i64) -> prost_types::Timestamp {
    prost_types::Timestamp { seconds, nanos: 0 }
}
