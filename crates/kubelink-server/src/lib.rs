//! kubelink control plane library
//!
//! Core functionality for the agent tunnel control plane:
//! - Registration tokens redeemed for cluster-bound agent credentials
//! - Tunnel lifecycle for agents dialing out from private clusters
//! - Connection registry, request correlation and cluster routing
//! - SQLite storage for tokens and clusters
//! - gRPC services (Registration, Tunnel, AgentToken, Cluster)

pub mod auth;
pub mod config;
pub mod events;
pub mod registry;
pub mod router;
pub mod server;
pub mod storage;
pub mod tls;
pub mod tunnel;
