//! Routing of cluster calls through direct clients or agent tunnels.

mod cluster_router;
mod correlator;

pub use cluster_router::{ClusterRouter, DirectEndpoint, Route};
pub use correlator::{CallError, RequestCorrelator, call_connection};
