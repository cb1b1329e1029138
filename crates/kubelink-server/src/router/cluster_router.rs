//! Chooses how to reach a cluster: a direct API client or an agent tunnel.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tracing::{debug, info};

use kubelink_proto::v1::{K8sRequest, K8sResponse};

use super::correlator::{CallError, RequestCorrelator};

/// Route to a cluster, resolved at call time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route<C> {
    /// A directly reachable API server.
    Direct(C),
    /// A live agent tunnel.
    Tunnel,
    NotFound,
}

/// A cluster reached through its kubeconfig rather than a tunnel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectEndpoint {
    pub cluster_id: String,
    pub name: String,
}

/// Routes cluster calls to a direct client when one is held, otherwise to
/// the cluster's tunnel.
#[derive(Clone)]
pub struct ClusterRouter<C> {
    direct: Arc<RwLock<HashMap<String, C>>>,
    correlator: RequestCorrelator,
}

impl<C: Clone + Send + Sync> ClusterRouter<C> {
    pub fn new(correlator: RequestCorrelator) -> Self {
        Self {
            direct: Arc::new(RwLock::new(HashMap::new())),
            correlator,
        }
    }

    /// Register a direct client for `cluster_id`, returning any previous one.
    pub async fn add_direct_client(&self, cluster_id: impl Into<String>, client: C) -> Option<C> {
        let cluster_id = cluster_id.into();
        info!(cluster_id = %cluster_id, "Direct cluster client added");
        self.direct.write().await.insert(cluster_id, client)
    }

    pub async fn remove_direct_client(&self, cluster_id: &str) -> Option<C> {
        let removed = self.direct.write().await.remove(cluster_id);
        if removed.is_some() {
            info!(cluster_id, "Direct cluster client removed");
        }
        removed
    }

    /// Resolve the route for `cluster_id`: direct, then tunnel, then not found.
    pub async fn get_route(&self, cluster_id: &str) -> Route<C> {
        if let Some(client) = self.direct.read().await.get(cluster_id) {
            return Route::Direct(client.clone());
        }
        if self.correlator.registry().is_connected(cluster_id).await {
            return Route::Tunnel;
        }
        debug!(cluster_id, "No route to cluster");
        Route::NotFound
    }

    /// True while the cluster has a live tunnel, i.e. when [`Self::call`]
    /// can reach it. A direct client alone does not count.
    pub async fn is_connected(&self, cluster_id: &str) -> bool {
        self.correlator.registry().is_connected(cluster_id).await
    }

    /// True when the cluster is reachable by either route.
    pub async fn is_reachable(&self, cluster_id: &str) -> bool {
        !matches!(self.get_route(cluster_id).await, Route::NotFound)
    }

    /// Call through the cluster's tunnel.
    pub async fn call(
        &self,
        cluster_id: &str,
        request: K8sRequest,
        deadline: Option<Duration>,
    ) -> Result<K8sResponse, CallError> {
        self.correlator.call(cluster_id, request, deadline).await
    }

    /// Start a watch through the cluster's tunnel.
    pub async fn watch(
        &self,
        cluster_id: &str,
        resource: &str,
        namespace: &str,
    ) -> Result<String, CallError> {
        self.correlator.watch(cluster_id, resource, namespace).await
    }

    pub const fn correlator(&self) -> &RequestCorrelator {
        &self.correlator
    }
}
