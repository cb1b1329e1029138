//! ClusterService gRPC implementation.

use std::time::Duration;

use tonic::{Request, Response, Status};
use tracing::{debug, instrument, warn};

use kubelink_proto::v1::cluster_service_server::ClusterService;
use kubelink_proto::v1::{
    ClusterStatus as ProtoClusterStatus, ClusterSummary, ConnectionType, ExecuteRequest,
    ExecuteResponse, GetClusterRequest, GetClusterResponse, ListClustersRequest,
    ListClustersResponse, StartWatchRequest, StartWatchResponse,
};

use super::timestamp;
use crate::router::{ClusterRouter, DirectEndpoint, Route};
use crate::storage::{Cluster, ClusterConnectionType, ClusterStatus, DatabaseError, ServerDatabase};

pub struct ClusterServiceImpl {
    db: ServerDatabase,
    router: ClusterRouter<DirectEndpoint>,
}

impl ClusterServiceImpl {
    pub const fn new(db: ServerDatabase, router: ClusterRouter<DirectEndpoint>) -> Self {
        Self { db, router }
    }

    async fn summary(&self, cluster: &Cluster) -> ClusterSummary {
        let reachable = self.router.is_reachable(&cluster.id).await;
        cluster_to_proto(cluster, reachable)
    }

    /// Resolve a tunnel route or explain why there is none.
    #[allow(clippy::result_large_err)]
    async fn require_tunnel(&self, cluster_id: &str) -> Result<(), Status> {
        if cluster_id.is_empty() {
            return Err(Status::invalid_argument("Cluster id is required"));
        }
        match self.router.get_route(cluster_id).await {
            Route::Tunnel => Ok(()),
            Route::Direct(endpoint) => Err(Status::failed_precondition(format!(
                "Cluster {} is reached through its kubeconfig, not a tunnel",
                endpoint.name
            ))),
            Route::NotFound => match self.db.get_cluster(cluster_id).await {
                Ok(_) => Err(Status::unavailable("Cluster not connected")),
                Err(e) => Err(db_error_to_status(e)),
            },
        }
    }
}

fn db_error_to_status(err: DatabaseError) -> Status {
    match err {
        DatabaseError::NotFound(_) => Status::not_found("Cluster not found"),
        other => {
            warn!(error = %other, "Cluster lookup failed");
            Status::internal("Internal error")
        }
    }
}

fn cluster_to_proto(c: &Cluster, reachable: bool) -> ClusterSummary {
    let connection_type = match c.connection_type() {
        ClusterConnectionType::Kubeconfig => ConnectionType::Kubeconfig,
        ClusterConnectionType::Agent => ConnectionType::Agent,
    };
    let status = match c.status() {
        ClusterStatus::Connected => ProtoClusterStatus::Connected,
        ClusterStatus::Disconnected => ProtoClusterStatus::Disconnected,
    };
    ClusterSummary {
        cluster_id: c.id.clone(),
        name: c.name.clone(),
        connection_type: connection_type as i32,
        status: status as i32,
        reachable,
        k8s_version: c.k8s_version.clone().unwrap_or_default(),
        node_count: c
            .node_count
            .and_then(|n| u32::try_from(n).ok())
            .unwrap_or_default(),
        last_seen: c.last_seen.map(timestamp),
    }
}

#[tonic::async_trait]
impl ClusterService for ClusterServiceImpl {
    #[instrument(skip(self, _request), fields(rpc = "ListClusters"))]
    async fn list_clusters(
        &self,
        _request: Request<ListClustersRequest>,
    ) -> Result<Response<ListClustersResponse>, Status> {
        let rows = self
            .db
            .list_clusters()
            .await
            .map_err(|e| Status::internal(format!("Failed to list clusters: {e}")))?;

        let mut clusters = Vec::with_capacity(rows.len());
        for row in &rows {
            clusters.push(self.summary(row).await);
        }

        Ok(Response::new(ListClustersResponse { clusters }))
    }

    #[instrument(skip(self, request), fields(rpc = "GetCluster"))]
    async fn get_cluster(
        &self,
        request: Request<GetClusterRequest>,
    ) -> Result<Response<GetClusterResponse>, Status> {
        let req = request.into_inner();
        let cluster = self
            .db
            .get_cluster(&req.cluster_id)
            .await
            .map_err(db_error_to_status)?;

        Ok(Response::new(GetClusterResponse {
            cluster: Some(self.summary(&cluster).await),
        }))
    }

    #[instrument(skip(self, request), fields(rpc = "Execute"))]
    async fn execute(
        &self,
        request: Request<ExecuteRequest>,
    ) -> Result<Response<ExecuteResponse>, Status> {
        let req = request.into_inner();
        let k8s_request = req
            .request
            .ok_or_else(|| Status::invalid_argument("Request is required"))?;
        self.require_tunnel(&req.cluster_id).await?;

        let deadline = (req.timeout_ms > 0).then(|| Duration::from_millis(req.timeout_ms));
        debug!(
            cluster_id = %req.cluster_id,
            verb = %k8s_request.verb,
            resource = %k8s_request.resource,
            ?deadline,
            "Executing through tunnel"
        );

        let response = self
            .router
            .call(&req.cluster_id, k8s_request, deadline)
            .await?;

        Ok(Response::new(ExecuteResponse {
            response: Some(response),
        }))
    }

    #[instrument(skip(self, request), fields(rpc = "StartWatch"))]
    async fn start_watch(
        &self,
        request: Request<StartWatchRequest>,
    ) -> Result<Response<StartWatchResponse>, Status> {
        let req = request.into_inner();
        if req.resource.is_empty() {
            return Err(Status::invalid_argument("Resource is required"));
        }
        self.require_tunnel(&req.cluster_id).await?;

        let watch_id = self
            .router
            .watch(&req.cluster_id, &req.resource, &req.namespace)
            .await?;

        Ok(Response::new(StartWatchResponse { watch_id }))
    }
}
