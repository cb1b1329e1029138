//! Shared test helpers for the service test modules.

use std::sync::Arc;

use tokio::sync::mpsc;

use kubelink_proto::v1::{ControlMessage, K8sResponse, control_message, k8s_response};

use crate::auth::credential::DEFAULT_CREDENTIAL_TTL_SECS;
use crate::auth::registration::DEFAULT_REGISTRATION_TOKEN_TTL_SECS;
use crate::auth::{CredentialIssuer, CredentialManager};
use crate::registry::{ConnectionRegistry, TunnelConnection};
use crate::router::{ClusterRouter, DirectEndpoint, RequestCorrelator};
use crate::storage::{ClusterConnectionType, NewCluster, ServerDatabase};

pub async fn test_db() -> ServerDatabase {
    ServerDatabase::open_in_memory().await.unwrap()
}

pub fn test_credentials() -> Arc<CredentialManager> {
    Arc::new(CredentialManager::new(
        b"test-secret",
        DEFAULT_CREDENTIAL_TTL_SECS,
    ))
}

pub fn test_issuer(db: &ServerDatabase) -> CredentialIssuer {
    CredentialIssuer::new(
        db.clone(),
        test_credentials(),
        DEFAULT_REGISTRATION_TOKEN_TTL_SECS,
    )
}

/// Insert a cluster row of the given type.
pub async fn seed_cluster(db: &ServerDatabase, id: &str, connection_type: ClusterConnectionType) {
    let agent_id = format!("agent-{id}");
    db.create_cluster(&NewCluster {
        id,
        name: &format!("{id}-name"),
        connection_type,
        permission_preset: "read-only",
        agent_id: (connection_type == ClusterConnectionType::Agent).then_some(agent_id.as_str()),
        created_by: "admin",
    })
    .await
    .unwrap();
}

pub fn test_router() -> ClusterRouter<DirectEndpoint> {
    ClusterRouter::new(RequestCorrelator::new(Arc::new(ConnectionRegistry::new())))
}

/// Register a live tunnel for `cluster_id`, returning the agent side of it.
pub async fn connect_agent(
    router: &ClusterRouter<DirectEndpoint>,
    cluster_id: &str,
) -> (Arc<TunnelConnection>, mpsc::Receiver<ControlMessage>) {
    let (tx, rx) = mpsc::channel(16);
    let conn = Arc::new(TunnelConnection::new(
        cluster_id.into(),
        format!("agent-{cluster_id}"),
        tx,
    ));
    router
        .correlator()
        .registry()
        .register(Arc::clone(&conn))
        .await;
    (conn, rx)
}

/// Spawn a mock agent that answers the first request with `body`.
pub fn spawn_responder(
    conn: Arc<TunnelConnection>,
    mut rx: mpsc::Receiver<ControlMessage>,
    status: i32,
    body: &[u8],
) {
    let body = body.to_vec();
    tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            if let Some(control_message::Payload::K8sRequest(request)) = frame.payload {
                conn.complete_pending(
                    &request.request_id,
                    K8sResponse {
                        request_id: request.request_id.clone(),
                        status,
                        result: Some(k8s_response::Result::Body(body)),
                    },
                );
                break;
            }
        }
    });
}
