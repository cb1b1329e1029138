//! Request/response correlation over agent tunnels.

use std::sync::Arc;
use std::time::Duration;

use tonic::Status;
use tracing::{debug, warn};

use kubelink_proto::v1::{ControlMessage, K8sRequest, K8sResponse, Watch, control_message};

use crate::registry::{ConnectionRegistry, TunnelConnection};

/// Issues calls through tunnels and matches responses by correlation id.
#[derive(Clone)]
pub struct RequestCorrelator {
    registry: Arc<ConnectionRegistry>,
}

impl RequestCorrelator {
    pub const fn new(registry: Arc<ConnectionRegistry>) -> Self {
        Self { registry }
    }

    /// Send `request` to `cluster_id` and wait for the matching response.
    ///
    /// `deadline: None` waits until the response arrives or the tunnel closes.
    pub async fn call(
        &self,
        cluster_id: &str,
        request: K8sRequest,
        deadline: Option<Duration>,
    ) -> Result<K8sResponse, CallError> {
        let conn = self
            .registry
            .get(cluster_id)
            .await
            .ok_or_else(|| CallError::NotConnected(cluster_id.to_string()))?;

        call_connection(&conn, request, deadline).await
    }

    /// Ask the agent to start streaming watch events. Returns the watch id.
    pub async fn watch(
        &self,
        cluster_id: &str,
        resource: &str,
        namespace: &str,
    ) -> Result<String, CallError> {
        let conn = self
            .registry
            .get(cluster_id)
            .await
            .ok_or_else(|| CallError::NotConnected(cluster_id.to_string()))?;

        let watch_id = uuid::Uuid::new_v4().to_string();
        let frame = ControlMessage {
            payload: Some(control_message::Payload::Watch(Watch {
                watch_id: watch_id.clone(),
                resource: resource.to_string(),
                namespace: namespace.to_string(),
            })),
        };
        conn.send_frame(frame)
            .await
            .map_err(|_| CallError::SendFailed(cluster_id.to_string()))?;

        debug!(cluster_id, watch_id = %watch_id, resource, "Watch requested");
        Ok(watch_id)
    }

    pub const fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }
}

/// Issue a call on a specific connection.
///
/// A connection that has been superseded or torn down fails with
/// `NotConnected` instead of sending.
pub async fn call_connection(
    conn: &Arc<TunnelConnection>,
    mut request: K8sRequest,
    deadline: Option<Duration>,
) -> Result<K8sResponse, CallError> {
    if conn.is_cancelled() {
        return Err(CallError::NotConnected(conn.cluster_id.clone()));
    }

    if request.request_id.is_empty() {
        request.request_id = uuid::Uuid::new_v4().to_string();
    }
    let request_id = request.request_id.clone();

    // Removed from the pending table when dropped, on every exit path.
    let (_slot, response_rx) = conn
        .register_pending(request_id.clone())
        .ok_or_else(|| CallError::DuplicateRequestId(request_id.clone()))?;

    debug!(
        cluster_id = %conn.cluster_id,
        request_id = %request_id,
        verb = %request.verb,
        resource = %request.resource,
        "Forwarding request through tunnel"
    );

    let frame = ControlMessage {
        payload: Some(control_message::Payload::K8sRequest(request)),
    };
    if conn.send_frame(frame).await.is_err() {
        warn!(cluster_id = %conn.cluster_id, request_id = %request_id, "Tunnel send failed");
        return Err(CallError::SendFailed(conn.cluster_id.clone()));
    }

    let wait = async {
        tokio::select! {
            biased;
            response = response_rx => {
                response.map_err(|_| CallError::NotConnected(conn.cluster_id.clone()))
            }
            () = conn.cancelled() => Err(CallError::NotConnected(conn.cluster_id.clone())),
        }
    };

    match deadline {
        None => wait.await,
        Some(deadline) => {
            if let Ok(result) = tokio::time::timeout(deadline, wait).await {
                result
            } else {
                warn!(
                    cluster_id = %conn.cluster_id,
                    request_id = %request_id,
                    "Request timed out"
                );
                Err(CallError::Timeout(request_id))
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CallError {
    #[error("Cluster not connected: {0}")]
    NotConnected(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Failed to send through tunnel: {0}")]
    SendFailed(String),

    #[error("Request id already in flight: {0}")]
    DuplicateRequestId(String),
}

impl From<CallError> for Status {
    fn from(err: CallError) -> Self {
        match err {
            CallError::NotConnected(_) | CallError::SendFailed(_) => {
                Self::unavailable(err.to_string())
            }
            CallError::Timeout(_) => Self::deadline_exceeded(err.to_string()),
            CallError::DuplicateRequestId(_) => Self::already_exists(err.to_string()),
        }
    }
}
