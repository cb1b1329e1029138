//! Live tunnel connection and its pending-request table.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};
use tracing::{debug, warn};

use kubelink_core::db::unix_timestamp;
use kubelink_proto::v1::{ClusterInfo, ControlMessage, K8sResponse};

use crate::tunnel::TunnelState;

/// The live tunnel for one cluster.
pub struct TunnelConnection {
    /// Cluster this connection serves.
    pub cluster_id: String,
    /// Agent that authenticated the stream.
    pub agent_id: String,
    /// Unique per physical stream, for logs.
    pub connection_id: String,
    /// Unix timestamp of authentication.
    pub connected_at: i64,
    /// Outbound frames; the forwarder task drains this into the gRPC stream.
    frame_tx: mpsc::Sender<ControlMessage>,
    /// Pending response slots keyed by correlation id.
    pending: Mutex<HashMap<String, oneshot::Sender<K8sResponse>>>,
    cancel: CancellationToken,
    state: Mutex<TunnelState>,
    cluster_info: Mutex<Option<ClusterInfo>>,
}

impl TunnelConnection {
    /// Build a connection for a freshly authenticated stream.
    pub fn new(cluster_id: String, agent_id: String, frame_tx: mpsc::Sender<ControlMessage>) -> Self {
        Self {
            cluster_id,
            agent_id,
            connection_id: uuid::Uuid::new_v4().to_string(),
            connected_at: unix_timestamp(),
            frame_tx,
            pending: Mutex::new(HashMap::new()),
            cancel: CancellationToken::new(),
            state: Mutex::new(TunnelState::Authenticated),
            cluster_info: Mutex::new(None),
        }
    }

    /// Send a frame to the agent.
    ///
    /// Concurrent callers are serialized by the channel. Fails once the
    /// connection is cancelled or the outbound side is gone.
    pub async fn send_frame(&self, frame: ControlMessage) -> Result<(), ConnectionClosed> {
        if self.cancel.is_cancelled() {
            return Err(ConnectionClosed);
        }
        tokio::select! {
            biased;
            () = self.cancel.cancelled() => Err(ConnectionClosed),
            sent = self.frame_tx.send(frame) => sent.map_err(|_| ConnectionClosed),
        }
    }

    /// Register a pending slot for `request_id`.
    ///
    /// Returns `None` if the id is already in flight on this connection.
    pub fn register_pending(
        self: &Arc<Self>,
        request_id: String,
    ) -> Option<(PendingSlot, oneshot::Receiver<K8sResponse>)> {
        let (tx, rx) = oneshot::channel();
        {
            let mut pending = self.lock_pending();
            if pending.contains_key(&request_id) {
                return None;
            }
            pending.insert(request_id.clone(), tx);
        }
        let slot = PendingSlot {
            conn: Arc::clone(self),
            request_id,
        };
        Some((slot, rx))
    }

    /// Deliver a response to its waiting slot.
    ///
    /// Never blocks: the slot is removed under the lock and the one-shot send
    /// happens outside it. Returns `false` when nobody is waiting any more.
    pub fn complete_pending(&self, request_id: &str, response: K8sResponse) -> bool {
        let Some(tx) = self.lock_pending().remove(request_id) else {
            return false;
        };
        tx.send(response).is_ok()
    }

    /// Remove a slot without delivering anything.
    pub fn remove_pending(&self, request_id: &str) -> bool {
        self.lock_pending().remove(request_id).is_some()
    }

    pub fn has_pending(&self, request_id: &str) -> bool {
        self.lock_pending().contains_key(request_id)
    }

    pub fn pending_count(&self) -> usize {
        self.lock_pending().len()
    }

    /// Drop every slot; waiters observe a closed channel.
    pub fn fail_all_pending(&self) -> usize {
        let drained: Vec<_> = self.lock_pending().drain().collect();
        if !drained.is_empty() {
            debug!(
                cluster_id = %self.cluster_id,
                count = drained.len(),
                "Dropped pending requests on teardown"
            );
        }
        drained.len()
    }

    /// Cancel the connection. Idempotent.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Resolves once the connection is cancelled.
    pub fn cancelled(&self) -> WaitForCancellationFuture<'_> {
        self.cancel.cancelled()
    }

    pub fn state(&self) -> TunnelState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Move to `next` if the lifecycle allows it. Returns whether it moved.
    pub fn transition(&self, next: TunnelState) -> bool {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if state.can_transition_to(next) {
            debug!(
                cluster_id = %self.cluster_id,
                connection_id = %self.connection_id,
                from = %*state,
                to = %next,
                "Tunnel state transition"
            );
            *state = next;
            true
        } else {
            if *state != next {
                warn!(
                    cluster_id = %self.cluster_id,
                    from = %*state,
                    to = %next,
                    "Rejected tunnel state transition"
                );
            }
            false
        }
    }

    /// Latest cluster info reported by the agent.
    pub fn cluster_info(&self) -> Option<ClusterInfo> {
        self.cluster_info
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn set_cluster_info(&self, info: ClusterInfo) {
        *self
            .cluster_info
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(info);
    }

    fn lock_pending(&self) -> MutexGuard<'_, HashMap<String, oneshot::Sender<K8sResponse>>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// The outbound side of a connection is gone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("tunnel connection closed")]
pub struct ConnectionClosed;

/// Guard for a registered pending request.
///
/// Dropping the slot removes its table entry, so every exit path of a call
/// (response, timeout, send failure, caller cancellation) cleans up.
pub struct PendingSlot {
    conn: Arc<TunnelConnection>,
    request_id: String,
}

impl PendingSlot {
    pub fn request_id(&self) -> &str {
        &self.request_id
    }
}

impl Drop for PendingSlot {
    fn drop(&mut self) {
        self.conn.remove_pending(&self.request_id);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn test_connection() -> (Arc<TunnelConnection>, mpsc::Receiver<ControlMessage>) {
        let (tx, rx) = mpsc::channel(16);
        (
            Arc::new(TunnelConnection::new("c-1".into(), "agent-1".into(), tx)),
            rx,
        )
    }

    fn response(request_id: &str) -> K8sResponse {
        K8sResponse {
            request_id: request_id.into(),
            status: 200,
            result: None,
        }
    }

    #[tokio::test]
    async fn pending_request_lifecycle() {
        let (conn, _rx) = test_connection();

        let (slot, rx) = conn.register_pending("req-1".into()).unwrap();
        assert_eq!(slot.request_id(), "req-1");
        assert!(conn.has_pending("req-1"));

        assert!(conn.complete_pending("req-1", response("req-1")));
        assert_eq!(conn.pending_count(), 0);

        let received = rx.await.unwrap();
        assert_eq!(received.request_id, "req-1");
    }

    #[test]
    fn complete_unknown_pending_returns_false() {
        let (conn, _rx) = test_connection();
        assert!(!conn.complete_pending("nonexistent", response("nonexistent")));
    }

    #[test]
    fn duplicate_request_id_rejected() {
        let (conn, _rx) = test_connection();
        let _slot = conn.register_pending("req-1".into()).unwrap();
        assert!(conn.register_pending("req-1".into()).is_none());
        assert_eq!(conn.pending_count(), 1);
    }

    #[test]
    fn dropping_slot_removes_entry() {
        let (conn, _rx) = test_connection();
        let (slot, _rx) = conn.register_pending("req-1".into()).unwrap();
        assert_eq!(conn.pending_count(), 1);
        drop(slot);
        assert_eq!(conn.pending_count(), 0);
    }

    #[test]
    fn late_response_after_abandon_is_dropped() {
        let (conn, _rx) = test_connection();
        let (slot, rx) = conn.register_pending("req-1".into()).unwrap();
        drop(rx);

        // Entry still present, but the receiver is gone: delivery reports failure.
        assert!(!conn.complete_pending("req-1", response("req-1")));
        assert_eq!(conn.pending_count(), 0);
        drop(slot);
        assert_eq!(conn.pending_count(), 0);
    }

    #[tokio::test]
    async fn fail_all_pending_wakes_waiters() {
        let (conn, _rx) = test_connection();
        let (_slot, rx) = conn.register_pending("req-1".into()).unwrap();

        assert_eq!(conn.fail_all_pending(), 1);
        assert!(rx.await.is_err());
    }

    #[tokio::test]
    async fn send_frame_after_cancel_fails() {
        let (conn, mut rx) = test_connection();
        conn.send_frame(ControlMessage::default()).await.unwrap();
        assert!(rx.recv().await.is_some());

        conn.cancel();
        assert!(conn.is_cancelled());
        assert_eq!(
            conn.send_frame(ControlMessage::default()).await,
            Err(ConnectionClosed)
        );
    }

    #[tokio::test]
    async fn send_frame_to_dropped_receiver_fails() {
        let (conn, rx) = test_connection();
        drop(rx);
        assert_eq!(
            conn.send_frame(ControlMessage::default()).await,
            Err(ConnectionClosed)
        );
    }

    #[test]
    fn state_follows_lifecycle() {
        let (conn, _rx) = test_connection();
        assert_eq!(conn.state(), TunnelState::Authenticated);
        assert!(conn.transition(TunnelState::Active));
        assert!(!conn.transition(TunnelState::Authenticated));
        assert!(conn.transition(TunnelState::Closed));
        assert!(!conn.transition(TunnelState::Closed));
        assert_eq!(conn.state(), TunnelState::Closed);
    }

    #[test]
    fn cluster_info_is_cached() {
        let (conn, _rx) = test_connection();
        assert!(conn.cluster_info().is_none());
        conn.set_cluster_info(ClusterInfo {
            k8s_version: "v1.30.0".into(),
            node_count: 3,
            ..Default::default()
        });
        assert_eq!(conn.cluster_info().unwrap().node_count, 3);
    }
}
