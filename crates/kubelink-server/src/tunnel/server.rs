//! Drives one authenticated agent stream from activation to teardown.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::{Stream, StreamExt};
use tonic::Status;
use tracing::{debug, info, warn};

use kubelink_proto::v1::{AgentMessage, ClusterInfo, ControlMessage, agent_message};

use super::heartbeat::{DEFAULT_HEARTBEAT_INTERVAL, spawn_heartbeat};
use super::state::TunnelState;
use super::status::{StatusWriter, write_status};
use crate::auth::AgentClaims;
use crate::events::EventPublisher;
use crate::registry::{ConnectionRegistry, TunnelConnection};
use crate::storage::{ClusterStatus, ServerDatabase};

/// Default capacity of each connection's outbound frame queue.
pub const DEFAULT_OUTBOUND_BUFFER: usize = 128;

/// Why a tunnel's read loop stopped.
#[derive(Debug)]
enum CloseReason {
    EndOfStream,
    StreamError(Status),
    Cancelled,
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EndOfStream => f.write_str("agent closed the stream"),
            Self::StreamError(status) => write!(f, "stream error: {}", status.message()),
            Self::Cancelled => f.write_str("cancelled by server"),
        }
    }
}

/// Owns the per-stream lifecycle for agent tunnels.
#[derive(Clone)]
pub struct TunnelServer {
    registry: Arc<ConnectionRegistry>,
    db: ServerDatabase,
    events: Arc<dyn EventPublisher>,
    heartbeat_interval: Duration,
    outbound_buffer: usize,
}

impl TunnelServer {
    pub fn new(
        registry: Arc<ConnectionRegistry>,
        db: ServerDatabase,
        events: Arc<dyn EventPublisher>,
    ) -> Self {
        Self {
            registry,
            db,
            events,
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            outbound_buffer: DEFAULT_OUTBOUND_BUFFER,
        }
    }

    #[must_use]
    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    #[must_use]
    pub fn with_outbound_buffer(mut self, capacity: usize) -> Self {
        self.outbound_buffer = capacity;
        self
    }

    pub const fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    pub const fn outbound_buffer(&self) -> usize {
        self.outbound_buffer
    }

    /// Run an authenticated agent stream until it closes.
    ///
    /// `out_tx` feeds the gRPC response stream. Returns after teardown, once
    /// the heartbeat and forwarder tasks have stopped.
    pub async fn serve<S>(
        &self,
        claims: &AgentClaims,
        inbound: S,
        out_tx: mpsc::Sender<Result<ControlMessage, Status>>,
    ) where
        S: Stream<Item = Result<AgentMessage, Status>> + Unpin + Send,
    {
        let (frame_tx, frame_rx) = mpsc::channel(self.outbound_buffer.max(1));
        let conn = Arc::new(TunnelConnection::new(
            claims.cluster_id.clone(),
            claims.agent_id.clone(),
            frame_tx,
        ));

        let forwarder = spawn_forwarder(Arc::clone(&conn), frame_rx, out_tx.clone());
        self.activate(&conn).await;
        let heartbeat = spawn_heartbeat(Arc::clone(&conn), self.heartbeat_interval);
        let status = StatusWriter::spawn(self.db.clone(), conn.cluster_id.clone());

        let reason = self.read_loop(&conn, &status, inbound).await;
        self.teardown(&conn, status, &reason).await;

        let (heartbeat_result, forwarder_result) = tokio::join!(heartbeat, forwarder);
        if let Err(e) = heartbeat_result.and(forwarder_result) {
            warn!(cluster_id = %conn.cluster_id, error = %e, "Tunnel task failed");
        }

        if matches!(reason, CloseReason::Cancelled)
            && let Err(e) = out_tx.try_send(Err(Status::aborted("Tunnel closed by server")))
        {
            debug!(
                cluster_id = %conn.cluster_id,
                error = %e,
                "Abort status not delivered to agent"
            );
        }
    }

    async fn activate(&self, conn: &Arc<TunnelConnection>) {
        if let Some(previous) = self.registry.register(Arc::clone(conn)).await {
            debug!(
                cluster_id = %conn.cluster_id,
                superseded_connection_id = %previous.connection_id,
                "Superseded previous tunnel"
            );
        }
        self.mark_connected(&conn.cluster_id).await;
        conn.transition(TunnelState::Active);

        info!(
            cluster_id = %conn.cluster_id,
            agent_id = %conn.agent_id,
            connection_id = %conn.connection_id,
            "Tunnel active"
        );
    }

    async fn read_loop<S>(
        &self,
        conn: &Arc<TunnelConnection>,
        status: &StatusWriter,
        mut inbound: S,
    ) -> CloseReason
    where
        S: Stream<Item = Result<AgentMessage, Status>> + Unpin + Send,
    {
        loop {
            let next = tokio::select! {
                biased;
                () = conn.cancelled() => return CloseReason::Cancelled,
                next = inbound.next() => next,
            };

            match next {
                Some(Ok(message)) => self.dispatch(conn, status, message),
                Some(Err(status)) => return CloseReason::StreamError(status),
                None => return CloseReason::EndOfStream,
            }
        }
    }

    /// Handle one agent frame. Never awaits, so a slow consumer of one
    /// frame type cannot delay responses queued behind it.
    fn dispatch(&self, conn: &TunnelConnection, status: &StatusWriter, message: AgentMessage) {
        match message.payload {
            Some(agent_message::Payload::K8sResponse(response)) => {
                let request_id = response.request_id.clone();
                if !conn.complete_pending(&request_id, response) {
                    debug!(
                        cluster_id = %conn.cluster_id,
                        request_id = %request_id,
                        "Dropped response with no waiting caller"
                    );
                }
            }
            Some(agent_message::Payload::WatchEvent(event)) => {
                let resource = event.resource.clone();
                self.events.publish(&conn.cluster_id, &resource, event);
            }
            Some(agent_message::Payload::Pong(_)) => status.record_seen(),
            Some(agent_message::Payload::ClusterInfo(info)) => {
                record_cluster_info(conn, status, info);
            }
            None => {
                warn!(cluster_id = %conn.cluster_id, "Ignoring agent message without payload");
            }
        }
    }

    async fn teardown(
        &self,
        conn: &Arc<TunnelConnection>,
        status: StatusWriter,
        reason: &CloseReason,
    ) {
        let was_current = self.registry.unregister_if_current(conn).await;
        conn.cancel();
        let dropped = conn.fail_all_pending();
        conn.transition(TunnelState::Closed);

        // Queued liveness writes land before the disconnect below.
        status.finish().await;
        if was_current {
            write_status(&self.db, &conn.cluster_id, ClusterStatus::Disconnected).await;
            // A replacement may have registered between the removal and the write.
            if self.registry.is_connected(&conn.cluster_id).await {
                self.mark_connected(&conn.cluster_id).await;
            }
        }

        info!(
            cluster_id = %conn.cluster_id,
            connection_id = %conn.connection_id,
            reason = %reason,
            was_current,
            dropped_requests = dropped,
            "Tunnel closed"
        );
    }

    async fn mark_connected(&self, cluster_id: &str) {
        write_status(&self.db, cluster_id, ClusterStatus::Connected).await;
    }
}

fn record_cluster_info(conn: &TunnelConnection, status: &StatusWriter, info: ClusterInfo) {
    info!(
        cluster_id = %conn.cluster_id,
        k8s_version = %info.k8s_version,
        node_count = info.node_count,
        agent_version = %info.agent_version,
        platform = %info.platform,
        "Agent reported cluster info"
    );
    status.record_info(info.clone());
    conn.set_cluster_info(info);
}

/// Drain the connection's frame queue into the gRPC response stream.
fn spawn_forwarder(
    conn: Arc<TunnelConnection>,
    mut frame_rx: mpsc::Receiver<ControlMessage>,
    out_tx: mpsc::Sender<Result<ControlMessage, Status>>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let frame = tokio::select! {
                biased;
                () = conn.cancelled() => break,
                frame = frame_rx.recv() => frame,
            };
            let Some(frame) = frame else { break };

            let sent = tokio::select! {
                biased;
                () = conn.cancelled() => break,
                sent = out_tx.send(Ok(frame)) => sent,
            };
            if sent.is_err() {
                debug!(cluster_id = %conn.cluster_id, "Agent response stream dropped");
                conn.cancel();
                break;
            }
        }
    })
}
