//! Server-initiated liveness probe.

use std::sync::Arc;
use std::time::{Duration, SystemTime};

use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, warn};

use kubelink_proto::v1::{ControlMessage, Ping, control_message};

use crate::registry::TunnelConnection;

pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

/// Send a `Ping` every `interval` until the connection is cancelled.
///
/// A failed send cancels the connection; there is no retry.
pub fn spawn_heartbeat(conn: Arc<TunnelConnection>, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                () = conn.cancelled() => break,
                _ = ticker.tick() => {
                    let ping = ControlMessage {
                        payload: Some(control_message::Payload::Ping(Ping {
                            timestamp: Some(prost_types::Timestamp::from(SystemTime::now())),
                        })),
                    };
                    if conn.send_frame(ping).await.is_err() {
                        warn!(
                            cluster_id = %conn.cluster_id,
                            connection_id = %conn.connection_id,
                            "Heartbeat send failed, closing tunnel"
                        );
                        conn.cancel();
                        break;
                    }
                    debug!(cluster_id = %conn.cluster_id, "Heartbeat ping sent");
                }
            }
        }
    })
}
