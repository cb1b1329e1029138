//! In-memory connection registry for tunnel management.
//!
//! Maps each cluster ID to its single live [`TunnelConnection`].

mod connection;

pub use connection::{ConnectionClosed, PendingSlot, TunnelConnection};

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{debug, info};

/// Thread-safe registry of active tunnel connections.
#[derive(Clone, Default)]
pub struct ConnectionRegistry {
    connections: Arc<RwLock<HashMap<String, Arc<TunnelConnection>>>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install `conn` as the live connection for its cluster.
    ///
    /// A previous connection for the same cluster is swapped out under the
    /// write lock and cancelled after the lock is released, so no caller can
    /// obtain it from the registry once its cancellation starts.
    pub async fn register(&self, conn: Arc<TunnelConnection>) -> Option<Arc<TunnelConnection>> {
        let previous = self
            .connections
            .write()
            .await
            .insert(conn.cluster_id.clone(), Arc::clone(&conn));

        if let Some(old) = &previous {
            info!(
                cluster_id = %conn.cluster_id,
                old_connection_id = %old.connection_id,
                new_connection_id = %conn.connection_id,
                "Replacing existing tunnel connection"
            );
            old.cancel();
        }
        info!(
            cluster_id = %conn.cluster_id,
            connection_id = %conn.connection_id,
            "Tunnel connection registered"
        );
        previous
    }

    /// Remove `conn` only if it is still the current entry for its cluster.
    ///
    /// A superseded connection never removes the one that replaced it.
    pub async fn unregister_if_current(&self, conn: &Arc<TunnelConnection>) -> bool {
        let mut connections = self.connections.write().await;
        match connections.get(&conn.cluster_id) {
            Some(current) if Arc::ptr_eq(current, conn) => {
                connections.remove(&conn.cluster_id);
                info!(
                    cluster_id = %conn.cluster_id,
                    connection_id = %conn.connection_id,
                    "Tunnel connection unregistered"
                );
                true
            }
            _ => {
                debug!(
                    cluster_id = %conn.cluster_id,
                    connection_id = %conn.connection_id,
                    "Superseded tunnel connection left registry untouched"
                );
                false
            }
        }
    }

    /// Get the live connection for a cluster.
    pub async fn get(&self, cluster_id: &str) -> Option<Arc<TunnelConnection>> {
        self.connections.read().await.get(cluster_id).cloned()
    }

    /// Check if a cluster has a live tunnel.
    pub async fn is_connected(&self, cluster_id: &str) -> bool {
        self.connections.read().await.contains_key(cluster_id)
    }

    /// Get all connected cluster IDs.
    pub async fn connected_clusters(&self) -> Vec<String> {
        self.connections.read().await.keys().cloned().collect()
    }

    /// Count of active connections.
    pub async fn connection_count(&self) -> usize {
        self.connections.read().await.len()
    }
}
