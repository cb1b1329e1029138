//! Cluster row updates driven by agent traffic, written off the read loop.
//!
//! Pongs and cluster info are folded into a `watch` snapshot; a per-connection
//! task persists whatever changed since its last write. A slow database
//! therefore coalesces updates instead of stalling response delivery.

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use kubelink_proto::v1::ClusterInfo;

use crate::storage::{ClusterStatus, ServerDatabase};

#[derive(Debug, Clone, Default, PartialEq)]
struct Snapshot {
    /// Bumped on every pong.
    seen: u64,
    info: Option<ClusterInfo>,
}

pub(super) struct StatusWriter {
    tx: watch::Sender<Snapshot>,
    task: JoinHandle<()>,
}

impl StatusWriter {
    pub(super) fn spawn(db: ServerDatabase, cluster_id: String) -> Self {
        let (tx, mut rx) = watch::channel(Snapshot::default());
        let task = tokio::spawn(async move {
            let mut written = Snapshot::default();
            loop {
                let closed = rx.changed().await.is_err();
                let latest = rx.borrow_and_update().clone();
                persist(&db, &cluster_id, &written, &latest).await;
                written = latest;
                if closed {
                    break;
                }
            }
        });
        Self { tx, task }
    }

    /// Record agent liveness. Never waits on the database.
    pub(super) fn record_seen(&self) {
        self.tx.send_modify(|s| s.seen = s.seen.wrapping_add(1));
    }

    /// Record the latest cluster info. Never waits on the database.
    pub(super) fn record_info(&self, info: ClusterInfo) {
        self.tx.send_modify(|s| s.info = Some(info));
    }

    /// Flush outstanding updates and stop the task.
    pub(super) async fn finish(self) {
        let Self { tx, task } = self;
        drop(tx);
        if let Err(e) = task.await {
            warn!(error = %e, "Cluster status writer failed");
        }
    }
}

async fn persist(db: &ServerDatabase, cluster_id: &str, written: &Snapshot, latest: &Snapshot) {
    if latest.info != written.info {
        if let Some(info) = &latest.info {
            match db
                .update_cluster_info(cluster_id, &info.k8s_version, info.node_count)
                .await
            {
                Ok(_) => debug!(cluster_id, "Cluster info stored"),
                Err(e) => warn!(cluster_id, error = %e, "Failed to store cluster info"),
            }
        }
    }
    if latest.seen != written.seen {
        write_status(db, cluster_id, ClusterStatus::Connected).await;
    }
}

/// Set the cluster's status row, logging instead of failing.
pub(super) async fn write_status(db: &ServerDatabase, cluster_id: &str, status: ClusterStatus) {
    match db.update_cluster_status(cluster_id, status).await {
        Ok(true) => {}
        Ok(false) => {
            warn!(cluster_id, status = %status, "No cluster row to update");
        }
        Err(e) => {
            warn!(cluster_id, error = %e, "Failed to update cluster status");
        }
    }
}
