//! Tests for `ClusterService` gRPC implementation.

#![allow(clippy::unwrap_used, clippy::panic)]

use tonic::{Code, Request};

use kubelink_proto::v1::cluster_service_server::ClusterService;
use kubelink_proto::v1::{
    ClusterStatus as ProtoClusterStatus, ConnectionType, ExecuteRequest, GetClusterRequest,
    K8sRequest, ListClustersRequest, StartWatchRequest, control_message, k8s_response,
};

use super::cluster_svc::ClusterServiceImpl;
use super::test_helpers::{connect_agent, seed_cluster, spawn_responder, test_db, test_router};
use crate::router::{ClusterRouter, DirectEndpoint};
use crate::storage::{ClusterConnectionType, ClusterStatus, ServerDatabase};

async fn setup() -> (ClusterServiceImpl, ServerDatabase, ClusterRouter<DirectEndpoint>) {
    let db = test_db().await;
    seed_cluster(&db, "c-agent", ClusterConnectionType::Agent).await;
    seed_cluster(&db, "c-direct", ClusterConnectionType::Kubeconfig).await;
    let router = test_router();
    router
        .add_direct_client(
            "c-direct",
            DirectEndpoint {
                cluster_id: "c-direct".into(),
                name: "c-direct-name".into(),
            },
        )
        .await;
    (
        ClusterServiceImpl::new(db.clone(), router.clone()),
        db,
        router,
    )
}

fn execute_request(cluster_id: &str, timeout_ms: u64) -> Request<ExecuteRequest> {
    Request::new(ExecuteRequest {
        cluster_id: cluster_id.into(),
        request: Some(K8sRequest {
            verb: "list".into(),
            resource: "pods".into(),
            namespace: "default".into(),
            ..Default::default()
        }),
        timeout_ms,
    })
}

#[tokio::test]
async fn list_reports_live_reachability() {
    let (svc, db, router) = setup().await;
    let (_conn, _rx) = connect_agent(&router, "c-agent").await;
    db.update_cluster_status("c-agent", ClusterStatus::Connected)
        .await
        .unwrap();

    let resp = svc
        .list_clusters(Request::new(ListClustersRequest {}))
        .await
        .unwrap()
        .into_inner();
    assert_eq!(resp.clusters.len(), 2);

    let agent = resp
        .clusters
        .iter()
        .find(|c| c.cluster_id == "c-agent")
        .unwrap();
    assert!(agent.reachable);
    assert_eq!(agent.connection_type, ConnectionType::Agent as i32);
    assert_eq!(agent.status, ProtoClusterStatus::Connected as i32);
    assert!(agent.last_seen.is_some());

    let direct = resp
        .clusters
        .iter()
        .find(|c| c.cluster_id == "c-direct")
        .unwrap();
    assert!(direct.reachable);
    assert_eq!(direct.connection_type, ConnectionType::Kubeconfig as i32);
}

#[tokio::test]
async fn get_cluster_not_found() {
    let (svc, _db, _router) = setup().await;
    let err = svc
        .get_cluster(Request::new(GetClusterRequest {
            cluster_id: "missing".into(),
        }))
        .await
        .unwrap_err();
    assert_eq!(err.code(), Code::NotFound);
}

#[tokio::test]
async fn get_disconnected_agent_cluster() {
    let (svc, _db, _router) = setup().await;
    let cluster = svc
        .get_cluster(Request::new(GetClusterRequest {
            cluster_id: "c-agent".into(),
        }))
        .await
        .unwrap()
        .into_inner()
        .cluster
        .unwrap();
    assert!(!cluster.reachable);
    assert_eq!(cluster.status, ProtoClusterStatus::Disconnected as i32);
}

#[tokio::test]
async fn execute_through_tunnel() {
    let (svc, _db, router) = setup().await;
    let (conn, rx) = connect_agent(&router, "c-agent").await;
    spawn_responder(conn, rx, 200, b"{\"items\":[]}");

    let resp = svc
        .execute(execute_request("c-agent", 5_000))
        .await
        .unwrap()
        .into_inner()
        .response
        .unwrap();
    assert_eq!(resp.status, 200);
    assert_eq!(
        resp.result,
        Some(k8s_response::Result::Body(b"{\"items\":[]}".to_vec()))
    );
}

#[tokio::test]
async fn execute_on_disconnected_cluster_is_unavailable() {
    let (svc, _db, _router) = setup().await;
    let err = svc.execute(execute_request("c-agent", 0)).await.unwrap_err();
    assert_eq!(err.code(), Code::Unavailable);
}

#[tokio::test]
async fn execute_on_unknown_cluster_is_not_found() {
    let (svc, _db, _router) = setup().await;
    let err = svc.execute(execute_request("nope", 0)).await.unwrap_err();
    assert_eq!(err.code(), Code::NotFound);
}

#[tokio::test]
async fn execute_on_direct_cluster_is_failed_precondition() {
    let (svc, _db, _router) = setup().await;
    let err = svc
        .execute(execute_request("c-direct", 0))
        .await
        .unwrap_err();
    assert_eq!(err.code(), Code::FailedPrecondition);
}

#[tokio::test]
async fn execute_timeout_is_deadline_exceeded() {
    let (svc, _db, router) = setup().await;
    let (conn, _rx) = connect_agent(&router, "c-agent").await;
    // The tunnel route never touches the database, so virtual time is safe here.
    tokio::time::pause();

    let err = svc
        .execute(execute_request("c-agent", 2_000))
        .await
        .unwrap_err();
    assert_eq!(err.code(), Code::DeadlineExceeded);
    assert_eq!(conn.pending_count(), 0);
}

#[tokio::test]
async fn execute_requires_request() {
    let (svc, _db, _router) = setup().await;
    let err = svc
        .execute(Request::new(ExecuteRequest {
            cluster_id: "c-agent".into(),
            request: None,
            timeout_ms: 0,
        }))
        .await
        .unwrap_err();
    assert_eq!(err.code(), Code::InvalidArgument);
}

#[tokio::test]
async fn start_watch_sends_watch_frame() {
    let (svc, _db, router) = setup().await;
    let (_conn, mut rx) = connect_agent(&router, "c-agent").await;

    let watch_id = svc
        .start_watch(Request::new(StartWatchRequest {
            cluster_id: "c-agent".into(),
            resource: "pods".into(),
            namespace: "kube-system".into(),
        }))
        .await
        .unwrap()
        .into_inner()
        .watch_id;

    match rx.recv().await.unwrap().payload {
        Some(control_message::Payload::Watch(watch)) => {
            assert_eq!(watch.watch_id, watch_id);
            assert_eq!(watch.namespace, "kube-system");
        }
        other => panic!("expected Watch frame, got {other:?}"),
    }
}
