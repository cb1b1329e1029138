//! Tests for `AgentTokenService` gRPC implementation.

#![allow(clippy::unwrap_used)]

use tonic::{Code, Request};

use kubelink_proto::v1::agent_token_service_server::AgentTokenService;
use kubelink_proto::v1::{IssueTokenRequest, ListTokensRequest, RevokeTokenRequest};

use super::test_helpers::{test_db, test_issuer};
use super::token_svc::{AgentTokenServiceImpl, DEFAULT_PERMISSION_PRESET};
use crate::auth::registration::hash_token;

async fn setup() -> (AgentTokenServiceImpl, crate::storage::ServerDatabase) {
    let db = test_db().await;
    (AgentTokenServiceImpl::new(test_issuer(&db), db.clone()), db)
}

fn issue_request(cluster_name: &str) -> Request<IssueTokenRequest> {
    Request::new(IssueTokenRequest {
        cluster_name: cluster_name.into(),
        created_by: String::new(),
        permission_preset: String::new(),
    })
}

#[tokio::test]
async fn issue_returns_raw_token_once() {
    let (svc, db) = setup().await;

    let resp = svc
        .issue_token(issue_request("staging"))
        .await
        .unwrap()
        .into_inner();

    assert_eq!(resp.token.len(), 64);
    let info = resp.info.unwrap();
    assert_eq!(info.cluster_name, "staging");
    assert_eq!(info.created_by, "admin");
    assert_eq!(info.permission_preset, DEFAULT_PERMISSION_PRESET);
    assert!(!info.used);

    let stored = db.get_registration_token(&info.id).await.unwrap();
    assert_eq!(stored.token_hash, hash_token(&resp.token));
    assert_ne!(stored.token_hash, resp.token);
    assert_eq!(
        stored.expires_at - stored.created_at,
        crate::auth::registration::DEFAULT_REGISTRATION_TOKEN_TTL_SECS
    );
}

#[tokio::test]
async fn issue_requires_cluster_name() {
    let (svc, _db) = setup().await;
    let err = svc.issue_token(issue_request("  ")).await.unwrap_err();
    assert_eq!(err.code(), Code::InvalidArgument);
}

#[tokio::test]
async fn list_hides_used_tokens_by_default() {
    let (svc, db) = setup().await;

    svc.issue_token(issue_request("a")).await.unwrap();
    let used = svc
        .issue_token(issue_request("b"))
        .await
        .unwrap()
        .into_inner();
    test_issuer(&db).redeem(&used.token, None).await.unwrap();

    let unused = svc
        .list_tokens(Request::new(ListTokensRequest {
            include_used: false,
        }))
        .await
        .unwrap()
        .into_inner();
    assert_eq!(unused.tokens.len(), 1);
    assert_eq!(unused.tokens[0].cluster_name, "a");

    let all = svc
        .list_tokens(Request::new(ListTokensRequest { include_used: true }))
        .await
        .unwrap()
        .into_inner();
    assert_eq!(all.tokens.len(), 2);
    let redeemed = all.tokens.iter().find(|t| t.cluster_name == "b").unwrap();
    assert!(redeemed.used);
    assert!(!redeemed.cluster_id.is_empty());
}

#[tokio::test]
async fn revoke_deletes_unused_token() {
    let (svc, db) = setup().await;
    let issued = svc
        .issue_token(issue_request("a"))
        .await
        .unwrap()
        .into_inner();
    let id = issued.info.unwrap().id;

    let resp = svc
        .revoke_token(Request::new(RevokeTokenRequest { id: id.clone() }))
        .await
        .unwrap()
        .into_inner();
    assert!(resp.revoked);
    assert!(db.get_registration_token(&id).await.is_err());

    let resp = svc
        .revoke_token(Request::new(RevokeTokenRequest { id }))
        .await
        .unwrap()
        .into_inner();
    assert!(!resp.revoked);
}

#[tokio::test]
async fn revoke_requires_id() {
    let (svc, _db) = setup().await;
    let err = svc
        .revoke_token(Request::new(RevokeTokenRequest { id: String::new() }))
        .await
        .unwrap_err();
    assert_eq!(err.code(), Code::InvalidArgument);
}
