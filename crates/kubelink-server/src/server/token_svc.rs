//! AgentTokenService gRPC implementation.

use tonic::{Request, Response, Status};
use tracing::{info, instrument, warn};

use kubelink_proto::v1::agent_token_service_server::AgentTokenService;
use kubelink_proto::v1::{
    IssueTokenRequest, IssueTokenResponse, ListTokensRequest, ListTokensResponse,
    RegistrationTokenInfo, RevokeTokenRequest, RevokeTokenResponse,
};

use super::registration_svc::registration_error_to_status;
use super::timestamp;
use crate::auth::CredentialIssuer;
use crate::storage::{RegistrationToken, ServerDatabase};

/// Preset stamped on tokens issued without one.
pub const DEFAULT_PERMISSION_PRESET: &str = "read-only";

const DEFAULT_CREATOR: &str = "admin";

pub struct AgentTokenServiceImpl {
    issuer: CredentialIssuer,
    db: ServerDatabase,
}

impl AgentTokenServiceImpl {
    pub const fn new(issuer: CredentialIssuer, db: ServerDatabase) -> Self {
        Self { issuer, db }
    }
}

fn token_to_proto(t: &RegistrationToken) -> RegistrationTokenInfo {
    RegistrationTokenInfo {
        id: t.id.clone(),
        cluster_name: t.cluster_name.clone(),
        created_by: t.created_by.clone(),
        permission_preset: t.permission_preset.clone(),
        expires_at: Some(timestamp(t.expires_at)),
        used: t.is_used(),
        cluster_id: t.cluster_id.clone().unwrap_or_default(),
        created_at: Some(timestamp(t.created_at)),
    }
}

fn or_default<'a>(value: &'a str, default: &'a str) -> &'a str {
    let value = value.trim();
    if value.is_empty() { default } else { value }
}

#[tonic::async_trait]
impl AgentTokenService for AgentTokenServiceImpl {
    #[instrument(skip(self, request), fields(rpc = "IssueToken"))]
    async fn issue_token(
        &self,
        request: Request<IssueTokenRequest>,
    ) -> Result<Response<IssueTokenResponse>, Status> {
        let req = request.into_inner();

        let issued = self
            .issuer
            .issue_token(
                &req.cluster_name,
                or_default(&req.created_by, DEFAULT_CREATOR),
                or_default(&req.permission_preset, DEFAULT_PERMISSION_PRESET),
            )
            .await
            .map_err(registration_error_to_status)?;

        Ok(Response::new(IssueTokenResponse {
            token: issued.raw_token,
            info: Some(token_to_proto(&issued.record)),
        }))
    }

    #[instrument(skip(self, request), fields(rpc = "ListTokens"))]
    async fn list_tokens(
        &self,
        request: Request<ListTokensRequest>,
    ) -> Result<Response<ListTokensResponse>, Status> {
        let req = request.into_inner();

        let tokens = self
            .db
            .list_registration_tokens(req.include_used)
            .await
            .map_err(|e| Status::internal(format!("Failed to list tokens: {e}")))?;

        Ok(Response::new(ListTokensResponse {
            tokens: tokens.iter().map(token_to_proto).collect(),
        }))
    }

    #[instrument(skip(self, request), fields(rpc = "RevokeToken"))]
    async fn revoke_token(
        &self,
        request: Request<RevokeTokenRequest>,
    ) -> Result<Response<RevokeTokenResponse>, Status> {
        let req = request.into_inner();
        if req.id.is_empty() {
            return Err(Status::invalid_argument("Token id is required"));
        }

        let revoked = self
            .db
            .delete_unused_registration_token(&req.id)
            .await
            .map_err(|e| Status::internal(format!("Failed to revoke token: {e}")))?;

        if revoked {
            info!(token_id = %req.id, "Registration token revoked");
        } else {
            warn!(token_id = %req.id, "No unused registration token to revoke");
        }

        Ok(Response::new(RevokeTokenResponse { revoked }))
    }
}
