//! RegistrationService gRPC implementation.

use tonic::{Request, Response, Status};
use tracing::{error, instrument};

use kubelink_proto::v1::registration_service_server::RegistrationService;
use kubelink_proto::v1::{RegisterAgentRequest, RegisterAgentResponse};

use super::timestamp;
use crate::auth::{CredentialIssuer, RegistrationError};

pub struct RegistrationServiceImpl {
    issuer: CredentialIssuer,
}

impl RegistrationServiceImpl {
    pub const fn new(issuer: CredentialIssuer) -> Self {
        Self { issuer }
    }
}

/// Map a redemption failure onto the wire error contract.
///
/// Unknown tokens are `Unauthenticated`; tokens that exist but can no longer
/// be redeemed are `PermissionDenied`. Storage details never reach the caller.
pub fn registration_error_to_status(err: RegistrationError) -> Status {
    match err {
        RegistrationError::InvalidArgument(msg) => Status::invalid_argument(msg),
        RegistrationError::NotFound => Status::unauthenticated("Invalid registration token"),
        RegistrationError::AlreadyUsed => {
            Status::permission_denied("Registration token already used")
        }
        RegistrationError::Expired => Status::permission_denied("Registration token expired"),
        RegistrationError::Storage(e) => {
            error!(error = %e, "Registration storage failure");
            Status::internal("Registration failed")
        }
        RegistrationError::Signing(e) => {
            error!(error = %e, "Credential signing failure");
            Status::internal("Registration failed")
        }
    }
}

#[tonic::async_trait]
impl RegistrationService for RegistrationServiceImpl {
    #[instrument(skip(self, request), fields(rpc = "Register"))]
    async fn register(
        &self,
        request: Request<RegisterAgentRequest>,
    ) -> Result<Response<RegisterAgentResponse>, Status> {
        let req = request.into_inner();
        let cluster_name = Some(req.cluster_name.as_str()).filter(|n| !n.trim().is_empty());

        let redemption = self
            .issuer
            .redeem(&req.token, cluster_name)
            .await
            .map_err(registration_error_to_status)?;

        Ok(Response::new(RegisterAgentResponse {
            cluster_id: redemption.cluster_id,
            agent_id: redemption.agent_id,
            agent_credential: redemption.credential,
            expires_at: Some(timestamp(redemption.expires_at)),
        }))
    }
}
