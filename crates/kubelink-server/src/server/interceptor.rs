//! Bearer-token interceptors for gRPC requests.

use std::sync::Arc;

use subtle::ConstantTimeEq;
use tonic::{Request, Status};
use tracing::debug;

use crate::auth::{AgentClaims, CredentialError, CredentialManager};

/// Marker inserted into extensions once the admin bearer has been checked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdminAccess;

/// Credential from `authorization: Bearer <token>`; the scheme name is
/// case-insensitive.
fn bearer_token<T>(req: &Request<T>) -> Option<&str> {
    let value = req.metadata().get("authorization")?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    Some(token.trim()).filter(|t| !t.is_empty())
}

/// Validate the agent credential in the authorization metadata header.
///
/// Rejects before the handler runs, so no tunnel state exists for an
/// unauthenticated stream.
pub fn agent_interceptor(
    credentials: Arc<CredentialManager>,
) -> impl Fn(Request<()>) -> Result<Request<()>, Status> + Clone {
    move |mut req: Request<()>| {
        let token = bearer_token(&req)
            .ok_or_else(|| Status::unauthenticated("Missing authorization header"))?;

        let claims = credentials.validate(token).map_err(|e| {
            debug!(error = %e, "Rejected agent credential");
            match e {
                CredentialError::Expired => Status::unauthenticated("Credential expired"),
                _ => Status::unauthenticated("Invalid credential"),
            }
        })?;

        req.extensions_mut().insert(claims);
        Ok(req)
    }
}

/// Require the static admin bearer, compared in constant time.
pub fn admin_interceptor(
    admin_token: Arc<str>,
) -> impl Fn(Request<()>) -> Result<Request<()>, Status> + Clone {
    move |mut req: Request<()>| {
        let token = bearer_token(&req)
            .ok_or_else(|| Status::unauthenticated("Missing authorization header"))?;

        if !bool::from(token.as_bytes().ct_eq(admin_token.as_bytes())) {
            return Err(Status::unauthenticated("Invalid admin token"));
        }

        req.extensions_mut().insert(AdminAccess);
        Ok(req)
    }
}

/// Extract claims from a request that has passed through [`agent_interceptor`].
#[allow(clippy::result_large_err)]
pub fn extract_claims<T>(req: &Request<T>) -> Result<&AgentClaims, Status> {
    req.extensions()
        .get::<AgentClaims>()
        .ok_or_else(|| Status::internal("Claims not found in request extensions"))
}
