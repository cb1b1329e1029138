//! Registration token issuance and redemption.
//!
//! A registration token is a single-use bootstrap secret. Redeeming it
//! creates the cluster row and mints the agent's long-lived credential.

use std::sync::Arc;

use rand::RngCore;
use rand::rngs::OsRng;
use sha2::{Digest, Sha256};
use tracing::{info, warn};

use kubelink_core::db::unix_timestamp;

use super::credential::CredentialManager;
use crate::storage::{
    ClaimOutcome, ClusterConnectionType, DatabaseError, NewCluster, NewRegistrationToken,
    RegistrationToken, ServerDatabase,
};

/// Default registration token lifetime: 24 hours.
pub const DEFAULT_REGISTRATION_TOKEN_TTL_SECS: i64 = 24 * 60 * 60;

/// Random bytes per raw token (256 bits).
const TOKEN_BYTES: usize = 32;

/// A freshly issued registration token. `raw_token` is never stored.
#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub raw_token: String,
    pub record: RegistrationToken,
}

/// Outcome of a successful redemption.
#[derive(Debug, Clone)]
pub struct Redemption {
    pub cluster_id: String,
    pub cluster_name: String,
    pub agent_id: String,
    pub credential: String,
    pub expires_at: i64,
}

/// Issues registration tokens and redeems them for agent credentials.
#[derive(Clone)]
pub struct CredentialIssuer {
    db: ServerDatabase,
    credentials: Arc<CredentialManager>,
    token_ttl_secs: i64,
}

impl CredentialIssuer {
    pub const fn new(
        db: ServerDatabase,
        credentials: Arc<CredentialManager>,
        token_ttl_secs: i64,
    ) -> Self {
        Self {
            db,
            credentials,
            token_ttl_secs,
        }
    }

    /// Issue a new single-use registration token.
    pub async fn issue_token(
        &self,
        cluster_name: &str,
        creator: &str,
        permission_preset: &str,
    ) -> Result<IssuedToken, RegistrationError> {
        let cluster_name = cluster_name.trim();
        if cluster_name.is_empty() {
            return Err(RegistrationError::InvalidArgument(
                "cluster name must not be empty",
            ));
        }

        let raw_token = generate_raw_token();
        let id = uuid::Uuid::new_v4().to_string();
        let record = self
            .db
            .create_registration_token(&NewRegistrationToken {
                id: &id,
                token_hash: &hash_token(&raw_token),
                cluster_name,
                created_by: creator,
                permission_preset,
                expires_at: unix_timestamp() + self.token_ttl_secs,
            })
            .await?;

        info!(
            token_id = %record.id,
            cluster_name = %record.cluster_name,
            created_by = %record.created_by,
            "Registration token issued"
        );

        Ok(IssuedToken { raw_token, record })
    }

    /// Redeem a raw token for a new cluster and agent credential.
    ///
    /// `cluster_name` overrides the name recorded on the token when non-empty.
    pub async fn redeem(
        &self,
        raw_token: &str,
        cluster_name: Option<&str>,
    ) -> Result<Redemption, RegistrationError> {
        if raw_token.trim().is_empty() {
            return Err(RegistrationError::InvalidArgument("token must not be empty"));
        }

        let token = match self
            .db
            .claim_registration_token(&hash_token(raw_token), unix_timestamp())
            .await?
        {
            ClaimOutcome::Claimed(token) => token,
            ClaimOutcome::NotFound => return Err(RegistrationError::NotFound),
            ClaimOutcome::AlreadyUsed => {
                warn!("Rejected reuse of a redeemed registration token");
                return Err(RegistrationError::AlreadyUsed);
            }
            ClaimOutcome::Expired => return Err(RegistrationError::Expired),
        };

        let cluster_id = uuid::Uuid::new_v4().to_string();
        let agent_id = uuid::Uuid::new_v4().to_string();
        let name = cluster_name
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .unwrap_or(&token.cluster_name)
            .to_string();

        if let Err(e) = self
            .db
            .create_cluster(&NewCluster {
                id: &cluster_id,
                name: &name,
                connection_type: ClusterConnectionType::Agent,
                permission_preset: &token.permission_preset,
                agent_id: Some(&agent_id),
                created_by: &token.created_by,
            })
            .await
        {
            self.release_claim(&token).await;
            return Err(e.into());
        }

        let (credential, claims) = match self.credentials.issue(&cluster_id, &agent_id) {
            Ok(issued) => issued,
            Err(e) => {
                if let Err(del) = self.db.delete_cluster(&cluster_id).await {
                    warn!(cluster_id = %cluster_id, error = %del, "Failed to remove orphaned cluster");
                }
                self.release_claim(&token).await;
                return Err(RegistrationError::Signing(e.to_string()));
            }
        };

        // Best-effort: the claim above already made the token unusable.
        if let Err(e) = self.db.mark_token_used(&token.id, &cluster_id).await {
            warn!(
                token_id = %token.id,
                cluster_id = %cluster_id,
                error = %e,
                "Failed to record cluster on redeemed registration token"
            );
        }

        info!(
            cluster_id = %cluster_id,
            agent_id = %agent_id,
            cluster_name = %name,
            "Registration token redeemed"
        );

        Ok(Redemption {
            cluster_id,
            cluster_name: name,
            agent_id,
            credential,
            expires_at: claims.exp,
        })
    }

    async fn release_claim(&self, token: &RegistrationToken) {
        if let Err(e) = self.db.release_registration_token(&token.id).await {
            warn!(token_id = %token.id, error = %e, "Failed to release registration token claim");
        }
    }
}

/// Generate a raw registration token: 256 random bits, hex encoded.
pub fn generate_raw_token() -> String {
    let mut bytes = [0u8; TOKEN_BYTES];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Hash a token for storage (raw tokens are never stored).
pub fn hash_token(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}

#[derive(Debug, thiserror::Error)]
pub enum RegistrationError {
    #[error("Invalid registration request: {0}")]
    InvalidArgument(&'static str),

    #[error("Registration token not found")]
    NotFound,

    #[error("Registration token already used")]
    AlreadyUsed,

    #[error("Registration token expired")]
    Expired,

    #[error("Storage error: {0}")]
    Storage(#[from] DatabaseError),

    #[error("Credential signing failed: {0}")]
    Signing(String),
}
