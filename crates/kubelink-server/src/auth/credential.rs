//! Agent credential issuance and validation.
//!
//! Credentials are HS256 JWTs. Validation needs only the shared secret and
//! the clock, so a restarted control plane accepts existing agents without
//! touching the database.

use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};

use kubelink_core::db::unix_timestamp;

use super::claims::{AGENT_TOKEN_TYPE, AgentClaims};

/// Default credential lifetime: 365 days.
pub const DEFAULT_CREDENTIAL_TTL_SECS: i64 = 365 * 24 * 60 * 60;

/// Signs and validates agent credentials.
#[derive(Clone)]
pub struct CredentialManager {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
    ttl_secs: i64,
}

impl CredentialManager {
    /// Create a new `CredentialManager` with the given secret.
    pub fn new(secret: &[u8], ttl_secs: i64) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        validation.set_required_spec_claims(&["exp", "sub"]);

        Self {
            encoding_key: EncodingKey::from_secret(secret),
            decoding_key: DecodingKey::from_secret(secret),
            validation,
            ttl_secs,
        }
    }

    pub const fn ttl_secs(&self) -> i64 {
        self.ttl_secs
    }

    /// Issue a credential binding `agent_id` to `cluster_id`, valid from now.
    pub fn issue(
        &self,
        cluster_id: &str,
        agent_id: &str,
    ) -> Result<(String, AgentClaims), CredentialError> {
        self.issue_at(cluster_id, agent_id, unix_timestamp())
    }

    /// Issue a credential as if it were minted at `issued_at`.
    pub fn issue_at(
        &self,
        cluster_id: &str,
        agent_id: &str,
        issued_at: i64,
    ) -> Result<(String, AgentClaims), CredentialError> {
        let claims = AgentClaims {
            jti: uuid::Uuid::new_v4().to_string(),
            sub: agent_id.to_string(),
            cluster_id: cluster_id.to_string(),
            agent_id: agent_id.to_string(),
            iat: issued_at,
            exp: issued_at + self.ttl_secs,
            token_type: AGENT_TOKEN_TYPE.to_string(),
        };

        let token = jsonwebtoken::encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|e| CredentialError::Signing(e.to_string()))?;
        Ok((token, claims))
    }

    /// Validate a credential and return its claims.
    pub fn validate(&self, token: &str) -> Result<AgentClaims, CredentialError> {
        let data = jsonwebtoken::decode::<AgentClaims>(token, &self.decoding_key, &self.validation)
            .map_err(|e| match e.kind() {
                ErrorKind::ExpiredSignature => CredentialError::Expired,
                ErrorKind::InvalidSignature => CredentialError::InvalidSignature,
                _ => CredentialError::Malformed(e.to_string()),
            })?;
        let claims = data.claims;

        if !claims.is_agent() {
            return Err(CredentialError::InvalidClaims("not an agent credential"));
        }
        if !claims.is_bound() {
            return Err(CredentialError::InvalidClaims(
                "subject does not match a cluster-bound agent",
            ));
        }
        Ok(claims)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CredentialError {
    #[error("Malformed credential: {0}")]
    Malformed(String),

    #[error("Credential signature is invalid")]
    InvalidSignature,

    #[error("Credential has expired")]
    Expired,

    #[error("Invalid credential claims: {0}")]
    InvalidClaims(&'static str),

    #[error("Failed to sign credential: {0}")]
    Signing(String),
}

#[cfg(test)]
#[allow(clippy::panic, clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;

    fn test_manager() -> CredentialManager {
        CredentialManager::new(b"test-secret-key-for-testing", DEFAULT_CREDENTIAL_TTL_SECS)
    }

    #[test]
    fn issue_and_validate_credential() {
        let manager = test_manager();
        let (token, issued) = manager.issue("c-1", "agent-1").unwrap();

        assert_eq!(issued.exp - issued.iat, DEFAULT_CREDENTIAL_TTL_SECS);

        let claims = manager.validate(&token).unwrap();
        assert_eq!(claims.cluster_id, "c-1");
        assert_eq!(claims.agent_id, "agent-1");
        assert_eq!(claims.sub, "agent-1");
        assert!(claims.is_agent());
        assert_eq!(claims, issued);
    }

    #[test]
    fn wrong_secret_fails_validation() {
        let manager = test_manager();
        let other = CredentialManager::new(b"different-secret", DEFAULT_CREDENTIAL_TTL_SECS);

        for (cluster, agent) in [("c-1", "agent-1"), ("prod", "x"), ("c", "a-very-long-agent")] {
            let (token, _) = manager.issue(cluster, agent).unwrap();
            assert!(matches!(
                other.validate(&token),
                Err(CredentialError::InvalidSignature)
            ));
        }
    }

    #[test]
    fn expired_credential_fails_even_with_valid_signature() {
        let manager = CredentialManager::new(b"test-secret-key-for-testing", 60);
        let (token, claims) = manager
            .issue_at("c-1", "agent-1", unix_timestamp() - 3600)
            .unwrap();
        assert!(claims.exp < unix_timestamp());

        assert!(matches!(
            manager.validate(&token),
            Err(CredentialError::Expired)
        ));
    }

    #[test]
    fn garbage_is_malformed() {
        let manager = test_manager();
        assert!(matches!(
            manager.validate("not-a-valid-token"),
            Err(CredentialError::Malformed(_))
        ));
        assert!(matches!(
            manager.validate(""),
            Err(CredentialError::Malformed(_))
        ));
    }

    #[test]
    fn subject_must_match_agent() {
        let manager = test_manager();
        let forged = AgentClaims {
            jti: "j".into(),
            sub: "someone-else".into(),
            cluster_id: "c-1".into(),
            agent_id: "agent-1".into(),
            iat: unix_timestamp(),
            exp: unix_timestamp() + 60,
            token_type: AGENT_TOKEN_TYPE.into(),
        };
        let token = jsonwebtoken::encode(
            &Header::new(Algorithm::HS256),
            &forged,
            &EncodingKey::from_secret(b"test-secret-key-for-testing"),
        )
        .unwrap();

        assert!(matches!(
            manager.validate(&token),
            Err(CredentialError::InvalidClaims(_))
        ));
    }

    #[test]
    fn non_agent_token_type_rejected() {
        let manager = test_manager();
        let claims = AgentClaims {
            jti: "j".into(),
            sub: "agent-1".into(),
            cluster_id: "c-1".into(),
            agent_id: "agent-1".into(),
            iat: unix_timestamp(),
            exp: unix_timestamp() + 60,
            token_type: "access".into(),
        };
        let token = jsonwebtoken::encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(b"test-secret-key-for-testing"),
        )
        .unwrap();

        assert!(matches!(
            manager.validate(&token),
            Err(CredentialError::InvalidClaims(_))
        ));
    }
}
