//! JWT claims carried by agent credentials.

use serde::{Deserialize, Serialize};

/// Token type stamped on every agent credential.
pub const AGENT_TOKEN_TYPE: &str = "agent";

/// Claims embedded in an agent credential.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentClaims {
    /// JWT ID (unique per credential).
    pub jti: String,
    /// Subject (always the agent ID).
    pub sub: String,
    /// Cluster the agent is bound to.
    pub cluster_id: String,
    /// Agent identity minted at registration.
    pub agent_id: String,
    /// Issued at (unix timestamp).
    pub iat: i64,
    /// Expiration (unix timestamp).
    pub exp: i64,
    /// Token type, `"agent"` for credentials minted here.
    pub token_type: String,
}

impl AgentClaims {
    pub fn is_agent(&self) -> bool {
        self.token_type == AGENT_TOKEN_TYPE
    }

    /// The subject must name the agent and the cluster binding must be present.
    pub fn is_bound(&self) -> bool {
        !self.agent_id.is_empty() && self.sub == self.agent_id && !self.cluster_id.is_empty()
    }
}
