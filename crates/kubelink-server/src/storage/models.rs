//! Data models for kubelink storage.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct RegistrationToken {
    pub id: String,
    pub token_hash: String,
    pub cluster_name: String,
    pub created_by: String,
    pub permission_preset: String,
    pub expires_at: i64,
    pub used: i64,
    pub used_at: Option<i64>,
    pub cluster_id: Option<String>,
    pub created_at: i64,
}

impl RegistrationToken {
    pub const fn is_used(&self) -> bool {
        self.used != 0
    }

    pub const fn is_expired_at(&self, now: i64) -> bool {
        self.expires_at <= now
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Cluster {
    pub id: String,
    pub name: String,
    pub connection_type: String,
    pub status: String,
    pub permission_preset: String,
    pub agent_id: Option<String>,
    pub created_by: String,
    pub k8s_version: Option<String>,
    pub node_count: Option<i64>,
    pub created_at: i64,
    pub updated_at: i64,
    pub last_seen: Option<i64>,
}

impl Cluster {
    /// Parsed connection type. Unknown values fall back to `Agent`, which the
    /// schema CHECK constraint makes unreachable in practice.
    pub fn connection_type(&self) -> ClusterConnectionType {
        self.connection_type
            .parse()
            .unwrap_or(ClusterConnectionType::Agent)
    }

    pub fn status(&self) -> ClusterStatus {
        self.status.parse().unwrap_or(ClusterStatus::Disconnected)
    }
}

/// How the control plane reaches a cluster's API server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClusterConnectionType {
    /// A directly reachable API server described by a kubeconfig.
    Kubeconfig,
    /// An in-cluster agent holding an outbound tunnel.
    Agent,
}

impl ClusterConnectionType {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Kubeconfig => "kubeconfig",
            Self::Agent => "agent",
        }
    }
}

impl fmt::Display for ClusterConnectionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ClusterConnectionType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "kubeconfig" => Ok(Self::Kubeconfig),
            "agent" => Ok(Self::Agent),
            other => Err(format!("unknown connection type: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClusterStatus {
    Connected,
    Disconnected,
}

impl ClusterStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Connected => "connected",
            Self::Disconnected => "disconnected",
        }
    }
}

impl fmt::Display for ClusterStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ClusterStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "connected" => Ok(Self::Connected),
            "disconnected" => Ok(Self::Disconnected),
            other => Err(format!("unknown cluster status: {other}")),
        }
    }
}
