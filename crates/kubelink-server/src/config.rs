//! Server configuration.
//!
//! Values come from an optional TOML file; command-line flags and environment
//! variables are applied on top by the binary before [`ServerConfig::validate`].

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::auth::credential::DEFAULT_CREDENTIAL_TTL_SECS;
use crate::auth::registration::DEFAULT_REGISTRATION_TOKEN_TTL_SECS;
use crate::events::DEFAULT_EVENT_CAPACITY;
use crate::tls::TlsMode;
use crate::tunnel::{DEFAULT_HEARTBEAT_INTERVAL, DEFAULT_OUTBOUND_BUFFER};

pub const DEFAULT_ADDR: &str = "0.0.0.0:8443";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerConfig {
    /// Address to listen on.
    pub addr: SocketAddr,
    /// SQLite database file. Defaults to `~/.kubelink/server.db`.
    pub db_path: Option<PathBuf>,
    /// HMAC secret for agent credentials.
    pub signing_secret: String,
    /// Static bearer for the admin services. Admin services are not served
    /// without one.
    pub admin_token: Option<String>,
    pub heartbeat_interval_secs: u64,
    pub registration_token_ttl_secs: i64,
    pub credential_ttl_secs: i64,
    /// Capacity of each tunnel's outbound frame queue.
    pub outbound_buffer: usize,
    /// Capacity of the watch event broadcast.
    pub event_capacity: usize,
    /// How often expired registration tokens are purged.
    pub token_cleanup_interval_secs: u64,
    pub log_json: bool,
    pub tls: TlsSettings,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TlsSettings {
    pub cert: Option<PathBuf>,
    pub key: Option<PathBuf>,
    pub client_ca: Option<PathBuf>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: SocketAddr::from(([0, 0, 0, 0], 8443)),
            db_path: None,
            signing_secret: String::new(),
            admin_token: None,
            heartbeat_interval_secs: DEFAULT_HEARTBEAT_INTERVAL.as_secs(),
            registration_token_ttl_secs: DEFAULT_REGISTRATION_TOKEN_TTL_SECS,
            credential_ttl_secs: DEFAULT_CREDENTIAL_TTL_SECS,
            outbound_buffer: DEFAULT_OUTBOUND_BUFFER,
            event_capacity: DEFAULT_EVENT_CAPACITY,
            token_cleanup_interval_secs: 3600,
            log_json: false,
            tls: TlsSettings::default(),
        }
    }
}

impl ServerConfig {
    /// Load a TOML file. Keys absent from the file keep their defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::FileRead {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.signing_secret.is_empty() {
            return Err(ConfigError::Invalid("signing_secret must be set".into()));
        }
        if self.admin_token.as_deref().is_some_and(str::is_empty) {
            return Err(ConfigError::Invalid("admin_token must not be empty".into()));
        }
        for (name, value) in [
            ("heartbeat_interval_secs", self.heartbeat_interval_secs),
            ("token_cleanup_interval_secs", self.token_cleanup_interval_secs),
        ] {
            if value == 0 {
                return Err(ConfigError::Invalid(format!("{name} must be positive")));
            }
        }
        if self.registration_token_ttl_secs <= 0 || self.credential_ttl_secs <= 0 {
            return Err(ConfigError::Invalid("TTLs must be positive".into()));
        }
        if self.outbound_buffer == 0 || self.event_capacity == 0 {
            return Err(ConfigError::Invalid("buffer sizes must be positive".into()));
        }
        self.tls_mode().map(|_| ())
    }

    pub const fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }

    pub const fn token_cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.token_cleanup_interval_secs)
    }

    /// Resolve the TLS mode. A certificate requires a key and vice versa; a
    /// client CA requires both.
    pub fn tls_mode(&self) -> Result<TlsMode, ConfigError> {
        match (&self.tls.cert, &self.tls.key) {
            (Some(cert), Some(key)) => Ok(TlsMode::Custom {
                cert_path: cert.clone(),
                key_path: key.clone(),
                client_ca_path: self.tls.client_ca.clone(),
            }),
            (None, None) if self.tls.client_ca.is_none() => Ok(TlsMode::Disabled),
            (None, None) => Err(ConfigError::Invalid(
                "tls.client_ca requires tls.cert and tls.key".into(),
            )),
            _ => Err(ConfigError::Invalid(
                "tls.cert and tls.key must be set together".into(),
            )),
        }
    }

    /// Database path, falling back to `~/.kubelink/server.db`.
    pub fn resolved_db_path(&self) -> Result<PathBuf, ConfigError> {
        if let Some(path) = &self.db_path {
            return Ok(path.clone());
        }
        dirs::home_dir()
            .map(|home| home.join(".kubelink").join("server.db"))
            .ok_or_else(|| ConfigError::Invalid("cannot determine home directory".into()))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {}: {source}", path.display())]
    FileRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}
