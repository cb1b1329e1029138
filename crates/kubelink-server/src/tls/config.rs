//! Listener TLS for the tunnel endpoint.

use std::path::{Path, PathBuf};

use tonic::transport::{Certificate, Identity, ServerTlsConfig};
use tracing::info;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TlsMode {
    /// Plaintext. Agents must then sit behind a TLS-terminating proxy.
    Disabled,
    /// PEM certificate chain and key supplied by the operator.
    Custom {
        cert_path: PathBuf,
        key_path: PathBuf,
        /// Agents must present a certificate signed by this CA (mutual TLS).
        client_ca_path: Option<PathBuf>,
    },
}

impl TlsMode {
    /// Load the PEM material into a tonic config; `None` when disabled.
    pub fn to_server_tls_config(&self) -> Result<Option<ServerTlsConfig>, TlsConfigError> {
        let Self::Custom {
            cert_path,
            key_path,
            client_ca_path,
        } = self
        else {
            return Ok(None);
        };

        let identity = Identity::from_pem(
            read_pem(PemKind::Certificate, cert_path)?,
            read_pem(PemKind::PrivateKey, key_path)?,
        );
        let client_ca = client_ca_path
            .as_deref()
            .map(|path| read_pem(PemKind::ClientCa, path).map(Certificate::from_pem))
            .transpose()?;

        info!(
            cert = %cert_path.display(),
            mutual_tls = client_ca.is_some(),
            "TLS enabled"
        );

        let config = ServerTlsConfig::new().identity(identity);
        Ok(Some(match client_ca {
            Some(ca) => config.client_ca_root(ca),
            None => config,
        }))
    }

    pub const fn is_enabled(&self) -> bool {
        matches!(self, Self::Custom { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PemKind {
    Certificate,
    PrivateKey,
    ClientCa,
}

impl std::fmt::Display for PemKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Certificate => "certificate",
            Self::PrivateKey => "private key",
            Self::ClientCa => "client CA",
        })
    }
}

fn read_pem(kind: PemKind, path: &Path) -> Result<String, TlsConfigError> {
    std::fs::read_to_string(path).map_err(|source| TlsConfigError::FileRead {
        kind,
        path: path.to_path_buf(),
        source,
    })
}

#[derive(Debug, thiserror::Error)]
pub enum TlsConfigError {
    #[error("Failed to read TLS {kind} {}: {source}", path.display())]
    FileRead {
        kind: PemKind,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}
