//! kubelink control plane server
//!
//! Accepts agent registrations and tunnels, and routes cluster calls
//! through them.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tonic::transport::Server;
use tracing::{debug, info, warn};

use kubelink_proto::v1::agent_token_service_server::AgentTokenServiceServer;
use kubelink_proto::v1::cluster_service_server::ClusterServiceServer;
use kubelink_proto::v1::registration_service_server::RegistrationServiceServer;
use kubelink_proto::v1::tunnel_service_server::TunnelServiceServer;

use kubelink_core::db::unix_timestamp;
use kubelink_core::tracing_init::init_tracing;
use kubelink_server::auth::{CredentialIssuer, CredentialManager};
use kubelink_server::config::ServerConfig;
use kubelink_server::events::EventBroadcaster;
use kubelink_server::registry::ConnectionRegistry;
use kubelink_server::router::{ClusterRouter, DirectEndpoint, RequestCorrelator};
use kubelink_server::server::{
    AgentTokenServiceImpl, ClusterServiceImpl, RegistrationServiceImpl, TunnelServiceImpl,
    admin_interceptor, agent_interceptor,
};
use kubelink_server::storage::{ClusterConnectionType, ServerDatabase};
use kubelink_server::tunnel::TunnelServer;

#[derive(Parser, Debug)]
#[command(name = "kubelink-server")]
#[command(
    version,
    about = "kubelink control plane - agent registration, tunnels and cluster routing"
)]
struct Args {
    /// Path to a TOML config file. Flags override values from the file.
    #[arg(long, env = "KUBELINK_CONFIG")]
    config: Option<PathBuf>,

    /// Address to listen on.
    #[arg(long)]
    addr: Option<SocketAddr>,

    /// Path to SQLite database file.
    #[arg(long)]
    db_path: Option<PathBuf>,

    /// HMAC secret for agent credentials.
    #[arg(long, env = "KUBELINK_SIGNING_SECRET", hide_env_values = true)]
    signing_secret: Option<String>,

    /// Static bearer token for the admin services.
    #[arg(long, env = "KUBELINK_ADMIN_TOKEN", hide_env_values = true)]
    admin_token: Option<String>,

    /// Seconds between heartbeat pings on each tunnel.
    #[arg(long)]
    heartbeat_interval: Option<u64>,

    /// Registration token TTL in seconds.
    #[arg(long)]
    token_ttl: Option<i64>,

    /// Agent credential TTL in seconds.
    #[arg(long)]
    credential_ttl: Option<i64>,

    /// Path to TLS certificate file (PEM).
    #[arg(long, requires = "tls_key")]
    tls_cert: Option<PathBuf>,

    /// Path to TLS private key file (PEM).
    #[arg(long, requires = "tls_cert")]
    tls_key: Option<PathBuf>,

    /// CA for verifying client certificates (enables mutual TLS).
    #[arg(long, requires = "tls_cert")]
    tls_client_ca: Option<PathBuf>,

    /// Output logs as JSON (for structured log aggregation).
    #[arg(long)]
    log_json: bool,
}

impl Args {
    fn apply(self, config: &mut ServerConfig) {
        if let Some(addr) = self.addr {
            config.addr = addr;
        }
        if self.db_path.is_some() {
            config.db_path = self.db_path;
        }
        if let Some(secret) = self.signing_secret {
            config.signing_secret = secret;
        }
        if self.admin_token.is_some() {
            config.admin_token = self.admin_token;
        }
        if let Some(secs) = self.heartbeat_interval {
            config.heartbeat_interval_secs = secs;
        }
        if let Some(secs) = self.token_ttl {
            config.registration_token_ttl_secs = secs;
        }
        if let Some(secs) = self.credential_ttl {
            config.credential_ttl_secs = secs;
        }
        if self.tls_cert.is_some() {
            config.tls.cert = self.tls_cert;
            config.tls.key = self.tls_key;
        }
        if self.tls_client_ca.is_some() {
            config.tls.client_ca = self.tls_client_ca;
        }
        config.log_json |= self.log_json;
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => ServerConfig::load(path)?,
        None => ServerConfig::default(),
    };
    args.apply(&mut config);

    init_tracing("kubelink_server=info", config.log_json)?;
    config.validate()?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        addr = %config.addr,
        "Starting kubelink-server"
    );

    let db_path = config.resolved_db_path()?;
    info!(path = %db_path.display(), "Opening server database");
    let db = ServerDatabase::open(&db_path).await?;

    let credentials = Arc::new(CredentialManager::new(
        config.signing_secret.as_bytes(),
        config.credential_ttl_secs,
    ));
    let issuer = CredentialIssuer::new(
        db.clone(),
        Arc::clone(&credentials),
        config.registration_token_ttl_secs,
    );

    let registry = Arc::new(ConnectionRegistry::new());
    let events = EventBroadcaster::new(config.event_capacity);
    let tunnels = TunnelServer::new(Arc::clone(&registry), db.clone(), Arc::new(events.clone()))
        .with_heartbeat_interval(config.heartbeat_interval())
        .with_outbound_buffer(config.outbound_buffer);

    let router: ClusterRouter<DirectEndpoint> =
        ClusterRouter::new(RequestCorrelator::new(Arc::clone(&registry)));
    for cluster in db
        .list_clusters_by_type(ClusterConnectionType::Kubeconfig)
        .await?
    {
        router
            .add_direct_client(
                cluster.id.clone(),
                DirectEndpoint {
                    cluster_id: cluster.id,
                    name: cluster.name,
                },
            )
            .await;
    }

    // Build services
    let registration = RegistrationServiceImpl::new(issuer.clone());
    let tunnel = TunnelServiceImpl::new(tunnels);
    let agent_check = agent_interceptor(Arc::clone(&credentials));

    let admin_services = config.admin_token.as_deref().map(|token| {
        let admin_check = admin_interceptor(Arc::from(token));
        (
            AgentTokenServiceServer::with_interceptor(
                AgentTokenServiceImpl::new(issuer.clone(), db.clone()),
                admin_check.clone(),
            ),
            ClusterServiceServer::with_interceptor(
                ClusterServiceImpl::new(db.clone(), router.clone()),
                admin_check,
            ),
        )
    });
    if admin_services.is_none() {
        warn!("No admin token configured; AgentTokenService and ClusterService are disabled");
    }
    let (token_service, cluster_service) = admin_services.unzip();

    let (health_reporter, health_service) = tonic_health::server::health_reporter();
    health_reporter
        .set_serving::<TunnelServiceServer<TunnelServiceImpl>>()
        .await;
    health_reporter
        .set_serving::<RegistrationServiceServer<RegistrationServiceImpl>>()
        .await;

    let tls_config = config.tls_mode()?.to_server_tls_config()?;

    let mut builder = Server::builder()
        .http2_keepalive_interval(Some(Duration::from_secs(30)))
        .http2_keepalive_timeout(Some(Duration::from_secs(10)));
    if let Some(tls) = tls_config {
        builder = builder.tls_config(tls)?;
        info!(addr = %config.addr, "Server starting with TLS");
    } else {
        info!(addr = %config.addr, "Server starting (plaintext)");
    }

    // Spawn background task to purge expired registration tokens
    let cleanup_db = db.clone();
    let cleanup_interval = config.token_cleanup_interval();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(cleanup_interval);
        interval.tick().await; // Skip first immediate tick
        loop {
            interval.tick().await;
            match cleanup_db
                .delete_expired_registration_tokens(unix_timestamp())
                .await
            {
                Ok(removed) if removed > 0 => {
                    info!(removed, "Expired registration tokens purged");
                }
                Err(e) => {
                    warn!(error = %e, "Registration token cleanup failed");
                }
                _ => {}
            }
        }
    });

    // Trace watch traffic; consumers subscribe to the same broadcast.
    let mut watch_events = events.subscribe();
    tokio::spawn(async move {
        loop {
            match watch_events.recv().await {
                Ok(event) => debug!(
                    cluster_id = %event.cluster_id,
                    resource = %event.resource,
                    event_type = %event.event.event_type,
                    "Watch event"
                ),
                Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Watch event log lagging");
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    let grpc_router = builder
        .add_service(health_service)
        .add_service(RegistrationServiceServer::new(registration))
        .add_service(TunnelServiceServer::with_interceptor(tunnel, agent_check))
        .add_optional_service(token_service)
        .add_optional_service(cluster_service);

    tokio::select! {
        result = grpc_router.serve(config.addr) => {
            result?;
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
        }
    }

    db.close().await;
    info!("Server stopped");
    Ok(())
}
