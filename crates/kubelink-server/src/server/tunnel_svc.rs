//! TunnelService gRPC implementation.

use std::pin::Pin;

use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tonic::{Request, Response, Status, Streaming};
use tracing::{info, instrument};

use kubelink_proto::v1::tunnel_service_server::TunnelService;
use kubelink_proto::v1::{AgentMessage, ControlMessage};

use crate::server::interceptor::extract_claims;
use crate::tunnel::TunnelServer;

type ControlStream =
    Pin<Box<dyn tokio_stream::Stream<Item = Result<ControlMessage, Status>> + Send>>;

pub struct TunnelServiceImpl {
    tunnels: TunnelServer,
}

impl TunnelServiceImpl {
    pub const fn new(tunnels: TunnelServer) -> Self {
        Self { tunnels }
    }
}

#[tonic::async_trait]
impl TunnelService for TunnelServiceImpl {
    type ConnectStream = ControlStream;

    #[instrument(skip(self, request), fields(rpc = "Connect"))]
    async fn connect(
        &self,
        request: Request<Streaming<AgentMessage>>,
    ) -> Result<Response<Self::ConnectStream>, Status> {
        let claims = extract_claims(&request)?.clone();
        info!(
            cluster_id = %claims.cluster_id,
            agent_id = %claims.agent_id,
            "Agent tunnel opened"
        );

        let inbound = request.into_inner();
        let (out_tx, out_rx) = mpsc::channel(self.tunnels.outbound_buffer().max(1));

        let tunnels = self.tunnels.clone();
        tokio::spawn(async move {
            tunnels.serve(&claims, inbound, out_tx).await;
        });

        Ok(Response::new(Box::pin(ReceiverStream::new(out_rx))))
    }
}
