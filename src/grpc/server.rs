use std::net::SocketAddr;

use tokio_util::sync::CancellationToken;
use tonic::transport::Server;

use crate::grpc::worker_service::WorkerEventService;
use crate::proto::from_worker_server::FromWorkerServer;

/// Serves the worker-facing `FromWorker` service.
pub struct GrpcServer {
    addr: SocketAddr,
    service: WorkerEventService,
}

impl GrpcServer {
    pub fn new(addr: SocketAddr, service: WorkerEventService) -> Self {
        Self { addr, service }
    }

    /// Serve until `shutdown` is cancelled. In-flight calls are allowed to finish.
    pub async fn run(self, shutdown: CancellationToken) -> Result<(), tonic::transport::Error> {
        tracing::info!(addr = %self.addr, "Starting worker gRPC server");

        Server::builder()
            .add_service(FromWorkerServer::new(self.service))
            .serve_with_shutdown(self.addr, shutdown.cancelled_owned())
            .await
    }
}
