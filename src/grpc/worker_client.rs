use std::time::Duration;

use tonic::transport::{Channel, Endpoint};

use crate::directory::Worker;
use crate::error::{DispatchError, Result};
use crate::proto::to_worker_client::ToWorkerClient;
use crate::proto::{PremiereRequest, StreamRequest};

/// Outbound assignment calls to a worker. `Ok(false)` is a negative acknowledgement.
#[tonic::async_trait]
pub trait WorkerDispatcher: Send + Sync {
    async fn request_stream(&self, worker: &Worker, request: StreamRequest) -> Result<bool>;

    async fn request_premiere(&self, worker: &Worker, request: PremiereRequest) -> Result<bool>;
}

/// Dials the worker's `ToWorker` service for every assignment.
#[derive(Debug, Clone)]
pub struct GrpcWorkerDispatcher {
    port: u16,
    dial_timeout: Duration,
}

impl GrpcWorkerDispatcher {
    pub fn new(port: u16, dial_timeout: Duration) -> Self {
        Self { port, dial_timeout }
    }

    async fn connect(&self, worker: &Worker) -> Result<ToWorkerClient<Channel>> {
        let uri = format!("http://{}:{}", worker.host, self.port);
        let endpoint = Endpoint::from_shared(uri.clone())
            .map_err(|e| DispatchError::InvalidArgument(format!("bad worker address {}: {}", uri, e)))?
            .connect_timeout(self.dial_timeout);

        // A dial that hangs past the timeout counts as a failed dial.
        let channel = tokio::time::timeout(self.dial_timeout, endpoint.connect())
            .await
            .map_err(|_| {
                DispatchError::Grpc(tonic::Status::deadline_exceeded(format!(
                    "dialing {} timed out",
                    uri
                )))
            })??;
        Ok(ToWorkerClient::new(channel))
    }
}

#[tonic::async_trait]
impl WorkerDispatcher for GrpcWorkerDispatcher {
    async fn request_stream(&self, worker: &Worker, request: StreamRequest) -> Result<bool> {
        let mut client = self.connect(worker).await?;
        let response = client.request_stream(request).await?;
        Ok(response.into_inner().ok)
    }

    async fn request_premiere(&self, worker: &Worker, request: PremiereRequest) -> Result<bool> {
        let mut client = self.connect(worker).await?;
        let response = client.request_premiere(request).await?;
        Ok(response.into_inner().ok)
    }
}
