
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::net::TcpListener;
use tokio_stream::wrappers::TcpListenerStream;
use tonic::transport::Server;
use tonic::{Code, Request, Response, Status};

use stream_dispatcher::directory::{MemoryDirectory, SourceType, StreamStore, Worker};
use stream_dispatcher::grpc::{GrpcWorkerDispatcher, WorkerDispatcher};
use stream_dispatcher::proto;
use stream_dispatcher::proto::from_worker_client::FromWorkerClient;
use stream_dispatcher::proto::from_worker_server::FromWorkerServer;
use stream_dispatcher::proto::to_worker_server::{ToWorker, ToWorkerServer};
use stream_dispatcher::proto::{NotifyTranscodingProgressRequest, PremiereRequest, StreamRequest};
use test_harness::{event_harness, EventHarness};

async fn ephemeral_listener() -> (TcpListener, SocketAddr) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    (listener, addr)
}

fn progress(worker_id: &str, version: &str, progress: u32) -> NotifyTranscodingProgressRequest {
    NotifyTranscodingProgressRequest {
        worker_id: worker_id.to_string(),
        stream_id: 10,
        version: version.to_string(),
        progress,
    }
}

// =============================================================================
// FromWorker over the wire
// =============================================================================

/// Serves the event service of a fresh [`event_harness`] and returns a client for it.
async fn serve_events() -> (
    Arc<MemoryDirectory>,
    FromWorkerClient<tonic::transport::Channel>,
) {
    let EventHarness {
        memory, service, ..
    } = event_harness().await;

    let (listener, addr) = ephemeral_listener().await;
    tokio::spawn(async move {
        Server::builder()
            .add_service(FromWorkerServer::new(service))
            .serve_with_incoming(TcpListenerStream::new(listener))
            .await
            .unwrap();
    });

    let client = FromWorkerClient::connect(format!("http://{addr}"))
        .await
        .unwrap();
    (memory, client)
}

#[tokio::test]
async fn test_transcoding_progress_stream_keeps_latest_per_variant() {
    let (memory, mut client) = serve_events().await;

    let updates = vec![
        progress("w1", "COMB", 20),
        progress("w1", "CAM", 50),
        progress("w1", "COMB", 70),
    ];
    let reply = client
        .notify_transcoding_progress(tokio_stream::iter(updates))
        .await
        .unwrap();
    assert!(reply.into_inner().ok);

    let stream = memory.stream_by_id(10).await.unwrap();
    assert_eq!(stream.transcoding_progress.get(&SourceType::Combined), Some(&70));
    assert_eq!(stream.transcoding_progress.get(&SourceType::Camera), Some(&50));
    assert_eq!(stream.transcoding_progress.get(&SourceType::Presentation), None);
}

#[tokio::test]
async fn test_transcoding_progress_above_hundred_is_rejected() {
    let (memory, mut client) = serve_events().await;

    let updates = vec![progress("w1", "COMB", 40), progress("w1", "COMB", 101)];
    let err = client
        .notify_transcoding_progress(tokio_stream::iter(updates))
        .await
        .unwrap_err();

    assert_eq!(err.code(), Code::InvalidArgument);
    let stream = memory.stream_by_id(10).await.unwrap();
    assert_eq!(stream.transcoding_progress.get(&SourceType::Combined), Some(&40));
}

#[tokio::test]
async fn test_transcoding_progress_from_unknown_worker_is_rejected() {
    let (memory, mut client) = serve_events().await;

    let err = client
        .notify_transcoding_progress(tokio_stream::iter(vec![progress("ghost", "COMB", 10)]))
        .await
        .unwrap_err();

    assert_eq!(err.code(), Code::Unauthenticated);
    assert!(memory
        .stream_by_id(10)
        .await
        .unwrap()
        .transcoding_progress
        .is_empty());
}

#[tokio::test]
async fn test_unary_errors_keep_their_code_over_the_wire() {
    let (_memory, mut client) = serve_events().await;

    let err = client
        .notify_stream_started(proto::StreamStarted {
            worker_id: "w1".to_string(),
            stream_id: 404,
            hls_url: "https://live.example/404.m3u8".to_string(),
            source_type: "COMB".to_string(),
        })
        .await
        .unwrap_err();

    assert_eq!(err.code(), Code::NotFound);
    assert_eq!(err.message(), "Stream not found: 404");
}

// =============================================================================
// ToWorker client
// =============================================================================

#[derive(Clone, Default)]
struct FakeWorker {
    accept: bool,
    received: Arc<Mutex<Vec<String>>>,
}

#[tonic::async_trait]
impl ToWorker for FakeWorker {
    async fn request_stream(
        &self,
        request: Request<StreamRequest>,
    ) -> Result<Response<proto::Status>, Status> {
        let req = request.into_inner();
        self.received
            .lock()
            .unwrap()
            .push(format!("stream {} {}", req.stream_id, req.source_type));
        Ok(Response::new(proto::Status { ok: self.accept }))
    }

    async fn request_premiere(
        &self,
        request: Request<PremiereRequest>,
    ) -> Result<Response<proto::Status>, Status> {
        let req = request.into_inner();
        self.received
            .lock()
            .unwrap()
            .push(format!("premiere {} {}", req.stream_id, req.file_path));
        Ok(Response::new(proto::Status { ok: self.accept }))
    }
}

async fn serve_worker(worker: FakeWorker) -> u16 {
    let (listener, addr) = ephemeral_listener().await;
    tokio::spawn(async move {
        Server::builder()
            .add_service(ToWorkerServer::new(worker))
            .serve_with_incoming(TcpListenerStream::new(listener))
            .await
            .unwrap();
    });
    addr.port()
}

fn local_worker() -> Worker {
    Worker::new("w1", "127.0.0.1", 0)
}

#[tokio::test]
async fn test_dispatcher_returns_worker_acknowledgement() {
    let accepting = FakeWorker {
        accept: true,
        ..Default::default()
    };
    let received = accepting.received.clone();
    let port = serve_worker(accepting).await;
    let dispatcher = GrpcWorkerDispatcher::new(port, Duration::from_secs(2));

    let ok = dispatcher
        .request_stream(
            &local_worker(),
            StreamRequest {
                stream_id: 5,
                source_type: "CAM".to_string(),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert!(ok);

    let ok = dispatcher
        .request_premiere(
            &local_worker(),
            PremiereRequest {
                stream_id: 6,
                file_path: "/srv/vod/6.mp4".to_string(),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert!(ok);

    assert_eq!(
        received.lock().unwrap().clone(),
        vec!["stream 5 CAM".to_string(), "premiere 6 /srv/vod/6.mp4".to_string()]
    );
}

#[tokio::test]
async fn test_dispatcher_reports_refusal_as_false() {
    let port = serve_worker(FakeWorker::default()).await;
    let dispatcher = GrpcWorkerDispatcher::new(port, Duration::from_secs(2));

    let ok = dispatcher
        .request_premiere(&local_worker(), PremiereRequest::default())
        .await
        .unwrap();

    assert!(!ok);
}

#[tokio::test]
async fn test_dispatcher_fails_when_worker_is_unreachable() {
    let (listener, addr) = ephemeral_listener().await;
    drop(listener);
    let dispatcher = GrpcWorkerDispatcher::new(addr.port(), Duration::from_secs(2));

    let result = dispatcher
        .request_stream(&local_worker(), StreamRequest::default())
        .await;

    assert!(result.is_err());
}
