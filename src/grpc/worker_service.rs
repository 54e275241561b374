use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tonic::{Request, Response, Status, Streaming};
use uuid::Uuid;

use crate::config::{window_span, DispatcherConfig};
use crate::directory::{Directory, Silence, SourceType, Stream, StreamFile, Worker};
use crate::error::{DispatchError, Result};
use crate::lights::HallLights;
use crate::notify::ViewerNotifier;
use crate::proto;
use crate::proto::from_worker_server::FromWorker;
use crate::proto::{
    HeartBeat, JoinWorkersRequest, JoinWorkersResponse, NotifyTranscodingProgressRequest,
    SelfStreamRequest, SelfStreamResponse, SilenceResults, StreamFinished, StreamStarted,
    TranscodingFinished, UploadFinished,
};

/// Whether a self-streaming client may publish `stream` at `now`.
///
/// Publishing is accepted from `tolerance` before the scheduled start until
/// `tolerance` after the scheduled end, both bounds exclusive.
pub fn within_publish_window(
    stream: &Stream,
    now: DateTime<Utc>,
    tolerance: chrono::Duration,
) -> bool {
    now > stream.start - tolerance && now < stream.end + tolerance
}

fn ok() -> Response<proto::Status> {
    Response::new(proto::Status { ok: true })
}

/// gRPC service receiving worker-originated events.
///
/// Every call first resolves the calling worker; an unknown worker fails the
/// call before anything is touched. Handlers that read, modify and save a
/// stream record hold `state_guard` for that read-modify-write. Light control
/// goes through [`HallLights`], which has its own guard.
pub struct WorkerEventService {
    directory: Directory,
    lights: HallLights,
    notifier: Arc<dyn ViewerNotifier>,
    state_guard: Arc<Mutex<()>>,
    self_stream_tolerance: chrono::Duration,
    join_token: Option<String>,
}

impl WorkerEventService {
    pub fn new(
        config: &DispatcherConfig,
        directory: Directory,
        lights: HallLights,
        notifier: Arc<dyn ViewerNotifier>,
    ) -> Self {
        Self {
            directory,
            lights,
            notifier,
            state_guard: Arc::new(Mutex::new(())),
            self_stream_tolerance: window_span(config.self_stream_tolerance),
            join_token: config.join_token.clone(),
        }
    }

    async fn authenticate(&self, worker_id: &str) -> Result<Worker> {
        self.directory
            .workers
            .worker_by_id(worker_id)
            .await
            .inspect_err(|e| tracing::warn!(worker_id, error = %e, "Rejected worker call"))
    }

    async fn record_progress(&self, update: &NotifyTranscodingProgressRequest) -> Result<()> {
        if update.progress > 100 {
            return Err(DispatchError::InvalidArgument(format!(
                "progress {} exceeds 100",
                update.progress
            )));
        }

        let _state = self.state_guard.lock().await;
        let mut stream = self.directory.streams.stream_by_id(update.stream_id).await?;
        stream
            .transcoding_progress
            .insert(SourceType::from_wire(&update.version), update.progress);
        self.directory.streams.save_stream(&stream).await
    }
}

#[tonic::async_trait]
impl FromWorker for WorkerEventService {
    async fn join_workers(
        &self,
        request: Request<JoinWorkersRequest>,
    ) -> std::result::Result<Response<JoinWorkersResponse>, Status> {
        let req = request.into_inner();

        let Some(expected) = self.join_token.as_deref() else {
            return Err(DispatchError::PermissionDenied("joining is disabled".to_string()).into());
        };
        if req.token != expected {
            tracing::warn!(hostname = %req.hostname, "Worker presented an invalid join token");
            return Err(DispatchError::PermissionDenied("invalid join token".to_string()).into());
        }
        if req.hostname.trim().is_empty() {
            return Err(DispatchError::InvalidArgument("hostname is required".to_string()).into());
        }

        let worker = Worker::new(Uuid::new_v4().to_string(), req.hostname, 0);
        self.directory.workers.save_worker(&worker).await?;
        tracing::info!(worker_id = %worker.id, host = %worker.host, "Worker joined");

        Ok(Response::new(JoinWorkersResponse {
            worker_id: worker.id,
        }))
    }

    async fn send_heart_beat(
        &self,
        request: Request<HeartBeat>,
    ) -> std::result::Result<Response<proto::Status>, Status> {
        let req = request.into_inner();
        let mut worker = self.authenticate(&req.worker_id).await?;

        worker.workload = i64::from(req.workload);
        worker.last_seen = Utc::now();
        worker.status = req.jobs.join(", ");
        worker.cpu = req.cpu;
        worker.memory = req.memory;
        worker.disk = req.disk;
        worker.uptime = req.uptime;
        worker.version = req.version;
        self.directory.workers.save_worker(&worker).await?;

        tracing::trace!(worker_id = %worker.id, workload = worker.workload, "Heartbeat");
        Ok(ok())
    }

    async fn notify_transcoding_progress(
        &self,
        request: Request<Streaming<NotifyTranscodingProgressRequest>>,
    ) -> std::result::Result<Response<proto::Status>, Status> {
        let mut updates = request.into_inner();
        let mut authenticated: Option<String> = None;

        while let Some(update) = updates.message().await? {
            if authenticated.as_deref() != Some(update.worker_id.as_str()) {
                self.authenticate(&update.worker_id).await?;
                authenticated = Some(update.worker_id.clone());
            }
            self.record_progress(&update).await?;
            tracing::debug!(
                stream_id = update.stream_id,
                version = %update.version,
                progress = update.progress,
                "Transcoding progress"
            );
        }

        Ok(ok())
    }

    async fn notify_transcoding_finished(
        &self,
        request: Request<TranscodingFinished>,
    ) -> std::result::Result<Response<proto::Status>, Status> {
        let req = request.into_inner();
        self.authenticate(&req.worker_id).await?;
        if req.file_path.is_empty() {
            return Err(DispatchError::InvalidArgument("file path is required".to_string()).into());
        }

        let _state = self.state_guard.lock().await;
        let mut stream = self.directory.streams.stream_by_id(req.stream_id).await?;
        stream.files.push(StreamFile {
            path: req.file_path,
        });
        stream
            .transcoding_progress
            .remove(&SourceType::from_wire(&req.source_type));
        self.directory.streams.save_stream(&stream).await.inspect_err(
            |e| tracing::error!(stream_id = stream.id, error = %e, "Can't save stream"),
        )?;

        tracing::info!(stream_id = stream.id, files = stream.files.len(), "Transcoding finished");
        Ok(ok())
    }

    async fn notify_silence_results(
        &self,
        request: Request<SilenceResults>,
    ) -> std::result::Result<Response<proto::Status>, Status> {
        let req = request.into_inner();
        self.authenticate(&req.worker_id).await?;
        self.directory.streams.stream_by_id(req.stream_id).await?;

        if req.starts.len() != req.ends.len() {
            return Err(DispatchError::InvalidArgument(format!(
                "{} silence starts but {} ends",
                req.starts.len(),
                req.ends.len()
            ))
            .into());
        }
        if req.starts.is_empty() {
            return Ok(ok());
        }

        let silences: Vec<Silence> = req
            .starts
            .iter()
            .zip(&req.ends)
            .map(|(&start, &end)| Silence { start, end })
            .collect();
        let count = silences.len();
        self.directory
            .streams
            .replace_silences(req.stream_id, silences)
            .await?;

        tracing::debug!(stream_id = req.stream_id, count, "Silences updated");
        Ok(ok())
    }

    async fn notify_stream_started(
        &self,
        request: Request<StreamStarted>,
    ) -> std::result::Result<Response<proto::Status>, Status> {
        let req = request.into_inner();
        self.authenticate(&req.worker_id).await?;

        let _state = self.state_guard.lock().await;
        let mut stream = self
            .directory
            .streams
            .stream_by_id(req.stream_id)
            .await
            .inspect_err(|e| tracing::warn!(stream_id = req.stream_id, error = %e, "Can't find stream to set live"))?;

        let source = SourceType::from_wire(&req.source_type);
        stream.live_now = true;
        stream.playlists.set(source, req.hls_url);
        self.directory.streams.save_stream(&stream).await.inspect_err(
            |e| tracing::error!(stream_id = stream.id, error = %e, "Can't save stream when setting live"),
        )?;

        if let Some(hall_id) = stream.lecture_hall_id {
            match self.directory.halls.lecture_hall_by_id(hall_id).await {
                Ok(hall) => {
                    self.lights.switch_on_in_background(hall);
                }
                Err(e) => {
                    tracing::error!(stream_id = stream.id, error = %e, "Can't get lecture hall to turn on light")
                }
            }
        }

        self.notifier.live_state_changed(stream.id, true);
        tracing::info!(stream_id = stream.id, worker_id = %req.worker_id, source = %source, "Stream started");
        Ok(ok())
    }

    async fn notify_stream_finished(
        &self,
        request: Request<StreamFinished>,
    ) -> std::result::Result<Response<proto::Status>, Status> {
        let req = request.into_inner();
        self.authenticate(&req.worker_id).await?;

        // Everything past authentication is best effort.
        match self.directory.streams.stream_by_id(req.stream_id).await {
            Ok(stream) => {
                if let Some(hall_id) = stream.lecture_hall_id {
                    match self.directory.halls.lecture_hall_by_id(hall_id).await {
                        Ok(hall) => self.lights.switch_off(&hall).await,
                        Err(e) => {
                            tracing::error!(stream_id = stream.id, error = %e, "Can't get lecture hall to turn off light")
                        }
                    }
                }
            }
            Err(e) => {
                tracing::error!(stream_id = req.stream_id, error = %e, "Can't find stream to set not live")
            }
        }

        {
            let _state = self.state_guard.lock().await;
            if let Err(e) = self
                .directory
                .streams
                .set_stream_not_live(req.stream_id)
                .await
            {
                tracing::error!(stream_id = req.stream_id, error = %e, "Can't set stream not live");
            }
        }

        self.notifier.live_state_changed(req.stream_id, false);
        tracing::info!(stream_id = req.stream_id, worker_id = %req.worker_id, "Stream finished");
        Ok(ok())
    }

    async fn notify_upload_finished(
        &self,
        request: Request<UploadFinished>,
    ) -> std::result::Result<Response<proto::Status>, Status> {
        let req = request.into_inner();
        self.authenticate(&req.worker_id).await?;

        let _state = self.state_guard.lock().await;
        let mut stream = self.directory.streams.stream_by_id(req.stream_id).await?;
        stream.recording = true;
        stream
            .playlists
            .set(SourceType::from_wire(&req.source_type), req.hls_url);
        self.directory.streams.save_stream(&stream).await?;

        tracing::info!(stream_id = stream.id, "Upload finished");
        Ok(ok())
    }

    async fn send_self_stream_request(
        &self,
        request: Request<SelfStreamRequest>,
    ) -> std::result::Result<Response<SelfStreamResponse>, Status> {
        let req = request.into_inner();
        self.authenticate(&req.worker_id).await?;

        let stream = self.directory.streams.stream_by_key(&req.stream_key).await?;
        if !within_publish_window(&stream, Utc::now(), self.self_stream_tolerance) {
            tracing::warn!(stream_id = stream.id, "Stream rejected, time out of bounds");
            return Err(DispatchError::OutsideWindow(stream.id).into());
        }

        let course = self
            .directory
            .courses
            .course_by_id(stream.course_id)
            .await
            .inspect_err(|e| tracing::warn!(stream_id = stream.id, error = %e, "Can't get course for self stream"))?;

        tracing::info!(stream_id = stream.id, course = %course.slug, "Self stream accepted");
        Ok(Response::new(SelfStreamResponse {
            stream_id: stream.id,
            course_slug: course.slug,
            course_term: course.term,
            course_year: course.year,
            stream_start_ms: stream.start.timestamp_millis(),
            upload_vod: course.vod_enabled,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn publish_window_bounds() {
        let start = Utc::now();
        let stream = Stream::new(1, 1, start, start + Duration::minutes(90));
        let tolerance = Duration::minutes(30);

        assert!(within_publish_window(&stream, start - Duration::minutes(29), tolerance));
        assert!(!within_publish_window(&stream, start - Duration::minutes(31), tolerance));
        assert!(within_publish_window(&stream, start + Duration::minutes(119), tolerance));
        assert!(!within_publish_window(&stream, start + Duration::minutes(121), tolerance));
    }

    #[test]
    fn huge_tolerance_is_capped() {
        let start = Utc::now() + Duration::days(100);
        let stream = Stream::new(1, 1, start, start);
        let tolerance = window_span(std::time::Duration::MAX);

        assert!(within_publish_window(&stream, Utc::now(), tolerance));
        assert!(!within_publish_window(&stream, start + Duration::days(400), tolerance));
    }

    #[test]
    fn publish_window_is_exclusive() {
        let start = Utc::now();
        let stream = Stream::new(1, 1, start, start);
        let tolerance = Duration::minutes(30);

        assert!(!within_publish_window(&stream, start - tolerance, tolerance));
        assert!(!within_publish_window(&stream, start + tolerance, tolerance));
    }
}
