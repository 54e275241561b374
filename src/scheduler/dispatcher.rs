use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::directory::{Course, Directory, LectureHall, SourceType, Stream, Worker};
use crate::error::DispatchError;
use crate::grpc::worker_client::WorkerDispatcher;
use crate::notify::ErrorReporter;
use crate::proto::{PremiereRequest, StreamRequest};
use crate::scheduler::selector::least_loaded;

/// Workload added to a worker as soon as a job is sent its way, so the next
/// job of the same run prefers someone else.
pub const SPECULATIVE_WORKLOAD: i64 = 3;

/// Workload taken back when an assignment fails. Only part of
/// [`SPECULATIVE_WORKLOAD`] is returned: a worker that just failed stays
/// penalized for the rest of the run.
pub const FAILED_DISPATCH_BACKOFF: i64 = 1;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Assignment {
    pub job_id: Uuid,
    pub stream_id: u32,
    /// Feed being captured; `None` for premieres.
    pub source: Option<SourceType>,
    pub worker_id: String,
}

/// Outcome of dispatching one kind of job in one run.
#[derive(Debug, Default)]
pub struct BatchReport {
    pub assigned: Vec<Assignment>,
    pub failed: Vec<Assignment>,
    /// Jobs dropped before any worker was picked (broken references, no file).
    pub skipped: usize,
    /// In-memory workload of every alive worker once the batch finished.
    pub workloads: Vec<(String, i64)>,
}

impl BatchReport {
    pub fn workload_of(&self, worker_id: &str) -> Option<i64> {
        self.workloads
            .iter()
            .find(|(id, _)| id == worker_id)
            .map(|(_, load)| *load)
    }

    fn record_workloads(&mut self, workers: &[Worker]) {
        self.workloads = workers.iter().map(|w| (w.id.clone(), w.workload)).collect();
    }
}

#[derive(Debug, Default)]
pub struct DispatchReport {
    pub premieres: BatchReport,
    pub streams: BatchReport,
}

enum Job {
    Stream(StreamRequest),
    Premiere(PremiereRequest),
}

impl Job {
    fn stream_id(&self) -> u32 {
        match self {
            Job::Stream(req) => req.stream_id,
            Job::Premiere(req) => req.stream_id,
        }
    }

    fn source(&self) -> Option<SourceType> {
        match self {
            Job::Stream(req) => Some(SourceType::from_wire(&req.source_type)),
            Job::Premiere(_) => None,
        }
    }
}

/// Periodically hands due streams and premieres to the least loaded workers.
///
/// A run is strictly sequential. Workload bookkeeping lives in the worker
/// list fetched at the start of each batch and is thrown away afterwards;
/// workers report their real load through heartbeats. Failures are reported
/// and skipped: a job that is still due is simply found again next run.
pub struct DispatchScheduler {
    directory: Directory,
    dispatcher: Arc<dyn WorkerDispatcher>,
    reporter: Arc<dyn ErrorReporter>,
}

impl DispatchScheduler {
    pub fn new(
        directory: Directory,
        dispatcher: Arc<dyn WorkerDispatcher>,
        reporter: Arc<dyn ErrorReporter>,
    ) -> Self {
        Self {
            directory,
            dispatcher,
            reporter,
        }
    }

    /// Run the dispatch loop until `shutdown` is cancelled.
    ///
    /// A zero period never ticks; the loop refuses to start.
    pub async fn run(&self, every: Duration, shutdown: CancellationToken) {
        if every.is_zero() {
            tracing::error!("Dispatch interval is zero, dispatch loop not started");
            return;
        }
        let mut interval = tokio::time::interval(every);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    tracing::info!("Dispatch loop stopped");
                    break;
                }
                _ = interval.tick() => {
                    let report = self.run_once(Utc::now()).await;
                    tracing::debug!(
                        premieres_assigned = report.premieres.assigned.len(),
                        premieres_failed = report.premieres.failed.len(),
                        streams_assigned = report.streams.assigned.len(),
                        streams_failed = report.streams.failed.len(),
                        "Dispatch run finished"
                    );
                }
            }
        }
    }

    /// One dispatch run: premieres first, then lecture streams.
    pub async fn run_once(&self, now: DateTime<Utc>) -> DispatchReport {
        DispatchReport {
            premieres: self.dispatch_premieres(now).await,
            streams: self.dispatch_streams(now).await,
        }
    }

    pub async fn dispatch_premieres(&self, now: DateTime<Utc>) -> BatchReport {
        let mut report = BatchReport::default();

        let premieres = match self.directory.streams.due_premieres(now).await {
            Ok(premieres) => premieres,
            Err(e) => {
                self.reporter.report(&e);
                return report;
            }
        };
        let Some(mut workers) = self.alive_workers(now, !premieres.is_empty(), "premieres").await
        else {
            return report;
        };

        for premiere in &premieres {
            let Some(file) = premiere.files.first() else {
                tracing::warn!(stream_id = premiere.id, "Due premiere has no file, skipping");
                report.skipped += 1;
                continue;
            };
            let job = Job::Premiere(PremiereRequest {
                job_id: String::new(),
                worker_id: String::new(),
                stream_id: premiere.id,
                file_path: file.path.clone(),
            });
            self.assign(&mut workers, job, &mut report).await;
        }

        report.record_workloads(&workers);
        report
    }

    pub async fn dispatch_streams(&self, now: DateTime<Utc>) -> BatchReport {
        let mut report = BatchReport::default();

        let streams = match self.directory.streams.due_streams(now).await {
            Ok(streams) => streams,
            Err(e) => {
                self.reporter.report(&e);
                return report;
            }
        };
        let Some(mut workers) = self.alive_workers(now, !streams.is_empty(), "streams").await
        else {
            return report;
        };

        for stream in &streams {
            let Some((course, hall)) = self.resolve(stream).await else {
                report.skipped += 1;
                continue;
            };

            // One assignment per configured feed; feeds of one stream may land
            // on different workers.
            for source in SourceType::ALL {
                let Some(source_url) = hall.source(source) else {
                    continue;
                };
                let job = Job::Stream(stream_request(stream, &course, source, source_url));
                self.assign(&mut workers, job, &mut report).await;
            }
        }

        report.record_workloads(&workers);
        report
    }

    /// Alive workers for a batch, or `None` when the batch must be skipped.
    async fn alive_workers(
        &self,
        now: DateTime<Utc>,
        has_jobs: bool,
        batch: &'static str,
    ) -> Option<Vec<Worker>> {
        if !has_jobs {
            return None;
        }
        let workers = match self.directory.workers.alive_workers(now).await {
            Ok(workers) => workers,
            Err(e) => {
                self.reporter.report(&e);
                return None;
            }
        };
        if workers.is_empty() {
            self.reporter
                .report(&DispatchError::NoWorkersAvailable(batch));
            return None;
        }
        Some(workers)
    }

    async fn resolve(&self, stream: &Stream) -> Option<(Course, LectureHall)> {
        let course = match self.directory.courses.course_by_id(stream.course_id).await {
            Ok(course) => course,
            Err(e) => {
                tracing::warn!(stream_id = stream.id, error = %e, "Can't get course for stream, skipping");
                self.reporter.report(&e);
                return None;
            }
        };
        let Some(hall_id) = stream.lecture_hall_id else {
            tracing::warn!(stream_id = stream.id, "Due stream has no lecture hall, skipping");
            return None;
        };
        match self.directory.halls.lecture_hall_by_id(hall_id).await {
            Ok(hall) => Some((course, hall)),
            Err(e) => {
                tracing::warn!(stream_id = stream.id, error = %e, "Can't get lecture hall for stream, skipping");
                self.reporter.report(&e);
                None
            }
        }
    }

    async fn assign(&self, workers: &mut [Worker], job: Job, report: &mut BatchReport) {
        let index = least_loaded(workers);
        workers[index].workload += SPECULATIVE_WORKLOAD;

        let worker = &workers[index];
        let assignment = Assignment {
            job_id: Uuid::new_v4(),
            stream_id: job.stream_id(),
            source: job.source(),
            worker_id: worker.id.clone(),
        };

        let result = match job {
            Job::Stream(mut req) => {
                req.job_id = assignment.job_id.to_string();
                req.worker_id = worker.id.clone();
                self.dispatcher.request_stream(worker, req).await
            }
            Job::Premiere(mut req) => {
                req.job_id = assignment.job_id.to_string();
                req.worker_id = worker.id.clone();
                self.dispatcher.request_premiere(worker, req).await
            }
        };

        let failure = match result {
            Ok(true) => None,
            Ok(false) => Some(DispatchError::Rejected {
                worker_id: assignment.worker_id.clone(),
                stream_id: assignment.stream_id,
            }),
            Err(e) => Some(e),
        };

        match failure {
            None => {
                tracing::info!(
                    job_id = %assignment.job_id,
                    stream_id = assignment.stream_id,
                    source = ?assignment.source,
                    worker_id = %assignment.worker_id,
                    "Job assigned"
                );
                report.assigned.push(assignment);
            }
            Some(e) => {
                tracing::warn!(
                    stream_id = assignment.stream_id,
                    worker_id = %assignment.worker_id,
                    error = %e,
                    "Could not assign job"
                );
                self.reporter.report(&e);
                workers[index].workload -= FAILED_DISPATCH_BACKOFF;
                report.failed.push(assignment);
            }
        }
    }
}

fn stream_request(
    stream: &Stream,
    course: &Course,
    source: SourceType,
    source_url: &str,
) -> StreamRequest {
    StreamRequest {
        job_id: String::new(),
        worker_id: String::new(),
        stream_id: stream.id,
        source_type: source.as_wire().to_string(),
        source_url: source_url.to_string(),
        course_slug: course.slug.clone(),
        course_term: course.term.clone(),
        course_year: course.year,
        start_ms: stream.start.timestamp_millis(),
        end_ms: stream.end.timestamp_millis(),
        publish_stream: course.live_enabled,
        publish_vod: course.vod_enabled,
    }
}
