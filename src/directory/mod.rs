//! Lookup and persistence of the records this service works on.
//!
//! Courses, lecture halls, streams and workers are owned by an external
//! directory. The dispatcher only reaches them through the traits below:
//!
//! - [`StreamStore`]: streams, their runtime state and the due-job queries
//! - [`CourseStore`] / [`LectureHallStore`]: read-only lookups
//! - [`WorkerRegistry`]: worker records and liveness
//!
//! [`MemoryDirectory`] implements all of them and backs the binary and tests.

pub mod memory;
pub mod model;

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::error::Result;

pub use memory::MemoryDirectory;
pub use model::{
    Course, LectureHall, Playlists, Silence, SourceType, Stream, StreamFile, Worker,
};

#[tonic::async_trait]
pub trait StreamStore: Send + Sync {
    async fn stream_by_id(&self, id: u32) -> Result<Stream>;

    async fn stream_by_key(&self, key: &str) -> Result<Stream>;

    async fn save_stream(&self, stream: &Stream) -> Result<()>;

    async fn set_stream_not_live(&self, id: u32) -> Result<()>;

    /// Replace every stored silence interval of a stream.
    async fn replace_silences(&self, id: u32, silences: Vec<Silence>) -> Result<()>;

    /// Lecture streams that must be handed to a worker now.
    async fn due_streams(&self, now: DateTime<Utc>) -> Result<Vec<Stream>>;

    /// Premieres that must be handed to a worker now.
    async fn due_premieres(&self, now: DateTime<Utc>) -> Result<Vec<Stream>>;
}

#[tonic::async_trait]
pub trait CourseStore: Send + Sync {
    async fn course_by_id(&self, id: u32) -> Result<Course>;
}

#[tonic::async_trait]
pub trait LectureHallStore: Send + Sync {
    async fn lecture_hall_by_id(&self, id: u32) -> Result<LectureHall>;
}

#[tonic::async_trait]
pub trait WorkerRegistry: Send + Sync {
    /// Resolves a worker identity. Unknown identities fail authentication.
    async fn worker_by_id(&self, id: &str) -> Result<Worker>;

    async fn alive_workers(&self, now: DateTime<Utc>) -> Result<Vec<Worker>>;

    async fn save_worker(&self, worker: &Worker) -> Result<()>;
}

/// Cloneable bundle of every directory collaborator.
#[derive(Clone)]
pub struct Directory {
    pub streams: Arc<dyn StreamStore>,
    pub courses: Arc<dyn CourseStore>,
    pub halls: Arc<dyn LectureHallStore>,
    pub workers: Arc<dyn WorkerRegistry>,
}

impl Directory {
    /// Serve every collaborator from one in-memory directory.
    pub fn from_memory(memory: Arc<MemoryDirectory>) -> Self {
        Self {
            streams: memory.clone(),
            courses: memory.clone(),
            halls: memory.clone(),
            workers: memory,
        }
    }
}
