use std::collections::HashMap;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use tokio::sync::RwLock;

use crate::config::{window_span, DueWindowConfig};
use crate::directory::model::{Course, LectureHall, Silence, Stream, Worker};
use crate::directory::{CourseStore, LectureHallStore, StreamStore, WorkerRegistry};
use crate::error::{DispatchError, Result};

/// Initial directory contents, as loaded from a JSON seed file.
#[derive(Debug, Default, Deserialize)]
pub struct Seed {
    #[serde(default)]
    pub courses: Vec<Course>,
    #[serde(default)]
    pub lecture_halls: Vec<LectureHall>,
    #[serde(default)]
    pub streams: Vec<Stream>,
    #[serde(default)]
    pub workers: Vec<Worker>,
}

#[derive(Debug, Default)]
struct Tables {
    courses: HashMap<u32, Course>,
    halls: HashMap<u32, LectureHall>,
    streams: HashMap<u32, Stream>,
    workers: HashMap<String, Worker>,
}

/// Directory kept entirely in memory.
#[derive(Debug)]
pub struct MemoryDirectory {
    tables: RwLock<Tables>,
    due: DueWindowConfig,
}

impl Default for MemoryDirectory {
    fn default() -> Self {
        Self::new(DueWindowConfig::default())
    }
}

impl MemoryDirectory {
    pub fn new(due: DueWindowConfig) -> Self {
        Self {
            tables: RwLock::new(Tables::default()),
            due,
        }
    }

    pub fn from_seed(seed: Seed, due: DueWindowConfig) -> Self {
        let tables = Tables {
            courses: seed.courses.into_iter().map(|c| (c.id, c)).collect(),
            halls: seed.lecture_halls.into_iter().map(|h| (h.id, h)).collect(),
            streams: seed.streams.into_iter().map(|s| (s.id, s)).collect(),
            workers: seed
                .workers
                .into_iter()
                .map(|w| (w.id.clone(), w))
                .collect(),
        };
        Self {
            tables: RwLock::new(tables),
            due,
        }
    }

    /// Load a directory from a JSON seed file.
    pub async fn load(path: &Path, due: DueWindowConfig) -> Result<Self> {
        let raw = tokio::fs::read(path).await.map_err(|e| {
            DispatchError::Storage(format!("failed to read {}: {}", path.display(), e))
        })?;
        let seed: Seed = serde_json::from_slice(&raw).map_err(|e| {
            DispatchError::Storage(format!("invalid seed {}: {}", path.display(), e))
        })?;
        tracing::info!(
            path = %path.display(),
            courses = seed.courses.len(),
            lecture_halls = seed.lecture_halls.len(),
            streams = seed.streams.len(),
            workers = seed.workers.len(),
            "Loaded directory seed"
        );
        Ok(Self::from_seed(seed, due))
    }

    pub async fn insert_course(&self, course: Course) {
        self.tables.write().await.courses.insert(course.id, course);
    }

    pub async fn insert_lecture_hall(&self, hall: LectureHall) {
        self.tables.write().await.halls.insert(hall.id, hall);
    }

    pub async fn insert_stream(&self, stream: Stream) {
        self.tables.write().await.streams.insert(stream.id, stream);
    }

    pub async fn insert_worker(&self, worker: Worker) {
        self.tables
            .write()
            .await
            .workers
            .insert(worker.id.clone(), worker);
    }

    fn is_due_stream(&self, stream: &Stream, now: DateTime<Utc>) -> bool {
        let opens = stream.start - window_span(self.due.stream_lead);
        let closes = opens + window_span(self.due.stream_window);
        !stream.premiere
            && !stream.live_now
            && stream.lecture_hall_id.is_some()
            && opens <= now
            && now < closes
    }

    fn is_due_premiere(&self, stream: &Stream, now: DateTime<Utc>) -> bool {
        let opens = stream.start - window_span(self.due.premiere_lead);
        stream.premiere && !stream.live_now && opens <= now && now < stream.start
    }

    async fn collect_due<F>(&self, keep: F) -> Vec<Stream>
    where
        F: Fn(&Stream) -> bool,
    {
        let tables = self.tables.read().await;
        let mut due: Vec<Stream> = tables
            .streams
            .values()
            .filter(|s| keep(s))
            .cloned()
            .collect();
        due.sort_by_key(|s| (s.start, s.id));
        due
    }
}

#[tonic::async_trait]
impl StreamStore for MemoryDirectory {
    async fn stream_by_id(&self, id: u32) -> Result<Stream> {
        self.tables
            .read()
            .await
            .streams
            .get(&id)
            .cloned()
            .ok_or(DispatchError::StreamNotFound(id))
    }

    async fn stream_by_key(&self, key: &str) -> Result<Stream> {
        if key.is_empty() {
            return Err(DispatchError::StreamKeyNotFound(String::new()));
        }
        self.tables
            .read()
            .await
            .streams
            .values()
            .find(|s| s.stream_key == key)
            .cloned()
            .ok_or_else(|| DispatchError::StreamKeyNotFound(key.to_string()))
    }

    async fn save_stream(&self, stream: &Stream) -> Result<()> {
        self.tables
            .write()
            .await
            .streams
            .insert(stream.id, stream.clone());
        Ok(())
    }

    async fn set_stream_not_live(&self, id: u32) -> Result<()> {
        let mut tables = self.tables.write().await;
        let stream = tables
            .streams
            .get_mut(&id)
            .ok_or(DispatchError::StreamNotFound(id))?;
        stream.live_now = false;
        Ok(())
    }

    async fn replace_silences(&self, id: u32, silences: Vec<Silence>) -> Result<()> {
        let mut tables = self.tables.write().await;
        let stream = tables
            .streams
            .get_mut(&id)
            .ok_or(DispatchError::StreamNotFound(id))?;
        stream.silences = silences;
        Ok(())
    }

    async fn due_streams(&self, now: DateTime<Utc>) -> Result<Vec<Stream>> {
        Ok(self.collect_due(|s| self.is_due_stream(s, now)).await)
    }

    async fn due_premieres(&self, now: DateTime<Utc>) -> Result<Vec<Stream>> {
        Ok(self.collect_due(|s| self.is_due_premiere(s, now)).await)
    }
}

#[tonic::async_trait]
impl CourseStore for MemoryDirectory {
    async fn course_by_id(&self, id: u32) -> Result<Course> {
        self.tables
            .read()
            .await
            .courses
            .get(&id)
            .cloned()
            .ok_or(DispatchError::CourseNotFound(id))
    }
}

#[tonic::async_trait]
impl LectureHallStore for MemoryDirectory {
    async fn lecture_hall_by_id(&self, id: u32) -> Result<LectureHall> {
        self.tables
            .read()
            .await
            .halls
            .get(&id)
            .cloned()
            .ok_or(DispatchError::LectureHallNotFound(id))
    }
}

#[tonic::async_trait]
impl WorkerRegistry for MemoryDirectory {
    async fn worker_by_id(&self, id: &str) -> Result<Worker> {
        self.tables
            .read()
            .await
            .workers
            .get(id)
            .cloned()
            .ok_or_else(|| DispatchError::Unauthenticated(id.to_string()))
    }

    async fn alive_workers(&self, now: DateTime<Utc>) -> Result<Vec<Worker>> {
        let threshold = window_span(self.due.alive_threshold);
        let tables = self.tables.read().await;
        let mut alive: Vec<Worker> = tables
            .workers
            .values()
            .filter(|w| now - w.last_seen < threshold)
            .cloned()
            .collect();
        // Registry order is stable so ties in workload resolve the same way every run.
        alive.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(alive)
    }

    async fn save_worker(&self, worker: &Worker) -> Result<()> {
        self.tables
            .write()
            .await
            .workers
            .insert(worker.id.clone(), worker.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn at(base: DateTime<Utc>, minutes: i64) -> DateTime<Utc> {
        base + Duration::minutes(minutes)
    }

    #[tokio::test]
    async fn due_streams_respect_lead_and_window() {
        let dir = MemoryDirectory::default();
        let now = Utc::now();
        // starts in 9 minutes: inside [start-10m, start-8m)
        dir.insert_stream(Stream::new(1, 1, at(now, 9), at(now, 90)).in_hall(1))
            .await;
        // starts in 30 minutes: not yet due
        dir.insert_stream(Stream::new(2, 1, at(now, 30), at(now, 90)).in_hall(1))
            .await;
        // starts in 5 minutes: window already closed
        dir.insert_stream(Stream::new(3, 1, at(now, 5), at(now, 90)).in_hall(1))
            .await;
        // due time but no lecture hall
        dir.insert_stream(Stream::new(4, 1, at(now, 9), at(now, 90)))
            .await;

        let due = dir.due_streams(now).await.unwrap();
        let ids: Vec<u32> = due.iter().map(|s| s.id).collect();
        assert_eq!(ids, vec![1]);
    }

    #[tokio::test]
    async fn live_streams_are_not_due() {
        let dir = MemoryDirectory::default();
        let now = Utc::now();
        let mut stream = Stream::new(1, 1, at(now, 9), at(now, 90)).in_hall(1);
        stream.live_now = true;
        dir.insert_stream(stream).await;

        assert!(dir.due_streams(now).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn due_premieres_only_before_start() {
        let dir = MemoryDirectory::default();
        let now = Utc::now();
        let soon = now + Duration::seconds(30);
        let later = now + Duration::minutes(10);
        dir.insert_stream(Stream::new(1, 1, soon, later).as_premiere("/v/a.mp4"))
            .await;
        dir.insert_stream(Stream::new(2, 1, later, later).as_premiere("/v/b.mp4"))
            .await;
        dir.insert_stream(Stream::new(3, 1, soon, later)).await;

        let due = dir.due_premieres(now).await.unwrap();
        let ids: Vec<u32> = due.iter().map(|s| s.id).collect();
        assert_eq!(ids, vec![1]);
    }

    #[tokio::test]
    async fn alive_workers_filter_by_last_seen() {
        let dir = MemoryDirectory::default();
        let now = Utc::now();
        let mut stale = Worker::new("b", "10.0.0.2", 0);
        stale.last_seen = now - Duration::minutes(6);
        dir.insert_worker(stale).await;
        dir.insert_worker(Worker::new("a", "10.0.0.1", 0)).await;

        let alive = dir.alive_workers(now).await.unwrap();
        assert_eq!(alive.len(), 1);
        assert_eq!(alive[0].id, "a");
    }

    #[tokio::test]
    async fn huge_windows_are_capped_instead_of_overflowing() {
        let due = DueWindowConfig {
            stream_lead: std::time::Duration::MAX,
            stream_window: std::time::Duration::MAX,
            premiere_lead: std::time::Duration::MAX,
            alive_threshold: std::time::Duration::MAX,
        };
        let dir = MemoryDirectory::new(due);
        let now = Utc::now();
        dir.insert_stream(Stream::new(1, 1, at(now, 9), at(now, 90)).in_hall(1))
            .await;
        dir.insert_stream(Stream::new(2, 1, at(now, 9), at(now, 90)).as_premiere("/v/a.mp4"))
            .await;
        let mut old = Worker::new("a", "10.0.0.1", 0);
        old.last_seen = now - Duration::days(30);
        dir.insert_worker(old).await;

        assert_eq!(dir.due_streams(now).await.unwrap().len(), 1);
        assert_eq!(dir.due_premieres(now).await.unwrap().len(), 1);
        assert_eq!(dir.alive_workers(now).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn unknown_worker_is_unauthenticated() {
        let dir = MemoryDirectory::default();
        let err = dir.worker_by_id("ghost").await.unwrap_err();
        assert!(matches!(err, DispatchError::Unauthenticated(id) if id == "ghost"));
    }

    #[tokio::test]
    async fn stream_by_key_ignores_empty_key() {
        let dir = MemoryDirectory::default();
        let now = Utc::now();
        dir.insert_stream(Stream::new(1, 1, now, now)).await;

        assert!(dir.stream_by_key("").await.is_err());
        dir.insert_stream(Stream::new(2, 1, now, now).with_key("k-2"))
            .await;
        assert_eq!(dir.stream_by_key("k-2").await.unwrap().id, 2);
    }

    #[tokio::test]
    async fn load_reads_seed_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        std::io::Write::write_all(
            &mut file,
            br#"{
                "courses": [{"id": 1, "slug": "gbs", "year": 2024, "term": "W"}],
                "lecture_halls": [{"id": 5, "name": "HS1", "combined_ip": "10.0.0.1"}],
                "streams": [{"id": 9, "course_id": 1, "lecture_hall_id": 5,
                             "start": "2024-01-01T10:00:00Z", "end": "2024-01-01T11:30:00Z"}]
            }"#,
        )
        .unwrap();

        let dir = MemoryDirectory::load(file.path(), DueWindowConfig::default())
            .await
            .unwrap();
        assert_eq!(dir.course_by_id(1).await.unwrap().slug, "gbs");
        assert_eq!(dir.lecture_hall_by_id(5).await.unwrap().name, "HS1");
        assert_eq!(dir.stream_by_id(9).await.unwrap().lecture_hall_id, Some(5));
    }

    #[tokio::test]
    async fn load_rejects_malformed_seed() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        std::io::Write::write_all(&mut file, b"{not json").unwrap();

        let err = MemoryDirectory::load(file.path(), DueWindowConfig::default())
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::Storage(_)));
    }
}
