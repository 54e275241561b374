use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One physical feed of a lecture hall.
///
/// Combined is the fallback: any wire label that is not explicitly a
/// presentation or camera feed is treated as the combined feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum SourceType {
    #[default]
    #[serde(rename = "COMB")]
    Combined,
    #[serde(rename = "PRES")]
    Presentation,
    #[serde(rename = "CAM")]
    Camera,
}

impl SourceType {
    /// Slot order of the feeds configured on a lecture hall.
    pub const ALL: [SourceType; 3] = [
        SourceType::Combined,
        SourceType::Presentation,
        SourceType::Camera,
    ];

    pub fn from_wire(label: &str) -> Self {
        match label {
            "PRES" => SourceType::Presentation,
            "CAM" => SourceType::Camera,
            _ => SourceType::Combined,
        }
    }

    pub fn as_wire(&self) -> &'static str {
        match self {
            SourceType::Combined => "COMB",
            SourceType::Presentation => "PRES",
            SourceType::Camera => "CAM",
        }
    }
}

impl std::fmt::Display for SourceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_wire())
    }
}

/// A capture worker as last reported to the registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Worker {
    pub id: String,
    pub host: String,
    pub workload: i64,
    pub last_seen: DateTime<Utc>,
    /// Free-text summary of the jobs the worker is running.
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub cpu: String,
    #[serde(default)]
    pub memory: String,
    #[serde(default)]
    pub disk: String,
    #[serde(default)]
    pub uptime: String,
    #[serde(default)]
    pub version: String,
}

impl Worker {
    pub fn new(id: impl Into<String>, host: impl Into<String>, workload: i64) -> Self {
        Self {
            id: id.into(),
            host: host.into(),
            workload,
            last_seen: Utc::now(),
            status: String::new(),
            cpu: String::new(),
            memory: String::new(),
            disk: String::new(),
            uptime: String::new(),
            version: String::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Course {
    pub id: u32,
    pub slug: String,
    pub year: u32,
    /// Teaching term, e.g. "W" or "S".
    pub term: String,
    #[serde(default)]
    pub live_enabled: bool,
    #[serde(default)]
    pub vod_enabled: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LectureHall {
    pub id: u32,
    pub name: String,
    #[serde(default)]
    pub combined_ip: String,
    #[serde(default)]
    pub presentation_ip: String,
    #[serde(default)]
    pub camera_ip: String,
    /// Address of the power strip switching the live light.
    #[serde(default)]
    pub power_ctrl_ip: String,
    #[serde(default)]
    pub live_light_index: u32,
}

impl LectureHall {
    /// Configured source address for a feed, if any.
    pub fn source(&self, source: SourceType) -> Option<&str> {
        let addr = match source {
            SourceType::Combined => &self.combined_ip,
            SourceType::Presentation => &self.presentation_ip,
            SourceType::Camera => &self.camera_ip,
        };
        if addr.is_empty() {
            None
        } else {
            Some(addr)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamFile {
    pub path: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Silence {
    pub start: u32,
    pub end: u32,
}

/// HLS playlist per feed; each slot holds the latest URL a worker reported.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Playlists {
    pub combined: Option<String>,
    pub presentation: Option<String>,
    pub camera: Option<String>,
}

impl Playlists {
    pub fn set(&mut self, source: SourceType, url: String) {
        match source {
            SourceType::Combined => self.combined = Some(url),
            SourceType::Presentation => self.presentation = Some(url),
            SourceType::Camera => self.camera = Some(url),
        }
    }

    pub fn get(&self, source: SourceType) -> Option<&str> {
        match source {
            SourceType::Combined => self.combined.as_deref(),
            SourceType::Presentation => self.presentation.as_deref(),
            SourceType::Camera => self.camera.as_deref(),
        }
    }
}

/// A scheduled stream (lecture or premiere) and its runtime state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stream {
    pub id: u32,
    pub course_id: u32,
    #[serde(default)]
    pub lecture_hall_id: Option<u32>,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    /// Key a self-streaming client publishes with.
    #[serde(default)]
    pub stream_key: String,
    #[serde(default)]
    pub premiere: bool,
    #[serde(default)]
    pub live_now: bool,
    #[serde(default)]
    pub recording: bool,
    #[serde(default)]
    pub playlists: Playlists,
    #[serde(default)]
    pub files: Vec<StreamFile>,
    #[serde(default)]
    pub silences: Vec<Silence>,
    /// Transcoding progress in percent, per variant.
    #[serde(default)]
    pub transcoding_progress: HashMap<SourceType, u32>,
}

impl Stream {
    pub fn new(id: u32, course_id: u32, start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self {
            id,
            course_id,
            lecture_hall_id: None,
            start,
            end,
            stream_key: String::new(),
            premiere: false,
            live_now: false,
            recording: false,
            playlists: Playlists::default(),
            files: Vec::new(),
            silences: Vec::new(),
            transcoding_progress: HashMap::new(),
        }
    }

    pub fn in_hall(mut self, hall_id: u32) -> Self {
        self.lecture_hall_id = Some(hall_id);
        self
    }

    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.stream_key = key.into();
        self
    }

    pub fn as_premiere(mut self, file_path: impl Into<String>) -> Self {
        self.premiere = true;
        self.files.push(StreamFile {
            path: file_path.into(),
        });
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn source_type_wire_labels() {
        assert_eq!(SourceType::from_wire("PRES"), SourceType::Presentation);
        assert_eq!(SourceType::from_wire("CAM"), SourceType::Camera);
        assert_eq!(SourceType::from_wire("COMB"), SourceType::Combined);
        assert_eq!(SourceType::from_wire(""), SourceType::Combined);
        assert_eq!(SourceType::from_wire("cam"), SourceType::Combined);
        assert_eq!(SourceType::Camera.to_string(), "CAM");
    }

    #[test]
    fn playlists_last_write_wins_per_source() {
        let mut playlists = Playlists::default();
        playlists.set(SourceType::Camera, "a.m3u8".to_string());
        playlists.set(SourceType::Camera, "b.m3u8".to_string());
        playlists.set(SourceType::Combined, "c.m3u8".to_string());

        assert_eq!(playlists.get(SourceType::Camera), Some("b.m3u8"));
        assert_eq!(playlists.get(SourceType::Combined), Some("c.m3u8"));
        assert_eq!(playlists.get(SourceType::Presentation), None);
    }

    #[test]
    fn lecture_hall_skips_unconfigured_sources() {
        let hall = LectureHall {
            id: 1,
            name: "HS1".to_string(),
            combined_ip: "10.0.0.1".to_string(),
            presentation_ip: String::new(),
            camera_ip: "10.0.0.3".to_string(),
            power_ctrl_ip: String::new(),
            live_light_index: 0,
        };
        assert_eq!(hall.source(SourceType::Combined), Some("10.0.0.1"));
        assert_eq!(hall.source(SourceType::Presentation), None);
        assert_eq!(hall.source(SourceType::Camera), Some("10.0.0.3"));
    }

    #[test]
    fn stream_deserializes_with_defaults() {
        let stream: Stream = serde_json::from_str(
            r#"{"id":3,"course_id":1,"start":"2024-01-01T10:00:00Z","end":"2024-01-01T11:30:00Z"}"#,
        )
        .unwrap();
        assert_eq!(stream.id, 3);
        assert!(!stream.live_now);
        assert!(stream.lecture_hall_id.is_none());
        assert!(stream.files.is_empty());
    }
}
