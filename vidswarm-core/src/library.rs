//! Video library: content-derived ids, per-video metadata and the in-memory catalogue.

use std::collections::HashMap;
use std::io::{self, Read};
use std::path::PathBuf;
use std::time::SystemTime;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::protocol::{PeerAddr, VideoSummary};

/// Only this many leading bytes of a file contribute to its id.
pub const VIDEO_ID_PREFIX_LEN: usize = 1024 * 1024; // 1 MiB

/// Digest bytes kept in an id (rendered as twice as many hex characters).
const VIDEO_ID_BYTES: usize = 16;

/// Derive a video id from the leading bytes of a file. Bytes past
/// [`VIDEO_ID_PREFIX_LEN`] are ignored, so files sharing their first MiB collide.
pub fn video_id_from_prefix(prefix: &[u8]) -> String {
    let prefix = &prefix[..prefix.len().min(VIDEO_ID_PREFIX_LEN)];
    let digest = Sha256::digest(prefix);
    hex::encode(&digest[..VIDEO_ID_BYTES])
}

/// Read at most [`VIDEO_ID_PREFIX_LEN`] bytes from `reader` and derive the id.
pub fn video_id_from_reader<R: Read>(reader: R) -> io::Result<String> {
    let mut prefix = Vec::with_capacity(VIDEO_ID_PREFIX_LEN);
    reader
        .take(VIDEO_ID_PREFIX_LEN as u64)
        .read_to_end(&mut prefix)?;
    Ok(video_id_from_prefix(&prefix))
}

/// Where a library entry came from.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum VideoSource {
    #[default]
    Local,
    Downloaded { from: PeerAddr },
}

/// A video held by this node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoMetadata {
    pub video_id: String,
    pub name: String,
    pub description: String,
    pub size_bytes: u64,
    pub local_path: PathBuf,
    pub added_at: SystemTime,
    #[serde(default)]
    pub source: VideoSource,
}

impl VideoMetadata {
    pub fn summary(&self) -> VideoSummary {
        VideoSummary {
            id: self.video_id.clone(),
            name: self.name.clone(),
            description: self.description.clone(),
            size: self.size_bytes,
        }
    }
}

/// In-memory catalogue keyed by video id. Callers guard it with a mutex.
#[derive(Debug, Default)]
pub struct VideoLibrary {
    videos: HashMap<String, VideoMetadata>,
}

impl VideoLibrary {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the entry for `meta.video_id`. Returns the replaced entry.
    pub fn insert(&mut self, meta: VideoMetadata) -> Option<VideoMetadata> {
        self.videos.insert(meta.video_id.clone(), meta)
    }

    pub fn get(&self, video_id: &str) -> Option<&VideoMetadata> {
        self.videos.get(video_id)
    }

    pub fn contains(&self, video_id: &str) -> bool {
        self.videos.contains_key(video_id)
    }

    pub fn remove(&mut self, video_id: &str) -> Option<VideoMetadata> {
        self.videos.remove(video_id)
    }

    /// Change display name and description. Returns false if the id is unknown.
    pub fn update_details(&mut self, video_id: &str, name: &str, description: &str) -> bool {
        match self.videos.get_mut(video_id) {
            Some(meta) => {
                meta.name = name.to_string();
                meta.description = description.to_string();
                true
            }
            None => false,
        }
    }

    /// Wire summaries of every entry, ordered by id.
    pub fn summaries(&self) -> Vec<VideoSummary> {
        let mut out: Vec<VideoSummary> = self.videos.values().map(VideoMetadata::summary).collect();
        out.sort_by(|a, b| a.id.cmp(&b.id));
        out
    }

    /// Cloned entries, ordered by id.
    pub fn entries(&self) -> Vec<VideoMetadata> {
        let mut out: Vec<VideoMetadata> = self.videos.values().cloned().collect();
        out.sort_by(|a, b| a.video_id.cmp(&b.video_id));
        out
    }

    pub fn len(&self) -> usize {
        self.videos.len()
    }

    pub fn is_empty(&self) -> bool {
        self.videos.is_empty()
    }
}
