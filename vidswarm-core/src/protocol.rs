//! vidswarm wire protocol: tracker and peer message types.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::library::VideoMetadata;

/// Default tracker listen port.
pub const DEFAULT_TRACKER_PORT: u16 = 6000;

/// Bytes a requester sends after a successful download header to start the stream.
pub const DOWNLOAD_ACK: &[u8; 3] = b"ACK";

/// Size of each raw file slice written during a download.
pub const CHUNK_SIZE: usize = 8 * 1024;

/// Requests a peer sends to the tracker. Encoded as JSON with a `type` tag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TrackerRequest {
    Register {
        peer_id: String,
        host: String,
        port: u16,
    },
    Unregister {
        peer_id: String,
    },
    GetPeers,
    AnnounceVideo {
        peer_id: String,
        video_id: String,
    },
    FindVideo {
        video_id: String,
    },
    Heartbeat {
        peer_id: String,
    },
}

/// Requests one peer sends to another.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PeerRequest {
    ListVideos,
    GetVideoInfo { video_id: String },
    DownloadVideo { video_id: String },
}

/// Outcome carried in every response's `status` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Success,
    Error,
    NotFound,
}

/// A peer's contact address.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PeerAddr {
    pub host: String,
    pub port: u16,
}

impl PeerAddr {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for PeerAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Registered peer as reported by GET_PEERS and FIND_VIDEO.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerInfo {
    pub peer_id: String,
    pub host: String,
    pub port: u16,
}

impl PeerInfo {
    pub fn addr(&self) -> PeerAddr {
        PeerAddr::new(self.host.clone(), self.port)
    }
}

/// Tracker reply. Only the fields relevant to the request kind are present.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackerResponse {
    pub status: Status,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub peer_count: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub peers: Option<Vec<PeerInfo>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub count: Option<usize>,
}

impl TrackerResponse {
    pub fn success() -> Self {
        Self {
            status: Status::Success,
            message: None,
            peer_count: None,
            peers: None,
            count: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: Status::Error,
            message: Some(message.into()),
            ..Self::success()
        }
    }

    pub fn registered(peer_count: usize) -> Self {
        Self {
            message: Some("peer registered".into()),
            peer_count: Some(peer_count),
            ..Self::success()
        }
    }

    pub fn peer_list(peers: Vec<PeerInfo>) -> Self {
        Self {
            count: Some(peers.len()),
            peers: Some(peers),
            ..Self::success()
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == Status::Success
    }
}

/// Wire view of a library entry, as listed by LIST_VIDEOS.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoSummary {
    pub id: String,
    pub name: String,
    pub description: String,
    pub size: u64,
}

/// Reply to LIST_VIDEOS.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoListResponse {
    pub status: Status,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default)]
    pub videos: Vec<VideoSummary>,
}

/// Reply to GET_VIDEO_INFO. `video_info` is absent when not found.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoInfoResponse {
    pub status: Status,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default)]
    pub video_info: Option<VideoMetadata>,
}

/// First frame of a DOWNLOAD_VIDEO exchange. Raw bytes follow only on success.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadHeader {
    pub status: Status,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl DownloadHeader {
    pub fn found(size: u64, name: impl Into<String>) -> Self {
        Self {
            status: Status::Success,
            message: None,
            size: Some(size),
            name: Some(name.into()),
        }
    }

    pub fn not_found() -> Self {
        Self {
            status: Status::NotFound,
            message: None,
            size: None,
            name: None,
        }
    }
}

/// Generic reply for requests a peer could not parse.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub status: Status,
    pub message: String,
}

impl ErrorResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            status: Status::Error,
            message: message.into(),
        }
    }
}
