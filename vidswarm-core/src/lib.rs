//! vidswarm core: wire protocol, framing, tracker registry and video library.
//! Host-driven: no sockets, no clocks; the node crate supplies both.

pub mod library;
pub mod protocol;
pub mod registry;
pub mod wire;

pub use library::{video_id_from_prefix, video_id_from_reader, VideoLibrary, VideoMetadata, VideoSource};
pub use protocol::{
    DownloadHeader, ErrorResponse, PeerAddr, PeerInfo, PeerRequest, Status, TrackerRequest,
    TrackerResponse, VideoInfoResponse, VideoListResponse, VideoSummary, DEFAULT_TRACKER_PORT,
};
pub use registry::{PeerRecord, Registry, RegistryError, TrackerStats};
pub use wire::{decode_frame, encode_frame, FrameDecodeError, FrameEncodeError};
