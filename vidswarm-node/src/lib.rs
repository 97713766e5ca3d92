//! vidswarm node: tracker server, tracker client and peer node over TCP.
//!
//! Every connection carries one request. Messages are length-prefixed JSON
//! frames (see `vidswarm_core::wire`); video content follows a download
//! header as raw bytes.

pub mod client;
pub mod config;
pub mod error;
mod fetch;
pub mod peer;
pub mod profile;
mod serve;
pub mod tracker;
pub mod transport;
pub mod util;

pub use client::TrackerClient;
pub use config::{Config, PeerConfig, TrackerConfig};
pub use error::{NodeError, Result};
pub use peer::{NodeEvent, PeerNode, PeerSummary};
pub use profile::{Friend, JsonProfileStore, Profile, ProfileError, ProfileStore};
pub use tracker::{serve_until_shutdown, TrackerServer};
