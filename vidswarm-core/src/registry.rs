//! Tracker state: registry of live peers plus the video -> peers index.
//! Host-driven: no I/O and no clock; every time-dependent call takes `now`.

use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::protocol::{PeerInfo, TrackerRequest, TrackerResponse};

/// Peers silent for longer than this are evicted.
pub const DEFAULT_PEER_TIMEOUT: Duration = Duration::from_secs(300);

/// How often the tracker sweeps for silent peers.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// A registered peer and when it was last heard from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerRecord {
    pub peer_id: String,
    pub host: String,
    pub port: u16,
    pub last_seen: Instant,
}

impl PeerRecord {
    pub fn info(&self) -> PeerInfo {
        PeerInfo {
            peer_id: self.peer_id.clone(),
            host: self.host.clone(),
            port: self.port,
        }
    }
}

/// Snapshot of tracker occupancy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackerStats {
    pub active_peers: usize,
    pub indexed_videos: usize,
    pub peers: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("missing peer information")]
    MissingPeerInfo,
    #[error("missing information")]
    MissingInfo,
    #[error("peer not registered")]
    NotRegistered,
}

/// Registry and index share one owner so a single lock covers both.
#[derive(Debug)]
pub struct Registry {
    peers: HashMap<String, PeerRecord>,
    videos: HashMap<String, HashSet<String>>,
    peer_timeout: Duration,
}

impl Registry {
    pub fn new(peer_timeout: Duration) -> Self {
        Self {
            peers: HashMap::new(),
            videos: HashMap::new(),
            peer_timeout,
        }
    }

    pub fn peer_timeout(&self) -> Duration {
        self.peer_timeout
    }

    /// Insert or overwrite a peer. Returns the registry size afterwards.
    pub fn register(
        &mut self,
        peer_id: &str,
        host: &str,
        port: u16,
        now: Instant,
    ) -> Result<usize, RegistryError> {
        if peer_id.is_empty() || host.is_empty() || port == 0 {
            return Err(RegistryError::MissingPeerInfo);
        }
        self.peers.insert(
            peer_id.to_string(),
            PeerRecord {
                peer_id: peer_id.to_string(),
                host: host.to_string(),
                port,
                last_seen: now,
            },
        );
        Ok(self.peers.len())
    }

    /// Remove a peer and its index references. Returns whether it was registered.
    pub fn unregister(&mut self, peer_id: &str) -> bool {
        let removed = self.peers.remove(peer_id).is_some();
        self.prune_index(peer_id);
        removed
    }

    /// Refresh `last_seen` without touching the contact address.
    pub fn heartbeat(&mut self, peer_id: &str, now: Instant) -> Result<(), RegistryError> {
        match self.peers.get_mut(peer_id) {
            Some(record) => {
                record.last_seen = now;
                Ok(())
            }
            None => Err(RegistryError::NotRegistered),
        }
    }

    /// Record that `peer_id` holds `video_id`. Returns false if already indexed.
    pub fn announce(&mut self, peer_id: &str, video_id: &str) -> Result<bool, RegistryError> {
        if peer_id.is_empty() || video_id.is_empty() {
            return Err(RegistryError::MissingInfo);
        }
        if !self.peers.contains_key(peer_id) {
            return Err(RegistryError::NotRegistered);
        }
        Ok(self
            .videos
            .entry(video_id.to_string())
            .or_default()
            .insert(peer_id.to_string()))
    }

    /// Current contact info of every registered peer indexed under `video_id`.
    pub fn find_video(&self, video_id: &str) -> Vec<PeerInfo> {
        let mut out: Vec<PeerInfo> = self
            .videos
            .get(video_id)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| self.peers.get(id))
                    .map(PeerRecord::info)
                    .collect()
            })
            .unwrap_or_default();
        out.sort_by(|a, b| a.peer_id.cmp(&b.peer_id));
        out
    }

    /// All registered peers, ordered by id.
    pub fn peers(&self) -> Vec<PeerInfo> {
        let mut out: Vec<PeerInfo> = self.peers.values().map(PeerRecord::info).collect();
        out.sort_by(|a, b| a.peer_id.cmp(&b.peer_id));
        out
    }

    pub fn get(&self, peer_id: &str) -> Option<&PeerRecord> {
        self.peers.get(peer_id)
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    /// Peer ids indexed under `video_id`, including ones no longer registered.
    pub fn indexed_peers(&self, video_id: &str) -> Option<&HashSet<String>> {
        self.videos.get(video_id)
    }

    pub fn indexed_video_count(&self) -> usize {
        self.videos.len()
    }

    /// Evict every peer whose `last_seen` is more than the timeout before `now`.
    /// Returns the evicted ids.
    pub fn evict_stale(&mut self, now: Instant) -> Vec<String> {
        let timeout = self.peer_timeout;
        let stale: Vec<String> = self
            .peers
            .values()
            .filter(|p| now.saturating_duration_since(p.last_seen) > timeout)
            .map(|p| p.peer_id.clone())
            .collect();
        for peer_id in &stale {
            self.peers.remove(peer_id);
            self.prune_index(peer_id);
        }
        stale
    }

    pub fn stats(&self) -> TrackerStats {
        let mut peers: Vec<String> = self.peers.keys().cloned().collect();
        peers.sort();
        TrackerStats {
            active_peers: self.peers.len(),
            indexed_videos: self.videos.len(),
            peers,
        }
    }

    /// Apply one request and build its reply.
    pub fn handle(&mut self, request: TrackerRequest, now: Instant) -> TrackerResponse {
        match request {
            TrackerRequest::Register {
                peer_id,
                host,
                port,
            } => match self.register(&peer_id, &host, port, now) {
                Ok(count) => TrackerResponse::registered(count),
                Err(e) => TrackerResponse::error(e.to_string()),
            },
            TrackerRequest::Unregister { peer_id } => {
                self.unregister(&peer_id);
                TrackerResponse {
                    message: Some("peer unregistered".into()),
                    ..TrackerResponse::success()
                }
            }
            TrackerRequest::GetPeers => TrackerResponse::peer_list(self.peers()),
            TrackerRequest::AnnounceVideo { peer_id, video_id } => {
                match self.announce(&peer_id, &video_id) {
                    Ok(_) => TrackerResponse {
                        message: Some("video announced".into()),
                        ..TrackerResponse::success()
                    },
                    Err(e) => TrackerResponse::error(e.to_string()),
                }
            }
            TrackerRequest::FindVideo { video_id } => {
                TrackerResponse::peer_list(self.find_video(&video_id))
            }
            TrackerRequest::Heartbeat { peer_id } => match self.heartbeat(&peer_id, now) {
                Ok(()) => TrackerResponse::success(),
                Err(e) => TrackerResponse::error(e.to_string()),
            },
        }
    }

    /// Drop `peer_id` from every index entry, deleting entries left empty.
    fn prune_index(&mut self, peer_id: &str) {
        self.videos.retain(|_, holders| {
            holders.remove(peer_id);
            !holders.is_empty()
        });
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new(DEFAULT_PEER_TIMEOUT)
    }
}
