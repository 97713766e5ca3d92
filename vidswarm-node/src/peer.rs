//! Peer node: local video library, inbound server, tracker glue and background helpers.
//!
//! Inbound request handling lives in [`crate::serve`]; outbound listing and
//! downloads in [`crate::fetch`].

use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use serde::Serialize;
use tokio::io::AsyncReadExt;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use vidswarm_core::library::VIDEO_ID_PREFIX_LEN;
use vidswarm_core::{video_id_from_prefix, PeerAddr, VideoLibrary, VideoMetadata, VideoSource, VideoSummary};

use crate::client::TrackerClient;
use crate::config::PeerConfig;
use crate::error::{NodeError, Result};
use crate::serve;
use crate::tracker::ACCEPT_POLL_INTERVAL;
use crate::transport::DEFAULT_IO_TIMEOUT;
use crate::util;

/// Default spacing of tracker heartbeats; well inside the tracker's peer timeout.
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(60);

/// Snapshot of a node for display.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PeerSummary {
    pub peer_id: String,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub video_count: usize,
    pub known_peers: usize,
}

/// Completion report from the `spawn_*` helpers.
#[derive(Debug)]
pub enum NodeEvent {
    VideoAdded(Result<VideoMetadata>),
    Downloaded {
        from: PeerAddr,
        video_id: String,
        result: Result<VideoMetadata>,
    },
    NetworkVideos(Result<HashMap<PeerAddr, Vec<VideoSummary>>>),
}

pub(crate) struct Inner {
    pub(crate) peer_id: String,
    pub(crate) storage_dir: PathBuf,
    pub(crate) library: Mutex<VideoLibrary>,
    pub(crate) known_peers: Mutex<Vec<PeerAddr>>,
    pub(crate) io_timeout: Duration,
    heartbeat_interval: Duration,
    running: AtomicBool,
    advertised: std::sync::Mutex<Option<PeerAddr>>,
    accept_task: std::sync::Mutex<Option<JoinHandle<()>>>,
}

/// A peer. Cheap to clone; clones share the same library and server.
#[derive(Clone)]
pub struct PeerNode {
    pub(crate) inner: Arc<Inner>,
}

impl PeerNode {
    pub fn new(peer_id: impl Into<String>, storage_dir: impl Into<PathBuf>) -> Self {
        Self {
            inner: Arc::new(Inner {
                peer_id: peer_id.into(),
                storage_dir: storage_dir.into(),
                library: Mutex::new(VideoLibrary::new()),
                known_peers: Mutex::new(Vec::new()),
                io_timeout: DEFAULT_IO_TIMEOUT,
                heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
                running: AtomicBool::new(false),
                advertised: std::sync::Mutex::new(None),
                accept_task: std::sync::Mutex::new(None),
            }),
        }
    }

    pub fn from_config(peer_id: &str, config: &PeerConfig) -> Self {
        Self::new(peer_id, config.storage_dir_for(peer_id))
            .with_io_timeout(config.io_timeout())
            .with_heartbeat_interval(config.heartbeat_interval())
    }

    /// Only meaningful before the node is cloned or started.
    pub fn with_io_timeout(mut self, timeout: Duration) -> Self {
        if let Some(inner) = Arc::get_mut(&mut self.inner) {
            inner.io_timeout = timeout;
        }
        self
    }

    /// Only meaningful before the node is cloned or started.
    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        if let Some(inner) = Arc::get_mut(&mut self.inner) {
            inner.heartbeat_interval = interval;
        }
        self
    }

    pub fn io_timeout(&self) -> Duration {
        self.inner.io_timeout
    }

    pub fn heartbeat_interval(&self) -> Duration {
        self.inner.heartbeat_interval
    }

    pub fn peer_id(&self) -> &str {
        &self.inner.peer_id
    }

    pub fn storage_dir(&self) -> &Path {
        &self.inner.storage_dir
    }

    /// Address other peers should use, once started.
    pub fn advertised_addr(&self) -> Option<PeerAddr> {
        self.inner.advertised.lock().ok().and_then(|a| a.clone())
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    /// Bind `host:port` and serve peer requests. Port 0 picks a free port.
    pub async fn start(&self, host: &str, port: u16) -> Result<SocketAddr> {
        if self.is_running() {
            return Err(NodeError::AlreadyRunning);
        }
        let listener = TcpListener::bind((host, port))
            .await
            .map_err(|source| NodeError::Bind {
                addr: format!("{}:{}", host, port),
                source,
            })?;
        let addr = listener.local_addr()?;
        let advertised_host = if addr.ip().is_unspecified() {
            util::local_ip().await
        } else {
            host.to_string()
        };
        if let Ok(mut slot) = self.inner.advertised.lock() {
            *slot = Some(PeerAddr::new(advertised_host, addr.port()));
        }
        self.inner.running.store(true, Ordering::SeqCst);
        info!(peer_id = %self.peer_id(), %addr, "peer started");

        let task = tokio::spawn(accept_loop(listener, self.clone()));
        if let Ok(mut slot) = self.inner.accept_task.lock() {
            *slot = Some(task);
        }
        Ok(addr)
    }

    /// Clear the running flag; the accept loop exits within one poll interval.
    pub fn stop(&self) {
        if self.inner.running.swap(false, Ordering::SeqCst) {
            info!(peer_id = %self.peer_id(), "peer stopping");
        }
    }

    /// Wait for the accept loop to exit after [`stop`](Self::stop).
    pub async fn stopped(&self) {
        let task = self
            .inner
            .accept_task
            .lock()
            .ok()
            .and_then(|mut slot| slot.take());
        if let Some(task) = task {
            let _ = task.await;
        }
    }

    /// Copy `path` into storage as `<video_id>.mp4` and add it to the library.
    ///
    /// An empty `name` falls back to the source file name. On failure the
    /// partial copy is removed and the library and any stored copy are untouched.
    pub async fn add_video(&self, path: &Path, name: &str, description: &str) -> Result<VideoMetadata> {
        let mut file = tokio::fs::File::open(path)
            .await
            .map_err(|e| NodeError::file("open", path, e))?;
        let mut prefix = Vec::with_capacity(VIDEO_ID_PREFIX_LEN);
        (&mut file)
            .take(VIDEO_ID_PREFIX_LEN as u64)
            .read_to_end(&mut prefix)
            .await
            .map_err(|e| NodeError::file("read", path, e))?;
        drop(file);
        let video_id = video_id_from_prefix(&prefix);

        let dest = self.stored_path(&video_id);
        tokio::fs::create_dir_all(&self.inner.storage_dir)
            .await
            .map_err(|e| NodeError::file("create", &self.inner.storage_dir, e))?;
        let size_bytes = if same_file(path, &dest).await {
            tokio::fs::metadata(&dest)
                .await
                .map_err(|e| NodeError::file("stat", &dest, e))?
                .len()
        } else {
            // Only a complete copy replaces the stored one.
            let part = part_path(&dest);
            let copied = match tokio::fs::copy(path, &part).await {
                Ok(n) => tokio::fs::rename(&part, &dest)
                    .await
                    .map(|()| n)
                    .map_err(|e| NodeError::file("rename", &part, e)),
                Err(e) => Err(NodeError::file("copy", path, e)),
            };
            match copied {
                Ok(n) => n,
                Err(e) => {
                    let _ = tokio::fs::remove_file(&part).await;
                    return Err(e);
                }
            }
        };

        let name = if name.is_empty() {
            path.file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| video_id.clone())
        } else {
            name.to_string()
        };
        let meta = VideoMetadata {
            video_id: video_id.clone(),
            name,
            description: description.to_string(),
            size_bytes,
            local_path: dest,
            added_at: SystemTime::now(),
            source: VideoSource::Local,
        };
        self.inner.library.lock().await.insert(meta.clone());
        info!(
            peer_id = %self.peer_id(),
            %video_id,
            name = %meta.name,
            size = %util::format_file_size(size_bytes),
            "added video"
        );
        Ok(meta)
    }

    pub async fn edit_video(&self, video_id: &str, name: &str, description: &str) -> Result<()> {
        if self
            .inner
            .library
            .lock()
            .await
            .update_details(video_id, name, description)
        {
            Ok(())
        } else {
            Err(NodeError::NotFound(video_id.to_string()))
        }
    }

    /// Drop the entry, then its stored file. Returns the removed entry.
    pub async fn delete_video(&self, video_id: &str) -> Result<VideoMetadata> {
        let meta = self
            .inner
            .library
            .lock()
            .await
            .remove(video_id)
            .ok_or_else(|| NodeError::NotFound(video_id.to_string()))?;
        match tokio::fs::remove_file(&meta.local_path).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(peer_id = %self.peer_id(), path = %meta.local_path.display(), "stored file already gone");
            }
            Err(e) => return Err(NodeError::file("remove", &meta.local_path, e)),
        }
        info!(peer_id = %self.peer_id(), %video_id, "deleted video");
        Ok(meta)
    }

    /// Copy a stored video to `dest`. A directory gets `<name>.mp4` inside it.
    pub async fn export_video(&self, video_id: &str, dest: &Path) -> Result<PathBuf> {
        let meta = self
            .video(video_id)
            .await
            .ok_or_else(|| NodeError::NotFound(video_id.to_string()))?;
        let target = if tokio::fs::metadata(dest).await.map(|m| m.is_dir()).unwrap_or(false) {
            dest.join(export_file_name(&meta))
        } else {
            dest.to_path_buf()
        };
        tokio::fs::copy(&meta.local_path, &target)
            .await
            .map_err(|e| NodeError::file("copy", &meta.local_path, e))?;
        info!(peer_id = %self.peer_id(), %video_id, to = %target.display(), "exported video");
        Ok(target)
    }

    pub async fn video(&self, video_id: &str) -> Option<VideoMetadata> {
        self.inner.library.lock().await.get(video_id).cloned()
    }

    pub async fn videos(&self) -> Vec<VideoMetadata> {
        self.inner.library.lock().await.entries()
    }

    /// Remember a peer. Returns false if the pair was already known.
    pub async fn add_known_peer(&self, host: &str, port: u16) -> bool {
        let addr = PeerAddr::new(host, port);
        let mut known = self.inner.known_peers.lock().await;
        if known.contains(&addr) {
            return false;
        }
        known.push(addr);
        true
    }

    pub async fn known_peers(&self) -> Vec<PeerAddr> {
        self.inner.known_peers.lock().await.clone()
    }

    pub async fn info(&self) -> PeerSummary {
        let advertised = self.advertised_addr();
        PeerSummary {
            peer_id: self.peer_id().to_string(),
            host: advertised.as_ref().map(|a| a.host.clone()),
            port: advertised.map(|a| a.port),
            video_count: self.inner.library.lock().await.len(),
            known_peers: self.inner.known_peers.lock().await.len(),
        }
    }

    /// Register this node's advertised address with the tracker.
    pub async fn join_tracker(&self, tracker: &TrackerClient) -> Result<usize> {
        let addr = self.advertised_addr().ok_or(NodeError::NotRunning)?;
        tracker.register(self.peer_id(), &addr.host, addr.port).await
    }

    pub async fn leave_tracker(&self, tracker: &TrackerClient) -> Result<()> {
        tracker.unregister(self.peer_id()).await
    }

    /// Announce a video this node holds.
    pub async fn publish_video(&self, tracker: &TrackerClient, video_id: &str) -> Result<()> {
        if !self.inner.library.lock().await.contains(video_id) {
            return Err(NodeError::NotFound(video_id.to_string()));
        }
        tracker.announce(self.peer_id(), video_id).await
    }

    pub async fn send_heartbeat(&self, tracker: &TrackerClient) -> Result<()> {
        tracker.heartbeat(self.peer_id()).await
    }

    /// Learn every other registered peer from the tracker, then list their videos.
    pub async fn browse_network(
        &self,
        tracker: &TrackerClient,
    ) -> Result<HashMap<PeerAddr, Vec<VideoSummary>>> {
        for peer in tracker.peers().await? {
            if peer.peer_id != self.peer_id() {
                self.add_known_peer(&peer.host, peer.port).await;
            }
        }
        Ok(self.get_all_network_videos().await)
    }

    /// Heartbeat every [`heartbeat_interval`](Self::heartbeat_interval) while
    /// the node runs. A tracker that no longer knows this node gets a fresh REGISTER.
    pub fn spawn_heartbeat(&self, tracker: TrackerClient) -> JoinHandle<()> {
        let node = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(node.heartbeat_interval());
            ticker.tick().await;
            while node.is_running() {
                ticker.tick().await;
                if !node.is_running() {
                    break;
                }
                match node.send_heartbeat(&tracker).await {
                    Ok(()) => debug!(peer_id = %node.peer_id(), "heartbeat sent"),
                    Err(NodeError::Rejected(msg)) if msg.contains("not registered") => {
                        info!(peer_id = %node.peer_id(), "tracker dropped registration, re-registering");
                        if let Err(e) = node.join_tracker(&tracker).await {
                            warn!(peer_id = %node.peer_id(), error = %e, "re-register failed");
                        }
                    }
                    Err(e) => warn!(peer_id = %node.peer_id(), error = %e, "heartbeat failed"),
                }
            }
        })
    }

    pub fn spawn_add_video(
        &self,
        path: PathBuf,
        name: String,
        description: String,
        events: mpsc::Sender<NodeEvent>,
    ) -> JoinHandle<()> {
        let node = self.clone();
        tokio::spawn(async move {
            let result = node.add_video(&path, &name, &description).await;
            let _ = events.send(NodeEvent::VideoAdded(result)).await;
        })
    }

    pub fn spawn_download(
        &self,
        from: PeerAddr,
        video_id: String,
        events: mpsc::Sender<NodeEvent>,
    ) -> JoinHandle<()> {
        let node = self.clone();
        tokio::spawn(async move {
            let result = node
                .download_video(&from.host, from.port, &video_id, None)
                .await;
            let _ = events
                .send(NodeEvent::Downloaded {
                    from,
                    video_id,
                    result,
                })
                .await;
        })
    }

    pub fn spawn_browse(&self, tracker: TrackerClient, events: mpsc::Sender<NodeEvent>) -> JoinHandle<()> {
        let node = self.clone();
        tokio::spawn(async move {
            let result = node.browse_network(&tracker).await;
            let _ = events.send(NodeEvent::NetworkVideos(result)).await;
        })
    }

    pub(crate) fn stored_path(&self, video_id: &str) -> PathBuf {
        self.inner.storage_dir.join(format!("{}.mp4", video_id))
    }
}

/// `<dest>.part`: where incoming bytes collect before replacing `dest`.
pub(crate) fn part_path(dest: &Path) -> PathBuf {
    let mut name = dest.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".part");
    dest.with_file_name(name)
}

fn export_file_name(meta: &VideoMetadata) -> String {
    if meta.name.ends_with(".mp4") {
        meta.name.clone()
    } else {
        format!("{}.mp4", meta.name)
    }
}

async fn same_file(a: &Path, b: &Path) -> bool {
    match (tokio::fs::canonicalize(a).await, tokio::fs::canonicalize(b).await) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

async fn accept_loop(listener: TcpListener, node: PeerNode) {
    while node.is_running() {
        match tokio::time::timeout(ACCEPT_POLL_INTERVAL, listener.accept()).await {
            Ok(Ok((stream, remote))) => {
                let node = node.clone();
                tokio::spawn(async move {
                    if let Err(e) = serve::handle_connection(stream, &node).await {
                        debug!(peer_id = %node.peer_id(), %remote, error = %e, "connection failed");
                    }
                });
            }
            Ok(Err(e)) => {
                if node.is_running() {
                    warn!(peer_id = %node.peer_id(), error = %e, "error accepting connection");
                }
            }
            Err(_) => continue,
        }
    }
    info!(peer_id = %node.peer_id(), "peer stopped");
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::tracker::TrackerServer;
    use rand::RngCore;
    use vidswarm_core::registry::{DEFAULT_PEER_TIMEOUT, DEFAULT_SWEEP_INTERVAL};
    use vidswarm_core::video_id_from_reader;

    pub(crate) fn scratch_dir() -> PathBuf {
        std::env::temp_dir().join(format!("vidswarm-test-{}", uuid::Uuid::new_v4()))
    }

    pub(crate) async fn write_random_file(dir: &Path, name: &str, len: usize) -> (PathBuf, Vec<u8>) {
        let mut data = vec![0u8; len];
        rand::thread_rng().fill_bytes(&mut data);
        tokio::fs::create_dir_all(dir).await.unwrap();
        let path = dir.join(name);
        tokio::fs::write(&path, &data).await.unwrap();
        (path, data)
    }

    #[tokio::test]
    async fn add_video_copies_into_storage() {
        let root = scratch_dir();
        let (src, data) = write_random_file(&root.join("src"), "clip.mp4", 3000).await;
        let node = PeerNode::new("alice", root.join("store"));

        let meta = node.add_video(&src, "Clip", "a clip").await.unwrap();
        assert_eq!(meta.video_id, video_id_from_reader(&data[..]).unwrap());
        assert_eq!(meta.size_bytes, 3000);
        assert_eq!(meta.local_path, root.join("store").join(format!("{}.mp4", meta.video_id)));
        assert_eq!(tokio::fs::read(&meta.local_path).await.unwrap(), data);
        assert_eq!(node.video(&meta.video_id).await, Some(meta.clone()));

        // Adding the stored copy again must not truncate it.
        node.add_video(&meta.local_path, "Clip", "").await.unwrap();
        assert_eq!(tokio::fs::read(&meta.local_path).await.unwrap(), data);
        assert_eq!(node.videos().await.len(), 1);
        let _ = tokio::fs::remove_dir_all(&root).await;
    }

    #[tokio::test]
    async fn unreadable_source_leaves_library_empty() {
        let root = scratch_dir();
        let node = PeerNode::new("alice", root.join("store"));
        let err = node
            .add_video(&root.join("nope.mp4"), "x", "")
            .await
            .unwrap_err();
        assert!(matches!(err, NodeError::File { op: "open", .. }));
        assert!(node.videos().await.is_empty());
    }

    #[tokio::test]
    async fn failed_re_add_keeps_stored_copy() {
        let root = scratch_dir();
        let (src, data) = write_random_file(&root.join("src"), "clip.mp4", 5000).await;
        let node = PeerNode::new("alice", root.join("store"));
        let meta = node.add_video(&src, "Clip", "kept").await.unwrap();

        // A directory squatting on the part path makes the copy fail.
        tokio::fs::create_dir(part_path(&meta.local_path)).await.unwrap();
        let err = node.add_video(&src, "Other", "").await.unwrap_err();
        assert!(matches!(err, NodeError::File { op: "copy", .. }));

        assert_eq!(node.video(&meta.video_id).await, Some(meta.clone()));
        assert_eq!(tokio::fs::read(&meta.local_path).await.unwrap(), data);
        let _ = tokio::fs::remove_dir_all(&root).await;
    }

    #[test]
    fn part_path_is_a_sibling() {
        assert_eq!(
            part_path(Path::new("/store/abc.mp4")),
            PathBuf::from("/store/abc.mp4.part")
        );
    }

    #[tokio::test]
    async fn empty_name_uses_file_name() {
        let root = scratch_dir();
        let (src, _) = write_random_file(&root, "holiday.mp4", 100).await;
        let node = PeerNode::new("alice", root.join("store"));
        let meta = node.add_video(&src, "", "").await.unwrap();
        assert_eq!(meta.name, "holiday.mp4");
        let _ = tokio::fs::remove_dir_all(&root).await;
    }

    #[tokio::test]
    async fn edit_delete_and_export() {
        let root = scratch_dir();
        let (src, data) = write_random_file(&root, "in.mp4", 500).await;
        let node = PeerNode::new("alice", root.join("store"));
        let meta = node.add_video(&src, "old", "").await.unwrap();

        node.edit_video(&meta.video_id, "new", "desc").await.unwrap();
        let edited = node.video(&meta.video_id).await.unwrap();
        assert_eq!(edited.name, "new");
        assert_eq!(edited.description, "desc");
        assert!(matches!(
            node.edit_video("missing", "a", "b").await,
            Err(NodeError::NotFound(_))
        ));

        let out_dir = root.join("out");
        tokio::fs::create_dir_all(&out_dir).await.unwrap();
        let exported = node.export_video(&meta.video_id, &out_dir).await.unwrap();
        assert_eq!(exported, out_dir.join("new.mp4"));
        assert_eq!(tokio::fs::read(&exported).await.unwrap(), data);

        let removed = node.delete_video(&meta.video_id).await.unwrap();
        assert!(tokio::fs::metadata(&removed.local_path).await.is_err());
        assert!(node.video(&meta.video_id).await.is_none());
        assert!(matches!(
            node.delete_video(&meta.video_id).await,
            Err(NodeError::NotFound(_))
        ));
        let _ = tokio::fs::remove_dir_all(&root).await;
    }

    #[test]
    fn from_config_applies_peer_settings() {
        let config: PeerConfig = toml::from_str(
            r#"
            storage_dir = "/srv/vidswarm"
            heartbeat_interval_secs = 15
            io_timeout_secs = 3
            "#,
        )
        .unwrap();
        let node = PeerNode::from_config("alice", &config);
        assert_eq!(node.storage_dir(), Path::new("/srv/vidswarm"));
        assert_eq!(node.heartbeat_interval(), Duration::from_secs(15));
        assert_eq!(node.io_timeout(), Duration::from_secs(3));

        let defaults = PeerNode::from_config("bob", &PeerConfig::default());
        assert_eq!(defaults.heartbeat_interval(), DEFAULT_HEARTBEAT_INTERVAL);
        assert_eq!(defaults.storage_dir(), Path::new("peer_videos_bob"));
    }

    #[tokio::test]
    async fn known_peers_keep_insertion_order() {
        let node = PeerNode::new("alice", scratch_dir());
        assert!(node.add_known_peer("10.0.0.2", 5000).await);
        assert!(node.add_known_peer("10.0.0.1", 5000).await);
        assert!(!node.add_known_peer("10.0.0.2", 5000).await);
        assert!(node.add_known_peer("10.0.0.2", 5001).await);
        assert_eq!(
            node.known_peers().await,
            vec![
                PeerAddr::new("10.0.0.2", 5000),
                PeerAddr::new("10.0.0.1", 5000),
                PeerAddr::new("10.0.0.2", 5001),
            ]
        );
        assert_eq!(node.info().await.known_peers, 3);
    }

    #[tokio::test]
    async fn join_requires_running_node() {
        let node = PeerNode::new("alice", scratch_dir());
        let tracker = TrackerClient::new("127.0.0.1", 1);
        assert!(matches!(
            node.join_tracker(&tracker).await,
            Err(NodeError::NotRunning)
        ));
    }

    #[tokio::test]
    async fn publish_requires_local_copy() {
        let node = PeerNode::new("alice", scratch_dir());
        let tracker = TrackerClient::new("127.0.0.1", 1);
        assert!(matches!(
            node.publish_video(&tracker, "abc").await,
            Err(NodeError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn heartbeat_task_re_registers_after_eviction() {
        let server = TrackerServer::new(DEFAULT_PEER_TIMEOUT, DEFAULT_SWEEP_INTERVAL);
        let taddr = server.start("127.0.0.1", 0).await.unwrap();
        let tracker = TrackerClient::new("127.0.0.1", taddr.port());

        let node = PeerNode::new("alice", scratch_dir())
            .with_heartbeat_interval(Duration::from_millis(50));
        node.start("127.0.0.1", 0).await.unwrap();
        node.join_tracker(&tracker).await.unwrap();

        let later = std::time::Instant::now() + DEFAULT_PEER_TIMEOUT + Duration::from_secs(1);
        assert_eq!(server.sweep_at(later).await, vec!["alice".to_string()]);

        let task = node.spawn_heartbeat(tracker.clone());
        let mut back = false;
        for _ in 0..40 {
            tokio::time::sleep(Duration::from_millis(50)).await;
            if server.stats().await.active_peers == 1 {
                back = true;
                break;
            }
        }
        assert!(back, "heartbeat task did not re-register");

        node.stop();
        node.stopped().await;
        task.await.unwrap();
        server.stop();
    }

    #[tokio::test]
    async fn spawn_add_video_reports_event() {
        let root = scratch_dir();
        let (src, _) = write_random_file(&root, "a.mp4", 64).await;
        let node = PeerNode::new("alice", root.join("store"));
        let (tx, mut rx) = mpsc::channel(4);

        node.spawn_add_video(src, "a".into(), String::new(), tx.clone());
        node.spawn_add_video(root.join("missing.mp4"), "b".into(), String::new(), tx);

        let mut ok = 0;
        let mut failed = 0;
        while let Some(event) = rx.recv().await {
            match event {
                NodeEvent::VideoAdded(Ok(_)) => ok += 1,
                NodeEvent::VideoAdded(Err(_)) => failed += 1,
                other => panic!("unexpected event {other:?}"),
            }
        }
        assert_eq!((ok, failed), (1, 1));
        assert_eq!(node.info().await.video_count, 1);
        let _ = tokio::fs::remove_dir_all(&root).await;
    }
}
