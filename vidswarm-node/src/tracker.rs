//! Tracker server: TCP accept loop, one task per request, periodic eviction sweep.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use vidswarm_core::{Registry, TrackerRequest, TrackerResponse, TrackerStats};

use crate::config::TrackerConfig;
use crate::error::{NodeError, Result};
use crate::transport::{self, TransportError, DEFAULT_IO_TIMEOUT};

/// Upper bound on a single accept wait, so a cleared running flag is noticed.
pub const ACCEPT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Tracker: owns the registry and runs the accept and sweep loops.
pub struct TrackerServer {
    state: Arc<Mutex<Registry>>,
    running: Arc<AtomicBool>,
    sweep_interval: Duration,
    io_timeout: Duration,
    accept_task: std::sync::Mutex<Option<JoinHandle<()>>>,
    sweep_task: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl TrackerServer {
    pub fn new(peer_timeout: Duration, sweep_interval: Duration) -> Self {
        Self {
            state: Arc::new(Mutex::new(Registry::new(peer_timeout))),
            running: Arc::new(AtomicBool::new(false)),
            sweep_interval,
            io_timeout: DEFAULT_IO_TIMEOUT,
            accept_task: std::sync::Mutex::new(None),
            sweep_task: std::sync::Mutex::new(None),
        }
    }

    pub fn from_config(config: &TrackerConfig) -> Self {
        Self::new(config.peer_timeout(), config.sweep_interval())
    }

    /// Bind `host:port` and spawn the accept and sweep loops. Returns the bound address.
    pub async fn start(&self, host: &str, port: u16) -> Result<SocketAddr> {
        if self.running.load(Ordering::SeqCst) {
            return Err(NodeError::AlreadyRunning);
        }
        let listener = TcpListener::bind((host, port))
            .await
            .map_err(|source| NodeError::Bind {
                addr: format!("{}:{}", host, port),
                source,
            })?;
        let addr = listener.local_addr()?;
        self.running.store(true, Ordering::SeqCst);
        info!(%addr, "tracker started");

        let accept = tokio::spawn(accept_loop(
            listener,
            self.state.clone(),
            self.running.clone(),
            self.io_timeout,
        ));
        let sweep = tokio::spawn(sweep_loop(
            self.state.clone(),
            self.running.clone(),
            self.sweep_interval,
        ));
        if let Ok(mut slot) = self.accept_task.lock() {
            *slot = Some(accept);
        }
        if let Ok(mut slot) = self.sweep_task.lock() {
            *slot = Some(sweep);
        }
        Ok(addr)
    }

    /// Clear the running flag. The accept loop exits within [`ACCEPT_POLL_INTERVAL`];
    /// requests already being handled run to completion.
    pub fn stop(&self) {
        if self.running.swap(false, Ordering::SeqCst) {
            info!("tracker stopping");
        }
        if let Ok(mut slot) = self.sweep_task.lock() {
            if let Some(task) = slot.take() {
                task.abort();
            }
        }
    }

    /// Wait for the accept loop to exit after [`stop`](Self::stop).
    pub async fn stopped(&self) {
        let task = self.accept_task.lock().ok().and_then(|mut slot| slot.take());
        if let Some(task) = task {
            let _ = task.await;
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub async fn stats(&self) -> TrackerStats {
        self.state.lock().await.stats()
    }

    /// Run one eviction pass as of `now`. Returns the evicted peer ids.
    pub async fn sweep_at(&self, now: Instant) -> Vec<String> {
        sweep_once(&self.state, now).await
    }
}

impl Drop for TrackerServer {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn accept_loop(
    listener: TcpListener,
    state: Arc<Mutex<Registry>>,
    running: Arc<AtomicBool>,
    io_timeout: Duration,
) {
    while running.load(Ordering::SeqCst) {
        match tokio::time::timeout(ACCEPT_POLL_INTERVAL, listener.accept()).await {
            Ok(Ok((stream, peer))) => {
                let state = state.clone();
                tokio::spawn(async move {
                    if let Err(e) = handle_connection(stream, state, io_timeout).await {
                        debug!(remote = %peer, error = %e, "connection failed");
                    }
                });
            }
            Ok(Err(e)) => {
                if running.load(Ordering::SeqCst) {
                    warn!(error = %e, "error accepting connection");
                }
            }
            Err(_) => continue,
        }
    }
    info!("tracker stopped");
}

/// Read one request, apply it under the lock, reply, close.
async fn handle_connection(
    mut stream: TcpStream,
    state: Arc<Mutex<Registry>>,
    io_timeout: Duration,
) -> std::result::Result<(), TransportError> {
    let request = transport::with_timeout(
        io_timeout,
        transport::read_frame::<TrackerRequest, _>(&mut stream),
    )
    .await;
    let response = match request {
        Ok(request) => {
            let summary = describe(&request);
            let mutates = !matches!(
                request,
                TrackerRequest::GetPeers
                    | TrackerRequest::FindVideo { .. }
                    | TrackerRequest::Heartbeat { .. }
            );
            let response = {
                let mut registry = state.lock().await;
                registry.handle(request, Instant::now())
            };
            match &response.message {
                Some(msg) if !response.is_success() => warn!(request = %summary, reason = %msg, "request refused"),
                _ if mutates => info!(request = %summary, "handled"),
                _ => debug!(request = %summary, "handled"),
            }
            response
        }
        Err(TransportError::Io(e)) => return Err(TransportError::Io(e)),
        Err(e) => {
            warn!(error = %e, "bad request");
            TrackerResponse::error(format!("bad request: {}", e))
        }
    };
    transport::write_frame(&mut stream, &response).await?;
    let _ = stream.shutdown().await;
    Ok(())
}

fn describe(request: &TrackerRequest) -> String {
    match request {
        TrackerRequest::Register {
            peer_id,
            host,
            port,
        } => format!("REGISTER {} at {}:{}", peer_id, host, port),
        TrackerRequest::Unregister { peer_id } => format!("UNREGISTER {}", peer_id),
        TrackerRequest::GetPeers => "GET_PEERS".to_string(),
        TrackerRequest::AnnounceVideo { peer_id, video_id } => {
            format!("ANNOUNCE_VIDEO {} by {}", video_id, peer_id)
        }
        TrackerRequest::FindVideo { video_id } => format!("FIND_VIDEO {}", video_id),
        TrackerRequest::Heartbeat { peer_id } => format!("HEARTBEAT {}", peer_id),
    }
}

async fn sweep_loop(state: Arc<Mutex<Registry>>, running: Arc<AtomicBool>, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    // First tick completes immediately; skip it so the first sweep is one interval out.
    ticker.tick().await;
    while running.load(Ordering::SeqCst) {
        ticker.tick().await;
        sweep_once(&state, Instant::now()).await;
    }
}

async fn sweep_once(state: &Mutex<Registry>, now: Instant) -> Vec<String> {
    let evicted = state.lock().await.evict_stale(now);
    for peer_id in &evicted {
        info!(%peer_id, "removing inactive peer");
    }
    evicted
}

/// Start a tracker from `config` and serve until Ctrl+C or SIGTERM.
pub async fn serve_until_shutdown(config: &TrackerConfig) -> Result<()> {
    let server = TrackerServer::from_config(config);
    server.start(&config.host, config.port).await?;
    shutdown_signal().await?;
    info!("tracker shutting down");
    server.stop();
    server.stopped().await;
    Ok(())
}

/// Wait for Ctrl+C or SIGTERM (Unix).
async fn shutdown_signal() -> std::io::Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate())?;
        tokio::select! {
            r = tokio::signal::ctrl_c() => r?,
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;
    use vidswarm_core::registry::{DEFAULT_PEER_TIMEOUT, DEFAULT_SWEEP_INTERVAL};
    use vidswarm_core::Status;

    async fn start_tracker() -> (TrackerServer, SocketAddr) {
        let server = TrackerServer::new(DEFAULT_PEER_TIMEOUT, DEFAULT_SWEEP_INTERVAL);
        let addr = server.start("127.0.0.1", 0).await.unwrap();
        (server, addr)
    }

    async fn send(addr: SocketAddr, req: TrackerRequest) -> TrackerResponse {
        transport::exchange("127.0.0.1", addr.port(), &req, DEFAULT_IO_TIMEOUT)
            .await
            .unwrap()
    }

    fn register(peer_id: &str, port: u16) -> TrackerRequest {
        TrackerRequest::Register {
            peer_id: peer_id.into(),
            host: "127.0.0.1".into(),
            port,
        }
    }

    #[tokio::test]
    async fn register_and_list_over_tcp() {
        let (server, addr) = start_tracker().await;
        let resp = send(addr, register("alice", 5001)).await;
        assert_eq!(resp.status, Status::Success);
        assert_eq!(resp.peer_count, Some(1));

        let peers = send(addr, TrackerRequest::GetPeers).await;
        assert_eq!(peers.count, Some(1));
        let list = peers.peers.unwrap();
        assert_eq!(list[0].peer_id, "alice");
        assert_eq!(list[0].port, 5001);

        // Same id again: count does not grow.
        let resp = send(addr, register("alice", 5009)).await;
        assert_eq!(resp.peer_count, Some(1));
        assert_eq!(server.stats().await.active_peers, 1);
        server.stop();
    }

    #[tokio::test]
    async fn malformed_request_gets_error_and_server_survives() {
        let (server, addr) = start_tracker().await;

        let mut stream = TcpStream::connect(addr).await.unwrap();
        let payload = br#"{"type":"EXPLODE"}"#;
        stream
            .write_all(&(payload.len() as u32).to_le_bytes())
            .await
            .unwrap();
        stream.write_all(payload).await.unwrap();
        let resp: TrackerResponse = transport::read_frame(&mut stream).await.unwrap();
        assert_eq!(resp.status, Status::Error);
        assert!(resp.message.unwrap().starts_with("bad request"));

        // Incomplete frame: prefix promises more than is sent.
        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream.write_all(&100u32.to_le_bytes()).await.unwrap();
        stream.write_all(b"{\"type\"").await.unwrap();
        stream.shutdown().await.unwrap();
        let resp: TrackerResponse = transport::read_frame(&mut stream).await.unwrap();
        assert_eq!(resp.status, Status::Error);

        let ok = send(addr, TrackerRequest::GetPeers).await;
        assert!(ok.is_success());
        server.stop();
    }

    #[tokio::test]
    async fn server_closes_after_one_exchange() {
        let (server, addr) = start_tracker().await;
        let mut stream = TcpStream::connect(addr).await.unwrap();
        transport::write_frame(&mut stream, &TrackerRequest::GetPeers)
            .await
            .unwrap();
        let _: TrackerResponse = transport::read_frame(&mut stream).await.unwrap();
        let mut rest = Vec::new();
        stream.read_to_end(&mut rest).await.unwrap();
        assert!(rest.is_empty());
        server.stop();
    }

    #[tokio::test]
    async fn sweep_evicts_and_prunes_index() {
        let (server, addr) = start_tracker().await;
        send(addr, register("alice", 5001)).await;
        let announced = send(
            addr,
            TrackerRequest::AnnounceVideo {
                peer_id: "alice".into(),
                video_id: "vid".into(),
            },
        )
        .await;
        assert!(announced.is_success());

        let later = Instant::now() + DEFAULT_PEER_TIMEOUT + Duration::from_secs(1);
        assert_eq!(server.sweep_at(later).await, vec!["alice".to_string()]);

        let found = send(
            addr,
            TrackerRequest::FindVideo {
                video_id: "vid".into(),
            },
        )
        .await;
        assert_eq!(found.count, Some(0));
        let stats = server.stats().await;
        assert_eq!(stats.active_peers, 0);
        assert_eq!(stats.indexed_videos, 0);
        server.stop();
    }

    #[tokio::test]
    async fn background_sweep_evicts_silent_peers() {
        let server = TrackerServer::new(Duration::from_millis(200), Duration::from_millis(50));
        let addr = server.start("127.0.0.1", 0).await.unwrap();
        assert_eq!(send(addr, register("alice", 5001)).await.status, Status::Success);
        let announced = send(
            addr,
            TrackerRequest::AnnounceVideo {
                peer_id: "alice".into(),
                video_id: "vid".into(),
            },
        )
        .await;
        assert_eq!(announced.status, Status::Success);
        assert_eq!(server.stats().await.indexed_videos, 1);

        // No manual sweep: only the background task can clear alice.
        let mut stats = server.stats().await;
        for _ in 0..40 {
            tokio::time::sleep(Duration::from_millis(50)).await;
            stats = server.stats().await;
            if stats.active_peers == 0 {
                break;
            }
        }
        assert_eq!(stats.active_peers, 0);
        assert_eq!(stats.indexed_videos, 0);
        assert!(send(addr, TrackerRequest::GetPeers).await.peers.unwrap().is_empty());
        server.stop();
    }

    #[tokio::test]
    async fn stop_releases_listener() {
        let (server, addr) = start_tracker().await;
        assert!(server.is_running());
        server.stop();
        server.stopped().await;
        assert!(!server.is_running());
        assert!(TcpStream::connect(addr).await.is_err());
    }

    #[tokio::test]
    async fn bind_conflict_is_reported() {
        let (server, addr) = start_tracker().await;
        let other = TrackerServer::new(DEFAULT_PEER_TIMEOUT, DEFAULT_SWEEP_INTERVAL);
        let err = other.start("127.0.0.1", addr.port()).await.unwrap_err();
        assert!(matches!(err, NodeError::Bind { .. }));
        assert!(matches!(
            server.start("127.0.0.1", 0).await,
            Err(NodeError::AlreadyRunning)
        ));
        server.stop();
    }
}
