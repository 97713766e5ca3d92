//! Tracker client: one TCP exchange per call.

use std::time::Duration;

use tracing::{info, warn};
use vidswarm_core::{PeerAddr, PeerInfo, TrackerRequest, TrackerResponse, DEFAULT_TRACKER_PORT};

use crate::error::{NodeError, Result};
use crate::transport::{self, DEFAULT_IO_TIMEOUT};

/// Address of a tracker plus the timeout applied to each exchange.
#[derive(Debug, Clone)]
pub struct TrackerClient {
    addr: PeerAddr,
    timeout: Duration,
}

impl TrackerClient {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            addr: PeerAddr::new(host, port),
            timeout: DEFAULT_IO_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn addr(&self) -> &PeerAddr {
        &self.addr
    }

    /// REGISTER. Returns the tracker's peer count after the upsert.
    pub async fn register(&self, peer_id: &str, host: &str, port: u16) -> Result<usize> {
        let resp = self
            .send(TrackerRequest::Register {
                peer_id: peer_id.to_string(),
                host: host.to_string(),
                port,
            })
            .await?;
        let count = resp.peer_count.ok_or(NodeError::BadReply("missing peer_count"))?;
        info!(%peer_id, tracker = %self.addr, peers = count, "registered with tracker");
        Ok(count)
    }

    /// UNREGISTER. Succeeds whether or not the id was registered.
    pub async fn unregister(&self, peer_id: &str) -> Result<()> {
        self.send(TrackerRequest::Unregister {
            peer_id: peer_id.to_string(),
        })
        .await
        .map(|_| ())
    }

    /// GET_PEERS.
    pub async fn peers(&self) -> Result<Vec<PeerInfo>> {
        let resp = self.send(TrackerRequest::GetPeers).await?;
        Ok(resp.peers.unwrap_or_default())
    }

    /// ANNOUNCE_VIDEO.
    pub async fn announce(&self, peer_id: &str, video_id: &str) -> Result<()> {
        self.send(TrackerRequest::AnnounceVideo {
            peer_id: peer_id.to_string(),
            video_id: video_id.to_string(),
        })
        .await
        .map(|_| ())
    }

    /// FIND_VIDEO: live addresses of peers that announced `video_id`.
    pub async fn find_video(&self, video_id: &str) -> Result<Vec<PeerInfo>> {
        let resp = self
            .send(TrackerRequest::FindVideo {
                video_id: video_id.to_string(),
            })
            .await?;
        Ok(resp.peers.unwrap_or_default())
    }

    /// HEARTBEAT. An unregistered id comes back as [`NodeError::Rejected`].
    pub async fn heartbeat(&self, peer_id: &str) -> Result<()> {
        self.send(TrackerRequest::Heartbeat {
            peer_id: peer_id.to_string(),
        })
        .await
        .map(|_| ())
    }

    async fn send(&self, request: TrackerRequest) -> Result<TrackerResponse> {
        let resp: TrackerResponse =
            transport::exchange(&self.addr.host, self.addr.port, &request, self.timeout)
                .await
                .map_err(|e| {
                    warn!(tracker = %self.addr, error = %e, "error contacting tracker");
                    NodeError::from(e)
                })?;
        if resp.is_success() {
            Ok(resp)
        } else {
            Err(NodeError::Rejected(
                resp.message.unwrap_or_else(|| "unspecified error".to_string()),
            ))
        }
    }
}

impl Default for TrackerClient {
    fn default() -> Self {
        Self::new("localhost", DEFAULT_TRACKER_PORT)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracker::TrackerServer;
    use vidswarm_core::registry::{DEFAULT_PEER_TIMEOUT, DEFAULT_SWEEP_INTERVAL};

    async fn tracker() -> (TrackerServer, TrackerClient) {
        let server = TrackerServer::new(DEFAULT_PEER_TIMEOUT, DEFAULT_SWEEP_INTERVAL);
        let addr = server.start("127.0.0.1", 0).await.unwrap();
        (server, TrackerClient::new("127.0.0.1", addr.port()))
    }

    #[tokio::test]
    async fn full_tracker_conversation() {
        let (server, client) = tracker().await;
        assert_eq!(client.register("alice", "127.0.0.1", 5001).await.unwrap(), 1);
        assert_eq!(client.register("bob", "127.0.0.1", 5002).await.unwrap(), 2);

        client.announce("alice", "vid").await.unwrap();
        let holders = client.find_video("vid").await.unwrap();
        assert_eq!(holders.len(), 1);
        assert_eq!(holders[0].peer_id, "alice");
        assert_eq!(holders[0].port, 5001);

        client.heartbeat("bob").await.unwrap();
        client.unregister("alice").await.unwrap();
        assert!(client.find_video("vid").await.unwrap().is_empty());

        let peers = client.peers().await.unwrap();
        assert_eq!(peers.len(), 1);
        assert_eq!(peers[0].peer_id, "bob");
        server.stop();
    }

    #[tokio::test]
    async fn heartbeat_for_unknown_peer_rejected() {
        let (server, client) = tracker().await;
        let err = client.heartbeat("ghost").await.unwrap_err();
        match err {
            NodeError::Rejected(msg) => assert_eq!(msg, "peer not registered"),
            other => panic!("expected rejection, got {other:?}"),
        }
        server.stop();
    }

    #[tokio::test]
    async fn announce_from_unknown_peer_rejected() {
        let (server, client) = tracker().await;
        assert!(matches!(
            client.announce("ghost", "vid").await,
            Err(NodeError::Rejected(_))
        ));
        server.stop();
    }

    #[tokio::test]
    async fn unreachable_tracker_is_transport_error() {
        // Bind then drop to get a port nobody listens on.
        let port = {
            let l = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
            l.local_addr().unwrap().port()
        };
        let client = TrackerClient::new("127.0.0.1", port).with_timeout(Duration::from_secs(2));
        assert!(matches!(client.peers().await, Err(NodeError::Transport(_))));
    }
}
