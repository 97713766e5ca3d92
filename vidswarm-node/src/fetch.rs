//! Outbound peer requests: listing, metadata and downloads.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};
use vidswarm_core::protocol::{CHUNK_SIZE, DOWNLOAD_ACK};
use vidswarm_core::{
    DownloadHeader, PeerAddr, PeerRequest, Status, VideoInfoResponse, VideoListResponse,
    VideoMetadata, VideoSource, VideoSummary,
};

use crate::error::{NodeError, Result};
use crate::peer::{part_path, PeerNode};
use crate::transport;

impl PeerNode {
    /// LIST_VIDEOS against one peer.
    pub async fn try_request_video_list(&self, host: &str, port: u16) -> Result<Vec<VideoSummary>> {
        let resp: VideoListResponse = transport::exchange(
            host,
            port,
            &PeerRequest::ListVideos,
            self.inner.io_timeout,
        )
        .await?;
        match resp.status {
            Status::Success => Ok(resp.videos),
            _ => Err(NodeError::Rejected(
                resp.message.unwrap_or_else(|| "video list refused".to_string()),
            )),
        }
    }

    /// Like [`try_request_video_list`](Self::try_request_video_list), but any
    /// failure is logged and yields an empty list.
    pub async fn request_video_list(&self, host: &str, port: u16) -> Vec<VideoSummary> {
        match self.try_request_video_list(host, port).await {
            Ok(videos) => videos,
            Err(e) => {
                warn!(
                    peer_id = %self.peer_id(),
                    remote = %PeerAddr::new(host, port),
                    error = %e,
                    "error requesting video list"
                );
                Vec::new()
            }
        }
    }

    /// GET_VIDEO_INFO. `Ok(None)` when the peer does not hold the video.
    pub async fn request_video_info(
        &self,
        host: &str,
        port: u16,
        video_id: &str,
    ) -> Result<Option<VideoMetadata>> {
        let resp: VideoInfoResponse = transport::exchange(
            host,
            port,
            &PeerRequest::GetVideoInfo {
                video_id: video_id.to_string(),
            },
            self.inner.io_timeout,
        )
        .await?;
        match resp.status {
            Status::Success => resp
                .video_info
                .map(Some)
                .ok_or(NodeError::BadReply("missing video_info")),
            Status::NotFound => Ok(None),
            Status::Error => Err(NodeError::Rejected(
                resp.message.unwrap_or_else(|| "video info refused".to_string()),
            )),
        }
    }

    /// Fetch `video_id` from `host:port` into `save_path` (default
    /// `<storage_dir>/<video_id>.mp4`) and add it to the library.
    ///
    /// Bytes land in a `.part` sibling that replaces `save_path` only once the
    /// advertised size has arrived. A short stream returns
    /// [`NodeError::Truncated`] and leaves any existing file untouched.
    pub async fn download_video(
        &self,
        host: &str,
        port: u16,
        video_id: &str,
        save_path: Option<&Path>,
    ) -> Result<VideoMetadata> {
        let timeout = self.inner.io_timeout;
        let mut stream = transport::connect(host, port, timeout).await?;
        transport::write_frame(
            &mut stream,
            &PeerRequest::DownloadVideo {
                video_id: video_id.to_string(),
            },
        )
        .await?;
        let header: DownloadHeader =
            transport::with_timeout(timeout, transport::read_frame(&mut stream)).await?;
        let size = match header.status {
            Status::Success => header.size.ok_or(NodeError::BadReply("missing size"))?,
            Status::NotFound => {
                info!(peer_id = %self.peer_id(), %video_id, remote = %PeerAddr::new(host, port), "video not found on peer");
                return Err(NodeError::NotFound(video_id.to_string()));
            }
            Status::Error => {
                return Err(NodeError::Rejected(
                    header.message.unwrap_or_else(|| "download refused".to_string()),
                ))
            }
        };

        let dest: PathBuf = match save_path {
            Some(p) => p.to_path_buf(),
            None => self.stored_path(video_id),
        };
        if let Some(parent) = dest.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| NodeError::file("create", parent, e))?;
        }

        stream.write_all(DOWNLOAD_ACK).await?;
        stream.flush().await?;
        debug!(peer_id = %self.peer_id(), %video_id, size, "receiving video");

        let part = part_path(&dest);
        let received = match receive_to_file(&mut stream, &part, size, timeout).await {
            Ok(()) => tokio::fs::rename(&part, &dest)
                .await
                .map_err(|e| NodeError::file("rename", &part, e)),
            Err(e) => Err(e),
        };
        if let Err(e) = received {
            let _ = tokio::fs::remove_file(&part).await;
            warn!(peer_id = %self.peer_id(), %video_id, error = %e, "download failed");
            return Err(e);
        }
        let _ = stream.shutdown().await;

        let meta = VideoMetadata {
            video_id: video_id.to_string(),
            name: header.name.unwrap_or_else(|| video_id.to_string()),
            description: String::new(),
            size_bytes: size,
            local_path: dest,
            added_at: SystemTime::now(),
            source: VideoSource::Downloaded {
                from: PeerAddr::new(host, port),
            },
        };
        self.inner.library.lock().await.insert(meta.clone());
        info!(peer_id = %self.peer_id(), %video_id, remote = %PeerAddr::new(host, port), "downloaded video");
        Ok(meta)
    }

    /// Video lists of every known peer, queried concurrently. Peers that fail
    /// are left out; peers with nothing to share map to an empty list.
    pub async fn get_all_network_videos(&self) -> HashMap<PeerAddr, Vec<VideoSummary>> {
        let mut set = JoinSet::new();
        for addr in self.known_peers().await {
            let node = self.clone();
            set.spawn(async move {
                let result = node.try_request_video_list(&addr.host, addr.port).await;
                (addr, result)
            });
        }
        let mut out = HashMap::new();
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((addr, Ok(videos))) => {
                    out.insert(addr, videos);
                }
                Ok((addr, Err(e))) => {
                    warn!(peer_id = %self.peer_id(), remote = %addr, error = %e, "skipping peer");
                }
                Err(e) => warn!(peer_id = %self.peer_id(), error = %e, "listing task failed"),
            }
        }
        out
    }
}

/// Copy exactly `size` bytes from `reader` into a new file at `dest`.
async fn receive_to_file<R: AsyncRead + Unpin>(
    reader: &mut R,
    dest: &Path,
    size: u64,
    timeout: Duration,
) -> Result<()> {
    let mut file = tokio::fs::File::create(dest)
        .await
        .map_err(|e| NodeError::file("create", dest, e))?;
    let mut buf = vec![0u8; CHUNK_SIZE];
    let mut received = 0u64;
    while received < size {
        let want = (size - received).min(CHUNK_SIZE as u64) as usize;
        let n = transport::with_timeout(timeout, async {
            Ok(reader.read(&mut buf[..want]).await?)
        })
        .await?;
        if n == 0 {
            return Err(NodeError::Truncated {
                received,
                expected: size,
            });
        }
        file.write_all(&buf[..n])
            .await
            .map_err(|e| NodeError::file("write", dest, e))?;
        received += n as u64;
    }
    file.flush()
        .await
        .map_err(|e| NodeError::file("write", dest, e))?;
    Ok(())
}
