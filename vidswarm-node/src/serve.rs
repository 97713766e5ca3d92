//! Inbound peer requests: LIST_VIDEOS, GET_VIDEO_INFO, DOWNLOAD_VIDEO.

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, info, warn};
use vidswarm_core::protocol::{CHUNK_SIZE, DOWNLOAD_ACK};
use vidswarm_core::{
    DownloadHeader, ErrorResponse, PeerRequest, Status, VideoInfoResponse, VideoListResponse,
};

use crate::peer::PeerNode;
use crate::transport::{self, TransportError};

/// Serve one request on `stream`, then close it.
pub(crate) async fn handle_connection(
    mut stream: TcpStream,
    node: &PeerNode,
) -> Result<(), TransportError> {
    let timeout = node.inner.io_timeout;
    let request = transport::with_timeout(
        timeout,
        transport::read_frame::<PeerRequest, _>(&mut stream),
    )
    .await;
    match request {
        Ok(PeerRequest::ListVideos) => {
            let videos = node.inner.library.lock().await.summaries();
            debug!(peer_id = %node.peer_id(), count = videos.len(), "LIST_VIDEOS");
            let resp = VideoListResponse {
                status: Status::Success,
                message: None,
                videos,
            };
            transport::write_frame(&mut stream, &resp).await?;
        }
        Ok(PeerRequest::GetVideoInfo { video_id }) => {
            let found = node.video(&video_id).await;
            let resp = match found {
                Some(meta) => VideoInfoResponse {
                    status: Status::Success,
                    message: None,
                    video_info: Some(meta),
                },
                None => VideoInfoResponse {
                    status: Status::NotFound,
                    message: Some("video not found".to_string()),
                    video_info: None,
                },
            };
            transport::write_frame(&mut stream, &resp).await?;
        }
        Ok(PeerRequest::DownloadVideo { video_id }) => {
            serve_download(&mut stream, node, &video_id).await?;
        }
        Err(TransportError::Io(e)) => return Err(TransportError::Io(e)),
        Err(e) => {
            warn!(peer_id = %node.peer_id(), error = %e, "bad request");
            transport::write_frame(&mut stream, &ErrorResponse::new(format!("bad request: {}", e)))
                .await?;
        }
    }
    let _ = stream.shutdown().await;
    Ok(())
}

/// Header, wait for ACK, then the raw file in [`CHUNK_SIZE`] slices.
async fn serve_download(
    stream: &mut TcpStream,
    node: &PeerNode,
    video_id: &str,
) -> Result<(), TransportError> {
    let Some(meta) = node.video(video_id).await else {
        debug!(peer_id = %node.peer_id(), %video_id, "DOWNLOAD_VIDEO: not found");
        return transport::write_frame(stream, &DownloadHeader::not_found()).await;
    };
    let mut file = match tokio::fs::File::open(&meta.local_path).await {
        Ok(f) => f,
        Err(e) => {
            warn!(
                peer_id = %node.peer_id(),
                path = %meta.local_path.display(),
                error = %e,
                "cannot open stored video"
            );
            return transport::write_frame(stream, &ErrorResponse::new("video unavailable")).await;
        }
    };
    let size = file.metadata().await?.len();
    transport::write_frame(stream, &DownloadHeader::found(size, meta.name.clone())).await?;

    let mut ack = [0u8; DOWNLOAD_ACK.len()];
    let acked = transport::with_timeout(node.inner.io_timeout, async {
        stream.read_exact(&mut ack).await?;
        Ok(())
    })
    .await;
    if acked.is_err() || &ack != DOWNLOAD_ACK {
        debug!(peer_id = %node.peer_id(), %video_id, "download not acknowledged");
        return Ok(());
    }

    let mut buf = vec![0u8; CHUNK_SIZE];
    let mut sent = 0u64;
    loop {
        let n = file.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        stream.write_all(&buf[..n]).await?;
        sent += n as u64;
    }
    stream.flush().await?;
    info!(peer_id = %node.peer_id(), %video_id, bytes = sent, "sent video");
    Ok(())
}
