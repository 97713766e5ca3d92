//! TCP transport: one length-prefixed JSON frame each way per connection.

use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time;
use vidswarm_core::wire::{self, FrameDecodeError, FrameEncodeError, LEN_SIZE};

/// Default bound on connects and single reads.
pub const DEFAULT_IO_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("connection closed before a full frame arrived")]
    Closed,
    #[error("timed out")]
    TimedOut,
    #[error(transparent)]
    Encode(#[from] FrameEncodeError),
    #[error(transparent)]
    Decode(#[from] FrameDecodeError),
}

impl TransportError {
    /// True when the bytes arrived but did not form a valid message.
    pub fn is_protocol(&self) -> bool {
        matches!(self, TransportError::Decode(_))
    }
}

/// Read exactly one frame and parse it.
pub async fn read_frame<T, R>(reader: &mut R) -> Result<T, TransportError>
where
    T: DeserializeOwned,
    R: AsyncRead + Unpin,
{
    let mut len_buf = [0u8; LEN_SIZE];
    read_exact_or_closed(reader, &mut len_buf).await?;
    let len = wire::payload_len(len_buf)?;
    let mut payload = vec![0u8; len];
    read_exact_or_closed(reader, &mut payload).await?;
    Ok(wire::decode_payload(&payload)?)
}

/// Encode and write one frame, then flush.
pub async fn write_frame<T, W>(writer: &mut W, msg: &T) -> Result<(), TransportError>
where
    T: Serialize,
    W: AsyncWrite + Unpin,
{
    let frame = wire::encode_frame(msg)?;
    writer.write_all(&frame).await?;
    writer.flush().await?;
    Ok(())
}

/// Open a connection to `host:port`, bounded by `timeout`.
pub async fn connect(host: &str, port: u16, timeout: Duration) -> Result<TcpStream, TransportError> {
    match time::timeout(timeout, TcpStream::connect((host, port))).await {
        Ok(stream) => Ok(stream?),
        Err(_) => Err(TransportError::TimedOut),
    }
}

/// Run `fut` under `timeout`, mapping expiry to [`TransportError::TimedOut`].
pub async fn with_timeout<T, F>(timeout: Duration, fut: F) -> Result<T, TransportError>
where
    F: std::future::Future<Output = Result<T, TransportError>>,
{
    time::timeout(timeout, fut)
        .await
        .map_err(|_| TransportError::TimedOut)?
}

/// One request/response exchange on a fresh connection.
pub async fn exchange<Req, Resp>(
    host: &str,
    port: u16,
    request: &Req,
    timeout: Duration,
) -> Result<Resp, TransportError>
where
    Req: Serialize,
    Resp: DeserializeOwned,
{
    let mut stream = connect(host, port, timeout).await?;
    write_frame(&mut stream, request).await?;
    let response = with_timeout(timeout, read_frame(&mut stream)).await?;
    let _ = stream.shutdown().await;
    Ok(response)
}

async fn read_exact_or_closed<R: AsyncRead + Unpin>(
    reader: &mut R,
    buf: &mut [u8],
) -> Result<(), TransportError> {
    match reader.read_exact(buf).await {
        Ok(_) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => Err(TransportError::Closed),
        Err(e) => Err(e.into()),
    }
}
