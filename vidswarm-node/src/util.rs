//! Small network and display helpers.

use std::time::Duration;

use tokio::net::UdpSocket;

use crate::transport;

/// Lowest port a peer may be configured to use.
pub const MIN_USER_PORT: u16 = 1024;

/// Human-readable size with one decimal, e.g. `1.5 MB`.
pub fn format_file_size(bytes: u64) -> String {
    let mut size = bytes as f64;
    for unit in ["B", "KB", "MB", "GB", "TB"] {
        if size < 1024.0 {
            return format!("{:.1} {}", size, unit);
        }
        size /= 1024.0;
    }
    format!("{:.1} PB", size)
}

/// True for non-privileged ports.
pub fn validate_port(port: u32) -> bool {
    (u32::from(MIN_USER_PORT)..=u32::from(u16::MAX)).contains(&port)
}

/// Address of the interface that routes outward, or `localhost` if none does.
/// No packet is sent.
pub async fn local_ip() -> String {
    async fn routed_addr() -> std::io::Result<String> {
        let socket = UdpSocket::bind("0.0.0.0:0").await?;
        socket.connect("8.8.8.8:80").await?;
        Ok(socket.local_addr()?.ip().to_string())
    }
    routed_addr().await.unwrap_or_else(|_| "localhost".to_string())
}

/// Whether a TCP connection to `host:port` opens within `timeout`.
pub async fn test_connection(host: &str, port: u16, timeout: Duration) -> bool {
    transport::connect(host, port, timeout).await.is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[test]
    fn sizes() {
        assert_eq!(format_file_size(0), "0.0 B");
        assert_eq!(format_file_size(1023), "1023.0 B");
        assert_eq!(format_file_size(1536), "1.5 KB");
        assert_eq!(format_file_size(2 * 1024 * 1024), "2.0 MB");
        assert_eq!(format_file_size(5 * 1024u64.pow(5)), "5.0 PB");
    }

    #[test]
    fn port_range() {
        assert!(!validate_port(0));
        assert!(!validate_port(1023));
        assert!(validate_port(1024));
        assert!(validate_port(65535));
        assert!(!validate_port(65536));
    }

    #[tokio::test]
    async fn local_ip_is_never_empty() {
        assert!(!local_ip().await.is_empty());
    }

    #[tokio::test]
    async fn test_connection_sees_listener_come_and_go() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        assert!(test_connection("127.0.0.1", port, Duration::from_secs(2)).await);
        drop(listener);
        assert!(!test_connection("127.0.0.1", port, Duration::from_secs(2)).await);
    }
}
