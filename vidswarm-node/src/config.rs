//! Load config from file and environment.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use vidswarm_core::registry::{DEFAULT_PEER_TIMEOUT, DEFAULT_SWEEP_INTERVAL};
use vidswarm_core::DEFAULT_TRACKER_PORT;

use crate::peer::DEFAULT_HEARTBEAT_INTERVAL;

/// Node configuration. File: ~/.config/vidswarm/config.toml or /etc/vidswarm/config.toml.
/// Env overrides: VIDSWARM_TRACKER_HOST, VIDSWARM_TRACKER_PORT,
/// VIDSWARM_PEER_TIMEOUT_SECS, VIDSWARM_SWEEP_INTERVAL_SECS.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub tracker: TrackerConfig,
    #[serde(default)]
    pub peer: PeerConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TrackerConfig {
    /// Bind host (default localhost).
    #[serde(default = "default_host")]
    pub host: String,
    /// Listen port (default 6000).
    #[serde(default = "default_tracker_port")]
    pub port: u16,
    /// Seconds without a heartbeat before a peer is evicted (default 300).
    #[serde(default = "default_peer_timeout_secs")]
    pub peer_timeout_secs: u64,
    /// Seconds between eviction sweeps (default 60).
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PeerConfig {
    /// Bind host for the peer's own server (default localhost).
    #[serde(default = "default_host")]
    pub host: String,
    /// Peer listen port (default 5000).
    #[serde(default = "default_peer_port")]
    pub port: u16,
    /// Where stored and downloaded videos live. Defaults to `peer_videos_<peer_id>`.
    #[serde(default)]
    pub storage_dir: Option<PathBuf>,
    /// Seconds between tracker heartbeats (default 60).
    #[serde(default = "default_heartbeat_interval_secs")]
    pub heartbeat_interval_secs: u64,
    /// Bound on connects and single reads, in seconds (default 10).
    #[serde(default = "default_io_timeout_secs")]
    pub io_timeout_secs: u64,
}

fn default_host() -> String {
    "localhost".to_string()
}
fn default_tracker_port() -> u16 {
    DEFAULT_TRACKER_PORT
}
fn default_peer_port() -> u16 {
    5000
}
fn default_peer_timeout_secs() -> u64 {
    DEFAULT_PEER_TIMEOUT.as_secs()
}
fn default_sweep_interval_secs() -> u64 {
    DEFAULT_SWEEP_INTERVAL.as_secs()
}
fn default_heartbeat_interval_secs() -> u64 {
    DEFAULT_HEARTBEAT_INTERVAL.as_secs()
}
fn default_io_timeout_secs() -> u64 {
    10
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_tracker_port(),
            peer_timeout_secs: default_peer_timeout_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
        }
    }
}

impl TrackerConfig {
    pub fn peer_timeout(&self) -> Duration {
        Duration::from_secs(self.peer_timeout_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }
}

impl Default for PeerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_peer_port(),
            storage_dir: None,
            heartbeat_interval_secs: default_heartbeat_interval_secs(),
            io_timeout_secs: default_io_timeout_secs(),
        }
    }
}

impl PeerConfig {
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs.max(1))
    }

    pub fn io_timeout(&self) -> Duration {
        Duration::from_secs(self.io_timeout_secs.max(1))
    }

    /// Storage directory for `peer_id`, falling back to `peer_videos_<peer_id>`.
    pub fn storage_dir_for(&self, peer_id: &str) -> PathBuf {
        self.storage_dir
            .clone()
            .unwrap_or_else(|| PathBuf::from(format!("peer_videos_{}", peer_id)))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("reading {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("parsing {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

/// Load config: merge default, then config file (if present), then env vars.
pub fn load() -> Config {
    let mut c = load_file().unwrap_or_default();
    apply_env(&mut c);
    c
}

/// Load an explicitly named file, then apply env vars. Errors are not swallowed.
pub fn load_from(path: &Path) -> Result<Config, ConfigError> {
    let mut c = parse_file(path)?;
    apply_env(&mut c);
    Ok(c)
}

fn apply_env(c: &mut Config) {
    if let Ok(s) = std::env::var("VIDSWARM_TRACKER_HOST") {
        if !s.is_empty() {
            c.tracker.host = s;
        }
    }
    if let Ok(s) = std::env::var("VIDSWARM_TRACKER_PORT") {
        if let Ok(p) = s.parse::<u16>() {
            c.tracker.port = p;
        }
    }
    if let Ok(s) = std::env::var("VIDSWARM_PEER_TIMEOUT_SECS") {
        if let Ok(v) = s.parse::<u64>() {
            c.tracker.peer_timeout_secs = v;
        }
    }
    if let Ok(s) = std::env::var("VIDSWARM_SWEEP_INTERVAL_SECS") {
        if let Ok(v) = s.parse::<u64>() {
            c.tracker.sweep_interval_secs = v;
        }
    }
}

fn config_paths() -> Vec<PathBuf> {
    let home = std::env::var_os("HOME").map(PathBuf::from);
    let mut out = Vec::new();
    if let Some(h) = home {
        out.push(h.join(".config/vidswarm/config.toml"));
    }
    out.push(PathBuf::from("/etc/vidswarm/config.toml"));
    out
}

fn load_file() -> Option<Config> {
    let path = config_paths().into_iter().find(|p| p.exists())?;
    match parse_file(&path) {
        Ok(c) => Some(c),
        Err(e) => {
            tracing::warn!(error = %e, "ignoring config file");
            None
        }
    }
}

fn parse_file(path: &Path) -> Result<Config, ConfigError> {
    let s = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    toml::from_str::<Config>(&s).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_protocol() {
        let c = Config::default();
        assert_eq!(c.tracker.host, "localhost");
        assert_eq!(c.tracker.port, 6000);
        assert_eq!(c.tracker.peer_timeout(), Duration::from_secs(300));
        assert_eq!(c.tracker.sweep_interval(), Duration::from_secs(60));
        assert!(c.tracker.sweep_interval() < c.tracker.peer_timeout());
        assert_eq!(
            c.peer.storage_dir_for("alice"),
            PathBuf::from("peer_videos_alice")
        );
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let c: Config = toml::from_str(
            r#"
            [tracker]
            port = 7000

            [peer]
            storage_dir = "/var/lib/vidswarm"
            "#,
        )
        .unwrap();
        assert_eq!(c.tracker.port, 7000);
        assert_eq!(c.tracker.host, "localhost");
        assert_eq!(c.tracker.peer_timeout_secs, 300);
        assert_eq!(
            c.peer.storage_dir_for("bob"),
            PathBuf::from("/var/lib/vidswarm")
        );
        assert_eq!(c.peer.port, 5000);
    }

    #[test]
    fn unknown_keys_rejected() {
        assert!(toml::from_str::<Config>("[tracker]\nbogus = 1\n").is_err());
    }

    #[test]
    fn missing_explicit_file_is_error() {
        let path = std::env::temp_dir().join(format!("vidswarm-missing-{}.toml", uuid::Uuid::new_v4()));
        assert!(matches!(load_from(&path), Err(ConfigError::Read { .. })));
    }
}
