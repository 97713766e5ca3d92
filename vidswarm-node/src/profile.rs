//! Saved peer profiles: identity, tracker endpoint and friends.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use tracing::warn;

/// File name used inside the profile directory.
pub const PROFILES_FILE: &str = "profiles.json";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Friend {
    pub peer_id: String,
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    pub peer_id: String,
    pub port: u16,
    pub tracker_host: String,
    pub tracker_port: u16,
    #[serde(default)]
    pub friends: Vec<Friend>,
}

#[derive(Debug, thiserror::Error)]
pub enum ProfileError {
    #[error("writing {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("encoding profiles: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Persistence for [`Profile`]s, keyed by `peer_id`.
pub trait ProfileStore {
    /// Every saved profile. Unreadable storage reads as empty.
    fn load_all_profiles(&self) -> Vec<Profile>;

    /// Insert or replace the profile with the same `peer_id`.
    fn save_profile(&self, profile: Profile) -> Result<(), ProfileError>;

    fn load_profile(&self, peer_id: &str) -> Option<Profile> {
        self.load_all_profiles()
            .into_iter()
            .find(|p| p.peer_id == peer_id)
    }

    /// Returns false if no such profile existed.
    fn delete_profile(&self, peer_id: &str) -> Result<bool, ProfileError>;

    /// Add or update a friend by `friend.peer_id`. False if the profile is unknown.
    fn add_friend(&self, peer_id: &str, friend: Friend) -> Result<bool, ProfileError>;

    /// False if the profile is unknown or had no such friend.
    fn remove_friend(&self, peer_id: &str, friend_peer_id: &str) -> Result<bool, ProfileError>;

    fn get_friends(&self, peer_id: &str) -> Vec<Friend> {
        self.load_profile(peer_id)
            .map(|p| p.friends)
            .unwrap_or_default()
    }
}

/// All profiles in one pretty-printed JSON array at `<dir>/profiles.json`.
///
/// Clones share one lock, so updates through any clone are serialized.
/// Separately constructed stores on the same directory are not coordinated.
#[derive(Debug, Clone)]
pub struct JsonProfileStore {
    path: PathBuf,
    lock: Arc<Mutex<()>>,
}

impl JsonProfileStore {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            path: dir.as_ref().join(PROFILES_FILE),
            lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn write_all(&self, profiles: &[Profile]) -> Result<(), ProfileError> {
        let json = serde_json::to_string_pretty(profiles)?;
        let write_err = |source| ProfileError::Write {
            path: self.path.clone(),
            source,
        };
        if let Some(dir) = self.path.parent() {
            std::fs::create_dir_all(dir).map_err(write_err)?;
        }
        // Temp file, then rename over the target.
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, json).map_err(write_err)?;
        std::fs::rename(&tmp, &self.path).map_err(write_err)
    }

    /// Load, apply `edit`, and write back if it returns true, all under the lock.
    fn modify<F>(&self, edit: F) -> Result<bool, ProfileError>
    where
        F: FnOnce(&mut Vec<Profile>) -> bool,
    {
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        let mut profiles = self.load_all_profiles();
        if !edit(&mut profiles) {
            return Ok(false);
        }
        self.write_all(&profiles)?;
        Ok(true)
    }
}

impl ProfileStore for JsonProfileStore {
    fn load_all_profiles(&self) -> Vec<Profile> {
        let raw = match std::fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Vec::new(),
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "reading profiles");
                return Vec::new();
            }
        };
        serde_json::from_str(&raw).unwrap_or_else(|e| {
            warn!(path = %self.path.display(), error = %e, "parsing profiles");
            Vec::new()
        })
    }

    fn save_profile(&self, profile: Profile) -> Result<(), ProfileError> {
        self.modify(|profiles| {
            match profiles.iter_mut().find(|p| p.peer_id == profile.peer_id) {
                Some(existing) => *existing = profile,
                None => profiles.push(profile),
            }
            true
        })
        .map(|_| ())
    }

    fn delete_profile(&self, peer_id: &str) -> Result<bool, ProfileError> {
        self.modify(|profiles| {
            let before = profiles.len();
            profiles.retain(|p| p.peer_id != peer_id);
            profiles.len() != before
        })
    }

    fn add_friend(&self, peer_id: &str, friend: Friend) -> Result<bool, ProfileError> {
        self.modify(|profiles| {
            let Some(profile) = profiles.iter_mut().find(|p| p.peer_id == peer_id) else {
                return false;
            };
            match profile
                .friends
                .iter_mut()
                .find(|f| f.peer_id == friend.peer_id)
            {
                Some(existing) => *existing = friend,
                None => profile.friends.push(friend),
            }
            true
        })
    }

    fn remove_friend(&self, peer_id: &str, friend_peer_id: &str) -> Result<bool, ProfileError> {
        self.modify(|profiles| {
            let Some(profile) = profiles.iter_mut().find(|p| p.peer_id == peer_id) else {
                return false;
            };
            let before = profile.friends.len();
            profile.friends.retain(|f| f.peer_id != friend_peer_id);
            profile.friends.len() != before
        })
    }
}
