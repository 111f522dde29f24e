//! Persistent profile store (`profiles.json`).
//!
//! Every read-modify-write happens under a single mutex, and every write is
//! atomic: the store is serialized to a temp file in the same directory which
//! is then renamed over the target, so readers never see a partially written
//! file.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};

use super::types::{ActionKind, ActionOutcome, Profile, ProfileStore};
use crate::error::{AppError, Result};
use crate::paths::write_atomic;

const STORE_FILE_MODE: u32 = 0o644;

pub struct ProfileRepository {
    path: PathBuf,
    lock: Mutex<()>,
}

impl ProfileRepository {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the store. A missing or blank file is an empty store.
    pub fn load(&self) -> Result<ProfileStore> {
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        read_store(&self.path)
    }

    /// Replace the whole store atomically.
    pub fn save(&self, store: &ProfileStore) -> Result<()> {
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        write_store_atomic(&self.path, store)
    }

    /// Execute a read-modify-write operation on the store while holding the lock.
    /// Nothing is written when `f` fails.
    pub fn with_store_mut<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut ProfileStore) -> Result<T>,
    {
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        let mut store = read_store(&self.path)?;
        let result = f(&mut store)?;
        write_store_atomic(&self.path, &store)?;
        Ok(result)
    }

    /// Execute `f` against a single profile, persisting its changes.
    pub fn with_profile_mut<F, T>(&self, id: &str, f: F) -> Result<T>
    where
        F: FnOnce(&mut Profile) -> Result<T>,
    {
        self.with_store_mut(|store| {
            let profile = store
                .find_mut(id)
                .ok_or_else(|| AppError::profile_not_found(id))?;
            f(profile)
        })
    }

    pub fn get(&self, id: &str) -> Result<Profile> {
        self.load()?
            .find(id)
            .cloned()
            .ok_or_else(|| AppError::profile_not_found(id))
    }

    /// Record an action result. Successful (or warning) start actions mark the
    /// profile enabled with the given starting window; a successful stop
    /// disables it and clears the window.
    pub fn mark_result(
        &self,
        id: &str,
        action: ActionKind,
        outcome: ActionOutcome,
        message: &str,
        starting_until: Option<DateTime<Utc>>,
    ) -> Result<()> {
        self.with_profile_mut(id, |profile| {
            profile.record_action(action, outcome, message, Utc::now());
            if outcome != ActionOutcome::Failed {
                if action.is_start() {
                    profile.enabled = true;
                    profile.starting_until = starting_until;
                } else if action == ActionKind::Stop {
                    profile.enabled = false;
                    profile.starting_until = None;
                }
            }
            Ok(())
        })
    }

    /// Write the requested version ahead of the rebuild and return the
    /// profile as it was before the change.
    pub fn begin_version_update(&self, id: &str, version: &str) -> Result<Profile> {
        self.with_profile_mut(id, |profile| {
            let previous = profile.clone();
            profile.version = version.to_string();
            profile.last_requested_version = Some(version.to_string());
            Ok(previous)
        })
    }

    /// Record a failed version update. A successful rollback restores
    /// `previous`; otherwise the attempted version stays recorded.
    pub fn restore_version(
        &self,
        id: &str,
        attempted: &str,
        previous: &str,
        rollback_ok: bool,
    ) -> Result<()> {
        self.with_profile_mut(id, |profile| {
            let message = if rollback_ok {
                profile.version = previous.to_string();
                format!(
                    "Version update to {} failed and rolled back to {}",
                    attempted, previous
                )
            } else {
                format!(
                    "Version update to {} failed; rollback also failed (previous version {})",
                    attempted, previous
                )
            };
            profile.record_action(ActionKind::Version, ActionOutcome::Failed, &message, Utc::now());
            Ok(())
        })
    }

    /// Remove a profile record and return it.
    pub fn remove(&self, id: &str) -> Result<Profile> {
        self.with_store_mut(|store| {
            let idx = store
                .position(id)
                .ok_or_else(|| AppError::profile_not_found(id))?;
            Ok(store.profiles.remove(idx))
        })
    }
}

fn read_store(path: &Path) -> Result<ProfileStore> {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(ProfileStore::default()),
        Err(e) => {
            return Err(AppError::io(format!(
                "Failed to read {}: {}",
                path.display(),
                e
            )))
        }
    };
    if content.trim().is_empty() {
        return Ok(ProfileStore::default());
    }

    serde_json::from_str(&content).map_err(|e| {
        log::error!("Profile store {} is corrupted: {}", path.display(), e);
        AppError::store_corrupted(format!("profiles.json is corrupted: {}", e))
    })
}

fn write_store_atomic(path: &Path, store: &ProfileStore) -> Result<()> {
    let content = serde_json::to_vec_pretty(store)?;
    write_atomic(path, &content, STORE_FILE_MODE)
}
