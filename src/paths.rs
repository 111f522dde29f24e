//! Centralized path utilities for the launcher data directory.

use std::fs;
use std::io::Write as _;
use std::path::{Path, PathBuf};

use crate::error::{AppError, Result};

/// Directory name used under the user config dir when no data dir is configured.
const APP_DIR_NAME: &str = "KimmioLauncher";

/// Get the default root data directory (<user config dir>/KimmioLauncher).
///
/// Falls back to `~/.config` and finally to a relative `data` directory.
pub fn default_data_dir() -> PathBuf {
    if let Some(base) = dirs::config_dir() {
        return base.join(APP_DIR_NAME);
    }
    match dirs::home_dir() {
        Some(home) => home.join(".config").join(APP_DIR_NAME),
        None => PathBuf::from("data"),
    }
}

/// Filesystem layout rooted at the launcher data directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataPaths {
    root: PathBuf,
}

impl DataPaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Get the path to the optional config file.
    pub fn config_file(&self) -> PathBuf {
        self.root.join("config.toml")
    }

    /// Get the path to the profile store.
    pub fn profiles_file(&self) -> PathBuf {
        self.root.join("profiles.json")
    }

    pub fn secrets_dir(&self) -> PathBuf {
        self.root.join("secrets")
    }

    pub fn compose_root(&self) -> PathBuf {
        self.root.join("compose")
    }

    /// Get the generated compose directory for a profile.
    pub fn compose_dir(&self, profile_id: &str) -> PathBuf {
        self.compose_root().join(profile_id)
    }

    pub fn compose_file(&self, profile_id: &str) -> PathBuf {
        self.compose_dir(profile_id).join("compose.yaml")
    }

    pub fn compose_env_file(&self, profile_id: &str) -> PathBuf {
        self.compose_dir(profile_id).join(".env")
    }

    /// Check if a profile has generated compose artifacts on disk.
    pub fn has_compose_artifacts(&self, profile_id: &str) -> bool {
        self.compose_file(profile_id).is_file()
    }

    /// Ensure all required data directories exist.
    pub fn ensure_dirs(&self) -> Result<()> {
        fs::create_dir_all(&self.root).map_err(|e| AppError::io(e.to_string()))?;
        fs::create_dir_all(self.compose_root()).map_err(|e| AppError::io(e.to_string()))?;
        Ok(())
    }
}

/// Replace `path` atomically. The content is written to a temp file in the
/// same directory that already carries `mode`, then renamed over the target.
pub(crate) fn write_atomic(path: &Path, content: &[u8], mode: u32) -> Result<()> {
    let parent = path
        .parent()
        .ok_or_else(|| AppError::io(format!("No parent directory for {}", path.display())))?;
    fs::create_dir_all(parent)
        .map_err(|e| AppError::io(format!("Failed to create {}: {}", parent.display(), e)))?;

    let mut tmp = tempfile::NamedTempFile::new_in(parent).map_err(|e| {
        AppError::io(format!(
            "Failed to create temp file in {}: {}",
            parent.display(),
            e
        ))
    })?;
    set_mode(tmp.as_file(), mode)?;
    tmp.write_all(content)
        .and_then(|()| tmp.as_file().sync_all())
        .map_err(|e| AppError::io(format!("Failed to write temp file for {}: {}", path.display(), e)))?;

    tmp.persist(path)
        .map_err(|e| AppError::io(format!("Failed to replace {}: {}", path.display(), e)))?;
    Ok(())
}

/// Restrict an existing file or directory to `mode`. No-op off unix.
pub(crate) fn restrict_permissions(path: &Path, mode: u32) -> Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt as _;
        fs::set_permissions(path, fs::Permissions::from_mode(mode)).map_err(|e| {
            AppError::io(format!("Failed to set permissions on {}: {}", path.display(), e))
        })?;
    }
    #[cfg(not(unix))]
    let _ = (path, mode);
    Ok(())
}

fn set_mode(file: &fs::File, mode: u32) -> Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt as _;
        file.set_permissions(fs::Permissions::from_mode(mode))
            .map_err(|e| AppError::io(format!("Failed to set permissions on temp file: {}", e)))?;
    }
    #[cfg(not(unix))]
    let _ = (file, mode);
    Ok(())
}
