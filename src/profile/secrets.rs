//! Per-profile secret material (`secrets/<id>.env`).
//!
//! Secrets never enter `profiles.json`. They are kept as `KEY=value` lines in
//! an owner-only file next to the store.

use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;

use base64::engine::general_purpose::{STANDARD, STANDARD_NO_PAD, URL_SAFE_NO_PAD};
use base64::Engine as _;
use rand::RngCore as _;

use crate::error::{AppError, Result};
use crate::paths::{restrict_permissions, write_atomic};

pub const JWT_SECRET_KEY: &str = "JWT_SECRET";
pub const ENC_KEY: &str = "ENC_KEY_V0";
/// Earlier name of the encryption key, migrated on read.
pub const LEGACY_ENC_KEY: &str = "FLUMIO_ENC_KEY_V0";

/// Minimum length of a generated or accepted JWT secret.
pub const MIN_JWT_SECRET_LEN: usize = 32;

/// Mode of every file that carries secret values.
pub const SECRET_FILE_MODE: u32 = 0o600;

/// Split a user-supplied env map into public and secret halves.
pub fn split_secret_env(
    env: BTreeMap<String, String>,
) -> (BTreeMap<String, String>, BTreeMap<String, String>) {
    env.into_iter()
        .partition(|(k, _)| !matches!(k.as_str(), JWT_SECRET_KEY | ENC_KEY | LEGACY_ENC_KEY))
}

/// A URL-safe random token of exactly `min_len` characters (at least 32).
pub fn random_token(min_len: usize) -> String {
    let len = min_len.max(MIN_JWT_SECRET_LEN);
    let mut buf = vec![0u8; len];
    rand::thread_rng().fill_bytes(&mut buf);
    let mut token = URL_SAFE_NO_PAD.encode(&buf);
    token.truncate(len);
    token
}

/// 32 random bytes, standard base64 with padding.
pub fn random_key_32() -> String {
    let mut buf = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut buf);
    STANDARD.encode(buf)
}

/// Canonicalize an encryption key to padded base64 of 32 bytes.
///
/// Accepts padded or unpadded base64 of 32 bytes, and raw 32-character
/// strings written by older launchers.
pub fn normalize_encryption_key(value: &str) -> Option<String> {
    let v = value.trim();
    if v.is_empty() {
        return None;
    }
    if STANDARD.decode(v).is_ok_and(|d| d.len() == 32) {
        return Some(v.to_string());
    }
    if let Ok(decoded) = STANDARD_NO_PAD.decode(v) {
        if decoded.len() == 32 {
            return Some(STANDARD.encode(decoded));
        }
    }
    if v.len() == 32 {
        return Some(STANDARD.encode(v.as_bytes()));
    }
    None
}

/// A fresh JWT secret and encryption key.
pub fn generate_secrets() -> BTreeMap<String, String> {
    BTreeMap::from([
        (JWT_SECRET_KEY.to_string(), random_token(48)),
        (ENC_KEY.to_string(), random_key_32()),
    ])
}

/// Reads and writes secret files under `<dataDir>/secrets`.
#[derive(Debug, Clone)]
pub struct SecretStore {
    dir: PathBuf,
}

impl SecretStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn file_path(&self, profile_id: &str) -> PathBuf {
        self.dir.join(format!("{}.env", profile_id))
    }

    /// Replace the secret file for a profile. An empty map writes nothing.
    pub fn save(&self, profile_id: &str, secrets: &BTreeMap<String, String>) -> Result<()> {
        if secrets.is_empty() {
            return Ok(());
        }
        fs::create_dir_all(&self.dir)
            .map_err(|e| AppError::io(format!("Failed to create secrets dir: {}", e)))?;
        restrict_permissions(&self.dir, 0o700)?;

        let mut content = String::new();
        for (k, v) in secrets {
            content.push_str(k);
            content.push('=');
            content.push_str(v.trim());
            content.push('\n');
        }

        write_atomic(&self.file_path(profile_id), content.as_bytes(), SECRET_FILE_MODE)
    }

    /// Load a profile's secrets. A missing or unreadable file yields an empty map.
    pub fn load(&self, profile_id: &str) -> BTreeMap<String, String> {
        let path = self.file_path(profile_id);
        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) => {
                if e.kind() != std::io::ErrorKind::NotFound {
                    log::warn!("Failed to read secrets for {}: {}", profile_id, e);
                }
                return BTreeMap::new();
            }
        };

        let mut secrets: BTreeMap<String, String> = content
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('#'))
            .filter_map(|line| line.split_once('='))
            .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
            .filter(|(k, _)| !k.is_empty())
            .collect();

        if let Some(legacy) = secrets.remove(LEGACY_ENC_KEY) {
            let current_empty = secrets.get(ENC_KEY).is_none_or(|v| v.is_empty());
            if current_empty && !legacy.is_empty() {
                secrets.insert(ENC_KEY.to_string(), legacy);
            }
        }
        secrets
    }

    pub fn remove(&self, profile_id: &str) -> Result<()> {
        match fs::remove_file(self.file_path(profile_id)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(AppError::io(format!(
                "Failed to remove secrets for {}: {}",
                profile_id, e
            ))),
        }
    }
}
