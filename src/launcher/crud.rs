//! Profile creation and suggestions for new profiles.

use std::collections::BTreeMap;

use chrono::Utc;
use serde::Deserialize;

use super::Launcher;
use crate::error::{AppError, Result};
use crate::profile::secrets::{
    normalize_encryption_key, random_key_32, random_token, split_secret_env, ENC_KEY,
    JWT_SECRET_KEY, LEGACY_ENC_KEY, MIN_JWT_SECRET_LEN,
};
use crate::profile::types::{DEFAULT_CONTAINER_PORT, DEFAULT_HOST_PORT};
use crate::profile::{
    ActionKind, ActionOutcome, PortMapping, Profile, ProfileStore, Resources,
};
use crate::validation::{
    is_safe_env_key, is_valid_domain, is_valid_memory, validate_profile_id, validate_version_tag,
};

const MIN_PROFILE_PORT: u16 = 1024;

/// A request to create a profile, before normalization.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProfileDraft {
    pub id: String,
    pub version: String,
    pub ports: Vec<PortMapping>,
    pub env: BTreeMap<String, String>,
    pub resources: Resources,
}

/// Trim, default and validate a draft. Store-dependent checks happen in
/// [`Launcher::create_profile`].
pub fn normalize_draft(mut draft: ProfileDraft) -> Result<ProfileDraft> {
    draft.id = draft.id.trim().to_lowercase();
    validate_profile_id(&draft.id)?;

    draft.version = draft.version.trim().to_string();
    if draft.version.is_empty() {
        draft.version = "latest".to_string();
    }
    validate_version_tag(&draft.version)?;

    if draft.ports.is_empty() {
        draft.ports.push(PortMapping {
            container: DEFAULT_CONTAINER_PORT,
            host: DEFAULT_HOST_PORT,
        });
    }
    if draft.ports[0].host == 0 {
        return Err(AppError::validation("host port must be in range 1..65535"));
    }
    if draft.ports[0].container == 0 {
        draft.ports[0].container = DEFAULT_CONTAINER_PORT;
    }

    let memory = draft.resources.limits.memory.trim().to_string();
    if !memory.is_empty() && !is_valid_memory(&memory) {
        return Err(AppError::validation(
            "memory must look like 512mb / 1gb / 2g / 4096m (or empty for default)",
        ));
    }
    draft.resources.limits.memory = memory;
    if draft.resources.limits.cpus < 0.0 || !draft.resources.limits.cpus.is_finite() {
        return Err(AppError::validation("cpus cannot be negative"));
    }

    if let Some(key) = draft.env.keys().find(|k| !is_safe_env_key(k)) {
        return Err(AppError::validation(format!("invalid env key: {:?}", key)));
    }
    if let Some(domain) = draft.env.get("APP_DOMAIN").map(|d| d.trim()) {
        if !domain.is_empty() && !is_valid_domain(domain) {
            return Err(AppError::validation(
                "domain must be hostname only (example: localhost or app.example.com)",
            ));
        }
    }
    if let Some(jwt) = draft.env.get(JWT_SECRET_KEY).map(|v| v.trim()) {
        if !jwt.is_empty() && jwt.len() < MIN_JWT_SECRET_LEN {
            return Err(AppError::validation(format!(
                "{} must be at least {} characters",
                JWT_SECRET_KEY, MIN_JWT_SECRET_LEN
            )));
        }
    }
    for key in [ENC_KEY, LEGACY_ENC_KEY] {
        if let Some(value) = draft.env.get(key).map(|v| v.trim()) {
            if !value.is_empty() && normalize_encryption_key(value).is_none() {
                return Err(AppError::validation(format!(
                    "{} must be base64 of 32 bytes or exactly 32 characters",
                    key
                )));
            }
        }
    }

    Ok(draft)
}

/// Secret values to persist for a new profile: supplied ones normalized,
/// missing ones generated.
fn initial_secrets(supplied: BTreeMap<String, String>) -> BTreeMap<String, String> {
    let jwt = supplied
        .get(JWT_SECRET_KEY)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| random_token(48));

    let enc_key = [ENC_KEY, LEGACY_ENC_KEY]
        .iter()
        .filter_map(|k| supplied.get(*k))
        .find_map(|v| normalize_encryption_key(v))
        .unwrap_or_else(random_key_32);

    BTreeMap::from([
        (JWT_SECRET_KEY.to_string(), jwt),
        (ENC_KEY.to_string(), enc_key),
    ])
}

fn check_port(store: &ProfileStore, host_port: u16, reserved: u16) -> Result<()> {
    if host_port < MIN_PROFILE_PORT {
        return Err(AppError::validation(
            "host port must be >= 1024 (reserved ports are blocked)",
        ));
    }
    if host_port == reserved {
        return Err(AppError::validation(format!(
            "host port {} is reserved",
            host_port
        )));
    }
    if let Some(owner) = store.profiles.iter().find(|p| p.host_port() == host_port) {
        return Err(AppError::validation(format!(
            "host port {} is already used by profile {}",
            host_port, owner.id
        )));
    }
    if !portpicker::is_free_tcp(host_port) {
        return Err(AppError::validation(format!(
            "host port {} is unavailable on this machine",
            host_port
        )));
    }
    Ok(())
}

impl Launcher {
    /// Create a disabled profile. Secrets go to the secret file, never to
    /// the profile record.
    pub fn create_profile(&self, draft: ProfileDraft) -> Result<Profile> {
        let draft = normalize_draft(draft)?;
        let (public_env, supplied_secrets) = split_secret_env(draft.env);
        let secrets = initial_secrets(supplied_secrets);
        let max_profiles = self.config.max_profiles;
        let reserved = self.config.listen_port;

        let profile = self.profiles.with_store_mut(|store| {
            // A delete still cleaning up this id would remove our secrets.
            if let Some(job_id) = self.jobs.active_job(&draft.id) {
                return Err(AppError::profile_busy(&draft.id, &job_id));
            }
            if store.find(&draft.id).is_some() {
                return Err(AppError::profile_exists(&draft.id));
            }
            if store.profiles.len() >= max_profiles {
                return Err(AppError::profile_limit_reached(max_profiles));
            }
            check_port(store, draft.ports[0].host, reserved)?;

            let mut profile = Profile {
                id: draft.id.clone(),
                version: draft.version.clone(),
                ports: draft.ports.clone(),
                env: public_env,
                resources: draft.resources.clone(),
                enabled: false,
                starting_until: None,
                last_action: None,
                last_action_status: None,
                last_action_result: None,
                last_action_at: None,
                last_requested_version: None,
                action_log: Vec::new(),
            };
            profile.record_action(
                ActionKind::Create,
                ActionOutcome::Success,
                "Profile created",
                Utc::now(),
            );
            store.profiles.push(profile.clone());
            Ok(profile)
        })?;

        self.secrets.save(&profile.id, &secrets)?;
        log::info!(
            "Created profile {} (version {}, port {})",
            profile.id,
            profile.version,
            profile.host_port()
        );
        Ok(profile)
    }

    /// First unused id of `kimmio-default`, `kimmio-2`, `kimmio-3`, ...
    pub fn suggest_profile_id(&self) -> Result<String> {
        let store = self.profiles.load()?;
        let taken = |id: &str| store.find(id).is_some();

        if !taken("kimmio-default") {
            return Ok("kimmio-default".to_string());
        }
        let id = (2..1000)
            .map(|i| format!("kimmio-{}", i))
            .find(|id| !taken(id))
            .unwrap_or_else(|| format!("kimmio-{}", store.profiles.len() + 1));
        Ok(id)
    }

    /// First port in the configured range that no profile claims and that is
    /// bindable right now. Falls back to the bottom of the range.
    pub fn suggest_port(&self) -> Result<u16> {
        let store = self.profiles.load()?;
        let used = store.used_ports();
        let port = (self.config.profile_port_min..self.config.profile_port_max)
            .find(|p| !used.contains(p) && *p != self.config.listen_port && portpicker::is_free_tcp(*p))
            .unwrap_or(self.config.profile_port_min);
        Ok(port)
    }
}
