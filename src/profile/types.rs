//! Profile-related type definitions.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Number of entries kept in a profile's action history.
pub const ACTION_LOG_LIMIT: usize = 8;

/// Host port used when a profile declares no port mapping.
pub const DEFAULT_HOST_PORT: u16 = 8080;

/// Port the application listens on inside its container.
pub const DEFAULT_CONTAINER_PORT: u16 = 3000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortMapping {
    pub container: u16,
    pub host: u16,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceLimits {
    #[serde(default)]
    pub memory: String,
    #[serde(default)]
    pub cpus: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Resources {
    #[serde(default)]
    pub limits: ResourceLimits,
}

/// Lifecycle actions recorded against a profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ActionKind {
    Create,
    Enable,
    Stop,
    Recreate,
    Version,
    RegenerateSecrets,
    Delete,
}

impl ActionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Enable => "enable",
            Self::Stop => "stop",
            Self::Recreate => "recreate",
            Self::Version => "version",
            Self::RegenerateSecrets => "regenerate-secrets",
            Self::Delete => "delete",
        }
    }

    /// Actions that bring the stack up and open a starting window.
    pub fn is_start(&self) -> bool {
        matches!(self, Self::Enable | Self::Recreate)
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of the last action, as persisted in the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionOutcome {
    Success,
    Warning,
    Failed,
}

impl ActionOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Warning => "warning",
            Self::Failed => "failed",
        }
    }
}

/// A managed instance. Secrets never live here; see `profile::secrets`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Profile {
    pub id: String,
    pub version: String,
    #[serde(default)]
    pub ports: Vec<PortMapping>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    #[serde(default)]
    pub resources: Resources,
    #[serde(default)]
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub starting_until: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_action: Option<ActionKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_action_status: Option<ActionOutcome>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_action_result: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_action_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_requested_version: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub action_log: Vec<String>,
}

impl Profile {
    /// Host port of the primary mapping, or 0 when none is declared.
    pub fn host_port(&self) -> u16 {
        self.ports.first().map(|p| p.host).unwrap_or(0)
    }

    /// Whether `now` falls inside the starting grace window.
    pub fn is_starting(&self, now: DateTime<Utc>) -> bool {
        self.starting_until.map(|until| now < until).unwrap_or(false)
    }

    /// Record the result of an action and prepend it to the bounded history.
    pub fn record_action(
        &mut self,
        action: ActionKind,
        outcome: ActionOutcome,
        message: &str,
        now: DateTime<Utc>,
    ) {
        self.last_action = Some(action);
        self.last_action_status = Some(outcome);
        self.last_action_result = Some(message.to_string());
        self.last_action_at = Some(now);

        let entry = format!(
            "{} [{}] {}: {}",
            now.to_rfc3339_opts(chrono::SecondsFormat::Secs, true),
            action,
            outcome.as_str(),
            message
        );
        self.action_log.insert(0, entry);
        self.action_log.truncate(ACTION_LOG_LIMIT);
    }
}

/// The persisted collection, in insertion order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProfileStore {
    #[serde(default)]
    pub profiles: Vec<Profile>,
}

impl ProfileStore {
    pub fn find(&self, id: &str) -> Option<&Profile> {
        self.profiles.iter().find(|p| p.id == id)
    }

    pub fn find_mut(&mut self, id: &str) -> Option<&mut Profile> {
        self.profiles.iter_mut().find(|p| p.id == id)
    }

    pub fn position(&self, id: &str) -> Option<usize> {
        self.profiles.iter().position(|p| p.id == id)
    }

    /// Host ports claimed by profiles in the store.
    pub fn used_ports(&self) -> Vec<u16> {
        self.profiles
            .iter()
            .map(Profile::host_port)
            .filter(|p| *p > 0)
            .collect()
    }
}

/// Observed runtime state derived by the health reconciler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuntimeStatus {
    Stopped,
    Starting,
    Running,
    Unhealthy,
}

impl RuntimeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Stopped => "stopped",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Unhealthy => "unhealthy",
        }
    }
}

/// Status information for a profile, as displayed to callers.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileStatus {
    #[serde(flatten)]
    pub profile: Profile,
    pub running: bool,
    pub runtime_status: RuntimeStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub active_job_id: Option<String>,
}
