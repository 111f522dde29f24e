//! Application error types.

use std::collections::HashMap;
use std::fmt;

use serde::Serialize;

use crate::engine::EngineFailure;

/// Launcher error that can be serialized for callers polling the launcher.
#[derive(Debug)]
pub struct AppError {
    payload: HashMap<String, String>,
    kind: ErrorKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Profile not found
    ProfileNotFound,
    /// Another action already owns the profile
    ProfileBusy,
    /// Profile id already taken
    ProfileExists,
    /// Configured profile limit reached
    ProfileLimitReached,
    /// Job id unknown
    JobNotFound,
    /// Rejected input
    Validation,
    /// Configuration error
    Config,
    /// File system error
    Io,
    /// Network error
    Network,
    /// profiles.json could not be parsed
    StoreCorrupted,
    /// Container engine invocation failed
    Engine,
    /// Action deadline exceeded
    Timeout,
    /// Version update failed, previous version restored
    UpdateRolledBack,
    /// Version update failed and so did the rollback
    RollbackFailed,
    /// General error
    Other,
}

impl ErrorKind {
    pub fn code(&self) -> u32 {
        match self {
            Self::ProfileNotFound => 1001,
            Self::ProfileBusy => 1002,
            Self::ProfileExists => 1003,
            Self::ProfileLimitReached => 1004,
            Self::JobNotFound => 1005,
            Self::Validation => 1101,
            Self::Config => 2001,
            Self::Io => 2002,
            Self::Network => 2003,
            Self::StoreCorrupted => 2004,
            Self::Engine => 3001,
            Self::Timeout => 3002,
            Self::UpdateRolledBack => 3003,
            Self::RollbackFailed => 3004,
            Self::Other => 9999,
        }
    }
}

impl AppError {
    pub fn new(kind: ErrorKind, payload: HashMap<String, String>) -> Self {
        Self { payload, kind }
    }

    /// Create an error with a single "detail" key from a non-empty string,
    /// or an empty payload if the string is empty.
    fn with_detail(kind: ErrorKind, detail: impl Into<String>) -> Self {
        let detail = detail.into();
        let payload = if detail.is_empty() {
            HashMap::new()
        } else {
            HashMap::from([("detail".to_string(), detail)])
        };
        Self::new(kind, payload)
    }

    pub fn profile_not_found(id: &str) -> Self {
        Self::new(
            ErrorKind::ProfileNotFound,
            HashMap::from([("id".to_string(), id.to_string())]),
        )
    }

    pub fn profile_busy(id: &str, job_id: &str) -> Self {
        Self::new(
            ErrorKind::ProfileBusy,
            HashMap::from([
                ("id".to_string(), id.to_string()),
                ("job".to_string(), job_id.to_string()),
            ]),
        )
    }

    pub fn profile_exists(id: &str) -> Self {
        Self::new(
            ErrorKind::ProfileExists,
            HashMap::from([("id".to_string(), id.to_string())]),
        )
    }

    pub fn profile_limit_reached(max: usize) -> Self {
        Self::new(
            ErrorKind::ProfileLimitReached,
            HashMap::from([("max".to_string(), max.to_string())]),
        )
    }

    pub fn job_not_found(job_id: &str) -> Self {
        Self::new(
            ErrorKind::JobNotFound,
            HashMap::from([("job".to_string(), job_id.to_string())]),
        )
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::with_detail(ErrorKind::Validation, message)
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::with_detail(ErrorKind::Config, message)
    }

    pub fn io(message: impl Into<String>) -> Self {
        Self::with_detail(ErrorKind::Io, message)
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::with_detail(ErrorKind::Network, message)
    }

    pub fn store_corrupted(message: impl Into<String>) -> Self {
        Self::with_detail(ErrorKind::StoreCorrupted, message)
    }

    /// Engine failure normalized to a user-facing category.
    pub fn engine(failure: EngineFailure) -> Self {
        Self::new(
            ErrorKind::Engine,
            HashMap::from([
                ("category".to_string(), failure.as_str().to_string()),
                ("detail".to_string(), failure.user_message().to_string()),
            ]),
        )
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::with_detail(ErrorKind::Timeout, message)
    }

    pub fn update_rolled_back(version: &str, previous: &str, cause: &Self) -> Self {
        Self::new(
            ErrorKind::UpdateRolledBack,
            HashMap::from([(
                "detail".to_string(),
                format!(
                    "update to {} failed and rolled back to {}: {}",
                    version,
                    previous,
                    cause.detail()
                ),
            )]),
        )
    }

    pub fn rollback_failed(version: &str, previous: &str, cause: &Self, rollback: &Self) -> Self {
        Self::new(
            ErrorKind::RollbackFailed,
            HashMap::from([(
                "detail".to_string(),
                format!(
                    "update to {} failed: {}; rollback also failed (previous version {}): {}",
                    version,
                    cause.detail(),
                    previous,
                    rollback.detail()
                ),
            )]),
        )
    }

    pub fn other(message: impl Into<String>) -> Self {
        Self::with_detail(ErrorKind::Other, message)
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn payload(&self, key: &str) -> Option<&str> {
        self.payload.get(key).map(String::as_str)
    }

    /// Human-readable message: the detail when present, else the full display.
    pub fn detail(&self) -> String {
        self.payload("detail")
            .map(str::to_string)
            .unwrap_or_else(|| self.to_string())
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.payload.is_empty() {
            return write!(f, "{:?}", self.kind);
        }
        let mut pairs: Vec<String> = self
            .payload
            .iter()
            .filter(|(k, _)| k.as_str() != "detail")
            .map(|(k, v)| format!("{}={}", k, v))
            .collect();
        pairs.sort();
        match self.payload.get("detail") {
            Some(detail) if pairs.is_empty() => write!(f, "{:?}: {}", self.kind, detail),
            Some(detail) => write!(f, "{:?}: {} ({})", self.kind, detail, pairs.join(", ")),
            None => write!(f, "{:?}: {}", self.kind, pairs.join(", ")),
        }
    }
}

impl std::error::Error for AppError {}

impl Serialize for AppError {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        use serde::ser::SerializeStruct as _;
        let mut s = serializer.serialize_struct("AppError", 2)?;
        s.serialize_field("code", &self.kind.code())?;
        s.serialize_field("payload", &self.payload)?;
        s.end()
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        Self::io(err.to_string())
    }
}

impl From<toml::de::Error> for AppError {
    fn from(err: toml::de::Error) -> Self {
        Self::config(err.to_string())
    }
}

impl From<reqwest::Error> for AppError {
    fn from(err: reqwest::Error) -> Self {
        Self::network(err.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        Self::io(err.to_string())
    }
}

/// Convenient Result type alias.
pub type Result<T> = std::result::Result<T, AppError>;
