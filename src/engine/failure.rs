//! Normalization of raw engine output into user-facing failure categories.
//!
//! The docker CLI has no typed error protocol, so this is substring matching
//! on combined output. Everything that inspects raw engine text goes through
//! [`classify`].

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineFailure {
    EngineUnreachable,
    ImageUnavailable,
    PortInUse,
    DiskFull,
    Timeout,
    Generic,
}

impl EngineFailure {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::EngineUnreachable => "engine_unreachable",
            Self::ImageUnavailable => "image_unavailable",
            Self::PortInUse => "port_in_use",
            Self::DiskFull => "disk_full",
            Self::Timeout => "timeout",
            Self::Generic => "generic",
        }
    }

    pub fn user_message(&self) -> &'static str {
        match self {
            Self::EngineUnreachable => {
                "Docker daemon is not reachable. Start Docker (Desktop or service) and try again."
            }
            Self::ImageUnavailable => {
                "Unable to pull the Kimmio image. Check that the selected version exists and try again."
            }
            Self::PortInUse => {
                "Host port is already in use by another process. Choose another profile port."
            }
            Self::DiskFull => {
                "Not enough disk space for Docker images or containers. Free up space and retry."
            }
            Self::Timeout => {
                "Docker took too long pulling or starting containers. Check network and Docker health, then retry."
            }
            Self::Generic => {
                "Docker failed to start this profile. Check Docker status and logs, then retry."
            }
        }
    }
}

/// Map raw engine output to a failure category. First match wins.
pub fn classify(raw: &str) -> EngineFailure {
    let msg = raw.trim().to_lowercase();
    let has = |needle: &str| msg.contains(needle);

    if has("cannot connect to the docker daemon") {
        EngineFailure::EngineUnreachable
    } else if has("pull access denied") || has("manifest unknown") || has("not found") {
        EngineFailure::ImageUnavailable
    } else if has("port is already allocated") || has("address already in use") {
        EngineFailure::PortInUse
    } else if has("no space left on device") {
        EngineFailure::DiskFull
    } else if has("context deadline exceeded") || has("timeout") {
        EngineFailure::Timeout
    } else {
        EngineFailure::Generic
    }
}
