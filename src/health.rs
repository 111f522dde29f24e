//! Health reconciliation: observed runtime status from declared state plus a
//! live probe of each profile's health endpoint.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use reqwest::Client;

use crate::error::Result;
use crate::profile::{Profile, ProfileStatus, RuntimeStatus};

const PROBE_TIMEOUT: Duration = Duration::from_secs(2);

/// Probe budget while a profile is inside its starting window.
pub const STARTING_BUDGET: ProbeBudget = ProbeBudget {
    attempts: 2,
    interval: Duration::from_millis(400),
};

/// Probe budget once the starting window has passed.
pub const SETTLED_BUDGET: ProbeBudget = ProbeBudget {
    attempts: 4,
    interval: Duration::from_millis(500),
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeBudget {
    pub attempts: u32,
    pub interval: Duration,
}

#[async_trait]
pub trait HealthProbe: Send + Sync {
    /// Whether the instance listening on `port` reports healthy.
    async fn is_healthy(&self, port: u16) -> bool;
}

/// `GET http://localhost:<port>/health`; any 2xx is healthy.
pub struct HttpHealthProbe {
    client: Client,
}

impl HttpHealthProbe {
    pub fn new() -> Result<Self> {
        let client = Client::builder().timeout(PROBE_TIMEOUT).build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl HealthProbe for HttpHealthProbe {
    async fn is_healthy(&self, port: u16) -> bool {
        if port == 0 {
            return false;
        }
        let url = format!("http://localhost:{}/health", port);
        match self.client.get(&url).send().await {
            Ok(resp) => resp.status().is_success(),
            Err(e) => {
                log::debug!("Health probe {} failed: {}", url, e);
                false
            }
        }
    }
}

/// Probe up to `budget.attempts` times, stopping at the first success.
pub async fn probe_with_retry(probe: &dyn HealthProbe, port: u16, budget: ProbeBudget) -> bool {
    for attempt in 1..=budget.attempts {
        if probe.is_healthy(port).await {
            return true;
        }
        if attempt < budget.attempts {
            tokio::time::sleep(budget.interval).await;
        }
    }
    false
}

/// Observed status of a single profile. Never touches the store.
pub async fn observe(profile: &Profile, probe: &dyn HealthProbe, now: DateTime<Utc>) -> RuntimeStatus {
    if !profile.enabled {
        return RuntimeStatus::Stopped;
    }
    let port = profile.host_port();
    if profile.is_starting(now) {
        if probe_with_retry(probe, port, STARTING_BUDGET).await {
            RuntimeStatus::Running
        } else {
            RuntimeStatus::Starting
        }
    } else if probe_with_retry(probe, port, SETTLED_BUDGET).await {
        RuntimeStatus::Running
    } else {
        RuntimeStatus::Unhealthy
    }
}

/// Recompute runtime status for every profile, probing them concurrently.
/// `enabled` and every other declared field pass through unchanged.
pub async fn reconcile(
    profiles: Vec<Profile>,
    probe: &dyn HealthProbe,
    now: DateTime<Utc>,
) -> Vec<ProfileStatus> {
    let observed = join_all(profiles.iter().map(|p| observe(p, probe, now))).await;
    profiles
        .into_iter()
        .zip(observed)
        .map(|(profile, runtime_status)| ProfileStatus {
            profile,
            running: runtime_status == RuntimeStatus::Running,
            runtime_status,
            active_job_id: None,
        })
        .collect()
}
