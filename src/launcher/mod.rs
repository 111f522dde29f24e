//! The orchestrator façade: accepts lifecycle requests, hands them to the job
//! ledger and exposes reconciled profile state.

mod crud;
mod lifecycle;
mod update;

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;

pub use crud::{normalize_draft, ProfileDraft};

use crate::config::AppConfig;
use crate::engine::{ContainerEngine, DockerCli, EngineDriver, EngineStatus, RetryPolicy};
use crate::error::{AppError, Result};
use crate::health::{reconcile, HealthProbe, HttpHealthProbe};
use crate::jobs::{ActionContext, ActionJob, JobLedger};
use crate::profile::{ActionKind, ActionOutcome, ProfileRepository, ProfileStatus, SecretStore};
use crate::validation::{validate_profile_id, validate_version_tag};

const JOB_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// A lifecycle action a caller can request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionRequest {
    Enable,
    Stop,
    Recreate,
    UpdateVersion { version: String },
    RegenerateSecrets,
    Delete,
}

impl ActionRequest {
    pub fn kind(&self) -> ActionKind {
        match self {
            Self::Enable => ActionKind::Enable,
            Self::Stop => ActionKind::Stop,
            Self::Recreate => ActionKind::Recreate,
            Self::UpdateVersion { .. } => ActionKind::Version,
            Self::RegenerateSecrets => ActionKind::RegenerateSecrets,
            Self::Delete => ActionKind::Delete,
        }
    }
}

#[derive(Clone)]
pub struct Launcher {
    config: Arc<AppConfig>,
    profiles: Arc<ProfileRepository>,
    secrets: SecretStore,
    jobs: Arc<JobLedger>,
    engine: Arc<EngineDriver>,
    probe: Arc<dyn HealthProbe>,
}

impl Launcher {
    pub fn new(
        config: AppConfig,
        engine: Arc<dyn ContainerEngine>,
        probe: Arc<dyn HealthProbe>,
    ) -> Result<Self> {
        Self::with_retry_policy(config, engine, probe, RetryPolicy::default())
    }

    pub fn with_retry_policy(
        config: AppConfig,
        engine: Arc<dyn ContainerEngine>,
        probe: Arc<dyn HealthProbe>,
        retry: RetryPolicy,
    ) -> Result<Self> {
        let paths = config.paths();
        paths.ensure_dirs()?;

        let driver = EngineDriver::new(engine, paths.clone(), config.image_repository.clone())
            .with_retry_policy(retry);

        Ok(Self {
            profiles: Arc::new(ProfileRepository::new(paths.profiles_file())),
            secrets: SecretStore::new(paths.secrets_dir()),
            jobs: JobLedger::new(),
            engine: Arc::new(driver),
            probe,
            config: Arc::new(config),
        })
    }

    /// Launcher backed by the local docker CLI and HTTP health probes.
    pub fn with_docker(config: AppConfig) -> Result<Self> {
        let probe = HttpHealthProbe::new()?;
        Self::new(config, Arc::new(DockerCli::discover()), Arc::new(probe))
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn profiles(&self) -> &ProfileRepository {
        &self.profiles
    }

    pub fn secrets(&self) -> &SecretStore {
        &self.secrets
    }

    pub async fn engine_status(&self) -> EngineStatus {
        self.engine.status().await
    }

    /// Validate and accept an action. Validation, not-found and busy errors
    /// are returned here; everything else is only visible on the job.
    pub fn submit(&self, profile_id: &str, request: ActionRequest) -> Result<ActionJob> {
        validate_profile_id(profile_id)?;
        if let ActionRequest::UpdateVersion { version } = &request {
            validate_version_tag(version)?;
        }
        self.profiles.get(profile_id)?;

        let timeout = match request {
            ActionRequest::Enable => self.config.enable_timeout.max(self.config.action_timeout),
            _ => self.config.action_timeout,
        };

        let launcher = self.clone();
        let id = profile_id.to_string();
        self.jobs
            .submit(profile_id, request.kind(), timeout, move |ctx| async move {
                launcher.execute(&ctx, &id, request).await
            })
    }

    async fn execute(&self, ctx: &ActionContext, id: &str, request: ActionRequest) -> Result<()> {
        match request {
            ActionRequest::Enable => self.enable(ctx, id).await,
            ActionRequest::Stop => self.stop(ctx, id).await,
            ActionRequest::Recreate => self.recreate(ctx, id).await,
            ActionRequest::UpdateVersion { version } => {
                self.update_version(ctx, id, &version).await
            }
            ActionRequest::RegenerateSecrets => self.regenerate_secrets(ctx, id).await,
            ActionRequest::Delete => self.delete(ctx, id).await,
        }
    }

    pub fn job(&self, job_id: &str) -> Result<ActionJob> {
        self.jobs.get(job_id)
    }

    /// Block until the job reaches a terminal state.
    pub async fn wait_for_job(&self, job_id: &str) -> Result<ActionJob> {
        self.jobs.wait(job_id, JOB_POLL_INTERVAL).await
    }

    /// All profiles with observed runtime status and their active job, if any.
    pub async fn list_profiles(&self) -> Result<Vec<ProfileStatus>> {
        let store = self.profiles.load()?;
        let mut statuses = reconcile(store.profiles, self.probe.as_ref(), Utc::now()).await;
        for status in &mut statuses {
            status.active_job_id = self.jobs.active_job(&status.profile.id);
        }
        Ok(statuses)
    }

    pub async fn profile_status(&self, profile_id: &str) -> Result<ProfileStatus> {
        let profile = self.profiles.get(profile_id)?;
        let mut statuses = reconcile(vec![profile], self.probe.as_ref(), Utc::now()).await;
        let mut status = statuses
            .pop()
            .ok_or_else(|| AppError::profile_not_found(profile_id))?;
        status.active_job_id = self.jobs.active_job(profile_id);
        Ok(status)
    }

    /// Record a failed action on the profile. Bookkeeping errors are logged
    /// so the original failure is what the caller sees.
    fn record_failure(&self, id: &str, action: ActionKind, err: &AppError) {
        if let Err(e) = self
            .profiles
            .mark_result(id, action, ActionOutcome::Failed, &err.detail(), None)
        {
            log::warn!("Failed to record {} failure for {}: {}", action, id, e);
        }
    }
}
