//! External container engine driver.
//!
//! [`ContainerEngine`] is the raw subprocess seam; [`EngineDriver`] layers the
//! compose artifacts, retry policy, progress reporting and failure
//! normalization on top of it.

pub mod compose;
mod docker;
mod failure;

use std::fmt;
use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;

pub use docker::{locate_docker, rootless_docker_host, DockerCli};
pub use failure::{classify, EngineFailure};

use crate::error::{AppError, Result};
use crate::jobs::ActionContext;
use crate::paths::DataPaths;
use crate::profile::{Profile, SecretStore};

/// A single engine invocation that did not succeed.
#[derive(Debug, Clone)]
pub struct InvocationError {
    pub command: String,
    /// Combined stdout/stderr, or the spawn error.
    pub output: String,
}

impl InvocationError {
    pub fn new(command: impl Into<String>, output: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            output: output.into(),
        }
    }
}

impl fmt::Display for InvocationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.command, self.output)
    }
}

impl std::error::Error for InvocationError {}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum EngineStatus {
    NotInstalled,
    Unreachable,
    Available,
}

impl EngineStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotInstalled => "not-installed",
            Self::Unreachable => "unreachable",
            Self::Available => "available",
        }
    }
}

#[async_trait]
pub trait ContainerEngine: Send + Sync {
    async fn pull(&self, image: &str) -> std::result::Result<(), InvocationError>;

    /// `compose up -d --build` with `dir` as working directory.
    async fn compose_up(&self, dir: &Path, project: &str)
        -> std::result::Result<(), InvocationError>;

    /// `compose down`, optionally removing volumes and orphans.
    async fn compose_down(
        &self,
        dir: &Path,
        project: &str,
        remove_volumes: bool,
    ) -> std::result::Result<(), InvocationError>;

    async fn status(&self) -> EngineStatus;
}

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub attempts: u32,
    /// Backoff after attempt `n` is `n * backoff_step`.
    pub backoff_step: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            backoff_step: Duration::from_secs(2),
        }
    }
}

impl RetryPolicy {
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.backoff_step * attempt
    }
}

pub struct EngineDriver {
    engine: Arc<dyn ContainerEngine>,
    paths: DataPaths,
    secrets: SecretStore,
    image_repository: String,
    retry: RetryPolicy,
}

impl EngineDriver {
    pub fn new(
        engine: Arc<dyn ContainerEngine>,
        paths: DataPaths,
        image_repository: impl Into<String>,
    ) -> Self {
        Self {
            engine,
            secrets: SecretStore::new(paths.secrets_dir()),
            paths,
            image_repository: image_repository.into(),
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub async fn status(&self) -> EngineStatus {
        self.engine.status().await
    }

    /// True until compose artifacts have been generated for the profile.
    pub fn is_first_install(&self, profile_id: &str) -> bool {
        !self.paths.has_compose_artifacts(profile_id)
    }

    /// Generate artifacts, pull the image and start the stack, reporting each
    /// step on the job.
    pub async fn deploy(&self, ctx: &ActionContext, profile: &Profile) -> Result<()> {
        self.deploy_inner(ctx, profile, true).await
    }

    /// Same as [`deploy`](Self::deploy) without step reports, for callers
    /// that report their own progress.
    pub async fn deploy_quiet(&self, ctx: &ActionContext, profile: &Profile) -> Result<()> {
        self.deploy_inner(ctx, profile, false).await
    }

    async fn deploy_inner(&self, ctx: &ActionContext, profile: &Profile, report: bool) -> Result<()> {
        let notify = |step: &str, message: &str, progress: u8| {
            if report {
                ctx.step(step, message, progress);
            }
        };

        notify("prepare", "Preparing compose files", 18);
        self.prepare(profile)?;

        let image = compose::image_ref(&self.image_repository, &profile.version);
        notify(
            "pull",
            &format!("Pulling Docker image {} (can take several minutes)", image),
            30,
        );
        let engine = Arc::clone(&self.engine);
        let pull_image = image.clone();
        self.retrying(
            ctx,
            &format!("pulling {}", image),
            |attempt, attempts| {
                if attempt > 1 {
                    notify(
                        "pull",
                        &format!("Pulling Docker image {} (attempt {}/{})", image, attempt, attempts),
                        progress_at(30, attempt - 1),
                    );
                }
            },
            move || {
                let engine = Arc::clone(&engine);
                let image = pull_image.clone();
                async move { engine.pull(&image).await }
            },
        )
        .await?;

        notify("up", "Starting containers", 60);
        let engine = Arc::clone(&self.engine);
        let dir = self.paths.compose_dir(&profile.id);
        let project = compose::project_name(&profile.id);
        self.retrying(
            ctx,
            &format!("starting {}", project),
            |attempt, attempts| {
                if attempt > 1 {
                    notify(
                        "up",
                        &format!(
                            "Container startup failed (attempt {}/{}), retrying",
                            attempt - 1,
                            attempts
                        ),
                        progress_at(60, attempt - 1),
                    );
                }
            },
            move || {
                let engine = Arc::clone(&engine);
                let dir = dir.clone();
                let project = project.clone();
                async move { engine.compose_up(&dir, &project).await }
            },
        )
        .await?;

        notify("up", "Containers started; validating health", 78);
        Ok(())
    }

    /// Write compose artifacts from the profile and its (healed) secrets.
    fn prepare(&self, profile: &Profile) -> Result<()> {
        let (secrets, healed) = compose::heal_secrets(&profile.id, self.secrets.load(&profile.id));
        if healed {
            self.secrets.save(&profile.id, &secrets)?;
        }
        let vars = compose::compose_env(profile, &secrets, &self.image_repository);
        compose::write_artifacts(&self.paths, &profile.id, &compose::render_env(&vars))
    }

    /// Take the stack down. Profiles that never generated artifacts have
    /// nothing to tear down.
    pub async fn teardown(
        &self,
        ctx: &ActionContext,
        profile_id: &str,
        remove_volumes: bool,
    ) -> Result<()> {
        if !self.paths.has_compose_artifacts(profile_id) {
            log::info!("No compose artifacts for {}, skipping teardown", profile_id);
            return Ok(());
        }

        let dir = self.paths.compose_dir(profile_id);
        let project = compose::project_name(profile_id);
        let result = ctx
            .run(
                &format!("stopping {}", project),
                self.engine.compose_down(&dir, &project, remove_volumes),
            )
            .await?;

        result.map_err(|e| {
            log::warn!("compose down failed for {}: {}", profile_id, e);
            AppError::engine(classify(&e.output))
        })
    }

    /// Remove the profile's generated compose directory.
    pub fn remove_artifacts(&self, profile_id: &str) -> Result<()> {
        let dir = self.paths.compose_dir(profile_id);
        match std::fs::remove_dir_all(&dir) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(AppError::io(format!(
                "Failed to remove {}: {}",
                dir.display(),
                e
            ))),
        }
    }

    /// Run `op` up to `retry.attempts` times with linear backoff. Every
    /// failed attempt is logged; the last failure is normalized.
    async fn retrying<N, F, Fut>(
        &self,
        ctx: &ActionContext,
        what: &str,
        mut on_attempt: N,
        mut op: F,
    ) -> Result<()>
    where
        N: FnMut(u32, u32),
        F: FnMut() -> Fut,
        Fut: Future<Output = std::result::Result<(), InvocationError>>,
    {
        let attempts = self.retry.attempts.max(1);
        let mut last_error = None;

        for attempt in 1..=attempts {
            on_attempt(attempt, attempts);
            match ctx.run(what, op()).await? {
                Ok(()) => {
                    if attempt > 1 {
                        log::info!(
                            "[{}] {} succeeded on attempt {}",
                            ctx.profile_id(),
                            what,
                            attempt
                        );
                    }
                    return Ok(());
                }
                Err(e) => {
                    log::warn!(
                        "[{}] {} failed (attempt {}/{}): {}",
                        ctx.profile_id(),
                        what,
                        attempt,
                        attempts,
                        e
                    );
                    last_error = Some(e);
                }
            }
            if attempt < attempts {
                ctx.sleep(self.retry.backoff(attempt)).await?;
            }
        }

        let raw = last_error.map(|e| e.output).unwrap_or_default();
        Err(AppError::engine(classify(&raw)))
    }
}

fn progress_at(base: u8, step: u32) -> u8 {
    let bump = u8::try_from(step.saturating_mul(5)).unwrap_or(u8::MAX);
    base.saturating_add(bump)
}
