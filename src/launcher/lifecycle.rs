//! Enable, stop, recreate and delete executors.

use std::time::Duration;

use chrono::Utc;

use super::Launcher;
use crate::error::Result;
use crate::jobs::ActionContext;
use crate::profile::{ActionKind, ActionOutcome, Profile};

/// Grace period after a start during which failed probes mean "starting".
const STARTING_WINDOW: chrono::Duration = chrono::Duration::seconds(45);

const HEALTH_WAIT_ATTEMPTS: u32 = 6;
const HEALTH_WAIT_INTERVAL: Duration = Duration::from_secs(2);

impl Launcher {
    pub(super) async fn enable(&self, ctx: &ActionContext, id: &str) -> Result<()> {
        let profile = self.profiles.get(id)?;
        let first_install = self.engine.is_first_install(id);
        log::info!(
            "Enabling profile {} (version {}, first install: {}, timeout {})",
            id,
            profile.version,
            first_install,
            humantime::format_duration(self.config.enable_timeout)
        );

        if first_install {
            ctx.step(
                "install",
                "First-time setup detected. Installation can take up to 10 minutes.",
                10,
            );
        } else {
            ctx.step("up", "Starting compose stack (non-destructive)", 30);
        }

        self.start_and_watch(ctx, &profile, ActionKind::Enable).await
    }

    pub(super) async fn stop(&self, ctx: &ActionContext, id: &str) -> Result<()> {
        self.profiles.get(id)?;

        ctx.step("down", "Stopping compose stack", 35);
        if let Err(e) = self.engine.teardown(ctx, id, false).await {
            self.record_failure(id, ActionKind::Stop, &e);
            return Err(e);
        }
        self.profiles
            .mark_result(id, ActionKind::Stop, ActionOutcome::Success, "Profile stopped", None)
    }

    pub(super) async fn recreate(&self, ctx: &ActionContext, id: &str) -> Result<()> {
        let profile = self.profiles.get(id)?;

        ctx.step("down", "Resetting stack and volumes", 30);
        if let Err(e) = self.engine.teardown(ctx, id, true).await {
            self.record_failure(id, ActionKind::Recreate, &e);
            return Err(e);
        }

        ctx.step("up", "Starting fresh stack", 60);
        self.start_and_watch(ctx, &profile, ActionKind::Recreate).await
    }

    /// Tear down first; the record is only removed once the stack is gone, so
    /// a failed teardown can be retried.
    pub(super) async fn delete(&self, ctx: &ActionContext, id: &str) -> Result<()> {
        self.profiles.get(id)?;

        ctx.step("cleanup", "Removing stack and volumes", 45);
        if let Err(e) = self.engine.teardown(ctx, id, true).await {
            self.record_failure(id, ActionKind::Delete, &e);
            return Err(e);
        }

        self.profiles.remove(id)?;
        if let Err(e) = self.engine.remove_artifacts(id) {
            log::warn!("Failed to remove compose artifacts for {}: {}", id, e);
        }
        if let Err(e) = self.secrets.remove(id) {
            log::warn!("Failed to remove secrets for {}: {}", id, e);
        }
        log::info!("Profile {} deleted", id);
        Ok(())
    }

    /// Deploy, open the starting window and wait briefly for health. A
    /// profile that is not healthy yet stays enabled with a warning.
    async fn start_and_watch(
        &self,
        ctx: &ActionContext,
        profile: &Profile,
        action: ActionKind,
    ) -> Result<()> {
        let id = profile.id.as_str();
        if let Err(e) = self.engine.deploy(ctx, profile).await {
            log::error!("{} failed for {}: {}", action, id, e);
            self.record_failure(id, action, &e);
            return Err(e);
        }

        let starting_until = Utc::now() + STARTING_WINDOW;
        let requested = match action {
            ActionKind::Recreate => "Recreate requested; waiting for health",
            _ => "Enable requested; waiting for health",
        };
        self.profiles.mark_result(
            id,
            action,
            ActionOutcome::Success,
            requested,
            Some(starting_until),
        )?;

        ctx.step("health", "Waiting for health", 85);
        if self.wait_for_health(ctx, profile.host_port()).await? {
            log::info!("Profile {} is healthy", id);
            self.profiles
                .mark_result(id, action, ActionOutcome::Success, "Instance is healthy", None)
        } else {
            log::warn!("Profile {} did not become healthy yet", id);
            self.profiles.mark_result(
                id,
                action,
                ActionOutcome::Warning,
                "Instance did not become healthy yet",
                Some(starting_until),
            )
        }
    }

    /// Poll health a bounded number of times; the deadline cuts waits short.
    async fn wait_for_health(&self, ctx: &ActionContext, port: u16) -> Result<bool> {
        for attempt in 1..=HEALTH_WAIT_ATTEMPTS {
            if ctx.run("probing health", self.probe.is_healthy(port)).await? {
                return Ok(true);
            }
            if attempt < HEALTH_WAIT_ATTEMPTS {
                ctx.sleep(HEALTH_WAIT_INTERVAL).await?;
            }
        }
        Ok(false)
    }
}
