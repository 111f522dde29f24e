//! Version update (with rollback) and secret rotation.

use super::Launcher;
use crate::error::{AppError, Result};
use crate::jobs::ActionContext;
use crate::profile::secrets::generate_secrets;
use crate::profile::{ActionKind, ActionOutcome};

impl Launcher {
    /// Record the new version first, then rebuild if the profile is running.
    /// A failed rebuild is rolled back to the previous version once.
    pub(super) async fn update_version(
        &self,
        ctx: &ActionContext,
        id: &str,
        version: &str,
    ) -> Result<()> {
        let previous = self.profiles.begin_version_update(id, version)?;
        let done = format!("Version updated to {}", version);

        if !previous.enabled {
            return self
                .profiles
                .mark_result(id, ActionKind::Version, ActionOutcome::Success, &done, None);
        }

        ctx.step("up", "Rebuilding with new version", 45);
        let mut target = previous.clone();
        target.version = version.to_string();

        let Err(cause) = self.engine.deploy_quiet(ctx, &target).await else {
            log::info!("Profile {} updated from {} to {}", id, previous.version, version);
            return self
                .profiles
                .mark_result(id, ActionKind::Version, ActionOutcome::Success, &done, None);
        };

        log::warn!(
            "Update of {} to {} failed: {}; rolling back to {}",
            id,
            version,
            cause,
            previous.version
        );
        ctx.step("rollback", "Rolling back to previous version", 75);
        let rollback = self.engine.deploy_quiet(ctx, &previous).await;

        if let Err(e) = self
            .profiles
            .restore_version(id, version, &previous.version, rollback.is_ok())
        {
            log::error!("Failed to record rollback state for {}: {}", id, e);
        }

        match rollback {
            Ok(()) => {
                log::info!("Profile {} rolled back to {}", id, previous.version);
                Err(AppError::update_rolled_back(version, &previous.version, &cause))
            }
            Err(rollback) => {
                log::error!(
                    "Rollback of {} to {} failed: {}",
                    id,
                    previous.version,
                    rollback
                );
                Err(AppError::rollback_failed(
                    version,
                    &previous.version,
                    &cause,
                    &rollback,
                ))
            }
        }
    }

    /// Replace the profile's secrets; running stacks are rebuilt to pick
    /// them up.
    pub(super) async fn regenerate_secrets(&self, ctx: &ActionContext, id: &str) -> Result<()> {
        let profile = self.profiles.get(id)?;

        if let Err(e) = self.secrets.save(id, &generate_secrets()) {
            self.record_failure(id, ActionKind::RegenerateSecrets, &e);
            return Err(e);
        }

        if !profile.enabled {
            return self.profiles.mark_result(
                id,
                ActionKind::RegenerateSecrets,
                ActionOutcome::Success,
                "Secrets regenerated",
                None,
            );
        }

        ctx.step("up", "Applying regenerated secrets", 50);
        if let Err(e) = self.engine.deploy_quiet(ctx, &profile).await {
            self.record_failure(id, ActionKind::RegenerateSecrets, &e);
            return Err(e);
        }
        self.profiles.mark_result(
            id,
            ActionKind::RegenerateSecrets,
            ActionOutcome::Success,
            "Secrets regenerated and applied",
            None,
        )
    }
}
