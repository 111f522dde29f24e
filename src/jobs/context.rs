use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;

use super::{JobLedger, JobStatus};
use crate::error::{AppError, Result};

/// Handle given to an executor: its job id for progress reports and the
/// deadline every blocking wait must respect.
#[derive(Clone)]
pub struct ActionContext {
    job_id: String,
    profile_id: String,
    deadline: Instant,
    ledger: Arc<JobLedger>,
}

impl ActionContext {
    pub(crate) fn new(
        job_id: String,
        profile_id: String,
        deadline: Instant,
        ledger: Arc<JobLedger>,
    ) -> Self {
        Self {
            job_id,
            profile_id,
            deadline,
            ledger,
        }
    }

    pub fn profile_id(&self) -> &str {
        &self.profile_id
    }

    /// Report progress for the running job.
    pub fn step(&self, step: &str, message: &str, progress: u8) {
        log::info!(
            "[{}] {} ({}%): {}",
            self.profile_id,
            step,
            progress,
            message
        );
        self.ledger
            .update_step(&self.job_id, step, JobStatus::Running, message, progress, None);
    }

    /// Drive `fut` to completion unless the deadline passes first.
    pub async fn run<F>(&self, what: &str, fut: F) -> Result<F::Output>
    where
        F: Future,
    {
        tokio::time::timeout_at(self.deadline, fut)
            .await
            .map_err(|_| deadline_exceeded(what))
    }

    /// Sleep for `duration`, returning early with a timeout error when the
    /// deadline falls inside the sleep.
    pub async fn sleep(&self, duration: Duration) -> Result<()> {
        let wake = Instant::now() + duration;
        if wake >= self.deadline {
            tokio::time::sleep_until(self.deadline).await;
            return Err(deadline_exceeded("waiting"));
        }
        tokio::time::sleep_until(wake).await;
        Ok(())
    }
}

fn deadline_exceeded(what: &str) -> AppError {
    AppError::timeout(format!("deadline exceeded while {}", what))
}
