//! In-memory job ledger and per-profile action lock table.
//!
//! A single mutex guards both the job snapshots and the lock table, so the
//! busy check and the registration of a new job happen as one step.

mod context;
mod types;

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::time::Instant;

pub use context::ActionContext;
pub use types::{ActionJob, JobStatus, JOB_LOG_LIMIT};

use crate::error::{AppError, ErrorKind, Result};
use crate::profile::ActionKind;

/// Extra time the supervisor allows an action past its deadline before it is
/// aborted outright.
const ABORT_GRACE: Duration = Duration::from_secs(5);

/// Upper bound for an action's time budget. Longer budgets are clamped so the
/// deadline stays representable.
pub const MAX_ACTION_TIMEOUT: Duration = Duration::from_secs(30 * 24 * 60 * 60);

#[derive(Default)]
struct LedgerState {
    jobs: HashMap<String, ActionJob>,
    /// profile id -> id of the job currently holding it
    active: HashMap<String, String>,
}

#[derive(Default)]
pub struct JobLedger {
    state: Mutex<LedgerState>,
}

impl JobLedger {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Accept an action for `profile_id` and run `work` on a background task.
    ///
    /// Fails with `ProfileBusy` when another job already holds the profile.
    /// The profile is released when the background task ends, whatever its
    /// outcome.
    pub fn submit<F, Fut>(
        self: &Arc<Self>,
        profile_id: &str,
        action: ActionKind,
        timeout: Duration,
        work: F,
    ) -> Result<ActionJob>
    where
        F: FnOnce(ActionContext) -> Fut + Send + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let job_id = uuid::Uuid::new_v4().to_string();
        let job = {
            let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            if let Some(active) = state.active.get(profile_id) {
                return Err(AppError::profile_busy(profile_id, active));
            }
            let job = ActionJob::queued(job_id.clone(), profile_id, action);
            state.jobs.insert(job_id.clone(), job.clone());
            state
                .active
                .insert(profile_id.to_string(), job_id.clone());
            job
        };

        log::info!(
            "Accepted {} for profile {} as job {}",
            action,
            profile_id,
            job_id
        );

        let deadline = Instant::now() + timeout.min(MAX_ACTION_TIMEOUT);
        let release = ActiveGuard {
            ledger: Arc::clone(self),
            profile_id: profile_id.to_string(),
            job_id: job_id.clone(),
        };
        let ctx = ActionContext::new(
            job_id.clone(),
            profile_id.to_string(),
            deadline,
            Arc::clone(self),
        );
        let ledger = Arc::clone(self);

        tokio::spawn(async move {
            let _release = release;
            ledger.update_step(
                &job_id,
                "prepare",
                JobStatus::Running,
                "Preparing action",
                5,
                None,
            );

            let task = tokio::spawn(work(ctx));
            let abort = task.abort_handle();
            let result = match tokio::time::timeout_at(deadline + ABORT_GRACE, task).await {
                Ok(Ok(result)) => result,
                Ok(Err(e)) => Err(AppError::other(format!("action task failed: {}", e))),
                Err(_) => {
                    abort.abort();
                    Err(AppError::timeout("deadline exceeded; action aborted"))
                }
            };
            ledger.finish(&job_id, result);
        });

        Ok(job)
    }

    /// Update the snapshot of a job. Unknown ids are ignored.
    pub fn update_step(
        &self,
        job_id: &str,
        step: &str,
        status: JobStatus,
        message: &str,
        progress: u8,
        error: Option<&str>,
    ) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(job) = state.jobs.get_mut(job_id) {
            job.apply(step, status, message, progress, error);
        }
    }

    /// A copy of the current snapshot.
    pub fn get(&self, job_id: &str) -> Result<ActionJob> {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state
            .jobs
            .get(job_id)
            .cloned()
            .ok_or_else(|| AppError::job_not_found(job_id))
    }

    /// Id of the job currently holding `profile_id`, if any.
    pub fn active_job(&self, profile_id: &str) -> Option<String> {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.active.get(profile_id).cloned()
    }

    /// Poll a job until it reaches a terminal state.
    pub async fn wait(&self, job_id: &str, poll: Duration) -> Result<ActionJob> {
        loop {
            let job = self.get(job_id)?;
            if job.status.is_terminal() {
                return Ok(job);
            }
            tokio::time::sleep(poll).await;
        }
    }

    fn finish(&self, job_id: &str, result: Result<()>) {
        let status = classify(&result);
        let (message, error) = match (&result, status) {
            (Ok(()), _) => ("Completed", None),
            (Err(e), JobStatus::Timeout) => ("Timed out", Some(e.to_string())),
            (Err(e), JobStatus::RolledBack) => ("Rolled back", Some(e.to_string())),
            (Err(e), _) => ("Failed", Some(e.to_string())),
        };

        match &error {
            None => log::info!("Job {} finished: {}", job_id, status.as_str()),
            Some(e) => log::warn!("Job {} finished: {}: {}", job_id, status.as_str(), e),
        }

        // Terminal status and lock release become visible together.
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let Some(job) = state.jobs.get_mut(job_id) else {
            return;
        };
        job.apply("cleanup", status, message, 100, error.as_deref());
        let profile_id = job.profile_id.clone();
        if state.active.get(&profile_id).map(String::as_str) == Some(job_id) {
            state.active.remove(&profile_id);
        }
    }

    fn release(&self, profile_id: &str, job_id: &str) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if state.active.get(profile_id).map(String::as_str) == Some(job_id) {
            state.active.remove(profile_id);
        }
    }
}

/// Removes the lock table entry when the supervising task ends.
struct ActiveGuard {
    ledger: Arc<JobLedger>,
    profile_id: String,
    job_id: String,
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.ledger.release(&self.profile_id, &self.job_id);
    }
}

/// Map an action result to a terminal job status.
fn classify(result: &Result<()>) -> JobStatus {
    let Err(err) = result else {
        return JobStatus::Succeeded;
    };
    match err.kind() {
        ErrorKind::Timeout => JobStatus::Timeout,
        ErrorKind::UpdateRolledBack => JobStatus::RolledBack,
        _ => {
            let text = err.payload("detail").unwrap_or_default().to_lowercase();
            if text.contains("deadline exceeded") || text.contains("timeout") {
                JobStatus::Timeout
            } else {
                JobStatus::Failed
            }
        }
    }
}

#[cfg(test)]
mod tests;
