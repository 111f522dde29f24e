//! Job snapshot types.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::profile::ActionKind;

/// Number of log lines kept per job.
pub const JOB_LOG_LIMIT: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Running,
    Succeeded,
    Failed,
    Timeout,
    /// A version update failed but the previous version was restored.
    RolledBack,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Timeout => "timeout",
            Self::RolledBack => "rolled_back",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Queued | Self::Running)
    }
}

/// Snapshot of one lifecycle action.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionJob {
    pub id: String,
    pub profile_id: String,
    pub action: ActionKind,
    pub step: String,
    pub status: JobStatus,
    pub message: String,
    pub progress: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub logs: VecDeque<String>,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

impl ActionJob {
    pub(crate) fn queued(id: String, profile_id: &str, action: ActionKind) -> Self {
        let mut job = Self {
            id,
            profile_id: profile_id.to_string(),
            action,
            step: "queued".to_string(),
            status: JobStatus::Queued,
            message: "Queued".to_string(),
            progress: 0,
            error: None,
            logs: VecDeque::new(),
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
        };
        job.push_log("queued", "Queued");
        job
    }

    /// Apply a step update and append it to the log.
    pub(crate) fn apply(
        &mut self,
        step: &str,
        status: JobStatus,
        message: &str,
        progress: u8,
        error: Option<&str>,
    ) {
        let now = Utc::now();
        self.step = step.to_string();
        self.status = status;
        self.message = message.to_string();
        self.progress = progress.min(100);
        if let Some(error) = error {
            self.error = Some(error.to_string());
        }
        if status == JobStatus::Running && self.started_at.is_none() {
            self.started_at = Some(now);
        }
        if status.is_terminal() {
            self.finished_at = Some(now);
        }
        self.push_log(step, message);
    }

    fn push_log(&mut self, step: &str, message: &str) {
        self.logs.push_back(format!(
            "{} [{}] {}",
            Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true),
            step,
            message
        ));
        while self.logs.len() > JOB_LOG_LIMIT {
            self.logs.pop_front();
        }
    }
}
