use std::time::Duration;

use tokio::sync::oneshot;

use super::*;
use crate::engine::EngineFailure;

const POLL: Duration = Duration::from_millis(10);

#[tokio::test]
async fn second_submission_for_same_profile_is_busy() {
    let ledger = JobLedger::new();
    let (release_tx, release_rx) = oneshot::channel::<()>();

    let first = ledger
        .submit("alpha", ActionKind::Enable, Duration::from_secs(60), |_ctx| async move {
            let _ = release_rx.await;
            Ok(())
        })
        .unwrap();
    assert_eq!(first.status, JobStatus::Queued);

    let err = ledger
        .submit("alpha", ActionKind::Stop, Duration::from_secs(60), |_ctx| async {
            if true {
                panic!("a second action must never start");
            }
            Ok(())
        })
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ProfileBusy);
    assert_eq!(err.payload("job"), Some(first.id.as_str()));
    assert_eq!(ledger.active_job("alpha").as_deref(), Some(first.id.as_str()));

    // Other profiles are unaffected.
    let other = ledger
        .submit("beta", ActionKind::Stop, Duration::from_secs(60), |_ctx| async { Ok(()) })
        .unwrap();

    release_tx.send(()).unwrap();
    let done = ledger.wait(&first.id, POLL).await.unwrap();
    assert_eq!(done.status, JobStatus::Succeeded);
    assert_eq!(ledger.active_job("alpha"), None);
    ledger.wait(&other.id, POLL).await.unwrap();

    let again = ledger
        .submit("alpha", ActionKind::Stop, Duration::from_secs(60), |_ctx| async { Ok(()) })
        .unwrap();
    assert_eq!(
        ledger.wait(&again.id, POLL).await.unwrap().status,
        JobStatus::Succeeded
    );
}

#[tokio::test]
async fn snapshot_tracks_steps_and_timestamps() {
    let ledger = JobLedger::new();
    let job = ledger
        .submit("alpha", ActionKind::Stop, Duration::from_secs(60), |ctx| async move {
            ctx.step("down", "Stopping compose stack", 35);
            Ok(())
        })
        .unwrap();

    let done = ledger.wait(&job.id, POLL).await.unwrap();
    assert_eq!(done.step, "cleanup");
    assert_eq!(done.message, "Completed");
    assert_eq!(done.progress, 100);
    assert!(done.error.is_none());
    assert!(done.started_at.is_some());
    assert!(done.finished_at.is_some());

    let steps: Vec<_> = done
        .logs
        .iter()
        .filter_map(|l| l.split_once(" [").map(|(_, rest)| rest))
        .collect();
    assert_eq!(
        steps,
        vec![
            "queued] Queued",
            "prepare] Preparing action",
            "down] Stopping compose stack",
            "cleanup] Completed",
        ]
    );
}

#[tokio::test]
async fn failures_are_classified() {
    let ledger = JobLedger::new();

    let failed = ledger
        .submit("alpha", ActionKind::Enable, Duration::from_secs(60), |_ctx| async {
            Err(AppError::engine(EngineFailure::PortInUse))
        })
        .unwrap();
    let failed = ledger.wait(&failed.id, POLL).await.unwrap();
    assert_eq!(failed.status, JobStatus::Failed);
    assert!(failed.error.unwrap().contains("port_in_use"));

    let timed_out = ledger
        .submit("beta", ActionKind::Enable, Duration::from_secs(60), |_ctx| async {
            Err(AppError::other("signal: killed: context deadline exceeded"))
        })
        .unwrap();
    assert_eq!(
        ledger.wait(&timed_out.id, POLL).await.unwrap().status,
        JobStatus::Timeout
    );

    let rolled_back = ledger
        .submit("gamma", ActionKind::Version, Duration::from_secs(60), |_ctx| async {
            let cause = AppError::engine(EngineFailure::ImageUnavailable);
            Err(AppError::update_rolled_back("2.0.0", "1.0.0", &cause))
        })
        .unwrap();
    let rolled_back = ledger.wait(&rolled_back.id, POLL).await.unwrap();
    assert_eq!(rolled_back.status, JobStatus::RolledBack);
    assert_eq!(rolled_back.message, "Rolled back");

    // An engine-side timeout inside a failed rollback is still an engine
    // failure, exactly like the same failure on a plain enable.
    let rollback_failed = ledger
        .submit("delta", ActionKind::Version, Duration::from_secs(60), |_ctx| async {
            Err(AppError::rollback_failed(
                "2.0.0",
                "1.0.0",
                &AppError::engine(EngineFailure::Timeout),
                &AppError::engine(EngineFailure::Generic),
            ))
        })
        .unwrap();
    let plain = ledger
        .submit("epsilon", ActionKind::Enable, Duration::from_secs(60), |_ctx| async {
            Err(AppError::engine(EngineFailure::Timeout))
        })
        .unwrap();
    assert_eq!(
        ledger.wait(&rollback_failed.id, POLL).await.unwrap().status,
        JobStatus::Failed
    );
    assert_eq!(
        ledger.wait(&plain.id, POLL).await.unwrap().status,
        JobStatus::Failed
    );
}

#[tokio::test]
async fn oversized_timeout_is_clamped() {
    let ledger = JobLedger::new();
    let huge = humantime::parse_duration("400000000000years").unwrap();
    let job = ledger
        .submit("alpha", ActionKind::Enable, huge, |ctx| async move {
            ctx.sleep(Duration::from_millis(1)).await
        })
        .unwrap();
    assert_eq!(
        ledger.wait(&job.id, POLL).await.unwrap().status,
        JobStatus::Succeeded
    );

    let job = ledger
        .submit("beta", ActionKind::Enable, Duration::MAX, |_ctx| async { Ok(()) })
        .unwrap();
    assert_eq!(
        ledger.wait(&job.id, POLL).await.unwrap().status,
        JobStatus::Succeeded
    );
}

#[tokio::test(start_paused = true)]
async fn deadline_interrupts_sleeps() {
    let ledger = JobLedger::new();
    let job = ledger
        .submit("alpha", ActionKind::Enable, Duration::from_secs(3), |ctx| async move {
            for _ in 0..10 {
                ctx.sleep(Duration::from_secs(2)).await?;
            }
            Ok(())
        })
        .unwrap();

    let done = ledger.wait(&job.id, POLL).await.unwrap();
    assert_eq!(done.status, JobStatus::Timeout);
    assert_eq!(done.message, "Timed out");
    assert_eq!(ledger.active_job("alpha"), None);
}

#[tokio::test(start_paused = true)]
async fn hung_action_is_aborted_and_releases_the_profile() {
    let ledger = JobLedger::new();
    let job = ledger
        .submit("alpha", ActionKind::Enable, Duration::from_secs(1), |_ctx| async {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(())
        })
        .unwrap();

    let done = ledger.wait(&job.id, POLL).await.unwrap();
    assert_eq!(done.status, JobStatus::Timeout);
    assert_eq!(ledger.active_job("alpha"), None);
}

#[tokio::test]
async fn panicking_action_fails_and_releases_the_profile() {
    let ledger = JobLedger::new();
    let job = ledger
        .submit("alpha", ActionKind::Delete, Duration::from_secs(60), |_ctx| async {
            if true {
                panic!("boom");
            }
            Ok(())
        })
        .unwrap();

    let done = ledger.wait(&job.id, POLL).await.unwrap();
    assert_eq!(done.status, JobStatus::Failed);
    assert_eq!(ledger.active_job("alpha"), None);
}

#[tokio::test]
async fn logs_are_capped() {
    let ledger = JobLedger::new();
    let job = ledger
        .submit("alpha", ActionKind::Enable, Duration::from_secs(60), |ctx| async move {
            for i in 0..150u8 {
                ctx.step("pull", &format!("line {}", i), 30);
            }
            Ok(())
        })
        .unwrap();

    let done = ledger.wait(&job.id, POLL).await.unwrap();
    assert_eq!(done.logs.len(), JOB_LOG_LIMIT);
    assert!(done.logs.back().unwrap().ends_with("[cleanup] Completed"));
}

#[test]
fn unknown_job_is_not_found() {
    let ledger = JobLedger::new();
    assert_eq!(
        ledger.get("missing").unwrap_err().kind(),
        ErrorKind::JobNotFound
    );
}
