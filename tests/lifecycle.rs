mod common;

use std::fs;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;

use common::Harness;
use kimmio_launcher_lib::jobs::JobStatus;
use kimmio_launcher_lib::profile::{ActionKind, ActionOutcome, PortMapping, RuntimeStatus};
use kimmio_launcher_lib::{ActionRequest, ErrorKind, ProfileDraft};

async fn run(h: &Harness, id: &str, request: ActionRequest) -> kimmio_launcher_lib::jobs::ActionJob {
    let job = h.launcher.submit(id, request).unwrap();
    h.launcher.wait_for_job(&job.id).await.unwrap()
}

#[tokio::test]
async fn enable_then_stop() {
    let h = Harness::new(true);
    h.create("alpha", "1.0.0");

    let job = run(&h, "alpha", ActionRequest::Enable).await;
    assert_eq!(job.status, JobStatus::Succeeded, "{:?}", job.error);
    assert_eq!(job.progress, 100);

    let profile = h.launcher.profiles().get("alpha").unwrap();
    assert!(profile.enabled);
    assert_eq!(profile.last_action, Some(ActionKind::Enable));
    assert_eq!(profile.last_action_result.as_deref(), Some("Instance is healthy"));
    assert!(profile.starting_until.is_none());

    let calls = h.engine.calls();
    assert_eq!(
        calls,
        vec![
            "pull kimmio/kimmio-app:1.0.0".to_string(),
            "up kimmio-alpha".to_string()
        ]
    );

    let status = h.launcher.profile_status("alpha").await.unwrap();
    assert!(status.running);
    assert_eq!(status.runtime_status, RuntimeStatus::Running);

    let job = run(&h, "alpha", ActionRequest::Stop).await;
    assert_eq!(job.status, JobStatus::Succeeded);
    assert!(!h.launcher.profiles().get("alpha").unwrap().enabled);
    assert_eq!(
        h.engine.calls().last().map(String::as_str),
        Some("down kimmio-alpha volumes=false")
    );

    let status = h.launcher.profile_status("alpha").await.unwrap();
    assert_eq!(status.runtime_status, RuntimeStatus::Stopped);
    assert!(!status.running);
}

#[tokio::test(start_paused = true)]
async fn second_action_is_rejected_while_first_runs() {
    let h = Harness::new(false);
    h.create("alpha", "1.0.0");

    let first = h.launcher.submit("alpha", ActionRequest::Enable).unwrap();
    let err = h.launcher.submit("alpha", ActionRequest::Stop).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ProfileBusy);

    let listed = h.launcher.list_profiles().await.unwrap();
    assert_eq!(listed[0].active_job_id.as_deref(), Some(first.id.as_str()));

    let first = h.launcher.wait_for_job(&first.id).await.unwrap();
    assert_eq!(first.status, JobStatus::Succeeded);

    // Not healthy yet, but still inside the starting window.
    let profile = h.launcher.profiles().get("alpha").unwrap();
    assert!(profile.enabled);
    assert_eq!(profile.last_action_status, Some(ActionOutcome::Warning));
    assert!(profile.starting_until.is_some());
    let status = h.launcher.profile_status("alpha").await.unwrap();
    assert_eq!(status.runtime_status, RuntimeStatus::Starting);
    assert!(status.active_job_id.is_none());

    let job = run(&h, "alpha", ActionRequest::Stop).await;
    assert_eq!(job.status, JobStatus::Succeeded);
}

#[tokio::test]
async fn failed_update_rolls_back_to_previous_version() {
    let h = Harness::new(true);
    h.create("alpha", "1.0.0");
    run(&h, "alpha", ActionRequest::Enable).await;

    h.engine.fail_tag("2.0.0");
    let job = run(
        &h,
        "alpha",
        ActionRequest::UpdateVersion {
            version: "2.0.0".to_string(),
        },
    )
    .await;
    assert_eq!(job.status, JobStatus::RolledBack);
    assert!(job.logs.iter().any(|l| l.contains("[rollback]")));

    let profile = h.launcher.profiles().get("alpha").unwrap();
    assert_eq!(profile.version, "1.0.0");
    assert_eq!(profile.last_requested_version.as_deref(), Some("2.0.0"));
    assert_eq!(profile.last_action_status, Some(ActionOutcome::Failed));
    assert!(profile
        .last_action_result
        .unwrap()
        .contains("rolled back"));
    assert_eq!(
        h.engine.calls().last().map(String::as_str),
        Some("up kimmio-alpha")
    );
}

#[tokio::test]
async fn failed_rollback_keeps_attempted_version() {
    let h = Harness::new(true);
    h.create("alpha", "1.0.0");
    run(&h, "alpha", ActionRequest::Enable).await;

    h.engine.fail_tag("1.0.0");
    h.engine.fail_tag("2.0.0");
    let job = run(
        &h,
        "alpha",
        ActionRequest::UpdateVersion {
            version: "2.0.0".to_string(),
        },
    )
    .await;
    assert_eq!(job.status, JobStatus::Failed);
    assert!(job.error.unwrap().contains("rollback also failed"));

    let profile = h.launcher.profiles().get("alpha").unwrap();
    assert_eq!(profile.version, "2.0.0");
    assert_eq!(profile.last_action_status, Some(ActionOutcome::Failed));
    assert!(profile
        .last_action_result
        .unwrap()
        .contains("rollback also failed"));
}

#[tokio::test]
async fn updating_a_disabled_profile_only_records_the_version() {
    let h = Harness::new(true);
    h.create("alpha", "1.0.0");

    let job = run(
        &h,
        "alpha",
        ActionRequest::UpdateVersion {
            version: "2.0.0".to_string(),
        },
    )
    .await;
    assert_eq!(job.status, JobStatus::Succeeded);
    assert!(h.engine.calls().is_empty());

    let profile = h.launcher.profiles().get("alpha").unwrap();
    assert_eq!(profile.version, "2.0.0");
    assert_eq!(
        profile.last_action_result.as_deref(),
        Some("Version updated to 2.0.0")
    );
}

#[tokio::test]
async fn failed_enable_is_recorded() {
    let h = Harness::new(true);
    h.create("alpha", "missing");
    h.engine.fail_tag("missing");

    let job = run(&h, "alpha", ActionRequest::Enable).await;
    assert_eq!(job.status, JobStatus::Failed);
    assert!(job.error.unwrap().contains("image_unavailable"));

    let profile = h.launcher.profiles().get("alpha").unwrap();
    assert!(!profile.enabled);
    assert_eq!(profile.last_action_status, Some(ActionOutcome::Failed));

    // The lock is released: a new action is accepted.
    let job = run(&h, "alpha", ActionRequest::Stop).await;
    assert_eq!(job.status, JobStatus::Succeeded);
}

#[tokio::test]
async fn created_profile_keeps_secrets_out_of_the_store() {
    let h = Harness::new(true);
    let port = portpicker::pick_unused_port().unwrap();
    let draft = ProfileDraft {
        id: "kimmio-default".to_string(),
        ports: vec![PortMapping {
            container: 3000,
            host: port,
        }],
        ..ProfileDraft::default()
    };
    let profile = h.launcher.create_profile(draft).unwrap();
    assert!(!profile.enabled);
    assert_eq!(profile.version, "latest");
    assert_eq!(profile.last_action, Some(ActionKind::Create));

    let raw = fs::read_to_string(h.launcher.profiles().path()).unwrap();
    assert!(!raw.contains("JWT_SECRET"));
    assert!(!raw.contains("ENC_KEY"));

    let secrets = h.launcher.secrets().load("kimmio-default");
    assert!(secrets["JWT_SECRET"].len() >= 32);
    assert_eq!(STANDARD.decode(&secrets["ENC_KEY_V0"]).unwrap().len(), 32);
}

#[tokio::test]
async fn supplied_secrets_are_split_from_public_env() {
    let h = Harness::new(true);
    let port = portpicker::pick_unused_port().unwrap();
    let jwt = "s".repeat(40);
    let draft = ProfileDraft {
        id: "alpha".to_string(),
        ports: vec![PortMapping {
            container: 3000,
            host: port,
        }],
        env: [
            ("JWT_SECRET".to_string(), jwt.clone()),
            ("APP_DOMAIN".to_string(), "example.com".to_string()),
        ]
        .into_iter()
        .collect(),
        ..ProfileDraft::default()
    };
    let profile = h.launcher.create_profile(draft).unwrap();
    assert_eq!(profile.env.len(), 1);
    assert_eq!(profile.env["APP_DOMAIN"], "example.com");
    assert_eq!(h.launcher.secrets().load("alpha")["JWT_SECRET"], jwt);
}

#[tokio::test]
async fn delete_without_artifacts_skips_teardown() {
    let h = Harness::new(true);
    h.create("alpha", "1.0.0");
    let secret_file = h.launcher.secrets().file_path("alpha");
    assert!(secret_file.is_file());

    let job = run(&h, "alpha", ActionRequest::Delete).await;
    assert_eq!(job.status, JobStatus::Succeeded);
    assert!(h.engine.calls().is_empty());
    assert_eq!(
        h.launcher.profiles().get("alpha").unwrap_err().kind(),
        ErrorKind::ProfileNotFound
    );
    assert!(!secret_file.exists());
}

#[tokio::test]
async fn delete_tears_down_stack_and_volumes() {
    let h = Harness::new(true);
    h.create("alpha", "1.0.0");
    run(&h, "alpha", ActionRequest::Enable).await;
    let compose_dir = h.launcher.config().paths().compose_dir("alpha");
    assert!(compose_dir.is_dir());

    let job = run(&h, "alpha", ActionRequest::Delete).await;
    assert_eq!(job.status, JobStatus::Succeeded);
    assert_eq!(
        h.engine.calls().last().map(String::as_str),
        Some("down kimmio-alpha volumes=true")
    );
    assert!(!compose_dir.exists());
    assert!(h.launcher.list_profiles().await.unwrap().is_empty());
}

#[tokio::test]
async fn recreate_resets_volumes_before_starting() {
    let h = Harness::new(true);
    h.create("alpha", "1.0.0");
    run(&h, "alpha", ActionRequest::Enable).await;

    let job = run(&h, "alpha", ActionRequest::Recreate).await;
    assert_eq!(job.status, JobStatus::Succeeded);
    let calls = h.engine.calls();
    assert_eq!(
        &calls[2..],
        &[
            "down kimmio-alpha volumes=true".to_string(),
            "pull kimmio/kimmio-app:1.0.0".to_string(),
            "up kimmio-alpha".to_string(),
        ]
    );
    let profile = h.launcher.profiles().get("alpha").unwrap();
    assert_eq!(profile.last_action, Some(ActionKind::Recreate));
    assert!(profile.enabled);
}

#[tokio::test]
async fn regenerating_secrets_replaces_them() {
    let h = Harness::new(true);
    h.create("alpha", "1.0.0");
    let before = h.launcher.secrets().load("alpha");

    let job = run(&h, "alpha", ActionRequest::RegenerateSecrets).await;
    assert_eq!(job.status, JobStatus::Succeeded);
    let after = h.launcher.secrets().load("alpha");
    assert_ne!(before["JWT_SECRET"], after["JWT_SECRET"]);
    assert_ne!(before["ENC_KEY_V0"], after["ENC_KEY_V0"]);
    assert!(h.engine.calls().is_empty());
}

#[tokio::test]
async fn disabled_profile_reports_stopped_even_if_probe_succeeds() {
    let h = Harness::new(true);
    h.create("alpha", "1.0.0");

    let status = h.launcher.profile_status("alpha").await.unwrap();
    assert_eq!(status.runtime_status, RuntimeStatus::Stopped);
    assert!(!status.running);
}

#[tokio::test(start_paused = true)]
async fn enabled_profile_turns_unhealthy_after_window() {
    let h = Harness::new(true);
    h.create("alpha", "1.0.0");
    run(&h, "alpha", ActionRequest::Enable).await;

    h.probe.set(false);
    let status = h.launcher.profile_status("alpha").await.unwrap();
    assert_eq!(status.runtime_status, RuntimeStatus::Unhealthy);
    assert!(!status.running);
}

#[tokio::test]
async fn submission_errors_are_synchronous() {
    let h = Harness::new(true);
    h.create("alpha", "1.0.0");

    let err = h.launcher.submit("ghost", ActionRequest::Enable).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ProfileNotFound);

    let err = h.launcher.submit("A!", ActionRequest::Enable).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);

    let err = h
        .launcher
        .submit(
            "alpha",
            ActionRequest::UpdateVersion {
                version: "../etc".to_string(),
            },
        )
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
    assert!(h.launcher.profiles().get("alpha").unwrap().last_requested_version.is_none());

    let err = h.launcher.job("no-such-job").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::JobNotFound);
}

#[tokio::test]
async fn create_enforces_store_rules() {
    let h = Harness::new(true);
    h.create("alpha", "1.0.0");
    let taken = h.launcher.profiles().get("alpha").unwrap().host_port();

    let draft = |id: &str, host: u16| ProfileDraft {
        id: id.to_string(),
        ports: vec![PortMapping {
            container: 3000,
            host,
        }],
        ..ProfileDraft::default()
    };

    let free = portpicker::pick_unused_port().unwrap();
    let err = h.launcher.create_profile(draft("alpha", free)).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ProfileExists);

    for port in [80, taken, h.launcher.config().listen_port] {
        let err = h.launcher.create_profile(draft("beta", port)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation, "port {}", port);
    }

    h.create("beta", "1.0.0");
    h.create("gamma", "1.0.0");
    let free = portpicker::pick_unused_port().unwrap();
    let err = h.launcher.create_profile(draft("delta", free)).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ProfileLimitReached);
}

#[tokio::test]
async fn suggestions_skip_taken_ids() {
    let h = Harness::new(true);
    assert_eq!(h.launcher.suggest_profile_id().unwrap(), "kimmio-default");
    h.create("kimmio-default", "latest");
    assert_eq!(h.launcher.suggest_profile_id().unwrap(), "kimmio-2");

    let port = h.launcher.suggest_port().unwrap();
    let config = h.launcher.config();
    assert!(port >= config.profile_port_min && port < config.profile_port_max);
    assert_ne!(
        port,
        h.launcher.profiles().get("kimmio-default").unwrap().host_port()
    );
}

#[tokio::test]
async fn failed_delete_teardown_keeps_the_profile() {
    let h = Harness::new(true);
    h.create("alpha", "1.0.0");
    run(&h, "alpha", ActionRequest::Enable).await;
    let compose_dir = h.launcher.config().paths().compose_dir("alpha");
    let secret_file = h.launcher.secrets().file_path("alpha");

    h.engine.fail_down(true);
    let job = run(&h, "alpha", ActionRequest::Delete).await;
    assert_eq!(job.status, JobStatus::Failed);
    assert!(job.error.is_some());

    let profile = h.launcher.profiles().get("alpha").unwrap();
    assert_eq!(profile.last_action, Some(ActionKind::Delete));
    assert_eq!(profile.last_action_status, Some(ActionOutcome::Failed));
    assert!(compose_dir.is_dir());
    assert!(secret_file.is_file());

    // Once the engine recovers the same delete goes through.
    h.engine.fail_down(false);
    let job = run(&h, "alpha", ActionRequest::Delete).await;
    assert_eq!(job.status, JobStatus::Succeeded);
    assert!(!secret_file.exists());
}

#[tokio::test]
async fn regenerating_secrets_on_enabled_profile_redeploys() {
    let h = Harness::new(true);
    h.create("alpha", "1.0.0");
    run(&h, "alpha", ActionRequest::Enable).await;
    let before = h.launcher.secrets().load("alpha");

    let job = run(&h, "alpha", ActionRequest::RegenerateSecrets).await;
    assert_eq!(job.status, JobStatus::Succeeded, "{:?}", job.error);

    let after = h.launcher.secrets().load("alpha");
    assert_ne!(before["JWT_SECRET"], after["JWT_SECRET"]);
    let calls = h.engine.calls();
    assert_eq!(
        &calls[calls.len() - 2..],
        &[
            "pull kimmio/kimmio-app:1.0.0".to_string(),
            "up kimmio-alpha".to_string(),
        ]
    );

    let env_file = h.launcher.config().paths().compose_dir("alpha").join(".env");
    let env = fs::read_to_string(env_file).unwrap();
    assert!(env.contains(&format!("JWT_SECRET={}", after["JWT_SECRET"])));
    assert!(!env.contains(&before["JWT_SECRET"]));

    let profile = h.launcher.profiles().get("alpha").unwrap();
    assert!(profile.enabled);
    assert_eq!(
        profile.last_action_result.as_deref(),
        Some("Secrets regenerated and applied")
    );
}

#[tokio::test(start_paused = true)]
async fn enable_health_wait_stops_at_the_deadline() {
    let h = Harness::with_config(false, |config| {
        config.action_timeout = Duration::from_secs(5);
        config.enable_timeout = Duration::from_secs(5);
    });
    h.create("alpha", "1.0.0");

    let job = run(&h, "alpha", ActionRequest::Enable).await;
    assert_eq!(job.status, JobStatus::Timeout, "{:?}", job.error);

    let profile = h.launcher.profiles().get("alpha").unwrap();
    assert!(profile.enabled);
    assert!(profile.starting_until.is_some());

    // The lock is released with the terminal status.
    let job = run(&h, "alpha", ActionRequest::Stop).await;
    assert_eq!(job.status, JobStatus::Succeeded);
}

#[tokio::test]
async fn create_is_rejected_while_a_job_holds_the_id() {
    let h = Harness::new(true);
    h.create("alpha", "1.0.0");

    let delete = h.launcher.submit("alpha", ActionRequest::Delete).unwrap();
    let port = portpicker::pick_unused_port().unwrap();
    let draft = ProfileDraft {
        id: "alpha".to_string(),
        ports: vec![PortMapping {
            container: 3000,
            host: port,
        }],
        ..ProfileDraft::default()
    };
    let err = h.launcher.create_profile(draft.clone()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ProfileBusy);

    let delete = h.launcher.wait_for_job(&delete.id).await.unwrap();
    assert_eq!(delete.status, JobStatus::Succeeded);

    h.launcher.create_profile(draft).unwrap();
    assert!(h.launcher.secrets().file_path("alpha").is_file());
}
