#![allow(dead_code)]

use std::collections::HashSet;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;

use kimmio_launcher_lib::engine::{ContainerEngine, EngineStatus, InvocationError, RetryPolicy};
use kimmio_launcher_lib::health::HealthProbe;
use kimmio_launcher_lib::{AppConfig, Launcher, ProfileDraft};

/// Engine whose pulls fail for selected image tags.
#[derive(Default)]
pub struct FakeEngine {
    failing_tags: Mutex<HashSet<String>>,
    fail_down: AtomicBool,
    calls: Mutex<Vec<String>>,
}

impl FakeEngine {
    pub fn fail_down(&self, fail: bool) {
        self.fail_down.store(fail, Ordering::SeqCst);
    }

    pub fn fail_tag(&self, tag: &str) {
        self.failing_tags.lock().unwrap().insert(tag.to_string());
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl ContainerEngine for FakeEngine {
    async fn pull(&self, image: &str) -> Result<(), InvocationError> {
        self.record(format!("pull {}", image));
        let tag = image.rsplit(':').next().unwrap_or_default();
        if self.failing_tags.lock().unwrap().contains(tag) {
            return Err(InvocationError::new(
                "docker pull",
                format!("Error response from daemon: manifest for {} not found", image),
            ));
        }
        Ok(())
    }

    async fn compose_up(&self, dir: &Path, project: &str) -> Result<(), InvocationError> {
        assert!(dir.join(".env").is_file());
        self.record(format!("up {}", project));
        Ok(())
    }

    async fn compose_down(
        &self,
        _dir: &Path,
        project: &str,
        remove_volumes: bool,
    ) -> Result<(), InvocationError> {
        self.record(format!("down {} volumes={}", project, remove_volumes));
        if self.fail_down.load(Ordering::SeqCst) {
            return Err(InvocationError::new(
                "docker compose down",
                "Cannot connect to the Docker daemon at unix:///var/run/docker.sock",
            ));
        }
        Ok(())
    }

    async fn status(&self) -> EngineStatus {
        EngineStatus::Available
    }
}

/// Probe with a switchable answer.
pub struct FakeProbe {
    healthy: AtomicBool,
}

impl FakeProbe {
    pub fn new(healthy: bool) -> Self {
        Self {
            healthy: AtomicBool::new(healthy),
        }
    }

    pub fn set(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::SeqCst);
    }
}

#[async_trait]
impl HealthProbe for FakeProbe {
    async fn is_healthy(&self, _port: u16) -> bool {
        self.healthy.load(Ordering::SeqCst)
    }
}

pub struct Harness {
    pub dir: TempDir,
    pub engine: Arc<FakeEngine>,
    pub probe: Arc<FakeProbe>,
    pub launcher: Launcher,
}

impl Harness {
    pub fn new(healthy: bool) -> Self {
        Self::with_config(healthy, |_| {})
    }

    /// Harness whose configuration is adjusted by `tune` before start.
    pub fn with_config(healthy: bool, tune: impl FnOnce(&mut AppConfig)) -> Self {
        let dir = TempDir::new().unwrap();
        let mut config = AppConfig::with_data_dir(dir.path());
        tune(&mut config);
        let engine = Arc::new(FakeEngine::default());
        let probe = Arc::new(FakeProbe::new(healthy));
        let retry = RetryPolicy {
            attempts: 1,
            backoff_step: Duration::ZERO,
        };
        let launcher = Launcher::with_retry_policy(
            config,
            Arc::clone(&engine) as Arc<dyn ContainerEngine>,
            Arc::clone(&probe) as Arc<dyn HealthProbe>,
            retry,
        )
        .unwrap();
        Self {
            dir,
            engine,
            probe,
            launcher,
        }
    }

    /// Create a profile on a currently free port.
    pub fn create(&self, id: &str, version: &str) {
        let port = portpicker::pick_unused_port().unwrap();
        let draft = ProfileDraft {
            id: id.to_string(),
            version: version.to_string(),
            ports: vec![kimmio_launcher_lib::profile::PortMapping {
                container: 3000,
                host: port,
            }],
            ..ProfileDraft::default()
        };
        self.launcher.create_profile(draft).unwrap();
    }
}
