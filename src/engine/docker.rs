//! `docker` command-line backend.

use std::path::{Path, PathBuf};
use std::process::{Output, Stdio};

use async_trait::async_trait;
use tokio::process::Command;

use super::{ContainerEngine, EngineStatus, InvocationError};

/// Install locations checked when `docker` is not on `PATH`. Launches from a
/// desktop icon often start with a minimal `PATH`.
const DOCKER_CANDIDATES: &[&str] = &[
    "/usr/local/bin/docker",
    "/opt/homebrew/bin/docker",
    "/Applications/Docker.app/Contents/Resources/bin/docker",
    "/usr/bin/docker",
    "/snap/bin/docker",
    r"C:\Program Files\Docker\Docker\resources\bin\docker.exe",
];

/// Locate the docker executable.
pub fn locate_docker() -> Option<PathBuf> {
    if let Ok(path) = which::which("docker") {
        return Some(path);
    }
    DOCKER_CANDIDATES
        .iter()
        .map(PathBuf::from)
        .find(|p| p.is_file())
}

/// `DOCKER_HOST` to inject when the environment does not set one and a
/// rootless daemon socket exists.
pub fn rootless_docker_host<F>(lookup: F) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    let set = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

    if set("DOCKER_HOST").is_some() {
        return None;
    }
    let mut sockets = Vec::new();
    if let Some(runtime_dir) = set("XDG_RUNTIME_DIR") {
        sockets.push(Path::new(&runtime_dir).join("docker.sock"));
    }
    if let Some(uid) = set("UID") {
        sockets.push(Path::new("/run/user").join(uid).join("docker.sock"));
    }
    sockets
        .into_iter()
        .find(|sock| sock.exists() && !sock.is_dir())
        .map(|sock| format!("unix://{}", sock.display()))
}

pub struct DockerCli {
    binary: Option<PathBuf>,
    docker_host: Option<String>,
}

impl DockerCli {
    pub fn discover() -> Self {
        let binary = locate_docker();
        match &binary {
            Some(path) => log::info!("Using docker at {}", path.display()),
            None => log::warn!("docker executable not found"),
        }
        let docker_host = rootless_docker_host(|key| std::env::var(key).ok());
        if let Some(host) = &docker_host {
            log::info!("Using rootless docker socket {}", host);
        }
        Self {
            binary,
            docker_host,
        }
    }

    fn command(&self, args: &[&str], dir: Option<&Path>) -> Result<Command, InvocationError> {
        let binary = self.binary.as_ref().ok_or_else(|| {
            InvocationError::new(
                format!("docker {}", args.join(" ")),
                "docker executable not found in PATH or common install locations",
            )
        })?;

        let mut cmd = Command::new(binary);
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = dir {
            cmd.current_dir(dir);
        }
        if let Some(host) = &self.docker_host {
            cmd.env("DOCKER_HOST", host);
        }

        #[cfg(target_os = "windows")]
        {
            const CREATE_NO_WINDOW: u32 = 0x0800_0000;
            cmd.creation_flags(CREATE_NO_WINDOW);
        }

        Ok(cmd)
    }

    /// Run docker and fail unless it exits successfully.
    async fn run(&self, args: &[&str], dir: Option<&Path>) -> Result<(), InvocationError> {
        let command = format!("docker {}", args.join(" "));
        let output = self
            .command(args, dir)?
            .output()
            .await
            .map_err(|e| InvocationError::new(command.clone(), e.to_string()))?;

        if output.status.success() {
            Ok(())
        } else {
            Err(InvocationError::new(command, combined_output(&output)))
        }
    }
}

fn combined_output(output: &Output) -> String {
    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);
    let combined = format!("{}\n{}", stdout.trim(), stderr.trim());
    let combined = combined.trim();
    if combined.is_empty() {
        format!("exited with {}", output.status)
    } else {
        combined.to_string()
    }
}

#[async_trait]
impl ContainerEngine for DockerCli {
    async fn pull(&self, image: &str) -> Result<(), InvocationError> {
        self.run(&["pull", image], None).await
    }

    async fn compose_up(&self, dir: &Path, project: &str) -> Result<(), InvocationError> {
        self.run(
            &[
                "compose",
                "-p",
                project,
                "-f",
                "compose.yaml",
                "up",
                "-d",
                "--build",
            ],
            Some(dir),
        )
        .await
    }

    async fn compose_down(
        &self,
        dir: &Path,
        project: &str,
        remove_volumes: bool,
    ) -> Result<(), InvocationError> {
        let mut args = vec!["compose", "-p", project, "-f", "compose.yaml", "down"];
        if remove_volumes {
            args.extend(["--volumes", "--remove-orphans"]);
        }
        self.run(&args, Some(dir)).await
    }

    async fn status(&self) -> EngineStatus {
        if self.binary.is_none() {
            return EngineStatus::NotInstalled;
        }
        match self.run(&["info"], None).await {
            Ok(()) => EngineStatus::Available,
            Err(e) => {
                log::debug!("docker info failed: {}", e);
                EngineStatus::Unreachable
            }
        }
    }
}
