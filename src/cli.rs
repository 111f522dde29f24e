//! Command-line front end.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::{Parser, Subcommand};
use serde::Serialize;

use crate::config::AppConfig;
use crate::error::{ErrorKind, Result};
use crate::jobs::{ActionJob, JobStatus};
use crate::launcher::{ActionRequest, Launcher, ProfileDraft};
use crate::profile::types::DEFAULT_CONTAINER_PORT;
use crate::profile::{PortMapping, ResourceLimits, Resources};

const FOLLOW_INTERVAL: Duration = Duration::from_millis(500);

/// Manage local Kimmio profiles running on Docker Compose.
#[derive(Debug, Parser)]
#[command(name = "kimmio-launcher", author, version, about, long_about = None)]
pub struct Cli {
    /// Data directory (overrides KIMMIO_DATA_DIR and the default location)
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Show container engine status and profile overview
    Status,
    /// Manage profiles
    Profile {
        #[command(subcommand)]
        command: ProfileCommand,
    },
}

#[derive(Debug, Subcommand)]
pub enum ProfileCommand {
    /// List profiles with their runtime status
    List,
    /// Show one profile
    Info { id: String },
    /// Create a new (disabled) profile
    Create(CreateArgs),
    /// Start the profile's stack
    Enable { id: String },
    /// Stop the profile's stack, keeping data
    Stop { id: String },
    /// Tear down the stack including volumes and start it fresh
    Recreate { id: String },
    /// Switch to another image version, rolling back on failure
    Update {
        id: String,
        /// Image tag
        #[arg(default_value = "latest")]
        version: String,
    },
    /// Generate new secrets and apply them
    RegenerateSecrets { id: String },
    /// Remove the stack, its volumes, secrets and the profile record
    Delete { id: String },
}

#[derive(Debug, clap::Args)]
pub struct CreateArgs {
    /// Profile id (defaults to the next free kimmio-* id)
    #[arg(long)]
    pub id: Option<String>,

    /// Image tag
    #[arg(long, default_value = "latest")]
    pub version: String,

    /// Host port (defaults to the next free port in the configured range)
    #[arg(long)]
    pub port: Option<u16>,

    /// Container port
    #[arg(long, default_value_t = DEFAULT_CONTAINER_PORT)]
    pub container_port: u16,

    /// Memory limit, e.g. 512mb or 2g
    #[arg(long, default_value = "")]
    pub memory: String,

    /// CPU limit (0 for no limit)
    #[arg(long, default_value_t = 0.0)]
    pub cpus: f64,

    /// Extra environment, repeatable KEY=VALUE
    #[arg(long = "env", value_parser = parse_env_pair)]
    pub env: Vec<(String, String)>,
}

fn parse_env_pair(raw: &str) -> std::result::Result<(String, String), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got {:?}", raw))?;
    Ok((key.trim().to_string(), value.to_string()))
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Overview<T> {
    engine: &'static str,
    data_dir: PathBuf,
    profiles: T,
}

/// Parse arguments, run the command and map the outcome to an exit code.
pub async fn run(cli: Cli) -> ExitCode {
    match dispatch(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {}", e.detail());
            ExitCode::from(error_exit_status(e.kind()))
        }
    }
}

/// Rejected input exits with 2, every other error with 1.
fn error_exit_status(kind: ErrorKind) -> u8 {
    match kind {
        ErrorKind::Validation => 2,
        _ => 1,
    }
}

async fn dispatch(cli: Cli) -> Result<ExitCode> {
    let config = AppConfig::load(cli.data_dir)?;
    let launcher = Launcher::with_docker(config)?;

    match cli.command {
        Command::Status => {
            let overview = Overview {
                engine: launcher.engine_status().await.as_str(),
                data_dir: launcher.config().data_dir.clone(),
                profiles: launcher.list_profiles().await?,
            };
            print_json(&overview)?;
        }
        Command::Profile { command } => match command {
            ProfileCommand::List => print_json(&launcher.list_profiles().await?)?,
            ProfileCommand::Info { id } => print_json(&launcher.profile_status(&id).await?)?,
            ProfileCommand::Create(args) => create(&launcher, args)?,
            ProfileCommand::Enable { id } => {
                return follow(&launcher, &id, ActionRequest::Enable).await
            }
            ProfileCommand::Stop { id } => return follow(&launcher, &id, ActionRequest::Stop).await,
            ProfileCommand::Recreate { id } => {
                return follow(&launcher, &id, ActionRequest::Recreate).await
            }
            ProfileCommand::Update { id, version } => {
                return follow(&launcher, &id, ActionRequest::UpdateVersion { version }).await
            }
            ProfileCommand::RegenerateSecrets { id } => {
                return follow(&launcher, &id, ActionRequest::RegenerateSecrets).await
            }
            ProfileCommand::Delete { id } => {
                return follow(&launcher, &id, ActionRequest::Delete).await
            }
        },
    }
    Ok(ExitCode::SUCCESS)
}

fn create(launcher: &Launcher, args: CreateArgs) -> Result<()> {
    let id = match args.id {
        Some(id) => id,
        None => launcher.suggest_profile_id()?,
    };
    let host = match args.port {
        Some(port) => port,
        None => launcher.suggest_port()?,
    };
    let draft = ProfileDraft {
        id,
        version: args.version,
        ports: vec![PortMapping {
            container: args.container_port,
            host,
        }],
        env: args.env.into_iter().collect::<BTreeMap<_, _>>(),
        resources: Resources {
            limits: ResourceLimits {
                memory: args.memory,
                cpus: args.cpus,
            },
        },
    };
    print_json(&launcher.create_profile(draft)?)
}

/// Submit an action and stream its log until it finishes.
async fn follow(launcher: &Launcher, id: &str, request: ActionRequest) -> Result<ExitCode> {
    let job = launcher.submit(id, request)?;
    eprintln!("job {} accepted for {}", job.id, id);

    let mut last_line: Option<String> = None;
    let job = loop {
        let job = launcher.job(&job.id)?;
        print_new_lines(&job, &mut last_line);
        if job.status.is_terminal() {
            break job;
        }
        tokio::time::sleep(FOLLOW_INTERVAL).await;
    };

    print_json(&job)?;
    Ok(match job.status {
        JobStatus::Succeeded => ExitCode::SUCCESS,
        _ => ExitCode::FAILURE,
    })
}

/// Print log lines that came after the last one printed. The job log is
/// capped, so positions shift; the last printed line is the anchor.
fn print_new_lines(job: &ActionJob, last_line: &mut Option<String>) {
    let start = last_line
        .as_ref()
        .and_then(|last| job.logs.iter().rposition(|l| l == last))
        .map_or(0, |pos| pos + 1);
    for line in job.logs.iter().skip(start) {
        eprintln!("{}", line);
    }
    if let Some(line) = job.logs.back() {
        *last_line = Some(line.clone());
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
