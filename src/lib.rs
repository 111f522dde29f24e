//! Lifecycle orchestration for local Kimmio profiles running on Docker Compose.

pub mod cli;
pub mod config;
pub mod engine;
pub mod error;
pub mod health;
pub mod jobs;
pub mod launcher;
pub mod paths;
pub mod profile;
pub mod validation;

use std::process::ExitCode;

use clap::Parser as _;
use tracing_subscriber::EnvFilter;

pub use config::AppConfig;
pub use error::{AppError, ErrorKind, Result};
pub use launcher::{ActionRequest, Launcher, ProfileDraft};

/// Entry point of the `kimmio-launcher` binary.
pub async fn run() -> ExitCode {
    let cli = cli::Cli::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    cli::run(cli).await
}
