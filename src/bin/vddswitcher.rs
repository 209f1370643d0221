//! vddswitcher - Thin client for the virtual display daemon.
//!
//! CHANGELOG:
//! - 10/19/2026 - Initial implementation

use std::process::ExitCode;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use tracing::error;
use tracing_subscriber::EnvFilter;

use vdd_switcher::client::ControlClient;
use vdd_switcher::config::{default_channel, expand_channel};
use vdd_switcher::daemon::protocol::{Command, Request};

#[derive(Parser)]
#[command(name = "vddswitcher")]
#[command(about = "Send a command to the virtual display daemon")]
struct Cli {
    /// Command code (200 = stop virtual display)
    #[arg(long, default_value_t = Command::STOP_VIRTUAL_DISPLAY)]
    command: u32,

    /// Control channel (pipe name on Windows, socket path elsewhere)
    #[arg(long)]
    channel: Option<String>,

    /// Wait for a busy channel (seconds)
    #[arg(long, default_value = "5.0")]
    timeout: f64,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(tracing::Level::WARN.into()))
        .with_writer(std::io::stderr)
        .init();

    match run(Cli::parse()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<()> {
    let channel = match cli.channel {
        Some(raw) => expand_channel(&raw),
        None => default_channel(),
    };
    let timeout = Duration::try_from_secs_f64(cli.timeout)?;
    let client = ControlClient::new(channel).with_timeout(timeout);

    match client.send(Request::new(Command::from_code(cli.command))) {
        Ok(()) => Ok(()),
        // Nothing to stop
        Err(e) if e.is_not_running() => {
            println!("Daemon not running");
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}
