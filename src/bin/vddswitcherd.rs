//! vddswitcherd - Virtual display lifecycle daemon.
//!
//! CHANGELOG:
//! - 10/19/2026 - Remove the pid file on exit
//! - 10/19/2026 - Initial implementation

use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use vdd_switcher::client::ControlClient;
use vdd_switcher::config::{default_channel, expand_channel, mode_request, DaemonConfig};
use vdd_switcher::daemon::lifecycle;
use vdd_switcher::daemon::protocol::{Command, Request};
use vdd_switcher::display::{platform_displays, DisplayConfigurator, DisplayMode};
use vdd_switcher::driver::{
    platform_driver, Adapter, DeviceStatus, Driver, DriverVersion, DEFAULT_IO_TIMEOUT, DISPLAY_CODE,
};

#[derive(Parser)]
#[command(name = "vddswitcherd")]
#[command(about = "Keeps a Parsec virtual display alive for a streaming session")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the daemon
    Start {
        /// Run in foreground (don't detach)
        #[arg(long)]
        foreground: bool,

        #[command(flatten)]
        channel: ChannelArg,

        #[command(flatten)]
        mode: ModeArgs,
    },

    /// Ask a running daemon to remove its display and exit
    Stop {
        #[command(flatten)]
        channel: ChannelArg,
    },

    /// Check whether the daemon is running
    Status {
        #[command(flatten)]
        channel: ChannelArg,
    },

    /// Report driver readiness, version and the virtual output's modes
    Probe {
        /// Print JSON instead of text
        #[arg(long)]
        json: bool,
    },
}

#[derive(Args)]
struct ChannelArg {
    /// Control channel (pipe name on Windows, socket path elsewhere)
    #[arg(long)]
    channel: Option<String>,
}

impl ChannelArg {
    fn resolve(&self) -> String {
        match &self.channel {
            Some(raw) => expand_channel(raw),
            None => default_channel(),
        }
    }
}

#[derive(Args)]
struct ModeArgs {
    /// Requested width in pixels
    #[arg(long, env = "SUNSHINE_CLIENT_WIDTH")]
    width: Option<u32>,

    /// Requested height in pixels
    #[arg(long, env = "SUNSHINE_CLIENT_HEIGHT")]
    height: Option<u32>,

    /// Requested refresh rate in Hz
    #[arg(long, env = "SUNSHINE_CLIENT_FPS")]
    refresh: Option<u32>,
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()),
        )
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> ExitCode {
    init_tracing();
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Start {
            foreground,
            channel,
            mode,
        } => cmd_start(foreground, &channel, &mode),
        Commands::Stop { channel } => cmd_stop(&channel),
        Commands::Status { channel } => cmd_status(&channel),
        Commands::Probe { json } => cmd_probe(json),
    };

    match result {
        Ok(code) => code,
        Err(e) => {
            error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

// ============================================================================
// start
// ============================================================================

fn cmd_start(foreground: bool, channel: &ChannelArg, mode: &ModeArgs) -> Result<ExitCode> {
    let requested = mode_request(mode.width, mode.height, mode.refresh)
        .context("Invalid resolution request")?;
    let config = DaemonConfig::default()
        .with_channel(&channel.resolve())
        .with_mode(requested);

    if !foreground {
        return detach(&config);
    }
    Ok(run_daemon(&config))
}

fn run_daemon(config: &DaemonConfig) -> ExitCode {
    info!(
        channel = %config.channel,
        mode = ?config.requested_mode.map(|m| m.to_string()),
        "Starting daemon"
    );

    match lifecycle::run(
        config,
        &platform_driver(),
        &platform_displays(),
        lifecycle::shutdown_signal(),
    ) {
        Ok(()) => {
            info!("Daemon exited");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(error = %e, "Daemon failed");
            ExitCode::FAILURE
        }
    }
}

/// Fork into the background and keep running there.
#[cfg(unix)]
fn detach(config: &DaemonConfig) -> Result<ExitCode> {
    use daemonize::Daemonize;
    use vdd_switcher::daemon::PidFile;

    let pid_file = config.pid_file();
    let log_file = config.log_file();

    if let Some(parent) = std::path::Path::new(&config.channel).parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }

    let stderr = std::fs::File::create(&log_file)
        .with_context(|| format!("Failed to create log file {}", log_file.display()))?;

    Daemonize::new()
        .pid_file(&pid_file)
        .working_directory(std::env::temp_dir())
        .stderr(stderr)
        .start()
        .context("Failed to daemonize")?;

    // Child process from here on
    let _pid_file = PidFile::adopt(pid_file);
    Ok(run_daemon(config))
}

/// Relaunch this executable detached and windowless with `--foreground`.
#[cfg(windows)]
fn detach(config: &DaemonConfig) -> Result<ExitCode> {
    use std::os::windows::process::CommandExt;

    const DETACHED_PROCESS: u32 = 0x0000_0008;
    const CREATE_NO_WINDOW: u32 = 0x0800_0000;

    let exe = std::env::current_exe().context("Failed to locate daemon executable")?;
    let mut command = std::process::Command::new(exe);
    command
        .args(["start", "--foreground", "--channel", config.channel.as_str()])
        .creation_flags(DETACHED_PROCESS | CREATE_NO_WINDOW);
    if let Some(mode) = config.requested_mode {
        command.args([
            "--width".to_string(),
            mode.width.to_string(),
            "--height".to_string(),
            mode.height.to_string(),
            "--refresh".to_string(),
            mode.refresh.to_string(),
        ]);
    }

    let child = command.spawn().context("Failed to start background daemon")?;
    println!("Daemon started (pid {})", child.id());
    Ok(ExitCode::SUCCESS)
}

// ============================================================================
// stop / status
// ============================================================================

fn cmd_stop(channel: &ChannelArg) -> Result<ExitCode> {
    let client = ControlClient::new(channel.resolve());

    match client.send(Request::new(Command::StopVirtualDisplay)) {
        Ok(()) => {
            println!("Stop request sent to {}", client.channel());
            Ok(ExitCode::SUCCESS)
        }
        Err(e) if e.is_not_running() => {
            println!("Daemon not running");
            Ok(ExitCode::SUCCESS)
        }
        Err(e) => Err(e.into()),
    }
}

fn cmd_status(channel: &ChannelArg) -> Result<ExitCode> {
    let client = ControlClient::new(channel.resolve());

    if client.is_running() {
        println!("Daemon running at {}", client.channel());
        Ok(ExitCode::SUCCESS)
    } else {
        println!("Daemon not running");
        Ok(ExitCode::FAILURE)
    }
}

// ============================================================================
// probe
// ============================================================================

#[derive(Serialize)]
struct ProbeReport {
    status: DeviceStatus,
    hint: &'static str,
    version: Option<DriverVersion>,
    output: Option<String>,
    modes: Vec<DisplayMode>,
}

fn cmd_probe(json: bool) -> Result<ExitCode> {
    let driver = platform_driver();
    let status = driver.query_readiness();

    let version = if status.is_ready() {
        let adapter = Adapter::open(&driver, DEFAULT_IO_TIMEOUT)
            .context("Failed to open virtual display adapter")?;
        let version = adapter.version().ok();
        adapter.close();
        version
    } else {
        None
    };

    let displays = platform_displays();
    let output = displays.find_output(DISPLAY_CODE);
    let modes = match &output {
        Some(name) => displays.enumerate_modes(name).collect(),
        None => Vec::new(),
    };

    let report = ProbeReport {
        status,
        hint: status.hint(),
        version,
        output,
        modes,
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report);
    }

    Ok(if status.is_ready() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn print_report(report: &ProbeReport) {
    println!("Driver status: {} ({})", report.status, report.hint);
    if let Some(version) = report.version {
        println!("Driver version: {}", version);
    }
    match &report.output {
        Some(output) => {
            println!("Virtual output: {} ({} modes)", output, report.modes.len());
            for mode in &report.modes {
                println!("  {}", mode);
            }
        }
        None => println!("Virtual output: not plugged"),
    }
}
