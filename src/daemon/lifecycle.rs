//! Lifecycle coordinator: the daemon's top-level run.
//!
//! ```text
//! Init -> DriverReady -> DisplayActive -> Serving -> ShuttingDown -> Terminated
//! ```
//!
//! The device handle is acquired once and released on every exit path after
//! the keep-alive task has been joined.
//!
//! CHANGELOG:
//! - 10/19/2026 - Channel construction injectable for tests
//! - 10/19/2026 - Initial implementation

use std::fmt;
use std::future::Future;
use std::io;
use std::thread;

use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::config::{ConfigError, DaemonConfig};
use crate::daemon::channel::{ChannelEndpoint, ChannelError, ControlEndpoint};
use crate::daemon::server::{ControlServer, ServeOutcome};
use crate::daemon::service::RequestProcessor;
use crate::daemon::{keepalive, DaemonState};
use crate::display::{apply_requested_mode, DisplayConfigurator};
use crate::driver::{Adapter, DeviceControl, DeviceStatus, Driver, DriverError};

/// Fatal daemon errors. Each one ends the process with a non-zero exit.
#[derive(Error, Debug)]
pub enum DaemonError {
    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("Virtual display driver is not ready: {0} ({hint})", hint = .0.hint())]
    DriverNotReady(DeviceStatus),

    #[error("Failed to open virtual display adapter: {0}")]
    Driver(#[source] DriverError),

    #[error(transparent)]
    Channel(#[from] ChannelError),

    #[error("Failed to add virtual display: {0}")]
    AddDisplay(#[source] DriverError),

    #[error("Failed to start daemon runtime: {0}")]
    Runtime(#[source] io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Init,
    DriverReady,
    DisplayActive,
    Serving,
    ShuttingDown,
    Terminated,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Init => "init",
            Phase::DriverReady => "driver-ready",
            Phase::DisplayActive => "display-active",
            Phase::Serving => "serving",
            Phase::ShuttingDown => "shutting-down",
            Phase::Terminated => "terminated",
        };
        f.write_str(name)
    }
}

fn enter(phase: Phase) {
    debug!(%phase, "Lifecycle phase");
}

/// Run the daemon once, from readiness check to teardown.
///
/// Blocks until a client sends a stop request, the control channel fails or
/// `shutdown` completes. A non-ready driver is never opened.
pub fn run<T, C, F>(
    config: &DaemonConfig,
    driver: &T,
    displays: &C,
    shutdown: F,
) -> Result<(), DaemonError>
where
    T: Driver,
    C: DisplayConfigurator + ?Sized,
    F: Future<Output = ()>,
{
    run_with_channel(config, driver, displays, ControlEndpoint::create, shutdown)
}

/// `run` with the control channel built by `make_endpoint`.
pub(crate) fn run_with_channel<T, C, E, M, F>(
    config: &DaemonConfig,
    driver: &T,
    displays: &C,
    make_endpoint: M,
    shutdown: F,
) -> Result<(), DaemonError>
where
    T: Driver,
    C: DisplayConfigurator + ?Sized,
    E: ChannelEndpoint,
    M: FnOnce(&str) -> Result<E, ChannelError>,
    F: Future<Output = ()>,
{
    enter(Phase::Init);
    config.validate()?;

    let status = driver.query_readiness();
    if !status.is_ready() {
        return Err(DaemonError::DriverNotReady(status));
    }
    enter(Phase::DriverReady);
    info!(%status, "Virtual display driver ready");

    let adapter = Adapter::open(driver, config.driver_timeout).map_err(DaemonError::Driver)?;
    match adapter.version() {
        Ok(version) => info!(%version, "Driver version"),
        Err(e) => warn!(error = %e, "Failed to query driver version"),
    }

    let result = run_with_adapter(config, &adapter, displays, make_endpoint, shutdown);

    enter(Phase::Terminated);
    adapter.close();
    result
}

/// Everything between opening and closing the device handle.
fn run_with_adapter<D, C, E, M, F>(
    config: &DaemonConfig,
    adapter: &Adapter<D>,
    displays: &C,
    make_endpoint: M,
    shutdown: F,
) -> Result<(), DaemonError>
where
    D: DeviceControl,
    C: DisplayConfigurator + ?Sized,
    E: ChannelEndpoint,
    M: FnOnce(&str) -> Result<E, ChannelError>,
    F: Future<Output = ()>,
{
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(DaemonError::Runtime)?;

    let endpoint = {
        let _guard = runtime.enter();
        make_endpoint(&config.channel)?
    };
    info!(channel = %endpoint.name(), "Control channel created");

    let state = DaemonState::new();
    thread::scope(|scope| {
        let keep_alive = keepalive::spawn(scope, adapter, &state, config.keep_alive_interval)
            .map_err(DaemonError::Runtime)?;

        let result = serve_display(config, adapter, displays, &state, &runtime, endpoint, shutdown);

        enter(Phase::ShuttingDown);
        state.request_stop();
        if keep_alive.join().is_err() {
            error!("Keep-alive task panicked");
        }
        result
    })
}

/// Add the display, optionally apply the requested mode, serve, then remove
/// the display if it is still active.
fn serve_display<D, C, E, F>(
    config: &DaemonConfig,
    adapter: &Adapter<D>,
    displays: &C,
    state: &DaemonState,
    runtime: &tokio::runtime::Runtime,
    endpoint: E,
    shutdown: F,
) -> Result<(), DaemonError>
where
    D: DeviceControl,
    C: DisplayConfigurator + ?Sized,
    E: ChannelEndpoint,
    F: Future<Output = ()>,
{
    let index = adapter.add_display().map_err(DaemonError::AddDisplay)?;
    enter(Phase::DisplayActive);
    info!(%index, "Virtual display added");

    if let Some(requested) = config.requested_mode {
        apply_requested_mode(displays, requested, config.output_wait);
    }

    enter(Phase::Serving);
    let mut server = ControlServer::new(state, RequestProcessor::new(adapter, Some(index)));
    let outcome = runtime.block_on(server.serve(endpoint, shutdown));

    if let Some(index) = server.into_handler().active_display() {
        adapter.remove_display(index);
        info!(%index, "Virtual display removed");
    }

    match outcome {
        ServeOutcome::StopRequested | ServeOutcome::Interrupted => {
            info!(?outcome, "Daemon stopping");
            Ok(())
        }
        ServeOutcome::ChannelFailed(e) => Err(e.into()),
    }
}

/// Completes on Ctrl-C, or SIGTERM on Unix.
pub async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = term.recv() => {}
                }
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl-C handler");
            std::future::pending::<()>().await;
        }
    }
}
