//! Display modes of the virtual output: enumeration, exact matching and apply.
//!
//! CHANGELOG:
//! - 10/19/2026 - Initial implementation

use std::fmt;
use std::thread;
use std::time::{Duration, Instant};

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::driver::DISPLAY_CODE;

#[cfg(test)]
pub(crate) mod mock;
#[cfg(windows)]
pub mod win32;

/// How often the output list is re-read while waiting for a new output.
pub const OUTPUT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// A (width, height, refresh rate) triple advertised by an output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct DisplayMode {
    pub width: u32,
    pub height: u32,
    pub refresh: u32,
}

impl DisplayMode {
    pub fn new(width: u32, height: u32, refresh: u32) -> Self {
        Self {
            width,
            height,
            refresh,
        }
    }
}

impl fmt::Display for DisplayMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}@{}Hz", self.width, self.height, self.refresh)
    }
}

/// Errors from the OS display configuration.
#[derive(Error, Debug)]
pub enum ModeError {
    #[error("Display output {0} not found")]
    OutputNotFound(String),

    #[error("Display settings change for {output} was rejected (code {code})")]
    Rejected { output: String, code: i32 },
}

/// OS display configuration, keyed by output device name.
pub trait DisplayConfigurator {
    /// Device name of the attached output whose monitor code is `display_code`.
    fn find_output(&self, display_code: &str) -> Option<String>;

    /// Modes currently advertised by `output`. Each call enumerates afresh.
    fn enumerate_modes<'a>(&'a self, output: &'a str)
        -> Box<dyn Iterator<Item = DisplayMode> + 'a>;

    /// Commit `mode` for `output`, persisted and applied immediately.
    fn apply(&self, output: &str, mode: DisplayMode) -> Result<(), ModeError>;
}

/// First mode equal to `requested` in all three fields.
pub fn find_exact_match<I>(modes: I, requested: DisplayMode) -> Option<DisplayMode>
where
    I: IntoIterator<Item = DisplayMode>,
{
    modes.into_iter().find(|mode| *mode == requested)
}

/// Monitor code from a device interface id such as
/// `\\?\DISPLAY#PSCCDD0#5&1a2b3c&0&UID256#{...}`.
pub fn parse_display_code(device_id: &str) -> &str {
    let mut tokens = device_id.split('#');
    let first = tokens.next().unwrap_or(device_id);
    tokens.next().unwrap_or(first)
}

/// Result of trying to apply a requested resolution.
#[derive(Debug)]
pub enum ApplyOutcome {
    Applied { output: String, mode: DisplayMode },
    NoOutput,
    NotFound { output: String, available: usize },
    Failed(ModeError),
}

/// Wait up to `wait` for the virtual output to show up.
pub fn wait_for_output<C>(displays: &C, wait: Duration) -> Option<String>
where
    C: DisplayConfigurator + ?Sized,
{
    let deadline = Instant::now() + wait;
    loop {
        if let Some(output) = displays.find_output(DISPLAY_CODE) {
            return Some(output);
        }
        let now = Instant::now();
        if now >= deadline {
            return None;
        }
        thread::sleep(OUTPUT_POLL_INTERVAL.min(deadline - now));
    }
}

/// Match `requested` against the virtual output's modes and apply it.
///
/// Every outcome other than `Applied` leaves the display in its default mode.
pub fn apply_requested_mode<C>(displays: &C, requested: DisplayMode, wait: Duration) -> ApplyOutcome
where
    C: DisplayConfigurator + ?Sized,
{
    let Some(output) = wait_for_output(displays, wait) else {
        warn!(display = DISPLAY_CODE, "Virtual output not found, keeping default mode");
        return ApplyOutcome::NoOutput;
    };

    let mut available = 0usize;
    let found = find_exact_match(
        displays.enumerate_modes(&output).inspect(|_| available += 1),
        requested,
    );

    let Some(mode) = found else {
        warn!(
            %output,
            %requested,
            available,
            "Requested mode not supported, keeping default mode"
        );
        return ApplyOutcome::NotFound { output, available };
    };

    debug!(%output, %mode, "Found exact mode match");
    match displays.apply(&output, mode) {
        Ok(()) => {
            info!(%output, %mode, "Display mode applied");
            ApplyOutcome::Applied { output, mode }
        }
        Err(e) => {
            warn!(error = %e, "Failed to apply display mode");
            ApplyOutcome::Failed(e)
        }
    }
}

/// Configurator for platforms without display settings support.
#[derive(Debug, Default)]
pub struct NoDisplays;

impl DisplayConfigurator for NoDisplays {
    fn find_output(&self, _display_code: &str) -> Option<String> {
        None
    }

    fn enumerate_modes<'a>(
        &'a self,
        _output: &'a str,
    ) -> Box<dyn Iterator<Item = DisplayMode> + 'a> {
        Box::new(std::iter::empty())
    }

    fn apply(&self, output: &str, _mode: DisplayMode) -> Result<(), ModeError> {
        Err(ModeError::OutputNotFound(output.to_string()))
    }
}

#[cfg(windows)]
pub type PlatformDisplays = win32::GdiDisplays;
#[cfg(not(windows))]
pub type PlatformDisplays = NoDisplays;

/// The display configurator for the current platform.
pub fn platform_displays() -> PlatformDisplays {
    PlatformDisplays::default()
}
