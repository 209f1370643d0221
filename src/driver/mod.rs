//! Driver gateway for the Parsec virtual display adapter.
//!
//! The adapter is a kernel device opened once per daemon. Every operation is an
//! overlapped IO control call with a bounded wait: ADD plugs a display, REMOVE
//! unplugs one, UPDATE is the keep-alive ping and VERSION reports the driver
//! version. Displays that miss pings for longer than the driver's staleness
//! timeout are revoked by the driver itself.
//!
//! CHANGELOG:
//! - 10/19/2026 - Initial implementation

use std::fmt;
use std::io;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};

#[cfg(test)]
pub(crate) mod mock;
#[cfg(not(windows))]
mod unsupported;
#[cfg(windows)]
pub mod win32;

/// Display class GUID used for the readiness query.
pub const CLASS_GUID: u128 = 0x4d36e968_e325_11ce_bfc1_08002be10318;
/// Hardware id of the virtual display adapter.
pub const HARDWARE_ID: &str = r"Root\Parsec\VDA";
/// Device interface GUID used to open the adapter.
pub const ADAPTER_GUID: u128 = 0x00b41627_04c4_429e_a26e_0265cf50c8fa;
/// Human-readable adapter name.
pub const ADAPTER_NAME: &str = "Parsec Virtual Display Adapter";
/// Monitor code reported by displays plugged through the adapter.
pub const DISPLAY_CODE: &str = "PSCCDD0";

/// Displays not pinged within this window are considered stale by the driver.
pub const DRIVER_STALE_TIMEOUT: Duration = Duration::from_millis(100);
/// Bounded wait applied to every IO control call.
pub const DEFAULT_IO_TIMEOUT: Duration = Duration::from_secs(5);
/// Every IO control call sends exactly this many (zero-padded) input bytes.
pub const IO_INPUT_SIZE: usize = 32;

// Device node status bits and problem codes (cfg.h).
const DN_DRIVER_LOADED: u32 = 0x0000_0002;
const DN_STARTED: u32 = 0x0000_0008;
const DN_HAS_PROBLEM: u32 = 0x0000_0400;
const CM_PROB_NEED_RESTART: u32 = 0x0000_000E;
const CM_PROB_DISABLED: u32 = 0x0000_0016;
const CM_PROB_HARDWARE_DISABLED: u32 = 0x0000_001D;
const CM_PROB_DISABLED_SERVICE: u32 = 0x0000_0020;
const CM_PROB_FAILED_POST_START: u32 = 0x0000_002B;

// ============================================================================
// Readiness
// ============================================================================

/// Health of the installed driver, queried before any device operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceStatus {
    Ready,
    Inaccessible,
    Unknown,
    UnknownProblem,
    Disabled,
    DriverError,
    RestartRequired,
    ServiceDisabled,
    NotInstalled,
}

impl DeviceStatus {
    pub fn is_ready(self) -> bool {
        self == DeviceStatus::Ready
    }

    /// Short operator hint shown next to a non-ready status.
    pub fn hint(self) -> &'static str {
        match self {
            DeviceStatus::Ready => "driver is ready",
            DeviceStatus::Inaccessible => "device information is not accessible",
            DeviceStatus::Unknown => "device state is unknown",
            DeviceStatus::UnknownProblem => "device reports an unrecognized problem",
            DeviceStatus::Disabled => "enable the adapter in Device Manager",
            DeviceStatus::DriverError => "driver failed after start, reinstall it",
            DeviceStatus::RestartRequired => "restart the machine to finish installation",
            DeviceStatus::ServiceDisabled => "the driver service is disabled",
            DeviceStatus::NotInstalled => "install the Parsec virtual display driver",
        }
    }
}

impl fmt::Display for DeviceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DeviceStatus::Ready => "ready",
            DeviceStatus::Inaccessible => "inaccessible",
            DeviceStatus::Unknown => "unknown",
            DeviceStatus::UnknownProblem => "unknown problem",
            DeviceStatus::Disabled => "disabled",
            DeviceStatus::DriverError => "driver error",
            DeviceStatus::RestartRequired => "restart required",
            DeviceStatus::ServiceDisabled => "service disabled",
            DeviceStatus::NotInstalled => "not installed",
        };
        f.write_str(name)
    }
}

/// Map a device node's status flags and problem number to a readiness status.
pub fn classify_devnode(status: u32, problem: u32) -> DeviceStatus {
    if status & (DN_DRIVER_LOADED | DN_STARTED) != 0 {
        return DeviceStatus::Ready;
    }

    if status & DN_HAS_PROBLEM == 0 {
        return DeviceStatus::Unknown;
    }

    match problem {
        CM_PROB_NEED_RESTART => DeviceStatus::RestartRequired,
        CM_PROB_DISABLED | CM_PROB_HARDWARE_DISABLED => DeviceStatus::Disabled,
        CM_PROB_DISABLED_SERVICE => DeviceStatus::ServiceDisabled,
        CM_PROB_FAILED_POST_START => DeviceStatus::DriverError,
        _ => DeviceStatus::UnknownProblem,
    }
}

/// Split a REG_MULTI_SZ (or REG_SZ) UTF-16 buffer into its strings.
pub fn parse_multi_sz(buf: &[u16]) -> Vec<String> {
    buf.split(|&c| c == 0)
        .take_while(|s| !s.is_empty())
        .map(String::from_utf16_lossy)
        .collect()
}

// ============================================================================
// IO control
// ============================================================================

/// IO control codes understood by the adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum IoControl {
    Add = 0x0022_e004,
    Remove = 0x0022_a008,
    Update = 0x0022_a00c,
    Version = 0x0022_e010,
}

impl IoControl {
    pub fn code(self) -> u32 {
        self as u32
    }
}

impl fmt::Display for IoControl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            IoControl::Add => "ADD",
            IoControl::Remove => "REMOVE",
            IoControl::Update => "UPDATE",
            IoControl::Version => "VERSION",
        };
        write!(f, "{} ({:#010x})", name, self.code())
    }
}

/// Errors raised while talking to the driver.
#[derive(Error, Debug)]
pub enum DriverError {
    #[error("No {0} interface is present")]
    DeviceNotFound(&'static str),

    #[error("Failed to open device handle: {0}")]
    OpenFailed(#[source] io::Error),

    #[error("IO control {code} failed: {source}")]
    IoControl {
        code: IoControl,
        #[source]
        source: io::Error,
    },

    #[error("IO control {code} timed out after {timeout:?}")]
    Timeout { code: IoControl, timeout: Duration },

    #[error("The virtual display driver is not available on this platform")]
    Unsupported,
}

/// An open handle to the adapter. Dropping it closes the handle.
pub trait DeviceControl: Send + Sync {
    /// Issue one IO control call and wait at most `timeout` for completion.
    /// Returns the 4-byte output value.
    fn io_control(
        &self,
        code: IoControl,
        input: &[u8; IO_INPUT_SIZE],
        timeout: Duration,
    ) -> Result<u32, DriverError>;
}

/// Device discovery: readiness query and handle creation.
pub trait Driver {
    type Device: DeviceControl;

    /// Inspect the installed driver and device state.
    fn query_readiness(&self) -> DeviceStatus;

    /// Obtain an exclusive handle to the adapter.
    fn open(&self) -> Result<Self::Device, DriverError>;
}

/// Index of a plugged virtual display, as returned by ADD.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DisplayIndex(pub u32);

impl fmt::Display for DisplayIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// REMOVE takes the display index as a 16-bit big-endian value.
pub fn encode_remove_index(index: DisplayIndex) -> [u8; 2] {
    (index.0 as u16).to_be_bytes()
}

/// Driver version reported by VERSION.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DriverVersion {
    pub major: u16,
    pub minor: u16,
}

impl DriverVersion {
    pub fn from_raw(raw: u32) -> Self {
        Self {
            major: (raw >> 16) as u16,
            minor: (raw & 0xFFFF) as u16,
        }
    }
}

impl fmt::Display for DriverVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

// ============================================================================
// Adapter
// ============================================================================

/// Display operations on top of an open device handle.
///
/// The adapter owns the handle for the whole daemon run; the keep-alive task
/// and the request processor only borrow it.
pub struct Adapter<D: DeviceControl> {
    device: D,
    timeout: Duration,
}

impl<D: DeviceControl> Adapter<D> {
    pub fn new(device: D, timeout: Duration) -> Self {
        Self { device, timeout }
    }

    /// Open the adapter through `driver`.
    pub fn open<T>(driver: &T, timeout: Duration) -> Result<Self, DriverError>
    where
        T: Driver<Device = D>,
    {
        let device = driver.open()?;
        debug!(timeout_ms = timeout.as_millis() as u64, "Device handle opened");
        Ok(Self::new(device, timeout))
    }

    fn call(&self, code: IoControl, data: &[u8]) -> Result<u32, DriverError> {
        let mut input = [0u8; IO_INPUT_SIZE];
        let len = data.len().min(IO_INPUT_SIZE);
        input[..len].copy_from_slice(&data[..len]);
        self.device.io_control(code, &input, self.timeout)
    }

    /// Query the driver version.
    pub fn version(&self) -> Result<DriverVersion, DriverError> {
        self.call(IoControl::Version, &[]).map(DriverVersion::from_raw)
    }

    /// Plug a new virtual display and acknowledge it with an immediate ping.
    pub fn add_display(&self) -> Result<DisplayIndex, DriverError> {
        let index = self.call(IoControl::Add, &[])?;
        self.keep_alive();
        Ok(DisplayIndex(index))
    }

    /// Unplug the display at `index`, then ping.
    ///
    /// Best-effort: a failed removal is left to the driver's staleness timeout.
    pub fn remove_display(&self, index: DisplayIndex) {
        if let Err(e) = self.call(IoControl::Remove, &encode_remove_index(index)) {
            warn!(error = %e, %index, "Failed to remove virtual display");
        }
        self.keep_alive();
    }

    /// Send the liveness ping. Failures are only logged; the next tick retries.
    pub fn keep_alive(&self) {
        if let Err(e) = self.call(IoControl::Update, &[]) {
            debug!(error = %e, "Keep-alive ping failed");
        }
    }

    /// Release the device handle.
    pub fn close(self) {
        drop(self.device);
        info!("Device handle closed");
    }
}

// ============================================================================
// Platform selection
// ============================================================================

#[cfg(windows)]
pub type PlatformDriver = win32::ParsecDriver;
#[cfg(not(windows))]
pub type PlatformDriver = unsupported::UnsupportedDriver;

/// The driver backend for the current platform.
pub fn platform_driver() -> PlatformDriver {
    PlatformDriver::default()
}
