//! Fallback backend for platforms without the virtual display driver.
//!
//! CHANGELOG:
//! - 10/19/2026 - Initial implementation

use std::time::Duration;

use super::{DeviceControl, DeviceStatus, Driver, DriverError, IoControl, IO_INPUT_SIZE};

/// Reports the driver as not installed; opening always fails.
#[derive(Debug, Default)]
pub struct UnsupportedDriver;

/// Uninhabited: no device can be opened here.
pub enum NoDevice {}

impl DeviceControl for NoDevice {
    fn io_control(
        &self,
        _code: IoControl,
        _input: &[u8; IO_INPUT_SIZE],
        _timeout: Duration,
    ) -> Result<u32, DriverError> {
        match *self {}
    }
}

impl Driver for UnsupportedDriver {
    type Device = NoDevice;

    fn query_readiness(&self) -> DeviceStatus {
        DeviceStatus::NotInstalled
    }

    fn open(&self) -> Result<NoDevice, DriverError> {
        Err(DriverError::Unsupported)
    }
}
