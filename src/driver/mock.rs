//! Recording driver used by tests.
//!
//! CHANGELOG:
//! - 10/19/2026 - Initial implementation

use std::collections::HashSet;
use std::io;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use super::{DeviceControl, DeviceStatus, Driver, DriverError, IoControl, IO_INPUT_SIZE};

/// Something that happened to the mock device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceEvent {
    Io(IoControl, Vec<u8>),
    Closed,
}

#[derive(Debug, Default)]
struct LogInner {
    events: Vec<DeviceEvent>,
    opens: usize,
}

/// Shared view of everything the mock device saw.
#[derive(Debug, Clone, Default)]
pub struct DeviceLog {
    inner: Arc<Mutex<LogInner>>,
}

impl DeviceLog {
    fn push(&self, event: DeviceEvent) {
        self.inner.lock().unwrap().events.push(event);
    }

    pub fn events(&self) -> Vec<DeviceEvent> {
        self.inner.lock().unwrap().events.clone()
    }

    /// IO control codes in call order.
    pub fn codes(&self) -> Vec<IoControl> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                DeviceEvent::Io(code, _) => Some(code),
                DeviceEvent::Closed => None,
            })
            .collect()
    }

    pub fn count(&self, code: IoControl) -> usize {
        self.codes().into_iter().filter(|c| *c == code).count()
    }

    pub fn opens(&self) -> usize {
        self.inner.lock().unwrap().opens
    }

    pub fn is_closed(&self) -> bool {
        self.events().contains(&DeviceEvent::Closed)
    }

    /// True when no IO control was recorded after the handle closed.
    pub fn closed_last(&self) -> bool {
        let events = self.events();
        match events.iter().position(|e| *e == DeviceEvent::Closed) {
            Some(pos) => pos == events.len() - 1,
            None => false,
        }
    }
}

/// Mock driver with a fixed readiness status.
pub struct MockDriver {
    pub status: DeviceStatus,
    pub log: DeviceLog,
    failing: HashSet<u32>,
    add_index: u32,
    open_fails: bool,
}

impl MockDriver {
    pub fn with_status(status: DeviceStatus) -> Self {
        Self {
            status,
            log: DeviceLog::default(),
            failing: HashSet::new(),
            add_index: 0,
            open_fails: false,
        }
    }

    pub fn ready() -> Self {
        Self::with_status(DeviceStatus::Ready)
    }

    /// Make every call with `code` fail.
    pub fn failing(mut self, code: IoControl) -> Self {
        self.failing.insert(code.code());
        self
    }

    pub fn add_index(mut self, index: u32) -> Self {
        self.add_index = index;
        self
    }

    pub fn open_fails(mut self) -> Self {
        self.open_fails = true;
        self
    }
}

impl Driver for MockDriver {
    type Device = MockDevice;

    fn query_readiness(&self) -> DeviceStatus {
        self.status
    }

    fn open(&self) -> Result<MockDevice, DriverError> {
        if self.open_fails {
            return Err(DriverError::DeviceNotFound(super::ADAPTER_NAME));
        }
        self.log.inner.lock().unwrap().opens += 1;
        Ok(MockDevice {
            log: self.log.clone(),
            failing: self.failing.clone(),
            add_index: self.add_index,
        })
    }
}

pub struct MockDevice {
    log: DeviceLog,
    failing: HashSet<u32>,
    add_index: u32,
}

impl DeviceControl for MockDevice {
    fn io_control(
        &self,
        code: IoControl,
        input: &[u8; IO_INPUT_SIZE],
        _timeout: Duration,
    ) -> Result<u32, DriverError> {
        self.log.push(DeviceEvent::Io(code, input.to_vec()));

        if self.failing.contains(&code.code()) {
            return Err(DriverError::IoControl {
                code,
                source: io::Error::new(io::ErrorKind::Other, "mock failure"),
            });
        }

        Ok(match code {
            IoControl::Add => self.add_index,
            IoControl::Version => 0x0000_002D,
            IoControl::Remove | IoControl::Update => 0,
        })
    }
}

impl Drop for MockDevice {
    fn drop(&mut self) {
        self.log.push(DeviceEvent::Closed);
    }
}
