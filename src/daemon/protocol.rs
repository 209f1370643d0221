//! Control channel wire format.
//!
//! One fixed-size record per message: a 4-byte little-endian command code.
//! Fire-and-forget, nothing is sent back to the client.
//!
//! CHANGELOG:
//! - 10/19/2026 - Initial implementation

use std::fmt;

use thiserror::Error;

/// Exact size of one request record.
pub const REQUEST_SIZE: usize = 4;

/// Command code carried by a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Remove the active virtual display and shut the daemon down.
    StopVirtualDisplay,
    /// Any other code. Accepted and ignored.
    Unknown(u32),
}

impl Command {
    pub const STOP_VIRTUAL_DISPLAY: u32 = 200;

    pub fn from_code(code: u32) -> Self {
        match code {
            Self::STOP_VIRTUAL_DISPLAY => Command::StopVirtualDisplay,
            other => Command::Unknown(other),
        }
    }

    pub fn code(self) -> u32 {
        match self {
            Command::StopVirtualDisplay => Self::STOP_VIRTUAL_DISPLAY,
            Command::Unknown(code) => code,
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::StopVirtualDisplay => write!(f, "stop-virtual-display ({})", self.code()),
            Command::Unknown(code) => write!(f, "unknown ({})", code),
        }
    }
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("Malformed request: expected {REQUEST_SIZE} bytes, got {len}")]
    Malformed { len: usize },
}

/// One request record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Request {
    pub command: Command,
}

impl Request {
    pub fn new(command: Command) -> Self {
        Self { command }
    }

    /// Decode one message. Anything but exactly `REQUEST_SIZE` bytes is malformed.
    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let record: [u8; REQUEST_SIZE] = bytes
            .try_into()
            .map_err(|_| ProtocolError::Malformed { len: bytes.len() })?;
        Ok(Self::new(Command::from_code(u32::from_le_bytes(record))))
    }

    pub fn encode(&self) -> [u8; REQUEST_SIZE] {
        self.command.code().to_le_bytes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_stop() {
        let request = Request::decode(&[200, 0, 0, 0]).unwrap();
        assert_eq!(request.command, Command::StopVirtualDisplay);
    }

    #[test]
    fn test_decode_unknown_code() {
        let request = Request::decode(&7u32.to_le_bytes()).unwrap();
        assert_eq!(request.command, Command::Unknown(7));
    }

    #[test]
    fn test_short_read_is_malformed() {
        assert_eq!(
            Request::decode(&[200, 0]),
            Err(ProtocolError::Malformed { len: 2 })
        );
        assert_eq!(Request::decode(&[]), Err(ProtocolError::Malformed { len: 0 }));
    }

    #[test]
    fn test_oversized_is_malformed() {
        assert_eq!(
            Request::decode(&[200, 0, 0, 0, 0]),
            Err(ProtocolError::Malformed { len: 5 })
        );
    }

    #[test]
    fn test_encode_stop() {
        assert_eq!(
            Request::new(Command::StopVirtualDisplay).encode(),
            [0xC8, 0x00, 0x00, 0x00]
        );
    }

    #[test]
    fn test_command_display() {
        assert_eq!(
            Command::StopVirtualDisplay.to_string(),
            "stop-virtual-display (200)"
        );
        assert_eq!(Command::Unknown(9).to_string(), "unknown (9)");
    }
}
