//! Control channel client.
//!
//! Sends one request record to a running daemon. Nothing comes back: the
//! channel is fire-and-forget.
//!
//! CHANGELOG:
//! - 10/19/2026 - Initial implementation

use std::io;
use std::time::Duration;

use thiserror::Error;
use tracing::debug;

use crate::daemon::protocol::Request;

/// Default wait for a busy channel.
pub const DEFAULT_CLIENT_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("Daemon is not running (no control channel at {0})")]
    NotRunning(String),

    #[error("Failed to connect to {channel}: {source}")]
    Connect {
        channel: String,
        #[source]
        source: io::Error,
    },

    #[error("Failed to send request: {0}")]
    Write(#[source] io::Error),

    #[error("Timed out after {0:?} waiting for the control channel")]
    Timeout(Duration),
}

impl ClientError {
    /// True when there is no daemon to talk to.
    pub fn is_not_running(&self) -> bool {
        matches!(self, ClientError::NotRunning(_))
    }
}

/// Client for the daemon's control channel.
#[derive(Debug, Clone)]
pub struct ControlClient {
    channel: String,
    timeout: Duration,
}

impl ControlClient {
    pub fn new(channel: impl Into<String>) -> Self {
        Self {
            channel: channel.into(),
            timeout: DEFAULT_CLIENT_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Send one request record.
    pub fn send(&self, request: Request) -> Result<(), ClientError> {
        debug!(channel = %self.channel, command = %request.command, "Sending request");
        self.send_bytes(&request.encode())
    }

    /// Whether a daemon is listening on the channel.
    ///
    /// The probe is an empty connection, which the daemon drops as malformed.
    pub fn is_running(&self) -> bool {
        match self.connect() {
            Ok(_) => true,
            Err(ClientError::Timeout(_)) => true,
            Err(_) => false,
        }
    }

    fn send_bytes(&self, bytes: &[u8]) -> Result<(), ClientError> {
        use std::io::Write;

        let mut conn = self.connect()?;
        conn.write_all(bytes).map_err(ClientError::Write)?;
        conn.flush().map_err(ClientError::Write)?;
        finish(&conn)
    }

    #[cfg(unix)]
    fn connect(&self) -> Result<std::os::unix::net::UnixStream, ClientError> {
        use std::os::unix::net::UnixStream;

        let stream = UnixStream::connect(&self.channel).map_err(|e| self.connect_error(e))?;
        // A zero timeout is rejected by the socket; it means "no limit" here
        if !self.timeout.is_zero() {
            stream
                .set_write_timeout(Some(self.timeout))
                .map_err(ClientError::Write)?;
        }
        Ok(stream)
    }

    #[cfg(windows)]
    fn connect(&self) -> Result<std::fs::File, ClientError> {
        use std::fs::OpenOptions;
        use std::thread;
        use std::time::Instant;

        const ERROR_PIPE_BUSY: i32 = 231;
        const BUSY_POLL_INTERVAL: Duration = Duration::from_millis(50);

        let deadline = Instant::now() + self.timeout;
        loop {
            match OpenOptions::new().write(true).open(&self.channel) {
                Ok(pipe) => return Ok(pipe),
                Err(e) if e.raw_os_error() == Some(ERROR_PIPE_BUSY) => {
                    if Instant::now() >= deadline {
                        return Err(ClientError::Timeout(self.timeout));
                    }
                    thread::sleep(BUSY_POLL_INTERVAL);
                }
                Err(e) => return Err(self.connect_error(e)),
            }
        }
    }

    fn connect_error(&self, source: io::Error) -> ClientError {
        match source.kind() {
            io::ErrorKind::NotFound | io::ErrorKind::ConnectionRefused => {
                ClientError::NotRunning(self.channel.clone())
            }
            _ => ClientError::Connect {
                channel: self.channel.clone(),
                source,
            },
        }
    }
}

/// Close the write half so the daemon sees the end of the message.
#[cfg(unix)]
fn finish(stream: &std::os::unix::net::UnixStream) -> Result<(), ClientError> {
    stream
        .shutdown(std::net::Shutdown::Write)
        .map_err(ClientError::Write)
}

/// Message-mode pipes frame each write; nothing to do.
#[cfg(windows)]
fn finish(_pipe: &std::fs::File) -> Result<(), ClientError> {
    Ok(())
}

#[cfg(all(test, unix))]
mod tests {
    use std::io::Read;
    use std::os::unix::net::UnixListener;

    use super::*;
    use crate::daemon::protocol::Command;

    #[test]
    fn test_missing_socket_is_not_running() {
        let dir = tempfile::tempdir().unwrap();
        let client = ControlClient::new(dir.path().join("none.sock").to_string_lossy());

        let err = client.send(Request::new(Command::StopVirtualDisplay)).unwrap_err();
        assert!(err.is_not_running());
        assert!(!client.is_running());
    }

    #[test]
    fn test_stale_socket_is_not_running() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stale.sock");
        drop(UnixListener::bind(&path).unwrap());

        let client = ControlClient::new(path.to_string_lossy());
        assert!(client
            .send(Request::new(Command::StopVirtualDisplay))
            .unwrap_err()
            .is_not_running());
    }

    #[test]
    fn test_send_writes_one_record() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ctl.sock");
        let listener = UnixListener::bind(&path).unwrap();

        let client = ControlClient::new(path.to_string_lossy());
        assert!(client.is_running());
        client.send(Request::new(Command::StopVirtualDisplay)).unwrap();

        // First connection is the empty liveness probe
        let (mut probe, _) = listener.accept().unwrap();
        let mut buf = Vec::new();
        probe.read_to_end(&mut buf).unwrap();
        assert!(buf.is_empty());

        let (mut conn, _) = listener.accept().unwrap();
        let mut buf = Vec::new();
        conn.read_to_end(&mut buf).unwrap();
        assert_eq!(buf, vec![200, 0, 0, 0]);
    }
}
