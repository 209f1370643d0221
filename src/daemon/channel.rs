//! Control channel endpoint.
//!
//! Windows: a message-mode named pipe limited to one instance. Other
//! platforms: a Unix domain socket. In both cases the endpoint serves one
//! client at a time: `accept` consumes the endpoint and `disconnect` hands it
//! back, so a second connection cannot be held while the first is open.
//!
//! CHANGELOG:
//! - 10/19/2026 - Endpoint/connection traits; never remove non-socket files
//! - 10/19/2026 - Initial implementation

use std::future::Future;
use std::io;

use thiserror::Error;

use crate::daemon::protocol::REQUEST_SIZE;

#[cfg(unix)]
pub use self::unix::{Connection, ControlEndpoint};
#[cfg(windows)]
pub use self::windows::{Connection, ControlEndpoint};

/// Read buffer size. One byte over a record so oversized messages are detected.
const READ_BUFFER_SIZE: usize = REQUEST_SIZE + 1;

#[derive(Error, Debug)]
pub enum ChannelError {
    #[error("Failed to create control channel {name}: {source}")]
    Create {
        name: String,
        #[source]
        source: io::Error,
    },

    #[error("Control channel {0} is in use, is another daemon running?")]
    InUse(String),

    #[error("Failed to accept client connection: {0}")]
    Accept(#[source] io::Error),

    #[error("Failed to disconnect client: {0}")]
    Disconnect(#[source] io::Error),
}

/// Listening side of a single-client channel.
pub trait ChannelEndpoint: Sized {
    type Connection: ChannelConnection<Endpoint = Self>;

    fn name(&self) -> String;

    /// Wait for the next client. The endpoint moves into the connection.
    fn accept(self) -> impl Future<Output = Result<Self::Connection, ChannelError>>;
}

/// The one connected client.
pub trait ChannelConnection: Sized {
    type Endpoint;

    /// Read one message.
    fn read_message(&mut self) -> impl Future<Output = io::Result<Vec<u8>>>;

    /// Drop the client and return the endpoint for the next one.
    fn disconnect(self) -> Result<Self::Endpoint, ChannelError>;
}

// ============================================================================
// Unix domain socket
// ============================================================================

#[cfg(unix)]
mod unix {
    use std::fs;
    use std::io;
    use std::os::unix::fs::{FileTypeExt, PermissionsExt};
    use std::path::{Path, PathBuf};

    use tokio::io::AsyncReadExt;
    use tokio::net::{UnixListener, UnixStream};
    use tracing::debug;

    use super::{ChannelConnection, ChannelEndpoint, ChannelError, READ_BUFFER_SIZE};

    fn is_socket(path: &Path) -> bool {
        fs::symlink_metadata(path)
            .map(|meta| meta.file_type().is_socket())
            .unwrap_or(false)
    }

    /// Listening socket. Removes its socket file on drop.
    ///
    /// Must be created inside a tokio runtime context.
    #[derive(Debug)]
    pub struct ControlEndpoint {
        listener: UnixListener,
        path: PathBuf,
    }

    impl ControlEndpoint {
        pub fn create(name: &str) -> Result<Self, ChannelError> {
            let path = PathBuf::from(name);
            let create_err = |source| ChannelError::Create {
                name: name.to_string(),
                source,
            };

            match fs::symlink_metadata(&path) {
                Ok(meta) if !meta.file_type().is_socket() => {
                    return Err(create_err(io::Error::new(
                        io::ErrorKind::AlreadyExists,
                        "path exists and is not a socket",
                    )));
                }
                Ok(_) => {
                    // A socket that still accepts connections belongs to a live daemon
                    if std::os::unix::net::UnixStream::connect(&path).is_ok() {
                        return Err(ChannelError::InUse(name.to_string()));
                    }
                    fs::remove_file(&path).map_err(create_err)?;
                    debug!(path = %path.display(), "Removed stale socket");
                }
                Err(_) => {}
            }

            if let Some(parent) = path.parent() {
                if !parent.as_os_str().is_empty() {
                    fs::create_dir_all(parent).map_err(create_err)?;
                }
            }

            let listener = UnixListener::bind(&path).map_err(create_err)?;
            let endpoint = Self { listener, path };

            // Owner-only (0600)
            fs::set_permissions(&endpoint.path, fs::Permissions::from_mode(0o600))
                .map_err(create_err)?;

            Ok(endpoint)
        }

        pub fn path(&self) -> &Path {
            &self.path
        }
    }

    impl ChannelEndpoint for ControlEndpoint {
        type Connection = Connection;

        fn name(&self) -> String {
            self.path.display().to_string()
        }

        async fn accept(self) -> Result<Connection, ChannelError> {
            let (stream, _) = self.listener.accept().await.map_err(ChannelError::Accept)?;
            Ok(Connection {
                stream,
                endpoint: self,
            })
        }
    }

    impl Drop for ControlEndpoint {
        fn drop(&mut self) {
            if is_socket(&self.path) {
                let _ = fs::remove_file(&self.path);
            }
        }
    }

    #[derive(Debug)]
    pub struct Connection {
        stream: UnixStream,
        endpoint: ControlEndpoint,
    }

    impl ChannelConnection for Connection {
        type Endpoint = ControlEndpoint;

        /// Everything the client writes before closing its write half, capped
        /// one byte past a full record.
        async fn read_message(&mut self) -> io::Result<Vec<u8>> {
            let mut buf = Vec::with_capacity(READ_BUFFER_SIZE);
            (&mut self.stream)
                .take(READ_BUFFER_SIZE as u64)
                .read_to_end(&mut buf)
                .await?;
            Ok(buf)
        }

        fn disconnect(self) -> Result<ControlEndpoint, ChannelError> {
            let Connection { stream, endpoint } = self;
            drop(stream);
            Ok(endpoint)
        }
    }
}

// ============================================================================
// Windows named pipe
// ============================================================================

#[cfg(windows)]
mod windows {
    use std::io;

    use tokio::io::AsyncReadExt;
    use tokio::net::windows::named_pipe::{NamedPipeServer, PipeMode, ServerOptions};

    use super::{ChannelConnection, ChannelEndpoint, ChannelError, READ_BUFFER_SIZE};
    use crate::daemon::protocol::REQUEST_SIZE;

    const ERROR_ACCESS_DENIED: i32 = 5;
    const ERROR_PIPE_BUSY: i32 = 231;

    /// Single-instance message-mode pipe.
    ///
    /// Must be created inside a tokio runtime context.
    #[derive(Debug)]
    pub struct ControlEndpoint {
        pipe: NamedPipeServer,
        name: String,
    }

    impl ControlEndpoint {
        pub fn create(name: &str) -> Result<Self, ChannelError> {
            let pipe = ServerOptions::new()
                .first_pipe_instance(true)
                .pipe_mode(PipeMode::Message)
                .max_instances(1)
                .in_buffer_size(REQUEST_SIZE as u32)
                .out_buffer_size(REQUEST_SIZE as u32)
                .create(name)
                .map_err(|source| match source.raw_os_error() {
                    Some(ERROR_ACCESS_DENIED) | Some(ERROR_PIPE_BUSY) => {
                        ChannelError::InUse(name.to_string())
                    }
                    _ => ChannelError::Create {
                        name: name.to_string(),
                        source,
                    },
                })?;

            Ok(Self {
                pipe,
                name: name.to_string(),
            })
        }
    }

    impl ChannelEndpoint for ControlEndpoint {
        type Connection = Connection;

        fn name(&self) -> String {
            self.name.clone()
        }

        async fn accept(self) -> Result<Connection, ChannelError> {
            self.pipe.connect().await.map_err(ChannelError::Accept)?;
            Ok(Connection { endpoint: self })
        }
    }

    #[derive(Debug)]
    pub struct Connection {
        endpoint: ControlEndpoint,
    }

    impl ChannelConnection for Connection {
        type Endpoint = ControlEndpoint;

        /// Message mode delivers at most one record per read.
        async fn read_message(&mut self) -> io::Result<Vec<u8>> {
            let mut buf = vec![0u8; READ_BUFFER_SIZE];
            let n = self.endpoint.pipe.read(&mut buf).await?;
            buf.truncate(n);
            Ok(buf)
        }

        /// The same pipe instance serves the next client.
        fn disconnect(self) -> Result<ControlEndpoint, ChannelError> {
            self.endpoint
                .pipe
                .disconnect()
                .map_err(ChannelError::Disconnect)?;
            Ok(self.endpoint)
        }
    }
}

// ============================================================================
// Scripted endpoint (tests)
// ============================================================================


#[cfg(all(test, unix))]
mod tests {
    use std::io::Write;
    use std::os::unix::net::UnixStream as StdUnixStream;
    use std::path::Path;

    use super::*;

    fn socket_in(dir: &tempfile::TempDir) -> String {
        dir.path().join("ctl.sock").to_string_lossy().into_owned()
    }

    #[tokio::test]
    async fn test_accept_and_read_one_message() {
        let dir = tempfile::tempdir().unwrap();
        let name = socket_in(&dir);
        let endpoint = ControlEndpoint::create(&name).unwrap();

        let mut client = StdUnixStream::connect(&name).unwrap();
        client.write_all(&[200, 0, 0, 0]).unwrap();
        client.shutdown(std::net::Shutdown::Write).unwrap();

        let mut conn = endpoint.accept().await.unwrap();
        assert_eq!(conn.read_message().await.unwrap(), vec![200, 0, 0, 0]);

        let endpoint = conn.disconnect().unwrap();
        assert!(endpoint.path().exists());
    }

    #[tokio::test]
    async fn test_oversized_message_is_capped() {
        let dir = tempfile::tempdir().unwrap();
        let name = socket_in(&dir);
        let endpoint = ControlEndpoint::create(&name).unwrap();

        let mut client = StdUnixStream::connect(&name).unwrap();
        client.write_all(&[1u8; 64]).unwrap();
        client.shutdown(std::net::Shutdown::Write).unwrap();

        let mut conn = endpoint.accept().await.unwrap();
        assert_eq!(conn.read_message().await.unwrap().len(), REQUEST_SIZE + 1);
    }

    #[tokio::test]
    async fn test_second_daemon_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let name = socket_in(&dir);
        let _first = ControlEndpoint::create(&name).unwrap();

        assert!(matches!(
            ControlEndpoint::create(&name),
            Err(ChannelError::InUse(_))
        ));
    }

    #[tokio::test]
    async fn test_stale_socket_is_replaced() {
        let dir = tempfile::tempdir().unwrap();
        let name = socket_in(&dir);
        // std listeners leave their socket file behind when dropped
        drop(std::os::unix::net::UnixListener::bind(&name).unwrap());
        assert!(Path::new(&name).exists());

        assert!(ControlEndpoint::create(&name).is_ok());
    }

    #[tokio::test]
    async fn test_regular_file_is_never_removed() {
        let dir = tempfile::tempdir().unwrap();
        let name = dir.path().join("notes.txt");
        std::fs::write(&name, "important").unwrap();

        match ControlEndpoint::create(&name.to_string_lossy()) {
            Err(ChannelError::Create { source, .. }) => {
                assert_eq!(source.kind(), io::ErrorKind::AlreadyExists)
            }
            other => panic!("unexpected result: {:?}", other),
        }
        assert_eq!(std::fs::read_to_string(&name).unwrap(), "important");
    }

    #[tokio::test]
    async fn test_drop_removes_socket_file() {
        let dir = tempfile::tempdir().unwrap();
        let name = socket_in(&dir);
        let endpoint = ControlEndpoint::create(&name).unwrap();
        drop(endpoint);
        assert!(!Path::new(&name).exists());
    }

    #[tokio::test]
    async fn test_drop_keeps_file_that_replaced_socket() {
        let dir = tempfile::tempdir().unwrap();
        let name = socket_in(&dir);
        let endpoint = ControlEndpoint::create(&name).unwrap();

        std::fs::remove_file(&name).unwrap();
        std::fs::write(&name, "important").unwrap();
        drop(endpoint);

        assert_eq!(std::fs::read_to_string(&name).unwrap(), "important");
    }
}
