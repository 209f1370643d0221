//! Control channel server.
//!
//! Serves one client at a time over the control channel, reading one request
//! record per connection and handing it to a `RequestHandler`. The loop is an
//! explicit state machine:
//!
//! ```text
//! Listening -> Connected -> Reading -> Disconnecting -> Listening
//!                                                    -> Closed
//! ```
//!
//! CHANGELOG:
//! - 10/19/2026 - Generic over the channel endpoint
//! - 10/19/2026 - Initial implementation

use std::future::Future;

use tracing::{debug, error, info, warn};

use crate::daemon::channel::{ChannelConnection, ChannelEndpoint, ChannelError};
use crate::daemon::protocol::Request;
use crate::daemon::service::Decision;
use crate::daemon::DaemonState;

/// Receives every well-formed request.
pub trait RequestHandler {
    fn handle(&mut self, request: Request) -> Decision;
}

/// Why the serve loop ended.
#[derive(Debug)]
pub enum ServeOutcome {
    /// A handled request asked the daemon to stop.
    StopRequested,
    /// The shutdown signal fired.
    Interrupted,
    /// The channel failed; not retried.
    ChannelFailed(ChannelError),
}

enum ServerState<E: ChannelEndpoint> {
    Listening(E),
    Connected(E::Connection),
    Reading(E::Connection, Vec<u8>),
    Disconnecting(E::Connection),
    Closed,
}

/// Single-client control channel server.
pub struct ControlServer<'a, H> {
    state: &'a DaemonState,
    handler: H,
    outcome: Option<ServeOutcome>,
}

impl<'a, H: RequestHandler> ControlServer<'a, H> {
    pub fn new(state: &'a DaemonState, handler: H) -> Self {
        Self {
            state,
            handler,
            outcome: None,
        }
    }

    pub fn into_handler(self) -> H {
        self.handler
    }

    /// Run until a stop request, a channel failure or `shutdown` completes.
    ///
    /// The endpoint is consumed; it is released when the loop closes.
    pub async fn serve<E, F>(&mut self, endpoint: E, shutdown: F) -> ServeOutcome
    where
        E: ChannelEndpoint,
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        self.outcome = None;
        debug!(channel = %endpoint.name(), "Listening");

        let mut current = ServerState::Listening(endpoint);
        loop {
            current = match current {
                ServerState::Listening(endpoint) => {
                    tokio::select! {
                        accepted = endpoint.accept() => match accepted {
                            Ok(conn) => {
                                debug!("Client connected");
                                ServerState::Connected(conn)
                            }
                            Err(e) => self.fail(e),
                        },
                        _ = &mut shutdown => self.interrupt(),
                    }
                }

                ServerState::Connected(mut conn) => {
                    let read = tokio::select! {
                        read = conn.read_message() => Some(read),
                        _ = &mut shutdown => None,
                    };
                    match read {
                        Some(Ok(bytes)) => ServerState::Reading(conn, bytes),
                        Some(Err(e)) => {
                            warn!(error = %e, "Failed to read request");
                            ServerState::Disconnecting(conn)
                        }
                        None => self.interrupt(),
                    }
                }

                ServerState::Reading(conn, bytes) => {
                    match Request::decode(&bytes) {
                        Ok(request) => {
                            debug!(command = %request.command, "Request received");
                            if !self.handler.handle(request).keeps_serving() {
                                info!("Stop requested by client");
                                self.outcome = Some(ServeOutcome::StopRequested);
                                self.state.request_stop();
                            }
                        }
                        Err(e) => warn!(error = %e, "Dropping request"),
                    }
                    ServerState::Disconnecting(conn)
                }

                ServerState::Disconnecting(conn) => match conn.disconnect() {
                    Ok(endpoint) if self.state.is_running() => {
                        debug!("Client disconnected");
                        ServerState::Listening(endpoint)
                    }
                    Ok(_) => ServerState::Closed,
                    Err(e) => self.fail(e),
                },

                ServerState::Closed => break,
            };
        }

        debug!("Control channel closed");
        self.outcome.take().unwrap_or(ServeOutcome::Interrupted)
    }

    fn fail<E: ChannelEndpoint>(&mut self, e: ChannelError) -> ServerState<E> {
        error!(error = %e, "Control channel failed");
        self.state.request_stop();
        self.outcome = Some(ServeOutcome::ChannelFailed(e));
        ServerState::Closed
    }

    fn interrupt<E: ChannelEndpoint>(&mut self) -> ServerState<E> {
        info!("Shutdown signal received");
        self.state.request_stop();
        self.outcome = Some(ServeOutcome::Interrupted);
        ServerState::Closed
    }
}

#[cfg(all(test, unix))]
mod tests {
    use std::io::Write;
    use std::os::unix::net::UnixStream;
    use std::path::Path;

    use std::time::Duration;

    use super::*;
    use crate::daemon::channel::ControlEndpoint;
    use crate::daemon::protocol::Command;

    /// Records requests and stops on the first stop command.
    #[derive(Default)]
    struct Recorder {
        seen: Vec<Command>,
    }

    impl RequestHandler for Recorder {
        fn handle(&mut self, request: Request) -> Decision {
            self.seen.push(request.command);
            match request.command {
                Command::StopVirtualDisplay => Decision::RemoveAndStop,
                Command::Unknown(_) => Decision::Continue,
            }
        }
    }

    fn send(path: &str, bytes: &[u8]) {
        let mut stream = UnixStream::connect(path).unwrap();
        stream.write_all(bytes).unwrap();
        stream.shutdown(std::net::Shutdown::Write).unwrap();
    }

    #[tokio::test]
    async fn test_serves_clients_in_order_until_stop() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ctl.sock").to_string_lossy().into_owned();
        let endpoint = ControlEndpoint::create(&path).unwrap();

        // Queued in the listen backlog, served one at a time
        send(&path, &[200, 0]);
        send(&path, &7u32.to_le_bytes());
        send(&path, &[200, 0, 0, 0]);

        let state = DaemonState::new();
        let mut server = ControlServer::new(&state, Recorder::default());
        let outcome = server.serve(endpoint, std::future::pending()).await;

        assert!(matches!(outcome, ServeOutcome::StopRequested));
        assert!(!state.is_running());
        // The short record never reached the handler
        assert_eq!(
            server.into_handler().seen,
            vec![Command::Unknown(7), Command::StopVirtualDisplay]
        );
        assert!(!Path::new(&path).exists());
    }

    #[tokio::test]
    async fn test_empty_connection_is_malformed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ctl.sock").to_string_lossy().into_owned();
        let endpoint = ControlEndpoint::create(&path).unwrap();

        send(&path, &[]);
        send(&path, &[200, 0, 0, 0, 0]);
        send(&path, &[200, 0, 0, 0]);

        let state = DaemonState::new();
        let mut server = ControlServer::new(&state, Recorder::default());
        server.serve(endpoint, std::future::pending()).await;

        assert_eq!(server.into_handler().seen, vec![Command::StopVirtualDisplay]);
    }

    #[tokio::test]
    async fn test_shutdown_signal_closes_loop() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ctl.sock").to_string_lossy().into_owned();
        let endpoint = ControlEndpoint::create(&path).unwrap();

        let state = DaemonState::new();
        let mut server = ControlServer::new(&state, Recorder::default());
        let outcome = server.serve(endpoint, std::future::ready(())).await;

        assert!(matches!(outcome, ServeOutcome::Interrupted));
        assert!(!state.is_running());
        assert!(server.into_handler().seen.is_empty());
        assert!(!Path::new(&path).exists());
    }

    #[tokio::test]
    async fn test_second_client_waits_for_first() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ctl.sock").to_string_lossy().into_owned();
        let endpoint = ControlEndpoint::create(&path).unwrap();

        // Connected but never sends or closes
        let _holder = UnixStream::connect(&path).unwrap();
        send(&path, &[200, 0, 0, 0]);

        let state = DaemonState::new();
        let mut server = ControlServer::new(&state, Recorder::default());
        let outcome = server
            .serve(endpoint, tokio::time::sleep(Duration::from_millis(300)))
            .await;

        assert!(matches!(outcome, ServeOutcome::Interrupted));
        assert!(server.into_handler().seen.is_empty());
    }
}
