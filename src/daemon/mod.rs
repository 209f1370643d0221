//! Display-lifecycle daemon: control channel, request handling, keep-alive
//! and the top-level coordinator.
//!
//! CHANGELOG:
//! - 10/19/2026 - Pid file cleanup
//! - 10/19/2026 - Initial module structure

pub mod channel;
pub mod keepalive;
pub mod lifecycle;
pub mod protocol;
pub mod server;
pub mod service;

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::{debug, warn};

/// Process-wide run flag shared by the serve loop and the keep-alive task.
///
/// Clearing it is the only cancellation signal; both tasks poll it.
#[derive(Debug)]
pub struct DaemonState {
    running: AtomicBool,
}

impl DaemonState {
    pub fn new() -> Self {
        Self {
            running: AtomicBool::new(true),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub fn request_stop(&self) {
        self.running.store(false, Ordering::Release);
    }
}

impl Default for DaemonState {
    fn default() -> Self {
        Self::new()
    }
}

/// Pid file written at daemonization. Removed when dropped.
#[derive(Debug)]
pub struct PidFile {
    path: PathBuf,
}

impl PidFile {
    /// Take ownership of an existing pid file.
    pub fn adopt(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for PidFile {
    fn drop(&mut self) {
        match fs::remove_file(&self.path) {
            Ok(()) => debug!(path = %self.path.display(), "Removed pid file"),
            Err(e) => warn!(path = %self.path.display(), error = %e, "Failed to remove pid file"),
        }
    }
}
