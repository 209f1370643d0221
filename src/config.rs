//! Daemon configuration: defaults, overrides and validation.
//!
//! CHANGELOG:
//! - 10/19/2026 - Pid and log file paths for the detached daemon
//! - 10/19/2026 - Initial implementation

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::display::DisplayMode;
use crate::driver::{DEFAULT_IO_TIMEOUT, DRIVER_STALE_TIMEOUT};

/// Well-known control pipe name on Windows.
pub const DEFAULT_PIPE_NAME: &str = r"\\.\pipe\vddswitcherd";
/// Socket file name used on other platforms.
pub const SOCKET_FILE_NAME: &str = "vddswitcherd.sock";

/// Keep-alive period.
pub const DEFAULT_KEEP_ALIVE_INTERVAL: Duration = Duration::from_millis(100);
/// Upper bound on the keep-alive period.
pub const MAX_KEEP_ALIVE_INTERVAL: Duration = DRIVER_STALE_TIMEOUT;
/// How long to wait for a freshly plugged output before matching modes.
pub const DEFAULT_OUTPUT_WAIT: Duration = Duration::from_secs(3);

/// Errors in a daemon configuration.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Resolution request is incomplete: width, height and refresh rate are all required")]
    PartialMode,

    #[error("Resolution request {0} has a zero component")]
    ZeroMode(DisplayMode),

    #[error("Keep-alive interval must be between 1ms and {max:?}, got {got:?}")]
    KeepAliveInterval { got: Duration, max: Duration },

    #[error("Driver timeout must be non-zero")]
    ZeroDriverTimeout,

    #[error("Control channel name is empty")]
    EmptyChannel,
}

/// Default control channel for this platform.
///
/// Windows: `\\.\pipe\vddswitcherd`. Elsewhere: `vddswitcherd.sock` in the
/// user runtime directory, falling back to the temp directory.
pub fn default_channel() -> String {
    #[cfg(windows)]
    {
        DEFAULT_PIPE_NAME.to_string()
    }
    #[cfg(not(windows))]
    {
        dirs::runtime_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join(SOCKET_FILE_NAME)
            .to_string_lossy()
            .into_owned()
    }
}

/// Expand a leading `~` in a user-supplied channel name.
pub fn expand_channel(raw: &str) -> String {
    shellexpand::tilde(raw).into_owned()
}

/// Build a resolution request from its optional parts.
///
/// All three parts or none; a partial request is an error.
pub fn mode_request(
    width: Option<u32>,
    height: Option<u32>,
    refresh: Option<u32>,
) -> Result<Option<DisplayMode>, ConfigError> {
    match (width, height, refresh) {
        (None, None, None) => Ok(None),
        (Some(w), Some(h), Some(r)) => {
            let mode = DisplayMode::new(w, h, r);
            if w == 0 || h == 0 || r == 0 {
                return Err(ConfigError::ZeroMode(mode));
            }
            Ok(Some(mode))
        }
        _ => Err(ConfigError::PartialMode),
    }
}

/// Daemon settings.
#[derive(Debug, Clone)]
pub struct DaemonConfig {
    /// Control channel name (pipe name or socket path)
    pub channel: String,
    /// Period of the keep-alive ping
    pub keep_alive_interval: Duration,
    /// Bounded wait on every driver call
    pub driver_timeout: Duration,
    /// Resolution to apply after plugging the display
    pub requested_mode: Option<DisplayMode>,
    /// How long to wait for the virtual output to appear
    pub output_wait: Duration,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            channel: default_channel(),
            keep_alive_interval: DEFAULT_KEEP_ALIVE_INTERVAL,
            driver_timeout: DEFAULT_IO_TIMEOUT,
            requested_mode: None,
            output_wait: DEFAULT_OUTPUT_WAIT,
        }
    }
}

impl DaemonConfig {
    /// Override the control channel (tilde-expanded).
    pub fn with_channel(mut self, raw: &str) -> Self {
        self.channel = expand_channel(raw);
        self
    }

    pub fn with_mode(mut self, mode: Option<DisplayMode>) -> Self {
        self.requested_mode = mode;
        self
    }

    /// Pid file of a detached daemon, next to the channel.
    pub fn pid_file(&self) -> PathBuf {
        PathBuf::from(format!("{}.pid", self.channel))
    }

    /// Log file of a detached daemon, next to the channel.
    pub fn log_file(&self) -> PathBuf {
        PathBuf::from(format!("{}.log", self.channel))
    }

    /// Check the settings before any driver call is made.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.channel.trim().is_empty() {
            return Err(ConfigError::EmptyChannel);
        }

        if self.keep_alive_interval.is_zero()
            || self.keep_alive_interval > MAX_KEEP_ALIVE_INTERVAL
        {
            return Err(ConfigError::KeepAliveInterval {
                got: self.keep_alive_interval,
                max: MAX_KEEP_ALIVE_INTERVAL,
            });
        }

        if self.driver_timeout.is_zero() {
            return Err(ConfigError::ZeroDriverTimeout);
        }

        if let Some(mode) = self.requested_mode {
            mode_request(Some(mode.width), Some(mode.height), Some(mode.refresh))?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        let config = DaemonConfig::default();
        assert_eq!(config.keep_alive_interval, Duration::from_millis(100));
        assert_eq!(config.driver_timeout, Duration::from_secs(5));
        assert!(config.requested_mode.is_none());
        assert!(config.validate().is_ok());
    }

    #[cfg(unix)]
    #[test]
    fn test_default_channel_is_socket() {
        assert!(default_channel().ends_with(SOCKET_FILE_NAME));
    }

    #[cfg(windows)]
    #[test]
    fn test_default_channel_is_pipe() {
        assert_eq!(default_channel(), r"\\.\pipe\vddswitcherd");
    }

    #[test]
    fn test_mode_request() {
        assert_eq!(mode_request(None, None, None), Ok(None));
        assert_eq!(
            mode_request(Some(1920), Some(1080), Some(60)),
            Ok(Some(DisplayMode::new(1920, 1080, 60)))
        );
        assert_eq!(
            mode_request(Some(1920), None, Some(60)),
            Err(ConfigError::PartialMode)
        );
        assert_eq!(
            mode_request(Some(1920), Some(0), Some(60)),
            Err(ConfigError::ZeroMode(DisplayMode::new(1920, 0, 60)))
        );
    }

    #[test]
    fn test_keep_alive_bounds() {
        let mut config = DaemonConfig::default();
        config.keep_alive_interval = Duration::ZERO;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::KeepAliveInterval { .. })
        ));

        config.keep_alive_interval = Duration::from_millis(250);
        assert!(matches!(
            config.validate(),
            Err(ConfigError::KeepAliveInterval { .. })
        ));

        config.keep_alive_interval = Duration::from_millis(50);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_driver_timeout() {
        let mut config = DaemonConfig::default();
        config.driver_timeout = Duration::ZERO;
        assert_eq!(config.validate(), Err(ConfigError::ZeroDriverTimeout));
    }

    #[test]
    fn test_empty_channel() {
        let config = DaemonConfig::default().with_channel("  ");
        assert_eq!(config.validate(), Err(ConfigError::EmptyChannel));
    }

    #[test]
    fn test_channel_tilde_expansion() {
        let config = DaemonConfig::default().with_channel("~/vdd.sock");
        assert!(!config.channel.starts_with('~'));
        assert!(config.channel.ends_with("vdd.sock"));
    }

    #[test]
    fn test_detached_files_sit_next_to_channel() {
        let config = DaemonConfig::default().with_channel("/run/user/1000/vdd.sock");
        assert_eq!(config.pid_file(), PathBuf::from("/run/user/1000/vdd.sock.pid"));
        assert_eq!(config.log_file(), PathBuf::from("/run/user/1000/vdd.sock.log"));
    }
}
