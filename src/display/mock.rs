//! In-memory display configurator used by tests.
//!
//! CHANGELOG:
//! - 10/19/2026 - Initial implementation

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use super::{DisplayConfigurator, DisplayMode, ModeError};

pub struct MockDisplays {
    output: Option<String>,
    modes: Vec<DisplayMode>,
    reject: bool,
    appear_after: usize,
    lookups: AtomicUsize,
    applied: Mutex<Vec<(String, DisplayMode)>>,
}

impl MockDisplays {
    pub fn with_output(output: &str, modes: Vec<DisplayMode>) -> Self {
        Self {
            output: Some(output.to_string()),
            modes,
            reject: false,
            appear_after: 0,
            lookups: AtomicUsize::new(0),
            applied: Mutex::new(Vec::new()),
        }
    }

    pub fn without_output() -> Self {
        Self {
            output: None,
            ..Self::with_output("", Vec::new())
        }
    }

    pub fn rejecting(mut self) -> Self {
        self.reject = true;
        self
    }

    /// Hide the output for the first `lookups` calls to `find_output`.
    pub fn appearing_after(mut self, lookups: usize) -> Self {
        self.appear_after = lookups;
        self
    }

    pub fn applied(&self) -> Vec<(String, DisplayMode)> {
        self.applied.lock().unwrap().clone()
    }
}

impl DisplayConfigurator for MockDisplays {
    fn find_output(&self, _display_code: &str) -> Option<String> {
        let seen = self.lookups.fetch_add(1, Ordering::SeqCst);
        if seen < self.appear_after {
            return None;
        }
        self.output.clone()
    }

    fn enumerate_modes<'a>(
        &'a self,
        _output: &'a str,
    ) -> Box<dyn Iterator<Item = DisplayMode> + 'a> {
        Box::new(self.modes.iter().copied())
    }

    fn apply(&self, output: &str, mode: DisplayMode) -> Result<(), ModeError> {
        if self.reject {
            return Err(ModeError::Rejected {
                output: output.to_string(),
                code: -1,
            });
        }
        self.applied.lock().unwrap().push((output.to_string(), mode));
        Ok(())
    }
}
