//! Request processor: decides what each control request does to the daemon.
//!
//! CHANGELOG:
//! - 10/19/2026 - Initial implementation

use tracing::{debug, info};

use crate::daemon::protocol::{Command, Request};
use crate::daemon::server::RequestHandler;
use crate::driver::{Adapter, DeviceControl, DisplayIndex};

/// What the serve loop does after a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Keep listening for the next client.
    Continue,
    /// Remove the active display and leave the serve loop.
    RemoveAndStop,
}

impl Decision {
    pub fn keeps_serving(self) -> bool {
        self == Decision::Continue
    }
}

/// Pure decision rule.
///
/// Returns the decision and whether a display is still active afterwards.
/// Only a stop request with an active display changes anything.
pub fn process(display_active: bool, request: &Request) -> (Decision, bool) {
    match request.command {
        Command::StopVirtualDisplay if display_active => (Decision::RemoveAndStop, false),
        _ => (Decision::Continue, display_active),
    }
}

/// Applies decisions against the driver. Owns the index of the active display.
pub struct RequestProcessor<'a, D: DeviceControl> {
    adapter: &'a Adapter<D>,
    active: Option<DisplayIndex>,
}

impl<'a, D: DeviceControl> RequestProcessor<'a, D> {
    pub fn new(adapter: &'a Adapter<D>, active: Option<DisplayIndex>) -> Self {
        Self { adapter, active }
    }

    /// Index of the display this processor still owns, if any.
    pub fn active_display(&self) -> Option<DisplayIndex> {
        self.active
    }
}

impl<D: DeviceControl> RequestHandler for RequestProcessor<'_, D> {
    fn handle(&mut self, request: Request) -> Decision {
        let (decision, still_active) = process(self.active.is_some(), &request);

        match decision {
            Decision::RemoveAndStop => {
                if let Some(index) = self.active.take() {
                    self.adapter.remove_display(index);
                    info!(%index, "Virtual display removed");
                }
            }
            Decision::Continue => {
                debug!(command = %request.command, "Request ignored");
            }
        }

        debug_assert_eq!(self.active.is_some(), still_active);
        decision
    }
}
