//! Keep-alive task: pings the driver on a fixed period while the daemon runs.
//!
//! The task only borrows the adapter. It runs on a scoped thread so the
//! coordinator cannot close the handle before the task has been joined.
//! Pings follow a fixed schedule so ping latency does not stretch the period.
//!
//! CHANGELOG:
//! - 10/19/2026 - Deadline-based schedule
//! - 10/19/2026 - Initial implementation

use std::io;
use std::thread::{self, Scope, ScopedJoinHandle};
use std::time::{Duration, Instant};

use tracing::debug;

use crate::daemon::DaemonState;
use crate::driver::{Adapter, DeviceControl};

/// Ping once per `interval` until `state` stops running. Returns the number of pings.
pub fn run<D: DeviceControl>(adapter: &Adapter<D>, state: &DaemonState, interval: Duration) -> u64 {
    let mut pings = 0u64;
    let mut due = Instant::now();
    while state.is_running() {
        adapter.keep_alive();
        pings += 1;

        let now = Instant::now();
        due = next_deadline(due, interval, now);
        thread::sleep(due.saturating_duration_since(now));
    }
    debug!(pings, "Keep-alive task stopped");
    pings
}

/// Next ping time. A late schedule restarts from `now` instead of bursting.
fn next_deadline(due: Instant, interval: Duration, now: Instant) -> Instant {
    let next = due + interval;
    if next > now {
        next
    } else {
        now
    }
}

/// Start the task on a thread owned by `scope`.
pub fn spawn<'scope, 'env, D: DeviceControl>(
    scope: &'scope Scope<'scope, 'env>,
    adapter: &'env Adapter<D>,
    state: &'env DaemonState,
    interval: Duration,
) -> io::Result<ScopedJoinHandle<'scope, u64>> {
    debug!(interval_ms = interval.as_millis() as u64, "Starting keep-alive task");
    thread::Builder::new()
        .name("keep-alive".into())
        .spawn_scoped(scope, move || run(adapter, state, interval))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::mock::MockDriver;
    use crate::driver::{IoControl, DEFAULT_IO_TIMEOUT};

    #[test]
    fn test_pings_until_stopped_then_joins_before_close() {
        let driver = MockDriver::ready();
        let log = driver.log.clone();
        let adapter = Adapter::open(&driver, DEFAULT_IO_TIMEOUT).unwrap();
        let state = DaemonState::new();

        let pings = thread::scope(|scope| {
            let handle = spawn(scope, &adapter, &state, Duration::from_millis(5)).unwrap();
            thread::sleep(Duration::from_millis(50));
            state.request_stop();
            handle.join().unwrap()
        });
        adapter.close();

        assert!(pings >= 1);
        assert_eq!(log.count(IoControl::Update) as u64, pings);
        assert!(log.closed_last());
    }

    #[test]
    fn test_ping_latency_shortens_sleep() {
        let start = Instant::now();
        let interval = Duration::from_millis(100);
        let after_ping = start + Duration::from_millis(30);

        let next = next_deadline(start, interval, after_ping);
        assert_eq!(next, start + interval);
        assert_eq!(next - after_ping, Duration::from_millis(70));
    }

    #[test]
    fn test_late_schedule_restarts_from_now() {
        let start = Instant::now();
        let interval = Duration::from_millis(100);
        let late = start + Duration::from_millis(250);

        let next = next_deadline(start, interval, late);
        assert_eq!(next, late);
        assert_eq!(next.saturating_duration_since(late), Duration::ZERO);
    }

    #[test]
    fn test_stopped_state_sends_nothing() {
        let driver = MockDriver::ready();
        let log = driver.log.clone();
        let adapter = Adapter::open(&driver, DEFAULT_IO_TIMEOUT).unwrap();
        let state = DaemonState::new();
        state.request_stop();

        assert_eq!(run(&adapter, &state, Duration::from_millis(1)), 0);
        assert!(log.codes().is_empty());
    }

    #[test]
    fn test_failed_pings_keep_running() {
        let driver = MockDriver::ready().failing(IoControl::Update);
        let log = driver.log.clone();
        let adapter = Adapter::open(&driver, DEFAULT_IO_TIMEOUT).unwrap();
        let state = DaemonState::new();

        thread::scope(|scope| {
            let handle = spawn(scope, &adapter, &state, Duration::from_millis(2)).unwrap();
            thread::sleep(Duration::from_millis(30));
            state.request_stop();
            handle.join().unwrap();
        });

        assert!(log.count(IoControl::Update) >= 2);
    }
}
