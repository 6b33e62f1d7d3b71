/// Time source and periodic task plumbing.
///
/// # Clock injection
/// The analyzer and the simulator never call `Utc::now()` directly. They are
/// handed a `Clock`, which is `SystemClock` in the daemon and `ManualClock`
/// in tests. Tests can then drive hundreds of ticks deterministically
/// without sleeping.
///
/// # Polling
/// `PollLoop` runs one tick at a time on the calling thread, so a tick can
/// never overlap the previous one. Ticks start a fixed interval apart; the
/// remainder of each slot is spent waiting on a `Shutdown` handle rather
/// than sleeping, which makes cancellation immediate.

use std::fmt;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};

use crate::logging::{self, Component};

// ---------------------------------------------------------------------------
// Clocks
// ---------------------------------------------------------------------------

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self { now: Mutex::new(start) }
    }

    pub fn set(&self, at: DateTime<Utc>) {
        *lock(&self.now) = at;
    }

    pub fn advance(&self, by: chrono::Duration) {
        let mut now = lock(&self.now);
        *now += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *lock(&self.now)
    }
}

impl<C: Clock + ?Sized> Clock for Arc<C> {
    fn now(&self) -> DateTime<Utc> {
        (**self).now()
    }
}

// A poisoned lock only means another thread panicked mid-update of a plain
// value; the value itself is still usable.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// ---------------------------------------------------------------------------
// Shutdown
// ---------------------------------------------------------------------------

/// Cloneable cancellation handle shared by every loop in the process.
#[derive(Debug, Clone, Default)]
pub struct Shutdown {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

impl Shutdown {
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests shutdown and wakes every waiting loop.
    pub fn trigger(&self) {
        let (flag, signal) = &*self.inner;
        *lock(flag) = true;
        signal.notify_all();
    }

    pub fn is_triggered(&self) -> bool {
        *lock(&self.inner.0)
    }

    /// Waits up to `timeout`. Returns `true` if shutdown was requested.
    pub fn wait(&self, timeout: Duration) -> bool {
        let (flag, signal) = &*self.inner;
        let guard = lock(flag);
        let (guard, _) = signal
            .wait_timeout_while(guard, timeout, |stopped| !*stopped)
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *guard
    }
}

// ---------------------------------------------------------------------------
// Poll loop
// ---------------------------------------------------------------------------

/// Counters returned when a loop exits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoopStats {
    pub ticks: u64,
    pub failures: u64,
}

/// Fixed-rate, non-overlapping, cancellable task.
///
/// Ticks start `interval` apart, measured start to start. A tick that
/// overruns its slot is followed immediately by the next one, and the
/// schedule restarts from there rather than bursting to catch up.
#[derive(Debug, Clone)]
pub struct PollLoop {
    component: Component,
    interval: Duration,
}

impl PollLoop {
    pub fn new(component: Component, interval: Duration) -> Self {
        Self { component, interval }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Runs `tick` until `shutdown` is triggered.
    ///
    /// A failing tick is counted and logged at debug level (the tick itself
    /// is expected to have logged the cause); the loop carries on with the
    /// next interval.
    pub fn run<F, E>(&self, shutdown: &Shutdown, mut tick: F) -> LoopStats
    where
        F: FnMut(u64) -> Result<(), E>,
        E: fmt::Display,
    {
        let mut stats = LoopStats::default();
        logging::info(
            self.component,
            None,
            &format!("loop started, interval {:?}", self.interval),
        );

        let mut next_start = Instant::now();
        while !shutdown.is_triggered() {
            if let Err(e) = tick(stats.ticks) {
                stats.failures += 1;
                logging::debug(
                    self.component,
                    None,
                    &format!("tick {} failed, retrying next interval: {}", stats.ticks, e),
                );
            }
            stats.ticks += 1;

            let now = Instant::now();
            let remaining = match next_start.checked_add(self.interval) {
                Some(next) if next > now => {
                    next_start = next;
                    next - now
                }
                Some(_) => {
                    next_start = now;
                    Duration::ZERO
                }
                None => self.interval,
            };
            if shutdown.wait(remaining) {
                break;
            }
        }

        logging::info(
            self.component,
            None,
            &format!("loop stopped after {} ticks ({} failed)", stats.ticks, stats.failures),
        );
        stats
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::time::Instant;

    fn fixed_start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 13, 0, 0).unwrap()
    }

    #[test]
    fn test_manual_clock_only_moves_when_advanced() {
        let clock = ManualClock::new(fixed_start());
        assert_eq!(clock.now(), fixed_start());
        clock.advance(chrono::Duration::seconds(5));
        assert_eq!(clock.now(), fixed_start() + chrono::Duration::seconds(5));
        clock.set(fixed_start());
        assert_eq!(clock.now(), fixed_start());
    }

    #[test]
    fn test_shared_manual_clock_is_a_clock() {
        let clock = Arc::new(ManualClock::new(fixed_start()));
        let shared: Arc<ManualClock> = Arc::clone(&clock);
        clock.advance(chrono::Duration::minutes(1));
        assert_eq!(shared.now(), fixed_start() + chrono::Duration::minutes(1));
    }

    #[test]
    fn test_loop_stops_when_tick_requests_shutdown() {
        let shutdown = Shutdown::new();
        let poll = PollLoop::new(Component::System, Duration::from_millis(0));
        let stats = poll.run(&shutdown, |n| {
            if n == 4 {
                shutdown.trigger();
            }
            Ok::<(), String>(())
        });
        assert_eq!(stats.ticks, 5);
        assert_eq!(stats.failures, 0);
    }

    #[test]
    fn test_failed_ticks_do_not_stop_the_loop() {
        let shutdown = Shutdown::new();
        let poll = PollLoop::new(Component::System, Duration::from_millis(0));
        let stats = poll.run(&shutdown, |n| {
            if n == 9 {
                shutdown.trigger();
            }
            if n % 2 == 0 { Err("store unavailable") } else { Ok(()) }
        });
        assert_eq!(stats.ticks, 10);
        assert_eq!(stats.failures, 5);
    }

    #[test]
    fn test_tick_duration_does_not_stretch_the_period() {
        let shutdown = Shutdown::new();
        let interval = Duration::from_millis(200);
        let poll = PollLoop::new(Component::System, interval);
        let mut starts = Vec::new();
        poll.run(&shutdown, |n| {
            starts.push(Instant::now());
            std::thread::sleep(Duration::from_millis(150));
            if n == 3 {
                shutdown.trigger();
            }
            Ok::<(), String>(())
        });

        assert_eq!(starts.len(), 4);
        for pair in starts.windows(2) {
            let gap = pair[1] - pair[0];
            assert!(gap >= Duration::from_millis(180), "tick started early after {:?}", gap);
            assert!(gap < Duration::from_millis(300), "period stretched to {:?}", gap);
        }
    }

    #[test]
    fn test_overrunning_tick_is_followed_immediately() {
        let shutdown = Shutdown::new();
        let poll = PollLoop::new(Component::System, Duration::from_millis(20));
        let mut starts = Vec::new();
        poll.run(&shutdown, |n| {
            starts.push(Instant::now());
            if n == 0 {
                std::thread::sleep(Duration::from_millis(100));
            }
            if n == 2 {
                shutdown.trigger();
            }
            Ok::<(), String>(())
        });

        assert_eq!(starts.len(), 3);
        assert!(starts[1] - starts[0] < Duration::from_millis(180));
        assert!(starts[2] - starts[1] >= Duration::from_millis(15), "no catch-up burst");
    }

    #[test]
    fn test_pre_triggered_shutdown_runs_no_ticks() {
        let shutdown = Shutdown::new();
        shutdown.trigger();
        let poll = PollLoop::new(Component::System, Duration::from_secs(60));
        let stats = poll.run(&shutdown, |_| Ok::<(), String>(()));
        assert_eq!(stats.ticks, 0);
    }

    #[test]
    fn test_shutdown_interrupts_a_long_wait() {
        let shutdown = Shutdown::new();
        let remote = shutdown.clone();
        let started = Instant::now();
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            remote.trigger();
        });
        assert!(shutdown.wait(Duration::from_secs(30)), "wait should report shutdown");
        assert!(started.elapsed() < Duration::from_secs(10), "wait was not interrupted");
        handle.join().expect("trigger thread panicked");
    }

    #[test]
    fn test_wait_times_out_without_shutdown() {
        let shutdown = Shutdown::new();
        assert!(!shutdown.wait(Duration::from_millis(5)));
    }
}
