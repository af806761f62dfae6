//! Minimal cooperative event-loop abstraction.
//!
//! Treats the reactor (fd polling, timer dispatch) as an external
//! collaborator. We still need *some* concrete `monotonic()` clock,
//! cooperative `pause(until)`, and a handful of independently-reschedulable
//! timers to make `ToolHead`'s flush/motor-off policies exercisable, so
//! this module defines the trait plus two implementations: a real
//! wall-clock one for the host binary, and a virtual-time one that lets
//! tests drive the stall/flush state machine without sleeping.

use std::time::{Duration, Instant};

/// Sentinel meaning "return immediately".
pub const NOW: f64 = 0.0;
/// Sentinel meaning "never fire again".
pub const NEVER: f64 = f64::INFINITY;

/// Opaque handle to a timer registered on a [`Reactor`]. A host run loop
/// matches a due `TimerId` back to the `ToolHead` poll method that owns it
/// (`poll_flush_timer`/`poll_motor_off_timer`); the reactor itself never
/// calls back into `ToolHead`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerId(usize);

pub trait Reactor {
    /// Monotonic seconds since an arbitrary epoch fixed at construction.
    fn monotonic(&self) -> f64;

    /// Cooperatively suspend until `until` (a `monotonic()` timestamp).
    /// Returns the monotonic time at which control resumed (may be later
    /// than requested, but never asked to resume in the past).
    fn pause(&mut self, until: f64) -> f64;

    /// Registers a new timer, initially due at [`NEVER`].
    fn register_timer(&mut self) -> TimerId;

    /// Reschedules `id`'s next fire time.
    fn update_timer(&mut self, id: TimerId, when: f64);

    /// The earliest-due registered timer and its fire time, if any timer
    /// is scheduled to fire at all (excludes timers still at `NEVER`).
    fn next_timer(&self) -> Option<(TimerId, f64)>;
}

/// Real-time reactor backed by `std::time::Instant`.
#[derive(Debug)]
pub struct WallClockReactor {
    epoch: Instant,
    timers: Vec<f64>,
}

impl Default for WallClockReactor {
    fn default() -> Self {
        WallClockReactor {
            epoch: Instant::now(),
            timers: Vec::new(),
        }
    }
}

impl Reactor for WallClockReactor {
    fn monotonic(&self) -> f64 {
        self.epoch.elapsed().as_secs_f64()
    }

    fn pause(&mut self, until: f64) -> f64 {
        let now = self.monotonic();
        if until > now {
            std::thread::sleep(Duration::from_secs_f64(until - now));
        }
        self.monotonic()
    }

    fn register_timer(&mut self) -> TimerId {
        self.timers.push(NEVER);
        TimerId(self.timers.len() - 1)
    }

    fn update_timer(&mut self, id: TimerId, when: f64) {
        self.timers[id.0] = when;
    }

    fn next_timer(&self) -> Option<(TimerId, f64)> {
        self.timers
            .iter()
            .enumerate()
            .filter(|(_, &t)| t.is_finite())
            .min_by(|a, b| a.1.partial_cmp(b.1).unwrap())
            .map(|(i, &t)| (TimerId(i), t))
    }
}

/// Deterministic virtual-time reactor for tests: `pause` jumps straight to
/// the requested time instead of sleeping.
#[derive(Debug, Default)]
pub struct ManualReactor {
    now: f64,
    timers: Vec<f64>,
}

impl ManualReactor {
    pub fn new() -> Self {
        ManualReactor {
            now: 0.0,
            timers: Vec::new(),
        }
    }

    pub fn advance(&mut self, dt: f64) {
        self.now += dt;
    }
}

impl Reactor for ManualReactor {
    fn monotonic(&self) -> f64 {
        self.now
    }

    fn pause(&mut self, until: f64) -> f64 {
        if until > self.now {
            self.now = until;
        }
        self.now
    }

    fn register_timer(&mut self) -> TimerId {
        self.timers.push(NEVER);
        TimerId(self.timers.len() - 1)
    }

    fn update_timer(&mut self, id: TimerId, when: f64) {
        self.timers[id.0] = when;
    }

    fn next_timer(&self) -> Option<(TimerId, f64)> {
        self.timers
            .iter()
            .enumerate()
            .filter(|(_, &t)| t.is_finite())
            .min_by(|a, b| a.1.partial_cmp(b.1).unwrap())
            .map(|(i, &t)| (TimerId(i), t))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manual_reactor_pause_never_goes_backwards() {
        let mut r = ManualReactor::new();
        r.advance(5.0);
        let t = r.pause(2.0);
        assert_eq!(t, 5.0);
        let t = r.pause(10.0);
        assert_eq!(t, 10.0);
    }

    #[test]
    fn next_timer_reports_the_earliest_finite_one() {
        let mut r = ManualReactor::new();
        let a = r.register_timer();
        let b = r.register_timer();
        assert!(r.next_timer().is_none());
        r.update_timer(a, 5.0);
        r.update_timer(b, 2.0);
        let (id, when) = r.next_timer().unwrap();
        assert_eq!(id, b);
        assert_eq!(when, 2.0);
    }
}
