//! Scheduler: one single-shot timer per runtime (§4.E, §5).
//!
//! The engine is single-threaded and cooperative: nothing here blocks or
//! awaits. A [`Clock`] supplies "now"; production callers drive it from
//! their async runtime's monotonic timer facility, and tests drive it
//! explicitly. This mirrors the `selected_timeout`/`trigger_at` split kept
//! by the connection-level padding timer this crate's sibling subsystem
//! uses, without that timer's `Future`/`Stream` plumbing, since this
//! engine's caller (not this crate) owns the event loop (§5).

use std::time::{Duration, Instant};

/// A source of monotonic time.
///
/// The scheduler never reads the wall clock directly; all interval math
/// goes through this trait so tests can drive it deterministically.
pub trait Clock {
    /// The current monotonic instant.
    fn now(&self) -> Instant;
}

/// A [`Clock`] backed by [`Instant::now`], for production use.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// One runtime's single-shot timer (§3 invariant I2: at most one pending
/// timer per runtime).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Timer {
    /// Absolute deadline, or `None` if no timer is armed.
    deadline: Option<Instant>,
}

impl Timer {
    /// An unarmed timer.
    pub fn new() -> Self {
        Timer { deadline: None }
    }

    /// Arm this timer for `delay` from `now`, cancelling whatever was
    /// previously armed (§4.E `schedule`).
    ///
    /// A zero delay still only becomes due on the *next* call to
    /// [`Timer::is_due`] with a `now` `>=` this call's `now`; callers
    /// must re-dispatch rather than fire inline, to avoid reentrant
    /// transitions (§4.E, §4.D cascade bound).
    pub fn schedule(&mut self, now: Instant, delay: Duration) {
        self.deadline = Some(now + delay);
    }

    /// Cancel any armed timer. Idempotent (§5 "Cancellation").
    pub fn cancel(&mut self) {
        self.deadline = None;
    }

    /// Whether a timer is currently armed.
    pub fn is_armed(&self) -> bool {
        self.deadline.is_some()
    }

    /// Whether the armed timer is due at `now`. Always `false` if
    /// unarmed.
    pub fn is_due(&self, now: Instant) -> bool {
        self.deadline.is_some_and(|d| now >= d)
    }

    /// The armed deadline, if any.
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unarmed_timer_is_never_due() {
        let t = Timer::new();
        assert!(!t.is_due(Instant::now()));
        assert!(!t.is_armed());
    }

    #[test]
    fn scheduling_arms_and_is_due_only_after_delay() {
        let mut t = Timer::new();
        let t0 = Instant::now();
        t.schedule(t0, Duration::from_micros(5000));
        assert!(t.is_armed());
        assert!(!t.is_due(t0 + Duration::from_micros(4999)));
        assert!(t.is_due(t0 + Duration::from_micros(5000)));
    }

    #[test]
    fn cancel_is_idempotent_and_disarms() {
        let mut t = Timer::new();
        let t0 = Instant::now();
        t.schedule(t0, Duration::from_micros(1000));
        t.cancel();
        t.cancel();
        assert!(!t.is_armed());
        assert!(!t.is_due(t0 + Duration::from_secs(1)));
    }

    #[test]
    fn rescheduling_replaces_the_previous_deadline() {
        let mut t = Timer::new();
        let t0 = Instant::now();
        t.schedule(t0, Duration::from_micros(1000));
        t.schedule(t0, Duration::from_micros(9000));
        assert!(!t.is_due(t0 + Duration::from_micros(1000)));
        assert!(t.is_due(t0 + Duration::from_micros(9000)));
    }
}
