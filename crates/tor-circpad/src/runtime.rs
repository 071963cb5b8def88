//! Per-circuit runtime state and the event dispatcher (§3 "Runtime
//! instance", §4.C, §4.D).

use std::sync::Arc;
use std::time::{Duration, Instant};

use rand::Rng;

use crate::dist::Sample;
use crate::err::Error;
use crate::hist::Histogram;
use crate::machine::{Event, MachineSpec, StateIdx, Timing};
use crate::overhead::MachineCounters;
use crate::scheduler::Timer;

/// Whether a runtime is actively padding, or has asked its peer to stop
/// and is waiting for confirmation (§4.H slot state machine).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Padding normally.
    Active,
    /// `STOP` was sent (or conditions failed); waiting for `NEGOTIATED`
    /// or the grace timeout before the slot can be cleared.
    AwaitingStop,
}

/// What the caller should do after a dispatch call returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Nothing changed that the caller needs to act on.
    Idle,
    /// (Re)armed the runtime's timer for this delay from "now".
    ArmTimer(Duration),
    /// The machine reached a terminal state; the caller should begin
    /// shutdown (§3 invariant I6).
    Shutdown,
}

/// Mutable per-circuit, per-machine runtime state (§3 "Runtime instance").
#[derive(Debug, Clone)]
pub struct Runtime {
    /// The immutable specification this runtime is an instance of.
    spec: Arc<MachineSpec>,
    /// Current state index.
    state: StateIdx,
    /// Remaining per-visit padding budget; `None` means unlimited.
    length_remaining: Option<u64>,
    /// Mutable histogram copy, present only while the current state uses
    /// a histogram timing source (§3 invariant I3).
    hist: Option<Histogram>,
    /// This runtime's single-shot timer (§3 invariant I2).
    timer: Timer,
    /// Time of the last cell event observed on this slot, for inter-arrival
    /// calculation.
    last_cell_time: Option<Instant>,
    /// Time of an in-flight `NONPADDING_SENT` awaiting its `NONPADDING_RECV`
    /// for RTT estimation.
    pending_sent_at: Option<Instant>,
    /// Current RTT estimate, if any round trip has completed yet.
    rtt: Option<Duration>,
    /// Padding/total cell counters and this machine's own overhead caps.
    pub counters: MachineCounters,
    /// Active vs. awaiting-stop-confirmation.
    pub phase: Phase,
}

impl Runtime {
    /// Construct a fresh runtime for `spec`, not yet in any state; call
    /// [`Runtime::start`] to enter the initial state and arm the first
    /// timer.
    pub fn new(spec: Arc<MachineSpec>) -> Self {
        let counters = MachineCounters::new(spec.overhead);
        Runtime {
            spec,
            state: 0,
            length_remaining: None,
            hist: None,
            timer: Timer::new(),
            last_cell_time: None,
            pending_sent_at: None,
            rtt: None,
            counters,
            phase: Phase::Active,
        }
    }

    /// Enter the machine's initial state (§4.G "sample the initial state's
    /// delay").
    pub fn start<R: Rng + ?Sized>(&mut self, rng: &mut R, now: Instant) -> Result<Outcome, Error> {
        let initial = self.spec.initial_state();
        self.enter_state(initial, rng, now, 0)
    }

    /// Current state index, for diagnostics and tests.
    pub fn state(&self) -> StateIdx {
        self.state
    }

    /// This runtime's owning specification.
    pub fn spec(&self) -> &Arc<MachineSpec> {
        &self.spec
    }

    /// Whether this runtime's timer is currently armed.
    pub fn timer_armed(&self) -> bool {
        self.timer.is_armed()
    }

    /// Whether the armed timer (if any) is due at `now`.
    pub fn timer_due(&self, now: Instant) -> bool {
        self.timer.is_due(now)
    }

    /// Handle a cell event observed on this slot (§4.D `on_cell`).
    ///
    /// `event` must be one of the four cell events; passing an internal
    /// event here is a caller bug.
    pub fn on_cell<R: Rng + ?Sized>(
        &mut self,
        event: Event,
        now: Instant,
        rng: &mut R,
    ) -> Result<Outcome, Error> {
        debug_assert!(matches!(
            event,
            Event::NonpaddingSent | Event::NonpaddingRecv | Event::PaddingSent | Event::PaddingRecv
        ));

        let d = self
            .last_cell_time
            .map(|t| now.saturating_duration_since(t).as_micros() as u64)
            .unwrap_or(0);
        self.last_cell_time = Some(now);
        self.update_rtt(event, now);

        if let Some(hist) = &mut self.hist {
            hist.remove_token(d);
        }

        if event == Event::PaddingSent {
            if let Some(remaining) = &mut self.length_remaining {
                *remaining = remaining.saturating_sub(1);
                if *remaining == 0 {
                    return self.raise_internal(Event::LengthCount, rng, now, 0);
                }
            }
        }

        self.raise_internal(event, rng, now, 0)
    }

    /// Update the per-runtime RTT estimate from an observed
    /// `NONPADDING_SENT`/`NONPADDING_RECV` round trip (§4.E).
    fn update_rtt(&mut self, event: Event, now: Instant) {
        match event {
            Event::NonpaddingSent => {
                if self.pending_sent_at.is_none() {
                    self.pending_sent_at = Some(now);
                }
            }
            Event::NonpaddingRecv => {
                if let Some(sent_at) = self.pending_sent_at.take() {
                    self.rtt = Some(now.saturating_duration_since(sent_at));
                }
            }
            _ => {}
        }
    }

    /// Current RTT estimate in microseconds, or 0 if none has been
    /// measured yet.
    fn rtt_micros(&self) -> u64 {
        self.rtt.map(|d| d.as_micros() as u64).unwrap_or(0)
    }

    /// Apply `event`'s transition, if the current state names one
    /// (§4.D "transition lookup").
    fn raise_internal<R: Rng + ?Sized>(
        &mut self,
        event: Event,
        rng: &mut R,
        now: Instant,
        depth: usize,
    ) -> Result<Outcome, Error> {
        let target = self.spec.states[self.state].next_state[event as usize];
        match target {
            Some(target) => self.enter_state(target, rng, now, depth + 1),
            None => {
                self.timer.cancel();
                Ok(Outcome::Idle)
            }
        }
    }

    /// Enter `target`: copy its histogram if any, sample its length
    /// budget, then arm its timing source (§4.D "state entry actions").
    ///
    /// `depth` bounds recursive internal cascades (an `INFINITY` or
    /// `BINS_EMPTY` sample that transitions straight into another state
    /// with the same fate) at `states.len() + 1`, per §4.D.
    fn enter_state<R: Rng + ?Sized>(
        &mut self,
        target: StateIdx,
        rng: &mut R,
        now: Instant,
        depth: usize,
    ) -> Result<Outcome, Error> {
        if depth > self.spec.states.len() {
            return Err(Error::Bug(tor_error::internal!(
                "padding machine {} cascaded through more states than it has; guarding against an infinite loop",
                self.spec.machine_number
            )
            .into()));
        }

        self.state = target;
        let state = &self.spec.states[target];
        tracing::trace!(
            machine = self.spec.machine_number,
            state = target,
            "entered padding machine state"
        );

        if state.is_terminal() {
            self.timer.cancel();
            self.hist = None;
            return Ok(Outcome::Shutdown);
        }

        self.hist = match &state.timing {
            Timing::Histogram(h) => Some(h.clone()),
            Timing::Dist(_) => None,
        };

        self.length_remaining = match &state.length_dist {
            Some(d) => match d.sample(rng, 0)? {
                Sample::Delay(n) => Some(n),
                Sample::Infinity => None,
            },
            None => None,
        };

        if self.length_remaining == Some(0) {
            return self.raise_internal(Event::LengthCount, rng, now, depth + 1);
        }

        self.arm_from_current_state(rng, now, depth)
    }

    /// Sample the current state's timing source and arm the timer, or
    /// raise the appropriate internal event if sampling can't produce a
    /// delay (§4.A, §4.E).
    fn arm_from_current_state<R: Rng + ?Sized>(
        &mut self,
        rng: &mut R,
        now: Instant,
        depth: usize,
    ) -> Result<Outcome, Error> {
        let state = &self.spec.states[self.state];
        let sample = match (&state.timing, &self.hist) {
            (Timing::Dist(d), _) => d.sample(rng, self.rtt_micros())?,
            (Timing::Histogram(_), Some(hist)) => match hist.sample(rng) {
                Some(s) => s,
                None => return self.raise_internal(Event::BinsEmpty, rng, now, depth + 1),
            },
            (Timing::Histogram(_), None) => {
                return Err(Error::Bug(
                    tor_error::internal!("histogram state entered without a mutable copy").into(),
                ));
            }
        };

        match sample {
            Sample::Delay(us) => {
                let delay = Duration::from_micros(us);
                self.timer.schedule(now, delay);
                Ok(Outcome::ArmTimer(delay))
            }
            Sample::Infinity => {
                self.timer.cancel();
                self.raise_internal(Event::Infinity, rng, now, depth + 1)
            }
        }
    }

    /// Called by the caller's drive loop when this runtime's timer fires
    /// and the overhead governor allowed the send: raises `PADDING_SENT`
    /// and continues the cadence.
    ///
    /// The caller is responsible for calling the overhead governor and
    /// the transport *before* calling this, and for calling
    /// [`Runtime::fire_suppressed`] instead if the send was suppressed.
    pub fn fire_sent<R: Rng + ?Sized>(
        &mut self,
        now: Instant,
        rng: &mut R,
    ) -> Result<Outcome, Error> {
        self.on_cell(Event::PaddingSent, now, rng)
    }

    /// Move this runtime into the awaiting-stop phase and cancel its
    /// timer (§3 "shutdown phase flag"); called by the activation
    /// controller when conditions fail or a replacement is requested.
    pub fn request_stop(&mut self) {
        self.phase = Phase::AwaitingStop;
        self.timer.cancel();
    }

    /// Called by the caller's drive loop when this runtime's timer fires
    /// but the overhead governor suppressed the send (§4.I): the cadence
    /// continues by resampling the current state's timing source, but no
    /// `PADDING_SENT` event is raised.
    pub fn fire_suppressed<R: Rng + ?Sized>(
        &mut self,
        now: Instant,
        rng: &mut R,
    ) -> Result<Outcome, Error> {
        self.arm_from_current_state(rng, now, 0)
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use crate::dist::{Dist, DistKind};
    use crate::hist::TokenRemoval;
    use crate::machine::{Conditions, OverheadCaps, Side, State};
    use tor_basic_utils::test_rng::testing_rng;

    fn ping_pong_spec() -> Arc<MachineSpec> {
        let start = State::from_dist(Dist::new(DistKind::Uniform, 5000.0, 5000.0, 10_000))
            .on(Event::PaddingSent, 1);
        let end = State::from_dist(Dist::new(DistKind::Uniform, 0.0, 0.0, 0));
        Arc::new(MachineSpec {
            machine_number: 1,
            name: "ping".into(),
            target_hop: 1,
            side: Side::Origin,
            conditions: Conditions::default(),
            states: vec![start, end],
            should_negotiate_end: true,
            keep_circuit_alive: false,
            overhead: OverheadCaps::default(),
        })
    }

    #[test]
    fn start_arms_timer_for_sampled_delay() {
        let mut rt = Runtime::new(ping_pong_spec());
        let mut rng = testing_rng();
        let now = Instant::now();
        let outcome = rt.start(&mut rng, now).unwrap();
        assert_eq!(outcome, Outcome::ArmTimer(Duration::from_micros(5000)));
        assert!(rt.timer_armed());
    }

    #[test]
    fn padding_sent_drives_machine_to_terminal_state() {
        let mut rt = Runtime::new(ping_pong_spec());
        let mut rng = testing_rng();
        let now = Instant::now();
        rt.start(&mut rng, now).unwrap();
        let fire_at = now + Duration::from_micros(5000);
        let outcome = rt.fire_sent(fire_at, &mut rng).unwrap();
        assert_eq!(outcome, Outcome::Shutdown);
        assert_eq!(rt.state(), 1);
    }

    fn burst_spec(n: u64) -> Arc<MachineSpec> {
        let start = State::from_dist(Dist::new(DistKind::Uniform, 1000.0, 1000.0, 10_000))
            .with_length(Dist::new(DistKind::Uniform, n as f64, n as f64, n))
            .on(Event::LengthCount, 1);
        let end = State::from_dist(Dist::new(DistKind::Uniform, 0.0, 0.0, 0));
        Arc::new(MachineSpec {
            machine_number: 2,
            name: "burst".into(),
            target_hop: 1,
            side: Side::Origin,
            conditions: Conditions::default(),
            states: vec![start, end],
            should_negotiate_end: true,
            keep_circuit_alive: false,
            overhead: OverheadCaps::default(),
        })
    }

    #[test]
    fn length_budget_of_three_fires_three_times_then_ends() {
        let mut rt = Runtime::new(burst_spec(3));
        let mut rng = testing_rng();
        let mut now = Instant::now();
        let mut outcome = rt.start(&mut rng, now).unwrap();
        let mut fires = 0;
        loop {
            match outcome {
                Outcome::ArmTimer(d) => {
                    now += d;
                    fires += 1;
                    outcome = rt.fire_sent(now, &mut rng).unwrap();
                }
                Outcome::Shutdown => break,
                Outcome::Idle => panic!("burst machine should never go idle before shutdown"),
            }
        }
        assert_eq!(fires, 3);
    }

    #[test]
    fn zero_length_budget_raises_length_count_without_arming() {
        let mut rt = Runtime::new(burst_spec(0));
        let mut rng = testing_rng();
        let now = Instant::now();
        let outcome = rt.start(&mut rng, now).unwrap();
        assert_eq!(outcome, Outcome::Shutdown);
    }

    fn histogram_spec() -> Arc<MachineSpec> {
        let hist = Histogram::new(
            vec![0, 2000, 4000, u64::MAX],
            vec![2, 2, 0, 0],
            TokenRemoval::Exact,
        )
        .unwrap();
        let start = State::from_histogram(hist).on(Event::BinsEmpty, 1);
        let end = State::from_dist(Dist::new(DistKind::Uniform, 0.0, 0.0, 0));
        Arc::new(MachineSpec {
            machine_number: 3,
            name: "hist".into(),
            target_hop: 1,
            side: Side::Origin,
            conditions: Conditions::default(),
            states: vec![start, end],
            should_negotiate_end: true,
            keep_circuit_alive: false,
            overhead: OverheadCaps::default(),
        })
    }

    #[test]
    fn histogram_machine_eventually_exhausts_and_ends() {
        let mut rt = Runtime::new(histogram_spec());
        let mut rng = testing_rng();
        let mut now = Instant::now();
        let mut outcome = rt.start(&mut rng, now).unwrap();
        let mut guard = 0;
        loop {
            guard += 1;
            assert!(guard < 1000, "histogram machine did not terminate");
            match outcome {
                Outcome::ArmTimer(d) => {
                    now += d;
                    outcome = rt.fire_sent(now, &mut rng).unwrap();
                }
                Outcome::Idle => panic!("should reach BinsEmpty, not go idle"),
                Outcome::Shutdown => break,
            }
        }
        assert_eq!(rt.state(), 1);
    }

    #[test]
    fn nonpadding_round_trip_sets_rtt_estimate() {
        let mut rt = Runtime::new(ping_pong_spec());
        let mut rng = testing_rng();
        let t0 = Instant::now();
        rt.start(&mut rng, t0).unwrap();
        rt.on_cell(Event::NonpaddingSent, t0, &mut rng).unwrap();
        rt.on_cell(
            Event::NonpaddingRecv,
            t0 + Duration::from_millis(40),
            &mut rng,
        )
        .unwrap();
        assert_eq!(rt.rtt, Some(Duration::from_millis(40)));
    }

    #[test]
    fn suppressed_fire_does_not_advance_state_but_resamples_timer() {
        let mut rt = Runtime::new(ping_pong_spec());
        let mut rng = testing_rng();
        let now = Instant::now();
        rt.start(&mut rng, now).unwrap();
        let outcome = rt.fire_suppressed(now + Duration::from_micros(5000), &mut rng).unwrap();
        assert_eq!(outcome, Outcome::ArmTimer(Duration::from_micros(5000)));
        assert_eq!(rt.state(), 0);
    }
}
