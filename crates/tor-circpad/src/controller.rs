//! Activation controller: slot bindings, lifecycle reconciliation, and
//! the negotiation request/response flow (§4.G, §4.H).

use std::sync::Arc;
use std::time::{Duration, Instant};

use rand::Rng;
use tor_cell::relaycell::RelayCmd;

use crate::circuit::{CircuitSnapshot, PaddingTransport};
use crate::conditions;
use crate::config::Config;
use crate::err::Error;
use crate::machine::{Event, MachineSpec, Side};
use crate::negotiate::{
    MachineType, NegotiateCmd, Negotiated, NEGOTIATION_VERSION, Negotiate, ResponseCode,
};
use crate::overhead::OverheadGovernor;
use crate::registry::Registry;
use crate::runtime::{Outcome, Phase, Runtime};
use crate::scheduler::{Clock, SystemClock};

/// How long a slot waits for a `NEGOTIATED(STOP)` confirmation before
/// the controller clears it unconditionally (§3 "shutdown grace",
/// an Open Question this crate resolves fixed rather than RTT-scaled;
/// see DESIGN.md).
pub const STOP_GRACE: Duration = Duration::from_secs(5);

/// Whether an [`Engine`] runs at the circuit's origin (sends
/// `NEGOTIATE`, drives conditions against local circuit state) or at a
/// target relay hop (answers inbound `NEGOTIATE` requests).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Drives origin-side machines: evaluates conditions itself and
    /// initiates negotiation.
    Origin,
    /// Answers negotiation requests for relay-side machines.
    Relay,
}

/// One of a circuit's two machine slots (§3 "Circuit slot binding").
///
/// A slot pairs an immutable spec reference with an optional runtime;
/// the spec reference outlives the runtime during shutdown grace so
/// stray incoming padding cells remain attributable to a known machine
/// (§3 invariant I1).
#[derive(Debug, Clone, Default)]
struct Slot {
    spec: Option<Arc<MachineSpec>>,
    runtime: Option<Runtime>,
    next_ctr: u32,
    pending_ctr: Option<u32>,
    stop_deadline: Option<Instant>,
}

impl Slot {
    /// Whether this slot can take a new machine: either genuinely unbound,
    /// or its runtime is already awaiting a STOP confirmation.
    ///
    /// A slot in [`Phase::AwaitingStop`] may be replaced immediately
    /// without waiting for the peer's `NEGOTIATED` reply (§3
    /// "Replacement"); the old runtime is simply dropped and the stale
    /// reply, once it arrives, is rejected by the ctr-mismatch or
    /// no-such-slot path in [`Engine::handle_negotiated`].
    fn is_available(&self) -> bool {
        self.spec.is_none()
            || self
                .runtime
                .as_ref()
                .is_some_and(|rt| rt.phase == Phase::AwaitingStop)
    }

    fn take_ctr(&mut self) -> u32 {
        let ctr = self.next_ctr;
        self.next_ctr = self.next_ctr.wrapping_add(1);
        ctr
    }

    fn clear(&mut self) {
        self.spec = None;
        self.runtime = None;
        self.pending_ctr = None;
        self.stop_deadline = None;
    }
}

/// The per-circuit engine: two slots, a machine registry, and an
/// overhead governor, driven by lifecycle events, cell events, timer
/// fires, and negotiation messages (§4.G, §4.H).
#[derive(Debug)]
pub struct Engine<CL: Clock = SystemClock> {
    role: Role,
    registry: Registry,
    overhead: OverheadGovernor,
    slots: [Slot; 2],
    clock: CL,
    config: Config,
}

impl<CL: Clock> Engine<CL> {
    /// Construct an engine for `role`, owning `registry` and enforcing
    /// `global_caps` across both slots, subject to `config`'s developer
    /// overrides (§6.3, §10.4). `config.overhead_override`, when set,
    /// replaces `global_caps` entirely rather than being combined with it.
    pub fn new(
        role: Role,
        registry: Registry,
        config: Config,
        global_caps: crate::machine::OverheadCaps,
        clock: CL,
    ) -> Self {
        let caps = config.overhead_override.unwrap_or(global_caps);
        Engine {
            role,
            registry,
            overhead: OverheadGovernor::new(caps),
            slots: [Slot::default(), Slot::default()],
            clock,
            config,
        }
    }

    /// Current global `(padding_sent, total_sent)` counts, for
    /// diagnostics (P4, P5).
    pub fn global_counts(&self) -> (u64, u64) {
        self.overhead.global_counts()
    }

    fn is_installed(&self, number: u8) -> bool {
        self.slots
            .iter()
            .any(|s| s.spec.as_ref().is_some_and(|sp| sp.machine_number == number))
    }

    fn find_slot_by_number(&self, number: u8) -> Option<usize> {
        self.slots
            .iter()
            .position(|s| s.spec.as_ref().is_some_and(|sp| sp.machine_number == number))
    }

    fn free_slot(&self) -> Option<usize> {
        self.slots.iter().position(Slot::is_available)
    }

    /// Reconcile this side's slots against the circuit's current state
    /// (§4.G steps 1-2). Call on every lifecycle event (hop added,
    /// circuit built, purpose changed, RELAY_EARLY exhausted, streams
    /// attached/detached).
    ///
    /// Only meaningful for [`Role::Origin`] engines: relay-side
    /// activation is entirely request-driven, via
    /// [`Engine::handle_negotiate`].
    pub fn reconcile<R: Rng + ?Sized>(
        &mut self,
        circuit: &dyn CircuitSnapshot,
        transport: &mut dyn PaddingTransport,
        rng: &mut R,
    ) -> Result<(), Error> {
        if self.role != Role::Origin {
            return Ok(());
        }
        let now = self.clock.now();

        for idx in 0..self.slots.len() {
            let should_stop = match (&self.slots[idx].spec, &self.slots[idx].runtime) {
                (Some(spec), Some(rt)) if rt.phase == Phase::Active => {
                    !conditions::evaluate(&spec.conditions, circuit)
                }
                _ => false,
            };
            if should_stop {
                self.begin_stop(idx, transport);
            }
        }

        if !self.config.padding_enabled {
            return Ok(());
        }

        for idx in 0..self.slots.len() {
            if !self.slots[idx].is_available() {
                continue;
            }
            let candidate = self
                .registry
                .activation_order(Side::Origin)
                .find(|spec| {
                    !self.is_installed(spec.machine_number)
                        && conditions::evaluate(&spec.conditions, circuit)
                        && (self.config.ignore_support_advertisement
                            || circuit.hop_supports_machine(spec.target_hop, spec.machine_number))
                })
                .cloned();
            if let Some(spec) = candidate {
                self.activate(idx, spec, transport, rng, now)?;
            }
        }
        Ok(())
    }

    /// Install `spec` into slot `idx`: sample the initial state's delay
    /// optimistically (§10.6), then send `NEGOTIATE(START)`.
    fn activate<R: Rng + ?Sized>(
        &mut self,
        idx: usize,
        spec: Arc<MachineSpec>,
        transport: &mut dyn PaddingTransport,
        rng: &mut R,
        now: Instant,
    ) -> Result<(), Error> {
        let mut rt = Runtime::new(spec.clone());
        rt.start(rng, now)?;

        let slot = &mut self.slots[idx];
        if slot.spec.is_some() {
            tracing::debug!(
                machine = spec.machine_number,
                "replacing a slot still awaiting its STOP confirmation"
            );
        }
        slot.clear();
        let ctr = slot.take_ctr();
        slot.pending_ctr = Some(ctr);
        slot.spec = Some(spec.clone());
        slot.runtime = Some(rt);

        let msg = Negotiate {
            version: NEGOTIATION_VERSION,
            command: NegotiateCmd::START,
            machine_type: side_to_machine_type(spec.side),
            machine_number: spec.machine_number,
            machine_ctr: ctr,
        };
        let body = msg.encode().map_err(|_| {
            Error::Bug(tor_error::internal!("could not encode NEGOTIATE(START)").into())
        })?;
        transport.send_negotiation_cell(spec.target_hop, RelayCmd::PADDING_NEGOTIATE, body);
        tracing::debug!(
            hop = spec.target_hop,
            machine = spec.machine_number,
            ctr,
            "sent NEGOTIATE(START)"
        );
        Ok(())
    }

    /// Begin tearing down an active slot: move its runtime into
    /// [`Phase::AwaitingStop`], send `NEGOTIATE(STOP)` if the spec asks
    /// for one, and arm the shutdown grace deadline (§4.G, §3 "Runtime").
    fn begin_stop(&mut self, idx: usize, transport: &mut dyn PaddingTransport) {
        let now = self.clock.now();
        let slot = &mut self.slots[idx];
        let Some(spec) = slot.spec.clone() else { return };
        let Some(rt) = &mut slot.runtime else { return };
        if rt.phase == Phase::AwaitingStop {
            return;
        }
        rt.request_stop();

        if spec.should_negotiate_end {
            let ctr = slot.take_ctr();
            slot.pending_ctr = Some(ctr);
            let msg = Negotiate {
                version: NEGOTIATION_VERSION,
                command: NegotiateCmd::STOP,
                machine_type: side_to_machine_type(spec.side),
                machine_number: spec.machine_number,
                machine_ctr: ctr,
            };
            if let Ok(body) = msg.encode() {
                transport.send_negotiation_cell(spec.target_hop, RelayCmd::PADDING_NEGOTIATE, body);
                tracing::debug!(
                    hop = spec.target_hop,
                    machine = spec.machine_number,
                    ctr,
                    "sent NEGOTIATE(STOP)"
                );
            }
        }
        slot.stop_deadline = Some(now + STOP_GRACE);
    }

    /// Clear any slot whose `STOP_GRACE` deadline has elapsed without a
    /// matching `NEGOTIATED` reply (§3 P6 "shutdown completeness").
    ///
    /// Callers should invoke this from the same periodic tick that
    /// drives [`Engine::fire_due_timers`].
    pub fn expire_stop_grace(&mut self) {
        let now = self.clock.now();
        for slot in &mut self.slots {
            if slot.stop_deadline.is_some_and(|deadline| now >= deadline) {
                if let Some(spec) = &slot.spec {
                    tracing::debug!(
                        machine = spec.machine_number,
                        "shutdown grace expired without a NEGOTIATED(STOP) reply"
                    );
                }
                slot.clear();
            }
        }
    }

    /// Process an inbound `NEGOTIATED` reply (§4.H, origin side only).
    ///
    /// A reply whose counter doesn't match the slot's outstanding
    /// request is a stale reply from a since-replaced machine and is
    /// dropped per protocol (§3 "Replacement"); this surfaces as
    /// [`Error::StaleNegotiated`] for observability but is not a
    /// protocol violation.
    pub fn handle_negotiated(&mut self, msg: Negotiated) -> Result<(), Error> {
        let Some(idx) = self.find_slot_by_number(msg.machine_number) else {
            tracing::debug!(machine = msg.machine_number, "dropping stale NEGOTIATED: no such slot");
            return Err(Error::StaleNegotiated(msg.machine_ctr));
        };
        let slot = &mut self.slots[idx];
        if slot.pending_ctr != Some(msg.machine_ctr) {
            tracing::debug!(
                machine = msg.machine_number,
                ctr = msg.machine_ctr,
                "dropping stale NEGOTIATED: counter mismatch"
            );
            return Err(Error::StaleNegotiated(msg.machine_ctr));
        }
        slot.pending_ctr = None;

        match msg.command {
            NegotiateCmd::START => {
                if msg.response_code != ResponseCode::SUCCESS {
                    slot.clear();
                    return Err(Error::NegotiationRefused(msg.response_code));
                }
                Ok(())
            }
            NegotiateCmd::STOP => {
                slot.clear();
                Ok(())
            }
            _ => Ok(()),
        }
    }

    /// Process an inbound `NEGOTIATE` request (§4.H, relay side only):
    /// evaluate the named machine's conditions against this circuit and
    /// return the response to send back.
    pub fn handle_negotiate<R: Rng + ?Sized>(
        &mut self,
        msg: Negotiate,
        circuit: &dyn CircuitSnapshot,
        rng: &mut R,
    ) -> Negotiated {
        let respond = |response_code| Negotiated {
            version: NEGOTIATION_VERSION,
            command: msg.command,
            machine_type: msg.machine_type,
            machine_number: msg.machine_number,
            machine_ctr: msg.machine_ctr,
            response_code,
        };

        if msg.version != NEGOTIATION_VERSION {
            return respond(ResponseCode::ERR_UNSUPPORTED_VERSION);
        }

        match msg.command {
            NegotiateCmd::START => {
                if !self.config.padding_enabled {
                    tracing::debug!(machine = msg.machine_number, "rejecting NEGOTIATE(START): padding disabled locally");
                    return respond(ResponseCode::ERR_NOT_APPLICABLE);
                }
                let Some(spec) = self.registry.lookup(Side::Relay, msg.machine_number) else {
                    tracing::debug!(machine = msg.machine_number, "rejecting NEGOTIATE(START): unknown machine");
                    return respond(ResponseCode::ERR_UNKNOWN_MACHINE);
                };
                if !conditions::evaluate(&spec.conditions, circuit) {
                    tracing::debug!(machine = msg.machine_number, "rejecting NEGOTIATE(START): conditions not met");
                    return respond(ResponseCode::ERR_NOT_APPLICABLE);
                }
                let Some(idx) = self.free_slot() else {
                    tracing::warn!(machine = msg.machine_number, "rejecting NEGOTIATE(START): both slots occupied");
                    return respond(ResponseCode::ERR_INTERNAL);
                };
                let now = self.clock.now();
                let mut rt = Runtime::new(spec.clone());
                if rt.start(rng, now).is_err() {
                    return respond(ResponseCode::ERR_INTERNAL);
                }
                if self.slots[idx].spec.is_some() {
                    tracing::debug!(
                        machine = msg.machine_number,
                        "replacing a slot still awaiting its STOP confirmation"
                    );
                }
                let slot = &mut self.slots[idx];
                slot.clear();
                slot.spec = Some(spec);
                slot.runtime = Some(rt);
                slot.pending_ctr = None;
                tracing::debug!(machine = msg.machine_number, "installed relay-side machine");
                respond(ResponseCode::SUCCESS)
            }
            NegotiateCmd::STOP => {
                if let Some(idx) = self.find_slot_by_number(msg.machine_number) {
                    self.slots[idx].clear();
                }
                respond(ResponseCode::SUCCESS)
            }
            _ => respond(ResponseCode::ERR_UNSUPPORTED_VERSION),
        }
    }

    /// Dispatch a cell event observed at hop `hop` to whichever slot's
    /// machine targets that hop (§4.D `on_cell`).
    ///
    /// A padding cell arriving on a slot with no spec reference is a
    /// protocol violation (§3 invariant I1); this function returns
    /// [`Error::UnexpectedPadding`] in that case without panicking.
    pub fn on_cell<R: Rng + ?Sized>(
        &mut self,
        hop: u8,
        event: Event,
        now: Instant,
        rng: &mut R,
        transport: &mut dyn PaddingTransport,
    ) -> Result<(), Error> {
        for idx in 0..self.slots.len() {
            let targets_hop = self.slots[idx]
                .spec
                .as_ref()
                .is_some_and(|s| s.target_hop == hop);
            if !targets_hop {
                continue;
            }
            if event == Event::NonpaddingSent {
                if let Some(rt) = &mut self.slots[idx].runtime {
                    self.overhead.record_nonpadding(&mut rt.counters);
                }
            }
            let shutdown = match &mut self.slots[idx].runtime {
                Some(rt) if rt.phase == Phase::Active => rt.on_cell(event, now, rng)? == Outcome::Shutdown,
                Some(_) => return Ok(()), // awaiting stop: ignore further cell events
                None if event == Event::PaddingRecv => {
                    tracing::warn!(hop, "padding cell received on a slot with no machine installed");
                    return Err(Error::UnexpectedPadding { hop });
                }
                None => return Ok(()),
            };
            if shutdown {
                self.begin_stop(idx, transport);
            }
            return Ok(());
        }
        Ok(())
    }

    /// For every slot whose timer is due, consult the overhead governor
    /// and either emit a padding cell or suppress it, continuing the
    /// cadence either way (§4.E, §4.I).
    pub fn fire_due_timers<R: Rng + ?Sized>(
        &mut self,
        transport: &mut dyn PaddingTransport,
        rng: &mut R,
    ) -> Result<(), Error> {
        let now = self.clock.now();
        for idx in 0..self.slots.len() {
            let (hop, due) = match (&self.slots[idx].spec, &self.slots[idx].runtime) {
                (Some(spec), Some(rt)) if rt.phase == Phase::Active && rt.timer_due(now) => {
                    (spec.target_hop, true)
                }
                _ => (0, false),
            };
            if !due {
                continue;
            }
            let allowed = {
                let rt = self.slots[idx].runtime.as_mut().expect("checked above");
                self.overhead.try_send_padding(&mut rt.counters)
            };
            let outcome = {
                let rt = self.slots[idx].runtime.as_mut().expect("checked above");
                if allowed {
                    transport.send_padding_cell(hop);
                    rt.fire_sent(now, rng)?
                } else {
                    tracing::trace!(hop, "padding cell suppressed by overhead governor");
                    rt.fire_suppressed(now, rng)?
                }
            };
            if outcome == Outcome::Shutdown {
                self.begin_stop(idx, transport);
            }
        }
        Ok(())
    }
}

fn side_to_machine_type(side: Side) -> MachineType {
    match side {
        Side::Origin => MachineType::CLIENT,
        Side::Relay => MachineType::RELAY,
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use crate::circuit::testing::{FakeCircuit, RecordingTransport};
    use crate::dist::{Dist, DistKind};
    use crate::machine::{CircuitStateMask, Conditions, OverheadCaps, State};
    use tor_basic_utils::test_rng::testing_rng;

    struct FixedClock(std::cell::Cell<Instant>);
    impl Clock for FixedClock {
        fn now(&self) -> Instant {
            self.0.get()
        }
    }
    impl FixedClock {
        fn new(now: Instant) -> Self {
            FixedClock(std::cell::Cell::new(now))
        }
        fn advance(&self, d: Duration) {
            self.0.set(self.0.get() + d);
        }
    }

    fn two_state_spec(number: u8, side: Side, target_hop: u8) -> MachineSpec {
        let start = State::from_dist(Dist::new(DistKind::Uniform, 1000.0, 1000.0, 10_000))
            .on(Event::PaddingSent, 1);
        let end = State::from_dist(Dist::new(DistKind::Uniform, 0.0, 0.0, 0));
        MachineSpec {
            machine_number: number,
            name: format!("m{number}"),
            target_hop,
            side,
            conditions: Conditions::default(),
            states: vec![start, end],
            should_negotiate_end: true,
            keep_circuit_alive: false,
            overhead: OverheadCaps::default(),
        }
    }

    #[test]
    fn reconcile_activates_a_matching_machine_and_sends_negotiate() {
        let mut registry = Registry::new();
        registry
            .register(two_state_spec(1, Side::Origin, 2))
            .unwrap();
        let clock = FixedClock::new(Instant::now());
        let mut engine = Engine::new(Role::Origin, registry, Config::default(), OverheadCaps::default(), clock);
        let circuit = FakeCircuit {
            hop_count: 3,
            hop_support: vec![vec![], vec![], vec![1]],
            ..Default::default()
        };
        let mut transport = RecordingTransport::default();
        let mut rng = testing_rng();

        engine
            .reconcile(&circuit, &mut transport, &mut rng)
            .unwrap();

        assert_eq!(transport.negotiation_sent.len(), 1);
        assert_eq!(transport.negotiation_sent[0].0, 2);
        assert!(engine.is_installed(1));
    }

    #[test]
    fn unsupported_hop_is_not_activated() {
        let mut registry = Registry::new();
        registry
            .register(two_state_spec(1, Side::Origin, 2))
            .unwrap();
        let clock = FixedClock::new(Instant::now());
        let mut engine = Engine::new(Role::Origin, registry, Config::default(), OverheadCaps::default(), clock);
        let circuit = FakeCircuit {
            hop_count: 3,
            ..Default::default()
        };
        let mut transport = RecordingTransport::default();
        let mut rng = testing_rng();

        engine
            .reconcile(&circuit, &mut transport, &mut rng)
            .unwrap();

        assert!(transport.negotiation_sent.is_empty());
        assert!(!engine.is_installed(1));
    }

    #[test]
    fn successful_negotiated_start_clears_pending_ctr() {
        let mut registry = Registry::new();
        registry
            .register(two_state_spec(1, Side::Origin, 1))
            .unwrap();
        let clock = FixedClock::new(Instant::now());
        let mut engine = Engine::new(Role::Origin, registry, Config::default(), OverheadCaps::default(), clock);
        let circuit = FakeCircuit {
            hop_count: 2,
            hop_support: vec![vec![1], vec![1]],
            ..Default::default()
        };
        let mut transport = RecordingTransport::default();
        let mut rng = testing_rng();
        engine
            .reconcile(&circuit, &mut transport, &mut rng)
            .unwrap();

        engine
            .handle_negotiated(Negotiated {
                version: NEGOTIATION_VERSION,
                command: NegotiateCmd::START,
                machine_type: MachineType::CLIENT,
                machine_number: 1,
                machine_ctr: 0,
                response_code: ResponseCode::SUCCESS,
            })
            .unwrap();

        assert!(engine.is_installed(1));
    }

    #[test]
    fn refused_negotiation_tears_down_the_optimistic_runtime() {
        let mut registry = Registry::new();
        registry
            .register(two_state_spec(1, Side::Origin, 1))
            .unwrap();
        let clock = FixedClock::new(Instant::now());
        let mut engine = Engine::new(Role::Origin, registry, Config::default(), OverheadCaps::default(), clock);
        let circuit = FakeCircuit {
            hop_count: 2,
            hop_support: vec![vec![1], vec![1]],
            ..Default::default()
        };
        let mut transport = RecordingTransport::default();
        let mut rng = testing_rng();
        engine
            .reconcile(&circuit, &mut transport, &mut rng)
            .unwrap();

        let result = engine.handle_negotiated(Negotiated {
            version: NEGOTIATION_VERSION,
            command: NegotiateCmd::START,
            machine_type: MachineType::CLIENT,
            machine_number: 1,
            machine_ctr: 0,
            response_code: ResponseCode::ERR_NOT_APPLICABLE,
        });

        assert!(result.is_err());
        assert!(!engine.is_installed(1));
    }

    #[test]
    fn stale_ctr_is_dropped_without_disturbing_the_slot() {
        let mut registry = Registry::new();
        registry
            .register(two_state_spec(1, Side::Origin, 1))
            .unwrap();
        let clock = FixedClock::new(Instant::now());
        let mut engine = Engine::new(Role::Origin, registry, Config::default(), OverheadCaps::default(), clock);
        let circuit = FakeCircuit {
            hop_count: 2,
            hop_support: vec![vec![1], vec![1]],
            ..Default::default()
        };
        let mut transport = RecordingTransport::default();
        let mut rng = testing_rng();
        engine
            .reconcile(&circuit, &mut transport, &mut rng)
            .unwrap();

        let result = engine.handle_negotiated(Negotiated {
            version: NEGOTIATION_VERSION,
            command: NegotiateCmd::START,
            machine_type: MachineType::CLIENT,
            machine_number: 1,
            machine_ctr: 99,
            response_code: ResponseCode::SUCCESS,
        });

        assert!(result.is_err());
        assert!(engine.is_installed(1));
    }

    #[test]
    fn conditions_failure_sends_stop_and_grace_expiry_clears_the_slot() {
        let mut registry = Registry::new();
        let mut spec = two_state_spec(1, Side::Origin, 1);
        spec.conditions.min_hops = 1;
        registry.register(spec).unwrap();
        let clock = FixedClock::new(Instant::now());
        let mut engine = Engine::new(Role::Origin, registry, Config::default(), OverheadCaps::default(), clock);
        let mut circuit = FakeCircuit {
            hop_count: 2,
            hop_support: vec![vec![1], vec![1]],
            ..Default::default()
        };
        let mut transport = RecordingTransport::default();
        let mut rng = testing_rng();
        engine
            .reconcile(&circuit, &mut transport, &mut rng)
            .unwrap();
        assert!(engine.is_installed(1));

        circuit.hop_count = 0;
        engine
            .reconcile(&circuit, &mut transport, &mut rng)
            .unwrap();
        // Spec reference remains during grace (I1); two NEGOTIATE cells
        // have been sent (START then STOP).
        assert!(engine.is_installed(1));
        assert_eq!(transport.negotiation_sent.len(), 2);

        engine.clock.advance(STOP_GRACE + Duration::from_secs(1));
        engine.expire_stop_grace();
        assert!(!engine.is_installed(1));
    }

    #[test]
    fn replacement_installs_into_a_slot_still_awaiting_stop() {
        let mut registry = Registry::new();
        let mut machine_a = two_state_spec(1, Side::Origin, 1);
        machine_a.conditions.state_mask = CircuitStateMask::HAS_STREAMS;
        registry.register(machine_a).unwrap();
        registry.register(two_state_spec(2, Side::Origin, 1)).unwrap();
        let mut machine_c = two_state_spec(3, Side::Origin, 1);
        machine_c.conditions.state_mask = CircuitStateMask::NO_STREAMS;
        registry.register(machine_c).unwrap();

        let clock = FixedClock::new(Instant::now());
        let mut engine = Engine::new(Role::Origin, registry, Config::default(), OverheadCaps::default(), clock);
        let mut circuit = FakeCircuit {
            hop_count: 2,
            state_mask: CircuitStateMask::HAS_STREAMS,
            hop_support: vec![vec![1, 2, 3], vec![1, 2, 3]],
            ..Default::default()
        };
        let mut transport = RecordingTransport::default();
        let mut rng = testing_rng();

        // Both slots fill: machine 1 (stream-gated) and machine 2 (always on).
        engine.reconcile(&circuit, &mut transport, &mut rng).unwrap();
        assert!(engine.is_installed(1));
        assert!(engine.is_installed(2));
        assert_eq!(transport.negotiation_sent.len(), 2);

        // Losing the stream stops machine 1 (entering its grace period) and
        // makes machine 3 eligible; it should take over machine 1's slot
        // immediately rather than waiting for NEGOTIATED(STOP).
        circuit.state_mask = CircuitStateMask::NO_STREAMS;
        engine.reconcile(&circuit, &mut transport, &mut rng).unwrap();

        assert!(!engine.is_installed(1), "machine 1 was replaced, not merely stopped");
        assert!(engine.is_installed(2), "the untouched slot is unaffected");
        assert!(engine.is_installed(3), "machine 3 took over the vacated slot");
        assert_eq!(
            transport.negotiation_sent.len(),
            4,
            "2 initial starts, machine 1's STOP, then machine 3's START"
        );

        // A late NEGOTIATED reply for the replaced machine is stale: its
        // slot no longer references machine 1 at all.
        let result = engine.handle_negotiated(Negotiated {
            version: NEGOTIATION_VERSION,
            command: NegotiateCmd::STOP,
            machine_type: MachineType::CLIENT,
            machine_number: 1,
            machine_ctr: 1,
            response_code: ResponseCode::SUCCESS,
        });
        assert!(result.is_err());
        assert!(engine.is_installed(3), "the stale reply must not disturb the replacement");
    }

    #[test]
    fn relay_side_accepts_start_and_installs_a_runtime() {
        let mut registry = Registry::new();
        registry
            .register(two_state_spec(5, Side::Relay, 0))
            .unwrap();
        let clock = FixedClock::new(Instant::now());
        let mut engine = Engine::new(Role::Relay, registry, Config::default(), OverheadCaps::default(), clock);
        let circuit = FakeCircuit::default();
        let mut rng = testing_rng();

        let reply = engine.handle_negotiate(
            Negotiate {
                version: NEGOTIATION_VERSION,
                command: NegotiateCmd::START,
                machine_type: MachineType::RELAY,
                machine_number: 5,
                machine_ctr: 0,
            },
            &circuit,
            &mut rng,
        );

        assert_eq!(reply.response_code, ResponseCode::SUCCESS);
        assert!(engine.is_installed(5));
    }

    #[test]
    fn relay_side_rejects_unknown_machine() {
        let registry = Registry::new();
        let clock = FixedClock::new(Instant::now());
        let mut engine = Engine::new(Role::Relay, registry, Config::default(), OverheadCaps::default(), clock);
        let circuit = FakeCircuit::default();
        let mut rng = testing_rng();

        let reply = engine.handle_negotiate(
            Negotiate {
                version: NEGOTIATION_VERSION,
                command: NegotiateCmd::START,
                machine_type: MachineType::RELAY,
                machine_number: 9,
                machine_ctr: 0,
            },
            &circuit,
            &mut rng,
        );

        assert_eq!(reply.response_code, ResponseCode::ERR_UNKNOWN_MACHINE);
    }

    #[test]
    fn fire_due_timers_emits_padding_and_advances_the_machine() {
        let mut registry = Registry::new();
        registry
            .register(two_state_spec(1, Side::Origin, 1))
            .unwrap();
        let clock = FixedClock::new(Instant::now());
        let mut engine = Engine::new(Role::Origin, registry, Config::default(), OverheadCaps::default(), clock);
        let circuit = FakeCircuit {
            hop_count: 2,
            hop_support: vec![vec![1], vec![1]],
            ..Default::default()
        };
        let mut transport = RecordingTransport::default();
        let mut rng = testing_rng();
        engine
            .reconcile(&circuit, &mut transport, &mut rng)
            .unwrap();

        engine.clock.advance(Duration::from_micros(1000));
        engine.fire_due_timers(&mut transport, &mut rng).unwrap();

        assert_eq!(transport.padding_sent, vec![1]);
    }
}
