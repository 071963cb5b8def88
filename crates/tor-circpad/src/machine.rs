//! Machine specifications: states, events, and next-state tables (§3, §4.B).

use strum::EnumCount;

use crate::dist::Dist;
use crate::err::Error;
use crate::hist::Histogram;

/// A cell or machine-internal event that can drive a state transition
/// (§3 "Events (enumeration)").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::EnumCount, strum::FromRepr)]
#[repr(usize)]
pub enum Event {
    /// A non-padding cell was sent.
    NonpaddingSent,
    /// A non-padding cell was received.
    NonpaddingRecv,
    /// A padding cell was sent.
    PaddingSent,
    /// A padding cell was received.
    PaddingRecv,
    /// The timing source sampled its infinity sentinel.
    Infinity,
    /// A histogram's real bins are all at zero tokens.
    BinsEmpty,
    /// A state's per-visit length budget reached zero.
    LengthCount,
}

/// Which side of the circuit a machine runs on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Side {
    /// Runs at the circuit's origin (the client).
    Origin,
    /// Runs at the target relay hop.
    Relay,
}

/// Index of a [`State`] within its owning [`MachineSpec`].
pub type StateIdx = usize;

/// A state's timing source: exactly one of a parametric distribution or a
/// token histogram (§3 State).
#[derive(Debug, Clone)]
pub enum Timing {
    /// Sample from a parameterized distribution.
    Dist(Dist),
    /// Sample from, and mutate, a token histogram.
    Histogram(Histogram),
}

/// One state of a [`MachineSpec`] (§3 State).
#[derive(Debug, Clone)]
pub struct State {
    /// This state's timing source.
    pub timing: Timing,
    /// Optional length distribution sampled on entry; `None` means
    /// unlimited padding while in this state.
    pub length_dist: Option<Dist>,
    /// Next-state table, indexed by [`Event`]. `None` entries mean "no
    /// change".
    pub next_state: [Option<StateIdx>; Event::COUNT],
}

impl State {
    /// Construct a state with a distribution timing source and no
    /// transitions (callers fill in `next_state` afterward).
    pub fn from_dist(dist: Dist) -> Self {
        State {
            timing: Timing::Dist(dist),
            length_dist: None,
            next_state: [None; Event::COUNT],
        }
    }

    /// Construct a state with a histogram timing source and no
    /// transitions.
    pub fn from_histogram(hist: Histogram) -> Self {
        State {
            timing: Timing::Histogram(hist),
            length_dist: None,
            next_state: [None; Event::COUNT],
        }
    }

    /// Set the next state for `event`.
    pub fn on(mut self, event: Event, target: StateIdx) -> Self {
        self.next_state[event as usize] = Some(target);
        self
    }

    /// Set the per-visit length distribution.
    pub fn with_length(mut self, length_dist: Dist) -> Self {
        self.length_dist = Some(length_dist);
        self
    }

    /// True if this state has no outgoing transitions (§3 invariant I6:
    /// reaching such a state causes shutdown).
    pub fn is_terminal(&self) -> bool {
        self.next_state.iter().all(Option::is_none)
    }
}

/// Per-machine overhead caps (§3 MachineSpec, §4.I).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OverheadCaps {
    /// Absolute padding cells allowed before the percentage cap applies.
    pub allowed_burst: u64,
    /// Maximum padding percentage of this machine's own cells, `0..=100`.
    pub max_percent: u8,
}

impl Default for OverheadCaps {
    fn default() -> Self {
        OverheadCaps {
            allowed_burst: 5000,
            max_percent: 1,
        }
    }
}

/// Bits describing circuit lifecycle state a machine's conditions may
/// require (§4.F `state_mask`).
bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct CircuitStateMask: u8 {
        /// Circuit has at least one attached stream.
        const HAS_STREAMS = 1 << 0;
        /// Circuit has no attached streams.
        const NO_STREAMS = 1 << 1;
        /// Circuit still has RELAY_EARLY cells available.
        const HAS_RELAY_EARLY = 1 << 2;
        /// Circuit has exhausted its RELAY_EARLY allowance.
        const NO_RELAY_EARLY = 1 << 3;
        /// Circuit has finished building (reached its target length).
        const OPENED = 1 << 4;
    }
}

/// Bits describing circuit purpose a machine's conditions may require
/// (§4.F `purpose_mask`).
bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct PurposeMask: u16 {
        /// General-purpose client circuit.
        const GENERAL = 1 << 0;
        /// Circuit used to reach a hidden/onion service.
        const HS_SERVICE = 1 << 1;
        /// Circuit used to reach an introduction point.
        const HS_INTRO = 1 << 2;
        /// Circuit used to reach a rendezvous point.
        const HS_REND = 1 << 3;
        /// Circuit built for directory fetches.
        const DIRECTORY = 1 << 4;
    }
}

/// Conditions a circuit must satisfy for a machine to be activated on it
/// (§4.F).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Conditions {
    /// Minimum circuit length, in hops.
    pub min_hops: u8,
    /// All set bits must be matched by the circuit's current state.
    pub state_mask: CircuitStateMask,
    /// All set bits must be matched by the circuit's purpose.
    pub purpose_mask: PurposeMask,
    /// Whether the circuit must be vanguard-selected.
    pub requires_vanguards: bool,
    /// Whether the circuit must use a reduced exit policy.
    pub reduced_exit_policy: bool,
    /// Whether the circuit must end at an exit-capable relay.
    pub requires_exit: bool,
}

impl Default for Conditions {
    fn default() -> Self {
        Conditions {
            min_hops: 0,
            state_mask: CircuitStateMask::empty(),
            purpose_mask: PurposeMask::empty(),
            requires_vanguards: false,
            reduced_exit_policy: false,
            requires_exit: false,
        }
    }
}

/// An immutable, process-global machine specification (§3 "Machine
/// specification").
#[derive(Debug, Clone)]
pub struct MachineSpec {
    /// Stable identifying number, matched over the wire (§4.H).
    pub machine_number: u8,
    /// Human-readable name, used only in logs.
    pub name: String,
    /// Which hop (counted from the originating endpoint) this machine
    /// targets.
    pub target_hop: u8,
    /// Which side of the circuit this spec is meant to run on.
    pub side: Side,
    /// Activation conditions.
    pub conditions: Conditions,
    /// Ordered states; state 0 is the initial state.
    pub states: Vec<State>,
    /// Whether ending this machine should send a `NEGOTIATE(STOP)`.
    pub should_negotiate_end: bool,
    /// Whether the circuit should be kept open while this machine runs,
    /// even if it would otherwise be idle-closed.
    pub keep_circuit_alive: bool,
    /// This machine's own overhead caps.
    pub overhead: OverheadCaps,
}

impl MachineSpec {
    /// Validate this specification (§7 category 1, "Specification errors").
    ///
    /// Checked at registration time; a failure here is fatal at startup.
    pub fn validate(&self) -> Result<(), Error> {
        if self.states.is_empty() {
            return Err(Error::InvalidSpec(format!(
                "machine {} has no states",
                self.machine_number
            )));
        }
        for (idx, state) in self.states.iter().enumerate() {
            for target in state.next_state.iter().flatten() {
                if *target >= self.states.len() {
                    return Err(Error::InvalidSpec(format!(
                        "machine {} state {idx} transitions to out-of-range state {target}",
                        self.machine_number
                    )));
                }
            }
        }
        if !self.states.iter().any(State::is_terminal) {
            return Err(Error::InvalidSpec(format!(
                "machine {} has no terminal (end) state",
                self.machine_number
            )));
        }
        Ok(())
    }

    /// Index of this machine's initial state.
    pub fn initial_state(&self) -> StateIdx {
        0
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use crate::dist::DistKind;

    fn ping_machine() -> MachineSpec {
        let start = State::from_dist(Dist::new(DistKind::Uniform, 5000.0, 5000.0, 10_000))
            .on(Event::PaddingSent, 1);
        let end = State::from_dist(Dist::new(DistKind::Uniform, 0.0, 0.0, 0));
        MachineSpec {
            machine_number: 1,
            name: "ping".into(),
            target_hop: 2,
            side: Side::Origin,
            conditions: Conditions::default(),
            states: vec![start, end],
            should_negotiate_end: true,
            keep_circuit_alive: false,
            overhead: OverheadCaps::default(),
        }
    }

    #[test]
    fn valid_machine_passes() {
        ping_machine().validate().unwrap();
    }

    #[test]
    fn out_of_range_transition_is_rejected() {
        let mut m = ping_machine();
        m.states[0].next_state[Event::PaddingSent as usize] = Some(9);
        assert!(m.validate().is_err());
    }

    #[test]
    fn machine_with_no_terminal_state_is_rejected() {
        let mut m = ping_machine();
        m.states[1] = m.states[1].clone().on(Event::PaddingSent, 0);
        assert!(m.validate().is_err());
    }

    #[test]
    fn terminal_state_has_no_transitions() {
        let m = ping_machine();
        assert!(m.states[1].is_terminal());
        assert!(!m.states[0].is_terminal());
    }
}
