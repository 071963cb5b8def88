//! Overhead governor: global and per-machine padding caps (§4.I).

use crate::machine::OverheadCaps;

/// One (padding, total) counter pair.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct Counters {
    /// Padding cells sent.
    padding: u64,
    /// All cells sent (padding and non-padding).
    total: u64,
}

impl Counters {
    /// Whether sending one more padding cell would violate `caps`
    /// (§3 invariant I4): suppression only kicks in once `allowed_burst`
    /// is exceeded, and only if the percentage cap would also be broken.
    fn would_exceed(&self, caps: &OverheadCaps) -> bool {
        let next_padding = self.padding + 1;
        let next_total = self.total + 1;
        if next_padding <= caps.allowed_burst {
            return false;
        }
        // 100 * p > max_percent * t, done in integer arithmetic to avoid
        // floating point drift near the threshold.
        100 * next_padding > caps.max_percent as u64 * next_total
    }

    fn record_padding(&mut self) {
        self.padding += 1;
        self.total += 1;
    }

    fn record_nonpadding(&mut self) {
        self.total += 1;
    }
}

/// Tracks padding-vs-total cell counts globally and per machine, and
/// decides whether a scheduled padding send should be suppressed
/// (§4.I, §3 invariant I4).
///
/// A send is suppressed if *either* the global or the owning machine's
/// local cap would be exceeded (§10.6), never delaying the send -- a
/// suppressed send simply emits nothing and the cadence continues with
/// the scheduler's next sample (§4.I).
#[derive(Debug, Clone, Default)]
pub struct OverheadGovernor {
    global: Counters,
    global_caps: OverheadCaps,
}

impl OverheadGovernor {
    /// Construct a governor with the given global caps.
    pub fn new(global_caps: OverheadCaps) -> Self {
        OverheadGovernor {
            global: Counters::default(),
            global_caps,
        }
    }

    /// Decide whether a padding send is allowed, and if so, record it
    /// against both the global and per-machine counters.
    ///
    /// `machine` is the owning machine's own counter pair and caps,
    /// tracked by the caller (one per active runtime).
    pub fn try_send_padding(&mut self, machine: &mut MachineCounters) -> bool {
        if self.global.would_exceed(&self.global_caps) || machine.counters.would_exceed(&machine.caps)
        {
            return false;
        }
        self.global.record_padding();
        machine.counters.record_padding();
        true
    }

    /// Record a non-padding cell against the global counters and the
    /// given machine's counters (token-removal and overhead accounting
    /// both observe all cells, not just padding).
    pub fn record_nonpadding(&mut self, machine: &mut MachineCounters) {
        self.global.record_nonpadding();
        machine.counters.record_nonpadding();
    }

    /// Current global `(padding_sent, total_sent)`, for diagnostics and
    /// property tests (P4, P5).
    pub fn global_counts(&self) -> (u64, u64) {
        (self.global.padding, self.global.total)
    }
}

/// Per-machine padding/total counters and caps, owned by each active
/// runtime (§3 Runtime instance).
#[derive(Debug, Clone, Default)]
pub struct MachineCounters {
    counters: Counters,
    caps: OverheadCaps,
}

impl MachineCounters {
    /// Construct fresh counters for a machine with the given caps.
    pub fn new(caps: OverheadCaps) -> Self {
        MachineCounters {
            counters: Counters::default(),
            caps,
        }
    }

    /// Current `(padding_sent, total_sent)` for this machine.
    pub fn counts(&self) -> (u64, u64) {
        (self.counters.padding, self.counters.total)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn caps(burst: u64, percent: u8) -> OverheadCaps {
        OverheadCaps {
            allowed_burst: burst,
            max_percent: percent,
        }
    }

    #[test]
    fn burst_allowance_is_never_suppressed() {
        let mut gov = OverheadGovernor::new(caps(10, 0));
        let mut m = MachineCounters::new(caps(10_000, 0));
        for _ in 0..10 {
            assert!(gov.try_send_padding(&mut m));
        }
    }

    #[test]
    fn global_cap_suppresses_after_burst_when_percent_violated() {
        let mut gov = OverheadGovernor::new(caps(10, 5));
        let mut m = MachineCounters::new(caps(10_000, 100));
        for _ in 0..10 {
            assert!(gov.try_send_padding(&mut m));
        }
        // 11th padding cell with zero non-padding traffic: 100% > 5%.
        assert!(!gov.try_send_padding(&mut m));
    }

    #[test]
    fn nonpadding_traffic_reopens_the_budget() {
        let mut gov = OverheadGovernor::new(caps(10, 5));
        let mut m = MachineCounters::new(caps(10_000, 100));
        for _ in 0..10 {
            assert!(gov.try_send_padding(&mut m));
        }
        assert!(!gov.try_send_padding(&mut m));
        for _ in 0..200 {
            gov.record_nonpadding(&mut m);
        }
        assert!(gov.try_send_padding(&mut m));
        let (p, t) = gov.global_counts();
        assert!(100 * p <= 5 * t);
    }

    #[test]
    fn per_machine_cap_is_independent_of_global() {
        let mut gov = OverheadGovernor::new(caps(10_000, 100));
        let mut m = MachineCounters::new(caps(3, 0));
        assert!(gov.try_send_padding(&mut m));
        assert!(gov.try_send_padding(&mut m));
        assert!(gov.try_send_padding(&mut m));
        assert!(!gov.try_send_padding(&mut m));
    }
}
