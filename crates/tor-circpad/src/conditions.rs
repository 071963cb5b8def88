//! Conditions evaluator (§4.F).

use crate::circuit::CircuitSnapshot;
use crate::machine::Conditions;

/// Evaluate `conditions` against a circuit snapshot.
///
/// Returns the boolean AND of every specified predicate. This function is
/// referentially transparent with respect to the snapshot passed in: it
/// performs no I/O and has no side effects.
pub fn evaluate(conditions: &Conditions, circuit: &dyn CircuitSnapshot) -> bool {
    if circuit.hop_count() < conditions.min_hops {
        return false;
    }
    if !conditions.state_mask.is_empty()
        && !circuit.state_mask().intersects(conditions.state_mask)
    {
        return false;
    }
    if !conditions.purpose_mask.is_empty()
        && !circuit.purpose_mask().intersects(conditions.purpose_mask)
    {
        return false;
    }
    if conditions.requires_vanguards && !circuit.uses_vanguards() {
        return false;
    }
    if conditions.reduced_exit_policy && !circuit.has_reduced_exit_policy() {
        return false;
    }
    if conditions.requires_exit && !circuit.exit_capable() {
        return false;
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::circuit::testing::FakeCircuit;
    use crate::machine::{CircuitStateMask, PurposeMask};

    #[test]
    fn default_conditions_always_match() {
        let c = FakeCircuit::default();
        assert!(evaluate(&Conditions::default(), &c));
    }

    #[test]
    fn min_hops_is_enforced() {
        let mut conds = Conditions::default();
        conds.min_hops = 3;
        let mut c = FakeCircuit::default();
        c.hop_count = 2;
        assert!(!evaluate(&conds, &c));
        c.hop_count = 3;
        assert!(evaluate(&conds, &c));
    }

    #[test]
    fn state_mask_requires_intersection() {
        let mut conds = Conditions::default();
        conds.state_mask = CircuitStateMask::HAS_STREAMS;
        let mut c = FakeCircuit::default();
        c.state_mask = CircuitStateMask::NO_STREAMS;
        assert!(!evaluate(&conds, &c));
        c.state_mask = CircuitStateMask::HAS_STREAMS | CircuitStateMask::OPENED;
        assert!(evaluate(&conds, &c));
    }

    #[test]
    fn purpose_mask_requires_intersection() {
        let mut conds = Conditions::default();
        conds.purpose_mask = PurposeMask::HS_SERVICE;
        let mut c = FakeCircuit::default();
        c.purpose_mask = PurposeMask::GENERAL;
        assert!(!evaluate(&conds, &c));
    }

    #[test]
    fn vanguard_and_exit_flags_are_enforced() {
        let mut conds = Conditions::default();
        conds.requires_vanguards = true;
        conds.requires_exit = true;
        let mut c = FakeCircuit::default();
        assert!(!evaluate(&conds, &c));
        c.uses_vanguards = true;
        assert!(!evaluate(&conds, &c));
        c.exit_capable = true;
        assert!(evaluate(&conds, &c));
    }
}
