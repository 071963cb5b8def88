//! The machine specification registry (§4.B).

use std::sync::Arc;

use crate::err::Error;
use crate::machine::{MachineSpec, Side};

/// Owns the immutable catalog of machine specifications for one side
/// (origin or relay).
///
/// Registration appends; lookup by `machine_number` is constant-time via
/// linear scan over what is expected to be a small table. Activation
/// iterates in reverse registration order (§3 invariant I5).
#[derive(Debug, Clone, Default)]
pub struct Registry {
    origin: Vec<Arc<MachineSpec>>,
    relay: Vec<Arc<MachineSpec>>,
}

impl Registry {
    /// Construct an empty registry.
    pub fn new() -> Self {
        Registry::default()
    }

    /// Register a machine specification, validating it first.
    ///
    /// Returns [`Error::InvalidSpec`] if validation fails; the registry is
    /// left unchanged in that case.
    pub fn register(&mut self, spec: MachineSpec) -> Result<(), Error> {
        spec.validate()?;
        let side = spec.side;
        let list = match side {
            Side::Origin => &mut self.origin,
            Side::Relay => &mut self.relay,
        };
        list.push(Arc::new(spec));
        Ok(())
    }

    /// Look up a machine specification by side and number.
    pub fn lookup(&self, side: Side, machine_number: u8) -> Option<Arc<MachineSpec>> {
        let list = match side {
            Side::Origin => &self.origin,
            Side::Relay => &self.relay,
        };
        list.iter()
            .find(|s| s.machine_number == machine_number)
            .cloned()
    }

    /// Iterate registered machines for one side in activation order
    /// (reverse registration order; later-registered machines win ties,
    /// §3 invariant I5).
    pub fn activation_order(&self, side: Side) -> impl Iterator<Item = &Arc<MachineSpec>> {
        let list = match side {
            Side::Origin => &self.origin,
            Side::Relay => &self.relay,
        };
        list.iter().rev()
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use crate::dist::{Dist, DistKind};
    use crate::machine::{Conditions, OverheadCaps, State};

    fn spec(number: u8, side: Side) -> MachineSpec {
        let start = State::from_dist(Dist::new(DistKind::Uniform, 1.0, 1.0, 1))
            .on(crate::machine::Event::PaddingSent, 1);
        let end = State::from_dist(Dist::new(DistKind::Uniform, 0.0, 0.0, 0));
        MachineSpec {
            machine_number: number,
            name: format!("m{number}"),
            target_hop: 1,
            side,
            conditions: Conditions::default(),
            states: vec![start, end],
            should_negotiate_end: true,
            keep_circuit_alive: false,
            overhead: OverheadCaps::default(),
        }
    }

    #[test]
    fn lookup_finds_registered_machine() {
        let mut reg = Registry::new();
        reg.register(spec(3, Side::Origin)).unwrap();
        assert!(reg.lookup(Side::Origin, 3).is_some());
        assert!(reg.lookup(Side::Relay, 3).is_none());
    }

    #[test]
    fn activation_order_is_reverse_registration() {
        let mut reg = Registry::new();
        reg.register(spec(1, Side::Origin)).unwrap();
        reg.register(spec(2, Side::Origin)).unwrap();
        reg.register(spec(3, Side::Origin)).unwrap();
        let numbers: Vec<u8> = reg
            .activation_order(Side::Origin)
            .map(|s| s.machine_number)
            .collect();
        assert_eq!(numbers, vec![3, 2, 1]);
    }

    #[test]
    fn invalid_spec_is_rejected_and_not_stored() {
        let mut reg = Registry::new();
        let mut bad = spec(4, Side::Origin);
        bad.states.clear();
        assert!(reg.register(bad).is_err());
        assert!(reg.lookup(Side::Origin, 4).is_none());
    }
}
