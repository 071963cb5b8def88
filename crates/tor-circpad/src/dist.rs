//! Inter-arrival delay sampling.
//!
//! A [`state`](crate::machine::State)'s timing source is either a
//! [`Dist`] (a parameterized probability distribution) or a
//! [`Histogram`] (a token-counted bucket table). Both ultimately produce
//! a [`Sample`]: either a delay in microseconds, or the infinity sentinel
//! meaning "don't schedule".

use rand::Rng;
use rand_distr::Distribution as _;
use rand_distr::{Exp, LogNormal, Pareto, Weibull};

use crate::err::Error;

/// Result of sampling a timing source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sample {
    /// Fire a timer after this many microseconds.
    Delay(u64),
    /// Do not schedule padding from this firing; raises the `INFINITY` event.
    Infinity,
}

/// A parameterized probability distribution, as described in §4.A.
///
/// Every variant takes two shape parameters `(p1, p2)`; the
/// interpretation of the parameters is family-specific and matches the
/// corresponding `rand_distr` distribution's constructor arguments.
#[derive(Debug, Clone, Copy, PartialEq)]
#[non_exhaustive]
pub enum DistKind {
    /// Uniform distribution over `[p1, p2]` microseconds.
    Uniform,
    /// Geometric distribution with success probability `p1` (`p2` unused).
    Geometric,
    /// Exponential distribution with rate `p1` (`p2` unused).
    Exponential,
    /// Log-normal distribution with location `p1` and scale `p2`.
    LogNormal,
    /// Weibull distribution with scale `p1` and shape `p2`.
    Weibull,
    /// Pareto distribution with scale `p1` and shape `p2`.
    Pareto,
}

/// A timing distribution: a family, its two parameters, a sample clamp,
/// and an additive shift (§4.A, §3 State).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Dist {
    /// Which parametric family to sample from.
    pub kind: DistKind,
    /// First shape parameter.
    pub p1: f64,
    /// Second shape parameter (unused by some families).
    pub p2: f64,
    /// Maximum sample allowed, in microseconds, before shift is applied.
    pub max_sample: u64,
    /// Constant added to every sample after clamping.
    pub shift: u64,
    /// Whether the per-runtime RTT estimate should additionally be added.
    pub add_rtt: bool,
}

impl Dist {
    /// Construct a new distribution with no shift and RTT disabled.
    pub fn new(kind: DistKind, p1: f64, p2: f64, max_sample: u64) -> Self {
        Dist {
            kind,
            p1,
            p2,
            max_sample,
            shift: 0,
            add_rtt: false,
        }
    }

    /// Sample a delay in microseconds, clamped to `max_sample`, then
    /// shifted by `shift` (and by `rtt` if `add_rtt` is set).
    ///
    /// Returns [`Error::InvalidSpec`] if the distribution's parameters are
    /// degenerate (e.g. non-positive scale for a Weibull).
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R, rtt: u64) -> Result<Sample, Error> {
        let raw: f64 = match self.kind {
            DistKind::Uniform => {
                let (lo, hi) = if self.p1 <= self.p2 {
                    (self.p1, self.p2)
                } else {
                    (self.p2, self.p1)
                };
                if lo == hi {
                    lo
                } else {
                    rng.random_range(lo..=hi)
                }
            }
            DistKind::Geometric => {
                if !(0.0..=1.0).contains(&self.p1) || self.p1 == 0.0 {
                    return Err(Error::InvalidSpec(
                        "geometric distribution needs 0 < p1 <= 1".into(),
                    ));
                }
                let u: f64 = rng.random_range(f64::MIN_POSITIVE..1.0);
                (u.ln() / (1.0 - self.p1).ln()).floor()
            }
            DistKind::Exponential => {
                let dist = Exp::new(self.p1).map_err(|e| {
                    Error::InvalidSpec(format!("invalid exponential parameters: {e}"))
                })?;
                dist.sample(rng)
            }
            DistKind::LogNormal => {
                let dist = LogNormal::new(self.p1, self.p2).map_err(|e| {
                    Error::InvalidSpec(format!("invalid log-normal parameters: {e}"))
                })?;
                dist.sample(rng)
            }
            DistKind::Weibull => {
                let dist = Weibull::new(self.p1, self.p2)
                    .map_err(|e| Error::InvalidSpec(format!("invalid weibull parameters: {e}")))?;
                dist.sample(rng)
            }
            DistKind::Pareto => {
                let dist = Pareto::new(self.p1, self.p2)
                    .map_err(|e| Error::InvalidSpec(format!("invalid pareto parameters: {e}")))?;
                dist.sample(rng)
            }
        };

        if !raw.is_finite() || raw < 0.0 {
            return Ok(Sample::Infinity);
        }

        let clamped = (raw as u64).min(self.max_sample);
        let mut total = clamped.saturating_add(self.shift);
        if self.add_rtt {
            total = total.saturating_add(rtt);
        }
        Ok(Sample::Delay(total))
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use tor_basic_utils::test_rng::testing_rng;

    #[test]
    fn uniform_point_mass() {
        let d = Dist::new(DistKind::Uniform, 5000.0, 5000.0, 10_000);
        let mut rng = testing_rng();
        assert_eq!(d.sample(&mut rng, 0).unwrap(), Sample::Delay(5000));
    }

    #[test]
    fn uniform_clamped() {
        let d = Dist::new(DistKind::Uniform, 0.0, 1_000_000.0, 10_000);
        let mut rng = testing_rng();
        for _ in 0..50 {
            let Sample::Delay(v) = d.sample(&mut rng, 0).unwrap() else {
                panic!("expected a delay");
            };
            assert!(v <= 10_000);
        }
    }

    #[test]
    fn shift_and_rtt_are_additive() {
        let mut d = Dist::new(DistKind::Uniform, 100.0, 100.0, 10_000);
        d.shift = 50;
        d.add_rtt = true;
        let mut rng = testing_rng();
        assert_eq!(d.sample(&mut rng, 25).unwrap(), Sample::Delay(175));
    }

    #[test]
    fn bad_geometric_param_is_spec_error() {
        let d = Dist::new(DistKind::Geometric, 0.0, 0.0, 10_000);
        let mut rng = testing_rng();
        assert!(matches!(d.sample(&mut rng, 0), Err(Error::InvalidSpec(_))));
    }
}
