//! Token histograms: the second kind of timing source a [`State`](crate::machine::State)
//! may use, and the token-removal policies that mutate them as cells are
//! observed (§3 Histogram, §4.A).

use rand::Rng;

use crate::dist::Sample;
use crate::err::Error;

/// How a histogram's token counts are decremented as cells are observed.
///
/// Only meaningful while a histogram-backed state is active; `None` means
/// the histogram is read-only and no mutable copy needs to be kept.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[non_exhaustive]
pub enum TokenRemoval {
    /// Counts are never decremented.
    #[default]
    None,
    /// Decrement the bin containing the observed delay exactly, if non-zero.
    Exact,
    /// Decrement the non-empty bin whose interval is nearest the observed delay.
    Closest,
    /// Like [`Closest`](TokenRemoval::Closest), but only when the delay falls
    /// below the state's lower edge.
    ClosestOnUnder,
    /// Decrement the nearest non-empty bin whose interval is `>=` the delay.
    Higher,
    /// Decrement the nearest non-empty bin whose interval is `<=` the delay.
    Lower,
}

/// An immutable histogram specification: bin boundaries and starting token
/// counts.
///
/// `boundaries` has `n_bins + 1` entries (`boundaries[i]..boundaries[i+1]`
/// is the half-open interval for bin `i`); `tokens` has `n_bins + 1` entries,
/// where the final entry is the infinity bin's token count.
#[derive(Debug, Clone, PartialEq)]
pub struct Histogram {
    /// Interval boundaries, strictly increasing, `n_bins + 1` entries.
    pub boundaries: Vec<u64>,
    /// Token counts, `n_bins + 1` entries; the last entry is the infinity bin.
    pub tokens: Vec<u32>,
    /// How sends/receives decrement `tokens`.
    pub removal: TokenRemoval,
}

impl Histogram {
    /// Build a histogram from explicit interior boundaries.
    ///
    /// Fails validation if `boundaries` is not strictly increasing, or if
    /// `tokens.len() != boundaries.len()`.
    pub fn new(boundaries: Vec<u64>, tokens: Vec<u32>, removal: TokenRemoval) -> Result<Self, Error> {
        if tokens.len() != boundaries.len() {
            return Err(Error::InvalidSpec(format!(
                "histogram has {} boundary points but {} token bins",
                boundaries.len(),
                tokens.len()
            )));
        }
        if boundaries.len() < 2 {
            return Err(Error::InvalidSpec(
                "histogram needs at least one real bin plus the infinity bin".into(),
            ));
        }
        if !boundaries.windows(2).all(|w| w[0] < w[1]) {
            return Err(Error::InvalidSpec(
                "histogram boundaries must be strictly increasing".into(),
            ));
        }
        Ok(Histogram {
            boundaries,
            tokens,
            removal,
        })
    }

    /// Build a histogram whose `n_bins` real bins geometrically partition
    /// `[start, end)`, all sharing one `tokens_per_bin` count plus
    /// `infinity_tokens` in the final bin.
    pub fn geometric(
        start: u64,
        end: u64,
        n_bins: usize,
        tokens_per_bin: u32,
        infinity_tokens: u32,
        removal: TokenRemoval,
    ) -> Result<Self, Error> {
        if n_bins == 0 || end <= start {
            return Err(Error::InvalidSpec(
                "geometric histogram needs n_bins > 0 and end > start".into(),
            ));
        }
        let ratio = (end as f64 / start.max(1) as f64).powf(1.0 / n_bins as f64);
        let mut boundaries = Vec::with_capacity(n_bins + 1);
        let mut edge = start.max(1) as f64;
        boundaries.push(start);
        for _ in 0..n_bins {
            edge *= ratio;
            boundaries.push(edge as u64);
        }
        *boundaries.last_mut().expect("non-empty") = end;
        let mut tokens = vec![tokens_per_bin; n_bins];
        tokens.push(infinity_tokens);
        Histogram::new(boundaries, tokens, removal)
    }

    /// Number of real (non-infinity) bins.
    pub fn n_bins(&self) -> usize {
        self.boundaries.len() - 1
    }

    /// Index of the infinity bin within `tokens`.
    fn infinity_index(&self) -> usize {
        self.tokens.len() - 1
    }

    /// True if every real bin is at zero tokens (the infinity bin's count
    /// does not matter for this check; see §4.A "Empty-histogram handling").
    pub fn is_exhausted(&self) -> bool {
        self.tokens[..self.n_bins()].iter().all(|&t| t == 0)
    }

    /// Sample a bin weighted by current token counts, then a uniform delay
    /// within it (or the infinity sentinel). Returns `None` if exhausted;
    /// callers should raise `BINS_EMPTY` and not arm a timer in that case.
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> Option<Sample> {
        if self.is_exhausted() {
            return None;
        }
        let total: u64 = self.tokens.iter().map(|&t| t as u64).sum();
        debug_assert!(total > 0);
        let mut pick = rng.random_range(0..total);
        let mut chosen = self.tokens.len() - 1;
        for (i, &t) in self.tokens.iter().enumerate() {
            if pick < t as u64 {
                chosen = i;
                break;
            }
            pick -= t as u64;
        }
        if chosen == self.infinity_index() {
            return Some(Sample::Infinity);
        }
        let lo = self.boundaries[chosen];
        let hi = self.boundaries[chosen + 1];
        let delay = if lo == hi {
            lo
        } else {
            rng.random_range(lo..hi)
        };
        Some(Sample::Delay(delay))
    }

    /// Apply this histogram's token-removal policy for an observed
    /// inter-arrival delay `d` (§4.A "Token removal").
    ///
    /// Ties on "closest" break toward the lower index.
    pub fn remove_token(&mut self, d: u64) {
        let n = self.n_bins();
        if n == 0 {
            return;
        }
        match self.removal {
            TokenRemoval::None => {}
            TokenRemoval::Exact => {
                if let Some(bin) = self.bin_containing(d) {
                    self.decrement(bin);
                }
            }
            TokenRemoval::Closest => {
                if let Some(bin) = self.closest_nonempty_bin(d, true, true) {
                    self.decrement(bin);
                }
            }
            TokenRemoval::ClosestOnUnder => {
                if d < self.boundaries[0] {
                    if let Some(bin) = self.closest_nonempty_bin(d, true, true) {
                        self.decrement(bin);
                    }
                }
            }
            TokenRemoval::Higher => {
                if let Some(bin) = self.closest_nonempty_bin(d, false, true) {
                    self.decrement(bin);
                }
            }
            TokenRemoval::Lower => {
                if let Some(bin) = self.closest_nonempty_bin(d, true, false) {
                    self.decrement(bin);
                }
            }
        }
    }

    /// Real bin index whose half-open interval contains `d`, if any.
    fn bin_containing(&self, d: u64) -> Option<usize> {
        (0..self.n_bins()).find(|&i| self.boundaries[i] <= d && d < self.boundaries[i + 1])
    }

    /// Find the non-empty real bin nearest `d`, optionally restricted to
    /// bins at or below / at or above `d`.
    fn closest_nonempty_bin(&self, d: u64, allow_lower: bool, allow_higher: bool) -> Option<usize> {
        let mut best: Option<(usize, u64)> = None;
        for i in 0..self.n_bins() {
            if self.tokens[i] == 0 {
                continue;
            }
            let (lo, hi) = (self.boundaries[i], self.boundaries[i + 1]);
            let is_lower = hi <= d;
            let is_higher = lo > d;
            let contains = lo <= d && d < hi;
            if !contains && is_lower && !allow_lower {
                continue;
            }
            if !contains && is_higher && !allow_higher {
                continue;
            }
            let dist = if contains {
                0
            } else if is_lower {
                d - hi + 1
            } else {
                lo - d
            };
            match best {
                Some((_, best_dist)) if best_dist <= dist => {}
                _ => best = Some((i, dist)),
            }
        }
        best.map(|(i, _)| i)
    }

    /// Decrement bin `i` by one, saturating at zero.
    fn decrement(&mut self, i: usize) {
        self.tokens[i] = self.tokens[i].saturating_sub(1);
    }
}
