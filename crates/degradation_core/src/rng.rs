//! Injectable random source.
//!
//! Every stochastic branch of the kernel synthesizer and of the degradation
//! pipeline draws through [`RandomSource`]. Any `rand::Rng` is a source, so
//! production code passes a seeded `StdRng` or `thread_rng()`, while tests can
//! script the uniform draws that steer branch selection.

use rand::seq::SliceRandom;
use rand::Rng;
use rand_distr::{Distribution, Poisson, StandardNormal};

/// Source of the random draws consumed by the degradation engine.
pub trait RandomSource {
    /// Uniform draw in `[low, high)`. Returns `low` for an empty range.
    fn uniform(&mut self, low: f64, high: f64) -> f64;

    /// Uniform index in `0..len`.
    fn index(&mut self, len: usize) -> usize;

    /// Standard normal draw.
    fn standard_normal(&mut self) -> f64;

    /// Poisson draw with rate `lambda`. Non-positive rates yield 0.
    fn poisson(&mut self, lambda: f64) -> f64;

    /// Random permutation of `0..len`.
    fn permutation(&mut self, len: usize) -> Vec<usize>;

    /// Fresh seed for a child generator.
    fn next_seed(&mut self) -> u64;

    /// Bernoulli trial: `true` with probability `p`.
    fn chance(&mut self, p: f64) -> bool {
        self.uniform(0.0, 1.0) < p
    }

    /// Index drawn proportionally to `weights`.
    ///
    /// Weights need not sum to one. All-zero weights select the first entry.
    fn weighted_index(&mut self, weights: &[f64]) -> usize {
        let total: f64 = weights.iter().sum();
        if weights.is_empty() || total <= 0.0 {
            return 0;
        }
        let target = self.uniform(0.0, total);
        let mut acc = 0.0;
        for (i, &w) in weights.iter().enumerate() {
            acc += w;
            if target < acc {
                return i;
            }
        }
        weights.len() - 1
    }
}

impl<R: Rng + ?Sized> RandomSource for R {
    #[inline]
    fn uniform(&mut self, low: f64, high: f64) -> f64 {
        if high > low {
            self.gen_range(low..high)
        } else {
            low
        }
    }

    #[inline]
    fn index(&mut self, len: usize) -> usize {
        if len <= 1 {
            0
        } else {
            self.gen_range(0..len)
        }
    }

    #[inline]
    fn standard_normal(&mut self) -> f64 {
        StandardNormal.sample(self)
    }

    fn poisson(&mut self, lambda: f64) -> f64 {
        if lambda <= 0.0 || !lambda.is_finite() {
            return 0.0;
        }
        match Poisson::new(lambda) {
            Ok(dist) => dist.sample(self),
            Err(_) => 0.0,
        }
    }

    fn permutation(&mut self, len: usize) -> Vec<usize> {
        let mut order: Vec<usize> = (0..len).collect();
        order.shuffle(self);
        order
    }

    #[inline]
    fn next_seed(&mut self) -> u64 {
        self.gen()
    }
}
