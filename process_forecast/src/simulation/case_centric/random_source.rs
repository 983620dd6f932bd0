use rand::{rngs::StdRng, Rng, SeedableRng};
use rand_distr::{Distribution, Exp, Normal, Poisson};

///
/// Source of random samples used by the simulation
///
/// Implementations must be deterministic for a given seed. Degenerate parameters
/// (e.g., a non-positive standard deviation) yield the mean instead of failing.
///
pub trait RandomSource {
    /// Uniformly distributed index in `0..n` (`0` if `n == 0`)
    fn choose_index(&mut self, n: usize) -> usize;
    /// Exponentially distributed value with the given mean
    fn exponential(&mut self, mean: f64) -> f64;
    /// Normally distributed value
    fn normal(&mut self, mean: f64, std_dev: f64) -> f64;
    /// Poisson distributed count
    fn poisson(&mut self, lambda: f64) -> u64;
}

/// [`RandomSource`] backed by a seeded [`StdRng`]
#[derive(Debug, Clone)]
pub struct SeededRandomSource {
    rng: StdRng,
}

impl SeededRandomSource {
    /// Create a new source from a seed
    pub fn new(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }
}

impl RandomSource for SeededRandomSource {
    fn choose_index(&mut self, n: usize) -> usize {
        if n <= 1 {
            return 0;
        }
        self.rng.random_range(0..n)
    }

    fn exponential(&mut self, mean: f64) -> f64 {
        if !(mean > 0.0) || !mean.is_finite() {
            return mean.max(0.0);
        }
        match Exp::new(1.0 / mean) {
            Ok(dist) => dist.sample(&mut self.rng),
            Err(_) => mean,
        }
    }

    fn normal(&mut self, mean: f64, std_dev: f64) -> f64 {
        if !(std_dev > 0.0) {
            return mean;
        }
        match Normal::new(mean, std_dev) {
            Ok(dist) => dist.sample(&mut self.rng),
            Err(_) => mean,
        }
    }

    fn poisson(&mut self, lambda: f64) -> u64 {
        if !(lambda > 0.0) {
            return 0;
        }
        match Poisson::new(lambda) {
            Ok(dist) => dist.sample(&mut self.rng) as u64,
            Err(_) => 0,
        }
    }
}

///
/// Derive the seed of the `index`-th run or case from a base seed (`SplitMix64` step)
///
/// Different indices yield well-separated seeds, so runs and cases draw independent
/// streams regardless of the order in which they are executed.
///
pub fn derive_seed(base: u64, index: u64) -> u64 {
    let mut z = base.wrapping_add(index.wrapping_add(1).wrapping_mul(0x9E37_79B9_7F4A_7C15));
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}
