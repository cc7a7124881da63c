use rand::Rng;
use rand::SeedableRng;
use rand::rngs::StdRng;
use tracing::debug;

use crate::HeavyKeeper;
use crate::error::Error;
use crate::matrix::{self, CounterMatrix};
use crate::tracker::{self, TopKHeap};

/// Hash seeds used unless [`HeavyKeeperBuilder::hash_seeds`] says otherwise.
pub const DEFAULT_HASH_SEEDS: [u64; 4] = [2025, 2, 18, 2118];

/// Builder for [`HeavyKeeper`] instances.
///
/// Only `k` and `decay` are required. The matrix dimensions default to
/// `max(256, k * ln(k))` columns and `max(3, ln(k))` rows.
///
/// # Examples
///
/// ```
/// # use heavy_keeper_rs::HeavyKeeper;
/// let hk = HeavyKeeper::builder(100, 0.9)
///     .depth(5)
///     .rng_seed(42)
///     .build()
///     .unwrap();
/// assert_eq!(hk.width(), 460);
/// assert_eq!(hk.depth(), 5);
/// ```
#[derive(Debug, Clone)]
pub struct HeavyKeeperBuilder {
    k: usize,
    decay: f64,
    width: Option<usize>,
    depth: Option<usize>,
    hash_seeds: [u64; 4],
    rng_seed: Option<u64>,
}

impl HeavyKeeperBuilder {
    /// Creates a builder for a sketch tracking the `k` heaviest flows.
    ///
    /// `decay` is the base of the probability `decay^count` that a colliding
    /// flow decrements an occupied counter. 0.9 is a good starting point.
    pub fn new(k: usize, decay: f64) -> Self {
        Self {
            k,
            decay,
            width: None,
            depth: None,
            hash_seeds: DEFAULT_HASH_SEEDS,
            rng_seed: None,
        }
    }

    /// Overrides the number of counters per row.
    pub fn width(mut self, width: usize) -> Self {
        self.width = Some(width);
        self
    }

    /// Overrides the number of rows.
    pub fn depth(mut self, depth: usize) -> Self {
        self.depth = Some(depth);
        self
    }

    /// Sets the seeds of the fingerprint and row hashers.
    pub fn hash_seeds(mut self, seeds: [u64; 4]) -> Self {
        self.hash_seeds = seeds;
        self
    }

    /// Seeds the decay generator so runs are reproducible. Without a seed the
    /// generator is seeded from OS entropy.
    pub fn rng_seed(mut self, seed: u64) -> Self {
        self.rng_seed = Some(seed);
        self
    }

    /// Builds the sketch with a [`StdRng`] decay generator.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorKind::InvalidArgument`](crate::ErrorKind::InvalidArgument)
    /// if `k` is zero or too large to allocate, `decay` is outside `(0, 1]`,
    /// or the counter matrix has a zero or unallocatable dimension.
    pub fn build(self) -> Result<HeavyKeeper<StdRng>, Error> {
        let rng = match self.rng_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        self.build_with_rng(rng)
    }

    /// Builds the sketch with a caller-supplied decay generator.
    ///
    /// Any seed set through [`rng_seed`](Self::rng_seed) is ignored.
    pub fn build_with_rng<R: Rng>(self, rng: R) -> Result<HeavyKeeper<R>, Error> {
        if self.k < 1 {
            return Err(Error::invalid_argument("k must be >= 1"));
        }
        if !(self.decay > 0.0 && self.decay <= 1.0) {
            return Err(Error::invalid_argument(format!(
                "decay must be in range (0, 1.0], got {}",
                self.decay
            )));
        }

        let (default_width, default_depth) = matrix::dimensions(self.k);
        let width = self.width.unwrap_or(default_width);
        let depth = self.depth.unwrap_or(default_depth);
        if width == 0 || depth == 0 {
            return Err(Error::invalid_argument(format!(
                "width and depth must be >= 1, got {width}x{depth}"
            )));
        }
        match width.checked_mul(depth) {
            Some(cells) if cells <= matrix::MAX_CELLS => {}
            _ => {
                return Err(Error::invalid_argument(format!(
                    "counter matrix of {width}x{depth} exceeds {} cells",
                    matrix::MAX_CELLS
                )));
            }
        }
        if self.k > tracker::MAX_K {
            return Err(Error::invalid_argument(format!(
                "k must be <= {}, got {}",
                tracker::MAX_K,
                self.k
            )));
        }

        debug!(
            k = self.k,
            width,
            depth,
            decay = self.decay,
            "creating heavy keeper"
        );

        Ok(HeavyKeeper {
            matrix: CounterMatrix::new(width, depth, self.decay, self.hash_seeds),
            heap: TopKHeap::new(self.k),
            rng,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ErrorKind;

    #[test]
    fn test_default_dimensions() {
        let hk = HeavyKeeperBuilder::new(5, 0.9).rng_seed(1).build().unwrap();
        assert_eq!(hk.k(), 5);
        assert_eq!(hk.width(), 256);
        assert_eq!(hk.depth(), 3);
        assert_eq!(hk.decay(), 0.9);
    }

    #[test]
    fn test_overrides() {
        let hk = HeavyKeeperBuilder::new(5, 0.9)
            .width(1024)
            .depth(7)
            .hash_seeds([9, 8, 7, 6])
            .build()
            .unwrap();
        assert_eq!(hk.width(), 1024);
        assert_eq!(hk.depth(), 7);
    }

    #[test]
    fn test_invalid_arguments() {
        let cases = [
            HeavyKeeperBuilder::new(0, 0.9),
            HeavyKeeperBuilder::new(5, 0.0),
            HeavyKeeperBuilder::new(5, -0.5),
            HeavyKeeperBuilder::new(5, 1.01),
            HeavyKeeperBuilder::new(5, f64::NAN),
            HeavyKeeperBuilder::new(5, 0.9).width(0),
            HeavyKeeperBuilder::new(5, 0.9).depth(0),
            HeavyKeeperBuilder::new(5, 0.9).width(usize::MAX / 2).depth(3),
            HeavyKeeperBuilder::new(5, 0.9).width(usize::MAX / 4).depth(3),
            HeavyKeeperBuilder::new(usize::MAX, 0.9).width(256).depth(3),
        ];
        for builder in cases {
            let desc = format!("{builder:?}");
            let err = builder.build().expect_err(&desc);
            assert_eq!(err.kind(), ErrorKind::InvalidArgument, "{desc}");
        }
    }

    #[test]
    fn test_decay_of_one_is_valid() {
        assert!(HeavyKeeperBuilder::new(1, 1.0).build().is_ok());
    }
}
