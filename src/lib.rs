//! A fixed-memory sketch for finding the top-k heaviest flows in a stream.
//!
//! [`HeavyKeeper`] implements the algorithm described in "HeavyKeeper: An
//! Accurate Algorithm for Finding Top-k Elephant Flows" (Gong et al., USENIX
//! ATC 2018). A `depth x width` matrix of fingerprinted counters estimates each
//! flow's weight, and a min-heap of size `k` keeps the current best estimate of
//! the heaviest flows.
//!
//! ```
//! use heavy_keeper_rs::{FlowCount, HeavyKeeper};
//!
//! let mut hk = HeavyKeeper::with_seed(2, 0.9, 42).unwrap();
//! hk.update("10.0.0.1:443", 10);
//! hk.update("10.0.0.2:80", 3);
//! hk.update("10.0.0.3:22", 1);
//!
//! assert_eq!(
//!     hk.top(),
//!     vec![FlowCount::new("10.0.0.1:443", 10), FlowCount::new("10.0.0.2:80", 3)]
//! );
//! assert_eq!(hk.count("10.0.0.3:22"), None);
//! ```
use std::fmt;

use rand::Rng;
use rand::rngs::StdRng;
use tracing::debug;

mod builder;
mod error;
mod matrix;
mod tracker;

pub use builder::{DEFAULT_HASH_SEEDS, HeavyKeeperBuilder};
pub use error::{Error, ErrorKind};
pub use tracker::FlowCount;

use matrix::CounterMatrix;
use tracker::TopKHeap;

/// Tracks the `k` flows with the largest cumulative weight using memory that
/// does not grow with the number of distinct flows.
///
/// Counts are estimates. Flows that stay in the top-k are counted almost
/// exactly; lighter flows are underestimated and may be evicted by heavier ones.
///
/// All memory is allocated at construction. `HeavyKeeper` is not meant for
/// concurrent mutation: wrap it in a lock or keep one per thread.
pub struct HeavyKeeper<R = StdRng> {
    matrix: CounterMatrix,
    heap: TopKHeap,
    rng: R,
}

impl HeavyKeeper<StdRng> {
    /// Creates a sketch tracking the `k` heaviest flows, seeding the decay
    /// generator from OS entropy.
    ///
    /// `decay` sets the chance `decay^count` that a collision decrements an
    /// occupied counter. A decay of 0.9 is a good starting point.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorKind::InvalidArgument`] if `k` is zero or `decay` is not
    /// in `(0, 1]`.
    pub fn new(k: usize, decay: f64) -> Result<Self, Error> {
        HeavyKeeperBuilder::new(k, decay).build()
    }

    /// Same as [`new`](Self::new) with a deterministic decay generator.
    pub fn with_seed(k: usize, decay: f64, seed: u64) -> Result<Self, Error> {
        HeavyKeeperBuilder::new(k, decay).rng_seed(seed).build()
    }

    /// Returns a builder to configure dimensions and seeds.
    pub fn builder(k: usize, decay: f64) -> HeavyKeeperBuilder {
        HeavyKeeperBuilder::new(k, decay)
    }
}

impl<R: Rng> HeavyKeeper<R> {
    /// Creates a sketch drawing decay decisions from `rng`.
    pub fn with_rng(k: usize, decay: f64, rng: R) -> Result<Self, Error> {
        HeavyKeeperBuilder::new(k, decay).build_with_rng(rng)
    }

    /// Returns the number of flows tracked.
    pub fn k(&self) -> usize {
        self.heap.k()
    }

    /// Returns the number of counters per row.
    pub fn width(&self) -> usize {
        self.matrix.width()
    }

    /// Returns the number of rows.
    pub fn depth(&self) -> usize {
        self.matrix.depth()
    }

    /// Returns the decay base.
    pub fn decay(&self) -> f64 {
        self.matrix.decay()
    }

    /// Returns the smallest count in the top-k, zero until `k` flows are tracked.
    pub fn min_count(&self) -> u32 {
        self.heap.min()
    }

    /// Adds `weight` to `flow` and returns whether this update admitted the flow
    /// into the top-k.
    ///
    /// A `weight` of zero changes nothing and reports whether the flow is
    /// currently tracked.
    ///
    /// This operation is $O(depth \cdot weight)$ in the worst case, $O(depth)$
    /// for flows that do not collide, and does not allocate once the top-k
    /// entries have grown to the flow key length.
    #[inline]
    pub fn update<T: AsRef<[u8]> + ?Sized>(&mut self, flow: &T, weight: u32) -> bool {
        let flow = flow.as_ref();
        if weight == 0 {
            return self.heap.contains(flow);
        }
        let max_count = self.matrix.update(flow, weight, &mut self.rng);
        self.heap.consider(flow, max_count)
    }

    /// Returns the tracked flows sorted by count, highest first.
    ///
    /// Use [`top_into`](Self::top_into) to reuse a buffer between calls.
    pub fn top(&self) -> Vec<FlowCount> {
        let mut top = Vec::with_capacity(self.k());
        self.heap.top_into(&mut top);
        top
    }

    /// Writes the tracked flows into `buf` sorted by count, highest first.
    ///
    /// The previous contents of `buf` are replaced; its existing entries are
    /// overwritten in place so their allocations are reused. Equal counts keep a stable order.
    pub fn top_into(&self, buf: &mut Vec<FlowCount>) {
        self.heap.top_into(buf);
    }

    /// Returns the estimated count of `flow` if it is among the top-k.
    ///
    /// Flows outside the top-k always return `None`, even if the counter matrix
    /// holds a partial estimate for them.
    pub fn count<T: AsRef<[u8]> + ?Sized>(&self, flow: &T) -> Option<u32> {
        self.heap.count(flow.as_ref())
    }

    /// Ages every count by `fraction`, truncating toward zero.
    ///
    /// A `fraction` of zero or less (or NaN) does nothing; one or more is the
    /// same as [`reset`](Self::reset). Flows whose count drops to zero leave the
    /// top-k.
    pub fn decay_all(&mut self, fraction: f64) {
        if fraction.is_nan() || fraction <= 0.0 {
            return;
        }
        if fraction >= 1.0 {
            self.reset();
            return;
        }
        let keep = 1.0 - fraction;
        debug!(fraction, "decaying heavy keeper counts");
        self.matrix.scale(keep);
        self.heap.scale(keep);
    }

    /// Returns the sketch to a like-new state with no flows and no counts.
    ///
    /// Dimensions, hash seeds and the decay generator are kept, and nothing is
    /// reallocated.
    pub fn reset(&mut self) {
        debug!(k = self.k(), "resetting heavy keeper");
        self.matrix.clear();
        self.heap.clear();
    }
}

impl<R> fmt::Debug for HeavyKeeper<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HeavyKeeper")
            .field("k", &self.heap.k())
            .field("width", &self.matrix.width())
            .field("depth", &self.matrix.depth())
            .field("decay", &self.matrix.decay())
            .finish_non_exhaustive()
    }
}
