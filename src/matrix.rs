use ahash::RandomState;
use rand::Rng;

/// Smallest row width, whatever `k` is.
pub(crate) const MIN_WIDTH: usize = 256;
/// Smallest number of rows, whatever `k` is.
pub(crate) const MIN_DEPTH: usize = 3;

/// Largest `width * depth` whose cells fit in one allocation.
pub(crate) const MAX_CELLS: usize = isize::MAX as usize / size_of::<Cell>();

const FINGERPRINT_SEED: u64 = u32::MAX as u64;
const SEED_MIX: u64 = 0x9E3779B97F4A7C15;

/// Returns the `(width, depth)` used for a sketch tracking `k` flows.
///
/// Width is `k * ln(k)` and depth is `ln(k)`, both truncated and clamped to
/// [`MIN_WIDTH`] and [`MIN_DEPTH`].
pub(crate) fn dimensions(k: usize) -> (usize, usize) {
    let ln_k = (k as f64).ln();
    let width = ((k as f64 * ln_k) as usize).max(MIN_WIDTH);
    let depth = (ln_k as usize).max(MIN_DEPTH);
    (width, depth)
}

#[derive(Clone, Copy, Default, Debug, PartialEq, Eq)]
struct Cell {
    fingerprint: u32,
    count: u32,
}

/// The `depth x width` grid of counters behind a HeavyKeeper.
///
/// Each cell remembers a fingerprint and a count. A cell with count zero is
/// empty, whatever its fingerprint says.
pub(crate) struct CounterMatrix {
    width: usize,
    depth: usize,
    decay: f64,
    cells: Box<[Cell]>,
    fingerprint_hasher: RandomState,
    row_hashers: Box<[RandomState]>,
}

impl CounterMatrix {
    pub(crate) fn new(width: usize, depth: usize, decay: f64, seeds: [u64; 4]) -> Self {
        let row_hashers = (0..depth as u64)
            .map(|row| seeded_hasher(seeds, row))
            .collect::<Vec<_>>()
            .into_boxed_slice();
        Self {
            width,
            depth,
            decay,
            cells: vec![Cell::default(); width * depth].into_boxed_slice(),
            fingerprint_hasher: seeded_hasher(seeds, FINGERPRINT_SEED),
            row_hashers,
        }
    }

    pub(crate) fn width(&self) -> usize {
        self.width
    }

    pub(crate) fn depth(&self) -> usize {
        self.depth
    }

    pub(crate) fn decay(&self) -> f64 {
        self.decay
    }

    #[inline]
    fn fingerprint(&self, flow: &[u8]) -> u32 {
        hash32(&self.fingerprint_hasher, flow)
    }

    #[inline]
    fn slot(&self, flow: &[u8], row: usize) -> usize {
        let h = hash32(&self.row_hashers[row], flow);
        (u64::from(h) % self.width as u64) as usize
    }

    /// Adds `incr` to `flow` and returns the largest count the flow holds
    /// across all rows afterwards, or zero if every row kept its occupant.
    ///
    /// A row owned by another flow is contested one unit at a time: each unit
    /// decrements the occupant with probability `decay^count`, and the flow takes
    /// the cell over with the units left once the occupant hits zero.
    pub(crate) fn update<R: Rng>(&mut self, flow: &[u8], incr: u32, rng: &mut R) -> u32 {
        if incr == 0 {
            return 0;
        }

        let fp = self.fingerprint(flow);
        let decay = self.decay;
        let mut max_count = 0;

        for row in 0..self.depth {
            let idx = row * self.width + self.slot(flow, row);
            let cell = &mut self.cells[idx];

            if cell.count == 0 {
                cell.fingerprint = fp;
                cell.count = incr;
                max_count = max_count.max(incr);
            } else if cell.fingerprint == fp {
                cell.count = cell.count.saturating_add(incr);
                max_count = max_count.max(cell.count);
            } else {
                let mut p = decay.powf(f64::from(cell.count));
                for remaining in (1..=incr).rev() {
                    // an underflowed probability can never fire again
                    if p == 0.0 {
                        break;
                    }
                    if rng.random::<f64>() < p {
                        cell.count -= 1;
                        if cell.count == 0 {
                            cell.fingerprint = fp;
                            cell.count = remaining;
                            max_count = max_count.max(remaining);
                            break;
                        }
                        p = decay.powf(f64::from(cell.count));
                    }
                }
            }
        }

        max_count
    }

    /// Multiplies every count by `keep`, truncating toward zero.
    pub(crate) fn scale(&mut self, keep: f64) {
        for cell in self.cells.iter_mut().filter(|c| c.count > 0) {
            cell.count = (f64::from(cell.count) * keep) as u32;
        }
    }

    /// Empties every cell without reallocating the grid.
    pub(crate) fn clear(&mut self) {
        self.cells.fill(Cell::default());
    }
}

fn seeded_hasher(seeds: [u64; 4], seed: u64) -> RandomState {
    RandomState::with_seeds(
        seeds[0] ^ seed.wrapping_mul(SEED_MIX),
        seeds[1],
        seeds[2],
        seeds[3].wrapping_add(seed),
    )
}

#[inline(always)]
fn hash32(hasher: &RandomState, flow: &[u8]) -> u32 {
    let h = hasher.hash_one(flow);
    (h ^ (h >> 32)) as u32
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    const SEEDS: [u64; 4] = [1, 2, 3, 4];

    fn total(m: &CounterMatrix) -> u64 {
        m.cells.iter().map(|c| u64::from(c.count)).sum()
    }

    #[test]
    fn test_dimensions() {
        assert_eq!(dimensions(1), (MIN_WIDTH, MIN_DEPTH));
        assert_eq!(dimensions(5), (MIN_WIDTH, MIN_DEPTH));
        // 100 * ln(100) = 460.5, ln(100) = 4.6
        assert_eq!(dimensions(100), (460, 4));
        // 10_000 * ln(10_000) = 92103.4, ln(10_000) = 9.2
        assert_eq!(dimensions(10_000), (92_103, 9));
    }

    #[test]
    fn test_same_flow_accumulates() {
        let mut m = CounterMatrix::new(256, 3, 0.9, SEEDS);
        let mut rng = StdRng::seed_from_u64(7);

        assert_eq!(m.update(b"flow", 3, &mut rng), 3);
        assert_eq!(m.update(b"flow", 4, &mut rng), 7);
        assert_eq!(total(&m), 7 * 3);
    }

    #[test]
    fn test_zero_increment_is_noop() {
        let mut m = CounterMatrix::new(256, 3, 0.9, SEEDS);
        let mut rng = StdRng::seed_from_u64(7);

        assert_eq!(m.update(b"flow", 0, &mut rng), 0);
        assert_eq!(total(&m), 0);
    }

    #[test]
    fn test_collision_decays_then_evicts() {
        // A single cell forces every flow to collide, and decay = 1.0 makes
        // every unit decrement the occupant.
        let mut m = CounterMatrix::new(1, 1, 1.0, SEEDS);
        let mut rng = StdRng::seed_from_u64(7);

        assert_eq!(m.update(b"a", 5, &mut rng), 5);
        assert_eq!(m.update(b"b", 3, &mut rng), 0);
        assert_eq!(m.cells[0].count, 2);

        // the second unit wipes out "a" and "b" keeps the three units left
        assert_eq!(m.update(b"b", 4, &mut rng), 3);
        assert_eq!(m.cells[0].count, 3);
        assert_eq!(m.update(b"b", 1, &mut rng), 4);
    }

    #[test]
    fn test_heavy_occupant_survives() {
        let mut m = CounterMatrix::new(1, 1, 1e-9, SEEDS);
        let mut rng = StdRng::seed_from_u64(7);

        assert_eq!(m.update(b"heavy", 1, &mut rng), 1);
        for _ in 0..100 {
            assert_eq!(m.update(b"light", 1, &mut rng), 0);
        }
        assert_eq!(m.cells[0].count, 1);
    }

    #[test]
    fn test_saturated_occupant_stops_drawing() {
        // 0.5^2000 underflows to zero, so no unit can ever decrement "heavy"
        let mut m = CounterMatrix::new(1, 1, 0.5, SEEDS);
        let mut rng = StdRng::seed_from_u64(7);

        assert_eq!(m.update(b"heavy", 2_000, &mut rng), 2_000);
        assert_eq!(m.update(b"light", u32::MAX, &mut rng), 0);
        assert_eq!(m.cells[0].count, 2_000);
    }

    #[test]
    fn test_scale_and_clear() {
        let mut m = CounterMatrix::new(256, 3, 0.9, SEEDS);
        let mut rng = StdRng::seed_from_u64(7);

        m.update(b"flow", 10, &mut rng);
        m.scale(0.5);
        assert_eq!(m.update(b"flow", 1, &mut rng), 6);

        m.clear();
        assert_eq!(total(&m), 0);
        assert_eq!(m.update(b"flow", 1, &mut rng), 1);
    }

    #[test]
    fn test_rows_use_distinct_hashers() {
        let m = CounterMatrix::new(MIN_WIDTH, MIN_DEPTH, 0.9, SEEDS);
        let slots: Vec<_> = (0..64)
            .map(|i| {
                let flow = format!("flow-{i}");
                (0..MIN_DEPTH).map(|row| m.slot(flow.as_bytes(), row)).collect::<Vec<_>>()
            })
            .collect();

        assert!(slots.iter().all(|s| s.iter().all(|&j| j < MIN_WIDTH)));
        assert!(slots.iter().any(|s| s[0] != s[1] || s[1] != s[2]));
    }
}
