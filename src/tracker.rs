use std::fmt;

use tracing::trace;

/// A flow and its estimated count, as reported by [`HeavyKeeper::top`].
///
/// [`HeavyKeeper::top`]: crate::HeavyKeeper::top
#[derive(Clone, Default, PartialEq, Eq, Hash)]
pub struct FlowCount {
    /// The flow key.
    pub flow: Vec<u8>,
    /// The estimated cumulative weight of the flow.
    pub count: u32,
}

impl FlowCount {
    /// Creates a new entry.
    ///
    /// ```
    /// # use heavy_keeper_rs::FlowCount;
    /// let fc = FlowCount::new("10.0.0.1:443", 25);
    /// assert_eq!(fc.flow_str(), Some("10.0.0.1:443"));
    /// ```
    pub fn new(flow: impl Into<Vec<u8>>, count: u32) -> Self {
        Self {
            flow: flow.into(),
            count,
        }
    }

    /// Returns the flow as a str if it is valid UTF-8.
    pub fn flow_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.flow).ok()
    }

    fn is_occupied(&self) -> bool {
        self.count > 0
    }

    fn vacate(&mut self) {
        self.flow.clear();
        self.count = 0;
    }
}

impl fmt::Debug for FlowCount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", String::from_utf8_lossy(&self.flow), self.count)
    }
}

/// Largest `k` whose entries fit in one allocation.
pub(crate) const MAX_K: usize = isize::MAX as usize / size_of::<FlowCount>();

/// Fixed-size binary min-heap holding the current top-k estimate.
///
/// The heap always holds exactly `k` entries; slots not yet claimed by a flow
/// have a zero count and therefore sit at the root.
pub(crate) struct TopKHeap {
    entries: Box<[FlowCount]>,
}

impl TopKHeap {
    pub(crate) fn new(k: usize) -> Self {
        Self {
            entries: vec![FlowCount::default(); k].into_boxed_slice(),
        }
    }

    pub(crate) fn k(&self) -> usize {
        self.entries.len()
    }

    /// The smallest count currently tracked, zero while there are free slots.
    #[inline]
    pub(crate) fn min(&self) -> u32 {
        self.entries[0].count
    }

    fn find(&self, flow: &[u8]) -> Option<usize> {
        self.entries
            .iter()
            .position(|e| e.is_occupied() && e.flow == flow)
    }

    pub(crate) fn contains(&self, flow: &[u8]) -> bool {
        self.find(flow).is_some()
    }

    pub(crate) fn count(&self, flow: &[u8]) -> Option<u32> {
        self.find(flow).map(|i| self.entries[i].count)
    }

    /// Offers `flow` with its latest estimate. Returns `true` when the flow is
    /// admitted into the top-k set.
    ///
    /// An estimate below the current minimum is rejected without touching the
    /// heap. A tracked flow has its count replaced; an untracked one replaces
    /// the root.
    pub(crate) fn consider(&mut self, flow: &[u8], count: u32) -> bool {
        if count == 0 || count < self.min() {
            return false;
        }

        match self.find(flow) {
            Some(i) => {
                self.entries[i].count = count;
                self.fix(i);
            }
            None => {
                let root = &mut self.entries[0];
                if root.is_occupied() {
                    trace!(
                        evicted = %String::from_utf8_lossy(&root.flow),
                        evicted_count = root.count,
                        count,
                        "top-k minimum replaced"
                    );
                }
                root.flow.clear();
                root.flow.extend_from_slice(flow);
                root.count = count;
                self.sift_down(0);
            }
        }
        true
    }

    /// Writes the occupied entries into `buf`, highest count first.
    ///
    /// Entries already in `buf` are overwritten in place so their buffers are
    /// reused. Equal counts keep their heap order.
    pub(crate) fn top_into(&self, buf: &mut Vec<FlowCount>) {
        let mut n = 0;
        for entry in self.entries.iter().filter(|e| e.is_occupied()) {
            if n < buf.len() {
                let slot = &mut buf[n];
                slot.flow.clone_from(&entry.flow);
                slot.count = entry.count;
            } else {
                buf.push(entry.clone());
            }
            n += 1;
        }
        buf.truncate(n);
        buf.sort_by(|a, b| b.count.cmp(&a.count));
    }

    /// Multiplies every count by `keep`. Entries that drop to zero are vacated.
    pub(crate) fn scale(&mut self, keep: f64) {
        for entry in self.entries.iter_mut().filter(|e| e.is_occupied()) {
            entry.count = (f64::from(entry.count) * keep) as u32;
            if entry.count == 0 {
                entry.vacate();
            }
        }
        // Truncation is monotone, so the heap order survives the scaling.
        debug_assert!(self.is_heap());
    }

    pub(crate) fn clear(&mut self) {
        self.entries.iter_mut().for_each(FlowCount::vacate);
    }

    /// Restores the heap after the entry at `i` changed its count.
    fn fix(&mut self, i: usize) {
        if !self.sift_down(i) {
            self.sift_up(i);
        }
    }

    #[inline]
    fn less(&self, i: usize, j: usize) -> bool {
        self.entries[i].count < self.entries[j].count
    }

    fn sift_up(&mut self, mut j: usize) {
        while j > 0 {
            let parent = (j - 1) / 2;
            if !self.less(j, parent) {
                break;
            }
            self.entries.swap(parent, j);
            j = parent;
        }
    }

    /// Returns `true` if the entry at `i0` moved.
    fn sift_down(&mut self, i0: usize) -> bool {
        let n = self.entries.len();
        let mut i = i0;
        loop {
            let left = 2 * i + 1;
            if left >= n {
                break;
            }
            let mut child = left;
            let right = left + 1;
            if right < n && self.less(right, left) {
                child = right;
            }
            if !self.less(child, i) {
                break;
            }
            self.entries.swap(i, child);
            i = child;
        }
        i > i0
    }

    fn is_heap(&self) -> bool {
        (1..self.entries.len()).all(|i| !self.less(i, (i - 1) / 2))
    }
}
