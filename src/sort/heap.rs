use std::cmp::Ordering;

use anyhow::bail;

use crate::error::Error;

pub const DEFAULT_HEAP_CAPACITY: usize = 16;

/// Array-encoded binary min-heap under an arbitrary comparison. The children
/// of slot `p` are `2p + 1` and `2p + 2`.
pub struct MinHeap<T, F> {
    data: Vec<T>,
    compare: F,
    // Tracked separately from `data.capacity()` so growth and shrinking
    // follow our rule rather than the allocator's.
    capacity: usize,
}

impl<T, F> std::fmt::Debug for MinHeap<T, F>
where
    T: std::fmt::Debug,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MinHeap")
            .field("data", &self.data)
            .field("capacity", &self.capacity)
            .finish()
    }
}

impl<T, F> MinHeap<T, F>
where
    F: Fn(&T, &T) -> Ordering,
{
    pub fn new(compare: F) -> Self {
        MinHeap {
            data: Vec::with_capacity(DEFAULT_HEAP_CAPACITY),
            compare,
            capacity: DEFAULT_HEAP_CAPACITY,
        }
    }

    pub fn with_capacity(capacity: usize, compare: F) -> anyhow::Result<Self> {
        if capacity == 0 {
            bail!(Error::InvalidCapacity("heap capacity"));
        }
        Ok(MinHeap {
            data: Vec::with_capacity(capacity),
            compare,
            capacity,
        })
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn peek(&self) -> Option<&T> {
        self.data.first()
    }

    /// Returns whether the new value became the root.
    pub fn enqueue(&mut self, value: T) -> bool {
        if self.data.len() == self.capacity {
            self.capacity *= 2;
            self.data.reserve_exact(self.capacity - self.data.len());
        }
        self.data.push(value);
        self.sift_up(self.data.len() - 1) == 0
    }

    pub fn dequeue(&mut self) -> anyhow::Result<T> {
        if self.data.is_empty() {
            bail!(Error::HeapEmpty);
        }
        let root = self.data.swap_remove(0);
        if !self.data.is_empty() {
            self.sift_down(0);
        }
        self.maybe_shrink();
        Ok(root)
    }

    // Only shrink once occupancy falls under half, and never under the
    // default, so alternating enqueue/dequeue at a boundary does not keep
    // reallocating.
    fn maybe_shrink(&mut self) {
        if self.capacity > DEFAULT_HEAP_CAPACITY && self.data.len() < self.capacity / 2 {
            self.capacity = std::cmp::max(self.capacity / 2, DEFAULT_HEAP_CAPACITY);
            self.data.shrink_to(self.capacity);
        }
    }

    fn less(&self, a: usize, b: usize) -> bool {
        (self.compare)(&self.data[a], &self.data[b]) == Ordering::Less
    }

    fn sift_up(&mut self, mut idx: usize) -> usize {
        while idx > 0 {
            let parent = (idx - 1) / 2;
            if !self.less(idx, parent) {
                break;
            }
            self.data.swap(idx, parent);
            idx = parent;
        }
        idx
    }

    fn sift_down(&mut self, mut idx: usize) {
        let len = self.data.len();
        loop {
            let left = 2 * idx + 1;
            if left >= len {
                return;
            }
            let right = left + 1;
            let child = if right < len && self.less(right, left) {
                right
            } else {
                left
            };
            if !self.less(child, idx) {
                return;
            }
            self.data.swap(idx, child);
            idx = child;
        }
    }
}

#[cfg(test)]
mod test {
    use rand::Rng;

    use super::{MinHeap, DEFAULT_HEAP_CAPACITY};
    use crate::error::Error;

    #[test]
    fn test_empty() {
        let mut heap = MinHeap::new(|a: &u32, b: &u32| a.cmp(b));
        assert!(heap.peek().is_none());
        let err = heap.dequeue().unwrap_err();
        assert_eq!(err.downcast_ref::<Error>(), Some(&Error::HeapEmpty));

        let err = MinHeap::with_capacity(0, |a: &u32, b: &u32| a.cmp(b)).unwrap_err();
        assert_eq!(
            err.downcast_ref::<Error>(),
            Some(&Error::InvalidCapacity("heap capacity"))
        );
    }

    #[test]
    fn test_enqueue_reports_new_root() {
        let mut heap = MinHeap::new(|a: &u32, b: &u32| a.cmp(b));
        assert!(heap.enqueue(5));
        assert!(!heap.enqueue(7));
        assert!(heap.enqueue(1));
        // Equal to the root does not displace it.
        assert!(!heap.enqueue(1));
        assert_eq!(heap.peek(), Some(&1));
    }

    #[test]
    fn test_capacity_hysteresis() -> anyhow::Result<()> {
        let mut heap = MinHeap::with_capacity(2, |a: &u32, b: &u32| a.cmp(b))?;
        for i in 0..5 {
            heap.enqueue(i);
        }
        assert_eq!(heap.capacity(), 8);

        // At or below the default nothing shrinks.
        heap.dequeue()?;
        heap.dequeue()?;
        assert_eq!(heap.capacity(), 8);

        let mut heap = MinHeap::new(|a: &u32, b: &u32| a.cmp(b));
        for i in 0..(DEFAULT_HEAP_CAPACITY as u32 * 4 + 1) {
            heap.enqueue(i);
        }
        assert_eq!(heap.capacity(), DEFAULT_HEAP_CAPACITY * 8);
        while heap.len() >= DEFAULT_HEAP_CAPACITY * 4 {
            heap.dequeue()?;
        }
        assert_eq!(heap.capacity(), DEFAULT_HEAP_CAPACITY * 4);

        // Going back and forth across the boundary does not flap.
        heap.enqueue(0);
        heap.dequeue()?;
        assert_eq!(heap.capacity(), DEFAULT_HEAP_CAPACITY * 4);

        while !heap.is_empty() {
            heap.dequeue()?;
        }
        assert_eq!(heap.capacity(), DEFAULT_HEAP_CAPACITY);
        Ok(())
    }

    #[test]
    fn test_random_interleaving() -> anyhow::Result<()> {
        let mut rng = rand::thread_rng();
        for _ in 0..20 {
            let mut heap = MinHeap::with_capacity(1, |a: &i32, b: &i32| a.cmp(b))?;
            let mut model: Vec<i32> = Vec::new();
            for _ in 0..500 {
                if model.is_empty() || rng.gen_bool(0.6) {
                    let v = rng.gen_range(-50..50);
                    heap.enqueue(v);
                    model.push(v);
                } else {
                    let min = *model.iter().min().unwrap();
                    let pos = model.iter().position(|v| *v == min).unwrap();
                    model.swap_remove(pos);
                    assert_eq!(heap.dequeue()?, min);
                }
                assert_eq!(heap.len(), model.len());
            }
            let mut drained = Vec::new();
            while !heap.is_empty() {
                drained.push(heap.dequeue()?);
            }
            model.sort();
            assert_eq!(drained, model);
        }
        Ok(())
    }

    #[test]
    fn test_custom_comparison() -> anyhow::Result<()> {
        let mut heap = MinHeap::new(|a: &(u8, char), b: &(u8, char)| b.0.cmp(&a.0));
        for e in [(1, 'a'), (9, 'b'), (4, 'c')] {
            heap.enqueue(e);
        }
        assert_eq!(heap.dequeue()?, (9, 'b'));
        assert_eq!(heap.dequeue()?, (4, 'c'));
        assert_eq!(heap.dequeue()?, (1, 'a'));
        Ok(())
    }
}
