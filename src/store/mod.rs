// Backing stores hold the part of a set that does not fit in memory.
//
// A store has two independent cursors over its records, both in append
// order: a forward cursor used by `read`, and a backward cursor used by
// `reverse_read`. Neither is safe to share between readers.

use std::sync::atomic::{AtomicUsize, Ordering};

pub mod file_store;
pub mod mock_store;

pub use file_store::FileStore;
pub use mock_store::MockStore;

pub trait BackingStore<T>: std::fmt::Debug {
    fn append(&mut self, items: &[T]) -> anyhow::Result<()>;

    /// Up to `count` records from the forward cursor. Empty once there is
    /// nothing left.
    fn read(&mut self, count: usize) -> anyhow::Result<Vec<T>>;

    /// Up to `count` records walking backwards from the backward cursor,
    /// returned in the order they were visited.
    fn reverse_read(&mut self, count: usize) -> anyhow::Result<Vec<T>>;

    /// Moves the forward cursor without handing anything back.
    fn skip(&mut self, count: usize) -> anyhow::Result<usize> {
        Ok(self.read(count)?.len())
    }

    /// Forward cursor back to before the first record.
    fn reset(&mut self);

    /// Backward cursor to after the last record.
    fn reverse_reset(&mut self);

    /// Compares serialized byte images, not decoded values.
    fn contains(&mut self, item: &T) -> anyhow::Result<bool>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// A new, empty store of the same kind living next to this one.
    fn sibling(&self) -> anyhow::Result<Box<dyn BackingStore<T>>>;
}

static NEXT_FILE: AtomicUsize = AtomicUsize::new(0);

pub(crate) fn next_file_name(prefix: &str) -> String {
    format!("{}{}", prefix, NEXT_FILE.fetch_add(1, Ordering::Relaxed))
}
