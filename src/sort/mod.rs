// Ordering rules and the strategies that apply them.
//
// Small inputs are sorted in memory with a stable sort. Anything above the
// configured threshold is handed to the merge sorter, which spills sorted
// blocks and merges them back with a heap. Both paths keep ties in input
// order.

use std::{cmp::Ordering, rc::Rc};

use tracing::debug;

use crate::{
    config::Config,
    encoding::Item,
    fs::OsDir,
    hugeset::HugeSet,
    reader::Cursor,
};

pub mod heap;
pub mod merge;


pub use heap::MinHeap;
pub use merge::{MergeSorter, MergeState};

/// A comparison, whether it is reversed, and an optional rule to break ties.
pub struct ItemOrder<T> {
    compare: Rc<dyn Fn(&T, &T) -> Ordering>,
    descending: bool,
    then: Option<Box<ItemOrder<T>>>,
}

impl<T> Clone for ItemOrder<T> {
    fn clone(&self) -> Self {
        ItemOrder {
            compare: self.compare.clone(),
            descending: self.descending,
            then: self.then.clone(),
        }
    }
}

impl<T> std::fmt::Debug for ItemOrder<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ItemOrder")
            .field("descending", &self.descending)
            .field("then", &self.then)
            .finish()
    }
}

impl<T: 'static> ItemOrder<T> {
    pub fn by<F>(compare: F) -> Self
    where
        F: Fn(&T, &T) -> Ordering + 'static,
    {
        ItemOrder {
            compare: Rc::new(compare),
            descending: false,
            then: None,
        }
    }

    pub fn by_key<K, F>(key: F) -> Self
    where
        K: Ord,
        F: Fn(&T) -> K + 'static,
    {
        Self::by(move |a, b| key(a).cmp(&key(b)))
    }

    pub fn natural() -> Self
    where
        T: Ord,
    {
        Self::by(|a: &T, b: &T| a.cmp(b))
    }

    /// Reverses this link of the chain only.
    pub fn descending(mut self) -> Self {
        self.descending = true;
        self
    }

    pub fn is_descending(&self) -> bool {
        self.descending
    }

    /// Appends `next` to the end of the chain.
    pub fn then(mut self, next: ItemOrder<T>) -> Self {
        self.then = Some(Box::new(match self.then.take() {
            Some(rest) => rest.then(next),
            None => next,
        }));
        self
    }

    pub fn compare(&self, a: &T, b: &T) -> Ordering {
        let ord = (self.compare)(a, b);
        let ord = if self.descending { ord.reverse() } else { ord };
        match (ord, &self.then) {
            (Ordering::Equal, Some(then)) => then.compare(a, b),
            (ord, _) => ord,
        }
    }
}

/// Consumes a cursor into a set in the order a rule describes.
///
/// This is the point to swap in something other than a local sort, e.g. an
/// order the data already arrives in.
pub trait ItemSorter<T: Item> {
    fn sort(
        &self,
        source: &mut dyn Cursor<T>,
        order: &ItemOrder<T>,
        dest: &mut HugeSet<T>,
    ) -> anyhow::Result<()>;
}

#[derive(Debug, Clone, Default)]
pub struct DefaultSorter {
    config: Config,
}

impl DefaultSorter {
    pub fn new(config: Config) -> Self {
        DefaultSorter { config }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    fn sort_external<T: Item>(
        &self,
        pending: Vec<T>,
        source: &mut dyn Cursor<T>,
        order: &ItemOrder<T>,
        dest: &mut HugeSet<T>,
    ) -> anyhow::Result<()> {
        let dir = match &self.config.spill_dir {
            Some(path) => OsDir::new(path)?,
            None => OsDir::temp()?,
        };
        let mut merge = MergeSorter::new(dir, order.clone(), &self.config)?;
        for item in pending {
            merge.push(item)?;
        }
        while let Some(item) = source.advance()? {
            merge.push(item.clone())?;
        }
        merge.finish()?;
        loop {
            let batch = merge.read(self.config.flush_batch)?;
            if batch.is_empty() {
                break;
            }
            dest.append_all(batch)?;
        }
        merge.close()
    }
}

impl<T: Item> ItemSorter<T> for DefaultSorter {
    fn sort(
        &self,
        source: &mut dyn Cursor<T>,
        order: &ItemOrder<T>,
        dest: &mut HugeSet<T>,
    ) -> anyhow::Result<()> {
        let threshold = self.config.sort_threshold;
        if let Some(n) = source.size_hint() {
            if n > threshold {
                debug!(elements = n, "sorting externally");
                return self.sort_external(Vec::new(), source, order, dest);
            }
        }

        // Size unknown or small: buffer until we either run out or cross
        // the threshold.
        let mut items = Vec::new();
        while let Some(item) = source.advance()? {
            items.push(item.clone());
            if items.len() > threshold {
                debug!(elements = items.len(), "sorting externally");
                return self.sort_external(items, source, order, dest);
            }
        }

        debug!(elements = items.len(), "sorting in memory");
        items.sort_by(|a, b| order.compare(a, b));
        dest.append_all(items)
    }
}
