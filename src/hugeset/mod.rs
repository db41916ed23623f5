// A set that keeps a bounded window of elements in memory and spills the
// rest to a backing store.
//
// Appends go to the memory window until it holds `memory_capacity`
// elements. The next append moves the entire window into the store in one
// batch, clears it, and then takes the new element. Everything in the store
// was appended before everything in memory, so reading in append order means
// draining the store first and the window after it.
//
// Reading goes through the same read-ahead buffer every other cursor uses;
// the `Tiers` below are its source.

use std::{any::Any, collections::VecDeque};

use anyhow::bail;
use tracing::debug;

use crate::{
    config::Config,
    encoding::{encode_to_vec, Item},
    error::Error,
    fs::OsDir,
    reader::{Cursor, ForwardReader, Position, ReadAhead, Source},
    store::{BackingStore, FileStore},
};

#[derive(Debug)]
struct Tiers<T> {
    memory: Vec<T>,
    store: Box<dyn BackingStore<T>>,
    capacity: usize,
    // Elements handed out since the last rewind, in append order.
    pulled: usize,
    // Where the store's forward cursor is. Lags `pulled` when elements were
    // read out of memory and then spilled.
    store_read: usize,
}

impl<T: Item> Tiers<T> {
    fn len(&self) -> usize {
        self.store.len() + self.memory.len()
    }

    fn append(&mut self, item: T) -> anyhow::Result<()> {
        if self.memory.len() >= self.capacity {
            self.store.append(&self.memory)?;
            self.memory.clear();
            debug!(
                spilled = self.capacity,
                stored = self.store.len(),
                "spilled memory window"
            );
        }
        self.memory.push(item);
        Ok(())
    }
}

impl<T: Item> Source<T> for Tiers<T> {
    fn fill(&mut self, max: usize, out: &mut VecDeque<T>) -> anyhow::Result<()> {
        let stored = self.store.len();
        if self.pulled < stored {
            if self.store_read < self.pulled {
                self.store_read += self.store.skip(self.pulled - self.store_read)?;
            }
            let batch = self.store.read(std::cmp::min(max, stored - self.pulled))?;
            self.store_read += batch.len();
            self.pulled += batch.len();
            out.extend(batch);
            return Ok(());
        }

        let start = self.pulled - stored;
        let end = std::cmp::min(start.saturating_add(max), self.memory.len());
        if start < end {
            out.extend(self.memory[start..end].iter().cloned());
            self.pulled += end - start;
        }
        Ok(())
    }

    // Only moves the logical position. The store catches up on the next fill.
    fn skip(&mut self, n: usize) -> anyhow::Result<usize> {
        let skipped = std::cmp::min(n, self.len() - self.pulled);
        self.pulled += skipped;
        Ok(skipped)
    }

    fn rewind(&mut self) -> anyhow::Result<()> {
        self.store.reset();
        self.pulled = 0;
        self.store_read = 0;
        Ok(())
    }

    fn resettable(&self) -> bool {
        true
    }

    fn remaining(&self) -> Option<usize> {
        Some(self.len() - self.pulled)
    }
}

#[derive(Debug)]
pub struct HugeSet<T> {
    tiers: Tiers<T>,
    ahead: ReadAhead<T>,
    config: Config,
}

impl<T: Item> HugeSet<T> {
    /// A set spilling to files in `config.spill_dir`, or in a temporary
    /// directory of its own, made on the first spill, when none is given.
    pub fn new(config: Config) -> anyhow::Result<Self> {
        config.validate()?;
        let dir = match &config.spill_dir {
            Some(path) => OsDir::new(path)?,
            None => OsDir::lazy_temp(),
        };
        let store = FileStore::<T, _>::new(dir).with_scan_batch(config.read_ahead);
        Self::with_store(config, Box::new(store))
    }

    pub fn with_store(config: Config, store: Box<dyn BackingStore<T>>) -> anyhow::Result<Self> {
        config.validate()?;
        Ok(HugeSet {
            tiers: Tiers {
                memory: Vec::new(),
                store,
                capacity: config.memory_capacity,
                pulled: 0,
                store_read: 0,
            },
            ahead: ReadAhead::new(config.read_ahead),
            config,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn append(&mut self, item: T) -> anyhow::Result<()> {
        self.tiers.append(item)
    }

    pub fn append_all<I>(&mut self, items: I) -> anyhow::Result<()>
    where
        I: IntoIterator<Item = T>,
    {
        for item in items {
            self.tiers.append(item)?;
        }
        Ok(())
    }

    /// Every element ever appended.
    pub fn len(&self) -> usize {
        self.tiers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn memory_len(&self) -> usize {
        self.tiers.memory.len()
    }

    pub fn spilled_len(&self) -> usize {
        self.tiers.store.len()
    }

    /// Membership by serialized bytes, memory window first.
    pub fn contains(&mut self, item: &T) -> anyhow::Result<bool> {
        let needle = encode_to_vec(item)?;
        for held in &self.tiers.memory {
            if encode_to_vec(held)? == needle {
                return Ok(true);
            }
        }
        self.tiers.store.contains(item)
    }

    pub fn reset(&mut self) -> anyhow::Result<()> {
        self.tiers.rewind()?;
        self.ahead.clear();
        Ok(())
    }

    /// Newest element first. Independent of the forward cursor.
    pub fn reverse(&mut self) -> anyhow::Result<ReverseCursor<'_, T>> {
        let mut source = ReverseSource {
            left: self.tiers.memory.len(),
            memory: &self.tiers.memory,
            store: &mut self.tiers.store,
        };
        source.rewind()?;
        Ok(ForwardReader::with_read_ahead(source, self.config.read_ahead))
    }
}

impl<T: Item> Cursor<T> for HugeSet<T> {
    fn advance(&mut self) -> anyhow::Result<Option<&T>> {
        self.ahead.advance(&mut self.tiers)
    }

    fn current(&self) -> Option<&T> {
        self.ahead.current()
    }

    fn position(&self) -> Position {
        self.ahead.position()
    }

    fn skip(&mut self, n: usize) -> anyhow::Result<usize> {
        self.ahead.skip(n, &mut self.tiers)
    }

    fn reset(&mut self) -> anyhow::Result<()> {
        HugeSet::reset(self)
    }

    fn resettable(&self) -> bool {
        true
    }

    fn size_hint(&self) -> Option<usize> {
        self.tiers
            .remaining()
            .map(|r| r + self.ahead.buffered())
    }

    fn new_sink(&self) -> anyhow::Result<HugeSet<T>> {
        HugeSet::with_store(self.config.clone(), self.tiers.store.sibling()?)
    }

    fn as_hugeset_mut(&mut self) -> Option<&mut HugeSet<T>> {
        Some(self)
    }
}

/// Walks the memory window newest first, then the store from its end.
pub struct ReverseSource<'a, T> {
    memory: &'a [T],
    // Memory elements not visited yet: [0, left).
    left: usize,
    store: &'a mut Box<dyn BackingStore<T>>,
}

impl<'a, T> std::fmt::Debug for ReverseSource<'a, T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReverseSource")
            .field("left", &self.left)
            .field("store", &self.store)
            .finish()
    }
}

impl<'a, T: Item> Source<T> for ReverseSource<'a, T> {
    fn fill(&mut self, max: usize, out: &mut VecDeque<T>) -> anyhow::Result<()> {
        if self.left > 0 {
            let from = self.left.saturating_sub(max);
            out.extend(self.memory[from..self.left].iter().rev().cloned());
            self.left = from;
            return Ok(());
        }
        out.extend(self.store.reverse_read(max)?);
        Ok(())
    }

    fn rewind(&mut self) -> anyhow::Result<()> {
        self.left = self.memory.len();
        self.store.reverse_reset();
        Ok(())
    }

    fn resettable(&self) -> bool {
        true
    }
}

pub type ReverseCursor<'a, T> = ForwardReader<T, ReverseSource<'a, T>>;

/// A set whose element type is only known at runtime.
pub trait AnySet {
    fn element_type(&self) -> &'static str;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn append_any(&mut self, item: Box<dyn Any>) -> anyhow::Result<()>;

    fn contains_any(&mut self, item: &dyn Any) -> anyhow::Result<bool>;

    fn reset(&mut self) -> anyhow::Result<()>;
}

impl<T: Item> AnySet for HugeSet<T> {
    fn element_type(&self) -> &'static str {
        std::any::type_name::<T>()
    }

    fn len(&self) -> usize {
        HugeSet::len(self)
    }

    fn append_any(&mut self, item: Box<dyn Any>) -> anyhow::Result<()> {
        match item.downcast::<T>() {
            Ok(item) => self.append(*item),
            Err(_) => bail!(Error::TypeMismatch {
                expected: std::any::type_name::<T>()
            }),
        }
    }

    fn contains_any(&mut self, item: &dyn Any) -> anyhow::Result<bool> {
        match item.downcast_ref::<T>() {
            Some(item) => self.contains(item),
            None => bail!(Error::TypeMismatch {
                expected: std::any::type_name::<T>()
            }),
        }
    }

    fn reset(&mut self) -> anyhow::Result<()> {
        HugeSet::reset(self)
    }
}
