// External merge sort.
//
// Elements are pushed into an in-memory block. Every time the block fills up
// it is sorted and written to its own file. `finish` spills whatever is left
// and merges all blocks through a min-heap into a single result file, which
// is then read back in batches. Block files are removed as soon as the merge
// is done; the result file goes away on `close` or drop.
//
// Ties between blocks are broken by block sequence number, and each block is
// sorted with a stable sort, so equal elements come out in push order.

use std::collections::VecDeque;

use anyhow::bail;
use tracing::{debug, warn};

use crate::{
    config::Config,
    encoding::Item,
    error::Error,
    fs::StoreDir,
    reader::{ForwardReader, Source},
    store::{next_file_name, BackingStore, FileStore},
};

use super::{heap::MinHeap, ItemOrder};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeState {
    Accumulating,
    Sorting,
    Draining,
    Terminal,
}

// One spilled block and the elements read ahead from it.
struct Run<T, D: StoreDir> {
    store: FileStore<T, D>,
    buffered: VecDeque<T>,
    exhausted: bool,
}

impl<T, D> Run<T, D>
where
    T: Item,
    D: StoreDir + 'static,
{
    fn next(&mut self, read_ahead: usize) -> anyhow::Result<Option<T>> {
        if self.buffered.is_empty() && !self.exhausted {
            let batch = self.store.read(read_ahead)?;
            if batch.is_empty() {
                self.exhausted = true;
            }
            self.buffered.extend(batch);
        }
        Ok(self.buffered.pop_front())
    }
}

struct MergeEntry<T> {
    item: T,
    seq: usize,
}

pub struct MergeSorter<T, D>
where
    T: Item,
    D: StoreDir + 'static,
{
    dir: D,
    prefix: String,
    order: ItemOrder<T>,
    block_size: usize,
    flush_batch: usize,
    read_ahead: usize,
    state: MergeState,
    pending: Vec<T>,
    blocks: Vec<FileStore<T, D>>,
    result: Option<FileStore<T, D>>,
    pushed: usize,
    drained: usize,
}

impl<T, D> std::fmt::Debug for MergeSorter<T, D>
where
    T: Item,
    D: StoreDir + 'static,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MergeSorter")
            .field("prefix", &self.prefix)
            .field("state", &self.state)
            .field("pending", &self.pending.len())
            .field("blocks", &self.blocks.len())
            .field("pushed", &self.pushed)
            .finish()
    }
}

impl<T, D> MergeSorter<T, D>
where
    T: Item,
    D: StoreDir + 'static,
{
    pub fn new(dir: D, order: ItemOrder<T>, config: &Config) -> anyhow::Result<Self> {
        Self::named(dir, next_file_name("sort"), order, config)
    }

    /// Block files are called `{prefix}-block{seq}` and the result
    /// `{prefix}-result`.
    pub fn named<S: Into<String>>(
        dir: D,
        prefix: S,
        order: ItemOrder<T>,
        config: &Config,
    ) -> anyhow::Result<Self> {
        config.validate()?;
        Ok(MergeSorter {
            dir,
            prefix: prefix.into(),
            order,
            block_size: config.block_size,
            flush_batch: config.flush_batch,
            read_ahead: config.read_ahead,
            state: MergeState::Accumulating,
            pending: Vec::new(),
            blocks: Vec::new(),
            result: None,
            pushed: 0,
            drained: 0,
        })
    }

    pub fn state(&self) -> MergeState {
        self.state
    }

    /// Elements pushed so far.
    pub fn len(&self) -> usize {
        self.pushed
    }

    pub fn is_empty(&self) -> bool {
        self.pushed == 0
    }

    pub fn push(&mut self, item: T) -> anyhow::Result<()> {
        if self.state != MergeState::Accumulating {
            bail!(Error::InputClosed);
        }
        self.pending.push(item);
        self.pushed += 1;
        if self.pending.len() >= self.block_size {
            self.spill_block()?;
        }
        Ok(())
    }

    fn spill_block(&mut self) -> anyhow::Result<()> {
        if self.pending.is_empty() {
            return Ok(());
        }
        let order = &self.order;
        self.pending.sort_by(|a, b| order.compare(a, b));

        let seq = self.blocks.len();
        let mut block = FileStore::named(
            self.dir.clone(),
            format!("{}-block{}", self.prefix, seq),
        );
        block.append(&self.pending)?;
        debug!(block = seq, elements = self.pending.len(), "spilled sort block");
        self.pending.clear();
        self.blocks.push(block);
        Ok(())
    }

    /// Marks the end of input and runs the merge.
    pub fn finish(&mut self) -> anyhow::Result<()> {
        if self.state != MergeState::Accumulating {
            bail!(Error::InputClosed);
        }
        self.state = MergeState::Sorting;
        self.spill_block()?;
        self.merge()?;
        self.state = MergeState::Draining;
        Ok(())
    }

    fn merge(&mut self) -> anyhow::Result<()> {
        let order = self.order.clone();
        let mut heap = MinHeap::with_capacity(
            std::cmp::max(self.blocks.len(), 1),
            move |a: &MergeEntry<T>, b: &MergeEntry<T>| {
                order.compare(&a.item, &b.item).then(a.seq.cmp(&b.seq))
            },
        )?;

        let mut runs: Vec<Run<T, D>> = self
            .blocks
            .drain(..)
            .map(|store| Run {
                store,
                buffered: VecDeque::new(),
                exhausted: false,
            })
            .collect();
        for (seq, run) in runs.iter_mut().enumerate() {
            run.store.reset();
            if let Some(item) = run.next(self.read_ahead)? {
                heap.enqueue(MergeEntry { item, seq });
            }
        }

        let mut result = FileStore::named(self.dir.clone(), format!("{}-result", self.prefix));
        let mut batch = Vec::with_capacity(self.flush_batch);
        while !heap.is_empty() {
            let MergeEntry { item, seq } = heap.dequeue()?;
            batch.push(item);
            if let Some(next) = runs[seq].next(self.read_ahead)? {
                heap.enqueue(MergeEntry { item: next, seq });
            }
            if batch.len() >= self.flush_batch {
                result.append(&batch)?;
                batch.clear();
            }
        }
        result.append(&batch)?;
        debug!(blocks = runs.len(), elements = result.len(), "merged sort blocks");

        for run in runs {
            if let Err(e) = run.store.destroy() {
                warn!(error = %e, "failed to remove sort block");
            }
        }
        self.result = Some(result);
        Ok(())
    }

    fn result(&mut self) -> anyhow::Result<Option<&mut FileStore<T, D>>> {
        match self.state {
            MergeState::Accumulating | MergeState::Sorting => bail!(Error::NotFinished),
            MergeState::Draining | MergeState::Terminal => Ok(self.result.as_mut()),
        }
    }

    /// Up to `count` of the next elements in sorted order. Empty once drained,
    /// and always empty after `close`.
    pub fn read(&mut self, count: usize) -> anyhow::Result<Vec<T>> {
        let out = match self.result()? {
            Some(result) => result.read(count)?,
            None => Vec::new(),
        };
        self.drained += out.len();
        Ok(out)
    }

    pub fn reverse_read(&mut self, count: usize) -> anyhow::Result<Vec<T>> {
        match self.result()? {
            Some(result) => result.reverse_read(count),
            None => Ok(Vec::new()),
        }
    }

    pub fn reset(&mut self) -> anyhow::Result<()> {
        if let Some(result) = self.result()? {
            result.reset();
        }
        self.drained = 0;
        Ok(())
    }

    pub fn reverse_reset(&mut self) -> anyhow::Result<()> {
        if let Some(result) = self.result()? {
            result.reverse_reset();
        }
        Ok(())
    }

    /// Drops everything, removing every file still on disk. A file that
    /// cannot be removed is logged and left behind.
    pub fn close(&mut self) -> anyhow::Result<()> {
        self.state = MergeState::Terminal;
        self.pending.clear();
        for block in self.blocks.drain(..) {
            if let Err(e) = block.destroy() {
                warn!(error = %e, "failed to remove sort block");
            }
        }
        if let Some(result) = self.result.take() {
            if let Err(e) = result.destroy() {
                warn!(error = %e, "failed to remove sort result");
            }
        }
        Ok(())
    }

    pub fn into_reader(self) -> anyhow::Result<ForwardReader<T, Self>> {
        match self.state {
            MergeState::Draining => {
                let read_ahead = self.read_ahead;
                Ok(ForwardReader::with_read_ahead(self, read_ahead))
            }
            _ => bail!(Error::NotFinished),
        }
    }
}

impl<T, D> Source<T> for MergeSorter<T, D>
where
    T: Item,
    D: StoreDir + 'static,
{
    fn fill(&mut self, max: usize, out: &mut VecDeque<T>) -> anyhow::Result<()> {
        out.extend(self.read(max)?);
        Ok(())
    }

    fn skip(&mut self, n: usize) -> anyhow::Result<usize> {
        let skipped = match self.result()? {
            Some(result) => result.skip(n)?,
            None => 0,
        };
        self.drained += skipped;
        Ok(skipped)
    }

    fn rewind(&mut self) -> anyhow::Result<()> {
        self.reset()
    }

    fn resettable(&self) -> bool {
        true
    }

    fn remaining(&self) -> Option<usize> {
        Some(
            self.result
                .as_ref()
                .map_or(0, |r| r.len().saturating_sub(self.drained)),
        )
    }
}

#[cfg(test)]
mod test {
    use crate::{
        config::Config,
        error::Error,
        fs::{MockDir, OsDir, StoreDir},
        reader::Cursor,
        sort::ItemOrder,
    };

    use super::{MergeSorter, MergeState};

    fn config(block_size: usize, flush_batch: usize) -> Config {
        Config::default()
            .with_block_size(block_size)
            .with_flush_batch(flush_batch)
            .with_read_ahead(2)
    }

    #[test]
    fn test_small_blocks_leave_nothing_behind() -> anyhow::Result<()> {
        let mut dir = MockDir::new();
        let mut sorter = MergeSorter::new(dir.clone(), ItemOrder::natural(), &config(2, 5_000))?;
        for i in [9_u32, 7, 5, 3, 1] {
            sorter.push(i)?;
        }
        assert_eq!(sorter.state(), MergeState::Accumulating);
        assert_eq!(dir.ls()?.len(), 2);

        sorter.finish()?;
        assert_eq!(sorter.state(), MergeState::Draining);
        // Only the result is left once the blocks are merged.
        assert_eq!(dir.ls()?.len(), 1);

        assert_eq!(sorter.read(100)?, vec![1, 3, 5, 7, 9]);
        assert!(sorter.read(100)?.is_empty());

        sorter.close()?;
        assert_eq!(sorter.state(), MergeState::Terminal);
        assert!(dir.ls()?.is_empty());
        Ok(())
    }

    #[test]
    fn test_on_disk() -> anyhow::Result<()> {
        let dir = OsDir::temp()?;
        let path = dir.path().unwrap().to_owned();
        let mut sorter = MergeSorter::new(dir, ItemOrder::natural(), &config(2, 2))?;
        for i in [9_u32, 7, 5, 3, 1] {
            sorter.push(i)?;
        }
        sorter.finish()?;
        assert_eq!(sorter.read(3)?, vec![1, 3, 5]);
        assert_eq!(sorter.read(3)?, vec![7, 9]);
        sorter.close()?;
        assert_eq!(std::fs::read_dir(&path)?.count(), 0);
        Ok(())
    }

    #[test]
    fn test_close_survives_failed_cleanup() -> anyhow::Result<()> {
        let mut dir = MockDir::new();
        let mut sorter = MergeSorter::new(dir.clone(), ItemOrder::natural(), &config(2, 5_000))?;
        for i in [9_u32, 7, 5, 3, 1] {
            sorter.push(i)?;
        }
        sorter.finish()?;
        assert_eq!(sorter.read(100)?, vec![1, 3, 5, 7, 9]);

        (*dir.fs).borrow_mut().schedule_crash(0);
        sorter.close()?;
        assert_eq!(sorter.state(), MergeState::Terminal);
        assert!(sorter.read(100)?.is_empty());

        // The result file could not be removed and is still there.
        (*dir.fs).borrow_mut().recover();
        assert_eq!(dir.ls()?.len(), 1);
        Ok(())
    }

    #[test]
    fn test_empty_input() -> anyhow::Result<()> {
        let mut dir = MockDir::new();
        let mut sorter = MergeSorter::<u32, _>::new(dir.clone(), ItemOrder::natural(), &config(2, 2))?;
        sorter.finish()?;
        assert!(sorter.read(10)?.is_empty());
        assert!(sorter.reverse_read(10)?.is_empty());
        assert!(dir.ls()?.is_empty());
        Ok(())
    }

    #[test]
    fn test_usage_errors() -> anyhow::Result<()> {
        let mut sorter = MergeSorter::new(MockDir::new(), ItemOrder::natural(), &config(2, 2))?;
        sorter.push(1_u32)?;

        let err = sorter.read(1).unwrap_err();
        assert_eq!(err.downcast_ref::<Error>(), Some(&Error::NotFinished));
        let err = sorter.reset().unwrap_err();
        assert_eq!(err.downcast_ref::<Error>(), Some(&Error::NotFinished));

        sorter.finish()?;
        let err = sorter.push(2).unwrap_err();
        assert_eq!(err.downcast_ref::<Error>(), Some(&Error::InputClosed));
        let err = sorter.finish().unwrap_err();
        assert_eq!(err.downcast_ref::<Error>(), Some(&Error::InputClosed));

        let err = MergeSorter::<u32, _>::new(MockDir::new(), ItemOrder::natural(), &config(0, 2))
            .unwrap_err();
        assert_eq!(
            err.downcast_ref::<Error>(),
            Some(&Error::InvalidCapacity("block_size"))
        );
        Ok(())
    }

    #[test]
    fn test_ties_keep_push_order() -> anyhow::Result<()> {
        let mut sorter = MergeSorter::new(
            MockDir::new(),
            ItemOrder::by_key(|p: &(u8, u32)| p.0),
            &config(3, 4),
        )?;
        let input: Vec<(u8, u32)> = (0..20).map(|i| ((i * 7 % 3) as u8, i)).collect();
        for p in input.iter().cloned() {
            sorter.push(p)?;
        }
        sorter.finish()?;

        let mut expected = input;
        expected.sort_by_key(|p| p.0);
        assert_eq!(sorter.read(100)?, expected);
        Ok(())
    }

    #[test]
    fn test_reverse_and_reset() -> anyhow::Result<()> {
        let mut sorter = MergeSorter::new(
            MockDir::new(),
            ItemOrder::<u32>::natural().descending(),
            &config(2, 2),
        )?;
        for i in [4, 8, 1, 6, 3] {
            sorter.push(i)?;
        }
        sorter.finish()?;
        assert_eq!(sorter.read(2)?, vec![8, 6]);

        sorter.reverse_reset()?;
        assert_eq!(sorter.reverse_read(10)?, vec![1, 3, 4, 6, 8]);

        sorter.reset()?;
        assert_eq!(sorter.read(10)?, vec![8, 6, 4, 3, 1]);
        Ok(())
    }

    #[test]
    fn test_drop_removes_blocks() -> anyhow::Result<()> {
        let mut dir = MockDir::new();
        let mut sorter = MergeSorter::new(dir.clone(), ItemOrder::natural(), &config(2, 2))?;
        for i in 0..5_u32 {
            sorter.push(i)?;
        }
        assert_eq!(dir.ls()?.len(), 2);
        drop(sorter);
        assert!(dir.ls()?.is_empty());
        Ok(())
    }

    #[test]
    fn test_into_reader() -> anyhow::Result<()> {
        let mut sorter = MergeSorter::new(MockDir::new(), ItemOrder::natural(), &config(3, 2))?;
        for i in (0..10_u32).rev() {
            sorter.push(i)?;
        }
        sorter.finish()?;

        let mut reader = sorter.into_reader()?;
        assert!(reader.resettable());
        assert_eq!(reader.size_hint(), Some(10));
        assert_eq!(reader.skip(4)?, 4);
        assert_eq!(reader.current(), Some(&3));
        assert_eq!(reader.to_vec()?, vec![4, 5, 6, 7, 8, 9]);

        reader.reset()?;
        assert_eq!(reader.to_vec()?, (0..10).collect::<Vec<u32>>());
        Ok(())
    }
}
