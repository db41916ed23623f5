// A store backed by a single flat file.
//
// Records are written back to back with no framing. The only thing that
// knows where one ends and the next begins is `offsets`, which lives in
// memory for the lifetime of the store: the byte offset of every record, in
// append order. The length of record i is offsets[i+1] - offsets[i], or
// file_len - offsets[i] for the last one.
//
// The file is opened on every call and closed when the handle goes out of
// scope, so no descriptor is held between operations. A failed append can
// leave bytes in the file that `offsets` does not account for; nothing
// detects or repairs that.

use std::{
    io::{Read, Seek, SeekFrom},
    marker::PhantomData,
};

use anyhow::anyhow;

use crate::{
    config::DEFAULT_READ_AHEAD,
    encoding::{decode_from_slice, encode_to_vec, Encode, Item, KeyWriter},
    fs::{StoreDir, StoreFile},
};

use super::{next_file_name, BackingStore};

pub struct FileStore<T, D>
where
    D: StoreDir,
{
    dir: D,
    name: String,
    offsets: Vec<u64>,
    // Index of the next record `read` returns.
    forward: usize,
    // Records [0, backward) have not been visited by `reverse_read` yet.
    backward: usize,
    created: bool,
    // Records read per pass when scanning the whole file.
    scan_batch: usize,
    kw: KeyWriter,
    _marker: PhantomData<T>,
}

impl<T, D> std::fmt::Debug for FileStore<T, D>
where
    D: StoreDir,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileStore")
            .field("dir", &self.dir)
            .field("name", &self.name)
            .field("records", &self.offsets.len())
            .field("forward", &self.forward)
            .field("backward", &self.backward)
            .finish()
    }
}

impl<T, D> FileStore<T, D>
where
    T: Item,
    D: StoreDir,
{
    pub fn new(dir: D) -> Self {
        Self::named(dir, next_file_name("set"))
    }

    /// The file itself is only created by the first append.
    pub fn named<S: Into<String>>(dir: D, name: S) -> Self {
        FileStore {
            dir,
            name: name.into(),
            offsets: Vec::new(),
            forward: 0,
            backward: 0,
            created: false,
            scan_batch: DEFAULT_READ_AHEAD,
            kw: KeyWriter::new(),
            _marker: PhantomData,
        }
    }

    pub fn with_scan_batch(mut self, records: usize) -> Self {
        self.scan_batch = records.max(1);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn offsets(&self) -> &[u64] {
        &self.offsets
    }

    fn open(&mut self) -> anyhow::Result<D::File> {
        self.dir
            .open(&self.name)?
            .ok_or_else(|| anyhow!("store file {} is missing", self.name))
    }

    // Reads the raw bytes of records [from, to) in one go and splits them.
    fn read_range(&mut self, from: usize, to: usize) -> anyhow::Result<Vec<Vec<u8>>> {
        if from >= to {
            return Ok(Vec::new());
        }
        let mut file = self.open()?;
        let file_len = file.len()?;
        let start = self.offsets[from];
        let end = if to < self.offsets.len() {
            self.offsets[to]
        } else {
            file_len
        };

        let mut buf = vec![0_u8; (end - start) as usize];
        file.seek(SeekFrom::Start(start))?;
        file.read_exact(&mut buf)?;

        let mut out = Vec::with_capacity(to - from);
        for i in from..to {
            let lo = (self.offsets[i] - start) as usize;
            let hi = if i + 1 < to {
                (self.offsets[i + 1] - start) as usize
            } else {
                buf.len()
            };
            out.push(buf[lo..hi].to_vec());
        }
        Ok(out)
    }

    fn unlink(&mut self) -> anyhow::Result<()> {
        if self.created {
            self.dir.unlink(&self.name)?;
            self.created = false;
        }
        Ok(())
    }
}

impl<T, D> BackingStore<T> for FileStore<T, D>
where
    T: Item,
    D: StoreDir + 'static,
{
    fn append(&mut self, items: &[T]) -> anyhow::Result<()> {
        if items.is_empty() {
            return Ok(());
        }
        let mut file = match self.dir.open(&self.name)? {
            Some(file) => file,
            None => {
                let file = self
                    .dir
                    .create(&self.name)?
                    .ok_or_else(|| anyhow!("store file {} appeared concurrently", self.name))?;
                self.created = true;
                file
            }
        };
        let base = file.seek(SeekFrom::End(0))?;

        self.kw.clear();
        let mut offsets = Vec::with_capacity(items.len());
        for item in items {
            offsets.push(base + self.kw.as_bytes().len() as u64);
            item.write_bytes(&mut self.kw)?;
        }
        file.write(self.kw.as_bytes())?;
        self.offsets.extend(offsets);

        Ok(())
    }

    fn read(&mut self, count: usize) -> anyhow::Result<Vec<T>> {
        let from = self.forward;
        let to = std::cmp::min(from.saturating_add(count), self.offsets.len());
        let records = self.read_range(from, to)?;
        self.forward = to.max(from);
        records.iter().map(|r| decode_from_slice(r)).collect()
    }

    fn reverse_read(&mut self, count: usize) -> anyhow::Result<Vec<T>> {
        let to = std::cmp::min(self.backward, self.offsets.len());
        let from = to.saturating_sub(count);
        let records = self.read_range(from, to)?;
        self.backward = from;
        records.iter().rev().map(|r| decode_from_slice(r)).collect()
    }

    fn skip(&mut self, count: usize) -> anyhow::Result<usize> {
        let to = std::cmp::min(self.forward.saturating_add(count), self.offsets.len());
        let skipped = to.saturating_sub(self.forward);
        self.forward += skipped;
        Ok(skipped)
    }

    fn reset(&mut self) {
        self.forward = 0;
    }

    fn reverse_reset(&mut self) {
        self.backward = self.offsets.len();
    }

    fn contains(&mut self, item: &T) -> anyhow::Result<bool> {
        let needle = encode_to_vec(item)?;
        let len = self.offsets.len();
        let mut from = 0;
        while from < len {
            let to = std::cmp::min(from.saturating_add(self.scan_batch), len);
            if self.read_range(from, to)?.iter().any(|r| *r == needle) {
                return Ok(true);
            }
            from = to;
        }
        Ok(false)
    }

    fn len(&self) -> usize {
        self.offsets.len()
    }

    fn sibling(&self) -> anyhow::Result<Box<dyn BackingStore<T>>> {
        Ok(Box::new(
            FileStore::<T, D>::new(self.dir.clone()).with_scan_batch(self.scan_batch),
        ))
    }
}

impl<T, D> Drop for FileStore<T, D>
where
    D: StoreDir,
{
    fn drop(&mut self) {
        if !self.created {
            return;
        }
        if let Err(e) = self.dir.unlink(&self.name) {
            tracing::warn!(file = %self.name, error = %e, "failed to remove store file");
        }
    }
}

impl<T, D> FileStore<T, D>
where
    T: Item,
    D: StoreDir,
{
    /// Removes the file now rather than on drop, reporting any failure.
    pub fn destroy(mut self) -> anyhow::Result<()> {
        self.unlink()
    }
}
