use std::marker::PhantomData;

use crate::encoding::{decode_from_slice, encode_to_vec, Item};

use super::BackingStore;

// Keeps encoded records in memory. Records still go through the serializer
// so membership has the same byte-image semantics as the file store.
#[derive(Debug)]
pub struct MockStore<T> {
    records: Vec<Vec<u8>>,
    forward: usize,
    backward: usize,
    _marker: PhantomData<T>,
}

impl<T> MockStore<T> {
    pub fn new() -> Self {
        MockStore {
            records: Vec::new(),
            forward: 0,
            backward: 0,
            _marker: PhantomData,
        }
    }
}

impl<T> Default for MockStore<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> BackingStore<T> for MockStore<T>
where
    T: Item,
{
    fn append(&mut self, items: &[T]) -> anyhow::Result<()> {
        for item in items {
            self.records.push(encode_to_vec(item)?);
        }
        Ok(())
    }

    fn read(&mut self, count: usize) -> anyhow::Result<Vec<T>> {
        let to = std::cmp::min(self.forward.saturating_add(count), self.records.len());
        let out = self.records[self.forward..to]
            .iter()
            .map(|r| decode_from_slice(r))
            .collect::<anyhow::Result<Vec<T>>>()?;
        self.forward = to;
        Ok(out)
    }

    fn reverse_read(&mut self, count: usize) -> anyhow::Result<Vec<T>> {
        let from = self.backward.saturating_sub(count);
        let out = self.records[from..self.backward]
            .iter()
            .rev()
            .map(|r| decode_from_slice(r))
            .collect::<anyhow::Result<Vec<T>>>()?;
        self.backward = from;
        Ok(out)
    }

    fn reset(&mut self) {
        self.forward = 0;
    }

    fn reverse_reset(&mut self) {
        self.backward = self.records.len();
    }

    fn contains(&mut self, item: &T) -> anyhow::Result<bool> {
        let needle = encode_to_vec(item)?;
        Ok(self.records.iter().any(|r| *r == needle))
    }

    fn len(&self) -> usize {
        self.records.len()
    }

    fn sibling(&self) -> anyhow::Result<Box<dyn BackingStore<T>>> {
        Ok(Box::new(MockStore::<T>::new()))
    }
}

#[cfg(test)]
mod test {
    use crate::store::BackingStore;

    use super::MockStore;

    #[test]
    fn test_cursors_are_independent() -> anyhow::Result<()> {
        let mut store = MockStore::new();
        store.append(&[1_u32, 2, 3, 4])?;
        store.reverse_reset();

        assert_eq!(store.read(1)?, vec![1]);
        assert_eq!(store.reverse_read(2)?, vec![4, 3]);
        assert_eq!(store.read(2)?, vec![2, 3]);
        assert_eq!(store.reverse_read(5)?, vec![2, 1]);
        assert_eq!(store.skip(5)?, 1);
        assert!(store.read(1)?.is_empty());
        Ok(())
    }
}
