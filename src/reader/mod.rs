// Cursors.
//
// A cursor is a single-pass, forward-only view over a sequence. It starts
// before the first element, moves one element at a time with `advance`, and
// ends after the last one. Only some cursors can be rewound.
//
// Most cursors are a `ReadAhead` buffer sitting in front of a `Source`: the
// buffer pulls up to `read_ahead` elements at a time so that sources backed
// by files pay for I/O in batches rather than per element.

use std::{cmp::Ordering, collections::VecDeque, marker::PhantomData};

use anyhow::bail;

use crate::{
    config::{Config, DEFAULT_READ_AHEAD},
    encoding::Item,
    error::Error,
    hugeset::HugeSet,
    sort::ItemOrder,
};

pub mod ordered;

pub use ordered::OrderedReader;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Position {
    BeforeFirst,
    At(usize),
    AfterLast,
}

pub trait Cursor<T: Item> {
    /// Moves to the next element and returns it, or None once the cursor is
    /// after the last element.
    fn advance(&mut self) -> anyhow::Result<Option<&T>>;

    /// The element at the current position. None before the first and after
    /// the last element.
    fn current(&self) -> Option<&T>;

    fn position(&self) -> Position;

    /// Moves up to `n` elements forward and returns how many were passed. The
    /// cursor ends up on the last element skipped.
    fn skip(&mut self, n: usize) -> anyhow::Result<usize> {
        let mut skipped = 0;
        while skipped < n && self.advance()?.is_some() {
            skipped += 1;
        }
        Ok(skipped)
    }

    /// Copies up to `n` of the following elements into a new set.
    fn take(&mut self, n: usize) -> anyhow::Result<(HugeSet<T>, usize)> {
        let mut out = self.new_sink()?;
        let mut taken = 0;
        while taken < n {
            match self.advance()? {
                Some(item) => out.append(item.clone())?,
                None => break,
            }
            taken += 1;
        }
        Ok((out, taken))
    }

    fn reset(&mut self) -> anyhow::Result<()> {
        bail!(Error::NotResettable)
    }

    fn resettable(&self) -> bool {
        false
    }

    /// How many elements are left, when that is known.
    fn size_hint(&self) -> Option<usize> {
        None
    }

    /// An empty set suitable for holding this cursor's elements.
    fn new_sink(&self) -> anyhow::Result<HugeSet<T>> {
        HugeSet::new(Config::default())
    }

    fn as_hugeset_mut(&mut self) -> Option<&mut HugeSet<T>> {
        None
    }

    /// Drains the rest of the cursor.
    fn to_vec(&mut self) -> anyhow::Result<Vec<T>> {
        let mut out = Vec::new();
        while let Some(item) = self.advance()? {
            out.push(item.clone());
        }
        Ok(out)
    }

    fn items(&mut self) -> Items<'_, T, Self>
    where
        Self: Sized,
    {
        Items {
            cursor: self,
            _marker: PhantomData,
        }
    }

    fn ordered(self, order: ItemOrder<T>) -> OrderedReader<T, Self>
    where
        Self: Sized,
    {
        OrderedReader::new(self, order)
    }

    fn order_by<F>(self, compare: F) -> OrderedReader<T, Self>
    where
        Self: Sized,
        F: Fn(&T, &T) -> Ordering + 'static,
    {
        self.ordered(ItemOrder::by(compare))
    }

    fn order_by_descending<F>(self, compare: F) -> OrderedReader<T, Self>
    where
        Self: Sized,
        F: Fn(&T, &T) -> Ordering + 'static,
    {
        self.ordered(ItemOrder::by(compare).descending())
    }

    fn order_by_key<K, F>(self, key: F) -> OrderedReader<T, Self>
    where
        Self: Sized,
        K: Ord,
        F: Fn(&T) -> K + 'static,
    {
        self.ordered(ItemOrder::by_key(key))
    }

    fn order_by_key_descending<K, F>(self, key: F) -> OrderedReader<T, Self>
    where
        Self: Sized,
        K: Ord,
        F: Fn(&T) -> K + 'static,
    {
        self.ordered(ItemOrder::by_key(key).descending())
    }

    fn order_ascending(self) -> OrderedReader<T, Self>
    where
        Self: Sized,
        T: Ord,
    {
        self.ordered(ItemOrder::natural())
    }

    fn order_descending(self) -> OrderedReader<T, Self>
    where
        Self: Sized,
        T: Ord,
    {
        self.ordered(ItemOrder::natural().descending())
    }
}

impl<T, C> Cursor<T> for &mut C
where
    T: Item,
    C: Cursor<T> + ?Sized,
{
    fn advance(&mut self) -> anyhow::Result<Option<&T>> {
        (**self).advance()
    }

    fn current(&self) -> Option<&T> {
        (**self).current()
    }

    fn position(&self) -> Position {
        (**self).position()
    }

    fn skip(&mut self, n: usize) -> anyhow::Result<usize> {
        (**self).skip(n)
    }

    fn take(&mut self, n: usize) -> anyhow::Result<(HugeSet<T>, usize)> {
        (**self).take(n)
    }

    fn reset(&mut self) -> anyhow::Result<()> {
        (**self).reset()
    }

    fn resettable(&self) -> bool {
        (**self).resettable()
    }

    fn size_hint(&self) -> Option<usize> {
        (**self).size_hint()
    }

    fn new_sink(&self) -> anyhow::Result<HugeSet<T>> {
        (**self).new_sink()
    }

    fn as_hugeset_mut(&mut self) -> Option<&mut HugeSet<T>> {
        (**self).as_hugeset_mut()
    }
}

impl<T, C> Cursor<T> for Box<C>
where
    T: Item,
    C: Cursor<T> + ?Sized,
{
    fn advance(&mut self) -> anyhow::Result<Option<&T>> {
        (**self).advance()
    }

    fn current(&self) -> Option<&T> {
        (**self).current()
    }

    fn position(&self) -> Position {
        (**self).position()
    }

    fn skip(&mut self, n: usize) -> anyhow::Result<usize> {
        (**self).skip(n)
    }

    fn take(&mut self, n: usize) -> anyhow::Result<(HugeSet<T>, usize)> {
        (**self).take(n)
    }

    fn reset(&mut self) -> anyhow::Result<()> {
        (**self).reset()
    }

    fn resettable(&self) -> bool {
        (**self).resettable()
    }

    fn size_hint(&self) -> Option<usize> {
        (**self).size_hint()
    }

    fn new_sink(&self) -> anyhow::Result<HugeSet<T>> {
        (**self).new_sink()
    }

    fn as_hugeset_mut(&mut self) -> Option<&mut HugeSet<T>> {
        (**self).as_hugeset_mut()
    }
}

// Adapts a cursor to a plain iterator. Every element is cloned out.
pub struct Items<'a, T, C: ?Sized> {
    cursor: &'a mut C,
    _marker: PhantomData<T>,
}

impl<'a, T, C> Iterator for Items<'a, T, C>
where
    T: Item,
    C: Cursor<T> + ?Sized,
{
    type Item = anyhow::Result<T>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.cursor.advance() {
            Ok(Some(item)) => Some(Ok(item.clone())),
            Ok(None) => None,
            Err(e) => Some(Err(e)),
        }
    }
}

/// Where a `ReadAhead` gets its elements from.
pub trait Source<T> {
    /// Pushes at most `max` elements onto `out`. Pushing nothing means the
    /// source is exhausted.
    fn fill(&mut self, max: usize, out: &mut VecDeque<T>) -> anyhow::Result<()>;

    fn skip(&mut self, n: usize) -> anyhow::Result<usize> {
        let mut skipped = 0;
        let mut scratch = VecDeque::new();
        while skipped < n {
            self.fill(n - skipped, &mut scratch)?;
            if scratch.is_empty() {
                break;
            }
            skipped += scratch.len();
            scratch.clear();
        }
        Ok(skipped)
    }

    fn rewind(&mut self) -> anyhow::Result<()> {
        bail!(Error::NotResettable)
    }

    fn resettable(&self) -> bool {
        false
    }

    fn remaining(&self) -> Option<usize> {
        None
    }
}

#[derive(Debug)]
pub struct ReadAhead<T> {
    buf: VecDeque<T>,
    current: Option<T>,
    // Elements moved past so far, including the current one.
    consumed: usize,
    exhausted: bool,
    max: usize,
}

impl<T> ReadAhead<T> {
    pub fn new(max: usize) -> Self {
        ReadAhead {
            buf: VecDeque::new(),
            current: None,
            consumed: 0,
            exhausted: false,
            max: max.max(1),
        }
    }

    pub fn current(&self) -> Option<&T> {
        self.current.as_ref()
    }

    pub fn position(&self) -> Position {
        if self.exhausted {
            Position::AfterLast
        } else if self.consumed == 0 {
            Position::BeforeFirst
        } else {
            Position::At(self.consumed - 1)
        }
    }

    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Back to before the first element, forgetting anything buffered.
    pub fn clear(&mut self) {
        self.buf.clear();
        self.current = None;
        self.consumed = 0;
        self.exhausted = false;
    }

    fn finish(&mut self) {
        self.buf.clear();
        self.current = None;
        self.exhausted = true;
    }

    pub fn advance<S>(&mut self, source: &mut S) -> anyhow::Result<Option<&T>>
    where
        S: Source<T> + ?Sized,
    {
        if self.exhausted {
            return Ok(None);
        }
        if self.buf.is_empty() {
            source.fill(self.max, &mut self.buf)?;
        }
        match self.buf.pop_front() {
            Some(item) => {
                self.consumed += 1;
                self.current = Some(item);
                Ok(self.current.as_ref())
            }
            None => {
                self.finish();
                Ok(None)
            }
        }
    }

    // Buffered elements are used up first. Past those, the source is asked to
    // jump directly to just before the target so only the landing element is
    // ever materialized.
    pub fn skip<S>(&mut self, n: usize, source: &mut S) -> anyhow::Result<usize>
    where
        S: Source<T> + ?Sized,
    {
        if n == 0 || self.exhausted {
            return Ok(0);
        }

        let from_buf = std::cmp::min(n, self.buf.len());
        if from_buf > 0 {
            self.current = self.buf.drain(..from_buf).last();
            self.consumed += from_buf;
        }
        let mut skipped = from_buf;
        let remaining = n - skipped;
        if remaining == 0 {
            return Ok(skipped);
        }

        if remaining > 1 {
            let jumped = source.skip(remaining - 1)?;
            self.consumed += jumped;
            skipped += jumped;
            self.current = None;
            if jumped < remaining - 1 {
                self.finish();
                return Ok(skipped);
            }
        }

        if self.advance(source)?.is_some() {
            skipped += 1;
        }
        Ok(skipped)
    }
}

#[derive(Debug)]
pub struct ForwardReader<T, S> {
    source: S,
    ahead: ReadAhead<T>,
}

pub type VecReader<T> = ForwardReader<T, VecSource<T>>;

impl<T, S> ForwardReader<T, S>
where
    S: Source<T>,
{
    pub fn new(source: S) -> Self {
        Self::with_read_ahead(source, DEFAULT_READ_AHEAD)
    }

    pub fn with_read_ahead(source: S, read_ahead: usize) -> Self {
        ForwardReader {
            source,
            ahead: ReadAhead::new(read_ahead),
        }
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn into_source(self) -> S {
        self.source
    }
}

impl<T: Item> ForwardReader<T, VecSource<T>> {
    pub fn from_vec(items: Vec<T>) -> Self {
        Self::new(VecSource::new(items))
    }
}

impl<T, I> ForwardReader<T, IterSource<I>>
where
    T: Item,
    I: Iterator<Item = T>,
{
    pub fn over<J>(items: J) -> Self
    where
        J: IntoIterator<IntoIter = I>,
    {
        Self::new(IterSource::new(items.into_iter()))
    }
}

impl<T, S> Cursor<T> for ForwardReader<T, S>
where
    T: Item,
    S: Source<T>,
{
    fn advance(&mut self) -> anyhow::Result<Option<&T>> {
        self.ahead.advance(&mut self.source)
    }

    fn current(&self) -> Option<&T> {
        self.ahead.current()
    }

    fn position(&self) -> Position {
        self.ahead.position()
    }

    fn skip(&mut self, n: usize) -> anyhow::Result<usize> {
        self.ahead.skip(n, &mut self.source)
    }

    fn reset(&mut self) -> anyhow::Result<()> {
        if !self.source.resettable() {
            bail!(Error::NotResettable);
        }
        self.source.rewind()?;
        self.ahead.clear();
        Ok(())
    }

    fn resettable(&self) -> bool {
        self.source.resettable()
    }

    fn size_hint(&self) -> Option<usize> {
        self.source
            .remaining()
            .map(|r| r + self.ahead.buffered())
    }
}

#[derive(Debug, Clone)]
pub struct VecSource<T> {
    items: Vec<T>,
    next: usize,
}

impl<T> VecSource<T> {
    pub fn new(items: Vec<T>) -> Self {
        VecSource { items, next: 0 }
    }
}

impl<T: Clone> Source<T> for VecSource<T> {
    fn fill(&mut self, max: usize, out: &mut VecDeque<T>) -> anyhow::Result<()> {
        let to = std::cmp::min(self.next.saturating_add(max), self.items.len());
        out.extend(self.items[self.next..to].iter().cloned());
        self.next = to;
        Ok(())
    }

    fn skip(&mut self, n: usize) -> anyhow::Result<usize> {
        let to = std::cmp::min(self.next.saturating_add(n), self.items.len());
        let skipped = to - self.next;
        self.next = to;
        Ok(skipped)
    }

    fn rewind(&mut self) -> anyhow::Result<()> {
        self.next = 0;
        Ok(())
    }

    fn resettable(&self) -> bool {
        true
    }

    fn remaining(&self) -> Option<usize> {
        Some(self.items.len() - self.next)
    }
}

#[derive(Debug)]
pub struct IterSource<I> {
    iter: I,
}

impl<I> IterSource<I> {
    pub fn new(iter: I) -> Self {
        IterSource { iter }
    }
}

impl<T, I> Source<T> for IterSource<I>
where
    I: Iterator<Item = T>,
{
    fn fill(&mut self, max: usize, out: &mut VecDeque<T>) -> anyhow::Result<()> {
        out.extend(self.iter.by_ref().take(max));
        Ok(())
    }

    fn remaining(&self) -> Option<usize> {
        match self.iter.size_hint() {
            (lo, Some(hi)) if lo == hi => Some(lo),
            _ => None,
        }
    }
}

#[cfg(test)]
mod test {
    use std::{cell::Cell, collections::VecDeque, rc::Rc};

    use super::{Cursor, ForwardReader, Position, Source};
    use crate::error::Error;

    #[test]
    fn test_positions() -> anyhow::Result<()> {
        let mut r = ForwardReader::from_vec(vec![10_u32, 20]);
        assert_eq!(r.position(), Position::BeforeFirst);
        assert_eq!(r.current(), None);

        assert_eq!(r.advance()?, Some(&10));
        assert_eq!(r.position(), Position::At(0));
        assert_eq!(r.current(), Some(&10));

        assert_eq!(r.advance()?, Some(&20));
        assert_eq!(r.advance()?, None);
        assert_eq!(r.position(), Position::AfterLast);
        assert_eq!(r.current(), None);
        assert_eq!(r.advance()?, None);

        r.reset()?;
        assert_eq!(r.position(), Position::BeforeFirst);
        assert_eq!(r.to_vec()?, vec![10, 20]);
        Ok(())
    }

    // Counts how many elements the source actually handed over.
    struct Counting {
        next: u32,
        end: u32,
        pulled: Rc<Cell<usize>>,
    }

    impl Source<u32> for Counting {
        fn fill(&mut self, max: usize, out: &mut VecDeque<u32>) -> anyhow::Result<()> {
            while out.len() < max && self.next < self.end {
                out.push_back(self.next);
                self.next += 1;
                self.pulled.set(self.pulled.get() + 1);
            }
            Ok(())
        }

        fn skip(&mut self, n: usize) -> anyhow::Result<usize> {
            let k = std::cmp::min(n as u32, self.end - self.next);
            self.next += k;
            Ok(k as usize)
        }
    }

    #[test]
    fn test_read_ahead_is_bounded() -> anyhow::Result<()> {
        let pulled = Rc::new(Cell::new(0));
        let mut r = ForwardReader::with_read_ahead(
            Counting {
                next: 0,
                end: 100,
                pulled: pulled.clone(),
            },
            3,
        );
        assert_eq!(r.advance()?, Some(&0));
        assert_eq!(pulled.get(), 3);

        // Two buffered elements go first, then the source jumps.
        assert_eq!(r.skip(4)?, 4);
        assert_eq!(r.current(), Some(&4));
        assert_eq!(r.position(), Position::At(4));
        assert_eq!(pulled.get(), 6);

        assert_eq!(r.skip(1000)?, 95);
        assert_eq!(r.position(), Position::AfterLast);
        assert_eq!(r.skip(1)?, 0);
        Ok(())
    }

    #[test]
    fn test_skip_lands_on_last_skipped() -> anyhow::Result<()> {
        let mut r = ForwardReader::from_vec((0..10_u32).collect());
        assert_eq!(r.skip(3)?, 3);
        assert_eq!(r.current(), Some(&2));
        assert_eq!(r.advance()?, Some(&3));
        assert_eq!(r.skip(6)?, 6);
        assert_eq!(r.current(), Some(&9));
        assert_eq!(r.skip(1)?, 0);
        assert_eq!(r.position(), Position::AfterLast);
        Ok(())
    }

    #[test]
    fn test_take() -> anyhow::Result<()> {
        let mut r = ForwardReader::from_vec((0..10_u32).collect());
        r.advance()?;
        let (mut first, n) = r.take(4)?;
        assert_eq!(n, 4);
        assert_eq!(first.to_vec()?, vec![1, 2, 3, 4]);

        let (mut rest, n) = r.take(100)?;
        assert_eq!(n, 5);
        assert_eq!(rest.len(), 5);
        assert_eq!(rest.to_vec()?, vec![5, 6, 7, 8, 9]);
        Ok(())
    }

    #[test]
    fn test_iter_source_is_not_resettable() -> anyhow::Result<()> {
        let mut r = ForwardReader::over(vec![1_u32, 2, 3]);
        assert!(!r.resettable());
        assert_eq!(r.size_hint(), Some(3));
        r.advance()?;

        let err = r.reset().unwrap_err();
        assert_eq!(err.downcast_ref::<Error>(), Some(&Error::NotResettable));
        // Nothing moved.
        assert_eq!(r.current(), Some(&1));
        assert_eq!(r.to_vec()?, vec![2, 3]);
        Ok(())
    }

    #[test]
    fn test_dyn_cursor() -> anyhow::Result<()> {
        let mut boxed: Box<dyn Cursor<String>> =
            Box::new(ForwardReader::from_vec(vec!["a".to_owned(), "b".to_owned()]));
        let items = boxed.items().collect::<anyhow::Result<Vec<_>>>()?;
        assert_eq!(items, vec!["a", "b"]);
        boxed.reset()?;
        assert_eq!(boxed.skip(5)?, 2);
        Ok(())
    }
}
