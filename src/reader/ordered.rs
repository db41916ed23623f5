use std::cmp::Ordering;

use anyhow::anyhow;
use tracing::debug;

use crate::{
    config::Config,
    encoding::Item,
    hugeset::{HugeSet, ReverseCursor},
    sort::{DefaultSorter, ItemOrder, ItemSorter},
};

use super::{Cursor, Position};

/// Records how a source should be ordered and sorts it on first read.
///
/// The primary rule decides the order; the secondary rule only breaks ties
/// left by the primary. Setting either rule again after the result has been
/// built throws the result away, and the next read sorts again from the
/// start of the source.
pub struct OrderedReader<T, C>
where
    T: Item,
{
    source: C,
    // A copy of `source` when it is not a `HugeSet` itself.
    staged: Option<HugeSet<T>>,
    primary: ItemOrder<T>,
    secondary: Option<ItemOrder<T>>,
    needs_sort: bool,
    result: Option<HugeSet<T>>,
    sorter: Option<Box<dyn ItemSorter<T>>>,
    config: Config,
}

impl<T, C> std::fmt::Debug for OrderedReader<T, C>
where
    T: Item,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OrderedReader")
            .field("primary", &self.primary)
            .field("secondary", &self.secondary)
            .field("needs_sort", &self.needs_sort)
            .field("staged", &self.staged.is_some())
            .finish()
    }
}

impl<T, C> OrderedReader<T, C>
where
    T: Item,
    C: Cursor<T>,
{
    pub fn new(source: C, order: ItemOrder<T>) -> Self {
        OrderedReader {
            source,
            staged: None,
            primary: order,
            secondary: None,
            needs_sort: true,
            result: None,
            sorter: None,
            config: Config::default(),
        }
    }

    /// Used for staging sources that are not sets and by the default sorter.
    pub fn with_config(mut self, config: Config) -> Self {
        self.config = config;
        self.needs_sort = true;
        self
    }

    pub fn with_sorter<S>(mut self, sorter: S) -> Self
    where
        S: ItemSorter<T> + 'static,
    {
        self.sorter = Some(Box::new(sorter));
        self.needs_sort = true;
        self
    }

    pub fn set_order(&mut self, order: ItemOrder<T>) {
        self.primary = order;
        self.needs_sort = true;
    }

    pub fn set_then(&mut self, order: ItemOrder<T>) {
        self.secondary = Some(order);
        self.needs_sort = true;
    }

    pub fn order_by<F>(mut self, compare: F) -> Self
    where
        F: Fn(&T, &T) -> Ordering + 'static,
    {
        self.set_order(ItemOrder::by(compare));
        self
    }

    pub fn order_by_descending<F>(mut self, compare: F) -> Self
    where
        F: Fn(&T, &T) -> Ordering + 'static,
    {
        self.set_order(ItemOrder::by(compare).descending());
        self
    }

    pub fn order_by_key<K, F>(mut self, key: F) -> Self
    where
        K: Ord,
        F: Fn(&T) -> K + 'static,
    {
        self.set_order(ItemOrder::by_key(key));
        self
    }

    pub fn order_by_key_descending<K, F>(mut self, key: F) -> Self
    where
        K: Ord,
        F: Fn(&T) -> K + 'static,
    {
        self.set_order(ItemOrder::by_key(key).descending());
        self
    }

    pub fn then_by<F>(mut self, compare: F) -> Self
    where
        F: Fn(&T, &T) -> Ordering + 'static,
    {
        self.set_then(ItemOrder::by(compare));
        self
    }

    pub fn then_by_descending<F>(mut self, compare: F) -> Self
    where
        F: Fn(&T, &T) -> Ordering + 'static,
    {
        self.set_then(ItemOrder::by(compare).descending());
        self
    }

    pub fn then_by_key<K, F>(mut self, key: F) -> Self
    where
        K: Ord,
        F: Fn(&T) -> K + 'static,
    {
        self.set_then(ItemOrder::by_key(key));
        self
    }

    pub fn then_by_key_descending<K, F>(mut self, key: F) -> Self
    where
        K: Ord,
        F: Fn(&T) -> K + 'static,
    {
        self.set_then(ItemOrder::by_key(key).descending());
        self
    }

    /// The full rule: primary, then secondary for ties.
    pub fn rule(&self) -> ItemOrder<T> {
        match &self.secondary {
            Some(secondary) => self.primary.clone().then(secondary.clone()),
            None => self.primary.clone(),
        }
    }

    pub fn into_inner(self) -> C {
        self.source
    }

    /// Sorts if needed and walks the sorted result from the back.
    pub fn reverse(&mut self) -> anyhow::Result<ReverseCursor<'_, T>> {
        self.sorted()?.reverse()
    }

    fn materialize(&mut self) -> anyhow::Result<()> {
        if !self.needs_sort && self.result.is_some() {
            return Ok(());
        }
        self.result = None;

        if self.staged.is_none() && self.source.as_hugeset_mut().is_none() {
            let mut staged = HugeSet::new(self.config.clone())?;
            while let Some(item) = self.source.advance()? {
                staged.append(item.clone())?;
            }
            self.staged = Some(staged);
        }

        let rule = self.rule();
        let input: &mut HugeSet<T> = if let Some(staged) = self.staged.as_mut() {
            staged
        } else if let Some(set) = self.source.as_hugeset_mut() {
            set
        } else {
            return Err(anyhow!("ordered source is neither staged nor a set"));
        };
        input.reset()?;

        let mut dest = input.new_sink()?;
        match &self.sorter {
            Some(sorter) => sorter.sort(input, &rule, &mut dest)?,
            None => DefaultSorter::new(self.config.clone()).sort(input, &rule, &mut dest)?,
        }
        dest.reset()?;
        debug!(elements = dest.len(), "materialized ordered reader");

        self.result = Some(dest);
        self.needs_sort = false;
        Ok(())
    }

    fn sorted(&mut self) -> anyhow::Result<&mut HugeSet<T>> {
        self.materialize()?;
        self.result
            .as_mut()
            .ok_or_else(|| anyhow!("ordering produced no result"))
    }
}

impl<T, C> Cursor<T> for OrderedReader<T, C>
where
    T: Item,
    C: Cursor<T>,
{
    fn advance(&mut self) -> anyhow::Result<Option<&T>> {
        self.sorted()?.advance()
    }

    fn current(&self) -> Option<&T> {
        self.result.as_ref().and_then(|r| r.current())
    }

    fn position(&self) -> Position {
        match &self.result {
            Some(result) => result.position(),
            None => Position::BeforeFirst,
        }
    }

    fn skip(&mut self, n: usize) -> anyhow::Result<usize> {
        self.sorted()?.skip(n)
    }

    fn take(&mut self, n: usize) -> anyhow::Result<(HugeSet<T>, usize)> {
        self.sorted()?.take(n)
    }

    fn reset(&mut self) -> anyhow::Result<()> {
        match self.result.as_mut() {
            Some(result) => result.reset(),
            None => Ok(()),
        }
    }

    fn resettable(&self) -> bool {
        true
    }

    fn size_hint(&self) -> Option<usize> {
        match &self.result {
            Some(result) => result.size_hint(),
            None => self.source.size_hint(),
        }
    }

    fn new_sink(&self) -> anyhow::Result<HugeSet<T>> {
        match &self.result {
            Some(result) => result.new_sink(),
            None => self.source.new_sink(),
        }
    }
}

#[cfg(test)]
mod test {
    use rand::Rng;

    use crate::{
        config::Config,
        hugeset::HugeSet,
        reader::{Cursor, ForwardReader, Position},
        sort::{ItemOrder, ItemSorter},
        store::MockStore,
    };

    fn set_of<T: crate::encoding::Item>(capacity: usize, items: Vec<T>) -> anyhow::Result<HugeSet<T>> {
        let mut set = HugeSet::with_store(
            Config::default().with_memory_capacity(capacity),
            Box::new(MockStore::<T>::new()),
        )?;
        set.append_all(items)?;
        Ok(set)
    }

    #[test]
    fn test_sort_is_deferred() -> anyhow::Result<()> {
        let set = set_of(2, vec![5_u32, 1, 4, 2, 3])?;
        let mut ordered = set.order_ascending();
        assert_eq!(ordered.position(), Position::BeforeFirst);
        assert_eq!(ordered.size_hint(), Some(5));

        assert_eq!(ordered.advance()?, Some(&1));
        assert_eq!(ordered.to_vec()?, vec![2, 3, 4, 5]);

        ordered.reset()?;
        assert_eq!(ordered.to_vec()?, vec![1, 2, 3, 4, 5]);

        // The source is left unsorted.
        let mut set = ordered.into_inner();
        set.reset()?;
        assert_eq!(set.to_vec()?, vec![5, 1, 4, 2, 3]);
        Ok(())
    }

    #[test]
    fn test_random_small_sort() -> anyhow::Result<()> {
        let mut rng = rand::thread_rng();
        for _ in 0..20 {
            let input: Vec<i64> = (0..rng.gen_range(0..200))
                .map(|_| rng.gen_range(-1000..1000))
                .collect();
            let mut ordered = set_of(rng.gen_range(1..32), input.clone())?.order_ascending();
            let mut expected = input;
            expected.sort();
            assert_eq!(ordered.to_vec()?, expected);
        }
        Ok(())
    }

    #[test]
    fn test_composite_order() -> anyhow::Result<()> {
        let input = vec![(2_u8, 1_u8), (1, 1), (2, 9), (1, 5), (2, 4), (1, 3)];
        let mut ordered = set_of(4, input)?
            .order_by_key(|p: &(u8, u8)| p.0)
            .then_by_key_descending(|p: &(u8, u8)| p.1);
        assert_eq!(
            ordered.to_vec()?,
            vec![(1, 5), (1, 3), (1, 1), (2, 9), (2, 4), (2, 1)]
        );
        Ok(())
    }

    #[test]
    fn test_reordering_rearms() -> anyhow::Result<()> {
        let mut ordered = set_of(3, vec![3_u32, 1, 2])?.order_ascending();
        assert_eq!(ordered.to_vec()?, vec![1, 2, 3]);

        let mut ordered = ordered.order_by_descending(|a: &u32, b: &u32| a.cmp(b));
        assert_eq!(ordered.to_vec()?, vec![3, 2, 1]);

        ordered.set_order(ItemOrder::by_key(|v: &u32| *v % 3));
        assert_eq!(ordered.to_vec()?, vec![3, 1, 2]);
        Ok(())
    }

    #[test]
    fn test_stages_plain_sources() -> anyhow::Result<()> {
        // Not resettable, so everything has to be copied out first.
        let source = ForwardReader::over(vec!["pear", "fig", "apple", "kiwi"].into_iter().map(String::from));
        let mut ordered = source
            .order_by_key(|s: &String| s.len())
            .then_by(|a: &String, b: &String| a.cmp(b))
            .with_config(Config::default().with_memory_capacity(2));

        let (mut head, n) = ordered.take(2)?;
        assert_eq!(n, 2);
        assert_eq!(head.to_vec()?, vec!["fig", "kiwi"]);
        assert_eq!(ordered.to_vec()?, vec!["pear", "apple"]);

        // Re-sorting reuses the staged copy.
        let mut ordered = ordered.order_by_key_descending(|s: &String| s.len());
        assert_eq!(ordered.to_vec()?, vec!["apple", "kiwi", "pear", "fig"]);
        Ok(())
    }

    #[test]
    fn test_reverse() -> anyhow::Result<()> {
        let mut ordered = set_of(2, vec![5_u32, 1, 4, 2, 3])?.order_ascending();
        let mut rev = ordered.reverse()?;
        assert_eq!(rev.to_vec()?, vec![5, 4, 3, 2, 1]);
        Ok(())
    }

    struct KeepInputOrder;

    impl ItemSorter<u32> for KeepInputOrder {
        fn sort(
            &self,
            source: &mut dyn Cursor<u32>,
            _order: &ItemOrder<u32>,
            dest: &mut HugeSet<u32>,
        ) -> anyhow::Result<()> {
            while let Some(item) = source.advance()? {
                dest.append(*item)?;
            }
            Ok(())
        }
    }

    #[test]
    fn test_custom_sorter() -> anyhow::Result<()> {
        let mut ordered = set_of(2, vec![3_u32, 1, 2])?
            .order_ascending()
            .with_sorter(KeepInputOrder);
        assert_eq!(ordered.to_vec()?, vec![3, 1, 2]);
        Ok(())
    }
}
