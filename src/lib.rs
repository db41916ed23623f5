//! Collections and sorting for sequences that do not fit in memory.
//!
//! A [`HugeSet`] keeps a bounded window of elements in memory and spills the
//! rest to a [`BackingStore`], by default a flat file in a temporary
//! directory. Everything that can be read is a [`Cursor`]: single pass,
//! forward only, with read-ahead buffering in front of whatever it reads
//! from. Ordering a cursor is deferred until the first read, and inputs
//! above [`Config::sort_threshold`] are sorted externally by a
//! [`MergeSorter`].
//!
//! ```no_run
//! use hugeset::{Config, Cursor, HugeSet};
//!
//! # fn main() -> anyhow::Result<()> {
//! let mut set = HugeSet::new(Config::default().with_memory_capacity(2))?;
//! set.append_all(vec![5_u32, 1, 4, 2, 3])?;
//! assert_eq!(set.reverse()?.to_vec()?, vec![3, 2, 4, 1, 5]);
//! assert_eq!(set.order_ascending().to_vec()?, vec![1, 2, 3, 4, 5]);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod encoding;
pub mod error;
pub mod fs;
pub mod hugeset;
pub mod reader;
pub mod sort;
pub mod store;

pub use config::Config;
pub use encoding::{Decode, Encode, Item, Json};
pub use error::Error;
pub use hugeset::{AnySet, HugeSet, ReverseCursor};
pub use reader::{Cursor, ForwardReader, OrderedReader, Position, VecReader};
pub use sort::{DefaultSorter, ItemOrder, ItemSorter, MergeSorter, MergeState, MinHeap};
pub use store::{BackingStore, FileStore, MockStore};
