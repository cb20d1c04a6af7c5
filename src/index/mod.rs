pub mod bptree;
pub mod btree;
pub mod radix;
pub mod skiplist;

use std::path::Path;

use bytes::Bytes;

use crate::{
  data::log_record::LogRecordPos,
  errors::Result,
  option::{IndexType, IteratorOptions},
};

/// Ordered map from key to on-disk record position.
///
/// The engine only relies on key ordering and uniqueness; everything else is
/// the backend's business.
pub trait Indexer: Sync + Send {
  /// Stores a position, returning the one it displaced.
  fn put(&self, key: Vec<u8>, pos: LogRecordPos) -> Option<LogRecordPos>;

  fn get(&self, key: Vec<u8>) -> Option<LogRecordPos>;

  /// Removes a key, returning the position it held.
  fn delete(&self, key: Vec<u8>) -> Option<LogRecordPos>;

  /// Number of live keys.
  fn size(&self) -> usize;

  fn list_keys(&self) -> Result<Vec<Bytes>>;

  fn iterator(&self, options: IteratorOptions) -> Box<dyn IndexIterator>;
}

pub fn new_indexer<P>(index_type: &IndexType, dir_path: P) -> Box<dyn Indexer>
where
  P: AsRef<Path>,
{
  match index_type {
    IndexType::BTree => Box::new(btree::BTree::new()),
    IndexType::RadixTree => Box::new(radix::RadixTree::new()),
    IndexType::SkipList => Box::new(skiplist::SkipList::new()),
    IndexType::BPlusTree => Box::new(bptree::BPlusTree::new(dir_path)),
  }
}

/// Cursor over an ordered snapshot of the index taken at construction time.
pub trait IndexIterator: Sync + Send {
  /// Returns to the first entry.
  fn rewind(&mut self);

  /// Positions at the first key >= `key` (<= when reversed).
  fn seek(&mut self, key: Vec<u8>);

  fn next(&mut self) -> Option<(&Vec<u8>, &LogRecordPos)>;
}

/// The one iterator every backend hands out: entries are copied out of the
/// index at construction, ascending by key, and reversed here on demand.
pub(crate) struct SnapshotIterator {
  items: Vec<(Vec<u8>, LogRecordPos)>,
  curr_index: usize,
  options: IteratorOptions,
}

impl SnapshotIterator {
  /// `items` must arrive sorted ascending by key.
  pub(crate) fn new(mut items: Vec<(Vec<u8>, LogRecordPos)>, options: IteratorOptions) -> Self {
    if options.reverse {
      items.reverse();
    }
    Self {
      items,
      curr_index: 0,
      options,
    }
  }
}

impl IndexIterator for SnapshotIterator {
  fn rewind(&mut self) {
    self.curr_index = 0;
  }

  fn seek(&mut self, key: Vec<u8>) {
    self.curr_index = match self.items.binary_search_by(|(k, _)| {
      if self.options.reverse {
        k.cmp(&key).reverse()
      } else {
        k.cmp(&key)
      }
    }) {
      Ok(idx) => idx,
      Err(idx) => idx,
    };
  }

  fn next(&mut self) -> Option<(&Vec<u8>, &LogRecordPos)> {
    while self.curr_index < self.items.len() {
      let idx = self.curr_index;
      self.curr_index += 1;
      let prefix = &self.options.prefix;
      if prefix.is_empty() || self.items[idx].0.starts_with(prefix) {
        let item = &self.items[idx];
        return Some((&item.0, &item.1));
      }
    }
    None
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn pos(file_id: u32, offset: u64) -> LogRecordPos {
    LogRecordPos {
      file_id,
      offset,
      size: 16,
    }
  }

  fn sample_items() -> Vec<(Vec<u8>, LogRecordPos)> {
    vec![
      (b"aacd".to_vec(), pos(1, 0)),
      (b"acde".to_vec(), pos(1, 16)),
      (b"bbae".to_vec(), pos(1, 32)),
      (b"bbcd".to_vec(), pos(2, 0)),
    ]
  }

  #[test]
  fn test_snapshot_iterator_forward() {
    let mut iter = SnapshotIterator::new(sample_items(), IteratorOptions::default());
    let mut keys = Vec::new();
    while let Some((key, _)) = iter.next() {
      keys.push(key.clone());
    }
    assert_eq!(keys, vec![b"aacd".to_vec(), b"acde".to_vec(), b"bbae".to_vec(), b"bbcd".to_vec()]);
  }

  #[test]
  fn test_snapshot_iterator_reverse_and_seek() {
    let mut iter = SnapshotIterator::new(
      sample_items(),
      IteratorOptions {
        prefix: Vec::new(),
        reverse: true,
      },
    );
    // in reverse order, seek lands on the first key <= the target
    iter.seek(b"bb".to_vec());
    let (key, _) = iter.next().unwrap();
    assert_eq!(key, &b"acde".to_vec());

    iter.rewind();
    let (key, _) = iter.next().unwrap();
    assert_eq!(key, &b"bbcd".to_vec());
  }

  #[test]
  fn test_snapshot_iterator_prefix() {
    let mut iter = SnapshotIterator::new(
      sample_items(),
      IteratorOptions {
        prefix: b"bb".to_vec(),
        reverse: false,
      },
    );
    let mut keys = Vec::new();
    while let Some((key, _)) = iter.next() {
      keys.push(key.clone());
    }
    assert_eq!(keys, vec![b"bbae".to_vec(), b"bbcd".to_vec()]);
  }
}
