use std::{collections::BTreeMap, sync::Arc};

use bytes::Bytes;
use parking_lot::RwLock;

use crate::{
  data::log_record::LogRecordPos,
  errors::Result,
  option::IteratorOptions,
};

use super::{IndexIterator, Indexer, SnapshotIterator};

/// Default index: a balanced ordered map guarded by a reader-writer lock.
pub struct BTree {
  tree: Arc<RwLock<BTreeMap<Vec<u8>, LogRecordPos>>>,
}

impl BTree {
  pub fn new() -> Self {
    Self {
      tree: Arc::new(RwLock::new(BTreeMap::new())),
    }
  }
}

impl Default for BTree {
  fn default() -> Self {
    Self::new()
  }
}

impl Indexer for BTree {
  fn put(&self, key: Vec<u8>, pos: LogRecordPos) -> Option<LogRecordPos> {
    let mut write_guard = self.tree.write();
    write_guard.insert(key, pos)
  }

  fn get(&self, key: Vec<u8>) -> Option<LogRecordPos> {
    let read_guard = self.tree.read();
    read_guard.get(&key).copied()
  }

  fn delete(&self, key: Vec<u8>) -> Option<LogRecordPos> {
    let mut write_guard = self.tree.write();
    write_guard.remove(&key)
  }

  fn size(&self) -> usize {
    self.tree.read().len()
  }

  fn list_keys(&self) -> Result<Vec<Bytes>> {
    let read_guard = self.tree.read();
    Ok(read_guard.keys().map(|k| Bytes::copy_from_slice(k)).collect())
  }

  fn iterator(&self, options: IteratorOptions) -> Box<dyn IndexIterator> {
    let read_guard = self.tree.read();
    let items = read_guard.iter().map(|(k, v)| (k.clone(), *v)).collect();
    Box::new(SnapshotIterator::new(items, options))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn pos(file_id: u32, offset: u64) -> LogRecordPos {
    LogRecordPos {
      file_id,
      offset,
      size: 12,
    }
  }

  #[test]
  fn test_btree_put_get() {
    let bt = BTree::new();
    assert!(bt.put(b"abc".to_vec(), pos(1, 10)).is_none());
    let displaced = bt.put(b"abc".to_vec(), pos(2, 20));
    assert_eq!(displaced.unwrap(), pos(1, 10));

    assert_eq!(bt.get(b"abc".to_vec()).unwrap(), pos(2, 20));
    assert!(bt.get(b"not-there".to_vec()).is_none());
  }

  #[test]
  fn test_btree_delete() {
    let bt = BTree::new();
    bt.put(b"abc".to_vec(), pos(1, 10));
    assert_eq!(bt.delete(b"abc".to_vec()).unwrap(), pos(1, 10));
    assert!(bt.delete(b"abc".to_vec()).is_none());
    assert!(bt.get(b"abc".to_vec()).is_none());
  }

  #[test]
  fn test_btree_size_and_list_keys() {
    let bt = BTree::new();
    assert_eq!(bt.size(), 0);
    bt.put(b"ccde".to_vec(), pos(1, 0));
    bt.put(b"aacd".to_vec(), pos(1, 12));
    bt.put(b"bbed".to_vec(), pos(1, 24));
    assert_eq!(bt.size(), 3);

    let keys = bt.list_keys().unwrap();
    assert_eq!(
      keys,
      vec![
        Bytes::from_static(b"aacd"),
        Bytes::from_static(b"bbed"),
        Bytes::from_static(b"ccde"),
      ]
    );
  }

  #[test]
  fn test_btree_iterator_ordering() {
    let bt = BTree::new();
    bt.put(b"ccde".to_vec(), pos(1, 0));
    bt.put(b"aacd".to_vec(), pos(1, 12));
    bt.put(b"bbed".to_vec(), pos(1, 24));

    let mut iter = bt.iterator(IteratorOptions::default());
    let mut last: Option<Vec<u8>> = None;
    while let Some((key, _)) = iter.next() {
      if let Some(prev) = &last {
        assert!(prev < key);
      }
      last = Some(key.clone());
    }

    let mut rev_iter = bt.iterator(IteratorOptions {
      prefix: Vec::new(),
      reverse: true,
    });
    assert_eq!(rev_iter.next().unwrap().0, &b"ccde".to_vec());
  }
}
