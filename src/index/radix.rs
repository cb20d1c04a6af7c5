use std::sync::Arc;

use bytes::Bytes;
use parking_lot::RwLock;
use radix_trie::{Trie, TrieCommon};

use crate::{
  data::log_record::LogRecordPos,
  errors::Result,
  option::IteratorOptions,
};

use super::{IndexIterator, Indexer, SnapshotIterator};

/// Radix-tree index. Shares its prefixes between keys, which pays off for
/// the long common-prefix key shapes a typical workload produces.
pub struct RadixTree {
  tree: Arc<RwLock<Trie<Vec<u8>, LogRecordPos>>>,
}

impl RadixTree {
  pub fn new() -> Self {
    Self {
      tree: Arc::new(RwLock::new(Trie::new())),
    }
  }
}

impl Default for RadixTree {
  fn default() -> Self {
    Self::new()
  }
}

impl Indexer for RadixTree {
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
    let mut keys: Vec<Bytes> = read_guard
      .iter()
      .map(|(k, _)| Bytes::copy_from_slice(k))
      .collect();
    keys.sort();
    Ok(keys)
  }

  fn iterator(&self, options: IteratorOptions) -> Box<dyn IndexIterator> {
    let read_guard = self.tree.read();
    let mut items: Vec<(Vec<u8>, LogRecordPos)> =
      read_guard.iter().map(|(k, v)| (k.clone(), *v)).collect();
    items.sort_by(|a, b| a.0.cmp(&b.0));
    Box::new(SnapshotIterator::new(items, options))
  }
}
