use std::sync::Arc;

use bytes::Bytes;
use crossbeam_skiplist::SkipMap;

use crate::{
  data::log_record::LogRecordPos,
  errors::Result,
  option::IteratorOptions,
};

use super::{IndexIterator, Indexer, SnapshotIterator};

/// Lock-free concurrent index; readers never wait on writers.
pub struct SkipList {
  skl: Arc<SkipMap<Vec<u8>, LogRecordPos>>,
}

impl SkipList {
  pub fn new() -> Self {
    Self {
      skl: Arc::new(SkipMap::new()),
    }
  }
}

impl Default for SkipList {
  fn default() -> Self {
    Self::new()
  }
}

impl Indexer for SkipList {
  fn put(&self, key: Vec<u8>, pos: LogRecordPos) -> Option<LogRecordPos> {
    // insert overwrites silently, so the displaced value is read first;
    // the engine serializes writers, keeping the pair coherent
    let old = self.skl.get(&key).map(|entry| *entry.value());
    self.skl.insert(key, pos);
    old
  }

  fn get(&self, key: Vec<u8>) -> Option<LogRecordPos> {
    self.skl.get(&key).map(|entry| *entry.value())
  }

  fn delete(&self, key: Vec<u8>) -> Option<LogRecordPos> {
    self.skl.remove(&key).map(|entry| *entry.value())
  }

  fn size(&self) -> usize {
    self.skl.len()
  }

  fn list_keys(&self) -> Result<Vec<Bytes>> {
    Ok(
      self
        .skl
        .iter()
        .map(|entry| Bytes::copy_from_slice(entry.key()))
        .collect(),
    )
  }

  fn iterator(&self, options: IteratorOptions) -> Box<dyn IndexIterator> {
    let items = self
      .skl
      .iter()
      .map(|entry| (entry.key().clone(), *entry.value()))
      .collect();
    Box::new(SnapshotIterator::new(items, options))
  }
}
