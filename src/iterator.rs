use bytes::Bytes;
use parking_lot::RwLock;

use crate::{
  db::Engine,
  errors::Result,
  index::IndexIterator,
  option::IteratorOptions,
};

/// Ordered cursor over the engine's live keys.
///
/// Keys come from an index snapshot taken when the iterator is built;
/// values are read from the data files on demand.
pub struct Iterator<'a> {
  index_iter: RwLock<Box<dyn IndexIterator>>,
  engine: &'a Engine,
}

impl Engine {
  pub fn iter(&self, options: IteratorOptions) -> Iterator {
    Iterator {
      index_iter: RwLock::new(self.index.iterator(options)),
      engine: self,
    }
  }

  /// All live keys, ascending.
  pub fn list_keys(&self) -> Result<Vec<Bytes>> {
    self.index.list_keys()
  }

  /// Calls `f` on every live pair in key order until it returns `false`.
  pub fn fold<F>(&self, f: F) -> Result<()>
  where
    F: Fn(Bytes, Bytes) -> bool,
  {
    let iter = self.iter(IteratorOptions::default());
    while let Some((key, value)) = iter.next() {
      if !f(key, value) {
        break;
      }
    }
    Ok(())
  }
}

impl Iterator<'_> {
  pub fn rewind(&self) {
    self.index_iter.write().rewind();
  }

  pub fn seek(&self, key: Vec<u8>) {
    self.index_iter.write().seek(key);
  }

  #[allow(clippy::should_implement_trait)]
  pub fn next(&self) -> Option<(Bytes, Bytes)> {
    let mut index_iter = self.index_iter.write();
    if let Some((key, pos)) = index_iter.next() {
      let value = self
        .engine
        .get_value_by_position(pos)
        .expect("failed to read value from data file");
      return Some((Bytes::from(key.clone()), value));
    }
    None
  }
}
