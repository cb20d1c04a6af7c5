use std::{path::Path, sync::Arc};

use bytes::Bytes;
use jammdb::DB;

use crate::{
  data::log_record::{decode_log_record_pos, encode_log_record_pos, LogRecordPos},
  errors::Result,
  option::IteratorOptions,
};

use super::{IndexIterator, Indexer, SnapshotIterator};

const BPTREE_INDEX_FILE_NAME: &str = "bptree-index";
const BPTREE_BUCKET_NAME: &str = "cinder-index";

/// File-backed B+tree index. Survives restarts, which lets the engine skip
/// log replay for index contents on open.
pub struct BPlusTree {
  tree: Arc<DB>,
}

impl BPlusTree {
  pub fn new<P>(dir_path: P) -> Self
  where
    P: AsRef<Path>,
  {
    let bptree =
      DB::open(dir_path.as_ref().join(BPTREE_INDEX_FILE_NAME)).expect("failed to open bptree index");
    let tree = Arc::new(bptree);

    let tx = tree.tx(true).expect("failed to begin tx");
    tx.get_or_create_bucket(BPTREE_BUCKET_NAME)
      .expect("failed to create index bucket");
    tx.commit().expect("failed to commit tx");

    Self { tree }
  }
}

impl Indexer for BPlusTree {
  fn put(&self, key: Vec<u8>, pos: LogRecordPos) -> Option<LogRecordPos> {
    let tx = self.tree.tx(true).expect("failed to begin tx");
    let bucket = tx
      .get_bucket(BPTREE_BUCKET_NAME)
      .expect("failed to get index bucket");

    let old = bucket
      .get_kv(&key)
      .map(|kv| decode_log_record_pos(kv.value().to_vec()));
    bucket
      .put(key, encode_log_record_pos(&pos))
      .expect("failed to put key into bptree");
    tx.commit().expect("failed to commit tx");
    old
  }

  fn get(&self, key: Vec<u8>) -> Option<LogRecordPos> {
    let tx = self.tree.tx(false).expect("failed to begin tx");
    let bucket = tx
      .get_bucket(BPTREE_BUCKET_NAME)
      .expect("failed to get index bucket");
    bucket
      .get_kv(key)
      .map(|kv| decode_log_record_pos(kv.value().to_vec()))
  }

  fn delete(&self, key: Vec<u8>) -> Option<LogRecordPos> {
    let tx = self.tree.tx(true).expect("failed to begin tx");
    let bucket = tx
      .get_bucket(BPTREE_BUCKET_NAME)
      .expect("failed to get index bucket");

    let old = bucket
      .delete(key)
      .ok()
      .map(|kv| decode_log_record_pos(kv.value().to_vec()));
    tx.commit().expect("failed to commit tx");
    old
  }

  fn size(&self) -> usize {
    let tx = self.tree.tx(false).expect("failed to begin tx");
    let bucket = tx
      .get_bucket(BPTREE_BUCKET_NAME)
      .expect("failed to get index bucket");
    bucket.cursor().count()
  }

  fn list_keys(&self) -> Result<Vec<Bytes>> {
    let tx = self.tree.tx(false).expect("failed to begin tx");
    let bucket = tx
      .get_bucket(BPTREE_BUCKET_NAME)
      .expect("failed to get index bucket");
    Ok(
      bucket
        .cursor()
        .map(|data| Bytes::copy_from_slice(data.kv().key()))
        .collect(),
    )
  }

  fn iterator(&self, options: IteratorOptions) -> Box<dyn IndexIterator> {
    let tx = self.tree.tx(false).expect("failed to begin tx");
    let bucket = tx
      .get_bucket(BPTREE_BUCKET_NAME)
      .expect("failed to get index bucket");

    let items = bucket
      .cursor()
      .map(|data| {
        let kv = data.kv();
        (kv.key().to_vec(), decode_log_record_pos(kv.value().to_vec()))
      })
      .collect();
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
      size: 48,
    }
  }

  #[test]
  fn test_bptree_put_get() {
    let dir_path = std::env::temp_dir().join("cinder-kv-bptree-put-get");
    std::fs::create_dir_all(&dir_path).unwrap();

    let bpt = BPlusTree::new(&dir_path);
    assert!(bpt.put(b"k1".to_vec(), pos(0, 0)).is_none());
    assert_eq!(bpt.put(b"k1".to_vec(), pos(0, 48)).unwrap(), pos(0, 0));
    assert_eq!(bpt.get(b"k1".to_vec()).unwrap(), pos(0, 48));
    assert!(bpt.get(b"missing".to_vec()).is_none());

    std::fs::remove_dir_all(&dir_path).unwrap();
  }

  #[test]
  fn test_bptree_delete() {
    let dir_path = std::env::temp_dir().join("cinder-kv-bptree-delete");
    std::fs::create_dir_all(&dir_path).unwrap();

    let bpt = BPlusTree::new(&dir_path);
    bpt.put(b"k1".to_vec(), pos(0, 0));
    assert_eq!(bpt.delete(b"k1".to_vec()).unwrap(), pos(0, 0));
    assert!(bpt.delete(b"k1".to_vec()).is_none());
    assert_eq!(bpt.size(), 0);

    std::fs::remove_dir_all(&dir_path).unwrap();
  }

  #[test]
  fn test_bptree_survives_reopen() {
    let dir_path = std::env::temp_dir().join("cinder-kv-bptree-reopen");
    std::fs::create_dir_all(&dir_path).unwrap();

    {
      let bpt = BPlusTree::new(&dir_path);
      bpt.put(b"k1".to_vec(), pos(3, 96));
    }

    let bpt = BPlusTree::new(&dir_path);
    assert_eq!(bpt.get(b"k1".to_vec()).unwrap(), pos(3, 96));

    std::fs::remove_dir_all(&dir_path).unwrap();
  }

  #[test]
  fn test_bptree_iterator_ordering() {
    let dir_path = std::env::temp_dir().join("cinder-kv-bptree-iter");
    std::fs::create_dir_all(&dir_path).unwrap();

    let bpt = BPlusTree::new(&dir_path);
    bpt.put(b"ccde".to_vec(), pos(1, 0));
    bpt.put(b"aacd".to_vec(), pos(1, 48));
    bpt.put(b"bbed".to_vec(), pos(1, 96));

    let mut iter = bpt.iterator(IteratorOptions::default());
    let mut keys = Vec::new();
    while let Some((key, _)) = iter.next() {
      keys.push(key.clone());
    }
    assert_eq!(keys, vec![b"aacd".to_vec(), b"bbed".to_vec(), b"ccde".to_vec()]);

    std::fs::remove_dir_all(&dir_path).unwrap();
  }
}
