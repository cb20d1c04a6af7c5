use lazy_static::lazy_static;
use std::path::PathBuf;

lazy_static! {
  pub static ref DEFAULT_DIR_PATH: PathBuf = std::env::temp_dir().join("cinder-kv");
}

/// Tunables for opening an engine instance.
#[derive(Debug, Clone)]
pub struct Options {
  /// Directory holding all data files; created if missing.
  pub dir_path: PathBuf,

  /// Rotation threshold for a single data file, in bytes.
  pub data_file_size: u64,

  /// Fsync the active file after every single append.
  pub sync_writes: bool,

  /// Fsync once this many bytes have accumulated since the last sync.
  /// 0 disables the threshold.
  pub bytes_per_sync: usize,

  pub index_type: IndexType,

  /// Replay data files through memory maps on startup.
  pub mmap_at_startup: bool,

  /// Reclaimable/total ratio that must be reached before merge runs.
  pub data_file_merge_ratio: f32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexType {
  BTree,

  RadixTree,

  SkipList,

  /// File-backed index, durable across restarts.
  BPlusTree,
}

impl Default for Options {
  fn default() -> Self {
    Self {
      dir_path: DEFAULT_DIR_PATH.clone(),
      data_file_size: 256 * 1024 * 1024, // 256MB
      sync_writes: false,
      bytes_per_sync: 0,
      index_type: IndexType::BTree,
      mmap_at_startup: true,
      data_file_merge_ratio: 0.5,
    }
  }
}

#[derive(Default)]
pub struct IteratorOptions {
  /// Only yield keys carrying this prefix; empty matches everything.
  pub prefix: Vec<u8>,
  pub reverse: bool,
}

pub struct WriteBatchOptions {
  /// Upper bound on records in one commit.
  pub max_batch_num: usize,

  /// Fsync the active file once the commit sentinel is written.
  pub sync_writes: bool,
}

impl Default for WriteBatchOptions {
  fn default() -> Self {
    Self {
      max_batch_num: 10000,
      sync_writes: true,
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IOManagerType {
  StandardFileIO,

  /// Read-only maps used to speed up startup replay.
  MemoryMap,
}
