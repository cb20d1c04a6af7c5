use std::{
  collections::HashMap,
  fs::{self, File},
  path::Path,
  sync::atomic::{AtomicU64, AtomicUsize, Ordering},
};

use bytes::Bytes;
use fs2::FileExt;
use log::{error, warn};
use parking_lot::{Mutex, RwLock};

use crate::{
  batch::{log_record_key_with_seq, parse_log_record_key, NON_TXN_SEQ_NO},
  data::{
    data_file::{DataFile, DATA_FILE_NAME_SUFFIX, MERGE_FINISHED_FILE_NAME, SEQ_NO_FILE_NAME},
    log_record::{LogRecord, LogRecordPos, LogRecordType, TransactionRecord},
  },
  errors::{Errors, Result},
  index,
  merge::load_merge_files,
  option::{IOManagerType, IndexType, Options},
  util,
};

pub const FILE_LOCK_NAME: &str = "flock";
const SEQ_NO_KEY: &str = "seq.no";
const INITIAL_FILE_ID: u32 = 0;

/// The storage engine: one writable segment, a set of sealed segments, and
/// an in-memory index pointing every live key at its newest record.
pub struct Engine {
  pub(crate) options: Options,
  pub(crate) active_data_file: RwLock<DataFile>,
  pub(crate) old_data_files: RwLock<HashMap<u32, DataFile>>,
  pub(crate) index: Box<dyn index::Indexer>,

  /// Segment ids found at open, ascending; consumed by index loading only.
  file_ids: Vec<u32>,

  /// Serializes batch commits against each other.
  pub(crate) batch_commit_lock: Mutex<()>,

  /// Last allocated transaction sequence number.
  pub(crate) seq_no: AtomicU64,

  /// Held for the duration of a merge; `try_lock` failure means one is running.
  pub(crate) merging_lock: Mutex<()>,

  /// Whether a seq-no file was found on open (B+tree index startup).
  pub(crate) seq_file_exists: bool,

  /// Whether this open created the directory (or found it empty).
  pub(crate) is_initial: bool,

  lock_file: File,

  /// Bytes appended since the last sync, for `bytes_per_sync`.
  bytes_write: AtomicUsize,

  /// Bytes of records already superseded or tombstoned but still on disk.
  pub(crate) reclaim_size: AtomicUsize,
}

/// A point-in-time summary of the engine, see [`Engine::stat`].
#[derive(Debug)]
pub struct Stat {
  /// Number of live keys.
  pub key_num: usize,
  /// Open segments, the active one included.
  pub data_file_num: usize,
  /// Bytes merge could reclaim.
  pub reclaimable_size: usize,
  /// Total bytes under the data directory.
  pub disk_size: u64,
}

impl Engine {
  /// Opens (creating if needed) the engine rooted at `options.dir_path`.
  ///
  /// Finalizes any completed merge, then rebuilds the index: from the hint
  /// file plus the tail segments when a merge marker exists, from a full
  /// replay otherwise, or from the persistent B+tree with no replay at all.
  pub fn open(opts: Options) -> Result<Self> {
    check_options(&opts)?;

    let options = opts;
    let dir_path = options.dir_path.clone();
    let mut is_initial = false;
    if !dir_path.is_dir() {
      is_initial = true;
      if let Err(e) = fs::create_dir_all(&dir_path) {
        error!("failed to create database directory: {}", e);
        return Err(Errors::FailedToCreateDatabaseDir);
      }
    } else {
      let mut entries = fs::read_dir(&dir_path).map_err(|_| Errors::FailedToReadDatabaseDir)?;
      if entries.next().is_none() {
        is_initial = true;
      }
    }

    // one engine per directory across all processes
    let lock_file = fs::OpenOptions::new()
      .read(true)
      .write(true)
      .create(true)
      .open(dir_path.join(FILE_LOCK_NAME))
      .map_err(|_| Errors::FailedToOpenDataFile)?;
    if lock_file.try_lock_exclusive().is_err() {
      return Err(Errors::DatabaseIsUsing);
    }

    // a finished merge replaces obsolete segments before anything is read
    load_merge_files(&dir_path)?;

    let use_mmap = options.mmap_at_startup && options.index_type != IndexType::BPlusTree;
    let mut data_files = load_data_files(&dir_path, use_mmap)?;
    let file_ids: Vec<u32> = data_files.iter().map(|f| f.get_file_id()).collect();

    let active_file = match data_files.pop() {
      Some(file) => file,
      None => DataFile::new(&dir_path, INITIAL_FILE_ID, IOManagerType::StandardFileIO)?,
    };
    let mut older_files = HashMap::new();
    for file in data_files {
      older_files.insert(file.get_file_id(), file);
    }

    let index = index::new_indexer(&options.index_type, &dir_path);

    let mut engine = Engine {
      options,
      active_data_file: RwLock::new(active_file),
      old_data_files: RwLock::new(older_files),
      index,
      file_ids,
      batch_commit_lock: Mutex::new(()),
      seq_no: AtomicU64::new(NON_TXN_SEQ_NO),
      merging_lock: Mutex::new(()),
      seq_file_exists: false,
      is_initial,
      lock_file,
      bytes_write: AtomicUsize::new(0),
      reclaim_size: AtomicUsize::new(0),
    };

    if engine.options.index_type == IndexType::BPlusTree {
      // the index is already on disk; only the counter and the append
      // offset need restoring
      let (seq_file_exists, seq_no) = engine.load_seq_no();
      if seq_file_exists {
        engine.seq_no.store(seq_no, Ordering::SeqCst);
        engine.seq_file_exists = true;
      }
      let active_file = engine.active_data_file.write();
      active_file.set_write_off(active_file.file_size());
    } else {
      engine.load_index_from_hint_file()?;
      let current_seq_no = engine.load_index_from_data_files()?;
      if current_seq_no > 0 {
        engine.seq_no.store(current_seq_no, Ordering::SeqCst);
      }
      if use_mmap {
        engine.reset_io_type()?;
      }
    }

    Ok(engine)
  }

  /// Stores `value` under `key`, overwriting any previous value.
  pub fn put(&self, key: Bytes, value: Bytes) -> Result<()> {
    if key.is_empty() {
      return Err(Errors::KeyIsEmpty);
    }

    let mut record = LogRecord {
      key: log_record_key_with_seq(key.to_vec(), NON_TXN_SEQ_NO),
      value: value.to_vec(),
      rec_type: LogRecordType::Normal,
    };
    let log_record_pos = self.append_log_record(&mut record)?;

    if let Some(old_pos) = self.index.put(key.to_vec(), log_record_pos) {
      self
        .reclaim_size
        .fetch_add(old_pos.size as usize, Ordering::SeqCst);
    }
    Ok(())
  }

  /// Fetches the value under `key`, or `KeyNotFound`.
  pub fn get(&self, key: Bytes) -> Result<Bytes> {
    if key.is_empty() {
      return Err(Errors::KeyIsEmpty);
    }

    match self.index.get(key.to_vec()) {
      Some(pos) => self.get_value_by_position(&pos),
      None => Err(Errors::KeyNotFound),
    }
  }

  /// Removes `key`. Deleting an absent key succeeds without writing.
  pub fn delete(&self, key: Bytes) -> Result<()> {
    if key.is_empty() {
      return Err(Errors::KeyIsEmpty);
    }

    if self.index.get(key.to_vec()).is_none() {
      return Ok(());
    }

    let mut record = LogRecord {
      key: log_record_key_with_seq(key.to_vec(), NON_TXN_SEQ_NO),
      value: Default::default(),
      rec_type: LogRecordType::Deleted,
    };
    let pos = self.append_log_record(&mut record)?;
    // the tombstone itself is dead weight from the moment it lands
    self
      .reclaim_size
      .fetch_add(pos.size as usize, Ordering::SeqCst);

    match self.index.delete(key.to_vec()) {
      Some(old_pos) => {
        self
          .reclaim_size
          .fetch_add(old_pos.size as usize, Ordering::SeqCst);
        Ok(())
      }
      None => Err(Errors::IndexUpdateFailed),
    }
  }

  /// Fsyncs the active segment.
  pub fn sync(&self) -> Result<()> {
    self.active_data_file.read().sync()
  }

  /// Persists the sequence counter, fsyncs, and releases the directory lock.
  /// Also runs on drop.
  pub fn close(&self) -> Result<()> {
    if !self.options.dir_path.is_dir() {
      return Ok(());
    }

    let seq_no_path = self.options.dir_path.join(SEQ_NO_FILE_NAME);
    if seq_no_path.is_file() {
      if let Err(e) = fs::remove_file(&seq_no_path) {
        warn!("failed to remove stale seq no file: {}", e);
      }
    }
    let seq_no_file = DataFile::new_seq_no_file(&self.options.dir_path)?;
    let seq_no_record = LogRecord {
      key: SEQ_NO_KEY.as_bytes().to_vec(),
      value: self.seq_no.load(Ordering::SeqCst).to_string().into_bytes(),
      rec_type: LogRecordType::Normal,
    };
    seq_no_file.write(&seq_no_record.encode())?;
    seq_no_file.sync()?;

    self.active_data_file.read().sync()?;
    if let Err(e) = self.lock_file.unlock() {
      warn!("failed to unlock the database directory: {}", e);
    }
    Ok(())
  }

  /// Snapshot of engine-level counters.
  pub fn stat(&self) -> Result<Stat> {
    let older_files = self.old_data_files.read();
    Ok(Stat {
      key_num: self.index.size(),
      data_file_num: older_files.len() + 1,
      reclaimable_size: self.reclaim_size.load(Ordering::SeqCst),
      disk_size: util::file::dir_disk_size(&self.options.dir_path),
    })
  }

  /// Reads the record a position points at, filtering tombstones.
  pub(crate) fn get_value_by_position(&self, pos: &LogRecordPos) -> Result<Bytes> {
    let active_file = self.active_data_file.read();
    let older_files = self.old_data_files.read();

    let log_record = if active_file.get_file_id() == pos.file_id {
      active_file.read_log_record(pos.offset)?.record
    } else {
      match older_files.get(&pos.file_id) {
        Some(data_file) => data_file.read_log_record(pos.offset)?.record,
        None => return Err(Errors::DataFileNotFound),
      }
    };

    if log_record.rec_type == LogRecordType::Deleted {
      return Err(Errors::KeyNotFound);
    }
    Ok(log_record.value.into())
  }

  /// Appends one encoded record to the active segment, rotating first when
  /// it would overflow. Returns where the record landed.
  pub(crate) fn append_log_record(&self, log_record: &mut LogRecord) -> Result<LogRecordPos> {
    let dir_path = &self.options.dir_path;
    let enc_record = log_record.encode();
    let record_len = enc_record.len() as u64;

    let mut active_file = self.active_data_file.write();
    if active_file.get_write_off() + record_len > self.options.data_file_size {
      // segments must be complete on disk before they are sealed
      active_file.sync()?;

      let current_fid = active_file.get_file_id();
      let mut older_files = self.old_data_files.write();
      let old_file = DataFile::new(dir_path, current_fid, IOManagerType::StandardFileIO)?;
      older_files.insert(current_fid, old_file);

      let new_file = DataFile::new(dir_path, current_fid + 1, IOManagerType::StandardFileIO)?;
      *active_file = new_file;
    }

    let write_off = active_file.get_write_off();
    active_file.write(&enc_record)?;

    let previous = self.bytes_write.fetch_add(enc_record.len(), Ordering::SeqCst);
    let mut need_sync = self.options.sync_writes;
    if !need_sync
      && self.options.bytes_per_sync > 0
      && previous + enc_record.len() >= self.options.bytes_per_sync
    {
      need_sync = true;
    }
    if need_sync {
      active_file.sync()?;
      self.bytes_write.store(0, Ordering::SeqCst);
    }

    Ok(LogRecordPos {
      file_id: active_file.get_file_id(),
      offset: write_off,
      size: enc_record.len() as u32,
    })
  }

  /// Walks data files in file-id order rebuilding the index; returns the
  /// largest transaction sequence number seen.
  ///
  /// Batch records are parked per sequence number and applied only once the
  /// commit sentinel shows up, so half-written batches vanish on recovery.
  fn load_index_from_data_files(&self) -> Result<u64> {
    let mut current_seq_no = NON_TXN_SEQ_NO;
    if self.file_ids.is_empty() {
      return Ok(current_seq_no);
    }

    // segments below this id are fully represented by the hint file
    let mut has_merged = false;
    let mut non_merge_file_id = 0;
    let merge_fin_path = self.options.dir_path.join(MERGE_FINISHED_FILE_NAME);
    if merge_fin_path.is_file() {
      let merge_fin_file = DataFile::new_merge_fin_file(&self.options.dir_path)?;
      let merge_fin_record = merge_fin_file.read_log_record(0)?;
      let v = String::from_utf8(merge_fin_record.record.value).unwrap();
      non_merge_file_id = v.parse::<u32>().unwrap();
      has_merged = true;
    }

    let mut transaction_records: HashMap<u64, Vec<TransactionRecord>> = HashMap::new();
    let active_file = self.active_data_file.read();
    let older_files = self.old_data_files.read();

    for (i, file_id) in self.file_ids.iter().enumerate() {
      if has_merged && *file_id < non_merge_file_id {
        continue;
      }

      let mut offset = 0;
      loop {
        let read_result = if *file_id == active_file.get_file_id() {
          active_file.read_log_record(offset)
        } else {
          older_files.get(file_id).unwrap().read_log_record(offset)
        };
        let (mut log_record, size) = match read_result {
          Ok(result) => (result.record, result.size),
          Err(e) => {
            if e == Errors::ReadDataFileEOF {
              break;
            }
            return Err(e);
          }
        };

        let log_record_pos = LogRecordPos {
          file_id: *file_id,
          offset,
          size: size as u32,
        };

        let (real_key, seq_no) = parse_log_record_key(log_record.key.clone());
        if seq_no == NON_TXN_SEQ_NO {
          self.update_index(real_key, log_record.rec_type, log_record_pos);
        } else if log_record.rec_type == LogRecordType::TxnFinished {
          if let Some(records) = transaction_records.remove(&seq_no) {
            for txn_record in records {
              self.update_index(txn_record.record.key, txn_record.record.rec_type, txn_record.pos);
            }
          }
        } else {
          log_record.key = real_key;
          transaction_records
            .entry(seq_no)
            .or_default()
            .push(TransactionRecord {
              record: log_record,
              pos: log_record_pos,
            });
        }

        if seq_no > current_seq_no {
          current_seq_no = seq_no;
        }
        offset += size;
      }

      // the last segment keeps taking appends right where the scan stopped
      if i == self.file_ids.len() - 1 {
        active_file.set_write_off(offset);
      }
    }

    Ok(current_seq_no)
  }

  fn update_index(&self, key: Vec<u8>, rec_type: LogRecordType, pos: LogRecordPos) {
    let displaced = if rec_type == LogRecordType::Deleted {
      self
        .reclaim_size
        .fetch_add(pos.size as usize, Ordering::SeqCst);
      self.index.delete(key)
    } else {
      self.index.put(key, pos)
    };
    if let Some(old_pos) = displaced {
      self
        .reclaim_size
        .fetch_add(old_pos.size as usize, Ordering::SeqCst);
    }
  }

  /// Reads the last persisted sequence number and consumes the file.
  fn load_seq_no(&self) -> (bool, u64) {
    let file_name = self.options.dir_path.join(SEQ_NO_FILE_NAME);
    if !file_name.is_file() {
      return (false, 0);
    }

    let seq_no_file = match DataFile::new_seq_no_file(&self.options.dir_path) {
      Ok(file) => file,
      Err(_) => return (false, 0),
    };

    let mut exists = false;
    let mut seq_no = 0;
    let mut offset = 0;
    loop {
      match seq_no_file.read_log_record(offset) {
        Ok(result) => {
          let v = String::from_utf8(result.record.value).unwrap();
          seq_no = v.parse::<u64>().unwrap();
          exists = true;
          offset += result.size;
        }
        Err(_) => break,
      }
    }

    // stale once consumed; close() writes a fresh one
    if let Err(e) = fs::remove_file(file_name) {
      warn!("failed to remove seq no file: {}", e);
    }
    (exists, seq_no)
  }

  /// Swaps every mmap replay handle back to standard file I/O.
  fn reset_io_type(&self) -> Result<()> {
    let mut active_file = self.active_data_file.write();
    active_file.set_io_manager(&self.options.dir_path, IOManagerType::StandardFileIO)?;

    let mut older_files = self.old_data_files.write();
    for (_, data_file) in older_files.iter_mut() {
      data_file.set_io_manager(&self.options.dir_path, IOManagerType::StandardFileIO)?;
    }
    Ok(())
  }
}

impl Drop for Engine {
  fn drop(&mut self) {
    if let Err(e) = self.close() {
      error!("error while closing the engine: {}", e);
    }
  }
}

fn check_options(opts: &Options) -> Result<()> {
  let dir_path = opts.dir_path.to_str();
  if dir_path.is_none() || dir_path.unwrap().is_empty() {
    return Err(Errors::DirPathIsEmpty);
  }
  if opts.data_file_size == 0 {
    return Err(Errors::DataFileSizeTooSmall);
  }
  if !(0.0..=1.0).contains(&opts.data_file_merge_ratio) {
    return Err(Errors::InvalidMergeRatio);
  }
  Ok(())
}

/// Opens every `.data` segment under `dir_path`, ascending by file id.
fn load_data_files<P>(dir_path: P, use_mmap: bool) -> Result<Vec<DataFile>>
where
  P: AsRef<Path>,
{
  let dir = fs::read_dir(&dir_path).map_err(|_| Errors::FailedToReadDatabaseDir)?;

  let mut file_ids = Vec::new();
  for entry in dir.flatten() {
    let file_os_str = entry.file_name();
    let file_name = file_os_str.to_str().unwrap();
    if file_name.ends_with(DATA_FILE_NAME_SUFFIX) {
      let (id_part, _) = file_name.split_once('.').unwrap();
      let file_id = id_part
        .parse::<u32>()
        .map_err(|_| Errors::DataDirectoryCorrupted)?;
      file_ids.push(file_id);
    }
  }
  file_ids.sort_unstable();

  let io_type = if use_mmap {
    IOManagerType::MemoryMap
  } else {
    IOManagerType::StandardFileIO
  };
  let mut data_files = Vec::with_capacity(file_ids.len());
  for file_id in file_ids {
    data_files.push(DataFile::new(&dir_path, file_id, io_type)?);
  }
  Ok(data_files)
}
