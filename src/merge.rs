use std::{
  fs,
  path::{Path, PathBuf},
  sync::atomic::Ordering,
};

use log::error;

use crate::{
  batch::{log_record_key_with_seq, parse_log_record_key, NON_TXN_SEQ_NO},
  data::{
    data_file::{
      get_data_file_name, DataFile, DATA_FILE_NAME_SUFFIX, HINT_FILE_NAME,
      MERGE_FINISHED_FILE_NAME, SEQ_NO_FILE_NAME,
    },
    log_record::{decode_log_record_pos, LogRecord, LogRecordType},
  },
  db::{Engine, FILE_LOCK_NAME},
  errors::{Errors, Result},
  option::{IOManagerType, Options},
  util,
};

const MERGE_DIR_NAME: &str = "merge";
const MERGE_FIN_KEY: &[u8] = "merge.finished".as_bytes();

impl Engine {
  /// Rewrites every sealed segment into a scratch directory, keeping only
  /// records the index still points at, then marks the copy complete.
  /// The next [`Engine::open`] swaps the compacted set in.
  ///
  /// Runs concurrently with readers and writers: writers append to a fresh
  /// active segment rolled out at the start, which merge never touches.
  pub fn merge(&self) -> Result<()> {
    if self.is_engine_empty() {
      return Ok(());
    }

    let lock = self.merging_lock.try_lock();
    if lock.is_none() {
      return Err(Errors::MergeInProgress);
    }

    let reclaim_size = self.reclaim_size.load(Ordering::SeqCst);
    let total_size = util::file::dir_disk_size(&self.options.dir_path);
    let ratio = reclaim_size as f32 / total_size as f32;
    if ratio < self.options.data_file_merge_ratio {
      return Err(Errors::MergeRatioUnreached);
    }

    let live_size = total_size - reclaim_size as u64;
    if live_size >= util::file::available_disk_space() {
      return Err(Errors::NoEnoughSpaceForMerge);
    }

    let merge_path = get_merge_path(&self.options.dir_path);
    if merge_path.is_dir() {
      // leftovers of an interrupted merge
      if let Err(e) = fs::remove_dir_all(&merge_path) {
        error!("failed to clean up old merge directory: {}", e);
        return Err(Errors::FailedToCreateDatabaseDir);
      }
    }
    if let Err(e) = fs::create_dir_all(&merge_path) {
      error!("failed to create merge directory: {}", e);
      return Err(Errors::FailedToCreateDatabaseDir);
    }

    let merge_files = self.rotate_merge_files()?;

    let merge_db_opts = Options {
      dir_path: merge_path.clone(),
      data_file_size: self.options.data_file_size,
      sync_writes: false,
      ..Options::default()
    };
    let merge_db = Engine::open(merge_db_opts)?;

    let hint_file = DataFile::new_hint_file(&merge_path)?;

    for data_file in merge_files.iter() {
      let mut offset = 0;
      loop {
        let (mut log_record, size) = match data_file.read_log_record(offset) {
          Ok(result) => (result.record, result.size),
          Err(e) => {
            if e == Errors::ReadDataFileEOF {
              break;
            }
            return Err(e);
          }
        };

        // a record is live iff the index still points exactly at it
        let (real_key, _) = parse_log_record_key(log_record.key.clone());
        if let Some(index_pos) = self.index.get(real_key.clone()) {
          if index_pos.file_id == data_file.get_file_id() && index_pos.offset == offset {
            log_record.key = log_record_key_with_seq(real_key.clone(), NON_TXN_SEQ_NO);
            let new_pos = merge_db.append_log_record(&mut log_record)?;
            hint_file.write_hint_record(real_key, new_pos)?;
          }
        }
        offset += size;
      }
    }

    merge_db.sync()?;
    hint_file.sync()?;

    // everything below this id is covered by the merge output
    let non_merge_file_id = merge_files.last().unwrap().get_file_id() + 1;
    let merge_fin_file = DataFile::new_merge_fin_file(&merge_path)?;
    let merge_fin_record = LogRecord {
      key: MERGE_FIN_KEY.to_vec(),
      value: non_merge_file_id.to_string().into_bytes(),
      rec_type: LogRecordType::Normal,
    };
    merge_fin_file.write(&merge_fin_record.encode())?;
    merge_fin_file.sync()?;

    Ok(())
  }

  fn is_engine_empty(&self) -> bool {
    let active_file = self.active_data_file.read();
    let older_files = self.old_data_files.read();
    active_file.get_write_off() == 0 && older_files.is_empty()
  }

  /// Seals the active segment and reopens every immutable segment with
  /// fresh read handles for the copy loop.
  fn rotate_merge_files(&self) -> Result<Vec<DataFile>> {
    let mut active_file = self.active_data_file.write();
    let mut older_files = self.old_data_files.write();

    let mut merge_file_ids: Vec<u32> = older_files.keys().copied().collect();

    active_file.sync()?;
    let active_file_id = active_file.get_file_id();
    let new_active_file = DataFile::new(
      &self.options.dir_path,
      active_file_id + 1,
      IOManagerType::StandardFileIO,
    )?;
    *active_file = new_active_file;

    let old_file = DataFile::new(
      &self.options.dir_path,
      active_file_id,
      IOManagerType::StandardFileIO,
    )?;
    older_files.insert(active_file_id, old_file);
    merge_file_ids.push(active_file_id);

    merge_file_ids.sort_unstable();

    let mut merge_files = Vec::with_capacity(merge_file_ids.len());
    for file_id in merge_file_ids {
      merge_files.push(DataFile::new(
        &self.options.dir_path,
        file_id,
        IOManagerType::StandardFileIO,
      )?);
    }
    Ok(merge_files)
  }

  /// Preloads the index from the hint file a past merge left behind.
  pub(crate) fn load_index_from_hint_file(&self) -> Result<()> {
    let hint_file_name = self.options.dir_path.join(HINT_FILE_NAME);
    if !hint_file_name.is_file() {
      return Ok(());
    }

    let hint_file = DataFile::new_hint_file(&self.options.dir_path)?;
    let mut offset = 0;
    loop {
      let (log_record, size) = match hint_file.read_log_record(offset) {
        Ok(result) => (result.record, result.size),
        Err(e) => {
          if e == Errors::ReadDataFileEOF {
            break;
          }
          return Err(e);
        }
      };

      let log_record_pos = decode_log_record_pos(log_record.value);
      self.index.put(log_record.key, log_record_pos);

      offset += size;
    }

    Ok(())
  }
}

fn get_merge_path<P>(dir_path: P) -> PathBuf
where
  P: AsRef<Path>,
{
  let file_name = dir_path.as_ref().file_name().unwrap();
  let merge_name = format!("{}-{}", file_name.to_str().unwrap(), MERGE_DIR_NAME);
  let parent = dir_path.as_ref().parent().unwrap();
  parent.to_path_buf().join(merge_name)
}

/// Finalizes a completed merge before the engine reads anything: deletes
/// the segments the merge made obsolete and moves the compacted files in.
/// Without the finished marker the scratch directory is simply discarded.
pub(crate) fn load_merge_files<P>(dir_path: P) -> Result<()>
where
  P: AsRef<Path>,
{
  let merge_path = get_merge_path(&dir_path);
  if !merge_path.is_dir() {
    return Ok(());
  }

  let dir = match fs::read_dir(&merge_path) {
    Ok(dir) => dir,
    Err(e) => {
      error!("failed to read merge directory: {}", e);
      return Err(Errors::FailedToReadDatabaseDir);
    }
  };

  let mut merge_file_names = Vec::new();
  let mut merge_finished = false;
  for file in dir.flatten() {
    let file_os_str = file.file_name();
    let file_name = file_os_str.to_str().unwrap();

    if file_name.ends_with(MERGE_FINISHED_FILE_NAME) {
      merge_finished = true;
    }

    // scratch-engine bookkeeping, meaningless outside the merge directory
    if file_name.ends_with(SEQ_NO_FILE_NAME) || file_name.ends_with(FILE_LOCK_NAME) {
      continue;
    }

    let meta = file.metadata().unwrap();
    if file_name.ends_with(DATA_FILE_NAME_SUFFIX) && meta.len() == 0 {
      continue;
    }

    merge_file_names.push(file.file_name());
  }

  if !merge_finished {
    if let Err(e) = fs::remove_dir_all(&merge_path) {
      error!("failed to discard unfinished merge directory: {}", e);
    }
    return Ok(());
  }

  let merge_fin_file = DataFile::new_merge_fin_file(&merge_path)?;
  let merge_fin_record = merge_fin_file.read_log_record(0)?;
  let v = String::from_utf8(merge_fin_record.record.value).unwrap();
  let non_merge_file_id = v.parse::<u32>().unwrap();

  for file_id in 0..non_merge_file_id {
    let file = get_data_file_name(&dir_path, file_id);
    if file.is_file() {
      fs::remove_file(file).unwrap();
    }
  }

  for file_name in merge_file_names {
    let src_path = merge_path.join(&file_name);
    let dst_path = dir_path.as_ref().join(&file_name);
    fs::rename(src_path, dst_path).unwrap();
  }

  fs::remove_dir_all(&merge_path).unwrap();

  Ok(())
}

#[cfg(test)]
mod tests {
  use std::{path::PathBuf, sync::Arc, thread};

  use super::*;
  use crate::util::rand_kv::{get_test_key, get_test_value};
  use bytes::Bytes;

  fn test_opts(name: &str) -> Options {
    Options {
      dir_path: PathBuf::from(format!("/tmp/{}", name)),
      data_file_size: 32 * 1024 * 1024,
      data_file_merge_ratio: 0.0,
      ..Options::default()
    }
  }

  #[test]
  fn test_merge_empty_engine() {
    let opt = test_opts("cinder-kv-merge-empty");
    let engine = Engine::open(opt.clone()).expect("failed to open engine");

    assert!(engine.merge().is_ok());

    std::fs::remove_dir_all(opt.dir_path).expect("failed to remove path");
  }

  #[test]
  fn test_merge_ratio_unreached() {
    let opt = Options {
      data_file_merge_ratio: 0.9,
      ..test_opts("cinder-kv-merge-ratio")
    };
    let engine = Engine::open(opt.clone()).expect("failed to open engine");

    for i in 0..100 {
      engine.put(get_test_key(i), get_test_value(i)).unwrap();
    }
    assert_eq!(engine.merge().err().unwrap(), Errors::MergeRatioUnreached);

    std::fs::remove_dir_all(opt.dir_path).expect("failed to remove path");
  }

  #[test]
  fn test_merge_all_live() {
    let opt = test_opts("cinder-kv-merge-all-live");
    let engine = Engine::open(opt.clone()).expect("failed to open engine");

    for i in 0..5000 {
      engine.put(get_test_key(i), get_test_value(i)).unwrap();
    }
    assert!(engine.merge().is_ok());

    std::mem::drop(engine);

    let engine2 = Engine::open(opt.clone()).expect("failed to open engine");
    let keys = engine2.list_keys().unwrap();
    assert_eq!(keys.len(), 5000);
    for i in 0..5000 {
      assert_eq!(engine2.get(get_test_key(i)).unwrap(), get_test_value(i));
    }

    std::fs::remove_dir_all(opt.dir_path).expect("failed to remove path");
  }

  #[test]
  fn test_merge_with_updates_and_deletes() {
    let opt = Options {
      data_file_size: 64 * 1024,
      ..test_opts("cinder-kv-merge-mixed")
    };
    let engine = Engine::open(opt.clone()).expect("failed to open engine");

    for i in 0..5000 {
      engine.put(get_test_key(i), get_test_value(i)).unwrap();
    }
    for i in 0..1000 {
      engine.put(get_test_key(i), Bytes::from("updated value")).unwrap();
    }
    for i in 4000..5000 {
      engine.delete(get_test_key(i)).unwrap();
    }

    assert!(engine.merge().is_ok());

    std::mem::drop(engine);

    let engine2 = Engine::open(opt.clone()).expect("failed to open engine");
    assert!(opt.dir_path.join(HINT_FILE_NAME).is_file());
    let keys = engine2.list_keys().unwrap();
    assert_eq!(keys.len(), 4000);

    for i in 0..1000 {
      assert_eq!(engine2.get(get_test_key(i)).unwrap(), Bytes::from("updated value"));
    }
    for i in 4000..5000 {
      assert_eq!(engine2.get(get_test_key(i)).err().unwrap(), Errors::KeyNotFound);
    }

    std::fs::remove_dir_all(opt.dir_path).expect("failed to remove path");
  }

  #[test]
  fn test_merge_reclaims_space() {
    let opt = Options {
      data_file_size: 64 * 1024,
      ..test_opts("cinder-kv-merge-reclaim")
    };
    let engine = Engine::open(opt.clone()).expect("failed to open engine");

    for i in 0..2000 {
      engine.put(get_test_key(i), get_test_value(i)).unwrap();
    }
    for i in 0..1200 {
      engine.delete(get_test_key(i)).unwrap();
    }
    let size_before = util::file::dir_disk_size(&opt.dir_path);

    assert!(engine.merge().is_ok());
    std::mem::drop(engine);

    let engine2 = Engine::open(opt.clone()).expect("failed to open engine");
    let size_after = util::file::dir_disk_size(&opt.dir_path);
    assert!(size_after < size_before);
    assert_eq!(engine2.list_keys().unwrap().len(), 800);
    assert_eq!(engine2.stat().unwrap().reclaimable_size, 0);

    std::fs::remove_dir_all(opt.dir_path).expect("failed to remove path");
  }

  #[test]
  fn test_merge_everything_deleted() {
    let opt = test_opts("cinder-kv-merge-all-deleted");
    let engine = Engine::open(opt.clone()).expect("failed to open engine");

    for i in 0..5000 {
      engine.put(get_test_key(i), get_test_value(i)).unwrap();
      engine.delete(get_test_key(i)).unwrap();
    }
    assert!(engine.merge().is_ok());

    std::mem::drop(engine);

    let engine2 = Engine::open(opt.clone()).expect("failed to open engine");
    assert_eq!(engine2.list_keys().unwrap().len(), 0);
    for i in 0..5000 {
      assert_eq!(engine2.get(get_test_key(i)).err().unwrap(), Errors::KeyNotFound);
    }

    std::fs::remove_dir_all(opt.dir_path).expect("failed to remove path");
  }

  #[test]
  fn test_merge_while_writing() {
    let opt = test_opts("cinder-kv-merge-concurrent");
    let engine = Engine::open(opt.clone()).expect("failed to open engine");

    for i in 0..5000 {
      engine.put(get_test_key(i), get_test_value(i)).unwrap();
    }
    for i in 4000..5000 {
      engine.delete(get_test_key(i)).unwrap();
    }

    let eng = Arc::new(engine);
    let mut handles = Vec::new();

    let eng1 = eng.clone();
    handles.push(thread::spawn(move || {
      for i in 6000..10000 {
        eng1.put(get_test_key(i), get_test_value(i)).unwrap();
      }
    }));

    let eng2 = eng.clone();
    handles.push(thread::spawn(move || {
      eng2.merge().unwrap();
    }));

    for handle in handles {
      handle.join().unwrap();
    }

    std::mem::drop(eng);

    let engine2 = Engine::open(opt.clone()).expect("failed to open engine");
    assert_eq!(engine2.list_keys().unwrap().len(), 8000);

    std::fs::remove_dir_all(opt.dir_path).expect("failed to remove path");
  }
}
