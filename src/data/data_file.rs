use std::path::{Path, PathBuf};
use std::sync::Arc;

use bytes::Buf;
use parking_lot::RwLock;
use prost::decode_length_delimiter;

use crate::{
  data::log_record::{
    encode_log_record_pos, max_log_record_header_size, LogRecord, LogRecordPos, LogRecordType,
    ReadLogRecord,
  },
  errors::{Errors, Result},
  fio::{new_io_manager, IOManager},
  option::IOManagerType,
};

pub const DATA_FILE_NAME_SUFFIX: &str = ".data";
pub const HINT_FILE_NAME: &str = "hint-index";
pub const MERGE_FINISHED_FILE_NAME: &str = "merge-finished";
pub const SEQ_NO_FILE_NAME: &str = "seq-no";

/// One log segment. The active segment takes appends; older segments are
/// read-only. Hint, merge-marker and seq-no files reuse the same framing.
pub struct DataFile {
  file_id: u32,
  write_off: Arc<RwLock<u64>>,
  io_manager: Box<dyn IOManager>,
}

impl DataFile {
  pub fn new<P>(dir_path: P, file_id: u32, io_type: IOManagerType) -> Result<DataFile>
  where
    P: AsRef<Path>,
  {
    let file_name = get_data_file_name(dir_path, file_id);
    Ok(DataFile {
      file_id,
      write_off: Arc::new(RwLock::new(0)),
      io_manager: new_io_manager(&file_name, io_type)?,
    })
  }

  pub fn new_hint_file<P>(dir_path: P) -> Result<DataFile>
  where
    P: AsRef<Path>,
  {
    Self::new_aux_file(dir_path.as_ref().join(HINT_FILE_NAME))
  }

  pub fn new_merge_fin_file<P>(dir_path: P) -> Result<DataFile>
  where
    P: AsRef<Path>,
  {
    Self::new_aux_file(dir_path.as_ref().join(MERGE_FINISHED_FILE_NAME))
  }

  pub fn new_seq_no_file<P>(dir_path: P) -> Result<DataFile>
  where
    P: AsRef<Path>,
  {
    Self::new_aux_file(dir_path.as_ref().join(SEQ_NO_FILE_NAME))
  }

  fn new_aux_file(file_name: PathBuf) -> Result<DataFile> {
    Ok(DataFile {
      file_id: 0,
      write_off: Arc::new(RwLock::new(0)),
      io_manager: new_io_manager(&file_name, IOManagerType::StandardFileIO)?,
    })
  }

  pub fn get_file_id(&self) -> u32 {
    self.file_id
  }

  pub fn get_write_off(&self) -> u64 {
    *self.write_off.read()
  }

  pub fn set_write_off(&self, offset: u64) {
    *self.write_off.write() = offset;
  }

  pub fn file_size(&self) -> u64 {
    self.io_manager.size()
  }

  /// Decodes the record framed at `offset`.
  ///
  /// `ReadDataFileEOF` marks the end of the valid log: past the last byte,
  /// a zeroed header, or a record torn by an interrupted write. A checksum
  /// failure on an intact frame is `InvalidLogRecordCrc`.
  pub fn read_log_record(&self, offset: u64) -> Result<ReadLogRecord> {
    let file_size = self.io_manager.size();
    if offset >= file_size {
      return Err(Errors::ReadDataFileEOF);
    }

    let mut header_len = max_log_record_header_size() as u64;
    if offset + header_len > file_size {
      header_len = file_size - offset;
    }
    // crc + type + at least one byte of each size varint
    if header_len <= 4 {
      return Err(Errors::ReadDataFileEOF);
    }

    let mut header_buf = vec![0u8; header_len as usize];
    self.io_manager.read(&mut header_buf, offset)?;

    let mut header = &header_buf[..];
    let crc = header.get_u32_le();
    let rec_type = header.get_u8();
    let key_size = decode_length_delimiter(&mut header).map_err(|_| Errors::ReadDataFileEOF)?;
    let value_size = decode_length_delimiter(&mut header).map_err(|_| Errors::ReadDataFileEOF)?;

    if crc == 0 && key_size == 0 && value_size == 0 {
      return Err(Errors::ReadDataFileEOF);
    }

    let header_size = header_buf.len() - header.len();
    let record_size = header_size as u64 + key_size as u64 + value_size as u64;
    if offset + record_size > file_size {
      return Err(Errors::ReadDataFileEOF);
    }

    let mut key = Vec::new();
    let mut value = Vec::new();
    if key_size > 0 || value_size > 0 {
      let mut kv_buf = vec![0u8; key_size + value_size];
      self.io_manager.read(&mut kv_buf, offset + header_size as u64)?;
      value = kv_buf.split_off(key_size);
      key = kv_buf;
    }

    let mut hasher = crc32fast::Hasher::new();
    hasher.update(&header_buf[4..header_size]);
    hasher.update(&key);
    hasher.update(&value);
    if hasher.finalize() != crc {
      return Err(Errors::InvalidLogRecordCrc);
    }

    Ok(ReadLogRecord {
      record: LogRecord {
        key,
        value,
        rec_type: LogRecordType::from_u8(rec_type),
      },
      size: record_size,
    })
  }

  pub fn write(&self, buf: &[u8]) -> Result<usize> {
    let n_bytes = self.io_manager.write(buf)?;
    *self.write_off.write() += n_bytes as u64;
    Ok(n_bytes)
  }

  /// Appends `key -> pos` to a hint file produced by merge.
  pub fn write_hint_record(&self, key: Vec<u8>, pos: LogRecordPos) -> Result<()> {
    let hint_record = LogRecord {
      key,
      value: encode_log_record_pos(&pos),
      rec_type: LogRecordType::Normal,
    };
    self.write(&hint_record.encode())?;
    Ok(())
  }

  pub fn sync(&self) -> Result<()> {
    self.io_manager.sync()
  }

  /// Swaps the backing I/O implementation, e.g. mmap replay -> standard.
  pub fn set_io_manager<P>(&mut self, dir_path: P, io_type: IOManagerType) -> Result<()>
  where
    P: AsRef<Path>,
  {
    self.io_manager = new_io_manager(&get_data_file_name(dir_path, self.file_id), io_type)?;
    Ok(())
  }
}

pub fn get_data_file_name<P>(dir_path: P, file_id: u32) -> PathBuf
where
  P: AsRef<Path>,
{
  let name = format!("{:09}{}", file_id, DATA_FILE_NAME_SUFFIX);
  dir_path.as_ref().join(name)
}
