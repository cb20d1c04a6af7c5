use std::{
  fs::{File, OpenOptions},
  io::Write,
  os::unix::fs::FileExt,
  path::Path,
  sync::Arc,
};

use log::error;
use parking_lot::RwLock;

use crate::errors::{Errors, Result};

use super::IOManager;

/// Standard file-descriptor backend: pread for reads, append-mode writes.
pub struct FileIO {
  fd: Arc<RwLock<File>>,
}

impl FileIO {
  pub fn new<P>(file_name: P) -> Result<Self>
  where
    P: AsRef<Path>,
  {
    match OpenOptions::new()
      .create(true)
      .read(true)
      .append(true)
      .open(file_name)
    {
      Ok(file) => Ok(FileIO {
        fd: Arc::new(RwLock::new(file)),
      }),
      Err(e) => {
        error!("failed to open data file: {}", e);
        Err(Errors::FailedToOpenDataFile)
      }
    }
  }
}

impl IOManager for FileIO {
  fn read(&self, buf: &mut [u8], offset: u64) -> Result<usize> {
    let read_guard = self.fd.read();
    match read_guard.read_at(buf, offset) {
      Ok(n) => Ok(n),
      Err(e) => {
        error!("read from data file failed: {}", e);
        Err(Errors::FailedToReadFromDataFile)
      }
    }
  }

  fn write(&self, buf: &[u8]) -> Result<usize> {
    let mut write_guard = self.fd.write();
    match write_guard.write_all(buf) {
      Ok(()) => Ok(buf.len()),
      Err(e) => {
        error!("write to data file failed: {}", e);
        Err(Errors::FailedToWriteToDataFile)
      }
    }
  }

  fn sync(&self) -> Result<()> {
    let read_guard = self.fd.read();
    if let Err(e) = read_guard.sync_all() {
      error!("sync data file failed: {}", e);
      return Err(Errors::FailedToSyncDataFile);
    }
    Ok(())
  }

  fn size(&self) -> u64 {
    let read_guard = self.fd.read();
    match read_guard.metadata() {
      Ok(meta) => meta.len(),
      Err(_) => 0,
    }
  }
}

#[cfg(test)]
mod tests {
  use std::{fs, path::PathBuf};

  use super::*;

  #[test]
  fn test_file_io_write() {
    let path = PathBuf::from("/tmp/cinder-kv-fio-write.data");
    let _ = fs::remove_file(&path);

    let fio = FileIO::new(&path).unwrap();
    assert_eq!(fio.write(b"key-a").unwrap(), 5);
    assert_eq!(fio.write(b"key-b").unwrap(), 5);
    assert_eq!(fio.size(), 10);

    fs::remove_file(&path).unwrap();
  }

  #[test]
  fn test_file_io_read() {
    let path = PathBuf::from("/tmp/cinder-kv-fio-read.data");
    let _ = fs::remove_file(&path);

    let fio = FileIO::new(&path).unwrap();
    fio.write(b"key-a").unwrap();
    fio.write(b"key-b").unwrap();

    let mut buf = [0u8; 5];
    assert_eq!(fio.read(&mut buf, 0).unwrap(), 5);
    assert_eq!(&buf, b"key-a");
    assert_eq!(fio.read(&mut buf, 5).unwrap(), 5);
    assert_eq!(&buf, b"key-b");

    fs::remove_file(&path).unwrap();
  }

  #[test]
  fn test_file_io_sync() {
    let path = PathBuf::from("/tmp/cinder-kv-fio-sync.data");
    let _ = fs::remove_file(&path);

    let fio = FileIO::new(&path).unwrap();
    fio.write(b"durable").unwrap();
    assert!(fio.sync().is_ok());

    fs::remove_file(&path).unwrap();
  }
}
