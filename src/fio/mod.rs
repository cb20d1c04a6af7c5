pub mod file_io;
pub mod mmap;

use std::path::PathBuf;

use crate::{errors::Result, option::IOManagerType};

use self::{file_io::FileIO, mmap::MMapIO};

/// Byte-level access to one file. Closing happens on drop.
///
/// `read` is positional and safe to call concurrently with `write` as long
/// as it targets bytes a prior `write` already returned for.
pub trait IOManager: Sync + Send {
  fn read(&self, buf: &mut [u8], offset: u64) -> Result<usize>;

  fn write(&self, buf: &[u8]) -> Result<usize>;

  fn sync(&self) -> Result<()>;

  fn size(&self) -> u64;
}

pub fn new_io_manager(file_name: &PathBuf, io_type: IOManagerType) -> Result<Box<dyn IOManager>> {
  match io_type {
    IOManagerType::StandardFileIO => Ok(Box::new(FileIO::new(file_name)?)),
    IOManagerType::MemoryMap => Ok(Box::new(MMapIO::new(file_name)?)),
  }
}
