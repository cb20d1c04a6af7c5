use std::{fs::OpenOptions, path::Path, sync::Arc};

use log::error;
use memmap2::Mmap;
use parking_lot::Mutex;

use crate::errors::{Errors, Result};

use super::IOManager;

/// Read-only memory-mapped backend. Used to replay segments quickly at
/// startup; the engine swaps every handle back to [`super::file_io::FileIO`]
/// before taking writes.
pub struct MMapIO {
  map: Arc<Mutex<Mmap>>,
}

impl MMapIO {
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
      Ok(file) => {
        let map = unsafe { Mmap::map(&file).expect("failed to map file") };
        Ok(MMapIO {
          map: Arc::new(Mutex::new(map)),
        })
      }
      Err(e) => {
        error!("failed to open data file: {}", e);
        Err(Errors::FailedToOpenDataFile)
      }
    }
  }
}

impl IOManager for MMapIO {
  fn read(&self, buf: &mut [u8], offset: u64) -> Result<usize> {
    let map_arr = self.map.lock();
    let end = offset + buf.len() as u64;
    if end > map_arr.len() as u64 {
      return Err(Errors::ReadDataFileEOF);
    }

    let val = &map_arr[offset as usize..end as usize];
    buf.copy_from_slice(val);
    Ok(val.len())
  }

  fn write(&self, _buf: &[u8]) -> Result<usize> {
    unimplemented!()
  }

  fn sync(&self) -> Result<()> {
    // the map is read-only, there is nothing to flush
    Ok(())
  }

  fn size(&self) -> u64 {
    let map_arr = self.map.lock();
    map_arr.len() as u64
  }
}
