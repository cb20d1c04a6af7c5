use std::path::{Path, PathBuf};

/// Total bytes used by everything under `dir_path`; 0 when unreadable.
pub fn dir_disk_size<P>(dir_path: P) -> u64
where
  P: AsRef<Path>,
{
  fs_extra::dir::get_size(dir_path).unwrap_or(0)
}

/// Free bytes on the filesystem backing the root.
pub fn available_disk_space() -> u64 {
  fs2::available_space(PathBuf::from("/")).unwrap_or(0)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_dir_disk_size() {
    let dir_path = std::env::temp_dir().join("cinder-kv-dir-size");
    std::fs::create_dir_all(&dir_path).unwrap();
    std::fs::write(dir_path.join("a.data"), b"0123456789").unwrap();

    assert!(dir_disk_size(&dir_path) >= 10);

    std::fs::remove_dir_all(&dir_path).unwrap();
  }

  #[test]
  fn test_available_disk_space() {
    assert!(available_disk_space() > 0);
  }
}
