use bytes::Bytes;

/// Deterministic keys/values for tests and benchmarks.
pub fn get_test_key(i: usize) -> Bytes {
  Bytes::from(format!("cinder-kv-key-{:09}", i))
}

pub fn get_test_value(i: usize) -> Bytes {
  Bytes::from(format!("cinder-kv-value-{:09}", i))
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_get_test_key_value() {
    for i in 0..10 {
      assert!(!get_test_key(i).is_empty());
      assert!(!get_test_value(i).is_empty());
    }
    assert_ne!(get_test_key(1), get_test_key(2));
  }
}
