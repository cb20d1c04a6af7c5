use bytes::{BufMut, BytesMut};
use prost::{
  encode_length_delimiter, encoding::decode_varint, encoding::encode_varint, length_delimiter_len,
};

/// On-disk record layout:
///
/// ```text
/// +-----+------+----------+------------+-----+-------+
/// | crc | type | key size | value size | key | value |
/// |  4  |  1   |  max 5   |   max 5    | ... |  ...  |
/// +-----+------+----------+------------+-----+-------+
/// ```
///
/// The crc32 (IEEE) covers every byte after the checksum itself. Sizes are
/// unsigned varints, so the header spans 5 to 15 bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogRecordType {
  Normal = 1,

  /// Tombstone; the value is always empty.
  Deleted = 2,

  /// Commit sentinel terminating a write batch.
  TxnFinished = 3,
}

impl LogRecordType {
  pub fn from_u8(v: u8) -> Self {
    match v {
      1 => LogRecordType::Normal,
      2 => LogRecordType::Deleted,
      3 => LogRecordType::TxnFinished,
      _ => panic!("unknown log record type {}", v),
    }
  }
}

/// One entry of the append-only log.
#[derive(Debug, Clone)]
pub struct LogRecord {
  pub(crate) key: Vec<u8>,
  pub(crate) value: Vec<u8>,
  pub(crate) rec_type: LogRecordType,
}

impl LogRecord {
  /// Serializes the record into its framed on-disk form.
  pub fn encode(&self) -> Vec<u8> {
    let mut buf = BytesMut::with_capacity(self.encoded_length());

    // crc is filled in last, once the covered bytes exist
    buf.put_u32_le(0);
    buf.put_u8(self.rec_type as u8);
    encode_length_delimiter(self.key.len(), &mut buf).unwrap();
    encode_length_delimiter(self.value.len(), &mut buf).unwrap();
    buf.extend_from_slice(&self.key);
    buf.extend_from_slice(&self.value);

    let mut hasher = crc32fast::Hasher::new();
    hasher.update(&buf[4..]);
    let crc = hasher.finalize();
    buf[..4].copy_from_slice(&crc.to_le_bytes());

    buf.to_vec()
  }

  pub fn encoded_length(&self) -> usize {
    std::mem::size_of::<u32>()
      + std::mem::size_of::<u8>()
      + length_delimiter_len(self.key.len())
      + length_delimiter_len(self.value.len())
      + self.key.len()
      + self.value.len()
  }
}

/// Largest possible header: crc + type + two maximum-width varints.
pub fn max_log_record_header_size() -> usize {
  std::mem::size_of::<u32>() + std::mem::size_of::<u8>() + length_delimiter_len(u32::MAX as usize) * 2
}

/// Where a record lives on disk. This is what the in-memory index stores.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogRecordPos {
  pub(crate) file_id: u32,
  pub(crate) offset: u64,
  pub(crate) size: u32,
}

/// A record handed back by a segment walk, together with its framed length.
pub struct ReadLogRecord {
  pub(crate) record: LogRecord,
  pub(crate) size: u64,
}

/// A batch record held back during replay until its commit sentinel shows up.
pub struct TransactionRecord {
  pub(crate) record: LogRecord,
  pub(crate) pos: LogRecordPos,
}

/// Position codec used for hint file values: three unsigned varints.
pub fn encode_log_record_pos(pos: &LogRecordPos) -> Vec<u8> {
  let mut buf = BytesMut::new();
  encode_varint(pos.file_id as u64, &mut buf);
  encode_varint(pos.offset, &mut buf);
  encode_varint(pos.size as u64, &mut buf);
  buf.to_vec()
}

pub fn decode_log_record_pos(pos: Vec<u8>) -> LogRecordPos {
  let mut buf = BytesMut::from(&pos[..]);
  let file_id = decode_varint(&mut buf).expect("failed to decode file id") as u32;
  let offset = decode_varint(&mut buf).expect("failed to decode offset");
  let size = decode_varint(&mut buf).expect("failed to decode size") as u32;
  LogRecordPos {
    file_id,
    offset,
    size,
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_log_record_encode() {
    let record = LogRecord {
      key: "name".as_bytes().to_vec(),
      value: "cinder-kv".as_bytes().to_vec(),
      rec_type: LogRecordType::Normal,
    };
    let enc = record.encode();
    assert_eq!(enc.len(), record.encoded_length());
    // crc + type + one-byte sizes + payload
    assert_eq!(enc.len(), 4 + 1 + 1 + 1 + 4 + 9);
    assert_eq!(enc[4], LogRecordType::Normal as u8);
    assert_ne!(u32::from_le_bytes(enc[..4].try_into().unwrap()), 0);
  }

  #[test]
  fn test_log_record_encode_empty_value() {
    let record = LogRecord {
      key: "name".as_bytes().to_vec(),
      value: Default::default(),
      rec_type: LogRecordType::Deleted,
    };
    let enc = record.encode();
    assert_eq!(enc.len(), 4 + 1 + 1 + 1 + 4);
    assert_eq!(enc[4], LogRecordType::Deleted as u8);
  }

  #[test]
  fn test_log_record_crc_differs_per_payload() {
    let rec1 = LogRecord {
      key: b"k1".to_vec(),
      value: b"v".to_vec(),
      rec_type: LogRecordType::Normal,
    };
    let rec2 = LogRecord {
      key: b"k2".to_vec(),
      value: b"v".to_vec(),
      rec_type: LogRecordType::Normal,
    };
    assert_ne!(rec1.encode()[..4], rec2.encode()[..4]);
  }

  #[test]
  fn test_log_record_pos_codec() {
    let pos = LogRecordPos {
      file_id: 3,
      offset: 10244,
      size: 276,
    };
    let enc = encode_log_record_pos(&pos);
    assert!(enc.len() <= 15);
    assert_eq!(decode_log_record_pos(enc), pos);

    let zero = LogRecordPos {
      file_id: 0,
      offset: 0,
      size: 0,
    };
    assert_eq!(decode_log_record_pos(encode_log_record_pos(&zero)), zero);
  }

  #[test]
  fn test_max_header_size() {
    assert_eq!(max_log_record_header_size(), 15);
  }
}
