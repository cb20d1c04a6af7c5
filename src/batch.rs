use std::collections::HashMap;

use bytes::{BufMut, Bytes, BytesMut};
use parking_lot::Mutex;
use prost::encoding::{decode_varint, encode_varint};

use crate::{
  data::log_record::{LogRecord, LogRecordType},
  db::Engine,
  errors::{Errors, Result},
  option::{IndexType, WriteBatchOptions},
};

/// Sequence number carried by records written outside any batch.
pub(crate) const NON_TXN_SEQ_NO: u64 = 0;

/// Key of the sentinel record that seals a batch on disk.
const TXN_FIN_KEY: &[u8] = "txn-fin".as_bytes();

/// A set of writes that becomes visible atomically at commit.
///
/// Mutations are buffered in memory, deduplicated by key. Nothing reaches
/// disk or the index before [`WriteBatch::commit`].
pub struct WriteBatch<'a> {
  pending_writes: Mutex<HashMap<Vec<u8>, LogRecord>>,
  engine: &'a Engine,
  options: WriteBatchOptions,
}

impl Engine {
  pub fn new_write_batch(&self, options: WriteBatchOptions) -> Result<WriteBatch> {
    // with a persistent index and no seq-no file there is no way to know
    // the highest committed sequence number, so batches must be refused
    if self.options.index_type == IndexType::BPlusTree && !self.seq_file_exists && !self.is_initial
    {
      return Err(Errors::UnableToUseWriteBatch);
    }
    Ok(WriteBatch {
      pending_writes: Mutex::new(HashMap::new()),
      engine: self,
      options,
    })
  }
}

impl WriteBatch<'_> {
  /// Buffers a put; a later put to the same key replaces it.
  pub fn put(&self, key: Bytes, value: Bytes) -> Result<()> {
    if key.is_empty() {
      return Err(Errors::KeyIsEmpty);
    }

    let mut pending_writes = self.pending_writes.lock();
    let record = LogRecord {
      key: key.to_vec(),
      value: value.to_vec(),
      rec_type: LogRecordType::Normal,
    };
    pending_writes.insert(key.to_vec(), record);
    Ok(())
  }

  /// Buffers a delete. A key absent from both the index and the buffer is a
  /// no-op; a key only in the buffer just cancels the buffered put.
  pub fn delete(&self, key: Bytes) -> Result<()> {
    if key.is_empty() {
      return Err(Errors::KeyIsEmpty);
    }

    let mut pending_writes = self.pending_writes.lock();
    if self.engine.index.get(key.to_vec()).is_none() {
      pending_writes.remove(&key.to_vec());
      return Ok(());
    }

    let record = LogRecord {
      key: key.to_vec(),
      value: Default::default(),
      rec_type: LogRecordType::Deleted,
    };
    pending_writes.insert(key.to_vec(), record);
    Ok(())
  }

  /// Appends every buffered record under a fresh sequence number, seals the
  /// batch with a sentinel record, then publishes it to the index.
  ///
  /// A crash before the sentinel hits disk leaves orphan records that
  /// recovery discards, so readers never observe half a batch.
  pub fn commit(&self) -> Result<()> {
    let mut pending_writes = self.pending_writes.lock();
    if pending_writes.is_empty() {
      return Ok(());
    }
    if pending_writes.len() > self.options.max_batch_num {
      return Err(Errors::ExceedMaxBatchNum);
    }

    let _commit_guard = self.engine.batch_commit_lock.lock();

    let seq_no = self
      .engine
      .seq_no
      .fetch_add(1, std::sync::atomic::Ordering::SeqCst)
      + 1;

    let mut positions = HashMap::with_capacity(pending_writes.len());
    for (_, record) in pending_writes.iter() {
      let mut log_record = LogRecord {
        key: log_record_key_with_seq(record.key.clone(), seq_no),
        value: record.value.clone(),
        rec_type: record.rec_type,
      };
      let pos = self.engine.append_log_record(&mut log_record)?;
      positions.insert(record.key.clone(), pos);
    }

    let mut fin_record = LogRecord {
      key: log_record_key_with_seq(TXN_FIN_KEY.to_vec(), seq_no),
      value: Default::default(),
      rec_type: LogRecordType::TxnFinished,
    };
    self.engine.append_log_record(&mut fin_record)?;

    if self.options.sync_writes {
      self.engine.sync()?;
    }

    // the batch is durable; now it may become visible
    for (_, record) in pending_writes.iter() {
      let pos = positions.get(&record.key).unwrap();
      let displaced = match record.rec_type {
        LogRecordType::Normal => self.engine.index.put(record.key.clone(), *pos),
        LogRecordType::Deleted => self.engine.index.delete(record.key.clone()),
        LogRecordType::TxnFinished => None,
      };
      if let Some(old_pos) = displaced {
        self
          .engine
          .reclaim_size
          .fetch_add(old_pos.size as usize, std::sync::atomic::Ordering::SeqCst);
      }
    }

    pending_writes.clear();
    Ok(())
  }
}

/// Prefixes a key with its varint-encoded sequence number.
pub(crate) fn log_record_key_with_seq(key: Vec<u8>, seq_no: u64) -> Vec<u8> {
  let mut enc_key = BytesMut::new();
  encode_varint(seq_no, &mut enc_key);
  enc_key.put_slice(&key);
  enc_key.to_vec()
}

/// Splits an on-disk key back into `(user key, seq_no)`.
pub(crate) fn parse_log_record_key(key: Vec<u8>) -> (Vec<u8>, u64) {
  let mut buf = BytesMut::from(&key[..]);
  let seq_no = decode_varint(&mut buf).expect("failed to decode seq no");
  (buf.to_vec(), seq_no)
}
