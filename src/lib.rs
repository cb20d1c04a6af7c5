//! cinder-kv: an embedded key-value storage engine built on the Bitcask model.
//!
//! Writes append records to a log segment on disk; an in-memory index maps
//! every key to its newest record. Reads cost one index probe plus one
//! positional file read. Deleted and overwritten records stay on disk as dead
//! weight until a merge rewrites the live set into fresh segments.
//!
//! # Features
//!
//! * Durable `put`/`get`/`delete` over arbitrary byte keys and values
//! * Atomic multi-key write batches with crash-safe recovery
//! * Ordered iteration, with prefix filtering and reverse traversal
//! * Compaction with a hint file for fast index rebuilds on open
//! * Pluggable index backends: BTree, radix tree, skip list, persistent B+tree
//! * Optional memory-mapped replay to speed up startup
//!
//! # Basic Usage
//!
//! ```
//! use bytes::Bytes;
//! use cinder_kv::{db::Engine, option::Options};
//!
//! let opts = Options::default();
//! let engine = Engine::open(opts).expect("failed to open cinder-kv engine");
//!
//! let key = Bytes::from(b"hello".to_vec());
//! let value = Bytes::from(b"world".to_vec());
//! engine.put(key.clone(), value.clone()).expect("failed to put");
//!
//! let retrieved = engine.get(key.clone()).expect("failed to get");
//! assert_eq!(retrieved, value);
//!
//! engine.delete(key).expect("failed to delete");
//! ```

mod data;

mod fio;
mod index;
mod iterator;

pub mod batch;
pub mod db;
pub mod errors;
pub mod merge;
pub mod option;
pub mod util;
