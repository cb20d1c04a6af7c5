use thiserror::Error;

/// Every failure the engine can surface to a caller.
///
/// `ReadDataFileEOF` is the internal end-of-log signal emitted while walking
/// a segment; it never escapes the public API.
#[derive(Error, Debug, PartialEq)]
pub enum Errors {
  #[error("the key is empty")]
  KeyIsEmpty,

  #[error("key not found in database")]
  KeyNotFound,

  #[error("failed to update index")]
  IndexUpdateFailed,

  #[error("data file not found")]
  DataFileNotFound,

  #[error("the database directory maybe corrupted")]
  DataDirectoryCorrupted,

  #[error("exceed the max batch num")]
  ExceedMaxBatchNum,

  #[error("merge is in progress, try again later")]
  MergeInProgress,

  #[error("the merge ratio does not reach the option")]
  MergeRatioUnreached,

  #[error("no enough disk space for merge")]
  NoEnoughSpaceForMerge,

  #[error("invalid crc value, log record maybe corrupted")]
  InvalidLogRecordCrc,

  #[error("read data file eof")]
  ReadDataFileEOF,

  #[error("failed to open data file")]
  FailedToOpenDataFile,

  #[error("failed to read from data file")]
  FailedToReadFromDataFile,

  #[error("failed to write to data file")]
  FailedToWriteToDataFile,

  #[error("failed to sync data file")]
  FailedToSyncDataFile,

  #[error("failed to create the database directory")]
  FailedToCreateDatabaseDir,

  #[error("failed to read the database directory")]
  FailedToReadDatabaseDir,

  #[error("the database dir path is empty")]
  DirPathIsEmpty,

  #[error("the data file size must be greater than 0")]
  DataFileSizeTooSmall,

  #[error("the merge ratio must be between 0 and 1")]
  InvalidMergeRatio,

  #[error("the database directory is used by another process")]
  DatabaseIsUsing,

  #[error("unable to use write batch, the seq no file does not exist")]
  UnableToUseWriteBatch,
}

pub type Result<T> = std::result::Result<T, Errors>;
