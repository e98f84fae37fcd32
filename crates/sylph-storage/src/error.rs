use crate::cache::CacheError;
use crate::codec::CodecError;
use crate::header::HeaderError;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Coarse classification used to decide how an error propagates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Unrecognized or corrupt persisted data. Never retried.
    Format,
    /// Missing files or paths, permissions, disk errors.
    Resource,
    /// The spill cache lost track of data it promised to hold.
    CacheConsistency,
    /// The caller used the API in a way it does not allow.
    Protocol,
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error(transparent)]
    Header(#[from] HeaderError),
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error(transparent)]
    Cache(#[from] CacheError),
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("file not found: {0}")]
    FileNotFound(PathBuf),
    #[error("missing path {path} in {file}")]
    MissingPath { file: PathBuf, path: String },
    #[error("{path} in {file} is not a group")]
    NotAGroup { file: PathBuf, path: String },
    #[error("{path} in {file} is not a dataset")]
    NotADataset { file: PathBuf, path: String },
    #[error("external link resolution exceeded {0} hops")]
    LinkDepthExceeded(usize),
    #[error("file is already open and cannot be opened for writing: {0}")]
    FileInUse(PathBuf),
    #[error("{0} is not writable")]
    ReadOnly(PathBuf),
    #[error("handle is closed")]
    Closed,
}

impl StorageError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            StorageError::Header(HeaderError::Io(_)) => ErrorKind::Resource,
            StorageError::Header(_)
            | StorageError::Codec(_)
            | StorageError::Json(_) => ErrorKind::Format,
            StorageError::Cache(err) => err.kind(),
            StorageError::Sqlite(_)
            | StorageError::Io(_)
            | StorageError::FileNotFound(_)
            | StorageError::MissingPath { .. }
            | StorageError::NotAGroup { .. }
            | StorageError::NotADataset { .. }
            | StorageError::LinkDepthExceeded(_) => ErrorKind::Resource,
            StorageError::FileInUse(_) | StorageError::ReadOnly(_) | StorageError::Closed => {
                ErrorKind::Protocol
            }
        }
    }
}

pub type Result<T> = std::result::Result<T, StorageError>;
