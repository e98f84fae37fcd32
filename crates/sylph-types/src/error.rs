use sylph_storage::{ErrorKind, StorageError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ContainerError {
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error("writeback target is not writable")]
    ReadOnlyTarget,
    #[error("expected container type {expected}, found {found}")]
    TypeMismatch { expected: String, found: String },
    #[error("invalid container type: {0:?}")]
    InvalidDataType(String),
    #[error("no column named {0:?}")]
    MissingColumn(String),
    #[error("column {name:?} has {found} rows but the table has {expected}")]
    ColumnLength {
        name: String,
        expected: usize,
        found: usize,
    },
    #[error("no element {0:?}")]
    MissingElement(String),
    #[error("malformed container metadata: {0}")]
    Metadata(String),
}

impl ContainerError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ContainerError::Storage(err) => err.kind(),
            ContainerError::TypeMismatch { .. }
            | ContainerError::InvalidDataType(_)
            | ContainerError::Metadata(_) => ErrorKind::Format,
            ContainerError::MissingColumn(_) | ContainerError::MissingElement(_) => {
                ErrorKind::Resource
            }
            ContainerError::ReadOnlyTarget | ContainerError::ColumnLength { .. } => {
                ErrorKind::Protocol
            }
        }
    }
}

pub type Result<T> = std::result::Result<T, ContainerError>;
