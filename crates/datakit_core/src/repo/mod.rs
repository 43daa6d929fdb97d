//! Generic entity repository.
//!
//! # Responsibility
//! - Provide lookups, batch lookups, code-key operations and saves for any
//!   `Keyed` entity type.
//! - Translate store and model failures into semantic repository errors.
//!
//! # Invariants
//! - Malformed keys are rejected with `InvalidArgument` before any query runs.
//! - `NotFound` lists every missing key in input order.
//! - Writes run the attached validator before touching the store.

use crate::db::DbError;
use crate::model::{EntityKey, ModelError};
use crate::service::{ServiceError, ValidationErrors};
use std::error::Error;
use std::fmt::{Display, Formatter};

mod found;
mod repository;

pub use found::FoundMany;
pub use repository::{Repository, FIND_MANY_CHUNK, MAX_LIMIT};

pub type RepoResult<T> = Result<T, RepoError>;

/// Store write that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOperation {
    Insert,
    Update,
    Delete,
}

impl Display for WriteOperation {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Insert => "insert",
            Self::Update => "update",
            Self::Delete => "delete",
        };
        write!(f, "{name}")
    }
}

/// Repository and reconciliation errors.
#[derive(Debug)]
pub enum RepoError {
    InvalidArgument(String),
    NotFound(Vec<EntityKey>),
    Persistence {
        operation: WriteOperation,
        key: Option<EntityKey>,
        source: DbError,
    },
    Validation(ValidationErrors),
    /// Stored rows contradict what the operation just observed.
    InvalidData(String),
    Model(ModelError),
    Service(ServiceError),
    Db(DbError),
}

impl Display for RepoError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidArgument(message) => write!(f, "invalid argument: {message}"),
            Self::NotFound(keys) => {
                let keys = keys
                    .iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join(", ");
                write!(f, "Data not found with ids: {keys}")
            }
            Self::Persistence {
                operation,
                key: Some(key),
                source,
            } => write!(f, "{operation} failed for key {key}: {source}"),
            Self::Persistence {
                operation, source, ..
            } => write!(f, "{operation} failed: {source}"),
            Self::Validation(errors) => write!(f, "{errors}"),
            Self::InvalidData(message) => write!(f, "invalid persisted data: {message}"),
            Self::Model(err) => write!(f, "{err}"),
            Self::Service(err) => write!(f, "{err}"),
            Self::Db(err) => write!(f, "{err}"),
        }
    }
}

impl Error for RepoError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Persistence { source, .. } => Some(source),
            Self::Validation(err) => Some(err),
            Self::Model(err) => Some(err),
            Self::Service(err) => Some(err),
            Self::Db(err) => Some(err),
            Self::InvalidArgument(_) | Self::NotFound(_) | Self::InvalidData(_) => None,
        }
    }
}

impl From<ModelError> for RepoError {
    fn from(value: ModelError) -> Self {
        match value {
            ModelError::InvalidKey(message) => Self::InvalidArgument(message),
            other => Self::Model(other),
        }
    }
}

impl From<ServiceError> for RepoError {
    fn from(value: ServiceError) -> Self {
        Self::Service(value)
    }
}

impl From<ValidationErrors> for RepoError {
    fn from(value: ValidationErrors) -> Self {
        Self::Validation(value)
    }
}

impl From<DbError> for RepoError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for RepoError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}
