//! Generic data access in front of SQLite: typed entity repositories,
//! convention-based service resolution and set reconciliation.

pub mod config;
pub mod db;
pub mod logging;
pub mod model;
pub mod reconcile;
pub mod repo;
pub mod service;

pub use config::StoreConfig;
pub use db::{DbError, DbResult, Migration, Order, Predicate, Query, StoreHandle};
pub use logging::{default_log_level, init_logging, logging_status, LoggingError};
pub use model::{
    CodeKeyed, Entity, EntityKey, FieldMap, FieldValue, KeyStrategy, Keyed, ModelError,
    Projection,
};
pub use reconcile::Reconciler;
pub use repo::{FoundMany, RepoError, RepoResult, Repository, WriteOperation, MAX_LIMIT};
pub use service::{
    ApiSerializer, FieldRule, FieldSerializer, RuleValidator, Serializer, ServiceError,
    ServiceRegistry, ServiceResult, ValidationErrors, Validator,
};

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
