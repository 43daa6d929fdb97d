//! Service resolution and the pluggable per-entity services.
//!
//! # Responsibility
//! - Name the well-known services (`Repository`, `Serializer`,
//!   `SerializerApi`, `Validator`).
//! - Resolve which registered implementation serves an entity type.
//!
//! # Invariants
//! - Resolution is pure for a fixed registry state.
//! - Misconfiguration surfaces as `ServiceNotFound`, never as a fallback to
//!   an unrelated implementation.

use std::error::Error;
use std::fmt::{Display, Formatter};

pub mod registry;
pub mod serializer;
pub mod validator;

pub use registry::{default_id, sibling_id, ServiceRegistry};
pub use serializer::{pick, ApiSerializer, FieldSerializer, Serializer};
pub use validator::{FieldRule, RuleValidator, ValidationErrors, Validator};

pub const REPOSITORY: &str = "Repository";
pub const SERIALIZER: &str = "Serializer";
pub const SERIALIZER_API: &str = "SerializerApi";
pub const VALIDATOR: &str = "Validator";

/// Namespace holding the global default services.
pub const DEFAULT_NAMESPACE: &str = "services";

pub type ServiceResult<T> = Result<T, ServiceError>;

/// Service registration and resolution errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServiceError {
    InvalidServiceId(String),
    DuplicateServiceId(String),
    /// Carries the unresolved service name or override id.
    ServiceNotFound(String),
    /// The registered service was built for another entity or value type.
    ServiceMismatch {
        id: String,
        expected: String,
    },
}

impl Display for ServiceError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidServiceId(id) => write!(f, "service id is invalid: {id}"),
            Self::DuplicateServiceId(id) => write!(f, "service id already registered: {id}"),
            Self::ServiceNotFound(name) => {
                write!(f, "service class for `{name}` could not be found")
            }
            Self::ServiceMismatch { id, expected } => {
                write!(f, "service `{id}` does not serve `{expected}`")
            }
        }
    }
}

impl Error for ServiceError {}
