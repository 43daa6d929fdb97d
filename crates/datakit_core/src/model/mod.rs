//! Entity model shared by repositories, services and reconciliation.
//!
//! # Responsibility
//! - Describe entity types through capability traits (`Keyed`, `CodeKeyed`).
//! - Hold entity attributes as typed field maps bound to one entity type.
//!
//! # Invariants
//! - Entities only carry fields declared by their entity type.
//! - Key values are integer or non-blank text.

use std::error::Error;
use std::fmt::{Display, Formatter};

pub mod entity;
pub mod projection;
pub mod value;

pub use entity::{CodeKeyed, Entity, KeyStrategy, Keyed, CREATED_AT, UPDATED_AT};
pub use projection::Projection;
pub use value::{EntityKey, FieldMap, FieldValue};

/// Errors raised while building or mutating entities.
#[derive(Debug)]
pub enum ModelError {
    UnknownField {
        entity_type: &'static str,
        field: String,
    },
    MissingField {
        entity_type: &'static str,
        field: String,
    },
    InvalidKey(String),
    InvalidJsonShape(String),
    Json(serde_json::Error),
}

impl Display for ModelError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnknownField { entity_type, field } => {
                write!(f, "field `{field}` is not declared on entity `{entity_type}`")
            }
            Self::MissingField { entity_type, field } => {
                write!(f, "attribute `{field}` not found on entity `{entity_type}`")
            }
            Self::InvalidKey(message) => write!(f, "{message}"),
            Self::InvalidJsonShape(message) => write!(f, "{message}"),
            Self::Json(err) => write!(f, "invalid entity json: {err}"),
        }
    }
}

impl Error for ModelError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Json(err) => Some(err),
            Self::UnknownField { .. }
            | Self::MissingField { .. }
            | Self::InvalidKey(_)
            | Self::InvalidJsonShape(_) => None,
        }
    }
}

impl From<serde_json::Error> for ModelError {
    fn from(value: serde_json::Error) -> Self {
        Self::Json(value)
    }
}
