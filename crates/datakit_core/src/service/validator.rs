//! Validation service contract and the rule-based default.
//!
//! # Responsibility
//! - Check an entity's attributes before it is saved.
//! - Report every failing field at once, not just the first.

use crate::model::{Entity, FieldValue, Keyed};
use std::collections::BTreeMap;
use std::error::Error;
use std::fmt::{Display, Formatter};

/// One declarative field constraint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldRule {
    /// Present, not null, not blank.
    Required(&'static str),
    /// Text no longer than the given number of characters.
    MaxLength(&'static str, usize),
    /// Integer value when present.
    Integer(&'static str),
    /// Text value among the listed options when present.
    OneOf(&'static str, &'static [&'static str]),
}

impl FieldRule {
    pub fn field(&self) -> &'static str {
        match self {
            Self::Required(field)
            | Self::MaxLength(field, _)
            | Self::Integer(field)
            | Self::OneOf(field, _) => *field,
        }
    }

    /// Returns the failure message for `value`, or `None` when it passes.
    fn check(&self, value: Option<&FieldValue>) -> Option<String> {
        let field = self.field();
        match (self, value) {
            (Self::Required(_), None) => Some(format!("{field} is required")),
            (Self::Required(_), Some(value)) if value.is_blank() => {
                Some(format!("{field} is required"))
            }
            (_, None) | (_, Some(FieldValue::Null)) => None,
            (Self::MaxLength(_, max), Some(value)) => match value.as_str() {
                Some(text) if text.chars().count() > *max => {
                    Some(format!("{field} may not be longer than {max} characters"))
                }
                Some(_) => None,
                None => Some(format!("{field} must be text")),
            },
            (Self::Integer(_), Some(value)) => match value {
                FieldValue::Integer(_) => None,
                _ => Some(format!("{field} must be an integer")),
            },
            (Self::OneOf(_, options), Some(value)) => match value.as_str() {
                Some(text) if options.iter().any(|option| *option == text) => None,
                _ => Some(format!("{field} must be one of: {}", options.join(", "))),
            },
            (Self::Required(_), Some(_)) => None,
        }
    }
}

/// Field-keyed validation failures.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationErrors {
    messages: BTreeMap<String, Vec<String>>,
}

impl ValidationErrors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, field: &str, message: impl Into<String>) {
        self.messages
            .entry(field.to_string())
            .or_default()
            .push(message.into());
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn messages(&self) -> &BTreeMap<String, Vec<String>> {
        &self.messages
    }

    pub fn field(&self, field: &str) -> &[String] {
        self.messages.get(field).map(Vec::as_slice).unwrap_or(&[])
    }

    /// `Ok(())` when no failure was recorded.
    pub fn into_result(self) -> Result<(), Self> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(self)
        }
    }
}

impl Display for ValidationErrors {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let joined = self
            .messages
            .values()
            .flatten()
            .map(String::as_str)
            .collect::<Vec<_>>()
            .join("; ");
        write!(f, "validation failed: {joined}")
    }
}

impl Error for ValidationErrors {}

/// Validation service for one entity type.
pub trait Validator<K: Keyed>: Send + Sync {
    fn validate(&self, entity: &Entity<K>) -> Result<(), ValidationErrors>;
}

/// Default validator: checks `K::rules()`.
#[derive(Debug, Clone, Copy, Default)]
pub struct RuleValidator;

impl<K: Keyed> Validator<K> for RuleValidator {
    fn validate(&self, entity: &Entity<K>) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();
        for rule in K::rules() {
            if let Some(message) = rule.check(entity.get(rule.field())) {
                errors.add(rule.field(), message);
            }
        }
        errors.into_result()
    }
}
