//! Serializer services: entity to field map / JSON.

use crate::model::{Entity, FieldMap, FieldValue, Keyed, ModelError};

/// Serializer service for one entity type.
pub trait Serializer<K: Keyed>: Send + Sync {
    /// Attributes exposed by this serializer.
    fn to_fields(&self, entity: &Entity<K>) -> FieldMap {
        entity.attributes().clone()
    }

    fn to_json(&self, entity: &Entity<K>) -> Result<String, ModelError> {
        Ok(serde_json::to_string(&self.to_fields(entity))?)
    }
}

/// API-facing serializer with change detection.
pub trait ApiSerializer<K: Keyed>: Serializer<K> {
    fn to_api(&self, entity: &Entity<K>) -> FieldMap {
        self.to_fields(entity)
    }

    /// Fields whose values are sent on change; `None` sends on every change.
    fn send_on_change(&self) -> Option<&[&'static str]> {
        None
    }

    /// Watched subset of the entity, or `None` when nothing is watched.
    fn dirty_api(&self, entity: &Entity<K>) -> Option<FieldMap> {
        let watched = self.send_on_change()?;
        Some(
            entity
                .attributes()
                .iter()
                .filter(|(field, _)| watched.iter().any(|name| *name == field.as_str()))
                .map(|(field, value)| (field.clone(), value.clone()))
                .collect(),
        )
    }

    fn is_update(&self, entity: &Entity<K>) -> bool {
        self.dirty_api(entity)
            .map_or(true, |dirty| !dirty.is_empty())
    }
}

/// Built-in serializer exposing every attribute.
#[derive(Debug, Clone, Copy, Default)]
pub struct FieldSerializer;

impl<K: Keyed> Serializer<K> for FieldSerializer {}

impl<K: Keyed> ApiSerializer<K> for FieldSerializer {}

/// Picks `fields` from `entity`, falling back to each paired default.
pub fn pick<K: Keyed>(entity: &Entity<K>, fields: &[(&str, FieldValue)]) -> FieldMap {
    fields
        .iter()
        .map(|(field, default)| {
            let value = entity
                .get(field)
                .filter(|value| !value.is_null())
                .cloned()
                .unwrap_or_else(|| default.clone());
            ((*field).to_string(), value)
        })
        .collect()
}
