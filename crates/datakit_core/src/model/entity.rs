//! Entity capability traits and the typed entity record.
//!
//! # Responsibility
//! - Declare per-type storage metadata (`Keyed`) and the optional business
//!   key (`CodeKeyed`).
//! - Provide construction helpers from field maps, JSON and renamed maps.
//!
//! # Invariants
//! - `exists == true` only for entities loaded from, or saved to, the store.
//! - Every attribute name is a known column of the entity type.

use crate::model::value::{EntityKey, FieldMap, FieldValue};
use crate::model::ModelError;
use crate::service::validator::FieldRule;
use std::fmt::{Debug, Formatter};
use std::marker::PhantomData;

/// Column set by the store when a timestamped entity is inserted.
pub const CREATED_AT: &str = "created_at";
/// Column refreshed by the store on every save of a timestamped entity.
pub const UPDATED_AT: &str = "updated_at";

/// How a missing primary key is filled on insert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyStrategy {
    /// Integer rowid assigned by the store.
    AutoIncrement,
    /// Random v4 UUID text assigned before insert.
    Uuid,
    /// Caller must set the key before insert.
    Manual,
}

/// Storage description of one entity type.
///
/// Implemented by zero-sized marker types; a `Repository<K>` is generic over it.
pub trait Keyed: Sized + 'static {
    /// Identity used for service lookups (`<TYPE_ID>::Repository`).
    const TYPE_ID: &'static str;
    const TABLE: &'static str;
    const PRIMARY_KEY: &'static str = "id";
    /// Declared columns. The primary key and timestamp columns are implied.
    const COLUMNS: &'static [&'static str];
    const KEY_STRATEGY: KeyStrategy = KeyStrategy::AutoIncrement;
    /// Maintain `created_at` / `updated_at` on save.
    const TIMESTAMPS: bool = false;

    /// Rules checked by the built-in validator service.
    fn rules() -> &'static [FieldRule] {
        &[]
    }

    /// Statically configured service id for `service`, if any.
    fn service_override(_service: &str) -> Option<&'static str> {
        None
    }

    /// Returns whether `field` may be stored on this entity type.
    fn is_known_column(field: &str) -> bool {
        field == Self::PRIMARY_KEY
            || Self::COLUMNS.iter().any(|column| *column == field)
            || (Self::TIMESTAMPS && (field == CREATED_AT || field == UPDATED_AT))
    }
}

/// Entity types carrying a unique, caller-assigned business key.
pub trait CodeKeyed: Keyed {
    const CODE_FIELD: &'static str = "code";
}

/// One record of entity type `K`.
pub struct Entity<K: Keyed> {
    attributes: FieldMap,
    exists: bool,
    _kind: PhantomData<fn() -> K>,
}

impl<K: Keyed> Entity<K> {
    /// Creates an empty, unsaved entity.
    pub fn new() -> Self {
        Self {
            attributes: FieldMap::new(),
            exists: false,
            _kind: PhantomData,
        }
    }

    /// Creates an unsaved entity seeded with `fields`.
    ///
    /// # Errors
    /// - `ModelError::UnknownField` when a field is not declared by `K`.
    pub fn from_fields(fields: FieldMap) -> Result<Self, ModelError> {
        let mut entity = Self::new();
        entity.fill(fields)?;
        Ok(entity)
    }

    /// Creates unsaved entities from keyed field maps, writing each key into
    /// `key_field` when given.
    pub fn from_fields_keyed(
        rows: impl IntoIterator<Item = (EntityKey, FieldMap)>,
        key_field: Option<&str>,
    ) -> Result<Vec<Self>, ModelError> {
        rows.into_iter()
            .map(|(key, mut fields)| {
                if let Some(field) = key_field {
                    fields.insert(field.to_string(), key.into());
                }
                Self::from_fields(fields)
            })
            .collect()
    }

    /// Creates an unsaved entity from `source`, keeping only mapped fields.
    ///
    /// `mapping` pairs are `(source_name, field_name)`; absent source names are
    /// skipped.
    pub fn from_map(source: &FieldMap, mapping: &[(&str, &str)]) -> Result<Self, ModelError> {
        let mut entity = Self::new();
        for (from, to) in mapping {
            if let Some(value) = source.get(*from) {
                entity.set(*to, value.clone())?;
            }
        }
        Ok(entity)
    }

    /// Decodes one JSON object into an unsaved entity.
    pub fn from_json(json: &str) -> Result<Self, ModelError> {
        let decoded: serde_json::Value = serde_json::from_str(json)?;
        Self::from_json_value(decoded, None)
    }

    /// Decodes a JSON array of objects into unsaved entities, in array order.
    pub fn from_json_collection(json: &str) -> Result<Vec<Self>, ModelError> {
        let decoded: serde_json::Value = serde_json::from_str(json)?;
        let serde_json::Value::Array(items) = decoded else {
            return Err(ModelError::InvalidJsonShape(
                "JSON did not decode to an array".to_string(),
            ));
        };

        items
            .into_iter()
            .enumerate()
            .map(|(index, item)| Self::from_json_value(item, Some(index)))
            .collect()
    }

    fn from_json_value(value: serde_json::Value, index: Option<usize>) -> Result<Self, ModelError> {
        let serde_json::Value::Object(object) = value else {
            let message = match index {
                Some(index) => format!("JSON at index {index} is not an object of attributes"),
                None => "JSON did not decode to an object".to_string(),
            };
            return Err(ModelError::InvalidJsonShape(message));
        };

        let fields = object
            .into_iter()
            .map(|(field, value)| (field, FieldValue::from_json(value)))
            .collect();
        Self::from_fields(fields)
    }

    /// Wraps a row materialized by the store. Rows are trusted to match `K`.
    pub(crate) fn from_row(attributes: FieldMap) -> Self {
        Self {
            attributes,
            exists: true,
            _kind: PhantomData,
        }
    }

    pub fn exists(&self) -> bool {
        self.exists
    }

    pub(crate) fn set_exists(&mut self, exists: bool) {
        self.exists = exists;
    }

    pub fn attributes(&self) -> &FieldMap {
        &self.attributes
    }

    pub fn into_attributes(self) -> FieldMap {
        self.attributes
    }

    pub fn get(&self, field: &str) -> Option<&FieldValue> {
        self.attributes.get(field)
    }

    pub fn has(&self, field: &str) -> bool {
        self.attributes.contains_key(field)
    }

    /// Returns the attribute or `ModelError::MissingField`.
    pub fn require(&self, field: &str) -> Result<&FieldValue, ModelError> {
        self.attributes
            .get(field)
            .ok_or_else(|| ModelError::MissingField {
                entity_type: K::TYPE_ID,
                field: field.to_string(),
            })
    }

    /// Assigns one declared field.
    pub fn set(
        &mut self,
        field: &str,
        value: impl Into<FieldValue>,
    ) -> Result<&mut Self, ModelError> {
        ensure_known::<K>(field)?;
        self.attributes.insert(field.to_string(), value.into());
        Ok(self)
    }

    /// Builder form of [`Entity::set`].
    pub fn with(mut self, field: &str, value: impl Into<FieldValue>) -> Result<Self, ModelError> {
        self.set(field, value)?;
        Ok(self)
    }

    /// Overwrites every given field, the primary key included.
    ///
    /// Nothing is written when any field is unknown.
    pub fn fill(&mut self, fields: FieldMap) -> Result<&mut Self, ModelError> {
        if let Some(unknown) = fields.keys().find(|field| !K::is_known_column(field.as_str())) {
            return Err(ModelError::UnknownField {
                entity_type: K::TYPE_ID,
                field: unknown.clone(),
            });
        }
        self.attributes.extend(fields);
        Ok(self)
    }

    /// Primary key value, if set to a key-capable value.
    pub fn key(&self) -> Option<EntityKey> {
        self.key_for(K::PRIMARY_KEY)
    }

    /// Value of `field` as a key, if set to a key-capable value.
    pub fn key_for(&self, field: &str) -> Option<EntityKey> {
        self.attributes
            .get(field)
            .and_then(|value| EntityKey::try_from(value).ok())
    }

    /// Sets or clears the primary key.
    pub fn set_primary_key(&mut self, key: Option<EntityKey>) -> &mut Self {
        match key {
            Some(key) => {
                self.attributes.insert(K::PRIMARY_KEY.to_string(), key.into());
            }
            None => {
                self.attributes.remove(K::PRIMARY_KEY);
            }
        }
        self
    }
}

impl<K: CodeKeyed> Entity<K> {
    pub fn code(&self) -> Option<&FieldValue> {
        self.attributes.get(K::CODE_FIELD)
    }

    pub fn is_code_set(&self) -> bool {
        self.code().is_some_and(|code| !code.is_blank())
    }
}

impl<K: Keyed> Default for Entity<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Keyed> Clone for Entity<K> {
    fn clone(&self) -> Self {
        Self {
            attributes: self.attributes.clone(),
            exists: self.exists,
            _kind: PhantomData,
        }
    }
}

impl<K: Keyed> PartialEq for Entity<K> {
    fn eq(&self, other: &Self) -> bool {
        self.exists == other.exists && self.attributes == other.attributes
    }
}

impl<K: Keyed> Debug for Entity<K> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Entity")
            .field("type", &K::TYPE_ID)
            .field("exists", &self.exists)
            .field("attributes", &self.attributes)
            .finish()
    }
}

pub(crate) fn ensure_known<K: Keyed>(field: &str) -> Result<(), ModelError> {
    if K::is_known_column(field) {
        Ok(())
    } else {
        Err(ModelError::UnknownField {
            entity_type: K::TYPE_ID,
            field: field.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::{CodeKeyed, Entity, Keyed};
    use crate::model::{EntityKey, FieldMap, FieldValue, ModelError};

    struct Menu;

    impl Keyed for Menu {
        const TYPE_ID: &'static str = "menus";
        const TABLE: &'static str = "cms_menus";
        const COLUMNS: &'static [&'static str] = &["code", "name"];
        const TIMESTAMPS: bool = true;
    }

    impl CodeKeyed for Menu {}

    #[test]
    fn set_rejects_undeclared_fields() {
        let mut menu = Entity::<Menu>::new();
        let err = menu.set("colour", "red").unwrap_err();
        assert!(matches!(err, ModelError::UnknownField { field, .. } if field == "colour"));
        assert!(menu.attributes().is_empty());
    }

    #[test]
    fn fill_is_all_or_nothing() {
        let mut menu = Entity::<Menu>::new().with("name", "main").unwrap();
        let mut fields = FieldMap::new();
        fields.insert("name".to_string(), FieldValue::from("footer"));
        fields.insert("bogus".to_string(), FieldValue::from(1_i64));

        assert!(menu.fill(fields).is_err());
        assert_eq!(menu.get("name"), Some(&FieldValue::from("main")));
    }

    #[test]
    fn timestamps_and_primary_key_are_implied_columns() {
        assert!(Menu::is_known_column("id"));
        assert!(Menu::is_known_column("created_at"));
        assert!(Menu::is_known_column("updated_at"));
        assert!(!Menu::is_known_column("deleted_at"));
    }

    #[test]
    fn from_map_renames_and_drops_unmapped_fields() {
        let mut source = FieldMap::new();
        source.insert("title".to_string(), FieldValue::from("Main"));
        source.insert("ignored".to_string(), FieldValue::from("x"));

        let menu = Entity::<Menu>::from_map(&source, &[("title", "name"), ("slug", "code")])
            .unwrap();
        assert_eq!(menu.get("name"), Some(&FieldValue::from("Main")));
        assert!(!menu.has("code"));
        assert!(!menu.has("ignored"));
        assert!(!menu.exists());
    }

    #[test]
    fn from_json_collection_reports_bad_index() {
        let menus = Entity::<Menu>::from_json_collection(r#"[{"code":"a"},{"code":"b"}]"#)
            .unwrap();
        assert_eq!(menus.len(), 2);
        assert!(menus[1].is_code_set());

        let err = Entity::<Menu>::from_json_collection(r#"[{"code":"a"}, 3]"#).unwrap_err();
        assert!(err.to_string().contains("index 1"));
    }

    #[test]
    fn keyed_rows_write_their_key_into_the_key_field() {
        let mut fields = FieldMap::new();
        fields.insert("name".to_string(), FieldValue::from("Main"));
        let menus = Entity::<Menu>::from_fields_keyed(
            vec![(EntityKey::from("main"), fields)],
            Some("code"),
        )
        .unwrap();
        assert_eq!(menus[0].code(), Some(&FieldValue::from("main")));
    }

    #[test]
    fn require_reports_missing_attribute() {
        let menu = Entity::<Menu>::new();
        let err = menu.require("name").unwrap_err();
        assert!(matches!(err, ModelError::MissingField { .. }));
    }

    #[test]
    fn primary_key_can_be_cleared() {
        let mut menu = Entity::<Menu>::new();
        menu.set_primary_key(Some(EntityKey::Integer(4)));
        assert_eq!(menu.key(), Some(EntityKey::Integer(4)));
        menu.set_primary_key(None);
        assert_eq!(menu.key(), None);
    }
}
