//! `Repository<K>`: typed lookups and writes over one entity table.
//!
//! # Responsibility
//! - Run single, batch and code-key lookups through the query facade.
//! - Insert or update entities honouring key strategy, timestamps and the
//!   attached validator.
//!
//! # Invariants
//! - A projection set with `select` applies to the next query only.
//! - Every read is capped at `MAX_LIMIT` rows.

use super::{FoundMany, RepoError, RepoResult, WriteOperation};
use crate::db::{DbError, Order, Query, StoreHandle};
use crate::model::entity::ensure_known;
use crate::model::{
    CodeKeyed, Entity, EntityKey, FieldMap, FieldValue, KeyStrategy, Keyed, Projection,
    CREATED_AT, UPDATED_AT,
};
use crate::service::Validator;
use log::{debug, error};
use std::cell::Cell;
use std::collections::{HashMap, HashSet};
use std::fmt::{Debug, Formatter};
use std::sync::Arc;
use std::time::{Instant, SystemTime, UNIX_EPOCH};
use uuid::Uuid;

/// Upper bound on rows returned by any repository read.
pub const MAX_LIMIT: u32 = 10_000;
/// Keys per `IN (...)` lookup; stays well below SQLite's bind limit.
pub const FIND_MANY_CHUNK: usize = 500;

/// Data access for entity type `K`.
pub struct Repository<K: Keyed> {
    store: StoreHandle,
    code_field: Option<String>,
    projection: Cell<Projection>,
    validator: Option<Arc<dyn Validator<K>>>,
}

impl<K: Keyed> Repository<K> {
    pub fn new(store: StoreHandle) -> Self {
        Self {
            store,
            code_field: None,
            projection: Cell::new(Projection::All),
            validator: None,
        }
    }

    /// Attaches the validator run by every save.
    pub fn with_validator(mut self, validator: Arc<dyn Validator<K>>) -> Self {
        self.set_validator(validator);
        self
    }

    pub fn set_validator(&mut self, validator: Arc<dyn Validator<K>>) {
        self.validator = Some(validator);
    }

    pub fn has_validator(&self) -> bool {
        self.validator.is_some()
    }

    pub fn store(&self) -> &StoreHandle {
        &self.store
    }

    /// Restricts the columns read by the next query.
    ///
    /// The primary key is always read; `*` or an empty list selects all.
    pub fn select<S: AsRef<str>>(&self, columns: &[S]) -> RepoResult<&Self> {
        let projection = Projection::columns(columns);
        if let Projection::Columns(names) = &projection {
            for name in names {
                ensure_known::<K>(name)
                    .map_err(|err| RepoError::InvalidArgument(err.to_string()))?;
            }
        }
        self.projection.set(projection);
        Ok(self)
    }

    pub fn find(&self, id: impl Into<FieldValue>) -> RepoResult<Option<Entity<K>>> {
        let key = to_key(id)?;
        let row = self.query().where_eq(K::PRIMARY_KEY, key).first()?;
        Ok(row.map(Entity::from_row))
    }

    pub fn find_or_fail(&self, id: impl Into<FieldValue>) -> RepoResult<Entity<K>> {
        let key = to_key(id)?;
        self.find(key.clone())?
            .ok_or_else(|| RepoError::NotFound(vec![key]))
    }

    /// Found entity, or a new unsaved entity seeded with `defaults`.
    pub fn find_or_new(
        &self,
        id: impl Into<FieldValue>,
        defaults: FieldMap,
    ) -> RepoResult<Entity<K>> {
        match self.find(id)? {
            Some(found) => Ok(found),
            None => Ok(Entity::from_fields(defaults)?),
        }
    }

    /// Found entity, or a newly saved entity seeded with `defaults`.
    pub fn find_or_create(
        &self,
        id: impl Into<FieldValue>,
        defaults: FieldMap,
    ) -> RepoResult<Entity<K>> {
        if let Some(found) = self.find(id)? {
            return Ok(found);
        }
        let mut created = Entity::from_fields(defaults)?;
        self.save(&mut created)?;
        Ok(created)
    }

    /// Looks up `ids` in batches, returning one slot per id in input order.
    pub fn find_many<I>(&self, ids: I) -> RepoResult<FoundMany<K>>
    where
        I: IntoIterator,
        I::Item: Into<FieldValue>,
    {
        let started_at = Instant::now();
        let keys = ids.into_iter().map(to_key).collect::<RepoResult<Vec<_>>>()?;
        let projection = self.projection.take();

        let mut unique = Vec::new();
        let mut seen = HashSet::new();
        for key in &keys {
            if seen.insert(key.to_string()) {
                unique.push(FieldValue::from(key));
            }
        }

        let mut found: HashMap<String, Entity<K>> = HashMap::with_capacity(unique.len());
        for chunk in unique.chunks(FIND_MANY_CHUNK) {
            let rows = self
                .store
                .filter(K::TABLE)
                .select(projection.resolve(K::PRIMARY_KEY))
                .where_in(K::PRIMARY_KEY, chunk.to_vec())
                .get()?;
            for row in rows {
                let entity = Entity::<K>::from_row(row);
                if let Some(key) = entity.key() {
                    found.insert(key.to_string(), entity);
                }
            }
        }

        let slots = keys
            .into_iter()
            .map(|key| {
                let entity = found.get(&key.to_string()).cloned();
                (key, entity)
            })
            .collect::<Vec<_>>();

        debug!(
            "event=repo_find_many module=repo status=ok entity_type={} requested={} found={} duration_ms={}",
            K::TYPE_ID,
            slots.len(),
            found.len(),
            started_at.elapsed().as_millis()
        );
        Ok(FoundMany::new(slots))
    }

    /// Batch lookup with absent slots replaced by new entities seeded with
    /// `defaults`.
    pub fn find_many_or_new<I>(
        &self,
        ids: I,
        defaults: FieldMap,
    ) -> RepoResult<Vec<(EntityKey, Entity<K>)>>
    where
        I: IntoIterator,
        I::Item: Into<FieldValue>,
    {
        let template = Entity::<K>::from_fields(defaults)?;
        Ok(self.find_many(ids)?.or_else(|| template.clone()))
    }

    /// Batch lookup that fails listing every missing id.
    pub fn find_many_or_fail<I>(&self, ids: I) -> RepoResult<Vec<(EntityKey, Entity<K>)>>
    where
        I: IntoIterator,
        I::Item: Into<FieldValue>,
    {
        let found = self.find_many(ids)?;
        let missing = found.missing();
        if !missing.is_empty() {
            return Err(RepoError::NotFound(missing));
        }
        Ok(found
            .into_iter()
            .filter_map(|(key, entity)| entity.map(|entity| (key, entity)))
            .collect())
    }

    pub fn first(&self) -> RepoResult<Option<Entity<K>>> {
        Ok(self.query().first()?.map(Entity::from_row))
    }

    /// Alias of [`Repository::first`] for single-row entity types.
    pub fn find_instance(&self) -> RepoResult<Option<Entity<K>>> {
        self.first()
    }

    /// Newest entity by `created_at`, or by primary key without timestamps.
    pub fn find_last(&self) -> RepoResult<Option<Entity<K>>> {
        let column = if K::TIMESTAMPS { CREATED_AT } else { K::PRIMARY_KEY };
        let row = self
            .query()
            .latest(column)
            .latest(K::PRIMARY_KEY)
            .first()?;
        Ok(row.map(Entity::from_row))
    }

    /// Every row in primary key order, up to `MAX_LIMIT`.
    pub fn all(&self) -> RepoResult<Vec<Entity<K>>> {
        let rows = self.ordered_query().get()?;
        Ok(rows.into_iter().map(Entity::from_row).collect())
    }

    pub fn count(&self) -> RepoResult<u64> {
        self.projection.take();
        Ok(self.store.filter(K::TABLE).count()?)
    }

    /// Singleton upsert: force-fills the first row (or a new one) and saves it.
    pub fn form_set(&self, attributes: FieldMap) -> RepoResult<Entity<K>> {
        let mut entity = self.first()?.unwrap_or_default();
        entity.fill(attributes)?;
        self.save(&mut entity)?;
        Ok(entity)
    }

    /// Inserts a new entity or updates a stored one.
    ///
    /// # Errors
    /// - `Validation` when the attached validator rejects the entity.
    /// - `InvalidArgument` when a manual key is missing on insert.
    /// - `Persistence` when the store write fails.
    /// - `NotFound` when the stored row vanished before the update.
    pub fn save(&self, entity: &mut Entity<K>) -> RepoResult<()> {
        if let Some(validator) = &self.validator {
            validator.validate(entity)?;
        }

        let started_at = Instant::now();
        let operation = if entity.exists() {
            self.update_row(entity)
        } else {
            self.insert_row(entity)
        };

        match &operation {
            Ok(()) => debug!(
                "event=repo_save module=repo status=ok entity_type={} duration_ms={}",
                K::TYPE_ID,
                started_at.elapsed().as_millis()
            ),
            Err(err) => error!(
                "event=repo_save module=repo status=error entity_type={} duration_ms={} error={err}",
                K::TYPE_ID,
                started_at.elapsed().as_millis()
            ),
        }
        operation
    }

    /// Deletes the row bound to `entity`; returns whether a row was removed.
    pub fn delete(&self, entity: &mut Entity<K>) -> RepoResult<bool> {
        if !entity.exists() {
            return Ok(false);
        }
        let key = entity.key().ok_or_else(|| missing_key::<K>("delete"))?;
        let deleted = self
            .store
            .filter(K::TABLE)
            .where_eq(K::PRIMARY_KEY, &key)
            .delete()
            .map_err(|source| persistence(WriteOperation::Delete, Some(key), source))?;
        entity.set_exists(false);
        Ok(deleted > 0)
    }

    /// Unprojected rows whose `column` is one of `values`, fetched in chunks.
    pub(crate) fn load_in(
        &self,
        column: &str,
        values: &[FieldValue],
    ) -> RepoResult<Vec<Entity<K>>> {
        let mut loaded = Vec::new();
        for chunk in values.chunks(FIND_MANY_CHUNK) {
            let rows = self
                .store
                .filter(K::TABLE)
                .where_in(column, chunk.to_vec())
                .get()?;
            loaded.extend(rows.into_iter().map(Entity::from_row));
        }
        Ok(loaded)
    }

    /// Deletes rows whose `column` text is rejected by `keep`; returns the count.
    ///
    /// Stored `(key, column)` pairs are read once and doomed rows are deleted
    /// by primary key in chunks, so `keep` may accept any number of values.
    /// Null values are deleted only when `delete_null` is set.
    pub(crate) fn delete_unlisted(
        &self,
        column: &str,
        keep: impl Fn(&str) -> bool,
        delete_null: bool,
    ) -> RepoResult<usize> {
        self.projection.take();
        self.store.transaction(|store| {
            let rows = store
                .filter(K::TABLE)
                .select(Some(vec![K::PRIMARY_KEY.to_string(), column.to_string()]))
                .get()
                .map_err(|source| persistence(WriteOperation::Delete, None, source))?;

            let doomed = rows
                .iter()
                .filter_map(|row| {
                    let key = row.get(K::PRIMARY_KEY)?;
                    let kept = match row.get(column) {
                        None | Some(FieldValue::Null) => !delete_null,
                        Some(value) => value.to_text().is_some_and(|text| keep(&text)),
                    };
                    (!kept).then(|| key.clone())
                })
                .collect::<Vec<_>>();

            let mut deleted = 0;
            for chunk in doomed.chunks(FIND_MANY_CHUNK) {
                deleted += store
                    .filter(K::TABLE)
                    .where_in(K::PRIMARY_KEY, chunk.to_vec())
                    .delete()
                    .map_err(|source| persistence(WriteOperation::Delete, None, source))?;
            }
            Ok(deleted)
        })
    }

    fn insert_row(&self, entity: &mut Entity<K>) -> RepoResult<()> {
        let assigned = entity.key();
        match (K::KEY_STRATEGY, &assigned) {
            (KeyStrategy::Uuid, None) => {
                entity.set_primary_key(Some(EntityKey::Text(Uuid::new_v4().to_string())));
            }
            (KeyStrategy::Manual, None) => return Err(missing_key::<K>("insert")),
            (KeyStrategy::AutoIncrement, None) => {
                entity.set_primary_key(None);
            }
            (_, Some(_)) => {}
        }

        if K::TIMESTAMPS {
            let now = now_epoch_ms();
            for column in [CREATED_AT, UPDATED_AT] {
                if entity.get(column).map_or(true, FieldValue::is_null) {
                    entity.set(column, now)?;
                }
            }
        }

        let key = entity.key();
        let rowid = self
            .store
            .insert(K::TABLE, entity.attributes())
            .map_err(|source| persistence(WriteOperation::Insert, key.clone(), source))?;

        if key.is_none() {
            entity.set_primary_key(Some(EntityKey::Integer(rowid)));
        }
        entity.set_exists(true);
        Ok(())
    }

    fn update_row(&self, entity: &mut Entity<K>) -> RepoResult<()> {
        let key = entity.key().ok_or_else(|| missing_key::<K>("update"))?;
        if K::TIMESTAMPS {
            entity.set(UPDATED_AT, now_epoch_ms())?;
        }

        let mut fields = entity.attributes().clone();
        fields.remove(K::PRIMARY_KEY);
        let changed = self
            .store
            .update(K::TABLE, K::PRIMARY_KEY, &key, &fields)
            .map_err(|source| persistence(WriteOperation::Update, Some(key.clone()), source))?;

        if changed == 0 {
            return Err(RepoError::NotFound(vec![key]));
        }
        Ok(())
    }

    /// Facade query over `K::TABLE`, consuming the pending projection.
    fn query(&self) -> Query {
        let projection = self.projection.take();
        self.store
            .filter(K::TABLE)
            .select(projection.resolve(K::PRIMARY_KEY))
            .limit(MAX_LIMIT)
    }

    fn ordered_query(&self) -> Query {
        self.query()
            .order_by(Order::Asc(K::PRIMARY_KEY.to_string()))
            .offset(0)
    }
}

impl<K: CodeKeyed> Repository<K> {
    /// Business-key column used by code operations; `K::CODE_FIELD` unless
    /// switched with [`Repository::set_code`].
    pub fn code_field(&self) -> &str {
        self.code_field.as_deref().unwrap_or(K::CODE_FIELD)
    }

    /// Switches the business-key column used by code operations.
    pub fn set_code(&mut self, field: &str) -> RepoResult<&mut Self> {
        ensure_known::<K>(field)
            .map_err(|err| RepoError::InvalidArgument(err.to_string()))?;
        self.code_field = Some(field.to_string());
        Ok(self)
    }

    /// Looks up one entity by its trimmed code.
    pub fn find_code(&self, code: &str) -> RepoResult<Option<Entity<K>>> {
        let row = self
            .query()
            .where_eq(self.code_field(), code.trim())
            .first()?;
        Ok(row.map(Entity::from_row))
    }

    pub fn find_code_or_new(&self, code: &str) -> RepoResult<Entity<K>> {
        match self.find_code(code)? {
            Some(found) => Ok(found),
            None => Ok(Entity::new().with(self.code_field(), code.trim())?),
        }
    }

    /// Existing-or-new entity with `attributes` merged and the code forced.
    ///
    /// Nothing is saved.
    pub fn find_code_load(&self, code: &str, mut attributes: FieldMap) -> RepoResult<Entity<K>> {
        let mut entity = self.find_code(code)?.unwrap_or_default();
        attributes.insert(self.code_field().to_string(), FieldValue::from(code.trim()));
        entity.fill(attributes)?;
        Ok(entity)
    }

    /// Code values in primary key order, silently capped at `MAX_LIMIT`.
    pub fn all_codes(&self) -> RepoResult<Vec<FieldValue>> {
        let code_field = self.code_field();
        self.projection
            .set(Projection::Columns(vec![code_field.to_string()]));
        let rows = self.ordered_query().get()?;
        Ok(rows
            .into_iter()
            .map(|mut row| row.remove(code_field).unwrap_or_default())
            .collect())
    }

    /// Entities whose code is one of `codes` (trimmed).
    pub fn find_codes_all<S: AsRef<str>>(&self, codes: &[S]) -> RepoResult<Vec<Entity<K>>> {
        let rows = self.with_codes(codes).get()?;
        Ok(rows.into_iter().map(Entity::from_row).collect())
    }

    /// [`Repository::find_codes_all`] over a comma-separated list.
    pub fn find_with_codes(&self, codes: &str) -> RepoResult<Vec<Entity<K>>> {
        let codes = codes
            .split(',')
            .map(str::trim)
            .filter(|code| !code.is_empty())
            .collect::<Vec<_>>();
        self.find_codes_all(codes.as_slice())
    }

    /// Query restricted to rows whose code is one of `codes`.
    pub fn with_codes<S: AsRef<str>>(&self, codes: &[S]) -> Query {
        let codes = codes
            .iter()
            .map(|code| FieldValue::from(code.as_ref().trim()))
            .collect::<Vec<_>>();
        self.query().where_in(self.code_field(), codes)
    }

    /// Deletes every row whose code is not in `codes` (trimmed); returns the
    /// count.
    ///
    /// Rows with a null code survive a non-empty list.
    pub fn delete_not_codes<S: AsRef<str>>(&self, codes: &[S]) -> RepoResult<usize> {
        let listed = codes
            .iter()
            .map(|code| code.as_ref().trim().to_string())
            .collect::<HashSet<_>>();
        let deleted = self.delete_unlisted(
            self.code_field(),
            |code| listed.contains(code),
            codes.is_empty(),
        )?;

        debug!(
            "event=repo_delete_not_codes module=repo status=ok entity_type={} deleted={deleted}",
            K::TYPE_ID
        );
        Ok(deleted)
    }

    /// Loads `code` with `attributes` merged, then saves it.
    pub fn replace_code(&self, code: &str, attributes: FieldMap) -> RepoResult<Entity<K>> {
        let mut entity = self.find_code_load(code, attributes)?;
        self.save(&mut entity)?;
        Ok(entity)
    }

    /// Saves `entity` in place of the row holding `code`, or as a new row.
    pub fn replace_with(&self, code: &str, mut entity: Entity<K>) -> RepoResult<Entity<K>> {
        let found = self.find_code(code)?;
        entity.set_primary_key(found.as_ref().and_then(Entity::key));
        entity.set_exists(found.is_some());
        self.save(&mut entity)?;
        Ok(entity)
    }
}

impl<K: Keyed> Debug for Repository<K> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Repository")
            .field("type", &K::TYPE_ID)
            .field("table", &K::TABLE)
            .field("code_field", &self.code_field)
            .field("validator", &self.validator.is_some())
            .finish()
    }
}

fn to_key(id: impl Into<FieldValue>) -> RepoResult<EntityKey> {
    Ok(EntityKey::try_from(id.into())?)
}

fn missing_key<K: Keyed>(operation: &str) -> RepoError {
    RepoError::InvalidArgument(format!(
        "cannot {operation} `{}` entity without a primary key",
        K::TYPE_ID
    ))
}

fn persistence(operation: WriteOperation, key: Option<EntityKey>, source: DbError) -> RepoError {
    RepoError::Persistence {
        operation,
        key,
        source,
    }
}

fn now_epoch_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| i64::try_from(elapsed.as_millis()).unwrap_or(i64::MAX))
        .unwrap_or_default()
}
