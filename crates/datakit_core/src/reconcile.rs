//! Set reconciliation: make stored rows match an authoritative set.
//!
//! # Responsibility
//! - Delete rows whose key is absent from the input.
//! - Overwrite rows whose key is present, insert the rest.
//!
//! # Invariants
//! - Afterwards the stored keys equal the input keys and non-key fields equal
//!   the input's.
//! - Input is checked (known key field, present keys, no duplicates) before
//!   any write.
//! - `reconcile` applies partially on failure; `reconcile_atomic` does not.

use crate::model::entity::ensure_known;
use crate::model::{Entity, EntityKey, FieldValue, Keyed};
use crate::repo::{RepoError, RepoResult, Repository};
use log::{error, info};
use std::collections::{BTreeMap, HashMap};
use std::time::Instant;

/// Reconciler over one repository.
pub struct Reconciler<'r, K: Keyed> {
    repository: &'r Repository<K>,
}

impl<'r, K: Keyed> Reconciler<'r, K> {
    pub fn new(repository: &'r Repository<K>) -> Self {
        Self { repository }
    }

    /// Replaces the stored population with `authoritative`, matched on
    /// `key_field`. Returns the saved entities keyed by `key_field`.
    ///
    /// # Errors
    /// - `InvalidArgument` for an unknown key field, a missing/blank key or a
    ///   duplicate key; nothing is written.
    /// - `InvalidData` when a loaded row matches no input key.
    /// - `Persistence` / `Validation` from the individual writes; earlier
    ///   writes stay applied.
    pub fn reconcile(
        &self,
        key_field: &str,
        authoritative: Vec<Entity<K>>,
    ) -> RepoResult<BTreeMap<EntityKey, Entity<K>>> {
        let started_at = Instant::now();
        let result = self.apply(key_field, authoritative);
        match &result {
            Ok(saved) => info!(
                "event=reconcile module=reconcile status=ok entity_type={} saved={} duration_ms={}",
                K::TYPE_ID,
                saved.len(),
                started_at.elapsed().as_millis()
            ),
            Err(err) => error!(
                "event=reconcile module=reconcile status=error entity_type={} duration_ms={} error={err}",
                K::TYPE_ID,
                started_at.elapsed().as_millis()
            ),
        }
        result
    }

    /// [`Reconciler::reconcile`] inside one store transaction.
    pub fn reconcile_atomic(
        &self,
        key_field: &str,
        authoritative: Vec<Entity<K>>,
    ) -> RepoResult<BTreeMap<EntityKey, Entity<K>>> {
        self.repository
            .store()
            .transaction(|_| self.reconcile(key_field, authoritative))
    }

    fn apply(
        &self,
        key_field: &str,
        authoritative: Vec<Entity<K>>,
    ) -> RepoResult<BTreeMap<EntityKey, Entity<K>>> {
        let Partition {
            mut pending,
            positions,
        } = partition::<K>(key_field, authoritative)?;
        let keys = pending
            .iter()
            .map(|(key, _)| FieldValue::from(key))
            .collect::<Vec<_>>();

        let removed = self
            .repository
            .delete_unlisted(key_field, |key| positions.contains_key(key), true)?;

        let mut saved = BTreeMap::new();
        for mut stored in self.repository.load_in(key_field, &keys)? {
            let input = stored
                .key_for(key_field)
                .and_then(|key| positions.get(&key.to_string()).copied())
                .and_then(|position| {
                    let (key, slot) = &mut pending[position];
                    slot.take().map(|input| (key.clone(), input))
                });
            let Some((key, input)) = input else {
                return Err(RepoError::InvalidData(format!(
                    "stored `{}` row does not match any input key on `{key_field}`",
                    K::TYPE_ID
                )));
            };

            let mut fields = input.into_attributes();
            fields.remove(K::PRIMARY_KEY);
            stored.fill(fields)?;
            self.repository.save(&mut stored)?;
            saved.insert(key, stored);
        }

        let updated = saved.len();
        for (key, slot) in pending {
            let Some(mut input) = slot else {
                continue;
            };
            input.set_exists(false);
            self.repository.save(&mut input)?;
            saved.insert(key, input);
        }

        info!(
            "event=reconcile_apply module=reconcile status=ok entity_type={} deleted={removed} updated={updated} inserted={}",
            K::TYPE_ID,
            saved.len() - updated
        );
        Ok(saved)
    }
}

/// Input entities in input order, each with its key; `positions` maps the
/// key text to the entity's index.
struct Partition<K: Keyed> {
    pending: Vec<(EntityKey, Option<Entity<K>>)>,
    positions: HashMap<String, usize>,
}

fn partition<K: Keyed>(key_field: &str, authoritative: Vec<Entity<K>>) -> RepoResult<Partition<K>> {
    ensure_known::<K>(key_field).map_err(|err| RepoError::InvalidArgument(err.to_string()))?;

    let mut pending = Vec::with_capacity(authoritative.len());
    let mut positions = HashMap::with_capacity(authoritative.len());
    for (index, entity) in authoritative.into_iter().enumerate() {
        let value = entity.get(key_field).cloned().unwrap_or_default();
        let key = EntityKey::try_from(value).map_err(|err| {
            RepoError::InvalidArgument(format!(
                "input entity at index {index} has no usable `{key_field}`: {err}"
            ))
        })?;
        if positions.insert(key.to_string(), index).is_some() {
            return Err(RepoError::InvalidArgument(format!(
                "duplicate `{key_field}` value `{key}` in input"
            )));
        }
        pending.push((key, Some(entity)));
    }
    Ok(Partition { pending, positions })
}
