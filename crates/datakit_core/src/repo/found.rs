//! Ordered batch lookup result.

use crate::model::{Entity, EntityKey, Keyed};
use std::collections::HashSet;
use std::fmt::{Debug, Formatter};

/// One slot per requested key, in request order; duplicates are kept.
pub struct FoundMany<K: Keyed> {
    slots: Vec<(EntityKey, Option<Entity<K>>)>,
}

impl<K: Keyed> FoundMany<K> {
    pub(crate) fn new(slots: Vec<(EntityKey, Option<Entity<K>>)>) -> Self {
        Self { slots }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&EntityKey, Option<&Entity<K>>)> {
        self.slots.iter().map(|(key, found)| (key, found.as_ref()))
    }

    pub fn get(&self, index: usize) -> Option<&Entity<K>> {
        self.slots.get(index).and_then(|(_, found)| found.as_ref())
    }

    pub fn keys(&self) -> impl Iterator<Item = &EntityKey> {
        self.slots.iter().map(|(key, _)| key)
    }

    /// Missing keys in request order, each listed once.
    pub fn missing(&self) -> Vec<EntityKey> {
        let mut seen = HashSet::new();
        self.slots
            .iter()
            .filter(|(_, found)| found.is_none())
            .filter(|(key, _)| seen.insert(key.clone()))
            .map(|(key, _)| key.clone())
            .collect()
    }

    pub fn is_complete(&self) -> bool {
        self.slots.iter().all(|(_, found)| found.is_some())
    }

    /// Fills every absent slot with `make()`.
    pub fn or_else(self, mut make: impl FnMut() -> Entity<K>) -> Vec<(EntityKey, Entity<K>)> {
        self.slots
            .into_iter()
            .map(|(key, found)| {
                let entity = found.unwrap_or_else(&mut make);
                (key, entity)
            })
            .collect()
    }

    pub fn into_slots(self) -> Vec<(EntityKey, Option<Entity<K>>)> {
        self.slots
    }
}

impl<K: Keyed> Clone for FoundMany<K> {
    fn clone(&self) -> Self {
        Self {
            slots: self.slots.clone(),
        }
    }
}

impl<K: Keyed> Debug for FoundMany<K> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.slots.iter()).finish()
    }
}

impl<K: Keyed> IntoIterator for FoundMany<K> {
    type Item = (EntityKey, Option<Entity<K>>);
    type IntoIter = std::vec::IntoIter<Self::Item>;

    fn into_iter(self) -> Self::IntoIter {
        self.slots.into_iter()
    }
}
