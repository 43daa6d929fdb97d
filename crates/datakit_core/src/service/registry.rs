//! Explicit service registry and resolver.
//!
//! # Responsibility
//! - Hold `(service id) -> factory` entries populated at startup.
//! - Resolve `(entity type, service name, override)` to one registered id.
//! - Build typed repository/serializer/validator services for an entity type.
//!
//! # Invariants
//! - Resolution order: explicit override, sibling `<TYPE_ID>::<Service>`,
//!   default `services::<Service>`.
//! - An override names a registered id, checked when it is bound.
//! - Cached resolutions are dropped whenever entries or bindings change.

use super::serializer::{ApiSerializer, FieldSerializer, Serializer};
use super::validator::{RuleValidator, Validator};
use super::{
    ServiceError, ServiceResult, DEFAULT_NAMESPACE, REPOSITORY, SERIALIZER, SERIALIZER_API,
    VALIDATOR,
};
use crate::db::StoreHandle;
use crate::model::Keyed;
use crate::repo::Repository;
use log::debug;
use once_cell::sync::Lazy;
use regex::Regex;
use std::any::Any;
use std::collections::{BTreeMap, HashMap};
use std::fmt::{Debug, Formatter};
use std::sync::{Arc, PoisonError, RwLock};

static SERVICE_ID_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*(::[A-Za-z_][A-Za-z0-9_]*)*$")
        .expect("service id regex must compile")
});

type RepositoryFactory<K> = Arc<dyn Fn(StoreHandle) -> Repository<K> + Send + Sync>;
type SerializerService<K> = Arc<dyn Serializer<K>>;
type ApiSerializerService<K> = Arc<dyn ApiSerializer<K>>;
type ValidatorService<K> = Arc<dyn Validator<K>>;

type CacheKey = (String, String, Option<String>);

enum ServiceEntry {
    /// Built-in default for one service name.
    Builtin,
    /// Caller-provided service, optionally bound to one entity type.
    Provided {
        entity_type: Option<&'static str>,
        service: Arc<dyn Any + Send + Sync>,
    },
}

/// Registry of services keyed by id, with per-entity overrides.
#[derive(Default)]
pub struct ServiceRegistry {
    entries: BTreeMap<String, ServiceEntry>,
    bindings: BTreeMap<(String, String), String>,
    cache: RwLock<HashMap<CacheKey, String>>,
}

impl ServiceRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry holding the built-in `services::*` defaults.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        for service in [REPOSITORY, SERIALIZER, SERIALIZER_API, VALIDATOR] {
            registry
                .entries
                .insert(default_id(service), ServiceEntry::Builtin);
        }
        registry
    }

    /// Registers a repository factory for entity type `K`.
    pub fn register_repository<K, F>(&mut self, id: &str, factory: F) -> ServiceResult<()>
    where
        K: Keyed,
        F: Fn(StoreHandle) -> Repository<K> + Send + Sync + 'static,
    {
        let factory: RepositoryFactory<K> = Arc::new(factory);
        self.insert_typed::<K, _>(id, factory)
    }

    pub fn register_serializer<K, S>(&mut self, id: &str, serializer: S) -> ServiceResult<()>
    where
        K: Keyed,
        S: Serializer<K> + 'static,
    {
        let serializer: SerializerService<K> = Arc::new(serializer);
        self.insert_typed::<K, _>(id, serializer)
    }

    pub fn register_api_serializer<K, S>(&mut self, id: &str, serializer: S) -> ServiceResult<()>
    where
        K: Keyed,
        S: ApiSerializer<K> + 'static,
    {
        let serializer: ApiSerializerService<K> = Arc::new(serializer);
        self.insert_typed::<K, _>(id, serializer)
    }

    pub fn register_validator<K, V>(&mut self, id: &str, validator: V) -> ServiceResult<()>
    where
        K: Keyed,
        V: Validator<K> + 'static,
    {
        let validator: ValidatorService<K> = Arc::new(validator);
        self.insert_typed::<K, _>(id, validator)
    }

    /// Registers an arbitrary service, retrieved later with [`Self::service`].
    pub fn register<T: Any + Send + Sync>(&mut self, id: &str, service: T) -> ServiceResult<()> {
        self.insert_entry(
            id,
            ServiceEntry::Provided {
                entity_type: None,
                service: Arc::new(service),
            },
        )
    }

    /// Binds `entity_type`'s `service` to the registered `id`.
    ///
    /// Replaces any earlier binding for the same pair.
    pub fn bind(&mut self, entity_type: &str, service: &str, id: &str) -> ServiceResult<()> {
        let id = id.trim();
        if !self.entries.contains_key(id) {
            return Err(ServiceError::ServiceNotFound(id.to_string()));
        }
        self.bindings.insert(
            (entity_type.to_string(), service.to_string()),
            id.to_string(),
        );
        self.clear_cache();
        Ok(())
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entries.contains_key(id.trim())
    }

    /// Returns sorted registered ids.
    pub fn service_ids(&self) -> Vec<String> {
        self.entries.keys().cloned().collect()
    }

    /// Resolves the id serving `service` for `entity_type`.
    ///
    /// # Errors
    /// - `ServiceNotFound` when `explicit` (trimmed) is unregistered, or when
    ///   neither a sibling nor a default id is registered.
    pub fn resolve(
        &self,
        entity_type: &str,
        service: &str,
        explicit: Option<&str>,
    ) -> ServiceResult<String> {
        let explicit = explicit.map(str::trim);
        let cache_key = (
            entity_type.to_string(),
            service.to_string(),
            explicit.map(str::to_string),
        );
        if let Some(id) = self.read_cache(&cache_key) {
            return Ok(id);
        }

        let resolved = match explicit {
            Some(id) if self.entries.contains_key(id) => id.to_string(),
            Some(id) => return Err(ServiceError::ServiceNotFound(id.to_string())),
            None => [sibling_id(entity_type, service), default_id(service)]
                .into_iter()
                .find(|candidate| self.entries.contains_key(candidate))
                .ok_or_else(|| ServiceError::ServiceNotFound(service.to_string()))?,
        };

        debug!(
            "event=service_resolve module=service status=ok entity_type={entity_type} service={service} id={resolved}"
        );
        self.cache
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(cache_key, resolved.clone());
        Ok(resolved)
    }

    /// Resolves `service` for `K`, honouring registry bindings first and
    /// `K::service_override` second.
    pub fn resolve_for<K: Keyed>(&self, service: &str) -> ServiceResult<String> {
        let explicit = self.override_for::<K>(service);
        self.resolve(K::TYPE_ID, service, explicit.as_deref())
    }

    /// Builds the repository serving `K` over `store`.
    ///
    /// The resolved validator is attached unless the factory already set one.
    /// A missing validator is tolerated only when none was configured.
    pub fn repository<K: Keyed>(&self, store: &StoreHandle) -> ServiceResult<Repository<K>> {
        let id = self.resolve_for::<K>(REPOSITORY)?;
        let mut repository = match self.entry(&id)? {
            ServiceEntry::Builtin => Repository::new(store.clone()),
            ServiceEntry::Provided { .. } => {
                let factory = self.typed::<K, RepositoryFactory<K>>(&id)?;
                factory(store.clone())
            }
        };

        if !repository.has_validator() {
            match self.validator::<K>() {
                Ok(validator) => repository.set_validator(validator),
                Err(ServiceError::ServiceNotFound(_))
                    if self.override_for::<K>(VALIDATOR).is_none() => {}
                Err(err) => return Err(err),
            }
        }
        Ok(repository)
    }

    pub fn serializer<K: Keyed>(&self) -> ServiceResult<SerializerService<K>> {
        let id = self.resolve_for::<K>(SERIALIZER)?;
        match self.entry(&id)? {
            ServiceEntry::Builtin => Ok(Arc::new(FieldSerializer)),
            ServiceEntry::Provided { .. } => self.typed::<K, SerializerService<K>>(&id),
        }
    }

    pub fn api_serializer<K: Keyed>(&self) -> ServiceResult<ApiSerializerService<K>> {
        let id = self.resolve_for::<K>(SERIALIZER_API)?;
        match self.entry(&id)? {
            ServiceEntry::Builtin => Ok(Arc::new(FieldSerializer)),
            ServiceEntry::Provided { .. } => self.typed::<K, ApiSerializerService<K>>(&id),
        }
    }

    pub fn validator<K: Keyed>(&self) -> ServiceResult<ValidatorService<K>> {
        let id = self.resolve_for::<K>(VALIDATOR)?;
        match self.entry(&id)? {
            ServiceEntry::Builtin => Ok(Arc::new(RuleValidator)),
            ServiceEntry::Provided { .. } => self.typed::<K, ValidatorService<K>>(&id),
        }
    }

    /// Resolves a caller-registered service of type `T` for `entity_type`.
    pub fn service<T: Any + Send + Sync>(
        &self,
        entity_type: &str,
        service: &str,
    ) -> ServiceResult<Arc<T>> {
        let explicit = self
            .bindings
            .get(&(entity_type.to_string(), service.to_string()))
            .map(String::as_str);
        let id = self.resolve(entity_type, service, explicit)?;
        match self.entry(&id)? {
            ServiceEntry::Provided { service: provided, .. } => {
                Arc::clone(provided)
                    .downcast::<T>()
                    .map_err(|_| ServiceError::ServiceMismatch {
                        id: id.clone(),
                        expected: entity_type.to_string(),
                    })
            }
            ServiceEntry::Builtin => Err(ServiceError::ServiceMismatch {
                id: id.clone(),
                expected: entity_type.to_string(),
            }),
        }
    }

    fn override_for<K: Keyed>(&self, service: &str) -> Option<String> {
        self.bindings
            .get(&(K::TYPE_ID.to_string(), service.to_string()))
            .cloned()
            .or_else(|| K::service_override(service).map(str::to_string))
    }

    fn entry(&self, id: &str) -> ServiceResult<&ServiceEntry> {
        self.entries
            .get(id)
            .ok_or_else(|| ServiceError::ServiceNotFound(id.to_string()))
    }

    fn typed<K: Keyed, T: Any + Clone>(&self, id: &str) -> ServiceResult<T> {
        let mismatch = || ServiceError::ServiceMismatch {
            id: id.to_string(),
            expected: K::TYPE_ID.to_string(),
        };
        match self.entry(id)? {
            ServiceEntry::Provided { service, .. } => {
                service.downcast_ref::<T>().cloned().ok_or_else(mismatch)
            }
            ServiceEntry::Builtin => Err(mismatch()),
        }
    }

    fn insert_typed<K: Keyed, T: Any + Send + Sync>(
        &mut self,
        id: &str,
        service: T,
    ) -> ServiceResult<()> {
        self.insert_entry(
            id,
            ServiceEntry::Provided {
                entity_type: Some(K::TYPE_ID),
                service: Arc::new(service),
            },
        )
    }

    fn insert_entry(&mut self, id: &str, entry: ServiceEntry) -> ServiceResult<()> {
        let id = id.trim();
        if !is_valid_service_id(id) {
            return Err(ServiceError::InvalidServiceId(id.to_string()));
        }
        if self.entries.contains_key(id) {
            return Err(ServiceError::DuplicateServiceId(id.to_string()));
        }
        self.entries.insert(id.to_string(), entry);
        self.clear_cache();
        debug!("event=service_register module=service status=ok id={id}");
        Ok(())
    }

    fn read_cache(&self, key: &CacheKey) -> Option<String> {
        self.cache
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    fn clear_cache(&mut self) {
        self.cache
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

impl Debug for ServiceRegistry {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let entries = self
            .entries
            .iter()
            .map(|(id, entry)| {
                let kind = match entry {
                    ServiceEntry::Builtin => "builtin",
                    ServiceEntry::Provided {
                        entity_type: Some(entity_type),
                        ..
                    } => *entity_type,
                    ServiceEntry::Provided { .. } => "any",
                };
                (id.as_str(), kind)
            })
            .collect::<BTreeMap<_, _>>();
        f.debug_struct("ServiceRegistry")
            .field("entries", &entries)
            .field("bindings", &self.bindings)
            .finish()
    }
}

/// `<entity_type>::<service>`.
pub fn sibling_id(entity_type: &str, service: &str) -> String {
    format!("{entity_type}::{service}")
}

/// `services::<service>`.
pub fn default_id(service: &str) -> String {
    format!("{DEFAULT_NAMESPACE}::{service}")
}

fn is_valid_service_id(value: &str) -> bool {
    SERVICE_ID_RE.is_match(value)
}
