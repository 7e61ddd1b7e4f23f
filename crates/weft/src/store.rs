// Copyright 2026 Dropbox (created by Andrew Yates <ayates@dropbox.com>)

//! Data stores and typed accessors
//!
//! A [`DataStore`] is any map-like carrier of per-invocation data: flow
//! contexts implement it, and [`DataMap`] is the standalone mutex-backed
//! implementation used for pod seeds and context storage. Values are stored
//! erased; [`DataAccessor`] is the typed, schema-validated view over them.
//!
//! Child stores inherit from their parents by copy-at-creation
//! ([`DataMap::fork`]); writes in a child are local.

use crate::error::{Error, ErrorCode, Result};
use crate::key::Key;
use crate::schema::{validate_subject, SchemaRef};
use parking_lot::Mutex;
use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

/// Type-erased value shared across the runtime.
pub type AnyValue = Arc<dyn Any + Send + Sync>;

/// Erase a concrete value.
pub fn any_value<T: Send + Sync + 'static>(value: T) -> AnyValue {
    Arc::new(value)
}

/// Downcast an erased value, reporting a structured error on mismatch.
pub(crate) fn downcast<T: Send + Sync + 'static>(
    value: AnyValue,
    subject: &str,
) -> Result<Arc<T>> {
    value.downcast::<T>().map_err(|_| {
        Error::system(
            ErrorCode::TypeMismatch,
            format!(
                "value for `{subject}` is not a `{}`",
                std::any::type_name::<T>()
            ),
        )
    })
}

/// Map-like carrier of erased, key-addressed data.
pub trait DataStore: Send + Sync {
    /// Read the raw value stored under `key`.
    fn get_raw(&self, key: &Key) -> Option<AnyValue>;

    /// Store `value` under `key`, replacing any previous value.
    fn set_raw(&self, key: Key, value: AnyValue);
}

/// An initialization pair for seeding a [`DataStore`] at construction time.
#[derive(Clone)]
pub struct ContextSeed {
    pub(crate) key: Key,
    pub(crate) value: AnyValue,
}

impl ContextSeed {
    /// Build a seed from an already-validated value.
    pub fn new(key: Key, value: AnyValue) -> Self {
        Self { key, value }
    }

    /// The key this seed writes to.
    pub fn key(&self) -> &Key {
        &self.key
    }
}

/// Mutex-backed [`DataStore`].
#[derive(Default, Clone)]
pub struct DataMap {
    inner: Arc<Mutex<HashMap<Key, AnyValue>>>,
}

impl DataMap {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Store seeded from initialization pairs, in order (later seeds win).
    pub fn from_seeds(seeds: impl IntoIterator<Item = ContextSeed>) -> Self {
        let store = Self::new();
        for seed in seeds {
            store.set_raw(seed.key, seed.value);
        }
        store
    }

    /// Copy-at-creation fork: the child starts with the parent's entries and
    /// diverges from there.
    pub fn fork(&self) -> Self {
        let copied = self.inner.lock().clone();
        Self {
            inner: Arc::new(Mutex::new(copied)),
        }
    }

    /// Apply a seed to this store.
    pub fn apply(&self, seed: ContextSeed) {
        self.set_raw(seed.key, seed.value);
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    /// True when the store has no entries.
    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }
}

impl DataStore for DataMap {
    fn get_raw(&self, key: &Key) -> Option<AnyValue> {
        self.inner.lock().get(key).cloned()
    }

    fn set_raw(&self, key: Key, value: AnyValue) {
        self.inner.lock().insert(key, value);
    }
}

/// Typed, schema-validated view over a [`DataStore`].
///
/// The required flavor ([`accessor`]) errors when the entry is missing; the
/// defaulted flavor ([`DataAccessor::with_default`]) falls back instead.
/// Both validate on read and on write.
pub struct DataAccessor<T> {
    key: Key,
    schema: SchemaRef<T>,
    default: Option<Arc<T>>,
}

impl<T> Clone for DataAccessor<T> {
    fn clone(&self) -> Self {
        Self {
            key: self.key.clone(),
            schema: self.schema.clone(),
            default: self.default.clone(),
        }
    }
}

/// Required accessor under the interned key `name`.
pub fn accessor<T>(name: impl AsRef<str>, schema: SchemaRef<T>) -> DataAccessor<T> {
    DataAccessor {
        key: Key::named(name),
        schema,
        default: None,
    }
}

impl<T> DataAccessor<T> {
    /// Required accessor under a fresh, never-colliding key.
    pub fn unique(label: impl AsRef<str>, schema: SchemaRef<T>) -> Self {
        Self {
            key: Key::unique(label),
            schema,
            default: None,
        }
    }

    /// Defaulted flavor: reads never fail with a missing-entry error.
    #[must_use]
    pub fn with_default(mut self, default: T) -> Self {
        self.default = Some(Arc::new(default));
        self
    }

    /// The key this accessor addresses.
    pub fn key(&self) -> &Key {
        &self.key
    }
}

impl<T: Clone + Send + Sync + 'static> DataAccessor<T> {
    fn validate_stored(&self, raw: AnyValue) -> Result<Arc<T>> {
        let stored = downcast::<T>(raw, self.key.label())?;
        let validated = validate_subject(&self.schema, Some(self.key.label_arc()), (*stored).clone())?;
        Ok(Arc::new(validated))
    }

    /// Read and validate, `Ok(None)` when absent and no default is set.
    pub fn find(&self, store: &dyn DataStore) -> Result<Option<Arc<T>>> {
        match store.get_raw(&self.key) {
            Some(raw) => self.validate_stored(raw).map(Some),
            None => Ok(self.default.clone()),
        }
    }

    /// Read and validate, erroring when absent and no default is set.
    pub fn get(&self, store: &dyn DataStore) -> Result<Arc<T>> {
        self.find(store)?.ok_or_else(|| {
            Error::system(
                ErrorCode::MissingAttribute,
                format!("no value stored for `{}`", self.key.label()),
            )
        })
    }

    /// Validate and store.
    pub fn set(&self, store: &dyn DataStore, value: T) -> Result<()> {
        let validated = validate_subject(&self.schema, Some(self.key.label_arc()), value)?;
        store.set_raw(self.key.clone(), Arc::new(validated));
        Ok(())
    }

    /// Validate and produce an initialization pair for seeding a store.
    pub fn preset(&self, value: T) -> Result<ContextSeed> {
        let validated = validate_subject(&self.schema, Some(self.key.label_arc()), value)?;
        Ok(ContextSeed {
            key: self.key.clone(),
            value: Arc::new(validated),
        })
    }
}
