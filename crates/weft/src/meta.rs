// Copyright 2026 Dropbox (created by Andrew Yates <ayates@dropbox.com>)

//! Meta attributes
//!
//! A [`Meta`] is a symbol-keyed, schema-validated attribute attached to
//! executor descriptors, scopes, flow contexts, or any other [`MetaSource`].
//! Construction (`of`, `preset`) and retrieval (`find`, `get`, `some`) both
//! run the value through the meta's schema, so a stored attribute is always
//! well-formed at the point of use.

use crate::error::{Error, ErrorCode, Result};
use crate::key::Key;
use crate::schema::{validate_subject, SchemaRef};
use crate::store::{downcast, AnyValue, ContextSeed, DataStore};
use std::sync::Arc;

/// One attached attribute: a key paired with its erased, validated value.
#[derive(Clone)]
pub struct MetaEntry {
    key: Key,
    value: AnyValue,
}

impl MetaEntry {
    /// The key this entry was stored under.
    pub fn key(&self) -> &Key {
        &self.key
    }

    pub(crate) fn value(&self) -> AnyValue {
        self.value.clone()
    }
}

/// Anything metas can be read from: descriptor meta lists, data stores,
/// flow contexts.
pub trait MetaSource {
    /// All raw values stored under `key`, in attachment order.
    fn meta_values(&self, key: &Key) -> Vec<AnyValue>;
}

impl MetaSource for [MetaEntry] {
    fn meta_values(&self, key: &Key) -> Vec<AnyValue> {
        self.iter()
            .filter(|entry| entry.key() == key)
            .map(MetaEntry::value)
            .collect()
    }
}

impl MetaSource for Vec<MetaEntry> {
    fn meta_values(&self, key: &Key) -> Vec<AnyValue> {
        self.as_slice().meta_values(key)
    }
}

impl MetaSource for crate::store::DataMap {
    fn meta_values(&self, key: &Key) -> Vec<AnyValue> {
        self.get_raw(key).into_iter().collect()
    }
}

impl MetaSource for dyn DataStore {
    fn meta_values(&self, key: &Key) -> Vec<AnyValue> {
        self.get_raw(key).into_iter().collect()
    }
}

/// A schema-validated attribute builder.
pub struct Meta<T> {
    key: Key,
    schema: SchemaRef<T>,
    default: Option<Arc<T>>,
}

impl<T> Clone for Meta<T> {
    fn clone(&self) -> Self {
        Self {
            key: self.key.clone(),
            schema: self.schema.clone(),
            default: self.default.clone(),
        }
    }
}

/// Meta under the interned key `name` (library code should namespace names,
/// e.g. `"org/feature.name"`).
pub fn meta<T>(name: impl AsRef<str>, schema: SchemaRef<T>) -> Meta<T> {
    Meta {
        key: Key::named(name),
        schema,
        default: None,
    }
}

impl<T> Meta<T> {
    /// Meta under a fresh, never-colliding key.
    pub fn unique(label: impl AsRef<str>, schema: SchemaRef<T>) -> Self {
        Self {
            key: Key::unique(label),
            schema,
            default: None,
        }
    }

    /// Default returned by `find`/`get` when the attribute is absent.
    #[must_use]
    pub fn with_default(mut self, default: T) -> Self {
        self.default = Some(Arc::new(default));
        self
    }

    /// The key this meta addresses.
    pub fn key(&self) -> &Key {
        &self.key
    }
}

impl<T: Clone + Send + Sync + 'static> Meta<T> {
    /// Validate `value` and build an attachable entry.
    pub fn of(&self, value: T) -> Result<MetaEntry> {
        let validated = validate_subject(&self.schema, Some(self.key.label_arc()), value)?;
        Ok(MetaEntry {
            key: self.key.clone(),
            value: Arc::new(validated),
        })
    }

    fn validate_stored(&self, raw: AnyValue) -> Result<Arc<T>> {
        let stored = downcast::<T>(raw, self.key.label())?;
        let validated =
            validate_subject(&self.schema, Some(self.key.label_arc()), (*stored).clone())?;
        Ok(Arc::new(validated))
    }

    /// First attribute under this key, or the default; `Ok(None)` only when
    /// neither exists.
    pub fn find(&self, source: &(impl MetaSource + ?Sized)) -> Result<Option<Arc<T>>> {
        match source.meta_values(&self.key).into_iter().next() {
            Some(raw) => self.validate_stored(raw).map(Some),
            None => Ok(self.default.clone()),
        }
    }

    /// First attribute under this key, erroring when absent and no default
    /// is set.
    pub fn get(&self, source: &(impl MetaSource + ?Sized)) -> Result<Arc<T>> {
        self.find(source)?.ok_or_else(|| {
            Error::system(
                ErrorCode::MissingAttribute,
                format!("no meta attached for `{}`", self.key.label()),
            )
        })
    }

    /// Every attribute under this key, in attachment order.
    pub fn some(&self, source: &(impl MetaSource + ?Sized)) -> Result<Vec<Arc<T>>> {
        source
            .meta_values(&self.key)
            .into_iter()
            .map(|raw| self.validate_stored(raw))
            .collect()
    }

    /// Validate and produce an initialization pair for seeding a store.
    pub fn preset(&self, value: T) -> Result<ContextSeed> {
        let validated = validate_subject(&self.schema, Some(self.key.label_arc()), value)?;
        Ok(ContextSeed::new(self.key.clone(), Arc::new(validated)))
    }
}
