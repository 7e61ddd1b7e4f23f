// Copyright 2026 Dropbox (created by Andrew Yates <ayates@dropbox.com>)

//! Keyed executor families
//!
//! A [`MultiExecutor`] produces per-key descriptors from a single factory
//! template: each canonical key yields one distinct main descriptor with its
//! own cache cell, memoized so repeated lookups of the same key share an
//! instance. Keys are schema-validated and optionally canonicalized, so
//! distinct logical keys that normalize to the same canonical key share an
//! instance.

use crate::error::Result;
use crate::executor::Executor;
use crate::schema::{validate_subject, SchemaRef};
use dashmap::DashMap;
use std::hash::Hash;
use std::sync::Arc;

type Canonicalize<K> = Arc<dyn Fn(K) -> K + Send + Sync>;
type Template<K, T> = Arc<dyn Fn(&K) -> Executor<T> + Send + Sync>;

/// A keyed family of executors sharing one factory template.
pub struct MultiExecutor<K, T> {
    name: Arc<str>,
    key_schema: SchemaRef<K>,
    canonicalize: Option<Canonicalize<K>>,
    template: Template<K, T>,
    table: Arc<DashMap<K, Executor<T>>>,
}

impl<K, T> Clone for MultiExecutor<K, T> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            key_schema: self.key_schema.clone(),
            canonicalize: self.canonicalize.clone(),
            template: self.template.clone(),
            table: self.table.clone(),
        }
    }
}

/// Family with the given name, key schema, and per-key descriptor template.
pub fn multi<K, T, F>(
    name: impl AsRef<str>,
    key_schema: SchemaRef<K>,
    template: F,
) -> MultiExecutor<K, T>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    T: Send + Sync + 'static,
    F: Fn(&K) -> Executor<T> + Send + Sync + 'static,
{
    MultiExecutor {
        name: Arc::from(name.as_ref()),
        key_schema,
        canonicalize: None,
        template: Arc::new(template),
        table: Arc::new(DashMap::new()),
    }
}

impl<K, T> MultiExecutor<K, T>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    T: Send + Sync + 'static,
{
    /// Normalize keys before the table lookup; logical keys with the same
    /// canonical form share one descriptor.
    #[must_use]
    pub fn with_canonicalize(
        mut self,
        canonicalize: impl Fn(K) -> K + Send + Sync + 'static,
    ) -> Self {
        self.canonicalize = Some(Arc::new(canonicalize));
        self
    }

    /// Family name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The descriptor for `key`: validated, canonicalized, and memoized.
    pub fn get(&self, key: K) -> Result<Executor<T>> {
        let validated = validate_subject(&self.key_schema, Some(self.name.clone()), key)?;
        let canonical = match &self.canonicalize {
            Some(canonicalize) => (**canonicalize)(validated),
            None => validated,
        };
        let entry = self
            .table
            .entry(canonical.clone())
            .or_insert_with(|| (*self.template)(&canonical));
        Ok(entry.clone())
    }

    /// Number of distinct canonical keys instantiated so far.
    pub fn len(&self) -> usize {
        self.table.len()
    }

    /// True when no key has been instantiated yet.
    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }
}
