// Copyright 2026 Dropbox (created by Andrew Yates <ayates@dropbox.com>)

//! Symbol-like keys for metas and context data
//!
//! A [`Key`] identifies an attribute the way a JS symbol does: named keys are
//! interned globally (the same string always yields the same key, so
//! independent modules can agree on `"org/request.id"`), while unique keys
//! never collide with anything.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, LazyLock};

static NEXT_KEY_ID: AtomicU64 = AtomicU64::new(1);

static NAMED_KEYS: LazyLock<Mutex<HashMap<String, u64>>> =
    LazyLock::new(|| Mutex::new(HashMap::new()));

/// Identity of a meta attribute or context entry.
///
/// Equality and hashing use the interned id only; the label is carried for
/// diagnostics.
#[derive(Clone)]
pub struct Key {
    id: u64,
    label: Arc<str>,
}

impl Key {
    /// The interned key for `name`: the same string always yields the same
    /// key, across modules.
    pub fn named(name: impl AsRef<str>) -> Self {
        let name = name.as_ref();
        let mut registry = NAMED_KEYS.lock();
        let id = *registry
            .entry(name.to_string())
            .or_insert_with(|| NEXT_KEY_ID.fetch_add(1, Ordering::Relaxed));
        Self {
            id,
            label: Arc::from(name),
        }
    }

    /// A fresh key that never compares equal to any other, labelled for
    /// diagnostics.
    pub fn unique(label: impl AsRef<str>) -> Self {
        Self {
            id: NEXT_KEY_ID.fetch_add(1, Ordering::Relaxed),
            label: Arc::from(label.as_ref()),
        }
    }

    /// Diagnostic label.
    pub fn label(&self) -> &str {
        &self.label
    }

    pub(crate) fn label_arc(&self) -> Arc<str> {
        self.label.clone()
    }
}

impl PartialEq for Key {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Key {}

impl Hash for Key {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Debug for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Key({}#{})", self.label, self.id)
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.label)
    }
}
