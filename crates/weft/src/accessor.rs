// Copyright 2026 Dropbox (created by Andrew Yates <ayates@dropbox.com>)

//! Stable per-(scope, descriptor) handles
//!
//! An [`Accessor`] is the stable handle for one descriptor inside one scope:
//! the same pair always yields the same underlying handle for the lifetime of
//! the scope entry, even across forced re-resolves. Accessors are what lazy
//! and static dependencies realize to, and what update subscribers receive.

use crate::error::{Error, ErrorCode, Result};
use crate::executor::ExecutorCore;
use crate::scope::{CellPeek, ScopeInner, Subscription, UpdateValue};
use crate::store::{downcast, AnyValue};
use std::fmt;
use std::marker::PhantomData;
use std::sync::{Arc, Weak};

pub(crate) struct AccessorShared {
    pub(crate) scope: Weak<ScopeInner>,
    pub(crate) core: Arc<ExecutorCore>,
}

/// Erased stable handle; the typed [`Accessor`] is a view over this.
#[derive(Clone)]
pub struct AnyAccessor {
    pub(crate) shared: Arc<AccessorShared>,
}

impl AnyAccessor {
    pub(crate) fn new(scope: Weak<ScopeInner>, core: Arc<ExecutorCore>) -> Self {
        Self {
            shared: Arc::new(AccessorShared { scope, core }),
        }
    }

    /// Debug name of the descriptor this handle addresses.
    pub fn executor_name(&self) -> Arc<str> {
        self.shared.core.debug_name()
    }

    /// Referential identity: do both handles share the same scope entry?
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }

    pub(crate) fn core(&self) -> &Arc<ExecutorCore> {
        &self.shared.core
    }

    pub(crate) fn scope(&self) -> Result<Arc<ScopeInner>> {
        self.shared.scope.upgrade().ok_or_else(Error::disposed)
    }
}

impl fmt::Debug for AnyAccessor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AnyAccessor({})", self.executor_name())
    }
}

/// Current cache-cell state as seen through an accessor, without resolving.
pub enum Lookup<T> {
    /// No resolution has been started.
    Vacant,
    /// A resolution is in flight.
    Pending,
    /// The cell holds a value.
    Resolved(Arc<T>),
    /// The cell holds a sticky rejection.
    Rejected(Error),
}

/// Typed stable handle for one descriptor inside one scope.
pub struct Accessor<T> {
    raw: AnyAccessor,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Clone for Accessor<T> {
    fn clone(&self) -> Self {
        Self {
            raw: self.raw.clone(),
            _marker: PhantomData,
        }
    }
}

impl<T> fmt::Debug for Accessor<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Accessor({})", self.raw.executor_name())
    }
}

impl<T> Accessor<T> {
    pub(crate) fn from_any(raw: AnyAccessor) -> Self {
        Self {
            raw,
            _marker: PhantomData,
        }
    }

    /// The erased handle.
    pub fn any(&self) -> &AnyAccessor {
        &self.raw
    }

    /// Referential identity: do both handles share the same scope entry?
    pub fn ptr_eq(&self, other: &Self) -> bool {
        self.raw.ptr_eq(&other.raw)
    }
}

impl<T: Send + Sync + 'static> Accessor<T> {
    fn name(&self) -> Arc<str> {
        self.raw.executor_name()
    }

    /// The resolved value; errors when the cell is not in the resolved state.
    pub fn get(&self) -> Result<Arc<T>> {
        let scope = self.raw.scope()?;
        match scope.peek_cell(self.raw.core().id) {
            Some(CellPeek::Resolved(value)) => downcast(value, &self.name()),
            Some(CellPeek::Rejected(err)) => Err(err),
            _ => Err(Error::dependency(
                ErrorCode::MissingDependency,
                Some(self.name()),
                "not resolved yet",
            )),
        }
    }

    /// Inspect the cell without resolving.
    pub fn lookup(&self) -> Lookup<T> {
        let Ok(scope) = self.raw.scope() else {
            return Lookup::Vacant;
        };
        match scope.peek_cell(self.raw.core().id) {
            None => Lookup::Vacant,
            Some(CellPeek::Pending) => Lookup::Pending,
            Some(CellPeek::Rejected(err)) => Lookup::Rejected(err),
            Some(CellPeek::Resolved(value)) => match downcast(value, &self.name()) {
                Ok(typed) => Lookup::Resolved(typed),
                Err(err) => Lookup::Rejected(err),
            },
        }
    }

    /// Resolve through the owning scope and return the value.
    pub async fn resolve(&self) -> Result<Arc<T>> {
        let scope = self.raw.scope()?;
        let value = scope.resolve_core(self.raw.core().clone(), false).await?;
        downcast(value, &self.name())
    }

    /// Write a resolved value and propagate to reactive dependents.
    pub async fn update(&self, value: T) -> Result<()> {
        let scope = self.raw.scope()?;
        scope
            .update_core(self.raw.core().clone(), UpdateValue::Value(Arc::new(value)))
            .await
    }

    /// Compute the next value from the current one, then propagate.
    pub async fn update_with(
        &self,
        f: impl FnOnce(&T) -> T + Send + 'static,
    ) -> Result<()> {
        let scope = self.raw.scope()?;
        let name = self.name();
        scope
            .update_core(
                self.raw.core().clone(),
                UpdateValue::Map(Box::new(move |current: &AnyValue| {
                    let typed = downcast::<T>(current.clone(), &name)?;
                    Ok(Arc::new(f(&typed)) as AnyValue)
                })),
            )
            .await
    }

    /// Alias of [`Accessor::update`], mirroring the scope-level `set`.
    pub async fn set(&self, value: T) -> Result<()> {
        self.update(value).await
    }

    /// Register an update callback for this descriptor; the callback receives
    /// this accessor after each update. Fails inside pods.
    pub fn subscribe(
        &self,
        callback: impl Fn(Accessor<T>) + Send + Sync + 'static,
    ) -> Result<Subscription> {
        let scope = self.raw.scope()?;
        scope.on_update_any(
            self.raw.core(),
            Arc::new(move |any: AnyAccessor| callback(Accessor::from_any(any))),
        )
    }

    /// Release this descriptor's cache entry (non-soft).
    pub async fn release(&self) -> Result<()> {
        let scope = self.raw.scope()?;
        scope.release_core(self.raw.core(), false).await
    }
}
