// Copyright 2026 Dropbox (created by Andrew Yates <ayates@dropbox.com>)

//! Executor descriptors
//!
//! An [`Executor`] is an immutable producer node: an async factory, a
//! dependency spec, and attached metas. Descriptors are identity-compared
//! keys; the values they produce live in scope caches, never in the
//! descriptor itself.
//!
//! The variant wrappers [`Lazy`], [`Reactive`], and [`Static`] are O(1)
//! views over a descriptor that change how a *dependent* realizes it:
//! handle-only, subscribe-and-realize, or resolve-then-handle. All variants
//! share the underlying descriptor's cache identity.

use crate::deps::{Dependencies, DepRef, Realized};
use crate::error::{Error, Result};
use crate::key::Key;
use crate::meta::{MetaEntry, MetaSource};
use crate::scope::Scope;
use crate::store::AnyValue;
use futures::future::BoxFuture;
use std::fmt;
use std::future::Future;
use std::marker::PhantomData;
use std::ops::Deref;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

static NEXT_EXECUTOR_ID: AtomicU64 = AtomicU64::new(1);

pub(crate) type ErasedFactory =
    Arc<dyn Fn(Vec<Realized>, Controller) -> BoxFuture<'static, Result<AnyValue>> + Send + Sync>;

/// Erased descriptor body shared by all typed handles and variants.
#[derive(Clone)]
pub(crate) struct ExecutorCore {
    pub(crate) id: u64,
    pub(crate) name: Option<Arc<str>>,
    pub(crate) refs: Vec<DepRef>,
    pub(crate) factory: ErasedFactory,
    pub(crate) metas: Vec<MetaEntry>,
}

impl ExecutorCore {
    pub(crate) fn debug_name(&self) -> Arc<str> {
        match &self.name {
            Some(name) => name.clone(),
            None => Arc::from(format!("executor#{}", self.id)),
        }
    }
}

impl fmt::Debug for ExecutorCore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutorCore")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("deps", &self.refs.len())
            .finish()
    }
}

/// An immutable producer: factory + dependency spec + metas.
///
/// `Executor<T>` is a cheap handle; clones share identity. Two descriptors
/// are the same cache key iff [`Executor::same_executor`] holds.
pub struct Executor<T> {
    core: Arc<ExecutorCore>,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Clone for Executor<T> {
    fn clone(&self) -> Self {
        Self {
            core: self.core.clone(),
            _marker: PhantomData,
        }
    }
}

impl<T> fmt::Debug for Executor<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Executor({})", self.core.debug_name())
    }
}

impl<T> Executor<T> {
    pub(crate) fn from_core(core: Arc<ExecutorCore>) -> Self {
        Self {
            core,
            _marker: PhantomData,
        }
    }

    pub(crate) fn core(&self) -> &Arc<ExecutorCore> {
        &self.core
    }

    /// Debug name, when one was attached with [`Executor::with_name`].
    pub fn name(&self) -> Option<&str> {
        self.core.name.as_deref()
    }

    /// Identity comparison: do both handles address the same cache cell?
    pub fn same_executor(&self, other: &Self) -> bool {
        self.core.id == other.core.id
    }

    /// Attach a debug name. Identity is preserved.
    #[must_use]
    pub fn with_name(self, name: impl AsRef<str>) -> Self {
        let mut core = (*self.core).clone();
        core.name = Some(Arc::from(name.as_ref()));
        Self::from_core(Arc::new(core))
    }

    /// Attach a meta entry. Identity is preserved.
    #[must_use]
    pub fn with_meta(self, entry: MetaEntry) -> Self {
        let mut core = (*self.core).clone();
        core.metas.push(entry);
        Self::from_core(Arc::new(core))
    }

    /// Metas attached to this descriptor, in attachment order.
    pub fn metas(&self) -> &[MetaEntry] {
        &self.core.metas
    }

    /// Handle-only view: the dependent receives the accessor without
    /// triggering resolution.
    pub fn lazy(&self) -> Lazy<T> {
        Lazy {
            executor: self.clone(),
        }
    }

    /// Subscribed view: the dependent receives the resolved value and is
    /// re-run whenever this descriptor updates.
    pub fn reactive(&self) -> Reactive<T> {
        Reactive {
            executor: self.clone(),
        }
    }

    /// Resolved-handle view: this descriptor is resolved, but the dependent
    /// receives the accessor rather than the value.
    pub fn static_(&self) -> Static<T> {
        Static {
            executor: self.clone(),
        }
    }
}

impl<T> MetaSource for Executor<T> {
    fn meta_values(&self, key: &Key) -> Vec<AnyValue> {
        self.core.metas.meta_values(key)
    }
}

macro_rules! variant_wrapper {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        pub struct $name<T> {
            pub(crate) executor: Executor<T>,
        }

        impl<T> Clone for $name<T> {
            fn clone(&self) -> Self {
                Self {
                    executor: self.executor.clone(),
                }
            }
        }

        impl<T> Deref for $name<T> {
            type Target = Executor<T>;

            fn deref(&self) -> &Executor<T> {
                &self.executor
            }
        }

        impl<T> $name<T> {
            /// The underlying descriptor.
            pub fn executor(&self) -> &Executor<T> {
                &self.executor
            }
        }

        impl<T> fmt::Debug for $name<T> {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self.executor.core.debug_name())
            }
        }
    };
}

variant_wrapper!(
    /// Handle-only dependency view over an [`Executor`].
    Lazy
);
variant_wrapper!(
    /// Subscribe-and-realize dependency view over an [`Executor`].
    Reactive
);
variant_wrapper!(
    /// Resolve-then-handle dependency view over an [`Executor`].
    Static
);

/// Capability bundle handed to a factory for the duration of one resolution.
///
/// Cleanups registered here are drained in reverse order before the factory
/// re-runs and when the descriptor is released.
#[derive(Clone)]
pub struct Controller {
    scope: Scope,
    core: Arc<ExecutorCore>,
}

impl Controller {
    pub(crate) fn new(scope: Scope, core: Arc<ExecutorCore>) -> Self {
        Self { scope, core }
    }

    /// Register a cleanup for this descriptor, run LIFO on release, update,
    /// forced re-resolve, and scope dispose.
    pub fn cleanup(&self, f: impl FnOnce() + Send + 'static) {
        self.scope.inner().add_cleanup(self.core.id, Box::new(f));
    }

    /// Release this descriptor's cache entry.
    pub async fn release(&self) -> Result<()> {
        self.scope.inner().release_core(&self.core, false).await
    }

    /// Force a re-resolve of this descriptor.
    pub async fn reload(&self) -> Result<()> {
        self.scope
            .inner()
            .resolve_core(self.core.clone(), true)
            .await
            .map(|_| ())
    }

    /// The owning scope.
    pub fn scope(&self) -> &Scope {
        &self.scope
    }
}

/// Descriptor with no dependencies.
pub fn provide<T, F, Fut>(factory: F) -> Executor<T>
where
    T: Send + Sync + 'static,
    F: Fn(Controller) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T>> + Send + 'static,
{
    derive((), move |_: (), ctl| factory(ctl))
}

/// Descriptor computed from the realized dependency spec `deps`.
///
/// The spec's shape is preserved: a tuple of references realizes to a tuple
/// of views, a record to a record. Plain references realize to `Arc<T>`,
/// lazy/static to [`crate::accessor::Accessor`], reactive to `Arc<T>` plus a
/// subscription edge.
pub fn derive<D, T, F, Fut>(deps: D, factory: F) -> Executor<T>
where
    D: Dependencies,
    T: Send + Sync + 'static,
    F: Fn(D::Output, Controller) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T>> + Send + 'static,
{
    let refs = deps.dep_refs();
    let erased: ErasedFactory = Arc::new(
        move |realized: Vec<Realized>, ctl: Controller| -> BoxFuture<'static, Result<AnyValue>> {
            match deps.realize(&realized) {
                Ok(typed) => {
                    let fut = factory(typed, ctl);
                    Box::pin(async move {
                        fut.await
                            .map(|value| Arc::new(value) as AnyValue)
                            .map_err(|err| match err {
                                // dependency faults (cycles, reactive-in-pod)
                                // keep their taxonomy through factory bodies
                                passthrough @ (Error::Factory { .. }
                                | Error::Dependency { .. }) => passthrough,
                                other => Error::factory(None, Box::new(other)),
                            })
                    })
                }
                Err(err) => Box::pin(std::future::ready(Err(err))),
            }
        },
    );
    Executor::from_core(Arc::new(ExecutorCore {
        id: NEXT_EXECUTOR_ID.fetch_add(1, Ordering::Relaxed),
        name: None,
        refs,
        factory: erased,
        metas: Vec::new(),
    }))
}
