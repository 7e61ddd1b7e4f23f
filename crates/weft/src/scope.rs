// Copyright 2026 Dropbox (created by Andrew Yates <ayates@dropbox.com>)

//! Scope resolver and cache
//!
//! A [`Scope`] is an isolated resolution context: it owns the cache of
//! resolved values, the cleanup stacks, the reactive subscriber graph, the
//! event listeners, and the extension chain. Resolution is lazy and
//! memoized; for any descriptor the factory runs at most once per cache
//! generation, and concurrent resolvers share one pending future.
//!
//! Update propagation is breadth-respecting and insertion-ordered: when a
//! descriptor updates, its reactive dependents re-run layer by layer, each at
//! most once per update, with cleanups drained before every re-run.
//!
//! Cycles are detected by carrying the in-progress descriptor chain in a
//! task-local; revisiting a descriptor already on the chain rejects with a
//! structured dependency error naming the full chain.

use crate::accessor::{Accessor, AnyAccessor};
use crate::deps::{DepRef, Realized, RefKind};
use crate::error::{Error, ErrorCode, Result};
use crate::executor::{Controller, ErasedFactory, Executor, ExecutorCore};
use crate::extension::{compose_chain, Extension, Operation, ResolveKind};
use crate::pod::Pod;
use crate::store::{downcast, AnyValue, ContextSeed, DataMap};
use futures::future::{BoxFuture, FutureExt, Shared};
use indexmap::IndexMap;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tracing::{debug, trace, warn};

type SharedResolve = Shared<BoxFuture<'static, Result<AnyValue>>>;

pub(crate) type CleanupFn = Box<dyn FnOnce() + Send>;
pub(crate) type UpdateCallback = Arc<dyn Fn(AnyAccessor) + Send + Sync>;
type ChangeCallback = Arc<dyn Fn(&ChangeEvent) -> Option<AnyValue> + Send + Sync>;
type ReleaseCallback = Arc<dyn Fn(AnyAccessor) + Send + Sync>;
type ErrorCallback = Arc<dyn Fn(&Error) + Send + Sync>;

#[derive(Clone)]
struct ChainEntry {
    id: u64,
    name: Arc<str>,
}

tokio::task_local! {
    static RESOLVE_CHAIN: Vec<ChainEntry>;
}

fn current_chain() -> Vec<ChainEntry> {
    RESOLVE_CHAIN
        .try_with(|chain| chain.clone())
        .unwrap_or_default()
}

/// Which event produced a [`ChangeEvent`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    /// A factory produced a fresh value.
    Resolve,
    /// An update wrote a new value.
    Update,
}

/// Payload handed to change listeners; a listener may return a replacement
/// value that is stored instead of the produced one.
pub struct ChangeEvent {
    /// Resolve or update.
    pub kind: ChangeKind,
    /// Stable handle of the descriptor that changed.
    pub accessor: AnyAccessor,
    /// The candidate value.
    pub value: AnyValue,
}

pub(crate) enum UpdateValue {
    Value(AnyValue),
    Map(Box<dyn FnOnce(&AnyValue) -> Result<AnyValue> + Send>),
}

pub(crate) enum CellPeek {
    Pending,
    Resolved(AnyValue),
    Rejected(Error),
}

enum CellState {
    Pending(SharedResolve),
    Resolved(AnyValue),
    Rejected(Error),
}

struct Entry {
    core: Arc<ExecutorCore>,
    state: CellState,
    generation: u64,
}

#[derive(Default)]
struct SubscriberSet {
    /// Reactive dependents, in edge-insertion order.
    dependents: IndexMap<u64, Arc<ExecutorCore>>,
    /// Plain update callbacks, in registration order.
    callbacks: Vec<(u64, UpdateCallback)>,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum LifeState {
    Active,
    Disposing,
    Disposed,
}

enum ScopeKind {
    Root,
    Pod { parent: Arc<ScopeInner> },
}

pub(crate) enum PresetAction {
    Value(AnyValue),
    Swap(Arc<ExecutorCore>),
}

impl Clone for PresetAction {
    fn clone(&self) -> Self {
        match self {
            Self::Value(value) => Self::Value(value.clone()),
            Self::Swap(core) => Self::Swap(core.clone()),
        }
    }
}

/// A binding that replaces a descriptor's factory within one scope: either a
/// concrete value (the factory never runs) or another descriptor whose
/// factory and dependencies substitute for the original.
pub struct Preset {
    pub(crate) target: Arc<ExecutorCore>,
    pub(crate) action: PresetAction,
}

impl Preset {
    /// Replace `target` with a concrete value; its factory never runs.
    pub fn value<T: Send + Sync + 'static>(target: &Executor<T>, value: T) -> Self {
        Self {
            target: target.core().clone(),
            action: PresetAction::Value(Arc::new(value)),
        }
    }

    /// Replace `target`'s factory and dependencies with `replacement`'s.
    pub fn swap<T: Send + Sync + 'static>(target: &Executor<T>, replacement: &Executor<T>) -> Self {
        Self {
            target: target.core().clone(),
            action: PresetAction::Swap(replacement.core().clone()),
        }
    }
}

/// Shorthand for [`Preset::value`].
pub fn preset<T: Send + Sync + 'static>(target: &Executor<T>, value: T) -> Preset {
    Preset::value(target, value)
}

#[derive(Debug)]
enum SubscriptionSlot {
    Update { target: u64, id: u64 },
    Change { id: u64 },
    Release { target: u64, id: u64 },
    ErrorCb { id: u64 },
    Extension { id: u64 },
}

/// Handle returned by listener and extension registrations; cancelling
/// unregisters.
#[derive(Debug)]
pub struct Subscription {
    scope: Weak<ScopeInner>,
    slot: SubscriptionSlot,
}

impl Subscription {
    /// Unregister the listener or extension this subscription refers to.
    pub fn cancel(self) {
        let Some(scope) = self.scope.upgrade() else {
            return;
        };
        match self.slot {
            SubscriptionSlot::Update { target, id } => {
                if let Some(set) = scope.subscribers.lock().get_mut(&target) {
                    set.callbacks.retain(|(cb_id, _)| *cb_id != id);
                }
            }
            SubscriptionSlot::Change { id } => {
                scope
                    .change_listeners
                    .lock()
                    .retain(|(cb_id, _)| *cb_id != id);
            }
            SubscriptionSlot::Release { target, id } => {
                if let Some(list) = scope.release_listeners.lock().get_mut(&target) {
                    list.retain(|(cb_id, _)| *cb_id != id);
                }
            }
            SubscriptionSlot::ErrorCb { id } => {
                scope
                    .error_listeners
                    .lock()
                    .retain(|(cb_id, _)| *cb_id != id);
            }
            SubscriptionSlot::Extension { id } => {
                scope.extensions.lock().retain(|(ext_id, _)| *ext_id != id);
            }
        }
    }
}

pub(crate) struct ScopeInner {
    weak_self: Weak<ScopeInner>,
    name: Option<Arc<str>>,
    kind: ScopeKind,
    presets: HashMap<u64, PresetAction>,
    entries: Mutex<HashMap<u64, Entry>>,
    accessors: Mutex<HashMap<u64, AnyAccessor>>,
    cleanups: Mutex<HashMap<u64, Vec<CleanupFn>>>,
    subscribers: Mutex<HashMap<u64, SubscriberSet>>,
    change_listeners: Mutex<Vec<(u64, ChangeCallback)>>,
    release_listeners: Mutex<HashMap<u64, Vec<(u64, ReleaseCallback)>>>,
    error_listeners: Mutex<Vec<(u64, ErrorCallback)>>,
    extensions: Mutex<Vec<(u64, Arc<dyn Extension>)>>,
    pods: Mutex<Vec<Weak<ScopeInner>>>,
    seed: DataMap,
    life: Mutex<LifeState>,
    ids: AtomicU64,
    generations: AtomicU64,
}

impl ScopeInner {
    fn build(
        name: Option<Arc<str>>,
        kind: ScopeKind,
        presets: HashMap<u64, PresetAction>,
        extensions: Vec<(u64, Arc<dyn Extension>)>,
        seed: DataMap,
    ) -> Arc<Self> {
        Arc::new_cyclic(|weak_self| Self {
            weak_self: weak_self.clone(),
            name,
            kind,
            presets,
            entries: Mutex::new(HashMap::new()),
            accessors: Mutex::new(HashMap::new()),
            cleanups: Mutex::new(HashMap::new()),
            subscribers: Mutex::new(HashMap::new()),
            change_listeners: Mutex::new(Vec::new()),
            release_listeners: Mutex::new(HashMap::new()),
            error_listeners: Mutex::new(Vec::new()),
            extensions: Mutex::new(extensions),
            pods: Mutex::new(Vec::new()),
            seed,
            life: Mutex::new(LifeState::Active),
            ids: AtomicU64::new(1),
            generations: AtomicU64::new(1),
        })
    }

    /// The owning `Arc`; always succeeds while any strong handle is alive.
    fn strong(&self) -> Result<Arc<ScopeInner>> {
        self.weak_self.upgrade().ok_or_else(Error::disposed)
    }

    pub(crate) fn is_pod(&self) -> bool {
        matches!(self.kind, ScopeKind::Pod { .. })
    }

    pub(crate) fn scope_name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub(crate) fn seed_data(&self) -> &DataMap {
        &self.seed
    }

    fn check_active(&self) -> Result<()> {
        match *self.life.lock() {
            LifeState::Active => Ok(()),
            _ => Err(Error::disposed()),
        }
    }

    pub(crate) fn is_disposed(&self) -> bool {
        *self.life.lock() == LifeState::Disposed
    }

    fn next_id(&self) -> u64 {
        self.ids.fetch_add(1, Ordering::Relaxed)
    }

    fn next_generation(&self) -> u64 {
        self.generations.fetch_add(1, Ordering::Relaxed)
    }

    pub(crate) fn extensions_snapshot(&self) -> Vec<Arc<dyn Extension>> {
        self.extensions
            .lock()
            .iter()
            .map(|(_, ext)| ext.clone())
            .collect()
    }

    /// The stable accessor for `core`, created on first reference and reused
    /// for the lifetime of the scope.
    pub(crate) fn accessor_any(&self, core: &Arc<ExecutorCore>) -> AnyAccessor {
        let mut accessors = self.accessors.lock();
        accessors
            .entry(core.id)
            .or_insert_with(|| AnyAccessor::new(self.weak_self.clone(), core.clone()))
            .clone()
    }

    pub(crate) fn peek_cell(&self, id: u64) -> Option<CellPeek> {
        self.entries
            .lock()
            .get(&id)
            .map(|entry| match &entry.state {
                CellState::Pending(_) => CellPeek::Pending,
                CellState::Resolved(value) => CellPeek::Resolved(value.clone()),
                CellState::Rejected(err) => CellPeek::Rejected(err.clone()),
            })
    }

    fn pending_shared(&self, id: u64) -> Option<SharedResolve> {
        self.entries
            .lock()
            .get(&id)
            .and_then(|entry| match &entry.state {
                CellState::Pending(shared) => Some(shared.clone()),
                _ => None,
            })
    }

    pub(crate) fn add_cleanup(&self, id: u64, cleanup: CleanupFn) {
        if self.check_active().is_err() {
            debug!(target: "weft::scope", "cleanup registered after dispose; running immediately");
            cleanup();
            return;
        }
        self.cleanups.lock().entry(id).or_default().push(cleanup);
    }

    fn drain_cleanups(&self, id: u64) {
        let drained = self.cleanups.lock().remove(&id);
        if let Some(mut stack) = drained {
            trace!(target: "weft::scope", count = stack.len(), "draining cleanups");
            while let Some(cleanup) = stack.pop() {
                cleanup();
            }
        }
    }

    fn add_reactive_edge(&self, source: &Arc<ExecutorCore>, dependent: &Arc<ExecutorCore>) {
        self.subscribers
            .lock()
            .entry(source.id)
            .or_default()
            .dependents
            .insert(dependent.id, dependent.clone());
    }

    // ------------------------------------------------------------------
    // Resolution
    // ------------------------------------------------------------------

    pub(crate) fn resolve_core(
        &self,
        core: Arc<ExecutorCore>,
        force: bool,
    ) -> BoxFuture<'static, Result<AnyValue>> {
        let this = match self.strong() {
            Ok(this) => this,
            Err(err) => return Box::pin(std::future::ready(Err(err))),
        };
        Box::pin(async move {
            this.check_active()?;

            let chain = current_chain();
            if chain.iter().any(|entry| entry.id == core.id) {
                let mut names: Vec<Arc<str>> = chain.iter().map(|e| e.name.clone()).collect();
                names.push(core.debug_name());
                return Err(Error::dependency(
                    ErrorCode::DependencyCycle,
                    Some(core.debug_name()),
                    "descriptor reached again while its own resolution is in progress",
                )
                .with_chain(names));
            }

            let shared = this.obtain_shared(&core, force, chain)?;
            shared.await
        })
    }

    /// Locate or install the shared future for one resolution, importing the
    /// parent cell first inside pods. Returns early with the cached outcome
    /// when no new resolution is needed.
    fn obtain_shared(
        &self,
        core: &Arc<ExecutorCore>,
        force: bool,
        chain: Vec<ChainEntry>,
    ) -> Result<SharedResolve> {
        let this = self.strong()?;
        let mut entries = self.entries.lock();

        if let Some(entry) = entries.get(&core.id) {
            if !force {
                match &entry.state {
                    CellState::Resolved(value) => {
                        trace!(target: "weft::scope", executor = %core.debug_name(), "cache hit");
                        return Ok(resolved_shared(value.clone()));
                    }
                    CellState::Rejected(err) => return Err(err.clone()),
                    CellState::Pending(_) => {}
                }
            }
            if let CellState::Pending(shared) = &entry.state {
                // concurrent resolvers share the in-flight future, forced or not
                return Ok(shared.clone());
            }
        }

        // pod first touch: import the parent cell instead of running the factory
        if !force && !entries.contains_key(&core.id) {
            if let ScopeKind::Pod { parent } = &self.kind {
                match parent.peek_cell(core.id) {
                    Some(CellPeek::Resolved(value)) => {
                        debug!(target: "weft::scope", executor = %core.debug_name(), "pod imported resolved cell");
                        entries.insert(
                            core.id,
                            Entry {
                                core: core.clone(),
                                state: CellState::Resolved(value.clone()),
                                generation: self.next_generation(),
                            },
                        );
                        return Ok(resolved_shared(value));
                    }
                    Some(CellPeek::Rejected(err)) => {
                        entries.insert(
                            core.id,
                            Entry {
                                core: core.clone(),
                                state: CellState::Rejected(err.clone()),
                                generation: self.next_generation(),
                            },
                        );
                        return Err(err);
                    }
                    Some(CellPeek::Pending) => {
                        if let Some(parent_shared) = parent.pending_shared(core.id) {
                            let generation = self.next_generation();
                            let importer = this.clone();
                            let id = core.id;
                            let wrapper: BoxFuture<'static, Result<AnyValue>> =
                                Box::pin(async move {
                                    let result = parent_shared.await;
                                    importer.finalize_cell(id, generation, &result);
                                    result
                                });
                            let shared = wrapper.shared();
                            entries.insert(
                                core.id,
                                Entry {
                                    core: core.clone(),
                                    state: CellState::Pending(shared.clone()),
                                    generation,
                                },
                            );
                            return Ok(shared);
                        }
                    }
                    None => {}
                }
            }
        }

        // fresh (or forced) resolution
        let generation = self.next_generation();
        let driver = make_driver(this, core.clone(), generation, chain);
        let shared = driver.shared();
        entries.insert(
            core.id,
            Entry {
                core: core.clone(),
                state: CellState::Pending(shared.clone()),
                generation,
            },
        );
        Ok(shared)
    }

    async fn run_factory(self: Arc<Self>, core: Arc<ExecutorCore>) -> Result<AnyValue> {
        enum Effective {
            Constant(AnyValue),
            Run(ErasedFactory, Vec<DepRef>),
        }

        let effective = match self.presets.get(&core.id) {
            Some(PresetAction::Value(value)) => Effective::Constant(value.clone()),
            Some(PresetAction::Swap(replacement)) => {
                Effective::Run(replacement.factory.clone(), replacement.refs.clone())
            }
            None => Effective::Run(core.factory.clone(), core.refs.clone()),
        };

        let produced = match effective {
            Effective::Constant(value) => {
                trace!(target: "weft::scope", executor = %core.debug_name(), "preset value short-circuits factory");
                value
            }
            Effective::Run(factory, refs) => {
                let mut realized = Vec::with_capacity(refs.len());
                for dep in &refs {
                    realized.push(self.realize_dep(&core, dep).await?);
                }
                let controller = Controller::new(Scope::from_inner(self.clone()), core.clone());
                (*factory)(realized, controller).await?
            }
        };

        // change listeners may substitute the freshly produced value
        let accessor = self.accessor_any(&core);
        let listeners = self.change_listeners.lock().clone();
        let mut value = produced;
        for (_, listener) in listeners {
            let event = ChangeEvent {
                kind: ChangeKind::Resolve,
                accessor: accessor.clone(),
                value: value.clone(),
            };
            if let Some(replacement) = (*listener)(&event) {
                value = replacement;
            }
        }
        Ok(value)
    }

    async fn realize_dep(&self, dependent: &Arc<ExecutorCore>, dep: &DepRef) -> Result<Realized> {
        match dep.kind {
            RefKind::Lazy => Ok(Realized::Accessor(self.accessor_any(&dep.core))),
            RefKind::Main => {
                let value = self.resolve_core(dep.core.clone(), false).await?;
                Ok(Realized::Value(value))
            }
            RefKind::Static => {
                self.resolve_core(dep.core.clone(), false).await?;
                Ok(Realized::Accessor(self.accessor_any(&dep.core)))
            }
            RefKind::Reactive => {
                if self.is_pod() {
                    return Err(Error::dependency(
                        ErrorCode::ReactiveInPod,
                        Some(dependent.debug_name()),
                        format!(
                            "reactive dependency `{}` is not allowed inside a pod",
                            dep.core.debug_name()
                        ),
                    ));
                }
                self.add_reactive_edge(&dep.core, dependent);
                let value = self.resolve_core(dep.core.clone(), false).await?;
                Ok(Realized::Value(value))
            }
        }
    }

    fn finalize_cell(&self, id: u64, generation: u64, result: &Result<AnyValue>) {
        let mut entries = self.entries.lock();
        if let Some(entry) = entries.get_mut(&id) {
            if entry.generation == generation && matches!(entry.state, CellState::Pending(_)) {
                entry.state = match result {
                    Ok(value) => CellState::Resolved(value.clone()),
                    Err(err) => CellState::Rejected(err.clone()),
                };
            }
        }
    }

    async fn fire_error(self: Arc<Self>, err: &Error) {
        let listeners = self.error_listeners.lock().clone();
        for (_, listener) in listeners {
            (*listener)(err);
        }
        let extensions = self.extensions_snapshot();
        let scope = Scope::from_inner(self.clone());
        for ext in extensions {
            ext.on_error(err, &scope).await;
        }
    }

    // ------------------------------------------------------------------
    // Update propagation
    // ------------------------------------------------------------------

    pub(crate) async fn update_core(
        &self,
        core: Arc<ExecutorCore>,
        update: UpdateValue,
    ) -> Result<()> {
        self.check_active()?;
        let this = self.strong()?;

        let extensions = self.extensions_snapshot();
        let operation = Operation::Resolve {
            executor: core.debug_name(),
            kind: ResolveKind::Update,
        };
        let terminal: BoxFuture<'static, Result<AnyValue>> = Box::pin(async move {
            // the prior generation's cleanups drain before the new value is
            // computed; an implicit first resolve below registers its own
            // cleanups after this point and they stay intact
            this.drain_cleanups(core.id);

            let next_value = match update {
                UpdateValue::Value(value) => value,
                UpdateValue::Map(map) => {
                    let current = this.resolve_core(core.clone(), false).await?;
                    map(&current)?
                }
            };

            let accessor = this.accessor_any(&core);
            let listeners = this.change_listeners.lock().clone();
            let mut value = next_value;
            for (_, listener) in listeners {
                let event = ChangeEvent {
                    kind: ChangeKind::Update,
                    accessor: accessor.clone(),
                    value: value.clone(),
                };
                if let Some(replacement) = (*listener)(&event) {
                    value = replacement;
                }
            }

            {
                let mut entries = this.entries.lock();
                let generation = this.next_generation();
                match entries.get_mut(&core.id) {
                    Some(entry) => {
                        entry.state = CellState::Resolved(value.clone());
                        entry.generation = generation;
                    }
                    None => {
                        entries.insert(
                            core.id,
                            Entry {
                                core: core.clone(),
                                state: CellState::Resolved(value.clone()),
                                generation,
                            },
                        );
                    }
                }
            }

            this.propagate_update(core.id).await?;
            Ok(value)
        });

        compose_chain(&extensions, operation, terminal)
            .await
            .map(|_| ())
    }

    /// Breadth-respecting re-resolution of reactive dependents: each layer
    /// completes before the next, each dependent re-runs at most once.
    async fn propagate_update(&self, start: u64) -> Result<()> {
        let mut visited: HashSet<u64> = HashSet::new();
        let mut layer = vec![start];
        while !layer.is_empty() {
            let mut next_layer = Vec::new();
            for id in layer {
                let (dependents, callbacks) = {
                    let subscribers = self.subscribers.lock();
                    match subscribers.get(&id) {
                        Some(set) => (
                            set.dependents.values().cloned().collect::<Vec<_>>(),
                            set.callbacks
                                .iter()
                                .map(|(_, cb)| cb.clone())
                                .collect::<Vec<_>>(),
                        ),
                        None => (Vec::new(), Vec::new()),
                    }
                };

                for dependent in dependents {
                    if visited.insert(dependent.id) {
                        trace!(
                            target: "weft::scope",
                            dependent = %dependent.debug_name(),
                            "re-resolving reactive dependent"
                        );
                        self.resolve_core(dependent.clone(), true).await?;
                        next_layer.push(dependent.id);
                    }
                }

                let core = {
                    let entries = self.entries.lock();
                    entries.get(&id).map(|entry| entry.core.clone())
                };
                if let Some(core) = core {
                    let accessor = self.accessor_any(&core);
                    for callback in callbacks {
                        (*callback)(accessor.clone());
                    }
                }
            }
            layer = next_layer;
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Release / dispose
    // ------------------------------------------------------------------

    pub(crate) fn release_core(
        &self,
        core: &Arc<ExecutorCore>,
        soft: bool,
    ) -> BoxFuture<'static, Result<()>> {
        let this = match self.strong() {
            Ok(this) => this,
            Err(err) => return Box::pin(std::future::ready(Err(err))),
        };
        let core = core.clone();
        Box::pin(async move {
            if this.is_disposed() {
                return Err(Error::disposed());
            }

            if this.peek_cell(core.id).is_none() {
                if soft {
                    return Ok(());
                }
                return Err(Error::dependency(
                    ErrorCode::ReleaseUnresolved,
                    Some(core.debug_name()),
                    "cannot release a descriptor that is not cached",
                ));
            }

            debug!(target: "weft::scope", executor = %core.debug_name(), soft, "releasing");

            this.drain_cleanups(core.id);

            let accessor = this.accessor_any(&core);
            let listeners = this
                .release_listeners
                .lock()
                .get(&core.id)
                .cloned()
                .unwrap_or_default();
            for (_, listener) in listeners {
                (*listener)(accessor.clone());
            }

            // cascade: soft-release every reactive dependent first
            let dependents = {
                let subscribers = this.subscribers.lock();
                subscribers
                    .get(&core.id)
                    .map(|set| set.dependents.values().cloned().collect::<Vec<_>>())
                    .unwrap_or_default()
            };
            for dependent in dependents {
                this.release_core(&dependent, true).await?;
            }

            this.entries.lock().remove(&core.id);
            {
                let mut subscribers = this.subscribers.lock();
                subscribers.remove(&core.id);
                for set in subscribers.values_mut() {
                    set.dependents.shift_remove(&core.id);
                }
            }
            Ok(())
        })
    }

    pub(crate) fn dispose_inner(&self) -> BoxFuture<'static, Result<()>> {
        let this = match self.strong() {
            Ok(this) => this,
            Err(err) => return Box::pin(std::future::ready(Err(err))),
        };
        Box::pin(async move {
            {
                let mut life = this.life.lock();
                match *life {
                    LifeState::Active => *life = LifeState::Disposing,
                    // dispose is idempotent
                    LifeState::Disposing | LifeState::Disposed => return Ok(()),
                }
            }

            debug!(target: "weft::scope", name = ?this.name, pod = this.is_pod(), "disposing");

            // live pods first
            let pods: Vec<Arc<ScopeInner>> = this
                .pods
                .lock()
                .drain(..)
                .filter_map(|weak| weak.upgrade())
                .collect();
            for pod in pods {
                pod.dispose_inner().await?;
            }

            // extension hooks, registration order
            let extensions = this.extensions_snapshot();
            if this.is_pod() {
                let pod = Pod::from_inner(this.clone());
                for ext in extensions {
                    if let Err(err) = ext.dispose_pod(&pod).await {
                        warn!(target: "weft::scope", extension = ext.name(), %err, "dispose_pod hook failed");
                    }
                }
            } else {
                let scope = Scope::from_inner(this.clone());
                for ext in extensions {
                    if let Err(err) = ext.dispose(&scope).await {
                        warn!(target: "weft::scope", extension = ext.name(), %err, "dispose hook failed");
                    }
                }
            }

            // soft-release everything still cached
            let cores: Vec<Arc<ExecutorCore>> = this
                .entries
                .lock()
                .values()
                .map(|entry| entry.core.clone())
                .collect();
            for core in cores {
                if let Err(err) = this.release_core(&core, true).await {
                    warn!(target: "weft::scope", executor = %core.debug_name(), %err, "release during dispose failed");
                }
            }

            *this.life.lock() = LifeState::Disposed;
            Ok(())
        })
    }

    // ------------------------------------------------------------------
    // Listeners / extensions / pods
    // ------------------------------------------------------------------

    pub(crate) fn on_update_any(
        &self,
        core: &Arc<ExecutorCore>,
        callback: UpdateCallback,
    ) -> Result<Subscription> {
        self.check_active()?;
        if self.is_pod() {
            return Err(Error::dependency(
                ErrorCode::ReactiveInPod,
                Some(core.debug_name()),
                "update subscriptions are not allowed inside a pod",
            ));
        }
        let id = self.next_id();
        self.subscribers
            .lock()
            .entry(core.id)
            .or_default()
            .callbacks
            .push((id, callback));
        Ok(Subscription {
            scope: self.weak_self.clone(),
            slot: SubscriptionSlot::Update {
                target: core.id,
                id,
            },
        })
    }

    fn on_change_any(&self, callback: ChangeCallback) -> Result<Subscription> {
        self.check_active()?;
        let id = self.next_id();
        self.change_listeners.lock().push((id, callback));
        Ok(Subscription {
            scope: self.weak_self.clone(),
            slot: SubscriptionSlot::Change { id },
        })
    }

    fn on_release_any(
        &self,
        core: &Arc<ExecutorCore>,
        callback: ReleaseCallback,
    ) -> Result<Subscription> {
        self.check_active()?;
        let id = self.next_id();
        self.release_listeners
            .lock()
            .entry(core.id)
            .or_default()
            .push((id, callback));
        Ok(Subscription {
            scope: self.weak_self.clone(),
            slot: SubscriptionSlot::Release {
                target: core.id,
                id,
            },
        })
    }

    fn on_error_any(&self, callback: ErrorCallback) -> Result<Subscription> {
        self.check_active()?;
        let id = self.next_id();
        self.error_listeners.lock().push((id, callback));
        Ok(Subscription {
            scope: self.weak_self.clone(),
            slot: SubscriptionSlot::ErrorCb { id },
        })
    }

    fn register_extension(&self, extension: Arc<dyn Extension>) -> Subscription {
        let id = self.next_id();
        self.extensions.lock().push((id, extension));
        Subscription {
            scope: self.weak_self.clone(),
            slot: SubscriptionSlot::Extension { id },
        }
    }

    pub(crate) async fn fork_pod(
        &self,
        presets: Vec<Preset>,
        seeds: Vec<ContextSeed>,
    ) -> Result<Pod> {
        self.check_active()?;
        let this = self.strong()?;
        if self.is_pod() {
            return Err(Error::system(
                ErrorCode::Internal,
                "pods cannot fork further pods",
            ));
        }

        let mut preset_map = self.presets.clone();
        for preset in presets {
            preset_map.insert(preset.target.id, preset.action);
        }
        let seed = DataMap::from_seeds(seeds);
        let inner = ScopeInner::build(
            self.name.clone(),
            ScopeKind::Pod { parent: this },
            preset_map,
            self.extensions.lock().clone(),
            seed.clone(),
        );
        self.pods.lock().push(Arc::downgrade(&inner));

        let pod = Pod::from_inner(inner);
        for ext in pod.inner().extensions_snapshot() {
            ext.init_pod(&pod, &seed).await?;
        }
        Ok(pod)
    }
}

/// Build the resolution driver for one cache generation: realize the
/// dependency spec, run the factory through the wrap chain inside the
/// task-local resolution chain, then finalize the cell and fire events.
fn make_driver(
    this: Arc<ScopeInner>,
    core: Arc<ExecutorCore>,
    generation: u64,
    chain: Vec<ChainEntry>,
) -> BoxFuture<'static, Result<AnyValue>> {
    Box::pin(async move {
        // cleanups of the previous generation drain before the factory re-runs
        this.drain_cleanups(core.id);

        let mut scoped_chain = chain;
        scoped_chain.push(ChainEntry {
            id: core.id,
            name: core.debug_name(),
        });
        let chain_names: Vec<Arc<str>> = scoped_chain
            .iter()
            .map(|entry| entry.name.clone())
            .collect();

        debug!(target: "weft::scope", executor = %core.debug_name(), "resolving");

        let extensions = this.extensions_snapshot();
        let operation = Operation::Resolve {
            executor: core.debug_name(),
            kind: ResolveKind::Resolve,
        };
        let terminal: BoxFuture<'static, Result<AnyValue>> = {
            let this = this.clone();
            let core = core.clone();
            Box::pin(async move { this.run_factory(core).await })
        };
        let wrapped = compose_chain(&extensions, operation, terminal);

        let result = RESOLVE_CHAIN
            .scope(scoped_chain, wrapped)
            .await
            .map_err(|err| {
                err.attributed_to(core.debug_name())
                    .with_chain(chain_names.clone())
            });

        this.finalize_cell(core.id, generation, &result);
        if let Err(err) = &result {
            this.clone().fire_error(err).await;
        }
        result
    })
}

fn resolved_shared(value: AnyValue) -> SharedResolve {
    let fut: BoxFuture<'static, Result<AnyValue>> = Box::pin(std::future::ready(Ok(value)));
    fut.shared()
}

/// Builder for scopes with presets, extensions, and a debug name.
#[derive(Default)]
pub struct ScopeBuilder {
    name: Option<Arc<str>>,
    presets: Vec<Preset>,
    extensions: Vec<Arc<dyn Extension>>,
}

impl ScopeBuilder {
    /// Attach a debug name used in logs.
    #[must_use]
    pub fn named(mut self, name: impl AsRef<str>) -> Self {
        self.name = Some(Arc::from(name.as_ref()));
        self
    }

    /// Register a preset; value presets short-circuit the target's factory.
    #[must_use]
    pub fn preset(mut self, preset: Preset) -> Self {
        self.presets.push(preset);
        self
    }

    /// Register an extension; `init` runs during `build`.
    #[must_use]
    pub fn extension(mut self, extension: Arc<dyn Extension>) -> Self {
        self.extensions.push(extension);
        self
    }

    /// Construct the scope and run extension `init` hooks in registration
    /// order.
    pub async fn build(self) -> Result<Scope> {
        let presets = self
            .presets
            .into_iter()
            .map(|preset| (preset.target.id, preset.action))
            .collect();
        let inner = ScopeInner::build(
            self.name,
            ScopeKind::Root,
            presets,
            Vec::new(),
            DataMap::new(),
        );
        let scope = Scope { inner };
        for extension in self.extensions {
            scope.use_extension(extension).await?;
        }
        Ok(scope)
    }
}

/// An isolated resolution context owning the cache, cleanups, subscriber
/// graph, event listeners, and extension chain.
#[derive(Clone)]
pub struct Scope {
    inner: Arc<ScopeInner>,
}

impl Default for Scope {
    fn default() -> Self {
        Self::new()
    }
}

impl Scope {
    /// A scope with no presets and no extensions.
    pub fn new() -> Self {
        Self {
            inner: ScopeInner::build(
                None,
                ScopeKind::Root,
                HashMap::new(),
                Vec::new(),
                DataMap::new(),
            ),
        }
    }

    /// Builder with presets, extensions, and a debug name.
    pub fn builder() -> ScopeBuilder {
        ScopeBuilder::default()
    }

    pub(crate) fn inner(&self) -> &Arc<ScopeInner> {
        &self.inner
    }

    pub(crate) fn from_inner(inner: Arc<ScopeInner>) -> Self {
        Self { inner }
    }

    /// Debug name attached at construction.
    pub fn name(&self) -> Option<&str> {
        self.inner.scope_name()
    }

    /// True once `dispose` has completed; every operation is rejected then.
    pub fn is_disposed(&self) -> bool {
        self.inner.is_disposed()
    }

    /// Resolve `executor`: return the cached value or run its factory once.
    /// Concurrent resolvers share one pending future.
    pub async fn resolve<T: Send + Sync + 'static>(
        &self,
        executor: &Executor<T>,
    ) -> Result<Arc<T>> {
        let value = self
            .inner
            .resolve_core(executor.core().clone(), false)
            .await?;
        downcast(value, &executor.core().debug_name())
    }

    /// Force a fresh resolution, replacing the cached cell. The accessor
    /// stays stable across the replacement.
    pub async fn resolve_forced<T: Send + Sync + 'static>(
        &self,
        executor: &Executor<T>,
    ) -> Result<Arc<T>> {
        let value = self
            .inner
            .resolve_core(executor.core().clone(), true)
            .await?;
        downcast(value, &executor.core().debug_name())
    }

    /// Resolve, then return the stable accessor.
    pub async fn resolve_accessor<T: Send + Sync + 'static>(
        &self,
        executor: &Executor<T>,
    ) -> Result<Accessor<T>> {
        self.inner
            .resolve_core(executor.core().clone(), false)
            .await?;
        Ok(self.accessor(executor))
    }

    /// The stable accessor for `executor`; does not resolve.
    pub fn accessor<T>(&self, executor: &Executor<T>) -> Accessor<T> {
        Accessor::from_any(self.inner.accessor_any(executor.core()))
    }

    /// Write a resolved value and propagate to reactive dependents and update
    /// listeners before returning.
    pub async fn update<T: Send + Sync + 'static>(
        &self,
        executor: &Executor<T>,
        value: T,
    ) -> Result<()> {
        self.inner
            .update_core(executor.core().clone(), UpdateValue::Value(Arc::new(value)))
            .await
    }

    /// Compute the next value from the current one, then propagate. Resolves
    /// first when the descriptor has not been resolved yet.
    pub async fn update_with<T: Send + Sync + 'static>(
        &self,
        executor: &Executor<T>,
        f: impl FnOnce(&T) -> T + Send + 'static,
    ) -> Result<()> {
        let name = executor.core().debug_name();
        self.inner
            .update_core(
                executor.core().clone(),
                UpdateValue::Map(Box::new(move |current: &AnyValue| {
                    let typed = downcast::<T>(current.clone(), &name)?;
                    Ok(Arc::new(f(&typed)) as AnyValue)
                })),
            )
            .await
    }

    /// Alias of [`Scope::update`].
    pub async fn set<T: Send + Sync + 'static>(
        &self,
        executor: &Executor<T>,
        value: T,
    ) -> Result<()> {
        self.update(executor, value).await
    }

    /// Drain cleanups, notify release listeners, cascade a soft release
    /// through reactive dependents, and delete the cache cell. Errors when
    /// the descriptor is not cached.
    pub async fn release<T>(&self, executor: &Executor<T>) -> Result<()> {
        self.inner.release_core(executor.core(), false).await
    }

    /// As [`Scope::release`], but idempotent when the descriptor is not
    /// cached.
    pub async fn release_soft<T>(&self, executor: &Executor<T>) -> Result<()> {
        self.inner.release_core(executor.core(), true).await
    }

    /// Dispose every pod, run extension dispose hooks, soft-release every
    /// cached descriptor, and lock the scope. Idempotent.
    pub async fn dispose(&self) -> Result<()> {
        self.inner.dispose_inner().await
    }

    /// Register an update callback for `executor`. Fails inside pods.
    pub fn on_update<T: Send + Sync + 'static>(
        &self,
        executor: &Executor<T>,
        callback: impl Fn(Accessor<T>) + Send + Sync + 'static,
    ) -> Result<Subscription> {
        self.inner.on_update_any(
            executor.core(),
            Arc::new(move |any: AnyAccessor| callback(Accessor::from_any(any))),
        )
    }

    /// Register a scope-wide change listener; it may return a replacement
    /// value that is stored instead of the produced one.
    pub fn on_change(
        &self,
        callback: impl Fn(&ChangeEvent) -> Option<AnyValue> + Send + Sync + 'static,
    ) -> Result<Subscription> {
        self.inner.on_change_any(Arc::new(callback))
    }

    /// Register a release listener for `executor`.
    pub fn on_release<T: Send + Sync + 'static>(
        &self,
        executor: &Executor<T>,
        callback: impl Fn(Accessor<T>) + Send + Sync + 'static,
    ) -> Result<Subscription> {
        self.inner.on_release_any(
            executor.core(),
            Arc::new(move |any: AnyAccessor| callback(Accessor::from_any(any))),
        )
    }

    /// Register an advisory error listener.
    pub fn on_error(
        &self,
        callback: impl Fn(&Error) + Send + Sync + 'static,
    ) -> Result<Subscription> {
        self.inner.on_error_any(Arc::new(callback))
    }

    /// Append an extension to the chain and run its `init` hook. The returned
    /// subscription removes it again.
    pub async fn use_extension(&self, extension: Arc<dyn Extension>) -> Result<Subscription> {
        self.inner.check_active()?;
        extension.init(self).await?;
        Ok(self.inner.register_extension(extension))
    }

    /// Fork a pod with no extra presets and no seed data.
    pub async fn pod(&self) -> Result<Pod> {
        self.inner.fork_pod(Vec::new(), Vec::new()).await
    }

    /// Fork a pod with additional presets (overlaying the scope's) and seed
    /// context data.
    pub async fn pod_with(&self, presets: Vec<Preset>, seeds: Vec<ContextSeed>) -> Result<Pod> {
        self.inner.fork_pod(presets, seeds).await
    }
}
