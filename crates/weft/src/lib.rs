// Copyright 2026 Dropbox (created by Andrew Yates <ayates@dropbox.com>)

//! # Weft
//!
//! A reactive executor-graph runtime: lazy, memoized resolution of a graph of
//! producers with scoped lifecycles, reactive update propagation, short-lived
//! scope forks (pods), and a schema-validated flow engine layered on top.
//!
//! ## Core pieces
//!
//! - **Executors** ([`provide`]/[`derive`]): immutable producer descriptors
//!   with async factories and shape-preserving dependency specs. Variants
//!   (`lazy`, `reactive`, `static_`) change how a dependent realizes its view.
//! - **Scopes** ([`Scope`]): isolated resolution contexts owning the cache,
//!   cleanup stacks, reactive subscriber graph, and extension chain.
//! - **Pods** ([`Pod`]): scope forks that inherit parent cache cells on first
//!   touch, forbid reactive semantics, and dispose in isolation.
//! - **Flows** ([`flow::FlowDefinition`]): schema-validated, context-carrying
//!   operations executed on pods, composable via `exec`, journaled `run`, and
//!   `parallel`.
//! - **Extensions** ([`Extension`]): named interceptors with lifecycle hooks
//!   and a `wrap` middleware over every observable operation.
//!
//! ## Example
//!
//! ```rust
//! use weft::{derive, provide, Scope};
//!
//! # async fn example() -> weft::Result<()> {
//! let base = provide(|_ctl| async { Ok(2u32) });
//! let doubled = derive(base.clone(), |v, _ctl| async move { Ok(*v * 2) });
//!
//! let scope = Scope::new();
//! assert_eq!(*scope.resolve(&doubled).await?, 4);
//! scope.dispose().await?;
//! # Ok(())
//! # }
//! ```

/// Stable per-(scope, descriptor) handles.
pub mod accessor;
/// Dependency specs and their realization.
pub mod deps;
/// Structured error taxonomy.
pub mod error;
/// Executor descriptors, variants, and factories.
pub mod executor;
/// Built-in extensions (telemetry, journal recording).
pub mod ext;
/// Extension trait, operation payloads, and wrap-chain composition.
pub mod extension;
/// Flow definitions, handlers, execution, and contexts.
pub mod flow;
/// Symbol-like keys for metas and context data.
pub mod key;
/// Symbol-keyed, schema-validated attributes.
pub mod meta;
/// Keyed executor families.
pub mod multi;
/// Pods: short-lived scope forks.
pub mod pod;
/// Promise-like result carriers and settled utilities.
pub mod promised;
/// Schema adapter: the opaque validation contract.
pub mod schema;
/// Scope resolver, cache, presets, and events.
pub mod scope;
/// Data stores and typed accessors.
pub mod store;

pub use accessor::{Accessor, AnyAccessor, Lookup};
pub use deps::{Dependencies, DependencyRef, RefKind};
pub use error::{BoxedError, Category, Error, ErrorCode, Issue, Result};
pub use executor::{derive, provide, Controller, Executor, Lazy, Reactive, Static};
pub use extension::{Extension, Next, Operation, OperationKind, ParallelMode, ResolveKind};
pub use key::Key;
pub use meta::{meta, Meta, MetaEntry, MetaSource};
pub use multi::{multi, MultiExecutor};
pub use pod::Pod;
pub use promised::{partition, settled_all, Promised, Settled};
pub use schema::{custom, verify, Schema, SchemaRef};
pub use scope::{
    preset, ChangeEvent, ChangeKind, Preset, Scope, ScopeBuilder, Subscription,
};
pub use store::{accessor, AnyValue, ContextSeed, DataAccessor, DataMap, DataStore};

/// The commonly-used surface in one import.
pub mod prelude {
    pub use crate::accessor::Accessor;
    pub use crate::error::{Error, Result};
    pub use crate::executor::{derive, provide, Controller, Executor};
    pub use crate::extension::Extension;
    pub use crate::flow::{execute, execute_with, ExecuteOptions, FlowContext, FlowDefinition};
    pub use crate::meta::{meta, Meta};
    pub use crate::pod::Pod;
    pub use crate::promised::{Promised, Settled};
    pub use crate::schema::{custom, verify};
    pub use crate::scope::{preset, Preset, Scope};
    pub use crate::store::{accessor, DataAccessor};
}
