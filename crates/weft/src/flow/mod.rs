// Copyright 2026 Dropbox (created by Andrew Yates <ayates@dropbox.com>)

//! Flow engine
//!
//! A flow is a schema-validated, context-carrying business operation executed
//! on a pod. A [`FlowDefinition`] is pure metadata (name, version, input and
//! output schemas); binding it to a handler yields a [`FlowHandler`], an
//! executor descriptor whose resolved value is the handler function. Handlers
//! receive a [`FlowContext`] and compose nested work through it: subflows
//! (`exec`), journaled steps (`run`), and parallel batches.
//!
//! [`execute`] drives one root flow: ephemeral scope if none is supplied, a
//! pod seeded from the caller's initial context, input validation, the
//! extension wrap chain around the handler, output validation, and pod
//! disposal on the way out.

mod context;

pub use context::FlowContext;

use crate::deps::Dependencies;
use crate::error::Result;
use crate::executor::{derive, provide, Executor};
use crate::extension::Operation;
use crate::pod::Pod;
use crate::schema::{custom, validate_subject, SchemaRef};
use crate::scope::{Preset, Scope};
use crate::store::{downcast, AnyValue, ContextSeed, DataAccessor};
use futures::future::BoxFuture;
use std::future::Future;
use std::sync::{Arc, LazyLock};
use uuid::Uuid;

/// Built-in context accessor: nesting depth, 0 at the root.
pub static DEPTH: LazyLock<DataAccessor<u32>> =
    LazyLock::new(|| crate::store::accessor("weft/flow.depth", custom()));

/// Built-in context accessor: name of the executing flow.
pub static FLOW_NAME: LazyLock<DataAccessor<String>> =
    LazyLock::new(|| crate::store::accessor("weft/flow.name", custom()));

/// Built-in context accessor: name of the invoking flow, when nested.
pub static PARENT_FLOW_NAME: LazyLock<DataAccessor<Option<String>>> =
    LazyLock::new(|| crate::store::accessor("weft/flow.parent-name", custom()));

/// Built-in context accessor: whether the flow runs inside a parallel batch.
pub static IS_PARALLEL: LazyLock<DataAccessor<bool>> =
    LazyLock::new(|| crate::store::accessor("weft/flow.is-parallel", custom()));

pub(crate) struct FlowMeta<I, O> {
    pub(crate) name: Arc<str>,
    pub(crate) version: Option<Arc<str>>,
    pub(crate) input: SchemaRef<I>,
    pub(crate) output: Option<SchemaRef<O>>,
}

/// Pure flow metadata: identity, name, version, and schemas. Bind a handler
/// with [`FlowDefinition::handler`] or [`FlowDefinition::handler_with`].
pub struct FlowDefinition<I, O> {
    name: Arc<str>,
    version: Option<Arc<str>>,
    input: SchemaRef<I>,
    output: Option<SchemaRef<O>>,
}

impl<I, O> FlowDefinition<I, O>
where
    I: Send + Sync + 'static,
    O: Send + Sync + 'static,
{
    /// Definition with the given name and pass-through input schema.
    pub fn named(name: impl AsRef<str>) -> Self {
        Self {
            name: Arc::from(name.as_ref()),
            version: None,
            input: custom(),
            output: None,
        }
    }

    /// Attach a version label.
    #[must_use]
    pub fn version(mut self, version: impl AsRef<str>) -> Self {
        self.version = Some(Arc::from(version.as_ref()));
        self
    }

    /// Validate inputs with `schema` before the handler runs.
    #[must_use]
    pub fn input(mut self, schema: SchemaRef<I>) -> Self {
        self.input = schema;
        self
    }

    /// Validate the handler's return value with `schema`.
    #[must_use]
    pub fn output(mut self, schema: SchemaRef<O>) -> Self {
        self.output = Some(schema);
        self
    }

    /// Flow name.
    pub fn name(&self) -> &str {
        &self.name
    }

    fn freeze(self) -> Arc<FlowMeta<I, O>> {
        Arc::new(FlowMeta {
            name: self.name,
            version: self.version,
            input: self.input,
            output: self.output,
        })
    }

    /// Bind a handler with no dependencies.
    pub fn handler<F, Fut>(self, f: F) -> FlowHandler<I, O>
    where
        F: Fn(FlowContext, I) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<O>> + Send + 'static,
    {
        let meta = self.freeze();
        let name = meta.name.clone();
        let handler_fn: HandlerFn<I, O> = Arc::new(move |ctx, input| Box::pin(f(ctx, input)));
        let meta_for_factory = meta.clone();
        let executor = provide(move |_ctl| {
            let flow_fn = FlowFn {
                meta: meta_for_factory.clone(),
                handler: handler_fn.clone(),
            };
            async move { Ok(flow_fn) }
        })
        .with_name(format!("flow:{name}"));
        FlowHandler { meta, executor }
    }

    /// Bind a handler over a realized dependency spec; the handler closes
    /// over the dependencies for the lifetime of the pod's cache entry.
    pub fn handler_with<D, F, Fut>(self, deps: D, f: F) -> FlowHandler<I, O>
    where
        D: Dependencies,
        D::Output: Clone + Send + Sync + 'static,
        F: Fn(D::Output, FlowContext, I) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<O>> + Send + 'static,
    {
        let meta = self.freeze();
        let name = meta.name.clone();
        let f = Arc::new(f);
        let meta_for_factory = meta.clone();
        let executor = derive(deps, move |realized, _ctl| {
            let meta = meta_for_factory.clone();
            let f = f.clone();
            async move {
                let handler_fn: HandlerFn<I, O> = Arc::new(move |ctx, input| {
                    Box::pin((*f)(realized.clone(), ctx, input))
                });
                Ok(FlowFn {
                    meta,
                    handler: handler_fn,
                })
            }
        })
        .with_name(format!("flow:{name}"));
        FlowHandler { meta, executor }
    }
}

type HandlerFn<I, O> =
    Arc<dyn Fn(FlowContext, I) -> BoxFuture<'static, Result<O>> + Send + Sync>;

/// The value a flow-handler executor resolves to: the flow metadata plus the
/// bound handler function.
pub struct FlowFn<I, O> {
    pub(crate) meta: Arc<FlowMeta<I, O>>,
    pub(crate) handler: HandlerFn<I, O>,
}

impl<I, O> Clone for FlowFn<I, O> {
    fn clone(&self) -> Self {
        Self {
            meta: self.meta.clone(),
            handler: self.handler.clone(),
        }
    }
}

/// A flow definition bound to a handler: an executor descriptor whose
/// resolved value is the handler function.
pub struct FlowHandler<I, O> {
    pub(crate) meta: Arc<FlowMeta<I, O>>,
    executor: Executor<FlowFn<I, O>>,
}

impl<I, O> Clone for FlowHandler<I, O> {
    fn clone(&self) -> Self {
        Self {
            meta: self.meta.clone(),
            executor: self.executor.clone(),
        }
    }
}

impl<I, O> FlowHandler<I, O> {
    /// Flow name.
    pub fn name(&self) -> &str {
        &self.meta.name
    }

    /// Version label, when one was attached.
    pub fn version(&self) -> Option<&str> {
        self.meta.version.as_deref()
    }

    /// The underlying handler executor; resolvable through any pod.
    pub fn executor(&self) -> &Executor<FlowFn<I, O>> {
        &self.executor
    }
}

/// Options for [`execute_with`]: where to run and what to seed.
#[derive(Default)]
pub struct ExecuteOptions {
    scope: Option<Scope>,
    pod: Option<Pod>,
    presets: Vec<Preset>,
    initial_context: Vec<ContextSeed>,
}

impl ExecuteOptions {
    /// Run on this scope instead of an ephemeral one.
    #[must_use]
    pub fn scope(mut self, scope: Scope) -> Self {
        self.scope = Some(scope);
        self
    }

    /// Run on this pod instead of forking one.
    #[must_use]
    pub fn pod(mut self, pod: Pod) -> Self {
        self.pod = Some(pod);
        self
    }

    /// Preset applied to the forked pod (ignored when a pod is supplied).
    #[must_use]
    pub fn preset(mut self, preset: Preset) -> Self {
        self.presets.push(preset);
        self
    }

    /// Initial context entry, in order (later seeds win).
    #[must_use]
    pub fn seed(mut self, seed: ContextSeed) -> Self {
        self.initial_context.push(seed);
        self
    }
}

/// Execute a root flow with default options: an ephemeral scope is created,
/// used, and disposed.
pub async fn execute<I, O>(handler: &FlowHandler<I, O>, input: I) -> Result<O>
where
    I: Clone + Send + Sync + 'static,
    O: Clone + Send + Sync + 'static,
{
    execute_with(handler, input, ExecuteOptions::default()).await
}

/// Execute a root flow: fork (or receive) a pod, seed its context, validate
/// the input, run the handler wrapped by the extension chain, validate the
/// output, and dispose whatever was created here.
pub async fn execute_with<I, O>(
    handler: &FlowHandler<I, O>,
    input: I,
    options: ExecuteOptions,
) -> Result<O>
where
    I: Clone + Send + Sync + 'static,
    O: Clone + Send + Sync + 'static,
{
    let (scope, owns_scope) = match options.scope {
        Some(scope) => (scope, false),
        None => (Scope::new(), true),
    };

    let (pod, owns_pod) = match options.pod {
        Some(pod) => (pod, false),
        None => {
            match scope
                .pod_with(options.presets, options.initial_context)
                .await
            {
                Ok(pod) => (pod, true),
                Err(err) => {
                    if owns_scope {
                        let _ = scope.dispose().await;
                    }
                    return Err(err);
                }
            }
        }
    };

    let result = run_root(&pod, handler, input).await;

    if owns_pod {
        let _ = pod.dispose().await;
    }
    if owns_scope {
        let _ = scope.dispose().await;
    }
    result
}

async fn run_root<I, O>(pod: &Pod, handler: &FlowHandler<I, O>, input: I) -> Result<O>
where
    I: Clone + Send + Sync + 'static,
    O: Clone + Send + Sync + 'static,
{
    let meta = handler.meta.clone();
    let validated = validate_subject(&meta.input, Some(meta.name.clone()), input)?;

    let execution_id = Uuid::new_v4();
    let ctx = FlowContext::root(pod.clone(), meta.name.clone(), execution_id)?;

    tracing::debug!(target: "weft::flow", flow = %meta.name, %execution_id, "executing");

    let flow_fn = pod.resolve(handler.executor()).await?;
    let operation = Operation::Execute {
        flow: meta.name.clone(),
        depth: 0,
        parent_flow: None,
        parallel: false,
        input: Arc::new(validated.clone()) as AnyValue,
        execution_id,
    };
    context::run_wrapped(pod, &ctx, operation, flow_fn, validated, meta.output.as_ref()).await
}

pub(crate) fn unwrap_arc<T: Clone>(value: Arc<T>) -> T {
    Arc::try_unwrap(value).unwrap_or_else(|shared| (*shared).clone())
}

pub(crate) fn downcast_output<O: Send + Sync + 'static>(
    value: AnyValue,
    subject: &str,
) -> Result<Arc<O>> {
    downcast(value, subject)
}
