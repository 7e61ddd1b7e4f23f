// Copyright 2026 Dropbox (created by Andrew Yates <ayates@dropbox.com>)

//! Flow execution contexts
//!
//! A [`FlowContext`] is the per-invocation record a handler receives: the
//! owning pod, the parent context (if nested), the nesting depth, and a
//! [`DataStore`] of per-invocation data. Child contexts inherit the parent's
//! store by copy at creation; writes in either direction stay local.

use crate::error::{Error, Result};
use crate::extension::{compose_chain, Operation, ParallelMode};
use crate::flow::{
    downcast_output, unwrap_arc, FlowFn, FlowHandler, DEPTH, FLOW_NAME, IS_PARALLEL,
    PARENT_FLOW_NAME,
};
use crate::key::Key;
use crate::meta::MetaSource;
use crate::pod::Pod;
use crate::promised::{settled_all, Promised, Settled};
use crate::schema::{validate_subject, SchemaRef};
use crate::store::{AnyValue, DataMap, DataStore};
use futures::future::BoxFuture;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use uuid::Uuid;

struct ContextInner {
    pod: Pod,
    parent: Option<FlowContext>,
    depth: u32,
    flow_name: Arc<str>,
    parent_flow: Option<Arc<str>>,
    parallel: bool,
    execution_id: Uuid,
    store: DataMap,
    /// True while a parallel batch issued from this context is in flight;
    /// subflows started during that window are marked parallel.
    in_parallel: AtomicBool,
}

/// The per-invocation execution context handed to flow handlers.
#[derive(Clone)]
pub struct FlowContext {
    inner: Arc<ContextInner>,
}

impl fmt::Debug for FlowContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FlowContext")
            .field("flow", &self.inner.flow_name)
            .field("depth", &self.inner.depth)
            .field("parallel", &self.inner.parallel)
            .finish()
    }
}

impl DataStore for FlowContext {
    fn get_raw(&self, key: &Key) -> Option<AnyValue> {
        self.inner.store.get_raw(key)
    }

    fn set_raw(&self, key: Key, value: AnyValue) {
        self.inner.store.set_raw(key, value);
    }
}

impl MetaSource for FlowContext {
    fn meta_values(&self, key: &Key) -> Vec<AnyValue> {
        self.get_raw(key).into_iter().collect()
    }
}

impl FlowContext {
    pub(crate) fn root(pod: Pod, flow_name: Arc<str>, execution_id: Uuid) -> Result<Self> {
        let store = pod.seed().fork();
        let ctx = Self {
            inner: Arc::new(ContextInner {
                pod,
                parent: None,
                depth: 0,
                flow_name,
                parent_flow: None,
                parallel: false,
                execution_id,
                store,
                in_parallel: AtomicBool::new(false),
            }),
        };
        ctx.seed_builtins()?;
        Ok(ctx)
    }

    fn child(parent: &FlowContext, flow_name: Arc<str>, parallel: bool) -> Result<Self> {
        let store = parent.inner.store.fork();
        let ctx = Self {
            inner: Arc::new(ContextInner {
                pod: parent.inner.pod.clone(),
                parent: Some(parent.clone()),
                depth: parent.inner.depth + 1,
                flow_name,
                parent_flow: Some(parent.inner.flow_name.clone()),
                parallel,
                execution_id: parent.inner.execution_id,
                store,
                in_parallel: AtomicBool::new(false),
            }),
        };
        ctx.seed_builtins()?;
        Ok(ctx)
    }

    fn seed_builtins(&self) -> Result<()> {
        DEPTH.set(&self.inner.store, self.inner.depth)?;
        FLOW_NAME.set(&self.inner.store, self.inner.flow_name.to_string())?;
        PARENT_FLOW_NAME.set(
            &self.inner.store,
            self.inner.parent_flow.as_ref().map(|name| name.to_string()),
        )?;
        IS_PARALLEL.set(&self.inner.store, self.inner.parallel)?;
        Ok(())
    }

    /// The pod this execution tree runs on.
    pub fn pod(&self) -> &Pod {
        &self.inner.pod
    }

    /// The invoking context, when nested.
    pub fn parent(&self) -> Option<&FlowContext> {
        self.inner.parent.as_ref()
    }

    /// Nesting depth, 0 at the root.
    pub fn depth(&self) -> u32 {
        self.inner.depth
    }

    /// Name of the executing flow.
    pub fn flow_name(&self) -> &str {
        &self.inner.flow_name
    }

    /// Name of the invoking flow, when nested.
    pub fn parent_flow_name(&self) -> Option<&str> {
        self.inner.parent_flow.as_deref()
    }

    /// Whether this flow was started inside a parallel batch.
    pub fn is_parallel(&self) -> bool {
        self.inner.parallel
    }

    /// Identifier shared by the whole execution tree.
    pub fn execution_id(&self) -> Uuid {
        self.inner.execution_id
    }

    /// Start a child flow on the same pod. The returned [`Promised`] is
    /// in-flight once polled; await it directly or feed it to
    /// [`FlowContext::parallel`].
    pub fn exec<I, O>(&self, handler: &FlowHandler<I, O>, input: I) -> Promised<O>
    where
        I: Clone + Send + Sync + 'static,
        O: Clone + Send + Sync + 'static,
    {
        let parent = self.clone();
        let handler = handler.clone();
        Promised::from_future(async move {
            let meta = handler.meta.clone();
            let validated = validate_subject(&meta.input, Some(meta.name.clone()), input)?;
            let parallel = parent.inner.in_parallel.load(Ordering::SeqCst);
            let child = FlowContext::child(&parent, meta.name.clone(), parallel)?;

            tracing::debug!(
                target: "weft::flow",
                flow = %meta.name,
                parent = %parent.inner.flow_name,
                depth = child.depth(),
                "executing subflow"
            );

            let flow_fn = parent.inner.pod.resolve(handler.executor()).await?;
            let operation = Operation::Subflow {
                flow: meta.name.clone(),
                depth: child.depth(),
                parent_flow: Some(parent.inner.flow_name.clone()),
                parallel,
                input: Arc::new(validated.clone()) as AnyValue,
                execution_id: parent.inner.execution_id,
            };
            run_wrapped(
                &parent.inner.pod,
                &child,
                operation,
                flow_fn,
                validated,
                meta.output.as_ref(),
            )
            .await
        })
    }

    /// Run a journaled step: a named invocation observable by extensions as
    /// a distinct operation. The step function is invoked every time; replay
    /// is an extension-level concern.
    pub async fn run<R, F, Fut>(&self, key: &str, step: F) -> Result<R>
    where
        R: Clone + Send + Sync + 'static,
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = Result<R>> + Send + 'static,
    {
        let operation = Operation::Journal {
            flow: self.inner.flow_name.clone(),
            key: Arc::from(key),
            execution_id: self.inner.execution_id,
        };
        let extensions = self.inner.pod.inner().extensions_snapshot();
        let fut = step();
        let terminal: BoxFuture<'static, Result<AnyValue>> = Box::pin(async move {
            let value = fut.await?;
            Ok(Arc::new(value) as AnyValue)
        });
        let any = compose_chain(&extensions, operation, terminal).await?;
        Ok(unwrap_arc(downcast_output::<R>(any, key)?))
    }

    /// Await an ordered batch of in-flight flow results concurrently;
    /// the first rejection wins. Aggregation preserves input order.
    pub async fn parallel<T>(&self, items: Vec<Promised<T>>) -> Result<Vec<T>>
    where
        T: Clone + Send + Sync + 'static,
    {
        let operation = Operation::Parallel {
            flow: self.inner.flow_name.clone(),
            mode: ParallelMode::All,
            count: items.len(),
        };
        let extensions = self.inner.pod.inner().extensions_snapshot();
        let inner = self.inner.clone();
        let terminal: BoxFuture<'static, Result<AnyValue>> = Box::pin(async move {
            inner.in_parallel.store(true, Ordering::SeqCst);
            let results = futures::future::join_all(items).await;
            inner.in_parallel.store(false, Ordering::SeqCst);
            let mut values = Vec::with_capacity(results.len());
            for result in results {
                values.push(result?);
            }
            Ok(Arc::new(values) as AnyValue)
        });
        let any = compose_chain(&extensions, operation, terminal).await?;
        Ok(unwrap_arc(downcast_output::<Vec<T>>(any, "parallel")?))
    }

    /// As [`FlowContext::parallel`], but every element carries its own
    /// outcome instead of the first rejection winning.
    pub async fn parallel_settled<T>(&self, items: Vec<Promised<T>>) -> Result<Vec<Settled<T>>>
    where
        T: Clone + Send + Sync + 'static,
    {
        let operation = Operation::Parallel {
            flow: self.inner.flow_name.clone(),
            mode: ParallelMode::Settled,
            count: items.len(),
        };
        let extensions = self.inner.pod.inner().extensions_snapshot();
        let inner = self.inner.clone();
        let terminal: BoxFuture<'static, Result<AnyValue>> = Box::pin(async move {
            inner.in_parallel.store(true, Ordering::SeqCst);
            let settled = settled_all(items).await;
            inner.in_parallel.store(false, Ordering::SeqCst);
            Ok(Arc::new(settled) as AnyValue)
        });
        let any = compose_chain(&extensions, operation, terminal).await?;
        Ok(unwrap_arc(downcast_output::<Vec<Settled<T>>>(
            any,
            "parallel_settled",
        )?))
    }
}

/// Invoke `flow_fn` on `ctx` wrapped by the pod's extension chain, then
/// validate the output. Rejections run the advisory `on_pod_error` hooks
/// before propagating.
pub(crate) async fn run_wrapped<I, O>(
    pod: &Pod,
    ctx: &FlowContext,
    operation: Operation,
    flow_fn: Arc<FlowFn<I, O>>,
    input: I,
    output_schema: Option<&SchemaRef<O>>,
) -> Result<O>
where
    I: Clone + Send + Sync + 'static,
    O: Clone + Send + Sync + 'static,
{
    let extensions = pod.inner().extensions_snapshot();
    let flow_name = ctx.inner.flow_name.clone();
    let terminal: BoxFuture<'static, Result<AnyValue>> = {
        let ctx = ctx.clone();
        let flow_fn = flow_fn.clone();
        Box::pin(async move {
            let output = (*flow_fn.handler)(ctx, input).await?;
            Ok(Arc::new(output) as AnyValue)
        })
    };

    match compose_chain(&extensions, operation, terminal).await {
        Ok(any) => {
            let output = unwrap_arc(downcast_output::<O>(any, &flow_name)?);
            match output_schema {
                Some(schema) => validate_subject(schema, Some(flow_name), output),
                None => Ok(output),
            }
        }
        Err(err) => {
            fire_pod_error(pod, ctx, &err).await;
            Err(err)
        }
    }
}

async fn fire_pod_error(pod: &Pod, ctx: &FlowContext, err: &Error) {
    let extensions = pod.inner().extensions_snapshot();
    for ext in extensions {
        ext.on_pod_error(err, pod, ctx).await;
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::flow::{execute, FlowDefinition};
    use crate::schema::custom;
    use crate::store::DataAccessor;

    #[tokio::test]
    async fn test_nested_exec_doubles_then_adds() {
        let child = FlowDefinition::named("child")
            .handler(|_ctx, input: i64| async move { Ok(input * 2) });
        let parent = FlowDefinition::named("parent").handler({
            let child = child.clone();
            move |ctx, input: i64| {
                let child = child.clone();
                async move { ctx.exec(&child, input + 1).await }
            }
        });
        assert_eq!(execute(&parent, 4).await.unwrap(), 10);
    }

    #[tokio::test]
    async fn test_child_context_metadata() {
        let child = FlowDefinition::named("child").handler(|ctx, _input: ()| async move {
            Ok((
                ctx.depth(),
                ctx.parent_flow_name().map(str::to_string),
                (*FLOW_NAME.get(&ctx)?).clone(),
            ))
        });
        let parent = FlowDefinition::named("parent").handler({
            let child = child.clone();
            move |ctx, _input: ()| {
                let child = child.clone();
                async move { ctx.exec(&child, ()).await }
            }
        });
        let (depth, parent_name, name) = execute(&parent, ()).await.unwrap();
        assert_eq!(depth, 1);
        assert_eq!(parent_name.as_deref(), Some("parent"));
        assert_eq!(name, "child");
    }

    #[tokio::test]
    async fn test_context_data_inherits_by_copy() {
        let slot = DataAccessor::<i64>::unique("slot", custom());

        let child = FlowDefinition::named("child").handler({
            let slot = slot.clone();
            move |ctx, _input: ()| {
                let slot = slot.clone();
                async move {
                    let inherited = *slot.get(&ctx)?;
                    slot.set(&ctx, 99)?;
                    Ok(inherited)
                }
            }
        });
        let parent = FlowDefinition::named("parent").handler({
            let child = child.clone();
            let slot = slot.clone();
            move |ctx, _input: ()| {
                let child = child.clone();
                let slot = slot.clone();
                async move {
                    slot.set(&ctx, 7)?;
                    let inherited = ctx.exec(&child, ()).await?;
                    // the child's write is invisible here
                    let mine = *slot.get(&ctx)?;
                    Ok((inherited, mine))
                }
            }
        });
        assert_eq!(execute(&parent, ()).await.unwrap(), (7, 7));
    }

    #[tokio::test]
    async fn test_journaled_step_runs_and_returns() {
        let flow = FlowDefinition::named("steps").handler(|ctx, input: i64| async move {
            let doubled = ctx.run("double", || async move { Ok(input * 2) }).await?;
            let bumped = ctx
                .run("bump", move || async move { Ok(doubled + 1) })
                .await?;
            Ok(bumped)
        });
        assert_eq!(execute(&flow, 3).await.unwrap(), 7);
    }

    #[tokio::test]
    async fn test_parallel_preserves_order_and_marks_children() {
        let child = FlowDefinition::named("child").handler(|ctx, input: i64| async move {
            // children launched inside a parallel batch see the flag
            Ok((input * 2, ctx.is_parallel()))
        });
        let parent = FlowDefinition::named("parent").handler({
            let child = child.clone();
            move |ctx, _input: ()| {
                let child = child.clone();
                async move {
                    let batch = vec![
                        ctx.exec(&child, 1),
                        ctx.exec(&child, 2),
                        ctx.exec(&child, 3),
                    ];
                    ctx.parallel(batch).await
                }
            }
        });
        let results = execute(&parent, ()).await.unwrap();
        assert_eq!(
            results.iter().map(|(v, _)| *v).collect::<Vec<_>>(),
            vec![2, 4, 6]
        );
        assert!(results.iter().all(|(_, parallel)| *parallel));
    }

    #[tokio::test]
    async fn test_parallel_rejects_on_first_rejection() {
        let flaky = FlowDefinition::named("flaky").handler(|_ctx, input: i64| async move {
            if input == 2 {
                Err(Error::custom("two is unlucky"))
            } else {
                Ok(input)
            }
        });
        let parent = FlowDefinition::named("parent").handler({
            let flaky = flaky.clone();
            move |ctx, _input: ()| {
                let flaky = flaky.clone();
                async move {
                    let batch = vec![
                        ctx.exec(&flaky, 1),
                        ctx.exec(&flaky, 2),
                        ctx.exec(&flaky, 3),
                    ];
                    ctx.parallel(batch).await
                }
            }
        });
        assert!(execute(&parent, ()).await.is_err());
    }

    #[tokio::test]
    async fn test_parallel_settled_reports_per_element() {
        let flaky = FlowDefinition::named("flaky").handler(|_ctx, input: i64| async move {
            if input % 2 == 0 {
                Err(Error::custom("even"))
            } else {
                Ok(input)
            }
        });
        let parent = FlowDefinition::named("parent").handler({
            let flaky = flaky.clone();
            move |ctx, _input: ()| {
                let flaky = flaky.clone();
                async move {
                    let batch = vec![
                        ctx.exec(&flaky, 1),
                        ctx.exec(&flaky, 2),
                        ctx.exec(&flaky, 3),
                    ];
                    let settled = ctx.parallel_settled(batch).await?;
                    Ok(settled
                        .iter()
                        .map(Settled::is_resolved)
                        .collect::<Vec<_>>())
                }
            }
        });
        assert_eq!(
            execute(&parent, ()).await.unwrap(),
            vec![true, false, true]
        );
    }

    #[tokio::test]
    async fn test_handler_errors_reject_the_flow_promise() {
        let failing: FlowHandler<(), ()> = FlowDefinition::named("failing")
            .handler(|_ctx, _input: ()| async move { Err(Error::custom("handler blew up")) });
        let err = execute(&failing, ()).await.unwrap_err();
        assert!(err.to_string().contains("handler blew up"));
    }
}
