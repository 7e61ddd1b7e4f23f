// Copyright 2026 Dropbox (created by Andrew Yates <ayates@dropbox.com>)

//! Extension chain
//!
//! Extensions observe and intercept every observable operation in the
//! runtime: scope resolves and updates, root flow executions, subflows,
//! journaled steps, and parallel batches. Each extension may implement
//! lifecycle hooks (`init`/`dispose`, `init_pod`/`dispose_pod`), advisory
//! error notifications, and a [`Extension::wrap`] middleware.
//!
//! Wrap composition is a right fold over the registered extensions: the
//! terminal future performs the primitive operation and each extension wraps
//! the previous layer, so the last-registered extension runs outermost. The
//! [`Next`] continuation is consumed by calling it, which makes calling it
//! twice unrepresentable; returning a value without calling it at all is
//! detected and surfaced as an extension-protocol system error.

use crate::error::{Error, ErrorCode, Result};
use crate::flow::FlowContext;
use crate::pod::Pod;
use crate::scope::Scope;
use crate::store::{AnyValue, DataMap};
use async_trait::async_trait;
use futures::future::BoxFuture;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use uuid::Uuid;

/// Whether a `Resolve` operation is an initial resolve or an update write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolveKind {
    /// Factory-producing resolution.
    Resolve,
    /// Update write and its propagation.
    Update,
}

/// Aggregation mode of a parallel batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParallelMode {
    /// First rejection wins.
    All,
    /// Every element carries its own outcome.
    Settled,
}

/// Discriminant of an [`Operation`], for extensions that dispatch on kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationKind {
    /// Scope resolve or update.
    Resolve,
    /// Root flow execution.
    Execute,
    /// Nested flow execution.
    Subflow,
    /// Journaled step.
    Journal,
    /// Parallel batch.
    Parallel,
}

/// Payload describing one observable operation, handed to every wrap layer.
#[derive(Clone)]
#[non_exhaustive]
pub enum Operation {
    /// Scope resolve or update of one descriptor.
    Resolve {
        /// Debug name of the target descriptor.
        executor: Arc<str>,
        /// Resolve or update.
        kind: ResolveKind,
    },
    /// Root flow execution.
    Execute {
        /// Flow name.
        flow: Arc<str>,
        /// Nesting depth (0 at root).
        depth: u32,
        /// Name of the invoking flow, when nested.
        parent_flow: Option<Arc<str>>,
        /// Whether the flow runs inside a parallel batch.
        parallel: bool,
        /// The validated input.
        input: AnyValue,
        /// Identifier of this execution tree.
        execution_id: Uuid,
    },
    /// Nested flow execution.
    Subflow {
        /// Flow name.
        flow: Arc<str>,
        /// Nesting depth.
        depth: u32,
        /// Name of the invoking flow.
        parent_flow: Option<Arc<str>>,
        /// Whether the flow runs inside a parallel batch.
        parallel: bool,
        /// The validated input.
        input: AnyValue,
        /// Identifier of the execution tree this subflow belongs to.
        execution_id: Uuid,
    },
    /// Journaled step inside a flow.
    Journal {
        /// Name of the flow the step runs in.
        flow: Arc<str>,
        /// Step key, unique within the flow's namespace.
        key: Arc<str>,
        /// Identifier of the execution tree.
        execution_id: Uuid,
    },
    /// Parallel batch inside a flow.
    Parallel {
        /// Name of the flow the batch runs in.
        flow: Arc<str>,
        /// Aggregation mode.
        mode: ParallelMode,
        /// Number of elements in the batch.
        count: usize,
    },
}

impl Operation {
    /// The discriminant of this payload.
    pub fn kind(&self) -> OperationKind {
        match self {
            Self::Resolve { .. } => OperationKind::Resolve,
            Self::Execute { .. } => OperationKind::Execute,
            Self::Subflow { .. } => OperationKind::Subflow,
            Self::Journal { .. } => OperationKind::Journal,
            Self::Parallel { .. } => OperationKind::Parallel,
        }
    }

    /// Short human-readable description used in logs.
    pub fn describe(&self) -> String {
        match self {
            Self::Resolve { executor, kind } => match kind {
                ResolveKind::Resolve => format!("resolve {executor}"),
                ResolveKind::Update => format!("update {executor}"),
            },
            Self::Execute { flow, depth, .. } => format!("execute {flow} (depth {depth})"),
            Self::Subflow {
                flow, parent_flow, ..
            } => match parent_flow {
                Some(parent) => format!("subflow {flow} (from {parent})"),
                None => format!("subflow {flow}"),
            },
            Self::Journal { flow, key, .. } => format!("journal {flow}/{key}"),
            Self::Parallel { flow, count, .. } => format!("parallel x{count} in {flow}"),
        }
    }
}

/// The continuation handed to [`Extension::wrap`].
///
/// Consuming `run` makes a double invocation unrepresentable; the chain
/// driver detects the never-invoked case after the wrap layer returns.
pub struct Next {
    fut: BoxFuture<'static, Result<AnyValue>>,
    invoked: Arc<AtomicBool>,
}

impl Next {
    /// Run the rest of the chain and the primitive operation beneath it.
    pub async fn run(self) -> Result<AnyValue> {
        self.invoked.store(true, Ordering::SeqCst);
        self.fut.await
    }
}

/// A named interceptor over scope and flow operations.
#[async_trait]
pub trait Extension: Send + Sync + 'static {
    /// Stable name used in logs and protocol errors.
    fn name(&self) -> &str;

    /// Scope construction hook.
    async fn init(&self, _scope: &Scope) -> Result<()> {
        Ok(())
    }

    /// Scope dispose hook, run in registration order.
    async fn dispose(&self, _scope: &Scope) -> Result<()> {
        Ok(())
    }

    /// Pod fork hook; `seed` is the pod's initial context data.
    async fn init_pod(&self, _pod: &Pod, _seed: &DataMap) -> Result<()> {
        Ok(())
    }

    /// Pod dispose hook.
    async fn dispose_pod(&self, _pod: &Pod) -> Result<()> {
        Ok(())
    }

    /// Middleware around every observable operation. Implementations must
    /// call `next.run()` at most once and return its (possibly transformed)
    /// result; they may catch its rejection and substitute a value.
    async fn wrap(&self, _operation: Operation, next: Next) -> Result<AnyValue> {
        next.run().await
    }

    /// Advisory notification of a resolution error. Never interrupts the
    /// error path.
    async fn on_error(&self, _error: &Error, _scope: &Scope) {}

    /// Advisory notification of a flow rejection on a pod.
    async fn on_pod_error(&self, _error: &Error, _pod: &Pod, _context: &FlowContext) {}
}

/// Fold the wrap chain over `terminal`: registration order, last registered
/// outermost.
pub(crate) fn compose_chain(
    extensions: &[Arc<dyn Extension>],
    operation: Operation,
    terminal: BoxFuture<'static, Result<AnyValue>>,
) -> BoxFuture<'static, Result<AnyValue>> {
    let mut current = terminal;
    for ext in extensions.iter().cloned() {
        let op = operation.clone();
        let inner = current;
        current = Box::pin(async move {
            let invoked = Arc::new(AtomicBool::new(false));
            let next = Next {
                fut: inner,
                invoked: invoked.clone(),
            };
            let result = ext.wrap(op, next).await;
            match result {
                Ok(_) if !invoked.load(Ordering::SeqCst) => Err(Error::system(
                    ErrorCode::ExtensionProtocol,
                    format!(
                        "extension `{}` returned a value without invoking next",
                        ext.name()
                    ),
                )),
                other => other,
            }
        });
    }
    current
}

#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::any_value;
    use parking_lot::Mutex;

    struct Recording {
        name: String,
        log: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl Extension for Recording {
        fn name(&self) -> &str {
            &self.name
        }

        async fn wrap(&self, _operation: Operation, next: Next) -> Result<AnyValue> {
            self.log.lock().push(format!("{}:before", self.name));
            let result = next.run().await;
            self.log.lock().push(format!("{}:after", self.name));
            result
        }
    }

    struct ShortCircuit;

    #[async_trait]
    impl Extension for ShortCircuit {
        fn name(&self) -> &str {
            "short-circuit"
        }

        async fn wrap(&self, _operation: Operation, _next: Next) -> Result<AnyValue> {
            Ok(any_value(0u32))
        }
    }

    struct Suppressing;

    #[async_trait]
    impl Extension for Suppressing {
        fn name(&self) -> &str {
            "suppressing"
        }

        async fn wrap(&self, _operation: Operation, next: Next) -> Result<AnyValue> {
            match next.run().await {
                Ok(value) => Ok(value),
                Err(_) => Ok(any_value("fallback".to_string())),
            }
        }
    }

    fn resolve_op() -> Operation {
        Operation::Resolve {
            executor: Arc::from("target"),
            kind: ResolveKind::Resolve,
        }
    }

    #[tokio::test]
    async fn test_last_registered_runs_outermost() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let extensions: Vec<Arc<dyn Extension>> = vec![
            Arc::new(Recording {
                name: "first".to_string(),
                log: log.clone(),
            }),
            Arc::new(Recording {
                name: "second".to_string(),
                log: log.clone(),
            }),
        ];
        let terminal: BoxFuture<'static, Result<AnyValue>> =
            Box::pin(async { Ok(any_value(1u32)) });
        compose_chain(&extensions, resolve_op(), terminal)
            .await
            .unwrap();
        assert_eq!(
            *log.lock(),
            vec!["second:before", "first:before", "first:after", "second:after"]
        );
    }

    #[tokio::test]
    async fn test_skipping_next_is_a_protocol_error() {
        let extensions: Vec<Arc<dyn Extension>> = vec![Arc::new(ShortCircuit)];
        let terminal: BoxFuture<'static, Result<AnyValue>> =
            Box::pin(async { Ok(any_value(1u32)) });
        let err = compose_chain(&extensions, resolve_op(), terminal)
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::ExtensionProtocol);
        assert!(err.to_string().contains("short-circuit"));
    }

    #[tokio::test]
    async fn test_wrap_may_suppress_errors() {
        let extensions: Vec<Arc<dyn Extension>> = vec![Arc::new(Suppressing)];
        let terminal: BoxFuture<'static, Result<AnyValue>> =
            Box::pin(async { Err(Error::custom("boom")) });
        let value = compose_chain(&extensions, resolve_op(), terminal)
            .await
            .unwrap();
        let text = value.downcast::<String>().unwrap();
        assert_eq!(*text, "fallback");
    }

    #[tokio::test]
    async fn test_empty_chain_is_the_terminal() {
        let terminal: BoxFuture<'static, Result<AnyValue>> =
            Box::pin(async { Ok(any_value(9u32)) });
        let value = compose_chain(&[], resolve_op(), terminal).await.unwrap();
        assert_eq!(*value.downcast::<u32>().unwrap(), 9);
    }

    #[test]
    fn test_operation_kind_mapping() {
        assert_eq!(resolve_op().kind(), OperationKind::Resolve);
        let journal = Operation::Journal {
            flow: Arc::from("orders.place"),
            key: Arc::from("charge"),
            execution_id: Uuid::new_v4(),
        };
        assert_eq!(journal.kind(), OperationKind::Journal);
        assert_eq!(journal.describe(), "journal orders.place/charge");
    }
}
