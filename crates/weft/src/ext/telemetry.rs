// Copyright 2026 Dropbox (created by Andrew Yates <ayates@dropbox.com>)

//! Tracing-based operation telemetry

use crate::error::{Error, Result};
use crate::extension::{Extension, Next, Operation};
use crate::pod::Pod;
use crate::scope::Scope;
use crate::store::AnyValue;
use async_trait::async_trait;
use std::time::Instant;

/// Logs every wrapped operation with its outcome and duration through
/// `tracing`, and error notifications as structured warnings.
#[derive(Clone, Copy, Default)]
pub struct Telemetry;

impl Telemetry {
    /// The telemetry extension.
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Extension for Telemetry {
    fn name(&self) -> &str {
        "telemetry"
    }

    async fn init(&self, scope: &Scope) -> Result<()> {
        tracing::debug!(target: "weft::telemetry", scope = ?scope.name(), "attached");
        Ok(())
    }

    async fn init_pod(&self, pod: &Pod, _seed: &crate::store::DataMap) -> Result<()> {
        tracing::trace!(target: "weft::telemetry", pod = ?pod.name(), "pod forked");
        Ok(())
    }

    async fn wrap(&self, operation: Operation, next: Next) -> Result<AnyValue> {
        let label = operation.describe();
        let started = Instant::now();
        let result = next.run().await;
        let elapsed = started.elapsed();
        match &result {
            Ok(_) => {
                tracing::debug!(target: "weft::telemetry", operation = %label, ?elapsed, "ok");
            }
            Err(err) => {
                tracing::debug!(
                    target: "weft::telemetry",
                    operation = %label,
                    ?elapsed,
                    error = %err,
                    "failed"
                );
            }
        }
        result
    }

    async fn on_error(&self, error: &Error, scope: &Scope) {
        let detail = serde_json::json!({
            "code": error.code(),
            "category": error.category(),
            "executor": error.executor_name(),
        });
        tracing::warn!(
            target: "weft::telemetry",
            scope = ?scope.name(),
            %detail,
            "resolution error"
        );
    }
}
