// Copyright 2026 Dropbox (created by Andrew Yates <ayates@dropbox.com>)

//! Built-in extensions
//!
//! Small, composable extensions shipped with the runtime: [`Telemetry`] logs
//! every wrapped operation through `tracing`, and [`JournalRecorder`] records
//! journaled step keys for inspection in tests and tooling.

mod telemetry;

pub use telemetry::Telemetry;

use crate::error::Result;
use crate::extension::{Extension, Next, Operation};
use crate::store::AnyValue;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;

/// Records the `flow/key` of every journaled step that passes the wrap
/// chain, in invocation order.
#[derive(Clone, Default)]
pub struct JournalRecorder {
    entries: Arc<Mutex<Vec<String>>>,
}

impl JournalRecorder {
    /// Empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Recorded `flow/key` pairs, in invocation order.
    pub fn keys(&self) -> Vec<String> {
        self.entries.lock().clone()
    }
}

#[async_trait]
impl Extension for JournalRecorder {
    fn name(&self) -> &str {
        "journal-recorder"
    }

    async fn wrap(&self, operation: Operation, next: Next) -> Result<AnyValue> {
        if let Operation::Journal { flow, key, .. } = &operation {
            self.entries.lock().push(format!("{flow}/{key}"));
        }
        next.run().await
    }
}
