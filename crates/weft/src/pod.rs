// Copyright 2026 Dropbox (created by Andrew Yates <ayates@dropbox.com>)

//! Pods: short-lived scope forks
//!
//! A [`Pod`] is a scope fork used by flow executions. It resolves like a
//! scope with two overrides: on first touch of a descriptor the parent's
//! cache cell is imported (value and state, factory not re-run), and any
//! reactive dependency encountered during realization is rejected. Writes
//! and releases inside a pod never touch the parent.
//!
//! Pods carry the parent's extension chain; `init_pod`/`dispose_pod` hooks
//! run on fork and on dispose.

use crate::scope::{Scope, ScopeInner};
use crate::store::DataMap;
use std::fmt;
use std::ops::Deref;
use std::sync::Arc;

/// A scope fork with inherited cache, reactive semantics forbidden, and
/// isolated dispose.
#[derive(Clone)]
pub struct Pod {
    scope: Scope,
}

impl Pod {
    pub(crate) fn from_inner(inner: Arc<ScopeInner>) -> Self {
        Self {
            scope: Scope::from_inner(inner),
        }
    }

    pub(crate) fn inner(&self) -> &Arc<ScopeInner> {
        self.scope.inner()
    }

    /// The pod viewed as a scope; every scope operation except reactive
    /// registration is available.
    pub fn as_scope(&self) -> &Scope {
        &self.scope
    }

    /// Context data this pod was seeded with at fork time.
    pub fn seed(&self) -> &DataMap {
        self.scope.inner().seed_data()
    }

    /// Dispose this pod in isolation; the parent scope is untouched.
    pub async fn dispose(&self) -> crate::error::Result<()> {
        self.scope.dispose().await
    }
}

impl Deref for Pod {
    type Target = Scope;

    fn deref(&self) -> &Scope {
        &self.scope
    }
}

impl fmt::Debug for Pod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pod")
            .field("name", &self.scope.name())
            .field("disposed", &self.scope.is_disposed())
            .finish()
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;
    use crate::executor::{derive, provide};
    use crate::scope::{preset, Scope};
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn test_pod_imports_parent_cell_without_rerunning_factory() {
        let runs = Arc::new(AtomicU32::new(0));
        let runs_in_factory = runs.clone();
        let exec = provide(move |_ctl| {
            let runs = runs_in_factory.clone();
            async move { Ok(runs.fetch_add(1, Ordering::SeqCst) + 1) }
        });
        let scope = Scope::new();
        let parent_value = scope.resolve(&exec).await.unwrap();

        let pod = scope.pod().await.unwrap();
        let pod_value = pod.resolve(&exec).await.unwrap();
        assert_eq!(*parent_value, *pod_value);
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_pod_writes_never_reach_the_parent() {
        let exec = provide(|_ctl| async { Ok(1u32) });
        let scope = Scope::new();
        scope.resolve(&exec).await.unwrap();

        let pod = scope.pod().await.unwrap();
        pod.update(&exec, 42).await.unwrap();
        assert_eq!(*pod.resolve(&exec).await.unwrap(), 42);
        assert_eq!(*scope.resolve(&exec).await.unwrap(), 1);

        pod.release(&exec).await.unwrap();
        assert_eq!(*scope.resolve(&exec).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_pod_resolves_fresh_when_parent_has_no_cell() {
        let exec = provide(|_ctl| async { Ok(5u32) });
        let scope = Scope::new();
        let pod = scope.pod().await.unwrap();
        assert_eq!(*pod.resolve(&exec).await.unwrap(), 5);
        // the fresh resolution stayed local to the pod
        let err = scope.release(&exec).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::ReleaseUnresolved);
    }

    #[tokio::test]
    async fn test_reactive_dependency_is_rejected_in_pod() {
        let x = provide(|_ctl| async { Ok(0u32) }).with_name("x");
        let d = derive(x.reactive(), |v, _ctl| async move { Ok(*v + 1) }).with_name("d");
        let scope = Scope::new();
        let pod = scope.pod().await.unwrap();
        let err = pod.resolve(&d).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::ReactiveInPod);
    }

    #[tokio::test]
    async fn test_update_subscription_is_rejected_in_pod() {
        let exec = provide(|_ctl| async { Ok(0u32) });
        let scope = Scope::new();
        let pod = scope.pod().await.unwrap();
        let err = pod.on_update(&exec, |_| {}).unwrap_err();
        assert_eq!(err.code(), ErrorCode::ReactiveInPod);
    }

    #[tokio::test]
    async fn test_pod_presets_overlay_parent_presets() {
        let cfg = provide(|_ctl| async { Ok("prod".to_string()) }).with_name("cfg");
        let scope = Scope::builder()
            .preset(preset(&cfg, "staging".to_string()))
            .build()
            .await
            .unwrap();

        // the parent preset applies inside a plain pod
        let plain = scope.pod().await.unwrap();
        assert_eq!(*plain.resolve(&cfg).await.unwrap(), "staging");

        // a pod-level preset overrides it
        let overridden = scope
            .pod_with(vec![preset(&cfg, "test".to_string())], Vec::new())
            .await
            .unwrap();
        assert_eq!(*overridden.resolve(&cfg).await.unwrap(), "test");
    }

    #[tokio::test]
    async fn test_parent_dispose_disposes_live_pods() {
        let scope = Scope::new();
        let pod = scope.pod().await.unwrap();
        scope.dispose().await.unwrap();
        assert!(pod.is_disposed());
    }

    #[tokio::test]
    async fn test_pod_dispose_leaves_parent_alive() {
        let exec = provide(|_ctl| async { Ok(3u32) });
        let scope = Scope::new();
        scope.resolve(&exec).await.unwrap();
        let pod = scope.pod().await.unwrap();
        pod.resolve(&exec).await.unwrap();
        pod.dispose().await.unwrap();
        assert!(!scope.is_disposed());
        assert_eq!(*scope.resolve(&exec).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_pods_cannot_fork_pods() {
        let scope = Scope::new();
        let pod = scope.pod().await.unwrap();
        assert!(pod.pod().await.is_err());
    }
}
