// Copyright 2026 Dropbox (created by Andrew Yates <ayates@dropbox.com>)

//! End-to-end scenarios
//!
//! Each test here drives a whole subsystem through its public surface:
//! diamond-shaped resolution, reactive chains, presets, cleanup on update,
//! reactive-in-pod rejection, and nested flow execution under a recording
//! extension.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use weft::flow::{execute, execute_with, ExecuteOptions, FlowDefinition};
use weft::{derive, preset, provide, AnyValue, Error, ErrorCode};
use weft::{Extension, Next, Operation, OperationKind, Result, Scope};

#[tokio::test]
async fn test_diamond_dependency_resolves_shared_leaf_once() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("weft=debug")
        .try_init();
    let runs = Arc::new(AtomicU32::new(0));
    let runs_in_factory = runs.clone();
    let c = provide(move |_ctl| {
        let runs = runs_in_factory.clone();
        async move { Ok(runs.fetch_add(1, Ordering::SeqCst) + 1) }
    })
    .with_name("c");
    let a = derive(c.clone(), |v, _ctl| async move { Ok(*v) }).with_name("a");
    let b = derive(c.clone(), |v, _ctl| async move { Ok(*v) }).with_name("b");
    let root = derive((a, b), |(left, right), _ctl| async move {
        Ok((*left, *right))
    })
    .with_name("root");

    let scope = Scope::new();
    let (left, right) = *scope.resolve(&root).await.unwrap();
    assert_eq!(left, 1);
    assert_eq!(right, 1);
    assert_eq!(runs.load(Ordering::SeqCst), 1, "c's factory ran once");
}

#[tokio::test]
async fn test_reactive_chain_propagates_updates_layer_by_layer() {
    let y_runs = Arc::new(AtomicU32::new(0));
    let z_runs = Arc::new(AtomicU32::new(0));

    let x = provide(|_ctl| async { Ok(0i64) }).with_name("x");
    let y_runs_in_factory = y_runs.clone();
    let y = derive(x.reactive(), move |v, _ctl| {
        let runs = y_runs_in_factory.clone();
        async move {
            runs.fetch_add(1, Ordering::SeqCst);
            Ok(*v + 1)
        }
    })
    .with_name("y");
    let z_runs_in_factory = z_runs.clone();
    let z = derive(y.reactive(), move |v, _ctl| {
        let runs = z_runs_in_factory.clone();
        async move {
            runs.fetch_add(1, Ordering::SeqCst);
            Ok(*v + 1)
        }
    })
    .with_name("z");

    let scope = Scope::new();
    assert_eq!(*scope.resolve(&z).await.unwrap(), 2);
    assert_eq!(*scope.resolve(&y).await.unwrap(), 1);

    scope.update(&x, 10).await.unwrap();
    assert_eq!(*scope.resolve(&y).await.unwrap(), 11);
    assert_eq!(*scope.resolve(&z).await.unwrap(), 12);
    assert_eq!(y_runs.load(Ordering::SeqCst), 2, "y ran initial + update");
    assert_eq!(z_runs.load(Ordering::SeqCst), 2, "z ran initial + update");
}

#[tokio::test]
async fn test_preset_replacement_short_circuits_the_factory() {
    let cfg_runs = Arc::new(AtomicU32::new(0));
    let cfg_runs_in_factory = cfg_runs.clone();
    let cfg = provide(move |_ctl| {
        let runs = cfg_runs_in_factory.clone();
        async move {
            runs.fetch_add(1, Ordering::SeqCst);
            Ok("prod".to_string())
        }
    })
    .with_name("cfg");
    let svc = derive(cfg.clone(), |c, _ctl| async move { Ok(format!("svc:{c}")) });

    let scope = Scope::builder()
        .preset(preset(&cfg, "test".to_string()))
        .build()
        .await
        .unwrap();
    assert_eq!(*scope.resolve(&svc).await.unwrap(), "svc:test");
    assert_eq!(cfg_runs.load(Ordering::SeqCst), 0, "cfg's factory never ran");
}

#[tokio::test]
async fn test_cleanup_runs_before_each_reactive_rerun() {
    let spy = Arc::new(AtomicU32::new(0));
    let factory_runs = Arc::new(AtomicU32::new(0));

    let x = provide(|_ctl| async { Ok(0i64) }).with_name("x");
    let spy_in_factory = spy.clone();
    let runs_in_factory = factory_runs.clone();
    let d = derive(x.reactive(), move |_v, ctl| {
        let spy = spy_in_factory.clone();
        let runs = runs_in_factory.clone();
        async move {
            ctl.cleanup(move || {
                spy.fetch_add(1, Ordering::SeqCst);
            });
            Ok(runs.fetch_add(1, Ordering::SeqCst))
        }
    })
    .with_name("d");

    let scope = Scope::new();
    scope.resolve(&d).await.unwrap();
    scope.update(&x, 1).await.unwrap();
    scope.update(&x, 2).await.unwrap();

    assert_eq!(spy.load(Ordering::SeqCst), 2, "cleanup ran before each rerun");
    assert_eq!(
        factory_runs.load(Ordering::SeqCst),
        3,
        "factory ran initial + two updates"
    );
}

#[tokio::test]
async fn test_pod_rejects_reactive_dependencies() {
    let x = provide(|_ctl| async { Ok(0i64) }).with_name("x");
    let d = derive(x.reactive(), |v, _ctl| async move { Ok(*v + 1) }).with_name("d");

    let scope = Scope::new();
    let pod = scope.pod().await.unwrap();
    let err = pod.resolve(&d).await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::ReactiveInPod);
    assert_eq!(err.category(), weft::Category::Dependency);
}

struct KindRecorder {
    kinds: Arc<Mutex<Vec<OperationKind>>>,
}

#[async_trait]
impl Extension for KindRecorder {
    fn name(&self) -> &str {
        "kind-recorder"
    }

    async fn wrap(&self, operation: Operation, next: Next) -> Result<AnyValue> {
        self.kinds.lock().push(operation.kind());
        next.run().await
    }
}

#[tokio::test]
async fn test_nested_flow_execution_wraps_execute_then_subflow() {
    let kinds = Arc::new(Mutex::new(Vec::new()));
    let scope = Scope::builder()
        .extension(Arc::new(KindRecorder {
            kinds: kinds.clone(),
        }))
        .build()
        .await
        .unwrap();

    let child =
        FlowDefinition::named("child").handler(|_ctx, input: i64| async move { Ok(input * 2) });
    let parent = FlowDefinition::named("parent").handler({
        let child = child.clone();
        move |ctx, input: i64| {
            let child = child.clone();
            async move { ctx.exec(&child, input + 1).await }
        }
    });

    let options = ExecuteOptions::default().scope(scope.clone());
    assert_eq!(execute_with(&parent, 4, options).await.unwrap(), 10);

    let flow_kinds: Vec<OperationKind> = kinds
        .lock()
        .iter()
        .copied()
        .filter(|kind| matches!(kind, OperationKind::Execute | OperationKind::Subflow))
        .collect();
    assert_eq!(
        flow_kinds,
        vec![OperationKind::Execute, OperationKind::Subflow]
    );
    scope.dispose().await.unwrap();
}

#[tokio::test]
async fn test_flow_rejection_propagates_to_the_caller() {
    let failing: weft::flow::FlowHandler<i64, i64> = FlowDefinition::named("failing")
        .handler(|_ctx, _input: i64| async move { Err(Error::custom("declined")) });
    let err = execute(&failing, 1).await.unwrap_err();
    assert!(err.to_string().contains("declined"));
}
