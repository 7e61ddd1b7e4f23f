// Copyright 2026 Dropbox (created by Andrew Yates <ayates@dropbox.com>)

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
//! Property-based tests for the weft runtime
//!
//! These verify invariants that should hold for all valid inputs, using the
//! proptest framework:
//!
//! 1. **Cleanup order**: cleanups drain in reverse registration order for any
//!    registration count
//! 2. **Meta round-trips**: any value passing a meta's schema reads back
//!    unchanged
//! 3. **Preset identity**: a preset value is returned verbatim and the
//!    factory never runs
//! 4. **Update visibility**: the last of any sequence of updates wins

use parking_lot::Mutex;
use proptest::prelude::*;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use weft::{custom, meta, preset, provide, Meta, MetaEntry, Scope};

fn arb_small_count() -> impl Strategy<Value = usize> {
    1usize..20
}

fn arb_label() -> impl Strategy<Value = String> {
    "[a-z][a-z0-9_.-]{0,30}"
}

proptest! {
    /// Cleanups registered in order 1..n drain in order n..1.
    #[test]
    fn prop_cleanups_drain_lifo(count in arb_small_count()) {
        tokio::runtime::Runtime::new().unwrap().block_on(async {
            let order: Arc<Mutex<Vec<usize>>> = Arc::new(Mutex::new(Vec::new()));
            let order_in_factory = order.clone();
            let exec = provide(move |ctl| {
                let order = order_in_factory.clone();
                async move {
                    for i in 0..count {
                        let order = order.clone();
                        ctl.cleanup(move || order.lock().push(i));
                    }
                    Ok(())
                }
            });

            let scope = Scope::new();
            scope.resolve(&exec).await.unwrap();
            scope.release(&exec).await.unwrap();

            let drained = order.lock().clone();
            let expected: Vec<usize> = (0..count).rev().collect();
            prop_assert_eq!(drained, expected);
            Ok(())
        })?;
    }

    /// Storing a value through a meta and reading it back yields the value.
    #[test]
    fn prop_meta_round_trip(value in any::<i64>(), label in arb_label()) {
        let attribute = Meta::<i64>::unique(&label, custom());
        let entries: Vec<MetaEntry> = vec![attribute.of(value).unwrap()];
        prop_assert_eq!(*attribute.get(&entries).unwrap(), value);
    }

    /// Interned keys agree across independently-built metas.
    #[test]
    fn prop_named_meta_identity(value in any::<u32>(), label in arb_label()) {
        let name = format!("weft/prop.{label}");
        let writer = meta::<u32>(&name, custom());
        let reader = meta::<u32>(&name, custom());
        let entries: Vec<MetaEntry> = vec![writer.of(value).unwrap()];
        prop_assert_eq!(*reader.get(&entries).unwrap(), value);
    }

    /// A value preset is returned verbatim and the factory never runs.
    #[test]
    fn prop_preset_identity(value in any::<u32>()) {
        tokio::runtime::Runtime::new().unwrap().block_on(async {
            let runs = Arc::new(AtomicU32::new(0));
            let runs_in_factory = runs.clone();
            let exec = provide(move |_ctl| {
                let runs = runs_in_factory.clone();
                async move {
                    runs.fetch_add(1, Ordering::SeqCst);
                    Ok(0u32)
                }
            });

            let scope = Scope::builder()
                .preset(preset(&exec, value))
                .build()
                .await
                .unwrap();
            prop_assert_eq!(*scope.resolve(&exec).await.unwrap(), value);
            prop_assert_eq!(runs.load(Ordering::SeqCst), 0);
            Ok(())
        })?;
    }

    /// For any sequence of updates, the final resolve observes the last one.
    #[test]
    fn prop_last_update_wins(values in prop::collection::vec(any::<i64>(), 1..10)) {
        tokio::runtime::Runtime::new().unwrap().block_on(async {
            let exec = provide(|_ctl| async { Ok(0i64) });
            let scope = Scope::new();
            scope.resolve(&exec).await.unwrap();
            for value in &values {
                scope.update(&exec, *value).await.unwrap();
            }
            let last = *values.last().unwrap();
            prop_assert_eq!(*scope.resolve(&exec).await.unwrap(), last);
            Ok(())
        })?;
    }
}
