//! End-to-end scenarios exercising symbol interning, handle release, the
//! container cycle check, promise continuations, task stealing, and config
//! write ordering together, the way a plugin host would actually drive
//! this crate rather than exercising one module in isolation.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use meridian_core::config::{Timestamp, UpdateDirective};
use meridian_core::handle::HandleTable;
use meridian_core::symbol::SymbolTable;
use meridian_core::task::{TaskManager, TaskSpec};
use meridian_core::value::{Container, MapOps, Value};
use meridian_core::{Context, CoreConfig};

#[test]
fn intern_round_trip() {
    let symbols = SymbolTable::new();
    let s1 = symbols.intern("foo");
    let s2 = symbols.intern("foo");
    assert_eq!(s1, s2);
    assert_eq!(symbols.lookup(s1).as_deref(), Some("foo"));
    let s3 = symbols.intern("Foo");
    assert_ne!(s3, s1);
}

#[test]
fn handle_release_destroys_the_object() {
    let table = HandleTable::new();
    let root = table.create_root();
    let handle = table.create(root, "payload".to_string()).unwrap();
    assert_eq!(table.lookup::<String>(handle).as_deref(), Some("payload"));
    table.release_root(root);
    assert!(table.lookup::<String>(handle).is_none());
}

#[test]
fn cycle_is_rejected_and_leaves_the_map_unchanged() {
    let table = HandleTable::new();
    let root = table.create_root();
    let a = Container::new_map();
    let a_handle = a.create_handle(&table, root).unwrap();
    let b = Container::new_map();
    let b_handle = b.create_handle(&table, root).unwrap();

    let symbols = SymbolTable::new();
    let x = symbols.intern("x");
    a.put(&table, x, Value::Handle(b_handle)).unwrap();

    let y = symbols.intern("y");
    let err = b.put(&table, y, Value::Handle(a_handle)).unwrap_err();
    assert_eq!(err.kind(), meridian_core::ErrorKind::Cycle);
    assert!(!b.has_key(y));
}

#[test]
fn promise_continuation_runs_exactly_once_from_another_thread() {
    use meridian_core::future::Promise;

    let promise = Promise::create();
    let future = promise.future();
    let calls = Arc::new(AtomicUsize::new(0));
    let calls2 = Arc::clone(&calls);
    future.when_valid(move |result| {
        assert_eq!(result.as_ref().unwrap(), &Value::Int(42));
        calls2.fetch_add(1, Ordering::SeqCst);
    });

    let handle = std::thread::spawn(move || {
        promise.set_value(Value::Int(42)).unwrap();
    });
    handle.join().unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[test]
fn task_stealing_lets_a_single_worker_resolve_a_waiting_pair() {
    let manager = TaskManager::start(1);

    let (id_b, future_b) = manager.queue_task(TaskSpec::new(Box::new(|| Ok(Value::Int(2)))));
    let manager_for_a = Arc::clone(&manager);
    let future_b_for_a = future_b.clone();
    let (_, future_a) = manager.queue_task(TaskSpec::new(Box::new(move || {
        manager_for_a.wait_for_completion(&future_b_for_a, Some(Duration::from_secs(2)));
        Ok(Value::Int(1))
    })));

    assert!(manager.wait_for_completion(&future_a, Some(Duration::from_secs(2))));
    assert!(manager.wait_for_completion(&future_b, Some(Duration::from_secs(2))));
    assert_eq!(future_a.get_value().unwrap(), Value::Int(1));
    assert_eq!(future_b.get_value().unwrap(), Value::Int(2));
    let _ = id_b;
    manager.shutdown_and_wait();
}

#[test]
fn config_write_ordering_keeps_the_newer_value_and_fires_once() {
    let ctx = Context::new().unwrap();
    let topic = ctx.config_root().lookup(ctx.config_ctx(), &["k"]).unwrap();

    let notifications = Arc::new(std::sync::atomic::AtomicUsize::new(0));
    let notifications2 = Arc::clone(&notifications);
    let watcher: Arc<dyn meridian_core::config::ConfigWatcher> =
        Arc::new(meridian_core::config::FnWatcher::new(move |_event: &meridian_core::config::ChangeEvent| {
            notifications2.fetch_add(1, Ordering::SeqCst);
        }));
    topic.add_watcher(ctx.config_ctx(), meridian_core::config::WhatHappened::CHANGED, Arc::downgrade(&watcher));

    topic.with_newer_value(ctx.config_ctx(), Timestamp::from_millis(100), Value::Str("a".into()), false, true).unwrap();
    topic.with_newer_value(ctx.config_ctx(), Timestamp::from_millis(50), Value::Str("b".into()), false, true).unwrap();
    ctx.config_ctx().queue.drain();

    assert_eq!(topic.value(), Value::Str("a".into()));
    assert_eq!(topic.mod_time(), Timestamp::from_millis(100));
    assert_eq!(notifications.load(Ordering::SeqCst), 1);
    ctx.shutdown();
}

#[test]
fn update_from_map_respects_merge_and_replace() {
    let ctx = Context::new().unwrap();
    let root = ctx.config_root();

    root.create_topic(ctx.config_ctx(), "keep").unwrap();
    root.create_topic(ctx.config_ctx(), "also_keep").unwrap();

    let incoming = Container::new_map();
    let key = ctx.symbols().intern("keep");
    incoming.put(ctx.handles(), key, Value::Int(1)).unwrap();

    root.update_from_map(ctx.config_ctx(), &incoming, UpdateDirective::Merge, ctx.now()).unwrap();
    assert!(root.find(ctx.config_ctx(), &["keep"]).is_some());
    assert!(root.find(ctx.config_ctx(), &["also_keep"]).is_some());

    root.update_from_map(ctx.config_ctx(), &incoming, UpdateDirective::Replace, ctx.now()).unwrap();
    assert!(root.find(ctx.config_ctx(), &["keep"]).is_some());
    assert!(root.find(ctx.config_ctx(), &["also_keep"]).is_none());

    ctx.shutdown();
}

#[test]
fn a_host_can_run_two_independent_module_scopes_side_by_side() {
    let ctx = Context::with_config(CoreConfig::new().worker_count(2)).unwrap();
    let scope_a = ctx.new_module_scope();
    let scope_b = ctx.new_module_scope();

    let handle_a = scope_a.create(Value::Int(1)).unwrap();
    let handle_b = scope_b.create(Value::Int(2)).unwrap();

    drop(scope_a);
    assert!(ctx.handles().lookup::<Value>(handle_a).is_none());
    assert!(ctx.handles().lookup::<Value>(handle_b).is_some());
    drop(scope_b);
    assert!(ctx.handles().lookup::<Value>(handle_b).is_none());

    ctx.shutdown();
}
