//! Publish/subscribe topic delivery: one listener bucket per topic symbol,
//! listener invocation in reverse-insertion (LIFO) order, and anonymous
//! (empty-topic) subscribers kept in a separate set reachable only by
//! direct-subscription delivery, never by topic broadcast.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::error::{CoreError, ErrorKind};
use crate::future::{Future, FutureSet, Promise};
use crate::handle::RootId;
use crate::scope::ThreadContext;
use crate::symbol::Symbol;
use crate::value::Value;

/// A listener callback: receives the call payload and returns a result
/// that completes the future the caller was handed.
pub type Callback = Box<dyn Fn(&Value) -> Result<Value, CoreError> + Send + Sync>;

struct Listener {
    id: u64,
    scope_root: RootId,
    callback: Arc<Callback>,
}

/// Opaque subscription identity; releasing the anchoring scope cancels the
/// subscription implicitly (see [`PubSub::drop_scope`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Subscription {
    topic: Symbol,
    id: u64,
}

struct Bucket {
    listeners: Vec<Listener>,
}

/// The pub/sub registry. One instance lives on the shared [`crate::Context`].
pub struct PubSub {
    topics: RwLock<HashMap<Symbol, Bucket>>,
    anonymous: RwLock<Vec<Listener>>,
    next_id: AtomicU64,
}

impl Default for PubSub {
    fn default() -> Self {
        Self::new()
    }
}

impl PubSub {
    pub fn new() -> Self {
        Self {
            topics: RwLock::new(HashMap::new()),
            anonymous: RwLock::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Subscribes `callback` to `topic`, anchored to `scope_root`. An empty
    /// `topic` (`Symbol::NONE`) registers an anonymous, direct-dispatch-only
    /// listener.
    pub fn subscribe(
        &self,
        scope_root: RootId,
        topic: Symbol,
        callback: Callback,
    ) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let listener = Listener {
            id,
            scope_root,
            callback: Arc::new(callback),
        };
        if topic.is_none() {
            self.anonymous.write().push(listener);
        } else {
            self.topics
                .write()
                .entry(topic)
                .or_insert_with(|| Bucket { listeners: Vec::new() })
                .listeners
                .push(listener);
        }
        Subscription { topic, id }
    }

    /// Invokes every listener anchored to `scope_root` and removes them;
    /// called when a [`crate::scope::ModuleScope`] or
    /// [`crate::scope::CallScope`] is released.
    pub fn drop_scope(&self, scope_root: RootId) {
        let mut topics = self.topics.write();
        for bucket in topics.values_mut() {
            bucket.listeners.retain(|l| l.scope_root != scope_root);
        }
        self.anonymous.write().retain(|l| l.scope_root != scope_root);
    }

    /// Invokes the most recently subscribed listener for `topic`, returning
    /// its future, or `None` if the topic has no listeners. Runs the
    /// callback synchronously; callers that want it dispatched onto a
    /// worker thread instead can wrap the call with `TaskManager::submit`.
    pub fn call_topic_first(&self, ctx: &Arc<ThreadContext>, topic: Symbol, data: Value) -> Option<Future> {
        let callback = {
            let topics = self.topics.read();
            topics.get(&topic)?.listeners.last().map(|l| Arc::clone(&l.callback))
        };
        callback.map(|cb| run_one(ctx, &cb, data))
    }

    /// Invokes every listener for `topic`, in reverse-insertion (LIFO)
    /// order, returning all of their futures.
    pub fn call_topic_all(&self, ctx: &Arc<ThreadContext>, topic: Symbol, data: Value) -> FutureSet {
        let callbacks: Vec<Arc<Callback>> = {
            let topics = self.topics.read();
            match topics.get(&topic) {
                Some(bucket) => bucket.listeners.iter().rev().map(|l| Arc::clone(&l.callback)).collect(),
                None => Vec::new(),
            }
        };
        let futures = callbacks
            .iter()
            .map(|cb| run_one(ctx, cb, data.clone()))
            .collect();
        FutureSet::new(futures)
    }

    pub fn listener_count(&self, topic: Symbol) -> usize {
        self.topics.read().get(&topic).map(|b| b.listeners.len()).unwrap_or(0)
    }
}

/// Runs `callback` inside a temp call scope and completes a fresh promise
/// with its result; a panic is converted to a `Callback` error on the
/// future rather than propagating.
fn run_one(ctx: &Arc<ThreadContext>, callback: &Arc<Callback>, data: Value) -> Future {
    let promise = Promise::create();
    let future = promise.future();
    let _scope_guard = ctx.push_call_scope();
    let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| callback(&data)));
    match outcome {
        Ok(Ok(value)) => {
            let _ = promise.set_value(value);
        }
        Ok(Err(err)) => {
            let _ = promise.set_error(err);
        }
        Err(_) => {
            let _ = promise.set_error(CoreError::new(ErrorKind::Callback, "listener callback panicked"));
        }
    }
    future
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handle::HandleTable;
    use std::sync::Arc;

    fn ctx() -> (Arc<HandleTable>, Arc<ThreadContext>) {
        let table = Arc::new(HandleTable::new());
        let ctx = crate::scope::thread_context(&table);
        (table, ctx)
    }

    #[test]
    fn call_topic_first_uses_most_recent_listener() {
        let (table, ctx) = ctx();
        let root = table.create_root();
        let pubsub = PubSub::new();
        let topic = crate::symbol::SymbolTable::new().intern("evt");
        pubsub.subscribe(root, topic, Box::new(|_| Ok(Value::Int(1))));
        pubsub.subscribe(root, topic, Box::new(|_| Ok(Value::Int(2))));
        let future = pubsub.call_topic_first(&ctx, topic, Value::Bool(true)).unwrap();
        assert_eq!(future.get_value().unwrap(), Value::Int(2));
    }

    #[test]
    fn call_topic_all_invokes_in_lifo_order() {
        let (table, ctx) = ctx();
        let root = table.create_root();
        let pubsub = PubSub::new();
        let topic = crate::symbol::SymbolTable::new().intern("evt");
        let order = Arc::new(parking_lot::Mutex::new(Vec::new()));
        for i in 0..3 {
            let order = Arc::clone(&order);
            pubsub.subscribe(
                root,
                topic,
                Box::new(move |_| {
                    order.lock().push(i);
                    Ok(Value::Int(i))
                }),
            );
        }
        let set = pubsub.call_topic_all(&ctx, topic, Value::Bool(true));
        set.wait_all(None);
        assert_eq!(*order.lock(), vec![2, 1, 0]);
    }

    #[test]
    fn drop_scope_removes_its_listeners() {
        let (table, ctx) = ctx();
        let root = table.create_root();
        let pubsub = PubSub::new();
        let topic = crate::symbol::SymbolTable::new().intern("evt");
        pubsub.subscribe(root, topic, Box::new(|_| Ok(Value::Int(1))));
        assert_eq!(pubsub.listener_count(topic), 1);
        pubsub.drop_scope(root);
        assert_eq!(pubsub.listener_count(topic), 0);
        let _ = ctx;
    }
}
