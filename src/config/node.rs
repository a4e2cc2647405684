//! Config-tree node types: `Topics` (interior) and `Topic` (leaf), plus the
//! shared context every tree operation needs to reach the handle table,
//! symbol table, publish queue, clock, and transaction log.
//!
//! Case-folded keys, timestamped last-writer-wins leaf writes, a bounded
//! validator convergence loop, and notifications that only ever leave a
//! node's lock through the publish queue.

use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::audit::TransactionLog;
use crate::clock::SharedClock;
use crate::error::{bail, CoreError, ErrorKind};
use crate::handle::{Handle, HandleTable, RootId};
use crate::symbol::{Symbol, SymbolTable};
use crate::value::{value_to_json, Container, MapOps, Value};

use super::queue::PublishQueue;
use super::watcher::{ChangeEvent, ConfigWatcher, Watching, WhatHappened};
use super::Timestamp;

const DEFAULT_VALIDATION_LAP_CAP: u32 = 3;

fn fold(key: &str) -> String {
    key.to_ascii_lowercase()
}

/// The subsystems every config-tree operation needs: where nodes are
/// allocated, where path segments are interned, where notifications are
/// serialized, what time it is, and where applied writes are logged. Cheap
/// to clone (a handful of `Arc`s and `Copy` values).
#[derive(Clone)]
pub struct ConfigCtx {
    pub table: Arc<HandleTable>,
    pub symbols: Arc<SymbolTable>,
    pub queue: Arc<PublishQueue>,
    pub root: RootId,
    pub clock: SharedClock,
    pub log: Arc<TransactionLog>,
    pub validation_lap_cap: u32,
}

impl ConfigCtx {
    pub fn now(&self) -> Timestamp {
        Timestamp::from_millis(self.clock.now_millis())
    }
}

impl Default for ConfigCtx {
    /// Builds a standalone context: a fresh handle table, symbol table, and
    /// publish queue, the system clock, an in-memory transaction log, and
    /// the default validation-lap cap. Mainly useful for tests that need a
    /// config tree but don't otherwise have a [`crate::Context`] around.
    fn default() -> Self {
        let table = Arc::new(HandleTable::new());
        let root = table.create_root();
        Self {
            table,
            symbols: Arc::new(SymbolTable::new()),
            queue: PublishQueue::start(),
            root,
            clock: Arc::new(crate::clock::SystemClock),
            log: Arc::new(TransactionLog::default()),
            validation_lap_cap: DEFAULT_VALIDATION_LAP_CAP,
        }
    }
}

/// Either kind of node reachable from a [`Handle`] in the config tree.
#[derive(Clone)]
pub enum Node {
    Interior(Topics),
    Leaf(Topic),
}

struct TopicsState {
    name: Symbol,
    parent: Handle,
    children: Vec<(Symbol, Handle)>,
    watching: Vec<Watching>,
    modtime: Timestamp,
    parent_needs_to_know: bool,
    exclude_tlog: bool,
}

/// An interior config node: a named bag of children, each itself a
/// [`Node`]. Keys are case-folded on intake; lookups fold the query the
/// same way, so the folded form is the key's canonical identity.
#[derive(Clone)]
pub struct Topics {
    state: Arc<Mutex<TopicsState>>,
    self_handle: Arc<std::sync::OnceLock<Handle>>,
}

struct TopicState {
    name: Symbol,
    parent: Handle,
    value: Value,
    modtime: Timestamp,
    exclude_tlog: bool,
}

/// A leaf config node: one timestamped value.
#[derive(Clone)]
pub struct Topic {
    state: Arc<Mutex<TopicState>>,
    self_handle: Arc<std::sync::OnceLock<Handle>>,
}

/// Controls how [`Topics::update_from_map`] reconciles existing children
/// against an incoming map.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateDirective {
    /// Existing children absent from the incoming map are left alone.
    Merge,
    /// Existing children absent from the incoming map are removed.
    Replace,
}

impl Topics {
    fn new(ctx: &ConfigCtx, name: Symbol, parent: Handle, exclude_tlog: bool) -> Self {
        Self {
            state: Arc::new(Mutex::new(TopicsState {
                name,
                parent,
                children: Vec::new(),
                watching: Vec::new(),
                modtime: ctx.now(),
                parent_needs_to_know: true,
                exclude_tlog,
            })),
            self_handle: Arc::new(std::sync::OnceLock::new()),
        }
    }

    fn exclude_tlog(&self) -> bool {
        self.state.lock().exclude_tlog
    }

    fn bind_handle(&self, handle: Handle) {
        let _ = self.self_handle.set(handle);
    }

    pub fn handle(&self) -> Handle {
        *self.self_handle.get().expect("Topics bound to a handle at creation")
    }

    pub fn name(&self) -> Symbol {
        self.state.lock().name
    }

    pub fn mod_time(&self) -> Timestamp {
        self.state.lock().modtime
    }

    /// Creates the tree's root interior node, anchored under `ctx.root`.
    pub fn new_root(ctx: &ConfigCtx) -> Result<Topics, CoreError> {
        let topics = Topics::new(ctx, Symbol::NONE, Handle::NULL, false);
        let handle = ctx.table.create(ctx.root, Node::Interior(topics.clone()))?;
        topics.bind_handle(handle);
        Ok(topics)
    }

    /// Excludes this node's writes from transaction-log notification, the
    /// way a plugin marks a subtree as write-only scratch state.
    pub fn set_exclude_tlog(&self, exclude: bool) {
        self.state.lock().exclude_tlog = exclude;
    }

    pub fn set_parent_needs_to_know(&self, needs: bool) {
        self.state.lock().parent_needs_to_know = needs;
    }

    fn child_topics(&self, ctx: &ConfigCtx, name: Symbol) -> Option<Topics> {
        let handle = {
            let state = self.state.lock();
            state.children.iter().find(|(n, _)| *n == name).map(|(_, h)| *h)
        }?;
        match ctx.table.lookup::<Node>(handle)? {
            Node::Interior(t) => Some(t),
            Node::Leaf(_) => None,
        }
    }

    fn child(&self, ctx: &ConfigCtx, name: Symbol) -> Option<Topic> {
        let handle = {
            let state = self.state.lock();
            state.children.iter().find(|(n, _)| *n == name).map(|(_, h)| *h)
        }?;
        match ctx.table.lookup::<Node>(handle)? {
            Node::Leaf(t) => Some(t),
            Node::Interior(_) => None,
        }
    }

    /// Returns the interior child named `name`, creating it if absent.
    /// Fails if `name` already names a leaf.
    pub fn create_interior_child(&self, ctx: &ConfigCtx, name: &str) -> Result<Topics, CoreError> {
        let folded = fold(name);
        let sym = ctx.symbols.intern(&folded);
        if let Some(existing) = self.child_topics(ctx, sym) {
            return Ok(existing);
        }
        if self.child(ctx, sym).is_some() {
            bail!(ErrorKind::InvalidContainer, "config key {folded:?} already holds a leaf value");
        }
        let excluded = folded.starts_with('_') || self.exclude_tlog();
        let child = Topics::new(ctx, sym, self.handle(), excluded);
        let handle = ctx.table.create(ctx.root, Node::Interior(child.clone()))?;
        child.bind_handle(handle);
        self.state.lock().children.push((sym, handle));
        Ok(child)
    }

    /// Returns the leaf child named `name`, creating it if absent. Fails if
    /// `name` already names an interior node.
    pub fn create_topic(&self, ctx: &ConfigCtx, name: &str) -> Result<Topic, CoreError> {
        let folded = fold(name);
        let sym = ctx.symbols.intern(&folded);
        if let Some(existing) = self.child(ctx, sym) {
            return Ok(existing);
        }
        if self.child_topics(ctx, sym).is_some() {
            bail!(ErrorKind::InvalidContainer, "config key {folded:?} already holds an interior node");
        }
        let excluded = folded.starts_with('_') || self.exclude_tlog();
        let child = Topic::new(sym, self.handle(), excluded);
        let handle = ctx.table.create(ctx.root, Node::Leaf(child.clone()))?;
        child.bind_handle(handle);
        self.state.lock().children.push((sym, handle));
        Ok(child)
    }

    /// Walks `path` from this node, creating any missing interior nodes
    /// along the way, and returns the interior node it ends on.
    pub fn lookup_topics(&self, ctx: &ConfigCtx, path: &[&str]) -> Result<Topics, CoreError> {
        let mut current = self.clone();
        for segment in path {
            current = current.create_interior_child(ctx, segment)?;
        }
        Ok(current)
    }

    /// Walks `path` from this node, creating any missing nodes (interior
    /// and the final leaf) along the way.
    pub fn lookup(&self, ctx: &ConfigCtx, path: &[&str]) -> Result<Topic, CoreError> {
        let Some((leaf, parents)) = path.split_last() else {
            bail!(ErrorKind::InvalidArgument, "lookup path must not be empty");
        };
        let parent = self.lookup_topics(ctx, parents)?;
        parent.create_topic(ctx, leaf)
    }

    /// Like [`Topics::lookup_topics`], but never creates; returns `None` if
    /// any segment of `path` does not already exist.
    pub fn find_topics(&self, ctx: &ConfigCtx, path: &[&str]) -> Option<Topics> {
        let mut current = self.clone();
        for segment in path {
            let folded = fold(segment);
            let sym = ctx.symbols.lookup_if_exists(&folded)?;
            current = current.child_topics(ctx, sym)?;
        }
        Some(current)
    }

    /// Like [`Topics::lookup`], but never creates; returns `None` if any
    /// segment of `path` does not already exist.
    pub fn find(&self, ctx: &ConfigCtx, path: &[&str]) -> Option<Topic> {
        let (leaf, parents) = path.split_last()?;
        let parent = self.find_topics(ctx, parents)?;
        let folded = fold(leaf);
        let sym = ctx.symbols.lookup_if_exists(&folded)?;
        parent.child(ctx, sym)
    }

    /// Applies every entry of `map` under this node: nested maps become (or
    /// reuse) interior children, scalars become (or update) leaves, each
    /// written with `timestamp` under last-writer-wins. With
    /// [`UpdateDirective::Replace`], existing children absent from `map`
    /// are removed afterward.
    pub fn update_from_map(
        &self,
        ctx: &ConfigCtx,
        map: &Container,
        directive: UpdateDirective,
        timestamp: Timestamp,
    ) -> Result<(), CoreError> {
        if !map.is_map() {
            bail!(ErrorKind::InvalidArgument, "update_from_map requires a map container");
        }
        let mut seen = Vec::new();
        for key in map.keys() {
            let key_name = ctx.symbols.lookup(key).unwrap_or_default();
            let folded = fold(&key_name);
            let sym = ctx.symbols.intern(&folded);
            seen.push(sym);
            let value = map.get(key).expect("key came from Container::keys");

            let nested_map = match &value {
                Value::Handle(h) => ctx.table.lookup::<Container>(*h).filter(Container::is_map),
                _ => None,
            };
            match nested_map {
                Some(nested) => {
                    let child_topics = self.create_interior_child(ctx, &folded)?;
                    child_topics.update_from_map(ctx, &nested, directive, timestamp)?;
                }
                None => {
                    let topic = self.create_topic(ctx, &folded)?;
                    topic.with_newer_value(ctx, timestamp, value, true, true)?;
                }
            }
        }
        if directive == UpdateDirective::Replace {
            let stale: Vec<Symbol> = {
                let state = self.state.lock();
                state
                    .children
                    .iter()
                    .map(|(n, _)| *n)
                    .filter(|n| !seen.contains(n))
                    .collect()
            };
            for name in stale {
                self.remove_child(ctx, name)?;
            }
        }
        Ok(())
    }

    /// Registers `watcher` to fire when a direct child whose name is `subkey`
    /// (or any direct child, if `subkey` is [`Symbol::NONE`]) experiences any
    /// of `reasons`.
    pub fn add_watcher(&self, subkey: Symbol, reasons: WhatHappened, watcher: Weak<dyn ConfigWatcher>) {
        let mut state = self.state.lock();
        state.watching.retain(|w| !w.expired());
        state.watching.push(Watching { subkey, reasons, watcher });
    }

    fn remove_child_handle(&self, name: Symbol) -> Option<Handle> {
        let mut state = self.state.lock();
        let idx = state.children.iter().position(|(n, _)| *n == name)?;
        Some(state.children.remove(idx).1)
    }

    /// Removes the direct child named `name`, releasing its handle and
    /// notifying watchers. A no-op if no such child exists.
    pub fn remove_child(&self, ctx: &ConfigCtx, name: Symbol) -> Result<(), CoreError> {
        let Some(handle) = self.remove_child_handle(name) else {
            return Ok(());
        };
        ctx.table.release(ctx.root, handle);
        notify(ctx, self.clone(), name, WhatHappened::CHILD_REMOVED);
        Ok(())
    }

    /// Detaches this interior node from its parent.
    pub fn remove(&self, ctx: &ConfigCtx) -> Result<(), CoreError> {
        let (parent_handle, name) = {
            let state = self.state.lock();
            (state.parent, state.name)
        };
        if let Some(Node::Interior(parent)) = ctx.table.lookup::<Node>(parent_handle) {
            parent.remove_child(ctx, name)?;
        }
        Ok(())
    }
}

impl Topic {
    fn new(name: Symbol, parent: Handle, exclude_tlog: bool) -> Self {
        Self {
            state: Arc::new(Mutex::new(TopicState {
                name,
                parent,
                value: Value::Str(String::new()),
                modtime: Timestamp::NEVER,
                exclude_tlog,
            })),
            self_handle: Arc::new(std::sync::OnceLock::new()),
        }
    }

    fn bind_handle(&self, handle: Handle) {
        let _ = self.self_handle.set(handle);
    }

    pub fn handle(&self) -> Handle {
        *self.self_handle.get().expect("Topic bound to a handle at creation")
    }

    pub fn name(&self) -> Symbol {
        self.state.lock().name
    }

    pub fn value(&self) -> Value {
        self.state.lock().value.clone()
    }

    pub fn mod_time(&self) -> Timestamp {
        self.state.lock().modtime
    }

    /// Last-writer-wins write rule:
    ///
    /// - if `proposed` equals the current value and `proposed_time` would
    ///   not strictly advance the clock under `allow_increase_if_unchanged`,
    ///   the write is a no-op;
    /// - otherwise, if `proposed_time` is older than the current timestamp
    ///   and `allow_decrease` is false, the write is a no-op;
    /// - otherwise, the parent's validators get up to `ctx.validation_lap_cap`
    ///   passes to rewrite `proposed` until it stops changing, the value and
    ///   timestamp are committed and (unless this node is tlog-excluded)
    ///   appended to `ctx.log`, and watchers are notified through the
    ///   publish queue.
    pub fn with_newer_value(
        &self,
        ctx: &ConfigCtx,
        proposed_time: Timestamp,
        proposed: Value,
        allow_decrease: bool,
        allow_increase_if_unchanged: bool,
    ) -> Result<(), CoreError> {
        let (current, current_time, parent_handle, name) = {
            let state = self.state.lock();
            (state.value.clone(), state.modtime, state.parent, state.name)
        };

        let unchanged = current == proposed;
        if unchanged && !(allow_increase_if_unchanged && proposed_time > current_time) {
            return Ok(());
        }
        if proposed_time < current_time && !allow_decrease {
            return Ok(());
        }

        let parent = ctx.table.lookup::<Node>(parent_handle).and_then(|n| match n {
            Node::Interior(t) => Some(t),
            Node::Leaf(_) => None,
        });

        let mut value = proposed;
        if let Some(parent) = &parent {
            for _ in 0..ctx.validation_lap_cap {
                let validators: Vec<Arc<dyn ConfigWatcher>> = {
                    let mut state = parent.state.lock();
                    state.watching.retain(|w| !w.expired());
                    state
                        .watching
                        .iter()
                        .filter(|w| w.should_fire(name, WhatHappened::VALIDATION))
                        .filter_map(|w| w.upgrade())
                        .collect()
                };
                if validators.is_empty() {
                    break;
                }
                let mut changed = false;
                for validator in &validators {
                    if let Some(rewritten) = validator.validate(name, &value, &current) {
                        if rewritten != value {
                            value = rewritten;
                            changed = true;
                        }
                    }
                }
                if !changed {
                    break;
                }
            }
        }

        let excluded = {
            let mut state = self.state.lock();
            state.value = value.clone();
            state.modtime = proposed_time;
            state.exclude_tlog
        };

        if !excluded {
            let path = full_path(ctx, name, parent_handle);
            let path_refs: Vec<&str> = path.iter().map(String::as_str).collect();
            let json = value_to_json(&value, &ctx.table, &ctx.symbols);
            ctx.log.append(&path_refs, json, proposed_time)?;
        }

        if let Some(parent) = parent {
            let reason = if unchanged {
                WhatHappened::TIMESTAMP_UPDATED
            } else {
                WhatHappened::CHANGED | WhatHappened::TIMESTAMP_UPDATED
            };
            notify(ctx, parent, name, reason);
        }

        Ok(())
    }

    pub fn add_watcher(&self, ctx: &ConfigCtx, reasons: WhatHappened, watcher: Weak<dyn ConfigWatcher>) {
        let (parent_handle, name) = {
            let state = self.state.lock();
            (state.parent, state.name)
        };
        if let Some(Node::Interior(parent)) = ctx.table.lookup::<Node>(parent_handle) {
            parent.add_watcher(name, reasons, watcher);
        }
    }

    /// Detaches this leaf from its parent.
    pub fn remove(&self, ctx: &ConfigCtx) -> Result<(), CoreError> {
        let (parent_handle, name) = {
            let state = self.state.lock();
            (state.parent, state.name)
        };
        if let Some(Node::Interior(parent)) = ctx.table.lookup::<Node>(parent_handle) {
            parent.remove_child(ctx, name)?;
        }
        Ok(())
    }
}

/// Builds the full dotted-path segments of a leaf named `name` under
/// `parent_handle`, walking up through ancestor interior nodes to the
/// (unnamed) root. Used to label a [`crate::audit::TransactionLog`] entry.
fn full_path(ctx: &ConfigCtx, name: Symbol, parent_handle: Handle) -> Vec<String> {
    let mut segments = vec![ctx.symbols.lookup(name).unwrap_or_default()];
    let mut current = parent_handle;
    while !current.is_null() {
        let Some(Node::Interior(topics)) = ctx.table.lookup::<Node>(current) else { break };
        let (parent_name, grandparent) = {
            let state = topics.state.lock();
            (state.name, state.parent)
        };
        if parent_name != Symbol::NONE {
            segments.push(ctx.symbols.lookup(parent_name).unwrap_or_default());
        }
        current = grandparent;
    }
    segments.reverse();
    segments
}

/// Enqueues a watcher notification on `ctx.queue`: fires `parent`'s
/// matching watchers for `subkey`/`reason`, then — while
/// `parent_needs_to_know` holds and the node is not tlog-excluded —
/// propagates a `CHILD_CHANGED` notification up through ancestors. Runs
/// off the caller's thread so no config-node lock is ever held while
/// user code executes.
fn notify(ctx: &ConfigCtx, parent: Topics, subkey: Symbol, reason: WhatHappened) {
    let table = Arc::clone(&ctx.table);
    ctx.queue.publish(move || propagate(&table, parent, subkey, reason));
}

fn propagate(table: &HandleTable, topics: Topics, subkey: Symbol, reason: WhatHappened) {
    fire_watchers(&topics, subkey, reason);
    let (parent_handle, needs_parent, excluded) = {
        let state = topics.state.lock();
        (state.parent, state.parent_needs_to_know, state.exclude_tlog)
    };
    if excluded || !needs_parent || parent_handle.is_null() {
        return;
    }
    if let Some(Node::Interior(grandparent)) = table.lookup::<Node>(parent_handle) {
        let my_name = topics.name();
        propagate(table, grandparent, my_name, WhatHappened::CHILD_CHANGED);
    }
}

fn fire_watchers(topics: &Topics, subkey: Symbol, reason: WhatHappened) {
    let watchers: Vec<Arc<dyn ConfigWatcher>> = {
        let mut state = topics.state.lock();
        state.watching.retain(|w| !w.expired());
        state
            .watching
            .iter()
            .filter(|w| w.should_fire(subkey, reason))
            .filter_map(|w| w.upgrade())
            .collect()
    };
    let event = ChangeEvent { subkey, reason, path: Vec::new() };
    for watcher in watchers {
        watcher.on_change(&event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::watcher::FnWatcher;

    fn ctx_with_root() -> (ConfigCtx, Topics) {
        let ctx = ConfigCtx::default();
        let root = Topics::new_root(&ctx).unwrap();
        (ctx, root)
    }

    #[test]
    fn lookup_creates_path_and_find_does_not() {
        let (ctx, root) = ctx_with_root();
        let topic = root.lookup(&ctx, &["services", "mqtt", "port"]).unwrap();
        topic.with_newer_value(&ctx, Timestamp::from_millis(10), Value::Int(1883), true, true).unwrap();

        assert!(root.find(&ctx, &["services", "mqtt", "port"]).is_some());
        assert!(root.find(&ctx, &["services", "mqtt", "missing"]).is_none());
        ctx.queue.stop();
    }

    #[test]
    fn older_write_rejected_without_allow_decrease() {
        let (ctx, root) = ctx_with_root();
        let topic = root.lookup(&ctx, &["level"]).unwrap();
        topic.with_newer_value(&ctx, Timestamp::from_millis(100), Value::Int(2), false, true).unwrap();
        topic.with_newer_value(&ctx, Timestamp::from_millis(50), Value::Int(3), false, true).unwrap();
        assert_eq!(topic.value(), Value::Int(2));
        ctx.queue.stop();
    }

    #[test]
    fn same_value_without_increase_flag_is_noop() {
        let (ctx, root) = ctx_with_root();
        let topic = root.lookup(&ctx, &["flag"]).unwrap();
        topic.with_newer_value(&ctx, Timestamp::from_millis(10), Value::Bool(true), true, true).unwrap();
        topic.with_newer_value(&ctx, Timestamp::from_millis(999), Value::Bool(true), true, false).unwrap();
        assert_eq!(topic.mod_time(), Timestamp::from_millis(10));
        ctx.queue.stop();
    }

    #[test]
    fn watcher_fires_on_change_through_publish_queue() {
        let (ctx, root) = ctx_with_root();
        let topic = root.lookup_topics(&ctx, &["svc"]).unwrap().create_topic(&ctx, "name").unwrap();
        let seen = Arc::new(Mutex::new(None));
        let seen2 = Arc::clone(&seen);
        let watcher: Arc<dyn ConfigWatcher> = Arc::new(FnWatcher::new(move |event: &ChangeEvent| {
            *seen2.lock() = Some(event.reason);
        }));
        topic.add_watcher(&ctx, WhatHappened::CHANGED, Arc::downgrade(&watcher));

        topic.with_newer_value(&ctx, Timestamp::from_millis(5), Value::Str("edge".into()), true, true).unwrap();
        ctx.queue.drain();
        let reason = seen.lock().expect("watcher fired");
        assert!(reason.contains(WhatHappened::CHANGED));
        ctx.queue.stop();
    }

    #[test]
    fn validator_rewrites_proposed_value() {
        let (ctx, root) = ctx_with_root();
        let topics = root.lookup_topics(&ctx, &[]).unwrap();
        let topic = topics.create_topic(&ctx, "clamped").unwrap();
        let validator: Arc<dyn ConfigWatcher> = Arc::new(crate::config::watcher::FnValidator::new(
            |_subkey, proposed: &Value, _current: &Value| match proposed {
                Value::Int(n) if *n > 10 => Some(Value::Int(10)),
                _ => None,
            },
        ));
        topics.add_watcher(topic.name(), WhatHappened::VALIDATION, Arc::downgrade(&validator));

        topic.with_newer_value(&ctx, Timestamp::from_millis(1), Value::Int(99), true, true).unwrap();
        assert_eq!(topic.value(), Value::Int(10));
        ctx.queue.stop();
    }

    #[test]
    fn update_from_map_replace_drops_unlisted_children() {
        let (ctx, root) = ctx_with_root();
        root.create_topic(&ctx, "keep").unwrap();
        root.create_topic(&ctx, "drop_me").unwrap();

        let incoming = Container::new_map();
        let key = ctx.symbols.intern("keep");
        incoming.put(&ctx.table, key, Value::Int(1)).unwrap();

        root.update_from_map(&ctx, &incoming, UpdateDirective::Replace, Timestamp::from_millis(1)).unwrap();
        assert!(root.find(&ctx, &["keep"]).is_some());
        assert!(root.find(&ctx, &["drop_me"]).is_none());
        ctx.queue.stop();
    }

    #[test]
    fn underscore_prefixed_leaf_is_tlog_excluded() {
        let (ctx, root) = ctx_with_root();
        let topic = root.create_topic(&ctx, "_scratch").unwrap();
        topic.with_newer_value(&ctx, Timestamp::from_millis(1), Value::Int(1), true, true).unwrap();
        assert!(ctx.log.flush().is_ok());
        assert_eq!(root.find(&ctx, &["_scratch"]).unwrap().value(), Value::Int(1));
        ctx.queue.stop();
    }

    #[test]
    fn child_of_excluded_node_is_also_excluded() {
        let (ctx, root) = ctx_with_root();
        let scratch = root.create_interior_child(&ctx, "_scratch").unwrap();
        let nested = scratch.create_topic(&ctx, "value").unwrap();
        assert!(nested.state.lock().exclude_tlog);
        ctx.queue.stop();
    }

    #[test]
    fn applied_write_is_appended_to_the_transaction_log() {
        let table = Arc::new(HandleTable::new());
        let root_id = table.create_root();
        let recorder = Arc::new(crate::audit::InMemoryAuditRecorder::new());
        let ctx = ConfigCtx {
            table,
            symbols: Arc::new(SymbolTable::new()),
            queue: PublishQueue::start(),
            root: root_id,
            clock: Arc::new(crate::clock::SystemClock),
            log: Arc::new(TransactionLog::new(Arc::clone(&recorder) as Arc<dyn crate::audit::AuditRecorder>)),
            validation_lap_cap: DEFAULT_VALIDATION_LAP_CAP,
        };
        let root = Topics::new_root(&ctx).unwrap();

        let topic = root.lookup(&ctx, &["net", "port"]).unwrap();
        topic.with_newer_value(&ctx, Timestamp::from_millis(42), Value::Int(1883), true, true).unwrap();

        let entries = recorder.entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].path, vec!["net".to_string(), "port".to_string()]);
        assert_eq!(entries[0].value, serde_json::json!(1883));
        ctx.queue.stop();
    }

    #[test]
    fn tlog_excluded_write_is_not_appended() {
        let table = Arc::new(HandleTable::new());
        let root_id = table.create_root();
        let recorder = Arc::new(crate::audit::InMemoryAuditRecorder::new());
        let ctx = ConfigCtx {
            table,
            symbols: Arc::new(SymbolTable::new()),
            queue: PublishQueue::start(),
            root: root_id,
            clock: Arc::new(crate::clock::SystemClock),
            log: Arc::new(TransactionLog::new(Arc::clone(&recorder) as Arc<dyn crate::audit::AuditRecorder>)),
            validation_lap_cap: DEFAULT_VALIDATION_LAP_CAP,
        };
        let root = Topics::new_root(&ctx).unwrap();

        let topic = root.create_topic(&ctx, "_scratch").unwrap();
        topic.with_newer_value(&ctx, Timestamp::from_millis(1), Value::Int(1), true, true).unwrap();
        assert!(recorder.entries().is_empty());
        ctx.queue.stop();
    }
}
