//! Config watchers: the (subKey, reason-mask, callback) triples an interior
//! node holds, and the bitmask of reasons a watcher can fire on.

use std::sync::Arc;

use crate::symbol::Symbol;
use crate::value::Value;

/// Bitmask of reasons a watcher may fire on. A watcher with an empty subKey
/// fires on any direct child event matching its mask.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WhatHappened(u8);

impl WhatHappened {
    pub const CHANGED: WhatHappened = WhatHappened(1 << 0);
    pub const CHILD_CHANGED: WhatHappened = WhatHappened(1 << 1);
    pub const CHILD_REMOVED: WhatHappened = WhatHappened(1 << 2);
    pub const TIMESTAMP_UPDATED: WhatHappened = WhatHappened(1 << 3);
    pub const VALIDATION: WhatHappened = WhatHappened(1 << 4);
    pub const INITIALIZED: WhatHappened = WhatHappened(1 << 5);
    pub const NEVER: WhatHappened = WhatHappened(0);

    pub const fn contains(self, other: WhatHappened) -> bool {
        self.0 & other.0 != 0
    }

    pub const fn union(self, other: WhatHappened) -> WhatHappened {
        WhatHappened(self.0 | other.0)
    }
}

impl std::ops::BitOr for WhatHappened {
    type Output = WhatHappened;
    fn bitor(self, rhs: WhatHappened) -> WhatHappened {
        self.union(rhs)
    }
}

/// Event delivered to a watcher's [`ConfigWatcher::on_change`].
#[derive(Debug, Clone)]
pub struct ChangeEvent {
    pub subkey: Symbol,
    pub reason: WhatHappened,
    pub path: Vec<String>,
}

/// A registered watcher. `validate` is consulted only for writes to a leaf
/// matching this watcher's subKey while `reasons` includes
/// [`WhatHappened::VALIDATION`]; `on_change` is consulted for every other
/// matching reason, always via the publish queue, never synchronously.
pub trait ConfigWatcher: Send + Sync {
    fn on_change(&self, _event: &ChangeEvent) {}

    fn validate(&self, _subkey: Symbol, _proposed: &Value, _current: &Value) -> Option<Value> {
        None
    }
}

/// Function-backed watcher for the common case of a plain notification
/// callback with no validation behavior.
pub struct FnWatcher<F: Fn(&ChangeEvent) + Send + Sync> {
    f: F,
}

impl<F: Fn(&ChangeEvent) + Send + Sync> FnWatcher<F> {
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

impl<F: Fn(&ChangeEvent) + Send + Sync> ConfigWatcher for FnWatcher<F> {
    fn on_change(&self, event: &ChangeEvent) {
        (self.f)(event)
    }
}

/// Function-backed watcher for validators: `f` may rewrite the proposed
/// value by returning `Some(new_value)`.
pub struct FnValidator<F: Fn(Symbol, &Value, &Value) -> Option<Value> + Send + Sync> {
    f: F,
}

impl<F: Fn(Symbol, &Value, &Value) -> Option<Value> + Send + Sync> FnValidator<F> {
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

impl<F: Fn(Symbol, &Value, &Value) -> Option<Value> + Send + Sync> ConfigWatcher for FnValidator<F> {
    fn validate(&self, subkey: Symbol, proposed: &Value, current: &Value) -> Option<Value> {
        (self.f)(subkey, proposed, current)
    }
}

pub(crate) struct Watching {
    pub subkey: Symbol,
    pub reasons: WhatHappened,
    pub watcher: std::sync::Weak<dyn ConfigWatcher>,
}

impl Watching {
    pub fn should_fire(&self, subkey: Symbol, what: WhatHappened) -> bool {
        self.reasons.contains(what) && (self.subkey.is_none() || self.subkey == subkey)
    }

    pub fn expired(&self) -> bool {
        self.watcher.strong_count() == 0
    }

    pub fn upgrade(&self) -> Option<Arc<dyn ConfigWatcher>> {
        self.watcher.upgrade()
    }
}
