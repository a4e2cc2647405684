//! Convenience re-exports for plugin-side code that otherwise spells out
//! half a dozen `use meridian_core::...` lines. Mirrors the shape of the
//! teacher's own prelude: the types a caller touches on nearly every
//! operation, nothing exhaustive.

pub use crate::abi::{CallbackType, LifecyclePhase};
pub use crate::clock::{Clock, MonotonicTimePoint, SharedClock};
pub use crate::config::{ChangeEvent, ConfigWatcher, Timestamp, Topic, Topics, UpdateDirective, WhatHappened};
pub use crate::context::{CoreConfig, Context};
pub use crate::error::{CoreError, CoreResult, ErrorKind};
pub use crate::future::{Future, FutureSet, Promise};
pub use crate::handle::{Handle, HandleTable, RootId};
pub use crate::pubsub::{PubSub, Subscription};
pub use crate::scope::{CallScope, ModuleScope, ThreadContext};
pub use crate::symbol::{Symbol, SymbolTable};
pub use crate::task::{TaskHandleId, TaskManager, TaskSpec};
pub use crate::value::{Container, ListOps, MapOps, Unbox, Value};
