//! Container / value model: maps, lists, buffers, boxed scalars.
//!
//! All four container kinds share one [`Container`] handle wrapping an
//! internally mutable payload. Structural sharing happens through
//! [`Value::Handle`] entries that reference another container by its
//! [`Handle`]; inserting such an entry runs the cycle check in
//! [`checks::reject_cycle`] under the crate-wide cycle-check mutex before the
//! write is allowed to land.

mod buffer;
mod list;
mod map;
mod scalar;

pub use buffer::BufferOps;
pub use list::ListOps;
pub use map::MapOps;
pub use scalar::{Unbox, Value};

use std::sync::OnceLock;

use parking_lot::Mutex;

use crate::error::{CoreError, ErrorKind};
use crate::handle::{Handle, HandleTable};
use crate::symbol::{Symbol, SymbolTable};

/// Global cycle-check mutex: held only while a container mutation walks
/// descendants to decide whether the prospective child would introduce a
/// cycle.
static CYCLE_CHECK: Mutex<()> = Mutex::new(());

#[derive(Debug)]
pub(crate) enum Payload {
    Map(Vec<(Symbol, Value)>),
    List(Vec<Value>),
    Buffer(Vec<u8>),
    BoxedScalar(Value),
}

/// A map, list, buffer, or boxed scalar. Cheaply cloned (an `Arc` handle to
/// shared, mutable storage); use [`Container::deep_clone`] for a structural
/// copy.
#[derive(Clone)]
pub struct Container {
    inner: std::sync::Arc<Mutex<Payload>>,
    self_handle: std::sync::Arc<OnceLock<Handle>>,
}

impl Container {
    pub fn new_map() -> Self {
        Self::from_payload(Payload::Map(Vec::new()))
    }

    pub fn new_list() -> Self {
        Self::from_payload(Payload::List(Vec::new()))
    }

    pub fn new_buffer() -> Self {
        Self::from_payload(Payload::Buffer(Vec::new()))
    }

    pub fn boxed(scalar: Value) -> Self {
        Self::from_payload(Payload::BoxedScalar(scalar))
    }

    fn from_payload(payload: Payload) -> Self {
        Self {
            inner: std::sync::Arc::new(Mutex::new(payload)),
            self_handle: std::sync::Arc::new(OnceLock::new()),
        }
    }

    /// Records the handle this container was allocated under. Called once
    /// by [`crate::scope`] / [`crate::handle::HandleTable::create`] so the
    /// cycle check can recognise "does this subtree contain myself".
    pub(crate) fn bind_handle(&self, handle: Handle) {
        let _ = self.self_handle.set(handle);
    }

    pub fn self_handle(&self) -> Option<Handle> {
        self.self_handle.get().copied()
    }

    /// Allocates a handle for this container under `root` and records it as
    /// the container's own handle, so a later attempt to nest it inside
    /// itself is caught by [`reject_cycle`]. The one-step counterpart to
    /// calling [`HandleTable::create`] and [`Container::bind_handle`]
    /// separately.
    pub fn create_handle(&self, table: &HandleTable, root: crate::handle::RootId) -> Result<Handle, CoreError> {
        let handle = table.create(root, self.clone())?;
        self.bind_handle(handle);
        Ok(handle)
    }

    pub fn size(&self) -> u32 {
        match &*self.inner.lock() {
            Payload::Map(entries) => entries.len() as u32,
            Payload::List(entries) => entries.len() as u32,
            Payload::Buffer(bytes) => bytes.len() as u32,
            Payload::BoxedScalar(_) => 1,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    pub fn is_map(&self) -> bool {
        matches!(&*self.inner.lock(), Payload::Map(_))
    }

    pub fn is_list(&self) -> bool {
        matches!(&*self.inner.lock(), Payload::List(_))
    }

    pub fn is_buffer(&self) -> bool {
        matches!(&*self.inner.lock(), Payload::Buffer(_))
    }

    pub fn unbox<T: Unbox>(&self) -> Result<T, CoreError> {
        match &*self.inner.lock() {
            Payload::BoxedScalar(v) => v.unbox(),
            _ => Err(CoreError::new(
                ErrorKind::InvalidContainer,
                "unbox called on a non-scalar container",
            )),
        }
    }

    /// Shallow copy: a new container with the same entries. Leaf scalars
    /// are copied by value; entries that reference a nested container keep
    /// pointing at the *same* handle, matching `clone()`'s contract of
    /// "deep copy of structure, shallow copy of leaves" one level at a
    /// time. To recursively clone an entire subtree into newly allocated
    /// handles (so the clone is independently releasable), callers use
    /// [`crate::scope::ModuleScope::clone_subtree`], which has the root
    /// needed to anchor each freshly allocated handle.
    pub fn shallow_clone(&self) -> Container {
        let payload = match &*self.inner.lock() {
            Payload::Map(entries) => Payload::Map(entries.clone()),
            Payload::List(entries) => Payload::List(entries.clone()),
            Payload::Buffer(bytes) => Payload::Buffer(bytes.clone()),
            Payload::BoxedScalar(v) => Payload::BoxedScalar(v.clone()),
        };
        Container::from_payload(payload)
    }

    /// Maps this container onto a `serde_json::Value` tree: maps become
    /// objects (symbol keys resolved through `symbols`), lists become
    /// arrays, boxed scalars become JSON scalars. Nested containers are
    /// followed through `table`.
    pub fn to_json(&self, table: &HandleTable, symbols: &SymbolTable) -> serde_json::Value {
        match &*self.inner.lock() {
            Payload::Map(entries) => {
                let mut obj = serde_json::Map::new();
                for (sym, v) in entries {
                    let key = symbols.lookup(*sym).unwrap_or_default();
                    obj.insert(key, value_to_json(v, table, symbols));
                }
                serde_json::Value::Object(obj)
            }
            Payload::List(entries) => {
                serde_json::Value::Array(entries.iter().map(|v| value_to_json(v, table, symbols)).collect())
            }
            Payload::Buffer(bytes) => {
                serde_json::Value::Array(bytes.iter().map(|b| serde_json::Value::from(*b)).collect())
            }
            Payload::BoxedScalar(v) => value_to_json(v, table, symbols),
        }
    }

    /// Builds a container tree from a `serde_json::Value`: objects become
    /// maps (keys interned via `symbols`), arrays become lists, scalars
    /// become boxed scalars.
    pub fn from_json(json: &serde_json::Value, symbols: &SymbolTable) -> Container {
        match json {
            serde_json::Value::Object(obj) => {
                let mut entries = Vec::with_capacity(obj.len());
                for (k, v) in obj {
                    entries.push((symbols.intern(k), json_to_value(v, symbols)));
                }
                Container::from_payload(Payload::Map(entries))
            }
            serde_json::Value::Array(arr) => {
                Container::from_payload(Payload::List(arr.iter().map(|v| json_to_value(v, symbols)).collect()))
            }
            scalar => Container::boxed(json_to_value(scalar, symbols)),
        }
    }
}

pub(crate) fn value_to_json(value: &Value, table: &HandleTable, symbols: &SymbolTable) -> serde_json::Value {
    match value {
        Value::Bool(b) => serde_json::Value::Bool(*b),
        Value::Int(i) => serde_json::Value::from(*i),
        Value::Float(f) => serde_json::Number::from_f64(*f)
            .map(serde_json::Value::Number)
            .unwrap_or(serde_json::Value::Null),
        Value::Str(s) => serde_json::Value::String(s.clone()),
        Value::Symbol(sym) => serde_json::Value::String(symbols.lookup(*sym).unwrap_or_default()),
        Value::Handle(h) => match table.lookup::<Container>(*h) {
            Some(child) => child.to_json(table, symbols),
            None => serde_json::Value::Null,
        },
    }
}

fn json_to_value(json: &serde_json::Value, symbols: &SymbolTable) -> Value {
    match json {
        serde_json::Value::Null => Value::Str(String::new()),
        serde_json::Value::Bool(b) => Value::Bool(*b),
        serde_json::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Value::Int(i)
            } else {
                Value::Float(n.as_f64().unwrap_or_default())
            }
        }
        serde_json::Value::String(s) => Value::Str(s.clone()),
        other => {
            // nested object/array reached via a scalar-only path (e.g. a
            // list entry holding a bare sub-object): intern its compact
            // JSON form so no information is silently dropped.
            let _ = symbols;
            Value::Str(other.to_string())
        }
    }
}

/// Rejects `child` if inserting it under `parent` would create a cycle in
/// the container ownership DAG, i.e. `parent` is already reachable by
/// following `Value::Handle` links from `child`.
///
/// Takes the global cycle-check mutex for the duration of the walk, and
/// releases each container's own lock before acquiring the next one's, so
/// the walk never holds two container locks at once.
pub(crate) fn reject_cycle(
    table: &HandleTable,
    parent: Handle,
    child: &Value,
) -> Result<(), CoreError> {
    let Value::Handle(child_handle) = child else {
        return Ok(());
    };
    if *child_handle == parent {
        return Err(CoreError::new(
            ErrorKind::Cycle,
            "container cannot contain itself directly",
        ));
    }
    let _guard = CYCLE_CHECK.lock();
    let mut stack = vec![*child_handle];
    let mut visited = std::collections::HashSet::new();
    while let Some(handle) = stack.pop() {
        if !visited.insert(handle) {
            continue;
        }
        let Some(container) = table.lookup::<Container>(handle) else {
            continue;
        };
        let children: Vec<Handle> = {
            let payload = container.inner.lock();
            match &*payload {
                Payload::Map(entries) => entries.iter().filter_map(|(_, v)| v.as_handle()).collect(),
                Payload::List(entries) => entries.iter().filter_map(|v| v.as_handle()).collect(),
                Payload::Buffer(_) | Payload::BoxedScalar(_) => Vec::new(),
            }
        };
        for next in children {
            if next == parent {
                return Err(CoreError::new(
                    ErrorKind::Cycle,
                    "insertion would create a cycle in the container ownership graph",
                ));
            }
            stack.push(next);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scalar_round_trips_through_json() {
        let symbols = SymbolTable::new();
        let container = Container::boxed(Value::Int(7));
        let table = HandleTable::new();
        let json = container.to_json(&table, &symbols);
        assert_eq!(json, serde_json::json!(7));
    }

    #[test]
    fn map_round_trips_through_json() {
        let symbols = SymbolTable::new();
        let table = HandleTable::new();
        let json = serde_json::json!({"a": 1, "b": "two"});
        let container = Container::from_json(&json, &symbols);
        assert!(container.is_map());
        assert_eq!(container.size(), 2);
        let back = container.to_json(&table, &symbols);
        assert_eq!(back, json);
    }
}
