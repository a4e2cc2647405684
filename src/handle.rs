//! Handle table: small-integer identity with generation-based validation.
//!
//! A [`Handle`] is a tagged 32-bit reference into a [`HandleTable`]: the top
//! bits are a slot index, the low 12 bits are that slot's current
//! generation. Allocation prefers never-used slots while capacity remains
//! and only recycles freed slots once capacity is exhausted, so a "stumbled
//! upon" handle value is very unlikely to name a live object.
//!
//! Handles are anchored to one or more [`RootId`]s (see [`crate::scope`]);
//! the underlying object is only dropped once every anchoring root releases
//! it.

use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::error::{CoreError, ErrorKind};

const GENERATION_BITS: u32 = 12;
const GENERATION_MASK: u32 = (1 << GENERATION_BITS) - 1;

/// Default slot-array starting size, used by [`HandleTable::new`].
pub const DEFAULT_CAPACITY: usize = 64;
/// Default growth step once the slot array fills, used by [`HandleTable::new`].
pub const GROWTH_INCREMENT: usize = 64;

/// Opaque handle to an object tracked by a [`HandleTable`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Handle(u32);

impl Handle {
    pub const NULL: Handle = Handle(0);

    pub fn is_null(self) -> bool {
        self.0 == 0
    }

    pub fn as_u32(self) -> u32 {
        self.0
    }

    fn new(index: usize, generation: u16) -> Self {
        let packed = ((index as u32 + 1) << GENERATION_BITS) | (generation as u32 & GENERATION_MASK);
        Handle(packed)
    }

    fn index(self) -> usize {
        (self.0 >> GENERATION_BITS) as usize - 1
    }

    fn generation(self) -> u16 {
        (self.0 & GENERATION_MASK) as u16
    }
}

/// Identifies a root that anchors handles. Roots are created by
/// [`crate::scope::ModuleScope`] and [`crate::scope::CallScope`]; releasing
/// a root releases every handle it anchors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RootId(u64);

enum Slot {
    Free { next_generation: u16 },
    Occupied {
        generation: u16,
        object: Arc<dyn Any + Send + Sync>,
    },
}

struct Inner {
    slots: Vec<Slot>,
    fresh_free: Vec<usize>,
    recycled_free: Vec<usize>,
    /// root -> handles it anchors, each with its own strong reference so the
    /// object stays alive as long as at least one root anchors it.
    roots: HashMap<u64, HashMap<usize, Arc<dyn Any + Send + Sync>>>,
    next_root: u64,
}

/// Table mapping [`Handle`] values to live, type-erased objects.
///
/// Every cross-boundary object created by this crate (containers, futures,
/// promises, tasks, subscriptions) is allocated through one shared instance
/// of this table.
pub struct HandleTable {
    inner: RwLock<Inner>,
    initial_capacity: usize,
    growth_increment: usize,
}

impl Default for HandleTable {
    fn default() -> Self {
        Self::new()
    }
}

impl HandleTable {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY, GROWTH_INCREMENT)
    }

    /// Builds a table whose slot array starts at `initial_capacity` and
    /// grows by `growth_increment` slots each time it fills up.
    pub fn with_capacity(initial_capacity: usize, growth_increment: usize) -> Self {
        let initial_capacity = initial_capacity.max(1);
        let growth_increment = growth_increment.max(1);
        Self {
            inner: RwLock::new(Inner {
                slots: Vec::with_capacity(initial_capacity),
                fresh_free: Vec::new(),
                recycled_free: Vec::new(),
                roots: HashMap::new(),
                next_root: 1,
            }),
            initial_capacity,
            growth_increment,
        }
    }

    /// Creates a fresh anchoring root. Every handle created under this root
    /// is released in one step by [`HandleTable::release_root`].
    pub fn create_root(&self) -> RootId {
        let mut inner = self.inner.write();
        let id = inner.next_root;
        inner.next_root += 1;
        inner.roots.insert(id, HashMap::new());
        RootId(id)
    }

    /// Allocates a handle for `object`, anchored to `root`.
    pub fn create<T: Any + Send + Sync>(&self, root: RootId, object: T) -> Result<Handle, CoreError> {
        let object: Arc<dyn Any + Send + Sync> = Arc::new(object);
        let mut inner = self.inner.write();
        if !inner.roots.contains_key(&root.0) {
            return Err(CoreError::new(
                ErrorKind::InvalidHandle,
                "cannot create a handle under a released root",
            ));
        }

        let index = if let Some(idx) = inner.fresh_free.pop() {
            idx
        } else if inner.slots.len() < inner.slots.capacity().max(self.initial_capacity) {
            let idx = inner.slots.len();
            inner.slots.push(Slot::Free { next_generation: 0 });
            idx
        } else if let Some(idx) = inner.recycled_free.pop() {
            idx
        } else {
            let grow_to = inner.slots.len() + self.growth_increment;
            inner.slots.reserve(self.growth_increment);
            let start = inner.slots.len();
            for _ in start..grow_to {
                inner.slots.push(Slot::Free { next_generation: 0 });
            }
            let idx = start;
            for i in (start + 1)..grow_to {
                inner.fresh_free.push(i);
            }
            idx
        };

        let generation = match &inner.slots[index] {
            Slot::Free { next_generation } => *next_generation,
            Slot::Occupied { .. } => unreachable!("allocator returned an occupied slot"),
        };

        inner.slots[index] = Slot::Occupied {
            generation,
            object: Arc::clone(&object),
        };
        inner
            .roots
            .get_mut(&root.0)
            .expect("root existence checked above")
            .insert(index, object);

        tracing::trace!(index, generation, "allocated handle");
        Ok(Handle::new(index, generation))
    }

    /// Looks up the live object behind `handle`, or `None` if the handle is
    /// stale (never issued, wrong generation, or already released).
    pub fn lookup<T: Any + Send + Sync + Clone>(&self, handle: Handle) -> Option<T> {
        self.lookup_any(handle)
            .and_then(|obj| obj.downcast_ref::<T>().cloned())
    }

    /// Looks up the type-erased live object behind `handle`.
    pub fn lookup_any(&self, handle: Handle) -> Option<Arc<dyn Any + Send + Sync>> {
        if handle.is_null() {
            return None;
        }
        let inner = self.inner.read();
        match inner.slots.get(handle.index())? {
            Slot::Occupied { generation, object } if *generation == handle.generation() => {
                Some(Arc::clone(object))
            }
            _ => None,
        }
    }

    pub fn is_valid(&self, handle: Handle) -> bool {
        self.lookup_any(handle).is_some()
    }

    /// Releases `handle` from `root`. The slot is freed for reuse only once
    /// no root anchors it any longer; the generation is bumped so any other
    /// outstanding copy of this exact handle value is immediately detected
    /// as stale.
    pub fn release(&self, root: RootId, handle: Handle) {
        if handle.is_null() {
            return;
        }
        let mut inner = self.inner.write();
        if let Some(anchored) = inner.roots.get_mut(&root.0) {
            anchored.remove(&handle.index());
        }
        let still_anchored = inner
            .roots
            .values()
            .any(|anchored| anchored.contains_key(&handle.index()));
        if still_anchored {
            return;
        }
        let index = handle.index();
        if let Some(Slot::Occupied { generation, .. }) = inner.slots.get(index) {
            if *generation != handle.generation() {
                return;
            }
            let next_generation = generation.wrapping_add(1) & (GENERATION_MASK as u16);
            inner.slots[index] = Slot::Free { next_generation };
            inner.recycled_free.push(index);
            tracing::trace!(index, "released handle, slot recycled");
        }
    }

    /// Releases every handle anchored by `root` and forgets the root.
    pub fn release_root(&self, root: RootId) {
        let mut inner = self.inner.write();
        let Some(anchored) = inner.roots.remove(&root.0) else {
            return;
        };
        for index in anchored.into_keys() {
            let still_anchored = inner
                .roots
                .values()
                .any(|other| other.contains_key(&index));
            if still_anchored {
                continue;
            }
            if let Some(Slot::Occupied { generation, .. }) = inner.slots.get(index) {
                let next_generation = generation.wrapping_add(1) & (GENERATION_MASK as u16);
                inner.slots[index] = Slot::Free { next_generation };
                inner.recycled_free.push(index);
            }
        }
    }

    /// Anchors an already-allocated handle to an additional root (used when
    /// a container is shared across scopes). Returns `false` if the handle
    /// or root is not live.
    pub fn anchor(&self, root: RootId, handle: Handle) -> bool {
        if handle.is_null() {
            return false;
        }
        let mut inner = self.inner.write();
        let Some(object) = (match inner.slots.get(handle.index()) {
            Some(Slot::Occupied { generation, object }) if *generation == handle.generation() => {
                Some(Arc::clone(object))
            }
            _ => None,
        }) else {
            return false;
        };
        match inner.roots.get_mut(&root.0) {
            Some(anchored) => {
                anchored.insert(handle.index(), object);
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_and_lookup_round_trips() {
        let table = HandleTable::new();
        let root = table.create_root();
        let handle = table.create(root, 42i32).unwrap();
        assert_eq!(table.lookup::<i32>(handle), Some(42));
    }

    #[test]
    fn release_invalidates_handle() {
        let table = HandleTable::new();
        let root = table.create_root();
        let handle = table.create(root, "hello".to_string()).unwrap();
        table.release(root, handle);
        assert!(table.lookup::<String>(handle).is_none());
    }

    #[test]
    fn release_root_reclaims_all_handles() {
        let table = HandleTable::new();
        let root = table.create_root();
        let a = table.create(root, 1i32).unwrap();
        let b = table.create(root, 2i32).unwrap();
        table.release_root(root);
        assert!(table.lookup::<i32>(a).is_none());
        assert!(table.lookup::<i32>(b).is_none());
    }

    #[test]
    fn stale_handle_after_recycle_reports_invalid() {
        let table = HandleTable::new();
        let root = table.create_root();
        let first = table.create(root, 1i32).unwrap();
        table.release(root, first);

        for i in 0..(DEFAULT_CAPACITY - 1) {
            table.create(root, i as i32).unwrap();
        }
        let recycled = table.create(root, 999i32).unwrap();
        assert_ne!(first, recycled, "a recycled slot must carry a new generation");
        assert!(table.lookup::<i32>(first).is_none());
    }

    #[test]
    fn shared_anchor_keeps_object_alive_until_all_roots_release() {
        let table = HandleTable::new();
        let root_a = table.create_root();
        let root_b = table.create_root();
        let handle = table.create(root_a, "shared".to_string()).unwrap();
        assert!(table.anchor(root_b, handle));
        table.release(root_a, handle);
        assert_eq!(table.lookup::<String>(handle), Some("shared".to_string()));
        table.release(root_b, handle);
        assert!(table.lookup::<String>(handle).is_none());
    }

    #[test]
    fn null_handle_is_never_valid() {
        let table = HandleTable::new();
        assert!(!table.is_valid(Handle::NULL));
    }
}
