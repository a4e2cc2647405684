//! Map-specific container operations.

use crate::error::{CoreError, ErrorKind};
use crate::handle::{Handle, HandleTable};
use crate::symbol::{Symbol, SymbolTable};

use super::{reject_cycle, Container, Payload, Value};

/// Map-specific operations, implemented for [`Container`]; callers check
/// [`Container::is_map`] first, or rely on the `InvalidContainer` error
/// these methods return for a non-map container.
pub trait MapOps {
    fn put(&self, table: &HandleTable, key: Symbol, value: Value) -> Result<(), CoreError>;
    fn get(&self, key: Symbol) -> Option<Value>;
    fn has_key(&self, key: Symbol) -> bool;
    fn keys(&self) -> Vec<Symbol>;
    /// Returns the stored key whose case-folded form (resolved through
    /// `symbols`) equals `key`'s, or `key` unchanged if no entry matches.
    fn fold_key(&self, symbols: &SymbolTable, key: Symbol) -> Symbol;
}

impl MapOps for Container {
    fn put(&self, table: &HandleTable, key: Symbol, value: Value) -> Result<(), CoreError> {
        let self_handle = self.self_handle().unwrap_or(Handle::NULL);
        if !self_handle.is_null() {
            reject_cycle(table, self_handle, &value)?;
        }
        let mut payload = self.inner_mut();
        let Payload::Map(entries) = &mut *payload else {
            return Err(CoreError::new(ErrorKind::InvalidStruct, "put called on a non-map container"));
        };
        match entries.iter_mut().find(|(k, _)| *k == key) {
            Some((_, slot)) => *slot = value,
            None => entries.push((key, value)),
        }
        Ok(())
    }

    fn get(&self, key: Symbol) -> Option<Value> {
        match &*self.inner_ref() {
            Payload::Map(entries) => entries.iter().find(|(k, _)| *k == key).map(|(_, v)| v.clone()),
            _ => None,
        }
    }

    fn has_key(&self, key: Symbol) -> bool {
        matches!(&*self.inner_ref(), Payload::Map(entries) if entries.iter().any(|(k, _)| *k == key))
    }

    fn keys(&self) -> Vec<Symbol> {
        match &*self.inner_ref() {
            Payload::Map(entries) => entries.iter().map(|(k, _)| *k).collect(),
            _ => Vec::new(),
        }
    }

    fn fold_key(&self, symbols: &SymbolTable, key: Symbol) -> Symbol {
        let Some(target) = symbols.lookup(key) else {
            return key;
        };
        let target_folded = target.to_ascii_lowercase();
        for existing in self.keys() {
            if let Some(s) = symbols.lookup(existing) {
                if s.to_ascii_lowercase() == target_folded {
                    return existing;
                }
            }
        }
        key
    }
}

// Small crate-private accessors so map/list/buffer modules can reach the
// shared payload lock without re-exposing it publicly.
impl Container {
    pub(super) fn inner_mut(&self) -> parking_lot::MutexGuard<'_, Payload> {
        self.inner_handle().lock()
    }

    pub(super) fn inner_ref(&self) -> parking_lot::MutexGuard<'_, Payload> {
        self.inner_handle().lock()
    }

    fn inner_handle(&self) -> &parking_lot::Mutex<Payload> {
        &*self.inner
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handle::HandleTable;

    #[test]
    fn put_then_get_round_trips() {
        let symbols = SymbolTable::new();
        let table = HandleTable::new();
        let map = Container::new_map();
        let key = symbols.intern("name");
        map.put(&table, key, Value::Str("edge".into())).unwrap();
        assert_eq!(map.get(key), Some(Value::Str("edge".into())));
        assert!(map.has_key(key));
    }

    #[test]
    fn put_same_key_overwrites() {
        let symbols = SymbolTable::new();
        let table = HandleTable::new();
        let map = Container::new_map();
        let key = symbols.intern("count");
        map.put(&table, key, Value::Int(1)).unwrap();
        map.put(&table, key, Value::Int(2)).unwrap();
        assert_eq!(map.get(key), Some(Value::Int(2)));
        assert_eq!(map.keys().len(), 1);
    }

    #[test]
    fn fold_key_is_case_insensitive() {
        let symbols = SymbolTable::new();
        let table = HandleTable::new();
        let map = Container::new_map();
        let stored = symbols.intern("Name");
        map.put(&table, stored, Value::Int(1)).unwrap();
        let query = symbols.intern("name");
        assert_eq!(map.fold_key(&symbols, query), stored);
    }

    #[test]
    fn direct_self_insertion_rejected() {
        let root = HandleTable::new();
        let table = root.create_root();
        let map = Container::new_map();
        let handle = table_create(&root, table, map.clone());
        map.bind_handle(handle);
        let symbols = SymbolTable::new();
        let key = symbols.intern("self");
        let err = map.put(&root, key, Value::Handle(handle)).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Cycle);
    }

    fn table_create(root_table: &HandleTable, root: crate::handle::RootId, c: Container) -> Handle {
        root_table.create(root, c).expect("create handle")
    }
}
