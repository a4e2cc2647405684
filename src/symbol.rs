//! Process-lifetime string interning.
//!
//! Every plugin-visible string identifier (config keys, topic names, struct
//! member names) is interned once into a [`SymbolTable`] and referenced
//! afterwards by a small [`Symbol`] value. Interning is idempotent: the same
//! string always yields the same symbol for the lifetime of the table. A
//! bidirectional map behind a shared lock, with an optimistic read-lock
//! fast path that only promotes to an exclusive lock when the string has
//! not been seen before.

use std::collections::HashMap;
use std::fmt;

use parking_lot::RwLock;

/// A 32-bit interned string identity. `0` is reserved and never returned by
/// [`SymbolTable::intern`]; it denotes "no symbol" in APIs that accept an
/// optional symbol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Symbol(u32);

impl Symbol {
    /// The reserved "absent" symbol.
    pub const NONE: Symbol = Symbol(0);

    pub fn is_none(self) -> bool {
        self.0 == 0
    }

    pub fn as_u32(self) -> u32 {
        self.0
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

struct Inner {
    interned: HashMap<String, Symbol>,
    reverse: Vec<String>,
}

/// Interning table shared by every subsystem that needs stable string
/// identity: config keys, topic names, struct member names.
pub struct SymbolTable {
    inner: RwLock<Inner>,
}

impl Default for SymbolTable {
    fn default() -> Self {
        Self::new()
    }
}

impl SymbolTable {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner {
                interned: HashMap::new(),
                // index 0 is reserved, so reverse[0] is a placeholder never looked up
                reverse: vec![String::new()],
            }),
        }
    }

    /// Interns `s`, returning the existing symbol if already known or
    /// allocating a new one. Idempotent: repeated calls with an
    /// already-interned string never allocate.
    pub fn intern(&self, s: &str) -> Symbol {
        if let Some(sym) = self.lookup_if_exists(s) {
            return sym;
        }
        let mut guard = self.inner.write();
        // re-check: another writer may have interned `s` while we waited for
        // the exclusive lock.
        if let Some(sym) = guard.interned.get(s) {
            return *sym;
        }
        let id = guard.reverse.len() as u32;
        let sym = Symbol(id);
        guard.reverse.push(s.to_owned());
        guard.interned.insert(s.to_owned(), sym);
        tracing::trace!(symbol = id, value = s, "interned new symbol");
        sym
    }

    /// Returns the symbol for `s` if it has already been interned, without
    /// allocating a new one.
    pub fn lookup_if_exists(&self, s: &str) -> Option<Symbol> {
        let guard = self.inner.read();
        guard.interned.get(s).copied()
    }

    /// Returns the interned string for `sym`, or `None` if `sym` was never
    /// issued by this table (including [`Symbol::NONE`]).
    pub fn lookup(&self, sym: Symbol) -> Option<String> {
        if sym.is_none() {
            return None;
        }
        let guard = self.inner.read();
        guard.reverse.get(sym.0 as usize).cloned()
    }

    pub fn is_valid(&self, sym: Symbol) -> bool {
        !sym.is_none() && (sym.0 as usize) < self.inner.read().reverse.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn intern_is_idempotent() {
        let table = SymbolTable::new();
        let a = table.intern("alpha");
        let b = table.intern("alpha");
        assert_eq!(a, b);
        assert_eq!(table.lookup(a).as_deref(), Some("alpha"));
    }

    #[test]
    fn distinct_strings_get_distinct_symbols() {
        let table = SymbolTable::new();
        let a = table.intern("alpha");
        let b = table.intern("beta");
        assert_ne!(a, b);
    }

    #[test]
    fn none_symbol_never_resolves() {
        let table = SymbolTable::new();
        assert!(table.lookup(Symbol::NONE).is_none());
        assert!(!table.is_valid(Symbol::NONE));
    }

    #[test]
    fn lookup_if_exists_does_not_allocate() {
        let table = SymbolTable::new();
        assert!(table.lookup_if_exists("never-seen").is_none());
        let sym = table.intern("never-seen");
        assert_eq!(table.lookup_if_exists("never-seen"), Some(sym));
    }

    #[test]
    fn concurrent_intern_of_same_string_converges() {
        use std::sync::Arc;
        use std::thread;

        let table = Arc::new(SymbolTable::new());
        let mut handles = Vec::new();
        for _ in 0..8 {
            let table = Arc::clone(&table);
            handles.push(thread::spawn(move || table.intern("shared")));
        }
        let symbols: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert!(symbols.iter().all(|s| *s == symbols[0]));
    }
}
