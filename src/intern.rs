// src/intern.rs
//
// String interning for Symbol IDs.

use std::hash::BuildHasher;

use rustc_hash::FxBuildHasher;

/// Unique identifier for an interned name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Symbol(u32);

impl Symbol {
    pub fn new(index: u32) -> Self {
        Symbol(index)
    }

    pub fn index(self) -> u32 {
        self.0
    }
}

/// Interns strings to unique Symbol IDs.
///
/// The interner owns every name appearing in a body: user identifiers,
/// call heads, and the hidden loop-iterator variables the `for` lowering
/// mints. Identifiers of the form `_for_iter_<k>` and the call heads
/// `as_iterator`, `has_next` and `iter_next` are reserved for the
/// compiler and must not be used for user bindings.
#[derive(Debug, Clone)]
pub struct Interner {
    map: hashbrown::HashMap<String, Symbol, FxBuildHasher>,
    strings: Vec<String>,
}

impl Default for Interner {
    fn default() -> Self {
        Self {
            map: hashbrown::HashMap::with_hasher(FxBuildHasher),
            strings: Vec::new(),
        }
    }
}

impl Interner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn intern(&mut self, s: &str) -> Symbol {
        use hashbrown::hash_map::RawEntryMut;

        // Hash once, reuse for both lookup and insert.
        let hash = self.map.hasher().hash_one(s);

        let entry = self.map.raw_entry_mut().from_hash(hash, |k| k == s);

        match entry {
            RawEntryMut::Occupied(e) => *e.get(),
            RawEntryMut::Vacant(e) => {
                let sym = Symbol::new(self.strings.len() as u32);
                let owned = s.to_string();
                self.strings.push(owned.clone());
                e.insert_hashed_nocheck(hash, owned, sym);
                sym
            }
        }
    }

    pub fn resolve(&self, sym: Symbol) -> &str {
        &self.strings[sym.index() as usize]
    }

    /// Returns the number of interned strings.
    pub fn len(&self) -> usize {
        self.strings.len()
    }

    /// Returns true if no strings have been interned.
    pub fn is_empty(&self) -> bool {
        self.strings.is_empty()
    }

    /// Look up a string to get its symbol, if it has been interned.
    pub fn lookup(&self, s: &str) -> Option<Symbol> {
        self.map.get(s).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn intern_returns_same_symbol() {
        let mut interner = Interner::new();
        let s1 = interner.intern("count");
        let s2 = interner.intern("count");
        let s3 = interner.intern("total");

        assert_eq!(s1, s2);
        assert_ne!(s1, s3);
    }

    #[test]
    fn resolve_returns_original_string() {
        let mut interner = Interner::new();
        let sym = interner.intern("_for_iter_1");
        assert_eq!(interner.resolve(sym), "_for_iter_1");
    }

    #[test]
    fn lookup_without_intern() {
        let mut interner = Interner::new();
        assert!(interner.lookup("missing").is_none());
        let sym = interner.intern("present");
        assert_eq!(interner.lookup("present"), Some(sym));
    }
}
