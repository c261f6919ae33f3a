//! String interner for identifier storage and comparison.
//!
//! Uses `SmolStr` for cheap cloning; short identifiers are stored inline.
//! The interner deduplicates strings so identical names share an allocation
//! when they are long enough to be heap-backed.

use rustc_hash::FxHashSet;
use smol_str::SmolStr;

/// An interned identifier - cheap to clone.
pub type Name = SmolStr;

/// String interner that deduplicates names.
#[derive(Debug, Default, Clone)]
pub struct Interner {
    names: FxHashSet<Name>,
}

impl Interner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Intern a string, returning a cheap-to-clone name.
    pub fn intern(&mut self, s: &str) -> Name {
        if let Some(existing) = self.names.get(s) {
            existing.clone()
        } else {
            let name = Name::new(s);
            self.names.insert(name.clone());
            name
        }
    }

    /// Get an interned name if it exists, without creating it.
    pub fn get(&self, s: &str) -> Option<Name> {
        self.names.get(s).cloned()
    }

    /// Number of unique names interned.
    pub fn len(&self) -> usize {
        self.names.len()
    }

    /// Returns true if no names have been interned.
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn intern_deduplicates() {
        let mut interner = Interner::new();
        let a = interner.intern("channel");
        let b = interner.intern("channel");
        assert_eq!(a, b);
        assert_eq!(interner.len(), 1);
    }

    #[test]
    fn get_existing() {
        let mut interner = Interner::new();
        interner.intern("server");
        assert!(interner.get("server").is_some());
        assert!(interner.get("client").is_none());
    }
}
