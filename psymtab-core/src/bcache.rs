use std::hash::{Hash, Hasher};
use std::sync::Arc;

use crate::base::PartialSymbol;

/// Initial bucket count; must be a power of two.
const INITIAL_BUCKETS: usize = 256;

/// A content-addressed interner for partial symbols.
///
/// Many compilation units reference the same external linkage names; the
/// bcache makes sure each distinct partial symbol is allocated exactly
/// once, and hands out shared `Arc` handles. Identity is strict:
/// `insert` returns a pointer-equal handle for value-equal symbols.
///
/// Symbols are value-equal when address, section, language, domain,
/// address class and the *interned linkage-name pointer* all coincide.
/// The name contents are never hashed or compared — names go through the
/// per-object intern table before psymbols are built, so distinct
/// pointers imply distinct strings.
///
/// The table is open-addressed with linear probing, kept below 0.7 load,
/// and doubles on growth.
pub struct PsymbolBcache {
    buckets: Vec<Option<Arc<PartialSymbol>>>,
    unique: usize,
    insertions: usize,
    hits: usize,
}

impl PsymbolBcache {
    /// Creates an empty cache.
    pub fn new() -> PsymbolBcache {
        PsymbolBcache {
            buckets: vec![None; INITIAL_BUCKETS],
            unique: 0,
            insertions: 0,
            hits: 0,
        }
    }

    /// Interns a partial symbol.
    ///
    /// Returns the canonical handle and whether this call created it
    /// (`true`) or found an existing one (`false`).
    pub fn insert(&mut self, symbol: PartialSymbol) -> (Arc<PartialSymbol>, bool) {
        self.insertions += 1;

        if (self.unique + 1) * 10 >= self.buckets.len() * 7 {
            self.grow();
        }

        let mask = self.buckets.len() - 1;
        let mut idx = Self::hash(&symbol) as usize & mask;

        loop {
            match &self.buckets[idx] {
                Some(existing) if Self::eq(existing, &symbol) => {
                    self.hits += 1;
                    return (Arc::clone(existing), false);
                }
                Some(_) => idx = (idx + 1) & mask,
                None => {
                    let interned = Arc::new(symbol);
                    self.buckets[idx] = Some(Arc::clone(&interned));
                    self.unique += 1;
                    return (interned, true);
                }
            }
        }
    }

    fn grow(&mut self) {
        let new_len = self.buckets.len() * 2;
        let old = std::mem::replace(&mut self.buckets, vec![None; new_len]);
        let mask = self.buckets.len() - 1;

        for entry in old.into_iter().flatten() {
            let mut idx = Self::hash(&entry) as usize & mask;
            while self.buckets[idx].is_some() {
                idx = (idx + 1) & mask;
            }
            self.buckets[idx] = Some(entry);
        }
    }

    /// A value-only hash over the identity fields.
    ///
    /// The linkage name participates through its interned pointer, not
    /// its bytes.
    fn hash(symbol: &PartialSymbol) -> u64 {
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        symbol.unrelocated_address().raw().hash(&mut hasher);
        symbol.section().hash(&mut hasher);
        (symbol.language() as u8).hash(&mut hasher);
        (symbol.domain() as u8).hash(&mut hasher);
        (symbol.class() as u8).hash(&mut hasher);
        (Arc::as_ptr(symbol.name().linkage_arc()) as *const () as usize).hash(&mut hasher);
        hasher.finish()
    }

    fn eq(a: &PartialSymbol, b: &PartialSymbol) -> bool {
        a.unrelocated_address() == b.unrelocated_address()
            && a.section() == b.section()
            && a.language() == b.language()
            && a.domain() == b.domain()
            && a.class() == b.class()
            && Arc::ptr_eq(a.name().linkage_arc(), b.name().linkage_arc())
    }

    /// Number of distinct symbols interned.
    pub fn unique_count(&self) -> usize {
        self.unique
    }

    /// Total number of `insert` calls.
    pub fn insertion_count(&self) -> usize {
        self.insertions
    }

    /// Number of `insert` calls satisfied by an existing entry.
    pub fn hit_count(&self) -> usize {
        self.hits
    }

    /// Approximate memory held by the cache.
    pub fn memory_used(&self) -> usize {
        self.buckets.len() * std::mem::size_of::<Option<Arc<PartialSymbol>>>()
            + self.unique * std::mem::size_of::<PartialSymbol>()
    }
}

impl Default for PsymbolBcache {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for PsymbolBcache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PsymbolBcache")
            .field("unique", &self.unique)
            .field("insertions", &self.insertions)
            .field("hits", &self.hits)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::base::{AddressClass, Domain, SymbolName};
    use crate::objfile::PerBfdStorage;
    use psymtab_common::{Language, UnrelocatedAddr};

    fn psym(per_bfd: &mut PerBfdStorage, name: &str, addr: u64) -> PartialSymbol {
        PartialSymbol::new(
            SymbolName::compute(name, Language::C, per_bfd),
            UnrelocatedAddr(addr),
            Some(0),
            Domain::Var,
            AddressClass::Static,
        )
    }

    #[test]
    fn test_identity() {
        let mut per_bfd = PerBfdStorage::new();
        let mut cache = PsymbolBcache::new();

        let (a, new_a) = cache.insert(psym(&mut per_bfd, "shared", 0x100));
        let (b, new_b) = cache.insert(psym(&mut per_bfd, "shared", 0x100));

        assert!(new_a);
        assert!(!new_b);
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(cache.unique_count(), 1);
        assert_eq!(cache.insertion_count(), 2);
        assert_eq!(cache.hit_count(), 1);
    }

    #[test]
    fn test_distinct_by_field() {
        let mut per_bfd = PerBfdStorage::new();
        let mut cache = PsymbolBcache::new();

        let (a, _) = cache.insert(psym(&mut per_bfd, "x", 0x100));
        let (b, _) = cache.insert(psym(&mut per_bfd, "x", 0x104));
        let (c, _) = cache.insert(psym(&mut per_bfd, "y", 0x100));

        assert!(!Arc::ptr_eq(&a, &b));
        assert!(!Arc::ptr_eq(&a, &c));
        assert_eq!(cache.unique_count(), 3);
    }

    #[test]
    fn test_identity_survives_growth() {
        let mut per_bfd = PerBfdStorage::new();
        let mut cache = PsymbolBcache::new();

        let (first, _) = cache.insert(psym(&mut per_bfd, "sym0", 0));
        for i in 1..1000 {
            cache.insert(psym(&mut per_bfd, &format!("sym{i}"), i));
        }
        assert!(cache.memory_used() > 0);

        let (again, added) = cache.insert(psym(&mut per_bfd, "sym0", 0));
        assert!(!added);
        assert!(Arc::ptr_eq(&first, &again));
        assert_eq!(cache.unique_count(), 1000);
    }
}
