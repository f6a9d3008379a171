use std::ops::{Index, IndexMut};
use std::sync::Arc;

use psymtab_common::{Language, UnrelocatedAddr};

use crate::base::{AddressClass, Domain, PartialSymbol, SymbolName};
use crate::bcache::PsymbolBcache;
use crate::objfile::ObjectFile;
use crate::psymtab::{PartialSymtab, PsymbolPlacement, PsymtabRef};

/// A marker for the storage state at some point during a build.
///
/// Used to roll incomplete psymtabs back when a build is interrupted:
/// everything installed after the save point is discarded.
#[derive(Clone, Copy, Debug)]
pub struct SavePoint {
    arena_len: usize,
}

/// Owns all partial symtabs derived from one object file.
///
/// Tables live in an arena and are addressed by [`PsymtabRef`]; a
/// separate head list carries the installed tables in reverse creation
/// order (newest first), mirroring the original intrusive chain.
/// Discarding a table unlinks it from the head list only — the arena
/// slot, and any interned psymbols it references, are released with the
/// storage itself.
#[derive(Debug, Default)]
pub struct PsymtabStorage {
    tables: Vec<PartialSymtab>,
    /// Creation order; iteration reverses this.
    installed: Vec<PsymtabRef>,
    /// The psymbol interner shared by all tables of this storage.
    pub bcache: PsymbolBcache,
}

impl PsymtabStorage {
    /// Creates an empty storage.
    pub fn new() -> PsymtabStorage {
        PsymtabStorage::default()
    }

    /// Allocates and installs a new psymtab for `filename`.
    ///
    /// The filename is interned in the object's per-file storage, so all
    /// tables and symbols naming the same file share one allocation.
    pub fn new_psymtab(&mut self, filename: &str, objfile: &mut ObjectFile) -> PsymtabRef {
        let filename = objfile.per_bfd_mut().intern(filename);
        tracing::debug!(
            object = %objfile.name,
            filename = %filename,
            "created psymtab"
        );

        let pst = PartialSymtab::new(filename);
        self.tables.push(pst);
        let r = PsymtabRef(self.tables.len() - 1);
        self.installed.push(r);
        r
    }

    /// Like [`new_psymtab`](Self::new_psymtab), but also sets the initial
    /// text range from `textlow` (high defaults to low).
    pub fn new_psymtab_with_addr(
        &mut self,
        filename: &str,
        objfile: &mut ObjectFile,
        textlow: UnrelocatedAddr,
    ) -> PsymtabRef {
        let r = self.new_psymtab(filename, objfile);
        self[r].set_text_low(textlow);
        self[r].set_text_high(textlow);
        r
    }

    /// Iterates over installed psymtabs, newest first.
    pub fn iter(&self) -> impl Iterator<Item = PsymtabRef> + '_ {
        self.installed.iter().rev().copied()
    }

    /// Iterates over installed psymtabs in creation order.
    pub fn iter_creation_order(&self) -> impl Iterator<Item = PsymtabRef> + '_ {
        self.installed.iter().copied()
    }

    /// True if any psymtab is installed.
    pub fn has_psymtabs(&self) -> bool {
        !self.installed.is_empty()
    }

    /// Number of installed psymtabs.
    pub fn len(&self) -> usize {
        self.installed.len()
    }

    /// True if no psymtab is installed.
    pub fn is_empty(&self) -> bool {
        self.installed.is_empty()
    }

    /// Total number of psymbols across installed tables.
    pub fn count_psyms(&self) -> usize {
        self.installed
            .iter()
            .map(|&r| self[r].global_psymbols.len() + self[r].static_psymbols.len())
            .sum()
    }

    /// Unlinks a psymtab from the head list.
    ///
    /// The arena slot stays allocated until the storage is dropped;
    /// references held by dependency arrays remain valid.
    pub fn discard_psymtab(&mut self, pst: PsymtabRef) {
        self.installed.retain(|&r| r != pst);
    }

    /// Captures the current build state for later rollback.
    pub fn save_point(&self) -> SavePoint {
        SavePoint {
            arena_len: self.tables.len(),
        }
    }

    /// Discards every psymtab created after `save` was taken.
    ///
    /// Used on the unwind path when a build is interrupted mid-way.
    pub fn discard_since(&mut self, save: SavePoint) {
        self.installed.retain(|&r| r.0 < save.arena_len);
    }

    /// Builds a psymbol through the bcache and attaches it to `pst`.
    ///
    /// Identical global psymbols are recorded only once per storage; a
    /// duplicate insertion of an already-interned global is dropped.
    #[allow(clippy::too_many_arguments)]
    pub fn add_psymbol(
        &mut self,
        pst: PsymtabRef,
        name: &str,
        domain: Domain,
        class: AddressClass,
        section: Option<usize>,
        placement: PsymbolPlacement,
        address: UnrelocatedAddr,
        language: Language,
        objfile: &mut ObjectFile,
    ) {
        let name = SymbolName::compute(name, language, objfile.per_bfd_mut());
        self.add_computed_psymbol(pst, name, domain, class, section, placement, address);
    }

    /// Attaches a psymbol whose names are already computed and interned.
    pub fn add_computed_psymbol(
        &mut self,
        pst: PsymtabRef,
        name: SymbolName,
        domain: Domain,
        class: AddressClass,
        section: Option<usize>,
        placement: PsymbolPlacement,
        address: UnrelocatedAddr,
    ) {
        let psymbol = PartialSymbol::new(name, address, section, domain, class);
        let (interned, added) = self.bcache.insert(psymbol);

        // Do not duplicate global partial symbols.
        if placement == PsymbolPlacement::Global && !added {
            return;
        }

        let list = match placement {
            PsymbolPlacement::Static => &mut self.tables[pst.0].static_psymbols,
            PsymbolPlacement::Global => &mut self.tables[pst.0].global_psymbols,
        };
        list.push(interned);
    }

    /// Convenience accessor used by tests and the dump helpers.
    pub fn get(&self, pst: PsymtabRef) -> &PartialSymtab {
        &self.tables[pst.0]
    }

    /// Mutable access to a psymtab.
    pub fn get_mut(&mut self, pst: PsymtabRef) -> &mut PartialSymtab {
        &mut self.tables[pst.0]
    }

    /// Finds a shared psymbol handle for `pst`'s global list; test aid.
    pub fn global_names(&self, pst: PsymtabRef) -> Vec<&str> {
        self[pst]
            .global_psymbols
            .iter()
            .map(|p| p.search_name())
            .collect()
    }

    pub(crate) fn psymbol_handles(
        &self,
        pst: PsymtabRef,
    ) -> (&[Arc<PartialSymbol>], &[Arc<PartialSymbol>]) {
        let table = &self.tables[pst.0];
        (&table.global_psymbols, &table.static_psymbols)
    }
}

impl Index<PsymtabRef> for PsymtabStorage {
    type Output = PartialSymtab;

    fn index(&self, pst: PsymtabRef) -> &PartialSymtab {
        &self.tables[pst.0]
    }
}

impl IndexMut<PsymtabRef> for PsymtabStorage {
    fn index_mut(&mut self, pst: PsymtabRef) -> &mut PartialSymtab {
        &mut self.tables[pst.0]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use similar_asserts::assert_eq;

    #[test]
    fn test_install_order_newest_first() {
        let mut objfile = ObjectFile::new("a.out");
        let mut storage = PsymtabStorage::new();

        let a = storage.new_psymtab("a.c", &mut objfile);
        let b = storage.new_psymtab("b.c", &mut objfile);
        let c = storage.new_psymtab("c.c", &mut objfile);

        let order: Vec<_> = storage.iter().collect();
        assert_eq!(order, vec![c, b, a]);
    }

    #[test]
    fn test_discard_keeps_arena() {
        let mut objfile = ObjectFile::new("a.out");
        let mut storage = PsymtabStorage::new();

        let a = storage.new_psymtab("a.c", &mut objfile);
        let b = storage.new_psymtab("empty.h", &mut objfile);
        storage.discard_psymtab(b);

        assert_eq!(storage.iter().collect::<Vec<_>>(), vec![a]);
        // The slot is still addressable for dependency arrays.
        assert_eq!(&*storage[b].filename, "empty.h");
    }

    #[test]
    fn test_save_point_rollback() {
        let mut objfile = ObjectFile::new("a.out");
        let mut storage = PsymtabStorage::new();

        let a = storage.new_psymtab("a.c", &mut objfile);
        let save = storage.save_point();
        storage.new_psymtab("b.c", &mut objfile);
        storage.new_psymtab("c.c", &mut objfile);

        storage.discard_since(save);
        assert_eq!(storage.iter().collect::<Vec<_>>(), vec![a]);
    }

    #[test]
    fn test_global_dedup() {
        let mut objfile = ObjectFile::new("a.out");
        let mut storage = PsymtabStorage::new();

        let pst = storage.new_psymtab("a.c", &mut objfile);
        for _ in 0..2 {
            storage.add_psymbol(
                pst,
                "dup",
                Domain::Var,
                AddressClass::Static,
                Some(1),
                PsymbolPlacement::Global,
                UnrelocatedAddr(0x10),
                Language::C,
                &mut objfile,
            );
        }

        assert_eq!(storage[pst].global_psymbols.len(), 1);
        assert_eq!(storage.bcache.insertion_count(), 2);
        assert_eq!(storage.bcache.unique_count(), 1);
    }
}
