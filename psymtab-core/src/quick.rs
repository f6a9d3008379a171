use std::cmp::Ordering;
use std::sync::Arc;

use psymtab_common::{basename, ordered_compare, Language};

use crate::base::{AddressClass, Domain, PartialSymbol};
use crate::error::{Error, ErrorKind};
use crate::expand::{expand_psymtab, Expander};
use crate::minsyms::MinimalSymbol;
use crate::objfile::{CompunitRef, ObjectFile};
use crate::psymtab::{PsymtabRef, SearchStatus};
use crate::storage::PsymtabStorage;

/// The descriptive tag used for the synthesized C++ namespace table.
const CPP_NAMESPACE_TAG: &str = "<<C++-namespaces>>";

/// Which block of a compilation unit a lookup searches.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum BlockKind {
    /// The unit's externally visible symbols.
    Global,
    /// The unit's file-scope symbols.
    Static,
}

/// Which blocks `expand_symtabs_matching` searches.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct BlockSearchFlags {
    /// Search global blocks.
    pub global: bool,
    /// Search static blocks.
    pub static_: bool,
}

impl BlockSearchFlags {
    /// Search global blocks only.
    pub const GLOBAL: BlockSearchFlags = BlockSearchFlags {
        global: true,
        static_: false,
    };
    /// Search static blocks only.
    pub const STATIC: BlockSearchFlags = BlockSearchFlags {
        global: false,
        static_: true,
    };
    /// Search both blocks.
    pub const BOTH: BlockSearchFlags = BlockSearchFlags {
        global: true,
        static_: true,
    };
}

/// A coarse filter on what kind of symbols a search is after.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum SearchDomain {
    /// Everything.
    #[default]
    All,
    /// Data symbols — everything that is neither a type nor a function.
    Variables,
    /// Functions.
    Functions,
    /// Type names.
    Types,
    /// Modules.
    Modules,
}

impl SearchDomain {
    fn admits(self, psym: &PartialSymbol) -> bool {
        match self {
            SearchDomain::All => true,
            SearchDomain::Variables => {
                psym.class() != AddressClass::Typedef && psym.class() != AddressClass::Block
            }
            SearchDomain::Functions => psym.class() == AddressClass::Block,
            SearchDomain::Types => psym.class() == AddressClass::Typedef,
            SearchDomain::Modules => psym.domain() == Domain::Module,
        }
    }
}

/// The quick-symbol façade over a psymtab storage.
///
/// This is the interface the debugger's symbol lookup, breakpoint
/// resolution and source-line mapping consume. Every method either
/// answers from the partial tables directly, or triggers expansion of the
/// minimal set of psymtabs needed through the supplied [`Expander`].
#[derive(Debug)]
pub struct PsymbolFunctions {
    storage: PsymtabStorage,
}

impl PsymbolFunctions {
    /// Wraps a populated storage.
    pub fn new(storage: PsymtabStorage) -> PsymbolFunctions {
        PsymbolFunctions { storage }
    }

    /// The underlying storage.
    pub fn storage(&self) -> &PsymtabStorage {
        &self.storage
    }

    /// Mutable access to the underlying storage.
    pub fn storage_mut(&mut self) -> &mut PsymtabStorage {
        &mut self.storage
    }

    /// True iff any psymtab exists.
    pub fn has_symbols(&self) -> bool {
        self.storage.has_psymtabs()
    }

    /// True iff at least one psymtab has not been expanded yet.
    pub fn has_unexpanded_symtabs(&self) -> bool {
        self.storage.iter().any(|pst| !self.storage[pst].readin)
    }

    /// Returns the primary symtab of the last source-file psymtab,
    /// expanding it lazily.
    ///
    /// Header files and the synthesized namespace table do not count as
    /// source files.
    pub fn find_last_source_symtab(
        &mut self,
        objfile: &mut ObjectFile,
        expander: &mut dyn Expander,
    ) -> Result<Option<CompunitRef>, Error> {
        let mut cs_pst = None;
        for pst in self.storage.iter() {
            let name = &self.storage[pst].filename;
            if !(name.ends_with(".h") || **name == *CPP_NAMESPACE_TAG) {
                cs_pst = Some(pst);
            }
        }

        let Some(pst) = cs_pst else {
            return Ok(None);
        };

        if self.storage[pst].readin {
            // A psymtab that was already read in should have produced a
            // symtab; ending up here means the tables are inconsistent.
            return Err(Error::new(
                ErrorKind::BadPsymtab,
                format!(
                    "select_source_symtab: readin pst found and no symtabs ({})",
                    self.storage[pst].filename
                ),
            ));
        }

        self.psymtab_to_symtab(objfile, expander, pst)
    }

    /// Nulls out every cached resolved source path.
    pub fn forget_cached_source_info(&mut self) {
        let refs: Vec<_> = self.storage.iter().collect();
        for pst in refs {
            self.storage[pst].fullname = None;
        }
    }

    /// Searches the globals of every unexpanded psymtab for `name` and
    /// returns the language of the first hit, without expanding anything.
    pub fn lookup_global_symbol_language(&self, name: &str, domain: Domain) -> Option<Language> {
        for pst in self.storage.iter() {
            if self.storage[pst].readin {
                continue;
            }
            if let Some(psym) = self.lookup_partial_symbol(pst, name, BlockKind::Global, domain) {
                return Some(psym.language());
            }
        }
        None
    }

    /// Locates the compunit containing `pc`, expanding its psymtab.
    ///
    /// `msym` is the minimal symbol the caller already resolved for `pc`;
    /// it drives the refinement that picks the unit *defining* the
    /// surrounding function when several unit ranges overlap.
    pub fn find_pc_sect_compunit_symtab(
        &mut self,
        objfile: &mut ObjectFile,
        expander: &mut dyn Expander,
        msym: Option<&MinimalSymbol>,
        pc: u64,
        section: Option<usize>,
        warn_if_readin: bool,
    ) -> Result<Option<CompunitRef>, Error> {
        let Some(ps) = self.find_pc_sect_psymtab(objfile, pc, section, msym) else {
            return Ok(None);
        };

        if warn_if_readin && self.storage[ps].readin {
            // Might want to fail here (in case the symtab is corrupt), but
            // maybe we can successfully continue, so let's not.
            tracing::warn!(
                pc = format_args!("{pc:#x}"),
                "pc in read-in psymtab, but not in symtab"
            );
        }

        self.psymtab_to_symtab(objfile, expander, ps)
    }

    /// Finds which partial symtab contains `pc`. Returns the psymtab that
    /// contains a symbol whose address exactly matches the minimal
    /// symbol, or failing that, the one with the closest preceding
    /// symbol.
    pub fn find_pc_sect_psymtab(
        &self,
        objfile: &ObjectFile,
        pc: u64,
        section: Option<usize>,
        msym: Option<&MinimalSymbol>,
    ) -> Option<PsymtabRef> {
        for pst in self.storage.iter() {
            // Shared psymtabs are never the innermost result of an
            // address lookup; their users carry the addresses.
            if self.storage[pst].user.is_some() {
                continue;
            }
            if self.storage[pst].covers_pc(objfile, pc) {
                return self.find_pc_sect_psymtab_closer(objfile, pc, section, pst, msym);
            }
        }
        None
    }

    /// Refines a candidate psymtab for `pc` against overlapping ranges.
    ///
    /// An object file with reordered functions may have many psymtab
    /// ranges containing `pc`; we want the one that contains the function
    /// *defining* `pc`. The minimal symbol is the canonical definition
    /// site: a psymtab whose best block psymbol sits exactly at the
    /// minimal symbol's address wins outright.
    fn find_pc_sect_psymtab_closer(
        &self,
        objfile: &ObjectFile,
        pc: u64,
        section: Option<usize>,
        pst: PsymtabRef,
        msym: Option<&MinimalSymbol>,
    ) -> Option<PsymtabRef> {
        let mut best_pst = pst;
        let mut best_addr = self.storage[pst].text_low(objfile);

        if section.is_none() {
            return Some(pst);
        }
        let msym = match msym {
            Some(msym) => msym,
            None => return Some(pst),
        };
        let msym_address = msym.address.offset(objfile.section_offset(msym.section));

        let tail: Vec<_> = self
            .storage
            .iter()
            .skip_while(|&p| p != pst)
            .filter(|&p| self.storage[p].user.is_none())
            .collect();

        for tpst in tail {
            if !self.storage[tpst].covers_pc(objfile, pc) {
                continue;
            }

            // NOTE: this assumes that every psymbol has a corresponding
            // minimal symbol, which is not necessarily true; the debug
            // info might be much richer than the object's symbol table.
            let p = self.find_pc_sect_psymbol(objfile, tpst, pc, section);
            if let Some(p) = &p {
                if p.address(objfile) == msym_address {
                    return Some(tpst);
                }
            }

            // Also accept the textlow value of a psymtab as a "symbol",
            // to support partial symtabs with line information but no
            // debug symbols (e.g. those produced by an assembler).
            let this_addr = match &p {
                Some(p) => p.address(objfile),
                None => self.storage[tpst].text_low(objfile),
            };

            if this_addr > best_addr {
                best_addr = this_addr;
                best_pst = tpst;
            }
        }

        Some(best_pst)
    }

    /// Finds the best block psymbol within one psymtab for `pc`.
    fn find_pc_sect_psymbol(
        &self,
        objfile: &ObjectFile,
        pst: PsymtabRef,
        pc: u64,
        section: Option<usize>,
    ) -> Option<Arc<PartialSymbol>> {
        let textlow = self.storage[pst].text_low(objfile);

        // Cope with programs that start at address 0.
        let mut best_pc = if textlow != 0 { textlow - 1 } else { 0 };
        let mut best: Option<Arc<PartialSymbol>> = None;

        let (globals, statics) = self.storage.psymbol_handles(pst);
        for p in globals.iter().chain(statics.iter()) {
            if p.domain() != Domain::Var || p.class() != AddressClass::Block {
                continue;
            }
            let addr = p.address(objfile);
            if pc < addr {
                continue;
            }
            let better = addr > best_pc || (textlow == 0 && best_pc == 0 && addr == 0);
            if !better {
                continue;
            }
            if section.is_some() && p.section() != section {
                continue;
            }
            best_pc = addr;
            best = Some(Arc::clone(p));
        }

        best
    }

    /// Looks in one psymtab for a symbol matching `name` in `domain`.
    ///
    /// Globals are sorted, so a binary search locates the first candidate
    /// and a linear scan runs only over entries that keep matching under
    /// the language matcher. Statics are scanned exhaustively — they are
    /// rarely large, and a static miss ends in a full unit read anyway.
    pub fn lookup_partial_symbol(
        &self,
        pst: PsymtabRef,
        name: &str,
        block: BlockKind,
        domain: Domain,
    ) -> Option<Arc<PartialSymbol>> {
        let (globals, statics) = self.storage.psymbol_handles(pst);
        let list = match block {
            BlockKind::Global => globals,
            BlockKind::Static => statics,
        };
        if list.is_empty() {
            return None;
        }

        if block == BlockKind::Global {
            // Binary search for the earliest entry whose name might be
            // correct; all matching entries are then checked against the
            // domain.
            let mut bottom = 0usize;
            let mut top = list.len() - 1;
            while top > bottom {
                let center = bottom + (top - bottom) / 2;
                if ordered_compare(list[center].search_name(), name) != Ordering::Less {
                    top = center;
                } else {
                    bottom = center + 1;
                }
            }

            // Case-folding matchers (Ada) can match entries that sort
            // before the lookup name; rewind over them.
            let mut idx = top;
            while idx > 0 && list[idx - 1].name().matches(name) {
                idx -= 1;
            }

            for p in &list[idx..] {
                if !p.name().matches(name) {
                    break;
                }
                if p.domain().matches(p.language(), domain) {
                    return Some(Arc::clone(p));
                }
            }
            return None;
        }

        list.iter()
            .find(|p| p.domain().matches(p.language(), domain) && p.name().matches(name))
            .map(Arc::clone)
    }

    /// Looks up a symbol by name and domain, expanding the defining unit.
    ///
    /// Scans every unexpanded psymtab's requested block; the first match
    /// triggers expansion and its compunit is returned. A match with a
    /// resolved type (`Typedef` class) is preferred: scanning continues
    /// past matches that merely name an opaque declaration when the
    /// domain could still produce a full definition elsewhere.
    pub fn lookup_symbol(
        &mut self,
        objfile: &mut ObjectFile,
        expander: &mut dyn Expander,
        block: BlockKind,
        name: &str,
        domain: Domain,
    ) -> Result<Option<CompunitRef>, Error> {
        let mut first_hit = None;

        let refs: Vec<_> = self.storage.iter().collect();
        for pst in refs {
            if self.storage[pst].readin {
                continue;
            }
            let Some(psym) = self.lookup_partial_symbol(pst, name, block, domain) else {
                continue;
            };

            let cu = self.psymtab_to_symtab(objfile, expander, pst)?;
            if first_hit.is_none() {
                first_hit = cu;
            }
            if domain != Domain::Struct || psym.class() == AddressClass::Typedef {
                return Ok(cu.or(first_hit));
            }
        }

        Ok(first_hit)
    }

    /// Expands every psymtab whose file name and symbols satisfy the
    /// given predicates, notifying `notify` for each expansion.
    ///
    /// Returns `false` if `notify` terminated the walk early.
    #[allow(clippy::too_many_arguments)]
    pub fn expand_symtabs_matching(
        &mut self,
        objfile: &mut ObjectFile,
        expander: &mut dyn Expander,
        file_matcher: Option<&dyn Fn(&str, bool) -> bool>,
        lookup_name: Option<&str>,
        symbol_matcher: Option<&dyn Fn(&str) -> bool>,
        notify: &mut dyn FnMut(CompunitRef) -> bool,
        search_flags: BlockSearchFlags,
        domain: Option<Domain>,
        search: SearchDomain,
    ) -> Result<bool, Error> {
        // A symbol matcher without a name to anchor the walk would force
        // a full scan of everything; reject the combination outright.
        debug_assert!(lookup_name.is_some() || symbol_matcher.is_none());

        let refs: Vec<_> = self.storage.iter().collect();
        for &pst in &refs {
            self.storage[pst].searched_flag = SearchStatus::NotSearched;
        }

        for &pst in &refs {
            if self.storage[pst].readin {
                continue;
            }

            if let Some(matcher) = file_matcher {
                if self.storage[pst].anonymous {
                    continue;
                }

                let filename = Arc::clone(&self.storage[pst].filename);
                let mut matched = matcher(&filename, false);
                if !matched {
                    // Before resolving full paths, which can get expensive
                    // when many files are involved, try the basename.
                    if matcher(basename(&filename), true) {
                        let fullname = self.psymtab_to_fullname(pst);
                        matched = matcher(&fullname, false);
                    }
                }
                if !matched {
                    continue;
                }
            }

            let found = match lookup_name {
                None => true,
                Some(name) => self.recursively_search_psymtabs(
                    pst,
                    name,
                    symbol_matcher,
                    search_flags,
                    domain,
                    search,
                ),
            };

            if found {
                if let Some(cu) = self.psymtab_to_symtab(objfile, expander, pst)? {
                    if !notify(cu) {
                        return Ok(false);
                    }
                }
            }
        }

        Ok(true)
    }

    /// Searches one psymtab (and its shared includes first) for a
    /// matching symbol, memoizing results in `searched_flag`.
    fn recursively_search_psymtabs(
        &mut self,
        pst: PsymtabRef,
        name: &str,
        symbol_matcher: Option<&dyn Fn(&str) -> bool>,
        search_flags: BlockSearchFlags,
        domain: Option<Domain>,
        search: SearchDomain,
    ) -> bool {
        match self.storage[pst].searched_flag {
            SearchStatus::NotSearched => {}
            status => return status == SearchStatus::Found,
        }

        // Recurse into shared psymtabs first; they may already have been
        // searched, and this can save some time.
        let dependencies = self.storage[pst].dependencies.clone();
        for dep in dependencies {
            if self.storage[dep].user.is_none() {
                continue;
            }
            if self.recursively_search_psymtabs(
                dep,
                name,
                symbol_matcher,
                search_flags,
                domain,
                search,
            ) {
                self.storage[pst].searched_flag = SearchStatus::Found;
                return true;
            }
        }

        let (globals, statics) = self.storage.psymbol_handles(pst);
        let blocks: [(&[Arc<PartialSymbol>], bool); 2] = [
            (globals, search_flags.global),
            (statics, search_flags.static_),
        ];

        let mut result = SearchStatus::NotFound;
        'outer: for (list, enabled) in blocks {
            if !enabled {
                continue;
            }
            for psym in list {
                let domain_ok = match domain {
                    None => true,
                    Some(d) => psym.domain().matches(psym.language(), d),
                };
                if domain_ok
                    && search.admits(psym)
                    && psym.name().matches(name)
                    && symbol_matcher.map_or(true, |m| m(psym.search_name()))
                {
                    result = SearchStatus::Found;
                    break 'outer;
                }
            }
        }

        self.storage[pst].searched_flag = result;
        result == SearchStatus::Found
    }

    /// Calls `fun` for every unexpanded, non-shared, non-anonymous
    /// psymtab's filename.
    pub fn map_symbol_filenames(
        &mut self,
        fun: &mut dyn FnMut(&str, Option<&str>),
        need_fullname: bool,
    ) {
        let refs: Vec<_> = self.storage.iter().collect();
        for pst in refs {
            if self.storage[pst].readin {
                continue;
            }
            // Shared psymtabs can be skipped; any file name is also
            // attached to the unshared psymtab that includes it.
            if self.storage[pst].user.is_some() {
                continue;
            }
            if self.storage[pst].anonymous {
                continue;
            }

            if need_fullname {
                let fullname = self.psymtab_to_fullname(pst);
                let filename = Arc::clone(&self.storage[pst].filename);
                fun(&filename, Some(&fullname));
            } else {
                let filename = Arc::clone(&self.storage[pst].filename);
                fun(&filename, None);
            }
        }
    }

    /// The psymtab implementation does not index non-text symbols by
    /// exact address; always `None`.
    pub fn find_compunit_symtab_by_address(&self, _address: u64) -> Option<CompunitRef> {
        None
    }

    /// Infers and caches the program's main-function name and language.
    pub fn compute_main_name(&self, objfile: &mut ObjectFile) {
        if objfile.main_name().is_some() {
            return;
        }

        for (candidate, language) in [("main", Language::C), ("MAIN__", Language::Fortran)] {
            if self
                .lookup_global_symbol_language(candidate, Domain::Var)
                .is_some()
                || objfile.minimal_symbols.lookup(candidate, None).is_some()
            {
                let name = objfile.per_bfd_mut().intern(candidate);
                objfile.set_main_name(name, language);
                return;
            }
        }

        let name = objfile.per_bfd_mut().intern("main");
        objfile.set_main_name(name, Language::Unknown);
    }

    /// Expands every psymtab. Maintenance aid.
    pub fn expand_all_symtabs(
        &mut self,
        objfile: &mut ObjectFile,
        expander: &mut dyn Expander,
    ) -> Result<(), Error> {
        let refs: Vec<_> = self.storage.iter().collect();
        for pst in refs {
            self.psymtab_to_symtab(objfile, expander, pst)?;
        }
        Ok(())
    }

    /// Gets the compunit corresponding to a psymtab, reading it in on
    /// first use. Shared psymtabs resolve through their canonical user.
    pub fn psymtab_to_symtab(
        &mut self,
        objfile: &mut ObjectFile,
        expander: &mut dyn Expander,
        mut pst: PsymtabRef,
    ) -> Result<Option<CompunitRef>, Error> {
        // If it is a shared psymtab, find an unshared psymtab that
        // includes it. Any such psymtab will do.
        while let Some(user) = self.storage[pst].user {
            pst = user;
        }

        if let Some(cu) = self.storage[pst].compunit {
            return Ok(Some(cu));
        }

        if !self.storage[pst].readin {
            tracing::debug!(filename = %self.storage[pst].filename, "reading in symbols");
            expand_psymtab(&mut self.storage, objfile, pst, expander)?;
        }

        Ok(self.storage[pst].compunit)
    }

    /// Resolves and caches the full path a psymtab represents.
    pub fn psymtab_to_fullname(&mut self, pst: PsymtabRef) -> String {
        let table = &mut self.storage[pst];
        debug_assert!(!table.anonymous);

        if table.fullname.is_none() {
            let filename = &table.filename;
            let resolved = if filename.starts_with('/') || table.dirname.is_none() {
                filename.to_string()
            } else {
                let dir = table.dirname.as_deref().unwrap();
                if dir.ends_with('/') {
                    format!("{dir}{filename}")
                } else {
                    format!("{dir}/{filename}")
                }
            };
            table.fullname = Some(resolved);
        }

        table.fullname.clone().unwrap()
    }
}
