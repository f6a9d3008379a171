use std::sync::Arc;

use psymtab_common::{filename_eq, Language, UnrelocatedAddr};

use crate::base::{AddressClass, Domain};
use crate::objfile::ObjectFile;
use crate::psymtab::{PsymbolPlacement, PsymtabRef};
use crate::storage::PsymtabStorage;

/// The list of header files opened with a begin-include marker, kept for
/// resolving later exclude markers across compilation units.
///
/// An exclude marker names a `(header, instance)` pair seen in an earlier
/// unit of the same object file; resolution walks this list linearly.
#[derive(Debug, Default)]
pub struct BinclList {
    entries: Vec<(Arc<str>, u64, PsymtabRef)>,
}

impl BinclList {
    /// Creates an empty list.
    pub fn new() -> Self {
        Self::default()
    }

    /// Notes a header-file begin in `pst`.
    pub fn push(&mut self, name: Arc<str>, instance: u64, pst: PsymtabRef) {
        self.entries.push((name, instance, pst));
    }

    /// Finds the psymtab that defined `(name, instance)`.
    pub fn find(&self, name: &str, instance: u64) -> Option<PsymtabRef> {
        self.entries
            .iter()
            .find(|(n, i, _)| *i == instance && **n == *name)
            .map(|&(_, _, pst)| pst)
    }

    /// Number of noted headers.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True if no header has been noted.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Accumulates one compilation unit's psymtab while a format parser feeds
/// it events, and finalizes it via [`end`](PsymtabBuilder::end).
///
/// The builder owns the per-unit side state the original kept in the read
/// loop: the include list, the dependency list, the pending last function
/// name, and the line-number flag.
pub struct PsymtabBuilder {
    pst: PsymtabRef,
    includes: Vec<Arc<str>>,
    dependencies: Vec<PsymtabRef>,
    has_line_numbers: bool,
    last_function_name: Option<String>,
}

impl PsymtabBuilder {
    /// Starts a new psymtab for `filename`.
    ///
    /// The unit's language is deduced from the filename; `textlow`, when
    /// known, seeds the text range.
    pub fn start(
        storage: &mut PsymtabStorage,
        objfile: &mut ObjectFile,
        filename: &str,
        textlow: Option<UnrelocatedAddr>,
    ) -> PsymtabBuilder {
        let pst = match textlow {
            Some(addr) => storage.new_psymtab_with_addr(filename, objfile, addr),
            None => storage.new_psymtab(filename, objfile),
        };
        storage[pst].language = Language::from_filename(filename);

        PsymtabBuilder {
            pst,
            includes: Vec::new(),
            dependencies: Vec::new(),
            has_line_numbers: false,
            last_function_name: None,
        }
    }

    /// The psymtab under construction.
    pub fn pst(&self) -> PsymtabRef {
        self.pst
    }

    /// The unit's current language.
    pub fn language(&self, storage: &PsymtabStorage) -> Language {
        storage[self.pst].language
    }

    /// Applies the monotonic language upgrade for a deduced language.
    pub fn upgrade_language(&mut self, storage: &mut PsymtabStorage, deduced: Language) {
        let pst = &mut storage[self.pst];
        pst.language = pst.language.upgrade(deduced);
    }

    /// Adds an externally visible psymbol.
    #[allow(clippy::too_many_arguments)]
    pub fn add_global(
        &mut self,
        storage: &mut PsymtabStorage,
        objfile: &mut ObjectFile,
        name: &str,
        domain: Domain,
        class: AddressClass,
        section: Option<usize>,
        address: UnrelocatedAddr,
        language: Language,
    ) {
        storage.add_psymbol(
            self.pst,
            name,
            domain,
            class,
            section,
            PsymbolPlacement::Global,
            address,
            language,
            objfile,
        );
    }

    /// Adds a file-scope psymbol.
    #[allow(clippy::too_many_arguments)]
    pub fn add_static(
        &mut self,
        storage: &mut PsymtabStorage,
        objfile: &mut ObjectFile,
        name: &str,
        domain: Domain,
        class: AddressClass,
        section: Option<usize>,
        address: UnrelocatedAddr,
        language: Language,
    ) {
        storage.add_psymbol(
            self.pst,
            name,
            domain,
            class,
            section,
            PsymbolPlacement::Static,
            address,
            language,
            objfile,
        );
    }

    /// Marks an include file for this unit.
    ///
    /// Deduplicated against both the unit's own filename and prior
    /// includes; returns whether the name was actually recorded.
    pub fn record_include(&mut self, storage: &PsymtabStorage, name: &Arc<str>) -> bool {
        if filename_eq(name, &storage[self.pst].filename)
            || self.includes.iter().any(|inc| filename_eq(inc, name))
        {
            return false;
        }
        self.includes.push(Arc::clone(name));
        true
    }

    /// Adds a dependency edge, without duplicates.
    pub fn add_dependency(&mut self, dep: PsymtabRef) {
        if dep != self.pst && !self.dependencies.contains(&dep) {
            self.dependencies.push(dep);
        }
    }

    /// Notes that this unit carries line-number records.
    pub fn set_has_line_numbers(&mut self) {
        self.has_line_numbers = true;
    }

    /// Whether line-number records were seen.
    pub fn has_line_numbers(&self) -> bool {
        self.has_line_numbers
    }

    /// Remembers the raw name of the last function stab seen, for the
    /// end-of-unit text-range fixup.
    pub fn note_last_function_name(&mut self, name: &str) {
        self.last_function_name = Some(name.to_owned());
    }

    /// Adjusts `text_low` for a function symbol at `address`.
    ///
    /// In reordered executables a function may lie below the unit's
    /// nominal start; and with zero-valued unit addresses the first
    /// function seen establishes the start. `textlow_not_set` is the
    /// caller's tracking flag and is cleared when the bound is taken.
    pub fn note_text_function(
        &mut self,
        storage: &mut PsymtabStorage,
        address: UnrelocatedAddr,
        textlow_not_set: &mut bool,
    ) {
        let pst = &mut storage[self.pst];
        if *textlow_not_set || (address < pst.unrelocated_text_low() && address.raw() != 0) {
            pst.set_text_low(address);
            *textlow_not_set = false;
        }
    }

    /// Raises `text_high` to `address` if it lies above the current one.
    pub fn raise_text_high(&mut self, storage: &mut PsymtabStorage, address: UnrelocatedAddr) {
        let pst = &mut storage[self.pst];
        if pst.unrelocated_text_high() == UnrelocatedAddr(0)
            || address > pst.unrelocated_text_high()
        {
            pst.set_text_high(address);
        }
    }

    /// Closes off the unit.
    ///
    /// Caps the text range, applies the missing-address fixups, sorts the
    /// globals, installs the dependency array, and creates one sub-psymtab
    /// per include file (each depending on this unit). Returns `None` when
    /// the psymtab was empty — no symbols, includes, dependencies or line
    /// numbers — and has been discarded.
    pub fn end(
        self,
        storage: &mut PsymtabStorage,
        objfile: &mut ObjectFile,
        capping_text: Option<UnrelocatedAddr>,
        textlow_not_set: bool,
    ) -> Option<PsymtabRef> {
        let pst = self.pst;
        if let Some(cap) = capping_text {
            storage[pst].set_text_high(cap);
        }

        // With zero-valued unit addresses the capping value is useless
        // too; recover the end of the last function from the minimal
        // symbol table instead.
        if !storage[pst].text_high_valid
            && objfile.arch.sofun_address_maybe_missing
            && self.last_function_name.is_some()
        {
            let raw = self.last_function_name.as_deref().unwrap();
            let base = raw.split(':').next().unwrap_or(raw);
            let decorated = format!("{base}_");
            let filename = Arc::clone(&storage[pst].filename);

            let msym = objfile
                .minimal_symbols
                .lookup(base, Some(&filename))
                .or_else(|| objfile.minimal_symbols.lookup(&decorated, Some(&filename)));
            if let Some(msym) = msym {
                let high = UnrelocatedAddr(msym.address.raw() + msym.size);
                storage[pst].set_text_high(high);
            }
        }

        if objfile.arch.sofun_address_maybe_missing {
            if textlow_not_set {
                // The unit contained no text at all; collapse the range.
                let high = storage[pst].unrelocated_text_high();
                storage[pst].set_text_low(high);
            } else if storage[pst].text_low_valid {
                // We know our own start: close any sibling that never
                // learned its end, approximating a contiguous layout.
                let low = storage[pst].unrelocated_text_low();
                let siblings: Vec<_> = storage.iter().filter(|&p| p != pst).collect();
                for p in siblings {
                    let sib = &mut storage[p];
                    if !sib.text_high_valid && sib.text_low_valid {
                        sib.set_text_high(low);
                    }
                }
            }
        }

        storage[pst].end();
        storage[pst].dependencies = self.dependencies.clone();

        for include in &self.includes {
            let sub = storage.new_psymtab(include, objfile);
            storage[sub].dependencies = vec![pst];
        }

        if self.includes.is_empty()
            && self.dependencies.is_empty()
            && storage[pst].empty()
            && !self.has_line_numbers
        {
            // Header files without symbols produce these; there can be a
            // lot of them.
            storage.discard_psymtab(pst);
            return None;
        }

        Some(pst)
    }
}
