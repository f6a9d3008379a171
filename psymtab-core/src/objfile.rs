use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use psymtab_common::{Language, NameInterner};

use crate::minsyms::MinimalSymbolTable;

/// Architecture facts the indexing core needs from the object-file reader.
#[derive(Clone, Debug, Default)]
pub struct ArchInfo {
    /// Some toolchains (SunPRO on Solaris, function-relative ELF stabs)
    /// emit zero-valued `N_SO`/`N_FUN` addresses; when set, the parsers
    /// infer text ranges from function symbols and the minimal-symbol
    /// table instead.
    pub sofun_address_maybe_missing: bool,

    /// Number of address bits that carry meaning; anything above is a tag
    /// and is masked off. Zero means all bits are significant.
    pub significant_addr_bits: u32,

    /// The character the target prepends to every linker symbol, or NUL.
    pub symbol_leading_char: u8,
}

impl ArchInfo {
    /// Masks tagging bits off an address.
    pub fn addr_bits_remove(&self, addr: u64) -> u64 {
        match self.significant_addr_bits {
            0 | 64.. => addr,
            bits => addr & ((1u64 << bits) - 1),
        }
    }

    /// Strips the target's symbol leading character from a name.
    pub fn strip_leading_char<'n>(&self, name: &'n str) -> &'n str {
        match self.symbol_leading_char {
            0 => name,
            c => name.strip_prefix(c as char).unwrap_or(name),
        }
    }
}

/// Storage shared by all object files backed by the same file image: the
/// string intern table and the canonical-name cache.
#[derive(Debug, Default)]
pub struct PerBfdStorage {
    interner: NameInterner,
    canonical: HashMap<Arc<str>, Arc<str>>,
}

impl PerBfdStorage {
    /// Creates empty per-file storage.
    pub fn new() -> Self {
        Self::default()
    }

    /// Interns a string.
    pub fn intern(&mut self, string: &str) -> Arc<str> {
        self.interner.intern(string)
    }

    /// Returns the canonical form of `linkage`, computing it with
    /// `canonicalize` on the first request and caching the result.
    ///
    /// `canonicalize` returns `None` when the name is already canonical.
    pub fn canonical_name(
        &mut self,
        linkage: &Arc<str>,
        canonicalize: impl FnOnce(&str) -> Option<String>,
    ) -> Arc<str> {
        if let Some(cached) = self.canonical.get(linkage) {
            return Arc::clone(cached);
        }

        let natural = match canonicalize(linkage) {
            Some(canonical) => self.interner.intern(&canonical),
            None => Arc::clone(linkage),
        };
        self.canonical
            .insert(Arc::clone(linkage), Arc::clone(&natural));
        natural
    }

    /// Intern-table statistics for `print_stats`.
    pub fn intern_memory_used(&self) -> usize {
        self.interner.memory_used()
    }
}

/// A reference to a compunit installed on an [`ObjectFile`].
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct CompunitRef(pub(crate) usize);

impl CompunitRef {
    /// The position of the compunit in the object's compunit list.
    pub fn index(self) -> usize {
        self.0
    }
}

/// One file table of an expanded compunit.
#[derive(Clone, Debug)]
pub struct FileTab {
    /// The source file name.
    pub filename: Arc<str>,
    /// The file's language.
    pub language: Language,
}

/// The result of expanding a partial symtab: the full per-unit symbol
/// table skeleton.
///
/// Block, type and line reconstruction is the expansion callback's
/// business and lives outside this crate; the core tracks the primary
/// file table and the include file tables, which is what the lookup
/// façade hands back to clients.
#[derive(Clone, Debug)]
pub struct CompunitSymtab {
    primary: FileTab,
    includes: Vec<FileTab>,
}

impl CompunitSymtab {
    /// Creates a compunit with a primary file table.
    pub fn new(primary: FileTab) -> CompunitSymtab {
        CompunitSymtab {
            primary,
            includes: Vec::new(),
        }
    }

    /// Adds an include file table.
    pub fn push_include(&mut self, filetab: FileTab) {
        self.includes.push(filetab);
    }

    /// The compilation unit's own file table.
    pub fn primary_filetab(&self) -> &FileTab {
        &self.primary
    }

    /// All file tables, primary first.
    pub fn filetabs(&self) -> impl Iterator<Item = &FileTab> {
        std::iter::once(&self.primary).chain(self.includes.iter())
    }
}

/// The indexing core's view of one loaded object file.
///
/// The actual object-file reader (sections, relocations, raw bytes) is an
/// external collaborator; this type carries only what the indexing core
/// consumes: section offsets, architecture facts, the per-file intern
/// storage, the minimal-symbol table, and the compunits produced by
/// expansion.
pub struct ObjectFile {
    /// Display name of the object.
    pub name: String,
    /// Architecture facts.
    pub arch: ArchInfo,
    /// Per-section relocation deltas, indexed by section index.
    pub section_offsets: Vec<u64>,
    /// Index of the text section, if present.
    pub sect_index_text: Option<usize>,
    /// Index of the data section, if present.
    pub sect_index_data: Option<usize>,
    /// Index of the bss section, if present.
    pub sect_index_bss: Option<usize>,
    /// Index of the read-only data section, if present.
    pub sect_index_rodata: Option<usize>,
    /// The minimal-symbol table for this object.
    pub minimal_symbols: MinimalSymbolTable,
    per_bfd: PerBfdStorage,
    compunits: Vec<CompunitSymtab>,
    main_name: Option<(Arc<str>, Language)>,
}

impl ObjectFile {
    /// Creates an object-file view with no sections and default arch info.
    pub fn new(name: impl Into<String>) -> ObjectFile {
        ObjectFile {
            name: name.into(),
            arch: ArchInfo::default(),
            section_offsets: Vec::new(),
            sect_index_text: None,
            sect_index_data: None,
            sect_index_bss: None,
            sect_index_rodata: None,
            minimal_symbols: MinimalSymbolTable::new(),
            per_bfd: PerBfdStorage::new(),
            compunits: Vec::new(),
            main_name: None,
        }
    }

    /// The relocation delta for a section, or zero for sectionless
    /// symbols.
    pub fn section_offset(&self, section: Option<usize>) -> u64 {
        section
            .and_then(|idx| self.section_offsets.get(idx))
            .copied()
            .unwrap_or(0)
    }

    /// The relocation delta of the text section.
    pub fn text_section_offset(&self) -> u64 {
        self.section_offset(self.sect_index_text)
    }

    /// The data-ish section index stabs attribute variables to: data,
    /// falling back to bss, then read-only data.
    pub fn data_sect_index(&self) -> Option<usize> {
        self.sect_index_data
            .or(self.sect_index_bss)
            .or(self.sect_index_rodata)
    }

    /// The per-file shared storage (intern table, canonical-name cache).
    pub fn per_bfd_mut(&mut self) -> &mut PerBfdStorage {
        &mut self.per_bfd
    }

    /// Read-only access to the per-file shared storage.
    pub fn per_bfd(&self) -> &PerBfdStorage {
        &self.per_bfd
    }

    /// Installs a compunit produced by expansion.
    pub fn add_compunit(&mut self, compunit: CompunitSymtab) -> CompunitRef {
        self.compunits.push(compunit);
        CompunitRef(self.compunits.len() - 1)
    }

    /// Resolves a compunit reference.
    pub fn compunit(&self, cu: CompunitRef) -> &CompunitSymtab {
        &self.compunits[cu.0]
    }

    /// Number of compunits expanded so far.
    pub fn compunit_count(&self) -> usize {
        self.compunits.len()
    }

    /// The cached name and language of the program's main function.
    pub fn main_name(&self) -> Option<(&str, Language)> {
        self.main_name
            .as_ref()
            .map(|(name, lang)| (name.as_ref(), *lang))
    }

    /// Caches the main-function name.
    pub fn set_main_name(&mut self, name: Arc<str>, language: Language) {
        self.main_name = Some((name, language));
    }
}

impl fmt::Debug for ObjectFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectFile")
            .field("name", &self.name)
            .field("sections", &self.section_offsets.len())
            .field("minimal_symbols", &self.minimal_symbols.len())
            .field("compunits", &self.compunits.len())
            .finish()
    }
}
