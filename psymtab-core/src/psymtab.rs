use std::any::Any;
use std::fmt;
use std::sync::Arc;

use psymtab_common::{ordered_compare, Language, UnrelocatedAddr};

use crate::base::PartialSymbol;
use crate::objfile::{CompunitRef, ObjectFile};

/// A stable reference to a partial symtab within its storage.
///
/// Dependency arrays, the bincl list and the FDR map all refer to
/// psymtabs through these indices; they stay valid across discards, since
/// discarding only unlinks a table from the head list.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct PsymtabRef(pub(crate) usize);

impl PsymtabRef {
    /// The creation-order index of this psymtab.
    pub fn index(self) -> usize {
        self.0
    }
}

/// Transient per-psymtab state used while `expand_symtabs_matching`
/// walks the storage.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum SearchStatus {
    /// Not visited in the current walk.
    #[default]
    NotSearched,
    /// Visited; a matching symbol was found.
    Found,
    /// Visited; nothing matched.
    NotFound,
}

/// Whether a psymbol goes on the global or the static list.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum PsymbolPlacement {
    /// File-scope (static) symbol.
    Static,
    /// Externally visible symbol.
    Global,
}

/// The partial symbol table for one compilation unit, or for an included
/// header promoted to a shared psymtab.
///
/// A psymtab records just enough to decide whether a query concerns this
/// unit — names, the text address range, include files, dependencies —
/// and where the reader can find the unit's full debug records when
/// expansion is triggered.
pub struct PartialSymtab {
    /// Source filename; never empty unless the table is anonymous.
    pub filename: Arc<str>,
    /// Cached resolved absolute path.
    pub fullname: Option<String>,
    /// Compilation directory, when the debug info supplies one.
    pub dirname: Option<Arc<str>>,

    text_low: UnrelocatedAddr,
    text_high: UnrelocatedAddr,
    /// Whether `text_low` holds a meaningful value.
    pub text_low_valid: bool,
    /// Whether `text_high` holds a meaningful value.
    pub text_high_valid: bool,

    /// Externally visible psymbols, sorted by search name after `end()`.
    pub global_psymbols: Vec<Arc<PartialSymbol>>,
    /// File-scope psymbols; unsorted.
    pub static_psymbols: Vec<Arc<PartialSymbol>>,

    /// Psymtabs whose expansion must precede this one's.
    pub dependencies: Vec<PsymtabRef>,

    /// When set, this is a *shared* psymtab (an include referenced from
    /// several units) and the field names one canonical includer. Shared
    /// psymtabs never answer address queries directly; lookups traverse
    /// to the user.
    pub user: Option<PsymtabRef>,

    /// The filename is a descriptive tag, not a source file.
    pub anonymous: bool,

    /// The unit's language.
    pub language: Language,

    /// Transient search-walk state.
    pub searched_flag: SearchStatus,

    /// Whether this unit has been expanded into a full compunit.
    pub readin: bool,
    /// The expansion result, once available.
    pub compunit: Option<CompunitRef>,

    /// Reader-owned locator describing where this unit's debug records
    /// live (offsets, sizes). Opaque to the core.
    pub read_locator: Option<Box<dyn Any + Send + Sync>>,
}

impl PartialSymtab {
    pub(crate) fn new(filename: Arc<str>) -> PartialSymtab {
        PartialSymtab {
            filename,
            fullname: None,
            dirname: None,
            text_low: UnrelocatedAddr(0),
            text_high: UnrelocatedAddr(0),
            text_low_valid: false,
            text_high_valid: false,
            global_psymbols: Vec::new(),
            static_psymbols: Vec::new(),
            dependencies: Vec::new(),
            user: None,
            anonymous: false,
            language: Language::Unknown,
            searched_flag: SearchStatus::NotSearched,
            readin: false,
            compunit: None,
            read_locator: None,
        }
    }

    /// The unrelocated low text address.
    pub fn unrelocated_text_low(&self) -> UnrelocatedAddr {
        self.text_low
    }

    /// The unrelocated high text address.
    pub fn unrelocated_text_high(&self) -> UnrelocatedAddr {
        self.text_high
    }

    /// The relocated low text address.
    pub fn text_low(&self, objfile: &ObjectFile) -> u64 {
        self.text_low.offset(objfile.text_section_offset())
    }

    /// The relocated high text address.
    pub fn text_high(&self, objfile: &ObjectFile) -> u64 {
        self.text_high.offset(objfile.text_section_offset())
    }

    /// Sets the low text address and marks it valid.
    pub fn set_text_low(&mut self, addr: UnrelocatedAddr) {
        self.text_low = addr;
        self.text_low_valid = true;
    }

    /// Sets the high text address and marks it valid.
    pub fn set_text_high(&mut self, addr: UnrelocatedAddr) {
        self.text_high = addr;
        self.text_high_valid = true;
    }

    /// True when this psymtab contains no symbols at all. It may still
    /// carry dependencies or line-number information.
    pub fn empty(&self) -> bool {
        self.global_psymbols.is_empty() && self.static_psymbols.is_empty()
    }

    /// Whether the relocated range of this table covers `pc`.
    pub fn covers_pc(&self, objfile: &ObjectFile, pc: u64) -> bool {
        pc >= self.text_low(objfile) && pc < self.text_high(objfile)
    }

    /// Finishes construction: shrinks the symbol lists and sorts the
    /// globals by search name. The static list stays unsorted.
    pub fn end(&mut self) {
        self.global_psymbols.shrink_to_fit();
        self.static_psymbols.shrink_to_fit();

        dmsort::sort_by(&mut self.global_psymbols, |a, b| {
            ordered_compare(a.search_name(), b.search_name())
        });
    }
}

impl fmt::Debug for PartialSymtab {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PartialSymtab")
            .field("filename", &self.filename)
            .field("text_low", &self.text_low)
            .field("text_high", &self.text_high)
            .field("globals", &self.global_psymbols.len())
            .field("statics", &self.static_psymbols.len())
            .field("dependencies", &self.dependencies.len())
            .field("readin", &self.readin)
            .finish()
    }
}
