use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use psymtab_common::{canonicalize_cpp_name, impl_str_serde, Language, UnrelocatedAddr};

use crate::objfile::{ObjectFile, PerBfdStorage};

/// An error returned for unknown or invalid [`Domain`] names.
#[derive(Debug)]
pub struct UnknownDomainError;

impl fmt::Display for UnknownDomainError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown symbol domain")
    }
}

impl std::error::Error for UnknownDomainError {}

/// The name space a symbol lives in.
///
/// Lookups are always qualified by a domain: a C program may use the same
/// identifier as a variable and a struct tag, and the two must not shadow
/// each other.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum Domain {
    /// No domain recorded.
    Undef,
    /// Variables, functions, constants, typedef names.
    Var,
    /// Struct, union and enum tags.
    Struct,
    /// Modules (Fortran, Modula-2).
    Module,
    /// Goto labels.
    Label,
    /// Fortran common blocks.
    CommonBlock,
}

impl Domain {
    /// Returns the name of the domain.
    pub fn name(self) -> &'static str {
        match self {
            Domain::Undef => "undef",
            Domain::Var => "var",
            Domain::Struct => "struct",
            Domain::Module => "module",
            Domain::Label => "label",
            Domain::CommonBlock => "common-block",
        }
    }

    /// Checks whether a symbol recorded in this domain satisfies a lookup
    /// in `wanted`, given the symbol's language.
    ///
    /// In languages where a type declaration also introduces the name into
    /// the ordinary name space (C++, Objective-C, Ada), `Var` and `Struct`
    /// are interchangeable.
    pub fn matches(self, language: Language, wanted: Domain) -> bool {
        if self == wanted {
            return true;
        }

        match language {
            Language::Cpp | Language::ObjC | Language::Ada => matches!(
                (self, wanted),
                (Domain::Var, Domain::Struct) | (Domain::Struct, Domain::Var)
            ),
            _ => false,
        }
    }
}

impl fmt::Display for Domain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Domain {
    type Err = UnknownDomainError;

    fn from_str(string: &str) -> Result<Domain, UnknownDomainError> {
        Ok(match string {
            "undef" => Domain::Undef,
            "var" => Domain::Var,
            "struct" => Domain::Struct,
            "module" => Domain::Module,
            "label" => Domain::Label,
            "common-block" => Domain::CommonBlock,
            _ => return Err(UnknownDomainError),
        })
    }
}

/// An error returned for unknown or invalid [`AddressClass`] names.
#[derive(Debug)]
pub struct UnknownAddressClassError;

impl fmt::Display for UnknownAddressClassError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown address class")
    }
}

impl std::error::Error for UnknownAddressClassError {}

/// How the value of a symbol is to be interpreted.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum AddressClass {
    /// No class recorded.
    Undef,
    /// An integral constant; the value is the constant itself.
    Const,
    /// Statically allocated; the value is an address.
    Static,
    /// Lives in a register.
    Register,
    /// A function argument.
    Arg,
    /// An argument passed by reference.
    RefArg,
    /// A stack-frame local.
    Local,
    /// A type name; the value is meaningless.
    Typedef,
    /// A goto label; the value is an address.
    Label,
    /// A function or lexical block; the value is the start address.
    Block,
    /// A constant stored as raw bytes.
    ConstBytes,
    /// Not yet resolved against the loader.
    Unresolved,
    /// Optimized away entirely.
    OptimizedOut,
    /// Location is computed by an expression.
    Computed,
    /// A Fortran common block.
    CommonBlock,
    /// An argument whose register holds the address of the value.
    RegparmAddr,
}

impl AddressClass {
    /// Returns the name of the address class.
    pub fn name(self) -> &'static str {
        match self {
            AddressClass::Undef => "undef",
            AddressClass::Const => "const",
            AddressClass::Static => "static",
            AddressClass::Register => "register",
            AddressClass::Arg => "arg",
            AddressClass::RefArg => "ref-arg",
            AddressClass::Local => "local",
            AddressClass::Typedef => "typedef",
            AddressClass::Label => "label",
            AddressClass::Block => "block",
            AddressClass::ConstBytes => "const-bytes",
            AddressClass::Unresolved => "unresolved",
            AddressClass::OptimizedOut => "optimized-out",
            AddressClass::Computed => "computed",
            AddressClass::CommonBlock => "common-block",
            AddressClass::RegparmAddr => "regparm-addr",
        }
    }
}

impl fmt::Display for AddressClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for AddressClass {
    type Err = UnknownAddressClassError;

    fn from_str(string: &str) -> Result<AddressClass, UnknownAddressClassError> {
        Ok(match string {
            "undef" => AddressClass::Undef,
            "const" => AddressClass::Const,
            "static" => AddressClass::Static,
            "register" => AddressClass::Register,
            "arg" => AddressClass::Arg,
            "ref-arg" => AddressClass::RefArg,
            "local" => AddressClass::Local,
            "typedef" => AddressClass::Typedef,
            "label" => AddressClass::Label,
            "block" => AddressClass::Block,
            "const-bytes" => AddressClass::ConstBytes,
            "unresolved" => AddressClass::Unresolved,
            "optimized-out" => AddressClass::OptimizedOut,
            "computed" => AddressClass::Computed,
            "common-block" => AddressClass::CommonBlock,
            "regparm-addr" => AddressClass::RegparmAddr,
            _ => return Err(UnknownAddressClassError),
        })
    }
}

impl_str_serde!(Domain);
impl_str_serde!(AddressClass);

/// The pair of names a symbol carries, both interned.
///
/// `linkage` is the name exactly as the toolchain emitted it. `natural`
/// is the search name — canonicalized for C++ (template whitespace,
/// qualifier spacing) and identical to `linkage` everywhere else. Both
/// point into the per-object intern table, so equality of names reduces to
/// pointer equality.
#[derive(Clone, Debug)]
pub struct SymbolName {
    linkage: Arc<str>,
    natural: Arc<str>,
    language: Language,
}

impl SymbolName {
    /// Computes and interns the names for a raw symbol string.
    ///
    /// Canonicalization results are cached in the per-object storage so
    /// repeated occurrences of a name do not re-run the canonicalizer.
    pub fn compute(name: &str, language: Language, per_bfd: &mut PerBfdStorage) -> SymbolName {
        let linkage = per_bfd.intern(name);

        let natural = match language {
            Language::Cpp | Language::ObjC => per_bfd.canonical_name(&linkage, |raw| {
                canonicalize_cpp_name(raw)
            }),
            _ => Arc::clone(&linkage),
        };

        SymbolName {
            linkage,
            natural,
            language,
        }
    }

    /// Builds a name from already-interned parts.
    pub fn from_parts(linkage: Arc<str>, natural: Arc<str>, language: Language) -> SymbolName {
        SymbolName {
            linkage,
            natural,
            language,
        }
    }

    /// The name as emitted by the toolchain.
    pub fn linkage_name(&self) -> &str {
        &self.linkage
    }

    /// The interned linkage allocation; identity-comparable.
    pub fn linkage_arc(&self) -> &Arc<str> {
        &self.linkage
    }

    /// The canonical name used for searching and sorting.
    pub fn search_name(&self) -> &str {
        &self.natural
    }

    /// The interned search-name allocation.
    pub fn search_arc(&self) -> &Arc<str> {
        &self.natural
    }

    /// The language this name was computed under.
    pub fn language(&self) -> Language {
        self.language
    }

    /// Whether `lookup` matches this name under the language's rules.
    ///
    /// Ada folds case; everything else compares exactly.
    pub fn matches(&self, lookup: &str) -> bool {
        match self.language {
            Language::Ada => self.natural.eq_ignore_ascii_case(lookup),
            _ => *self.natural == *lookup,
        }
    }
}

/// A compact record summarizing one externally observable name found in a
/// compilation unit before full parsing.
///
/// Partial symbols are created through the [`PsymbolBcache`], which
/// deduplicates them; client code always holds them as
/// `Arc<PartialSymbol>` and may rely on pointer identity for equal
/// symbols.
///
/// [`PsymbolBcache`]: crate::PsymbolBcache
#[derive(Clone)]
pub struct PartialSymbol {
    name: SymbolName,
    address: UnrelocatedAddr,
    section: Option<usize>,
    domain: Domain,
    class: AddressClass,
}

impl PartialSymbol {
    /// Creates a new partial symbol. Prefer going through the bcache.
    pub fn new(
        name: SymbolName,
        address: UnrelocatedAddr,
        section: Option<usize>,
        domain: Domain,
        class: AddressClass,
    ) -> PartialSymbol {
        PartialSymbol {
            name,
            address,
            section,
            domain,
            class,
        }
    }

    /// The symbol's names.
    pub fn name(&self) -> &SymbolName {
        &self.name
    }

    /// The canonical search name.
    pub fn search_name(&self) -> &str {
        self.name.search_name()
    }

    /// The address exactly as emitted, before relocation.
    pub fn unrelocated_address(&self) -> UnrelocatedAddr {
        self.address
    }

    /// The runtime address, relocated by the owning object's section
    /// offsets.
    pub fn address(&self, objfile: &ObjectFile) -> u64 {
        self.address.offset(objfile.section_offset(self.section))
    }

    /// The section index this symbol was attributed to, if any.
    pub fn section(&self) -> Option<usize> {
        self.section
    }

    /// The symbol's name space.
    pub fn domain(&self) -> Domain {
        self.domain
    }

    /// The symbol's address class.
    pub fn class(&self) -> AddressClass {
        self.class
    }

    /// The language the symbol's unit was in when it was recorded.
    pub fn language(&self) -> Language {
        self.name.language()
    }
}

impl fmt::Debug for PartialSymbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PartialSymbol")
            .field("name", &self.search_name())
            .field("address", &self.address)
            .field("domain", &self.domain)
            .field("class", &self.class)
            .finish()
    }
}
