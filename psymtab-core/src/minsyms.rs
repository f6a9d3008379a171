use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use psymtab_common::{impl_str_serde, UnrelocatedAddr};

use crate::base::SymbolName;

/// An error returned for unknown or invalid [`MinimalSymbolKind`] names.
#[derive(Debug)]
pub struct UnknownMinimalSymbolKindError;

impl fmt::Display for UnknownMinimalSymbolKindError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown minimal symbol kind")
    }
}

impl std::error::Error for UnknownMinimalSymbolKindError {}

/// The coarse classification of a minimal symbol.
///
/// The `File*` kinds are file-local (static) variants of their global
/// counterparts; lookups can scope them to a source file.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum MinimalSymbolKind {
    /// Global text (function) symbol.
    Text,
    /// Global data symbol.
    Data,
    /// Global zero-initialized data.
    Bss,
    /// Absolute symbol; the value is not an address.
    Abs,
    /// File-local text symbol.
    FileText,
    /// File-local data symbol.
    FileData,
    /// File-local zero-initialized data.
    FileBss,
    /// Anything else.
    Unknown,
}

impl MinimalSymbolKind {
    /// Returns the name of the kind.
    pub fn name(self) -> &'static str {
        match self {
            MinimalSymbolKind::Text => "text",
            MinimalSymbolKind::Data => "data",
            MinimalSymbolKind::Bss => "bss",
            MinimalSymbolKind::Abs => "abs",
            MinimalSymbolKind::FileText => "file-text",
            MinimalSymbolKind::FileData => "file-data",
            MinimalSymbolKind::FileBss => "file-bss",
            MinimalSymbolKind::Unknown => "unknown",
        }
    }

    /// True for text kinds, global or file-local.
    pub fn is_text(self) -> bool {
        matches!(self, MinimalSymbolKind::Text | MinimalSymbolKind::FileText)
    }

    /// True for the file-local kinds.
    pub fn is_file_local(self) -> bool {
        matches!(
            self,
            MinimalSymbolKind::FileText | MinimalSymbolKind::FileData | MinimalSymbolKind::FileBss
        )
    }
}

impl fmt::Display for MinimalSymbolKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for MinimalSymbolKind {
    type Err = UnknownMinimalSymbolKindError;

    fn from_str(string: &str) -> Result<MinimalSymbolKind, UnknownMinimalSymbolKindError> {
        Ok(match string {
            "text" => MinimalSymbolKind::Text,
            "data" => MinimalSymbolKind::Data,
            "bss" => MinimalSymbolKind::Bss,
            "abs" => MinimalSymbolKind::Abs,
            "file-text" => MinimalSymbolKind::FileText,
            "file-data" => MinimalSymbolKind::FileData,
            "file-bss" => MinimalSymbolKind::FileBss,
            "unknown" => MinimalSymbolKind::Unknown,
            _ => return Err(UnknownMinimalSymbolKindError),
        })
    }
}

impl_str_serde!(MinimalSymbolKind);

/// A name+address record used when no richer debug info is available.
///
/// Minimal symbols come from linker symbol tables and are recorded during
/// the same initial pass that builds the partial symbol tables.
#[derive(Clone, Debug)]
pub struct MinimalSymbol {
    /// The symbol's names.
    pub name: SymbolName,
    /// Unrelocated address.
    pub address: UnrelocatedAddr,
    /// Symbol kind.
    pub kind: MinimalSymbolKind,
    /// Section index, if attributable.
    pub section: Option<usize>,
    /// Size in bytes, when the source format provides one (ELF `st_size`);
    /// zero otherwise.
    pub size: u64,
    /// For file-local kinds, the source file the symbol belongs to.
    pub file: Option<Arc<str>>,
}

/// The per-object minimal-symbol table.
///
/// Recording and lookup are split into phases: parsers `record` into a
/// pending list while reading, and `install` moves the pending records
/// into the searchable table and rebuilds the hash indexes. Lookups during
/// a build therefore see only previously installed symbols — exactly what
/// the stabs function-address fixup needs, which consults symbols
/// installed by an earlier reader over the same file.
#[derive(Debug, Default)]
pub struct MinimalSymbolTable {
    installed: Vec<MinimalSymbol>,
    pending: Vec<MinimalSymbol>,
    by_linkage: HashMap<Arc<str>, Vec<usize>>,
    by_search: HashMap<Arc<str>, Vec<usize>>,
    by_address: Vec<usize>,
    current_file: Option<Arc<str>>,
}

impl MinimalSymbolTable {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the source file that subsequent file-local records belong to.
    pub fn set_current_source_file(&mut self, file: Option<Arc<str>>) {
        self.current_file = file;
    }

    /// Records a minimal symbol into the pending list.
    pub fn record(
        &mut self,
        name: SymbolName,
        address: UnrelocatedAddr,
        kind: MinimalSymbolKind,
        section: Option<usize>,
    ) {
        self.record_full(name, address, kind, section, 0)
    }

    /// Records a minimal symbol with a known size.
    pub fn record_full(
        &mut self,
        name: SymbolName,
        address: UnrelocatedAddr,
        kind: MinimalSymbolKind,
        section: Option<usize>,
        size: u64,
    ) {
        let file = kind
            .is_file_local()
            .then(|| self.current_file.clone())
            .flatten();
        self.pending.push(MinimalSymbol {
            name,
            address,
            kind,
            section,
            size,
            file,
        });
    }

    /// Moves pending records into the searchable table and rebuilds the
    /// name and address indexes.
    pub fn install(&mut self) {
        if self.pending.is_empty() {
            return;
        }

        self.installed.append(&mut self.pending);

        self.by_linkage.clear();
        self.by_search.clear();
        for (idx, msym) in self.installed.iter().enumerate() {
            self.by_linkage
                .entry(Arc::clone(msym.name.linkage_arc()))
                .or_default()
                .push(idx);
            if !Arc::ptr_eq(msym.name.linkage_arc(), msym.name.search_arc()) {
                self.by_search
                    .entry(Arc::clone(msym.name.search_arc()))
                    .or_default()
                    .push(idx);
            }
        }

        let installed = &self.installed;
        let mut order: Vec<usize> = (0..installed.len()).collect();
        dmsort::sort_by_key(&mut order, |&idx| installed[idx].address);
        self.by_address = order;
    }

    /// Looks up an installed symbol by name, optionally scoped to a
    /// source file.
    ///
    /// File-local symbols only match when `file` is unset or agrees;
    /// global symbols always match. A file-scoped match wins over a
    /// global one.
    pub fn lookup(&self, name: &str, file: Option<&str>) -> Option<&MinimalSymbol> {
        let candidates = self
            .by_linkage
            .get(name)
            .or_else(|| self.by_search.get(name))?;

        let mut global_hit = None;
        for &idx in candidates {
            let msym = &self.installed[idx];
            if msym.kind.is_file_local() {
                match (file, msym.file.as_deref()) {
                    (Some(wanted), Some(actual)) if psymtab_common::filename_eq(wanted, actual) => {
                        return Some(msym)
                    }
                    (None, _) => return Some(msym),
                    _ => continue,
                }
            } else if global_hit.is_none() {
                global_hit = Some(msym);
            }
        }
        global_hit
    }

    /// Resolves a stab function name to a minimal symbol.
    ///
    /// The name is cut at the stab's `:` separator. When the plain name
    /// misses, a trailing underscore is tried (Sun Fortran decorates
    /// minimal symbols that way), then both again without the file
    /// qualification. The underscore retry is attempted regardless of the
    /// object's symbol leading character, preserving the historical
    /// behavior.
    pub fn lookup_function(&self, name: &str, file: Option<&str>) -> Option<&MinimalSymbol> {
        let base = name.split(':').next().unwrap_or(name);
        let decorated = format!("{base}_");

        self.lookup(base, file)
            .or_else(|| self.lookup(&decorated, file))
            .or_else(|| file.and_then(|_| self.lookup(base, None)))
            .or_else(|| file.and_then(|_| self.lookup(&decorated, None)))
    }

    /// Finds the installed symbol with the highest address at or below
    /// `address`.
    pub fn lookup_by_address(&self, address: UnrelocatedAddr) -> Option<&MinimalSymbol> {
        let pos = self
            .by_address
            .partition_point(|&idx| self.installed[idx].address <= address);
        pos.checked_sub(1)
            .map(|p| &self.installed[self.by_address[p]])
    }

    /// Number of installed symbols.
    pub fn len(&self) -> usize {
        self.installed.len()
    }

    /// True if no symbols have been installed.
    pub fn is_empty(&self) -> bool {
        self.installed.is_empty()
    }

    /// Iterates over installed symbols in record order.
    pub fn iter(&self) -> impl Iterator<Item = &MinimalSymbol> {
        self.installed.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::objfile::PerBfdStorage;
    use psymtab_common::Language;
    use similar_asserts::assert_eq;

    fn name(per_bfd: &mut PerBfdStorage, s: &str) -> SymbolName {
        SymbolName::compute(s, Language::C, per_bfd)
    }

    #[test]
    fn test_record_install_lookup() {
        let mut per_bfd = PerBfdStorage::new();
        let mut table = MinimalSymbolTable::new();

        table.record(
            name(&mut per_bfd, "main"),
            UnrelocatedAddr(0x1000),
            MinimalSymbolKind::Text,
            Some(0),
        );
        assert!(table.lookup("main", None).is_none(), "pending is invisible");

        table.install();
        let msym = table.lookup("main", None).expect("installed");
        assert_eq!(msym.address, UnrelocatedAddr(0x1000));
    }

    #[test]
    fn test_file_scoping() {
        let mut per_bfd = PerBfdStorage::new();
        let mut table = MinimalSymbolTable::new();

        let file_a = per_bfd.intern("a.c");
        table.set_current_source_file(Some(file_a));
        table.record(
            name(&mut per_bfd, "helper"),
            UnrelocatedAddr(0x100),
            MinimalSymbolKind::FileText,
            Some(0),
        );
        let file_b = per_bfd.intern("b.c");
        table.set_current_source_file(Some(file_b));
        table.record(
            name(&mut per_bfd, "helper"),
            UnrelocatedAddr(0x200),
            MinimalSymbolKind::FileText,
            Some(0),
        );
        table.install();

        assert_eq!(
            table.lookup("helper", Some("b.c")).unwrap().address,
            UnrelocatedAddr(0x200)
        );
        assert_eq!(
            table.lookup("helper", Some("a.c")).unwrap().address,
            UnrelocatedAddr(0x100)
        );
        assert!(table.lookup("helper", Some("c.c")).is_none());
    }

    #[test]
    fn test_lookup_function_fortran_underscore() {
        let mut per_bfd = PerBfdStorage::new();
        let mut table = MinimalSymbolTable::new();

        table.record(
            name(&mut per_bfd, "calc_"),
            UnrelocatedAddr(0x400),
            MinimalSymbolKind::Text,
            Some(0),
        );
        table.install();

        let msym = table.lookup_function("calc:F12", None).expect("retry hit");
        assert_eq!(msym.address, UnrelocatedAddr(0x400));
    }

    #[test]
    fn test_lookup_by_address() {
        let mut per_bfd = PerBfdStorage::new();
        let mut table = MinimalSymbolTable::new();

        for (n, addr) in [("a", 0x100u64), ("b", 0x200), ("c", 0x300)] {
            table.record(
                name(&mut per_bfd, n),
                UnrelocatedAddr(addr),
                MinimalSymbolKind::Text,
                Some(0),
            );
        }
        table.install();

        assert_eq!(
            table
                .lookup_by_address(UnrelocatedAddr(0x250))
                .unwrap()
                .name
                .linkage_name(),
            "b"
        );
        assert!(table.lookup_by_address(UnrelocatedAddr(0xff)).is_none());
    }
}
