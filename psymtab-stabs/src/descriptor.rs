//! The colon-separated symbol descriptor decoder.
//!
//! Debugging stabs carry names of the shape `name:<descriptor><type-info>`.
//! Only the first descriptor byte matters at indexing time; it decides
//! whether the record contributes a psymbol and into which domain, class
//! and list it goes. The same decoder serves the plain stabs reader and
//! the stabs-in-ECOFF mode of the mdebug reader.
//!
//! Names can be continued across records: a trailing backslash (or a `?`
//! at the end of the buffer) means the next record's string carries on.
//! The caller supplies the continuation source as a closure over its
//! record stream.

use psymtab_common::{Language, UnrelocatedAddr};
use psymtab_core::{
    AddressClass, ComplaintSink, Domain, ObjectFile, PsymtabBuilder, PsymtabStorage,
};

/// What the decoder concluded about one stab string.
#[derive(Debug)]
pub enum ScanOutcome {
    /// No `:` separator; not a debugging symbol.
    NotDebug,
    /// Consumed; any psymbols were emitted by the decoder.
    Handled,
    /// A function definition (`f` or `F` descriptor). The caller is
    /// responsible for address fixups and for emitting the psymbol,
    /// since those need parser state the decoder does not have.
    Function {
        /// The full (continuation-spliced) stab string.
        namestring: String,
        /// The symbol name, cut before the separator.
        symbol: String,
        /// `F` (global) rather than `f` (static).
        global: bool,
    },
}

/// A continuation source over the enclosing record stream.
pub type NextSymbolText<'a> = dyn FnMut() -> Option<String> + 'a;

/// Decodes one debugging stab string and emits psymbols for it.
///
/// `value` is the record's value field, used by the descriptors that
/// carry an address. `data_sect_index` is where variables without section
/// information are attributed, per the enclosing object's data/bss/rodata
/// fallback.
#[allow(clippy::too_many_arguments)]
pub fn process_stab_string(
    mut builder: Option<&mut PsymtabBuilder>,
    storage: &mut PsymtabStorage,
    objfile: &mut ObjectFile,
    complaints: &mut ComplaintSink,
    namestring: &str,
    value: UnrelocatedAddr,
    language: Language,
    data_sect_index: Option<usize>,
    next_symbol_text: &mut NextSymbolText<'_>,
) -> ScanOutcome {
    // Splice continued names before looking at anything else.
    let mut name = namestring.to_owned();
    while name.ends_with('\\') {
        name.pop();
        match next_symbol_text() {
            Some(cont) => name.push_str(&cont),
            None => break,
        }
    }

    let Some(colon) = name.find(':') else {
        return ScanOutcome::NotDebug;
    };
    let symbol = name[..colon].to_owned();
    let bytes = name.as_bytes();
    let desc = bytes.get(colon + 1).copied().unwrap_or(0);

    match desc {
        b'S' => {
            match builder {
                Some(ref mut b) => b.add_static(
                    storage,
                    objfile,
                    &symbol,
                    Domain::Var,
                    AddressClass::Static,
                    data_sect_index,
                    value,
                    language,
                ),
                None => complaints.complain("static-outside-cu", || {
                    format!("static `{symbol}' appears to be defined outside of all compilation units")
                }),
            }
            ScanOutcome::Handled
        }

        b'G' => {
            // The addresses in these entries are reported to be wrong;
            // full expansion fixes them up from the minimal symbols.
            match builder {
                Some(ref mut b) => b.add_global(
                    storage,
                    objfile,
                    &symbol,
                    Domain::Var,
                    AddressClass::Static,
                    data_sect_index,
                    value,
                    language,
                ),
                None => complaints.complain("global-outside-cu", || {
                    format!("global `{symbol}' appears to be defined outside of all compilation units")
                }),
            }
            ScanOutcome::Handled
        }

        b'T' | b't' => {
            let mut pos = colon + 2;

            if desc == b'T' {
                // A 'T' defining an anonymous enum may have an empty or
                // single-space name; those don't define a symbol, though
                // their enumerators below still do.
                if colon >= 2 || (colon == 1 && bytes[0] != b' ') {
                    match builder {
                        Some(ref mut b) => {
                            b.add_static(
                                storage,
                                objfile,
                                &symbol,
                                Domain::Struct,
                                AddressClass::Typedef,
                                None,
                                UnrelocatedAddr(0),
                                language,
                            );
                            if bytes.get(pos) == Some(&b't') {
                                // Also a typedef with the same name.
                                b.add_static(
                                    storage,
                                    objfile,
                                    &symbol,
                                    Domain::Var,
                                    AddressClass::Typedef,
                                    None,
                                    UnrelocatedAddr(0),
                                    language,
                                );
                                pos += 1;
                            }
                        }
                        None => complaints.complain("type-outside-cu", || {
                            format!(
                                "enum, struct, or union `{symbol}' appears to be \
                                 defined outside of all compilation units"
                            )
                        }),
                    }
                }
            } else if colon > 0 {
                // a name is there, not just :t...
                match builder {
                    Some(ref mut b) => b.add_static(
                        storage,
                        objfile,
                        &symbol,
                        Domain::Var,
                        AddressClass::Typedef,
                        None,
                        UnrelocatedAddr(0),
                        language,
                    ),
                    None => complaints.complain("typedef-outside-cu", || {
                        format!(
                            "typename `{symbol}' appears to be defined \
                             outside of all compilation units"
                        )
                    }),
                }
            }

            scan_enum_constants(
                builder,
                storage,
                objfile,
                complaints,
                &name,
                pos,
                language,
                next_symbol_text,
            );
            ScanOutcome::Handled
        }

        b'c' => {
            // Constant, e.g. from "const" in Pascal.
            match builder {
                Some(ref mut b) => b.add_static(
                    storage,
                    objfile,
                    &symbol,
                    Domain::Var,
                    AddressClass::Const,
                    None,
                    UnrelocatedAddr(0),
                    language,
                ),
                None => complaints.complain("constant-outside-cu", || {
                    format!(
                        "constant `{symbol}' appears to be defined \
                         outside of all compilation units"
                    )
                }),
            }
            ScanOutcome::Handled
        }

        b'f' | b'F' => {
            if builder.is_none() {
                complaints.complain("function-outside-cu", || {
                    format!(
                        "function `{symbol}' appears to be defined \
                         outside of all compilation units"
                    )
                });
            }
            ScanOutcome::Function {
                namestring: name,
                symbol,
                global: desc == b'F',
            }
        }

        // Static symbols of local scope, extensions of structure
        // symbols, live-range annotations: all ignorable here.
        b'V' | b'(' | b'0'..=b'9' | b'-' | b'#' => ScanOutcome::Handled,

        // A C++ nested symbol; looking up the outer name reads in the
        // right symtab, so nothing to record.
        b':' => ScanOutcome::Handled,

        other => {
            // The second and subsequent stabs of a continued stab can
            // show up here; treat them like an unknown extension.
            complaints.complain("unknown-symbol-descriptor", || {
                format!("unknown symbol descriptor `{}'", other as char)
            });
            ScanOutcome::Handled
        }
    }
}

/// Walks the enumerator list of an `e`-type specification, emitting one
/// constant psymbol per member.
///
/// The shape is `<name> ":" ("t"|"T") [<number> "="] "e" {<member> ":"
/// <value> ","} ";"`, with possible continuation records in the middle of
/// the member list.
#[allow(clippy::too_many_arguments)]
fn scan_enum_constants(
    mut builder: Option<&mut PsymtabBuilder>,
    storage: &mut PsymtabStorage,
    objfile: &mut ObjectFile,
    complaints: &mut ComplaintSink,
    name: &str,
    pos: usize,
    language: Language,
    next_symbol_text: &mut NextSymbolText<'_>,
) {
    let mut buf: Vec<u8> = name.as_bytes()[pos.min(name.len())..].to_vec();
    let mut p = 0usize;

    // The type may be given a number, and numbers can come in pairs
    // like (0,26); skip over all of it.
    while matches!(
        buf.get(p),
        Some(b'0'..=b'9') | Some(b'(') | Some(b',') | Some(b')') | Some(b'=')
    ) {
        p += 1;
    }

    if buf.get(p) != Some(&b'e') {
        return;
    }
    p += 1;

    // The aix4 compiler emits extra crud before the members.
    if buf.get(p) == Some(&b'-') {
        while p < buf.len() && buf[p] != b':' {
            p += 1;
        }
        p += 1;
    }

    // A comma can end the list instead of a semicolon; accept either.
    loop {
        match buf.get(p) {
            None | Some(b';') | Some(b',') => break,
            _ => {}
        }

        // Cretinous dbx symbol name continuation: the rest of the list
        // lives in the next record's string.
        if buf[p] == b'\\' || (buf[p] == b'?' && p + 1 == buf.len()) {
            match next_symbol_text() {
                Some(cont) => {
                    buf = cont.into_bytes();
                    p = 0;
                    continue;
                }
                None => break,
            }
        }

        let start = p;
        while p < buf.len() && buf[p] != b':' {
            p += 1;
        }
        let member = String::from_utf8_lossy(&buf[start..p]).into_owned();

        // The value doesn't matter for enum constants in psymtabs, just
        // in full symtabs.
        match builder {
            Some(ref mut b) => b.add_static(
                storage,
                objfile,
                &member,
                Domain::Var,
                AddressClass::Const,
                None,
                UnrelocatedAddr(0),
                language,
            ),
            None => complaints.complain("enum-constant-outside-cu", || {
                format!(
                    "enum constant `{member}' appears to be defined \
                     outside of all compilation units"
                )
            }),
        }

        // Skip over the value, then the comma.
        while p < buf.len() && buf[p] != b',' {
            p += 1;
        }
        if p < buf.len() {
            p += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use similar_asserts::assert_eq;

    fn fixture() -> (ObjectFile, PsymtabStorage, ComplaintSink) {
        let mut objfile = ObjectFile::new("a.out");
        objfile.section_offsets = vec![0, 0];
        objfile.sect_index_text = Some(0);
        objfile.sect_index_data = Some(1);
        (objfile, PsymtabStorage::new(), ComplaintSink::new())
    }

    fn no_continuation() -> Box<dyn FnMut() -> Option<String>> {
        Box::new(|| None)
    }

    #[test]
    fn test_enum_constants() {
        let (mut objfile, mut storage, mut complaints) = fixture();
        let mut builder = PsymtabBuilder::start(&mut storage, &mut objfile, "colors.c", None);

        let outcome = process_stab_string(
            Some(&mut builder),
            &mut storage,
            &mut objfile,
            &mut complaints,
            "Color:T12=eRED:0,GREEN:1,BLUE:2,;",
            UnrelocatedAddr(0),
            Language::C,
            Some(1),
            &mut *no_continuation(),
        );
        assert!(matches!(outcome, ScanOutcome::Handled));

        let pst = builder.pst();
        let names: Vec<_> = storage[pst]
            .static_psymbols
            .iter()
            .map(|p| (p.search_name().to_owned(), p.domain(), p.class()))
            .collect();
        assert_eq!(
            names,
            vec![
                ("Color".to_owned(), Domain::Struct, AddressClass::Typedef),
                ("RED".to_owned(), Domain::Var, AddressClass::Const),
                ("GREEN".to_owned(), Domain::Var, AddressClass::Const),
                ("BLUE".to_owned(), Domain::Var, AddressClass::Const),
            ]
        );
    }

    #[test]
    fn test_tt_emits_both_domains() {
        let (mut objfile, mut storage, mut complaints) = fixture();
        let mut builder = PsymtabBuilder::start(&mut storage, &mut objfile, "t.c", None);

        process_stab_string(
            Some(&mut builder),
            &mut storage,
            &mut objfile,
            &mut complaints,
            "list:Tt20=s8next:21,;",
            UnrelocatedAddr(0),
            Language::C,
            Some(1),
            &mut *no_continuation(),
        );

        let pst = builder.pst();
        let domains: Vec<_> = storage[pst]
            .static_psymbols
            .iter()
            .map(|p| p.domain())
            .collect();
        assert_eq!(domains, vec![Domain::Struct, Domain::Var]);
    }

    #[test]
    fn test_continuation_splices_name() {
        let (mut objfile, mut storage, mut complaints) = fixture();
        let mut builder = PsymtabBuilder::start(&mut storage, &mut objfile, "c.c", None);

        let mut rest = vec!["continued:G0".to_owned()].into_iter();
        let outcome = process_stab_string(
            Some(&mut builder),
            &mut storage,
            &mut objfile,
            &mut complaints,
            "verylongname\\",
            UnrelocatedAddr(0x100),
            Language::C,
            Some(1),
            &mut || rest.next(),
        );
        assert!(matches!(outcome, ScanOutcome::Handled));

        let pst = builder.pst();
        assert_eq!(storage.global_names(pst), vec!["verylongnamecontinued"]);
    }

    #[test]
    fn test_enum_continuation_mid_list() {
        let (mut objfile, mut storage, mut complaints) = fixture();
        let mut builder = PsymtabBuilder::start(&mut storage, &mut objfile, "e.c", None);

        let mut rest = vec!["TWO:1,THREE:2,;".to_owned()].into_iter();
        process_stab_string(
            Some(&mut builder),
            &mut storage,
            &mut objfile,
            &mut complaints,
            "Nums:t5=eONE:0,?",
            UnrelocatedAddr(0),
            Language::C,
            Some(1),
            &mut || rest.next(),
        );

        let pst = builder.pst();
        let names: Vec<_> = storage[pst]
            .static_psymbols
            .iter()
            .map(|p| p.search_name().to_owned())
            .collect();
        assert_eq!(names, vec!["Nums", "ONE", "TWO", "THREE"]);
    }

    #[test]
    fn test_anonymous_enum_tag_skipped() {
        let (mut objfile, mut storage, mut complaints) = fixture();
        let mut builder = PsymtabBuilder::start(&mut storage, &mut objfile, "a.c", None);

        process_stab_string(
            Some(&mut builder),
            &mut storage,
            &mut objfile,
            &mut complaints,
            " :T3=eA:0,B:1,;",
            UnrelocatedAddr(0),
            Language::C,
            Some(1),
            &mut *no_continuation(),
        );

        let pst = builder.pst();
        let names: Vec<_> = storage[pst]
            .static_psymbols
            .iter()
            .map(|p| p.search_name().to_owned())
            .collect();
        // No psym for the single-space tag, but the enumerators count.
        assert_eq!(names, vec!["A", "B"]);
    }

    #[test]
    fn test_unknown_descriptor_complains_once() {
        let (mut objfile, mut storage, mut complaints) = fixture();
        let mut builder = PsymtabBuilder::start(&mut storage, &mut objfile, "u.c", None);

        for _ in 0..3 {
            process_stab_string(
                Some(&mut builder),
                &mut storage,
                &mut objfile,
                &mut complaints,
                "odd:Z99",
                UnrelocatedAddr(0),
                Language::C,
                Some(1),
                &mut *no_continuation(),
            );
        }

        assert_eq!(complaints.count("unknown-symbol-descriptor"), 3);
        assert!(storage[builder.pst()].empty());
    }

    #[test]
    fn test_not_debug_without_colon() {
        let (mut objfile, mut storage, mut complaints) = fixture();
        let outcome = process_stab_string(
            None,
            &mut storage,
            &mut objfile,
            &mut complaints,
            "gcc2_compiled.",
            UnrelocatedAddr(0),
            Language::C,
            None,
            &mut *no_continuation(),
        );
        assert!(matches!(outcome, ScanOutcome::NotDebug));
    }
}
