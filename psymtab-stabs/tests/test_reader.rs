use psymtab_common::{Language, UnrelocatedAddr};
use psymtab_core::{
    AddressClass, BlockKind, Domain, MinimalSymbolKind, ObjectFile, PsymbolFunctions,
    PsymtabStorage, SymbolName,
};
use psymtab_stabs::stab::*;
use psymtab_stabs::{build_psymtabs, Nlist, NlistFormat, StabsExpander, StabsInput};
use similar_asserts::assert_eq;

/// Assembles a synthetic stabs stream: records plus string table.
struct StabWriter {
    format: NlistFormat,
    records: Vec<u8>,
    strings: Vec<u8>,
}

impl StabWriter {
    fn new() -> StabWriter {
        StabWriter {
            format: NlistFormat::little32(),
            records: Vec::new(),
            strings: vec![0],
        }
    }

    fn add_string(&mut self, s: &str) -> u32 {
        if s.is_empty() {
            return 0;
        }
        let offset = self.strings.len() as u32;
        self.strings.extend_from_slice(s.as_bytes());
        self.strings.push(0);
        offset
    }

    fn stab(&mut self, typ: u8, name: &str, value: u64) {
        let strx = self.add_string(name);
        self.raw(typ, strx, value);
    }

    fn raw(&mut self, typ: u8, strx: u32, value: u64) {
        let format = self.format;
        format.emit(
            &mut self.records,
            &Nlist {
                strx,
                typ,
                other: 0,
                desc: 0,
                value,
            },
        );
    }

    fn input(&self, text_addr: u64, text_size: u64) -> StabsInput<'_> {
        StabsInput {
            symbols: &self.records,
            strings: &self.strings,
            format: self.format,
            text_addr,
            text_size,
            relative_strtab: false,
        }
    }
}

fn test_objfile() -> ObjectFile {
    let mut objfile = ObjectFile::new("a.out");
    objfile.section_offsets = vec![0, 0, 0];
    objfile.sect_index_text = Some(0);
    objfile.sect_index_data = Some(1);
    objfile.sect_index_bss = Some(2);
    objfile
}

#[test]
fn test_empty_section() {
    let writer = StabWriter::new();
    let mut objfile = test_objfile();
    let mut storage = PsymtabStorage::new();

    build_psymtabs(&mut objfile, &mut storage, &writer.input(0, 0), None).unwrap();
    assert!(!storage.has_psymtabs());
}

#[test]
fn test_directory_so_pair() {
    let mut writer = StabWriter::new();
    writer.stab(N_SO, "proj/src/", 0);
    writer.stab(N_SO, "main.c", 0x1000);
    writer.stab(N_FUN, "main:F0", 0x1000);
    writer.stab(N_SO, "", 0x2000);

    let mut objfile = test_objfile();
    let mut storage = PsymtabStorage::new();
    build_psymtabs(&mut objfile, &mut storage, &writer.input(0x1000, 0x1000), None).unwrap();

    assert_eq!(storage.len(), 1);
    let pst = storage.iter().next().unwrap();
    let table = &storage[pst];
    assert_eq!(&*table.filename, "main.c");
    assert_eq!(table.dirname.as_deref(), Some("proj/src/"));
    assert_eq!(table.unrelocated_text_low(), UnrelocatedAddr(0x1000));
    assert_eq!(table.unrelocated_text_high(), UnrelocatedAddr(0x2000));
    assert_eq!(table.language, Language::C);

    assert_eq!(table.global_psymbols.len(), 1);
    let main = &table.global_psymbols[0];
    assert_eq!(main.search_name(), "main");
    assert_eq!(main.class(), AddressClass::Block);
    assert_eq!(main.unrelocated_address(), UnrelocatedAddr(0x1000));
}

#[test]
fn test_bincl_excl_dependency_and_expansion() {
    let mut writer = StabWriter::new();
    writer.stab(N_SO, "a.c", 0x1000);
    writer.stab(N_BINCL, "h.h", 7);
    writer.stab(N_GSYM, "a:G0", 0);
    writer.stab(N_SO, "b.c", 0x2000);
    writer.stab(N_EXCL, "h.h", 7);
    writer.stab(N_GSYM, "b:G0", 0);

    let mut objfile = test_objfile();
    let mut storage = PsymtabStorage::new();
    let complaints =
        build_psymtabs(&mut objfile, &mut storage, &writer.input(0x1000, 0x2000), None).unwrap();
    assert_eq!(complaints.total(), 0);

    // a.c, the h.h include sub-psymtab, and b.c.
    assert_eq!(storage.len(), 3);
    let by_name = |name: &str| {
        storage
            .iter()
            .find(|&p| &*storage[p].filename == name)
            .unwrap()
    };
    let a = by_name("a.c");
    let b = by_name("b.c");
    let h = by_name("h.h");

    assert_eq!(storage[b].dependencies, vec![a]);
    assert_eq!(storage[h].dependencies, vec![a]);

    // Looking up "a" expands a.c without touching b.c; looking up "b"
    // expands b.c, which pulls its dependency in first.
    let mut quick = PsymbolFunctions::new(storage);
    let mut expander = StabsExpander::new(writer.input(0x1000, 0x2000));

    let cu = quick
        .lookup_symbol(&mut objfile, &mut expander, BlockKind::Global, "a", Domain::Var)
        .unwrap()
        .expect("a found");
    assert_eq!(&*objfile.compunit(cu).primary_filetab().filename, "a.c");
    assert!(!quick.storage()[b].readin);

    let cu = quick
        .lookup_symbol(&mut objfile, &mut expander, BlockKind::Global, "b", Domain::Var)
        .unwrap()
        .expect("b found");
    assert_eq!(&*objfile.compunit(cu).primary_filetab().filename, "b.c");
    assert!(quick.storage()[a].readin);

    // a.c's compunit lists the header it carried.
    let a_cu = quick.storage()[a].compunit.unwrap();
    let files: Vec<_> = objfile
        .compunit(a_cu)
        .filetabs()
        .map(|f| f.filename.to_string())
        .collect();
    assert_eq!(files, vec!["a.c".to_owned(), "h.h".to_owned()]);
}

#[test]
fn test_enum_constants_from_stream() {
    let mut writer = StabWriter::new();
    writer.stab(N_SO, "colors.c", 0x1000);
    writer.stab(N_LSYM, "Color:T12=eRED:0,GREEN:1,BLUE:2,;", 0);
    writer.stab(N_SO, "", 0x2000);

    let mut objfile = test_objfile();
    let mut storage = PsymtabStorage::new();
    build_psymtabs(&mut objfile, &mut storage, &writer.input(0x1000, 0x1000), None).unwrap();

    let pst = storage.iter().next().unwrap();
    let syms: Vec<_> = storage[pst]
        .static_psymbols
        .iter()
        .map(|p| (p.search_name().to_owned(), p.domain(), p.class()))
        .collect();
    assert_eq!(
        syms,
        vec![
            ("Color".to_owned(), Domain::Struct, AddressClass::Typedef),
            ("RED".to_owned(), Domain::Var, AddressClass::Const),
            ("GREEN".to_owned(), Domain::Var, AddressClass::Const),
            ("BLUE".to_owned(), Domain::Var, AddressClass::Const),
        ]
    );
}

#[test]
fn test_name_continuation_across_records() {
    let mut writer = StabWriter::new();
    writer.stab(N_SO, "long.c", 0x1000);
    writer.stab(N_GSYM, "verylongname\\", 0);
    writer.stab(N_GSYM, "continued:G0", 0);
    writer.stab(N_SO, "", 0x2000);

    let mut objfile = test_objfile();
    let mut storage = PsymtabStorage::new();
    build_psymtabs(&mut objfile, &mut storage, &writer.input(0x1000, 0x1000), None).unwrap();

    let pst = storage.iter().next().unwrap();
    assert_eq!(storage.global_names(pst), vec!["verylongnamecontinued"]);
}

#[test]
fn test_fun_empty_name_closes_function_range() {
    let mut writer = StabWriter::new();
    writer.stab(N_SO, "x.c", 0x1000);
    writer.stab(N_FUN, "f:F1", 0x1000);
    writer.stab(N_FUN, "", 0x80);

    let mut objfile = test_objfile();
    let mut storage = PsymtabStorage::new();
    build_psymtabs(&mut objfile, &mut storage, &writer.input(0x1000, 0x50), None).unwrap();

    let pst = storage.iter().next().unwrap();
    assert_eq!(storage[pst].unrelocated_text_high(), UnrelocatedAddr(0x1080));
}

#[test]
fn test_bad_string_offset_substituted() {
    let mut writer = StabWriter::new();
    writer.stab(N_SO, "ok.c", 0x1000);
    writer.raw(N_GSYM, 0xffff, 0);
    writer.stab(N_GSYM, "fine:G0", 0);

    let mut objfile = test_objfile();
    let mut storage = PsymtabStorage::new();
    let complaints =
        build_psymtabs(&mut objfile, &mut storage, &writer.input(0x1000, 0x100), None).unwrap();

    assert_eq!(complaints.count("bad-string-offset"), 1);
    let pst = storage.iter().next().unwrap();
    assert_eq!(storage.global_names(pst), vec!["fine"]);
}

#[test]
fn test_truncated_section_fails() {
    let mut writer = StabWriter::new();
    writer.stab(N_SO, "t.c", 0);
    writer.records.pop();

    let mut objfile = test_objfile();
    let mut storage = PsymtabStorage::new();
    let err = build_psymtabs(&mut objfile, &mut storage, &writer.input(0, 0), None).unwrap_err();
    assert_eq!(err.kind(), psymtab_stabs::StabsErrorKind::Truncated);
    assert!(!storage.has_psymtabs());
}

#[test]
fn test_interrupt_discards_partial_tables() {
    let mut writer = StabWriter::new();
    writer.stab(N_SO, "one.c", 0x1000);
    writer.stab(N_GSYM, "a:G0", 0);
    writer.stab(N_SO, "two.c", 0x2000);
    writer.stab(N_GSYM, "b:G0", 0);

    let mut objfile = test_objfile();
    let mut storage = PsymtabStorage::new();

    let calls = std::cell::Cell::new(0usize);
    let quit = move || {
        calls.set(calls.get() + 1);
        calls.get() > 3
    };
    let err = build_psymtabs(&mut objfile, &mut storage, &writer.input(0x1000, 0x2000), Some(&quit))
        .unwrap_err();

    assert_eq!(err.kind(), psymtab_stabs::StabsErrorKind::Interrupted);
    assert!(!storage.has_psymtabs(), "partial tables rolled back");
}

#[test]
fn test_sofun_function_address_from_minimal_symbols() {
    let mut objfile = test_objfile();
    objfile.arch.sofun_address_maybe_missing = true;

    // The ELF reader already installed the function's minimal symbol,
    // decorated the Fortran way.
    let name = SymbolName::compute("calc_", Language::Unknown, objfile.per_bfd_mut());
    objfile.minimal_symbols.record_full(
        name,
        UnrelocatedAddr(0x4000),
        MinimalSymbolKind::Text,
        Some(0),
        0x40,
    );
    objfile.minimal_symbols.install();

    let mut writer = StabWriter::new();
    writer.stab(N_SO, "f.f", 0);
    writer.stab(N_FUN, "calc:F1", 0);

    let mut storage = PsymtabStorage::new();
    let complaints =
        build_psymtabs(&mut objfile, &mut storage, &writer.input(0x4000, 0x100), None).unwrap();
    assert_eq!(complaints.count("function-minsym-missing"), 0);

    let pst = storage.iter().next().unwrap();
    let table = &storage[pst];
    assert_eq!(table.unrelocated_text_low(), UnrelocatedAddr(0x4000));
    assert_eq!(table.global_psymbols[0].search_name(), "calc");
    assert_eq!(
        table.global_psymbols[0].unrelocated_address(),
        UnrelocatedAddr(0x4000)
    );
}

#[test]
fn test_solaris_relative_string_table() {
    // Two per-file string tables, concatenated; each file starts with an
    // N_UNDF shift record whose value is its table's size.
    let mut t1 = vec![0u8];
    let one_c = t1.len() as u32;
    t1.extend_from_slice(b"one.c\0");
    let a_g0 = t1.len() as u32;
    t1.extend_from_slice(b"a:G0\0");

    let mut t2 = vec![0u8];
    let two_c = t2.len() as u32;
    t2.extend_from_slice(b"two.c\0");
    let b_g0 = t2.len() as u32;
    t2.extend_from_slice(b"b:G0\0");

    let mut writer = StabWriter::new();
    writer.strings = t1.clone();
    writer.strings.extend_from_slice(&t2);

    writer.raw(N_UNDF, 1, t1.len() as u64);
    writer.raw(N_SO, one_c, 0x1000);
    writer.raw(N_GSYM, a_g0, 0);
    writer.raw(N_UNDF, 1, t2.len() as u64);
    writer.raw(N_SO, two_c, 0x2000);
    writer.raw(N_GSYM, b_g0, 0);

    let mut objfile = test_objfile();
    let mut storage = PsymtabStorage::new();
    let mut input = writer.input(0x1000, 0x2000);
    input.relative_strtab = true;
    build_psymtabs(&mut objfile, &mut storage, &input, None).unwrap();

    let names: Vec<_> = storage
        .iter_creation_order()
        .map(|p| storage[p].filename.to_string())
        .collect();
    assert_eq!(names, vec!["one.c".to_owned(), "two.c".to_owned()]);

    let two = storage.iter().next().unwrap();
    assert_eq!(storage.global_names(two), vec!["b"]);
}

#[test]
fn test_minimal_symbol_recording() {
    let mut objfile = test_objfile();
    objfile.arch.symbol_leading_char = b'_';

    let mut writer = StabWriter::new();
    writer.stab(N_TEXT | N_EXT, "_start", 0x100);
    writer.stab(N_DATA | N_EXT, "_errno", 0x2000);
    writer.stab(N_BSS | N_EXT, "_heap", 0x3000);
    writer.stab(N_DATA, "__DYNAMIC", 0x2800);
    writer.stab(N_DATA, "_local", 0x2900);

    let mut storage = PsymtabStorage::new();
    build_psymtabs(&mut objfile, &mut storage, &writer.input(0x100, 0x1000), None).unwrap();

    let kinds: Vec<_> = objfile
        .minimal_symbols
        .iter()
        .map(|m| (m.name.linkage_name().to_owned(), m.kind))
        .collect();
    assert_eq!(
        kinds,
        vec![
            ("start".to_owned(), MinimalSymbolKind::Text),
            ("errno".to_owned(), MinimalSymbolKind::Data),
            ("heap".to_owned(), MinimalSymbolKind::Bss),
            // __DYNAMIC is promoted to global data even though local.
            ("_DYNAMIC".to_owned(), MinimalSymbolKind::Data),
            ("local".to_owned(), MinimalSymbolKind::FileData),
        ]
    );

    assert_eq!(
        objfile.minimal_symbols.lookup("start", None).unwrap().address,
        UnrelocatedAddr(0x100)
    );
}

#[test]
fn test_relocation_law() {
    let mut objfile = test_objfile();
    objfile.section_offsets = vec![0x10000, 0x20000, 0];

    let mut writer = StabWriter::new();
    writer.stab(N_SO, "main.c", 0x1000);
    writer.stab(N_STSYM, "counter:S5", 0x2000);

    let mut storage = PsymtabStorage::new();
    build_psymtabs(&mut objfile, &mut storage, &writer.input(0x1000, 0x100), None).unwrap();

    let pst = storage.iter().next().unwrap();
    let psym = &storage[pst].static_psymbols[0];
    assert_eq!(psym.section(), Some(1));
    assert_eq!(psym.unrelocated_address(), UnrelocatedAddr(0x2000));
    assert_eq!(psym.address(&objfile), 0x2000 + 0x20000);
    assert_eq!(storage[pst].text_low(&objfile), 0x1000 + 0x10000);
}

#[test]
fn test_lib_boundary_closes_psymtab() {
    let mut writer = StabWriter::new();
    writer.stab(N_SO, "x.c", 0x1000);
    writer.stab(N_GSYM, "x:G0", 0);
    writer.stab(N_TEXT, "crt0.o", 0x2000);
    writer.stab(N_SO, "y.c", 0x3000);
    writer.stab(N_GSYM, "y:G0", 0);

    let mut objfile = test_objfile();
    let mut storage = PsymtabStorage::new();
    build_psymtabs(&mut objfile, &mut storage, &writer.input(0x1000, 0x3000), None).unwrap();

    let names: Vec<_> = storage
        .iter_creation_order()
        .map(|p| storage[p].filename.to_string())
        .collect();
    assert_eq!(names, vec!["x.c".to_owned(), "y.c".to_owned()]);

    let x = storage.iter_creation_order().next().unwrap();
    assert_eq!(storage[x].unrelocated_text_high(), UnrelocatedAddr(0x2000));
}

#[test]
fn test_check_psymtabs_on_built_tables() {
    let mut writer = StabWriter::new();
    writer.stab(N_SO, "a.c", 0x1000);
    writer.stab(N_FUN, "f:F1", 0x1000);
    writer.stab(N_GSYM, "g:G0", 0);
    writer.stab(N_SO, "b.c", 0x2000);
    writer.stab(N_FUN, "h:f1", 0x2000);

    let mut objfile = test_objfile();
    let mut storage = PsymtabStorage::new();
    build_psymtabs(&mut objfile, &mut storage, &writer.input(0x1000, 0x2000), None).unwrap();

    let quick = PsymbolFunctions::new(storage);
    assert_eq!(quick.check_psymtabs(&objfile), Vec::<String>::new());
}
