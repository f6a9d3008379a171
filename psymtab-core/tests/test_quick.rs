use std::sync::Arc;

use psymtab_common::{Language, UnrelocatedAddr};
use psymtab_core::{
    AddressClass, BlockKind, BlockSearchFlags, CompunitSymtab, Domain, Error, Expander, FileTab,
    MinimalSymbolKind, ObjectFile, PsymbolPlacement, PsymbolFunctions, PsymtabRef, PsymtabStorage,
    SearchDomain, SymbolName,
};
use similar_asserts::assert_eq;

/// Expander that produces skeletal compunits and counts its invocations.
#[derive(Default)]
struct CountingExpander {
    expanded: Vec<String>,
}

impl Expander for CountingExpander {
    fn expand(
        &mut self,
        objfile: &mut ObjectFile,
        storage: &mut PsymtabStorage,
        pst: PsymtabRef,
    ) -> Result<(), Error> {
        let filename = Arc::clone(&storage[pst].filename);
        self.expanded.push(filename.to_string());
        let cu = objfile.add_compunit(CompunitSymtab::new(FileTab {
            filename,
            language: storage[pst].language,
        }));
        storage[pst].compunit = Some(cu);
        Ok(())
    }
}

fn text_objfile() -> ObjectFile {
    let mut objfile = ObjectFile::new("a.out");
    objfile.section_offsets = vec![0, 0];
    objfile.sect_index_text = Some(0);
    objfile.sect_index_data = Some(1);
    objfile
}

fn add_block_psym(
    storage: &mut PsymtabStorage,
    objfile: &mut ObjectFile,
    pst: PsymtabRef,
    name: &str,
    addr: u64,
) {
    storage.add_psymbol(
        pst,
        name,
        Domain::Var,
        AddressClass::Block,
        Some(0),
        PsymbolPlacement::Global,
        UnrelocatedAddr(addr),
        Language::C,
        objfile,
    );
}

#[test]
fn test_pc_refinement_prefers_defining_unit() {
    let mut objfile = text_objfile();
    let mut storage = PsymtabStorage::new();

    let a = storage.new_psymtab_with_addr("a.c", &mut objfile, UnrelocatedAddr(0x1000));
    storage[a].set_text_high(UnrelocatedAddr(0x1200));
    add_block_psym(&mut storage, &mut objfile, a, "foo", 0x1100);
    storage[a].end();

    let b = storage.new_psymtab_with_addr("b.c", &mut objfile, UnrelocatedAddr(0x1000));
    storage[b].set_text_high(UnrelocatedAddr(0x1500));
    add_block_psym(&mut storage, &mut objfile, b, "bar", 0x1050);
    storage[b].end();

    let msym_name = SymbolName::compute("foo", Language::C, objfile.per_bfd_mut());
    objfile.minimal_symbols.record(
        msym_name,
        UnrelocatedAddr(0x1100),
        MinimalSymbolKind::Text,
        Some(0),
    );
    objfile.minimal_symbols.install();
    let msym = objfile.minimal_symbols.lookup("foo", None).cloned().unwrap();

    let mut quick = PsymbolFunctions::new(storage);
    let mut expander = CountingExpander::default();
    let cu = quick
        .find_pc_sect_compunit_symtab(
            &mut objfile,
            &mut expander,
            Some(&msym),
            0x1100,
            Some(0),
            false,
        )
        .unwrap()
        .expect("compunit for pc");

    assert_eq!(&*objfile.compunit(cu).primary_filetab().filename, "a.c");
    assert_eq!(expander.expanded, vec!["a.c".to_owned()]);
}

#[test]
fn test_lookup_symbol_expands_dependencies() {
    let mut objfile = text_objfile();
    let mut storage = PsymtabStorage::new();

    let a = storage.new_psymtab("a.c", &mut objfile);
    storage.add_psymbol(
        a,
        "a",
        Domain::Var,
        AddressClass::Static,
        Some(1),
        PsymbolPlacement::Global,
        UnrelocatedAddr(0x10),
        Language::C,
        &mut objfile,
    );
    storage[a].end();

    let b = storage.new_psymtab("b.c", &mut objfile);
    storage.add_psymbol(
        b,
        "b",
        Domain::Var,
        AddressClass::Static,
        Some(1),
        PsymbolPlacement::Global,
        UnrelocatedAddr(0x20),
        Language::C,
        &mut objfile,
    );
    storage[b].dependencies = vec![a];
    storage[b].end();

    let mut quick = PsymbolFunctions::new(storage);
    let mut expander = CountingExpander::default();

    // Looking up "a" expands only its defining unit.
    let cu = quick
        .lookup_symbol(&mut objfile, &mut expander, BlockKind::Global, "a", Domain::Var)
        .unwrap()
        .expect("hit");
    assert_eq!(&*objfile.compunit(cu).primary_filetab().filename, "a.c");
    assert_eq!(expander.expanded, vec!["a.c".to_owned()]);
    assert!(!quick.storage()[b].readin);

    // Looking up "b" expands b, whose dependency is already read in.
    let cu = quick
        .lookup_symbol(&mut objfile, &mut expander, BlockKind::Global, "b", Domain::Var)
        .unwrap()
        .expect("hit");
    assert_eq!(&*objfile.compunit(cu).primary_filetab().filename, "b.c");
    assert_eq!(
        expander.expanded,
        vec!["a.c".to_owned(), "b.c".to_owned()]
    );
}

#[test]
fn test_lookup_global_symbol_language_no_expansion() {
    let mut objfile = text_objfile();
    let mut storage = PsymtabStorage::new();

    let pst = storage.new_psymtab("main.cc", &mut objfile);
    storage.add_psymbol(
        pst,
        "widget",
        Domain::Var,
        AddressClass::Static,
        Some(1),
        PsymbolPlacement::Global,
        UnrelocatedAddr(0x40),
        Language::Cpp,
        &mut objfile,
    );
    storage[pst].end();

    let quick = PsymbolFunctions::new(storage);
    assert_eq!(
        quick.lookup_global_symbol_language("widget", Domain::Var),
        Some(Language::Cpp)
    );
    assert_eq!(quick.lookup_global_symbol_language("absent", Domain::Var), None);
    // A domain mismatch is a miss in plain C.
    assert_eq!(
        quick.lookup_global_symbol_language("widget", Domain::Module),
        None
    );
    assert!(!quick.storage()[pst].readin, "no expansion happened");
}

#[test]
fn test_expand_symtabs_matching_file_filter() {
    let mut objfile = text_objfile();
    let mut storage = PsymtabStorage::new();

    storage.new_psymtab("keep.c", &mut objfile);
    storage.new_psymtab("skip.c", &mut objfile);
    // Give both a psymbol so neither looks degenerate.
    let refs: Vec<_> = storage.iter().collect();
    for (i, &pst) in refs.iter().enumerate() {
        storage.add_psymbol(
            pst,
            &format!("sym{i}"),
            Domain::Var,
            AddressClass::Static,
            Some(1),
            PsymbolPlacement::Global,
            UnrelocatedAddr(0x10 * (i as u64 + 1)),
            Language::C,
            &mut objfile,
        );
        storage[pst].end();
    }

    let mut quick = PsymbolFunctions::new(storage);
    let mut expander = CountingExpander::default();
    let mut notified = Vec::new();

    let completed = quick
        .expand_symtabs_matching(
            &mut objfile,
            &mut expander,
            Some(&|filename, _basenames| filename.contains("keep")),
            None,
            None,
            &mut |cu| {
                notified.push(cu);
                true
            },
            BlockSearchFlags::BOTH,
            None,
            SearchDomain::All,
        )
        .unwrap();

    assert!(completed);
    assert_eq!(expander.expanded, vec!["keep.c".to_owned()]);
    assert_eq!(notified.len(), 1);
}

#[test]
fn test_expand_symtabs_matching_symbol_walk_and_early_stop() {
    let mut objfile = text_objfile();
    let mut storage = PsymtabStorage::new();

    for (file, sym) in [("one.c", "alpha"), ("two.c", "alpha"), ("three.c", "beta")] {
        let pst = storage.new_psymtab(file, &mut objfile);
        storage.add_psymbol(
            pst,
            sym,
            Domain::Var,
            AddressClass::Static,
            Some(1),
            PsymbolPlacement::Static,
            UnrelocatedAddr(0x100),
            Language::C,
            &mut objfile,
        );
        storage[pst].end();
    }

    let mut quick = PsymbolFunctions::new(storage);
    let mut expander = CountingExpander::default();
    let mut count = 0;

    // Terminate after the first notification.
    let completed = quick
        .expand_symtabs_matching(
            &mut objfile,
            &mut expander,
            None,
            Some("alpha"),
            None,
            &mut |_cu| {
                count += 1;
                false
            },
            BlockSearchFlags::BOTH,
            Some(Domain::Var),
            SearchDomain::All,
        )
        .unwrap();

    assert!(!completed);
    assert_eq!(count, 1);
    assert_eq!(expander.expanded.len(), 1);
}

#[test]
fn test_shared_psymtab_resolves_through_user() {
    let mut objfile = text_objfile();
    let mut storage = PsymtabStorage::new();

    let user = storage.new_psymtab("user.c", &mut objfile);
    let shared = storage.new_psymtab("shared.h", &mut objfile);
    storage[shared].user = Some(user);
    storage[user].dependencies = vec![shared];

    let mut quick = PsymbolFunctions::new(storage);
    let mut expander = CountingExpander::default();
    let cu = quick
        .psymtab_to_symtab(&mut objfile, &mut expander, shared)
        .unwrap()
        .expect("resolved through user");

    assert_eq!(&*objfile.compunit(cu).primary_filetab().filename, "user.c");
    assert!(!quick.storage()[shared].readin, "shared table stays virtual");
}

#[test]
fn test_map_symbol_filenames_skips_shared_and_expanded() {
    let mut objfile = text_objfile();
    let mut storage = PsymtabStorage::new();

    let plain = storage.new_psymtab("plain.c", &mut objfile);
    storage[plain].dirname = Some(objfile.per_bfd_mut().intern("/src"));

    let shared = storage.new_psymtab("shared.h", &mut objfile);
    storage[shared].user = Some(plain);

    let done = storage.new_psymtab("done.c", &mut objfile);
    storage[done].readin = true;

    let anon = storage.new_psymtab("<<C++-namespaces>>", &mut objfile);
    storage[anon].anonymous = true;

    let mut quick = PsymbolFunctions::new(storage);
    let mut seen = Vec::new();
    quick.map_symbol_filenames(
        &mut |name, fullname| seen.push((name.to_owned(), fullname.map(str::to_owned))),
        true,
    );

    assert_eq!(
        seen,
        vec![("plain.c".to_owned(), Some("/src/plain.c".to_owned()))]
    );
}

#[test]
fn test_find_last_source_symtab_skips_headers() {
    let mut objfile = text_objfile();
    let mut storage = PsymtabStorage::new();

    storage.new_psymtab("main.c", &mut objfile);
    storage.new_psymtab("defs.h", &mut objfile);

    let mut quick = PsymbolFunctions::new(storage);
    let mut expander = CountingExpander::default();
    let cu = quick
        .find_last_source_symtab(&mut objfile, &mut expander)
        .unwrap()
        .expect("a source symtab");

    assert_eq!(&*objfile.compunit(cu).primary_filetab().filename, "main.c");
}

#[test]
fn test_compute_main_name() {
    let mut objfile = text_objfile();
    let mut storage = PsymtabStorage::new();

    let pst = storage.new_psymtab("prog.f", &mut objfile);
    storage.add_psymbol(
        pst,
        "MAIN__",
        Domain::Var,
        AddressClass::Block,
        Some(0),
        PsymbolPlacement::Global,
        UnrelocatedAddr(0x100),
        Language::Fortran,
        &mut objfile,
    );
    storage[pst].end();

    let quick = PsymbolFunctions::new(storage);
    quick.compute_main_name(&mut objfile);
    assert_eq!(objfile.main_name(), Some(("MAIN__", Language::Fortran)));
}

#[test]
fn test_check_psymtabs_clean_and_dirty() {
    let mut objfile = text_objfile();
    let mut storage = PsymtabStorage::new();

    let good = storage.new_psymtab_with_addr("good.c", &mut objfile, UnrelocatedAddr(0x1000));
    storage[good].set_text_high(UnrelocatedAddr(0x2000));
    add_block_psym(&mut storage, &mut objfile, good, "f", 0x1000);
    storage[good].end();

    let quick = PsymbolFunctions::new(storage);
    assert_eq!(quick.check_psymtabs(&objfile), Vec::<String>::new());

    // Now break an invariant: inverted text range.
    let mut storage = PsymtabStorage::new();
    let bad = storage.new_psymtab_with_addr("bad.c", &mut objfile, UnrelocatedAddr(0x2000));
    storage[bad].set_text_high(UnrelocatedAddr(0x1000));
    add_block_psym(&mut storage, &mut objfile, bad, "g", 0x2000);
    storage[bad].end();

    let quick = PsymbolFunctions::new(storage);
    let problems = quick.check_psymtabs(&objfile);
    assert_eq!(problems.len(), 1);
    assert!(problems[0].contains("inverted text range"));
}

#[test]
fn test_dump_psymtab_output() {
    let mut objfile = text_objfile();
    let mut storage = PsymtabStorage::new();

    let pst = storage.new_psymtab_with_addr("good.c", &mut objfile, UnrelocatedAddr(0x1000));
    storage[pst].set_text_high(UnrelocatedAddr(0x2000));
    add_block_psym(&mut storage, &mut objfile, pst, "f", 0x1000);
    storage[pst].end();

    let quick = PsymbolFunctions::new(storage);
    let mut buffer = Vec::new();
    quick.dump_psymtab(&objfile, pst, &mut buffer).unwrap();
    let output = String::from_utf8(buffer).unwrap();

    insta::assert_snapshot!(output, @r###"
    Partial symtab for source file good.c
      Language: unknown
      Relocated text addresses: 0x1000 -- 0x2000
      Has been read in: no
      Global partial symbols:
        `f', var, block, section 0, 0x1000
    "###);
}
