use psymtab_common::{Language, UnrelocatedAddr};
use psymtab_core::{
    AddressClass, BlockKind, Domain, ObjectFile, PsymbolPlacement, PsymbolFunctions, PsymtabRef,
    PsymtabStorage,
};
use similar_asserts::assert_eq;

fn fixture() -> (ObjectFile, PsymtabStorage) {
    let mut objfile = ObjectFile::new("a.out");
    objfile.section_offsets = vec![0, 0];
    objfile.sect_index_text = Some(0);
    objfile.sect_index_data = Some(1);
    (objfile, PsymtabStorage::new())
}

#[allow(clippy::too_many_arguments)]
fn add(
    storage: &mut PsymtabStorage,
    objfile: &mut ObjectFile,
    pst: PsymtabRef,
    name: &str,
    domain: Domain,
    class: AddressClass,
    addr: u64,
    language: Language,
) {
    storage.add_psymbol(
        pst,
        name,
        domain,
        class,
        Some(1),
        PsymbolPlacement::Global,
        UnrelocatedAddr(addr),
        language,
        objfile,
    );
}

#[test]
fn test_binary_search_over_duplicate_names() {
    let (mut objfile, mut storage) = fixture();
    let pst = storage.new_psymtab("dup.c", &mut objfile);

    // Several entries share a name; the matching scan must keep going
    // until the domain agrees.
    add(&mut storage, &mut objfile, pst, "aaa", Domain::Var, AddressClass::Static, 0x10, Language::C);
    add(&mut storage, &mut objfile, pst, "mid", Domain::Struct, AddressClass::Typedef, 0, Language::C);
    add(&mut storage, &mut objfile, pst, "mid", Domain::Var, AddressClass::Static, 0x20, Language::C);
    add(&mut storage, &mut objfile, pst, "zzz", Domain::Var, AddressClass::Static, 0x30, Language::C);
    storage[pst].end();

    let quick = PsymbolFunctions::new(storage);

    let var = quick
        .lookup_partial_symbol(pst, "mid", BlockKind::Global, Domain::Var)
        .expect("var entry");
    assert_eq!(var.class(), AddressClass::Static);

    let tag = quick
        .lookup_partial_symbol(pst, "mid", BlockKind::Global, Domain::Struct)
        .expect("struct entry");
    assert_eq!(tag.class(), AddressClass::Typedef);

    assert!(quick
        .lookup_partial_symbol(pst, "mid", BlockKind::Global, Domain::Module)
        .is_none());
}

#[test]
fn test_cpp_tag_and_var_domains_interchange() {
    let (mut objfile, mut storage) = fixture();
    let pst = storage.new_psymtab("widget.cc", &mut objfile);

    // In C++ a class name lives in both name spaces.
    add(
        &mut storage,
        &mut objfile,
        pst,
        "Widget",
        Domain::Struct,
        AddressClass::Typedef,
        0,
        Language::Cpp,
    );
    storage[pst].end();

    let quick = PsymbolFunctions::new(storage);
    assert!(quick
        .lookup_partial_symbol(pst, "Widget", BlockKind::Global, Domain::Var)
        .is_some());

    // The same record in a C unit would not leak across domains.
    let (mut objfile, mut storage) = fixture();
    let pst = storage.new_psymtab("widget.c", &mut objfile);
    add(
        &mut storage,
        &mut objfile,
        pst,
        "widget_tag",
        Domain::Struct,
        AddressClass::Typedef,
        0,
        Language::C,
    );
    storage[pst].end();

    let quick = PsymbolFunctions::new(storage);
    assert!(quick
        .lookup_partial_symbol(pst, "widget_tag", BlockKind::Global, Domain::Var)
        .is_none());
}

#[test]
fn test_ada_case_folding_lookup() {
    let (mut objfile, mut storage) = fixture();
    let pst = storage.new_psymtab("pack.adb", &mut objfile);

    add(
        &mut storage,
        &mut objfile,
        pst,
        "Pack__Do_Thing",
        Domain::Var,
        AddressClass::Block,
        0x100,
        Language::Ada,
    );
    add(
        &mut storage,
        &mut objfile,
        pst,
        "other",
        Domain::Var,
        AddressClass::Static,
        0x200,
        Language::C,
    );
    storage[pst].end();

    let quick = PsymbolFunctions::new(storage);

    // The ordered compare sorts the mixed-case entry before the
    // lowercase lookup string; the rewind still finds it.
    let hit = quick
        .lookup_partial_symbol(pst, "pack__do_thing", BlockKind::Global, Domain::Var)
        .expect("case-folded hit");
    assert_eq!(hit.search_name(), "Pack__Do_Thing");

    // Non-Ada symbols stay case-sensitive.
    assert!(quick
        .lookup_partial_symbol(pst, "OTHER", BlockKind::Global, Domain::Var)
        .is_none());
}

#[test]
fn test_statics_found_by_linear_scan_only() {
    let (mut objfile, mut storage) = fixture();
    let pst = storage.new_psymtab("s.c", &mut objfile);

    storage.add_psymbol(
        pst,
        "hidden",
        Domain::Var,
        AddressClass::Static,
        Some(1),
        PsymbolPlacement::Static,
        UnrelocatedAddr(0x40),
        Language::C,
        &mut objfile,
    );
    storage[pst].end();

    let quick = PsymbolFunctions::new(storage);
    assert!(quick
        .lookup_partial_symbol(pst, "hidden", BlockKind::Static, Domain::Var)
        .is_some());
    assert!(quick
        .lookup_partial_symbol(pst, "hidden", BlockKind::Global, Domain::Var)
        .is_none());
}

#[test]
fn test_has_unexpanded_transitions() {
    let (mut objfile, mut storage) = fixture();
    let a = storage.new_psymtab("a.c", &mut objfile);
    let b = storage.new_psymtab("b.c", &mut objfile);

    let mut quick = PsymbolFunctions::new(storage);
    assert!(quick.has_symbols());
    assert!(quick.has_unexpanded_symtabs());

    quick.storage_mut()[a].readin = true;
    assert!(quick.has_unexpanded_symtabs());

    quick.storage_mut()[b].readin = true;
    assert!(!quick.has_unexpanded_symtabs());
    assert!(quick.has_symbols());
}

#[test]
fn test_forget_cached_source_info() {
    let (mut objfile, mut storage) = fixture();
    let pst = storage.new_psymtab("cache.c", &mut objfile);
    storage[pst].dirname = Some(objfile.per_bfd_mut().intern("/work"));

    let mut quick = PsymbolFunctions::new(storage);
    assert_eq!(quick.psymtab_to_fullname(pst), "/work/cache.c");
    assert!(quick.storage()[pst].fullname.is_some());

    quick.forget_cached_source_info();
    assert!(quick.storage()[pst].fullname.is_none());

    // Resolution works again afterwards.
    assert_eq!(quick.psymtab_to_fullname(pst), "/work/cache.c");
}
