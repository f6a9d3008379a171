use std::sync::Arc;

use scroll::Endian;

use psymtab_common::{Language, UnrelocatedAddr};
use psymtab_core::{
    AddressClass, ComplaintSink, Domain, MinimalSymbolKind, ObjectFile, PsymtabBuilder,
    PsymtabRef, PsymtabStorage, SymbolName,
};
use psymtab_stabs::descriptor::{process_stab_string, ScanOutcome};
use psymtab_stabs::stab;

use crate::error::{MdebugError, MdebugErrorKind};
use crate::expand::MdebugLocator;
use crate::raw::{self, bt, lang, sc, st, Fdr, MdebugView, Symr, INDEX_NIL};

/// The sentinel name marking an FDR whose local symbols are encapsulated
/// stabs, emitted by mips-tfile as the second symbol of the file.
pub const STABS_SENTINEL: &str = "@stabs";

/// The marker ECOFF stashes in the index field of encapsulated stabs.
const STAB_CODE_MASK: u32 = 0x8F300;

/// Filename used for FDRs whose name reference was stripped.
const STRIPPED_FILE: &str = "<stripped file>";

fn is_ecoff_stab(sym: &Symr) -> bool {
    (sym.index & 0xFFF00) == STAB_CODE_MASK
}

fn unmark_stab(index: u32) -> u8 {
    (index - STAB_CODE_MASK) as u8
}

/// The raw inputs to one mdebug build.
pub struct MdebugInput<'data> {
    /// The image the symbolic header's offsets index into.
    pub data: &'data [u8],
    /// Position of the symbolic header within `data`.
    pub hdrr_offset: usize,
    /// File byte order.
    pub endian: Endian,
    /// Whether the text section still carries relocations (a `.o` file);
    /// zero is a legitimate start address there, so the Irix adjustment
    /// of zero-valued file addresses is suppressed.
    pub relocatable: bool,
}

/// A caller-installed interrupt check, polled once per record.
pub type QuitCheck<'a> = dyn Fn() -> bool + 'a;

/// Builds partial symbol tables and minimal symbols from an mdebug
/// section.
///
/// On success, returns the complaint sink with the diagnostics gathered
/// along the way. On a hard error every psymtab created by this build is
/// discarded and the object file is left as it was.
pub fn parse_partial_symbols(
    objfile: &mut ObjectFile,
    storage: &mut PsymtabStorage,
    input: &MdebugInput<'_>,
    quit: Option<&QuitCheck<'_>>,
) -> Result<ComplaintSink, MdebugError> {
    let view = MdebugView::parse(input.data, input.hdrr_offset, input.endian)?;

    tracing::debug!(
        object = %objfile.name,
        fdrs = view.hdrr.ifd_max,
        externals = view.hdrr.iext_max,
        "reading ecoff partial symbols"
    );

    let save = storage.save_point();
    let mut reader = MdebugReader {
        view: &view,
        objfile,
        storage,
        complaints: ComplaintSink::new(),
        quit,
        relocatable: input.relocatable,
        fdr_to_pst: vec![None; view.hdrr.ifd_max as usize + 1],
        prev_language: Language::Unknown,
        textlow_not_set: true,
    };

    match reader.run() {
        Ok(()) => {
            let complaints = reader.complaints;
            objfile.minimal_symbols.set_current_source_file(None);
            objfile.minimal_symbols.install();
            Ok(complaints)
        }
        Err(err) => {
            storage.discard_since(save);
            Err(err)
        }
    }
}

struct MdebugReader<'data, 'a> {
    view: &'a MdebugView<'data>,
    objfile: &'a mut ObjectFile,
    storage: &'a mut PsymtabStorage,
    complaints: ComplaintSink,
    quit: Option<&'a QuitCheck<'a>>,
    relocatable: bool,
    /// FDR index + 1 to psymtab; slot 0 is the dummy for FDR -1.
    fdr_to_pst: Vec<Option<PsymtabRef>>,
    prev_language: Language,
    textlow_not_set: bool,
}

impl MdebugReader<'_, '_> {
    fn run(&mut self) -> Result<(), MdebugError> {
        // -O3 images may claim some global data belongs to FDR -1; give
        // them a dummy psymtab to land in.
        let dummy = self.storage.new_psymtab("", self.objfile);
        self.storage[dummy].read_locator = Some(Box::new(MdebugLocator { fdr: -1 }));
        self.fdr_to_pst[0] = Some(dummy);

        let ext_by_fdr = self.process_externals()?;

        let ifd_max = self.view.hdrr.ifd_max as usize;
        for f_idx in 0..ifd_max {
            self.check_quit()?;
            let fdr = self.view.fdr(f_idx)?;

            if fdr.csym == 0 {
                self.fdr_to_pst[f_idx + 1] = None;
                continue;
            }

            let pst = self.process_fdr(f_idx, &fdr, &ext_by_fdr[f_idx + 1])?;
            self.fdr_to_pst[f_idx + 1] = pst;
        }

        self.resolve_fdr_dependencies()?;

        // Remove the dummy psymtab if it is still empty, to enable the
        // detection of stripped executables.
        if self.storage.len() == 1 {
            let only = self.storage.iter().next().unwrap();
            if self.storage[only].dependencies.is_empty() && self.storage[only].empty() {
                self.storage.discard_psymtab(only);
            }
        }

        Ok(())
    }

    fn check_quit(&self) -> Result<(), MdebugError> {
        if self.quit.map_or(false, |q| q()) {
            return Err(MdebugErrorKind::Interrupted.into());
        }
        Ok(())
    }

    /// Passes 1 and 2 over the external symbols: partition them by FDR
    /// and record minimal symbols for the globals and labels.
    ///
    /// Procedure externals contribute no minimal symbols here; their
    /// definitions are indexed through the local symbols of their FDR.
    fn process_externals(&mut self) -> Result<Vec<Vec<usize>>, MdebugError> {
        let hdrr = &self.view.hdrr;
        let mut ext_by_fdr: Vec<Vec<usize>> = vec![Vec::new(); hdrr.ifd_max as usize + 1];

        for i in 0..hdrr.iext_max as usize {
            self.check_quit()?;
            let ext = self.view.ext(i)?;

            // The Irix 5 native tools seem to sometimes generate bogus
            // external symbols; skip them.
            if ext.ifd < -1 || i32::from(ext.ifd) >= hdrr.ifd_max {
                self.complaints.complain("bad-ext-ifd", || {
                    format!("bad ifd for external symbol: {} (max {})", ext.ifd, hdrr.ifd_max)
                });
                continue;
            }
            if ext.asym.iss < 0 || ext.asym.iss >= hdrr.iss_ext_max {
                self.complaints.complain("bad-ext-iss", || {
                    format!("bad iss for external symbol: {} (max {})", ext.asym.iss, hdrr.iss_ext_max)
                });
                continue;
            }

            ext_by_fdr[(ext.ifd + 1) as usize].push(i);

            if sc_unknown(ext.asym.sc) {
                continue;
            }

            let Some(name) = self.view.ext_string(ext.asym.iss) else {
                continue;
            };

            let kind = match ext.asym.st {
                // Procedures are indexed through the local symbols of
                // their FDR.
                st::PROC | st::STATIC_PROC => continue,

                st::GLOBAL => {
                    if raw::sc_is_common(ext.asym.sc) {
                        // The value of a common symbol is its size, not
                        // its address; ignore it.
                        continue;
                    } else if raw::sc_is_data(ext.asym.sc) {
                        MinimalSymbolKind::Data
                    } else if raw::sc_is_bss(ext.asym.sc) || raw::sc_is_sbss(ext.asym.sc) {
                        MinimalSymbolKind::Bss
                    } else {
                        MinimalSymbolKind::Abs
                    }
                }

                st::LABEL => {
                    // Linkers generate extra label symbols naming section
                    // starts; their storage class names a section that
                    // may not even exist in this object, in which case
                    // the label is useless and dropped.
                    if raw::sc_is_text(ext.asym.sc) {
                        if self.objfile.sect_index_text.is_none() {
                            continue;
                        }
                        MinimalSymbolKind::FileText
                    } else if raw::sc_is_data(ext.asym.sc) {
                        if self.objfile.sect_index_data.is_none() {
                            continue;
                        }
                        MinimalSymbolKind::FileData
                    } else if raw::sc_is_bss(ext.asym.sc) || raw::sc_is_sbss(ext.asym.sc) {
                        if self.objfile.sect_index_bss.is_none() {
                            continue;
                        }
                        MinimalSymbolKind::FileBss
                    } else {
                        MinimalSymbolKind::Abs
                    }
                }

                st::LOCAL | st::NIL if name.starts_with('.') => {
                    // Section start addresses, emitted as stLocal by the
                    // Alpha tools and stNil by Irix 6.
                    continue;
                }

                _ => {
                    let owned = name.to_owned();
                    self.complaints.complain("unknown-ext-symbol", || {
                        format!("unknown external symbol: {owned}")
                    });
                    MinimalSymbolKind::Unknown
                }
            };

            self.record_minimal_symbol(name, ext.asym.value, kind);
        }

        Ok(ext_by_fdr)
    }

    fn record_minimal_symbol(&mut self, name: &str, value: u32, kind: MinimalSymbolKind) {
        let section = match kind {
            MinimalSymbolKind::Text | MinimalSymbolKind::FileText => self.objfile.sect_index_text,
            MinimalSymbolKind::Data | MinimalSymbolKind::FileData => self.objfile.sect_index_data,
            MinimalSymbolKind::Bss | MinimalSymbolKind::FileBss => self.objfile.sect_index_bss,
            _ => None,
        };
        let stripped = self.objfile.arch.strip_leading_char(name).to_owned();
        let sym_name =
            SymbolName::compute(&stripped, Language::Unknown, self.objfile.per_bfd_mut());
        self.objfile.minimal_symbols.record(
            sym_name,
            UnrelocatedAddr(u64::from(value)),
            kind,
            section,
        );
    }

    /// Pass 3 for one FDR: build its psymtab from the local symbols, then
    /// enter its external psymbols.
    fn process_fdr(
        &mut self,
        f_idx: usize,
        fdr: &Fdr,
        externals: &[usize],
    ) -> Result<Option<PsymtabRef>, MdebugError> {
        let fdr_name = match fdr.rss {
            -1 => STRIPPED_FILE.to_owned(),
            iss => match self.view.local_string(fdr, iss) {
                Some(name) => name.to_owned(),
                None => {
                    self.complaints.complain("bad-fdr-name", || {
                        format!("bad filename string for file descriptor {f_idx}")
                    });
                    STRIPPED_FILE.to_owned()
                }
            },
        };

        // Irix 5.2 shared libraries have a zero file address although
        // they are prelinked high; a file with procedures gets its start
        // from the header, one without starts unknown at zero.
        let textlow = if fdr.cpd > 0 {
            UnrelocatedAddr(u64::from(fdr.adr))
        } else {
            UnrelocatedAddr(0)
        };

        let mut builder =
            PsymtabBuilder::start(self.storage, self.objfile, &fdr_name, Some(textlow));
        let pst = builder.pst();
        self.storage[pst].read_locator = Some(Box::new(MdebugLocator { fdr: f_idx as isize }));

        // The FDR language is used when unambiguous; otherwise deduce
        // from the filename, and let header FDRs (which deduce to
        // nothing) inherit the language of the source file before them.
        let deduced = if fdr.lang == lang::CPLUSPLUS_V2 {
            Language::Cpp
        } else {
            Language::from_filename(&fdr_name)
        };
        let language = if deduced == Language::Unknown {
            self.prev_language
        } else {
            deduced
        };
        self.storage[pst].language = language;
        self.prev_language = language;

        let filename = Arc::clone(&self.storage[pst].filename);
        self.objfile
            .minimal_symbols
            .set_current_source_file(Some(filename));

        // For stabs-in-ecoff files the second symbol is the @stabs
        // sentinel (the first is the stFile opening the unit).
        let mut stabs_mode = false;
        if fdr.csym >= 2 {
            let second = self.view.sym(fdr.isym_base as usize + 1)?;
            if self.view.local_string(fdr, second.iss) == Some(STABS_SENTINEL) {
                stabs_mode = true;
            }
        }

        if stabs_mode {
            self.process_stabs_locals(fdr, &mut builder)?;
        } else {
            self.process_ecoff_locals(fdr, &mut builder, language)?;
            self.process_fdr_externals(fdr, &mut builder, externals, language)?;
        }

        let textlow_not_set = self.textlow_not_set;
        let result = builder.end(self.storage, self.objfile, None, textlow_not_set);
        self.objfile.minimal_symbols.set_current_source_file(None);
        Ok(result)
    }

    /// The local symbols of an encapsulated-stabs FDR.
    fn process_stabs_locals(
        &mut self,
        fdr: &Fdr,
        builder: &mut PsymtabBuilder,
    ) -> Result<(), MdebugError> {
        let isym_base = fdr.isym_base as usize;
        let csym = fdr.csym as usize;
        let mut cur_sdx = 2usize;

        while cur_sdx < csym {
            self.check_quit()?;
            let sh = self.view.sym(isym_base + cur_sdx)?;

            if !is_ecoff_stab(&sh) {
                self.process_interleaved_ecoff(fdr, builder, &sh)?;
                cur_sdx += 1;
                continue;
            }

            let type_code = unmark_stab(sh.index);

            // Splice continued stab strings before dispatching.
            let mut stabstring = self
                .view
                .local_string(fdr, sh.iss)
                .unwrap_or_default()
                .to_owned();
            while stabstring.ends_with('\\') {
                stabstring.pop();
                cur_sdx += 1;
                let sh2 = self.view.sym(isym_base + cur_sdx)?;
                stabstring.push_str(self.view.local_string(fdr, sh2.iss).unwrap_or_default());
            }

            match type_code {
                stab::N_SO => {
                    self.textlow_not_set =
                        sh.value == 0 && self.objfile.arch.sofun_address_maybe_missing;

                    // The unit's psymtab belongs to the FDR; null names
                    // (end of .o) and directory names are ignored, and
                    // subsequent useless SOs simply reuse it.
                    if stabstring.is_empty() || stabstring.ends_with('/') {
                        cur_sdx += 1;
                        continue;
                    }
                }

                stab::N_SOL => {
                    builder.upgrade_language(self.storage, Language::from_filename(&stabstring));
                    let interned = self.objfile.per_bfd_mut().intern(&stabstring);
                    builder.record_include(self.storage, &interned);
                }

                // Include chains are resolved through the FDR dependency
                // table instead.
                stab::N_BINCL | stab::N_EXCL | stab::N_EINCL => {}

                stab::N_RBRAC => {
                    let value = UnrelocatedAddr(u64::from(sh.value));
                    if value > self.storage[builder.pst()].unrelocated_text_high() {
                        self.storage[builder.pst()].set_text_high(value);
                    }
                }

                stab::N_LSYM | stab::N_STSYM | stab::N_LCSYM | stab::N_ROSYM | stab::N_NBSTS
                | stab::N_NBLCS | stab::N_FUN | stab::N_GSYM | stab::N_PC | stab::N_M2C
                | stab::N_SCOPE => {
                    // N_SOL records may have upgraded the unit language.
                    let language = builder.language(self.storage);
                    let data_sect_index = self.objfile.data_sect_index();
                    let view = self.view;
                    let isym_base_c = isym_base;
                    let cur = &mut cur_sdx;
                    let mut next_symbol_text = move || -> Option<String> {
                        *cur += 1;
                        let sh = view.sym(isym_base_c + *cur).ok()?;
                        Some(view.local_string(fdr, sh.iss).unwrap_or_default().to_owned())
                    };

                    let outcome = process_stab_string(
                        Some(&mut *builder),
                        self.storage,
                        self.objfile,
                        &mut self.complaints,
                        &stabstring,
                        UnrelocatedAddr(u64::from(sh.value)),
                        language,
                        data_sect_index,
                        &mut next_symbol_text,
                    );

                    if let ScanOutcome::Function { symbol, global, .. } = outcome {
                        let section = self.objfile.sect_index_text;
                        let value = UnrelocatedAddr(u64::from(sh.value));
                        if global {
                            builder.add_global(
                                self.storage,
                                self.objfile,
                                &symbol,
                                Domain::Var,
                                AddressClass::Block,
                                section,
                                value,
                                language,
                            );
                        } else {
                            builder.add_static(
                                self.storage,
                                self.objfile,
                                &symbol,
                                Domain::Var,
                                AddressClass::Block,
                                section,
                                value,
                                language,
                            );
                        }
                    }
                }

                // Minimal symbols came from the external table; the
                // remaining stab kinds carry nothing for the index.
                stab::N_ENDM | stab::N_SLINE | stab::N_RSYM | stab::N_PSYM | stab::N_LBRAC
                | stab::N_BCOMM | stab::N_ECOMM | stab::N_ECOML | stab::N_SSYM | stab::N_MAIN
                | stab::N_ENTRY | stab::N_DSLINE | stab::N_BSLINE | stab::N_CATCH
                | stab::N_EHDECL | stab::N_LENG | stab::N_FNAME | stab::N_OBJ | stab::N_OPT
                | stab::N_DEFD | stab::N_ALIAS | stab::N_NSYMS => {}

                t if (t & stab::N_EXT) == stab::N_EXT
                    || t == stab::N_TEXT
                    || t == stab::N_DATA
                    || t == stab::N_BSS
                    || t == stab::N_NBTEXT
                    || t == stab::N_ABS
                    || t == stab::N_UNDF
                    || t == stab::N_NBDATA
                    || t == stab::N_NBBSS => {}

                unknown => {
                    self.complaints.complain("unknown-stab-type", || {
                        format!("unknown symbol type {unknown:#04x}")
                    });
                }
            }

            cur_sdx += 1;
        }

        Ok(())
    }

    /// Plain ECOFF records interleaved into a stabs FDR: procedures and
    /// statics still carry the addresses.
    fn process_interleaved_ecoff(
        &mut self,
        fdr: &Fdr,
        builder: &mut PsymtabBuilder,
        sh: &Symr,
    ) -> Result<(), MdebugError> {
        let isym_base = fdr.isym_base as usize;

        if sh.st == st::PROC || sh.st == st::STATIC_PROC {
            if sh.st == st::STATIC_PROC {
                if let Some(name) = self.view.local_string(fdr, sh.iss) {
                    let name = name.to_owned();
                    self.record_minimal_symbol(&name, sh.value, MinimalSymbolKind::FileText);
                }
            }

            let procaddr = u64::from(sh.value);
            let isym = match self.view.aux_isym(fdr, (fdr.iaux_base + sh.index as i32) as usize) {
                Ok(isym) => isym,
                Err(_) => {
                    self.complaints.complain("bad-proc-aux", || {
                        "procedure has an out-of-range aux index".to_owned()
                    });
                    return Ok(());
                }
            };
            let Ok(end) = self.view.sym(isym_base.wrapping_add(isym as usize).wrapping_sub(1))
            else {
                return Ok(());
            };
            if end.st == st::END {
                let high = procaddr + u64::from(end.value);
                let pst = &mut self.storage[builder.pst()];
                // Irix 5.2 zero file addresses make the header range
                // useless; take the lowest procedure instead, except in
                // relocatable objects where zero is real.
                if !self.relocatable
                    && (!pst.text_low_valid
                        || UnrelocatedAddr(procaddr) < pst.unrelocated_text_low())
                {
                    pst.set_text_low(UnrelocatedAddr(procaddr));
                }
                if UnrelocatedAddr(high) > pst.unrelocated_text_high() {
                    pst.set_text_high(UnrelocatedAddr(high));
                }
            }
        } else if sh.st == st::STATIC {
            let Some(name) = self.view.local_string(fdr, sh.iss) else {
                return Ok(());
            };
            let name = name.to_owned();
            match sh.sc {
                sc::UNDEFINED | sc::SUNDEFINED | sc::NIL | sc::ABS => {}
                _ if raw::sc_is_data(sh.sc) => {
                    self.record_minimal_symbol(&name, sh.value, MinimalSymbolKind::FileData);
                }
                _ => {
                    self.record_minimal_symbol(&name, sh.value, MinimalSymbolKind::FileBss);
                }
            }
        }

        Ok(())
    }

    /// The local symbols of a plain ECOFF FDR.
    fn process_ecoff_locals(
        &mut self,
        fdr: &Fdr,
        builder: &mut PsymtabBuilder,
        language: Language,
    ) -> Result<(), MdebugError> {
        let isym_base = fdr.isym_base as usize;
        let csym = fdr.csym as usize;
        let mut cur_sdx = 0usize;

        while cur_sdx < csym {
            self.check_quit()?;
            let sh = self.view.sym(isym_base + cur_sdx)?;

            if is_ecoff_stab(&sh) {
                cur_sdx += 1;
                continue;
            }

            // Undefined storage, and symbols without auxiliary type
            // information that aren't allocated statics, carry nothing.
            if sc_unknown(sh.sc)
                || (sh.index == INDEX_NIL && (sh.st != st::STATIC || sh.sc == sc::ABS))
            {
                cur_sdx += 1;
                continue;
            }

            let Some(sym_name) = self.view.local_string(fdr, sh.iss) else {
                self.complaints.complain("bad-local-string", || {
                    format!("bad string offset for local symbol {cur_sdx}")
                });
                cur_sdx += 1;
                continue;
            };
            let sym_name = sym_name.to_owned();

            let section = match sh.sc {
                // The value of an stEnd symbol is a displacement, not an
                // address.
                sc::TEXT | sc::RCONST if sh.st != st::END => self.objfile.sect_index_text,
                _ if raw::sc_is_data(sh.sc) => self.objfile.sect_index_data,
                sc::BSS | sc::SBSS => self.objfile.sect_index_bss,
                _ => None,
            };

            let class = match sh.st {
                st::PROC | st::STATIC_PROC => {
                    cur_sdx =
                        self.process_procedure(fdr, builder, &sh, &sym_name, cur_sdx, language)?;
                    continue;
                }

                st::STATIC => {
                    if raw::sc_is_data(sh.sc) {
                        self.record_minimal_symbol(&sym_name, sh.value, MinimalSymbolKind::FileData);
                    } else {
                        self.record_minimal_symbol(&sym_name, sh.value, MinimalSymbolKind::FileBss);
                    }
                    AddressClass::Static
                }

                // Skip forward declarations from Irix5 cc.
                st::INDIRECT => {
                    cur_sdx += 1;
                    continue;
                }

                st::TYPEDEF => {
                    // Typedefs standing for opaque forward declarations
                    // from alpha and mips cc don't define anything
                    // usable; skip them.
                    if sh.iss == 0 || self.has_opaque_xref(fdr, &sh)? {
                        cur_sdx += 1;
                        continue;
                    }
                    AddressClass::Typedef
                }

                st::CONSTANT => AddressClass::Const,

                st::UNION | st::STRUCT | st::ENUM | st::BLOCK => {
                    cur_sdx = self.process_aggregate(fdr, builder, &sh, &sym_name, cur_sdx)?;
                    continue;
                }

                st::FILE | st::LABEL | st::END => {
                    cur_sdx += 1;
                    continue;
                }

                // Local variables are normally consumed with their
                // enclosing block, but they can appear as visible
                // symbols in a header that contains code.
                st::LOCAL => {
                    cur_sdx += 1;
                    continue;
                }

                unknown => {
                    self.complaints.complain("unknown-local-symbol", || {
                        format!("unknown local symbol {sym_name} with type {unknown}")
                    });
                    cur_sdx += 1;
                    continue;
                }
            };

            builder.add_static(
                self.storage,
                self.objfile,
                &sym_name,
                Domain::Var,
                class,
                section,
                UnrelocatedAddr(u64::from(sh.value)),
                language,
            );
            cur_sdx += 1;
        }

        Ok(())
    }

    /// An stProc/stStaticProc block: emit the psymbol, then skip to the
    /// matching stEnd via the aux-pointed symbol index and update the
    /// unit's text range from it.
    #[allow(clippy::too_many_arguments)]
    fn process_procedure(
        &mut self,
        fdr: &Fdr,
        builder: &mut PsymtabBuilder,
        sh: &Symr,
        sym_name: &str,
        cur_sdx: usize,
        language: Language,
    ) -> Result<usize, MdebugError> {
        let isym_base = fdr.isym_base as usize;

        if sh.st == st::STATIC_PROC {
            self.record_minimal_symbol(sym_name, sh.value, MinimalSymbolKind::FileText);
        }

        // This happens when cross-compiling with the MIPS compiler.
        let new_sdx = if sh.index as i32 >= self.view.hdrr.iaux_max {
            let owned = sym_name.to_owned();
            self.complaints.complain("bad-proc-index", || {
                format!("bad aux index at procedure {owned}")
            });
            cur_sdx + 1
        } else {
            match self.view.aux_isym(fdr, (fdr.iaux_base + sh.index as i32) as usize) {
                Ok(isym) if isym > 0 => isym as usize,
                _ => cur_sdx + 1,
            }
        };

        let new_sdx = if new_sdx <= cur_sdx {
            let owned = sym_name.to_owned();
            self.complaints.complain("bad-proc-end", || {
                format!("bad proc end in aux found from symbol {owned}")
            });
            cur_sdx + 1
        } else {
            new_sdx
        };

        // Only (stProc, scText) entries represent real procedures; other
        // storage classes are references to externally defined ones.
        if sh.st == st::PROC && sh.sc != sc::TEXT {
            return Ok(cur_sdx + 1);
        }

        let section = self.objfile.sect_index_text;
        let value = UnrelocatedAddr(u64::from(sh.value));
        if sh.st == st::PROC {
            // There is usually a matching global stProc external for a
            // function, so the minimal symbol exists already; the f77
            // PROGRAM name is the notable exception and is still found
            // through this psymbol.
            builder.add_global(
                self.storage,
                self.objfile,
                sym_name,
                Domain::Var,
                AddressClass::Block,
                section,
                value,
                language,
            );
        } else {
            builder.add_static(
                self.storage,
                self.objfile,
                sym_name,
                Domain::Var,
                AddressClass::Block,
                section,
                value,
                language,
            );
        }

        let procaddr = u64::from(sh.value);
        let cur_sdx = new_sdx;
        let Ok(end) = self.view.sym((isym_base + cur_sdx).wrapping_sub(1)) else {
            return Ok(cur_sdx);
        };
        if end.st != st::END {
            return Ok(cur_sdx);
        }

        let pst = &mut self.storage[builder.pst()];
        if !self.relocatable
            && (!pst.text_low_valid || UnrelocatedAddr(procaddr) < pst.unrelocated_text_low())
        {
            pst.set_text_low(UnrelocatedAddr(procaddr));
        }
        let high = UnrelocatedAddr(procaddr + u64::from(end.value));
        if high > pst.unrelocated_text_high() {
            pst.set_text_high(high);
        }

        Ok(cur_sdx)
    }

    /// An stStruct/stUnion/stEnum/stBlock definition: emit the tag
    /// psymbol and any enumerators, then skip over the member block.
    fn process_aggregate(
        &mut self,
        fdr: &Fdr,
        builder: &mut PsymtabBuilder,
        sh: &Symr,
        sym_name: &str,
        cur_sdx: usize,
    ) -> Result<usize, MdebugError> {
        // No psymbols for cc unnamed aggregates or gcc empty aggregates.
        if (sh.sc == sc::INFO || raw::sc_is_common(sh.sc))
            && sh.iss != 0
            && sh.index != cur_sdx as u32 + 2
        {
            let language = self.storage[builder.pst()].language;
            builder.add_static(
                self.storage,
                self.objfile,
                sym_name,
                Domain::Struct,
                AddressClass::Typedef,
                None,
                UnrelocatedAddr(0),
                language,
            );
        }

        self.handle_psymbol_enumerators(fdr, builder, sh, cur_sdx)?;

        // Skip over the block through the symbol's own index field.
        let new_sdx = sh.index as usize;
        if new_sdx <= cur_sdx {
            // This happens with the Ultrix kernel.
            let owned = sym_name.to_owned();
            self.complaints.complain("bad-aggregate-index", || {
                format!("bad aux index at block symbol {owned}")
            });
            return Ok(cur_sdx + 1);
        }
        Ok(new_sdx)
    }

    /// Emits one constant psymbol per member of an enumerated type.
    fn handle_psymbol_enumerators(
        &mut self,
        fdr: &Fdr,
        builder: &mut PsymtabBuilder,
        sh: &Symr,
        cur_sdx: usize,
    ) -> Result<(), MdebugError> {
        let isym_base = fdr.isym_base as usize;
        let mut member_idx = isym_base + cur_sdx + 1;

        match sh.st {
            st::ENUM => {}

            st::BLOCK => {
                // A block is an enumerated type if its first member is an
                // stMember whose aux is nil, or a plain btNil/btVoid, or
                // (for DU 4.0 cc) an unqualified btEnum with a zero
                // symbol value.
                let Ok(first) = self.view.sym(member_idx) else {
                    return Ok(());
                };
                if first.st != st::MEMBER {
                    return Ok(());
                }
                if first.index != INDEX_NIL && !(first.index == 0 && sh.value == 0) {
                    let Ok(tir) = self
                        .view
                        .aux_tir(fdr, (fdr.iaux_base + first.index as i32) as usize)
                    else {
                        return Ok(());
                    };
                    if (tir.bt != bt::NIL
                        && tir.bt != bt::VOID
                        && (tir.bt != bt::ENUM || sh.value != 0))
                        || tir.tq0 != 0
                    {
                        return Ok(());
                    }
                }
            }

            _ => return Ok(()),
        }

        loop {
            let Ok(member) = self.view.sym(member_idx) else {
                return Ok(());
            };
            if member.st != st::MEMBER {
                return Ok(());
            }
            let Some(name) = self.view.local_string(fdr, member.iss) else {
                return Ok(());
            };
            let name = name.to_owned();

            // The value doesn't matter for enum constants in psymtabs,
            // just in full symtabs.
            let language = self.storage[builder.pst()].language;
            builder.add_static(
                self.storage,
                self.objfile,
                &name,
                Domain::Var,
                AddressClass::Const,
                None,
                UnrelocatedAddr(0),
                language,
            );
            member_idx += 1;
        }
    }

    /// The external psymbols of one FDR.
    fn process_fdr_externals(
        &mut self,
        _fdr: &Fdr,
        builder: &mut PsymtabBuilder,
        externals: &[usize],
        language: Language,
    ) -> Result<(), MdebugError> {
        for &ext_idx in externals {
            let ext = self.view.ext(ext_idx)?;
            let psh = ext.asym;

            // Do not add undefined symbols to the partial symbol table.
            if sc_unknown(psh.sc) {
                continue;
            }

            let section = if raw::sc_is_data(psh.sc) {
                self.objfile.sect_index_data
            } else if psh.sc == sc::BSS || psh.sc == sc::SBSS {
                self.objfile.sect_index_bss
            } else {
                self.objfile.sect_index_text
            };

            let class = match psh.st {
                // Generated for static symbols in .o files; ignore.
                st::NIL => continue,

                // Procedure externals were indexed through the local
                // symbols of the FDR.
                st::PROC | st::STATIC_PROC => continue,

                st::LABEL => AddressClass::Label,

                st::GLOBAL => {
                    // Global common symbols are resolved by the runtime
                    // loader; their value is a size.
                    if raw::sc_is_common(psh.sc) {
                        continue;
                    }
                    AddressClass::Static
                }

                _ => {
                    let name = self.view.ext_string(psh.iss).unwrap_or("").to_owned();
                    self.complaints.complain("unknown-ext-psymbol", || {
                        format!("unknown external symbol: {name}")
                    });
                    // Pretend it's global.
                    AddressClass::Static
                }
            };

            let Some(name) = self.view.ext_string(psh.iss) else {
                continue;
            };
            let name = name.to_owned();
            builder.add_global(
                self.storage,
                self.objfile,
                &name,
                Domain::Var,
                class,
                section,
                UnrelocatedAddr(u64::from(psh.value)),
                language,
            );
        }

        Ok(())
    }

    /// Detects an opaque struct/union/enum cross-reference: a single-level
    /// type lookup whose resolution file descriptor is -1.
    fn has_opaque_xref(&mut self, fdr: &Fdr, sh: &Symr) -> Result<bool, MdebugError> {
        if sh.index == INDEX_NIL {
            return Ok(false);
        }

        let iaux = (fdr.iaux_base + sh.index as i32) as usize;
        let Ok(tir) = self.view.aux_tir(fdr, iaux) else {
            return Ok(false);
        };
        if tir.bt != bt::STRUCT && tir.bt != bt::UNION && tir.bt != bt::ENUM {
            return Ok(false);
        }

        let Ok(rndx) = self.view.aux_rndx(fdr, iaux + 1) else {
            return Ok(false);
        };
        let rf = if rndx.rfd == 0xfff {
            match self.view.aux_isym(fdr, iaux + 2) {
                Ok(isym) => isym,
                Err(_) => return Ok(false),
            }
        } else {
            i32::from(rndx.rfd)
        };
        Ok(rf == -1)
    }

    /// Pass 4: resolve the relative-FDR tables into dependency edges.
    fn resolve_fdr_dependencies(&mut self) -> Result<(), MdebugError> {
        let ifd_max = self.view.hdrr.ifd_max as usize;

        for f_idx in 0..ifd_max {
            let Some(pst) = self.fdr_to_pst[f_idx + 1] else {
                continue;
            };
            let fdr = self.view.fdr(f_idx)?;

            // One entry or less also catches stabs-in-ecoff.
            if fdr.crfd <= 1 {
                continue;
            }

            let mut dependencies = Vec::new();
            // The first file indirect entry is a self dependency for
            // source files or a reverse .h -> .c dependency for headers.
            for s_idx in 1..fdr.crfd as usize {
                let rf = self.view.rfd(fdr.rfd_base as usize + s_idx)?;
                if rf < 0 || rf >= self.view.hdrr.ifd_max {
                    self.complaints
                        .complain("bad-rfd", || format!("bad file number {rf}"));
                    continue;
                }
                if rf as usize == f_idx {
                    continue;
                }
                // Dependencies on discarded empty psymtabs are dropped.
                let Some(dep) = self.fdr_to_pst[rf as usize + 1] else {
                    continue;
                };
                dependencies.push(dep);
            }
            self.storage[pst].dependencies = dependencies;
        }

        Ok(())
    }
}

fn sc_unknown(class: u8) -> bool {
    raw::sc_is_undef(class) || class == sc::NIL
}
