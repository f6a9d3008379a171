use std::borrow::Cow;
use std::sync::Arc;

use psymtab_common::{basename, is_vtable_name, Language, UnrelocatedAddr};
use psymtab_core::{
    AddressClass, BinclList, ComplaintSink, Domain, MinimalSymbolKind, ObjectFile, PsymtabBuilder,
    PsymtabRef, PsymtabStorage, SymbolName,
};

use crate::descriptor::{process_stab_string, ScanOutcome};
use crate::error::{StabsError, StabsErrorKind};
use crate::nlist::{Nlist, NlistFormat};
use crate::stab::*;

/// Placeholder used when a record's string offset is out of range.
const BAD_STRING_OFFSET: &str = "<bad string table offset>";

// External variants, composed here because Rust patterns cannot contain
// the or-expression.
const N_TEXT_EXT: u8 = N_TEXT | N_EXT;
const N_NBTEXT_EXT: u8 = N_NBTEXT | N_EXT;
const N_DATA_EXT: u8 = N_DATA | N_EXT;
const N_NBDATA_EXT: u8 = N_NBDATA | N_EXT;
const N_BSS_EXT: u8 = N_BSS | N_EXT;
const N_NBBSS_EXT: u8 = N_NBBSS | N_EXT;
const N_ABS_EXT: u8 = N_ABS | N_EXT;
const N_SETV_EXT: u8 = N_SETV | N_EXT;
const N_UNDF_EXT: u8 = N_UNDF | N_EXT;
const N_INDR_EXT: u8 = N_INDR | N_EXT;
const N_SETA_EXT: u8 = N_SETA | N_EXT;
const N_SETT_EXT: u8 = N_SETT | N_EXT;
const N_SETD_EXT: u8 = N_SETD | N_EXT;
const N_SETB_EXT: u8 = N_SETB | N_EXT;

/// The raw inputs to one stabs build: the record section, the string
/// table, and the facts about their encoding the object-file reader
/// supplies.
pub struct StabsInput<'data> {
    /// The nlist records.
    pub symbols: &'data [u8],
    /// The string table the records index into.
    pub strings: &'data [u8],
    /// Record encoding.
    pub format: NlistFormat,
    /// Start address of the text section, for the final range cap.
    pub text_addr: u64,
    /// Size of the text section.
    pub text_size: u64,
    /// Solaris ELF+stab dialect: per-file string tables addressed through
    /// `N_UNDF` shift records.
    pub relative_strtab: bool,
}

impl<'data> StabsInput<'data> {
    /// Number of whole records in the symbol section.
    pub fn record_count(&self) -> usize {
        self.symbols.len() / self.format.record_size()
    }
}

/// A caller-installed interrupt check, polled once per record.
pub type QuitCheck<'a> = dyn Fn() -> bool + 'a;

/// Locator for one psymtab's slice of the stab stream, stored as the
/// psymtab's reader-private data and consumed at expansion time.
#[derive(Clone, Copy, Debug)]
pub struct StabsLocator {
    /// Index of the unit's first record.
    pub sym_index: usize,
    /// Number of records belonging to the unit.
    pub sym_count: usize,
    /// The string-table base in effect for the unit.
    pub string_offset: u64,
}

/// Builds partial symbol tables and minimal symbols from a stabs stream.
///
/// On success, returns the complaint sink with the diagnostics gathered
/// along the way. On a hard error every psymtab created by this build is
/// discarded and the object file is left as it was.
pub fn build_psymtabs(
    objfile: &mut ObjectFile,
    storage: &mut PsymtabStorage,
    input: &StabsInput<'_>,
    quit: Option<&QuitCheck<'_>>,
) -> Result<ComplaintSink, StabsError> {
    if input.symbols.len() % input.format.record_size() != 0 {
        return Err(StabsErrorKind::Truncated.into());
    }

    tracing::debug!(
        object = %objfile.name,
        records = input.record_count(),
        "reading stabs partial symbols"
    );

    let save = storage.save_point();
    let mut reader = DbxReader {
        input,
        objfile,
        storage,
        complaints: ComplaintSink::new(),
        quit,
        symnum: 0,
        file_string_offset: 0,
        next_file_string_offset: 0,
        builder: None,
        bincl_list: BinclList::new(),
        textlow_not_set: true,
        last_function_start: 0,
        past_first_source_file: false,
        dirname_nso: None,
        prev_so_symnum: None,
        first_so_symnum: 0,
        lowest_text_address: None,
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

struct DbxReader<'data, 'a> {
    input: &'a StabsInput<'data>,
    objfile: &'a mut ObjectFile,
    storage: &'a mut PsymtabStorage,
    complaints: ComplaintSink,
    quit: Option<&'a QuitCheck<'a>>,

    symnum: usize,
    file_string_offset: u64,
    next_file_string_offset: u64,

    builder: Option<PsymtabBuilder>,
    bincl_list: BinclList,
    textlow_not_set: bool,
    last_function_start: u64,
    past_first_source_file: bool,
    dirname_nso: Option<String>,
    prev_so_symnum: Option<usize>,
    first_so_symnum: usize,
    lowest_text_address: Option<u64>,
}

impl<'data> DbxReader<'data, '_> {
    fn run(&mut self) -> Result<(), StabsError> {
        let count = self.input.record_count();

        while self.symnum < count {
            if self.quit.map_or(false, |q| q()) {
                return Err(StabsErrorKind::Interrupted.into());
            }

            let current = self.symnum;
            let nlist = self.input.format.parse(self.input.symbols, current)?;
            self.symnum += 1;

            // Special case to speed up readin.
            if nlist.typ == N_SLINE {
                if let Some(builder) = &mut self.builder {
                    builder.set_has_line_numbers();
                }
                continue;
            }

            self.process_record(current, &nlist)?;
        }

        // If there's stuff to be cleaned up, clean it up.
        if self.builder.is_some() {
            let text_end = self
                .lowest_text_address
                .unwrap_or(self.input.text_addr)
                .wrapping_add(self.input.text_size);
            self.close_psymtab(count, text_end);
        }

        Ok(())
    }

    fn process_record(&mut self, current: usize, nlist: &Nlist) -> Result<(), StabsError> {
        match nlist.typ {
            // Standard, external, non-debugger symbols, plus the local
            // data kinds that only feed the minimal symbol table.
            N_TEXT_EXT | N_NBTEXT_EXT | N_DATA_EXT | N_NBDATA_EXT | N_BSS | N_BSS_EXT
            | N_NBBSS_EXT | N_SETV_EXT | N_SETV | N_ABS_EXT | N_DATA => {
                let name = self.namestring(current, nlist).into_owned();
                self.record_minimal_symbol(&name, nlist);
            }

            // Standard, local, non-debugger symbols. Both N_FN and N_TEXT
            // occur as object-file boundaries; there is no way of knowing
            // whether the sys-supplied ld or GNU ld made the executable.
            N_NBTEXT | N_FN | N_FN_SEQ | N_TEXT => {
                let name = self.namestring(current, nlist).into_owned();

                if name.starts_with("-l") || name.ends_with(".o") {
                    let unrel_val = UnrelocatedAddr(nlist.value);
                    // Some targets use low values for .o and -l symbols
                    // which are not addresses; those must not end the
                    // unit.
                    let closes = self.past_first_source_file
                        && self.builder.as_ref().map_or(false, |b| {
                            unrel_val >= self.storage[b.pst()].unrelocated_text_low()
                        });
                    if closes {
                        self.close_psymtab(current, nlist.value);
                    } else {
                        self.past_first_source_file = true;
                    }
                } else {
                    self.record_minimal_symbol(&name, nlist);
                }
            }

            // A Fortran COMMON symbol when the value is nonzero, really
            // undefined otherwise; nothing the index needs either way.
            N_UNDF_EXT => {}

            N_UNDF => {
                if self.input.relative_strtab && nlist.strx == 1 {
                    // Relative offsets in the string table, used by
                    // ELF+STAB under Solaris: the value shifts the base
                    // for all names of the following file.
                    self.past_first_source_file = true;
                    self.file_string_offset = self.next_file_string_offset;
                    self.next_file_string_offset = self
                        .file_string_offset
                        .checked_add(nlist.value)
                        .ok_or(StabsErrorKind::StringTableBackup)?;
                }
            }

            // Lots of symbol types we can just ignore.
            N_ABS | N_NBDATA | N_NBBSS => {}

            // Special symbol types for GNU.
            N_INDR | N_INDR_EXT | N_SETA | N_SETA_EXT | N_SETT | N_SETT_EXT | N_SETD
            | N_SETD_EXT | N_SETB | N_SETB_EXT => {}

            N_SO => self.process_so(current, nlist),

            N_BINCL => {
                let name = self.namestring(current, nlist).into_owned();
                self.deduce_language(&name);

                if self.builder.is_none() {
                    // No unit to attach this header to; skip the record
                    // rather than recording into nothing.
                    self.complaints.complain("bincl-outside-cu", || {
                        format!("header `{name}' not in entries for any file, at symbol {current}")
                    });
                    return Ok(());
                }

                let interned = self.objfile.per_bfd_mut().intern(&name);
                let builder = self.builder.as_mut().unwrap();
                self.bincl_list
                    .push(Arc::clone(&interned), nlist.value, builder.pst());
                builder.record_include(self.storage, &interned);
            }

            N_SOL => {
                let name = self.namestring(current, nlist).into_owned();
                self.deduce_language(&name);

                // The same filename comes round many times when code
                // alternates between the main file and inlined code from
                // headers; record_include deduplicates.
                if let Some(builder) = &mut self.builder {
                    let interned = self.objfile.per_bfd_mut().intern(&name);
                    builder.record_include(self.storage, &interned);
                }
            }

            N_EXCL => {
                let name = self.namestring(current, nlist).into_owned();
                match self.bincl_list.find(&name, nlist.value) {
                    Some(needed) => {
                        if let Some(builder) = &mut self.builder {
                            // An include defined earlier in this same
                            // unit is not a dependency.
                            if needed != builder.pst() {
                                builder.add_dependency(needed);
                            }
                        }
                    }
                    None => self.complaints.complain("excl-without-bincl", || {
                        format!(
                            "header `{name}' (instance {}) has no begin-include record",
                            nlist.value
                        )
                    }),
                }
            }

            N_ENDM => {
                // Solaris 2 end of module. Finishing the unit here keeps
                // the text range correct when a module compiled without
                // debug info follows.
                if self.objfile.arch.sofun_address_maybe_missing && self.builder.is_some() {
                    self.close_psymtab(current, 0);
                }
            }

            N_LSYM | N_STSYM | N_LCSYM | N_ROSYM | N_NBSTS | N_NBLCS | N_FUN | N_GSYM | N_PC
            | N_M2C | N_SCOPE => {
                self.process_debug_symbol(current, nlist);
            }

            // The remaining recognized types carry nothing for the index.
            N_RBRAC | N_EINCL | N_DSLINE | N_BSLINE | N_SSYM | N_ENTRY | N_MAIN | N_CATCH
            | N_EHDECL | N_LENG | N_BCOMM | N_ECOMM | N_ECOML | N_FNAME | N_RSYM | N_PSYM
            | N_LBRAC | N_NSYMS | N_DEFD | N_ALIAS | N_OBJ | N_OPT | N_PATCH | N_ENSYM
            | N_OSO | N_WITH | N_NOMAP | N_FLINE => {}

            unknown => {
                // Probably some new type we don't know about yet.
                self.complaints.complain("unknown-stab-type", || {
                    format!("unknown symbol type {unknown:#04x}")
                });
            }
        }
        Ok(())
    }

    fn process_so(&mut self, current: usize, nlist: &Nlist) {
        let sofun = self.objfile.arch.sofun_address_maybe_missing;
        let valu = nlist.value;

        // A zero value is probably an indication for the SunPRO 3.0
        // compiler; the real range gets inferred from the functions.
        let prev_textlow_not_set = self.textlow_not_set;
        self.textlow_not_set = valu == 0 && sofun;
        self.past_first_source_file = true;

        if self.prev_so_symnum != Some(current.wrapping_sub(1)) {
            // Here if the previous stab wasn't N_SO.
            self.first_so_symnum = current;

            if self.builder.is_some() {
                let new_flag = self.textlow_not_set;
                self.textlow_not_set = prev_textlow_not_set;
                self.close_psymtab(current, valu);
                self.textlow_not_set = new_flag;
            }
        }
        self.prev_so_symnum = Some(current);

        let name = self.namestring(current, nlist).into_owned();

        // Null name means end of .o file; don't start a new one.
        if name.is_empty() {
            return;
        }

        // Some compilers (including gcc) emit a pair of initial N_SOs:
        // the first is the compilation directory, the second the file.
        if basename(&name).is_empty() && name.ends_with('/') {
            self.dirname_nso = Some(name);
            return;
        }

        // Some other compilers (C++ ones in particular) emit useless SOs
        // for non-existent files; ignore all subsequent SOs that
        // immediately follow the first.
        if self.builder.is_none() {
            let textlow = if valu == 0 && sofun {
                None
            } else {
                Some(UnrelocatedAddr(valu))
            };
            let builder = PsymtabBuilder::start(self.storage, self.objfile, &name, textlow);
            let pst = builder.pst();

            self.storage[pst].read_locator = Some(Box::new(StabsLocator {
                sym_index: self.first_so_symnum,
                sym_count: 0,
                string_offset: self.file_string_offset,
            }));
            if let Some(dirname) = self.dirname_nso.take() {
                self.storage[pst].dirname = Some(self.objfile.per_bfd_mut().intern(&dirname));
            }

            let filename = Arc::clone(&self.storage[pst].filename);
            self.objfile
                .minimal_symbols
                .set_current_source_file(Some(filename));

            self.builder = Some(builder);
        }
    }

    fn process_debug_symbol(&mut self, current: usize, nlist: &Nlist) {
        let name = self.namestring(current, nlist).into_owned();

        // An end-of-function stab: the value is the function's size for
        // function-relative stabs, or its end address for old-style ones.
        if nlist.typ == N_FUN && name.is_empty() {
            if let Some(builder) = &mut self.builder {
                let valu = nlist.value.wrapping_add(self.last_function_start);
                builder.raise_text_high(self.storage, UnrelocatedAddr(valu));
            }
            return;
        }

        let language = self
            .builder
            .as_ref()
            .map(|b| b.language(self.storage))
            .unwrap_or(Language::Unknown);
        let data_sect_index = self.objfile.data_sect_index();

        // Destructure so the continuation closure can advance the record
        // stream while the decoder holds the rest of the parser state.
        let DbxReader {
            input,
            objfile,
            storage,
            complaints,
            symnum,
            file_string_offset,
            builder,
            ..
        } = self;
        let string_base = *file_string_offset;
        let records: &StabsInput<'data> = *input;
        let mut next_symbol_text = move || -> Option<String> {
            let nlist = records.format.parse(records.symbols, *symnum).ok()?;
            *symnum += 1;
            Some(raw_namestring(records, string_base, &nlist).into_owned())
        };

        let outcome = process_stab_string(
            builder.as_mut(),
            storage,
            objfile,
            complaints,
            &name,
            UnrelocatedAddr(nlist.value),
            language,
            data_sect_index,
            &mut next_symbol_text,
        );

        if let ScanOutcome::Function {
            namestring,
            symbol,
            global,
        } = outcome
        {
            self.process_function(nlist, &namestring, &symbol, global);
        }
    }

    fn process_function(&mut self, nlist: &Nlist, namestring: &str, symbol: &str, global: bool) {
        let sofun = self.objfile.arch.sofun_address_maybe_missing;
        let mut value = nlist.value;

        let Some(builder) = self.builder.as_mut() else {
            return;
        };
        builder.note_last_function_name(namestring);

        // Zero stays a legitimate address for .o and NLM files; elsewhere
        // it means the address was taken away and the minimal symbol
        // still has it.
        if value == 0 && sofun {
            let filename = Arc::clone(&self.storage[builder.pst()].filename);
            if let Some(msym) = self
                .objfile
                .minimal_symbols
                .lookup_function(namestring, Some(&filename))
            {
                value = msym.address.raw();
            } else {
                self.complaints.complain("function-minsym-missing", || {
                    format!("function `{symbol}' has no address and no minimal symbol")
                });
            }
            if self.textlow_not_set {
                self.storage[builder.pst()].set_text_low(UnrelocatedAddr(value));
                self.textlow_not_set = false;
            }
        }

        // Keep track of the start of the last function so end-of-function
        // records can be resolved against it.
        self.last_function_start = value;

        // In reordered executables this function may lie outside the
        // bounds created by the unit's own N_SO.
        builder.note_text_function(
            self.storage,
            UnrelocatedAddr(value),
            &mut self.textlow_not_set,
        );

        let language = builder.language(self.storage);
        let section = self.objfile.sect_index_text;
        if global {
            builder.add_global(
                self.storage,
                self.objfile,
                symbol,
                Domain::Var,
                AddressClass::Block,
                section,
                UnrelocatedAddr(value),
                language,
            );
        } else {
            builder.add_static(
                self.storage,
                self.objfile,
                symbol,
                Domain::Var,
                AddressClass::Block,
                section,
                UnrelocatedAddr(value),
                language,
            );
        }
    }

    /// Ends the current psymtab at record `current`, capping the text
    /// range with `capping_text` (zero means "no better information").
    fn close_psymtab(&mut self, current: usize, capping_text: u64) {
        let Some(builder) = self.builder.take() else {
            return;
        };
        let pst = builder.pst();

        // Fix up the locator with the unit's record count before the
        // builder decides whether the table survives.
        if let Some(locator) = self.storage[pst]
            .read_locator
            .as_mut()
            .and_then(|l| l.downcast_mut::<StabsLocator>())
        {
            locator.sym_count = current.saturating_sub(locator.sym_index);
        }

        let high = self.current_high_raw(pst);
        let cap = if capping_text != 0 || self.storage[pst].text_high_valid {
            Some(UnrelocatedAddr(capping_text.max(high)))
        } else {
            None
        };

        builder.end(self.storage, self.objfile, cap, self.textlow_not_set);
        self.objfile.minimal_symbols.set_current_source_file(None);
    }

    fn current_high_raw(&self, pst: PsymtabRef) -> u64 {
        if self.storage[pst].text_high_valid {
            self.storage[pst].unrelocated_text_high().raw()
        } else {
            0
        }
    }

    fn deduce_language(&mut self, filename: &str) {
        if let Some(builder) = &mut self.builder {
            builder.upgrade_language(self.storage, Language::from_filename(filename));
        }
    }

    /// Resolves a record's name against the string table, substituting a
    /// placeholder (with a complaint) for corrupt offsets.
    fn namestring(&mut self, current: usize, nlist: &Nlist) -> Cow<'data, str> {
        let offset = u64::from(nlist.strx).wrapping_add(self.file_string_offset);
        if offset < u64::from(nlist.strx) || offset >= self.input.strings.len() as u64 {
            self.complaints.complain("bad-string-offset", || {
                format!("bad string table offset in symbol {current}")
            });
            return Cow::Borrowed(BAD_STRING_OFFSET);
        }
        raw_namestring(self.input, self.file_string_offset, nlist)
    }

    fn record_minimal_symbol(&mut self, name: &str, nlist: &Nlist) {
        let objfile = &mut *self.objfile;
        let (kind, section) = match nlist.typ {
            N_TEXT_EXT => (MinimalSymbolKind::Text, objfile.sect_index_text),
            N_DATA_EXT => (MinimalSymbolKind::Data, objfile.sect_index_data),
            N_BSS_EXT => (MinimalSymbolKind::Bss, objfile.sect_index_bss),
            N_ABS_EXT => (MinimalSymbolKind::Abs, None),
            N_SETV_EXT => (MinimalSymbolKind::Data, objfile.sect_index_data),
            N_SETV => (MinimalSymbolKind::FileData, objfile.sect_index_data),
            N_TEXT | N_NBTEXT | N_FN | N_FN_SEQ => {
                (MinimalSymbolKind::FileText, objfile.sect_index_text)
            }
            N_DATA => {
                // __DYNAMIC and virtual function tables are recorded as
                // global even when local, so name lookups can find them
                // (SunOS shared libraries depend on this).
                let stripped = objfile.arch.strip_leading_char(name);
                if name == "__DYNAMIC" || is_vtable_name(stripped) {
                    (MinimalSymbolKind::Data, objfile.sect_index_data)
                } else {
                    (MinimalSymbolKind::FileData, objfile.sect_index_data)
                }
            }
            N_BSS => (MinimalSymbolKind::FileBss, objfile.sect_index_bss),
            _ => (MinimalSymbolKind::Unknown, None),
        };

        let mut value = nlist.value;
        if kind.is_text() {
            value = objfile.arch.addr_bits_remove(value);
            let lowest = self.lowest_text_address.get_or_insert(value);
            *lowest = (*lowest).min(value);
        }

        let stripped = objfile.arch.strip_leading_char(name).to_owned();
        let sym_name = SymbolName::compute(&stripped, Language::Unknown, objfile.per_bfd_mut());
        objfile
            .minimal_symbols
            .record(sym_name, UnrelocatedAddr(value), kind, section);
    }
}

/// Reads a NUL-terminated name out of the string table without complaint
/// tracking; callers have either checked the bounds or accept the
/// placeholder.
fn raw_namestring<'data>(
    input: &StabsInput<'data>,
    file_string_offset: u64,
    nlist: &Nlist,
) -> Cow<'data, str> {
    let offset = u64::from(nlist.strx).wrapping_add(file_string_offset) as usize;
    let Some(tail) = input.strings.get(offset..) else {
        return Cow::Borrowed(BAD_STRING_OFFSET);
    };
    let end = tail.iter().position(|&b| b == 0).unwrap_or(tail.len());
    String::from_utf8_lossy(&tail[..end])
}
