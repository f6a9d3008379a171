use std::io::{self, Write};

use psymtab_common::{filename_eq, ordered_compare};

use crate::objfile::ObjectFile;
use crate::psymtab::PsymtabRef;
use crate::quick::{BlockKind, PsymbolFunctions};

impl PsymbolFunctions {
    /// Prints a one-line summary of every installed psymtab.
    pub fn dump(&self, out: &mut dyn Write) -> io::Result<()> {
        if !self.storage().has_psymtabs() {
            return Ok(());
        }

        writeln!(out, "Psymtabs:")?;
        for pst in self.storage().iter() {
            writeln!(
                out,
                "{} at [{}]",
                self.storage()[pst].filename,
                pst.index()
            )?;
        }
        writeln!(out)?;
        writeln!(out)
    }

    /// Prints reader statistics: psym counts, unexpanded tables, cache
    /// memory. With `print_bcache`, prints the bcache statistics instead.
    pub fn print_stats(&self, out: &mut dyn Write, print_bcache: bool) -> io::Result<()> {
        let storage = self.storage();

        if print_bcache {
            writeln!(out, "Psymbol byte cache statistics:")?;
            writeln!(out, "  Unique symbols: {}", storage.bcache.unique_count())?;
            writeln!(out, "  Insertions: {}", storage.bcache.insertion_count())?;
            writeln!(out, "  Cache hits: {}", storage.bcache.hit_count())?;
            return Ok(());
        }

        let n_psyms = storage.count_psyms();
        if n_psyms > 0 {
            writeln!(out, "  Number of \"partial\" symbols read: {n_psyms}")?;
        }

        let unexpanded = storage.iter().filter(|&pst| !storage[pst].readin).count();
        writeln!(
            out,
            "  Number of psym tables (not yet expanded): {unexpanded}"
        )?;
        writeln!(
            out,
            "  Total memory used for psymbol cache: {}",
            storage.bcache.memory_used()
        )
    }

    /// Dumps one psymtab in full.
    pub fn dump_psymtab(
        &self,
        objfile: &ObjectFile,
        pst: PsymtabRef,
        out: &mut dyn Write,
    ) -> io::Result<()> {
        let table = &self.storage()[pst];

        writeln!(out, "Partial symtab for source file {}", table.filename)?;
        if let Some(fullname) = &table.fullname {
            writeln!(out, "  Full path: {fullname}")?;
        }
        if let Some(dirname) = &table.dirname {
            writeln!(out, "  Compilation directory: {dirname}")?;
        }
        writeln!(out, "  Language: {}", table.language)?;
        if table.text_low_valid || table.text_high_valid {
            writeln!(
                out,
                "  Relocated text addresses: {:#x} -- {:#x}",
                table.text_low(objfile),
                table.text_high(objfile)
            )?;
        }
        writeln!(
            out,
            "  Has been read in: {}",
            if table.readin { "yes" } else { "no" }
        )?;

        if let Some(user) = table.user {
            writeln!(out, "  Shared psymtab with user {}", self.storage()[user].filename)?;
        }

        if !table.dependencies.is_empty() {
            write!(out, "  Depends on:")?;
            for &dep in &table.dependencies {
                write!(out, " {}", self.storage()[dep].filename)?;
            }
            writeln!(out)?;
        }

        if !table.global_psymbols.is_empty() {
            writeln!(out, "  Global partial symbols:")?;
            for psym in &table.global_psymbols {
                print_partial_symbol(objfile, psym, out)?;
            }
        }
        if !table.static_psymbols.is_empty() {
            writeln!(out, "  Static partial symbols:")?;
            for psym in &table.static_psymbols {
                print_partial_symbol(objfile, psym, out)?;
            }
        }
        writeln!(out)
    }

    /// Dumps psymtab contents, optionally filtered by covering `pc` or by
    /// source filename.
    pub fn print_psymbols(
        &self,
        objfile: &ObjectFile,
        out: &mut dyn Write,
        pc: Option<u64>,
        source: Option<&str>,
    ) -> io::Result<()> {
        let mut found = false;

        for pst in self.storage().iter() {
            let table = &self.storage()[pst];

            if let Some(pc) = pc {
                if table.user.is_some() || !table.covers_pc(objfile, pc) {
                    continue;
                }
            }
            if let Some(source) = source {
                if !filename_eq(&table.filename, source) {
                    continue;
                }
            }

            found = true;
            self.dump_psymtab(objfile, pst, out)?;
        }

        if !found {
            if let Some(pc) = pc {
                writeln!(out, "No partial symtab for address: {pc:#x}")?;
            }
            if let Some(source) = source {
                writeln!(out, "No partial symtab for source file: {source}")?;
            }
        }
        Ok(())
    }

    /// Checks the structural invariants of every installed psymtab.
    ///
    /// Returns human-readable descriptions of every violation found: an
    /// inverted text range, unsorted globals, a dependency on a
    /// later-created psymtab, or a global psymbol the binary search
    /// cannot find again.
    pub fn check_psymtabs(&self, objfile: &ObjectFile) -> Vec<String> {
        let mut problems = Vec::new();

        for pst in self.storage().iter() {
            let table = &self.storage()[pst];
            let filename = &table.filename;

            if table.text_low_valid
                && table.text_high_valid
                && table.unrelocated_text_low() > table.unrelocated_text_high()
            {
                problems.push(format!(
                    "psymtab `{filename}' has inverted text range {} -- {}",
                    table.unrelocated_text_low(),
                    table.unrelocated_text_high()
                ));
            }

            for pair in table.global_psymbols.windows(2) {
                if ordered_compare(pair[0].search_name(), pair[1].search_name())
                    == std::cmp::Ordering::Greater
                {
                    problems.push(format!(
                        "psymtab `{filename}' globals unsorted at `{}'",
                        pair[1].search_name()
                    ));
                    break;
                }
            }

            for &dep in &table.dependencies {
                if dep.index() >= pst.index() {
                    problems.push(format!(
                        "psymtab `{filename}' depends on later psymtab `{}'",
                        self.storage()[dep].filename
                    ));
                }
            }

            for psym in &table.global_psymbols {
                let found = self.lookup_partial_symbol(
                    pst,
                    psym.search_name(),
                    BlockKind::Global,
                    psym.domain(),
                );
                if found.is_none() {
                    problems.push(format!(
                        "global symbol `{}' only found via linear scan in psymtab `{filename}'",
                        psym.search_name()
                    ));
                }
            }

            if let Some(pc) = table
                .text_low_valid
                .then(|| table.text_low(objfile))
            {
                if table.text_high_valid
                    && table.unrelocated_text_low() < table.unrelocated_text_high()
                    && table.user.is_none()
                    && self.find_pc_sect_psymtab(objfile, pc, None, None).is_none()
                {
                    problems.push(format!(
                        "psymtab `{filename}' not findable by its own start address"
                    ));
                }
            }
        }

        problems
    }
}

fn print_partial_symbol(
    objfile: &ObjectFile,
    psym: &crate::base::PartialSymbol,
    out: &mut dyn Write,
) -> io::Result<()> {
    write!(out, "    `{}'", psym.name().linkage_name())?;
    if psym.name().linkage_name() != psym.search_name() {
        write!(out, "  `{}'", psym.search_name())?;
    }
    write!(out, ", {}, {}", psym.domain(), psym.class())?;
    match psym.section() {
        Some(section) => write!(out, ", section {section}")?,
        None => write!(out, ", no section")?,
    }
    writeln!(out, ", {:#x}", psym.address(objfile))
}
