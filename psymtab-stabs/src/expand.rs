use std::sync::Arc;

use psymtab_core::{
    CompunitSymtab, Error, ErrorKind, Expander, FileTab, ObjectFile, PsymtabRef, PsymtabStorage,
};

use crate::reader::{StabsInput, StabsLocator};
use crate::stab::{N_BINCL, N_SOL};

/// Turns stabs psymtabs into compunits on demand.
///
/// The expander re-reads the unit's slice of the record stream — located
/// by the [`StabsLocator`] the build pass left behind — and assembles the
/// compunit skeleton: the primary file table plus one file table per
/// include file. Block and type reconstruction belongs to the full
/// symbol reader and happens outside the indexing core.
pub struct StabsExpander<'data> {
    input: StabsInput<'data>,
}

impl<'data> StabsExpander<'data> {
    /// Creates an expander over the same input the build pass consumed.
    pub fn new(input: StabsInput<'data>) -> StabsExpander<'data> {
        StabsExpander { input }
    }
}

impl Expander for StabsExpander<'_> {
    fn expand(
        &mut self,
        objfile: &mut ObjectFile,
        storage: &mut PsymtabStorage,
        pst: PsymtabRef,
    ) -> Result<(), Error> {
        let locator = match storage[pst]
            .read_locator
            .as_ref()
            .and_then(|l| l.downcast_ref::<StabsLocator>())
        {
            Some(locator) => *locator,
            // Include sub-psymtabs carry no records of their own; their
            // content lives in the unit that includes them.
            None => return Ok(()),
        };
        if locator.sym_count == 0 {
            return Ok(());
        }

        let language = storage[pst].language;
        let mut compunit = CompunitSymtab::new(FileTab {
            filename: Arc::clone(&storage[pst].filename),
            language,
        });

        let mut seen: Vec<Arc<str>> = Vec::new();
        for index in locator.sym_index..locator.sym_index + locator.sym_count {
            let nlist = self
                .input
                .format
                .parse(self.input.symbols, index)
                .map_err(|e| Error::new(ErrorKind::Expansion, e))?;

            if nlist.typ != N_SOL && nlist.typ != N_BINCL {
                continue;
            }

            let offset = (u64::from(nlist.strx) + locator.string_offset) as usize;
            let Some(tail) = self.input.strings.get(offset..) else {
                continue;
            };
            let end = tail.iter().position(|&b| b == 0).unwrap_or(tail.len());
            let name = String::from_utf8_lossy(&tail[..end]);

            if *name == *storage[pst].filename || seen.iter().any(|s| **s == *name) {
                continue;
            }

            let filename = objfile.per_bfd_mut().intern(&name);
            seen.push(Arc::clone(&filename));
            compunit.push_include(FileTab { filename, language });
        }

        let cu = objfile.add_compunit(compunit);
        storage[pst].compunit = Some(cu);
        Ok(())
    }
}
