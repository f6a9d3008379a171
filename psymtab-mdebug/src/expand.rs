use std::sync::Arc;

use scroll::Endian;

use psymtab_core::{
    CompunitSymtab, Error, ErrorKind, Expander, FileTab, ObjectFile, PsymtabRef, PsymtabStorage,
};

use crate::raw::MdebugView;

/// Locator tying a psymtab back to its File Descriptor Record, stored as
/// the psymtab's reader-private data.
#[derive(Clone, Copy, Debug)]
pub struct MdebugLocator {
    /// The FDR index, or -1 for the dummy table of file-less globals.
    pub fdr: isize,
}

/// Turns mdebug psymtabs into compunits on demand.
///
/// Only the compunit skeleton is assembled here — the primary file table
/// with the unit's language. Block, type and line reconstruction belongs
/// to the full symbol reader and happens outside the indexing core.
pub struct MdebugExpander<'data> {
    data: &'data [u8],
    hdrr_offset: usize,
    endian: Endian,
}

impl<'data> MdebugExpander<'data> {
    /// Creates an expander over the same image the build pass consumed.
    pub fn new(data: &'data [u8], hdrr_offset: usize, endian: Endian) -> MdebugExpander<'data> {
        MdebugExpander {
            data,
            hdrr_offset,
            endian,
        }
    }
}

impl Expander for MdebugExpander<'_> {
    fn expand(
        &mut self,
        objfile: &mut ObjectFile,
        storage: &mut PsymtabStorage,
        pst: PsymtabRef,
    ) -> Result<(), Error> {
        let locator = match storage[pst]
            .read_locator
            .as_ref()
            .and_then(|l| l.downcast_ref::<MdebugLocator>())
        {
            Some(locator) => *locator,
            // Include sub-psymtabs carry no records of their own.
            None => return Ok(()),
        };

        // The dummy psymtab, and header tables without content, produce
        // no compunit.
        if locator.fdr < 0
            || (storage[pst].empty()
                && !storage[pst].text_low_valid
                && !storage[pst].text_high_valid)
        {
            return Ok(());
        }

        // Revalidate the header; the locator is only an index.
        MdebugView::parse(self.data, self.hdrr_offset, self.endian)
            .map_err(|e| Error::new(ErrorKind::Expansion, e))?
            .fdr(locator.fdr as usize)
            .map_err(|e| Error::new(ErrorKind::Expansion, e))?;

        let compunit = CompunitSymtab::new(FileTab {
            filename: Arc::clone(&storage[pst].filename),
            language: storage[pst].language,
        });
        let cu = objfile.add_compunit(compunit);
        storage[pst].compunit = Some(cu);
        Ok(())
    }
}
