//! The on-disk ECOFF symbolic records.
//!
//! All multi-byte fields follow the file's byte order, except auxiliary
//! entries, which follow the per-FDR `fBigendian` flag (`mips-tfile`
//! writes them in host order). Bit-packed fields are unpacked from a
//! single endian-read word with the bit order following the byte order,
//! matching the BFD swappers for both encodings.

use scroll::{Endian, Pread};

use crate::error::{MdebugError, MdebugErrorKind};

/// The magic number of the symbolic header.
pub const MAGIC_SYM: u16 = 0x7009;

/// Size of one encoded symbol record.
pub const SYM_SIZE: usize = 12;
/// Size of one encoded external symbol record.
pub const EXT_SIZE: usize = 16;
/// Size of one encoded FDR.
pub const FDR_SIZE: usize = 72;
/// Size of one auxiliary entry or relative file descriptor.
pub const AUX_SIZE: usize = 4;

/// The nil auxiliary index.
pub const INDEX_NIL: u32 = 0xfffff;

/// Symbol types (`st` codes).
#[allow(missing_docs)]
pub mod st {
    pub const NIL: u8 = 0;
    pub const GLOBAL: u8 = 1;
    pub const STATIC: u8 = 2;
    pub const PARAM: u8 = 3;
    pub const LOCAL: u8 = 4;
    pub const LABEL: u8 = 5;
    pub const PROC: u8 = 6;
    pub const BLOCK: u8 = 7;
    pub const END: u8 = 8;
    pub const MEMBER: u8 = 9;
    pub const TYPEDEF: u8 = 10;
    pub const FILE: u8 = 11;
    pub const STATIC_PROC: u8 = 14;
    pub const CONSTANT: u8 = 15;
    pub const STRUCT: u8 = 17;
    pub const UNION: u8 = 18;
    pub const ENUM: u8 = 19;
    pub const INDIRECT: u8 = 34;
}

/// Storage classes (`sc` codes).
#[allow(missing_docs)]
pub mod sc {
    pub const NIL: u8 = 0;
    pub const TEXT: u8 = 1;
    pub const DATA: u8 = 2;
    pub const BSS: u8 = 3;
    pub const REGISTER: u8 = 4;
    pub const ABS: u8 = 5;
    pub const UNDEFINED: u8 = 6;
    pub const INFO: u8 = 11;
    pub const SDATA: u8 = 13;
    pub const SBSS: u8 = 14;
    pub const RDATA: u8 = 15;
    pub const COMMON: u8 = 17;
    pub const SCOMMON: u8 = 18;
    pub const SUNDEFINED: u8 = 21;
    pub const XDATA: u8 = 24;
    pub const PDATA: u8 = 25;
    pub const RCONST: u8 = 27;
}

/// True for the data-segment storage classes.
pub fn sc_is_data(class: u8) -> bool {
    matches!(class, sc::DATA | sc::SDATA | sc::RDATA | sc::PDATA | sc::XDATA)
}

/// True for the common storage classes.
pub fn sc_is_common(class: u8) -> bool {
    matches!(class, sc::COMMON | sc::SCOMMON)
}

/// True for the undefined storage classes.
pub fn sc_is_undef(class: u8) -> bool {
    matches!(class, sc::UNDEFINED | sc::SUNDEFINED)
}

/// True for the zero-initialized storage classes.
pub fn sc_is_bss(class: u8) -> bool {
    class == sc::BSS
}

/// True for the small zero-initialized storage class.
pub fn sc_is_sbss(class: u8) -> bool {
    class == sc::SBSS
}

/// True for the text storage class.
pub fn sc_is_text(class: u8) -> bool {
    class == sc::TEXT
}

/// Basic types in auxiliary type descriptions (`bt` codes).
#[allow(missing_docs)]
pub mod bt {
    pub const NIL: u8 = 0;
    pub const INT: u8 = 6;
    pub const STRUCT: u8 = 12;
    pub const UNION: u8 = 13;
    pub const ENUM: u8 = 14;
    pub const VOID: u8 = 26;
}

/// Source languages in the FDR language field.
#[allow(missing_docs)]
pub mod lang {
    pub const C: u8 = 0;
    pub const PASCAL: u8 = 1;
    pub const FORTRAN: u8 = 2;
    pub const ASSEMBLER: u8 = 3;
    pub const ADA: u8 = 6;
    pub const CPLUSPLUS_V2: u8 = 11;
}

/// The symbolic header.
#[derive(Clone, Copy, Debug, Default)]
pub struct Hdrr {
    pub magic: u16,
    pub vstamp: u16,
    pub iline_max: i32,
    pub cb_line: i32,
    pub cb_line_offset: i32,
    pub idn_max: i32,
    pub cb_dn_offset: i32,
    pub ipd_max: i32,
    pub cb_pd_offset: i32,
    pub isym_max: i32,
    pub cb_sym_offset: i32,
    pub iopt_max: i32,
    pub cb_opt_offset: i32,
    pub iaux_max: i32,
    pub cb_aux_offset: i32,
    pub iss_max: i32,
    pub cb_ss_offset: i32,
    pub iss_ext_max: i32,
    pub cb_ss_ext_offset: i32,
    pub ifd_max: i32,
    pub cb_fd_offset: i32,
    pub crfd: i32,
    pub cb_rfd_offset: i32,
    pub iext_max: i32,
    pub cb_ext_offset: i32,
}

#[allow(missing_docs)]
impl Hdrr {
    pub const SIZE: usize = 96;

    pub fn parse(data: &[u8], offset: usize, endian: Endian) -> Result<Hdrr, MdebugError> {
        let mut off = offset;
        let mut next_i32 =
            |off: &mut usize| -> Result<i32, MdebugError> { Ok(data.gread_with(off, endian)?) };

        let magic: u16 = data.gread_with(&mut off, endian)?;
        let vstamp: u16 = data.gread_with(&mut off, endian)?;

        Ok(Hdrr {
            magic,
            vstamp,
            iline_max: next_i32(&mut off)?,
            cb_line: next_i32(&mut off)?,
            cb_line_offset: next_i32(&mut off)?,
            idn_max: next_i32(&mut off)?,
            cb_dn_offset: next_i32(&mut off)?,
            ipd_max: next_i32(&mut off)?,
            cb_pd_offset: next_i32(&mut off)?,
            isym_max: next_i32(&mut off)?,
            cb_sym_offset: next_i32(&mut off)?,
            iopt_max: next_i32(&mut off)?,
            cb_opt_offset: next_i32(&mut off)?,
            iaux_max: next_i32(&mut off)?,
            cb_aux_offset: next_i32(&mut off)?,
            iss_max: next_i32(&mut off)?,
            cb_ss_offset: next_i32(&mut off)?,
            iss_ext_max: next_i32(&mut off)?,
            cb_ss_ext_offset: next_i32(&mut off)?,
            ifd_max: next_i32(&mut off)?,
            cb_fd_offset: next_i32(&mut off)?,
            crfd: next_i32(&mut off)?,
            cb_rfd_offset: next_i32(&mut off)?,
            iext_max: next_i32(&mut off)?,
            cb_ext_offset: next_i32(&mut off)?,
        })
    }

    pub fn emit(&self, out: &mut Vec<u8>, endian: Endian) {
        push16(out, self.magic, endian);
        push16(out, self.vstamp, endian);
        for value in [
            self.iline_max,
            self.cb_line,
            self.cb_line_offset,
            self.idn_max,
            self.cb_dn_offset,
            self.ipd_max,
            self.cb_pd_offset,
            self.isym_max,
            self.cb_sym_offset,
            self.iopt_max,
            self.cb_opt_offset,
            self.iaux_max,
            self.cb_aux_offset,
            self.iss_max,
            self.cb_ss_offset,
            self.iss_ext_max,
            self.cb_ss_ext_offset,
            self.ifd_max,
            self.cb_fd_offset,
            self.crfd,
            self.cb_rfd_offset,
            self.iext_max,
            self.cb_ext_offset,
        ] {
            push32(out, value as u32, endian);
        }
    }
}

/// One File Descriptor Record.
#[derive(Clone, Copy, Debug, Default)]
pub struct Fdr {
    pub adr: u32,
    pub rss: i32,
    pub iss_base: i32,
    pub cb_ss: i32,
    pub isym_base: i32,
    pub csym: i32,
    pub iline_base: i32,
    pub cline: i32,
    pub iopt_base: i32,
    pub copt: i32,
    pub ipd_first: u16,
    pub cpd: u16,
    pub iaux_base: i32,
    pub caux: i32,
    pub rfd_base: i32,
    pub crfd: i32,
    pub lang: u8,
    pub f_merge: bool,
    pub f_readin: bool,
    pub f_bigendian: bool,
    pub glevel: u8,
    pub cb_line_offset: i32,
    pub cb_line: i32,
}

#[allow(missing_docs)]
impl Fdr {
    pub fn parse(data: &[u8], offset: usize, endian: Endian) -> Result<Fdr, MdebugError> {
        let mut off = offset;

        let adr: u32 = data.gread_with(&mut off, endian)?;
        let rss: i32 = data.gread_with(&mut off, endian)?;
        let iss_base: i32 = data.gread_with(&mut off, endian)?;
        let cb_ss: i32 = data.gread_with(&mut off, endian)?;
        let isym_base: i32 = data.gread_with(&mut off, endian)?;
        let csym: i32 = data.gread_with(&mut off, endian)?;
        let iline_base: i32 = data.gread_with(&mut off, endian)?;
        let cline: i32 = data.gread_with(&mut off, endian)?;
        let iopt_base: i32 = data.gread_with(&mut off, endian)?;
        let copt: i32 = data.gread_with(&mut off, endian)?;
        let ipd_first: u16 = data.gread_with(&mut off, endian)?;
        let cpd: u16 = data.gread_with(&mut off, endian)?;
        let iaux_base: i32 = data.gread_with(&mut off, endian)?;
        let caux: i32 = data.gread_with(&mut off, endian)?;
        let rfd_base: i32 = data.gread_with(&mut off, endian)?;
        let crfd: i32 = data.gread_with(&mut off, endian)?;
        let bits: u32 = data.gread_with(&mut off, endian)?;
        let cb_line_offset: i32 = data.gread_with(&mut off, endian)?;
        let cb_line: i32 = data.gread_with(&mut off, endian)?;

        let (lang, f_merge, f_readin, f_bigendian, glevel) = match endian {
            Endian::Little => (
                (bits & 0x1f) as u8,
                bits & (1 << 5) != 0,
                bits & (1 << 6) != 0,
                bits & (1 << 7) != 0,
                ((bits >> 8) & 0x3) as u8,
            ),
            Endian::Big => (
                (bits >> 27) as u8,
                bits & (1 << 26) != 0,
                bits & (1 << 25) != 0,
                bits & (1 << 24) != 0,
                ((bits >> 22) & 0x3) as u8,
            ),
        };

        Ok(Fdr {
            adr,
            rss,
            iss_base,
            cb_ss,
            isym_base,
            csym,
            iline_base,
            cline,
            iopt_base,
            copt,
            ipd_first,
            cpd,
            iaux_base,
            caux,
            rfd_base,
            crfd,
            lang,
            f_merge,
            f_readin,
            f_bigendian,
            glevel,
            cb_line_offset,
            cb_line,
        })
    }

    pub fn emit(&self, out: &mut Vec<u8>, endian: Endian) {
        push32(out, self.adr, endian);
        for value in [self.rss, self.iss_base, self.cb_ss, self.isym_base, self.csym] {
            push32(out, value as u32, endian);
        }
        for value in [self.iline_base, self.cline, self.iopt_base, self.copt] {
            push32(out, value as u32, endian);
        }
        push16(out, self.ipd_first, endian);
        push16(out, self.cpd, endian);
        for value in [self.iaux_base, self.caux, self.rfd_base, self.crfd] {
            push32(out, value as u32, endian);
        }

        let bits = match endian {
            Endian::Little => {
                u32::from(self.lang & 0x1f)
                    | (u32::from(self.f_merge) << 5)
                    | (u32::from(self.f_readin) << 6)
                    | (u32::from(self.f_bigendian) << 7)
                    | (u32::from(self.glevel & 0x3) << 8)
            }
            Endian::Big => {
                (u32::from(self.lang & 0x1f) << 27)
                    | (u32::from(self.f_merge) << 26)
                    | (u32::from(self.f_readin) << 25)
                    | (u32::from(self.f_bigendian) << 24)
                    | (u32::from(self.glevel & 0x3) << 22)
            }
        };
        push32(out, bits, endian);
        push32(out, self.cb_line_offset as u32, endian);
        push32(out, self.cb_line as u32, endian);
    }
}

/// One local symbol record.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct Symr {
    /// String-table offset of the name, relative to the FDR's base.
    pub iss: i32,
    /// Value: an address, a size, or an ordinal depending on `st`.
    pub value: u32,
    /// Symbol type.
    pub st: u8,
    /// Storage class.
    pub sc: u8,
    /// Auxiliary index or type-dependent payload.
    pub index: u32,
}

#[allow(missing_docs)]
impl Symr {
    pub fn parse(data: &[u8], offset: usize, endian: Endian) -> Result<Symr, MdebugError> {
        let mut off = offset;
        let iss: i32 = data.gread_with(&mut off, endian)?;
        let value: u32 = data.gread_with(&mut off, endian)?;
        let bits: u32 = data.gread_with(&mut off, endian)?;

        let (st, sc, index) = unpack_sym_bits(bits, endian);
        Ok(Symr {
            iss,
            value,
            st,
            sc,
            index,
        })
    }

    pub fn emit(&self, out: &mut Vec<u8>, endian: Endian) {
        push32(out, self.iss as u32, endian);
        push32(out, self.value, endian);
        push32(out, pack_sym_bits(self.st, self.sc, self.index, endian), endian);
    }
}

/// One external symbol record: a symbol plus its owning file descriptor.
#[derive(Clone, Copy, Debug, Default)]
pub struct Extr {
    /// The file descriptor this external belongs to; -1 for none.
    pub ifd: i16,
    /// The symbol itself; `iss` indexes the external string table.
    pub asym: Symr,
}

#[allow(missing_docs)]
impl Extr {
    pub fn parse(data: &[u8], offset: usize, endian: Endian) -> Result<Extr, MdebugError> {
        let mut off = offset;
        let _flags: u16 = data.gread_with(&mut off, endian)?;
        let ifd: i16 = data.gread_with(&mut off, endian)?;
        let asym = Symr::parse(data, off, endian)?;
        Ok(Extr { ifd, asym })
    }

    pub fn emit(&self, out: &mut Vec<u8>, endian: Endian) {
        push16(out, 0, endian);
        push16(out, self.ifd as u16, endian);
        self.asym.emit(out, endian);
    }
}

fn unpack_sym_bits(bits: u32, endian: Endian) -> (u8, u8, u32) {
    match endian {
        Endian::Little => (
            (bits & 0x3f) as u8,
            ((bits >> 6) & 0x1f) as u8,
            bits >> 12,
        ),
        Endian::Big => (
            (bits >> 26) as u8,
            ((bits >> 21) & 0x1f) as u8,
            bits & 0xfffff,
        ),
    }
}

fn pack_sym_bits(st: u8, sc: u8, index: u32, endian: Endian) -> u32 {
    match endian {
        Endian::Little => {
            u32::from(st & 0x3f) | (u32::from(sc & 0x1f) << 6) | ((index & 0xfffff) << 12)
        }
        Endian::Big => {
            (u32::from(st & 0x3f) << 26) | (u32::from(sc & 0x1f) << 21) | (index & 0xfffff)
        }
    }
}

/// A decoded type information record from an auxiliary entry. Only the
/// fields the indexing pass consults are unpacked.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct Tir {
    /// Continuation flag.
    pub continued: bool,
    /// Basic type.
    pub bt: u8,
    /// First type qualifier.
    pub tq0: u8,
}

#[allow(missing_docs)]
impl Tir {
    pub fn unpack(word: u32, bigendian: bool) -> Tir {
        if bigendian {
            Tir {
                continued: word & (1 << 30) != 0,
                bt: ((word >> 24) & 0x3f) as u8,
                tq0: ((word >> 12) & 0xf) as u8,
            }
        } else {
            Tir {
                continued: word & (1 << 1) != 0,
                bt: ((word >> 2) & 0x3f) as u8,
                tq0: ((word >> 16) & 0xf) as u8,
            }
        }
    }

    pub fn pack(&self, bigendian: bool) -> u32 {
        if bigendian {
            (u32::from(self.continued) << 30)
                | (u32::from(self.bt & 0x3f) << 24)
                | (u32::from(self.tq0 & 0xf) << 12)
        } else {
            (u32::from(self.continued) << 1)
                | (u32::from(self.bt & 0x3f) << 2)
                | (u32::from(self.tq0 & 0xf) << 16)
        }
    }
}

/// A decoded relative index record from an auxiliary entry.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct Rndxr {
    /// Relative file descriptor; 0xfff escapes to the next aux entry.
    pub rfd: u16,
    /// Symbol index within the target file.
    pub index: u32,
}

#[allow(missing_docs)]
impl Rndxr {
    pub fn unpack(word: u32, bigendian: bool) -> Rndxr {
        if bigendian {
            Rndxr {
                rfd: (word >> 20) as u16,
                index: word & 0xfffff,
            }
        } else {
            Rndxr {
                rfd: (word & 0xfff) as u16,
                index: word >> 12,
            }
        }
    }

    pub fn pack(&self, bigendian: bool) -> u32 {
        if bigendian {
            (u32::from(self.rfd & 0xfff) << 20) | (self.index & 0xfffff)
        } else {
            u32::from(self.rfd & 0xfff) | ((self.index & 0xfffff) << 12)
        }
    }
}

/// A bounds-checked view over the parallel tables of one debug section.
pub struct MdebugView<'data> {
    data: &'data [u8],
    endian: Endian,
    /// The parsed symbolic header.
    pub hdrr: Hdrr,
}

impl<'data> MdebugView<'data> {
    /// Parses and validates the symbolic header at `hdrr_offset`.
    ///
    /// Every table advertised by the header must lie within the supplied
    /// image; a header claiming more is a hard error rather than a
    /// complaint.
    pub fn parse(
        data: &'data [u8],
        hdrr_offset: usize,
        endian: Endian,
    ) -> Result<MdebugView<'data>, MdebugError> {
        let hdrr = Hdrr::parse(data, hdrr_offset, endian)?;
        if hdrr.magic != MAGIC_SYM {
            return Err(MdebugErrorKind::BadMagic.into());
        }

        let view = MdebugView { data, endian, hdrr };
        view.check_table(hdrr.cb_sym_offset, hdrr.isym_max, SYM_SIZE)?;
        view.check_table(hdrr.cb_ext_offset, hdrr.iext_max, EXT_SIZE)?;
        view.check_table(hdrr.cb_fd_offset, hdrr.ifd_max, FDR_SIZE)?;
        view.check_table(hdrr.cb_aux_offset, hdrr.iaux_max, AUX_SIZE)?;
        view.check_table(hdrr.cb_rfd_offset, hdrr.crfd, AUX_SIZE)?;
        view.check_table(hdrr.cb_ss_offset, hdrr.iss_max, 1)?;
        view.check_table(hdrr.cb_ss_ext_offset, hdrr.iss_ext_max, 1)?;
        Ok(view)
    }

    fn check_table(&self, offset: i32, count: i32, entry_size: usize) -> Result<(), MdebugError> {
        if count < 0 || offset < 0 {
            return Err(MdebugErrorKind::BadHeader.into());
        }
        let end = (offset as usize).saturating_add(count as usize * entry_size);
        if end > self.data.len() {
            return Err(MdebugErrorKind::BadHeader.into());
        }
        Ok(())
    }

    /// The file byte order.
    pub fn endian(&self) -> Endian {
        self.endian
    }

    /// Reads the FDR at `index`.
    pub fn fdr(&self, index: usize) -> Result<Fdr, MdebugError> {
        Fdr::parse(
            self.data,
            self.hdrr.cb_fd_offset as usize + index * FDR_SIZE,
            self.endian,
        )
    }

    /// Reads the local symbol at absolute index `isym`.
    pub fn sym(&self, isym: usize) -> Result<Symr, MdebugError> {
        if isym >= self.hdrr.isym_max as usize {
            return Err(MdebugErrorKind::BadIndex.into());
        }
        Symr::parse(
            self.data,
            self.hdrr.cb_sym_offset as usize + isym * SYM_SIZE,
            self.endian,
        )
    }

    /// Reads the external symbol at `index`.
    pub fn ext(&self, index: usize) -> Result<Extr, MdebugError> {
        Extr::parse(
            self.data,
            self.hdrr.cb_ext_offset as usize + index * EXT_SIZE,
            self.endian,
        )
    }

    /// Reads the relative file descriptor at absolute index `irfd`.
    pub fn rfd(&self, irfd: usize) -> Result<i32, MdebugError> {
        if irfd >= self.hdrr.crfd as usize {
            return Err(MdebugErrorKind::BadIndex.into());
        }
        let offset = self.hdrr.cb_rfd_offset as usize + irfd * AUX_SIZE;
        Ok(self.data.pread_with(offset, self.endian)?)
    }

    /// Reads the raw auxiliary word at absolute index `iaux` in the file
    /// byte order; interpretation depends on the FDR's `fBigendian`.
    pub fn aux_word(&self, iaux: usize) -> Result<u32, MdebugError> {
        if iaux >= self.hdrr.iaux_max as usize {
            return Err(MdebugErrorKind::BadIndex.into());
        }
        let offset = self.hdrr.cb_aux_offset as usize + iaux * AUX_SIZE;
        Ok(self.data.pread_with(offset, self.endian)?)
    }

    /// Reads an auxiliary entry as a symbol index, honoring the per-FDR
    /// byte order.
    pub fn aux_isym(&self, fdr: &Fdr, iaux: usize) -> Result<i32, MdebugError> {
        let word = self.aux_word(iaux)?;
        Ok(self.aux_value(fdr, word) as i32)
    }

    /// Reads an auxiliary entry as a type information record.
    pub fn aux_tir(&self, fdr: &Fdr, iaux: usize) -> Result<Tir, MdebugError> {
        let word = self.aux_word(iaux)?;
        Ok(Tir::unpack(self.aux_value_raw(fdr, word), fdr.f_bigendian))
    }

    /// Reads an auxiliary entry as a relative index record.
    pub fn aux_rndx(&self, fdr: &Fdr, iaux: usize) -> Result<Rndxr, MdebugError> {
        let word = self.aux_word(iaux)?;
        Ok(Rndxr::unpack(self.aux_value_raw(fdr, word), fdr.f_bigendian))
    }

    /// Re-orders an aux word from file order into the FDR's order and
    /// interprets it as an integer.
    fn aux_value(&self, fdr: &Fdr, word: u32) -> u32 {
        self.aux_value_raw(fdr, word)
    }

    fn aux_value_raw(&self, fdr: &Fdr, word: u32) -> u32 {
        let file_big = self.endian == Endian::Big;
        if file_big == fdr.f_bigendian {
            word
        } else {
            word.swap_bytes()
        }
    }

    /// Reads a NUL-terminated string from the local string table.
    pub fn local_string(&self, fdr: &Fdr, iss: i32) -> Option<&'data str> {
        if iss < 0 {
            return None;
        }
        let offset = self.hdrr.cb_ss_offset as usize + fdr.iss_base as usize + iss as usize;
        self.read_string(offset, self.hdrr.cb_ss_offset as usize + self.hdrr.iss_max as usize)
    }

    /// Reads a NUL-terminated string from the external string table.
    pub fn ext_string(&self, iss: i32) -> Option<&'data str> {
        if iss < 0 {
            return None;
        }
        let offset = self.hdrr.cb_ss_ext_offset as usize + iss as usize;
        self.read_string(
            offset,
            self.hdrr.cb_ss_ext_offset as usize + self.hdrr.iss_ext_max as usize,
        )
    }

    fn read_string(&self, offset: usize, limit: usize) -> Option<&'data str> {
        let slice = self.data.get(offset..limit.min(self.data.len()))?;
        let end = slice.iter().position(|&b| b == 0)?;
        std::str::from_utf8(&slice[..end]).ok()
    }
}

fn push16(out: &mut Vec<u8>, value: u16, endian: Endian) {
    if endian == Endian::Little {
        out.extend_from_slice(&value.to_le_bytes());
    } else {
        out.extend_from_slice(&value.to_be_bytes());
    }
}

fn push32(out: &mut Vec<u8>, value: u32, endian: Endian) {
    if endian == Endian::Little {
        out.extend_from_slice(&value.to_le_bytes());
    } else {
        out.extend_from_slice(&value.to_be_bytes());
    }
}
