use scroll::{Endian, Pread};

use crate::error::StabsError;

/// One external nlist record, decoded to host form.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct Nlist {
    /// Offset of the name in the string table.
    pub strx: u32,
    /// The stab type byte.
    pub typ: u8,
    /// The "other" byte; unused at indexing time.
    pub other: u8,
    /// The descriptor field (source line for line records).
    pub desc: u16,
    /// The value: an address, a size, or an instance number depending on
    /// the type.
    pub value: u64,
}

/// The concrete on-disk shape of the nlist records in one section.
#[derive(Clone, Copy, Debug)]
pub struct NlistFormat {
    /// Byte order of the records.
    pub endian: Endian,
    /// Width of the value field: 4 for classic a.out and ELF32 stabs,
    /// 8 for 64-bit streams.
    pub value_size: usize,
}

impl NlistFormat {
    /// A 32-bit little-endian stream.
    pub fn little32() -> NlistFormat {
        NlistFormat {
            endian: Endian::Little,
            value_size: 4,
        }
    }

    /// A 32-bit big-endian stream.
    pub fn big32() -> NlistFormat {
        NlistFormat {
            endian: Endian::Big,
            value_size: 4,
        }
    }

    /// The encoded size of one record.
    pub fn record_size(&self) -> usize {
        8 + self.value_size
    }

    /// Decodes the record at `index`.
    pub fn parse(&self, data: &[u8], index: usize) -> Result<Nlist, StabsError> {
        let mut offset = index * self.record_size();

        let strx: u32 = data.gread_with(&mut offset, self.endian)?;
        let typ: u8 = data.gread_with(&mut offset, self.endian)?;
        let other: u8 = data.gread_with(&mut offset, self.endian)?;
        let desc: u16 = data.gread_with(&mut offset, self.endian)?;
        let value = if self.value_size == 8 {
            data.gread_with::<u64>(&mut offset, self.endian)?
        } else {
            u64::from(data.gread_with::<u32>(&mut offset, self.endian)?)
        };

        Ok(Nlist {
            strx,
            typ,
            other,
            desc,
            value,
        })
    }

    /// Encodes a record; the writer counterpart of [`parse`](Self::parse),
    /// used to synthesize streams in tests and tools.
    pub fn emit(&self, out: &mut Vec<u8>, nlist: &Nlist) {
        let le = self.endian == Endian::Little;

        let push32 = |out: &mut Vec<u8>, v: u32| {
            if le {
                out.extend_from_slice(&v.to_le_bytes());
            } else {
                out.extend_from_slice(&v.to_be_bytes());
            }
        };

        push32(out, nlist.strx);
        out.push(nlist.typ);
        out.push(nlist.other);
        if le {
            out.extend_from_slice(&nlist.desc.to_le_bytes());
        } else {
            out.extend_from_slice(&nlist.desc.to_be_bytes());
        }
        if self.value_size == 8 {
            if le {
                out.extend_from_slice(&nlist.value.to_le_bytes());
            } else {
                out.extend_from_slice(&nlist.value.to_be_bytes());
            }
        } else {
            push32(out, nlist.value as u32);
        }
    }
}
