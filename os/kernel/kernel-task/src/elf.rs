//! # ELF64 Images
//!
//! Just enough of the format to place `PT_LOAD` segments of a statically
//! linked user program. Nothing is allocated; the parsed view borrows the
//! image.

use bitfield_struct::bitfield;
use kernel_info::memory::{USER_TEMP, USER_TOP};
use kernel_memory_addresses::{PAGE_SIZE, VirtualAddress};

/// `\x7FELF` read as a little-endian word.
pub const ELF_MAGIC: u32 = 0x464C_457F;

const ELF_HEADER_SIZE: usize = 64;
const PH_SIZE: usize = 56;
const ELFCLASS64: u8 = 2;
const ELFDATA2LSB: u8 = 1;
const PT_LOAD: u32 = 1;
const USER_TEMP_END: u64 = USER_TEMP + PAGE_SIZE;

#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum ElfError {
    #[error("image too short")]
    TooShort,
    #[error("invalid elf magic")]
    BadMagic,
    #[error("not a 64-bit little-endian image")]
    BadClass,
    #[error("malformed program header")]
    BadProgramHeader,
    #[error("segment extends past the end of the image")]
    TruncatedSegment,
}

/// `Elf64_Phdr.p_flags`: bit0=X, bit1=W, bit2=R.
#[bitfield(u32)]
pub struct SegmentFlags {
    pub execute: bool,
    pub write: bool,
    pub read: bool,
    #[bits(29)]
    __: u32,
}

/// A loadable segment, validated against the image and the user range.
#[derive(Copy, Clone, Debug)]
pub struct Segment<'a> {
    pub va: VirtualAddress,
    /// Size in memory; everything past `data` is zero-filled.
    pub mem_size: usize,
    /// The bytes backed by the file.
    pub data: &'a [u8],
    pub flags: SegmentFlags,
}

impl Segment<'_> {
    /// Number of bytes past the file-backed part.
    #[inline]
    #[must_use]
    pub const fn zero_fill(&self) -> usize {
        self.mem_size - self.data.len()
    }
}

#[inline]
fn le16(x: &[u8]) -> u16 {
    u16::from_le_bytes([x[0], x[1]])
}

#[inline]
fn le32(x: &[u8]) -> u32 {
    u32::from_le_bytes([x[0], x[1], x[2], x[3]])
}

#[inline]
fn le64(x: &[u8]) -> u64 {
    u64::from_le_bytes([x[0], x[1], x[2], x[3], x[4], x[5], x[6], x[7]])
}

/// A header-checked view over an ELF64 executable.
#[derive(Copy, Clone, Debug)]
pub struct ElfImage<'a> {
    bytes: &'a [u8],
    entry: VirtualAddress,
    phoff: usize,
    phnum: usize,
}

impl<'a> ElfImage<'a> {
    /// Check the file header and the location of the program header table.
    ///
    /// # Errors
    /// Any [`ElfError`] describing the first problem found.
    pub fn parse(bytes: &'a [u8]) -> Result<Self, ElfError> {
        if bytes.len() < 4 {
            return Err(ElfError::TooShort);
        }
        if le32(&bytes[0..4]) != ELF_MAGIC {
            return Err(ElfError::BadMagic);
        }
        if bytes.len() < ELF_HEADER_SIZE {
            return Err(ElfError::TooShort);
        }
        if bytes[4] != ELFCLASS64 || bytes[5] != ELFDATA2LSB {
            return Err(ElfError::BadClass);
        }

        let entry = VirtualAddress::new(le64(&bytes[24..32]));
        let phoff = usize::try_from(le64(&bytes[32..40])).map_err(|_| ElfError::BadProgramHeader)?;
        let phentsize = usize::from(le16(&bytes[54..56]));
        let phnum = usize::from(le16(&bytes[56..58]));

        if phnum > 0 && phentsize != PH_SIZE {
            return Err(ElfError::BadProgramHeader);
        }
        let end = phnum
            .checked_mul(PH_SIZE)
            .and_then(|len| len.checked_add(phoff))
            .ok_or(ElfError::BadProgramHeader)?;
        if end > bytes.len() {
            return Err(ElfError::BadProgramHeader);
        }

        Ok(Self {
            bytes,
            entry,
            phoff,
            phnum,
        })
    }

    #[inline]
    #[must_use]
    pub const fn entry(&self) -> VirtualAddress {
        self.entry
    }

    /// The `PT_LOAD` segments in header order.
    pub fn segments(&self) -> impl Iterator<Item = Result<Segment<'a>, ElfError>> + '_ {
        (0..self.phnum).filter_map(move |i| {
            let at = self.phoff + i * PH_SIZE;
            let ph = &self.bytes[at..at + PH_SIZE];
            (le32(&ph[0..4]) == PT_LOAD).then(|| self.segment(ph))
        })
    }

    fn segment(&self, ph: &[u8]) -> Result<Segment<'a>, ElfError> {
        let bytes: &'a [u8] = self.bytes;
        let flags = SegmentFlags::from_bits(le32(&ph[4..8]));
        let offset = le64(&ph[8..16]);
        let va = le64(&ph[16..24]);
        let file_size = le64(&ph[32..40]);
        let mem_size = le64(&ph[40..48]);

        // The copy-on-write scratch page is never part of an image.
        let in_user_range = va
            .checked_add(mem_size)
            .is_some_and(|end| {
                end <= USER_TOP && (end <= USER_TEMP || va >= USER_TEMP_END)
            });
        if file_size > mem_size || !in_user_range {
            return Err(ElfError::BadProgramHeader);
        }

        let data = usize::try_from(offset)
            .ok()
            .zip(usize::try_from(file_size).ok())
            .and_then(|(start, len)| bytes.get(start..start.checked_add(len)?))
            .ok_or(ElfError::TruncatedSegment)?;
        let mem_size = usize::try_from(mem_size).map_err(|_| ElfError::BadProgramHeader)?;

        Ok(Segment {
            va: VirtualAddress::new(va),
            mem_size,
            data,
            flags,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A header with one program header slot right behind it.
    fn image(ph: [u8; PH_SIZE], payload: &[u8]) -> Vec<u8> {
        let mut b = vec![0_u8; ELF_HEADER_SIZE];
        b[0..4].copy_from_slice(b"\x7FELF");
        b[4] = ELFCLASS64;
        b[5] = ELFDATA2LSB;
        b[24..32].copy_from_slice(&0x40_1000_u64.to_le_bytes());
        b[32..40].copy_from_slice(&(ELF_HEADER_SIZE as u64).to_le_bytes());
        b[54..56].copy_from_slice(&56_u16.to_le_bytes());
        b[56..58].copy_from_slice(&1_u16.to_le_bytes());
        b.extend_from_slice(&ph);
        b.extend_from_slice(payload);
        b
    }

    fn load(offset: u64, va: u64, file_size: u64, mem_size: u64) -> [u8; PH_SIZE] {
        let mut ph = [0_u8; PH_SIZE];
        ph[0..4].copy_from_slice(&PT_LOAD.to_le_bytes());
        ph[4..8].copy_from_slice(&0b101_u32.to_le_bytes());
        ph[8..16].copy_from_slice(&offset.to_le_bytes());
        ph[16..24].copy_from_slice(&va.to_le_bytes());
        ph[32..40].copy_from_slice(&file_size.to_le_bytes());
        ph[40..48].copy_from_slice(&mem_size.to_le_bytes());
        ph
    }

    const PAYLOAD_AT: u64 = (ELF_HEADER_SIZE + PH_SIZE) as u64;

    #[test]
    fn load_segment_is_decoded() {
        let bytes = image(load(PAYLOAD_AT, 0x40_1000, 4, 0x100), b"code");
        let elf = ElfImage::parse(&bytes).unwrap();
        assert_eq!(elf.entry(), VirtualAddress::new(0x40_1000));

        let segments: Vec<_> = elf.segments().collect::<Result<_, _>>().unwrap();
        assert_eq!(segments.len(), 1);
        let seg = segments[0];
        assert_eq!(seg.va, VirtualAddress::new(0x40_1000));
        assert_eq!(seg.data, b"code");
        assert_eq!(seg.zero_fill(), 0xfc);
        assert!(seg.flags.execute() && seg.flags.read() && !seg.flags.write());
    }

    #[test]
    fn header_errors() {
        assert_eq!(ElfImage::parse(b"\x7F").unwrap_err(), ElfError::TooShort);
        assert_eq!(
            ElfImage::parse(&[0_u8; 64]).unwrap_err(),
            ElfError::BadMagic
        );

        let mut bytes = image(load(PAYLOAD_AT, 0x40_1000, 0, 0), &[]);
        bytes[4] = 1;
        assert_eq!(ElfImage::parse(&bytes).unwrap_err(), ElfError::BadClass);

        let mut bytes = image(load(PAYLOAD_AT, 0x40_1000, 0, 0), &[]);
        bytes.truncate(ELF_HEADER_SIZE + 8);
        assert_eq!(
            ElfImage::parse(&bytes).unwrap_err(),
            ElfError::BadProgramHeader
        );
    }

    #[test]
    fn truncated_segment_is_rejected() {
        let bytes = image(load(PAYLOAD_AT, 0x40_1000, 64, 64), b"short");
        let elf = ElfImage::parse(&bytes).unwrap();
        assert_eq!(
            elf.segments().next().unwrap().unwrap_err(),
            ElfError::TruncatedSegment
        );
    }

    #[test]
    fn segments_must_stay_below_user_top() {
        let bytes = image(load(PAYLOAD_AT, USER_TOP - 0x1000, 0, 0x2000), &[]);
        let elf = ElfImage::parse(&bytes).unwrap();
        assert_eq!(
            elf.segments().next().unwrap().unwrap_err(),
            ElfError::BadProgramHeader
        );
    }

    #[test]
    fn segments_may_not_touch_the_scratch_page() {
        for (va, mem_size) in [
            (USER_TEMP, 0x10),
            (USER_TEMP - 0x1000, 0x1001),
            (USER_TEMP + 0xff0, 0x10),
        ] {
            let bytes = image(load(PAYLOAD_AT, va, 0, mem_size), &[]);
            let elf = ElfImage::parse(&bytes).unwrap();
            assert_eq!(
                elf.segments().next().unwrap().unwrap_err(),
                ElfError::BadProgramHeader,
                "segment at {va:#x}"
            );
        }

        for va in [USER_TEMP - 0x1000, USER_TEMP + PAGE_SIZE] {
            let bytes = image(load(PAYLOAD_AT, va, 0, 0x1000), &[]);
            assert!(ElfImage::parse(&bytes).unwrap().segments().next().unwrap().is_ok());
        }
    }

    #[test]
    fn file_size_may_not_exceed_mem_size() {
        let bytes = image(load(PAYLOAD_AT, 0x40_1000, 4, 2), b"code");
        let elf = ElfImage::parse(&bytes).unwrap();
        assert!(elf.segments().next().unwrap().is_err());
    }

    #[test]
    fn non_load_headers_are_skipped() {
        let mut ph = load(PAYLOAD_AT, 0x40_1000, 0, 0);
        ph[0..4].copy_from_slice(&4_u32.to_le_bytes());
        let bytes = image(ph, &[]);
        assert_eq!(ElfImage::parse(&bytes).unwrap().segments().count(), 0);
    }
}
