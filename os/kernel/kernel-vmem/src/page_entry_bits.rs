use bitfield_struct::bitfield;
use kernel_memory_addresses::{PhysicalAddress, PhysicalPage};

/// A single 64-bit x86-64 page table entry in its raw bitfield form.
///
/// The same layout is used at all four levels; the kernel never creates
/// large pages, so bit 7 is only ever meaningful as PAT on a 4 KiB leaf.
///
/// ### Bit layout
///
/// | Bits   | Name            | Meaning |
/// |--------|-----------------|---------|
/// | 0      | `P`             | Valid entry if set |
/// | 1      | `RW`            | Writable if set |
/// | 2      | `US`            | User-mode accessible if set |
/// | 3      | `PWT`           | Write-through caching |
/// | 4      | `PCD`           | Disable caching |
/// | 5      | `A`             | Accessed |
/// | 6      | `D`             | Dirty (leaf only) |
/// | 7      | `PAT`           | Page attribute table (leaf only) |
/// | 8      | `G`             | Global (leaf only) |
/// | 9..=10 | OS available    | Unused |
/// | 11     | `COW`           | Copy-on-write, interpreted by the kernel only |
/// | 12..51 | `addr`          | Physical frame bits [51:12] |
/// | 52..62 | OS available    | Unused |
/// | 63     | `NX`            | Execute disable |
///
/// ```rust
/// # use kernel_memory_addresses::PhysicalPage;
/// # use kernel_vmem::PageEntryBits;
/// let e = PageEntryBits::user_rw().with_frame(PhysicalPage::from_index(0x42));
/// assert!(e.present() && e.writable() && e.user_access());
/// assert_eq!(e.into_bits(), 0x42_007);
/// ```
#[bitfield(u64)]
#[derive(Eq, PartialEq)]
pub struct PageEntryBits {
    /// Present (P, bit 0).
    pub present: bool,

    /// Writable (RW, bit 1).
    pub writable: bool,

    /// User/Supervisor (US, bit 2).
    pub user_access: bool,

    /// Page Write-Through (PWT, bit 3).
    pub write_through: bool,

    /// Page Cache Disable (PCD, bit 4).
    pub cache_disabled: bool,

    /// Accessed (A, bit 5). Set by the CPU.
    pub accessed: bool,

    /// Dirty (D, bit 6). Set by the CPU on first write to a leaf.
    pub dirty: bool,

    /// Page Attribute Table index bit (PAT, bit 7) of a 4 KiB leaf.
    pub pat: bool,

    /// Global (G, bit 8). Survives CR3 reloads when CR4.PGE is set.
    pub global_translation: bool,

    #[bits(2)]
    __os_low: u8,

    /// Copy-on-write (bit 11).
    ///
    /// Hardware ignores this bit. A COW leaf is always mapped read-only; the
    /// first write faults and the kernel installs a private copy.
    pub copy_on_write: bool,

    /// Physical frame bits [51:12].
    #[bits(40)]
    frame_bits: u64,

    #[bits(11)]
    __os_high: u16,

    /// No-Execute (NX, bit 63).
    pub no_execute: bool,
}

impl PageEntryBits {
    /// Mask selecting the permission and status bits of an entry.
    pub const FLAGS_MASK: u64 = 0xfff | (1 << 63);

    #[inline]
    #[must_use]
    pub const fn frame(self) -> PhysicalPage {
        PhysicalPage::containing(PhysicalAddress::new(self.frame_bits() << 12))
    }

    #[inline]
    #[must_use]
    pub const fn with_frame(self, frame: PhysicalPage) -> Self {
        self.with_frame_bits(frame.base().as_u64() >> 12)
    }

    /// The entry with its address bits cleared.
    #[inline]
    #[must_use]
    pub const fn flags(self) -> Self {
        Self::from_bits(self.into_bits() & Self::FLAGS_MASK)
    }

    /// Link flags for intermediate tables: present, writable, user.
    ///
    /// Access is restricted at the leaf, so every non-leaf level is opened
    /// fully.
    #[inline]
    #[must_use]
    pub const fn table_link() -> Self {
        Self::new()
            .with_present(true)
            .with_writable(true)
            .with_user_access(true)
    }

    /// Present, writable, user-accessible leaf.
    #[inline]
    #[must_use]
    pub const fn user_rw() -> Self {
        Self::table_link()
    }

    /// Present, writable, supervisor-only leaf.
    #[inline]
    #[must_use]
    pub const fn kernel_rw() -> Self {
        Self::new().with_present(true).with_writable(true)
    }

    /// Supervisor-only uncached leaf for device registers.
    ///
    /// NX stays clear: the loader does not enable `EFER.NXE`, which makes
    /// bit 63 reserved.
    #[inline]
    #[must_use]
    pub const fn kernel_mmio() -> Self {
        Self::kernel_rw()
            .with_write_through(true)
            .with_cache_disabled(true)
    }

    /// The read-only shared form of this leaf used after `fork`.
    #[inline]
    #[must_use]
    pub const fn into_cow(self) -> Self {
        self.with_writable(false).with_copy_on_write(true)
    }

    /// The private writable form of a COW leaf after its copy was made.
    #[inline]
    #[must_use]
    pub const fn into_private(self) -> Self {
        self.with_writable(true)
            .with_copy_on_write(false)
            .with_accessed(false)
            .with_dirty(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cow_bit_is_bit_eleven() {
        let e = PageEntryBits::new().with_copy_on_write(true);
        assert_eq!(e.into_bits(), 1 << 11);
    }

    #[test]
    fn hardware_bits_match_architecture() {
        assert_eq!(PageEntryBits::new().with_present(true).into_bits(), 1 << 0);
        assert_eq!(PageEntryBits::new().with_writable(true).into_bits(), 1 << 1);
        assert_eq!(PageEntryBits::new().with_user_access(true).into_bits(), 1 << 2);
        assert_eq!(PageEntryBits::new().with_write_through(true).into_bits(), 1 << 3);
        assert_eq!(PageEntryBits::new().with_cache_disabled(true).into_bits(), 1 << 4);
        assert_eq!(PageEntryBits::new().with_accessed(true).into_bits(), 1 << 5);
        assert_eq!(PageEntryBits::new().with_dirty(true).into_bits(), 1 << 6);
        assert_eq!(PageEntryBits::new().with_pat(true).into_bits(), 1 << 7);
        assert_eq!(
            PageEntryBits::new().with_global_translation(true).into_bits(),
            1 << 8
        );
        assert_eq!(PageEntryBits::new().with_no_execute(true).into_bits(), 1 << 63);
    }

    #[test]
    fn cow_conversion_round_trip() {
        let frame = PhysicalPage::from_index(7);
        let rw = PageEntryBits::user_rw().with_frame(frame).with_dirty(true);
        let cow = rw.into_cow();
        assert!(!cow.writable());
        assert!(cow.copy_on_write());
        assert_eq!(cow.frame(), frame);

        let private = cow.into_private();
        assert!(private.writable());
        assert!(!private.copy_on_write());
        assert!(!private.dirty());
        assert!(private.user_access());
    }

    #[test]
    fn flags_strip_the_address() {
        let e = PageEntryBits::user_rw().with_frame(PhysicalPage::from_index(0xabc));
        assert_eq!(e.flags(), PageEntryBits::user_rw());
    }
}
