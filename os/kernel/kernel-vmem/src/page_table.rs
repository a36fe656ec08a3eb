//! # Page Tables

use crate::PageEntryBits;
use kernel_memory_addresses::{ENTRIES_PER_TABLE, PhysicalPage};

/// Decoded view of one table slot.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Entry {
    /// Nothing is mapped through this slot.
    Absent,
    /// The slot references `frame` (a next-level table or a leaf page).
    Present {
        frame: PhysicalPage,
        flags: PageEntryBits,
    },
}

/// One raw 64-bit page-table slot.
#[repr(transparent)]
#[derive(Copy, Clone, Default, Eq, PartialEq)]
pub struct PageTableEntry(PageEntryBits);

impl PageTableEntry {
    #[inline]
    #[must_use]
    pub const fn zero() -> Self {
        Self(PageEntryBits::new())
    }

    #[inline]
    #[must_use]
    pub const fn new(frame: PhysicalPage, flags: PageEntryBits) -> Self {
        Self(flags.flags().with_present(true).with_frame(frame))
    }

    #[inline]
    #[must_use]
    pub const fn bits(self) -> PageEntryBits {
        self.0
    }

    #[inline]
    #[must_use]
    pub const fn is_present(self) -> bool {
        self.0.present()
    }

    #[inline]
    #[must_use]
    pub const fn kind(self) -> Entry {
        if self.0.present() {
            Entry::Present {
                frame: self.0.frame(),
                flags: self.0.flags(),
            }
        } else {
            Entry::Absent
        }
    }

    /// Frame referenced by a present entry.
    #[inline]
    #[must_use]
    pub const fn frame(self) -> Option<PhysicalPage> {
        if self.0.present() {
            Some(self.0.frame())
        } else {
            None
        }
    }

    #[inline]
    pub const fn set(&mut self, frame: PhysicalPage, flags: PageEntryBits) {
        *self = Self::new(frame, flags);
    }

    /// Replace the flags, keeping the referenced frame.
    #[inline]
    pub const fn set_flags(&mut self, flags: PageEntryBits) {
        let frame = self.0.frame();
        *self = Self::new(frame, flags);
    }

    #[inline]
    pub const fn clear(&mut self) {
        *self = Self::zero();
    }
}

impl core::fmt::Debug for PageTableEntry {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self.kind() {
            Entry::Absent => f.write_str("PTE(-)"),
            Entry::Present { frame, flags } => {
                write!(f, "PTE({frame} flags={:#05x})", flags.into_bits())
            }
        }
    }
}

/// A 4 KiB page table of 512 entries, valid at any of the four levels.
#[repr(C, align(4096))]
pub struct PageTable {
    entries: [PageTableEntry; ENTRIES_PER_TABLE],
}

impl PageTable {
    #[inline]
    pub fn zero(&mut self) {
        self.entries.fill(PageTableEntry::zero());
    }

    #[inline]
    #[must_use]
    pub const fn get(&self, index: usize) -> PageTableEntry {
        self.entries[index]
    }

    #[inline]
    pub const fn get_mut(&mut self, index: usize) -> &mut PageTableEntry {
        &mut self.entries[index]
    }

    #[inline]
    pub const fn set(&mut self, index: usize, entry: PageTableEntry) {
        self.entries[index] = entry;
    }

    #[inline]
    pub fn iter(&self) -> impl Iterator<Item = (usize, &PageTableEntry)> {
        self.entries.iter().enumerate()
    }

    /// Copy the entries `from..` of `other` into this table.
    ///
    /// Used to share the kernel half of the root table between address
    /// spaces; the referenced frames are not reference-counted again.
    #[inline]
    pub fn copy_upper(&mut self, other: &Self, from: usize) {
        self.entries[from..].copy_from_slice(&other.entries[from..]);
    }
}

const _: () = {
    assert!(size_of::<PageTableEntry>() == 8);
    assert!(size_of::<PageTable>() == 4096);
};
