//! # Kernel Boot Information
//!
//! The loader runs in 32-bit protected mode, builds the initial page tables
//! and an array of page records, then leaves a [`KernelConfig`] at
//! [`KERNEL_INFO`](crate::memory::KERNEL_INFO) before jumping to the kernel.
//! All pointers inside it are **physical** addresses.

use kernel_memory_addresses::{PhysicalAddress, VirtualAddress};

/// Size in bytes of one loader page record ([`Page32`]).
pub const PAGE32_SIZE: usize = 12;

/// A pointer-sized field written by the 32-bit loader.
///
/// The loader only fills the low half; the high half is zero.
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct BootPointer {
    raw: u64,
}

impl BootPointer {
    #[inline]
    #[must_use]
    pub const fn new(pa: PhysicalAddress) -> Self {
        Self { raw: pa.as_u64() }
    }

    #[inline]
    #[must_use]
    pub const fn physical(self) -> PhysicalAddress {
        PhysicalAddress::new(self.raw)
    }

    /// The pointer as seen through the kernel's direct map.
    #[inline]
    #[must_use]
    pub const fn virtual_address(self) -> VirtualAddress {
        crate::memory::phys_to_virt(self.physical())
    }
}

/// Hand-off blob consumed once at kernel start.
#[repr(C)]
#[derive(Copy, Clone, Debug, Default)]
pub struct KernelConfig {
    /// Root page table the loader switched to.
    pub pml4: BootPointer,
    /// Base of the page record array ([`Page32`] entries).
    pub pages: BootPointer,
    /// Number of page records, one per physical frame.
    pub pages_cnt: u64,
    /// Base of the global descriptor table.
    pub gdt: BootPointer,
}

/// One loader page record, packed as `{ref: u32, links: u64}`.
///
/// `links == 0` marks a page the loader handed out; any other value means the
/// page was on the loader's free list.
#[repr(C, packed)]
#[derive(Copy, Clone, Debug, Default)]
pub struct Page32 {
    pub refs: u32,
    pub links: u64,
}

impl Page32 {
    /// Decode a record from its little-endian byte image.
    #[inline]
    #[must_use]
    pub const fn from_bytes(b: [u8; PAGE32_SIZE]) -> Self {
        Self {
            refs: u32::from_le_bytes([b[0], b[1], b[2], b[3]]),
            links: u64::from_le_bytes([b[4], b[5], b[6], b[7], b[8], b[9], b[10], b[11]]),
        }
    }

    #[inline]
    #[must_use]
    pub const fn is_free(&self) -> bool {
        self.links != 0
    }
}

const _: () = {
    assert!(size_of::<Page32>() == PAGE32_SIZE);
    assert!(size_of::<KernelConfig>() == 32);
};
