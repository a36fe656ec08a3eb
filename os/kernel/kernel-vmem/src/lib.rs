//! # Virtual Memory Support
//!
//! Four-level x86-64 page tables built from reference-counted 4 KiB frames.
//!
//! ## What you get
//! - The raw entry layout [`PageEntryBits`], including the kernel-private
//!   copy-on-write bit.
//! - A 4 KiB-aligned [`PageTable`] whose slots decode into
//!   [`Entry::Present`] or [`Entry::Absent`].
//! - The seams to the rest of the kernel: [`PhysMapper`] (reach a frame
//!   through some virtual mapping), [`FrameAlloc`] (reference-counted frame
//!   source) and [`Mmu`] (the CR3 / TLB side of the processor).
//! - An [`AddressSpace`] handle implementing lookup, insert, remove,
//!   teardown and copy-on-write repair.
//!
//! ## x86-64 Virtual Address → Physical Address Walk
//!
//! ```text
//! | 47‒39 | 38‒30 | 29‒21 | 20‒12 | 11‒0   |
//! |  PML4 |  PDP  |   PD  |   PT  | Offset |
//! ```
//!
//! ```text
//!  PML4  →  PDP  →  PD  →  PT  →  4 KiB page
//! ```
//!
//! Only 4 KiB leaves are ever installed. Intermediate levels are opened with
//! present, writable and user set; the leaf decides the effective access.
//!
//! ## Reference counting
//!
//! Every present entry owns one reference on the frame it points at, whether
//! the target is a data page or a lower-level table. Clearing an entry drops
//! that reference; a frame whose count reaches zero goes back to the
//! allocator.

#![cfg_attr(not(any(test, doctest, feature = "sim")), no_std)]
#![allow(unsafe_code)]

pub mod address_space;
mod page_entry_bits;
mod page_table;

#[cfg(any(test, feature = "sim"))]
pub mod sim;

pub use crate::address_space::AddressSpace;
pub use crate::page_entry_bits::PageEntryBits;
pub use crate::page_table::{Entry, PageTable, PageTableEntry};
use kernel_memory_addresses::{PhysicalAddress, PhysicalPage, VirtualAddress};

/// Re-export constants as info module.
pub use kernel_info::memory as info;

/// Converts physical addresses to usable references in the current virtual
/// address space.
///
/// The kernel implements this through its direct map at
/// [`VADDR_BASE`](info::VADDR_BASE); host tests back it with a simulated RAM.
pub trait PhysMapper {
    /// Convert a physical address to a mutable reference.
    ///
    /// # Safety
    /// `pa` must lie in mapped memory, be suitably aligned for `T`, and the
    /// caller must not create overlapping live references to the same bytes.
    unsafe fn phys_to_mut<'a, T>(&self, pa: PhysicalAddress) -> &'a mut T;
}

/// A reference-counted source of physical frames.
///
/// Frames come back from [`alloc_frame`](Self::alloc_frame) with a count of
/// zero; whoever links them into a table takes the first reference.
pub trait FrameAlloc {
    /// Take a frame off the free list. `None` means out of memory.
    fn alloc_frame(&mut self) -> Option<PhysicalPage>;

    fn incref(&mut self, frame: PhysicalPage);

    /// Drop one reference; the frame is freed when none remain.
    fn decref(&mut self, frame: PhysicalPage);

    fn refcount(&self, frame: PhysicalPage) -> u32;
}

/// The processor side of address translation.
pub trait Mmu {
    /// Root table currently loaded (CR3).
    fn active_root(&self) -> PhysicalPage;

    /// Load `root` as the active address space.
    ///
    /// # Safety
    /// `root` must be a valid PML4 that maps the running code, its stack and
    /// the kernel direct map.
    unsafe fn load_root(&mut self, root: PhysicalPage);

    /// Drop any cached translation for the page containing `va`.
    fn invalidate(&mut self, va: VirtualAddress);
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum VmemError {
    #[error("out of physical memory")]
    OutOfMemory,
    #[error("address space {0} is not the active one")]
    Inactive(PhysicalPage),
    #[error("no page mapped at {0}")]
    NotMapped(VirtualAddress),
    #[error("page at {0} is not copy-on-write")]
    NotCopyOnWrite(VirtualAddress),
    #[error("scratch page {0} is already mapped")]
    ScratchInUse(VirtualAddress),
}
