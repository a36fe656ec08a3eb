//! # Physical and Virtual Addresses
//!
//! Zero-cost wrappers that keep physical and virtual addresses apart at the
//! type level. The kernel only ever maps 4 KiB pages, so a single page
//! granularity is modeled:
//!
//! | Type | Meaning |
//! |------|---------|
//! | [`PhysicalAddress`] | A byte address in physical memory (RAM or MMIO). |
//! | [`VirtualAddress`] | A byte address as seen through the page tables. |
//! | [`PhysicalPage`] | A 4 KiB aligned physical frame. |
//!
//! ## Page-table indices
//!
//! A canonical 48-bit virtual address splits into four 9-bit table indices
//! and a 12-bit page offset:
//!
//! ```text
//! | 47..39 | 38..30 | 29..21 | 20..12 | 11..0  |
//! |  PML4  |  PDP   |   PD   |   PT   | offset |
//! ```
//!
//! [`VirtualAddress::table_index`] extracts the index for a [`TableLevel`].
//!
//! ```rust
//! # use kernel_memory_addresses::*;
//! let va = VirtualAddress::new(0x0000_0001_0020_3456);
//! assert_eq!(va.table_index(TableLevel::Pml4), 0);
//! assert_eq!(va.table_index(TableLevel::Pdp), 4);
//! assert_eq!(va.table_index(TableLevel::Pd), 1);
//! assert_eq!(va.table_index(TableLevel::Pt), 3);
//! assert_eq!(va.page_offset(), 0x456);
//! ```

#![cfg_attr(not(any(test, doctest)), no_std)]
#![deny(unsafe_code)]

mod physical_address;
mod physical_page;
mod virtual_address;

pub use physical_address::PhysicalAddress;
pub use physical_page::PhysicalPage;
pub use virtual_address::{TableLevel, VirtualAddress};

/// Size of a page in bytes.
pub const PAGE_SIZE: u64 = 4096;

/// Number of address bits covered by the in-page offset.
pub const PAGE_SHIFT: u32 = 12;

/// Number of entries in one page-table level.
pub const ENTRIES_PER_TABLE: usize = 512;

/// Align `x` down to the nearest multiple of `a` (a power of two).
///
/// ```rust
/// # use kernel_memory_addresses::align_down;
/// assert_eq!(align_down(4097, 4096), 4096);
/// assert_eq!(align_down(4096, 4096), 4096);
/// ```
#[inline]
#[must_use]
pub const fn align_down(x: u64, a: u64) -> u64 {
    x & !(a - 1)
}

/// Align `x` up to the nearest multiple of `a` (a power of two).
///
/// ```rust
/// # use kernel_memory_addresses::align_up;
/// assert_eq!(align_up(1, 4096), 4096);
/// assert_eq!(align_up(8192, 4096), 8192);
/// ```
#[inline]
#[must_use]
pub const fn align_up(x: u64, a: u64) -> u64 {
    (x + a - 1) & !(a - 1)
}
