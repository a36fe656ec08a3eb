//! # Boot-Time Reconstruction
//!
//! The 32-bit loader leaves one packed [`Page32`] record per frame. The kernel
//! reuses that very array for its own [`Page`] records.

use crate::{Page, PageArena};
use core::slice;
use kernel_info::boot::{PAGE32_SIZE, Page32};
use log::info;

impl PageArena<'static> {
    /// Convert the loader's records at `base` in place and rebuild the free
    /// list from them.
    ///
    /// A record with `links == 0` was handed out by the loader and must hold
    /// exactly one reference. Any other record was on the loader's free list
    /// and goes onto the new one; it may still hold one reference (a frame
    /// that is mapped but may be reused). This relaxation exists only here.
    ///
    /// # Safety
    /// `base` must point at `count` loader records, aligned for [`Page`],
    /// valid for writes and used by nothing else for the rest of the kernel's
    /// life.
    ///
    /// # Panics
    /// If a record violates the reference rules above.
    pub unsafe fn from_boot_records(base: *mut u8, count: usize) -> Self {
        debug_assert!(base.cast::<Page>().is_aligned());
        let pages = base.cast::<Page>();
        let mut used = 0_usize;

        // Highest first, so a converted record never overwrites one not yet read.
        for index in (0..count).rev() {
            let mut raw = [0_u8; PAGE32_SIZE];
            unsafe {
                core::ptr::copy_nonoverlapping(
                    base.add(index * PAGE32_SIZE),
                    raw.as_mut_ptr(),
                    PAGE32_SIZE,
                );
            }
            let record = Page32::from_bytes(raw);
            let refs = record.refs;

            if record.is_free() {
                assert!(refs <= 1, "free boot page {index} has {refs} references");
            } else {
                assert!(refs == 1, "used boot page {index} has {refs} references");
                used += 1;
            }
            unsafe { pages.add(index).write(Page::from_boot(refs, record.is_free())) };
        }

        let pages = unsafe { slice::from_raw_parts_mut(pages, count) };
        let arena = Self::rebuild(pages);
        info!("Pages stat: used: {used}, free: {}", count - used);
        arena
    }
}
