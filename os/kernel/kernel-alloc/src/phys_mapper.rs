//! # Direct-Map `PhysMapper`
//!
//! All physical memory is mapped at [`VADDR_BASE`], so reaching a frame is
//! a single addition.
//!
//! ## See also
//! - [`PhysMapper`] trait in `kernel-vmem`
//! - [`kernel_info::memory`] for the layout constants

use kernel_info::memory::{VADDR_BASE, phys_to_virt};
use kernel_memory_addresses::PhysicalAddress;
use kernel_vmem::PhysMapper;

/// [`PhysMapper`] over the kernel's direct map at [`VADDR_BASE`].
///
/// # Safety
/// The direct map must be present and cover every address passed in.
#[derive(Copy, Clone, Debug, Default)]
pub struct DirectMap;

impl PhysMapper for DirectMap {
    unsafe fn phys_to_mut<'a, T>(&self, pa: PhysicalAddress) -> &'a mut T {
        let va = phys_to_virt(pa);
        debug_assert!(va.as_u64() >= VADDR_BASE);
        // SAFETY: Caller must ensure the physical address is valid and mapped.
        unsafe { &mut *va.as_mut_ptr::<T>() }
    }
}
