//! Volatile access to a page of device registers.

use kernel_memory_addresses::VirtualAddress;

/// A mapped register page. Offsets are in bytes.
#[derive(Copy, Clone, Debug)]
pub struct Mmio {
    base: VirtualAddress,
}

impl Mmio {
    /// # Safety
    /// `base` must map a device register page, uncached, for as long as the
    /// value is used.
    pub const unsafe fn new(base: VirtualAddress) -> Self {
        Self { base }
    }

    #[inline]
    fn reg(self, offset: usize) -> *mut u32 {
        debug_assert!(offset.is_multiple_of(4) && offset < 4096);
        self.base.as_mut_ptr::<u8>().wrapping_add(offset).cast()
    }

    #[inline]
    pub fn read(self, offset: usize) -> u32 {
        // SAFETY: In bounds of the register page, see `new`.
        unsafe { self.reg(offset).read_volatile() }
    }

    #[inline]
    pub fn write(self, offset: usize, value: u32) {
        // SAFETY: In bounds of the register page, see `new`.
        unsafe { self.reg(offset).write_volatile(value) }
    }
}
