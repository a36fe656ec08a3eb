//! # Simulated Hardware
//!
//! Host-side stand-ins for physical RAM, the frame allocator and the MMU so
//! that page-table code can run under `cargo test`. Enabled for this crate's
//! own tests and, through the `sim` feature, for dependent crates' tests.

use crate::{FrameAlloc, Mmu, PhysMapper};
use core::cell::UnsafeCell;
use kernel_memory_addresses::{PAGE_SIZE, PhysicalAddress, PhysicalPage, VirtualAddress};

#[allow(clippy::cast_possible_truncation)]
const PAGE_BYTES: usize = PAGE_SIZE as usize;

#[repr(C, align(4096))]
struct Frame(UnsafeCell<[u8; PAGE_BYTES]>);

/// Zero-initialized RAM of `count` frames; frame `n` lives at `n * 4096`.
pub struct SimPhys {
    frames: Box<[Frame]>,
}

impl SimPhys {
    #[must_use]
    pub fn new(count: usize) -> Self {
        let frames = (0..count)
            .map(|_| Frame(UnsafeCell::new([0; PAGE_BYTES])))
            .collect();
        Self { frames }
    }

    #[must_use]
    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }

    #[allow(clippy::cast_possible_truncation)]
    fn byte_ptr(&self, pa: PhysicalAddress) -> *mut u8 {
        let frame = &self.frames[pa.page().index()];
        unsafe { frame.0.get().cast::<u8>().add(pa.page_offset() as usize) }
    }

    /// Copy `data` into RAM at `pa`. The range must stay inside one frame.
    ///
    /// # Panics
    /// If the range crosses a frame boundary or lies outside the RAM.
    pub fn write(&self, pa: PhysicalAddress, data: &[u8]) {
        assert!(pa.page_offset() as usize + data.len() <= PAGE_BYTES);
        unsafe { core::ptr::copy_nonoverlapping(data.as_ptr(), self.byte_ptr(pa), data.len()) };
    }

    /// Read `len` bytes at `pa`. The range must stay inside one frame.
    ///
    /// # Panics
    /// If the range crosses a frame boundary or lies outside the RAM.
    #[must_use]
    pub fn read(&self, pa: PhysicalAddress, len: usize) -> Vec<u8> {
        assert!(pa.page_offset() as usize + len <= PAGE_BYTES);
        let mut out = vec![0; len];
        unsafe { core::ptr::copy_nonoverlapping(self.byte_ptr(pa), out.as_mut_ptr(), len) };
        out
    }
}

impl PhysMapper for SimPhys {
    unsafe fn phys_to_mut<'a, T>(&self, pa: PhysicalAddress) -> &'a mut T {
        debug_assert!(pa.page_offset() as usize + size_of::<T>() <= PAGE_BYTES);
        unsafe { &mut *self.byte_ptr(pa).cast::<T>() }
    }
}

/// Reference counts and a free stack over `count` frames.
///
/// Frames are handed out lowest index first.
pub struct SimFrames {
    refs: Vec<u32>,
    free: Vec<usize>,
}

impl SimFrames {
    #[must_use]
    pub fn new(count: usize) -> Self {
        Self {
            refs: vec![0; count],
            free: (0..count).rev().collect(),
        }
    }

    #[must_use]
    pub fn free_count(&self) -> usize {
        self.free.len()
    }

    #[must_use]
    pub fn is_free(&self, frame: PhysicalPage) -> bool {
        self.free.contains(&frame.index())
    }
}

impl FrameAlloc for SimFrames {
    fn alloc_frame(&mut self) -> Option<PhysicalPage> {
        let index = self.free.pop()?;
        self.refs[index] = 0;
        Some(PhysicalPage::from_index(index))
    }

    fn incref(&mut self, frame: PhysicalPage) {
        self.refs[frame.index()] += 1;
    }

    fn decref(&mut self, frame: PhysicalPage) {
        let index = frame.index();
        assert!(self.refs[index] > 0, "decref of {frame} at zero");
        self.refs[index] -= 1;
        if self.refs[index] == 0 {
            assert!(!self.free.contains(&index), "double free of {frame}");
            self.free.push(index);
        }
    }

    fn refcount(&self, frame: PhysicalPage) -> u32 {
        self.refs[frame.index()]
    }
}

/// Records root loads and TLB invalidations.
pub struct SimMmu {
    root: PhysicalPage,
    loads: usize,
    invalidated: Vec<VirtualAddress>,
}

impl SimMmu {
    #[must_use]
    pub const fn new(root: PhysicalPage) -> Self {
        Self {
            root,
            loads: 0,
            invalidated: Vec::new(),
        }
    }

    /// Number of [`Mmu::load_root`] calls so far.
    #[must_use]
    pub const fn loads(&self) -> usize {
        self.loads
    }

    #[must_use]
    pub fn invalidated(&self) -> &[VirtualAddress] {
        &self.invalidated
    }
}

impl Mmu for SimMmu {
    fn active_root(&self) -> PhysicalPage {
        self.root
    }

    unsafe fn load_root(&mut self, root: PhysicalPage) {
        self.root = root;
        self.loads += 1;
    }

    fn invalidate(&mut self, va: VirtualAddress) {
        self.invalidated.push(va.page_base());
    }
}
