use kernel_memory_addresses::PhysicalPage;
use kernel_vmem::{AddressSpace, FrameAlloc, Mmu, PhysMapper};

/// The memory side of the kernel that task operations work through.
pub struct MemoryContext<'m, M: PhysMapper, A: FrameAlloc, U: Mmu> {
    pub mapper: &'m M,
    pub frames: A,
    pub mmu: U,
    /// Canonical kernel PML4; every task root copies its upper half.
    pub kernel_root: PhysicalPage,
}

impl<'m, M: PhysMapper, A: FrameAlloc, U: Mmu> MemoryContext<'m, M, A, U> {
    pub const fn new(mapper: &'m M, frames: A, mmu: U, kernel_root: PhysicalPage) -> Self {
        Self {
            mapper,
            frames,
            mmu,
            kernel_root,
        }
    }

    /// Handle to the address space rooted at `root`.
    #[inline]
    #[must_use]
    pub const fn space(&self, root: PhysicalPage) -> AddressSpace<'m, M> {
        AddressSpace::from_root(self.mapper, root)
    }

    /// Run `f` with `root` loaded, then put the previous root back.
    ///
    /// `root` must be a task root created from [`kernel_root`](Self::kernel_root)
    /// (or the kernel root itself).
    pub fn within<R>(
        &mut self,
        root: PhysicalPage,
        f: impl FnOnce(&AddressSpace<'m, M>, &mut A, &mut U) -> R,
    ) -> R {
        let previous = self.mmu.active_root();
        let switch = previous != root;
        if switch {
            // SAFETY: Task roots share the kernel half, so the running code,
            // its stack and the direct map stay mapped.
            unsafe { self.mmu.load_root(root) };
        }
        let space = self.space(root);
        let result = f(&space, &mut self.frames, &mut self.mmu);
        if switch {
            // SAFETY: `previous` was active on entry.
            unsafe { self.mmu.load_root(previous) };
        }
        result
    }
}
