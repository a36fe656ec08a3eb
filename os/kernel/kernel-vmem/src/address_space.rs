//! # Address Space (x86-64, PML4-rooted)
//!
//! Helpers to build, edit and tear down a **single** virtual address space,
//! the tree of tables hanging off one PML4 frame.
//!
//! ## Highlights
//!
//! - [`AddressSpace::lookup`] walks the four levels and optionally creates
//!   missing intermediate tables.
//! - [`AddressSpace::insert`] / [`AddressSpace::remove`] install and clear
//!   one 4 KiB leaf with the matching reference-count bookkeeping.
//! - [`AddressSpace::destroy_subtree`] releases everything below a PML4
//!   index bound.
//! - [`AddressSpace::mark_cow`], [`AddressSpace::share_leaves_into`] and
//!   [`AddressSpace::resolve_cow`] implement copy-on-write sharing.
//! - [`AddressSpace::write`], [`AddressSpace::read`] and
//!   [`AddressSpace::zero`] move bytes through the translations.
//!
//! ## Activity
//!
//! Every edit requires the space to be the one loaded in the [`Mmu`]: the
//! TLB invalidations issued by an edit only reach the active translations.
//! Edits on an inactive space fail with [`VmemError::Inactive`]. Read-only
//! walks ([`walk`](AddressSpace::walk), [`translate`](AddressSpace::translate))
//! work on any space.

use crate::info::{USER_TEMP, USER_TOP};
use crate::{Entry, FrameAlloc, Mmu, PageEntryBits, PageTable, PageTableEntry, PhysMapper, VmemError};
use kernel_memory_addresses::{
    ENTRIES_PER_TABLE, PAGE_SIZE, PhysicalAddress, PhysicalPage, TableLevel, VirtualAddress,
};
use log::trace;

/// A mutable reference to a leaf slot inside some page table.
pub type EntrySlot<'a> = &'a mut PageTableEntry;

/// PML4 index of the first kernel-owned slot. Everything below is user space.
pub const USER_PML4_BOUND: usize = VirtualAddress::new(USER_TOP).table_index(TableLevel::Pml4);

#[allow(clippy::cast_possible_truncation)]
const PAGE_BYTES: usize = PAGE_SIZE as usize;

/// Handle to a single, concrete address space.
pub struct AddressSpace<'m, M: PhysMapper> {
    root: PhysicalPage,
    mapper: &'m M,
}

impl<'m, M: PhysMapper> AddressSpace<'m, M> {
    #[inline]
    pub const fn from_root(mapper: &'m M, root: PhysicalPage) -> Self {
        Self { root, mapper }
    }

    /// Allocate a fresh root table sharing the kernel half of `kernel_root`.
    ///
    /// The new root holds one reference, owned by the returned space.
    ///
    /// # Errors
    /// [`VmemError::OutOfMemory`] if no frame is left for the root.
    pub fn create<A: FrameAlloc>(
        mapper: &'m M,
        frames: &mut A,
        kernel_root: PhysicalPage,
    ) -> Result<Self, VmemError> {
        let root = frames.alloc_frame().ok_or(VmemError::OutOfMemory)?;
        let space = Self::from_root(mapper, root);
        let table = space.table(root);
        table.zero();
        table.copy_upper(space.table(kernel_root), USER_PML4_BOUND);
        frames.incref(root);
        Ok(space)
    }

    /// Physical page of the PML4.
    #[inline]
    #[must_use]
    pub const fn root(&self) -> PhysicalPage {
        self.root
    }

    /// Borrow the table stored in `frame`.
    ///
    /// `frame` must be a table frame reachable from this root (or a fresh
    /// frame about to become one).
    #[inline]
    #[allow(clippy::mut_from_ref)]
    fn table<'t>(&self, frame: PhysicalPage) -> &'t mut PageTable {
        unsafe { self.mapper.phys_to_mut(frame.base()) }
    }

    /// Fail unless this space is the one loaded in `mmu`.
    ///
    /// # Errors
    /// [`VmemError::Inactive`] if another root is loaded.
    #[inline]
    pub fn ensure_active<U: Mmu>(&self, mmu: &U) -> Result<(), VmemError> {
        if mmu.active_root() == self.root {
            Ok(())
        } else {
            Err(VmemError::Inactive(self.root))
        }
    }

    /// Walk to the leaf slot for `va` without creating anything.
    #[must_use]
    pub fn walk(&self, va: VirtualAddress) -> Option<EntrySlot<'_>> {
        let mut table = self.table(self.root);
        let mut level = TableLevel::Pml4;
        while let Some(next) = level.next() {
            let frame = table.get(va.table_index(level)).frame()?;
            table = self.table(frame);
            level = next;
        }
        Some(table.get_mut(va.table_index(TableLevel::Pt)))
    }

    /// Walk to the leaf slot for `va`.
    ///
    /// With `create`, missing intermediate tables are allocated, zeroed and
    /// linked with [`PageEntryBits::table_link`]; `None` then only means the
    /// allocator ran dry. Without `create`, `None` means some level is absent.
    pub fn lookup<A: FrameAlloc>(
        &self,
        frames: &mut A,
        va: VirtualAddress,
        create: bool,
    ) -> Option<EntrySlot<'_>> {
        let mut table = self.table(self.root);
        let mut level = TableLevel::Pml4;
        while let Some(next) = level.next() {
            let slot = table.get_mut(va.table_index(level));
            let frame = match slot.kind() {
                Entry::Present { frame, .. } => frame,
                Entry::Absent if create => {
                    let frame = frames.alloc_frame()?;
                    self.table(frame).zero();
                    frames.incref(frame);
                    slot.set(frame, PageEntryBits::table_link());
                    frame
                }
                Entry::Absent => return None,
            };
            table = self.table(frame);
            level = next;
        }
        Some(table.get_mut(va.table_index(TableLevel::Pt)))
    }

    /// Map `frame` at `va` with leaf permissions `perm`.
    ///
    /// If `va` already maps `frame`, only the permissions change. Otherwise
    /// the previous mapping (if any) is removed and `frame` gains one
    /// reference.
    ///
    /// # Errors
    /// - [`VmemError::Inactive`] if this space is not loaded.
    /// - [`VmemError::OutOfMemory`] if an intermediate table could not be
    ///   allocated. Nothing is changed at `va` in that case.
    pub fn insert<A: FrameAlloc, U: Mmu>(
        &self,
        frames: &mut A,
        mmu: &mut U,
        frame: PhysicalPage,
        va: VirtualAddress,
        perm: PageEntryBits,
    ) -> Result<(), VmemError> {
        self.ensure_active(mmu)?;
        let slot = self
            .lookup(frames, va, true)
            .ok_or(VmemError::OutOfMemory)?;

        match slot.kind() {
            Entry::Present { frame: old, .. } if old == frame => {
                slot.set_flags(perm);
                mmu.invalidate(va);
                return Ok(());
            }
            Entry::Present { frame: old, .. } => Self::release_leaf(frames, mmu, slot, old, va),
            Entry::Absent => {}
        }

        frames.incref(frame);
        slot.set(frame, perm);
        Ok(())
    }

    /// Unmap the page at `va`. Unmapped addresses are left alone.
    ///
    /// # Errors
    /// [`VmemError::Inactive`] if this space is not loaded.
    pub fn remove<A: FrameAlloc, U: Mmu>(
        &self,
        frames: &mut A,
        mmu: &mut U,
        va: VirtualAddress,
    ) -> Result<(), VmemError> {
        self.ensure_active(mmu)?;
        if let Some(slot) = self.walk(va)
            && let Entry::Present { frame, .. } = slot.kind()
        {
            Self::release_leaf(frames, mmu, slot, frame, va);
        }
        Ok(())
    }

    fn release_leaf<A: FrameAlloc, U: Mmu>(
        frames: &mut A,
        mmu: &mut U,
        slot: EntrySlot<'_>,
        frame: PhysicalPage,
        va: VirtualAddress,
    ) {
        frames.decref(frame);
        slot.clear();
        mmu.invalidate(va);
    }

    /// The frame and leaf flags mapped at `va`.
    #[must_use]
    pub fn lookup_page(&self, va: VirtualAddress) -> Option<(PhysicalPage, PageEntryBits)> {
        match self.walk(va)?.kind() {
            Entry::Present { frame, flags } => Some((frame, flags)),
            Entry::Absent => None,
        }
    }

    /// Physical address `va` translates to.
    #[must_use]
    pub fn translate(&self, va: VirtualAddress) -> Option<PhysicalAddress> {
        let (frame, _) = self.lookup_page(va)?;
        Some(frame.base() + va.page_offset())
    }

    /// Allocate a frame and map it at `va`.
    ///
    /// The frame's contents are whatever it held before.
    ///
    /// # Errors
    /// As for [`insert`](Self::insert), plus [`VmemError::OutOfMemory`] if
    /// no frame is left. A frame that could not be mapped goes back to the
    /// allocator.
    pub fn map_new_page<A: FrameAlloc, U: Mmu>(
        &self,
        frames: &mut A,
        mmu: &mut U,
        va: VirtualAddress,
        perm: PageEntryBits,
    ) -> Result<PhysicalPage, VmemError> {
        let frame = frames.alloc_frame().ok_or(VmemError::OutOfMemory)?;
        if let Err(e) = self.insert(frames, mmu, frame, va, perm) {
            // Hand the unused frame back through the normal free path.
            frames.incref(frame);
            frames.decref(frame);
            return Err(e);
        }
        Ok(frame)
    }

    /// Map device registers at `frame` without counting a reference; the
    /// frame is not RAM and has no record in the allocator.
    ///
    /// # Errors
    /// [`VmemError::Inactive`] if this space is not loaded, or
    /// [`VmemError::OutOfMemory`] if an intermediate table could not be
    /// allocated.
    ///
    /// # Panics
    /// If `va` is already mapped.
    pub fn map_device<A: FrameAlloc, U: Mmu>(
        &self,
        frames: &mut A,
        mmu: &mut U,
        frame: PhysicalPage,
        va: VirtualAddress,
    ) -> Result<(), VmemError> {
        self.ensure_active(mmu)?;
        let slot = self
            .lookup(frames, va, true)
            .ok_or(VmemError::OutOfMemory)?;
        assert!(!slot.is_present(), "device page at {va} is already mapped");
        slot.set(frame, PageEntryBits::kernel_mmio());
        mmu.invalidate(va);
        Ok(())
    }

    /// Bytes of the page containing `va`, from `va` to the end of the page.
    #[allow(clippy::mut_from_ref)]
    fn page_bytes<'t>(&self, va: VirtualAddress) -> Result<&'t mut [u8], VmemError> {
        let pa = self.translate(va).ok_or(VmemError::NotMapped(va))?;
        let page: &mut [u8; PAGE_BYTES] = unsafe { self.mapper.phys_to_mut(pa.page().base()) };
        #[allow(clippy::cast_possible_truncation)]
        Ok(&mut page[pa.page_offset() as usize..])
    }

    /// Copy `data` into this space starting at `va`, page by page through
    /// the translations (the space does not need to be active).
    ///
    /// # Errors
    /// [`VmemError::NotMapped`] at the first unmapped page; bytes before it
    /// have been written.
    pub fn write(&self, mut va: VirtualAddress, mut data: &[u8]) -> Result<(), VmemError> {
        while !data.is_empty() {
            let dst = self.page_bytes(va)?;
            let n = dst.len().min(data.len());
            dst[..n].copy_from_slice(&data[..n]);
            data = &data[n..];
            va += n as u64;
        }
        Ok(())
    }

    /// Zero `len` bytes of this space starting at `va`.
    ///
    /// # Errors
    /// [`VmemError::NotMapped`] at the first unmapped page.
    pub fn zero(&self, mut va: VirtualAddress, mut len: usize) -> Result<(), VmemError> {
        while len > 0 {
            let dst = self.page_bytes(va)?;
            let n = dst.len().min(len);
            dst[..n].fill(0);
            len -= n;
            va += n as u64;
        }
        Ok(())
    }

    /// Fill `buf` from this space starting at `va`.
    ///
    /// # Errors
    /// [`VmemError::NotMapped`] at the first unmapped page.
    pub fn read(&self, mut va: VirtualAddress, buf: &mut [u8]) -> Result<(), VmemError> {
        let mut done = 0;
        while done < buf.len() {
            let src = self.page_bytes(va)?;
            let n = src.len().min(buf.len() - done);
            buf[done..done + n].copy_from_slice(&src[..n]);
            done += n;
            va += n as u64;
        }
        Ok(())
    }

    /// Release every entry of the root with index below `bound`, recursively.
    ///
    /// Leaves and intermediate tables each lose the reference their parent
    /// entry held; the entries are cleared. Slots at or above `bound` (the
    /// shared kernel half) are never touched.
    ///
    /// # Errors
    /// [`VmemError::Inactive`] if this space is not loaded.
    pub fn destroy_subtree<A: FrameAlloc, U: Mmu>(
        &self,
        frames: &mut A,
        mmu: &U,
        bound: usize,
    ) -> Result<(), VmemError> {
        self.ensure_active(mmu)?;
        let root = self.table(self.root);
        for index in 0..bound.min(ENTRIES_PER_TABLE) {
            self.release_entry(frames, root.get_mut(index), TableLevel::Pml4);
        }
        Ok(())
    }

    /// Release `entry`, which lives in a table at `level`.
    fn release_entry<A: FrameAlloc>(
        &self,
        frames: &mut A,
        entry: &mut PageTableEntry,
        level: TableLevel,
    ) {
        let Entry::Present { frame, .. } = entry.kind() else {
            return;
        };
        if let Some(child_level) = level.next() {
            let child = self.table(frame);
            for index in 0..ENTRIES_PER_TABLE {
                self.release_entry(frames, child.get_mut(index), child_level);
            }
        }
        frames.decref(frame);
        entry.clear();
    }

    /// Visit every present leaf mapped through root slots below `bound`.
    ///
    /// # Errors
    /// Stops at and returns the first error produced by `f`.
    pub fn try_for_each_leaf<E, F>(&self, bound: usize, mut f: F) -> Result<(), E>
    where
        F: FnMut(VirtualAddress, &mut PageTableEntry) -> Result<(), E>,
    {
        self.visit(self.root, TableLevel::Pml4, 0, bound.min(ENTRIES_PER_TABLE), &mut f)
    }

    fn visit<E, F>(
        &self,
        frame: PhysicalPage,
        level: TableLevel,
        base: u64,
        limit: usize,
        f: &mut F,
    ) -> Result<(), E>
    where
        F: FnMut(VirtualAddress, &mut PageTableEntry) -> Result<(), E>,
    {
        let table = self.table(frame);
        for index in 0..limit {
            let entry = table.get_mut(index);
            let Entry::Present { frame: child, .. } = entry.kind() else {
                continue;
            };
            let va = base | ((index as u64) << level.shift());
            match level.next() {
                Some(next) => self.visit(child, next, va, ENTRIES_PER_TABLE, f)?,
                None => f(VirtualAddress::new(va), entry)?,
            }
        }
        Ok(())
    }

    /// Turn every writable or copy-on-write leaf below `bound` into a
    /// read-only COW leaf.
    ///
    /// # Errors
    /// [`VmemError::Inactive`] if this space is not loaded.
    pub fn mark_cow<U: Mmu>(&self, mmu: &mut U, bound: usize) -> Result<(), VmemError> {
        self.ensure_active(mmu)?;
        self.try_for_each_leaf(bound, |va, entry| {
            let flags = entry.bits().flags();
            if flags.writable() || flags.copy_on_write() {
                entry.set_flags(flags.into_cow());
                mmu.invalidate(va);
            }
            Ok(())
        })
    }

    /// Map every leaf of this space below `bound` into `other` at the same
    /// address. Each shared frame gains a reference.
    ///
    /// Writable and COW leaves arrive in `other` as read-only COW leaves;
    /// read-only leaves keep their flags. `other` must be the active space;
    /// `self` is only read, so a failure leaves it as it was.
    ///
    /// # Errors
    /// Propagates [`insert`](Self::insert) failures on `other`.
    pub fn share_leaves_into<A: FrameAlloc, U: Mmu>(
        &self,
        other: &Self,
        frames: &mut A,
        mmu: &mut U,
        bound: usize,
    ) -> Result<(), VmemError> {
        other.ensure_active(mmu)?;
        self.try_for_each_leaf(bound, |va, entry| match entry.kind() {
            Entry::Present { frame, flags } => {
                let flags = if flags.writable() || flags.copy_on_write() {
                    flags.into_cow()
                } else {
                    flags
                };
                other.insert(frames, mmu, frame, va, flags)
            }
            Entry::Absent => Ok(()),
        })
    }

    /// Give the task a private copy of the copy-on-write page at `va`.
    ///
    /// A fresh frame is mapped at the [`USER_TEMP`] scratch address, filled
    /// with the shared page's bytes and then installed at the faulting page
    /// as a private writable leaf. The shared frame loses this space's
    /// reference.
    ///
    /// # Errors
    /// - [`VmemError::Inactive`] if this space is not loaded.
    /// - [`VmemError::NotMapped`] / [`VmemError::NotCopyOnWrite`] if the page
    ///   at `va` cannot be repaired.
    /// - [`VmemError::ScratchInUse`] if something is mapped at
    ///   [`USER_TEMP`]; that mapping is left alone.
    /// - [`VmemError::OutOfMemory`] if no frame is left for the copy.
    pub fn resolve_cow<A: FrameAlloc, U: Mmu>(
        &self,
        frames: &mut A,
        mmu: &mut U,
        va: VirtualAddress,
    ) -> Result<(), VmemError> {
        self.ensure_active(mmu)?;
        let page = va.page_base();
        let (shared, flags) = self.lookup_page(page).ok_or(VmemError::NotMapped(va))?;
        if !flags.copy_on_write() {
            return Err(VmemError::NotCopyOnWrite(va));
        }

        let scratch = VirtualAddress::new(USER_TEMP);
        if self.lookup_page(scratch).is_some() {
            return Err(VmemError::ScratchInUse(scratch));
        }
        let fresh = self.map_new_page(frames, mmu, scratch, PageEntryBits::user_rw())?;

        if let (Some(src), Some(dst)) = (self.translate(page), self.translate(scratch)) {
            self.copy_page(src, dst);
        }

        let installed = self.insert(frames, mmu, fresh, page, flags.into_private());
        self.remove(frames, mmu, scratch)?;
        trace!("COW {page}: {shared} -> {fresh}");
        installed
    }

    fn copy_page(&self, src: PhysicalAddress, dst: PhysicalAddress) {
        let src: &[u8; PAGE_BYTES] = unsafe { self.mapper.phys_to_mut(src) };
        let dst: &mut [u8; PAGE_BYTES] = unsafe { self.mapper.phys_to_mut(dst) };
        dst.copy_from_slice(src);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::{SimFrames, SimMmu, SimPhys};

    const FRAMES: usize = 64;

    struct Rig {
        frames: SimFrames,
        mmu: SimMmu,
        kernel_root: PhysicalPage,
    }

    impl Rig {
        fn new() -> Self {
            let mut frames = SimFrames::new(FRAMES);
            let kernel_root = frames.alloc_frame().unwrap();
            frames.incref(kernel_root);
            Self {
                frames,
                mmu: SimMmu::new(kernel_root),
                kernel_root,
            }
        }

        /// A fresh space, loaded in the MMU.
        fn space<'p>(&mut self, phys: &'p SimPhys) -> AddressSpace<'p, SimPhys> {
            let space = self.inactive_space(phys);
            unsafe { self.mmu.load_root(space.root()) };
            space
        }

        fn inactive_space<'p>(&mut self, phys: &'p SimPhys) -> AddressSpace<'p, SimPhys> {
            AddressSpace::create(phys, &mut self.frames, self.kernel_root).unwrap()
        }

        fn frame(&mut self) -> PhysicalPage {
            self.frames.alloc_frame().unwrap()
        }

        fn map(&mut self, space: &AddressSpace<'_, SimPhys>, va: u64) -> PhysicalPage {
            let frame = self.frame();
            space
                .insert(
                    &mut self.frames,
                    &mut self.mmu,
                    frame,
                    VirtualAddress::new(va),
                    PageEntryBits::user_rw(),
                )
                .unwrap();
            frame
        }

        fn drain(&mut self) {
            while self.frames.alloc_frame().is_some() {}
        }
    }

    #[test]
    fn device_pages_are_not_reference_counted() {
        let phys = SimPhys::new(FRAMES);
        let mut rig = Rig::new();
        let space = rig.space(&phys);
        let free = rig.frames.free_count();
        let apic = PhysicalPage::containing(PhysicalAddress::new(0xFEE0_0000));
        let va = VirtualAddress::new(0x40_0000);

        space.map_device(&mut rig.frames, &mut rig.mmu, apic, va).unwrap();

        let (frame, flags) = space.lookup_page(va).unwrap();
        assert_eq!(frame, apic);
        assert!(flags.cache_disabled() && flags.write_through() && !flags.user_access());
        // Only the three intermediate tables came from the allocator.
        assert_eq!(rig.frames.free_count(), free - 3);
    }

    #[test]
    fn lookup_without_create_does_not_allocate() {
        let phys = SimPhys::new(FRAMES);
        let mut rig = Rig::new();
        let space = rig.inactive_space(&phys);
        let free = rig.frames.free_count();
        assert!(
            space
                .lookup(&mut rig.frames, VirtualAddress::new(0x40_0000), false)
                .is_none()
        );
        assert_eq!(rig.frames.free_count(), free);
    }

    #[test]
    fn lookup_with_create_builds_three_levels() {
        let phys = SimPhys::new(FRAMES);
        let mut rig = Rig::new();
        let space = rig.inactive_space(&phys);
        let free = rig.frames.free_count();
        let slot = space
            .lookup(&mut rig.frames, VirtualAddress::new(0x40_0000), true)
            .unwrap();
        assert!(!slot.is_present());
        assert_eq!(rig.frames.free_count(), free - 3);
        assert!(space.walk(VirtualAddress::new(0x40_0000)).is_some());
    }

    #[test]
    fn create_shares_the_kernel_half() {
        let phys = SimPhys::new(FRAMES);
        let mut rig = Rig::new();
        let dir = rig.frame();
        AddressSpace::from_root(&phys, rig.kernel_root)
            .table(rig.kernel_root)
            .get_mut(511)
            .set(dir, PageEntryBits::kernel_rw());

        let space = rig.space(&phys);
        let root = space.table(space.root());
        assert_eq!(root.get(511).frame(), Some(dir));
        assert!(!root.get(0).is_present());
        assert_eq!(rig.frames.refcount(space.root()), 1);
    }

    #[test]
    fn insert_and_translate() {
        let phys = SimPhys::new(FRAMES);
        let mut rig = Rig::new();
        let space = rig.space(&phys);
        let frame = rig.map(&space, 0x80_1000);

        assert_eq!(rig.frames.refcount(frame), 1);
        assert_eq!(
            space.translate(VirtualAddress::new(0x80_1234)),
            Some(frame.base() + 0x234)
        );
    }

    #[test]
    fn reinserting_the_same_frame_only_changes_permissions() {
        let phys = SimPhys::new(FRAMES);
        let mut rig = Rig::new();
        let space = rig.space(&phys);
        let va = VirtualAddress::new(0x1000);
        let frame = rig.map(&space, va.as_u64());

        let readonly = PageEntryBits::user_rw().with_writable(false);
        space
            .insert(&mut rig.frames, &mut rig.mmu, frame, va, readonly)
            .unwrap();

        assert_eq!(rig.frames.refcount(frame), 1);
        let (mapped, flags) = space.lookup_page(va).unwrap();
        assert_eq!(mapped, frame);
        assert!(!flags.writable());
        assert!(rig.mmu.invalidated().contains(&va));
    }

    #[test]
    fn inserting_over_a_mapping_releases_the_old_frame() {
        let phys = SimPhys::new(FRAMES);
        let mut rig = Rig::new();
        let space = rig.space(&phys);
        let first = rig.map(&space, 0x2000);
        let second = rig.map(&space, 0x2000);

        assert_eq!(rig.frames.refcount(first), 0);
        assert!(rig.frames.is_free(first));
        assert_eq!(rig.frames.refcount(second), 1);
        assert_eq!(
            space.lookup_page(VirtualAddress::new(0x2000)).map(|(f, _)| f),
            Some(second)
        );
    }

    #[test]
    fn remove_unmapped_is_a_no_op() {
        let phys = SimPhys::new(FRAMES);
        let mut rig = Rig::new();
        let space = rig.space(&phys);
        let free = rig.frames.free_count();
        space
            .remove(&mut rig.frames, &mut rig.mmu, VirtualAddress::new(0x5000))
            .unwrap();
        assert_eq!(rig.frames.free_count(), free);
        assert!(rig.mmu.invalidated().is_empty());
    }

    #[test]
    fn remove_frees_and_invalidates() {
        let phys = SimPhys::new(FRAMES);
        let mut rig = Rig::new();
        let space = rig.space(&phys);
        let va = VirtualAddress::new(0x3000);
        let frame = rig.map(&space, va.as_u64());

        space.remove(&mut rig.frames, &mut rig.mmu, va).unwrap();

        assert!(rig.frames.is_free(frame));
        assert!(space.lookup_page(va).is_none());
        assert_eq!(rig.mmu.invalidated().last(), Some(&va));
    }

    #[test]
    fn edits_require_an_active_space() {
        let phys = SimPhys::new(FRAMES);
        let mut rig = Rig::new();
        let space = rig.inactive_space(&phys);
        let frame = rig.frame();

        let err = space
            .insert(
                &mut rig.frames,
                &mut rig.mmu,
                frame,
                VirtualAddress::new(0x1000),
                PageEntryBits::user_rw(),
            )
            .unwrap_err();
        assert_eq!(err, VmemError::Inactive(space.root()));
        assert_eq!(rig.frames.refcount(frame), 0);
    }

    #[test]
    fn insert_reports_exhaustion() {
        let phys = SimPhys::new(FRAMES);
        let mut rig = Rig::new();
        let space = rig.space(&phys);
        let frame = rig.frame();
        rig.drain();

        let err = space
            .insert(
                &mut rig.frames,
                &mut rig.mmu,
                frame,
                VirtualAddress::new(0x1000),
                PageEntryBits::user_rw(),
            )
            .unwrap_err();
        assert_eq!(err, VmemError::OutOfMemory);
        assert_eq!(rig.frames.refcount(frame), 0);
    }

    #[test]
    fn destroy_subtree_returns_every_user_frame() {
        let phys = SimPhys::new(FRAMES);
        let mut rig = Rig::new();
        let before = rig.frames.free_count();
        let space = rig.space(&phys);

        for va in [0x1000_u64, 0x2000, 0x40_0000, 0x8000_0000, USER_TEMP] {
            rig.map(&space, va);
        }
        space
            .destroy_subtree(&mut rig.frames, &rig.mmu, USER_PML4_BOUND)
            .unwrap();

        // Only the root itself is still held.
        assert_eq!(rig.frames.free_count(), before - 1);
        assert_eq!(rig.frames.refcount(space.root()), 1);
        let root = space.table(space.root());
        assert!(root.iter().all(|(_, e)| !e.is_present()));
    }

    #[test]
    fn destroy_subtree_leaves_shared_frames_with_other_owners() {
        let phys = SimPhys::new(FRAMES);
        let mut rig = Rig::new();
        let space = rig.space(&phys);
        let frame = rig.map(&space, 0x1000);
        rig.frames.incref(frame);

        space
            .destroy_subtree(&mut rig.frames, &rig.mmu, USER_PML4_BOUND)
            .unwrap();
        assert_eq!(rig.frames.refcount(frame), 1);
        assert!(!rig.frames.is_free(frame));
    }

    #[test]
    fn leaves_are_visited_with_their_addresses() {
        let phys = SimPhys::new(FRAMES);
        let mut rig = Rig::new();
        let space = rig.space(&phys);
        let addrs = [0x1000_u64, 0x20_0000, 0x80_0000_0000];
        for va in addrs {
            rig.map(&space, va);
        }

        let mut seen = Vec::new();
        space
            .try_for_each_leaf::<(), _>(USER_PML4_BOUND, |va, _| {
                seen.push(va.as_u64());
                Ok(())
            })
            .unwrap();
        assert_eq!(seen, addrs);
    }

    #[test]
    fn mark_cow_skips_read_only_leaves() {
        let phys = SimPhys::new(FRAMES);
        let mut rig = Rig::new();
        let space = rig.space(&phys);
        let rw = VirtualAddress::new(0x1000);
        let ro = VirtualAddress::new(0x2000);
        rig.map(&space, rw.as_u64());
        let frame = rig.frame();
        space
            .insert(
                &mut rig.frames,
                &mut rig.mmu,
                frame,
                ro,
                PageEntryBits::user_rw().with_writable(false),
            )
            .unwrap();

        space.mark_cow(&mut rig.mmu, USER_PML4_BOUND).unwrap();

        let (_, rw_flags) = space.lookup_page(rw).unwrap();
        let (_, ro_flags) = space.lookup_page(ro).unwrap();
        assert!(rw_flags.copy_on_write() && !rw_flags.writable());
        assert!(!ro_flags.copy_on_write() && !ro_flags.writable());
    }

    #[test]
    fn cow_fault_gives_the_writer_a_private_copy() {
        let phys = SimPhys::new(FRAMES);
        let mut rig = Rig::new();
        let parent = rig.space(&phys);
        let va = VirtualAddress::new(0x40_0000);
        let shared = rig.map(&parent, va.as_u64());
        phys.write(shared.base(), b"parent data");

        parent.mark_cow(&mut rig.mmu, USER_PML4_BOUND).unwrap();
        let child = rig.space(&phys);
        parent
            .share_leaves_into(&child, &mut rig.frames, &mut rig.mmu, USER_PML4_BOUND)
            .unwrap();
        assert_eq!(rig.frames.refcount(shared), 2);

        child
            .resolve_cow(&mut rig.frames, &mut rig.mmu, va + 0x10)
            .unwrap();
        let (copy, flags) = child.lookup_page(va).unwrap();
        assert_ne!(copy, shared);
        assert!(flags.writable() && !flags.copy_on_write());
        assert_eq!(rig.frames.refcount(shared), 1);
        assert_eq!(rig.frames.refcount(copy), 1);
        assert!(child.lookup_page(VirtualAddress::new(USER_TEMP)).is_none());

        phys.write(copy.base(), b"CHILD!");
        assert_eq!(phys.read(shared.base(), 11), b"parent data");
        assert_eq!(phys.read(copy.base(), 11), b"CHILD! data");
    }

    #[test]
    fn writes_and_reads_cross_page_boundaries() {
        let phys = SimPhys::new(FRAMES);
        let mut rig = Rig::new();
        let space = rig.inactive_space(&phys);
        unsafe { rig.mmu.load_root(space.root()) };
        let low = rig.map(&space, 0x7000);
        let high = rig.map(&space, 0x8000);
        unsafe { rig.mmu.load_root(rig.kernel_root) };

        let va = VirtualAddress::new(0x7ffc);
        space.write(va, b"straddle").unwrap();
        assert_eq!(phys.read(low.base() + 0xffc, 4), b"stra");
        assert_eq!(phys.read(high.base(), 4), b"ddle");

        let mut buf = [0_u8; 8];
        space.read(va, &mut buf).unwrap();
        assert_eq!(&buf, b"straddle");

        space.zero(va + 2, 4).unwrap();
        space.read(va, &mut buf).unwrap();
        assert_eq!(&buf, b"st\0\0\0\0le");
    }

    #[test]
    fn copies_stop_at_unmapped_pages() {
        let phys = SimPhys::new(FRAMES);
        let mut rig = Rig::new();
        let space = rig.space(&phys);
        let frame = rig.map(&space, 0x1000);

        let err = space.write(VirtualAddress::new(0x1ffe), b"abcd").unwrap_err();
        assert_eq!(err, VmemError::NotMapped(VirtualAddress::new(0x2000)));
        assert_eq!(phys.read(frame.base() + 0xffe, 2), b"ab");

        let mut buf = [0_u8; 1];
        assert!(space.read(VirtualAddress::new(0x5000), &mut buf).is_err());
    }

    #[test]
    fn map_new_page_returns_the_frame_on_failure() {
        let phys = SimPhys::new(FRAMES);
        let mut rig = Rig::new();
        let space = rig.inactive_space(&phys);
        let free = rig.frames.free_count();

        let err = space
            .map_new_page(
                &mut rig.frames,
                &mut rig.mmu,
                VirtualAddress::new(0x1000),
                PageEntryBits::user_rw(),
            )
            .unwrap_err();
        assert_eq!(err, VmemError::Inactive(space.root()));
        assert_eq!(rig.frames.free_count(), free);
    }

    #[test]
    fn cow_requires_a_cow_leaf() {
        let phys = SimPhys::new(FRAMES);
        let mut rig = Rig::new();
        let space = rig.space(&phys);
        let va = VirtualAddress::new(0x1000);
        assert_eq!(
            space.resolve_cow(&mut rig.frames, &mut rig.mmu, va),
            Err(VmemError::NotMapped(va))
        );

        rig.map(&space, va.as_u64());
        assert_eq!(
            space.resolve_cow(&mut rig.frames, &mut rig.mmu, va),
            Err(VmemError::NotCopyOnWrite(va))
        );
    }

    #[test]
    fn cow_out_of_memory_keeps_the_shared_mapping() {
        let phys = SimPhys::new(FRAMES);
        let mut rig = Rig::new();
        let space = rig.space(&phys);
        let va = VirtualAddress::new(0x1000);
        let frame = rig.map(&space, va.as_u64());
        space.mark_cow(&mut rig.mmu, USER_PML4_BOUND).unwrap();
        rig.drain();

        assert_eq!(
            space.resolve_cow(&mut rig.frames, &mut rig.mmu, va),
            Err(VmemError::OutOfMemory)
        );
        assert_eq!(space.lookup_page(va).map(|(f, _)| f), Some(frame));
    }

    #[test]
    fn shared_leaves_arrive_copy_on_write() {
        let phys = SimPhys::new(FRAMES);
        let mut rig = Rig::new();
        let parent = rig.space(&phys);
        let rw = VirtualAddress::new(0x1000);
        let ro = VirtualAddress::new(0x2000);
        let rw_frame = rig.map(&parent, rw.as_u64());
        let ro_frame = rig.frame();
        parent
            .insert(
                &mut rig.frames,
                &mut rig.mmu,
                ro_frame,
                ro,
                PageEntryBits::user_rw().with_writable(false),
            )
            .unwrap();

        let child = rig.space(&phys);
        parent
            .share_leaves_into(&child, &mut rig.frames, &mut rig.mmu, USER_PML4_BOUND)
            .unwrap();

        let (frame, flags) = parent.lookup_page(rw).unwrap();
        assert_eq!(frame, rw_frame);
        assert!(flags.writable() && !flags.copy_on_write());
        let (frame, flags) = child.lookup_page(rw).unwrap();
        assert_eq!(frame, rw_frame);
        assert!(flags.copy_on_write() && !flags.writable());
        let (frame, flags) = child.lookup_page(ro).unwrap();
        assert_eq!(frame, ro_frame);
        assert!(!flags.copy_on_write() && !flags.writable());
    }

    #[test]
    fn cow_leaves_an_occupied_scratch_page_alone() {
        let phys = SimPhys::new(FRAMES);
        let mut rig = Rig::new();
        let space = rig.space(&phys);
        let va = VirtualAddress::new(0x1000);
        let scratch = VirtualAddress::new(USER_TEMP);
        let shared = rig.map(&space, va.as_u64());
        let occupant = rig.map(&space, USER_TEMP);
        phys.write(occupant.base(), b"keep me");
        space.mark_cow(&mut rig.mmu, USER_PML4_BOUND).unwrap();
        let free = rig.frames.free_count();

        assert_eq!(
            space.resolve_cow(&mut rig.frames, &mut rig.mmu, va),
            Err(VmemError::ScratchInUse(scratch))
        );
        assert_eq!(space.lookup_page(va).map(|(f, _)| f), Some(shared));
        assert_eq!(space.lookup_page(scratch).map(|(f, _)| f), Some(occupant));
        assert_eq!(rig.frames.refcount(occupant), 1);
        assert_eq!(rig.frames.free_count(), free);
        assert_eq!(phys.read(occupant.base(), 7), b"keep me");
    }
}
