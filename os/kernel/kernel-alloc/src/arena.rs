use kernel_memory_addresses::PhysicalPage;
use kernel_vmem::FrameAlloc;

/// Free-list terminator.
const NONE: u32 = u32::MAX;

/// Bookkeeping for one physical frame.
///
/// The record is exactly as large as the loader's packed record so the boot
/// array can be converted in place.
#[repr(C)]
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Page {
    refs: u32,
    /// Index of the next free record, or [`NONE`].
    next: u32,
    /// Non-zero while the record is linked into the free list.
    listed: u32,
}

impl Page {
    /// A record that is neither referenced nor listed.
    pub const EMPTY: Self = Self {
        refs: 0,
        next: NONE,
        listed: 0,
    };

    pub(crate) const fn from_boot(refs: u32, on_free_list: bool) -> Self {
        Self {
            refs,
            next: NONE,
            listed: if on_free_list { 1 } else { 0 },
        }
    }

    #[inline]
    #[must_use]
    pub const fn refs(&self) -> u32 {
        self.refs
    }

    #[inline]
    #[must_use]
    pub const fn is_listed(&self) -> bool {
        self.listed != 0
    }
}

/// Index of a record in the arena.
///
/// Only the arena hands these out; [`PageArena::handle`] turns a frame back
/// into one after a bounds check.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct PageHandle(u32);

impl PageHandle {
    #[inline]
    #[must_use]
    pub const fn index(self) -> usize {
        self.0 as usize
    }

    /// Physical frame described by this record.
    #[inline]
    #[must_use]
    pub const fn frame(self) -> PhysicalPage {
        PhysicalPage::from_index(self.index())
    }
}

/// Reference-counted frame allocator over a borrowed record array.
pub struct PageArena<'a> {
    pages: &'a mut [Page],
    free_head: u32,
    free: usize,
}

impl<'a> PageArena<'a> {
    /// An arena over `pages` where every frame is free.
    ///
    /// # Panics
    /// If `pages` has more records than a handle can index.
    pub fn new(pages: &'a mut [Page]) -> Self {
        pages.fill(Page::from_boot(0, true));
        Self::rebuild(pages)
    }

    /// Link every listed record into a fresh free list.
    ///
    /// Records are pushed from low to high index, leaving the highest listed
    /// frame at the head.
    pub(crate) fn rebuild(pages: &'a mut [Page]) -> Self {
        assert!(u32::try_from(pages.len()).is_ok_and(|n| n < NONE));
        let mut arena = Self {
            pages,
            free_head: NONE,
            free: 0,
        };
        for index in 0..arena.pages.len() {
            if arena.pages[index].is_listed() {
                arena.push_free(index);
            }
        }
        arena
    }

    #[allow(clippy::cast_possible_truncation)]
    fn push_free(&mut self, index: usize) {
        let page = &mut self.pages[index];
        page.next = self.free_head;
        page.listed = 1;
        self.free_head = index as u32;
        self.free += 1;
    }

    /// Number of records (and frames) managed.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.pages.len()
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }

    #[must_use]
    pub const fn free_count(&self) -> usize {
        self.free
    }

    #[must_use]
    pub const fn used_count(&self) -> usize {
        self.pages.len() - self.free
    }

    /// Record for `frame`, if the frame is managed here.
    #[must_use]
    pub fn handle(&self, frame: PhysicalPage) -> Option<PageHandle> {
        let index = frame.index();
        if index < self.pages.len() {
            u32::try_from(index).ok().map(PageHandle)
        } else {
            None
        }
    }

    #[must_use]
    pub fn page(&self, page: PageHandle) -> &Page {
        &self.pages[page.index()]
    }

    /// Pop the head of the free list. The record comes back with no
    /// references; its frame contents are left as they were.
    pub fn alloc(&mut self) -> Option<PageHandle> {
        if self.free_head == NONE {
            return None;
        }
        let handle = PageHandle(self.free_head);
        let page = &mut self.pages[handle.index()];
        self.free_head = page.next;
        *page = Page::EMPTY;
        self.free -= 1;
        Some(handle)
    }

    /// Put an unreferenced record back at the head of the free list.
    ///
    /// # Panics
    /// If the page is still referenced or already free.
    pub fn free(&mut self, page: PageHandle) {
        let record = self.pages[page.index()];
        assert!(
            record.refs == 0,
            "freeing page {} with {} references",
            page.frame(),
            record.refs
        );
        assert!(!record.is_listed(), "double free of page {}", page.frame());
        self.push_free(page.index());
    }

    pub fn incref(&mut self, page: PageHandle) {
        self.pages[page.index()].refs += 1;
    }

    /// Drop one reference, freeing the page when none remain.
    ///
    /// A page already on the free list (possible only for frames the boot
    /// rebuild listed while still referenced) is not linked a second time.
    ///
    /// # Panics
    /// If the page has no references.
    pub fn decref(&mut self, page: PageHandle) {
        let record = &mut self.pages[page.index()];
        assert!(record.refs > 0, "decref of page {} at zero", page.frame());
        record.refs -= 1;
        if record.refs == 0 && !record.is_listed() {
            self.push_free(page.index());
        }
    }

    #[must_use]
    pub fn refcount(&self, page: PageHandle) -> u32 {
        self.pages[page.index()].refs
    }

    fn expect_handle(&self, frame: PhysicalPage) -> PageHandle {
        match self.handle(frame) {
            Some(handle) => handle,
            None => panic!("frame {frame} is outside the page arena"),
        }
    }
}

impl FrameAlloc for PageArena<'_> {
    fn alloc_frame(&mut self) -> Option<PhysicalPage> {
        self.alloc().map(PageHandle::frame)
    }

    fn incref(&mut self, frame: PhysicalPage) {
        let page = self.expect_handle(frame);
        Self::incref(self, page);
    }

    fn decref(&mut self, frame: PhysicalPage) {
        let page = self.expect_handle(frame);
        Self::decref(self, page);
    }

    fn refcount(&self, frame: PhysicalPage) -> u32 {
        self.handle(frame).map_or(0, |page| Self::refcount(self, page))
    }
}
