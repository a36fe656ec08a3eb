//! # Task Pool
//!
//! A fixed array of [`Task`] slots with an intrusive free list. Slots are
//! recycled; ids are not.

use crate::context::{RFLAGS_IF, TaskContext};
use crate::elf::{ElfImage, Segment};
use crate::memory::MemoryContext;
use crate::task::{Owner, Task, TaskHandle, TaskId, TaskInfo, TaskName, TaskState};
use crate::TaskError;
use kernel_info::gdt::{GD_KD, GD_KT, USER_CS, USER_DS};
use kernel_info::memory::USER_STACK_TOP;
use kernel_memory_addresses::{PAGE_SIZE, PhysicalPage, VirtualAddress, align_down, align_up};
use kernel_vmem::address_space::USER_PML4_BOUND;
use kernel_vmem::{AddressSpace, FrameAlloc, Mmu, PageEntryBits, PhysMapper, VmemError};
use log::{debug, info, warn};

#[allow(clippy::cast_possible_truncation)]
const PAGE_BYTES: usize = PAGE_SIZE as usize;

/// Where a kernel thread starts and where it goes when its entry returns.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct ThreadStart {
    pub entry: u64,
    /// Passed in `rdi`.
    pub arg: u64,
    /// Return address left on the thread's stack.
    pub on_return: u64,
}

/// What the single active processor is running.
#[derive(Debug)]
pub(crate) struct Cpu {
    pub(crate) current: Option<TaskHandle>,
    /// Context of the code that booted the kernel; it is never scheduled.
    pub(crate) bootstrap: TaskContext,
}

pub struct TaskPool<const N: usize> {
    pub(crate) tasks: [Task; N],
    free_head: Option<usize>,
    last_id: u64,
    pub(crate) cpu: Cpu,
}

impl<const N: usize> Default for TaskPool<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> TaskPool<N> {
    /// A pool with every slot free, lowest slot first in line.
    #[must_use]
    pub const fn new() -> Self {
        let mut tasks = [Task::FREE; N];
        let mut i = 0;
        while i + 1 < N {
            tasks[i].next_free = Some(i + 1);
            i += 1;
        }
        Self {
            tasks,
            free_head: if N > 0 { Some(0) } else { None },
            last_id: 0,
            cpu: Cpu {
                current: None,
                bootstrap: TaskContext::EMPTY,
            },
        }
    }

    #[inline]
    #[must_use]
    pub fn get(&self, task: TaskHandle) -> &Task {
        &self.tasks[task.0]
    }

    #[inline]
    pub fn get_mut(&mut self, task: TaskHandle) -> &mut Task {
        &mut self.tasks[task.0]
    }

    /// The task bound to the processor, if any.
    #[inline]
    #[must_use]
    pub const fn current(&self) -> Option<TaskHandle> {
        self.cpu.current
    }

    #[inline]
    #[must_use]
    pub const fn bootstrap_context(&self) -> &TaskContext {
        &self.cpu.bootstrap
    }

    /// The live task with `id`.
    #[must_use]
    pub fn find(&self, id: TaskId) -> Option<TaskHandle> {
        self.tasks
            .iter()
            .position(|t| t.state != TaskState::Free && t.id == id)
            .map(TaskHandle)
    }

    /// Number of slots in use.
    #[must_use]
    pub fn live_count(&self) -> usize {
        self.tasks.iter().filter(|t| t.state != TaskState::Free).count()
    }

    /// Store a trap frame in whatever was running.
    ///
    /// The interrupted task becomes [`TaskState::Ready`] and is returned;
    /// without one the frame belongs to the bootstrap context.
    pub fn save_context(&mut self, frame: &TaskContext) -> Option<TaskHandle> {
        match self.cpu.current {
            Some(task) => {
                let t = &mut self.tasks[task.0];
                t.context = *frame;
                t.state = TaskState::Ready;
                Some(task)
            }
            None => {
                self.cpu.bootstrap = *frame;
                None
            }
        }
    }

    /// Take a free slot and give it a fresh address space.
    ///
    /// The task starts in [`TaskState::DontRun`] with an empty context.
    ///
    /// # Errors
    /// - [`TaskError::PoolExhausted`] if every slot is taken.
    /// - [`TaskError::Memory`] if no frame is left for the root table.
    pub fn new_task<M: PhysMapper, A: FrameAlloc, U: Mmu>(
        &mut self,
        mem: &mut MemoryContext<'_, M, A, U>,
        name: &str,
    ) -> Result<TaskHandle, TaskError> {
        let Some(slot) = self.free_head else {
            warn!("Can't create task `{name}': no more free tasks");
            return Err(TaskError::PoolExhausted);
        };
        let space = AddressSpace::create(mem.mapper, &mut mem.frames, mem.kernel_root)
            .inspect_err(|_| warn!("Can't create task `{name}': no memory for new pml4"))?;

        self.free_head = self.tasks[slot].next_free;
        self.last_id += 1;
        self.tasks[slot] = Task {
            id: TaskId::new(self.last_id),
            name: TaskName::new(name),
            state: TaskState::DontRun,
            context: TaskContext::EMPTY,
            owner: Owner::Kernel,
            root: Some(space.root()),
            next_free: None,
        };
        debug!("task [{}] `{name}' allocated", self.last_id);
        Ok(TaskHandle(slot))
    }

    pub(crate) fn root(&self, task: TaskHandle) -> Result<PhysicalPage, TaskError> {
        let t = &self.tasks[task.0];
        t.root.ok_or(TaskError::WrongState(t.state))
    }

    /// Tear a task down and return its slot to the pool.
    ///
    /// Every user-range mapping and table of the task is released, then its
    /// root. The edit runs inside the task's own address space; afterwards
    /// the previous root is restored, or the kernel root if the task's own
    /// was active. Destroying a free slot does nothing. The bootstrap
    /// context has no slot and cannot be named here.
    ///
    /// # Panics
    /// If the task's root is the canonical kernel root.
    pub fn destroy<M: PhysMapper, A: FrameAlloc, U: Mmu>(
        &mut self,
        mem: &mut MemoryContext<'_, M, A, U>,
        task: TaskHandle,
    ) {
        let slot = task.0;
        let Some(root) = self.tasks[slot].root else {
            return;
        };
        let id = self.tasks[slot].id;
        assert!(root != mem.kernel_root, "task [{id}] owns the kernel pml4");
        if self.cpu.current == Some(task) {
            self.cpu.current = None;
        }

        let previous = mem.mmu.active_root();
        if previous != root {
            // SAFETY: Task roots share the kernel half.
            unsafe { mem.mmu.load_root(root) };
        }

        let space = mem.space(root);
        if let Err(e) = space.destroy_subtree(&mut mem.frames, &mem.mmu, USER_PML4_BOUND) {
            panic!("tearing down task [{id}]: {e}");
        }

        // The root frame may be reused once released, so leave it first.
        let back = if previous == root { mem.kernel_root } else { previous };
        // SAFETY: `back` is either the root active on entry or the kernel root.
        unsafe { mem.mmu.load_root(back) };
        mem.frames.decref(root);

        let t = &mut self.tasks[slot];
        t.root = None;
        t.state = TaskState::Free;
        t.next_free = self.free_head;
        self.free_head = Some(slot);
        info!("task [{id}] has been destroyed");
    }

    /// Map the `PT_LOAD` segments of `image` and point the task at its entry.
    ///
    /// Each segment gets user-writable pages over `[va, va + memsz)`; the
    /// file bytes are copied and the rest is zeroed. On failure the task is
    /// destroyed.
    ///
    /// # Errors
    /// [`TaskError::Elf`] for a malformed image, [`TaskError::Memory`] if the
    /// pages could not be mapped, [`TaskError::WrongState`] for a free slot.
    pub fn load_elf<M: PhysMapper, A: FrameAlloc, U: Mmu>(
        &mut self,
        mem: &mut MemoryContext<'_, M, A, U>,
        task: TaskHandle,
        image: &[u8],
    ) -> Result<(), TaskError> {
        let result = self.load_image(mem, task, image);
        if let Err(e) = &result {
            warn!("Can't load task `{}': {e}", self.tasks[task.0].name);
            self.destroy(mem, task);
        }
        result
    }

    fn load_image<M: PhysMapper, A: FrameAlloc, U: Mmu>(
        &mut self,
        mem: &mut MemoryContext<'_, M, A, U>,
        task: TaskHandle,
        image: &[u8],
    ) -> Result<(), TaskError> {
        let root = self.root(task)?;
        let elf = ElfImage::parse(image)?;
        mem.within(root, |space, frames, mmu| {
            for segment in elf.segments() {
                load_segment(space, frames, mmu, &segment?)?;
            }
            Ok::<_, TaskError>(())
        })?;
        self.tasks[task.0].context.rip = elf.entry().as_u64();
        Ok(())
    }

    /// Map one zeroed user stack page below [`USER_STACK_TOP`].
    ///
    /// # Errors
    /// [`TaskError::Memory`] if the page could not be mapped.
    pub fn create_stack<M: PhysMapper, A: FrameAlloc, U: Mmu>(
        &mut self,
        mem: &mut MemoryContext<'_, M, A, U>,
        task: TaskHandle,
    ) -> Result<(), TaskError> {
        let root = self.root(task)?;
        let base = VirtualAddress::new(USER_STACK_TOP - PAGE_SIZE);
        mem.within(root, |space, frames, mmu| {
            space.map_new_page(frames, mmu, base, PageEntryBits::user_rw())?;
            space.zero(base, PAGE_BYTES)
        })?;
        self.tasks[task.0].context.rsp = USER_STACK_TOP;
        Ok(())
    }

    /// Create a ready-to-run user task from an ELF image.
    ///
    /// # Errors
    /// Anything [`new_task`](Self::new_task), [`load_elf`](Self::load_elf)
    /// or [`create_stack`](Self::create_stack) reports. Nothing is left
    /// behind on failure.
    pub fn spawn<M: PhysMapper, A: FrameAlloc, U: Mmu>(
        &mut self,
        mem: &mut MemoryContext<'_, M, A, U>,
        name: &str,
        image: &[u8],
    ) -> Result<TaskHandle, TaskError> {
        let task = self.new_task(mem, name)?;
        self.load_elf(mem, task, image)?;
        if let Err(e) = self.create_stack(mem, task) {
            warn!("Can't create task `{name}': {e}");
            self.destroy(mem, task);
            return Err(e);
        }

        let t = &mut self.tasks[task.0];
        t.context.set_selectors(USER_CS, USER_DS);
        t.context.rflags = RFLAGS_IF;
        t.owner = Owner::User;
        t.state = TaskState::Ready;
        info!("task [{}] `{name}' created", t.id);
        Ok(task)
    }

    /// Create a ring-0 thread. It stays in [`TaskState::DontRun`] until
    /// [`thread_run`](Self::thread_run).
    ///
    /// The thread gets a supervisor stack page below [`USER_STACK_TOP`] in
    /// its own address space, with [`ThreadStart::on_return`] as the return
    /// address of its entry function.
    ///
    /// # Errors
    /// As for [`new_task`](Self::new_task), plus [`TaskError::Memory`] if the
    /// stack could not be mapped.
    pub fn create_thread<M: PhysMapper, A: FrameAlloc, U: Mmu>(
        &mut self,
        mem: &mut MemoryContext<'_, M, A, U>,
        name: &str,
        start: ThreadStart,
    ) -> Result<TaskHandle, TaskError> {
        let task = self.new_task(mem, name)?;
        let root = self.root(task)?;
        let top = VirtualAddress::new(USER_STACK_TOP - 8);
        let stack = mem.within(root, |space, frames, mmu| {
            let base = VirtualAddress::new(USER_STACK_TOP - PAGE_SIZE);
            space.map_new_page(frames, mmu, base, PageEntryBits::kernel_rw())?;
            space.write(top, &start.on_return.to_le_bytes())
        });
        if let Err(e) = stack {
            warn!("Can't create thread `{name}': {e}");
            self.destroy(mem, task);
            return Err(e.into());
        }

        let ctx = &mut self.tasks[task.0].context;
        ctx.set_selectors(GD_KT, GD_KD);
        ctx.rip = start.entry;
        ctx.gprs.rdi = start.arg;
        ctx.rsp = top.as_u64();
        ctx.rflags = RFLAGS_IF;
        Ok(task)
    }

    /// Release a thread created by [`create_thread`](Self::create_thread)
    /// to the scheduler.
    ///
    /// # Errors
    /// [`TaskError::WrongState`] unless the task is in [`TaskState::DontRun`].
    pub fn thread_run(&mut self, task: TaskHandle) -> Result<(), TaskError> {
        let t = &mut self.tasks[task.0];
        if t.state != TaskState::DontRun {
            return Err(TaskError::WrongState(t.state));
        }
        t.state = TaskState::Ready;
        info!("thread [{}] `{}' started", t.id, t.name);
        Ok(())
    }

    /// Every ready or running task, in slot order.
    pub fn list(&self) -> impl Iterator<Item = TaskInfo> + '_ {
        self.tasks
            .iter()
            .filter(|t| matches!(t.state, TaskState::Ready | TaskState::Running))
            .map(Task::info)
    }

    /// Destroy the user task with `id`.
    ///
    /// # Errors
    /// [`TaskError::NoSuchTask`] if no live task has that id,
    /// [`TaskError::KernelThread`] if it runs in ring 0.
    pub fn kill<M: PhysMapper, A: FrameAlloc, U: Mmu>(
        &mut self,
        mem: &mut MemoryContext<'_, M, A, U>,
        id: TaskId,
    ) -> Result<(), TaskError> {
        let task = self.find(id).ok_or(TaskError::NoSuchTask(id))?;
        if self.tasks[task.0].owner() == Owner::Kernel {
            return Err(TaskError::KernelThread(id));
        }
        self.destroy(mem, task);
        Ok(())
    }
}

/// Map and fill one segment. Pages another segment already brought in are
/// reused, so neighbouring segments may share a page.
fn load_segment<M: PhysMapper, A: FrameAlloc, U: Mmu>(
    space: &AddressSpace<'_, M>,
    frames: &mut A,
    mmu: &mut U,
    segment: &Segment<'_>,
) -> Result<(), VmemError> {
    let start = align_down(segment.va.as_u64(), PAGE_SIZE);
    let end = align_up(segment.va.as_u64() + segment.mem_size as u64, PAGE_SIZE);
    debug!("segment {}..{end:#x} {:?}", segment.va, segment.flags);

    let mut page = start;
    while page < end {
        let va = VirtualAddress::new(page);
        if space.lookup_page(va).is_none() {
            space.map_new_page(frames, mmu, va, PageEntryBits::user_rw())?;
            space.zero(va, PAGE_BYTES)?;
        }
        page += PAGE_SIZE;
    }

    space.write(segment.va, segment.data)?;
    space.zero(segment.va + segment.data.len() as u64, segment.zero_fill())
}
