use crate::memory::MemoryContext;
use crate::pool::TaskPool;
use crate::task::{TaskHandle, TaskState};
use crate::TaskError;
use kernel_vmem::address_space::USER_PML4_BOUND;
use kernel_vmem::{FrameAlloc, Mmu, PhysMapper};
use log::{debug, warn};

impl<const N: usize> TaskPool<N> {
    /// Duplicate `parent` into a new ready task sharing its pages
    /// copy-on-write.
    ///
    /// Every user leaf of the parent is mapped into the child, writable ones
    /// as read-only COW leaves. Only once the child is complete are the
    /// parent's writable leaves turned COW as well. The child resumes with
    /// the parent's saved context and `rax = 0`; setting the parent's return
    /// value is left to the caller.
    ///
    /// # Errors
    /// [`TaskError::PoolExhausted`] or [`TaskError::Memory`]. A partially
    /// built child is destroyed and the parent's mappings are untouched.
    pub fn fork<M: PhysMapper, A: FrameAlloc, U: Mmu>(
        &mut self,
        mem: &mut MemoryContext<'_, M, A, U>,
        parent: TaskHandle,
    ) -> Result<TaskHandle, TaskError> {
        let parent_root = self.root(parent)?;
        let name = *self.get(parent).name();
        let owner = self.get(parent).owner();
        let child = self.new_task(mem, name.as_str())?;
        let child_root = self.root(child)?;
        let parent_space = mem.space(parent_root);
        let shared = mem.within(child_root, |child_space, frames, mmu| {
            parent_space.share_leaves_into(child_space, frames, mmu, USER_PML4_BOUND)
        });
        if let Err(e) = shared {
            warn!("Can't fork task [{}]: {e}", self.get(parent).id());
            self.destroy(mem, child);
            return Err(e.into());
        }
        if let Err(e) = mem.within(parent_root, |space, _, mmu| {
            space.mark_cow(mmu, USER_PML4_BOUND)
        }) {
            self.destroy(mem, child);
            return Err(e.into());
        }

        let mut context = *self.get(parent).context();
        context.gprs.rax = 0;
        let c = self.get_mut(child);
        c.context = context;
        c.owner = owner;
        c.state = TaskState::Ready;
        debug!("task [{}] forked into [{}]", self.get(parent).id(), self.get(child).id());
        Ok(child)
    }
}
