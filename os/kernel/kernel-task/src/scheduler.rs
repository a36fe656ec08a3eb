//! # Scheduler
//!
//! Always the lowest ready slot. A task that was just interrupted is ready
//! again, so it is re-selected unless a lower slot is ready too.

use crate::context::{RFLAGS_IF, TaskContext};
use crate::pool::TaskPool;
use crate::task::{TaskHandle, TaskState};
use kernel_vmem::Mmu;
use log::trace;

#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum ScheduleError {
    #[error("no more tasks")]
    NoReadyTask,
}

impl<const N: usize> TaskPool<N> {
    /// Pick the lowest ready task and bind it to the processor.
    ///
    /// # Errors
    /// [`ScheduleError::NoReadyTask`] if nothing is ready.
    pub fn schedule<U: Mmu>(&mut self, mmu: &mut U) -> Result<TaskHandle, ScheduleError> {
        let slot = self
            .tasks
            .iter()
            .position(|t| t.state == TaskState::Ready)
            .ok_or(ScheduleError::NoReadyTask)?;
        let task = TaskHandle(slot);
        self.run(mmu, task);
        trace!("schedule: task [{}]", self.tasks[slot].id);
        Ok(task)
    }

    /// Bind `task` to the processor and return the context to resume.
    ///
    /// Its root is loaded unless already active, the task is marked running
    /// and its saved flags get interrupts enabled. A different task still
    /// marked running goes back to ready.
    ///
    /// # Panics
    /// If the slot is free.
    pub fn run<U: Mmu>(&mut self, mmu: &mut U, task: TaskHandle) -> &TaskContext {
        if let Some(previous) = self.cpu.current
            && previous != task
            && self.tasks[previous.0].state == TaskState::Running
        {
            self.tasks[previous.0].state = TaskState::Ready;
        }
        let t = &mut self.tasks[task.0];
        let Some(root) = t.root else {
            panic!("running free task slot {}", task.0);
        };
        if mmu.active_root() != root {
            // SAFETY: Task roots share the kernel half.
            unsafe { mmu.load_root(root) };
        }
        t.context.rflags |= RFLAGS_IF;
        t.state = TaskState::Running;
        self.cpu.current = Some(task);
        &self.tasks[task.0].context
    }
}
