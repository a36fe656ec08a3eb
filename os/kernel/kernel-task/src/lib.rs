//! # Tasks
//!
//! The task table of a single-processor kernel and the operations that
//! create, copy, schedule and tear down its entries.
//!
//! - [`TaskPool`] owns a fixed number of [`Task`] slots and tracks which one
//!   the processor runs.
//! - [`MemoryContext`] bundles the frame allocator, the MMU and the kernel
//!   root every task operation works through.
//! - [`ElfImage`] reads the `PT_LOAD` segments of a user program.
//! - [`TaskPool::fork`] duplicates a task copy-on-write.
//! - [`TaskPool::schedule`] picks the next task to resume.
//!
//! Nothing here touches hardware directly: the architecture side comes in
//! through the [`kernel_vmem`] seams, so the whole crate runs under
//! `cargo test` against the simulated MMU.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

pub mod context;
pub mod elf;
mod fork;
pub mod memory;
mod pool;
mod scheduler;
pub mod task;

pub use crate::context::{DataSegments, GeneralRegisters, RFLAGS_IF, TaskContext};
pub use crate::elf::{ElfError, ElfImage, Segment, SegmentFlags};
pub use crate::memory::MemoryContext;
pub use crate::pool::{TaskPool, ThreadStart};
pub use crate::scheduler::ScheduleError;
pub use crate::task::{Owner, Task, TaskHandle, TaskId, TaskInfo, TaskName, TaskState};
use kernel_vmem::VmemError;

#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum TaskError {
    #[error("no more free tasks")]
    PoolExhausted,
    #[error(transparent)]
    Memory(#[from] VmemError),
    #[error("invalid elf image: {0}")]
    Elf(#[from] ElfError),
    #[error("no task with id {0}")]
    NoSuchTask(TaskId),
    #[error("task {0} is a kernel thread")]
    KernelThread(TaskId),
    #[error("task is {0:?}")]
    WrongState(TaskState),
}
