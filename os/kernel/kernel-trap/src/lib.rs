//! # Trap Dispatch
//!
//! Everything that happens between a trap entry stub saving a frame and the
//! return path restoring one:
//!
//! ```text
//! hardware trap → save context → classify vector → handler → resume or schedule
//! ```
//!
//! | Vector | Handling |
//! |--------|----------|
//! | breakpoint | log, then resume the bootstrap context or reschedule |
//! | page fault | copy-on-write repair, or destroy the task |
//! | syscall | `puts`, `exit`, `fork`, `yield` |
//! | timer | EOI, reschedule |
//! | keyboard | forward key presses, EOI, reschedule |
//! | anything else | register dump, destroy the task, reschedule |
//!
//! The machine is reached through [`Platform`]; memory through the
//! [`MemoryContext`] seams. The entry stubs and `iretq` live in the kernel
//! binary.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![deny(unsafe_code)]

mod dump;
mod page_fault;
mod platform;
mod syscall;
pub mod vector;

pub use crate::dump::RegisterDump;
pub use crate::page_fault::PageFaultError;
pub use crate::platform::{Console, ConsoleWriter, KeySink, Platform};
pub use crate::syscall::puts;
pub use crate::vector::interrupt_name;

use core::fmt::Write;
use kernel_task::{MemoryContext, TaskContext, TaskHandle, TaskPool};
use kernel_vmem::{FrameAlloc, Mmu, PhysMapper};
use log::{debug, error, info, trace};

/// Key release codes have bit 7 set.
const KEY_RELEASED: u8 = 0x80;

/// Where a handler leaves the processor.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub(crate) enum Next {
    /// Continue the given task.
    Resume(TaskHandle),
    /// Continue the code that booted the kernel.
    Bootstrap,
    /// Let the scheduler pick.
    Schedule,
}

/// Handle the trap that produced `frame` and return the context to resume.
///
/// The frame is first stored in the interrupted task (which becomes ready),
/// or in the bootstrap context when no task was running.
///
/// # Panics
/// - On a fault or syscall raised by the bootstrap context.
/// - On an unknown syscall number.
/// - If no task is left to run.
pub fn dispatch<'t, const N: usize, M, A, U, P>(
    tasks: &'t mut TaskPool<N>,
    mem: &mut MemoryContext<'_, M, A, U>,
    platform: &mut P,
    frame: &TaskContext,
) -> &'t TaskContext
where
    M: PhysMapper,
    A: FrameAlloc,
    U: Mmu,
    P: Platform + ?Sized,
{
    let current = tasks.save_context(frame);
    let vector = frame.interrupt_number;
    trace!("trap {} ({vector})", interrupt_name(vector));

    let next = match (vector, current) {
        (vector::BREAKPOINT, current) => {
            info!("breakpoint");
            current.map_or(Next::Bootstrap, |_| Next::Schedule)
        }
        (vector::TIMER, _) => {
            platform.end_of_interrupt();
            Next::Schedule
        }
        (vector::KEYBOARD, _) => {
            let scancode = platform.read_scancode();
            if scancode & KEY_RELEASED == 0 {
                platform.key_pressed(scancode);
            }
            platform.end_of_interrupt();
            Next::Schedule
        }
        (_, None) => panic!(
            "{} ({vector}) in kernel bootstrap at {:#x}\n{}",
            interrupt_name(vector),
            frame.rip,
            RegisterDump(frame)
        ),
        (vector::PAGE_FAULT, Some(task)) => page_fault(tasks, mem, platform, task),
        (vector::SYSCALL, Some(task)) => syscall::handle(tasks, mem, platform, task),
        (_, Some(task)) => {
            let mut out = ConsoleWriter(platform);
            write!(
                out,
                "\nunhandled interrupt: {} ({vector})\n{}",
                interrupt_name(vector),
                RegisterDump(frame)
            )
            .ok();
            error!(
                "task [{}] unhandled interrupt: {} ({vector}) at {:#x}",
                tasks.get(task).id(),
                interrupt_name(vector),
                frame.rip
            );
            tasks.destroy(mem, task);
            Next::Schedule
        }
    };

    match next {
        Next::Resume(task) => tasks.run(&mut mem.mmu, task),
        Next::Bootstrap => tasks.bootstrap_context(),
        Next::Schedule => match tasks.schedule(&mut mem.mmu) {
            Ok(task) => tasks.get(task).context(),
            Err(e) => panic!("{e}"),
        },
    }
}

fn page_fault<const N: usize, M, A, U, P>(
    tasks: &mut TaskPool<N>,
    mem: &mut MemoryContext<'_, M, A, U>,
    platform: &mut P,
    task: TaskHandle,
) -> Next
where
    M: PhysMapper,
    A: FrameAlloc,
    U: Mmu,
    P: Platform + ?Sized,
{
    let t = tasks.get(task);
    let id = t.id();
    let addr = platform.fault_address();
    let err = PageFaultError::from_bits(t.context().error_code);
    debug!("task [{id}] page fault at {addr}: {err}");

    if err.is_protection_write()
        && let Some(root) = t.root()
    {
        match mem.within(root, |space, frames, mmu| space.resolve_cow(frames, mmu, addr)) {
            Ok(()) => return Next::Resume(task),
            Err(e) => debug!("task [{id}] copy-on-write at {addr}: {e}"),
        }
    }

    let mut out = ConsoleWriter(platform);
    write!(
        out,
        "Page fault at `{addr}', {err}\n{}",
        RegisterDump(tasks.get(task).context())
    )
    .ok();
    error!("task [{id}] page fault at {addr}: {err}");
    tasks.destroy(mem, task);
    Next::Schedule
}
