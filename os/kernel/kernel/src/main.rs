//! # Kernel Entry Point
//!
//! The loader enters [`_start`] in long mode, with all of physical memory
//! direct-mapped at [`KERNEL_BASE`](kernel_info::memory::KERNEL_BASE), the
//! boot stack below [`KERNEL_STACK_TOP`] and a [`KernelConfig`] at
//! [`KERNEL_INFO`]. From there:
//!
//! ```text
//! _start ─► kernel_main
//!             ├─ logger, TSS + GDT reload
//!             ├─ page arena from the loader's records, drop the identity map
//!             ├─ interrupt stack, APIC and IO APIC pages
//!             ├─ IDT, PIC mask, APIC timer and IO APIC routes
//!             ├─ kernel thread + init
//!             └─ schedule ─► resume (iretq)
//! ```
//!
//! Afterwards the kernel only runs again from a trap, in [`handle_trap`].

#![no_std]
#![no_main]
#![allow(unsafe_code)]

mod apic;
mod idt;
mod init_image;
mod mmio;
mod platform;
mod ports;
mod tss;

use crate::platform::{Cr3, Machine};
use core::arch::{asm, naked_asm};
use kernel_alloc::{DirectMap, PageArena};
use kernel_info::boot::KernelConfig;
use kernel_info::limits::TASK_MAX_CNT;
use kernel_info::memory::{
    APIC_BASE, APIC_BASE_PA, INTERRUPT_STACK_SIZE, INTERRUPT_STACK_TOP, IOAPIC_BASE,
    IOAPIC_BASE_PA, KERNEL_INFO, KERNEL_STACK_TOP,
};
use kernel_memory_addresses::{PAGE_SIZE, PhysicalAddress, PhysicalPage, VirtualAddress};
#[cfg(feature = "qemu")]
use kernel_qemu::{QemuLogger, qemu_trace};
use kernel_sync::IrqCell;
use kernel_task::{MemoryContext, TaskContext, TaskError, TaskPool, ThreadStart};
use kernel_vmem::{Mmu, PageEntryBits, PageTable, PhysMapper, VmemError};
use log::{debug, error, info};

type Memory = MemoryContext<'static, DirectMap, PageArena<'static>, Cr3>;

/// All mutable kernel state.
struct Kernel {
    tasks: TaskPool<TASK_MAX_CNT>,
    /// `None` until the page arena is rebuilt at boot.
    memory: Option<Memory>,
}

static KERNEL: IrqCell<Kernel> = IrqCell::new(Kernel {
    tasks: TaskPool::new(),
    memory: None,
});

static DIRECT_MAP: DirectMap = DirectMap;

/// Rounds the demo kernel thread yields before it returns.
const KERNEL_THREAD_ROUNDS: u64 = 3;

#[panic_handler]
fn panic(info: &core::panic::PanicInfo) -> ! {
    error!("kernel panic: {info}");
    loop {
        unsafe { asm!("cli", "hlt", options(nomem, nostack)) };
    }
}

/// The kernel entry point.
///
/// Runs on the loader's stack, which is reset to [`KERNEL_STACK_TOP`] with
/// an empty call frame before jumping into Rust.
#[unsafe(no_mangle)]
#[unsafe(naked)]
pub unsafe extern "C" fn _start() -> ! {
    naked_asm!(
        "cli",
        "mov rsp, {stack_top}",
        "xor ebp, ebp",
        "call {main}",
        "ud2",
        stack_top = const KERNEL_STACK_TOP,
        main = sym kernel_main,
    );
}

extern "C" fn kernel_main() -> ! {
    #[cfg(feature = "qemu")]
    if QemuLogger::init(log::LevelFilter::Debug).is_err() {
        qemu_trace!("logger already installed\n");
    }
    info!("Kernel reporting to QEMU!");

    // SAFETY: The loader leaves its hand-off block at KERNEL_INFO.
    let config: KernelConfig =
        unsafe { VirtualAddress::new(KERNEL_INFO).as_mut_ptr::<KernelConfig>().read() };

    // SAFETY: The loader's GDT is reachable through the direct map and the
    // interrupt stack is mapped below, before interrupts are enabled.
    unsafe {
        tss::install(
            config.gdt.virtual_address(),
            VirtualAddress::new(INTERRUPT_STACK_TOP),
        );
    }

    let Ok(count) = usize::try_from(config.pages_cnt) else {
        panic!("{} boot pages do not fit the address space", config.pages_cnt);
    };
    // SAFETY: The loader's page records are handed over to the kernel for good.
    let arena = unsafe {
        PageArena::from_boot_records(config.pages.virtual_address().as_mut_ptr::<u8>(), count)
    };

    let kernel_root = config.pml4.physical().page();
    drop_identity_map(kernel_root);

    let mut memory = MemoryContext::new(&DIRECT_MAP, arena, Cr3, kernel_root);
    if let Err(e) = map_kernel_pages(&mut memory) {
        panic!("not enough memory for interrupt handler stack: {e}");
    }

    // SAFETY: TSS, interrupt stack and APIC pages are in place.
    unsafe {
        idt::init();
        ports::mask_pic();
        apic::init();
    }

    let next = KERNEL.with(|k| {
        let mem = k.memory.insert(memory);
        if let Err(e) = create_initial_tasks(&mut k.tasks, mem) {
            panic!("can't create initial tasks: {e}");
        }
        let task = match k.tasks.schedule(&mut mem.mmu) {
            Ok(task) => task,
            Err(e) => panic!("{e}"),
        };
        *k.tasks.get(task).context()
    });

    // SAFETY: The context was just set up by the task pool and its root is active.
    unsafe { platform::resume(&raw const next) }
}

/// Entry of every trap, on the interrupt stack with interrupts masked.
pub(crate) extern "C" fn handle_trap(frame: &TaskContext) -> ! {
    let next = KERNEL.with(|k| {
        let Some(mem) = k.memory.as_mut() else {
            panic!("trap {} before the kernel is up", frame.interrupt_number);
        };
        *kernel_trap::dispatch(&mut k.tasks, mem, &mut Machine, frame)
    });

    // SAFETY: `next` was saved by a trap or built by the task pool, and the
    // scheduler loaded its root.
    unsafe { platform::resume(&raw const next) }
}

/// Clear `pml4[0]`; the loader's identity mapping is not needed any more.
fn drop_identity_map(kernel_root: PhysicalPage) {
    // SAFETY: The kernel root is a live page table reachable through the direct map.
    let pml4: &mut PageTable = unsafe { DIRECT_MAP.phys_to_mut(kernel_root.base()) };
    pml4.get_mut(0).clear();
    // SAFETY: Reloading the active root flushes the stale identity translations.
    unsafe { Cr3.load_root(kernel_root) };
}

/// Back the interrupt stack with fresh frames and map the APIC registers.
fn map_kernel_pages(mem: &mut Memory) -> Result<(), VmemError> {
    let root = mem.kernel_root;
    mem.within(root, |space, frames, mmu| {
        for page in 1..=INTERRUPT_STACK_SIZE / PAGE_SIZE {
            let va = VirtualAddress::new(INTERRUPT_STACK_TOP - page * PAGE_SIZE);
            space.map_new_page(frames, mmu, va, PageEntryBits::kernel_rw())?;
        }
        for (pa, va) in [(APIC_BASE_PA, APIC_BASE), (IOAPIC_BASE_PA, IOAPIC_BASE)] {
            let frame = PhysicalPage::containing(PhysicalAddress::new(pa));
            space.map_device(frames, mmu, frame, VirtualAddress::new(va))?;
        }
        Ok(())
    })
}

/// A kernel thread in the first slot, then `init`.
fn create_initial_tasks(
    tasks: &mut TaskPool<TASK_MAX_CNT>,
    mem: &mut Memory,
) -> Result<(), TaskError> {
    let thread = tasks.create_thread(
        mem,
        "kernel thread",
        ThreadStart {
            entry: kernel_thread as usize as u64,
            arg: KERNEL_THREAD_ROUNDS,
            on_return: platform::thread_exit as usize as u64,
        },
    )?;
    tasks.thread_run(thread)?;
    tasks.spawn(mem, "init", init_image::bytes())?;
    Ok(())
}

/// Yield `rounds` times, then return into the exit trampoline.
extern "C" fn kernel_thread(rounds: u64) {
    for round in 0..rounds {
        debug!("kernel thread: round {round}");
        // A breakpoint raised by a task gives up the processor.
        unsafe { asm!("int3", options(nomem, nostack)) };
    }
}
