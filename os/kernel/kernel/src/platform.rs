//! # Platform Boundary
//!
//! All of the processor-specific glue the trap path needs lives here:
//!
//! ```text
//! CPU pushes ss rsp rflags cs rip [error]
//!   └─► entry stub: push 0 (no error code), push vector
//!         └─► trap_common: push segments, r15 .. rax  ─► handle_trap(&TaskContext)
//!                                                            │
//! iretq ◄── pop rax .. r15, restore ds/es ◄── resume(&TaskContext) ◄──┘
//! ```
//!
//! The saved frame is exactly a [`TaskContext`]. Besides the stubs, this
//! module holds the control register accessors, the [`Mmu`] over CR3 and
//! the [`Platform`] the dispatcher talks to.

use crate::{apic, ports};
use core::arch::{asm, naked_asm};
use core::mem::offset_of;
use kernel_info::gdt::GD_KD;
use kernel_memory_addresses::{PhysicalAddress, PhysicalPage, VirtualAddress};
use kernel_qemu::QemuSink;
use kernel_task::TaskContext;
use kernel_trap::vector::{self, pushes_error_code};
use kernel_trap::{Console, KeySink, Platform};
use kernel_vmem::Mmu;
use log::debug;
use stdlib::syscall_abi::{SYSCALL_VECTOR, Sysno};

const SEGMENTS: usize = offset_of!(TaskContext, segments);

macro_rules! trap_entry {
    ($name:ident, $vector:path) => {
        const _: () = assert!(!pushes_error_code($vector));

        #[unsafe(naked)]
        unsafe extern "C" fn $name() {
            naked_asm!(
                "push 0",
                "push {vector}",
                "jmp {common}",
                vector = const $vector,
                common = sym trap_common,
            );
        }
    };
    ($name:ident, $vector:path, error_code) => {
        const _: () = assert!(pushes_error_code($vector));

        #[unsafe(naked)]
        unsafe extern "C" fn $name() {
            naked_asm!(
                "push {vector}",
                "jmp {common}",
                vector = const $vector,
                common = sym trap_common,
            );
        }
    };
}

trap_entry!(divide_error, vector::DIVIDE_ERROR);
trap_entry!(debug_trap, vector::DEBUG);
trap_entry!(nmi, vector::NMI);
trap_entry!(breakpoint, vector::BREAKPOINT);
trap_entry!(overflow, vector::OVERFLOW);
trap_entry!(bound_range, vector::BOUND_RANGE);
trap_entry!(invalid_opcode, vector::INVALID_OPCODE);
trap_entry!(device_not_available, vector::DEVICE_NOT_AVAILABLE);
trap_entry!(double_fault, vector::DOUBLE_FAULT, error_code);
trap_entry!(invalid_tss, vector::INVALID_TSS, error_code);
trap_entry!(segment_not_present, vector::SEGMENT_NOT_PRESENT, error_code);
trap_entry!(stack_fault, vector::STACK_FAULT, error_code);
trap_entry!(general_protection, vector::GENERAL_PROTECTION, error_code);
trap_entry!(page_fault, vector::PAGE_FAULT, error_code);
trap_entry!(x87_floating_point, vector::X87_FLOATING_POINT);
trap_entry!(alignment_check, vector::ALIGNMENT_CHECK, error_code);
trap_entry!(machine_check, vector::MACHINE_CHECK);
trap_entry!(simd_floating_point, vector::SIMD_FLOATING_POINT);
trap_entry!(security_exception, vector::SECURITY_EXCEPTION, error_code);
trap_entry!(timer, vector::TIMER);
trap_entry!(keyboard, vector::KEYBOARD);
trap_entry!(syscall, vector::SYSCALL);

/// Vector and entry stub of every installed gate.
pub static TRAP_ENTRIES: &[(u64, unsafe extern "C" fn())] = &[
    (vector::DIVIDE_ERROR, divide_error),
    (vector::DEBUG, debug_trap),
    (vector::NMI, nmi),
    (vector::BREAKPOINT, breakpoint),
    (vector::OVERFLOW, overflow),
    (vector::BOUND_RANGE, bound_range),
    (vector::INVALID_OPCODE, invalid_opcode),
    (vector::DEVICE_NOT_AVAILABLE, device_not_available),
    (vector::DOUBLE_FAULT, double_fault),
    (vector::INVALID_TSS, invalid_tss),
    (vector::SEGMENT_NOT_PRESENT, segment_not_present),
    (vector::STACK_FAULT, stack_fault),
    (vector::GENERAL_PROTECTION, general_protection),
    (vector::PAGE_FAULT, page_fault),
    (vector::X87_FLOATING_POINT, x87_floating_point),
    (vector::ALIGNMENT_CHECK, alignment_check),
    (vector::MACHINE_CHECK, machine_check),
    (vector::SIMD_FLOATING_POINT, simd_floating_point),
    (vector::SECURITY_EXCEPTION, security_exception),
    (vector::TIMER, timer),
    (vector::KEYBOARD, keyboard),
    (vector::SYSCALL, syscall),
];

/// Finish the frame the stub started and hand it to [`crate::handle_trap`].
///
/// The CPU aligns the stack to 16 bytes before pushing; the frame is 23
/// words, so one more word is needed before the call.
#[unsafe(naked)]
unsafe extern "C" fn trap_common() {
    naked_asm!(
        "sub rsp, 8",
        "push r15",
        "push r14",
        "push r13",
        "push r12",
        "push r11",
        "push r10",
        "push r9",
        "push r8",
        "push rbp",
        "push rdi",
        "push rsi",
        "push rdx",
        "push rcx",
        "push rbx",
        "push rax",
        "mov word ptr [rsp + {segs}], ds",
        "mov word ptr [rsp + {segs} + 2], es",
        "mov word ptr [rsp + {segs} + 4], fs",
        "mov word ptr [rsp + {segs} + 6], gs",
        "mov ax, {kd}",
        "mov ds, ax",
        "mov es, ax",
        "mov rdi, rsp",
        "sub rsp, 8",
        "cld",
        "call {handler}",
        "ud2",
        segs = const SEGMENTS,
        kd = const GD_KD,
        handler = sym crate::handle_trap,
    );
}

/// Continue `context` with `iretq`.
///
/// # Safety
/// `context` must describe a valid place to return to in the active address
/// space, and must not be overwritten before `iretq` reads it.
#[unsafe(naked)]
pub unsafe extern "C" fn resume(context: *const TaskContext) -> ! {
    naked_asm!(
        "mov rsp, rdi",
        "mov ax, word ptr [rsp + {segs}]",
        "mov ds, ax",
        "mov ax, word ptr [rsp + {segs} + 2]",
        "mov es, ax",
        "pop rax",
        "pop rbx",
        "pop rcx",
        "pop rdx",
        "pop rsi",
        "pop rdi",
        "pop rbp",
        "pop r8",
        "pop r9",
        "pop r10",
        "pop r11",
        "pop r12",
        "pop r13",
        "pop r14",
        "pop r15",
        // Segment word, vector and error code.
        "add rsp, 24",
        "iretq",
        segs = const SEGMENTS,
    );
}

/// Where a kernel thread lands when its entry function returns: `exit(0)`.
#[unsafe(naked)]
pub unsafe extern "C" fn thread_exit() -> ! {
    naked_asm!(
        "mov rax, {exit}",
        "xor ebx, ebx",
        "int {vector}",
        "ud2",
        exit = const Sysno::Exit as u64,
        vector = const SYSCALL_VECTOR,
    );
}

/// Linear address of the last page fault.
#[inline]
#[must_use]
pub fn read_cr2() -> VirtualAddress {
    let va: u64;
    unsafe {
        asm!("mov {}, cr2", out(reg) va, options(nomem, nostack, preserves_flags));
    }
    VirtualAddress::new(va)
}

/// The processor's translation root.
#[derive(Copy, Clone, Debug, Default)]
pub struct Cr3;

impl Mmu for Cr3 {
    fn active_root(&self) -> PhysicalPage {
        let cr3: u64;
        unsafe {
            asm!("mov {}, cr3", out(reg) cr3, options(nomem, nostack, preserves_flags));
        }
        PhysicalPage::containing(PhysicalAddress::new(cr3))
    }

    unsafe fn load_root(&mut self, root: PhysicalPage) {
        unsafe {
            asm!("mov cr3, {}", in(reg) root.base().as_u64(), options(nostack, preserves_flags));
        }
    }

    fn invalidate(&mut self, va: VirtualAddress) {
        unsafe {
            asm!("invlpg [{}]", in(reg) va.as_u64(), options(nostack, preserves_flags));
        }
    }
}

/// The machine as the dispatcher sees it: the QEMU console, the local APIC
/// and the keyboard controller.
#[derive(Copy, Clone, Debug, Default)]
pub struct Machine;

impl Console for Machine {
    fn write_bytes(&mut self, bytes: &[u8]) {
        QemuSink.write_bytes(bytes);
    }
}

impl KeySink for Machine {
    fn key_pressed(&mut self, scancode: u8) {
        debug!("key pressed: {scancode:#04x}");
    }
}

impl Platform for Machine {
    fn fault_address(&self) -> VirtualAddress {
        read_cr2()
    }

    fn end_of_interrupt(&mut self) {
        apic::end_of_interrupt();
    }

    fn read_scancode(&mut self) -> u8 {
        // SAFETY: Only called from the keyboard interrupt.
        unsafe { ports::inb(ports::KEYBOARD_DATA) }
    }
}
