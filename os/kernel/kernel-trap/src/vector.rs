//! Interrupt vectors and their names.
//!
//! Exceptions keep their architectural numbers. The two device interrupts
//! sit right behind the reserved range, followed by the syscall gate.

pub const DIVIDE_ERROR: u64 = 0;
pub const DEBUG: u64 = 1;
pub const NMI: u64 = 2;
pub const BREAKPOINT: u64 = 3;
pub const OVERFLOW: u64 = 4;
pub const BOUND_RANGE: u64 = 5;
pub const INVALID_OPCODE: u64 = 6;
pub const DEVICE_NOT_AVAILABLE: u64 = 7;
pub const DOUBLE_FAULT: u64 = 8;
pub const INVALID_TSS: u64 = 10;
pub const SEGMENT_NOT_PRESENT: u64 = 11;
pub const STACK_FAULT: u64 = 12;
pub const GENERAL_PROTECTION: u64 = 13;
pub const PAGE_FAULT: u64 = 14;
pub const X87_FLOATING_POINT: u64 = 16;
pub const ALIGNMENT_CHECK: u64 = 17;
pub const MACHINE_CHECK: u64 = 18;
pub const SIMD_FLOATING_POINT: u64 = 19;
pub const SECURITY_EXCEPTION: u64 = 30;

/// IO APIC IRQ0.
pub const TIMER: u64 = 32;
/// IO APIC IRQ1.
pub const KEYBOARD: u64 = 33;
pub const SYSCALL: u64 = stdlib::syscall_abi::SYSCALL_VECTOR;

/// Human-readable name of `vector`, as used in diagnostics.
#[must_use]
pub const fn interrupt_name(vector: u64) -> &'static str {
    match vector {
        DIVIDE_ERROR => "divide by zero",
        DEBUG => "debug",
        NMI => "nmi",
        BREAKPOINT => "breakpoint",
        OVERFLOW => "overflow",
        BOUND_RANGE => "bound range",
        INVALID_OPCODE => "invalid opcode",
        DEVICE_NOT_AVAILABLE => "device not available",
        DOUBLE_FAULT => "double fault",
        INVALID_TSS => "invalid tss",
        SEGMENT_NOT_PRESENT => "segment not present",
        STACK_FAULT => "stack",
        GENERAL_PROTECTION => "general protection",
        PAGE_FAULT => "page fault",
        X87_FLOATING_POINT => "x86 floating point instruction",
        ALIGNMENT_CHECK => "alignment check",
        MACHINE_CHECK => "machine check",
        SIMD_FLOATING_POINT => "simd floating point",
        SECURITY_EXCEPTION => "security exception",
        TIMER => "timer",
        KEYBOARD => "keyboard",
        SYSCALL => "syscall",
        _ => "unknown",
    }
}

/// Whether the CPU pushes an error code for `vector`. Entry stubs push a
/// zero for every other vector so that all frames share one layout.
#[must_use]
pub const fn pushes_error_code(vector: u64) -> bool {
    matches!(
        vector,
        DOUBLE_FAULT
            | INVALID_TSS
            | SEGMENT_NOT_PRESENT
            | STACK_FAULT
            | GENERAL_PROTECTION
            | PAGE_FAULT
            | ALIGNMENT_CHECK
            | SECURITY_EXCEPTION
    )
}

/// Whether ring 3 may raise `vector` with `int`.
#[must_use]
pub const fn user_callable(vector: u64) -> bool {
    matches!(vector, BREAKPOINT | SYSCALL)
}
