//! # Saved Register State
//!
//! A [`TaskContext`] is laid out exactly as the trap entry stubs leave it on
//! the stack, lowest address first:
//!
//! ```text
//! +0    rax rbx rcx rdx rsi rdi rbp r8 .. r15   pushed by the stub
//! +120  ds | es | fs | gs                        one word, pushed by the stub
//! +128  interrupt number                         pushed by the stub
//! +136  error code                               CPU, or a zero from the stub
//! +144  rip cs rflags rsp ss                     CPU
//! ```

use bitfield_struct::bitfield;

/// Interrupt enable flag in RFLAGS.
pub const RFLAGS_IF: u64 = 1 << 9;

/// The four data segment selectors, packed into one stack slot.
#[bitfield(u64)]
#[derive(Eq, PartialEq)]
pub struct DataSegments {
    pub ds: u16,
    pub es: u16,
    pub fs: u16,
    pub gs: u16,
}

impl DataSegments {
    /// All four selectors set to `selector`.
    #[inline]
    #[must_use]
    pub const fn flat(selector: u16) -> Self {
        Self::new()
            .with_ds(selector)
            .with_es(selector)
            .with_fs(selector)
            .with_gs(selector)
    }
}

#[repr(C)]
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct GeneralRegisters {
    pub rax: u64,
    pub rbx: u64,
    pub rcx: u64,
    pub rdx: u64,
    pub rsi: u64,
    pub rdi: u64,
    pub rbp: u64,
    pub r8: u64,
    pub r9: u64,
    pub r10: u64,
    pub r11: u64,
    pub r12: u64,
    pub r13: u64,
    pub r14: u64,
    pub r15: u64,
}

impl GeneralRegisters {
    pub const ZERO: Self = Self {
        rax: 0,
        rbx: 0,
        rcx: 0,
        rdx: 0,
        rsi: 0,
        rdi: 0,
        rbp: 0,
        r8: 0,
        r9: 0,
        r10: 0,
        r11: 0,
        r12: 0,
        r13: 0,
        r14: 0,
        r15: 0,
    };
}

/// Everything needed to resume a task with `iretq`.
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct TaskContext {
    pub gprs: GeneralRegisters,
    pub segments: DataSegments,
    /// Vector of the trap that saved this context.
    pub interrupt_number: u64,
    pub error_code: u64,
    pub rip: u64,
    pub cs: u64,
    pub rflags: u64,
    pub rsp: u64,
    pub ss: u64,
}

impl TaskContext {
    pub const EMPTY: Self = Self {
        gprs: GeneralRegisters::ZERO,
        segments: DataSegments::new(),
        interrupt_number: 0,
        error_code: 0,
        rip: 0,
        cs: 0,
        rflags: 0,
        rsp: 0,
        ss: 0,
    };

    /// Point every segment register at `code` / `data`.
    pub fn set_selectors(&mut self, code: u16, data: u16) {
        self.cs = u64::from(code);
        self.ss = u64::from(data);
        self.segments = DataSegments::flat(data);
    }
}

const _: () = {
    assert!(size_of::<GeneralRegisters>() == 15 * 8);
    assert!(size_of::<TaskContext>() == 23 * 8);
    assert!(core::mem::offset_of!(TaskContext, segments) == 120);
    assert!(core::mem::offset_of!(TaskContext, interrupt_number) == 128);
    assert!(core::mem::offset_of!(TaskContext, rip) == 144);
    assert!(core::mem::offset_of!(TaskContext, ss) == 176);
};
