//! # Interrupt Descriptor Table
//!
//! Gates are built with a small fluent API:
//!
//! ```ignore
//! idt[SYSCALL]
//!     .set_handler(entry)
//!     .selector(GD_KT)
//!     .dpl(3)
//!     .ist(1)
//!     .present(true);
//! ```
//!
//! Every gate is an interrupt gate, so the kernel always runs with
//! interrupts masked. Only the breakpoint and syscall gates may be invoked
//! from ring 3.

use crate::platform::TRAP_ENTRIES;
use bitfield_struct::bitfield;
use core::arch::asm;
use core::mem::size_of;
use core::ops::{Index, IndexMut};
use kernel_info::gdt::GD_KT;
use kernel_trap::vector::user_callable;

const _: () = assert!(size_of::<IdtEntry>() == 16);
const _: () = assert!(align_of::<Idt>() == 16);

/// The middle two bytes of a gate: `IST` in the low byte,
/// `| P | DPL | S | Type |` in the high byte.
#[bitfield(u16)]
pub struct IdtGateAttr {
    #[bits(3)]
    pub ist: u8,
    #[bits(5)]
    __zero0: u8,
    /// 0xE = interrupt gate, 0xF = trap gate.
    #[bits(4)]
    pub typ: u8,
    pub s: bool,
    #[bits(2)]
    pub dpl: u8,
    pub present: bool,
}

#[repr(C, align(16))]
pub struct Idt {
    entries: [IdtEntry; 256],
}

impl Idt {
    /// A table with every gate absent.
    pub const fn new() -> Self {
        Self {
            entries: [IdtEntry::MISSING; 256],
        }
    }

    /// Load the table into IDTR.
    ///
    /// # Safety
    /// Must run at CPL0, and every present gate must point at a valid entry
    /// stub.
    #[inline]
    #[allow(clippy::cast_possible_truncation)]
    pub unsafe fn load(&'static self) {
        let idtr = Idtr {
            limit: (size_of::<Self>() - 1) as u16,
            base: core::ptr::from_ref(self) as u64,
        };
        unsafe {
            asm!("lidt [{}]", in(reg) &raw const idtr, options(nostack, preserves_flags, readonly));
        }
    }
}

impl Index<usize> for Idt {
    type Output = IdtEntry;
    fn index(&self, i: usize) -> &Self::Output {
        &self.entries[i]
    }
}

impl IndexMut<usize> for Idt {
    fn index_mut(&mut self, i: usize) -> &mut Self::Output {
        &mut self.entries[i]
    }
}

/// Operand of `lidt`.
#[repr(C, packed)]
struct Idtr {
    limit: u16,
    base: u64,
}

/// One 16-byte gate descriptor.
#[repr(C)]
#[derive(Copy, Clone)]
pub struct IdtEntry {
    offset_lo: u16,
    selector: u16,
    ist_type: u16,
    offset_mid: u16,
    offset_hi: u32,
    zero: u32,
}

impl IdtEntry {
    pub const MISSING: Self = Self {
        offset_lo: 0,
        selector: 0,
        ist_type: IdtGateAttr::new().into_bits(),
        offset_mid: 0,
        offset_hi: 0,
        zero: 0,
    };

    /// Store the handler address; the entry stays absent until
    /// [`IdtEntryBuilder::present`].
    #[allow(clippy::cast_possible_truncation)]
    pub fn set_handler(&mut self, handler: unsafe extern "C" fn()) -> IdtEntryBuilder<'_> {
        let addr = handler as usize as u64;
        self.offset_lo = (addr & 0xFFFF) as u16;
        self.offset_mid = ((addr >> 16) & 0xFFFF) as u16;
        self.offset_hi = (addr >> 32) as u32;
        self.ist_type = IdtGateAttr::new().with_typ(0xE).into_bits();
        IdtEntryBuilder { entry: self }
    }
}

pub struct IdtEntryBuilder<'a> {
    entry: &'a mut IdtEntry,
}

impl IdtEntryBuilder<'_> {
    #[inline]
    pub const fn present(self, p: bool) -> Self {
        let bf = IdtGateAttr::from_bits(self.entry.ist_type).with_present(p);
        self.entry.ist_type = bf.into_bits();
        self
    }

    /// Lowest privilege allowed to raise the gate with `int n`.
    #[inline]
    pub fn dpl(self, dpl: u8) -> Self {
        debug_assert!(dpl <= 3);
        let bf = IdtGateAttr::from_bits(self.entry.ist_type).with_dpl(dpl);
        self.entry.ist_type = bf.into_bits();
        self
    }

    /// Switch to TSS `ist[idx]` on entry; 0 keeps the current stack.
    #[inline]
    pub fn ist(self, idx: u8) -> Self {
        debug_assert!(idx <= 7);
        let bf = IdtGateAttr::from_bits(self.entry.ist_type).with_ist(idx);
        self.entry.ist_type = bf.into_bits();
        self
    }

    #[inline]
    pub const fn selector(self, sel: u16) -> Self {
        self.entry.selector = sel;
        self
    }
}

static mut IDT: Idt = Idt::new();

/// Install a gate for every vector the kernel knows and load the table.
///
/// # Safety
/// Call once, at CPL0, with interrupts disabled and the TSS loaded.
pub unsafe fn init() {
    // SAFETY: Single caller before interrupts are enabled.
    let idt = unsafe { &mut *(&raw mut IDT) };
    for &(vector, entry) in TRAP_ENTRIES {
        let dpl = if user_callable(vector) { 3 } else { 0 };
        #[allow(clippy::cast_possible_truncation)]
        let index = vector as usize;
        idt[index]
            .set_handler(entry)
            .selector(GD_KT)
            .dpl(dpl)
            .ist(1)
            .present(true);
    }
    unsafe { (*(&raw const IDT)).load() };
}
