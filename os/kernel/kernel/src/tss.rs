//! # Task State Segment
//!
//! Long mode uses the TSS only to find stacks: `rsp0` on a ring 3 → ring 0
//! transition and `ist1` for gates that ask for it. Every gate here uses
//! IST1, so all traps arrive on the interrupt stack at
//! [`INTERRUPT_STACK_TOP`](kernel_info::memory::INTERRUPT_STACK_TOP)
//! whatever the address space or privilege level they interrupt.
//!
//! The loader's GDT reserves the 16-byte TSS descriptor at [`GD_TSS`].

use bitfield_struct::bitfield;
use core::mem::size_of;
use kernel_info::gdt::GD_TSS;
use kernel_memory_addresses::VirtualAddress;

#[repr(C, packed)]
pub struct Tss64 {
    _reserved0: u32,
    rsp: [u64; 3],
    _reserved1: u64,
    ist: [u64; 7],
    _reserved2: u64,
    _reserved3: u16,
    /// Pointing past the end disables the I/O permission bitmap.
    iopb_offset: u16,
}

const _: () = assert!(size_of::<Tss64>() == 104);

impl Tss64 {
    #[allow(clippy::cast_possible_truncation)]
    const fn new() -> Self {
        Self {
            _reserved0: 0,
            rsp: [0; 3],
            _reserved1: 0,
            ist: [0; 7],
            _reserved2: 0,
            _reserved3: 0,
            iopb_offset: size_of::<Self>() as u16,
        }
    }
}

static mut TSS: Tss64 = Tss64::new();

/// Low 8 bytes of an available 64-bit TSS descriptor.
#[bitfield(u64)]
struct TssDescLow {
    limit_lo: u16,
    base_lo: u16,
    base_mid: u8,
    #[bits(4)]
    typ: u8,
    s: bool,
    #[bits(2)]
    dpl: u8,
    p: bool,
    #[bits(4)]
    limit_hi: u8,
    #[bits(4)]
    __: u8,
    base_hi: u8,
}

/// GDT pointer operand of `lgdt`.
#[repr(C, packed)]
struct Gdtr {
    limit: u16,
    base: u64,
}

#[allow(clippy::cast_possible_truncation)]
const fn descriptor(base: u64, limit: u32) -> [u64; 2] {
    let low = TssDescLow::new()
        .with_limit_lo((limit & 0xFFFF) as u16)
        .with_base_lo((base & 0xFFFF) as u16)
        .with_base_mid(((base >> 16) & 0xFF) as u8)
        .with_typ(0x9)
        .with_s(false)
        .with_dpl(0)
        .with_p(true)
        .with_limit_hi(((limit >> 16) & 0xF) as u8)
        .with_base_hi(((base >> 24) & 0xFF) as u8);
    [low.into_bits(), base >> 32]
}

/// Point `rsp0` and `ist1` at `stack_top`, write the TSS descriptor into the
/// loader's GDT at `gdt`, reload the GDT through that virtual address and
/// load the task register.
///
/// # Safety
/// `gdt` must be the active GDT seen through the direct map, with room for a
/// 16-byte descriptor at [`GD_TSS`]. Interrupts must be disabled.
#[allow(clippy::cast_possible_truncation)]
pub unsafe fn install(gdt: VirtualAddress, stack_top: VirtualAddress) {
    let tss = &raw mut TSS;
    let top = stack_top.as_u64();
    unsafe {
        (*tss).rsp = [top, 0, 0];
        (*tss).ist = [top, 0, 0, 0, 0, 0, 0];
    }

    let desc = descriptor(tss as u64, (size_of::<Tss64>() - 1) as u32);
    let slot = gdt
        .as_mut_ptr::<u8>()
        .wrapping_add(usize::from(GD_TSS))
        .cast::<[u64; 2]>();
    let gdtr = Gdtr {
        limit: GD_TSS + 16 - 1,
        base: gdt.as_u64(),
    };

    unsafe {
        slot.write_unaligned(desc);
        core::arch::asm!(
            "lgdt [{}]",
            in(reg) &raw const gdtr,
            options(readonly, nostack, preserves_flags)
        );
        core::arch::asm!(
            "ltr {0:x}",
            in(reg) GD_TSS,
            options(nostack, preserves_flags)
        );
    }
}

