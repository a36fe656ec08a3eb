//! # Local APIC and IO APIC
//!
//! Both are driven through their MMIO pages, mapped uncached at
//! [`APIC_BASE`] and [`IOAPIC_BASE`]. The local APIC timer runs periodic
//! at vector [`TIMER`]; the IO APIC routes IRQ0 to [`TIMER`] and IRQ1 (the
//! keyboard) to [`KEYBOARD`], both to the boot processor.

use crate::mmio::Mmio;
use kernel_info::memory::{APIC_BASE, IOAPIC_BASE};
use kernel_memory_addresses::VirtualAddress;
use kernel_trap::vector::{KEYBOARD, TIMER};
use log::info;

/// IA32_APIC_BASE MSR and its global enable bit.
const IA32_APIC_BASE: u32 = 0x1B;
const APIC_ENABLE: u64 = 1 << 11;

mod lapic_reg {
    pub const ID: usize = 0x020;
    pub const EOI: usize = 0x0B0;
    pub const SVR: usize = 0x0F0;
    pub const TIMER_LVT: usize = 0x320;
    pub const TIMER_ICR: usize = 0x380;
    pub const TIMER_DCR: usize = 0x3E0;
}

mod ioapic_reg {
    pub const IOREGSEL: usize = 0x00;
    pub const IOWIN: usize = 0x10;
    pub const VER: u32 = 0x01;
    pub const REDTBL_BASE: u32 = 0x10;
}

const SVR_ENABLE: u32 = 1 << 8;
const SPURIOUS_VECTOR: u32 = 0xFF;

const TIMER_PERIODIC: u32 = 1 << 17;
const TIMER_DIV_1: u32 = 0b1011;
const TIMER_INITIAL_COUNT: u32 = 60_000_000;
#[allow(clippy::cast_possible_truncation)]
const TIMER_VECTOR: u32 = TIMER as u32;

#[inline]
unsafe fn rdmsr(msr: u32) -> u64 {
    let lo: u32;
    let hi: u32;
    unsafe {
        core::arch::asm!(
            "rdmsr",
            in("ecx") msr,
            out("eax") lo,
            out("edx") hi,
            options(nomem, nostack)
        );
    }
    (u64::from(hi) << 32) | u64::from(lo)
}

#[inline]
#[allow(clippy::cast_possible_truncation)]
unsafe fn wrmsr(msr: u32, val: u64) {
    let lo = (val & 0xFFFF_FFFF) as u32;
    let hi = (val >> 32) as u32;
    unsafe {
        core::arch::asm!(
            "wrmsr",
            in("ecx") msr,
            in("eax") lo,
            in("edx") hi,
            options(nostack)
        );
    }
}

fn lapic() -> Mmio {
    // SAFETY: Mapped by `init` before any caller runs.
    unsafe { Mmio::new(VirtualAddress::new(APIC_BASE)) }
}

fn ioapic_write(reg: u32, value: u32) {
    // SAFETY: Mapped by `init` before any caller runs.
    let io = unsafe { Mmio::new(VirtualAddress::new(IOAPIC_BASE)) };
    io.write(ioapic_reg::IOREGSEL, reg);
    io.write(ioapic_reg::IOWIN, value);
}

fn ioapic_read(reg: u32) -> u32 {
    // SAFETY: Mapped by `init` before any caller runs.
    let io = unsafe { Mmio::new(VirtualAddress::new(IOAPIC_BASE)) };
    io.write(ioapic_reg::IOREGSEL, reg);
    io.read(ioapic_reg::IOWIN)
}

/// Route IRQ `irq` to `vector` on the local APIC with id `apic_id`.
#[allow(clippy::cast_possible_truncation)]
fn route(irq: u32, vector: u64, apic_id: u32) {
    let entry = ioapic_reg::REDTBL_BASE + 2 * irq;
    ioapic_write(entry, vector as u32);
    ioapic_write(entry + 1, apic_id << 24);
}

/// Signal end of interrupt to the local APIC.
pub fn end_of_interrupt() {
    lapic().write(lapic_reg::EOI, 0);
}

/// Enable the local APIC, route the timer and keyboard lines and start the
/// periodic timer.
///
/// # Safety
/// The APIC and IO APIC pages must be mapped, and the IDT must hold gates for
/// [`TIMER`] and [`KEYBOARD`].
pub unsafe fn init() {
    unsafe {
        let base = rdmsr(IA32_APIC_BASE);
        wrmsr(IA32_APIC_BASE, base | APIC_ENABLE);
    }

    let lapic = lapic();
    lapic.write(lapic_reg::SVR, SVR_ENABLE | SPURIOUS_VECTOR);
    let apic_id = lapic.read(lapic_reg::ID) >> 24;
    info!("Local APIC ID: {apic_id:#x}");

    let ver = ioapic_read(ioapic_reg::VER);
    info!("[IOAPIC] Maximum Redirection Entry: {}", ((ver >> 16) & 0xFF) + 1);
    route(0, TIMER, apic_id);
    route(1, KEYBOARD, apic_id);

    lapic.write(lapic_reg::TIMER_ICR, TIMER_INITIAL_COUNT);
    lapic.write(lapic_reg::TIMER_DCR, TIMER_DIV_1);
    lapic.write(lapic_reg::TIMER_LVT, TIMER_PERIODIC | TIMER_VECTOR);
}
