//! # Memory Layout

use kernel_memory_addresses::{PAGE_SIZE, PhysicalAddress, VirtualAddress};

/// Base of the direct map: physical address `pa` is visible at `VADDR_BASE + pa`.
pub const VADDR_BASE: u64 = 0xffff_fff8_0000_0000;

/// Where the kernel image and its direct map begin.
///
/// # Kernel Build
/// This information is sourced in the kernel's `build.rs` to configure
/// the linker.
pub const KERNEL_BASE: u64 = VADDR_BASE;

/// Where the loader places the kernel image in *physical* memory.
pub const PHYS_LOAD: u64 = 0x0010_0000; // 1 MiB

/// The boot kernel stack grows down from here.
pub const KERNEL_STACK_TOP: u64 = KERNEL_BASE;

/// Size of the boot kernel stack.
pub const KERNEL_STACK_SIZE: u64 = PAGE_SIZE * 8;

/// Page holding the [`KernelConfig`](crate::boot::KernelConfig) hand-off.
pub const KERNEL_INFO: u64 = KERNEL_STACK_TOP - KERNEL_STACK_SIZE - PAGE_SIZE;

/// Virtual address of the local APIC register page.
pub const APIC_BASE: u64 = KERNEL_INFO - PAGE_SIZE;

/// Virtual address of the IO APIC register page.
pub const IOAPIC_BASE: u64 = APIC_BASE - PAGE_SIZE;

/// Physical address of the local APIC.
pub const APIC_BASE_PA: u64 = 0xFEE0_0000;

/// Physical address of the IO APIC.
pub const IOAPIC_BASE_PA: u64 = 0xFEC0_0000;

/// Stack used when a trap enters ring 0 from ring 3 (TSS `rsp0`).
pub const INTERRUPT_STACK_SIZE: u64 = PAGE_SIZE * 2;

/// Top of the interrupt stack.
pub const INTERRUPT_STACK_TOP: u64 = IOAPIC_BASE;

/// First address above user space. Everything below belongs to the task,
/// everything at or above is the shared kernel mapping.
pub const USER_TOP: u64 = 0x0000_0100_0000_0000; // 1 TiB

/// Scratch page used while copying a copy-on-write page.
pub const USER_TEMP: u64 = 0x0000_0001_0000_0000;

/// User stacks grow down from here; one page is mapped below it.
pub const USER_STACK_TOP: u64 = 0x0000_0000_0a00_0000;

/// Translate a physical address into the kernel's direct map.
#[inline]
#[must_use]
pub const fn phys_to_virt(pa: PhysicalAddress) -> VirtualAddress {
    VirtualAddress::direct_map(VADDR_BASE, pa)
}

const _: () = {
    assert!(KERNEL_STACK_SIZE.is_multiple_of(PAGE_SIZE));
    assert!(USER_TEMP < USER_TOP);
    assert!(USER_STACK_TOP < USER_TEMP);
    assert!(KERNEL_BASE & ((1u64 << 21) - 1) == 0);
    assert!(INTERRUPT_STACK_TOP - INTERRUPT_STACK_SIZE > USER_TOP);
};
