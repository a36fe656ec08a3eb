//! # Kernel Configuration and Boot Interface
//!
//! Constants and ABI structures shared between the loader, the kernel and its
//! subsystems.
//!
//! - [`memory`] fixes the virtual memory layout: the user/kernel boundary,
//!   the direct map of physical memory, fixed stacks and MMIO windows.
//! - [`boot`] describes the hand-off blob the loader leaves at
//!   [`memory::KERNEL_INFO`] before jumping into the kernel.
//! - [`gdt`] names the segment selectors of the loader's descriptor table.
//! - [`limits`] holds the compile-time capacities of the kernel's pools.
//!
//! ```text
//! 0x0000_0000_0000_0000 ┌───────────────────────────────┐
//!                       │ user image, stack             │
//! USER_STACK_TOP        ├───────────────────────────────┤ 0x0000_0000_0a00_0000
//!                       │                               │
//! USER_TEMP             ├───────────────────────────────┤ 0x0000_0001_0000_0000
//!                       │ (scratch page for COW copies) │
//! USER_TOP              ├───────────────────────────────┤ 0x0000_0100_0000_0000
//!                       │        non-canonical /        │
//!                       │        unused                 │
//! EXCEPTION_STACK_TOP   ├───────────────────────────────┤
//! INTERRUPT_STACK_TOP   ├───────────────────────────────┤
//! IOAPIC_BASE           ├───────────────────────────────┤
//! APIC_BASE             ├───────────────────────────────┤
//! KERNEL_INFO           ├───────────────────────────────┤ boot hand-off page
//!                       │ kernel stack                  │
//! KERNEL_BASE           ├───────────────────────────────┤ 0xFFFF_FFF8_0000_0000
//!                       │ direct map of physical memory │
//! 0xFFFF_FFFF_FFFF_FFFF └───────────────────────────────┘
//! ```

#![cfg_attr(not(any(test, doctest)), no_std)]
#![deny(unsafe_code)]

pub mod boot;
pub mod gdt;
pub mod limits;
pub mod memory;
