//! # Segment Selectors
//!
//! The loader installs a flat GDT with these descriptors; the kernel only
//! ever refers to them by selector.

/// Requested privilege level carried by user selectors.
pub const RPL_USER: u16 = 3;

/// Kernel code segment.
pub const GD_KT: u16 = 0x08;

/// Kernel data segment.
pub const GD_KD: u16 = 0x10;

/// User code segment (DPL 3).
pub const GD_UT: u16 = 0x18;

/// User data segment (DPL 3).
pub const GD_UD: u16 = 0x20;

/// Task state segment descriptor (16 bytes, spans two slots).
pub const GD_TSS: u16 = 0x28;

/// Selector a ring-3 task runs its code with.
pub const USER_CS: u16 = GD_UT | RPL_USER;

/// Selector a ring-3 task runs its data and stack with.
pub const USER_DS: u16 = GD_UD | RPL_USER;
