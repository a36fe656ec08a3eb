//! # QEMU Debug Console
//!
//! Kernel output goes to QEMU's debug console, I/O port `0x402`:
//!
//! ```text
//! log::info!(..) ─► QemuLogger ─┐
//! sys_puts(..)   ─► console ────┴─► QemuSink ─► port 0x402 ─► -debugcon
//! ```
//!
//! Capture it on the host with:
//!
//! ```bash
//! qemu-system-x86_64 ... -debugcon stdio
//! ```
//!
//! Writes are made with interrupts disabled so that a line is never torn by
//! a trap that logs itself.
//!
//! ## `enabled` Feature (default)
//!
//! Without it, or on any target other than bare metal, the sink discards
//! everything. Formatting still happens, which keeps host builds of the
//! kernel crates honest.
//!
//! ```rust,no_run
//! use kernel_qemu::QemuLogger;
//! use log::{LevelFilter, info};
//!
//! QemuLogger::init(LevelFilter::Debug).ok();
//! info!("Kernel subsystem initialized");
//! ```

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

mod logger;
mod sink;

pub use logger::{QemuLogger, write_record};
pub use sink::{QEMU_DEBUG_PORT, QemuSink};

/// Print to the debug console without going through `log`.
#[macro_export]
macro_rules! qemu_trace {
    ($($arg:tt)*) => {{
        // No allocation: `format_args!` builds a lightweight `Arguments`.
        $crate::QemuSink::write_fmt_irq(core::format_args!($($arg)*));
    }};
}
