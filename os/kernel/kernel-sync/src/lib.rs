//! # Kernel synchronization primitives
//!
//! The kernel runs on a single CPU. Its shared state (page arena, task pool,
//! page tables) is protected by masking interrupts, not by locks:
//!
//! - [`IrqGuard`] disables interrupts for a scope and restores the previous
//!   state on drop.
//! - [`IrqCell`] owns a value and hands out exclusive access only while an
//!   [`IrqGuard`] is held. A nested borrow is a bug and panics.
//!
//! On bare metal these use `cli` / `sti` / `pushfq`. Host builds keep a
//! per-thread simulated interrupt flag instead so the same code can run under
//! `cargo test`.

#![cfg_attr(target_os = "none", no_std)]
#![allow(unsafe_code)]

mod irq;
mod irq_cell;

pub use irq::{IrqGuard, disable, enable, interrupts_enabled};
pub use irq_cell::{IrqCell, IrqCellGuard};
