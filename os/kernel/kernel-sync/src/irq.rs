#[cfg(target_os = "none")]
mod arch {
    /// Bit 9 of `RFLAGS`: maskable interrupts enabled.
    const RFLAGS_IF: u64 = 1 << 9;

    #[inline]
    pub fn disable() {
        unsafe { core::arch::asm!("cli", options(nomem, nostack, preserves_flags)) }
    }

    #[inline]
    pub fn enable() {
        unsafe { core::arch::asm!("sti", options(nomem, nostack, preserves_flags)) }
    }

    #[inline]
    pub fn interrupts_enabled() -> bool {
        let r: u64;
        unsafe { core::arch::asm!("pushfq; pop {}", out(reg) r, options(nostack, preserves_flags)) }
        r & RFLAGS_IF != 0
    }
}

#[cfg(not(target_os = "none"))]
mod arch {
    use core::cell::Cell;

    std::thread_local! {
        static IF: Cell<bool> = const { Cell::new(true) };
    }

    pub fn disable() {
        IF.with(|f| f.set(false));
    }

    pub fn enable() {
        IF.with(|f| f.set(true));
    }

    pub fn interrupts_enabled() -> bool {
        IF.with(Cell::get)
    }
}

/// Disables maskable interrupts (`cli`).
///
/// # Privilege
///
/// Ring 0 only.
#[inline]
pub fn disable() {
    arch::disable();
}

/// Enables maskable interrupts (`sti`).
///
/// # Privilege
///
/// Ring 0 only. Typically used to restore a previously disabled state.
#[inline]
pub fn enable() {
    arch::enable();
}

/// Whether the `IF` flag is currently set.
#[inline]
#[must_use]
pub fn interrupts_enabled() -> bool {
    arch::interrupts_enabled()
}

/// RAII guard that disables interrupts on creation and restores them on drop.
///
/// `IrqGuard::new()` snapshots the `IF` bit. If interrupts were enabled, it
/// executes `cli`. On drop, it executes `sti` **only** if they were
/// previously enabled, so guards nest.
///
/// ```
/// use kernel_sync::{IrqGuard, interrupts_enabled};
///
/// let before = interrupts_enabled();
/// {
///     let _g = IrqGuard::new();
///     assert!(!interrupts_enabled());
/// }
/// assert_eq!(interrupts_enabled(), before);
/// ```
pub struct IrqGuard {
    /// Whether interrupts were enabled (IF=1) when the guard was created.
    were_enabled: bool,
}

impl Default for IrqGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl IrqGuard {
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        let enabled = interrupts_enabled();
        if enabled {
            disable();
        }
        Self {
            were_enabled: enabled,
        }
    }

    /// Whether dropping this guard re-enables interrupts.
    #[inline]
    #[must_use]
    pub const fn restores(&self) -> bool {
        self.were_enabled
    }
}

impl Drop for IrqGuard {
    fn drop(&mut self) {
        if self.were_enabled {
            enable();
        }
    }
}
