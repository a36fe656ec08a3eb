use core::fmt::{self, Write};
use kernel_sync::IrqGuard;

/// The port number for QEMU's debug console.
pub const QEMU_DEBUG_PORT: u16 = 0x402;

#[cfg(all(feature = "enabled", target_os = "none"))]
#[inline]
fn putc(c: u8) {
    unsafe {
        core::arch::asm!(
            "out dx, al",
            in("dx") QEMU_DEBUG_PORT,
            in("al") c,
            options(nomem, nostack, preserves_flags)
        );
    }
}

#[cfg(not(all(feature = "enabled", target_os = "none")))]
#[inline]
const fn putc(_: u8) {}

/// Byte sink over the debug port.
#[derive(Copy, Clone, Debug, Default)]
pub struct QemuSink;

impl QemuSink {
    /// Write raw bytes, as the `puts` syscall hands them over.
    #[inline]
    pub fn write_bytes(&mut self, bytes: &[u8]) {
        let _irq = IrqGuard::new();
        for &b in bytes {
            putc(b);
        }
    }

    /// Format `args` with interrupts disabled. Errors are ignored; this is
    /// best-effort debug output.
    #[inline]
    pub fn write_fmt_irq(args: fmt::Arguments<'_>) {
        let _irq = IrqGuard::new();
        let _ = Self.write_fmt(args);
    }
}

impl Write for QemuSink {
    #[inline]
    fn write_str(&mut self, s: &str) -> fmt::Result {
        for b in s.bytes() {
            putc(b);
        }
        Ok(())
    }
}
