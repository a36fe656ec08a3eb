//! # x86 I/O Port Access
//!
//! ```text
//! 0x0021          PIC #1 data (mask register)
//! 0x0060          keyboard controller data
//! 0x00A1          PIC #2 data (mask register)
//! ```

pub const PIC1_DATA: u16 = 0x21;
pub const PIC2_DATA: u16 = 0xA1;
pub const KEYBOARD_DATA: u16 = 0x60;

/// Write one byte to an I/O port.
///
/// # Safety
/// Must run at CPL0, and `port` must be a register of a present device for
/// which `val` is a valid write.
#[inline]
pub unsafe fn outb(port: u16, val: u8) {
    unsafe {
        core::arch::asm!("out dx, al", in("dx") port, in("al") val, options(nomem, nostack, preserves_flags));
    }
}

/// Read one byte from an I/O port.
///
/// # Safety
/// Must run at CPL0, and `port` must be a readable register of a present
/// device.
#[inline]
pub unsafe fn inb(port: u16) -> u8 {
    let v: u8;
    unsafe {
        core::arch::asm!("in al, dx", in("dx") port, out("al") v, options(nomem, nostack, preserves_flags));
    }
    v
}

/// Mask every line of both legacy PICs; interrupts arrive through the IO APIC.
pub fn mask_pic() {
    unsafe {
        outb(PIC1_DATA, 0xff);
        outb(PIC2_DATA, 0xff);
    }
}
