use core::fmt;
use kernel_memory_addresses::VirtualAddress;

/// The text console user programs print to.
pub trait Console {
    fn write_bytes(&mut self, bytes: &[u8]);
}

/// Receiver of key presses (set-1 scancodes).
pub trait KeySink {
    fn key_pressed(&mut self, scancode: u8);
}

/// What the dispatcher needs from the machine besides memory.
pub trait Platform: Console + KeySink {
    /// Linear address of the last page fault (CR2).
    fn fault_address(&self) -> VirtualAddress;

    /// Acknowledge the interrupt being handled.
    fn end_of_interrupt(&mut self);

    /// Fetch the pending byte from the keyboard controller.
    fn read_scancode(&mut self) -> u8;
}

/// [`fmt::Write`] over a [`Console`].
pub struct ConsoleWriter<'a, C: ?Sized>(pub &'a mut C);

impl<C: Console + ?Sized> fmt::Write for ConsoleWriter<'_, C> {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        self.0.write_bytes(s.as_bytes());
        Ok(())
    }
}
