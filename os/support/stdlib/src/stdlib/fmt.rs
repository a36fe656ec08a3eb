use crate::syscall::sys_puts;
use core::ffi::CStr;
use core::fmt::{self, Write};

/// Bytes sent per `puts`, leaving room for the terminator.
const CHUNK: usize = 127;

/// A [`Write`] sink that hands text to the kernel in NUL-terminated chunks.
///
/// Text past an embedded NUL in a chunk is not printed.
pub struct SyscallSink;

impl Write for SyscallSink {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        let mut buf = [0_u8; CHUNK + 1];
        for chunk in s.as_bytes().chunks(CHUNK) {
            buf[..chunk.len()].copy_from_slice(chunk);
            buf[chunk.len()] = 0;
            let text = CStr::from_bytes_until_nul(&buf).map_err(|_| fmt::Error)?;
            sys_puts(text);
        }
        Ok(())
    }
}

#[doc(hidden)]
#[inline(always)]
#[allow(clippy::inline_always)]
pub fn syscall_write(args: fmt::Arguments) {
    // Ignore errors; the console is best-effort.
    fmt::write(&mut SyscallSink, args).ok();
}

#[macro_export]
macro_rules! print {
    ($($arg:tt)*) => {{
        $crate::stdlib::fmt::syscall_write(core::format_args!($($arg)*));
    }};
}

#[macro_export]
macro_rules! println {
    () => {
        $crate::print!("\n")
    };
    ($($arg:tt)*) => {{
        $crate::stdlib::fmt::syscall_write(core::format_args!($($arg)*));
        $crate::stdlib::fmt::syscall_write(core::format_args!("\n"));
    }};
}
