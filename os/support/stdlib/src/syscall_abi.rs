//! Syscalls are `int 34` with the number in `rax` and up to five arguments
//! in `rbx`, `rcx`, `rdx`, `rdi` and `rsi`. The signed result comes back in
//! `rax`; every other register is preserved.

/// Interrupt vector of the syscall gate.
pub const SYSCALL_VECTOR: u64 = 34;

#[repr(u64)]
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Sysno {
    /// Print the NUL-terminated string at `arg1` to the console.
    Puts = 0,
    /// End the calling task. `arg1` is the exit code.
    Exit = 1,
    /// Duplicate the calling task. Returns the child's id to the parent,
    /// `0` to the child and `-1` on failure.
    Fork = 2,
    /// Give up the processor.
    Yield = 3,
}

impl TryFrom<u64> for Sysno {
    /// The number that matched no syscall.
    type Error = u64;

    fn try_from(value: u64) -> Result<Self, Self::Error> {
        Ok(match value {
            0 => Self::Puts,
            1 => Self::Exit,
            2 => Self::Fork,
            3 => Self::Yield,
            n => return Err(n),
        })
    }
}
