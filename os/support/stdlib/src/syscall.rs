use crate::syscall_abi::{SYSCALL_VECTOR, Sysno};
use core::ffi::CStr;

#[inline(always)]
#[allow(clippy::inline_always)]
fn syscall(sysno: Sysno, arg1: u64, arg2: u64, arg3: u64, arg4: u64, arg5: u64) -> i64 {
    let ret: u64;
    unsafe {
        // rbx is reserved by LLVM and cannot be an operand.
        core::arch::asm!(
            "xchg {arg1}, rbx",
            "int {vector}",
            "xchg {arg1}, rbx",
            vector = const SYSCALL_VECTOR,
            arg1 = inout(reg) arg1 => _,
            inlateout("rax") sysno as u64 => ret,
            in("rcx") arg2,
            in("rdx") arg3,
            in("rdi") arg4,
            in("rsi") arg5,
        );
    }
    ret.cast_signed()
}

/// Print `s` on the console.
#[inline]
pub fn sys_puts(s: &CStr) {
    syscall(Sysno::Puts, s.as_ptr() as u64, 0, 0, 0, 0);
}

/// End the calling task with `code`.
#[inline]
pub fn sys_exit(code: i32) -> ! {
    syscall(Sysno::Exit, i64::from(code).cast_unsigned(), 0, 0, 0, 0);
    unreachable!("exit returned")
}

/// Which side of a [`sys_fork`] the caller is on.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Fork {
    /// The original task, with the id of the new child.
    Parent(u64),
    Child,
}

/// Duplicate the calling task. `None` if the kernel could not.
#[inline]
#[must_use]
pub fn sys_fork() -> Option<Fork> {
    match syscall(Sysno::Fork, 0, 0, 0, 0, 0) {
        0 => Some(Fork::Child),
        id if id > 0 => Some(Fork::Parent(id.cast_unsigned())),
        _ => None,
    }
}

#[inline]
pub fn sys_yield() {
    syscall(Sysno::Yield, 0, 0, 0, 0, 0);
}
