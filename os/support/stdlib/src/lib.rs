//! # User-space Support
//!
//! - `syscall-abi`: the [`Sysno`](syscall_abi::Sysno) numbering and
//!   register convention shared by the kernel and user programs.
//! - `syscall`: the `int 34` wrappers.
//! - `stdlib`: `print!` / `println!` over `puts` and a panic handler that
//!   exits the task.

#![cfg_attr(not(test), no_std)]
#![cfg_attr(not(feature = "syscall"), forbid(unsafe_code))]
#![cfg_attr(feature = "syscall", allow(unsafe_code))]

#[cfg(feature = "stdlib")]
#[macro_use]
pub mod stdlib;

#[cfg(feature = "syscall")]
pub mod syscall;

#[cfg(feature = "syscall-abi")]
pub mod syscall_abi;

#[cfg(feature = "stdlib")]
pub use stdlib::*;

#[cfg(all(feature = "stdlib", target_os = "none"))]
mod panic {
    use crate::syscall::sys_exit;

    #[panic_handler]
    fn panic(info: &core::panic::PanicInfo) -> ! {
        crate::println!("{info}");
        sys_exit(-1)
    }
}
