//! The `init` user program, linked into the kernel image as raw ELF bytes.
//!
//! `build.rs` exports the path of the built program as `INIT_ELF`.

core::arch::global_asm!(concat!(
    ".section .rodata.init_elf,\"a\",@progbits\n",
    ".balign 16\n",
    ".globl _init_elf_start\n",
    "_init_elf_start:\n",
    ".incbin \"",
    env!("INIT_ELF"),
    "\"\n",
    ".globl _init_elf_end\n",
    "_init_elf_end:\n",
    ".previous\n",
));

unsafe extern "C" {
    static _init_elf_start: u8;
    static _init_elf_end: u8;
}

/// The embedded ELF image of `init`.
#[inline]
#[must_use]
pub fn bytes() -> &'static [u8] {
    let start = &raw const _init_elf_start;
    let len = (&raw const _init_elf_end).addr() - start.addr();
    // SAFETY: Both symbols bracket the `.incbin` block in `.rodata`.
    unsafe { core::slice::from_raw_parts(start, len) }
}
