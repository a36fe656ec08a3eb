use kernel_info::memory;
use std::{env, path::PathBuf};

fn main() {
    let manifest_dir = PathBuf::from(env::var("CARGO_MANIFEST_DIR").unwrap());
    let ld = manifest_dir.join("kernel.ld");

    let kernel_base = memory::KERNEL_BASE;
    let phys_load = memory::PHYS_LOAD;
    assert_eq!(
        kernel_base & ((1u64 << 21) - 1),
        0,
        "KERNEL_BASE must be 2 MiB aligned (got {kernel_base:#x})"
    );
    assert_eq!(
        phys_load & 0xfff,
        0,
        "PHYS_LOAD must be 4 KiB aligned (got {phys_load:#x})"
    );

    println!("cargo:rerun-if-changed={}", ld.display());
    println!("cargo:rustc-link-arg-bins=-T{}", ld.display());
    println!("cargo:rustc-link-arg-bins=--defsym=KERNEL_BASE={kernel_base:#x}");
    println!("cargo:rustc-link-arg-bins=--defsym=PHYS_LOAD={phys_load:#x}");

    // The init program is linked into the kernel image. Build it first, or
    // point INIT_ELF at a prebuilt binary.
    println!("cargo:rerun-if-env-changed=INIT_ELF");
    let init = env::var("INIT_ELF").map_or_else(
        |_| {
            manifest_dir
                .join("../../../target/x86_64-unknown-none/release/init")
                .display()
                .to_string()
        },
        |path| path,
    );
    println!("cargo:rerun-if-changed={init}");
    println!("cargo:rustc-env=INIT_ELF={init}");
}
