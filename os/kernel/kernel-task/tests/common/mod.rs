#![allow(dead_code)]

use kernel_memory_addresses::{PhysicalPage, VirtualAddress};
use kernel_task::{MemoryContext, TaskHandle, TaskPool};
use kernel_vmem::FrameAlloc;
use kernel_vmem::sim::{SimFrames, SimMmu, SimPhys};

pub type Memory<'p> = MemoryContext<'p, SimPhys, SimFrames, SimMmu>;

pub const ENTRY: u64 = 0x40_1000;

/// Frame 0 becomes the kernel root and is loaded.
pub fn memory(phys: &SimPhys) -> Memory<'_> {
    let mut frames = SimFrames::new(phys.frame_count());
    let kernel_root = frames.alloc_frame().unwrap();
    frames.incref(kernel_root);
    MemoryContext::new(phys, frames, SimMmu::new(kernel_root), kernel_root)
}

/// A loadable segment for [`elf`]: address, file bytes, size in memory.
pub struct Load<'a> {
    pub va: u64,
    pub data: &'a [u8],
    pub mem_size: u64,
}

/// A minimal ELF64 executable with one `PT_LOAD` per entry of `loads`.
pub fn elf(entry: u64, loads: &[Load<'_>]) -> Vec<u8> {
    let phoff = 64_u64;
    let phnum = u16::try_from(loads.len()).unwrap();
    let mut payload_at = phoff + 56 * u64::from(phnum);

    let mut out = vec![0_u8; 64];
    out[0..4].copy_from_slice(b"\x7FELF");
    out[4] = 2;
    out[5] = 1;
    out[6] = 1;
    out[16..18].copy_from_slice(&2_u16.to_le_bytes());
    out[18..20].copy_from_slice(&0x3e_u16.to_le_bytes());
    out[24..32].copy_from_slice(&entry.to_le_bytes());
    out[32..40].copy_from_slice(&phoff.to_le_bytes());
    out[52..54].copy_from_slice(&64_u16.to_le_bytes());
    out[54..56].copy_from_slice(&56_u16.to_le_bytes());
    out[56..58].copy_from_slice(&phnum.to_le_bytes());

    for load in loads {
        let mut ph = [0_u8; 56];
        ph[0..4].copy_from_slice(&1_u32.to_le_bytes());
        ph[4..8].copy_from_slice(&0b111_u32.to_le_bytes());
        ph[8..16].copy_from_slice(&payload_at.to_le_bytes());
        ph[16..24].copy_from_slice(&load.va.to_le_bytes());
        ph[24..32].copy_from_slice(&load.va.to_le_bytes());
        ph[32..40].copy_from_slice(&(load.data.len() as u64).to_le_bytes());
        ph[40..48].copy_from_slice(&load.mem_size.to_le_bytes());
        ph[48..56].copy_from_slice(&0x1000_u64.to_le_bytes());
        out.extend_from_slice(&ph);
        payload_at += load.data.len() as u64;
    }
    for load in loads {
        out.extend_from_slice(load.data);
    }
    out
}

/// One text page with `code` at [`ENTRY`] and two pages of memory behind it.
pub fn program(code: &[u8]) -> Vec<u8> {
    elf(
        ENTRY,
        &[Load {
            va: ENTRY,
            data: code,
            mem_size: 0x2000,
        }],
    )
}

pub fn root_of<const N: usize>(pool: &TaskPool<N>, task: TaskHandle) -> PhysicalPage {
    pool.get(task).root().unwrap()
}

/// Read `len` bytes from the task's address space.
pub fn peek<const N: usize>(
    mem: &Memory<'_>,
    pool: &TaskPool<N>,
    task: TaskHandle,
    va: u64,
    len: usize,
) -> Vec<u8> {
    let mut buf = vec![0; len];
    mem.space(root_of(pool, task))
        .read(VirtualAddress::new(va), &mut buf)
        .unwrap();
    buf
}
