#![allow(dead_code)]

use kernel_memory_addresses::VirtualAddress;
use kernel_task::{MemoryContext, TaskContext, TaskHandle, TaskPool};
use kernel_trap::{Console, KeySink, Platform};
use kernel_vmem::FrameAlloc;
use kernel_vmem::sim::{SimFrames, SimMmu, SimPhys};

pub type Memory<'p> = MemoryContext<'p, SimPhys, SimFrames, SimMmu>;

pub const ENTRY: u64 = 0x40_1000;
pub const DATA: u64 = 0x60_0000;

pub fn memory(phys: &SimPhys) -> Memory<'_> {
    let mut frames = SimFrames::new(phys.frame_count());
    let kernel_root = frames.alloc_frame().unwrap();
    frames.incref(kernel_root);
    MemoryContext::new(phys, frames, SimMmu::new(kernel_root), kernel_root)
}

/// An executable with a text page at [`ENTRY`] and `data` at [`DATA`].
pub fn program(data: &[u8]) -> Vec<u8> {
    let segments: [(u64, &[u8], u64); 2] = [(ENTRY, b"\xcd\x22", 0x1000), (DATA, data, 0x2000)];
    let mut out = vec![0_u8; 64];
    out[0..4].copy_from_slice(b"\x7FELF");
    out[4] = 2;
    out[5] = 1;
    out[24..32].copy_from_slice(&ENTRY.to_le_bytes());
    out[32..40].copy_from_slice(&64_u64.to_le_bytes());
    out[54..56].copy_from_slice(&56_u16.to_le_bytes());
    out[56..58].copy_from_slice(&2_u16.to_le_bytes());

    let mut payload_at = 64 + 2 * 56_u64;
    for (va, bytes, mem_size) in segments {
        let mut ph = [0_u8; 56];
        ph[0..4].copy_from_slice(&1_u32.to_le_bytes());
        ph[8..16].copy_from_slice(&payload_at.to_le_bytes());
        ph[16..24].copy_from_slice(&va.to_le_bytes());
        ph[32..40].copy_from_slice(&(bytes.len() as u64).to_le_bytes());
        ph[40..48].copy_from_slice(&mem_size.to_le_bytes());
        out.extend_from_slice(&ph);
        payload_at += bytes.len() as u64;
    }
    for (_, bytes, _) in segments {
        out.extend_from_slice(bytes);
    }
    out
}

/// Records everything the dispatcher asks of the machine.
#[derive(Default)]
pub struct Recorder {
    pub console: Vec<u8>,
    pub keys: Vec<u8>,
    pub eois: usize,
    pub scancode: u8,
    pub cr2: u64,
}

impl Recorder {
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.console).into_owned()
    }
}

impl Console for Recorder {
    fn write_bytes(&mut self, bytes: &[u8]) {
        self.console.extend_from_slice(bytes);
    }
}

impl KeySink for Recorder {
    fn key_pressed(&mut self, scancode: u8) {
        self.keys.push(scancode);
    }
}

impl Platform for Recorder {
    fn fault_address(&self) -> VirtualAddress {
        VirtualAddress::new(self.cr2)
    }

    fn end_of_interrupt(&mut self) {
        self.eois += 1;
    }

    fn read_scancode(&mut self) -> u8 {
        self.scancode
    }
}

/// The frame a trap with `vector` would save for `task`, as the stub
/// leaves it.
pub fn trap<const N: usize>(pool: &TaskPool<N>, task: TaskHandle, vector: u64) -> TaskContext {
    TaskContext {
        interrupt_number: vector,
        ..*pool.get(task).context()
    }
}

/// A syscall frame for `task` with `sysno` in `rax` and `arg1` in `rbx`.
pub fn syscall<const N: usize>(
    pool: &TaskPool<N>,
    task: TaskHandle,
    sysno: u64,
    arg1: u64,
) -> TaskContext {
    let mut frame = trap(pool, task, kernel_trap::vector::SYSCALL);
    frame.gprs.rax = sysno;
    frame.gprs.rbx = arg1;
    frame.rip += 2;
    frame
}
