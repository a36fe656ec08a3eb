use crate::Next;
use crate::platform::Console;
use kernel_info::limits::PUTS_MAX_LEN;
use kernel_info::memory::USER_TOP;
use kernel_memory_addresses::{PAGE_SIZE, VirtualAddress, align_down};
use kernel_task::{MemoryContext, TaskHandle, TaskPool};
use kernel_vmem::{AddressSpace, FrameAlloc, Mmu, PhysMapper, VmemError};
use log::{error, info, warn};
use stdlib::syscall_abi::Sysno;

/// Bytes copied out of user memory per console write.
const CHUNK: usize = 256;

/// Run the syscall in the saved context of `task`.
///
/// # Panics
/// On a syscall number without a meaning.
pub(crate) fn handle<const N: usize, M, A, U, C>(
    tasks: &mut TaskPool<N>,
    mem: &mut MemoryContext<'_, M, A, U>,
    console: &mut C,
    task: TaskHandle,
) -> Next
where
    M: PhysMapper,
    A: FrameAlloc,
    U: Mmu,
    C: Console + ?Sized,
{
    let t = tasks.get(task);
    let id = t.id();
    let gprs = t.context().gprs;
    let sysno = match Sysno::try_from(gprs.rax) {
        Ok(sysno) => sysno,
        Err(n) => panic!("unknown syscall `{n}'"),
    };

    let ret: i64 = match sysno {
        Sysno::Puts => {
            let Some(root) = t.root() else {
                return Next::Schedule;
            };
            if let Err(e) = puts(&mem.space(root), console, gprs.rbx) {
                error!("task [{id}] puts: {e}");
                tasks.destroy(mem, task);
                return Next::Schedule;
            }
            0
        }
        Sysno::Exit => {
            info!("task [{id}] exited with code {}", gprs.rbx.cast_signed());
            tasks.destroy(mem, task);
            return Next::Schedule;
        }
        Sysno::Fork => match tasks.fork(mem, task) {
            Ok(child) => tasks.get(child).id().as_u64().cast_signed(),
            Err(e) => {
                warn!("task [{id}] fork: {e}");
                -1
            }
        },
        Sysno::Yield => {
            tasks.get_mut(task).context_mut().gprs.rax = 0;
            return Next::Schedule;
        }
    };

    tasks.get_mut(task).context_mut().gprs.rax = ret.cast_unsigned();
    Next::Resume(task)
}

/// Copy the NUL-terminated string at `ptr` in `space` to the console.
///
/// At most [`PUTS_MAX_LEN`] bytes are printed. Only user-accessible pages
/// below [`USER_TOP`] are read.
///
/// # Errors
/// [`VmemError::NotMapped`] for the first byte that is not readable from
/// user mode. Text before it has been printed.
pub fn puts<M, C>(space: &AddressSpace<'_, M>, console: &mut C, ptr: u64) -> Result<(), VmemError>
where
    M: PhysMapper,
    C: Console + ?Sized,
{
    let mut buf = [0_u8; CHUNK];
    let mut va = ptr;
    let mut remaining = PUTS_MAX_LEN;
    while remaining > 0 {
        let at = VirtualAddress::new(va);
        let readable = va < USER_TOP
            && space
                .lookup_page(at)
                .is_some_and(|(_, flags)| flags.user_access());
        if !readable {
            return Err(VmemError::NotMapped(at));
        }

        let to_page_end = align_down(va, PAGE_SIZE) + PAGE_SIZE - va;
        let len = usize::try_from(to_page_end)
            .unwrap_or(CHUNK)
            .min(CHUNK)
            .min(remaining);
        let chunk = &mut buf[..len];
        space.read(at, chunk)?;
        if let Some(nul) = chunk.iter().position(|&b| b == 0) {
            console.write_bytes(&chunk[..nul]);
            return Ok(());
        }
        console.write_bytes(chunk);
        va += len as u64;
        remaining -= len;
    }
    Ok(())
}
