mod common;

use common::{ENTRY, Load, elf, memory, peek, program, root_of};
use kernel_info::gdt::{GD_KT, USER_CS, USER_DS};
use kernel_info::memory::USER_STACK_TOP;
use kernel_memory_addresses::VirtualAddress;
use kernel_task::{
    ElfError, Owner, RFLAGS_IF, TaskContext, TaskError, TaskId, TaskPool, TaskState, ThreadStart,
};
use kernel_vmem::sim::SimPhys;
use kernel_vmem::{Mmu, VmemError};

#[test]
fn spawn_loads_segments_and_a_stack() {
    let phys = SimPhys::new(32);
    let mut mem = memory(&phys);
    let mut pool = TaskPool::<4>::new();

    let task = pool.spawn(&mut mem, "hello", &program(b"code")).unwrap();
    let t = pool.get(task);
    assert_eq!(t.state(), TaskState::Ready);
    assert_eq!(t.id(), TaskId::new(1));
    assert_eq!(t.owner(), Owner::User);

    let ctx = t.context();
    assert_eq!(ctx.rip, ENTRY);
    assert_eq!(ctx.rsp, USER_STACK_TOP);
    assert_eq!(ctx.cs, u64::from(USER_CS));
    assert_eq!(ctx.ss, u64::from(USER_DS));
    assert_eq!(ctx.segments.ds(), USER_DS);
    assert_ne!(ctx.rflags & RFLAGS_IF, 0);

    assert_eq!(peek(&mem, &pool, task, ENTRY, 4), b"code");
    assert!(peek(&mem, &pool, task, ENTRY + 4, 0x1ffc).iter().all(|&b| b == 0));

    let space = mem.space(root_of(&pool, task));
    let (_, stack) = space
        .lookup_page(VirtualAddress::new(USER_STACK_TOP - 0x1000))
        .unwrap();
    assert!(stack.user_access() && stack.writable());
    assert!(space.lookup_page(VirtualAddress::new(USER_STACK_TOP)).is_none());

    // The kernel root stays loaded across the build.
    assert_eq!(mem.mmu.active_root(), mem.kernel_root);
}

#[test]
fn bss_is_zeroed_and_shared_pages_are_reused() {
    let phys = SimPhys::new(32);
    // Dirty every frame so that missing zeroing shows.
    for i in 1..32_u64 {
        phys.write(kernel_memory_addresses::PhysicalAddress::new(i * 0x1000), &[0xAA; 0x1000]);
    }
    let mut mem = memory(&phys);
    let mut pool = TaskPool::<4>::new();

    let image = elf(
        ENTRY,
        &[
            Load {
                va: ENTRY,
                data: b"text",
                mem_size: 4,
            },
            Load {
                va: ENTRY + 0x800,
                data: b"data",
                mem_size: 0x10,
            },
        ],
    );
    let task = pool.spawn(&mut mem, "bss", &image).unwrap();
    assert_eq!(peek(&mem, &pool, task, ENTRY, 4), b"text");
    assert_eq!(peek(&mem, &pool, task, ENTRY + 0x800, 4), b"data");
    assert_eq!(peek(&mem, &pool, task, ENTRY + 0x804, 12), [0; 12]);
    assert_eq!(peek(&mem, &pool, task, ENTRY + 0x10, 16), [0; 16]);
    assert_eq!(peek(&mem, &pool, task, USER_STACK_TOP - 8, 8), [0; 8]);
}

#[test]
fn bad_image_leaves_nothing_behind() {
    let phys = SimPhys::new(32);
    let mut mem = memory(&phys);
    let mut pool = TaskPool::<4>::new();
    let free = mem.frames.free_count();

    let err = pool.spawn(&mut mem, "junk", b"junk not an elf").unwrap_err();
    assert_eq!(err, TaskError::Elf(ElfError::BadMagic));
    assert_eq!(pool.live_count(), 0);
    assert_eq!(mem.frames.free_count(), free);
}

#[test]
fn pool_exhaustion_is_reported() {
    let phys = SimPhys::new(64);
    let mut mem = memory(&phys);
    let mut pool = TaskPool::<2>::new();
    let image = program(b"code");

    pool.spawn(&mut mem, "a", &image).unwrap();
    pool.spawn(&mut mem, "b", &image).unwrap();
    let free = mem.frames.free_count();
    assert_eq!(pool.spawn(&mut mem, "c", &image).unwrap_err(), TaskError::PoolExhausted);
    assert_eq!(mem.frames.free_count(), free);
}

#[test]
fn memory_exhaustion_rolls_back() {
    // Root, three tables and two text pages fit; the stack's table does not.
    let phys = SimPhys::new(7);
    let mut mem = memory(&phys);
    let mut pool = TaskPool::<2>::new();

    let err = pool.spawn(&mut mem, "big", &program(b"code")).unwrap_err();
    assert_eq!(err, TaskError::Memory(VmemError::OutOfMemory));
    assert_eq!(pool.live_count(), 0);
    assert_eq!(mem.frames.free_count(), 6);
}

#[test]
fn destroy_returns_every_frame_and_ids_are_not_reused() {
    let phys = SimPhys::new(32);
    let mut mem = memory(&phys);
    let mut pool = TaskPool::<4>::new();
    let free = mem.frames.free_count();

    let first = pool.spawn(&mut mem, "first", &program(b"code")).unwrap();
    assert!(mem.frames.free_count() < free);
    pool.destroy(&mut mem, first);
    assert_eq!(pool.get(first).state(), TaskState::Free);
    assert_eq!(mem.frames.free_count(), free);

    let second = pool.spawn(&mut mem, "second", &program(b"code")).unwrap();
    assert_eq!(second.slot(), first.slot());
    assert_eq!(pool.get(second).id(), TaskId::new(2));
    assert_eq!(pool.find(TaskId::new(1)), None);
}

#[test]
fn destroying_the_running_task_falls_back_to_the_kernel_root() {
    let phys = SimPhys::new(32);
    let mut mem = memory(&phys);
    let mut pool = TaskPool::<4>::new();
    let a = pool.spawn(&mut mem, "a", &program(b"a")).unwrap();
    let b = pool.spawn(&mut mem, "b", &program(b"b")).unwrap();

    pool.run(&mut mem.mmu, a);
    pool.destroy(&mut mem, b);
    assert_eq!(mem.mmu.active_root(), root_of(&pool, a));
    assert_eq!(pool.current(), Some(a));

    pool.destroy(&mut mem, a);
    assert_eq!(mem.mmu.active_root(), mem.kernel_root);
    assert_eq!(pool.current(), None);
}

#[test]
fn threads_wait_for_thread_run() {
    let phys = SimPhys::new(32);
    let mut mem = memory(&phys);
    let mut pool = TaskPool::<4>::new();
    let start = ThreadStart {
        entry: 0xffff_8000_0010_0000,
        arg: 7,
        on_return: 0xffff_8000_0010_0400,
    };

    let thread = pool.create_thread(&mut mem, "worker", start).unwrap();
    let t = pool.get(thread);
    assert_eq!(t.state(), TaskState::DontRun);
    assert_eq!(t.owner(), Owner::Kernel);
    assert_eq!(t.context().cs, u64::from(GD_KT));
    assert_eq!(t.context().rip, start.entry);
    assert_eq!(t.context().gprs.rdi, 7);
    assert_eq!(t.context().rsp, USER_STACK_TOP - 8);
    assert_eq!(
        peek(&mem, &pool, thread, USER_STACK_TOP - 8, 8),
        start.on_return.to_le_bytes()
    );

    let space = mem.space(root_of(&pool, thread));
    let (_, stack) = space
        .lookup_page(VirtualAddress::new(USER_STACK_TOP - 0x1000))
        .unwrap();
    assert!(!stack.user_access());

    assert!(pool.schedule(&mut mem.mmu).is_err());
    pool.thread_run(thread).unwrap();
    assert_eq!(pool.get(thread).state(), TaskState::Ready);
    assert_eq!(
        pool.thread_run(thread).unwrap_err(),
        TaskError::WrongState(TaskState::Ready)
    );
}

#[test]
fn kill_only_reaches_live_user_tasks() {
    let phys = SimPhys::new(48);
    let mut mem = memory(&phys);
    let mut pool = TaskPool::<4>::new();
    let user = pool.spawn(&mut mem, "user", &program(b"code")).unwrap();
    let start = ThreadStart {
        entry: 0xffff_8000_0010_0000,
        arg: 0,
        on_return: 0,
    };
    let thread = pool.create_thread(&mut mem, "kthread", start).unwrap();

    let user_id = pool.get(user).id();
    let thread_id = pool.get(thread).id();
    assert_eq!(
        pool.kill(&mut mem, thread_id).unwrap_err(),
        TaskError::KernelThread(thread_id)
    );
    pool.kill(&mut mem, user_id).unwrap();
    assert_eq!(
        pool.kill(&mut mem, user_id).unwrap_err(),
        TaskError::NoSuchTask(user_id)
    );
    assert_eq!(pool.live_count(), 1);
}

#[test]
fn kill_goes_by_the_owner_recorded_at_creation() {
    let phys = SimPhys::new(64);
    let mut mem = memory(&phys);
    let mut pool = TaskPool::<4>::new();
    let user = pool.spawn(&mut mem, "user", &program(b"code")).unwrap();
    let child = pool.fork(&mut mem, user).unwrap();
    assert_eq!(pool.get(child).owner(), Owner::User);

    // A clobbered saved `cs` does not turn the task into a kernel thread.
    pool.get_mut(user).context_mut().cs = 0;
    assert_eq!(pool.get(user).owner(), Owner::User);
    let user_id = pool.get(user).id();
    pool.kill(&mut mem, user_id).unwrap();

    let child_id = pool.get(child).id();
    pool.kill(&mut mem, child_id).unwrap();
    assert_eq!(pool.live_count(), 0);
}

#[test]
fn list_skips_tasks_not_yet_released() {
    let phys = SimPhys::new(48);
    let mut mem = memory(&phys);
    let mut pool = TaskPool::<4>::new();
    let start = ThreadStart {
        entry: 0xffff_8000_0010_0000,
        arg: 0,
        on_return: 0,
    };
    let thread = pool.create_thread(&mut mem, "kthread", start).unwrap();
    pool.spawn(&mut mem, "user", &program(b"code")).unwrap();

    let names: Vec<_> = pool.list().map(|info| info.name.as_str().to_owned()).collect();
    assert_eq!(names, ["user"]);

    pool.thread_run(thread).unwrap();
    let owners: Vec<_> = pool.list().map(|info| info.owner).collect();
    assert_eq!(owners, [Owner::Kernel, Owner::User]);
}

#[test]
fn list_shows_live_tasks_in_slot_order() {
    let phys = SimPhys::new(48);
    let mut mem = memory(&phys);
    let mut pool = TaskPool::<4>::new();
    let a = pool.spawn(&mut mem, "a", &program(b"a")).unwrap();
    pool.spawn(&mut mem, "b", &program(b"b")).unwrap();
    pool.destroy(&mut mem, a);
    pool.spawn(&mut mem, "c", &program(b"c")).unwrap();

    let names: Vec<_> = pool.list().map(|info| info.name.as_str().to_owned()).collect();
    assert_eq!(names, ["c", "b"]);
    let ids: Vec<_> = pool.list().map(|info| info.id.as_u64()).collect();
    assert_eq!(ids, [3, 2]);
}

#[test]
fn frames_without_a_current_task_belong_to_the_bootstrap_context() {
    let phys = SimPhys::new(32);
    let mut mem = memory(&phys);
    let mut pool = TaskPool::<4>::new();
    let frame = TaskContext {
        rip: 0xffff_8000_0000_1234,
        interrupt_number: 3,
        ..TaskContext::EMPTY
    };

    assert_eq!(pool.save_context(&frame), None);
    assert_eq!(pool.bootstrap_context().rip, frame.rip);

    let task = pool.spawn(&mut mem, "t", &program(b"code")).unwrap();
    pool.run(&mut mem.mmu, task);
    assert_eq!(pool.get(task).state(), TaskState::Running);
    let frame = TaskContext {
        rip: ENTRY + 2,
        ..*pool.get(task).context()
    };
    assert_eq!(pool.save_context(&frame), Some(task));
    assert_eq!(pool.get(task).state(), TaskState::Ready);
    assert_eq!(pool.get(task).context().rip, ENTRY + 2);
    assert_eq!(pool.bootstrap_context().interrupt_number, 3);
}
