use crate::context::TaskContext;
use core::fmt;
use kernel_info::limits::TASK_NAME_LEN;
use kernel_memory_addresses::PhysicalPage;

/// Identity of a task. Ids grow monotonically and are never reused.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct TaskId(u64);

impl TaskId {
    #[inline]
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    #[inline]
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// Slot of a task in its pool.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct TaskHandle(pub(crate) usize);

impl TaskHandle {
    #[inline]
    #[must_use]
    pub const fn slot(self) -> usize {
        self.0
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum TaskState {
    /// The slot is unused.
    Free,
    /// Created but not yet released to the scheduler.
    DontRun,
    Ready,
    Running,
    /// Parked; the scheduler and the task list pass over it.
    Blocked,
}

/// Who a task runs as, fixed when the task is created.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Owner {
    Kernel,
    User,
}

impl fmt::Display for Owner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(match self {
            Self::Kernel => "kernel",
            Self::User => "user",
        })
    }
}

/// A NUL-padded task name.
#[derive(Copy, Clone, Eq, PartialEq)]
pub struct TaskName([u8; TASK_NAME_LEN]);

impl TaskName {
    pub const EMPTY: Self = Self([0; TASK_NAME_LEN]);

    /// Store `name`, cut at a character boundary so that a terminating NUL
    /// always fits.
    #[must_use]
    pub fn new(name: &str) -> Self {
        let mut end = name.len().min(TASK_NAME_LEN - 1);
        while !name.is_char_boundary(end) {
            end -= 1;
        }
        let mut bytes = [0; TASK_NAME_LEN];
        bytes[..end].copy_from_slice(&name.as_bytes()[..end]);
        Self(bytes)
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        let len = self.0.iter().position(|&b| b == 0).unwrap_or(TASK_NAME_LEN);
        core::str::from_utf8(&self.0[..len]).unwrap_or_default()
    }
}

impl fmt::Debug for TaskName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self.as_str(), f)
    }
}

impl fmt::Display for TaskName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// One schedulable unit of execution.
#[derive(Debug)]
pub struct Task {
    pub(crate) id: TaskId,
    pub(crate) name: TaskName,
    pub(crate) state: TaskState,
    pub(crate) context: TaskContext,
    pub(crate) owner: Owner,
    /// PML4 of the task's address space. `None` while the slot is free.
    pub(crate) root: Option<PhysicalPage>,
    /// Next slot on the pool's free list.
    pub(crate) next_free: Option<usize>,
}

impl Task {
    pub(crate) const FREE: Self = Self {
        id: TaskId(0),
        name: TaskName::EMPTY,
        state: TaskState::Free,
        context: TaskContext::EMPTY,
        owner: Owner::Kernel,
        root: None,
        next_free: None,
    };

    #[inline]
    #[must_use]
    pub const fn id(&self) -> TaskId {
        self.id
    }

    #[inline]
    #[must_use]
    pub const fn name(&self) -> &TaskName {
        &self.name
    }

    #[inline]
    #[must_use]
    pub const fn state(&self) -> TaskState {
        self.state
    }

    #[inline]
    #[must_use]
    pub const fn context(&self) -> &TaskContext {
        &self.context
    }

    #[inline]
    pub const fn context_mut(&mut self) -> &mut TaskContext {
        &mut self.context
    }

    #[inline]
    #[must_use]
    pub const fn root(&self) -> Option<PhysicalPage> {
        self.root
    }

    #[inline]
    #[must_use]
    pub const fn owner(&self) -> Owner {
        self.owner
    }

    #[must_use]
    pub const fn info(&self) -> TaskInfo {
        TaskInfo {
            id: self.id,
            name: self.name,
            owner: self.owner(),
            state: self.state,
        }
    }
}

/// A snapshot of one live task, as shown by the task list.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct TaskInfo {
    pub id: TaskId,
    pub name: TaskName,
    pub owner: Owner,
    pub state: TaskState,
}

impl fmt::Display for TaskInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "  {:<12} {:<14} {}", self.id, self.name, self.owner)
    }
}
