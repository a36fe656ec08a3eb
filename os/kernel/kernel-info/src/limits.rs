//! # Pool Capacities

/// Maximum number of tasks alive at once.
pub const TASK_MAX_CNT: usize = 1024;

/// Capacity of a task name in bytes, including the NUL terminator.
pub const TASK_NAME_LEN: usize = 32;

/// Longest string accepted by the `puts` syscall.
pub const PUTS_MAX_LEN: usize = 4096;
