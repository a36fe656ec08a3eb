use bitfield_struct::bitfield;
use core::fmt;

/// Page-fault error code layout (x86-64).
///
/// Reference: Intel SDM Vol. 3A, §6.15 "Page-Fault Exception (#PF)".
#[bitfield(u64)]
#[derive(Eq, PartialEq)]
pub struct PageFaultError {
    /// 0 = non-present page, 1 = protection violation.
    pub present: bool,
    /// 0 = read, 1 = write.
    pub write: bool,
    /// 0 = supervisor, 1 = user mode.
    pub user: bool,
    /// A reserved bit was set in a paging structure.
    pub reserved_bit: bool,
    /// Instruction fetch.
    pub instruction_fetch: bool,
    #[bits(59)]
    __: u64,
}

impl PageFaultError {
    /// The fault a copy-on-write repair can fix: a write to a present page.
    #[inline]
    #[must_use]
    pub const fn is_protection_write(self) -> bool {
        self.present() && self.write()
    }

    #[must_use]
    pub const fn explain(self) -> &'static str {
        if !self.present() {
            "page is not present"
        } else if self.reserved_bit() {
            "reserved bit set in a page table"
        } else if self.instruction_fetch() {
            "instruction fetch from a protected page"
        } else if self.write() {
            "write to a protected page"
        } else {
            "read from a protected page"
        }
    }
}

impl fmt::Display for PageFaultError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "operation: {}, accessed by: {}, {}",
            if self.write() { "write" } else { "read" },
            if self.user() { "user" } else { "supervisor" },
            self.explain()
        )
    }
}
