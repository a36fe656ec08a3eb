use core::fmt;
use kernel_task::TaskContext;

/// The register and segment state of a saved context, one group per line.
pub struct RegisterDump<'a>(pub &'a TaskContext);

impl fmt::Display for RegisterDump<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ctx = self.0;
        let g = &ctx.gprs;
        let s = ctx.segments;
        writeln!(f, "Task dump:")?;
        writeln!(
            f,
            "\trax: {:x}, rbx: {:x}, rcx: {:x}, rdx: {:x}",
            g.rax, g.rbx, g.rcx, g.rdx
        )?;
        writeln!(
            f,
            "\trdi: {:x}, rsi: {:x}, rbp: {:x}, rsp: {:x}",
            g.rdi, g.rsi, g.rbp, ctx.rsp
        )?;
        writeln!(
            f,
            "\tr8:  {:x}, r9:  {:x}, r10: {:x}, r11: {:x}",
            g.r8, g.r9, g.r10, g.r11
        )?;
        writeln!(
            f,
            "\tr12: {:x}, r13: {:x}, r14: {:x}, r15: {:x}",
            g.r12, g.r13, g.r14, g.r15
        )?;
        writeln!(
            f,
            "\tcs: {:x}, ss: {:x}, ds: {:x}, es: {:x}, fs: {:x}, gs: {:x}",
            ctx.cs,
            ctx.ss,
            s.ds(),
            s.es(),
            s.fs(),
            s.gs()
        )?;
        writeln!(
            f,
            "\trip: {:x}, rflags: {:b}, error code: {:x}",
            ctx.rip, ctx.rflags, ctx.error_code
        )
    }
}
