use crate::QemuSink;
use core::fmt::{self, Write};
use kernel_sync::IrqGuard;
use log::{LevelFilter, Log, Metadata, Record, SetLoggerError};

/// `log` backend writing one `[LEVEL] target: message` line per record.
pub struct QemuLogger;

impl QemuLogger {
    /// Install the logger. Call this once during early init.
    ///
    /// # Errors
    /// If a logger was already installed.
    pub fn init(max_level: LevelFilter) -> Result<(), SetLoggerError> {
        static LOGGER: QemuLogger = QemuLogger;
        log::set_logger(&LOGGER)?;
        log::set_max_level(max_level);
        Ok(())
    }
}

/// Format `record` the way the debug console shows it.
///
/// # Errors
/// Propagates errors from `w`.
pub fn write_record(w: &mut impl Write, record: &Record<'_>) -> fmt::Result {
    writeln!(w, "[{}] {}: {}", record.level(), record.target(), record.args())
}

impl Log for QemuLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let _irq = IrqGuard::new();
        let _ = write_record(&mut QemuSink, record);
    }

    fn flush(&self) {
        // no-op for qemu debug port
    }
}
