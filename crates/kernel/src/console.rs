//! Defines the early debug console that logs to the serial port.

use log::{LevelFilter, Metadata, Record};
use spin::{Mutex, Once};

use crate::serial::SerialWriter;

/// Records above this level are dropped.
#[cfg(debug_assertions)]
const MAX_LEVEL: LevelFilter = LevelFilter::Trace;
#[cfg(not(debug_assertions))]
const MAX_LEVEL: LevelFilter = LevelFilter::Info;

pub struct Console {
    serial: Mutex<Option<SerialWriter>>,
}

static CONSOLE: Once<Console> = Once::new();

impl Console {
    /// Returns the kernel console, installing it as the global logger on first use.
    pub fn init() -> &'static Self {
        let mut first = false;
        let console = CONSOLE.call_once(|| {
            first = true;
            Console {
                serial: Mutex::new(None),
            }
        });

        if first && log::set_logger(console).is_ok() {
            log::set_max_level(MAX_LEVEL);
        }
        console
    }

    /// Returns true once an output device is attached.
    pub fn has_output(&self) -> bool {
        self.serial.lock().is_some()
    }

    pub fn attach_serial(&self, serial: SerialWriter) {
        *self.serial.lock() = Some(serial);
    }
}

impl log::Log for Console {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= MAX_LEVEL
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        if let Some(serial) = &mut *self.serial.lock() {
            // Nowhere to report a failed write to.
            let _ = write_log_entry_to(serial, record);
        }
    }

    fn flush(&self) {}
}

fn write_log_entry_to(writer: &mut impl core::fmt::Write, record: &Record) -> core::fmt::Result {
    #[cfg(any(debug_assertions, feature = "detailed-logging"))]
    return writeln!(
        writer,
        "[{} {}:{} {}] {}",
        record.level(),
        record.file().unwrap_or("unknown"),
        record.line().unwrap_or(0),
        record.target(),
        record.args()
    );
    #[cfg(not(any(debug_assertions, feature = "detailed-logging")))]
    return writeln!(writer, "[{:5}] {}", record.level(), record.args());
}
