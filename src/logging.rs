//! `log` backend selection.
//!
//! Library code only ever talks to the `log` facade. Firmware calls [`init`]
//! once at boot; with the `defmt_logger` feature records go out over RTT,
//! without it they are dropped after the level check.
#[cfg(feature = "defmt_logger")]
mod defmt_logger;

use core::sync::atomic::{AtomicUsize, Ordering};

pub use log::Level;
use log::{Metadata, Record, SetLoggerError};

struct Dispatch;

static LOGGER: Dispatch = Dispatch;
static LEVEL: AtomicUsize = AtomicUsize::new(Level::Info as usize);

/// Installs the crate logger. Fails if any logger is already installed.
pub fn init(level: Level) -> Result<(), SetLoggerError> {
    log::set_logger(&LOGGER)?;
    set_level(level);
    Ok(())
}

/// Changes the verbosity at runtime.
pub fn set_level(level: Level) {
    LEVEL.store(level as usize, Ordering::Relaxed);
    log::set_max_level(level.to_level_filter());
}

impl log::Log for Dispatch {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() as usize <= LEVEL.load(Ordering::Relaxed)
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }

        #[cfg(feature = "defmt_logger")]
        defmt_logger::forward(record);
    }

    fn flush(&self) {}
}
