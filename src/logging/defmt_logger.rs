use defmt::Display2Format;
use defmt_rtt as _;
use log::{Level, Record};

/// Re-emits a `log` record as a defmt frame on RTT.
pub(super) fn forward(record: &Record) {
    let target = record.target();
    let message = Display2Format(record.args());
    match record.level() {
        Level::Trace => defmt::trace!("{=str}: {}", target, message),
        Level::Debug => defmt::debug!("{=str}: {}", target, message),
        Level::Info => defmt::info!("{=str}: {}", target, message),
        Level::Warn => defmt::warn!("{=str}: {}", target, message),
        Level::Error => defmt::error!("{=str}: {}", target, message),
    }
}
