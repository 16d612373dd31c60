use fugit::{HertzU64, MicrosDurationU64};

/// Converts a raw clock tick delta into microseconds.
///
/// Widened to 128 bits so long windows on fast clocks neither overflow nor
/// lose the sub-tick remainder before the division.
pub fn ticks_to_micros(ticks: u64, frequency: HertzU64) -> MicrosDurationU64 {
    let micros = (u128::from(ticks) * 1_000_000)
        .checked_div(u128::from(frequency.raw()))
        .unwrap_or(0);
    MicrosDurationU64::from_ticks(u64::try_from(micros).unwrap_or(u64::MAX))
}
