use fugit::MicrosDurationU64;

use crate::config::{PwmCalibration, THROTTLE_FULL_FORWARD, THROTTLE_FULL_REVERSE};

pub const DEGREES_PER_REVOLUTION: f64 = 360.0;
const MICROS_PER_MINUTE: f64 = 60_000_000.0;

pub fn degrees_per_pulse(pulses_per_revolution: f64) -> f64 {
    DEGREES_PER_REVOLUTION / pulses_per_revolution
}

/// Unsmoothed shaft speed over one sampling window, truncated to whole RPM.
///
///   degrees       1 rev       60_000_000 us
///  ---------  x  -------  x  ---------------  =  RPM
///  window us     360 deg         1 min
pub fn pulses_to_rpm(degrees_per_pulse: f64, pulses: u32, window: MicrosDurationU64) -> u32 {
    let degrees = degrees_per_pulse * f64::from(pulses);
    (degrees * MICROS_PER_MINUTE / (DEGREES_PER_REVOLUTION * window.ticks() as f64)) as u32
}

pub fn clamp_throttle(percent: f64) -> f64 {
    percent.clamp(THROTTLE_FULL_REVERSE, THROTTLE_FULL_FORWARD)
}

/// Throttle percentage to the active fraction of the PWM period.
///
/// The pulse width (seconds) times the real output frequency gives the
/// fraction of each period the line is high.
pub fn throttle_to_duty(throttle: f64, pwm: &PwmCalibration) -> f64 {
    let pulse_width = pwm.midpoint + pwm.range * (throttle / 100.0);
    pulse_width * pwm.actual_frequency
}

/// The encoder can't see direction, so RPM takes the sign of the command.
/// Zero throttle counts as forward.
pub fn signed_rpm(throttle: f64, rpm: u32) -> i32 {
    let magnitude = i32::try_from(rpm).unwrap_or(i32::MAX);
    if throttle >= 0.0 {
        magnitude
    } else {
        -magnitude
    }
}

/// Like [`signed_rpm`] but zero throttle counts as reverse. Odometry has
/// always been fed this way, so the boundary is kept as is.
pub fn signed_pulses(throttle: f64, pulses: i64) -> i64 {
    if throttle > 0.0 {
        pulses
    } else {
        -pulses
    }
}
