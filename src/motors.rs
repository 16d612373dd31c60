pub mod encoder;
pub mod motor;

use tacho_hardware::{ChannelId, PinId};

/// Who produced a [`RateUpdate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    /// A rate estimator, by encoder pin. Always non-negative.
    Encoder(PinId),
    /// A motion controller, by PWM channel. Signed by commanded direction.
    Motor(ChannelId),
}

/// Published once per completed sampling window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateUpdate {
    pub source: Source,
    pub rpm: i32,
}

pub trait OpenLoopDrive {
    /// Throttle in percent, -100..=100, positive is forward.
    fn set_throttle(&mut self, percent: f64);
    fn throttle(&self) -> f64;
}

pub trait Tachometer {
    fn rpm(&self) -> i32;
    /// Pulses since the previous call. Consumes them.
    fn encoder_pulses(&self) -> i64;
}
