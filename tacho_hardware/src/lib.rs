#![cfg_attr(not(test), no_std)]

//! Platform seams for the tachometer drive: edge-counting inputs, the
//! high-resolution clock, periodic scheduling and PWM outputs.
//!
//! Everything here is an interface the drive logic consumes, plus a few
//! small adapters for wiring those interfaces onto interrupt handlers and
//! `embedded-hal` PWM channels.

extern crate alloc;

pub mod clock;
pub mod counter;
pub mod pwm;
pub mod scheduler;

pub use clock::HiResClock;
pub use counter::{
    DriveMode, EdgeCounter, EdgeTally, GpioController, PinId, PinOutOfRange, TallyBank,
};
pub use pwm::{ChannelId, DutyCyclePin, PwmController, PwmOutput, PwmProvider};
pub use scheduler::{CancelHandle, PeriodicScheduler, PeriodicTask, TickHandle, TickScheduler};
