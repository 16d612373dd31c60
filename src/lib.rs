#![cfg_attr(not(test), no_std)]

extern crate alloc;

pub mod config;
pub mod controls;
pub mod drivetrain;
pub mod error;
pub mod listeners;
pub mod logging;
pub mod motors;
pub mod odometry;
pub mod registry;
pub mod time;

#[cfg(test)]
mod mock;

pub use config::{DriveConfig, PwmCalibration, RobotConfig};
pub use drivetrain::{schedule_odometry, Drivetrain, OdometryReading, SharedDrivetrain};
pub use error::DriveError;
pub use listeners::{Listeners, SubscriptionId};
pub use motors::{
    encoder::RateEstimator, motor::MotionController, OpenLoopDrive, RateUpdate, Source, Tachometer,
};
pub use odometry::{Odometer, Pose, WheelGeometry};
pub use registry::ControllerRegistry;

pub use tacho_hardware as hardware;

// Provides the critical-section implementation on single core Cortex-M parts
#[cfg(feature = "single_core")]
use cortex_m as _;

pub const NAME: &str = env!("CARGO_PKG_NAME");
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
