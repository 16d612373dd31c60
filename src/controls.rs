pub mod ema;
pub mod motor_math;

pub use ema::Ema;
