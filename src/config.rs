use fugit::{HertzU32, MillisDurationU32};

use tacho_hardware::{ChannelId, PinId};

/// How often the encoder is sampled.
pub const SAMPLE_INTERVAL: MillisDurationU32 = MillisDurationU32::from_ticks(50);

/// How often the drivetrain folds wheel travel into the odometer.
pub const ODOMETRY_INTERVAL: MillisDurationU32 = MillisDurationU32::from_ticks(100);

/// Weight of the newest sample in the RPM moving average.
pub const EMA_ALPHA: f64 = 0.8;

// The PCA9685's internal oscillator runs 6.3% fast: asking for 94Hz yields a
// 99.7Hz signal on the scope. Duty math has to use the measured figure.
pub const PWM_FREQUENCY: HertzU32 = HertzU32::from_raw(94);
pub const PWM_ACTUAL_FREQUENCY: f64 = 99.7;

// ESC pulse widths: 1ms full reverse, 1.5ms stopped, 2ms full forward
pub const THROTTLE_MIDPOINT: f64 = 0.0015; // seconds
pub const THROTTLE_RANGE: f64 = 0.0005; // seconds
pub const THROTTLE_FULL_FORWARD: f64 = 100.0;
pub const THROTTLE_FULL_REVERSE: f64 = -100.0;

/// Maps pulse widths onto a particular PWM chip.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PwmCalibration {
    /// Frequency requested from the controller.
    pub frequency: HertzU32,
    /// Frequency the controller actually produces at that setting.
    pub actual_frequency: f64,
    pub midpoint: f64,
    pub range: f64,
}

impl Default for PwmCalibration {
    fn default() -> Self {
        Self {
            frequency: PWM_FREQUENCY,
            actual_frequency: PWM_ACTUAL_FREQUENCY,
            midpoint: THROTTLE_MIDPOINT,
            range: THROTTLE_RANGE,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DriveConfig {
    pub sample_interval: MillisDurationU32,
    pub ema_alpha: f64,
    pub pwm: PwmCalibration,
}

impl Default for DriveConfig {
    fn default() -> Self {
        Self {
            sample_interval: SAMPLE_INTERVAL,
            ema_alpha: EMA_ALPHA,
            pwm: PwmCalibration::default(),
        }
    }
}

/// Mechanical and wiring description of the two wheeled platform.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RobotConfig {
    /// From the gearmotor datasheet.
    pub gear_ratio: f64,
    /// Encoder pulses per motor shaft revolution.
    pub encoder_ppr: f64,
    pub wheel_diameter: f64, // meters
    pub axle_length: f64,    // meters
    pub max_forward_throttle: f64,
    pub max_reverse_throttle: f64,
    /// Open loop throttle for distance moves, percent.
    pub move_throttle: f64,
    /// Open loop throttle each wheel spins at during a turn, percent.
    pub turn_throttle: f64,
    pub odometry_interval: MillisDurationU32,
    pub left_encoder_pin: PinId,
    pub right_encoder_pin: PinId,
    /// Outputs on the PWM shield, 0..=15.
    pub left_pwm_channel: ChannelId,
    pub right_pwm_channel: ChannelId,
}

impl RobotConfig {
    /// Encoder pulses per revolution of the wheel, after the gearbox.
    pub fn pulses_per_revolution(&self) -> f64 {
        self.encoder_ppr * self.gear_ratio
    }

    /// Linear wheel travel per encoder pulse, in meters.
    pub fn meters_per_pulse(&self) -> f64 {
        core::f64::consts::PI * self.wheel_diameter / self.pulses_per_revolution()
    }
}

impl Default for RobotConfig {
    fn default() -> Self {
        Self {
            gear_ratio: 46.85,
            encoder_ppr: 24.0,
            wheel_diameter: 0.090,
            axle_length: 0.22,
            // Only allow 25% power either way
            max_forward_throttle: 25.0,
            max_reverse_throttle: -25.0,
            move_throttle: 20.0,
            turn_throttle: 12.0,
            odometry_interval: ODOMETRY_INTERVAL,
            left_encoder_pin: 8,
            right_encoder_pin: 7,
            left_pwm_channel: 1,
            right_pwm_channel: 0,
        }
    }
}
