use alloc::vec::Vec;

use embedded_hal::pwm::SetDutyCycle;
use fugit::HertzU32;
use num_traits::float::FloatCore;

pub type ChannelId = u8;

/// One output of a PWM controller.
pub trait PwmOutput {
    type Error: core::fmt::Debug;

    fn start(&mut self) -> Result<(), Self::Error>;

    /// `percentage` is the active fraction of the period, 0.0..=1.0.
    fn set_active_duty_cycle_percentage(&mut self, percentage: f64) -> Result<(), Self::Error>;
}

/// A multi-channel PWM chip sharing one period across its outputs.
pub trait PwmController {
    type Output: PwmOutput;
    type Error: core::fmt::Debug;

    fn set_frequency(&mut self, frequency: HertzU32) -> Result<(), Self::Error>;
    fn open_pin(&mut self, channel: ChannelId) -> Result<Self::Output, Self::Error>;
}

/// Enumerates the PWM controllers on a bus. Usually slow (bus probing), hence async.
#[allow(async_fn_in_trait)]
pub trait PwmProvider {
    type Controller: PwmController;
    type Error: core::fmt::Debug;

    async fn discover_controllers(&mut self) -> Result<Vec<Self::Controller>, Self::Error>;
}

/// Drives any `embedded-hal` PWM channel as a [`PwmOutput`].
///
/// The duty cycle can be staged before [`PwmOutput::start`]; the channel
/// stays fully off until then.
pub struct DutyCyclePin<P: SetDutyCycle> {
    pin: P,
    duty: f64,
    started: bool,
}

impl<P: SetDutyCycle> DutyCyclePin<P> {
    pub fn new(pin: P) -> Self {
        Self {
            pin,
            duty: 0.0,
            started: false,
        }
    }

    pub fn is_started(&self) -> bool {
        self.started
    }

    pub fn release(self) -> P {
        self.pin
    }

    fn apply(&mut self) -> Result<(), P::Error> {
        let max = self.pin.max_duty_cycle();
        let raw = FloatCore::round(self.duty * f64::from(max)) as u16;
        self.pin.set_duty_cycle(raw.min(max))
    }
}

impl<P: SetDutyCycle> PwmOutput for DutyCyclePin<P> {
    type Error = P::Error;

    fn start(&mut self) -> Result<(), Self::Error> {
        self.started = true;
        self.apply()
    }

    fn set_active_duty_cycle_percentage(&mut self, percentage: f64) -> Result<(), Self::Error> {
        self.duty = if percentage.is_nan() {
            0.0
        } else {
            percentage.clamp(0.0, 1.0)
        };

        if self.started {
            self.apply()
        } else {
            Ok(())
        }
    }
}
