use alloc::sync::Arc;
use core::cell::Cell;

use critical_section::Mutex;
use log::{debug, error, info, trace, warn};

use tacho_hardware::{
    ChannelId, EdgeCounter, GpioController, HiResClock, PeriodicScheduler, PinId, PwmController,
    PwmOutput, PwmProvider,
};

use super::{encoder::RateEstimator, OpenLoopDrive, RateUpdate, Source, Tachometer};
use crate::{
    config::{DriveConfig, PwmCalibration},
    controls::motor_math,
    error::DriveError,
    listeners::{Listeners, SubscriptionId},
    registry::ControllerRegistry,
};

/// State the encoder relay needs after the controller has moved.
struct Shared {
    throttle: Mutex<Cell<f64>>,
    listeners: Listeners<RateUpdate>,
}

impl Shared {
    fn throttle(&self) -> f64 {
        critical_section::with(|cs| self.throttle.borrow(cs).get())
    }
}

/// An ESC driven motor with a single channel encoder on its shaft.
///
/// Throttle is open loop. Since the encoder can't tell direction, RPM and
/// pulse counts take their sign from the last commanded throttle.
///
/// Nothing touches the PWM output until [`MotionController::initialize`];
/// throttle writes before then are dropped.
pub struct MotionController<P, C, O>
where
    P: EdgeCounter + Send + 'static,
    C: HiResClock + Send + Sync + 'static,
    O: PwmOutput,
{
    channel: ChannelId,
    encoder: RateEstimator<P, C>,
    output: Option<O>,
    shared: Arc<Shared>,
    pwm: PwmCalibration,
}

impl<P, C, O> MotionController<P, C, O>
where
    P: EdgeCounter + Send + 'static,
    C: HiResClock + Send + Sync + 'static,
    O: PwmOutput,
{
    pub fn new<G, S>(
        channel: ChannelId,
        encoder_pin: PinId,
        pulses_per_revolution: f64,
        gpio: &mut G,
        clock: C,
        scheduler: &mut S,
        config: &DriveConfig,
    ) -> Result<Self, DriveError>
    where
        G: GpioController<Pin = P>,
        S: PeriodicScheduler,
    {
        let encoder =
            RateEstimator::new(encoder_pin, pulses_per_revolution, gpio, clock, scheduler, config)?;

        let shared = Arc::new(Shared {
            throttle: Mutex::new(Cell::new(0.0)),
            listeners: Listeners::new(),
        });

        let relay = shared.clone();
        encoder.subscribe(move |update: RateUpdate| {
            relay.listeners.emit(RateUpdate {
                source: Source::Motor(channel),
                rpm: motor_math::signed_rpm(relay.throttle(), update.rpm.unsigned_abs()),
            });
        });

        debug!("motor {}: encoder on pin {}", channel, encoder_pin);

        Ok(Self {
            channel,
            encoder,
            output: None,
            shared,
            pwm: config.pwm,
        })
    }

    /// Opens this motor's PWM channel and starts it at neutral throttle.
    ///
    /// The first motor to initialize also discovers the shared controller.
    /// The registry must carry the same [`PwmCalibration`] this motor was
    /// built with. Calling this again once it has succeeded does nothing.
    pub async fn initialize<D>(&mut self, registry: &ControllerRegistry<D>) -> Result<(), DriveError>
    where
        D: PwmProvider,
        D::Controller: PwmController<Output = O>,
    {
        if self.output.is_some() {
            debug!("motor {}: already initialized", self.channel);
            return Ok(());
        }

        if *registry.calibration() != self.pwm {
            error!(
                "motor {}: calibrated for {} Hz, controller runs {} Hz",
                self.channel,
                self.pwm.frequency.raw(),
                registry.frequency().raw()
            );
            return Err(DriveError::CalibrationMismatch);
        }

        let mut output = registry.open_channel(self.channel).await?;

        let neutral = motor_math::throttle_to_duty(0.0, &self.pwm);
        output
            .set_active_duty_cycle_percentage(neutral)
            .and_then(|_| output.start())
            .map_err(|e| {
                error!("motor {}: pwm output failed to start: {:?}", self.channel, e);
                DriveError::OutputFault
            })?;

        self.store_throttle(0.0);
        self.output = Some(output);
        info!("motor {}: output started", self.channel);
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.output.is_some()
    }

    pub fn channel(&self) -> ChannelId {
        self.channel
    }

    pub fn encoder(&self) -> &RateEstimator<P, C> {
        &self.encoder
    }

    /// Subscribes to signed RPM updates, one per encoder window.
    pub fn subscribe(
        &self,
        listener: impl Fn(RateUpdate) + Send + Sync + 'static,
    ) -> SubscriptionId {
        self.shared.listeners.subscribe(listener)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.shared.listeners.unsubscribe(id)
    }

    /// Returns the ESC to neutral and stops the encoder. The output stays
    /// running so the ESC keeps seeing a valid neutral pulse.
    pub fn shutdown(&mut self) {
        if let Some(output) = self.output.as_mut() {
            let neutral = motor_math::throttle_to_duty(0.0, &self.pwm);
            if let Err(e) = output.set_active_duty_cycle_percentage(neutral) {
                warn!("motor {}: neutral write failed: {:?}", self.channel, e);
            }
            self.store_throttle(0.0);
        }
        self.encoder.shutdown();
    }

    fn store_throttle(&self, percent: f64) {
        critical_section::with(|cs| self.shared.throttle.borrow(cs).set(percent));
    }
}

impl<P, C, O> OpenLoopDrive for MotionController<P, C, O>
where
    P: EdgeCounter + Send + 'static,
    C: HiResClock + Send + Sync + 'static,
    O: PwmOutput,
{
    fn set_throttle(&mut self, percent: f64) {
        let Some(output) = self.output.as_mut() else {
            trace!("motor {}: not initialized, throttle ignored", self.channel);
            return;
        };
        if percent.is_nan() {
            warn!("motor {}: NaN throttle ignored", self.channel);
            return;
        }

        let throttle = motor_math::clamp_throttle(percent);
        let duty = motor_math::throttle_to_duty(throttle, &self.pwm);
        if let Err(e) = output.set_active_duty_cycle_percentage(duty) {
            warn!("motor {}: duty write failed: {:?}", self.channel, e);
        }

        self.store_throttle(throttle);
    }

    fn throttle(&self) -> f64 {
        self.shared.throttle()
    }
}

impl<P, C, O> Tachometer for MotionController<P, C, O>
where
    P: EdgeCounter + Send + 'static,
    C: HiResClock + Send + Sync + 'static,
    O: PwmOutput,
{
    fn rpm(&self) -> i32 {
        motor_math::signed_rpm(self.throttle(), self.encoder.current_rate())
    }

    fn encoder_pulses(&self) -> i64 {
        motor_math::signed_pulses(self.throttle(), self.encoder.drain_pulse_count())
    }
}
