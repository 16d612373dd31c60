use alloc::{boxed::Box, sync::Arc};
use core::{
    cell::RefCell,
    sync::atomic::{AtomicU32, Ordering},
};

use critical_section::Mutex;
use fugit::{HertzU64, MicrosDurationU64};
use log::{debug, error, info, trace, warn};

use tacho_hardware::{
    CancelHandle, DriveMode, EdgeCounter, GpioController, HiResClock, PeriodicScheduler,
    PeriodicTask, PinId,
};

use super::{RateUpdate, Source};
use crate::{
    config::DriveConfig,
    controls::{motor_math, Ema},
    error::DriveError,
    listeners::{Listeners, SubscriptionId},
    time::ticks_to_micros,
};

/// Everything the periodic sample touches, guarded as one unit.
struct Window<P: EdgeCounter> {
    pin: P,
    /// `None` until the first sample seeds the window.
    last_sample: Option<u64>,
    pulses_since_last_read: i64,
    retired: bool,
}

enum Outcome {
    Seeded,
    Skipped,
    Retired,
    Updated {
        pulses: u32,
        window: MicrosDurationU64,
        instantaneous: u32,
        smoothed: u32,
    },
}

/// The half of the estimator shared with the scheduler.
struct Sampler<P: EdgeCounter, C: HiResClock> {
    pin_id: PinId,
    degrees_per_pulse: f64,
    ema: Ema,
    clock: C,
    clock_frequency: HertzU64,
    current_rate: AtomicU32,
    window: Mutex<RefCell<Window<P>>>,
    listeners: Listeners<RateUpdate>,
}

impl<P, C> Sampler<P, C>
where
    P: EdgeCounter + Send,
    C: HiResClock + Send + Sync,
{
    fn sample(&self) -> Option<u32> {
        let outcome = critical_section::with(|cs| {
            let mut window = self.window.borrow_ref_mut(cs);
            if window.retired {
                return Outcome::Retired;
            }

            let now = self.clock.now();
            let Some(last) = window.last_sample else {
                window.last_sample = Some(now);
                window.pin.start_counting();
                return Outcome::Seeded;
            };

            // A clock too coarse to move (or running backwards) gives no usable
            // window; leave the counter alone so the edges land in the next one.
            let elapsed = ticks_to_micros(now.saturating_sub(last), self.clock_frequency);
            if elapsed.ticks() == 0 {
                return Outcome::Skipped;
            }

            let pulses = window.pin.read_and_reset_count();
            window.pulses_since_last_read += i64::from(pulses);
            window.pin.start_counting();
            window.last_sample = Some(now);

            let instantaneous = motor_math::pulses_to_rpm(self.degrees_per_pulse, pulses, elapsed);
            let smoothed = self
                .ema
                .apply(self.current_rate.load(Ordering::Relaxed), instantaneous);
            self.current_rate.store(smoothed, Ordering::Relaxed);

            Outcome::Updated {
                pulses,
                window: elapsed,
                instantaneous,
                smoothed,
            }
        });

        match outcome {
            Outcome::Seeded => {
                debug!("encoder {}: first sample, counting edges", self.pin_id);
                None
            }
            Outcome::Skipped => {
                warn!("encoder {}: zero length window, sample skipped", self.pin_id);
                None
            }
            Outcome::Retired => None,
            Outcome::Updated {
                pulses,
                window,
                instantaneous,
                smoothed,
            } => {
                trace!(
                    "encoder {}: {} pulses in {} us, {} rpm raw",
                    self.pin_id,
                    pulses,
                    window.ticks(),
                    instantaneous
                );
                self.listeners.emit(RateUpdate {
                    source: Source::Encoder(self.pin_id),
                    rpm: i32::try_from(smoothed).unwrap_or(i32::MAX),
                });
                Some(smoothed)
            }
        }
    }

    /// Stops counting and blocks any later sample. Returns false if already retired.
    fn retire(&self) -> bool {
        critical_section::with(|cs| {
            let mut window = self.window.borrow_ref_mut(cs);
            if window.retired {
                return false;
            }
            window.retired = true;
            window.pin.stop_counting();
            true
        })
    }
}

impl<P, C> PeriodicTask for Sampler<P, C>
where
    P: EdgeCounter + Send,
    C: HiResClock + Send + Sync,
{
    fn run(&self) {
        self.sample();
    }
}

/// Turns edge counts from a single channel encoder into a smoothed RPM.
///
/// Construction opens the pin and schedules a sample every
/// [`DriveConfig::sample_interval`]. The first sample only seeds the time
/// base and enables counting; each later one publishes a [`RateUpdate`].
/// Dropping the estimator cancels the schedule and stops counting.
pub struct RateEstimator<P, C>
where
    P: EdgeCounter + Send + 'static,
    C: HiResClock + Send + Sync + 'static,
{
    sampler: Arc<Sampler<P, C>>,
    timer: Option<Box<dyn CancelHandle + Send + Sync>>,
}

impl<P, C> RateEstimator<P, C>
where
    P: EdgeCounter + Send + 'static,
    C: HiResClock + Send + Sync + 'static,
{
    pub fn new<G, S>(
        pin: PinId,
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
        if !(pulses_per_revolution.is_finite() && pulses_per_revolution > 0.0) {
            return Err(DriveError::InvalidPulsesPerRevolution);
        }

        // Fixed at boot, so it's only read once
        let clock_frequency = clock.frequency();
        if clock_frequency.raw() == 0 {
            return Err(DriveError::InvalidClockFrequency);
        }

        let mut counter = gpio.open_pin(pin).map_err(|e| {
            error!("encoder {}: pin open failed: {:?}", pin, e);
            DriveError::PinUnavailable
        })?;
        counter.set_drive_mode(DriveMode::Input);

        let sampler = Arc::new(Sampler {
            pin_id: pin,
            degrees_per_pulse: motor_math::degrees_per_pulse(pulses_per_revolution),
            ema: Ema::new(config.ema_alpha),
            clock,
            clock_frequency,
            current_rate: AtomicU32::new(0),
            window: Mutex::new(RefCell::new(Window {
                pin: counter,
                last_sample: None,
                pulses_since_last_read: 0,
                retired: false,
            })),
            listeners: Listeners::new(),
        });

        let task: Arc<dyn PeriodicTask> = sampler.clone();
        let timer = scheduler
            .schedule(config.sample_interval, task)
            .map_err(|e| {
                error!("encoder {}: could not schedule sampling: {:?}", pin, e);
                DriveError::SchedulerUnavailable
            })?;

        info!(
            "encoder {}: sampling every {} ms at {} Hz clock",
            pin,
            config.sample_interval.to_millis(),
            clock_frequency.raw()
        );

        Ok(Self {
            sampler,
            timer: Some(Box::new(timer)),
        })
    }

    pub fn pin(&self) -> PinId {
        self.sampler.pin_id
    }

    pub fn degrees_per_pulse(&self) -> f64 {
        self.sampler.degrees_per_pulse
    }

    pub fn clock_frequency(&self) -> HertzU64 {
        self.sampler.clock_frequency
    }

    /// Last smoothed RPM. Never blocks.
    pub fn current_rate(&self) -> u32 {
        self.sampler.current_rate.load(Ordering::Relaxed)
    }

    /// Pulses counted since the previous drain; resets the tally.
    pub fn drain_pulse_count(&self) -> i64 {
        critical_section::with(|cs| {
            let mut window = self.sampler.window.borrow_ref_mut(cs);
            core::mem::take(&mut window.pulses_since_last_read)
        })
    }

    /// True once the first sample has seeded the time base.
    pub fn is_seeded(&self) -> bool {
        critical_section::with(|cs| self.sampler.window.borrow_ref(cs).last_sample.is_some())
    }

    /// Runs one sample right away. The schedule normally does this.
    pub fn sample(&self) -> Option<u32> {
        self.sampler.sample()
    }

    pub fn subscribe(
        &self,
        listener: impl Fn(RateUpdate) + Send + Sync + 'static,
    ) -> SubscriptionId {
        self.sampler.listeners.subscribe(listener)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.sampler.listeners.unsubscribe(id)
    }

    /// Cancels the schedule and stops edge counting. Safe to call repeatedly.
    pub fn shutdown(&mut self) {
        let stopped = self.sampler.retire();
        if let Some(mut timer) = self.timer.take() {
            timer.cancel();
        }
        if stopped {
            info!("encoder {}: stopped", self.sampler.pin_id);
        }
    }

    pub fn is_shut_down(&self) -> bool {
        self.timer.is_none()
    }
}

impl<P, C> Drop for RateEstimator<P, C>
where
    P: EdgeCounter + Send + 'static,
    C: HiResClock + Send + Sync + 'static,
{
    fn drop(&mut self) {
        self.shutdown();
    }
}
