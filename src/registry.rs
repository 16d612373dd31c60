use core::mem;

use fugit::HertzU32;
use log::{error, info, warn};
use rtic_sync::arbiter::Arbiter;

use tacho_hardware::{ChannelId, PwmController, PwmProvider};

use crate::{config::PwmCalibration, error::DriveError};

type Output<D> = <<D as PwmProvider>::Controller as PwmController>::Output;

enum Acquisition<D: PwmProvider> {
    /// Nobody has asked for a channel yet.
    Pending(D),
    Ready(D::Controller),
    /// Discovery or setup failed once; never retried.
    Failed,
}

/// Owns the one PWM controller every motor channel shares.
///
/// The controller is discovered and set to `pwm.frequency` by whichever
/// motor asks for a channel first. Concurrent first callers queue on the
/// arbiter, so discovery runs exactly once.
pub struct ControllerRegistry<D: PwmProvider> {
    slot: Arbiter<Acquisition<D>>,
    pwm: PwmCalibration,
}

impl<D: PwmProvider> ControllerRegistry<D> {
    pub fn new(provider: D, pwm: &PwmCalibration) -> Self {
        Self {
            slot: Arbiter::new(Acquisition::Pending(provider)),
            pwm: *pwm,
        }
    }

    /// The calibration the controller is programmed from. Motors must do
    /// their duty math with the same one.
    pub fn calibration(&self) -> &PwmCalibration {
        &self.pwm
    }

    pub fn frequency(&self) -> HertzU32 {
        self.pwm.frequency
    }

    /// True once the controller has been discovered and configured. Reads
    /// false while another caller is mid-acquisition.
    pub fn is_acquired(&self) -> bool {
        self.slot
            .try_access()
            .map(|slot| matches!(*slot, Acquisition::Ready(_)))
            .unwrap_or(false)
    }

    /// Opens `channel` on the shared controller, acquiring it first if needed.
    pub async fn open_channel(&self, channel: ChannelId) -> Result<Output<D>, DriveError> {
        let mut slot = self.slot.access().await;

        if let Acquisition::Pending(_) = *slot {
            // Parked as failed until acquisition completes
            if let Acquisition::Pending(provider) = mem::replace(&mut *slot, Acquisition::Failed) {
                *slot = Acquisition::Ready(acquire(provider, self.pwm.frequency).await?);
            }
        }

        match &mut *slot {
            Acquisition::Ready(controller) => controller.open_pin(channel).map_err(|e| {
                error!("pwm channel {} failed to open: {:?}", channel, e);
                DriveError::ChannelUnavailable
            }),
            _ => {
                warn!("pwm channel {}: controller unavailable", channel);
                Err(DriveError::ControllerUnavailable)
            }
        }
    }
}

async fn acquire<D: PwmProvider>(
    mut provider: D,
    frequency: HertzU32,
) -> Result<D::Controller, DriveError> {
    let controllers = provider.discover_controllers().await.map_err(|e| {
        error!("pwm controller discovery failed: {:?}", e);
        DriveError::DiscoveryFailed
    })?;

    let found = controllers.len();
    let Some(mut controller) = controllers.into_iter().next() else {
        error!("no pwm controller found");
        return Err(DriveError::NoController);
    };

    controller.set_frequency(frequency).map_err(|e| {
        error!("pwm controller rejected {} Hz: {:?}", frequency.raw(), e);
        DriveError::FrequencyRejected
    })?;

    info!(
        "pwm controller ready at {} Hz ({} found)",
        frequency.raw(),
        found
    );
    Ok(controller)
}
