use core::fmt;

/// Failures while bringing up or running a drive.
///
/// Hardware specific errors are logged where they happen and collapsed into
/// one of these so that callers don't have to carry every driver's error type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriveError {
    /// Pulses per revolution must be finite and above zero.
    InvalidPulsesPerRevolution,
    /// The clock reported a tick rate of zero.
    InvalidClockFrequency,
    PinUnavailable,
    SchedulerUnavailable,
    DiscoveryFailed,
    /// Discovery succeeded but found nothing.
    NoController,
    FrequencyRejected,
    /// The motor and the shared controller were set up from different PWM calibrations.
    CalibrationMismatch,
    /// An earlier acquisition of the shared controller failed; it is not retried.
    ControllerUnavailable,
    ChannelUnavailable,
    OutputFault,
}

impl fmt::Display for DriveError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            DriveError::InvalidPulsesPerRevolution => "pulses per revolution must be positive",
            DriveError::InvalidClockFrequency => "clock frequency is zero",
            DriveError::PinUnavailable => "encoder pin could not be opened",
            DriveError::SchedulerUnavailable => "periodic task could not be scheduled",
            DriveError::DiscoveryFailed => "PWM controller discovery failed",
            DriveError::NoController => "no PWM controller found",
            DriveError::FrequencyRejected => "PWM controller rejected the frequency",
            DriveError::CalibrationMismatch => "motor and PWM controller calibrations differ",
            DriveError::ControllerUnavailable => "PWM controller unavailable",
            DriveError::ChannelUnavailable => "PWM channel could not be opened",
            DriveError::OutputFault => "PWM output fault",
        };
        f.write_str(msg)
    }
}
