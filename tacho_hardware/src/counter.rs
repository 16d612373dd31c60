//! Edge counting inputs for single channel encoders.
use core::sync::atomic::{AtomicBool, AtomicU32, Ordering};

pub type PinId = u8;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DriveMode {
    #[default]
    Input,
    InputPullUp,
    InputPullDown,
}

/// Hands out counting pins by number.
pub trait GpioController {
    type Pin: EdgeCounter;
    type Error: core::fmt::Debug;

    fn open_pin(&mut self, pin: PinId) -> Result<Self::Pin, Self::Error>;
}

/// A pin that counts both rising and falling edges while enabled.
pub trait EdgeCounter {
    fn set_drive_mode(&mut self, mode: DriveMode);
    fn start_counting(&mut self);
    fn stop_counting(&mut self);
    /// Edges seen since the previous call. Resets the count to zero.
    fn read_and_reset_count(&mut self) -> u32;
}

/// Edge counter fed from an EXTI style interrupt handler.
///
/// ```ignore
/// static LEFT: EdgeTally = EdgeTally::new();
///
/// #[task(binds = EXTI9_5)]
/// fn encoder_edge(_: encoder_edge::Context) {
///     LEFT.record_edge();
/// }
/// ```
pub struct EdgeTally {
    counting: AtomicBool,
    edges: AtomicU32,
}

impl EdgeTally {
    pub const fn new() -> Self {
        Self {
            counting: AtomicBool::new(false),
            edges: AtomicU32::new(0),
        }
    }

    /// Call once per electrical edge. Edges outside a counting window are dropped.
    pub fn record_edge(&self) {
        if self.counting.load(Ordering::Acquire) {
            self.edges.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn is_counting(&self) -> bool {
        self.counting.load(Ordering::Acquire)
    }
}

impl Default for EdgeTally {
    fn default() -> Self {
        Self::new()
    }
}

impl EdgeCounter for &'static EdgeTally {
    // Pull configuration belongs to the pin setup that routes the interrupt
    fn set_drive_mode(&mut self, _mode: DriveMode) {}

    fn start_counting(&mut self) {
        self.counting.store(true, Ordering::Release);
    }

    fn stop_counting(&mut self) {
        self.counting.store(false, Ordering::Release);
    }

    fn read_and_reset_count(&mut self) -> u32 {
        // Relaxed is enough: the swap only has to be atomic against record_edge
        self.edges.swap(0, Ordering::Relaxed)
    }
}

/// A fixed set of tallies addressed by pin number.
pub struct TallyBank<const N: usize> {
    tallies: [EdgeTally; N],
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PinOutOfRange(pub PinId);

impl<const N: usize> TallyBank<N> {
    #[allow(clippy::declare_interior_mutable_const)]
    pub const fn new() -> Self {
        const IDLE: EdgeTally = EdgeTally::new();
        Self {
            tallies: [IDLE; N],
        }
    }

    pub fn record_edge(&self, pin: PinId) {
        if let Some(tally) = self.tallies.get(pin as usize) {
            tally.record_edge();
        }
    }
}

impl<const N: usize> Default for TallyBank<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> GpioController for &'static TallyBank<N> {
    type Pin = &'static EdgeTally;
    type Error = PinOutOfRange;

    fn open_pin(&mut self, pin: PinId) -> Result<Self::Pin, Self::Error> {
        let bank: &'static TallyBank<N> = *self;
        bank.tallies.get(pin as usize).ok_or(PinOutOfRange(pin))
    }
}
