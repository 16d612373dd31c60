use num_traits::float::FloatCore;

/// Exponential moving average over whole RPM readings.
///
/// `next = round(alpha * sample + (1 - alpha) * previous)`. A sample equal to
/// the previous output is a fixed point.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Ema {
    alpha: f64,
}

impl Ema {
    /// `alpha` is clamped into 0..=1, NaN falls back to 1 (no smoothing).
    pub fn new(alpha: f64) -> Self {
        let alpha = if alpha.is_nan() {
            1.0
        } else {
            alpha.clamp(0.0, 1.0)
        };
        Self { alpha }
    }

    pub fn alpha(&self) -> f64 {
        self.alpha
    }

    pub fn apply(&self, previous: u32, sample: u32) -> u32 {
        let blended = self.alpha * f64::from(sample) + (1.0 - self.alpha) * f64::from(previous);
        FloatCore::round(blended) as u32
    }
}
