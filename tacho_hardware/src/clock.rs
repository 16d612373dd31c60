use fugit::HertzU64;

/// A free-running monotonic counter, e.g. a cycle counter or a chained timer.
///
/// The tick rate is fixed at boot, so callers are expected to query
/// [`HiResClock::frequency`] once and cache it.
pub trait HiResClock {
    fn frequency(&self) -> HertzU64;
    fn now(&self) -> u64;
}

impl<T: HiResClock + ?Sized> HiResClock for &T {
    fn frequency(&self) -> HertzU64 {
        (**self).frequency()
    }

    fn now(&self) -> u64 {
        (**self).now()
    }
}
