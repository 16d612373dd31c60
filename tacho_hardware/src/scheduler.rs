use alloc::{sync::Arc, vec::Vec};
use core::sync::atomic::{AtomicBool, Ordering};

use fugit::MillisDurationU32;

/// Work run on every period of a [`PeriodicScheduler`].
pub trait PeriodicTask: Send + Sync {
    fn run(&self);
}

pub trait CancelHandle {
    /// Stops further runs. Calling it more than once is harmless.
    fn cancel(&mut self);
}

pub trait PeriodicScheduler {
    type Handle: CancelHandle + Send + Sync + 'static;
    type Error: core::fmt::Debug;

    fn schedule(
        &mut self,
        interval: MillisDurationU32,
        task: Arc<dyn PeriodicTask>,
    ) -> Result<Self::Handle, Self::Error>;
}

struct Entry {
    interval: MillisDurationU32,
    waited: u32,
    task: Arc<dyn PeriodicTask>,
    cancelled: Arc<AtomicBool>,
}

/// Scheduler advanced by an external timebase, e.g. a monotonic RTIC task:
///
/// ```ignore
/// #[task(local = [scheduler])]
/// async fn sampler(ctx: sampler::Context) {
///     loop {
///         Mono::delay(10.millis()).await;
///         ctx.local.scheduler.tick(10.millis());
///     }
/// }
/// ```
///
/// A task runs at most once per [`TickScheduler::tick`]; missed periods are
/// coalesced rather than replayed.
#[derive(Default)]
pub struct TickScheduler {
    entries: Vec<Entry>,
}

pub struct TickHandle {
    cancelled: Arc<AtomicBool>,
}

impl CancelHandle for TickHandle {
    fn cancel(&mut self) {
        self.cancelled.store(true, Ordering::Release);
    }
}

impl TickScheduler {
    pub const fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Advances every task by `elapsed` and runs the ones that came due.
    /// Returns how many tasks ran.
    pub fn tick(&mut self, elapsed: MillisDurationU32) -> usize {
        self.entries
            .retain(|entry| !entry.cancelled.load(Ordering::Acquire));

        let mut ran = 0;
        for entry in self.entries.iter_mut() {
            entry.waited = entry.waited.saturating_add(elapsed.ticks());
            if entry.waited < entry.interval.ticks() {
                continue;
            }
            entry.waited = 0;

            // An earlier task in this tick may have cancelled this one
            if entry.cancelled.load(Ordering::Acquire) {
                continue;
            }
            entry.task.run();
            ran += 1;
        }

        ran
    }

    /// Number of live (not cancelled) tasks.
    pub fn len(&self) -> usize {
        self.entries
            .iter()
            .filter(|entry| !entry.cancelled.load(Ordering::Acquire))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl PeriodicScheduler for TickScheduler {
    type Handle = TickHandle;
    type Error = core::convert::Infallible;

    fn schedule(
        &mut self,
        interval: MillisDurationU32,
        task: Arc<dyn PeriodicTask>,
    ) -> Result<Self::Handle, Self::Error> {
        let cancelled = Arc::new(AtomicBool::new(false));
        self.entries.push(Entry {
            interval,
            waited: 0,
            task,
            cancelled: cancelled.clone(),
        });
        Ok(TickHandle { cancelled })
    }
}
