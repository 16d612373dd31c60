//! Simulated hardware for host tests.
use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicUsize, Ordering},
        Arc, Mutex,
    },
    vec::Vec,
};

use fugit::{HertzU32, HertzU64, MillisDurationU32};

use tacho_hardware::{
    ChannelId, DriveMode, EdgeCounter, GpioController, HiResClock, PeriodicScheduler,
    PeriodicTask, PinId, PwmController, PwmOutput, PwmProvider, TickHandle,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SimError;

/// Test side view of a simulated encoder pin.
#[derive(Default)]
pub struct PinProbe {
    counting: AtomicBool,
    pending: AtomicU32,
    starts: AtomicUsize,
    stops: AtomicUsize,
    mode: Mutex<Option<DriveMode>>,
}

impl PinProbe {
    /// Edges arriving at the pin. Only counted while counting is enabled.
    pub fn pulse(&self, edges: u32) {
        if self.counting.load(Ordering::SeqCst) {
            self.pending.fetch_add(edges, Ordering::SeqCst);
        }
    }

    pub fn is_counting(&self) -> bool {
        self.counting.load(Ordering::SeqCst)
    }

    pub fn pending(&self) -> u32 {
        self.pending.load(Ordering::SeqCst)
    }

    pub fn starts(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }

    pub fn stops(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }

    pub fn drive_mode(&self) -> Option<DriveMode> {
        *self.mode.lock().unwrap()
    }
}

pub struct SimPin {
    probe: Arc<PinProbe>,
}

impl EdgeCounter for SimPin {
    fn set_drive_mode(&mut self, mode: DriveMode) {
        *self.probe.mode.lock().unwrap() = Some(mode);
    }

    fn start_counting(&mut self) {
        self.probe.starts.fetch_add(1, Ordering::SeqCst);
        self.probe.counting.store(true, Ordering::SeqCst);
    }

    fn stop_counting(&mut self) {
        self.probe.stops.fetch_add(1, Ordering::SeqCst);
        self.probe.counting.store(false, Ordering::SeqCst);
    }

    fn read_and_reset_count(&mut self) -> u32 {
        self.probe.pending.swap(0, Ordering::SeqCst)
    }
}

#[derive(Default)]
pub struct SimGpio {
    pins: HashMap<PinId, Arc<PinProbe>>,
    broken: bool,
}

impl SimGpio {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self {
            broken: true,
            ..Self::default()
        }
    }

    pub fn probe(&self, pin: PinId) -> Arc<PinProbe> {
        self.pins.get(&pin).cloned().expect("pin was never opened")
    }
}

impl GpioController for SimGpio {
    type Pin = SimPin;
    type Error = SimError;

    fn open_pin(&mut self, pin: PinId) -> Result<Self::Pin, Self::Error> {
        if self.broken {
            return Err(SimError);
        }
        let probe = self.pins.entry(pin).or_default().clone();
        Ok(SimPin { probe })
    }
}

/// Manually advanced clock. Clones share the same time.
#[derive(Clone)]
pub struct SimClock {
    now: Arc<AtomicU64>,
    frequency: u64,
}

impl SimClock {
    pub fn new(frequency: u64) -> Self {
        Self {
            // Start away from zero like a real free-running counter
            now: Arc::new(AtomicU64::new(1_000)),
            frequency,
        }
    }

    pub fn advance(&self, ticks: u64) {
        self.now.fetch_add(ticks, Ordering::SeqCst);
    }
}

impl HiResClock for SimClock {
    fn frequency(&self) -> HertzU64 {
        HertzU64::from_raw(self.frequency)
    }

    fn now(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }
}

pub struct FailingScheduler;

impl PeriodicScheduler for FailingScheduler {
    type Handle = TickHandle;
    type Error = SimError;

    fn schedule(
        &mut self,
        _interval: MillisDurationU32,
        _task: Arc<dyn PeriodicTask>,
    ) -> Result<Self::Handle, Self::Error> {
        Err(SimError)
    }
}

/// Test side view of one PWM output.
#[derive(Default)]
pub struct OutputProbe {
    duties: Mutex<Vec<f64>>,
    started: AtomicBool,
}

impl OutputProbe {
    pub fn duties(&self) -> Vec<f64> {
        self.duties.lock().unwrap().clone()
    }

    pub fn last_duty(&self) -> Option<f64> {
        self.duties.lock().unwrap().last().copied()
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }
}

pub struct SimOutput {
    probe: Arc<OutputProbe>,
}

impl PwmOutput for SimOutput {
    type Error = SimError;

    fn start(&mut self) -> Result<(), Self::Error> {
        self.probe.started.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn set_active_duty_cycle_percentage(&mut self, percentage: f64) -> Result<(), Self::Error> {
        self.probe.duties.lock().unwrap().push(percentage);
        Ok(())
    }
}

/// Records everything done to the simulated PWM chip.
#[derive(Default)]
pub struct PwmBench {
    discoveries: AtomicUsize,
    frequencies: Mutex<Vec<u32>>,
    outputs: Mutex<HashMap<ChannelId, Arc<OutputProbe>>>,
}

impl PwmBench {
    pub fn discoveries(&self) -> usize {
        self.discoveries.load(Ordering::SeqCst)
    }

    pub fn frequencies(&self) -> Vec<u32> {
        self.frequencies.lock().unwrap().clone()
    }

    pub fn output(&self, channel: ChannelId) -> Arc<OutputProbe> {
        self.outputs
            .lock()
            .unwrap()
            .get(&channel)
            .cloned()
            .expect("channel was never opened")
    }

    pub fn opened(&self) -> usize {
        self.outputs.lock().unwrap().len()
    }
}

pub struct SimController {
    bench: Arc<PwmBench>,
}

impl PwmController for SimController {
    type Output = SimOutput;
    type Error = SimError;

    fn set_frequency(&mut self, frequency: HertzU32) -> Result<(), Self::Error> {
        self.bench.frequencies.lock().unwrap().push(frequency.raw());
        Ok(())
    }

    fn open_pin(&mut self, channel: ChannelId) -> Result<Self::Output, Self::Error> {
        let probe = Arc::new(OutputProbe::default());
        self.bench
            .outputs
            .lock()
            .unwrap()
            .insert(channel, probe.clone());
        Ok(SimOutput { probe })
    }
}

pub enum Discovery {
    Found(usize),
    Fails,
}

pub struct SimProvider {
    bench: Arc<PwmBench>,
    discovery: Discovery,
}

impl SimProvider {
    pub fn new(discovery: Discovery) -> (Self, Arc<PwmBench>) {
        let bench = Arc::new(PwmBench::default());
        (
            Self {
                bench: bench.clone(),
                discovery,
            },
            bench,
        )
    }
}

impl PwmProvider for SimProvider {
    type Controller = SimController;
    type Error = SimError;

    async fn discover_controllers(&mut self) -> Result<Vec<Self::Controller>, Self::Error> {
        self.bench.discoveries.fetch_add(1, Ordering::SeqCst);
        // Give concurrent callers a chance to race the acquisition
        embassy_futures::yield_now().await;

        match self.discovery {
            Discovery::Found(count) => Ok((0..count)
                .map(|_| SimController {
                    bench: self.bench.clone(),
                })
                .collect()),
            Discovery::Fails => Err(SimError),
        }
    }
}
