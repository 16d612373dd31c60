use alloc::sync::Arc;
use core::{
    cell::RefCell,
    sync::atomic::{AtomicBool, Ordering},
};

use fugit::MillisDurationU32;
use log::{debug, error, info, warn};
use num_traits::Float;

use tacho_hardware::{
    EdgeCounter, GpioController, HiResClock, PeriodicScheduler, PeriodicTask, PwmController,
    PwmOutput, PwmProvider,
};

use crate::{
    config::{DriveConfig, RobotConfig},
    controls::motor_math,
    error::DriveError,
    motors::{motor::MotionController, OpenLoopDrive, Tachometer},
    odometry::{wrap_degrees, Odometer, Pose, WheelGeometry},
    registry::ControllerRegistry,
};

/// Everything read from the wheels during one odometry update.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OdometryReading {
    pub left_rpm: i32,
    pub right_rpm: i32,
    pub left_pulses: i64,
    pub right_pulses: i64,
    pub pose: Pose,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Maneuver {
    Distance,
    Turn,
}

/// Set from the odometer's reached streams, consumed after each update.
#[derive(Default)]
struct Arrivals {
    position: AtomicBool,
    angle: AtomicBool,
}

impl Arrivals {
    fn clear(&self) {
        self.position.store(false, Ordering::Release);
        self.angle.store(false, Ordering::Release);
    }
}

/// Two independently driven wheels, open loop, with dead reckoning.
///
/// The distance and turn moves run at a fixed throttle until the odometer
/// reports the target reached, so they only make progress while something
/// calls [`Drivetrain::update_odometry`], e.g. the task from
/// [`schedule_odometry`].
pub struct Drivetrain<M: OpenLoopDrive + Tachometer> {
    left: M,
    right: M,
    odometer: Odometer,
    arrivals: Arc<Arrivals>,
    maneuver: Option<Maneuver>,
    max_forward_throttle: f64,
    max_reverse_throttle: f64,
    move_throttle: f64,
    turn_throttle: f64,
}

impl<M: OpenLoopDrive + Tachometer> Drivetrain<M> {
    pub fn new(left: M, right: M, robot: &RobotConfig) -> Self {
        // clamp() needs ordered, non-NaN bounds
        let forward = motor_math::clamp_throttle(robot.max_forward_throttle);
        let reverse = motor_math::clamp_throttle(robot.max_reverse_throttle);
        let (forward, reverse) = match (forward.is_nan(), reverse.is_nan()) {
            (false, false) => (forward.max(reverse), forward.min(reverse)),
            _ => (0.0, 0.0),
        };

        let odometer = Odometer::new(WheelGeometry::from_robot(robot));
        let arrivals = Arc::new(Arrivals::default());
        let flag = arrivals.clone();
        odometer
            .position_reached()
            .subscribe(move |_| flag.position.store(true, Ordering::Release));
        let flag = arrivals.clone();
        odometer
            .angle_reached()
            .subscribe(move |_| flag.angle.store(true, Ordering::Release));

        Self {
            left,
            right,
            odometer,
            arrivals,
            maneuver: None,
            max_forward_throttle: forward,
            max_reverse_throttle: reverse,
            move_throttle: move_speed(robot.move_throttle),
            turn_throttle: move_speed(robot.turn_throttle),
        }
    }

    /// Sets each wheel's throttle in percent, limited to the robot's range.
    pub fn drive(&mut self, left: f64, right: f64) {
        let left = self.limit(left);
        let right = self.limit(right);
        debug!("drive: left {} right {}", left, right);

        self.left.set_throttle(left);
        self.right.set_throttle(right);
    }

    /// Zeroes both wheels and abandons any move in progress.
    pub fn stop(&mut self) {
        self.left.set_throttle(0.0);
        self.right.set_throttle(0.0);
        if self.maneuver.take().is_some() {
            debug!("drive: move ended");
        }
        self.odometer.clear_tracking();
        self.arrivals.clear();
    }

    /// Drives straight ahead `meters` along the current heading.
    pub fn forward(&mut self, meters: f64) {
        if !valid_amount(meters) {
            warn!("forward: ignoring distance {}", meters);
            return;
        }
        self.start_distance(meters, self.move_throttle);
    }

    /// Backs up `meters` along the current heading.
    pub fn reverse(&mut self, meters: f64) {
        if !valid_amount(meters) {
            warn!("reverse: ignoring distance {}", meters);
            return;
        }
        self.start_distance(-meters, -self.move_throttle);
    }

    /// Spins in place counter-clockwise by `degrees`.
    pub fn turn_left(&mut self, degrees: f64) {
        if !valid_amount(degrees) {
            warn!("turn left: ignoring angle {}", degrees);
            return;
        }
        self.start_turn(degrees, -self.turn_throttle, self.turn_throttle);
    }

    /// Spins in place clockwise by `degrees`.
    pub fn turn_right(&mut self, degrees: f64) {
        if !valid_amount(degrees) {
            warn!("turn right: ignoring angle {}", degrees);
            return;
        }
        self.start_turn(-degrees, self.turn_throttle, -self.turn_throttle);
    }

    /// True while a distance or turn move is waiting for its target.
    pub fn is_moving(&self) -> bool {
        self.maneuver.is_some()
    }

    /// Drains both wheels' pulse counts into the odometer, and stops the
    /// current move if this update reached its target.
    pub fn update_odometry(&mut self) -> OdometryReading {
        let left_rpm = self.left.rpm();
        let right_rpm = self.right.rpm();
        let left_pulses = self.left.encoder_pulses();
        let right_pulses = self.right.encoder_pulses();

        let pose = self.odometer.update(left_pulses, right_pulses);

        let arrived = match self.maneuver {
            Some(Maneuver::Distance) => self.arrivals.position.load(Ordering::Acquire),
            Some(Maneuver::Turn) => self.arrivals.angle.load(Ordering::Acquire),
            None => false,
        };
        if arrived {
            info!("drive: target reached at x {} y {} theta {}", pose.x, pose.y, pose.theta);
            self.stop();
        }

        OdometryReading {
            left_rpm,
            right_rpm,
            left_pulses,
            right_pulses,
            pose,
        }
    }

    pub fn pose(&self) -> Pose {
        self.odometer.pose()
    }

    /// Moves the origin to the current position. A move in progress is
    /// stopped since its target was in the old frame.
    pub fn reset_odometry(&mut self) {
        self.stop();
        self.odometer.reset();
    }

    pub fn odometer(&self) -> &Odometer {
        &self.odometer
    }

    pub fn left(&self) -> &M {
        &self.left
    }

    pub fn right(&self) -> &M {
        &self.right
    }

    fn start_distance(&mut self, meters: f64, throttle: f64) {
        self.stop();
        let pose = self.pose();
        let (sin, cos) = Float::sin_cos(pose.theta.to_radians());
        let target = Pose {
            x: pose.x + cos * meters,
            y: pose.y + sin * meters,
            theta: pose.theta,
        };
        info!("drive: {} m to x {} y {}", meters, target.x, target.y);

        self.odometer.track(target);
        self.maneuver = Some(Maneuver::Distance);
        self.drive(throttle, throttle);
    }

    fn start_turn(&mut self, degrees: f64, left: f64, right: f64) {
        self.stop();
        let pose = self.pose();
        let target = Pose {
            theta: wrap_degrees(pose.theta + degrees),
            ..pose
        };
        info!("drive: turn {} deg to {}", degrees, target.theta);

        self.odometer.track(target);
        self.maneuver = Some(Maneuver::Turn);
        self.drive(left, right);
    }

    fn limit(&self, percent: f64) -> f64 {
        // NaN passes through; the motor drops it
        percent.clamp(self.max_reverse_throttle, self.max_forward_throttle)
    }
}

fn valid_amount(amount: f64) -> bool {
    amount.is_finite() && amount > 0.0
}

fn move_speed(percent: f64) -> f64 {
    let percent = motor_math::clamp_throttle(percent).abs();
    if percent.is_nan() {
        0.0
    } else {
        percent
    }
}

/// A drivetrain shared between the odometry task and whoever commands it.
pub type SharedDrivetrain<M> = critical_section::Mutex<RefCell<Drivetrain<M>>>;

pub fn shared<M: OpenLoopDrive + Tachometer>(drivetrain: Drivetrain<M>) -> Arc<SharedDrivetrain<M>> {
    Arc::new(critical_section::Mutex::new(RefCell::new(drivetrain)))
}

struct OdometryTask<M: OpenLoopDrive + Tachometer> {
    drivetrain: Arc<SharedDrivetrain<M>>,
}

impl<M> PeriodicTask for OdometryTask<M>
where
    M: OpenLoopDrive + Tachometer + Send,
{
    fn run(&self) {
        critical_section::with(|cs| {
            self.drivetrain.borrow_ref_mut(cs).update_odometry();
        });
    }
}

/// Runs [`Drivetrain::update_odometry`] every `interval`. Cancelling the
/// returned handle stops the updates.
pub fn schedule_odometry<M, S>(
    drivetrain: &Arc<SharedDrivetrain<M>>,
    scheduler: &mut S,
    interval: MillisDurationU32,
) -> Result<S::Handle, DriveError>
where
    M: OpenLoopDrive + Tachometer + Send + 'static,
    S: PeriodicScheduler,
{
    let task: Arc<dyn PeriodicTask> = Arc::new(OdometryTask {
        drivetrain: drivetrain.clone(),
    });
    let handle = scheduler.schedule(interval, task).map_err(|e| {
        error!("could not schedule odometry: {:?}", e);
        DriveError::SchedulerUnavailable
    })?;

    info!("odometry every {} ms", interval.to_millis());
    Ok(handle)
}

impl<P, C, O> Drivetrain<MotionController<P, C, O>>
where
    P: EdgeCounter + Send + 'static,
    C: HiResClock + Clone + Send + Sync + 'static,
    O: PwmOutput,
{
    /// Wires both motors up to the pins and channels in `robot`. No PWM I/O
    /// happens until [`Drivetrain::initialize`].
    pub fn from_robot<G, S>(
        robot: &RobotConfig,
        gpio: &mut G,
        clock: C,
        scheduler: &mut S,
        config: &DriveConfig,
    ) -> Result<Self, DriveError>
    where
        G: GpioController<Pin = P>,
        S: PeriodicScheduler,
    {
        let ppr = robot.pulses_per_revolution();
        let left = MotionController::new(
            robot.left_pwm_channel,
            robot.left_encoder_pin,
            ppr,
            gpio,
            clock.clone(),
            scheduler,
            config,
        )?;
        let right = MotionController::new(
            robot.right_pwm_channel,
            robot.right_encoder_pin,
            ppr,
            gpio,
            clock,
            scheduler,
            config,
        )?;

        Ok(Self::new(left, right, robot))
    }

    /// Initializes the left motor, then the right. The first one to run
    /// acquires the shared PWM controller.
    pub async fn initialize<D>(&mut self, registry: &ControllerRegistry<D>) -> Result<(), DriveError>
    where
        D: PwmProvider,
        D::Controller: PwmController<Output = O>,
    {
        self.left.initialize(registry).await?;
        self.right.initialize(registry).await?;
        info!("drivetrain ready");
        Ok(())
    }

    pub fn shutdown(&mut self) {
        self.stop();
        self.left.shutdown();
        self.right.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PwmCalibration;
    use crate::mock::{Discovery, FailingScheduler, SimClock, SimGpio, SimOutput, SimPin, SimProvider};
    use core::cell::Cell;
    use embassy_futures::block_on;
    use tacho_hardware::{CancelHandle, TickScheduler};

    #[derive(Default)]
    struct FakeMotor {
        throttle: f64,
        rpm: i32,
        pulses: Cell<i64>,
    }

    impl OpenLoopDrive for FakeMotor {
        fn set_throttle(&mut self, percent: f64) {
            if !percent.is_nan() {
                self.throttle = percent;
            }
        }

        fn throttle(&self) -> f64 {
            self.throttle
        }
    }

    impl Tachometer for FakeMotor {
        fn rpm(&self) -> i32 {
            self.rpm
        }

        fn encoder_pulses(&self) -> i64 {
            self.pulses.take()
        }
    }

    fn drivetrain() -> Drivetrain<FakeMotor> {
        Drivetrain::new(
            FakeMotor::default(),
            FakeMotor::default(),
            &RobotConfig::default(),
        )
    }

    #[test]
    fn drive_is_limited_to_robot_range() {
        let mut drivetrain = drivetrain();

        drivetrain.drive(80.0, -80.0);
        assert_eq!(drivetrain.left().throttle(), 25.0);
        assert_eq!(drivetrain.right().throttle(), -25.0);

        drivetrain.drive(10.0, -5.0);
        assert_eq!(drivetrain.left().throttle(), 10.0);
        assert_eq!(drivetrain.right().throttle(), -5.0);

        drivetrain.stop();
        assert_eq!(drivetrain.left().throttle(), 0.0);
        assert_eq!(drivetrain.right().throttle(), 0.0);
    }

    fn feed(drivetrain: &mut Drivetrain<FakeMotor>, left: i64, right: i64) -> Pose {
        drivetrain.left.pulses.set(left);
        drivetrain.right.pulses.set(right);
        drivetrain.update_odometry().pose
    }

    fn throttles(drivetrain: &Drivetrain<FakeMotor>) -> (f64, f64) {
        (drivetrain.left().throttle(), drivetrain.right().throttle())
    }

    #[test]
    fn forward_runs_until_the_distance_is_covered() {
        let mut drivetrain = drivetrain();

        drivetrain.forward(0.1);
        assert!(drivetrain.is_moving());
        assert_eq!(throttles(&drivetrain), (20.0, 20.0));
        let target = drivetrain.odometer().target().unwrap();
        assert!((target.x - 0.1).abs() < 1e-12 && target.y == 0.0);

        // About 0.05m in, still going
        feed(&mut drivetrain, 200, 200);
        assert!(drivetrain.is_moving());
        assert_eq!(throttles(&drivetrain), (20.0, 20.0));

        // 398 pulses is 0.1001m
        feed(&mut drivetrain, 198, 198);
        assert!(!drivetrain.is_moving());
        assert_eq!(throttles(&drivetrain), (0.0, 0.0));
        assert_eq!(drivetrain.odometer().target(), None);
    }

    #[test]
    fn overshooting_the_distance_still_stops() {
        let mut drivetrain = drivetrain();
        drivetrain.forward(0.1);

        feed(&mut drivetrain, 200, 200);
        // Lands 0.05m past the target
        feed(&mut drivetrain, 400, 400);

        assert!(!drivetrain.is_moving());
        assert_eq!(throttles(&drivetrain), (0.0, 0.0));
    }

    #[test]
    fn reverse_targets_behind_the_robot() {
        let mut drivetrain = drivetrain();

        drivetrain.reverse(0.1);
        assert_eq!(throttles(&drivetrain), (-20.0, -20.0));
        let target = drivetrain.odometer().target().unwrap();
        assert!((target.x + 0.1).abs() < 1e-12);

        feed(&mut drivetrain, -398, -398);
        assert!(!drivetrain.is_moving());
    }

    #[test]
    fn forward_follows_the_current_heading() {
        let mut drivetrain = drivetrain();
        // Spin to roughly +90 degrees first
        feed(&mut drivetrain, -687, 687);

        drivetrain.forward(0.5);
        let pose = drivetrain.pose();
        let target = drivetrain.odometer().target().unwrap();
        let (sin, cos) = Float::sin_cos(pose.theta.to_radians());

        assert!((target.x - (pose.x + 0.5 * cos)).abs() < 1e-12);
        assert!((target.y - (pose.y + 0.5 * sin)).abs() < 1e-12);
        assert!(target.y > 0.49);
    }

    #[test]
    fn turn_left_spins_until_the_heading_is_reached() {
        let mut drivetrain = drivetrain();

        drivetrain.turn_left(90.0);
        assert_eq!(throttles(&drivetrain), (-12.0, 12.0));
        assert_eq!(drivetrain.odometer().target().unwrap().theta, 90.0);

        // About 39 degrees
        feed(&mut drivetrain, -300, 300);
        assert!(drivetrain.is_moving());

        // 687 pulses a wheel is within a hundredth of a degree of 90
        let pose = feed(&mut drivetrain, -387, 387);
        assert!((pose.theta - 90.0).abs() < 0.1, "{pose:?}");
        assert!(!drivetrain.is_moving());
        assert_eq!(throttles(&drivetrain), (0.0, 0.0));
    }

    #[test]
    fn turn_right_spins_clockwise() {
        let mut drivetrain = drivetrain();

        drivetrain.turn_right(90.0);
        assert_eq!(throttles(&drivetrain), (12.0, -12.0));
        assert_eq!(drivetrain.odometer().target().unwrap().theta, -90.0);

        feed(&mut drivetrain, 687, -687);
        assert!(!drivetrain.is_moving());
    }

    #[test]
    fn turn_targets_wrap_into_half_turns() {
        let mut drivetrain = drivetrain();

        drivetrain.turn_left(270.0);
        let theta = drivetrain.odometer().target().unwrap().theta;
        assert!((theta + 90.0).abs() < 1e-9, "{theta}");

        drivetrain.turn_right(270.0);
        let theta = drivetrain.odometer().target().unwrap().theta;
        assert!((theta - 90.0).abs() < 1e-9, "{theta}");
    }

    #[test]
    fn turn_ignores_position_arrival() {
        let mut drivetrain = drivetrain();
        drivetrain.turn_left(90.0);

        // Spinning in place sits on the target position from the start
        feed(&mut drivetrain, -100, 100);

        assert!(drivetrain.is_moving());
    }

    #[test]
    fn bad_amounts_are_ignored() {
        let mut drivetrain = drivetrain();
        drivetrain.drive(5.0, 5.0);

        drivetrain.forward(0.0);
        drivetrain.reverse(-1.0);
        drivetrain.turn_left(f64::NAN);
        drivetrain.turn_right(f64::INFINITY);

        assert!(!drivetrain.is_moving());
        assert_eq!(throttles(&drivetrain), (5.0, 5.0));
    }

    #[test]
    fn new_move_replaces_the_old_one() {
        let mut drivetrain = drivetrain();
        drivetrain.forward(1.0);

        drivetrain.turn_left(90.0);
        // A straight run no longer counts as arrival
        feed(&mut drivetrain, 100, 100);
        assert!(drivetrain.is_moving());
        assert_eq!(throttles(&drivetrain), (-12.0, 12.0));
    }

    #[test]
    fn stop_and_reset_abandon_the_move() {
        let mut drivetrain = drivetrain();

        drivetrain.forward(1.0);
        drivetrain.stop();
        assert!(!drivetrain.is_moving());
        assert_eq!(drivetrain.odometer().target(), None);

        drivetrain.turn_left(45.0);
        drivetrain.reset_odometry();
        assert!(!drivetrain.is_moving());
        assert_eq!(throttles(&drivetrain), (0.0, 0.0));
    }

    #[test]
    fn move_throttles_come_from_the_robot() {
        let robot = RobotConfig {
            move_throttle: -60.0,
            turn_throttle: f64::NAN,
            ..RobotConfig::default()
        };
        let mut drivetrain = Drivetrain::new(FakeMotor::default(), FakeMotor::default(), &robot);

        // Sign is ignored, then limited to the robot's range
        drivetrain.forward(1.0);
        assert_eq!(throttles(&drivetrain), (25.0, 25.0));

        drivetrain.turn_left(10.0);
        assert_eq!(throttles(&drivetrain), (0.0, 0.0));
    }

    #[test]
    fn scheduled_odometry_ends_the_move() {
        let robot = RobotConfig::default();
        let drivetrain = shared(Drivetrain::new(
            FakeMotor::default(),
            FakeMotor::default(),
            &robot,
        ));
        let mut scheduler = TickScheduler::new();
        let mut handle =
            schedule_odometry(&drivetrain, &mut scheduler, robot.odometry_interval).unwrap();

        critical_section::with(|cs| {
            let mut drivetrain = drivetrain.borrow_ref_mut(cs);
            drivetrain.forward(0.1);
            drivetrain.left.pulses.set(400);
            drivetrain.right.pulses.set(400);
        });

        assert_eq!(scheduler.tick(MillisDurationU32::from_ticks(50)), 0);
        critical_section::with(|cs| assert!(drivetrain.borrow_ref(cs).is_moving()));

        assert_eq!(scheduler.tick(MillisDurationU32::from_ticks(50)), 1);
        critical_section::with(|cs| {
            let drivetrain = drivetrain.borrow_ref(cs);
            assert!(!drivetrain.is_moving());
            assert!(drivetrain.pose().x > 0.1);
        });

        handle.cancel();
        assert!(scheduler.is_empty());
    }

    #[test]
    fn odometry_schedule_failure_surfaces() {
        let drivetrain = shared(drivetrain());
        let result = schedule_odometry(
            &drivetrain,
            &mut FailingScheduler,
            MillisDurationU32::from_ticks(100),
        );
        assert_eq!(result.err(), Some(DriveError::SchedulerUnavailable));
    }

    #[test]
    fn odometry_drains_both_wheels() {
        let mut drivetrain = drivetrain();
        drivetrain.left.rpm = 30;
        drivetrain.right.rpm = 30;
        drivetrain.left.pulses.set(500);
        drivetrain.right.pulses.set(500);

        let reading = drivetrain.update_odometry();
        let expected_x = 500.0 * RobotConfig::default().meters_per_pulse();

        assert_eq!((reading.left_rpm, reading.right_rpm), (30, 30));
        assert_eq!((reading.left_pulses, reading.right_pulses), (500, 500));
        assert!((reading.pose.x - expected_x).abs() < 1e-12);
        assert_eq!(reading.pose, drivetrain.pose());

        // Counts were consumed
        assert_eq!(drivetrain.update_odometry().pose, reading.pose);

        drivetrain.reset_odometry();
        assert_eq!(drivetrain.pose(), Pose::default());
    }

    #[test]
    fn builds_and_initializes_from_robot_config() {
        let robot = RobotConfig::default();
        let (provider, bench) = SimProvider::new(Discovery::Found(1));
        let registry = ControllerRegistry::new(provider, &PwmCalibration::default());
        let mut gpio = SimGpio::new();
        let mut scheduler = TickScheduler::new();

        let mut drivetrain: Drivetrain<MotionController<SimPin, SimClock, SimOutput>> =
            Drivetrain::from_robot(
                &robot,
                &mut gpio,
                SimClock::new(10_000_000),
                &mut scheduler,
                &DriveConfig::default(),
            )
            .unwrap();
        assert_eq!(scheduler.len(), 2);

        block_on(drivetrain.initialize(&registry)).unwrap();
        assert_eq!(bench.discoveries(), 1);
        assert!(bench.output(robot.left_pwm_channel).is_started());
        assert!(bench.output(robot.right_pwm_channel).is_started());

        drivetrain.drive(100.0, 0.0);
        let full = motor_math::throttle_to_duty(25.0, &DriveConfig::default().pwm);
        assert_eq!(bench.output(robot.left_pwm_channel).last_duty(), Some(full));

        drivetrain.shutdown();
        assert!(scheduler.is_empty());
        assert!(!gpio.probe(robot.left_encoder_pin).is_counting());
    }
}
