use core::f64::consts::PI;

use log::{debug, info};
use num_traits::Float;

use crate::{config::RobotConfig, listeners::Listeners};

/// Straight line distance to the target that counts as arrived, meters.
pub const POSITION_TOLERANCE: f64 = 0.01;
/// Heading error that counts as arrived, degrees.
pub const ANGLE_TOLERANCE: f64 = 5.0;

/// Position in meters from where the odometer was last reset, heading in
/// degrees counter-clockwise from the starting direction, within -180..=180.
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct Pose {
    pub x: f64,
    pub y: f64,
    pub theta: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WheelGeometry {
    /// Linear travel of a wheel per encoder pulse, in meters.
    pub meters_per_pulse: f64,
    /// Distance between the wheel contact points, in meters.
    pub axle_length: f64,
}

impl WheelGeometry {
    pub fn from_robot(robot: &RobotConfig) -> Self {
        Self {
            meters_per_pulse: robot.meters_per_pulse(),
            axle_length: robot.axle_length,
        }
    }
}

struct Tracking {
    target: Pose,
    previous_distance: f64,
    position_done: bool,
    angle_done: bool,
}

/// Dead reckoning from signed wheel pulse counts.
///
/// Each update treats the motion since the last one as a circular arc (or a
/// straight line when both wheels moved the same amount).
/// See <http://www.seattlerobotics.org/encoder/200010/dead_reckoning_article.html>
///
/// With a target set by [`Odometer::track`], updates also report when the
/// robot gets there. Position counts as reached inside
/// [`POSITION_TOLERANCE`] or as soon as the distance starts growing again,
/// so an overshoot still ends the move. Each stream fires once per target.
pub struct Odometer {
    geometry: WheelGeometry,
    x: f64,
    y: f64,
    /// Radians, kept within -PI..=PI
    heading: f64,
    tracking: Option<Tracking>,
    position_changed: Listeners<Pose>,
    position_reached: Listeners<Pose>,
    angle_reached: Listeners<Pose>,
}

impl Odometer {
    pub fn new(geometry: WheelGeometry) -> Self {
        Self {
            geometry,
            x: 0.0,
            y: 0.0,
            heading: 0.0,
            tracking: None,
            position_changed: Listeners::new(),
            position_reached: Listeners::new(),
            angle_reached: Listeners::new(),
        }
    }

    pub fn geometry(&self) -> WheelGeometry {
        self.geometry
    }

    pub fn pose(&self) -> Pose {
        Pose {
            x: self.x,
            y: self.y,
            theta: self.heading.to_degrees(),
        }
    }

    /// Returns to the origin. Any tracked target is dropped, since it was
    /// relative to the old frame.
    pub fn reset(&mut self) {
        self.x = 0.0;
        self.y = 0.0;
        self.heading = 0.0;
        self.tracking = None;
    }

    /// Starts watching for `target`. Replaces any earlier target and re-arms
    /// both reached streams.
    pub fn track(&mut self, target: Pose) {
        let target = Pose {
            theta: wrap_degrees(target.theta),
            ..target
        };
        debug!(
            "odometry: tracking x {} y {} theta {}",
            target.x, target.y, target.theta
        );
        self.tracking = Some(Tracking {
            target,
            previous_distance: f64::INFINITY,
            position_done: false,
            angle_done: false,
        });
    }

    pub fn clear_tracking(&mut self) {
        self.tracking = None;
    }

    pub fn target(&self) -> Option<Pose> {
        self.tracking.as_ref().map(|tracking| tracking.target)
    }

    /// Every update's pose.
    pub fn position_changed(&self) -> &Listeners<Pose> {
        &self.position_changed
    }

    /// The pose at which the tracked position was reached or overshot.
    pub fn position_reached(&self) -> &Listeners<Pose> {
        &self.position_reached
    }

    /// The pose at which the heading came within [`ANGLE_TOLERANCE`] of the
    /// tracked one.
    pub fn angle_reached(&self) -> &Listeners<Pose> {
        &self.angle_reached
    }

    /// Folds in the pulses each wheel turned since the previous update and
    /// notifies listeners.
    pub fn update(&mut self, left_pulses: i64, right_pulses: i64) -> Pose {
        let dist_left = left_pulses as f64 * self.geometry.meters_per_pulse;
        let dist_right = right_pulses as f64 * self.geometry.meters_per_pulse;
        let axle = self.geometry.axle_length;

        let (sin_current, cos_current) = Float::sin_cos(self.heading);

        if left_pulses == right_pulses {
            self.x += dist_left * cos_current;
            self.y += dist_left * sin_current;
        } else {
            let right_minus_left = dist_right - dist_left;
            let turn_radius = axle * (dist_right + dist_left) / 2.0 / right_minus_left;
            let heading = self.heading + right_minus_left / axle;

            self.x += turn_radius * (Float::sin(heading) - sin_current);
            self.y -= turn_radius * (Float::cos(heading) - cos_current);
            self.heading = wrap_angle(heading);
        }

        let pose = self.pose();
        debug!(
            "odometry: x {} y {} theta {}",
            pose.x, pose.y, pose.theta
        );
        self.position_changed.emit(pose);

        let (position, angle) = self.check_tracking(pose);
        if position {
            info!("odometry: position reached");
            self.position_reached.emit(pose);
        }
        if angle {
            info!("odometry: heading reached");
            self.angle_reached.emit(pose);
        }
        pose
    }

    fn check_tracking(&mut self, pose: Pose) -> (bool, bool) {
        let Some(tracking) = self.tracking.as_mut() else {
            return (false, false);
        };

        let mut position = false;
        if !tracking.position_done {
            let distance = Float::hypot(tracking.target.x - pose.x, tracking.target.y - pose.y);
            if distance < POSITION_TOLERANCE || distance > tracking.previous_distance {
                tracking.position_done = true;
                position = true;
            }
            tracking.previous_distance = distance;
        }

        let mut angle = false;
        if !tracking.angle_done {
            let error = wrap_degrees(tracking.target.theta - pose.theta);
            if error.abs() < ANGLE_TOLERANCE {
                tracking.angle_done = true;
                angle = true;
            }
        }

        (position, angle)
    }
}

/// Into -180..=180 degrees.
pub(crate) fn wrap_degrees(mut degrees: f64) -> f64 {
    if !degrees.is_finite() {
        return 0.0;
    }
    while degrees > 180.0 {
        degrees -= 360.0;
    }
    while degrees < -180.0 {
        degrees += 360.0;
    }
    degrees
}

fn wrap_angle(mut radians: f64) -> f64 {
    if !radians.is_finite() {
        return 0.0;
    }
    while radians > PI {
        radians -= 2.0 * PI;
    }
    while radians < -PI {
        radians += 2.0 * PI;
    }
    radians
}
