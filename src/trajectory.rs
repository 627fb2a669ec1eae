//! Contains the joint-state and trajectory value types exchanged with the downstream
//! joint controller.
use serde::{Deserialize, Serialize};

/// Snapshot of the controlled joint group.
///
/// `position` and `velocity` always have one entry per actuated joint, in the order
/// given by `name`.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct JointState {
    /// Joint names, in group order.
    pub name: Vec<String>,
    /// Joint positions in \[rad\].
    pub position: Vec<f64>,
    /// Joint velocities in \[rad/s\].
    pub velocity: Vec<f64>,
}

impl JointState {
    /// Creates a zeroed joint state for the given joint names.
    pub fn zeroed(names: Vec<String>) -> Self {
        let n = names.len();
        JointState {
            name: names,
            position: vec![0.; n],
            velocity: vec![0.; n],
        }
    }
}

/// One sample of an outgoing joint trajectory.
///
/// Fields which the user did not request via the publish flags are left empty, since
/// some downstream controllers interpolate over every populated field.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct TrajectoryPoint {
    /// Desired joint positions in \[rad\].
    pub positions: Vec<f64>,
    /// Desired joint velocities in \[rad/s\].
    pub velocities: Vec<f64>,
    /// Desired joint accelerations in \[rad/s²\].
    pub accelerations: Vec<f64>,
    /// Offset of this sample from the start of the trajectory in \[s\].
    pub time_from_start: f64,
}

/// Outgoing joint trajectory message.
///
/// An absent `stamp` tells the downstream controller to begin immediately, which is
/// what the servo loop always requests.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct JointTrajectory {
    /// Frame the trajectory is expressed in.
    pub frame_id: String,
    /// `None` means "begin immediately".
    pub stamp: Option<f64>,
    /// Joint names, in group order.
    pub joint_names: Vec<String>,
    /// Trajectory samples. The servo loop emits exactly one per cycle.
    pub points: Vec<TrajectoryPoint>,
}

/// One waypoint of a stored trajectory handed to the jerk-limited smoother.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct Waypoint {
    /// Joint positions in \[rad\].
    pub position: Vec<f64>,
    /// Joint velocities in \[rad/s\]. May be empty, in which case zeros are assumed.
    pub velocity: Vec<f64>,
    /// Joint accelerations in \[rad/s²\]. May be empty, in which case zeros are assumed.
    pub acceleration: Vec<f64>,
    /// Duration since the previous waypoint in \[s\]. Zero for the first waypoint.
    pub duration_from_previous: f64,
}

impl Waypoint {
    /// Creates a waypoint from positions only. Velocities and accelerations are
    /// assumed zero.
    pub fn from_positions(position: Vec<f64>, duration_from_previous: f64) -> Self {
        Waypoint {
            position,
            velocity: Vec::new(),
            acceleration: Vec::new(),
            duration_from_previous,
        }
    }

    /// Velocity of joint `index`, treating an empty vector as all zeros.
    pub fn velocity_or_zero(&self, index: usize) -> f64 {
        self.velocity.get(index).copied().unwrap_or(0.)
    }

    /// Acceleration of joint `index`, treating an empty vector as all zeros.
    pub fn acceleration_or_zero(&self, index: usize) -> f64 {
        self.acceleration.get(index).copied().unwrap_or(0.)
    }
}
