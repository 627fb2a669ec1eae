//! Contains the interfaces to the robot model and the joint-state monitor.
//!
//! Both collaborators live outside this crate. The servo loop only needs forward
//! kinematics for named links, the group Jacobian and the per-joint bounds; the
//! monitor only needs to hand out the latest joint state of the controlled group.
use crate::trajectory::JointState;
use nalgebra::{DMatrix, DVector, Isometry3};
use serde::{Deserialize, Serialize};

/// Per-joint kinematic bounds as reported by the robot model.
///
/// Every field is optional; consumers substitute the crate defaults for absent
/// velocity, acceleration and jerk bounds and skip the position check for joints
/// without position bounds.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq)]
pub struct JointLimits {
    /// Lower position bound in \[rad\].
    pub min_position: Option<f64>,
    /// Upper position bound in \[rad\].
    pub max_position: Option<f64>,
    /// Symmetric velocity bound in \[rad/s\].
    pub max_velocity: Option<f64>,
    /// Symmetric acceleration bound in \[rad/s²\].
    pub max_acceleration: Option<f64>,
    /// Symmetric jerk bound in \[rad/s³\].
    pub max_jerk: Option<f64>,
}

/// Kinematics of one controlled joint group.
///
/// Implementations wrap whatever kinematics library the application uses. All
/// positions passed in are group-ordered and of group length.
pub trait RobotModel: Send + Sync {
    /// Name of the move group this model describes.
    fn move_group_name(&self) -> &str;

    /// Names of the actuated joints of the group, in order.
    fn joint_names(&self) -> Vec<String>;

    /// Number of actuated joints.
    fn dof(&self) -> usize {
        self.joint_names().len()
    }

    /// 6×N Jacobian of the end effector at `positions`, expressed in the planning
    /// frame. Rows are (vx, vy, vz, ωx, ωy, ωz).
    fn jacobian(&self, positions: &DVector<f64>) -> DMatrix<f64>;

    /// base→link transform at `positions`, or `None` for an unknown link name.
    fn link_transform(&self, link: &str, positions: &DVector<f64>) -> Option<Isometry3<f64>>;

    /// Bounds of joint `index`.
    fn joint_limits(&self, index: usize) -> JointLimits;
}

/// Source of the latest joint state of the controlled group.
///
/// The servo loop snapshots this once per cycle; implementations must be cheap and
/// thread safe.
pub trait StateMonitor: Send + Sync {
    /// Latest joint state, group-ordered, `position.len() == velocity.len() == N`.
    fn current_state(&self) -> JointState;
}
