// Portions derived from MoveIt Servo (servo_calcs),
// Copyright (c) 2019, Los Alamos National Security, LLC. BSD-3-Clause.

//! Contains the frame-transform helper of the Cartesian command path.
//!
//! A twist is a pure velocity, so re-framing applies only the rotation between the
//! frames and never a translation.
use crate::model::RobotModel;
use crate::servo::command::TwistCommand;
use crate::utils::Throttle;
use nalgebra::{DVector, Isometry3};
use tracing::warn;

/// Transforms from the planning frame to the end-effector and command frames,
/// refreshed once per cycle from the current joint positions.
///
/// `None` marks a cache which was never refreshed.
#[derive(Debug, Clone, Default)]
pub struct TransformCache {
    pub planning_to_ee: Option<Isometry3<f64>>,
    pub planning_to_cmd: Option<Isometry3<f64>>,
}

impl TransformCache {
    /// Recomputes both cached transforms at `positions`.
    ///
    /// An unknown link leaves the corresponding entry at `None`.
    pub fn refresh(
        &mut self,
        model: &dyn RobotModel,
        positions: &DVector<f64>,
        planning_frame: &str,
        ee_frame: &str,
        command_frame: &str,
    ) {
        self.planning_to_ee = relative_transform(model, positions, planning_frame, ee_frame);
        self.planning_to_cmd = relative_transform(model, positions, planning_frame, command_frame);
    }
}

/// planning→target, solved as (base→planning)⁻¹ · (base→target).
pub fn relative_transform(
    model: &dyn RobotModel,
    positions: &DVector<f64>,
    planning_frame: &str,
    target_frame: &str,
) -> Option<Isometry3<f64>> {
    let base_to_planning = model.link_transform(planning_frame, positions)?;
    let base_to_target = model.link_transform(target_frame, positions)?;
    Some(base_to_planning.inverse() * base_to_target)
}

/// Rotates `command` into the planning frame.
///
/// Twists in the configured command frame or the end-effector frame reuse the cached
/// transforms; any other frame is resolved through the model. Returns false when the
/// source frame is unknown, which makes the loop skip the cycle.
#[allow(clippy::too_many_arguments)]
pub fn transform_twist_to_planning_frame(
    command: &mut TwistCommand,
    cache: &TransformCache,
    model: &dyn RobotModel,
    positions: &DVector<f64>,
    planning_frame: &str,
    ee_frame: &str,
    command_frame: &str,
    throttle: &mut Throttle,
) -> bool {
    if command.frame_id == planning_frame {
        return true;
    }
    let transform = if command.frame_id.is_empty() || command.frame_id == command_frame {
        cache.planning_to_cmd
    } else if command.frame_id == ee_frame {
        cache.planning_to_ee
    } else {
        relative_transform(model, positions, planning_frame, &command.frame_id)
    };
    let transform = match transform {
        Some(transform) => transform,
        None => {
            if throttle.ready() {
                warn!(
                    "Unknown command frame {:?}. Skipping this datapoint.",
                    command.frame_id
                );
            }
            return false;
        }
    };
    command.linear = transform.rotation * command.linear;
    command.angular = transform.rotation * command.angular;
    command.frame_id = planning_frame.to_string();
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::JointLimits;
    use nalgebra::{DMatrix, Translation3, UnitQuaternion, Vector3};
    use std::f64::consts::FRAC_PI_2;
    use std::time::Duration;

    struct FrameModel;

    impl RobotModel for FrameModel {
        fn move_group_name(&self) -> &str {
            "group"
        }
        fn joint_names(&self) -> Vec<String> {
            vec!["joint_a".to_string()]
        }
        fn jacobian(&self, _positions: &DVector<f64>) -> DMatrix<f64> {
            DMatrix::zeros(6, 1)
        }
        fn link_transform(
            &self,
            link: &str,
            _positions: &DVector<f64>,
        ) -> Option<Isometry3<f64>> {
            match link {
                "base_link" => Some(Isometry3::identity()),
                // rotated 90 degrees about z, one meter along x
                "tool" => Some(Isometry3::from_parts(
                    Translation3::new(1., 0., 0.),
                    UnitQuaternion::from_axis_angle(&Vector3::z_axis(), FRAC_PI_2),
                )),
                _ => None,
            }
        }
        fn joint_limits(&self, _index: usize) -> JointLimits {
            JointLimits::default()
        }
    }

    fn command_in(frame: &str) -> TwistCommand {
        TwistCommand {
            frame_id: frame.to_string(),
            stamp: None,
            linear: Vector3::new(1., 0., 0.),
            angular: Vector3::new(0., 0., 1.),
        }
    }

    #[test]
    fn twist_in_planning_frame_is_untouched() {
        let mut command = command_in("base_link");
        let cache = TransformCache::default();
        let positions = DVector::zeros(1);
        assert!(transform_twist_to_planning_frame(
            &mut command,
            &cache,
            &FrameModel,
            &positions,
            "base_link",
            "ee",
            "cmd",
            &mut Throttle::new(Duration::from_secs(0)),
        ));
        assert_eq!(command.linear, Vector3::new(1., 0., 0.));
    }

    #[test]
    fn twist_is_rotated_not_translated() {
        let mut command = command_in("tool");
        let cache = TransformCache::default();
        let positions = DVector::zeros(1);
        assert!(transform_twist_to_planning_frame(
            &mut command,
            &cache,
            &FrameModel,
            &positions,
            "base_link",
            "ee",
            "cmd",
            &mut Throttle::new(Duration::from_secs(0)),
        ));
        // x of the tool frame points along y of the base; the 1 m offset must not leak in
        assert!((command.linear - Vector3::new(0., 1., 0.)).norm() < 1e-12);
        assert!((command.angular - Vector3::new(0., 0., 1.)).norm() < 1e-12);
        assert_eq!(command.frame_id, "base_link");
    }

    #[test]
    fn unknown_frame_fails_soft() {
        let mut command = command_in("nope");
        let cache = TransformCache::default();
        let positions = DVector::zeros(1);
        assert!(!transform_twist_to_planning_frame(
            &mut command,
            &cache,
            &FrameModel,
            &positions,
            "base_link",
            "ee",
            "cmd",
            &mut Throttle::new(Duration::from_secs(0)),
        ));
    }

    #[test]
    fn cache_refresh_solves_relative_transform() {
        let mut cache = TransformCache::default();
        let positions = DVector::zeros(1);
        cache.refresh(&FrameModel, &positions, "base_link", "tool", "nope");
        assert!(cache.planning_to_ee.is_some());
        assert!(cache.planning_to_cmd.is_none());
        let planning_to_ee = cache.planning_to_ee.unwrap();
        assert!((planning_to_ee.translation.vector - Vector3::new(1., 0., 0.)).norm() < 1e-12);
    }
}
