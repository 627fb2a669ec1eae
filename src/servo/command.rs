// Portions derived from MoveIt Servo (servo_calcs),
// Copyright (c) 2019, Los Alamos National Security, LLC. BSD-3-Clause.

//! Contains the incoming command types and their validation and scaling.
use crate::servo::parameters::{CommandInType, ServoParameters};
use crate::utils::{Throttle, Vector6};
use nalgebra::{DVector, Vector3};
use std::collections::HashMap;
use std::time::Instant;
use tracing::warn;

/// Cartesian velocity command.
///
/// A `stamp` of `None` marks a command which was never stamped by its producer; such
/// commands do not advance the arrival time used for staleness checks.
#[derive(Debug, Clone, PartialEq)]
pub struct TwistCommand {
    /// Frame the twist is expressed in. Empty means the configured command frame.
    pub frame_id: String,
    pub stamp: Option<Instant>,
    /// Linear velocity (x, y, z).
    pub linear: Vector3<f64>,
    /// Angular velocity (x, y, z).
    pub angular: Vector3<f64>,
}

impl TwistCommand {
    pub fn is_nonzero(&self) -> bool {
        self.linear.x != 0.
            || self.linear.y != 0.
            || self.linear.z != 0.
            || self.angular.x != 0.
            || self.angular.y != 0.
            || self.angular.z != 0.
    }
}

/// Joint velocity (jog) command for a subset of the group.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JointJogCommand {
    pub stamp: Option<Instant>,
    pub joint_names: Vec<String>,
    /// One velocity per entry of `joint_names`.
    pub velocities: Vec<f64>,
}

impl JointJogCommand {
    pub fn is_nonzero(&self) -> bool {
        self.velocities.iter().any(|&v| v != 0.)
    }
}

/// Checks an incoming twist for NaN and, in unitless mode, for components outside
/// \[-1, 1\]. An invalid command makes the loop skip the cycle.
pub fn check_valid_command(
    command: &TwistCommand,
    command_in_type: CommandInType,
    throttle: &mut Throttle,
) -> bool {
    let components = [
        command.linear.x,
        command.linear.y,
        command.linear.z,
        command.angular.x,
        command.angular.y,
        command.angular.z,
    ];
    if components.iter().any(|c| c.is_nan()) {
        if throttle.ready() {
            warn!("nan in incoming command. Skipping this datapoint.");
        }
        return false;
    }
    if command_in_type == CommandInType::Unitless && components.iter().any(|c| c.abs() > 1.) {
        if throttle.ready() {
            warn!("Component of incoming command is >1. Skipping this datapoint.");
        }
        return false;
    }
    true
}

/// Checks an incoming jog command for NaN.
pub fn check_valid_jog_command(command: &JointJogCommand, throttle: &mut Throttle) -> bool {
    if command.velocities.iter().any(|v| v.is_nan()) {
        if throttle.ready() {
            warn!("nan in incoming command. Skipping this datapoint.");
        }
        return false;
    }
    true
}

/// Converts a twist into a Cartesian position delta over one publish period.
pub fn scale_cartesian_command(command: &TwistCommand, parameters: &ServoParameters) -> Vector6 {
    let mut result = Vector6::zeros();
    match parameters.command_in_type {
        CommandInType::Unitless => {
            let linear = parameters.linear_scale * parameters.publish_period;
            let rotational = parameters.rotational_scale * parameters.publish_period;
            result[0] = linear * command.linear.x;
            result[1] = linear * command.linear.y;
            result[2] = linear * command.linear.z;
            result[3] = rotational * command.angular.x;
            result[4] = rotational * command.angular.y;
            result[5] = rotational * command.angular.z;
        }
        CommandInType::SpeedUnits => {
            result[0] = command.linear.x * parameters.publish_period;
            result[1] = command.linear.y * parameters.publish_period;
            result[2] = command.linear.z * parameters.publish_period;
            result[3] = command.angular.x * parameters.publish_period;
            result[4] = command.angular.y * parameters.publish_period;
            result[5] = command.angular.z * parameters.publish_period;
        }
    }
    result
}

/// Converts a jog command into a joint position delta over one publish period.
///
/// Joint names unknown to the group are skipped with a throttled warning and never
/// grow the output vector.
pub fn scale_joint_command(
    command: &JointJogCommand,
    joint_index_map: &HashMap<String, usize>,
    parameters: &ServoParameters,
    throttle: &mut Throttle,
) -> DVector<f64> {
    let mut result = DVector::zeros(joint_index_map.len());
    for (name, &velocity) in command.joint_names.iter().zip(command.velocities.iter()) {
        let index = match joint_index_map.get(name) {
            Some(&index) => index,
            None => {
                if throttle.ready() {
                    warn!("Ignoring joint {}", name);
                }
                continue;
            }
        };
        result[index] = match parameters.command_in_type {
            CommandInType::Unitless => {
                velocity * parameters.joint_scale * parameters.publish_period
            }
            CommandInType::SpeedUnits => velocity * parameters.publish_period,
        };
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn throttle() -> Throttle {
        Throttle::new(Duration::from_secs(0))
    }

    fn twist(linear: [f64; 3], angular: [f64; 3]) -> TwistCommand {
        TwistCommand {
            frame_id: String::new(),
            stamp: Some(Instant::now()),
            linear: Vector3::from_column_slice(&linear),
            angular: Vector3::from_column_slice(&angular),
        }
    }

    fn index_map() -> HashMap<String, usize> {
        [("joint_a".to_string(), 0), ("joint_b".to_string(), 1)]
            .into_iter()
            .collect()
    }

    #[test]
    fn nan_twist_is_rejected() {
        let command = twist([f64::NAN, 0., 0.], [0., 0., 0.]);
        assert!(!check_valid_command(
            &command,
            CommandInType::SpeedUnits,
            &mut throttle()
        ));
    }

    #[test]
    fn out_of_range_unitless_twist_is_rejected() {
        let command = twist([0., 1.5, 0.], [0., 0., 0.]);
        assert!(!check_valid_command(
            &command,
            CommandInType::Unitless,
            &mut throttle()
        ));
        assert!(check_valid_command(
            &command,
            CommandInType::SpeedUnits,
            &mut throttle()
        ));
    }

    #[test]
    fn unitless_twist_is_scaled_by_period_and_scale() {
        let command = twist([1., 0., 0.], [0., 0., -0.5]);
        let parameters = ServoParameters {
            publish_period: 0.01,
            linear_scale: 0.5,
            rotational_scale: 0.8,
            ..ServoParameters::default()
        };
        let delta_x = scale_cartesian_command(&command, &parameters);
        assert!((delta_x[0] - 0.005).abs() < 1e-12);
        assert!((delta_x[5] + 0.004).abs() < 1e-12);
        assert_eq!(delta_x[1], 0.);
    }

    #[test]
    fn speed_units_twist_ignores_scales() {
        let command = twist([2., 0., 0.], [0., 0., 0.]);
        let parameters = ServoParameters {
            publish_period: 0.01,
            command_in_type: CommandInType::SpeedUnits,
            linear_scale: 123.,
            ..ServoParameters::default()
        };
        let delta_x = scale_cartesian_command(&command, &parameters);
        assert!((delta_x[0] - 0.02).abs() < 1e-12);
    }

    #[test]
    fn unknown_jog_joint_is_ignored() {
        let command = JointJogCommand {
            stamp: Some(Instant::now()),
            joint_names: vec!["joint_b".to_string(), "bogus".to_string()],
            velocities: vec![1., 2.],
        };
        let parameters = ServoParameters {
            publish_period: 0.01,
            joint_scale: 0.5,
            ..ServoParameters::default()
        };
        let delta =
            scale_joint_command(&command, &index_map(), &parameters, &mut throttle());
        assert_eq!(delta.len(), 2);
        assert_eq!(delta[0], 0.);
        assert!((delta[1] - 0.005).abs() < 1e-12);
    }

    #[test]
    fn zero_detection() {
        assert!(!twist([0., 0., 0.], [0., 0., 0.]).is_nonzero());
        assert!(twist([0., 0., 0.], [0., 1e-9, 0.]).is_nonzero());
        let jog = JointJogCommand {
            stamp: None,
            joint_names: vec!["joint_a".to_string()],
            velocities: vec![0.],
        };
        assert!(!jog.is_nonzero());
    }
}
