//! Contains the configuration of the servo loop and of the trajectory smoother.
use crate::exception::{create_config_exception, ServoResult};
use serde::{Deserialize, Serialize};

/// Units of the incoming twist and jog commands.
#[derive(Serialize, Deserialize, Debug, Copy, Clone, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum CommandInType {
    /// Commands are normalized to \[-1, 1\] and multiplied with the configured scales.
    #[default]
    Unitless,
    /// Commands are in m/s and rad/s.
    SpeedUnits,
}

/// Format of the outgoing command message.
#[derive(Serialize, Deserialize, Debug, Copy, Clone, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum CommandOutType {
    /// Single-point joint trajectory.
    #[default]
    Trajectory,
    /// Flat array of positions (or velocities if positions are disabled).
    Multiarray,
}

/// Used to decide whether to enforce realtime scheduling for the worker thread.
#[derive(Serialize, Deserialize, Debug, Copy, Clone, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum RealtimeConfig {
    Enforce,
    #[default]
    Ignore,
}

/// Configuration of the servo loop.
///
/// The defaults give a 100 Hz loop with unitless commands and a trajectory output.
/// Call [`ServoParameters::validate`] before handing the parameters to the engine;
/// construction fails on an invalid set.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct ServoParameters {
    /// Period of one servo cycle in \[s\].
    pub publish_period: f64,
    /// When true the loop blocks on command arrival instead of ticking at the
    /// publish rate.
    pub low_latency_mode: bool,
    /// Commands older than this are considered stale, in \[s\].
    pub incoming_command_timeout: f64,
    /// Number of halt messages to publish once inputs go quiet. 0 means forever.
    pub num_outgoing_halt_msgs_to_publish: u32,

    /// Units of incoming commands.
    pub command_in_type: CommandInType,
    /// Max linear speed for unitless commands, in \[m/s\].
    pub linear_scale: f64,
    /// Max rotational speed for unitless commands, in \[rad/s\].
    pub rotational_scale: f64,
    /// Max joint speed for unitless jog commands, in \[rad/s\].
    pub joint_scale: f64,

    /// Condition number at which deceleration starts.
    pub lower_singularity_threshold: f64,
    /// Condition number at which motion stops.
    pub hard_stop_singularity_threshold: f64,

    /// Distance to a position bound at which a joint becomes a halt candidate, in \[rad\].
    pub joint_limit_margin: f64,
    /// Halt the whole group instead of individual joints while jogging in joint space.
    pub halt_all_joints_in_joint_mode: bool,
    /// Halt the whole group instead of individual joints while jogging in Cartesian space.
    pub halt_all_joints_in_cartesian_mode: bool,

    /// Populate positions in the outgoing command.
    pub publish_joint_positions: bool,
    /// Populate velocities in the outgoing command.
    pub publish_joint_velocities: bool,
    /// Populate (all-zero) accelerations in the outgoing command.
    pub publish_joint_accelerations: bool,

    /// Format of the outgoing command.
    pub command_out_type: CommandOutType,
    /// Name of the outgoing command channel. Interpreted by the transport layer.
    pub command_out_topic: String,

    /// Frame all kinematic computations are performed in.
    pub planning_frame: String,
    /// Frame rigidly attached to the tool point.
    pub ee_frame_name: String,
    /// Default frame incoming twists are expressed in.
    pub robot_link_command_frame: String,
    /// Name of the controlled joint group.
    pub move_group_name: String,

    /// Name of the smoothing filter to instantiate, e.g. `"low_pass_filter"`.
    pub smoothing_filter_plugin_name: String,

    /// Whether the worker thread requires realtime scheduling.
    pub realtime_config: RealtimeConfig,
    /// When >= 2, the outgoing trajectory is padded to this many identical points.
    /// Some simulators drop points whose timestamp is already in the past.
    pub redundant_point_count: u32,
}

impl Default for ServoParameters {
    fn default() -> Self {
        ServoParameters {
            publish_period: 0.01,
            low_latency_mode: false,
            incoming_command_timeout: 0.1,
            num_outgoing_halt_msgs_to_publish: 4,
            command_in_type: CommandInType::Unitless,
            linear_scale: 0.4,
            rotational_scale: 0.8,
            joint_scale: 0.5,
            lower_singularity_threshold: 17.,
            hard_stop_singularity_threshold: 30.,
            joint_limit_margin: 0.1,
            halt_all_joints_in_joint_mode: true,
            halt_all_joints_in_cartesian_mode: true,
            publish_joint_positions: true,
            publish_joint_velocities: true,
            publish_joint_accelerations: false,
            command_out_type: CommandOutType::Trajectory,
            command_out_topic: "servo_command".to_string(),
            planning_frame: "base_link".to_string(),
            ee_frame_name: "ee_link".to_string(),
            robot_link_command_frame: "base_link".to_string(),
            move_group_name: "manipulator".to_string(),
            smoothing_filter_plugin_name: "low_pass_filter".to_string(),
            realtime_config: RealtimeConfig::Ignore,
            redundant_point_count: 0,
        }
    }
}

impl ServoParameters {
    /// Checks ranges and cross-field consistency.
    ///
    /// # Errors
    /// * ConfigException naming the offending parameter.
    pub fn validate(&self) -> ServoResult<()> {
        if !(self.publish_period.is_finite() && self.publish_period > 0.) {
            return Err(create_config_exception("publish_period must be positive"));
        }
        if !(self.incoming_command_timeout.is_finite() && self.incoming_command_timeout > 0.) {
            return Err(create_config_exception(
                "incoming_command_timeout must be positive",
            ));
        }
        for (name, value) in [
            ("linear_scale", self.linear_scale),
            ("rotational_scale", self.rotational_scale),
            ("joint_scale", self.joint_scale),
        ] {
            if !(value.is_finite() && value > 0.) {
                return Err(create_config_exception(format!(
                    "{} must be positive",
                    name
                )));
            }
        }
        if !(self.lower_singularity_threshold >= 1.) {
            return Err(create_config_exception(
                "lower_singularity_threshold must be at least 1",
            ));
        }
        if !(self.hard_stop_singularity_threshold > self.lower_singularity_threshold) {
            return Err(create_config_exception(
                "hard_stop_singularity_threshold must exceed lower_singularity_threshold",
            ));
        }
        if !(self.joint_limit_margin.is_finite() && self.joint_limit_margin >= 0.) {
            return Err(create_config_exception(
                "joint_limit_margin must not be negative",
            ));
        }
        if !self.publish_joint_positions && !self.publish_joint_velocities {
            return Err(create_config_exception(
                "at least one of publish_joint_positions and publish_joint_velocities must be set",
            ));
        }
        if self.move_group_name.is_empty() {
            return Err(create_config_exception("move_group_name must not be empty"));
        }
        Ok(())
    }
}

/// Configuration of the jerk-limited trajectory smoother.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
#[serde(default)]
pub struct SmootherParameters {
    /// Scales every velocity bound, in (0, 1\].
    pub max_velocity_scaling_factor: f64,
    /// Scales every acceleration bound, in (0, 1\].
    pub max_acceleration_scaling_factor: f64,
    /// Spacing of the output samples in \[s\].
    pub timestep: f64,
}

impl Default for SmootherParameters {
    fn default() -> Self {
        SmootherParameters {
            max_velocity_scaling_factor: 1.,
            max_acceleration_scaling_factor: 1.,
            timestep: 0.001,
        }
    }
}

impl SmootherParameters {
    /// Checks ranges.
    ///
    /// # Errors
    /// * ConfigException naming the offending parameter.
    pub fn validate(&self) -> ServoResult<()> {
        for (name, value) in [
            (
                "max_velocity_scaling_factor",
                self.max_velocity_scaling_factor,
            ),
            (
                "max_acceleration_scaling_factor",
                self.max_acceleration_scaling_factor,
            ),
        ] {
            if !(value.is_finite() && value > 0. && value <= 1.) {
                return Err(create_config_exception(format!(
                    "{} must be in (0, 1]",
                    name
                )));
            }
        }
        if !(self.timestep.is_finite() && self.timestep > 0.) {
            return Err(create_config_exception("timestep must be positive"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_parameters_are_valid() {
        ServoParameters::default().validate().unwrap();
        SmootherParameters::default().validate().unwrap();
    }

    #[test]
    fn singularity_thresholds_must_be_ordered() {
        let parameters = ServoParameters {
            lower_singularity_threshold: 30.,
            hard_stop_singularity_threshold: 17.,
            ..ServoParameters::default()
        };
        assert!(parameters.validate().is_err());
    }

    #[test]
    fn publish_period_must_be_positive() {
        let parameters = ServoParameters {
            publish_period: 0.,
            ..ServoParameters::default()
        };
        assert!(parameters.validate().is_err());
    }

    #[test]
    fn at_least_one_output_field_is_required() {
        let parameters = ServoParameters {
            publish_joint_positions: false,
            publish_joint_velocities: false,
            ..ServoParameters::default()
        };
        assert!(parameters.validate().is_err());
    }

    #[test]
    fn smoother_scaling_factors_are_range_checked() {
        let parameters = SmootherParameters {
            max_velocity_scaling_factor: 1.5,
            ..SmootherParameters::default()
        };
        assert!(parameters.validate().is_err());
    }

    #[test]
    fn parameters_deserialize_from_partial_json() {
        let parameters: ServoParameters = serde_json::from_str(
            r#"{"publish_period": 0.004, "command_in_type": "speed_units"}"#,
        )
        .unwrap();
        assert_eq!(parameters.publish_period, 0.004);
        assert_eq!(parameters.command_in_type, CommandInType::SpeedUnits);
        assert_eq!(parameters.joint_scale, 0.5);
    }
}
