// Portions derived from MoveIt trajectory processing (Ruckig smoothing),
// Copyright (c) 2021, PickNik Robotics. BSD-3-Clause.

//! Contains the jerk-limited trajectory post-smoother.
//!
//! Rewrites a stored waypoint sequence into a stream of constant-timestep samples
//! whose finite differences respect the per-joint velocity, acceleration and jerk
//! bounds. Runs offline, synchronously on the calling thread.
use crate::exception::{create_smoothing_exception, ServoResult};
use crate::model::JointLimits;
use crate::servo::parameters::SmootherParameters;
use crate::servo::rate_limiting::{
    limit_rate_step, resolve_group_limits, JointMotion, KinematicLimits,
};
use crate::trajectory::Waypoint;
use std::f64::consts::{PI, TAU};
use tracing::debug;

/// Waypoints closer than this (group-space L2) are collapsed; repeated waypoints
/// would otherwise induce spurious reversals, in \[rad\]
pub static IDENTICAL_POSITION_EPSILON: f64 = 1e-3;
/// Target-velocity retraction stops searching below this L2 magnitude, in \[rad/s\]
pub static MINIMUM_VELOCITY_SEARCH_MAGNITUDE: f64 = 0.01;
/// Factor by which a retraction round scales the target velocity down
static VELOCITY_RETRACTION_FACTOR: f64 = 0.9;
/// Step budget per segment, as a multiple of the nominal segment duration
static MAX_DURATION_EXTENSION_FACTOR: f64 = 5.0;
/// A waypoint counts as reached when every joint is this close, in \[rad\]
static WAYPOINT_POSITION_EPS: f64 = 1e-4;
/// Tolerance on the velocity magnitude at a reached waypoint, in \[rad/s\]
static WAYPOINT_VELOCITY_EPS: f64 = 0.05;

/// Rewrites `trajectory` in place into samples spaced exactly `parameters.timestep`
/// apart. The first output waypoint equals the first input waypoint.
///
/// Velocity and acceleration bounds are scaled by the configured factors; absent
/// bounds fall back to the crate defaults. On error the input is left untouched.
///
/// # Errors
/// * SmoothingException when the input is degenerate (fewer than two distinct
///   waypoints, NaN, non-positive segment durations, sampling coarser than the
///   input) or when backward motion cannot be prevented by retracting the target
///   velocity.
pub fn apply_smoothing(
    trajectory: &mut Vec<Waypoint>,
    joint_limits: &[JointLimits],
    parameters: &SmootherParameters,
) -> ServoResult<()> {
    parameters.validate()?;
    if trajectory.len() < 2 {
        return Err(create_smoothing_exception(
            "trajectory does not have enough points to smooth",
        ));
    }
    let num_dof = trajectory[0].position.len();
    if joint_limits.len() != num_dof {
        return Err(create_smoothing_exception(format!(
            "got limits for {} joints, trajectory has {}",
            joint_limits.len(),
            num_dof
        )));
    }
    for waypoint in trajectory.iter() {
        if waypoint.position.len() != num_dof {
            return Err(create_smoothing_exception(
                "waypoints disagree on the number of joints",
            ));
        }
        let all_values = waypoint
            .position
            .iter()
            .chain(waypoint.velocity.iter())
            .chain(waypoint.acceleration.iter());
        for value in all_values {
            if value.is_nan() {
                return Err(create_smoothing_exception("NaN in input trajectory"));
            }
        }
    }

    let limits = resolve_group_limits(
        joint_limits,
        parameters.max_velocity_scaling_factor,
        parameters.max_acceleration_scaling_factor,
    );
    for resolved in &limits {
        for bound in [
            resolved.max_velocity,
            resolved.max_acceleration,
            resolved.max_jerk,
        ] {
            if !(bound.is_finite() && bound > 0.) {
                return Err(create_smoothing_exception(
                    "kinematic bounds must be positive and finite",
                ));
            }
        }
    }

    let mut waypoints = trajectory.clone();
    unwind(&mut waypoints);
    let waypoints = collapse_identical_waypoints(waypoints);
    if waypoints.len() < 2 {
        return Err(create_smoothing_exception(
            "fewer than two distinct waypoints remain after collapsing",
        ));
    }
    let total_duration: f64 = waypoints[1..]
        .iter()
        .map(|waypoint| waypoint.duration_from_previous)
        .sum();
    if waypoints[1..]
        .iter()
        .any(|waypoint| waypoint.duration_from_previous <= 0.)
    {
        return Err(create_smoothing_exception(
            "every interior segment duration must be positive",
        ));
    }
    if total_duration / ((waypoints.len() - 1) as f64) < parameters.timestep {
        return Err(create_smoothing_exception(
            "the sampling timestep is not sufficiently short for this trajectory",
        ));
    }

    let output = resample(&waypoints, &limits, parameters.timestep)?;
    *trajectory = output;
    Ok(())
}

/// Runs the jerk-limited step generator from waypoint to waypoint.
fn resample(
    waypoints: &[Waypoint],
    limits: &[KinematicLimits],
    timestep: f64,
) -> ServoResult<Vec<Waypoint>> {
    let num_dof = waypoints[0].position.len();
    let mut current: Vec<JointMotion> = (0..num_dof)
        .map(|joint| JointMotion {
            position: waypoints[0].position[joint],
            velocity: waypoints[0].velocity_or_zero(joint),
            acceleration: waypoints[0].acceleration_or_zero(joint),
        })
        .collect();

    let mut output = Vec::with_capacity((waypoints.len() - 1) * 16);
    output.push(sample_from(&current, 0.));

    for target in &waypoints[1..] {
        let mut target_velocity: Vec<f64> =
            (0..num_dof).map(|joint| target.velocity_or_zero(joint)).collect();
        let mut remaining_steps = ((target.duration_from_previous / timestep)
            * MAX_DURATION_EXTENSION_FACTOR)
            .ceil() as u64;

        loop {
            if remaining_steps == 0 {
                // TODO: extend the input waypoint durations and retry, as a seed
                // trajectory can be too short once jerk limits are taken into account
                return Err(create_smoothing_exception(
                    "step budget exhausted before reaching the waypoint",
                ));
            }
            remaining_steps -= 1;

            let previous_error: Vec<f64> = (0..num_dof)
                .map(|joint| target.position[joint] - current[joint].position)
                .collect();
            let candidate: Vec<JointMotion> = (0..num_dof)
                .map(|joint| {
                    let desired = desired_velocity(
                        previous_error[joint],
                        target_velocity[joint],
                        &limits[joint],
                    );
                    limit_rate_step(&limits[joint], &current[joint], desired, timestep)
                })
                .collect();

            if lagging_motion_detected(&candidate, &target_velocity) {
                if velocity_magnitude(&target_velocity) < MINIMUM_VELOCITY_SEARCH_MAGNITUDE {
                    return Err(create_smoothing_exception("Could not prevent backward motion"));
                }
                // retract the target velocity; the target position is kept so the
                // exact waypoint is still reached
                for joint in 0..num_dof {
                    target_velocity[joint] *= VELOCITY_RETRACTION_FACTOR;
                }
                debug!(
                    "retracted target velocity to magnitude {}",
                    velocity_magnitude(&target_velocity)
                );
                continue;
            }

            current = candidate;
            output.push(sample_from(&current, timestep));

            let finished = (0..num_dof).all(|joint| {
                let error = target.position[joint] - current[joint].position;
                let reached = error.abs() <= WAYPOINT_POSITION_EPS
                    || previous_error[joint] * error <= 0.;
                let settled = (current[joint].velocity.abs() - target_velocity[joint].abs())
                    .abs()
                    <= WAYPOINT_VELOCITY_EPS;
                reached && settled
            });
            if finished {
                break;
            }
        }
    }
    Ok(output)
}

/// Velocity request for one joint: head for the target position inside a braking
/// envelope which arrives carrying the target velocity.
fn desired_velocity(position_error: f64, target_velocity: f64, limits: &KinematicLimits) -> f64 {
    // half the acceleration bound is reserved for the jerk ramp, otherwise the
    // jerk-limited tracker rides above the envelope and overshoots the waypoint
    let braking_acceleration = 0.5 * limits.max_acceleration;
    let envelope = (target_velocity * target_velocity
        + 2. * braking_acceleration * position_error.abs())
    .sqrt();
    position_error.signum() * envelope.min(limits.max_velocity)
}

/// Backward motion: a joint moving against a meaningful target velocity. The plain
/// ratio `new_velocity / target_velocity < 1` misfires for targets near zero, so the
/// division is guarded and only a sign mismatch counts.
fn lagging_motion_detected(candidate: &[JointMotion], target_velocity: &[f64]) -> bool {
    candidate
        .iter()
        .zip(target_velocity.iter())
        .any(|(motion, &target)| {
            target.abs() > MINIMUM_VELOCITY_SEARCH_MAGNITUDE && motion.velocity / target < 0.
        })
}

fn velocity_magnitude(target_velocity: &[f64]) -> f64 {
    target_velocity
        .iter()
        .map(|velocity| velocity * velocity)
        .sum::<f64>()
        .sqrt()
}

fn sample_from(motion: &[JointMotion], duration_from_previous: f64) -> Waypoint {
    Waypoint {
        position: motion.iter().map(|joint| joint.position).collect(),
        velocity: motion.iter().map(|joint| joint.velocity).collect(),
        acceleration: motion.iter().map(|joint| joint.acceleration).collect(),
        duration_from_previous,
    }
}

/// Rewrites every joint track into a continuous representation with no ±π jump
/// between consecutive waypoints.
fn unwind(waypoints: &mut [Waypoint]) {
    if waypoints.is_empty() {
        return;
    }
    let num_dof = waypoints[0].position.len();
    for joint in 0..num_dof {
        let mut offset = 0.;
        for index in 1..waypoints.len() {
            let adjusted = waypoints[index].position[joint] + offset;
            let previous = waypoints[index - 1].position[joint];
            let mut difference = adjusted - previous;
            let mut correction = 0.;
            while difference > PI {
                difference -= TAU;
                correction -= TAU;
            }
            while difference < -PI {
                difference += TAU;
                correction += TAU;
            }
            offset += correction;
            waypoints[index].position[joint] = adjusted + correction;
        }
    }
}

/// Drops waypoints whose group-space distance to the previously kept waypoint is
/// within [`IDENTICAL_POSITION_EPSILON`]. The duration of a dropped waypoint is
/// carried over to the next kept one so the total time is preserved.
fn collapse_identical_waypoints(waypoints: Vec<Waypoint>) -> Vec<Waypoint> {
    let mut filtered: Vec<Waypoint> = Vec::with_capacity(waypoints.len());
    let mut carried_duration = 0.;
    for mut waypoint in waypoints {
        let identical = filtered.last().map_or(false, |last| {
            group_distance(&last.position, &waypoint.position) <= IDENTICAL_POSITION_EPSILON
        });
        if identical {
            carried_duration += waypoint.duration_from_previous;
        } else {
            waypoint.duration_from_previous += carried_duration;
            carried_duration = 0.;
            filtered.push(waypoint);
        }
    }
    filtered
}

fn group_distance(a: &[f64], b: &[f64]) -> f64 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| (x - y) * (x - y))
        .sum::<f64>()
        .sqrt()
}
