// Adapted from libfranka-rs, Copyright (c) 2021 Marco Boneberger,
// licensed under the EUPL-1.2-or-later.

//! Contains functions for limiting joint motion to per-joint velocity, acceleration
//! and jerk bounds.
use crate::model::JointLimits;
use crate::trajectory::JointState;

/// Default velocity bound when the model does not provide one, in \[rad/s\]
pub static DEFAULT_MAX_VELOCITY: f64 = 5.;
/// Default acceleration bound when the model does not provide one, in \[rad/s²\]
pub static DEFAULT_MAX_ACCELERATION: f64 = 10.;
/// Default jerk bound when the model does not provide one, in \[rad/s³\]
pub static DEFAULT_MAX_JERK: f64 = 20.;

/// Resolved kinematic bounds of one joint, with defaults substituted and scaling
/// factors applied.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct KinematicLimits {
    pub max_velocity: f64,
    pub max_acceleration: f64,
    pub max_jerk: f64,
}

impl KinematicLimits {
    /// Resolves the optional model bounds, applying `velocity_scale` and
    /// `acceleration_scale` and substituting the crate defaults where a bound is
    /// absent.
    pub fn from_joint_limits(
        limits: &JointLimits,
        velocity_scale: f64,
        acceleration_scale: f64,
    ) -> Self {
        KinematicLimits {
            max_velocity: velocity_scale * limits.max_velocity.unwrap_or(DEFAULT_MAX_VELOCITY),
            max_acceleration: acceleration_scale
                * limits.max_acceleration.unwrap_or(DEFAULT_MAX_ACCELERATION),
            max_jerk: limits.max_jerk.unwrap_or(DEFAULT_MAX_JERK),
        }
    }
}

/// Uniform scaling factor which brings every joint velocity inside its bound.
///
/// Returns the tightest ratio `bound / |velocity|` across all joints, capped at 1,
/// so applying it preserves the direction of motion.
pub fn velocity_scaling_factor(velocities: &[f64], max_velocities: &[f64]) -> f64 {
    let mut scale: f64 = 1.;
    for (&velocity, &bound) in velocities.iter().zip(max_velocities.iter()) {
        if velocity.abs() > bound {
            scale = scale.min(bound / velocity.abs());
        }
    }
    scale
}

/// Enforces per-joint velocity bounds on an updated joint state by uniformly scaling
/// the position delta of this cycle.
///
/// Both velocities and positions are rescaled so the outgoing sample stays
/// consistent: `position = original + scale · (position − original)`.
/// # Return
/// The applied scaling factor.
pub fn enforce_velocity_limits(
    joint_state: &mut JointState,
    original_state: &JointState,
    max_velocities: &[f64],
) -> f64 {
    let scale = velocity_scaling_factor(&joint_state.velocity, max_velocities);
    if scale < 1. {
        for i in 0..joint_state.position.len() {
            joint_state.velocity[i] *= scale;
            joint_state.position[i] = original_state.position[i]
                + scale * (joint_state.position[i] - original_state.position[i]);
        }
    }
    scale
}

/// Advances a joint velocity by one sample while respecting the velocity,
/// acceleration and jerk bounds.
///
/// # Arguments
/// * `limits` - Resolved bounds of the joint.
/// * `commanded_velocity` - Desired velocity of the current time step.
/// * `last_commanded_velocity` - Commanded velocity of the previous time step.
/// * `last_commanded_acceleration` - Commanded acceleration of the previous time step.
/// * `delta_t` - Sample time in \[s\].
/// # Panics
/// * if commanded_velocity is infinite or NaN.
/// # Return
/// Rate-limited velocity for this time step.
pub fn limit_rate_velocity(
    limits: &KinematicLimits,
    commanded_velocity: f64,
    last_commanded_velocity: f64,
    last_commanded_acceleration: f64,
    delta_t: f64,
) -> f64 {
    assert!(commanded_velocity.is_finite());
    let commanded_jerk = (((commanded_velocity - last_commanded_velocity) / delta_t)
        - last_commanded_acceleration)
        / delta_t;
    let commanded_acceleration = last_commanded_acceleration
        + f64::max(f64::min(commanded_jerk, limits.max_jerk), -limits.max_jerk) * delta_t;
    let safe_max_acceleration = f64::min(
        (limits.max_jerk / limits.max_acceleration)
            * (limits.max_velocity - last_commanded_velocity),
        limits.max_acceleration,
    );
    let safe_min_acceleration = f64::max(
        (limits.max_jerk / limits.max_acceleration)
            * (-limits.max_velocity - last_commanded_velocity),
        -limits.max_acceleration,
    );
    last_commanded_velocity
        + f64::max(
            f64::min(commanded_acceleration, safe_max_acceleration),
            safe_min_acceleration,
        ) * delta_t
}

/// Per-joint state advanced by [`limit_rate_step`].
#[derive(Debug, Copy, Clone, Default, PartialEq)]
pub struct JointMotion {
    pub position: f64,
    pub velocity: f64,
    pub acceleration: f64,
}

/// Advances one joint by one sample toward `commanded_velocity`.
///
/// The returned acceleration is the realized finite difference, so feeding the
/// output back as the next input keeps the sample stream consistent.
pub fn limit_rate_step(
    limits: &KinematicLimits,
    motion: &JointMotion,
    commanded_velocity: f64,
    delta_t: f64,
) -> JointMotion {
    let new_velocity = limit_rate_velocity(
        limits,
        commanded_velocity,
        motion.velocity,
        motion.acceleration,
        delta_t,
    );
    JointMotion {
        position: motion.position + new_velocity * delta_t,
        velocity: new_velocity,
        acceleration: (new_velocity - motion.velocity) / delta_t,
    }
}

/// Resolves the bounds of every joint of the group.
pub fn resolve_group_limits(
    joint_limits: &[JointLimits],
    velocity_scale: f64,
    acceleration_scale: f64,
) -> Vec<KinematicLimits> {
    joint_limits
        .iter()
        .map(|limits| KinematicLimits::from_joint_limits(limits, velocity_scale, acceleration_scale))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limits(max_velocity: f64, max_acceleration: f64, max_jerk: f64) -> KinematicLimits {
        KinematicLimits {
            max_velocity,
            max_acceleration,
            max_jerk,
        }
    }

    #[test]
    fn defaults_are_substituted_and_scaled() {
        let resolved = KinematicLimits::from_joint_limits(&JointLimits::default(), 0.5, 0.5);
        assert_eq!(resolved.max_velocity, 2.5);
        assert_eq!(resolved.max_acceleration, 5.);
        assert_eq!(resolved.max_jerk, 20.);

        let bounded = JointLimits {
            max_velocity: Some(2.),
            max_acceleration: Some(4.),
            max_jerk: Some(8.),
            ..JointLimits::default()
        };
        let resolved = KinematicLimits::from_joint_limits(&bounded, 1., 1.);
        assert_eq!(resolved.max_velocity, 2.);
        assert_eq!(resolved.max_acceleration, 4.);
        assert_eq!(resolved.max_jerk, 8.);
    }

    #[test]
    fn scaling_factor_is_tightest_ratio() {
        let scale = velocity_scaling_factor(&[1., -4., 0.5], &[2., 2., 2.]);
        assert!((scale - 0.5).abs() < 1e-12);
        assert_eq!(velocity_scaling_factor(&[1., 1.], &[2., 2.]), 1.);
    }

    #[test]
    fn enforcement_rescales_positions_and_velocities() {
        let original = JointState {
            name: vec!["a".to_string(), "b".to_string()],
            position: vec![0., 1.],
            velocity: vec![0., 0.],
        };
        let mut updated = JointState {
            name: original.name.clone(),
            position: vec![0.04, 1.02],
            velocity: vec![4., 2.],
        };
        let scale = enforce_velocity_limits(&mut updated, &original, &[2., 2.]);
        assert!((scale - 0.5).abs() < 1e-12);
        assert!((updated.velocity[0] - 2.).abs() < 1e-12);
        assert!((updated.velocity[1] - 1.).abs() < 1e-12);
        assert!((updated.position[0] - 0.02).abs() < 1e-12);
        assert!((updated.position[1] - 1.01).abs() < 1e-12);
    }

    #[test]
    fn velocity_step_respects_jerk_bound() {
        let limits = limits(1., 2., 5.);
        let delta_t = 1e-3;
        let new_velocity = limit_rate_velocity(&limits, 1., 0., 0., delta_t);
        // from rest the first step is jerk bound: j * dt²
        assert!((new_velocity - limits.max_jerk * delta_t * delta_t).abs() < 1e-12);
    }

    #[test]
    fn velocity_step_respects_acceleration_bound() {
        let limits = limits(10., 2., 1e6);
        let delta_t = 1e-3;
        let new_velocity = limit_rate_velocity(&limits, 10., 0., 0., delta_t);
        assert!(new_velocity <= limits.max_acceleration * delta_t + 1e-12);
    }

    #[test]
    fn velocity_never_exceeds_bound_over_a_ramp() {
        let limits = limits(1., 2., 5.);
        let delta_t = 1e-3;
        let mut motion = JointMotion::default();
        for _ in 0..5000 {
            let next = limit_rate_step(&limits, &motion, 2., delta_t);
            assert!(next.velocity.abs() <= limits.max_velocity + 1e-9);
            assert!((next.velocity - motion.velocity).abs() <= limits.max_acceleration * delta_t + 1e-9);
            motion = next;
        }
        // the ramp must actually get there
        assert!(motion.velocity > 0.99 * limits.max_velocity);
    }
}
