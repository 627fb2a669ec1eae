// Portions derived from MoveIt Servo (servo_calcs),
// Copyright (c) 2019, Los Alamos National Security, LLC. BSD-3-Clause.

//! Contains the position-limit halt check of the servo loop.
use crate::model::JointLimits;
use crate::trajectory::JointState;
use crate::utils::Throttle;
use tracing::warn;

/// Finds the joints which must be halted because they are within `margin` of a
/// position bound while their pending velocity points further past it.
///
/// Joints without position bounds are skipped.
pub fn joints_to_halt(
    joint_state: &JointState,
    joint_limits: &[JointLimits],
    margin: f64,
    throttle: &mut Throttle,
) -> Vec<usize> {
    let mut halt_indices = Vec::new();
    for (index, limits) in joint_limits.iter().enumerate() {
        let position = joint_state.position[index];
        let velocity = joint_state.velocity[index];
        let past_lower = limits
            .min_position
            .map(|min| velocity < 0. && position < min + margin)
            .unwrap_or(false);
        let past_upper = limits
            .max_position
            .map(|max| velocity > 0. && position > max - margin)
            .unwrap_or(false);
        if past_lower || past_upper {
            halt_indices.push(index);
        }
    }
    if !halt_indices.is_empty() && throttle.ready() {
        let names: Vec<&str> = halt_indices
            .iter()
            .map(|&index| joint_state.name[index].as_str())
            .collect();
        warn!("{} close to a position limit. Halting.", names.join(", "));
    }
    halt_indices
}

/// Halts the given joints: position is reset to the pre-update snapshot and the
/// velocity is zeroed.
pub fn sudden_halt(
    joint_state: &mut JointState,
    original_state: &JointState,
    halt_indices: &[usize],
) {
    for &index in halt_indices {
        joint_state.position[index] = original_state.position[index];
        joint_state.velocity[index] = 0.;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn throttle() -> Throttle {
        Throttle::new(Duration::from_secs(0))
    }

    fn bounded(min: f64, max: f64) -> JointLimits {
        JointLimits {
            min_position: Some(min),
            max_position: Some(max),
            ..JointLimits::default()
        }
    }

    fn state(position: f64, velocity: f64) -> JointState {
        JointState {
            name: vec!["joint_a".to_string()],
            position: vec![position],
            velocity: vec![velocity],
        }
    }

    #[test]
    fn joint_near_upper_bound_moving_out_is_halted() {
        // margin 0.1, position max-0.05, positive velocity
        let joint_state = state(1.95, 0.3);
        let halt = joints_to_halt(&joint_state, &[bounded(-2., 2.)], 0.1, &mut throttle());
        assert_eq!(halt, vec![0]);
    }

    #[test]
    fn joint_near_bound_moving_back_inside_is_not_halted() {
        let joint_state = state(1.95, -0.3);
        let halt = joints_to_halt(&joint_state, &[bounded(-2., 2.)], 0.1, &mut throttle());
        assert!(halt.is_empty());
    }

    #[test]
    fn joint_near_lower_bound_moving_out_is_halted() {
        let joint_state = state(-1.92, -0.1);
        let halt = joints_to_halt(&joint_state, &[bounded(-2., 2.)], 0.1, &mut throttle());
        assert_eq!(halt, vec![0]);
    }

    #[test]
    fn unbounded_joint_is_never_halted() {
        let joint_state = state(100., 5.);
        let halt = joints_to_halt(&joint_state, &[JointLimits::default()], 0.1, &mut throttle());
        assert!(halt.is_empty());
    }

    #[test]
    fn sudden_halt_restores_snapshot_and_zeroes_velocity() {
        let original = state(1.9, 0.2);
        let mut updated = state(1.95, 0.3);
        sudden_halt(&mut updated, &original, &[0]);
        assert_eq!(updated.position[0], 1.9);
        assert_eq!(updated.velocity[0], 0.);
    }
}
