// Portions derived from MoveIt Servo (servo_calcs),
// Copyright (c) 2019, Los Alamos National Security, LLC. BSD-3-Clause.

//! Contains the singularity-aware inverse-velocity step: thin-SVD pseudo-inverse of
//! the Jacobian, condition-number based deceleration and drift-dimension masking.
use crate::model::RobotModel;
use crate::servo::command::TwistCommand;
use crate::servo::status::StatusCode;
use nalgebra::{DMatrix, DVector, Dyn, SVD};

/// Singular values below this are treated as zero when inverting.
static PSEUDO_INVERSE_RANK_EPS: f64 = 1e-10;

/// Outcome of the singularity check of one Cartesian cycle.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SingularityScaling {
    /// Velocity scale in \[0, 1\].
    pub scale: f64,
    /// Condition number of the Jacobian, σ₁/σₘᵢₙ.
    pub condition_number: f64,
    /// Status to report, when decelerating or halting.
    pub status: Option<StatusCode>,
}

/// Removes the Jacobian rows and twist entries of all drifting dimensions.
///
/// Rows are walked from the highest index downwards so indices stay valid, and the
/// last remaining row is never removed.
pub fn remove_drift_dimensions(
    jacobian: DMatrix<f64>,
    delta_x: DVector<f64>,
    drift_dimensions: &[bool; 6],
) -> (DMatrix<f64>, DVector<f64>) {
    let mut jacobian = jacobian;
    let mut delta_x = delta_x;
    for dimension in (0..drift_dimensions.len()).rev() {
        if drift_dimensions[dimension] && jacobian.nrows() > 1 && dimension < jacobian.nrows() {
            jacobian = jacobian.remove_row(dimension);
            delta_x = delta_x.remove_row(dimension);
        }
    }
    (jacobian, delta_x)
}

/// Inverse of [`remove_drift_dimensions`] for the twist: reinserts a zero entry for
/// every drifting dimension.
pub fn reinsert_drift_dimensions(delta_x: &DVector<f64>, drift_dimensions: &[bool; 6]) -> DVector<f64> {
    let mut result = DVector::zeros(drift_dimensions.len());
    let mut source = 0;
    for (dimension, &drifting) in drift_dimensions.iter().enumerate() {
        if !drifting && source < delta_x.len() {
            result[dimension] = delta_x[source];
            source += 1;
        }
    }
    result
}

/// Zeroes the components of all uncontrolled Cartesian axes in the command frame.
pub fn enforce_control_dimensions(command: &mut TwistCommand, control_dimensions: &[bool; 6]) {
    for (dimension, &controlled) in control_dimensions.iter().enumerate() {
        if !controlled {
            match dimension {
                0 => command.linear.x = 0.,
                1 => command.linear.y = 0.,
                2 => command.linear.z = 0.,
                3 => command.angular.x = 0.,
                4 => command.angular.y = 0.,
                _ => command.angular.z = 0.,
            }
        }
    }
}

/// Thin-SVD pseudo-inverse V·S⁻¹·Uᵀ of the (drift-reduced) Jacobian.
///
/// Singular values below the rank tolerance do not contribute, so a rank-deficient
/// Jacobian yields zero motion along its null directions instead of NaN.
pub fn pseudo_inverse(svd: &SVD<f64, Dyn, Dyn>) -> DMatrix<f64> {
    let inverse_singular_values = DMatrix::from_diagonal(&svd.singular_values.map(|sigma| {
        if sigma > PSEUDO_INVERSE_RANK_EPS {
            1. / sigma
        } else {
            0.
        }
    }));
    match (&svd.u, &svd.v_t) {
        (Some(u), Some(v_t)) => v_t.transpose() * inverse_singular_values * u.transpose(),
        _ => DMatrix::zeros(0, 0),
    }
}

/// Velocity scaling factor due to proximity of a singularity and direction of motion.
///
/// The last thin-U column points toward or away from the nearest singularity; its
/// sign is resolved by perturbing the joints along it and checking whether the
/// condition number grows. Motion away from the singularity is never scaled.
///
/// # Arguments
/// * `model` - Robot model used to look ahead along the singular direction.
/// * `positions` - Current group joint positions.
/// * `commanded_twist` - Cartesian position delta of this cycle, drift rows removed.
/// * `svd` - Thin SVD of the drift-reduced Jacobian.
/// * `pseudo_inverse` - Pseudo-inverse matching `svd`.
pub fn velocity_scaling_factor_for_singularity(
    model: &dyn RobotModel,
    positions: &DVector<f64>,
    commanded_twist: &DVector<f64>,
    svd: &SVD<f64, Dyn, Dyn>,
    pseudo_inverse: &DMatrix<f64>,
    lower_threshold: f64,
    hard_stop_threshold: f64,
) -> SingularityScaling {
    let u = match &svd.u {
        Some(u) => u,
        None => {
            return SingularityScaling {
                scale: 1.,
                condition_number: 1.,
                status: None,
            }
        }
    };
    let singular_values = &svd.singular_values;
    let condition_number =
        singular_values[0] / singular_values[singular_values.len() - 1];

    let mut vector_toward_singularity = u.column(u.ncols() - 1).clone_owned();

    // The singular vector flips direction unpredictably (R. Bro, "Resolving the Sign
    // Ambiguity in the Singular Value Decomposition"). Look ahead along a scaled
    // version of it and keep the orientation in which the condition number grows.
    let look_ahead_scale = 100.;
    let delta_x = &vector_toward_singularity / look_ahead_scale;
    let perturbed_positions = positions + pseudo_inverse * delta_x;
    let perturbed_jacobian = model.jacobian(&perturbed_positions);
    let perturbed_svd = SVD::new(perturbed_jacobian, false, false);
    let perturbed_singular_values = &perturbed_svd.singular_values;
    let perturbed_condition = perturbed_singular_values[0]
        / perturbed_singular_values[perturbed_singular_values.len() - 1];
    if condition_number >= perturbed_condition {
        vector_toward_singularity = -vector_toward_singularity;
    }

    // Moving away from the singularity needs no damping
    if vector_toward_singularity.dot(commanded_twist) <= 0. {
        return SingularityScaling {
            scale: 1.,
            condition_number,
            status: None,
        };
    }

    if condition_number >= hard_stop_threshold {
        SingularityScaling {
            scale: 0.,
            condition_number,
            status: Some(StatusCode::HaltForSingularity),
        }
    } else if condition_number > lower_threshold {
        SingularityScaling {
            scale: 1.
                - (condition_number - lower_threshold)
                    / (hard_stop_threshold - lower_threshold),
            condition_number,
            status: Some(StatusCode::DecelerateForSingularity),
        }
    } else {
        SingularityScaling {
            scale: 1.,
            condition_number,
            status: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::JointLimits;
    use nalgebra::Isometry3;

    struct FixedJacobianModel {
        jacobian: DMatrix<f64>,
    }

    impl RobotModel for FixedJacobianModel {
        fn move_group_name(&self) -> &str {
            "group"
        }
        fn joint_names(&self) -> Vec<String> {
            (0..self.jacobian.ncols())
                .map(|i| format!("joint_{}", i))
                .collect()
        }
        fn jacobian(&self, _positions: &DVector<f64>) -> DMatrix<f64> {
            self.jacobian.clone()
        }
        fn link_transform(
            &self,
            _link: &str,
            _positions: &DVector<f64>,
        ) -> Option<Isometry3<f64>> {
            Some(Isometry3::identity())
        }
        fn joint_limits(&self, _index: usize) -> JointLimits {
            JointLimits::default()
        }
    }

    fn diagonal_jacobian(smallest: f64) -> DMatrix<f64> {
        let mut jacobian = DMatrix::zeros(6, 6);
        for i in 0..5 {
            jacobian[(i, i)] = 1.;
        }
        jacobian[(5, 5)] = smallest;
        jacobian
    }

    fn scaling_for_axis_commands(
        smallest: f64,
        lower: f64,
        hard_stop: f64,
    ) -> (SingularityScaling, SingularityScaling) {
        let model = FixedJacobianModel {
            jacobian: diagonal_jacobian(smallest),
        };
        let positions = DVector::zeros(6);
        let svd = SVD::new(model.jacobian.clone(), true, true);
        let pinv = pseudo_inverse(&svd);
        let mut toward = DVector::zeros(6);
        toward[5] = 0.01;
        let away = -toward.clone();
        let a = velocity_scaling_factor_for_singularity(
            &model, &positions, &toward, &svd, &pinv, lower, hard_stop,
        );
        let b = velocity_scaling_factor_for_singularity(
            &model, &positions, &away, &svd, &pinv, lower, hard_stop,
        );
        (a, b)
    }

    #[test]
    fn uncontrolled_dimensions_are_zeroed() {
        use nalgebra::Vector3;
        let mut command = TwistCommand {
            frame_id: String::new(),
            stamp: None,
            linear: Vector3::new(1., 2., 3.),
            angular: Vector3::new(4., 5., 6.),
        };
        enforce_control_dimensions(&mut command, &[true, false, true, false, true, false]);
        assert_eq!(command.linear, Vector3::new(1., 0., 3.));
        assert_eq!(command.angular, Vector3::new(0., 5., 0.));
    }

    #[test]
    fn drift_rows_are_removed_from_highest_index_down() {
        let jacobian = DMatrix::from_fn(6, 3, |r, c| (r * 10 + c) as f64);
        let delta_x = DVector::from_fn(6, |r, _| r as f64);
        let drift = [true, false, false, false, true, false];
        let (reduced_jacobian, reduced_delta) =
            remove_drift_dimensions(jacobian.clone(), delta_x, &drift);
        assert_eq!(reduced_jacobian.nrows(), 4);
        assert_eq!(reduced_delta.len(), 4);
        // remaining rows are 1, 2, 3, 5 of the original
        assert_eq!(reduced_jacobian[(0, 0)], jacobian[(1, 0)]);
        assert_eq!(reduced_jacobian[(3, 2)], jacobian[(5, 2)]);
        assert_eq!(reduced_delta[3], 5.);
    }

    #[test]
    fn last_row_is_never_removed() {
        let jacobian = DMatrix::from_element(6, 2, 1.);
        let delta_x = DVector::from_element(6, 1.);
        let drift = [true; 6];
        let (reduced_jacobian, reduced_delta) =
            remove_drift_dimensions(jacobian, delta_x, &drift);
        assert_eq!(reduced_jacobian.nrows(), 1);
        assert_eq!(reduced_delta.len(), 1);
    }

    #[test]
    fn drift_removal_round_trips_with_zero_reinsertion() {
        let jacobian = DMatrix::from_element(6, 4, 1.);
        let delta_x = DVector::from_fn(6, |r, _| (r + 1) as f64);
        let drift = [false, true, false, false, true, false];
        let (_, reduced) = remove_drift_dimensions(jacobian, delta_x.clone(), &drift);
        let restored = reinsert_drift_dimensions(&reduced, &drift);
        for dimension in 0..6 {
            if drift[dimension] {
                assert_eq!(restored[dimension], 0.);
            } else {
                assert_eq!(restored[dimension], delta_x[dimension]);
            }
        }
    }

    #[test]
    fn hard_stop_threshold_halts_motion_toward_singularity() {
        // singular values 1 and 0.005: condition number 200
        let (a, b) = scaling_for_axis_commands(0.005, 30., 100.);
        assert!((a.condition_number - 200.).abs() < 1e-9);
        assert!((b.condition_number - 200.).abs() < 1e-9);
        // one direction moves toward the singularity and halts, the other is free
        let (toward, away) = if a.status.is_some() { (a, b) } else { (b, a) };
        assert_eq!(toward.scale, 0.);
        assert_eq!(toward.status, Some(StatusCode::HaltForSingularity));
        assert_eq!(away.scale, 1.);
        assert_eq!(away.status, None);
    }

    #[test]
    fn deceleration_is_linear_between_thresholds() {
        // condition number 50 with thresholds (30, 100)
        let (a, b) = scaling_for_axis_commands(0.02, 30., 100.);
        let toward = if a.status.is_some() { a } else { b };
        assert_eq!(toward.status, Some(StatusCode::DecelerateForSingularity));
        let expected = 1. - (50. - 30.) / (100. - 30.);
        assert!((toward.scale - expected).abs() < 1e-9);
    }

    #[test]
    fn lower_threshold_boundary_keeps_full_speed() {
        // condition number exactly 30 with thresholds (30, 100)
        let (a, b) = scaling_for_axis_commands(1. / 30., 30., 100.);
        assert!((a.scale - 1.).abs() < 1e-9);
        assert!((b.scale - 1.).abs() < 1e-9);
    }

    #[test]
    fn hard_stop_boundary_halts() {
        // condition number exactly 100 with thresholds (30, 100)
        let (a, b) = scaling_for_axis_commands(0.01, 30., 100.);
        let toward = if a.status.is_some() { a } else { b };
        assert_eq!(toward.scale, 0.);
        assert_eq!(toward.status, Some(StatusCode::HaltForSingularity));
    }

    #[test]
    fn pseudo_inverse_solves_diagonal_system() {
        let jacobian = diagonal_jacobian(0.5);
        let svd = SVD::new(jacobian, true, true);
        let pinv = pseudo_inverse(&svd);
        let mut delta_x = DVector::zeros(6);
        delta_x[0] = 1.;
        delta_x[5] = 1.;
        let delta_theta = &pinv * &delta_x;
        assert!((delta_theta[0] - 1.).abs() < 1e-9);
        assert!((delta_theta[5] - 2.).abs() < 1e-9);
    }
}
