// Adapted from libfranka-rs, Copyright (c) 2021 Marco Boneberger,
// licensed under the EUPL-1.2-or-later.

//! Contains the smoothing-filter abstraction of the servo loop and the built-in
//! first-order low-pass filter.
use crate::exception::{ServoException, ServoResult};
use crate::model::RobotModel;
use std::f64::consts::PI;

/// Maximum cutoff frequency: 1000 Hz
pub static MAX_CUTOFF_FREQUENCY: f64 = 1000.0;
///  Default cutoff frequency: 100 Hz
pub static DEFAULT_CUTOFF_FREQUENCY: f64 = 100.0;

/// Applies a first-order low-pass filter
///
/// # Arguments
/// * `sample_time` - Sample time constant
/// * `y` - Current value of the signal to be filtered
/// * `y_last` - Value of the signal to be filtered in the previous time step
/// * `cutoff_frequency` - Cutoff frequency of the low-pass filter
/// # Panics
/// This function panics if:
/// * y is infinite or NaN.
/// * y_last is infinite or NaN.
/// * cutoff_frequency is zero, negative, infinite or NaN.
/// * sample_time is negative, infinite or NaN.
/// # Return
/// Filtered value.
pub fn low_pass_filter(sample_time: f64, y: f64, y_last: f64, cutoff_frequency: f64) -> f64 {
    assert!(sample_time.is_sign_positive() && sample_time.is_finite());
    assert!(cutoff_frequency.is_sign_positive() && cutoff_frequency.is_finite());
    assert!(y.is_finite() && y_last.is_finite());
    let gain = sample_time / (sample_time + (1.0 / (2.0 * PI * cutoff_frequency)));
    gain * y + (1. - gain) * y_last
}

/// Online signal smoother applied to the joint positions of every outgoing sample.
///
/// Implementations are stateful; `reset` re-seeds the state so restarting the loop
/// does not cause a jump.
pub trait SmoothingFilter: Send {
    /// Prepares the filter for a group of `num_joints` joints.
    ///
    /// # Errors
    /// * PluginException when the filter cannot work with this model.
    fn initialize(&mut self, model: &dyn RobotModel, num_joints: usize) -> ServoResult<()>;

    /// Re-seeds the filter state with the given joint positions.
    fn reset(&mut self, positions: &[f64]);

    /// Smooths the given joint positions in place.
    fn do_smoothing(&mut self, positions: &mut [f64]);
}

/// First-order low-pass smoothing of each joint position.
pub struct LowPassSmoothing {
    sample_time: f64,
    cutoff_frequency: f64,
    last_positions: Vec<f64>,
}

impl LowPassSmoothing {
    pub fn new(sample_time: f64, cutoff_frequency: f64) -> Self {
        LowPassSmoothing {
            sample_time,
            cutoff_frequency: cutoff_frequency.min(MAX_CUTOFF_FREQUENCY),
            last_positions: Vec::new(),
        }
    }
}

impl SmoothingFilter for LowPassSmoothing {
    fn initialize(&mut self, model: &dyn RobotModel, num_joints: usize) -> ServoResult<()> {
        if model.dof() != num_joints {
            return Err(ServoException::PluginException {
                name: "low_pass_filter".to_string(),
                message: format!(
                    "model has {} joints, expected {}",
                    model.dof(),
                    num_joints
                ),
            });
        }
        self.last_positions = vec![0.; num_joints];
        Ok(())
    }

    fn reset(&mut self, positions: &[f64]) {
        self.last_positions.clear();
        self.last_positions.extend_from_slice(positions);
    }

    fn do_smoothing(&mut self, positions: &mut [f64]) {
        for (position, last) in positions.iter_mut().zip(self.last_positions.iter_mut()) {
            *position = low_pass_filter(self.sample_time, *position, *last, self.cutoff_frequency);
            *last = *position;
        }
    }
}

/// Smoothing filter which passes every sample through unchanged.
///
/// Useful for controllers which filter on their own side.
pub struct PassthroughSmoothing;

impl SmoothingFilter for PassthroughSmoothing {
    fn initialize(&mut self, _model: &dyn RobotModel, _num_joints: usize) -> ServoResult<()> {
        Ok(())
    }

    fn reset(&mut self, _positions: &[f64]) {}

    fn do_smoothing(&mut self, _positions: &mut [f64]) {}
}

/// Resolves a smoothing filter by its configured name.
///
/// # Errors
/// * PluginException for an unknown name. This aborts startup.
pub fn create_smoothing_filter(
    name: &str,
    sample_time: f64,
) -> ServoResult<Box<dyn SmoothingFilter>> {
    match name {
        "low_pass_filter" => Ok(Box::new(LowPassSmoothing::new(
            sample_time,
            DEFAULT_CUTOFF_FREQUENCY,
        ))),
        "none" => Ok(Box::new(PassthroughSmoothing)),
        _ => Err(ServoException::PluginException {
            name: name.to_string(),
            message: "unknown smoothing filter".to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn low_pass_test() {
        assert!(f64::abs(low_pass_filter(0.001, 1.0, 1.0, 100.0) - 1.) < 0.000001);
        assert!(f64::abs(low_pass_filter(0.001, 1.0, 1.0, 500.0) - 1.) < 0.000001);
        assert!(f64::abs(low_pass_filter(0.001, 1.0, 1.0, 1000.0) - 1.) < 0.000001);
        assert!(f64::abs(low_pass_filter(0.001, 1.0, 0.0, 100.0) - 0.3859) < 0.0001);
        assert!(f64::abs(low_pass_filter(0.001, 1.0, 0.0, 500.0) - 0.7585) < 0.0001);
        assert!(f64::abs(low_pass_filter(0.001, 1.0, 0.0, 900.0) - 0.8497) < 0.0001);
    }

    #[test]
    fn smoothing_converges_to_constant_input() {
        let mut filter = LowPassSmoothing::new(0.01, DEFAULT_CUTOFF_FREQUENCY);
        filter.reset(&[0., 0.]);
        let mut positions = [1., -1.];
        for _ in 0..200 {
            positions = [1., -1.];
            filter.do_smoothing(&mut positions);
        }
        assert!((positions[0] - 1.).abs() < 1e-6);
        assert!((positions[1] + 1.).abs() < 1e-6);
    }

    #[test]
    fn reset_reseeds_the_state() {
        let mut filter = LowPassSmoothing::new(0.001, DEFAULT_CUTOFF_FREQUENCY);
        filter.reset(&[2.]);
        let mut positions = [2.];
        filter.do_smoothing(&mut positions);
        assert!((positions[0] - 2.).abs() < 1e-12);
    }

    #[test]
    fn unknown_filter_name_is_fatal() {
        assert!(create_smoothing_filter("butterworth", 0.01).is_err());
        assert!(create_smoothing_filter("low_pass_filter", 0.01).is_ok());
        assert!(create_smoothing_filter("none", 0.01).is_ok());
    }
}
