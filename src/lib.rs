//! # servo-rs
//! servo-rs is a real-time Cartesian and joint servoing engine for multi-joint
//! articulated manipulators, together with a jerk-limited trajectory post-smoother.
//!
//! At a fixed publish cadence, externally supplied twist or joint-jog commands are
//! converted into smoothed, limit-enforced, singularity-aware joint trajectories for
//! a downstream joint controller.
//!
//! **ALWAYS HAVE THE USER STOP BUTTON AT HAND WHILE CONTROLLING THE ROBOT!**
//!
//! ## Design
//! The library is divided into three main modules:
//! * [servo](`crate::servo`) - the servo loop: command ingestion, inverse velocity
//!   kinematics, limit enforcement, halt and resume handling.
//! * [trajectory_smoothing](`crate::trajectory_smoothing`) - the offline
//!   jerk-limited resampler for stored waypoint trajectories.
//! * [model](`crate::model`) - the interfaces to the robot model and the joint-state
//!   monitor, which live outside this crate.
//!
//! The engine talks to the outside world through three seams: a [`RobotModel`] for
//! kinematics, a [`StateMonitor`] for the latest joint state, and an [`OutputSink`]
//! for everything it publishes.
//!
//! # Example
//! ```no_run
//! use std::sync::{mpsc::channel, Arc};
//! use std::time::Instant;
//! use nalgebra::Vector3;
//! use servo::{ChannelSink, Servo, ServoParameters, ServoResult, TwistCommand};
//! # use servo::{JointLimits, JointState, RobotModel, StateMonitor};
//! # use nalgebra::{DMatrix, DVector, Isometry3};
//! # struct MyModel;
//! # impl RobotModel for MyModel {
//! #     fn move_group_name(&self) -> &str { "manipulator" }
//! #     fn joint_names(&self) -> Vec<String> { vec!["joint_a".into()] }
//! #     fn jacobian(&self, _: &DVector<f64>) -> DMatrix<f64> { DMatrix::zeros(6, 1) }
//! #     fn link_transform(&self, _: &str, _: &DVector<f64>) -> Option<Isometry3<f64>> { None }
//! #     fn joint_limits(&self, _: usize) -> JointLimits { JointLimits::default() }
//! # }
//! # struct MyMonitor;
//! # impl StateMonitor for MyMonitor {
//! #     fn current_state(&self) -> JointState { JointState::zeroed(vec!["joint_a".into()]) }
//! # }
//!
//! fn main() -> ServoResult<()> {
//!     let (sender, receiver) = channel();
//!     let mut servo = Servo::new(
//!         ServoParameters::default(),
//!         Arc::new(MyModel),
//!         Arc::new(MyMonitor),
//!         Box::new(ChannelSink::new(sender)),
//!     )?;
//!     servo.start();
//!     servo.enqueue_twist_command(TwistCommand {
//!         frame_id: "base_link".to_string(),
//!         stamp: Some(Instant::now()),
//!         linear: Vector3::new(0.2, 0., 0.),
//!         angular: Vector3::zeros(),
//!     });
//!     for message in receiver.iter().take(10) {
//!         println!("{:?}", message);
//!     }
//!     servo.stop();
//!     Ok(())
//! }
//! ```
//!
//! The smoother is independent of the loop and runs on whatever thread calls it:
//! ```no_run
//! use servo::{apply_smoothing, JointLimits, SmootherParameters, Waypoint};
//!
//! let mut trajectory = vec![
//!     Waypoint::from_positions(vec![0.], 0.),
//!     Waypoint::from_positions(vec![0.5], 1.),
//! ];
//! apply_smoothing(
//!     &mut trajectory,
//!     &[JointLimits::default()],
//!     &SmootherParameters::default(),
//! )
//! .unwrap();
//! ```

pub mod exception;
pub mod model;
pub mod servo;
pub mod trajectory;
pub mod trajectory_smoothing;
pub mod transport;
pub mod utils;

pub use exception::{ServoException, ServoResult};
pub use model::{JointLimits, RobotModel, StateMonitor};
pub use servo::command::{JointJogCommand, TwistCommand};
pub use servo::low_pass_filter::SmoothingFilter;
pub use servo::parameters::{
    CommandInType, CommandOutType, RealtimeConfig, ServoParameters, SmootherParameters,
};
pub use servo::status::StatusCode;
pub use servo::Servo;
pub use trajectory::{JointState, JointTrajectory, TrajectoryPoint, Waypoint};
pub use trajectory_smoothing::apply_smoothing;
pub use transport::{ChannelSink, OutboundMessage, OutputSink};
