// Portions derived from MoveIt Servo (servo_calcs),
// Copyright (c) 2019, Los Alamos National Security, LLC. BSD-3-Clause.

//! Contains the servo worker thread: command ingestion, the periodic loop and the
//! per-cycle servoing calculation.
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI8, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use nalgebra::{DVector, Isometry3, SVD};
use num_traits::FromPrimitive;
use spin_sleep::SpinSleeper;
use tracing::{debug, error, info, warn};

use crate::exception::{ServoException, ServoResult};
use crate::model::{JointLimits, RobotModel, StateMonitor};
use crate::servo::command::{
    check_valid_command, check_valid_jog_command, scale_cartesian_command, scale_joint_command,
    JointJogCommand, TwistCommand,
};
use crate::servo::control_tools::{
    has_realtime_kernel, set_current_thread_to_highest_scheduler_priority,
};
use crate::servo::frames::{transform_twist_to_planning_frame, TransformCache};
use crate::servo::low_pass_filter::{create_smoothing_filter, SmoothingFilter};
use crate::servo::parameters::{CommandOutType, RealtimeConfig, ServoParameters};
use crate::servo::position_limits::{joints_to_halt, sudden_halt};
use crate::servo::rate_limiting::{enforce_velocity_limits, DEFAULT_MAX_VELOCITY};
use crate::servo::singularity::{
    enforce_control_dimensions, pseudo_inverse, remove_drift_dimensions,
    velocity_scaling_factor_for_singularity,
};
use crate::servo::status::StatusCode;
use crate::servo::STOPPED_VELOCITY_EPS;
use crate::trajectory::{JointState, JointTrajectory, TrajectoryPoint};
use crate::transport::OutputSink;
use crate::utils::Throttle;

const LOG_THROTTLE_PERIOD: Duration = Duration::from_secs(3);

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum ServoType {
    CartesianSpace,
    JointSpace,
}

/// Latest-value command slots and runtime-adjustable masks, written by arbitrary
/// caller threads and read once per cycle by the worker.
#[derive(Debug)]
struct InputBuffer {
    latest_twist: Option<TwistCommand>,
    latest_twist_is_nonzero: bool,
    latest_twist_stamp: Option<Instant>,
    latest_jog: Option<JointJogCommand>,
    latest_jog_is_nonzero: bool,
    latest_jog_stamp: Option<Instant>,
    drift_dimensions: [bool; 6],
    control_dimensions: [bool; 6],
    command_frame: String,
    transforms: TransformCache,
    new_input: bool,
}

impl InputBuffer {
    fn new(command_frame: String) -> Self {
        InputBuffer {
            latest_twist: None,
            latest_twist_is_nonzero: false,
            latest_twist_stamp: None,
            latest_jog: None,
            latest_jog_is_nonzero: false,
            latest_jog_stamp: None,
            drift_dimensions: [false; 6],
            control_dimensions: [true; 6],
            command_frame,
            transforms: TransformCache::default(),
            new_input: false,
        }
    }
}

/// Per-cycle copy of the input buffer, so the main-loop mutex is never held across
/// kinematics or smoothing.
#[derive(Debug, Clone)]
struct InputSnapshot {
    twist: Option<TwistCommand>,
    twist_is_nonzero: bool,
    twist_stamp: Option<Instant>,
    jog: Option<JointJogCommand>,
    jog_is_nonzero: bool,
    jog_stamp: Option<Instant>,
    drift_dimensions: [bool; 6],
    control_dimensions: [bool; 6],
    command_frame: String,
}

struct SharedState {
    input: Mutex<InputBuffer>,
    input_cv: Condvar,
    stop_requested: AtomicBool,
    paused: AtomicBool,
    /// f64 bit pattern of the collision velocity scale in \[0, 1\]
    collision_velocity_scale: AtomicU64,
    status: AtomicI8,
}

impl SharedState {
    fn new(command_frame: String) -> Self {
        SharedState {
            input: Mutex::new(InputBuffer::new(command_frame)),
            input_cv: Condvar::new(),
            stop_requested: AtomicBool::new(true),
            paused: AtomicBool::new(false),
            collision_velocity_scale: AtomicU64::new(1f64.to_bits()),
            status: AtomicI8::new(StatusCode::NoWarning.as_i8()),
        }
    }

    fn lock_input(&self) -> MutexGuard<'_, InputBuffer> {
        self.input.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn collision_scale(&self) -> f64 {
        f64::from_bits(self.collision_velocity_scale.load(Ordering::SeqCst))
    }
}

/// Real-time servoing engine.
///
/// Converts externally supplied twist or joint-jog commands into smoothed,
/// limit-enforced outgoing joint trajectories at a fixed publish cadence. A dedicated
/// worker thread runs the loop; all public methods may be called from any thread.
pub struct Servo {
    parameters: Arc<ServoParameters>,
    shared: Arc<SharedState>,
    calcs: Option<ServoCalcs>,
    worker: Option<JoinHandle<ServoCalcs>>,
}

impl Servo {
    /// Creates a new servoing engine.
    ///
    /// # Errors
    /// * ConfigException on an invalid parameter set.
    /// * ModelException when the model does not describe the configured move group.
    /// * PluginException when the smoothing filter cannot be loaded or initialized.
    /// * RealTimeException when realtime scheduling is enforced without a realtime kernel.
    pub fn new(
        parameters: ServoParameters,
        model: Arc<dyn RobotModel>,
        state_monitor: Arc<dyn StateMonitor>,
        sink: Box<dyn OutputSink>,
    ) -> ServoResult<Self> {
        parameters.validate()?;
        if model.move_group_name() != parameters.move_group_name {
            return Err(ServoException::ModelException {
                message: format!("Invalid move group name: {:?}", parameters.move_group_name),
            });
        }
        let joint_names = model.joint_names();
        let num_joints = joint_names.len();
        if num_joints == 0 {
            return Err(ServoException::ModelException {
                message: "move group has no actuated joints".to_string(),
            });
        }
        if parameters.realtime_config == RealtimeConfig::Enforce && !has_realtime_kernel() {
            return Err(ServoException::RealTimeException {
                message: "servo: Running kernel does not have realtime capabilities.".to_string(),
            });
        }

        let mut smoother = create_smoothing_filter(
            &parameters.smoothing_filter_plugin_name,
            parameters.publish_period,
        )?;
        smoother.initialize(model.as_ref(), num_joints)?;

        let joint_limits: Vec<JointLimits> =
            (0..num_joints).map(|i| model.joint_limits(i)).collect();
        let max_velocities: Vec<f64> = joint_limits
            .iter()
            .map(|limits| limits.max_velocity.unwrap_or(DEFAULT_MAX_VELOCITY))
            .collect();
        let joint_index_map: HashMap<String, usize> = joint_names
            .iter()
            .enumerate()
            .map(|(index, name)| (name.clone(), index))
            .collect();

        let parameters = Arc::new(parameters);
        let shared = Arc::new(SharedState::new(parameters.robot_link_command_frame.clone()));
        let calcs = ServoCalcs {
            parameters: Arc::clone(&parameters),
            model,
            state_monitor,
            sink,
            smoother,
            shared: Arc::clone(&shared),
            joint_limits,
            max_velocities,
            joint_index_map,
            num_joints,
            internal_joint_state: JointState::zeroed(joint_names.clone()),
            original_joint_state: JointState::zeroed(joint_names),
            delta_theta: DVector::zeros(num_joints),
            last_sent_command: JointTrajectory::default(),
            zero_velocity_count: 0,
            done_stopping: false,
            wait_for_servo_commands: true,
            updated_filters: false,
            invalid_command_throttle: Throttle::new(LOG_THROTTLE_PERIOD),
            frame_throttle: Throttle::new(LOG_THROTTLE_PERIOD),
            unknown_joint_throttle: Throttle::new(LOG_THROTTLE_PERIOD),
            collision_throttle: Throttle::new(LOG_THROTTLE_PERIOD),
            singularity_throttle: Throttle::new(LOG_THROTTLE_PERIOD),
            position_limit_throttle: Throttle::new(LOG_THROTTLE_PERIOD),
            cycle_time_throttle: Throttle::new(LOG_THROTTLE_PERIOD),
            quiet_throttle: Throttle::new(LOG_THROTTLE_PERIOD),
            state_size_throttle: Throttle::new(LOG_THROTTLE_PERIOD),
        };
        Ok(Servo {
            parameters,
            shared,
            calcs: Some(calcs),
            worker: None,
        })
    }

    /// Starts the worker thread. Restarts it when it is already running.
    pub fn start(&mut self) {
        self.stop();
        let mut calcs = match self.calcs.take() {
            Some(calcs) => calcs,
            None => return,
        };
        calcs.prepare_start();
        self.shared.stop_requested.store(false, Ordering::SeqCst);
        self.shared.lock_input().new_input = false;
        let handle = std::thread::Builder::new()
            .name("servo-control-loop".to_string())
            .spawn(move || {
                calcs.main_calc_loop();
                calcs
            });
        match handle {
            Ok(handle) => self.worker = Some(handle),
            Err(spawn_error) => error!("failed to spawn servo worker: {}", spawn_error),
        }
    }

    /// Requests the worker to stop and joins it. No in-flight cycle is aborted.
    pub fn stop(&mut self) {
        self.shared.stop_requested.store(true, Ordering::SeqCst);
        {
            // scope so the mutex is unlocked again and the worker can continue
            // and therefore be joinable
            let mut input = self.shared.lock_input();
            input.new_input = false;
            self.shared.input_cv.notify_all();
        }
        if let Some(handle) = self.worker.take() {
            match handle.join() {
                Ok(calcs) => self.calcs = Some(calcs),
                Err(_) => error!("servo worker thread panicked"),
            }
        }
    }

    /// Whether the worker thread is currently running.
    pub fn running(&self) -> bool {
        self.worker.is_some()
    }

    /// Stages a Cartesian velocity command. Last value wins.
    pub fn enqueue_twist_command(&self, command: TwistCommand) {
        let mut input = self.shared.lock_input();
        input.latest_twist_is_nonzero = command.is_nonzero();
        if let Some(stamp) = command.stamp {
            input.latest_twist_stamp = Some(stamp);
        }
        input.latest_twist = Some(command);
        input.new_input = true;
        self.shared.input_cv.notify_all();
    }

    /// Stages a joint jog command. Last value wins.
    pub fn enqueue_joint_jog_command(&self, command: JointJogCommand) {
        let mut input = self.shared.lock_input();
        input.latest_jog_is_nonzero = command.is_nonzero();
        if let Some(stamp) = command.stamp {
            input.latest_jog_stamp = Some(stamp);
        }
        input.latest_jog = Some(command);
        input.new_input = true;
        self.shared.input_cv.notify_all();
    }

    /// Updates the collision velocity scale in \[0, 1\] consumed by the next cycle.
    pub fn set_collision_velocity_scale(&self, scale: f64) {
        self.shared
            .collision_velocity_scale
            .store(scale.to_bits(), Ordering::SeqCst);
    }

    /// Pauses or resumes servoing. While paused the smoothing filter keeps tracking
    /// the current joint state and nothing is published.
    pub fn set_paused(&self, paused: bool) {
        self.shared.paused.store(paused, Ordering::SeqCst);
    }

    /// Selects the Cartesian axes whose error is tolerated; their Jacobian rows are
    /// dropped before inversion.
    pub fn change_drift_dimensions(&self, drift_dimensions: [bool; 6]) -> bool {
        self.shared.lock_input().drift_dimensions = drift_dimensions;
        true
    }

    /// Selects the Cartesian axes under control; unchecked axes are zeroed in the
    /// incoming command.
    pub fn change_control_dimensions(&self, control_dimensions: [bool; 6]) -> bool {
        self.shared.lock_input().control_dimensions = control_dimensions;
        true
    }

    /// Resets the published status to [`StatusCode::NoWarning`], e.g. so the arm can
    /// move again after a collision.
    pub fn reset_status(&self) {
        self.shared
            .status
            .store(StatusCode::NoWarning.as_i8(), Ordering::SeqCst);
    }

    /// Status of the current cycle.
    pub fn status(&self) -> StatusCode {
        StatusCode::from_i8(self.shared.status.load(Ordering::SeqCst))
            .unwrap_or(StatusCode::NoWarning)
    }

    /// Changes the frame incoming twists without a frame id are interpreted in.
    pub fn set_command_frame(&self, frame: String) {
        info!("robot_link_command_frame changed to: {}", frame);
        self.shared.lock_input().command_frame = frame;
    }

    /// planning→command-frame transform of the latest cycle, `None` until the loop
    /// ran at least once.
    pub fn command_frame_transform(&self) -> Option<Isometry3<f64>> {
        self.shared.lock_input().transforms.planning_to_cmd
    }

    /// planning→end-effector transform of the latest cycle, `None` until the loop
    /// ran at least once.
    pub fn ee_frame_transform(&self) -> Option<Isometry3<f64>> {
        self.shared.lock_input().transforms.planning_to_ee
    }

    /// The parameter set the engine was created with.
    pub fn parameters(&self) -> &ServoParameters {
        &self.parameters
    }
}

impl Drop for Servo {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Worker-side state of the servo loop. Owned exclusively by the worker thread while
/// it runs and returned to the [`Servo`] handle on stop.
struct ServoCalcs {
    parameters: Arc<ServoParameters>,
    model: Arc<dyn RobotModel>,
    state_monitor: Arc<dyn StateMonitor>,
    sink: Box<dyn OutputSink>,
    smoother: Box<dyn SmoothingFilter>,
    shared: Arc<SharedState>,
    joint_limits: Vec<JointLimits>,
    max_velocities: Vec<f64>,
    joint_index_map: HashMap<String, usize>,
    num_joints: usize,
    internal_joint_state: JointState,
    original_joint_state: JointState,
    delta_theta: DVector<f64>,
    last_sent_command: JointTrajectory,
    zero_velocity_count: u32,
    done_stopping: bool,
    wait_for_servo_commands: bool,
    updated_filters: bool,
    invalid_command_throttle: Throttle,
    frame_throttle: Throttle,
    unknown_joint_throttle: Throttle,
    collision_throttle: Throttle,
    singularity_throttle: Throttle,
    position_limit_throttle: Throttle,
    cycle_time_throttle: Throttle,
    quiet_throttle: Throttle,
    state_size_throttle: Throttle,
}

impl ServoCalcs {
    /// Seeds the last-sent command and the transform cache before the worker starts,
    /// so a zero-command republish is well formed from the first cycle on.
    fn prepare_start(&mut self) {
        if self.update_joints() {
            let seed_state = JointState {
                name: self.original_joint_state.name.clone(),
                position: self.original_joint_state.position.clone(),
                velocity: vec![0.; self.num_joints],
            };
            let mut initial_command = JointTrajectory::default();
            self.compose_joint_trajectory(&seed_state, &mut initial_command);
            self.last_sent_command = initial_command;
            let command_frame = self.parameters.robot_link_command_frame.clone();
            self.refresh_transforms(&command_frame);
        }
        self.zero_velocity_count = 0;
        self.done_stopping = false;
        self.wait_for_servo_commands = true;
        self.updated_filters = false;
    }

    fn main_calc_loop(&mut self) {
        if self.parameters.realtime_config == RealtimeConfig::Enforce {
            if let Err(realtime_error) = set_current_thread_to_highest_scheduler_priority() {
                error!("{}", realtime_error);
            }
        }
        let period = Duration::from_secs_f64(self.parameters.publish_period);
        let sleeper = SpinSleeper::default();

        while !self.shared.stop_requested.load(Ordering::SeqCst) {
            let snapshot = {
                let mut input = self.shared.lock_input();
                if self.parameters.low_latency_mode {
                    // begin calculations as soon as a new command is received;
                    // spurious-wake safe, also released by stop()
                    while !input.new_input && !self.shared.stop_requested.load(Ordering::SeqCst) {
                        input = self
                            .shared
                            .input_cv
                            .wait(input)
                            .unwrap_or_else(|poisoned| poisoned.into_inner());
                    }
                }
                input.new_input = false;
                Self::snapshot_inputs(&input)
            };

            let start_time = Instant::now();
            self.calculate_single_iteration(&snapshot);
            let run_duration = start_time.elapsed();

            if run_duration > period && self.cycle_time_throttle.ready() {
                warn!(
                    "servo cycle took {:?}, publish period is {:?}",
                    run_duration, period
                );
            }

            if !self.parameters.low_latency_mode {
                sleeper.sleep(period.saturating_sub(run_duration));
            }
        }
    }

    fn snapshot_inputs(input: &InputBuffer) -> InputSnapshot {
        InputSnapshot {
            twist: input.latest_twist.clone(),
            twist_is_nonzero: input.latest_twist_is_nonzero,
            twist_stamp: input.latest_twist_stamp,
            jog: input.latest_jog.clone(),
            jog_is_nonzero: input.latest_jog_is_nonzero,
            jog_stamp: input.latest_jog_stamp,
            drift_dimensions: input.drift_dimensions,
            control_dimensions: input.control_dimensions,
            command_frame: input.command_frame.clone(),
        }
    }

    fn calculate_single_iteration(&mut self, snapshot: &InputSnapshot) {
        // publish the status of the previous cycle, then reset it
        let status = self
            .shared
            .status
            .swap(StatusCode::NoWarning.as_i8(), Ordering::SeqCst);
        self.sink.send_status(status);

        // always update joints and the cached transforms so the smoothing filter
        // stays current and the transform accessors work while idle
        if !self.update_joints() {
            return;
        }
        self.refresh_transforms(&snapshot.command_frame);

        let now = Instant::now();
        let timeout = Duration::from_secs_f64(self.parameters.incoming_command_timeout);
        let twist_is_stale = snapshot
            .twist_stamp
            .map_or(true, |stamp| now.duration_since(stamp) >= timeout);
        let jog_is_stale = snapshot
            .jog_stamp
            .map_or(true, |stamp| now.duration_since(stamp) >= timeout);
        let have_nonzero_twist = snapshot.twist_is_nonzero;
        let have_nonzero_jog = snapshot.jog_is_nonzero;

        self.updated_filters = false;

        // while paused or waiting for the first command, keep the filter state on the
        // current joints so restarting does not cause a jump
        if self.wait_for_servo_commands || self.shared.paused.load(Ordering::SeqCst) {
            self.reset_smoothing_filter();
            self.wait_for_servo_commands = snapshot
                .twist
                .as_ref()
                .map_or(true, |command| command.stamp.is_none())
                && snapshot
                    .jog
                    .as_ref()
                    .map_or(true, |command| command.stamp.is_none());
            return;
        }

        let mut joint_trajectory = JointTrajectory::default();

        // Cartesian servoing has priority over joint servoing
        if have_nonzero_twist && !twist_is_stale {
            let mut twist = match snapshot.twist.clone() {
                Some(twist) => twist,
                None => return,
            };
            if !self.cartesian_servo_calcs(&mut twist, snapshot, &mut joint_trajectory) {
                self.reset_smoothing_filter();
                return;
            }
        } else if have_nonzero_jog && !jog_is_stale {
            let jog = match snapshot.jog.clone() {
                Some(jog) => jog,
                None => return,
            };
            if !self.joint_servo_calcs(&jog, snapshot, &mut joint_trajectory) {
                self.reset_smoothing_filter();
                return;
            }
        } else {
            // nothing fresh and nonzero: republish the last command with zero velocity
            joint_trajectory = self.last_sent_command.clone();
            for point in &mut joint_trajectory.points {
                for velocity in &mut point.velocities {
                    *velocity = 0.;
                }
            }
        }

        if twist_is_stale && jog_is_stale {
            self.filtered_halt(&mut joint_trajectory);
        } else {
            self.done_stopping = false;
        }

        let num_halt_msgs = self.parameters.num_outgoing_halt_msgs_to_publish;
        let ok_to_publish = if self.done_stopping
            && num_halt_msgs != 0
            && self.zero_velocity_count > num_halt_msgs
        {
            if self.quiet_throttle.ready() {
                debug!("Stopped and all-zero command. Doing nothing.");
            }
            false
        } else {
            true
        };

        if self.done_stopping {
            self.zero_velocity_count = self.zero_velocity_count.saturating_add(1);
        } else {
            self.zero_velocity_count = 0;
        }

        if ok_to_publish && !self.shared.paused.load(Ordering::SeqCst) {
            self.publish(&mut joint_trajectory);
        }

        if !self.updated_filters {
            self.reset_smoothing_filter();
        }
    }

    fn publish(&mut self, joint_trajectory: &mut JointTrajectory) {
        // clear out fields the user did not request; populated fields can cause
        // interpolation issues on the controller side
        if let Some(point) = joint_trajectory.points.first_mut() {
            if !self.parameters.publish_joint_positions {
                point.positions.clear();
            }
            if !self.parameters.publish_joint_velocities {
                point.velocities.clear();
            }
            if !self.parameters.publish_joint_accelerations {
                point.accelerations.clear();
            }
        }
        match self.parameters.command_out_type {
            CommandOutType::Trajectory => {
                // an absent stamp tells the controller to begin immediately
                joint_trajectory.stamp = None;
                self.last_sent_command = joint_trajectory.clone();
                self.sink.send_trajectory(joint_trajectory);
            }
            CommandOutType::Multiarray => {
                let values = match joint_trajectory.points.first() {
                    Some(point) if self.parameters.publish_joint_positions => {
                        point.positions.clone()
                    }
                    Some(point) => point.velocities.clone(),
                    None => Vec::new(),
                };
                self.last_sent_command = joint_trajectory.clone();
                self.sink.send_joint_values(&values);
            }
        }
    }

    fn cartesian_servo_calcs(
        &mut self,
        command: &mut TwistCommand,
        snapshot: &InputSnapshot,
        joint_trajectory: &mut JointTrajectory,
    ) -> bool {
        if !check_valid_command(
            command,
            self.parameters.command_in_type,
            &mut self.invalid_command_throttle,
        ) {
            return false;
        }

        enforce_control_dimensions(command, &snapshot.control_dimensions);

        let positions = DVector::from_column_slice(&self.original_joint_state.position);
        if command.frame_id != self.parameters.planning_frame {
            let transforms = self.shared.lock_input().transforms.clone();
            if !transform_twist_to_planning_frame(
                command,
                &transforms,
                self.model.as_ref(),
                &positions,
                &self.parameters.planning_frame,
                &self.parameters.ee_frame_name,
                &snapshot.command_frame,
                &mut self.frame_throttle,
            ) {
                return false;
            }
        }

        let delta_x = scale_cartesian_command(command, &self.parameters);

        let jacobian = self.model.jacobian(&positions);
        let (jacobian, delta_x) = remove_drift_dimensions(
            jacobian,
            DVector::from_column_slice(delta_x.as_slice()),
            &snapshot.drift_dimensions,
        );

        let svd = SVD::new(jacobian, true, true);
        let pinv = pseudo_inverse(&svd);
        self.delta_theta = &pinv * &delta_x;

        let scaling = velocity_scaling_factor_for_singularity(
            self.model.as_ref(),
            &positions,
            &delta_x,
            &svd,
            &pinv,
            self.parameters.lower_singularity_threshold,
            self.parameters.hard_stop_singularity_threshold,
        );
        self.sink.send_condition_number(scaling.condition_number);
        if let Some(status) = scaling.status {
            self.set_status(status);
            if self.singularity_throttle.ready() {
                warn!("{}", status.message());
            }
        }
        self.delta_theta *= scaling.scale;

        self.internal_servo_update(joint_trajectory, ServoType::CartesianSpace)
    }

    fn joint_servo_calcs(
        &mut self,
        command: &JointJogCommand,
        _snapshot: &InputSnapshot,
        joint_trajectory: &mut JointTrajectory,
    ) -> bool {
        if !check_valid_jog_command(command, &mut self.invalid_command_throttle) {
            return false;
        }
        self.delta_theta = scale_joint_command(
            command,
            &self.joint_index_map,
            &self.parameters,
            &mut self.unknown_joint_throttle,
        );
        self.internal_servo_update(joint_trajectory, ServoType::JointSpace)
    }

    fn internal_servo_update(
        &mut self,
        joint_trajectory: &mut JointTrajectory,
        servo_type: ServoType,
    ) -> bool {
        self.internal_joint_state = self.original_joint_state.clone();

        let collision_scale = self.shared.collision_scale();
        if collision_scale == 0. {
            self.set_status(StatusCode::HaltForCollision);
            if self.collision_throttle.ready() {
                error!("Halting for collision!");
            }
        } else if collision_scale < 1. {
            self.set_status(StatusCode::DecelerateForCollision);
            if self.collision_throttle.ready() {
                warn!("{}", StatusCode::DecelerateForCollision.message());
            }
        }
        self.delta_theta *= collision_scale;

        if !self.apply_joint_update() {
            return false;
        }

        enforce_velocity_limits(
            &mut self.internal_joint_state,
            &self.original_joint_state,
            &self.max_velocities,
        );

        let halt_indices = joints_to_halt(
            &self.internal_joint_state,
            &self.joint_limits,
            self.parameters.joint_limit_margin,
            &mut self.position_limit_throttle,
        );
        if !halt_indices.is_empty() {
            self.set_status(StatusCode::JointBound);
            let halt_all = match servo_type {
                ServoType::JointSpace => self.parameters.halt_all_joints_in_joint_mode,
                ServoType::CartesianSpace => self.parameters.halt_all_joints_in_cartesian_mode,
            };
            if halt_all {
                let all_joints: Vec<usize> = (0..self.num_joints).collect();
                sudden_halt(
                    &mut self.internal_joint_state,
                    &self.original_joint_state,
                    &all_joints,
                );
            } else {
                sudden_halt(
                    &mut self.internal_joint_state,
                    &self.original_joint_state,
                    &halt_indices,
                );
            }
        }

        let output_state = self.internal_joint_state.clone();
        self.compose_joint_trajectory(&output_state, joint_trajectory);
        if self.parameters.redundant_point_count >= 2 {
            Self::insert_redundant_points(
                joint_trajectory,
                self.parameters.redundant_point_count,
                self.parameters.publish_period,
            );
        }
        true
    }

    /// Integrates the position delta, smooths the result and differentiates the
    /// velocities from the smoothed positions.
    fn apply_joint_update(&mut self) -> bool {
        if self.internal_joint_state.position.len() != self.delta_theta.len() {
            if self.state_size_throttle.ready() {
                error!("Lengths of output and increments do not match.");
            }
            return false;
        }
        for i in 0..self.num_joints {
            self.internal_joint_state.position[i] += self.delta_theta[i];
        }
        self.smoother
            .do_smoothing(&mut self.internal_joint_state.position);
        for i in 0..self.num_joints {
            self.internal_joint_state.velocity[i] = (self.internal_joint_state.position[i]
                - self.original_joint_state.position[i])
                / self.parameters.publish_period;
        }
        self.updated_filters = true;
        true
    }

    /// Emits one decelerating point: the original positions run through the filter,
    /// velocities differentiated from the smoothed positions. Once every velocity is
    /// below [`STOPPED_VELOCITY_EPS`] they are snapped to exactly zero.
    fn filtered_halt(&mut self, joint_trajectory: &mut JointTrajectory) {
        let mut point = TrajectoryPoint {
            positions: self.original_joint_state.position.clone(),
            time_from_start: self.parameters.publish_period,
            ..TrajectoryPoint::default()
        };
        self.smoother.do_smoothing(&mut point.positions);

        self.done_stopping = true;
        if self.parameters.publish_joint_velocities {
            point.velocities = vec![0.; self.num_joints];
            for i in 0..self.num_joints {
                point.velocities[i] = (point.positions[i]
                    - self.original_joint_state.position[i])
                    / self.parameters.publish_period;
                if point.velocities[i].abs() > STOPPED_VELOCITY_EPS {
                    self.done_stopping = false;
                }
            }
            if self.done_stopping {
                for velocity in &mut point.velocities {
                    *velocity = 0.;
                }
            }
        }
        if self.parameters.publish_joint_accelerations {
            point.accelerations = vec![0.; self.num_joints];
            for i in 0..self.num_joints {
                let velocity = point.velocities.get(i).copied().unwrap_or(0.);
                point.accelerations[i] = (velocity - self.original_joint_state.velocity[i])
                    / self.parameters.publish_period;
            }
        }

        joint_trajectory.points.clear();
        joint_trajectory.points.push(point);
    }

    fn compose_joint_trajectory(
        &self,
        joint_state: &JointState,
        joint_trajectory: &mut JointTrajectory,
    ) {
        joint_trajectory.stamp = None;
        joint_trajectory.frame_id = self.parameters.planning_frame.clone();
        joint_trajectory.joint_names = joint_state.name.clone();

        let mut point = TrajectoryPoint {
            time_from_start: self.parameters.publish_period,
            ..TrajectoryPoint::default()
        };
        if self.parameters.publish_joint_positions {
            point.positions = joint_state.position.clone();
        }
        if self.parameters.publish_joint_velocities {
            point.velocities = joint_state.velocity.clone();
        }
        if self.parameters.publish_joint_accelerations {
            // no known robot takes acceleration commands, but some controllers
            // require the field to be populated
            point.accelerations = vec![0.; joint_state.position.len()];
        }
        joint_trajectory.points.clear();
        joint_trajectory.points.push(point);
    }

    /// Pads the trajectory with identical points at increasing timestamps, for
    /// simulators which drop points whose timestamp has already passed.
    fn insert_redundant_points(
        joint_trajectory: &mut JointTrajectory,
        count: u32,
        publish_period: f64,
    ) {
        let point = match joint_trajectory.points.first() {
            Some(point) => point.clone(),
            None => return,
        };
        joint_trajectory.points.clear();
        for i in 0..count {
            let mut padded = point.clone();
            padded.time_from_start = (i + 1) as f64 * publish_period;
            joint_trajectory.points.push(padded);
        }
    }

    fn update_joints(&mut self) -> bool {
        let state = self.state_monitor.current_state();
        if state.position.len() != self.num_joints || state.velocity.len() != self.num_joints {
            if self.state_size_throttle.ready() {
                error!(
                    "state monitor returned {} positions, expected {}",
                    state.position.len(),
                    self.num_joints
                );
            }
            return false;
        }
        self.internal_joint_state.position = state.position;
        self.internal_joint_state.velocity = state.velocity;
        self.original_joint_state = self.internal_joint_state.clone();
        true
    }

    fn refresh_transforms(&mut self, command_frame: &str) {
        let positions = DVector::from_column_slice(&self.original_joint_state.position);
        let mut transforms = TransformCache::default();
        transforms.refresh(
            self.model.as_ref(),
            &positions,
            &self.parameters.planning_frame,
            &self.parameters.ee_frame_name,
            command_frame,
        );
        self.shared.lock_input().transforms = transforms;
    }

    fn reset_smoothing_filter(&mut self) {
        self.smoother.reset(&self.original_joint_state.position);
        self.updated_filters = true;
    }

    fn set_status(&self, status: StatusCode) {
        self.shared.status.store(status.as_i8(), Ordering::SeqCst);
    }
}
