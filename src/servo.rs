//! Contains the real-time servoing engine.
pub mod command;
mod control_loop;
mod control_tools;
pub mod frames;
pub mod low_pass_filter;
pub mod parameters;
pub mod position_limits;
pub mod rate_limiting;
pub mod singularity;
pub mod status;

pub use control_loop::Servo;

/// Velocity magnitude below which an outgoing joint velocity is considered stopped,
/// in \[rad/s\].
pub static STOPPED_VELOCITY_EPS: f64 = 1e-4;
