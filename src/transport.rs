//! Contains the outbound message seam of the servo loop.
//!
//! The engine does not know about any particular transport. It writes every message
//! through an [`OutputSink`]; the application decides whether that ends up on a ROS
//! topic, a CAN bus or an in-process channel.
use crate::trajectory::JointTrajectory;
use std::sync::mpsc::Sender;

/// Everything the servo loop publishes.
#[derive(Debug, Clone, PartialEq)]
pub enum OutboundMessage {
    /// Single-point joint trajectory for the downstream controller.
    Trajectory(JointTrajectory),
    /// Flat array of joint positions (or velocities if positions are disabled).
    JointValues(Vec<f64>),
    /// Numeric servo status code.
    Status(i8),
    /// Condition number of the Jacobian of the current cycle.
    ConditionNumber(f64),
}

/// Sink for the messages produced by the servo loop.
///
/// Called from the worker thread only. Implementations must not block for longer
/// than a fraction of the publish period.
pub trait OutputSink: Send {
    fn send_trajectory(&mut self, trajectory: &JointTrajectory);
    fn send_joint_values(&mut self, values: &[f64]);
    fn send_status(&mut self, status: i8);
    fn send_condition_number(&mut self, condition_number: f64);
}

/// OutputSink backed by an mpsc channel.
///
/// Send errors are ignored: a dropped receiver means the application side went away,
/// which must not bring down the control loop.
pub struct ChannelSink {
    sender: Sender<OutboundMessage>,
}

impl ChannelSink {
    pub fn new(sender: Sender<OutboundMessage>) -> Self {
        ChannelSink { sender }
    }
}

impl OutputSink for ChannelSink {
    fn send_trajectory(&mut self, trajectory: &JointTrajectory) {
        let _ = self
            .sender
            .send(OutboundMessage::Trajectory(trajectory.clone()));
    }

    fn send_joint_values(&mut self, values: &[f64]) {
        let _ = self.sender.send(OutboundMessage::JointValues(values.to_vec()));
    }

    fn send_status(&mut self, status: i8) {
        let _ = self.sender.send(OutboundMessage::Status(status));
    }

    fn send_condition_number(&mut self, condition_number: f64) {
        let _ = self
            .sender
            .send(OutboundMessage::ConditionNumber(condition_number));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc::channel;

    #[test]
    fn channel_sink_forwards_messages() {
        let (tx, rx) = channel();
        let mut sink = ChannelSink::new(tx);
        sink.send_status(3);
        sink.send_condition_number(42.0);
        assert_eq!(rx.recv().unwrap(), OutboundMessage::Status(3));
        assert_eq!(rx.recv().unwrap(), OutboundMessage::ConditionNumber(42.0));
    }

    #[test]
    fn channel_sink_survives_dropped_receiver() {
        let (tx, rx) = channel();
        drop(rx);
        let mut sink = ChannelSink::new(tx);
        sink.send_status(0);
    }
}
