//! contains useful type definitions and small helpers.
use nalgebra::SVector;
use std::time::{Duration, Instant};

/// A Vector with 6 entries, used for twists and Cartesian position deltas
pub type Vector6 = SVector<f64, 6>;

/// Rate limiter for repeated log statements emitted from the control loop.
///
/// The loop runs at the publish rate, so a condition which persists for a few seconds
/// would otherwise produce thousands of identical lines.
#[derive(Debug)]
pub struct Throttle {
    period: Duration,
    last: Option<Instant>,
}

impl Throttle {
    /// Creates a new Throttle which lets one event through per `period`.
    pub fn new(period: Duration) -> Self {
        Throttle { period, last: None }
    }

    /// Returns true at most once per period.
    pub fn ready(&mut self) -> bool {
        let now = Instant::now();
        match self.last {
            Some(last) if now.duration_since(last) < self.period => false,
            _ => {
                self.last = Some(now);
                true
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::Throttle;
    use std::time::Duration;

    #[test]
    fn throttle_lets_first_event_through() {
        let mut throttle = Throttle::new(Duration::from_secs(3));
        assert!(throttle.ready());
        assert!(!throttle.ready());
        assert!(!throttle.ready());
    }

    #[test]
    fn throttle_recovers_after_period() {
        let mut throttle = Throttle::new(Duration::from_millis(10));
        assert!(throttle.ready());
        assert!(!throttle.ready());
        std::thread::sleep(Duration::from_millis(15));
        assert!(throttle.ready());
    }
}
