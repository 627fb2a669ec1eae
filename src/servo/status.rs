//! Contains the status code published by the servo loop.
use num_derive::{FromPrimitive, ToPrimitive};
use num_traits::ToPrimitive;
use serde_repr::{Deserialize_repr, Serialize_repr};

/// Condition the servo loop reported for the previous cycle.
///
/// Published as an `i8` stream once per cycle, then reset to [`StatusCode::NoWarning`].
#[derive(
    Serialize_repr,
    Deserialize_repr,
    FromPrimitive,
    ToPrimitive,
    Debug,
    Copy,
    Clone,
    PartialEq,
    Eq,
    Default,
)]
#[repr(i8)]
pub enum StatusCode {
    #[default]
    NoWarning = 0,
    DecelerateForCollision = 1,
    HaltForCollision = 2,
    DecelerateForSingularity = 3,
    HaltForSingularity = 4,
    JointBound = 5,
}

impl StatusCode {
    /// Human readable description, used for throttled log output.
    pub fn message(&self) -> &'static str {
        match self {
            StatusCode::NoWarning => "No warnings",
            StatusCode::DecelerateForCollision => "Decelerating for collision",
            StatusCode::HaltForCollision => "Halting for collision! Emergency stop.",
            StatusCode::DecelerateForSingularity => "Close to a singularity, decelerating",
            StatusCode::HaltForSingularity => "Very close to a singularity, halting",
            StatusCode::JointBound => "Close to a joint bound, halting",
        }
    }

    /// Wire representation of the status code.
    pub fn as_i8(&self) -> i8 {
        self.to_i8().unwrap_or(0)
    }
}
