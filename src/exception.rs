//! Contains exception and Result definitions
use thiserror::Error;

/// Represents all kind of errors which can be raised by the servoing engine and the
/// trajectory smoother.
#[derive(Error, Debug)]
pub enum ServoException {
    /// ConfigException is thrown when a parameter set fails validation, for example a
    /// non-positive publish period or singularity thresholds in the wrong order.
    #[error("{message:?}")]
    ConfigException { message: String },

    /// ModelException is thrown when the robot model does not match the configuration,
    /// for example an unknown move group name.
    #[error("{message:?}")]
    ModelException { message: String },

    /// PluginException is thrown when the smoothing filter cannot be resolved or
    /// initialized.
    #[error("Smoothing filter {name:?} could not be loaded: {message}")]
    PluginException { name: String, message: String },

    /// RealTimeException is thrown if the real-time priority cannot be set
    #[error("{message:?}")]
    RealTimeException { message: String },

    /// SmoothingException is thrown when the jerk-limited smoother cannot rewrite a
    /// waypoint sequence, for example because backward motion cannot be prevented or
    /// the input is degenerate. Partial output is discarded.
    #[error("{message:?}")]
    SmoothingException { message: String },
}

/// creates a ConfigException from a string slice
pub(crate) fn create_config_exception<T: Into<String>>(message: T) -> ServoException {
    ServoException::ConfigException {
        message: message.into(),
    }
}

/// creates a SmoothingException from a string slice
pub(crate) fn create_smoothing_exception<T: Into<String>>(message: T) -> ServoException {
    ServoException::SmoothingException {
        message: message.into(),
    }
}

/// Result type which can have ServoException as Error
pub type ServoResult<T> = Result<T, ServoException>;
