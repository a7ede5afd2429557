//! Error taxonomy shared by the decision engine and its collaborator ports.
//!
//! Every per-cycle variant is recoverable: the engine absorbs it at the cycle
//! boundary and turns it into an alert, a fallback, or a cooldown.  Only
//! `UnknownCrop` is fatal, and only at startup.

use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum EngineError {
    /// Sensor or forecast source unreachable, stale, or malformed.
    #[error("data unavailable: {0}")]
    DataUnavailable(String),

    /// The learned predictor errored or produced a non-finite value.
    #[error("prediction failed: {0}")]
    PredictionFailure(String),

    /// The gateway rejected or never received an irrigation command.
    #[error("command failed: {0}")]
    CommandFailure(String),

    /// The cycle log could not persist a decision record.
    #[error("cycle log write failed: {0}")]
    LogFailure(String),

    /// Crop identifier is not registered.
    #[error("unknown crop '{0}'")]
    UnknownCrop(String),

    /// A tick failed in a way none of the above describe (e.g. a panic).
    #[error("internal error: {0}")]
    Internal(String),
}

impl EngineError {
    /// Short label used in structured log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::DataUnavailable(_) => "data_unavailable",
            Self::PredictionFailure(_) => "prediction_failure",
            Self::CommandFailure(_) => "command_failure",
            Self::LogFailure(_) => "log_failure",
            Self::UnknownCrop(_) => "unknown_crop",
            Self::Internal(_) => "internal",
        }
    }
}
