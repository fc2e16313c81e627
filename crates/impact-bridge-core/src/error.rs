//! Error types shared across the crate

use thiserror::Error;

/// Errors from decoding a device frame
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("Frame too short: {len} bytes, need {required}")]
    TooShort { len: usize, required: usize },
}

/// Errors from the per-channel baseline calibration
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CalibrationError {
    #[error("Baseline calibration timed out on channel {channel}: {collected}/{target} samples after {elapsed_ms} ms")]
    Timeout {
        channel: String,
        collected: usize,
        target: usize,
        elapsed_ms: i64,
    },

    #[error("Channel {0} has not been calibrated")]
    NotCalibrated(String),

    #[error("Channel {0} failed calibration earlier this session")]
    Failed(String),

    #[error("Channel {0} is already collecting calibration samples")]
    AlreadyCalibrating(String),

    #[error("No delay samples available for statistics")]
    EmptySample,
}

/// Errors from configuration validation
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("{section}: {message}")]
    Invalid {
        section: &'static str,
        message: String,
    },
}

impl ConfigError {
    pub(crate) fn invalid(section: &'static str, message: impl Into<String>) -> Self {
        Self::Invalid {
            section,
            message: message.into(),
        }
    }
}
