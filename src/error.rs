//! Error types for capture, encoding and export

use crate::models::Channel;
use std::fmt;
use thiserror::Error;

/// What is wrong with a pair of device selections
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectionProblem {
    /// One or both channels have no device
    Missing,
    /// Both channels point at the same device
    Duplicate,
}

impl fmt::Display for SelectionProblem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SelectionProblem::Missing => write!(f, "both channels need a device"),
            SelectionProblem::Duplicate => write!(f, "channels must use different devices"),
        }
    }
}

#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("audio capture is not available: {0}")]
    UnsupportedPlatform(String),

    #[error("no audio input devices found")]
    NoDevicesFound,

    #[error("invalid device selection: {0}")]
    InvalidSelection(SelectionProblem),

    #[error("failed to acquire input stream for '{device}': {reason}")]
    AcquisitionFailure { device: String, reason: String },

    #[error("no supported encoding format")]
    EncodingUnsupported,

    #[error("encoding failed: {0}")]
    Encoding(String),

    #[error("a recording is already in progress")]
    AlreadyRecording,

    #[error("recording start was cancelled")]
    StartCancelled,

    #[error("no finished recording for {0}")]
    NoRecording(Channel),

    #[error("playback failed: {0}")]
    Playback(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl CaptureError {
    pub fn acquisition(device: &str, reason: impl Into<String>) -> Self {
        Self::AcquisitionFailure {
            device: device.to_string(),
            reason: reason.into(),
        }
    }

    /// Human-readable status line shown to the user
    pub fn user_message(&self) -> String {
        match self {
            CaptureError::UnsupportedPlatform(_) => {
                "Audio capture is not supported on this system.".to_string()
            }
            CaptureError::NoDevicesFound => {
                "No microphones found. Please connect a microphone.".to_string()
            }
            CaptureError::InvalidSelection(SelectionProblem::Missing) => {
                "Please select both microphones".to_string()
            }
            CaptureError::InvalidSelection(SelectionProblem::Duplicate) => {
                "Please select different microphones".to_string()
            }
            CaptureError::AlreadyRecording => "Already recording.".to_string(),
            CaptureError::StartCancelled => "Recording cancelled.".to_string(),
            CaptureError::NoRecording(_) => "No recording available to download".to_string(),
            CaptureError::AcquisitionFailure { .. }
            | CaptureError::EncodingUnsupported
            | CaptureError::Encoding(_) => {
                "Error starting recording. Check microphone selection.".to_string()
            }
            CaptureError::Playback(_) => "Could not play the recording.".to_string(),
            CaptureError::Io(e) => format!("File error: {}", e),
        }
    }
}

impl From<hound::Error> for CaptureError {
    fn from(e: hound::Error) -> Self {
        CaptureError::Encoding(e.to_string())
    }
}
