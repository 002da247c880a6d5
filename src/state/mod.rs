//! Recorder state machine and session-scoped artifact storage

mod artifacts;

pub use artifacts::{ArtifactHandle, ArtifactStore, PlayableRef};

/// Whether a recording is in progress
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RecorderState {
    #[default]
    Idle,
    Recording,
}

impl RecorderState {
    pub fn is_recording(self) -> bool {
        self == RecorderState::Recording
    }
}
