use chrono::{DateTime, Utc};
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

/// One of the two capture slots being compared
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    A,
    B,
}

impl Channel {
    pub const ALL: [Channel; 2] = [Channel::A, Channel::B];

    pub fn index(self) -> usize {
        match self {
            Channel::A => 0,
            Channel::B => 1,
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Channel::A => write!(f, "Microphone 1"),
            Channel::B => write!(f, "Microphone 2"),
        }
    }
}

/// Severity of a status message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Info,
    Success,
    Error,
}

/// Notifications sent from the coordinator to the UI
#[derive(Debug, Clone, PartialEq)]
pub enum CaptureEvent {
    Status { message: String, severity: Severity },
    RecordingStarted,
    /// Display labels of both devices, channel A first
    RecordingStopped { labels: [String; 2] },
    /// The artifact for this channel finished assembling
    ArtifactReady { channel: Channel },
}

impl CaptureEvent {
    pub fn status(message: impl Into<String>, severity: Severity) -> Self {
        CaptureEvent::Status {
            message: message.into(),
            severity,
        }
    }
}

/// Container formats in order of preference
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncodingFormat {
    Webm,
    Mp4,
    Ogg,
    Wav,
}

impl EncodingFormat {
    pub const PREFERENCE: [EncodingFormat; 4] = [
        EncodingFormat::Webm,
        EncodingFormat::Mp4,
        EncodingFormat::Ogg,
        EncodingFormat::Wav,
    ];

    pub fn mime_type(self) -> &'static str {
        match self {
            EncodingFormat::Webm => "audio/webm",
            EncodingFormat::Mp4 => "audio/mp4",
            EncodingFormat::Ogg => "audio/ogg",
            EncodingFormat::Wav => "audio/wav",
        }
    }

    pub fn from_mime_type(mime: &str) -> Option<Self> {
        Self::PREFERENCE
            .into_iter()
            .find(|format| format.mime_type() == mime)
    }
}

/// Sample layout delivered by an input stream after format negotiation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamFormat {
    pub sample_rate: u32,
    pub channels: u16,
}

/// A finished, immutable recording of one channel
#[derive(Debug, Clone)]
pub struct Artifact {
    pub id: Uuid,
    pub channel: Channel,
    pub format: EncodingFormat,
    pub sample_rate: u32,
    /// Number of audio frames contained in the payload
    pub frames: u64,
    pub created_at: DateTime<Utc>,
    bytes: Arc<[u8]>,
}

impl Artifact {
    pub fn new(
        channel: Channel,
        format: EncodingFormat,
        sample_rate: u32,
        frames: u64,
        bytes: Vec<u8>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            channel,
            format,
            sample_rate,
            frames,
            created_at: Utc::now(),
            bytes: bytes.into(),
        }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn mime_type(&self) -> &'static str {
        self.format.mime_type()
    }

    /// True when the artifact holds no audio frames
    pub fn is_empty(&self) -> bool {
        self.frames == 0
    }

    pub fn duration_seconds(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.frames as f64 / self.sample_rate as f64
    }
}
