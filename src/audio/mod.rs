//! Audio capture, encoding and playback using PipeWire
//!
//! This module provides:
//! - Device discovery and per-device capture streams
//! - Chunked encoding into WAV via hound
//! - The capture pipeline joining a stream to an encoder
//! - Playback of finished recordings

mod capture;
mod device;
mod pipeline;
mod playback;
mod recorder;
pub mod stream;

pub use capture::{CaptureConfig, PipeWireAcquirer};
pub use device::{fallback_label, probe_platform, AudioDevice};
pub use pipeline::{CapturePipeline, FinalizeHandler};
pub use playback::{AudioPlayer, SharedPlaybackState};
pub use recorder::{decode_wav, negotiate_format, ChunkEncoder, EncoderFactory, WavEncoderFactory};
pub use stream::{InputStream, StreamAcquirer, StreamConstraints};
