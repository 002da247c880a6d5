//! Chunked encoding and WAV container assembly using hound
//!
//! Encoders turn blocks of samples into opaque chunks as audio arrives. A
//! container writer later joins all chunks of one take into a finished file.

use crate::error::CaptureError;
use crate::models::{EncodingFormat, StreamFormat};
use hound::{SampleFormat, WavReader, WavSpec, WavWriter};
use log::debug;
use std::io::Cursor;
use std::time::Duration;

const BYTES_PER_SAMPLE: usize = 2;

/// Incremental encoder for one capture pipeline
pub trait ChunkEncoder: Send {
    fn format(&self) -> EncodingFormat;

    /// Accept samples. Returns a finished chunk once a timeslice is full,
    /// otherwise an empty vector.
    fn encode(&mut self, samples: &[f32]) -> Vec<u8>;

    /// Return whatever is buffered, possibly nothing
    fn flush(&mut self) -> Vec<u8>;

    /// Writer that turns this encoder's chunks into a complete file
    fn container(&self) -> Box<dyn ContainerWriter>;
}

/// Joins an ordered chunk sequence into one encoded file
pub trait ContainerWriter: Send {
    /// Returns the file bytes and the number of audio frames they hold
    fn assemble(&self, chunks: &[Vec<u8>]) -> Result<(Vec<u8>, u64), CaptureError>;
}

/// Creates encoders for the formats a platform supports
pub trait EncoderFactory: Send + Sync {
    fn is_type_supported(&self, format: EncodingFormat) -> bool;

    fn create(
        &self,
        format: EncodingFormat,
        stream: StreamFormat,
    ) -> Result<Box<dyn ChunkEncoder>, CaptureError>;
}

/// Pick the first preferred format the factory supports
pub fn negotiate_format(factory: &dyn EncoderFactory) -> Option<EncodingFormat> {
    EncodingFormat::PREFERENCE
        .into_iter()
        .find(|format| factory.is_type_supported(*format))
}

/// Encoder factory producing 16-bit PCM WAV
pub struct WavEncoderFactory {
    timeslice: Duration,
}

impl WavEncoderFactory {
    pub fn new(timeslice: Duration) -> Self {
        Self { timeslice }
    }
}

impl EncoderFactory for WavEncoderFactory {
    fn is_type_supported(&self, format: EncodingFormat) -> bool {
        format == EncodingFormat::Wav
    }

    fn create(
        &self,
        format: EncodingFormat,
        stream: StreamFormat,
    ) -> Result<Box<dyn ChunkEncoder>, CaptureError> {
        if !self.is_type_supported(format) {
            return Err(CaptureError::EncodingUnsupported);
        }
        if stream.sample_rate == 0 || stream.channels == 0 {
            return Err(CaptureError::Encoding(format!(
                "unusable stream format {:?}",
                stream
            )));
        }
        Ok(Box::new(WavEncoder::new(stream, self.timeslice)))
    }
}

/// Converts f32 samples to little-endian i16 PCM, one chunk per timeslice
pub struct WavEncoder {
    spec: WavSpec,
    frames_per_chunk: usize,
    pending: Vec<u8>,
}

impl WavEncoder {
    pub fn new(stream: StreamFormat, timeslice: Duration) -> Self {
        let spec = WavSpec {
            channels: stream.channels,
            sample_rate: stream.sample_rate,
            bits_per_sample: 16,
            sample_format: SampleFormat::Int,
        };
        let frames_per_chunk =
            ((stream.sample_rate as u128 * timeslice.as_micros() / 1_000_000) as usize).max(1);

        Self {
            spec,
            frames_per_chunk,
            pending: Vec::with_capacity(frames_per_chunk * BYTES_PER_SAMPLE),
        }
    }

    fn chunk_bytes(&self) -> usize {
        self.frames_per_chunk * BYTES_PER_SAMPLE * self.spec.channels as usize
    }
}

impl ChunkEncoder for WavEncoder {
    fn format(&self) -> EncodingFormat {
        EncodingFormat::Wav
    }

    fn encode(&mut self, samples: &[f32]) -> Vec<u8> {
        for &sample in samples {
            let value = (sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16;
            self.pending.extend_from_slice(&value.to_le_bytes());
        }

        if self.pending.len() >= self.chunk_bytes() {
            self.flush()
        } else {
            Vec::new()
        }
    }

    fn flush(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.pending)
    }

    fn container(&self) -> Box<dyn ContainerWriter> {
        Box::new(WavContainer { spec: self.spec })
    }
}

/// Writes a RIFF header in front of concatenated PCM chunks
pub struct WavContainer {
    spec: WavSpec,
}

impl ContainerWriter for WavContainer {
    fn assemble(&self, chunks: &[Vec<u8>]) -> Result<(Vec<u8>, u64), CaptureError> {
        let payload: usize = chunks.iter().map(Vec::len).sum();
        let mut cursor = Cursor::new(Vec::with_capacity(payload + 44));

        let mut samples = 0u64;
        {
            let mut writer = WavWriter::new(&mut cursor, self.spec)?;
            for chunk in chunks {
                for pair in chunk.chunks_exact(BYTES_PER_SAMPLE) {
                    writer.write_sample(i16::from_le_bytes([pair[0], pair[1]]))?;
                    samples += 1;
                }
            }
            writer.finalize()?;
        }

        let frames = samples / self.spec.channels.max(1) as u64;
        debug!(
            "Assembled WAV container: {} chunk(s), {} frame(s)",
            chunks.len(),
            frames
        );
        Ok((cursor.into_inner(), frames))
    }
}

/// Decode WAV bytes to mono f32 samples
///
/// Returns the samples and sample rate
pub fn decode_wav(bytes: &[u8]) -> Result<(Vec<f32>, u32), CaptureError> {
    let reader = WavReader::new(Cursor::new(bytes))?;

    let spec = reader.spec();
    let sample_rate = spec.sample_rate;
    let channels = spec.channels.max(1) as usize;

    let samples: Result<Vec<f32>, _> = match spec.sample_format {
        SampleFormat::Float => reader.into_samples::<f32>().collect(),
        SampleFormat::Int => {
            let bits = spec.bits_per_sample;
            let max_value = (1i64 << (bits - 1)) as f32;
            reader
                .into_samples::<i32>()
                .map(|s| s.map(|v| v as f32 / max_value))
                .collect()
        }
    };

    let samples: Vec<f32> = samples?.into_iter().step_by(channels).collect();

    Ok((samples, sample_rate))
}

#[cfg(test)]
mod tests {
    use super::*;

    const STREAM: StreamFormat = StreamFormat {
        sample_rate: 1000,
        channels: 1,
    };

    struct NoFormats;

    impl EncoderFactory for NoFormats {
        fn is_type_supported(&self, _format: EncodingFormat) -> bool {
            false
        }

        fn create(
            &self,
            _format: EncodingFormat,
            _stream: StreamFormat,
        ) -> Result<Box<dyn ChunkEncoder>, CaptureError> {
            Err(CaptureError::EncodingUnsupported)
        }
    }

    #[test]
    fn test_negotiation_picks_wav() {
        let factory = WavEncoderFactory::new(Duration::from_secs(1));
        assert_eq!(negotiate_format(&factory), Some(EncodingFormat::Wav));
        assert_eq!(negotiate_format(&NoFormats), None);
    }

    #[test]
    fn test_factory_rejects_unsupported_format() {
        let factory = WavEncoderFactory::new(Duration::from_secs(1));
        assert!(matches!(
            factory.create(EncodingFormat::Webm, STREAM),
            Err(CaptureError::EncodingUnsupported)
        ));
    }

    #[test]
    fn test_chunks_emitted_per_timeslice() {
        let mut encoder = WavEncoder::new(STREAM, Duration::from_millis(100));

        // 100 frames per chunk at 1kHz
        assert!(encoder.encode(&[0.0; 60]).is_empty());
        let chunk = encoder.encode(&[0.0; 60]);
        assert_eq!(chunk.len(), 120 * BYTES_PER_SAMPLE);
        assert!(encoder.flush().is_empty());

        encoder.encode(&[0.5; 10]);
        assert_eq!(encoder.flush().len(), 10 * BYTES_PER_SAMPLE);
    }

    #[test]
    fn test_container_holds_all_chunks_in_order() {
        let mut encoder = WavEncoder::new(STREAM, Duration::from_millis(2));
        let first = encoder.encode(&[0.5, 0.5]);
        let second = encoder.encode(&[-0.5, -0.5]);
        assert_eq!(first.len(), 4);

        let (bytes, frames) = encoder.container().assemble(&[first, second]).unwrap();
        assert_eq!(frames, 4);

        let (samples, rate) = decode_wav(&bytes).unwrap();
        assert_eq!(rate, 1000);
        assert_eq!(samples.len(), 4);
        assert!(samples[0] > 0.49 && samples[0] < 0.51);
        assert!(samples[3] < -0.49 && samples[3] > -0.51);
    }

    #[test]
    fn test_empty_take_is_valid_wav() {
        let encoder = WavEncoder::new(STREAM, Duration::from_secs(1));
        let (bytes, frames) = encoder.container().assemble(&[]).unwrap();
        assert_eq!(frames, 0);
        let (samples, _) = decode_wav(&bytes).unwrap();
        assert!(samples.is_empty());
    }
}
