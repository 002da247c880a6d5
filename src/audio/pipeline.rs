//! Capture pipeline: one input stream feeding one chunk encoder
//!
//! While active, every block of samples goes through the encoder and each
//! non-empty chunk it yields is appended in capture order. Stopping flushes
//! the encoder and assembles the chunks into an [`Artifact`] on a blocking
//! task, reporting the result through the finalize handler exactly once.

use super::recorder::ChunkEncoder;
use super::stream::InputStream;
use crate::error::CaptureError;
use crate::models::{Artifact, Channel, EncodingFormat};
use log::{debug, info};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::runtime::Handle;

/// Receives the assembled artifact (or the assembly error) for a channel
pub type FinalizeHandler = Arc<dyn Fn(Channel, Result<Artifact, CaptureError>) + Send + Sync>;

struct PipelineInner {
    active: bool,
    encoder: Box<dyn ChunkEncoder>,
    chunks: Vec<Vec<u8>>,
}

impl PipelineInner {
    fn push_chunk(&mut self, chunk: Vec<u8>) {
        if chunk.is_empty() {
            return;
        }
        debug!("Chunk {} ({} bytes)", self.chunks.len(), chunk.len());
        self.chunks.push(chunk);
    }
}

pub struct CapturePipeline {
    channel: Channel,
    format: EncodingFormat,
    sample_rate: u32,
    stream: Box<dyn InputStream>,
    inner: Arc<Mutex<PipelineInner>>,
    runtime: Handle,
    on_finalized: FinalizeHandler,
}

impl CapturePipeline {
    /// Wire an encoder to a stream. Nothing is recorded until [`start`].
    ///
    /// [`start`]: CapturePipeline::start
    pub fn new(
        channel: Channel,
        stream: Box<dyn InputStream>,
        encoder: Box<dyn ChunkEncoder>,
        runtime: Handle,
        on_finalized: FinalizeHandler,
    ) -> Self {
        let format = encoder.format();
        let sample_rate = stream.format().sample_rate;
        let inner = Arc::new(Mutex::new(PipelineInner {
            active: false,
            encoder,
            chunks: Vec::new(),
        }));

        let weak = Arc::downgrade(&inner);
        stream.add_sink(Arc::new(move |samples| {
            let Some(inner) = weak.upgrade() else { return };
            let mut inner = inner.lock().unwrap_or_else(PoisonError::into_inner);
            if !inner.active {
                return;
            }
            let chunk = inner.encoder.encode(samples);
            inner.push_chunk(chunk);
        }));

        Self {
            channel,
            format,
            sample_rate,
            stream,
            inner,
            runtime,
            on_finalized,
        }
    }

    fn lock(&self) -> MutexGuard<'_, PipelineInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn device_id(&self) -> &str {
        self.stream.device_id()
    }

    /// Begin a fresh chunk sequence
    pub fn start(&self) {
        let mut inner = self.lock();
        inner.chunks.clear();
        inner.encoder.flush();
        inner.active = true;
    }

    pub fn is_active(&self) -> bool {
        self.lock().active
    }

    #[cfg(test)]
    pub fn chunk_count(&self) -> usize {
        self.lock().chunks.len()
    }

    /// Drop chunks left over from an earlier take
    pub fn clear_chunks(&self) {
        self.lock().chunks.clear();
    }

    /// End production and hand the chunks off for assembly.
    ///
    /// Returns false when the pipeline was not active, in which case no
    /// artifact will be produced.
    pub fn stop(&self) -> bool {
        let (chunks, container) = {
            let mut inner = self.lock();
            if !inner.active {
                return false;
            }
            inner.active = false;
            let tail = inner.encoder.flush();
            inner.push_chunk(tail);
            (std::mem::take(&mut inner.chunks), inner.encoder.container())
        };

        info!(
            "{} stopped with {} chunk(s), finalizing",
            self.channel,
            chunks.len()
        );

        let channel = self.channel;
        let format = self.format;
        let sample_rate = self.sample_rate;
        let on_finalized = self.on_finalized.clone();
        self.runtime.spawn_blocking(move || {
            let result = container
                .assemble(&chunks)
                .map(|(bytes, frames)| Artifact::new(channel, format, sample_rate, frames, bytes));
            on_finalized(channel, result);
        });

        true
    }

    /// Stop the underlying stream and release the device
    pub fn release_stream(&mut self) {
        self.stream.stop();
    }

    #[cfg(test)]
    pub fn stream_is_live(&self) -> bool {
        self.stream.is_live()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::recorder::{decode_wav, WavEncoder};
    use crate::audio::stream::testing::{FakeStream, TEST_FORMAT};
    use std::sync::mpsc;
    use std::time::Duration;

    fn pipeline_with_mic(
        runtime: &tokio::runtime::Runtime,
    ) -> (
        CapturePipeline,
        crate::audio::stream::testing::FakeMic,
        mpsc::Receiver<(Channel, Result<Artifact, CaptureError>)>,
    ) {
        let (stream, mic) = FakeStream::open("mic-A");
        let encoder = WavEncoder::new(TEST_FORMAT, Duration::from_millis(10));
        let (tx, rx) = mpsc::channel();
        let tx = Mutex::new(tx);
        let handler: FinalizeHandler = Arc::new(move |channel, result| {
            let _ = tx.lock().unwrap().send((channel, result));
        });
        let pipeline = CapturePipeline::new(
            Channel::A,
            Box::new(stream),
            Box::new(encoder),
            runtime.handle().clone(),
            handler,
        );
        (pipeline, mic, rx)
    }

    #[test]
    fn test_samples_ignored_until_started() {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        let (pipeline, mic, _rx) = pipeline_with_mic(&runtime);

        mic.emit(&[0.1; 200]);
        assert_eq!(pipeline.chunk_count(), 0);
        assert!(!pipeline.is_active());

        pipeline.start();
        // 80 frames per chunk at 8kHz / 10ms
        mic.emit(&[0.1; 200]);
        assert_eq!(pipeline.chunk_count(), 1);
        assert!(pipeline.is_active());
    }

    #[test]
    fn test_empty_encoder_output_is_not_appended() {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        let (pipeline, mic, rx) = pipeline_with_mic(&runtime);

        pipeline.start();
        mic.emit(&[0.1; 80]);
        assert_eq!(pipeline.chunk_count(), 1);

        // Below one timeslice the encoder yields nothing
        mic.emit(&[0.1; 10]);
        assert_eq!(pipeline.chunk_count(), 1);
        mic.emit(&[]);
        assert_eq!(pipeline.chunk_count(), 1);

        assert!(pipeline.stop());
        let artifact = rx.recv_timeout(Duration::from_secs(5)).unwrap().1.unwrap();
        assert_eq!(artifact.frames, 90);
    }

    #[test]
    fn test_stop_finalizes_exactly_once() {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        let (pipeline, mic, rx) = pipeline_with_mic(&runtime);

        pipeline.start();
        mic.emit(&[0.25; 100]);
        mic.emit(&[0.25; 30]);
        assert!(pipeline.stop());
        assert!(!pipeline.stop());

        let (channel, result) = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(channel, Channel::A);
        let artifact = result.unwrap();
        assert_eq!(artifact.format, EncodingFormat::Wav);
        assert_eq!(artifact.frames, 130);

        let (samples, rate) = decode_wav(artifact.bytes()).unwrap();
        assert_eq!(rate, TEST_FORMAT.sample_rate);
        assert_eq!(samples.len(), 130);

        assert!(rx.recv_timeout(Duration::from_millis(200)).is_err());
    }

    #[test]
    fn test_restart_begins_fresh_sequence() {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        let (pipeline, mic, rx) = pipeline_with_mic(&runtime);

        pipeline.start();
        mic.emit(&[0.1; 400]);
        pipeline.stop();
        let first = rx.recv_timeout(Duration::from_secs(5)).unwrap().1.unwrap();

        pipeline.start();
        mic.emit(&[0.1; 40]);
        pipeline.stop();
        let second = rx.recv_timeout(Duration::from_secs(5)).unwrap().1.unwrap();

        assert_eq!(first.frames, 400);
        assert_eq!(second.frames, 40);
        assert_ne!(first.id, second.id);
    }

    #[test]
    fn test_release_stream_stops_device() {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        let (mut pipeline, mic, _rx) = pipeline_with_mic(&runtime);

        pipeline.start();
        pipeline.release_stream();
        assert!(!mic.is_live());
        assert!(!pipeline.stream_is_live());
    }
}
