//! Input stream abstraction shared by the PipeWire backend and tests
//!
//! An acquirer opens one stream per device. Consumers (the capture pipeline,
//! the visualization taps) register sample sinks on the stream; the backend
//! calls every sink with each block of mono f32 samples in capture order.

use super::device::AudioDevice;
use crate::error::CaptureError;
use crate::models::StreamFormat;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Callback receiving blocks of mono samples from a stream thread
pub type SampleSink = Arc<dyn Fn(&[f32]) + Send + Sync>;

/// Processing requested for an input stream
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StreamConstraints {
    pub echo_cancellation: bool,
    pub noise_suppression: bool,
    pub auto_gain_control: bool,
}

impl StreamConstraints {
    /// Unprocessed device signal, so two devices can be compared fairly
    pub fn raw() -> Self {
        Self {
            echo_cancellation: false,
            noise_suppression: false,
            auto_gain_control: false,
        }
    }

    pub fn wants_processing(&self) -> bool {
        self.echo_cancellation || self.noise_suppression || self.auto_gain_control
    }
}

impl Default for StreamConstraints {
    fn default() -> Self {
        Self::raw()
    }
}

/// A live capture stream bound to one device
pub trait InputStream: Send {
    fn device_id(&self) -> &str;

    fn format(&self) -> StreamFormat;

    /// Register a consumer for every future block of samples
    fn add_sink(&self, sink: SampleSink);

    /// Stop the stream and release the device. Idempotent.
    fn stop(&mut self);

    fn is_live(&self) -> bool;
}

/// Opens input streams for device identifiers
pub trait StreamAcquirer: Send + Sync {
    /// Usable input devices, filtered and deduplicated
    fn list_input_devices(&self) -> Result<Vec<AudioDevice>, CaptureError>;

    fn acquire(
        &self,
        device_id: &str,
        constraints: &StreamConstraints,
    ) -> Result<Box<dyn InputStream>, CaptureError>;
}

/// Thread-safe list of sinks a stream fans samples out to
#[derive(Clone, Default)]
pub struct SinkSet {
    sinks: Arc<Mutex<Vec<SampleSink>>>,
}

impl SinkSet {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<SampleSink>> {
        self.sinks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn add(&self, sink: SampleSink) {
        self.lock().push(sink);
    }

    pub fn dispatch(&self, samples: &[f32]) {
        if samples.is_empty() {
            return;
        }
        for sink in self.lock().iter() {
            sink(samples);
        }
    }

    /// Drop every registered sink
    pub fn clear(&self) {
        self.lock().clear();
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.lock().len()
    }
}
