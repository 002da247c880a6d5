//! Dual-channel capture coordinator
//!
//! Owns the Idle/Recording state machine. Starting happens in three steps:
//! [`CaptureCoordinator::request_start`] validates the selection on the UI
//! thread, [`StartRequest::acquire`] opens both device streams on a blocking
//! thread, and [`CaptureCoordinator::finish_start`] wires the visualization
//! taps and both capture pipelines and starts them back to back. Any failure
//! along the way releases everything acquired so far and leaves the
//! coordinator Idle. Stopping hands each pipeline's chunks off for
//! asynchronous finalization; finished artifacts land in the
//! [`ArtifactStore`] and are announced as events.

use crate::audio::{
    fallback_label, negotiate_format, AudioDevice, CapturePipeline, EncoderFactory,
    FinalizeHandler, InputStream, StreamAcquirer, StreamConstraints,
};
use crate::error::{CaptureError, SelectionProblem};
use crate::export;
use crate::models::{Artifact, CaptureEvent, Channel, EncodingFormat, Severity};
use crate::state::{ArtifactHandle, ArtifactStore, PlayableRef, RecorderState};
use crate::waveform::{FrameTicket, RenderLoop, VisualizationContext, WaveformFrame};
use log::{debug, error, info, warn};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::runtime::Handle;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;

const START_FAILED: &str = "Error starting recording. Check microphone selection.";

struct ChannelSession {
    label: String,
    pipeline: CapturePipeline,
}

/// Check a pair of selections before touching any hardware
pub fn validate_selection(device_ids: [&str; 2]) -> Result<(), CaptureError> {
    if device_ids.iter().any(|id| id.trim().is_empty()) {
        return Err(CaptureError::InvalidSelection(SelectionProblem::Missing));
    }
    if device_ids[0] == device_ids[1] {
        return Err(CaptureError::InvalidSelection(SelectionProblem::Duplicate));
    }
    Ok(())
}

fn release_streams(streams: &mut Vec<Box<dyn InputStream>>) {
    for stream in streams.iter_mut() {
        debug!("Releasing stream for {}", stream.device_id());
        stream.stop();
    }
    streams.clear();
}

fn send_event(events: &UnboundedSender<CaptureEvent>, event: CaptureEvent) {
    if let Err(e) = events.send(event) {
        debug!("Event dropped, receiver is gone: {:?}", e.0);
    }
}

/// Stream acquisition for one start attempt.
///
/// Holds no reference to the coordinator, so it can run on a blocking
/// thread while the UI keeps drawing.
pub struct StartRequest {
    attempt: u64,
    device_ids: [String; 2],
    acquirer: Arc<dyn StreamAcquirer>,
}

impl StartRequest {
    pub fn attempt(&self) -> u64 {
        self.attempt
    }

    /// Open channel A, then channel B. If B fails, A is released before
    /// returning.
    pub fn acquire(self) -> AcquiredStreams {
        let constraints = StreamConstraints::raw();
        let mut streams: Vec<Box<dyn InputStream>> = Vec::with_capacity(2);
        for device_id in &self.device_ids {
            match self.acquirer.acquire(device_id, &constraints) {
                Ok(stream) => streams.push(stream),
                Err(e) => {
                    release_streams(&mut streams);
                    return AcquiredStreams {
                        attempt: self.attempt,
                        result: Err(e),
                    };
                }
            }
        }
        AcquiredStreams {
            attempt: self.attempt,
            result: Ok(streams),
        }
    }
}

/// Outcome of [`StartRequest::acquire`], handed back to the coordinator
pub struct AcquiredStreams {
    attempt: u64,
    result: Result<Vec<Box<dyn InputStream>>, CaptureError>,
}

pub struct CaptureCoordinator {
    state: RecorderState,
    acquirer: Arc<dyn StreamAcquirer>,
    encoders: Arc<dyn EncoderFactory>,
    negotiated: Option<EncodingFormat>,
    runtime: Handle,
    fft_size: usize,
    devices: Vec<AudioDevice>,
    session: Vec<ChannelSession>,
    visualization: Option<VisualizationContext>,
    render_loop: RenderLoop,
    artifacts: Arc<Mutex<ArtifactStore>>,
    labels: [String; 2],
    events: UnboundedSender<CaptureEvent>,
    /// Attempt whose streams are being acquired
    pending_start: Option<u64>,
    last_attempt: u64,
}

impl CaptureCoordinator {
    /// Create the coordinator and negotiate the encoding format once.
    ///
    /// Returns the receiving end of the event channel.
    pub fn new(
        acquirer: Arc<dyn StreamAcquirer>,
        encoders: Arc<dyn EncoderFactory>,
        runtime: Handle,
        fft_size: usize,
    ) -> (Self, UnboundedReceiver<CaptureEvent>) {
        let (events, receiver) = mpsc::unbounded_channel();

        let negotiated = negotiate_format(encoders.as_ref());
        match negotiated {
            Some(format) => info!("Negotiated encoding {}", format.mime_type()),
            None => warn!("No supported encoding format, recording is disabled"),
        }

        let coordinator = Self {
            state: RecorderState::Idle,
            acquirer,
            encoders,
            negotiated,
            runtime,
            fft_size,
            devices: Vec::new(),
            session: Vec::new(),
            visualization: None,
            render_loop: RenderLoop::new(),
            artifacts: Arc::new(Mutex::new(ArtifactStore::new())),
            labels: Default::default(),
            events,
            pending_start: None,
            last_attempt: 0,
        };

        (coordinator, receiver)
    }

    fn lock_artifacts(&self) -> MutexGuard<'_, ArtifactStore> {
        self.artifacts.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn emit(&self, event: CaptureEvent) {
        send_event(&self.events, event);
    }

    fn emit_status(&self, message: impl Into<String>, severity: Severity) {
        let message = message.into();
        match severity {
            Severity::Error => error!("{}", message),
            _ => info!("{}", message),
        }
        self.emit(CaptureEvent::status(message, severity));
    }

    pub fn state(&self) -> RecorderState {
        self.state
    }

    /// Whether streams are being acquired for a start
    pub fn is_starting(&self) -> bool {
        self.pending_start.is_some()
    }

    pub fn negotiated_format(&self) -> Option<EncodingFormat> {
        self.negotiated
    }

    pub fn devices(&self) -> &[AudioDevice] {
        &self.devices
    }

    /// Labels of the most recent recording, channel A first
    pub fn labels(&self) -> &[String; 2] {
        &self.labels
    }

    pub fn device_label(&self, device_id: &str) -> String {
        self.devices
            .iter()
            .find(|d| d.id == device_id)
            .map(|d| d.label.clone())
            .unwrap_or_else(|| fallback_label(device_id))
    }

    /// Reload the list of input devices and report how many are usable
    pub fn refresh_devices(&mut self) -> Result<&[AudioDevice], CaptureError> {
        match self.acquirer.list_input_devices() {
            Ok(devices) if devices.is_empty() => {
                self.devices.clear();
                let err = CaptureError::NoDevicesFound;
                self.emit_status(err.user_message(), Severity::Error);
                Err(err)
            }
            Ok(devices) => {
                self.devices = devices;
                self.emit_status(
                    format!(
                        "{} microphone(s) loaded. Ready to record.",
                        self.devices.len()
                    ),
                    Severity::Success,
                );
                Ok(&self.devices)
            }
            Err(e) => {
                error!("Device enumeration failed: {}", e);
                self.emit_status(
                    "Error accessing microphones. Please grant permission.",
                    Severity::Error,
                );
                Err(e)
            }
        }
    }

    /// Validate a start and prepare the stream acquisition.
    ///
    /// Revokes the previous recording's playable references. The returned
    /// request must be acquired and passed to [`finish_start`].
    ///
    /// [`finish_start`]: CaptureCoordinator::finish_start
    pub fn request_start(
        &mut self,
        device_a: &str,
        device_b: &str,
    ) -> Result<StartRequest, CaptureError> {
        if self.state.is_recording() || self.pending_start.is_some() {
            warn!("Start ignored, already recording");
            return Err(CaptureError::AlreadyRecording);
        }

        let device_ids = [device_a, device_b];
        if let Err(e) = validate_selection(device_ids) {
            self.emit_status(e.user_message(), Severity::Error);
            return Err(e);
        }

        self.lock_artifacts().begin_session();
        self.clear_residual_session();

        if self.negotiated.is_none() {
            let err = CaptureError::EncodingUnsupported;
            self.fail_start(&err);
            return Err(err);
        }

        self.last_attempt += 1;
        self.pending_start = Some(self.last_attempt);
        debug!("Start attempt {} for {} and {}", self.last_attempt, device_a, device_b);

        Ok(StartRequest {
            attempt: self.last_attempt,
            device_ids: [device_a.to_string(), device_b.to_string()],
            acquirer: self.acquirer.clone(),
        })
    }

    /// Run the acquisition on the runtime's blocking pool
    pub fn acquire_in_background(&self, request: StartRequest) -> JoinHandle<AcquiredStreams> {
        self.runtime.spawn_blocking(move || request.acquire())
    }

    /// Complete a start with the acquired streams.
    ///
    /// Streams from a cancelled or superseded attempt are released and
    /// `StartCancelled` is returned without any status message.
    pub fn finish_start(&mut self, acquired: AcquiredStreams) -> Result<(), CaptureError> {
        let AcquiredStreams { attempt, result } = acquired;
        if self.pending_start != Some(attempt) {
            info!("Discarding streams of cancelled start attempt {}", attempt);
            if let Ok(mut streams) = result {
                release_streams(&mut streams);
            }
            return Err(CaptureError::StartCancelled);
        }
        self.pending_start = None;

        match result.and_then(|streams| self.build_session(streams)) {
            Ok(()) => {
                self.state = RecorderState::Recording;
                self.emit(CaptureEvent::RecordingStarted);
                self.emit_status("Recording from both microphones...", Severity::Info);
                Ok(())
            }
            Err(e) => {
                self.fail_start(&e);
                Err(e)
            }
        }
    }

    /// Give up on a start whose acquisition never reported back
    pub fn abandon_start(&mut self, attempt: u64) {
        if self.pending_start == Some(attempt) {
            self.pending_start = None;
            self.fail_start(&CaptureError::acquisition("both channels", "acquisition task failed"));
        }
    }

    fn fail_start(&mut self, err: &CaptureError) {
        error!("Failed to start recording: {}", err);
        self.state = RecorderState::Idle;
        self.emit_status(START_FAILED, Severity::Error);
    }

    fn build_session(&mut self, mut streams: Vec<Box<dyn InputStream>>) -> Result<(), CaptureError> {
        let Some(format) = self.negotiated else {
            release_streams(&mut streams);
            return Err(CaptureError::EncodingUnsupported);
        };
        let generation = self.lock_artifacts().generation();

        let mut visualization =
            VisualizationContext::new([streams[0].as_ref(), streams[1].as_ref()], self.fft_size);

        let mut encoders = Vec::with_capacity(2);
        for stream in &streams {
            match self.encoders.create(format, stream.format()) {
                Ok(encoder) => encoders.push(encoder),
                Err(e) => {
                    visualization.close();
                    release_streams(&mut streams);
                    return Err(e);
                }
            }
        }

        let session: Vec<ChannelSession> = Channel::ALL
            .into_iter()
            .zip(streams)
            .zip(encoders)
            .map(|((channel, stream), encoder)| {
                let pipeline = CapturePipeline::new(
                    channel,
                    stream,
                    encoder,
                    self.runtime.clone(),
                    self.finalize_handler(generation),
                );
                ChannelSession {
                    label: self.device_label(pipeline.device_id()),
                    pipeline,
                }
            })
            .collect();

        for channel in &session {
            channel.pipeline.start();
        }

        self.labels = [session[0].label.clone(), session[1].label.clone()];
        self.session = session;
        self.visualization = Some(visualization);
        self.render_loop.arm();

        info!(
            "Recording {} and {} as {}",
            self.session[0].pipeline.device_id(),
            self.session[1].pipeline.device_id(),
            format.mime_type()
        );
        Ok(())
    }

    /// Drop pipelines and chunks a previous session left behind
    fn clear_residual_session(&mut self) {
        for mut channel in self.session.drain(..) {
            channel.pipeline.clear_chunks();
            channel.pipeline.release_stream();
        }
    }

    fn finalize_handler(&self, generation: u64) -> FinalizeHandler {
        let artifacts = self.artifacts.clone();
        let events = self.events.clone();
        Arc::new(move |channel, result: Result<Artifact, CaptureError>| match result {
            Ok(artifact) => {
                let installed = artifacts
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .install(generation, artifact);
                if installed.is_some() {
                    send_event(&events, CaptureEvent::ArtifactReady { channel });
                }
            }
            Err(e) => {
                error!("Failed to finalize {}: {}", channel, e);
                send_event(
                    &events,
                    CaptureEvent::status(
                        format!("Could not finish the {} recording", channel),
                        Severity::Error,
                    ),
                );
            }
        })
    }

    /// Stop both pipelines. Cancels a start that is still acquiring
    /// streams, and otherwise does nothing when Idle.
    pub fn stop(&mut self) {
        if let Some(attempt) = self.pending_start.take() {
            info!("Start attempt {} cancelled", attempt);
            return;
        }
        if !self.state.is_recording() {
            debug!("Stop ignored, not recording");
            return;
        }

        for channel in self.session.iter_mut() {
            if channel.pipeline.is_active() {
                channel.pipeline.stop();
            }
            channel.pipeline.release_stream();
        }
        self.session.clear();

        self.render_loop.disarm();
        if let Some(mut visualization) = self.visualization.take() {
            visualization.close();
        }

        self.state = RecorderState::Idle;
        info!("Recording stopped");

        self.emit(CaptureEvent::RecordingStopped {
            labels: self.labels.clone(),
        });
        self.emit_status(
            "Recording complete. Compare the audio below.",
            Severity::Success,
        );
    }

    /// Ticket for the next render frame
    pub fn frame_ticket(&self) -> FrameTicket {
        self.render_loop.ticket()
    }

    /// Snapshot both channels for drawing, if the ticket is still live
    pub fn render_frame(&mut self, ticket: &FrameTicket) -> Option<WaveformFrame> {
        let visualization = self.visualization.as_mut()?;
        self.render_loop.frame(ticket, visualization)
    }

    pub fn artifact(&self, channel: Channel) -> Option<ArtifactHandle> {
        self.lock_artifacts().get(channel)
    }

    pub fn resolve(&self, playable: &PlayableRef) -> Option<Arc<Artifact>> {
        self.lock_artifacts().resolve(playable)
    }

    /// Save the channel's current artifact into `dir`
    pub fn download(&self, channel: Channel, dir: &Path) -> Result<PathBuf, CaptureError> {
        let Some(handle) = self.artifact(channel) else {
            let err = CaptureError::NoRecording(channel);
            self.emit_status(err.user_message(), Severity::Error);
            return Err(err);
        };

        let label = &self.labels[channel.index()];
        match export::save_artifact(&handle.artifact, label, dir) {
            Ok(path) => {
                self.emit_status(format!("Saved {}", path.display()), Severity::Success);
                Ok(path)
            }
            Err(e) => {
                self.emit_status(e.user_message(), Severity::Error);
                Err(e)
            }
        }
    }
}

impl Drop for CaptureCoordinator {
    fn drop(&mut self) {
        self.stop();
        self.lock_artifacts().release_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::stream::testing::FakeAcquirer;
    use crate::audio::{ChunkEncoder, WavEncoderFactory};
    use crate::models::StreamFormat;
    use crate::waveform::testing::RecordingSurface;
    use std::time::Duration;
    use tokio::runtime::Runtime;

    // Field order matters: the coordinator must drop before the runtime
    struct Harness {
        coordinator: CaptureCoordinator,
        events: UnboundedReceiver<CaptureEvent>,
        acquirer: Arc<FakeAcquirer>,
        runtime: Runtime,
    }

    impl Harness {
        fn new(acquirer: FakeAcquirer) -> Self {
            Self::with_encoders(
                acquirer,
                Arc::new(WavEncoderFactory::new(Duration::from_millis(10))),
            )
        }

        fn with_encoders(acquirer: FakeAcquirer, encoders: Arc<dyn EncoderFactory>) -> Self {
            let runtime = Runtime::new().unwrap();
            let acquirer = Arc::new(acquirer);
            let (mut coordinator, events) = CaptureCoordinator::new(
                acquirer.clone(),
                encoders,
                runtime.handle().clone(),
                64,
            );
            let _ = coordinator.refresh_devices();
            let mut harness = Self {
                coordinator,
                events,
                acquirer,
                runtime,
            };
            harness.drain();
            harness
        }

        fn drain(&mut self) -> Vec<CaptureEvent> {
            let mut events = Vec::new();
            while let Ok(event) = self.events.try_recv() {
                events.push(event);
            }
            events
        }

        /// Run all three start steps inline
        fn start(&mut self, a: &str, b: &str) -> Result<(), CaptureError> {
            let request = self.coordinator.request_start(a, b)?;
            self.coordinator.finish_start(request.acquire())
        }

        fn feed(&self, device_id: &str, samples: &[f32]) {
            self.acquirer.mic(device_id).unwrap().emit(samples);
        }

        /// Collect events until `count` artifacts were announced
        fn wait_for_artifacts(&mut self, count: usize) -> Vec<CaptureEvent> {
            let events = &mut self.events;
            self.runtime.block_on(async {
                let mut seen = Vec::new();
                let mut ready = 0;
                let _ = tokio::time::timeout(Duration::from_secs(5), async {
                    while ready < count {
                        match events.recv().await {
                            Some(event) => {
                                if matches!(event, CaptureEvent::ArtifactReady { .. }) {
                                    ready += 1;
                                }
                                seen.push(event);
                            }
                            None => break,
                        }
                    }
                })
                .await;
                seen
            })
        }
    }

    fn ready_channels(events: &[CaptureEvent]) -> Vec<Channel> {
        let mut channels: Vec<Channel> = events
            .iter()
            .filter_map(|e| match e {
                CaptureEvent::ArtifactReady { channel } => Some(*channel),
                _ => None,
            })
            .collect();
        channels.sort_by_key(|c| c.index());
        channels
    }

    fn errors(events: &[CaptureEvent]) -> Vec<String> {
        events
            .iter()
            .filter_map(|e| match e {
                CaptureEvent::Status {
                    message,
                    severity: Severity::Error,
                } => Some(message.clone()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_record_and_stop_yields_two_artifacts() {
        let mut h = Harness::new(FakeAcquirer::with_devices(&["mic-A", "mic-B"]));

        h.start("mic-A", "mic-B").unwrap();
        assert_eq!(h.coordinator.state(), RecorderState::Recording);
        h.feed("mic-A", &[0.2; 300]);
        h.feed("mic-B", &[-0.2; 200]);

        h.coordinator.stop();
        assert_eq!(h.coordinator.state(), RecorderState::Idle);

        let events = h.wait_for_artifacts(2);
        assert!(events.contains(&CaptureEvent::RecordingStarted));
        assert!(events.contains(&CaptureEvent::RecordingStopped {
            labels: ["mic-A-label".to_string(), "mic-B-label".to_string()],
        }));
        assert_eq!(ready_channels(&events), vec![Channel::A, Channel::B]);

        let a = h.coordinator.artifact(Channel::A).unwrap();
        let b = h.coordinator.artifact(Channel::B).unwrap();
        assert_ne!(a.artifact.id, b.artifact.id);
        assert_ne!(a.playable, b.playable);
        assert_eq!(a.artifact.frames, 300);
        assert_eq!(b.artifact.frames, 200);
        assert_eq!(a.artifact.format, EncodingFormat::Wav);
        assert!(!b.artifact.is_empty());

        assert_eq!(h.acquirer.live_count(), 0);
    }

    #[test]
    fn test_same_device_twice_is_rejected() {
        let mut h = Harness::new(FakeAcquirer::with_devices(&["mic-A", "mic-B"]));

        let result = h.start("mic-A", "mic-A");

        assert!(matches!(
            result,
            Err(CaptureError::InvalidSelection(SelectionProblem::Duplicate))
        ));
        assert_eq!(h.coordinator.state(), RecorderState::Idle);
        assert!(h.acquirer.opened().is_empty());
        assert_eq!(errors(&h.drain()), vec!["Please select different microphones"]);
    }

    #[test]
    fn test_missing_device_is_rejected() {
        let mut h = Harness::new(FakeAcquirer::with_devices(&["mic-A", "mic-B"]));

        let result = h.start("", "mic-B");

        assert!(matches!(
            result,
            Err(CaptureError::InvalidSelection(SelectionProblem::Missing))
        ));
        assert!(h.acquirer.opened().is_empty());
        assert_eq!(errors(&h.drain()), vec!["Please select both microphones"]);
    }

    #[test]
    fn test_start_while_recording_does_not_reacquire() {
        let mut h = Harness::new(FakeAcquirer::with_devices(&["mic-A", "mic-B", "mic-C"]));

        h.start("mic-A", "mic-B").unwrap();
        let second = h.start("mic-B", "mic-C");

        assert!(matches!(second, Err(CaptureError::AlreadyRecording)));
        assert_eq!(h.acquirer.opened().len(), 2);
        assert_eq!(h.coordinator.state(), RecorderState::Recording);
        h.coordinator.stop();
    }

    #[test]
    fn test_stop_while_idle_is_noop() {
        let mut h = Harness::new(FakeAcquirer::with_devices(&["mic-A", "mic-B"]));

        h.coordinator.stop();
        h.coordinator.stop();

        assert_eq!(h.coordinator.state(), RecorderState::Idle);
        assert!(h.drain().is_empty());
    }

    #[test]
    fn test_failure_on_second_device_releases_first() {
        let acquirer = FakeAcquirer::with_devices(&["mic-A", "mic-B"]).failing("mic-B");
        let mut h = Harness::new(acquirer);

        let result = h.start("mic-A", "mic-B");

        assert!(matches!(
            result,
            Err(CaptureError::AcquisitionFailure { .. })
        ));
        assert_eq!(h.coordinator.state(), RecorderState::Idle);
        let mic_a = h.acquirer.mic("mic-A").unwrap();
        assert!(!mic_a.is_live());
        assert_eq!(mic_a.sink_count(), 0);

        let events = h.drain();
        assert_eq!(errors(&events), vec![START_FAILED]);
        assert!(!events.contains(&CaptureEvent::RecordingStarted));

        // Nothing is left half-open for the next attempt
        h.coordinator.stop();
        assert!(h.drain().is_empty());
    }

    #[test]
    fn test_second_recording_revokes_previous_references() {
        let mut h = Harness::new(FakeAcquirer::with_devices(&["mic-A", "mic-B"]));

        h.start("mic-A", "mic-B").unwrap();
        h.feed("mic-A", &[0.1; 50]);
        h.feed("mic-B", &[0.1; 50]);
        h.coordinator.stop();
        h.wait_for_artifacts(2);
        let old_a = h.coordinator.artifact(Channel::A).unwrap().playable;
        let old_b = h.coordinator.artifact(Channel::B).unwrap().playable;
        assert!(h.coordinator.resolve(&old_a).is_some());

        h.start("mic-A", "mic-B").unwrap();

        assert!(h.coordinator.resolve(&old_a).is_none());
        assert!(h.coordinator.resolve(&old_b).is_none());
        assert!(h.coordinator.artifact(Channel::A).is_none());

        h.coordinator.stop();
        h.wait_for_artifacts(2);
        let new_a = h.coordinator.artifact(Channel::A).unwrap().playable;
        assert_ne!(new_a, old_a);
        assert!(h.coordinator.resolve(&new_a).is_some());
    }

    #[test]
    fn test_render_frames_stop_after_stop() {
        let mut h = Harness::new(FakeAcquirer::with_devices(&["mic-A", "mic-B"]));

        h.start("mic-A", "mic-B").unwrap();
        h.feed("mic-A", &[0.5; 64]);
        let ticket = h.coordinator.frame_ticket();

        let frame = h.coordinator.render_frame(&ticket).unwrap();
        assert_eq!(frame.channels[0].len(), 32);
        assert!(frame.channels[0].iter().all(|&b| b == 192));
        let mut surface = RecordingSurface::new(200.0, 100.0);
        frame.paint(&mut surface);
        assert_eq!(surface.strokes.len(), 2);

        h.coordinator.stop();

        assert!(!ticket.is_live());
        assert!(h.coordinator.render_frame(&ticket).is_none());
        assert!(h
            .coordinator
            .render_frame(&h.coordinator.frame_ticket())
            .is_none());
    }

    #[test]
    fn test_no_encoding_format_fails_before_acquiring() {
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

        let mut h = Harness::with_encoders(
            FakeAcquirer::with_devices(&["mic-A", "mic-B"]),
            Arc::new(NoFormats),
        );
        assert_eq!(h.coordinator.negotiated_format(), None);

        let result = h.start("mic-A", "mic-B");

        assert!(matches!(result, Err(CaptureError::EncodingUnsupported)));
        assert!(h.acquirer.opened().is_empty());
        assert_eq!(errors(&h.drain()), vec![START_FAILED]);
    }

    #[test]
    fn test_encoder_failure_releases_both_streams() {
        struct BrokenEncoder;
        impl EncoderFactory for BrokenEncoder {
            fn is_type_supported(&self, format: EncodingFormat) -> bool {
                format == EncodingFormat::Wav
            }
            fn create(
                &self,
                _format: EncodingFormat,
                _stream: StreamFormat,
            ) -> Result<Box<dyn ChunkEncoder>, CaptureError> {
                Err(CaptureError::Encoding("rejected".to_string()))
            }
        }

        let mut h = Harness::with_encoders(
            FakeAcquirer::with_devices(&["mic-A", "mic-B"]),
            Arc::new(BrokenEncoder),
        );

        assert!(h.start("mic-A", "mic-B").is_err());

        assert_eq!(h.acquirer.opened().len(), 2);
        assert_eq!(h.acquirer.live_count(), 0);
        assert_eq!(h.coordinator.state(), RecorderState::Idle);
        assert!(h.coordinator.render_frame(&h.coordinator.frame_ticket()).is_none());
        assert_eq!(errors(&h.drain()).len(), 1);
    }

    #[test]
    fn test_empty_device_list_reported() {
        let mut h = Harness::new(FakeAcquirer::with_devices(&[]));

        assert!(matches!(
            h.coordinator.refresh_devices(),
            Err(CaptureError::NoDevicesFound)
        ));
        assert_eq!(
            errors(&h.drain()),
            vec!["No microphones found. Please connect a microphone."]
        );
    }

    #[test]
    fn test_unknown_device_label_falls_back() {
        let h = Harness::new(FakeAcquirer::with_devices(&["mic-A"]));
        assert_eq!(h.coordinator.device_label("mic-A"), "mic-A-label");
        assert_eq!(h.coordinator.device_label("0123456789"), "Microphone 01234567");
    }

    #[test]
    fn test_download_requires_finished_recording() {
        let mut h = Harness::new(FakeAcquirer::with_devices(&["mic-A", "mic-B"]));
        let dir = tempfile::tempdir().unwrap();

        assert!(matches!(
            h.coordinator.download(Channel::B, dir.path()),
            Err(CaptureError::NoRecording(Channel::B))
        ));
        assert_eq!(
            errors(&h.drain()),
            vec!["No recording available to download"]
        );

        h.start("mic-A", "mic-B").unwrap();
        h.feed("mic-B", &[0.3; 20]);
        h.coordinator.stop();
        h.wait_for_artifacts(2);

        let path = h.coordinator.download(Channel::B, dir.path()).unwrap();
        assert_eq!(path.file_name().unwrap(), "mic_B_label_recording.wav");
        assert!(std::fs::metadata(&path).unwrap().len() > 44);
    }

    #[test]
    fn test_background_acquisition_starts_recording() {
        let mut h = Harness::new(FakeAcquirer::with_devices(&["mic-A", "mic-B"]));

        let request = h.coordinator.request_start("mic-A", "mic-B").unwrap();
        assert!(h.coordinator.is_starting());
        assert_eq!(h.coordinator.state(), RecorderState::Idle);

        let handle = h.coordinator.acquire_in_background(request);
        let acquired = h.runtime.block_on(handle).unwrap();
        h.coordinator.finish_start(acquired).unwrap();

        assert!(!h.coordinator.is_starting());
        assert_eq!(h.coordinator.state(), RecorderState::Recording);
        let opened: Vec<String> = h.acquirer.opened().into_iter().map(|s| s.device_id).collect();
        assert_eq!(opened, vec!["mic-A", "mic-B"]);
        assert!(h.drain().contains(&CaptureEvent::RecordingStarted));
        h.coordinator.stop();
    }

    #[test]
    fn test_stop_during_acquisition_releases_streams() {
        let mut h = Harness::new(FakeAcquirer::with_devices(&["mic-A", "mic-B"]));

        let request = h.coordinator.request_start("mic-A", "mic-B").unwrap();
        h.coordinator.stop();
        assert!(!h.coordinator.is_starting());

        let result = h.coordinator.finish_start(request.acquire());

        assert!(matches!(result, Err(CaptureError::StartCancelled)));
        assert_eq!(h.coordinator.state(), RecorderState::Idle);
        assert_eq!(h.acquirer.opened().len(), 2);
        assert_eq!(h.acquirer.live_count(), 0);
        assert!(h.drain().is_empty());
    }

    #[test]
    fn test_second_request_while_acquiring_is_rejected() {
        let mut h = Harness::new(FakeAcquirer::with_devices(&["mic-A", "mic-B", "mic-C"]));

        let request = h.coordinator.request_start("mic-A", "mic-B").unwrap();
        let second = h.coordinator.request_start("mic-B", "mic-C");
        assert!(matches!(second, Err(CaptureError::AlreadyRecording)));

        h.coordinator.finish_start(request.acquire()).unwrap();
        let opened: Vec<String> = h.acquirer.opened().into_iter().map(|s| s.device_id).collect();
        assert_eq!(opened, vec!["mic-A", "mic-B"]);
        h.coordinator.stop();
    }

    #[test]
    fn test_abandoned_start_returns_to_idle() {
        let mut h = Harness::new(FakeAcquirer::with_devices(&["mic-A", "mic-B"]));

        let request = h.coordinator.request_start("mic-A", "mic-B").unwrap();
        h.coordinator.abandon_start(request.attempt());

        assert!(!h.coordinator.is_starting());
        assert_eq!(errors(&h.drain()), vec![START_FAILED]);
        assert!(h.start("mic-A", "mic-B").is_ok());
        h.coordinator.stop();
    }

    #[test]
    fn test_closed_event_receiver_does_not_break_recording() {
        let runtime = Runtime::new().unwrap();
        let acquirer = Arc::new(FakeAcquirer::with_devices(&["mic-A", "mic-B"]));
        let (mut coordinator, events) = CaptureCoordinator::new(
            acquirer.clone(),
            Arc::new(WavEncoderFactory::new(Duration::from_millis(10))),
            runtime.handle().clone(),
            64,
        );
        drop(events);

        let request = coordinator.request_start("mic-A", "mic-B").unwrap();
        coordinator.finish_start(request.acquire()).unwrap();
        assert_eq!(coordinator.state(), RecorderState::Recording);

        acquirer.mic("mic-A").unwrap().emit(&[0.2; 100]);
        coordinator.stop();

        assert_eq!(coordinator.state(), RecorderState::Idle);
        assert_eq!(acquirer.live_count(), 0);
    }
}
