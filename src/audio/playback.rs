//! Playback of finished recordings using PipeWire
//!
//! Each channel has its own player so the two takes can be auditioned one
//! after the other. The player decodes the artifact once on load and streams
//! the samples from a dedicated PipeWire thread.

use super::recorder::decode_wav;
use crate::error::CaptureError;
use crate::models::{Artifact, EncodingFormat};
use log::{debug, error, info};
use pipewire as pw;
use pw::spa;
use pw::spa::param::format::{MediaSubtype, MediaType};
use pw::spa::param::format_utils;
use pw::spa::pod::Pod;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use uuid::Uuid;

/// Playback position shared between the player thread and the UI
#[derive(Clone, Default)]
pub struct SharedPlaybackState {
    inner: Arc<Mutex<PlaybackStateInner>>,
}

#[derive(Default)]
struct PlaybackStateInner {
    /// Artifact the samples were decoded from
    artifact_id: Option<Uuid>,
    samples: Vec<f32>,
    sample_rate: u32,
    /// Index of the next sample to play
    position: usize,
    is_playing: bool,
}

impl SharedPlaybackState {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, PlaybackStateInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn load(&self, artifact_id: Uuid, samples: Vec<f32>, sample_rate: u32) {
        let mut inner = self.lock();
        inner.artifact_id = Some(artifact_id);
        inner.samples = samples;
        inner.sample_rate = sample_rate;
        inner.position = 0;
        inner.is_playing = false;
    }

    fn unload(&self) {
        *self.lock() = PlaybackStateInner::default();
    }

    pub fn loaded_artifact(&self) -> Option<Uuid> {
        self.lock().artifact_id
    }

    pub fn sample_rate(&self) -> u32 {
        self.lock().sample_rate
    }

    pub fn current_time(&self) -> f64 {
        let inner = self.lock();
        if inner.sample_rate == 0 {
            return 0.0;
        }
        inner.position as f64 / inner.sample_rate as f64
    }

    pub fn duration(&self) -> f64 {
        let inner = self.lock();
        if inner.sample_rate == 0 {
            return 0.0;
        }
        inner.samples.len() as f64 / inner.sample_rate as f64
    }

    pub fn is_playing(&self) -> bool {
        self.lock().is_playing
    }

    /// Playback progress from 0.0 to 1.0
    pub fn progress(&self) -> f32 {
        let inner = self.lock();
        if inner.samples.is_empty() {
            0.0
        } else {
            inner.position as f32 / inner.samples.len() as f32
        }
    }

    fn set_playing(&self, playing: bool) {
        self.lock().is_playing = playing;
    }

    pub fn rewind(&self) {
        let mut inner = self.lock();
        inner.position = 0;
        inner.is_playing = false;
    }

    /// Take up to `count` samples and advance. `None` once exhausted.
    fn next_block(&self, count: usize) -> Option<Vec<f32>> {
        let mut inner = self.lock();
        if inner.position >= inner.samples.len() {
            inner.is_playing = false;
            return None;
        }

        let end = (inner.position + count).min(inner.samples.len());
        let block = inner.samples[inner.position..end].to_vec();
        inner.position = end;
        Some(block)
    }
}

enum PlaybackCommand {
    Stop,
}

/// Plays one decoded artifact at a time through PipeWire
#[derive(Default)]
pub struct AudioPlayer {
    state: SharedPlaybackState,
    is_running: Arc<AtomicBool>,
    thread_handle: Option<JoinHandle<()>>,
    sender: Option<pw::channel::Sender<PlaybackCommand>>,
}

impl AudioPlayer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Shared state for UI updates
    pub fn shared_state(&self) -> SharedPlaybackState {
        self.state.clone()
    }

    pub fn is_running(&self) -> bool {
        self.is_running.load(Ordering::SeqCst)
    }

    /// Decode an artifact for playback, stopping whatever was playing.
    ///
    /// Loading the artifact that is already loaded keeps the position.
    pub fn load(&mut self, artifact: &Artifact) -> Result<(), CaptureError> {
        if self.state.loaded_artifact() == Some(artifact.id) {
            return Ok(());
        }
        self.stop();

        if artifact.format != EncodingFormat::Wav {
            return Err(CaptureError::Playback(format!(
                "cannot decode {}",
                artifact.mime_type()
            )));
        }
        let (samples, sample_rate) = decode_wav(artifact.bytes())?;
        debug!(
            "Loaded {} for playback: {} samples at {} Hz",
            artifact.channel,
            samples.len(),
            sample_rate
        );
        self.state.load(artifact.id, samples, sample_rate);
        Ok(())
    }

    /// Stop and forget the loaded artifact
    pub fn unload(&mut self) {
        self.stop();
        self.state.unload();
    }

    pub fn play(&mut self) -> Result<(), CaptureError> {
        if self.is_running() {
            return Err(CaptureError::Playback("already playing".to_string()));
        }
        if self.state.loaded_artifact().is_none() {
            return Err(CaptureError::Playback("nothing loaded".to_string()));
        }
        // Thread from a playback that ran to the end
        if let Some(handle) = self.thread_handle.take() {
            let _ = handle.join();
        }

        if self.state.progress() >= 1.0 {
            self.state.rewind();
        }

        self.state.set_playing(true);
        self.is_running.store(true, Ordering::SeqCst);

        let state = self.state.clone();
        let is_running = self.is_running.clone();
        let sample_rate = self.state.sample_rate();

        let (sender, receiver) = pw::channel::channel::<PlaybackCommand>();
        self.sender = Some(sender);

        let handle = thread::Builder::new()
            .name("dualmic-playback".to_string())
            .spawn(move || {
                if let Err(e) = run_playback_loop(state.clone(), sample_rate, receiver) {
                    error!("Playback error: {}", e);
                }
                state.set_playing(false);
                is_running.store(false, Ordering::SeqCst);
            })?;

        info!("Playback started");
        self.thread_handle = Some(handle);
        Ok(())
    }

    pub fn stop(&mut self) {
        if let Some(sender) = self.sender.take() {
            let _ = sender.send(PlaybackCommand::Stop);
        }
        if let Some(handle) = self.thread_handle.take() {
            let _ = handle.join();
        }

        self.is_running.store(false, Ordering::SeqCst);
        self.state.set_playing(false);
    }

    pub fn toggle(&mut self) -> Result<(), CaptureError> {
        if self.is_running() {
            self.stop();
            Ok(())
        } else {
            self.play()
        }
    }
}

impl Drop for AudioPlayer {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Run the PipeWire playback loop in a background thread
fn run_playback_loop(
    state: SharedPlaybackState,
    sample_rate: u32,
    receiver: pw::channel::Receiver<PlaybackCommand>,
) -> Result<(), CaptureError> {
    let failed = |what: &str, e: &dyn std::fmt::Display| {
        CaptureError::Playback(format!("{}: {}", what, e))
    };

    pw::init();

    let mainloop = pw::main_loop::MainLoopRc::new(None).map_err(|e| failed("main loop", &e))?;
    let context = pw::context::ContextRc::new(&mainloop, None).map_err(|e| failed("context", &e))?;
    let core = context.connect_rc(None).map_err(|e| failed("connect", &e))?;

    let mainloop_weak = mainloop.downgrade();
    let _receiver = receiver.attach(mainloop.loop_(), move |cmd| match cmd {
        PlaybackCommand::Stop => {
            if let Some(mainloop) = mainloop_weak.upgrade() {
                mainloop.quit();
            }
        }
    });

    struct UserData {
        format: spa::param::audio::AudioInfoRaw,
        state: SharedPlaybackState,
        mainloop_weak: pw::main_loop::MainLoopWeak,
    }

    let user_data = UserData {
        format: Default::default(),
        state,
        mainloop_weak: mainloop.downgrade(),
    };

    let props = pw::properties::properties! {
        *pw::keys::MEDIA_TYPE => "Audio",
        *pw::keys::MEDIA_CATEGORY => "Playback",
        *pw::keys::MEDIA_ROLE => "Music",
        *pw::keys::APP_NAME => "Dualmic",
    };

    let stream = pw::stream::StreamBox::new(&core, "dualmic-playback", props)
        .map_err(|e| failed("stream", &e))?;

    let _listener = stream
        .add_local_listener_with_user_data(user_data)
        .param_changed(|_, user_data, id, param| {
            let Some(param) = param else { return };
            if id != spa::param::ParamType::Format.as_raw() {
                return;
            }

            let Ok((media_type, media_subtype)) = format_utils::parse_format(param) else {
                return;
            };
            if media_type != MediaType::Audio || media_subtype != MediaSubtype::Raw {
                return;
            }

            if let Err(e) = user_data.format.parse(param) {
                error!("Failed to parse playback format: {:?}", e);
            }
        })
        .process(|stream, user_data| {
            let Some(mut buffer) = stream.dequeue_buffer() else {
                return;
            };

            let datas = buffer.datas_mut();
            if datas.is_empty() {
                return;
            }

            let data = &mut datas[0];
            let n_channels = user_data.format.channels().max(1) as usize;
            let sample_size = std::mem::size_of::<f32>();
            let stride = sample_size * n_channels;

            let Some(slice) = data.data() else {
                return;
            };
            let n_frames = slice.len() / stride;

            match user_data.state.next_block(n_frames) {
                Some(block) => {
                    // Mono source, copied to every output channel
                    for (frame, &sample) in slice.chunks_exact_mut(stride).zip(block.iter()) {
                        let bytes = sample.to_le_bytes();
                        for out in frame.chunks_exact_mut(sample_size) {
                            out.copy_from_slice(&bytes);
                        }
                    }
                    let written = block.len() * stride;
                    slice[written..].fill(0);

                    let chunk = data.chunk_mut();
                    *chunk.offset_mut() = 0;
                    *chunk.stride_mut() = stride as i32;
                    *chunk.size_mut() = written as u32;
                }
                None => {
                    if let Some(mainloop) = user_data.mainloop_weak.upgrade() {
                        mainloop.quit();
                    }
                }
            }
        })
        .register()
        .map_err(|e| failed("listener", &e))?;

    let mut audio_info = spa::param::audio::AudioInfoRaw::new();
    audio_info.set_format(spa::param::audio::AudioFormat::F32LE);
    audio_info.set_rate(sample_rate);
    audio_info.set_channels(1);

    let obj = spa::pod::Object {
        type_: spa::utils::SpaTypes::ObjectParamFormat.as_raw(),
        id: spa::param::ParamType::EnumFormat.as_raw(),
        properties: audio_info.into(),
    };

    let values: Vec<u8> = spa::pod::serialize::PodSerializer::serialize(
        std::io::Cursor::new(Vec::new()),
        &spa::pod::Value::Object(obj),
    )
    .map_err(|e| CaptureError::Playback(format!("format pod: {:?}", e)))?
    .0
    .into_inner();

    let pod = Pod::from_bytes(&values)
        .ok_or_else(|| CaptureError::Playback("invalid format pod".to_string()))?;
    let mut params = [pod];

    stream
        .connect(
            spa::utils::Direction::Output,
            None,
            pw::stream::StreamFlags::AUTOCONNECT
                | pw::stream::StreamFlags::MAP_BUFFERS
                | pw::stream::StreamFlags::RT_PROCESS,
            &mut params,
        )
        .map_err(|e| failed("connect stream", &e))?;

    // Run until stopped or the samples run out
    mainloop.run();

    Ok(())
}
