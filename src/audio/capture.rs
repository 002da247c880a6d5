//! Audio capture using PipeWire
//!
//! Each acquired stream runs its own PipeWire main loop on a dedicated thread
//! and fans the first channel of every buffer out to the registered sinks.

use super::device::{self, AudioDevice};
use super::stream::{InputStream, SampleSink, SinkSet, StreamAcquirer, StreamConstraints};
use crate::error::CaptureError;
use crate::models::StreamFormat;
use log::{debug, info, warn};
use pipewire as pw;
use pw::spa;
use pw::spa::param::format::{MediaSubtype, MediaType};
use pw::spa::param::format_utils;
use pw::spa::pod::Pod;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Audio capture configuration
#[derive(Clone, Debug)]
pub struct CaptureConfig {
    /// Requested sample rate
    pub sample_rate: u32,
    /// How long to wait for a stream to start flowing
    pub acquire_timeout: Duration,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            sample_rate: 48000,
            acquire_timeout: Duration::from_secs(5),
        }
    }
}

enum PipeWireCommand {
    Stop,
}

/// Opens PipeWire capture streams pinned to a node
pub struct PipeWireAcquirer {
    config: CaptureConfig,
}

impl PipeWireAcquirer {
    pub fn new(config: CaptureConfig) -> Self {
        Self { config }
    }
}

impl StreamAcquirer for PipeWireAcquirer {
    fn list_input_devices(&self) -> Result<Vec<AudioDevice>, CaptureError> {
        device::enumerate_sources()
    }

    fn acquire(
        &self,
        device_id: &str,
        constraints: &StreamConstraints,
    ) -> Result<Box<dyn InputStream>, CaptureError> {
        // Streams connect straight to the device node, there is no filter chain
        if constraints.wants_processing() {
            return Err(CaptureError::acquisition(
                device_id,
                "audio processing effects are not available",
            ));
        }

        let known = device::enumerate_sources()?;
        if !known.iter().any(|d| d.id == device_id) {
            return Err(CaptureError::acquisition(device_id, "device not available"));
        }

        let stream = PipeWireStream::open(device_id, &self.config)?;
        Ok(Box::new(stream))
    }
}

/// Capture stream running on its own PipeWire thread
pub struct PipeWireStream {
    device_id: String,
    format: StreamFormat,
    sinks: SinkSet,
    is_running: Arc<AtomicBool>,
    thread_handle: Option<JoinHandle<()>>,
    sender: Option<pw::channel::Sender<PipeWireCommand>>,
}

impl PipeWireStream {
    /// Start the stream and block until it is flowing or fails
    fn open(device_id: &str, config: &CaptureConfig) -> Result<Self, CaptureError> {
        let sinks = SinkSet::new();
        let is_running = Arc::new(AtomicBool::new(true));
        let (sender, receiver) = pw::channel::channel::<PipeWireCommand>();
        let (ready_tx, ready_rx) = mpsc::channel::<Result<u32, String>>();

        let handle = {
            let target = device_id.to_string();
            let sinks = sinks.clone();
            let is_running = is_running.clone();
            let sample_rate = config.sample_rate;
            thread::Builder::new()
                .name(format!("capture-{}", device_id))
                .spawn(move || {
                    let failed = ready_tx.clone();
                    if let Err(e) =
                        run_capture_loop(&target, sample_rate, sinks, receiver, ready_tx)
                    {
                        let _ = failed.send(Err(e));
                    }
                    is_running.store(false, Ordering::SeqCst);
                })?
        };

        let mut stream = Self {
            device_id: device_id.to_string(),
            format: StreamFormat {
                sample_rate: config.sample_rate,
                channels: 1,
            },
            sinks,
            is_running,
            thread_handle: Some(handle),
            sender: Some(sender),
        };

        match ready_rx.recv_timeout(config.acquire_timeout) {
            Ok(Ok(rate)) => {
                if rate > 0 {
                    stream.format.sample_rate = rate;
                }
                info!(
                    "Capture stream for {} running at {}Hz",
                    stream.device_id, stream.format.sample_rate
                );
                Ok(stream)
            }
            Ok(Err(reason)) => {
                stream.stop();
                Err(CaptureError::acquisition(device_id, reason))
            }
            Err(_) => {
                stream.stop();
                Err(CaptureError::acquisition(
                    device_id,
                    "timed out waiting for the stream to start",
                ))
            }
        }
    }
}

impl InputStream for PipeWireStream {
    fn device_id(&self) -> &str {
        &self.device_id
    }

    fn format(&self) -> StreamFormat {
        self.format
    }

    fn add_sink(&self, sink: SampleSink) {
        self.sinks.add(sink);
    }

    fn stop(&mut self) {
        if let Some(sender) = self.sender.take() {
            let _ = sender.send(PipeWireCommand::Stop);
        }

        if let Some(handle) = self.thread_handle.take() {
            if handle.join().is_err() {
                warn!("Capture thread for {} panicked", self.device_id);
            }
            debug!("Released capture stream for {}", self.device_id);
        }

        self.is_running.store(false, Ordering::SeqCst);
        self.sinks.clear();
    }

    fn is_live(&self) -> bool {
        self.is_running.load(Ordering::SeqCst)
    }
}

impl Drop for PipeWireStream {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Run the PipeWire capture loop in a background thread
fn run_capture_loop(
    target: &str,
    sample_rate: u32,
    sinks: SinkSet,
    receiver: pw::channel::Receiver<PipeWireCommand>,
    ready: mpsc::Sender<Result<u32, String>>,
) -> Result<(), String> {
    pw::init();

    let mainloop = pw::main_loop::MainLoopRc::new(None)
        .map_err(|e| format!("Failed to create PipeWire main loop: {}", e))?;

    let context = pw::context::ContextRc::new(&mainloop, None)
        .map_err(|e| format!("Failed to create PipeWire context: {}", e))?;

    let core = context
        .connect_rc(None)
        .map_err(|e| format!("Failed to connect to PipeWire: {}", e))?;

    let mainloop_weak = mainloop.downgrade();
    let _receiver = receiver.attach(mainloop.loop_(), move |cmd| match cmd {
        PipeWireCommand::Stop => {
            if let Some(mainloop) = mainloop_weak.upgrade() {
                mainloop.quit();
            }
        }
    });

    struct UserData {
        format: spa::param::audio::AudioInfoRaw,
        sinks: SinkSet,
        ready: Option<mpsc::Sender<Result<u32, String>>>,
    }

    let user_data = UserData {
        format: Default::default(),
        sinks,
        ready: Some(ready),
    };

    // Production role and a pinned target keep the session manager from
    // routing through echo-cancel or moving the stream to another device
    let props = pw::properties::properties! {
        *pw::keys::MEDIA_TYPE => "Audio",
        *pw::keys::MEDIA_CATEGORY => "Capture",
        *pw::keys::MEDIA_ROLE => "Production",
        *pw::keys::APP_NAME => "Dualmic",
        "target.object" => target,
        "node.dont-reconnect" => "true",
        "stream.dont-remix" => "true",
    };

    let stream = pw::stream::StreamBox::new(&core, "dualmic-capture", props)
        .map_err(|e| format!("Failed to create PipeWire stream: {}", e))?;

    let _listener = stream
        .add_local_listener_with_user_data(user_data)
        .state_changed(|_, user_data, _old, new| match new {
            pw::stream::StreamState::Streaming => {
                if let Some(ready) = user_data.ready.take() {
                    let _ = ready.send(Ok(user_data.format.rate()));
                }
            }
            pw::stream::StreamState::Error(reason) => {
                if let Some(ready) = user_data.ready.take() {
                    let _ = ready.send(Err(reason));
                }
            }
            _ => {}
        })
        .param_changed(|_, user_data, id, param| {
            let Some(param) = param else { return };
            if id != spa::param::ParamType::Format.as_raw() {
                return;
            }

            let (media_type, media_subtype) = match format_utils::parse_format(param) {
                Ok(v) => v,
                Err(_) => return,
            };

            if media_type != MediaType::Audio || media_subtype != MediaSubtype::Raw {
                return;
            }

            if let Err(e) = user_data.format.parse(param) {
                warn!("Failed to parse negotiated audio format: {:?}", e);
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
            let n_channels = user_data.format.channels().max(1);
            let n_samples = data.chunk().size() / (std::mem::size_of::<f32>() as u32);

            if let Some(raw_samples) = data.data() {
                // Keep only the first channel of interleaved frames
                let mut mono_samples = Vec::with_capacity((n_samples / n_channels) as usize);

                for i in (0..n_samples).step_by(n_channels as usize) {
                    let start = i as usize * std::mem::size_of::<f32>();
                    let end = start + std::mem::size_of::<f32>();
                    if end <= raw_samples.len() {
                        let sample = f32::from_le_bytes(
                            raw_samples[start..end].try_into().unwrap_or([0; 4]),
                        );
                        mono_samples.push(sample);
                    }
                }

                user_data.sinks.dispatch(&mono_samples);
            }
        })
        .register()
        .map_err(|e| format!("Failed to register stream listener: {}", e))?;

    let mut audio_info = spa::param::audio::AudioInfoRaw::new();
    audio_info.set_format(spa::param::audio::AudioFormat::F32LE);
    audio_info.set_rate(sample_rate);

    let obj = spa::pod::Object {
        type_: spa::utils::SpaTypes::ObjectParamFormat.as_raw(),
        id: spa::param::ParamType::EnumFormat.as_raw(),
        properties: audio_info.into(),
    };

    let values: Vec<u8> = spa::pod::serialize::PodSerializer::serialize(
        std::io::Cursor::new(Vec::new()),
        &spa::pod::Value::Object(obj),
    )
    .map_err(|e| format!("Failed to serialize audio format: {:?}", e))?
    .0
    .into_inner();

    let pod = Pod::from_bytes(&values).ok_or("Failed to build audio format pod")?;
    let mut params = [pod];

    stream
        .connect(
            spa::utils::Direction::Input,
            None,
            pw::stream::StreamFlags::AUTOCONNECT
                | pw::stream::StreamFlags::MAP_BUFFERS
                | pw::stream::StreamFlags::RT_PROCESS,
            &mut params,
        )
        .map_err(|e| format!("Failed to connect stream: {}", e))?;

    mainloop.run();

    Ok(())
}
