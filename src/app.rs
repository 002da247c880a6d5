//! Main application view for Dualmic
//!
//! Shows the two device pickers, the record controls, the live overlaid
//! waveform and one playback row per channel. All capture work goes through
//! the [`CaptureCoordinator`]; its events are drained on the UI thread.

use crate::audio::{AudioDevice, AudioPlayer, SharedPlaybackState};
use crate::coordinator::CaptureCoordinator;
use crate::error::CaptureError;
use crate::models::{CaptureEvent, Channel, Severity};
use crate::settings::Settings;
use crate::waveform::{Surface, WaveformFrame, WaveformStyle};
use chrono::Local;
use gpui::prelude::*;
use gpui::*;
use log::{debug, error};
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;

const CANVAS_BACKGROUND: u32 = 0x111827;
const FRAME_INTERVAL: Duration = Duration::from_millis(16);

/// Paints waveform frames onto a gpui canvas
struct CanvasSurface<'a> {
    bounds: Bounds<Pixels>,
    window: &'a mut Window,
}

impl Surface for CanvasSurface<'_> {
    fn size(&self) -> (f32, f32) {
        (
            f32::from(self.bounds.size.width),
            f32::from(self.bounds.size.height),
        )
    }

    fn clear(&mut self) {
        self.window
            .paint_quad(fill(self.bounds, rgb(CANVAS_BACKGROUND)));
    }

    fn stroke_polyline(&mut self, points: &[(f32, f32)], style: WaveformStyle) {
        let origin = self.bounds.origin;
        let mut builder = PathBuilder::stroke(px(style.line_width));
        for (i, &(x, y)) in points.iter().enumerate() {
            let at = point(origin.x + px(x), origin.y + px(y));
            if i == 0 {
                builder.move_to(at);
            } else {
                builder.line_to(at);
            }
        }
        match builder.build() {
            Ok(path) => self.window.paint_path(path, rgb(style.color)),
            Err(e) => debug!("Skipping waveform path: {:?}", e),
        }
    }
}

/// The root application view
pub struct Dualmic {
    coordinator: CaptureCoordinator,
    settings: Settings,
    focus_handle: FocusHandle,
    /// Set when audio capture is unavailable on this system
    platform_error: Option<String>,
    selected: [Option<String>; 2],
    status: Option<(String, Severity)>,
    /// Latest waveform snapshot while recording
    frame: Option<WaveformFrame>,
    players: [AudioPlayer; 2],
    playback_states: [SharedPlaybackState; 2],
    _event_task: Option<Task<()>>,
    _start_task: Option<Task<()>>,
    _ui_refresh_task: Option<Task<()>>,
    _playback_refresh_task: Option<Task<()>>,
}

impl Dualmic {
    pub fn new(
        coordinator: CaptureCoordinator,
        events: UnboundedReceiver<CaptureEvent>,
        settings: Settings,
        platform: Result<(), CaptureError>,
        cx: &mut Context<Self>,
    ) -> Self {
        let players = [AudioPlayer::new(), AudioPlayer::new()];
        let playback_states = [players[0].shared_state(), players[1].shared_state()];

        let mut view = Self {
            coordinator,
            settings,
            focus_handle: cx.focus_handle(),
            platform_error: None,
            selected: [None, None],
            status: None,
            frame: None,
            players,
            playback_states,
            _event_task: None,
            _start_task: None,
            _ui_refresh_task: None,
            _playback_refresh_task: None,
        };

        view._event_task = Some(view.spawn_event_task(events, cx));

        match platform {
            Ok(()) => {
                let _ = view.coordinator.refresh_devices();
            }
            Err(e) => {
                error!("{}", e);
                view.status = Some((e.user_message(), Severity::Error));
                view.platform_error = Some(e.user_message());
            }
        }

        view
    }

    pub fn focus_handle(&self) -> &FocusHandle {
        &self.focus_handle
    }

    /// Apply coordinator events on the UI thread
    fn spawn_event_task(
        &self,
        mut events: UnboundedReceiver<CaptureEvent>,
        cx: &mut Context<Self>,
    ) -> Task<()> {
        cx.spawn(async move |this: WeakEntity<Self>, cx: &mut AsyncApp| {
            while let Some(event) = events.recv().await {
                let result = this.update(cx, |this, cx| {
                    this.handle_event(event, cx);
                    cx.notify();
                });
                if result.is_err() {
                    break;
                }
            }
        })
    }

    fn handle_event(&mut self, event: CaptureEvent, cx: &mut Context<Self>) {
        match event {
            CaptureEvent::Status { message, severity } => {
                self.status = Some((message, severity));
            }
            CaptureEvent::RecordingStarted => {
                for player in self.players.iter_mut() {
                    player.unload();
                }
                self.start_waveform_refresh(cx);
            }
            CaptureEvent::RecordingStopped { labels } => {
                debug!("Stopped recording {} and {}", labels[0], labels[1]);
                self.frame = None;
            }
            CaptureEvent::ArtifactReady { channel } => {
                debug!("{} ready for playback", channel);
            }
        }
    }

    fn toggle_recording(&mut self, cx: &mut Context<Self>) {
        if self.coordinator.state().is_recording() || self.coordinator.is_starting() {
            self.coordinator.stop();
        } else {
            self.start_recording(cx);
        }
    }

    /// Acquire both devices on the blocking pool, then finish on the UI thread
    fn start_recording(&mut self, cx: &mut Context<Self>) {
        if self.platform_error.is_some() {
            return;
        }
        let [a, b] = &self.selected;
        let a = a.clone().unwrap_or_default();
        let b = b.clone().unwrap_or_default();

        // Failures are reported through status events
        let Ok(request) = self.coordinator.request_start(&a, &b) else {
            return;
        };
        let attempt = request.attempt();
        let acquiring = self.coordinator.acquire_in_background(request);

        self._start_task = Some(cx.spawn(
            async move |this: WeakEntity<Self>, cx: &mut AsyncApp| {
                let outcome = acquiring.await;
                let _ = this.update(cx, |this, cx| {
                    match outcome {
                        Ok(acquired) => {
                            let _ = this.coordinator.finish_start(acquired);
                        }
                        Err(e) => {
                            error!("Stream acquisition task failed: {}", e);
                            this.coordinator.abandon_start(attempt);
                        }
                    }
                    cx.notify();
                });
            },
        ));
    }

    /// Redraw at ~60fps while the render loop stays armed
    fn start_waveform_refresh(&mut self, cx: &mut Context<Self>) {
        let first = self.coordinator.frame_ticket();
        self._ui_refresh_task = Some(cx.spawn({
            async move |this: WeakEntity<Self>, cx: &mut AsyncApp| {
                let mut ticket = first;
                while ticket.is_live() {
                    let result = this.update(cx, |this, cx| {
                        this.frame = this.coordinator.render_frame(&ticket);
                        cx.notify();
                        this.coordinator.frame_ticket()
                    });
                    match result {
                        Ok(next) => ticket = next,
                        Err(_) => break,
                    }

                    cx.background_executor().timer(FRAME_INTERVAL).await;
                }
            }
        }));
    }

    fn start_playback_refresh(&mut self, cx: &mut Context<Self>) {
        let states = self.playback_states.clone();
        self._playback_refresh_task = Some(cx.spawn({
            async move |this: WeakEntity<Self>, cx: &mut AsyncApp| loop {
                cx.background_executor()
                    .timer(Duration::from_millis(100))
                    .await;

                let result = this.update(cx, |_, cx| cx.notify());
                if result.is_err() || !states.iter().any(|s| s.is_playing()) {
                    break;
                }
            }
        }));
    }

    fn toggle_playback(&mut self, channel: Channel, cx: &mut Context<Self>) {
        let Some(handle) = self.coordinator.artifact(channel) else {
            return;
        };
        let Some(artifact) = self.coordinator.resolve(&handle.playable) else {
            debug!("Playable reference for {} was revoked", channel);
            return;
        };

        let other = match channel {
            Channel::A => Channel::B,
            Channel::B => Channel::A,
        };
        self.players[other.index()].stop();

        let player = &mut self.players[channel.index()];
        let result = player.load(&artifact).and_then(|_| player.toggle());
        match result {
            Ok(()) => self.start_playback_refresh(cx),
            Err(e) => {
                error!("{}", e);
                self.status = Some((e.user_message(), Severity::Error));
            }
        }
    }

    fn download(&mut self, channel: Channel) {
        // Success and failure both arrive as status events
        let _ = self
            .coordinator
            .download(channel, &self.settings.download_dir);
    }

    fn render_device_picker(
        &self,
        channel: Channel,
        devices: &[AudioDevice],
        is_recording: bool,
        cx: &mut Context<Self>,
    ) -> impl IntoElement {
        let selected = self.selected[channel.index()].clone();
        let accent = crate::waveform::style_for(channel).color;

        div()
            .flex()
            .flex_col()
            .gap_2()
            .flex_1()
            .child(
                div()
                    .text_sm()
                    .font_weight(FontWeight::SEMIBOLD)
                    .text_color(rgb(accent))
                    .child(channel.to_string()),
            )
            .children(devices.iter().enumerate().map(|(i, device)| {
                let is_selected = selected.as_deref() == Some(device.id.as_str());
                let device_id = device.id.clone();
                div()
                    .id(ElementId::Name(
                        format!("device-{}-{}", channel.index(), i).into(),
                    ))
                    .px_3()
                    .py_2()
                    .rounded_md()
                    .text_sm()
                    .bg(if is_selected {
                        rgb(0x1f2937)
                    } else {
                        rgb(0x0f0f1a)
                    })
                    .border_1()
                    .border_color(if is_selected {
                        rgb(accent)
                    } else {
                        rgb(0x2a2a3a)
                    })
                    .text_color(rgb(0xdddddd))
                    .when(!is_recording, |el| {
                        el.cursor_pointer()
                            .hover(|style| style.opacity(0.9))
                            .on_click(cx.listener(move |this, _, _w, cx| {
                                this.selected[channel.index()] = Some(device_id.clone());
                                cx.notify();
                            }))
                    })
                    .child(device.label.clone())
            }))
    }

    fn render_waveform(&self) -> impl IntoElement {
        let frame = self.frame.clone();
        canvas(
            |_bounds, _window, _cx| {},
            move |bounds, _, window, _cx| {
                let mut surface = CanvasSurface { bounds, window };
                match &frame {
                    Some(frame) => frame.paint(&mut surface),
                    None => surface.clear(),
                }
            },
        )
        .w_full()
        .h(px(200.0))
        .rounded_lg()
    }

    fn render_take(&self, channel: Channel, cx: &mut Context<Self>) -> impl IntoElement {
        let handle = self.coordinator.artifact(channel);
        let label = self.coordinator.labels()[channel.index()].clone();
        let accent = crate::waveform::style_for(channel).color;
        let playback = &self.playback_states[channel.index()];
        let is_playing = playback.is_playing();
        let progress = playback.progress();
        let summary = handle.as_ref().map(|handle| {
            let artifact = &handle.artifact;
            let recorded_at = artifact.created_at.with_timezone(&Local).format("%H:%M:%S");
            if artifact.is_empty() {
                format!("{}, no audio captured", recorded_at)
            } else if playback.loaded_artifact() == Some(artifact.id) {
                format!(
                    "{}, {:.1}s / {:.1}s, {} KB",
                    recorded_at,
                    playback.current_time(),
                    playback.duration(),
                    artifact.bytes().len() / 1024
                )
            } else {
                format!(
                    "{}, {:.1}s, {} KB",
                    recorded_at,
                    artifact.duration_seconds(),
                    artifact.bytes().len() / 1024
                )
            }
        });

        div()
            .flex()
            .flex_col()
            .gap_2()
            .flex_1()
            .p_4()
            .rounded_lg()
            .bg(rgb(0x1a1a2e))
            .child(
                div()
                    .text_sm()
                    .font_weight(FontWeight::SEMIBOLD)
                    .text_color(rgb(accent))
                    .child(if label.is_empty() {
                        channel.to_string()
                    } else {
                        label
                    }),
            )
            .child(match summary {
                None => div()
                    .text_sm()
                    .text_color(rgb(0x666666))
                    .child("No recording yet")
                    .into_any_element(),
                Some(summary) => div()
                    .flex()
                    .flex_col()
                    .gap_2()
                    .child(div().text_xs().text_color(rgb(0x888888)).child(summary))
                    .child(
                        div()
                            .w_full()
                            .h(px(4.0))
                            .rounded_sm()
                            .bg(rgb(0x2a2a3a))
                            .child(
                                div()
                                    .h_full()
                                    .w(relative(progress))
                                    .rounded_sm()
                                    .bg(rgb(accent)),
                            ),
                    )
                    .child(
                        div()
                            .flex()
                            .gap_2()
                            .child(
                                div()
                                    .id(ElementId::Name(
                                        format!("btn-play-{}", channel.index()).into(),
                                    ))
                                    .px_4()
                                    .py_2()
                                    .rounded_md()
                                    .bg(rgb(0x2a2a3a))
                                    .text_color(rgb(0xffffff))
                                    .cursor_pointer()
                                    .hover(|style| style.opacity(0.9))
                                    .on_click(cx.listener(move |this, _, _w, cx| {
                                        this.toggle_playback(channel, cx);
                                        cx.notify();
                                    }))
                                    .child(if is_playing { "Stop" } else { "Play" }),
                            )
                            .child(
                                div()
                                    .id(ElementId::Name(
                                        format!("btn-download-{}", channel.index()).into(),
                                    ))
                                    .px_4()
                                    .py_2()
                                    .rounded_md()
                                    .bg(rgb(0x2a2a3a))
                                    .text_color(rgb(0xffffff))
                                    .cursor_pointer()
                                    .hover(|style| style.opacity(0.9))
                                    .on_click(cx.listener(move |this, _, _w, cx| {
                                        this.download(channel);
                                        cx.notify();
                                    }))
                                    .child("Download"),
                            ),
                    )
                    .into_any_element(),
            })
    }
}

impl Render for Dualmic {
    fn render(&mut self, _window: &mut Window, cx: &mut Context<Self>) -> impl IntoElement {
        let is_recording = self.coordinator.state().is_recording();
        let is_starting = self.coordinator.is_starting();
        let can_record = self.platform_error.is_none();
        let format_hint = match self.coordinator.negotiated_format() {
            Some(format) => format!("Space to start or stop, saved as {}", format.mime_type()),
            None => "Space to start or stop".to_string(),
        };
        let devices = self.coordinator.devices().to_vec();
        let status = self.status.clone();

        div()
            .size_full()
            .flex()
            .flex_col()
            .gap_6()
            .p_6()
            .bg(rgb(0x0f0f1a))
            .text_color(rgb(0xdddddd))
            .track_focus(&self.focus_handle)
            .key_context("Dualmic")
            .on_key_down(cx.listener(|this, event: &KeyDownEvent, window, cx| {
                match event.keystroke.key.as_str() {
                    "space" => {
                        this.toggle_recording(cx);
                        cx.notify();
                    }
                    "q" if event.keystroke.modifiers.control => {
                        this.coordinator.stop();
                        window.remove_window();
                    }
                    _ => {}
                }
            }))
            .child(
                div()
                    .text_xl()
                    .font_weight(FontWeight::SEMIBOLD)
                    .child("Dual Microphone Recorder"),
            )
            .when_some(self.platform_error.clone(), |el, message| {
                el.child(
                    div()
                        .p_4()
                        .rounded_lg()
                        .bg(rgb(0x4a1d24))
                        .text_color(rgb(0xffffff))
                        .child(message),
                )
            })
            .child(
                div()
                    .flex()
                    .gap_6()
                    .child(self.render_device_picker(
                        Channel::A,
                        &devices,
                        is_recording || is_starting,
                        cx,
                    ))
                    .child(self.render_device_picker(
                        Channel::B,
                        &devices,
                        is_recording || is_starting,
                        cx,
                    )),
            )
            .child(
                div()
                    .flex()
                    .gap_4()
                    .items_center()
                    .child(
                        div()
                            .id("btn-record")
                            .px_6()
                            .py_3()
                            .rounded_lg()
                            .bg(if is_recording || is_starting {
                                rgb(0x444444)
                            } else {
                                rgb(0xe94560)
                            })
                            .text_color(rgb(0xffffff))
                            .font_weight(FontWeight::SEMIBOLD)
                            .when(can_record && !is_recording && !is_starting, |el| {
                                el.cursor_pointer()
                                    .hover(|style| style.opacity(0.9))
                                    .on_click(cx.listener(|this, _, _w, cx| {
                                        this.start_recording(cx);
                                        cx.notify();
                                    }))
                            })
                            .child(if is_starting { "Starting..." } else { "Record" }),
                    )
                    .child(
                        div()
                            .id("btn-stop")
                            .px_6()
                            .py_3()
                            .rounded_lg()
                            .bg(if is_recording || is_starting {
                                rgb(0xe94560)
                            } else {
                                rgb(0x444444)
                            })
                            .text_color(rgb(0xffffff))
                            .font_weight(FontWeight::SEMIBOLD)
                            .when(is_recording || is_starting, |el| {
                                el.cursor_pointer()
                                    .hover(|style| style.opacity(0.9))
                                    .on_click(cx.listener(|this, _, _w, cx| {
                                        this.coordinator.stop();
                                        cx.notify();
                                    }))
                            })
                            .child("Stop"),
                    )
                    .child(
                        div()
                            .text_sm()
                            .text_color(rgb(0x666666))
                            .child(format_hint),
                    ),
            )
            .when_some(status, |el, (message, severity)| {
                el.child(
                    div()
                        .text_sm()
                        .text_color(match severity {
                            Severity::Info => rgb(0x93c5fd),
                            Severity::Success => rgb(0x4ade80),
                            Severity::Error => rgb(0xf87171),
                        })
                        .child(message),
                )
            })
            .child(self.render_waveform())
            .child(
                div()
                    .flex()
                    .gap_6()
                    .child(self.render_take(Channel::A, cx))
                    .child(self.render_take(Channel::B, cx)),
            )
    }
}
