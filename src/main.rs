//! Dualmic - Record two microphones side by side on Linux
//!
//! This is the main entry point for the Dualmic application.

mod app;
mod audio;
mod cli;
mod coordinator;
mod error;
mod export;
mod models;
mod settings;
mod state;
mod tokio_runtime;
mod waveform;

use anyhow::Context as _;
use app::Dualmic;
use audio::{PipeWireAcquirer, WavEncoderFactory};
use clap::Parser;
use coordinator::CaptureCoordinator;
use gpui::prelude::*;
use gpui::*;
use log::{error, info};
use settings::Settings;
use std::sync::Arc;

fn main() -> anyhow::Result<()> {
    // Parse command-line arguments and initialize logging
    let args = cli::Args::parse();
    cli::init_logging(&args);

    let settings = Settings::from_args(&args)?;
    let runtime = tokio_runtime::init().context("failed to start the Tokio runtime")?;

    info!("Starting Dualmic");

    let platform = audio::probe_platform();
    let acquirer = Arc::new(PipeWireAcquirer::new(settings.capture.clone()));
    let encoders = Arc::new(WavEncoderFactory::new(settings.timeslice));
    let (coordinator, events) =
        CaptureCoordinator::new(acquirer, encoders, runtime, settings.fft_size);

    Application::new().run(move |cx: &mut App| {
        let bounds = Bounds::centered(None, size(px(960.0), px(720.0)), cx);
        let opened = cx.open_window(
            WindowOptions {
                window_bounds: Some(WindowBounds::Windowed(bounds)),
                app_id: Some("com.dualmic.Recorder".to_string()),
                ..Default::default()
            },
            |window, cx| {
                window.set_app_id("com.dualmic.Recorder");
                let view = cx.new(|cx| Dualmic::new(coordinator, events, settings, platform, cx));
                view.read(cx).focus_handle().focus(window);
                view
            },
        );
        if let Err(e) = opened {
            error!("Failed to open window: {}", e);
            cx.quit();
        }
    });

    Ok(())
}
