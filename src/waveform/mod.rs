//! Live waveform visualization
//!
//! This module provides:
//! - Per-channel time-domain taps and snapshot buffers
//! - A cancellable render loop painting both channels on one surface

mod render;
mod sampler;

pub use render::{
    style_for, waveform_points, FrameTicket, RenderLoop, Surface, WaveformFrame, WaveformStyle,
};
pub use sampler::VisualizationContext;

#[cfg(test)]
pub use render::testing;
