//! Overlaid two-channel waveform drawing
//!
//! The render loop is driven from outside (the UI's frame timer). It hands
//! out [`FrameTicket`]s; a ticket only fires while the loop is still armed
//! in the generation that issued it, so frames scheduled before a stop never
//! run afterwards.

use super::sampler::{VisualizationContext, SILENCE};
use crate::models::Channel;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

/// Line appearance for one channel
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WaveformStyle {
    /// 0xRRGGBB
    pub color: u32,
    pub line_width: f32,
}

pub const CHANNEL_STYLES: [WaveformStyle; 2] = [
    WaveformStyle {
        color: 0x06b6d4,
        line_width: 2.0,
    },
    WaveformStyle {
        color: 0xec4899,
        line_width: 2.0,
    },
];

pub fn style_for(channel: Channel) -> WaveformStyle {
    CHANNEL_STYLES[channel.index()]
}

/// Something the waveforms can be painted on
pub trait Surface {
    /// Current width and height in logical pixels
    fn size(&self) -> (f32, f32);

    fn clear(&mut self);

    fn stroke_polyline(&mut self, points: &[(f32, f32)], style: WaveformStyle);
}

/// Map snapshot bytes to points spanning `width`, with 128 at mid-height
pub fn waveform_points(samples: &[u8], width: f32, height: f32) -> Vec<(f32, f32)> {
    if samples.is_empty() {
        return Vec::new();
    }
    let slice_width = width / samples.len() as f32;
    samples
        .iter()
        .enumerate()
        .map(|(i, &sample)| {
            let v = sample as f32 / SILENCE as f32;
            (i as f32 * slice_width, v * height / 2.0)
        })
        .collect()
}

/// Snapshot data for one frame, detached from the sampler
#[derive(Debug, Clone, PartialEq)]
pub struct WaveformFrame {
    pub channels: [Vec<u8>; 2],
}

impl WaveformFrame {
    /// Clear the surface and draw both channels, sizing from the surface as
    /// it is now
    pub fn paint(&self, surface: &mut dyn Surface) {
        let (width, height) = surface.size();
        surface.clear();
        if width <= 0.0 || height <= 0.0 {
            return;
        }
        for channel in Channel::ALL {
            let points = waveform_points(&self.channels[channel.index()], width, height);
            if points.len() > 1 {
                surface.stroke_polyline(&points, style_for(channel));
            }
        }
    }
}

/// Proof that a frame was requested while the loop was armed
#[derive(Debug, Clone)]
pub struct FrameTicket {
    generation: u64,
    state: Arc<LoopState>,
}

impl FrameTicket {
    /// Whether the frame this ticket was issued for may still run
    pub fn is_live(&self) -> bool {
        self.state.armed.load(Ordering::Acquire)
            && self.state.generation.load(Ordering::Acquire) == self.generation
    }
}

#[derive(Debug, Default)]
struct LoopState {
    armed: AtomicBool,
    generation: AtomicU64,
}

#[derive(Debug, Default)]
pub struct RenderLoop {
    state: Arc<LoopState>,
}

impl RenderLoop {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arm the loop for a new recording, invalidating older tickets
    pub fn arm(&self) -> FrameTicket {
        self.state.generation.fetch_add(1, Ordering::AcqRel);
        self.state.armed.store(true, Ordering::Release);
        self.ticket()
    }

    /// Cancel the loop. Outstanding tickets stop firing.
    pub fn disarm(&self) {
        self.state.armed.store(false, Ordering::Release);
        self.state.generation.fetch_add(1, Ordering::AcqRel);
    }

    /// Ticket for the next frame
    pub fn ticket(&self) -> FrameTicket {
        FrameTicket {
            generation: self.state.generation.load(Ordering::Acquire),
            state: self.state.clone(),
        }
    }

    /// Run one frame step: refresh the sampler and copy out the snapshots.
    /// Returns `None` when the ticket is stale.
    pub fn frame(
        &self,
        ticket: &FrameTicket,
        context: &mut VisualizationContext,
    ) -> Option<WaveformFrame> {
        if !ticket.is_live() || !Arc::ptr_eq(&ticket.state, &self.state) {
            return None;
        }
        context.refresh();
        Some(WaveformFrame {
            channels: Channel::ALL.map(|c| context.snapshot(c).to_vec()),
        })
    }
}


#[cfg(test)]
mod tests {
    use super::testing::RecordingSurface;
    use super::*;

    #[test]
    fn test_points_span_width_with_silence_at_midline() {
        let points = waveform_points(&[128, 255, 0, 128], 100.0, 50.0);
        assert_eq!(points.len(), 4);
        assert_eq!(points[0], (0.0, 25.0));
        assert_eq!(points[2], (50.0, 0.0));
        assert_eq!(points[3], (75.0, 25.0));
        assert!(points[1].1 > 49.0);
    }

    #[test]
    fn test_paint_draws_two_distinct_lines() {
        let frame = WaveformFrame {
            channels: [vec![128; 8], vec![200; 8]],
        };
        let mut surface = RecordingSurface::new(320.0, 80.0);
        frame.paint(&mut surface);

        assert_eq!(surface.clears, 1);
        assert_eq!(surface.strokes.len(), 2);
        assert_eq!(surface.strokes[0].1, CHANNEL_STYLES[0]);
        assert_eq!(surface.strokes[1].1, CHANNEL_STYLES[1]);
        assert_ne!(CHANNEL_STYLES[0].color, CHANNEL_STYLES[1].color);
    }

    #[test]
    fn test_paint_follows_resized_surface() {
        let frame = WaveformFrame {
            channels: [vec![128; 4], vec![128; 4]],
        };
        let mut surface = RecordingSurface::new(100.0, 40.0);
        frame.paint(&mut surface);
        surface.width = 400.0;
        surface.height = 0.0;
        frame.paint(&mut surface);
        surface.height = 10.0;
        frame.paint(&mut surface);

        assert_eq!(surface.clears, 3);
        assert_eq!(surface.strokes.len(), 4);
        assert_eq!(surface.strokes[0].0[3], (75.0, 20.0));
        assert_eq!(surface.strokes[2].0[3], (300.0, 5.0));
    }

    #[test]
    fn test_disarm_invalidates_outstanding_tickets() {
        let render_loop = RenderLoop::new();
        let ticket = render_loop.arm();
        assert!(ticket.is_live());

        render_loop.disarm();
        assert!(!ticket.is_live());

        // Re-arming does not revive tickets from the previous run
        let fresh = render_loop.arm();
        assert!(fresh.is_live());
        assert!(!ticket.is_live());
    }

    #[test]
    fn test_unarmed_loop_hands_out_dead_tickets() {
        let render_loop = RenderLoop::new();
        assert!(!render_loop.ticket().is_live());
    }
}
