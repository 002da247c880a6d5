//! Time-domain analysis taps and per-channel snapshot buffers

use crate::audio::InputStream;
use crate::models::Channel;
use log::debug;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Byte value representing silence in a snapshot
pub const SILENCE: u8 = 128;

/// Keeps the most recent `window` samples of one stream
pub struct AnalyserTap {
    window: usize,
    samples: Mutex<VecDeque<f32>>,
}

impl AnalyserTap {
    pub fn new(window: usize) -> Self {
        Self {
            window,
            samples: Mutex::new(VecDeque::with_capacity(window)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<f32>> {
        self.samples.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn write(&self, samples: &[f32]) {
        let mut buffer = self.lock();
        let keep = samples.len().min(self.window);
        let overflow = (buffer.len() + keep).saturating_sub(self.window);
        buffer.drain(..overflow);
        buffer.extend(&samples[samples.len() - keep..]);
    }

    /// Fill `out` with the latest samples as unsigned bytes around
    /// [`SILENCE`]. Missing history reads as silence.
    pub fn read_bytes(&self, out: &mut [u8]) {
        let buffer = self.lock();
        let available = buffer.len().min(out.len());
        let pad = out.len() - available;

        out[..pad].fill(SILENCE);
        for (slot, &sample) in out[pad..]
            .iter_mut()
            .zip(buffer.iter().skip(buffer.len() - available))
        {
            *slot = sample_to_byte(sample);
        }
    }
}

pub fn sample_to_byte(sample: f32) -> u8 {
    (SILENCE as f32 + sample * 128.0).clamp(0.0, 255.0) as u8
}

/// Analysis graph for one recording: a tap per channel and the reusable
/// snapshot buffers the render loop reads
pub struct VisualizationContext {
    open: Arc<AtomicBool>,
    taps: Vec<Arc<AnalyserTap>>,
    buffers: [Vec<u8>; 2],
}

impl VisualizationContext {
    /// Attach a tap to each stream, channel A first.
    ///
    /// `fft_size` is the analysis window; snapshots hold half of it.
    pub fn new(streams: [&dyn InputStream; 2], fft_size: usize) -> Self {
        let open = Arc::new(AtomicBool::new(true));
        let taps: Vec<_> = (0..streams.len())
            .map(|_| Arc::new(AnalyserTap::new(fft_size)))
            .collect();

        for (stream, tap) in streams.iter().zip(taps.iter()) {
            let tap = Arc::downgrade(tap);
            let open = open.clone();
            stream.add_sink(Arc::new(move |samples| {
                if !open.load(Ordering::Acquire) {
                    return;
                }
                if let Some(tap) = tap.upgrade() {
                    tap.write(samples);
                }
            }));
        }

        let snapshot_len = (fft_size / 2).max(1);
        debug!("Visualization context open ({} samples per snapshot)", snapshot_len);

        Self {
            open,
            taps,
            buffers: [vec![SILENCE; snapshot_len], vec![SILENCE; snapshot_len]],
        }
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    /// Pull the latest samples of both taps into the snapshot buffers
    pub fn refresh(&mut self) {
        if !self.is_open() {
            return;
        }
        for (tap, buffer) in self.taps.iter().zip(self.buffers.iter_mut()) {
            tap.read_bytes(buffer);
        }
    }

    pub fn snapshot(&self, channel: Channel) -> &[u8] {
        &self.buffers[channel.index()]
    }

    /// Detach the taps and release the buffers
    pub fn close(&mut self) {
        if !self.open.swap(false, Ordering::AcqRel) {
            return;
        }
        self.taps.clear();
        self.buffers = [Vec::new(), Vec::new()];
        debug!("Visualization context closed");
    }
}

impl Drop for VisualizationContext {
    fn drop(&mut self) {
        self.close();
    }
}
