//! Frequency-domain loudness envelope over the remote audio stream.

use rustfft::num_complex::Complex;
use rustfft::{Fft, FftPlanner};
use std::sync::Arc;

/// Samples per analysis window.
pub const ANALYSIS_WINDOW: usize = 256;

/// Average bin magnitude treated as full loudness. A full-scale broadband
/// window lands near this value, so the normalized envelope covers the
/// useful range of speech.
const REFERENCE_CEILING: f32 = 8.0;

/// Per-bin temporal smoothing factor between windows.
const SPECTRUM_SMOOTHING: f32 = 0.8;

/// Reduces sample windows to one smoothed loudness scalar in `[0, 1]`.
pub struct LoudnessMeter {
    fft: Arc<dyn Fft<f32>>,
    buffer: Vec<Complex<f32>>,
    smoothed: Vec<f32>,
}

impl LoudnessMeter {
    pub fn new() -> Self {
        let mut planner = FftPlanner::new();
        LoudnessMeter {
            fft: planner.plan_fft_forward(ANALYSIS_WINDOW),
            buffer: vec![Complex::new(0.0, 0.0); ANALYSIS_WINDOW],
            smoothed: vec![0.0; ANALYSIS_WINDOW / 2],
        }
    }

    /// Measures one window. Short windows are zero-padded; long ones use the
    /// most recent [`ANALYSIS_WINDOW`] samples.
    pub fn measure(&mut self, window: &[f32]) -> f32 {
        let take = window.len().min(ANALYSIS_WINDOW);
        let offset = window.len() - take;
        for (slot, sample) in self.buffer.iter_mut().zip(window[offset..].iter()) {
            *slot = Complex::new(*sample, 0.0);
        }
        for slot in self.buffer.iter_mut().skip(take) {
            *slot = Complex::new(0.0, 0.0);
        }
        self.fft.process(&mut self.buffer);

        let mut sum = 0.0f32;
        for (smoothed, bin) in self.smoothed.iter_mut().zip(self.buffer.iter()) {
            let magnitude = bin.norm();
            *smoothed = *smoothed * SPECTRUM_SMOOTHING + magnitude * (1.0 - SPECTRUM_SMOOTHING);
            sum += *smoothed;
        }
        let average = sum / self.smoothed.len() as f32;
        (average / REFERENCE_CEILING).clamp(0.0, 1.0)
    }

    /// Forgets the smoothed spectrum, for reuse across sessions.
    pub fn reset(&mut self) {
        self.smoothed.fill(0.0);
    }
}

impl Default for LoudnessMeter {
    fn default() -> Self {
        LoudnessMeter::new()
    }
}
