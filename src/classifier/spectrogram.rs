use ndarray::Array2;
use rustfft::{num_complex::Complex, FftPlanner};
use serde::{Deserialize, Serialize};
use std::f32::consts::PI;

/// Spectrogram front-end configuration
///
/// Audio command models consume a fixed grid: `frames` STFT columns of
/// `bins` low-frequency bins each, flattened time-major.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SpectrogramConfig {
    pub n_fft: usize,
    pub hop_length: usize,
    /// Frequency bins kept per frame (at most `n_fft / 2 + 1`).
    pub bins: usize,
    /// STFT frames the model consumes per input window.
    pub frames: usize,
}

impl Default for SpectrogramConfig {
    fn default() -> Self {
        Self {
            n_fft: 1024,
            hop_length: 512,
            bins: 232,  // browser-FFT audio models keep the first 232 bins
            frames: 43, // ~1 second of context at 16kHz
        }
    }
}

impl SpectrogramConfig {
    /// Samples needed to fill all `frames` columns without padding.
    pub fn expected_samples(&self) -> usize {
        (self.frames.max(1) - 1) * self.hop_length + self.n_fft
    }

    /// Flattened feature vector length.
    pub fn feature_len(&self) -> usize {
        self.frames * self.bins
    }
}

/// Compute a log-power spectrogram of exactly `config.frames` rows.
///
/// One row per STFT frame, one column per frequency bin, so the row-major
/// flattening reads time-major. Samples beyond the last full window are
/// ignored; missing windows leave zero rows.
pub fn log_spectrogram(samples: &[f32], config: &SpectrogramConfig) -> Array2<f32> {
    let n_fft = config.n_fft;
    let hop_length = config.hop_length.max(1);

    // Hann window
    let window: Vec<f32> = (0..n_fft)
        .map(|i| 0.5 * (1.0 - (2.0 * PI * i as f32 / n_fft as f32).cos()))
        .collect();

    let mut planner = FftPlanner::<f32>::new();
    let fft = planner.plan_fft_forward(n_fft);

    let kept_bins = config.bins.min(n_fft / 2 + 1);
    let mut spectrogram = Array2::<f32>::zeros((config.frames, config.bins));

    for frame_idx in 0..config.frames {
        let start = frame_idx * hop_length;
        if start + n_fft > samples.len() {
            break;
        }

        // Apply window and create complex buffer
        let mut buffer: Vec<Complex<f32>> = samples[start..start + n_fft]
            .iter()
            .zip(window.iter())
            .map(|(&s, &w)| Complex::new(s * w, 0.0))
            .collect();

        fft.process(&mut buffer);

        // Log power spectrum, small epsilon for numerical stability
        for (bin, c) in buffer.iter().take(kept_bins).enumerate() {
            spectrogram[[frame_idx, bin]] = (c.norm_sqr() + 1e-10).ln();
        }
    }

    spectrogram
}

/// Flattened time-major feature vector for one input window.
pub fn features(samples: &[f32], config: &SpectrogramConfig, normalized: bool) -> Vec<f32> {
    let spec = log_spectrogram(samples, config);
    let spec = if normalized { normalize(&spec) } else { spec };
    spec.iter().copied().collect()
}

/// Whole-spectrogram mean/std normalization.
pub fn normalize(spec: &Array2<f32>) -> Array2<f32> {
    let mean = spec.mean().unwrap_or(0.0);
    let std = spec.std(0.0);
    let std = if std < 1e-6 { 1.0 } else { std };

    spec.mapv(|x| (x - mean) / std)
}
