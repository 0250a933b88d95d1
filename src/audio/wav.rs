//! WAV file loading for offline classification and policy calibration.

use std::path::Path;

use tracing::debug;

use super::framer::FrameAssembler;
use super::AudioFrame;
use crate::error::{AppError, Result};

/// Load a WAV file as mono f32 samples plus its sample rate.
pub fn load_wav(path: &Path) -> Result<(Vec<f32>, u32)> {
    let reader = hound::WavReader::open(path)
        .map_err(|e| AppError::Audio(format!("failed to open {}: {}", path.display(), e)))?;
    let spec = reader.spec();
    let channels = spec.channels.max(1) as usize;

    let samples: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Float => reader
            .into_samples::<f32>()
            .collect::<std::result::Result<_, _>>()
            .map_err(|e| AppError::Audio(format!("bad sample in {}: {}", path.display(), e)))?,
        hound::SampleFormat::Int => {
            let scale = (1i64 << (spec.bits_per_sample - 1)) as f32;
            reader
                .into_samples::<i32>()
                .map(|s| s.map(|v| v as f32 / scale))
                .collect::<std::result::Result<_, _>>()
                .map_err(|e| AppError::Audio(format!("bad sample in {}: {}", path.display(), e)))?
        }
    };

    let mono = if channels > 1 {
        samples
            .chunks(channels)
            .map(|frame| frame.iter().sum::<f32>() / channels as f32)
            .collect()
    } else {
        samples
    };

    debug!(
        "loaded {}: {} samples at {}Hz ({} channels)",
        path.display(),
        mono.len(),
        spec.sample_rate,
        channels
    );
    Ok((mono, spec.sample_rate))
}

/// Slice a WAV file into the frames a live session would see.
pub fn wav_frames(
    path: &Path,
    target_rate: u32,
    window: usize,
    overlap: f32,
) -> Result<Vec<AudioFrame>> {
    let (samples, source_rate) = load_wav(path)?;
    let mut assembler = FrameAssembler::new(source_rate, target_rate, window, overlap)?;
    Ok(assembler.push(&samples))
}
