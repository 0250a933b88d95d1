//! Frame assembly: device-rate chunks in, fixed-length model frames out.
//!
//! Capture delivers whatever chunk sizes the device produces. The model
//! wants exact windows at its own rate, overlapping so a command spoken
//! across a window boundary still lands fully inside some frame.

use rubato::{FftFixedInOut, Resampler};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::AudioFrame;
use crate::error::{AppError, Result};

/// Tuning for a live listening pipeline.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ListenConfig {
    /// Fraction of each analysis window shared with the next (0.0 to 0.95).
    pub overlap: f32,
    /// Assembled frames buffered ahead of the classifier. Capture drops
    /// chunks once this backs up, so small values keep commands close to
    /// real time instead of queueing inference work.
    pub frame_capacity: usize,
}

impl Default for ListenConfig {
    fn default() -> Self {
        Self {
            overlap: 0.5,      // half-overlapping windows
            frame_capacity: 2, // one frame in flight, one waiting
        }
    }
}

impl ListenConfig {
    pub fn with_overlap(mut self, overlap: f32) -> Self {
        self.overlap = overlap.clamp(0.0, 0.95);
        self
    }

    pub fn with_frame_capacity(mut self, capacity: usize) -> Self {
        self.frame_capacity = capacity.max(1);
        self
    }
}

/// Streaming window assembler.
///
/// Chunks pass through an optional resampler, then the continuous signal is
/// sliced into windows of `window` samples advancing by `hop` samples.
pub struct FrameAssembler {
    resampler: Option<FftFixedInOut<f32>>,
    /// Staging for the resampler, which consumes fixed-size blocks.
    staging: Vec<f32>,
    /// Continuous signal at the target rate, awaiting windowing.
    pending: Vec<f32>,
    window: usize,
    hop: usize,
}

impl FrameAssembler {
    /// `overlap` is the fraction of each window shared with the next:
    /// 0.0 gives disjoint windows, 0.5 half-overlapping ones.
    pub fn new(source_rate: u32, target_rate: u32, window: usize, overlap: f32) -> Result<Self> {
        if window == 0 {
            return Err(AppError::Configuration("window must be non-empty".into()));
        }
        let overlap = overlap.clamp(0.0, 0.95);
        let hop = ((window as f32) * (1.0 - overlap)).round().max(1.0) as usize;

        let resampler = if source_rate == target_rate {
            None
        } else {
            let resampler =
                FftFixedInOut::<f32>::new(source_rate as usize, target_rate as usize, 1024, 1)
                    .map_err(|e| {
                        AppError::Configuration(format!(
                            "cannot resample {}Hz to {}Hz: {}",
                            source_rate, target_rate, e
                        ))
                    })?;
            debug!(
                "resampling {}Hz -> {}Hz in blocks of {}",
                source_rate,
                target_rate,
                resampler.input_frames_next()
            );
            Some(resampler)
        };

        Ok(Self {
            resampler,
            staging: Vec::new(),
            pending: Vec::new(),
            window,
            hop,
        })
    }

    pub fn window(&self) -> usize {
        self.window
    }

    pub fn hop(&self) -> usize {
        self.hop
    }

    /// Feed one chunk; returns every complete frame it unlocked, oldest
    /// first. Chunk boundaries never affect the frames produced.
    pub fn push(&mut self, chunk: &[f32]) -> Vec<AudioFrame> {
        match &mut self.resampler {
            None => self.pending.extend_from_slice(chunk),
            Some(resampler) => {
                self.staging.extend_from_slice(chunk);
                loop {
                    let block = resampler.input_frames_next();
                    if self.staging.len() < block {
                        break;
                    }
                    let input: Vec<f32> = self.staging.drain(..block).collect();
                    match resampler.process(&[input], None) {
                        Ok(mut output) => {
                            if let Some(channel) = output.pop() {
                                self.pending.extend(channel);
                            }
                        }
                        Err(e) => warn!("resample failed, block dropped: {}", e),
                    }
                }
            }
        }

        let mut frames = Vec::new();
        while self.pending.len() >= self.window {
            frames.push(self.pending[..self.window].to_vec());
            self.pending.drain(..self.hop);
        }
        frames
    }
}

/// Adapt a chunk receiver into a frame receiver.
///
/// Frames are forwarded with a blocking send, so the bounded frame channel
/// is what paces the pipeline: while the consumer is busy, chunks pile up
/// behind it and the capture callback starts dropping. The task ends when
/// either side of the pipe goes away.
pub fn spawn_frame_pump(
    mut chunks: mpsc::Receiver<Vec<f32>>,
    mut assembler: FrameAssembler,
    capacity: usize,
) -> (mpsc::Receiver<AudioFrame>, JoinHandle<()>) {
    let (frame_tx, frame_rx) = mpsc::channel(capacity.max(1));
    let handle = tokio::spawn(async move {
        while let Some(chunk) = chunks.recv().await {
            for frame in assembler.push(&chunk) {
                if frame_tx.send(frame).await.is_err() {
                    debug!("frame consumer gone, pump exiting");
                    return;
                }
            }
        }
        debug!("chunk source closed, pump exiting");
    });
    (frame_rx, handle)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn half_overlap_windows() {
        let mut assembler = FrameAssembler::new(16_000, 16_000, 4, 0.5).unwrap();
        assert_eq!(assembler.hop(), 2);

        let samples: Vec<f32> = (0..10).map(|i| i as f32).collect();
        let frames = assembler.push(&samples);

        assert_eq!(
            frames,
            vec![
                vec![0.0, 1.0, 2.0, 3.0],
                vec![2.0, 3.0, 4.0, 5.0],
                vec![4.0, 5.0, 6.0, 7.0],
                vec![6.0, 7.0, 8.0, 9.0],
            ]
        );
    }

    #[test]
    fn zero_overlap_windows_are_disjoint() {
        let mut assembler = FrameAssembler::new(16_000, 16_000, 3, 0.0).unwrap();
        let frames = assembler.push(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0]);

        assert_eq!(frames, vec![vec![1.0, 2.0, 3.0], vec![4.0, 5.0, 6.0]]);
    }

    #[test]
    fn chunk_boundaries_do_not_matter() {
        let samples: Vec<f32> = (0..64).map(|i| (i as f32 * 0.1).sin()).collect();

        let mut whole = FrameAssembler::new(8_000, 8_000, 16, 0.5).unwrap();
        let expected = whole.push(&samples);

        let mut trickle = FrameAssembler::new(8_000, 8_000, 16, 0.5).unwrap();
        let mut got = Vec::new();
        for sample in &samples {
            got.extend(trickle.push(std::slice::from_ref(sample)));
        }

        assert_eq!(expected, got);
    }

    #[test]
    fn incomplete_window_stays_pending() {
        let mut assembler = FrameAssembler::new(16_000, 16_000, 8, 0.5).unwrap();
        assert!(assembler.push(&[0.0; 7]).is_empty());
        // One more sample completes the window.
        assert_eq!(assembler.push(&[0.0]).len(), 1);
    }

    #[test]
    fn resampling_halves_the_sample_count() {
        let mut assembler = FrameAssembler::new(32_000, 16_000, 512, 0.0).unwrap();

        // 2 seconds of a 440Hz tone at 32kHz.
        let samples: Vec<f32> = (0..64_000)
            .map(|i| (2.0 * std::f32::consts::PI * 440.0 * i as f32 / 32_000.0).sin())
            .collect();
        let frames = assembler.push(&samples);

        // Roughly one second of 16kHz output; block staging may hold back
        // a tail shorter than one resampler block.
        assert!(frames.len() >= 60, "got {} frames", frames.len());
        assert!(frames.iter().all(|f| f.len() == 512));
    }

    #[test]
    fn zero_window_is_rejected() {
        assert!(matches!(
            FrameAssembler::new(16_000, 16_000, 0, 0.5),
            Err(AppError::Configuration(_))
        ));
    }

    #[test]
    fn listen_config_defaults_and_clamping() {
        let config = ListenConfig::default();
        assert_eq!(config.overlap, 0.5);
        assert_eq!(config.frame_capacity, 2);

        let custom = ListenConfig::default()
            .with_overlap(1.2)
            .with_frame_capacity(0);
        assert_eq!(custom.overlap, 0.95);
        assert_eq!(custom.frame_capacity, 1);
    }

    #[tokio::test]
    async fn pump_forwards_frames_until_source_closes() {
        let (chunk_tx, chunk_rx) = mpsc::channel(8);
        let assembler = FrameAssembler::new(16_000, 16_000, 4, 0.0).unwrap();
        let (mut frames, pump) = spawn_frame_pump(chunk_rx, assembler, 4);

        chunk_tx.send(vec![1.0, 2.0]).await.unwrap();
        chunk_tx.send(vec![3.0, 4.0, 5.0]).await.unwrap();
        chunk_tx.send(vec![6.0, 7.0, 8.0]).await.unwrap();
        drop(chunk_tx);

        assert_eq!(frames.recv().await, Some(vec![1.0, 2.0, 3.0, 4.0]));
        assert_eq!(frames.recv().await, Some(vec![5.0, 6.0, 7.0, 8.0]));
        assert_eq!(frames.recv().await, None);
        pump.await.unwrap();
    }
}
