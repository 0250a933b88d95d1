//! Audio input: microphone capture, resampling, and window assembly.

pub mod capture;
pub mod framer;
pub mod wav;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

pub use capture::{CaptureConfig, InputDevice, MicSource};
pub use framer::{spawn_frame_pump, FrameAssembler, ListenConfig};
pub use wav::{load_wav, wav_frames};

use crate::error::Result;

/// One fixed-length window of mono samples headed for classification.
pub type AudioFrame = Vec<f32>;

/// Open the microphone and adapt it into model-ready frames.
///
/// Wires [`MicSource::open`], a [`FrameAssembler`] from the device rate to
/// the model's rate and window, and [`spawn_frame_pump`] together. The mic
/// must outlive the stream: dropping it releases the device, which ends the
/// chunk channel and, in turn, the pump.
pub fn open_frame_stream(
    capture: &CaptureConfig,
    listen: &ListenConfig,
    target_rate: u32,
    window: usize,
) -> Result<(MicSource, mpsc::Receiver<AudioFrame>, JoinHandle<()>)> {
    let (mic, chunks) = MicSource::open(capture)?;
    let assembler = FrameAssembler::new(mic.sample_rate(), target_rate, window, listen.overlap)?;
    let (frames, pump) = spawn_frame_pump(chunks, assembler, listen.frame_capacity);
    Ok((mic, frames, pump))
}
