//! Microphone capture.
//!
//! [`MicSource::open`] builds a cpal input stream that downmixes to mono f32
//! and hands chunks to a bounded channel. The real-time callback never
//! blocks: when the consumer falls behind, chunks are dropped at the
//! producer and the pipeline catches up on the next one.

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleFormat, StreamConfig};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::error::{AppError, Result};

/// Capture tuning. `chunk_capacity` bounds the channel between the audio
/// callback and the consumer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptureConfig {
    /// Input device name; `None` selects the system default.
    pub device: Option<String>,
    /// Chunk channel capacity before the callback starts dropping.
    pub chunk_capacity: usize,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            device: None,
            chunk_capacity: 32,
        }
    }
}

/// An input device as shown in a device picker.
#[derive(Debug, Clone)]
pub struct InputDevice {
    pub name: String,
    pub is_default: bool,
}

/// An open microphone. Owns the live cpal stream; dropping or closing it
/// releases the device and ends the chunk channel.
pub struct MicSource {
    stream: Option<cpal::Stream>,
    device_name: String,
    sample_rate: u32,
    audio_level: Arc<Mutex<f32>>,
}

impl MicSource {
    /// Enumerate input devices.
    pub fn list_devices() -> Result<Vec<InputDevice>> {
        let host = cpal::default_host();
        let default_name = host
            .default_input_device()
            .and_then(|d| d.name().ok())
            .unwrap_or_default();

        let devices: Vec<InputDevice> = host
            .input_devices()
            .map_err(|e| AppError::Permission(e.to_string()))?
            .filter_map(|device| {
                let name = device.name().ok()?;
                Some(InputDevice {
                    is_default: name == default_name,
                    name,
                })
            })
            .collect();

        Ok(devices)
    }

    /// Open the microphone and start capturing.
    ///
    /// Returns the source (which owns the live stream) and the chunk
    /// receiver. Fails with [`AppError::Permission`] when access is denied
    /// or no usable device exists; callers surface that, they never retry
    /// silently.
    pub fn open(config: &CaptureConfig) -> Result<(MicSource, mpsc::Receiver<Vec<f32>>)> {
        let host = cpal::default_host();

        let device = if let Some(name) = &config.device {
            host.input_devices()
                .map_err(|e| AppError::Permission(e.to_string()))?
                .find(|d| d.name().map(|n| n == *name).unwrap_or(false))
                .ok_or_else(|| AppError::Permission(format!("device not found: {}", name)))?
        } else {
            host.default_input_device()
                .ok_or_else(|| AppError::Permission("no default input device".into()))?
        };
        let device_name = device.name().unwrap_or_else(|_| "unknown".into());

        let supported = device
            .default_input_config()
            .map_err(|e| AppError::Permission(e.to_string()))?;
        let sample_rate = supported.sample_rate().0;
        let channels = supported.channels().max(1) as usize;
        info!(
            "capture config: {:?}, {}Hz, {} channels, {:?}",
            device_name,
            sample_rate,
            channels,
            supported.sample_format()
        );

        let (chunk_tx, chunk_rx) = mpsc::channel(config.chunk_capacity.max(1));
        let audio_level = Arc::new(Mutex::new(0.0f32));
        let stream_config: StreamConfig = supported.clone().into();

        let stream = match supported.sample_format() {
            SampleFormat::F32 => build_stream::<f32>(
                &device,
                &stream_config,
                channels,
                chunk_tx,
                Arc::clone(&audio_level),
                |s| s,
            )?,
            SampleFormat::I16 => build_stream::<i16>(
                &device,
                &stream_config,
                channels,
                chunk_tx,
                Arc::clone(&audio_level),
                |s| s as f32 / 32768.0,
            )?,
            SampleFormat::U16 => build_stream::<u16>(
                &device,
                &stream_config,
                channels,
                chunk_tx,
                Arc::clone(&audio_level),
                |s| s as f32 / 32768.0 - 1.0,
            )?,
            other => {
                return Err(AppError::Permission(format!(
                    "unsupported sample format {:?}",
                    other
                )))
            }
        };

        stream
            .play()
            .map_err(|e| AppError::Permission(e.to_string()))?;
        info!("capture started");

        Ok((
            MicSource {
                stream: Some(stream),
                device_name,
                sample_rate,
                audio_level,
            },
            chunk_rx,
        ))
    }

    pub fn device_name(&self) -> &str {
        &self.device_name
    }

    /// Native rate of the device, in Hz. Resampling to the model rate is the
    /// frame assembler's job.
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Most recent RMS level, gain-boosted for metering.
    pub fn level(&self) -> f32 {
        *self.audio_level.lock()
    }

    pub fn is_open(&self) -> bool {
        self.stream.is_some()
    }

    /// Stop capturing and release the device. Closing an already closed
    /// source does nothing.
    pub fn close(&mut self) {
        if let Some(stream) = self.stream.take() {
            if let Err(e) = stream.pause() {
                warn!("failed to pause input stream: {}", e);
            }
            drop(stream);
            info!("capture closed");
        }
    }
}

impl Drop for MicSource {
    fn drop(&mut self) {
        self.close();
    }
}

fn build_stream<T>(
    device: &cpal::Device,
    config: &StreamConfig,
    channels: usize,
    chunk_tx: mpsc::Sender<Vec<f32>>,
    audio_level: Arc<Mutex<f32>>,
    to_f32: fn(T) -> f32,
) -> Result<cpal::Stream>
where
    T: cpal::SizedSample + Send + 'static,
{
    let err_fn = |err| warn!("audio stream error: {}", err);

    device
        .build_input_stream(
            config,
            move |data: &[T], _: &cpal::InputCallbackInfo| {
                let mono: Vec<f32> = if channels == 1 {
                    data.iter().map(|&s| to_f32(s)).collect()
                } else {
                    data.chunks(channels)
                        .map(|frame| {
                            frame.iter().map(|&s| to_f32(s)).sum::<f32>() / channels as f32
                        })
                        .collect()
                };

                // Calculate audio level (RMS) with gain boost for metering
                let sum: f32 = mono.iter().map(|s| s * s).sum();
                let rms = (sum / mono.len().max(1) as f32).sqrt();
                *audio_level.lock() = (rms * 10.0).sqrt().min(1.0);

                // try_send keeps the callback real-time safe; a full channel
                // means the consumer is saturated and this chunk is dropped.
                let _ = chunk_tx.try_send(mono);
            },
            err_fn,
            None,
        )
        .map_err(|e| AppError::Permission(e.to_string()))
}
