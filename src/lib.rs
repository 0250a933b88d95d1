//! Core pipeline of a voice-controlled countdown timer.
//!
//! A listening session pulls fixed-length microphone frames, scores each one
//! with a pretrained audio command model, turns the scores into start/stop
//! commands, and applies them to a countdown timer that view layers observe
//! through broadcast events.
//!
//! The stages are deliberately separable: [`audio`] produces frames,
//! [`classifier`] scores them, [`policy`] decides, [`timer`] counts, and
//! [`controller`] runs the loop that strings them together one frame at a
//! time.

pub mod audio;
pub mod classifier;
pub mod controller;
pub mod error;
pub mod policy;
pub mod timer;

pub use audio::{
    open_frame_stream, AudioFrame, CaptureConfig, FrameAssembler, InputDevice, ListenConfig,
    MicSource,
};
pub use classifier::{load_classifier, Classifier, LayeredClassifier, ModelSource};
pub use controller::{Listener, SessionHandle, SessionStats};
pub use error::{AppError, Result};
pub use policy::{Command, CommandPolicy, PolicyConfig, PolicyKind};
pub use timer::{
    format_clock, Timer, TimerConfig, TimerEvent, TimerHandle, TimerPhase, TimerSnapshot,
};
