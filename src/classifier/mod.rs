//! Audio command classification backends.
//!
//! A backend only exists fully loaded: construction is where model files are
//! read and validated, so any [`Classifier`] value is always able to score
//! frames. Loading has no fallback; a broken model is a hard error, never a
//! silently degraded session.

pub mod layered;
pub mod spectrogram;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{AppError, Result};

pub use layered::LayeredClassifier;
pub use spectrogram::{log_spectrogram, SpectrogramConfig};

/// Interface every classification backend provides.
pub trait Classifier: Send + Sync {
    /// Backend name for logging.
    fn name(&self) -> &str;

    /// Ordered label set, fixed at load time.
    fn labels(&self) -> &[String];

    /// Sample rate the model was trained at, in Hz.
    fn sample_rate(&self) -> u32;

    /// Exact number of mono samples one classification consumes.
    fn expected_samples(&self) -> usize;

    /// Score one frame: one probability per label, index-aligned with
    /// `labels()`.
    fn classify(&self, frame: &[f32]) -> Result<Vec<f32>>;
}

/// Where a pretrained model lives: a checkpoint (topology plus weights) and
/// a metadata sidecar carrying the ordered label set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelSource {
    pub checkpoint: PathBuf,
    pub metadata: PathBuf,
}

impl ModelSource {
    /// Conventional export layout: `<dir>/model.json` plus
    /// `<dir>/metadata.json`.
    pub fn from_dir<P: Into<PathBuf>>(dir: P) -> Self {
        let dir = dir.into();
        Self {
            checkpoint: dir.join("model.json"),
            metadata: dir.join("metadata.json"),
        }
    }
}

/// Metadata sidecar shipped with a model. Field names follow the exported
/// format of trainable audio command models.
#[derive(Debug, Clone, Deserialize)]
pub struct ModelMetadata {
    #[serde(rename = "wordLabels")]
    pub word_labels: Vec<String>,
    #[serde(rename = "sampleRateHz", default = "default_sample_rate")]
    pub sample_rate_hz: u32,
}

fn default_sample_rate() -> u32 {
    16_000
}

impl ModelMetadata {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            AppError::ModelLoad(format!("failed to read metadata {}: {}", path.display(), e))
        })?;
        let metadata: ModelMetadata = serde_json::from_str(&raw).map_err(|e| {
            AppError::ModelLoad(format!("failed to parse metadata {}: {}", path.display(), e))
        })?;
        if metadata.word_labels.len() < 2 {
            return Err(AppError::Configuration(format!(
                "model metadata lists {} label(s), need at least 2",
                metadata.word_labels.len()
            )));
        }
        Ok(metadata)
    }
}

/// Load the production backend from a model source.
pub fn load_classifier(source: &ModelSource) -> Result<Arc<dyn Classifier>> {
    let classifier = LayeredClassifier::load(source)?;
    info!(
        backend = classifier.name(),
        labels = ?classifier.labels(),
        sample_rate = classifier.sample_rate(),
        expected_samples = classifier.expected_samples(),
        "classifier loaded"
    );
    Ok(Arc::new(classifier))
}
