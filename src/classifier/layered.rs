//! Dense layered model over log-spectrogram features.
//!
//! The checkpoint is a JSON description of the feature front-end plus a
//! stack of dense layers (row-major weights, bias, activation). Exported
//! audio command models of the fixed-grid spectrogram family map directly
//! onto it.

use ndarray::{Array1, Array2};
use serde::Deserialize;
use tracing::info;

use super::spectrogram::{self, SpectrogramConfig};
use super::{Classifier, ModelMetadata, ModelSource};
use crate::error::{AppError, Result};

/// Activation applied after a dense layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
enum Activation {
    Relu,
    Softmax,
    Linear,
}

/// One dense layer as serialized in the checkpoint.
#[derive(Debug, Deserialize)]
struct LayerSpec {
    /// Row-major weight matrix, one row per output unit.
    weights: Vec<Vec<f32>>,
    bias: Vec<f32>,
    activation: Activation,
}

/// Checkpoint file layout.
#[derive(Debug, Deserialize)]
struct CheckpointSpec {
    #[serde(default)]
    features: SpectrogramConfig,
    #[serde(default)]
    normalize: bool,
    layers: Vec<LayerSpec>,
}

struct DenseLayer {
    weights: Array2<f32>,
    bias: Array1<f32>,
    activation: Activation,
}

impl DenseLayer {
    fn forward(&self, input: &Array1<f32>) -> Array1<f32> {
        let mut out = self.weights.dot(input) + &self.bias;
        match self.activation {
            Activation::Relu => out.mapv_inplace(|v| v.max(0.0)),
            Activation::Softmax => softmax(&mut out),
            Activation::Linear => {}
        }
        out
    }
}

fn softmax(scores: &mut Array1<f32>) {
    // Max subtraction keeps the exponentials finite.
    let max = scores.iter().cloned().fold(f32::NEG_INFINITY, f32::max);
    scores.mapv_inplace(|v| (v - max).exp());
    let sum = scores.sum();
    if sum > 0.0 {
        scores.mapv_inplace(|v| v / sum);
    }
}

/// Classifier backed by a dense layer stack over spectrogram features.
pub struct LayeredClassifier {
    labels: Vec<String>,
    sample_rate: u32,
    features: SpectrogramConfig,
    normalize: bool,
    layers: Vec<DenseLayer>,
}

impl LayeredClassifier {
    /// Read and validate the checkpoint/metadata pair.
    ///
    /// Any failure here is terminal for the backend: no classifier value
    /// exists until a model loads cleanly.
    pub fn load(source: &ModelSource) -> Result<Self> {
        info!(
            checkpoint = %source.checkpoint.display(),
            metadata = %source.metadata.display(),
            "loading layered model"
        );
        let metadata = ModelMetadata::load(&source.metadata)?;
        let raw = std::fs::read_to_string(&source.checkpoint).map_err(|e| {
            AppError::ModelLoad(format!(
                "failed to read checkpoint {}: {}",
                source.checkpoint.display(),
                e
            ))
        })?;
        let spec: CheckpointSpec = serde_json::from_str(&raw).map_err(|e| {
            AppError::ModelLoad(format!(
                "failed to parse checkpoint {}: {}",
                source.checkpoint.display(),
                e
            ))
        })?;
        Self::from_parts(spec, metadata)
    }

    fn from_parts(spec: CheckpointSpec, metadata: ModelMetadata) -> Result<Self> {
        if spec.layers.is_empty() {
            return Err(AppError::ModelLoad("checkpoint has no layers".into()));
        }
        if spec.features.frames == 0 || spec.features.bins == 0 {
            return Err(AppError::ModelLoad(
                "feature grid must have frames and bins".into(),
            ));
        }
        if spec.features.bins > spec.features.n_fft / 2 + 1 {
            return Err(AppError::ModelLoad(format!(
                "{} bins exceed the {}-point FFT ({} available)",
                spec.features.bins,
                spec.features.n_fft,
                spec.features.n_fft / 2 + 1
            )));
        }

        let mut layers = Vec::with_capacity(spec.layers.len());
        let mut fan_in = spec.features.feature_len();
        for (idx, layer) in spec.layers.into_iter().enumerate() {
            let fan_out = layer.weights.len();
            if fan_out == 0 {
                return Err(AppError::ModelLoad(format!("layer {} has no rows", idx)));
            }
            if layer.bias.len() != fan_out {
                return Err(AppError::ModelLoad(format!(
                    "layer {} has {} bias values for {} rows",
                    idx,
                    layer.bias.len(),
                    fan_out
                )));
            }
            let mut flat = Vec::with_capacity(fan_out * fan_in);
            for (row_idx, row) in layer.weights.iter().enumerate() {
                if row.len() != fan_in {
                    return Err(AppError::ModelLoad(format!(
                        "layer {} row {} has {} weights, expected {}",
                        idx,
                        row_idx,
                        row.len(),
                        fan_in
                    )));
                }
                flat.extend_from_slice(row);
            }
            let weights = Array2::from_shape_vec((fan_out, fan_in), flat)
                .map_err(|e| AppError::ModelLoad(format!("layer {}: {}", idx, e)))?;
            layers.push(DenseLayer {
                weights,
                bias: Array1::from_vec(layer.bias),
                activation: layer.activation,
            });
            fan_in = fan_out;
        }

        if fan_in != metadata.word_labels.len() {
            return Err(AppError::ModelLoad(format!(
                "model emits {} scores for {} labels",
                fan_in,
                metadata.word_labels.len()
            )));
        }

        Ok(Self {
            labels: metadata.word_labels,
            sample_rate: metadata.sample_rate_hz,
            features: spec.features,
            normalize: spec.normalize,
            layers,
        })
    }
}

impl Classifier for LayeredClassifier {
    fn name(&self) -> &str {
        "layered"
    }

    fn labels(&self) -> &[String] {
        &self.labels
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn expected_samples(&self) -> usize {
        self.features.expected_samples()
    }

    fn classify(&self, frame: &[f32]) -> Result<Vec<f32>> {
        let expected = self.expected_samples();
        if frame.len() < expected {
            return Err(AppError::InputShape {
                expected,
                got: frame.len(),
            });
        }
        // Over-long frames keep their leading window, the slice an exported
        // model takes from over-captured input.
        let window = &frame[..expected];

        let features = spectrogram::features(window, &self.features, self.normalize);
        let mut x = Array1::from_vec(features);
        for layer in &self.layers {
            x = layer.forward(&x);
        }
        if x.iter().any(|v| !v.is_finite()) {
            return Err(AppError::Classification(
                "model produced non-finite scores".into(),
            ));
        }
        Ok(x.to_vec())
    }
}
