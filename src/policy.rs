//! Decision policy: one probability vector in, at most one command out.

use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};

const START_LABEL: &str = "start";
const STOP_LABEL: &str = "stop";

/// Discrete command derived from one classification cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Start,
    Stop,
}

/// Strategy for turning scores into a command.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PolicyKind {
    /// Highest-scoring label wins regardless of magnitude.
    Argmax,
    /// A command label must strictly exceed the configured cutoff.
    #[default]
    Threshold,
}

/// Decision configuration. `threshold` is only consulted by
/// [`PolicyKind::Threshold`].
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PolicyConfig {
    pub kind: PolicyKind,
    pub threshold: f32,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            kind: PolicyKind::Threshold,
            threshold: 0.75,
        }
    }
}

impl PolicyConfig {
    pub fn argmax() -> Self {
        Self {
            kind: PolicyKind::Argmax,
            threshold: 0.0,
        }
    }

    pub fn threshold(threshold: f32) -> Self {
        Self {
            kind: PolicyKind::Threshold,
            threshold: threshold.clamp(0.0, 1.0),
        }
    }
}

/// A decision policy with the command labels already located in a model's
/// label set.
///
/// Resolution happens once, up front: a model whose labels cannot express
/// start and stop is rejected before any listening begins. After that,
/// `decide` is infallible and cheap enough to run every cycle.
#[derive(Debug, Clone)]
pub struct CommandPolicy {
    kind: PolicyKind,
    threshold: f32,
    start_idx: usize,
    stop_idx: usize,
}

impl CommandPolicy {
    /// Locate the command labels (case-insensitive) in `labels`.
    pub fn resolve(config: &PolicyConfig, labels: &[String]) -> Result<Self> {
        let find = |wanted: &str| {
            labels
                .iter()
                .position(|label| label.eq_ignore_ascii_case(wanted))
                .ok_or_else(|| {
                    AppError::Configuration(format!(
                        "label {:?} not present in model labels {:?}",
                        wanted, labels
                    ))
                })
        };
        Ok(Self {
            kind: config.kind,
            threshold: config.threshold,
            start_idx: find(START_LABEL)?,
            stop_idx: find(STOP_LABEL)?,
        })
    }

    /// Map one score vector to a command.
    ///
    /// Background noise, unknown labels, and sub-threshold confidence all
    /// yield `None`; nothing downstream changes on those cycles. Start is
    /// checked before stop when both clear the threshold.
    pub fn decide(&self, scores: &[f32]) -> Option<Command> {
        if scores.len() <= self.start_idx.max(self.stop_idx) {
            return None;
        }
        match self.kind {
            PolicyKind::Argmax => {
                let best = argmax(scores)?;
                if best == self.start_idx {
                    Some(Command::Start)
                } else if best == self.stop_idx {
                    Some(Command::Stop)
                } else {
                    None
                }
            }
            PolicyKind::Threshold => {
                if scores[self.start_idx] > self.threshold {
                    Some(Command::Start)
                } else if scores[self.stop_idx] > self.threshold {
                    Some(Command::Stop)
                } else {
                    None
                }
            }
        }
    }
}

/// Index of the largest score. Ties keep the earliest index.
fn argmax(scores: &[f32]) -> Option<usize> {
    let mut best: Option<(usize, f32)> = None;
    for (idx, &score) in scores.iter().enumerate() {
        match best {
            Some((_, top)) if score <= top => {}
            _ => best = Some((idx, score)),
        }
    }
    best.map(|(idx, _)| idx)
}
