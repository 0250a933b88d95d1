use thiserror::Error;

pub type Result<T> = std::result::Result<T, AppError>;

/// Errors produced by the capture / classify / command pipeline.
#[derive(Debug, Error)]
pub enum AppError {
    /// Microphone access was denied, or no usable input device exists.
    #[error("microphone unavailable: {0}")]
    Permission(String),

    /// Model checkpoint or metadata could not be read or parsed.
    #[error("model load failed: {0}")]
    ModelLoad(String),

    /// The loaded model cannot drive this application (e.g. the label set
    /// is missing a required command word).
    #[error("unusable model configuration: {0}")]
    Configuration(String),

    /// A single classification cycle failed.
    #[error("classification failed: {0}")]
    Classification(String),

    /// A frame handed to the classifier does not match the model input.
    #[error("input frame has {got} samples, expected {expected}")]
    InputShape { expected: usize, got: usize },

    /// Audio file or stream problem outside the open-permission path.
    #[error("audio error: {0}")]
    Audio(String),
}

impl AppError {
    /// Whether this error ends a listening session.
    ///
    /// Errors raised while scoring one frame are recovered by skipping that
    /// cycle; everything that happens before frames flow (device access,
    /// model loading, policy resolution) leaves nothing to recover into.
    pub fn is_session_fatal(&self) -> bool {
        !matches!(
            self,
            AppError::Classification(_) | AppError::InputShape { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cycle_errors_are_recoverable() {
        assert!(!AppError::Classification("backend hiccup".into()).is_session_fatal());
        assert!(!AppError::InputShape { expected: 4, got: 2 }.is_session_fatal());
    }

    #[test]
    fn setup_errors_are_fatal() {
        assert!(AppError::Permission("denied".into()).is_session_fatal());
        assert!(AppError::ModelLoad("missing file".into()).is_session_fatal());
        assert!(AppError::Configuration("no stop label".into()).is_session_fatal());
    }

    #[test]
    fn input_shape_reports_both_sizes() {
        let err = AppError::InputShape { expected: 16000, got: 512 };
        let text = err.to_string();
        assert!(text.contains("16000"));
        assert!(text.contains("512"));
    }
}
