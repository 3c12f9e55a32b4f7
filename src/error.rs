// src/error.rs
use thiserror::Error;

/// Error taxonomy for the prediction core.
///
/// Recovery semantics:
/// - `InvalidRecord` never aborts a batch: the offending record is skipped and
///   reported alongside the successful results.
/// - `InsufficientData` leaves any previously trained model serving.
/// - `CorruptArtifact` degrades startup to the untrained state, but is surfaced
///   as a hard error on an explicit operator-requested load.
/// - Nothing is retried automatically here; retry policy belongs to the caller.
#[derive(Debug, Error)]
pub enum PredictionError {
    #[error("solicitud {id}: {reason}")]
    InvalidRecord { id: i64, reason: String },

    #[error("no trained model is available; train or load one first")]
    ModelNotTrained,

    #[error("insufficient training data: got {got} samples, need at least {min}")]
    InsufficientData { got: usize, min: usize },

    #[error("corrupt model artifact: {0}")]
    CorruptArtifact(String),

    #[error("probability {0} is outside the [0, 1] range")]
    OutOfRange(f64),

    #[error("training did not finish within {0} seconds")]
    TrainingTimeout(u64),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl PredictionError {
    pub fn invalid_record(id: i64, reason: impl Into<String>) -> Self {
        Self::InvalidRecord {
            id,
            reason: reason.into(),
        }
    }
}
