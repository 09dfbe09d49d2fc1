use thiserror::Error;

/// Failures surfaced by the inference gateway.
///
/// `Timeout` and `RateLimited` are transient and retried inside the gateway;
/// the other variants are permanent and surface immediately.
#[derive(Debug, Error)]
pub enum InferenceError {
    #[error("inference request timed out")]
    Timeout,

    #[error("inference service rate limited the request")]
    RateLimited,

    #[error("inference service rejected the credential: {0}")]
    AuthRejected(String),

    #[error("inference response was malformed: {0}")]
    MalformedResponse(String),

    #[error("inference transport failed: {0}")]
    Transport(String),
}

impl InferenceError {
    /// Transient failures are retried with backoff; permanent ones are not.
    pub fn is_transient(&self) -> bool {
        matches!(self, InferenceError::Timeout | InferenceError::RateLimited)
    }

    /// Whether the external service demonstrably saw the request. Used to
    /// decide if a token-usage row should be written for a failed call.
    pub fn reached_service(&self) -> bool {
        matches!(
            self,
            InferenceError::RateLimited
                | InferenceError::AuthRejected(_)
                | InferenceError::MalformedResponse(_)
        )
    }
}

/// Pipeline-level error taxonomy.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("segment with range {start} - {end} already recorded")]
    DuplicateSegment { start: String, end: String },

    #[error("analysis stage {stage} failed for batch {batch_id}: {cause}")]
    StageFailure {
        stage: AnalysisStage,
        batch_id: String,
        cause: String,
    },

    #[error(transparent)]
    Inference(#[from] InferenceError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnalysisStage {
    Transcription,
    CardGeneration,
}

impl std::fmt::Display for AnalysisStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AnalysisStage::Transcription => write!(f, "1 (transcription)"),
            AnalysisStage::CardGeneration => write!(f, "2 (card generation)"),
        }
    }
}
