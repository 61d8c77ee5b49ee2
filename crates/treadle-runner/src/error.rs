use thiserror::Error;
use treadle_abstraction::SessionError;

pub type RunnerResult<T> = std::result::Result<T, RunnerError>;

/// Errors produced by the training-loop runner and its collaborators.
#[derive(Debug, Error)]
pub enum RunnerError {
    /// The run needed state that was not there: uninitialized parameters
    /// with restore disabled, no checkpoint to restore, or a zero-step
    /// evaluation.
    #[error("precondition failed: {0}")]
    FailedPrecondition(String),

    /// A checkpoint could not be written, read, or verified.
    #[error("checkpoint error: {0}")]
    Checkpoint(String),

    /// The input feed ran out before the requested number of steps.
    #[error("input feed exhausted after {got} of {want} batches")]
    FeedExhausted { got: u64, want: u64 },

    /// A background worker thread reported an error or panicked.
    #[error("background worker failed: {0}")]
    Worker(anyhow::Error),

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
