/// Errors raised while resolving or evaluating an action head.
#[derive(Debug, thiserror::Error)]
pub enum HeadError {
    #[error("Expected {expected} action mask, got {got}")]
    UnexpectedMask {
        expected: &'static str,
        got: &'static str,
    },
    #[error("Ragged shape mismatch: {0}")]
    RaggedShape(String),
    #[error("Expected {expected} prior actions (one per actor), got {got}")]
    PriorActionCount { expected: usize, got: usize },
    #[error("Prior actions span [{min}, {max}], outside [0, {n_choice})")]
    PriorActionRange { min: i64, max: i64, n_choice: i64 },
    #[error("Invalid head configuration: {0}")]
    InvalidConfig(String),
    #[error(transparent)]
    Tensor(#[from] tch::TchError),
}
