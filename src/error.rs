#[derive(thiserror::Error, Debug)]
pub enum InferenceError {
    /// Invalid configuration. Fatal at orchestration entry.
    #[error("invalid parameter: {0}")]
    Parameter(String),

    /// A connected component is missing an expected neighbor. Recoverable:
    /// the component is skipped with a warning.
    #[error("malformed connected component: {0}")]
    GraphShape(String),

    /// NaN/Inf in a factor table or a message that underflowed to all-zero.
    /// Recoverable: inference on the component is aborted with a warning.
    #[error("numeric failure during belief propagation: {0}")]
    Numeric(String),
}
