pub type TesseraResult<T> = Result<T, TesseraError>;

/// Error type shared by every engine component.
///
/// Contract violations are reported as [`TesseraError::Invariant`] values rather than panics so
/// callers (and tests) can observe them. The engine never tries to recover from one.
#[derive(thiserror::Error, Debug)]
pub enum TesseraError {
    /// Bad configuration or malformed graph.
    #[error("validation error: {0}")]
    Validation(String),

    /// A broken engine contract (read before write, double release, pool mismatch, ...).
    #[error("invariant violated: {0}")]
    Invariant(String),

    /// Failure reported by the accelerator collaborator.
    #[error("device error: {0}")]
    Device(String),

    /// Failure reported by an operation or another collaborator.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl TesseraError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn invariant(msg: impl Into<String>) -> Self {
        Self::Invariant(msg.into())
    }

    pub fn device(msg: impl Into<String>) -> Self {
        Self::Device(msg.into())
    }

    /// Return `true` for contract violations.
    pub fn is_invariant(&self) -> bool {
        matches!(self, Self::Invariant(_))
    }
}
