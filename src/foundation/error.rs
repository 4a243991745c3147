pub type MixerResult<T> = Result<T, MixerError>;

#[derive(thiserror::Error, Debug)]
pub enum MixerError {
    /// A GPU-only operation was attempted off the execution context.
    #[error("invalid operation: {0}")]
    InvalidOperation(String),

    /// The hardware is missing a required capability.
    #[error("not supported: {0}")]
    NotSupported(String),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("gpu error: {0}")]
    Gpu(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl MixerError {
    pub fn invalid_operation(msg: impl Into<String>) -> Self {
        Self::InvalidOperation(msg.into())
    }

    pub fn not_supported(msg: impl Into<String>) -> Self {
        Self::NotSupported(msg.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn gpu(msg: impl Into<String>) -> Self {
        Self::Gpu(msg.into())
    }

    /// The canonical error for GPU calls issued from a foreign thread.
    pub(crate) fn off_context() -> Self {
        Self::invalid_operation("operation only valid on the gpu execution context")
    }
}

#[cfg(test)]
#[path = "../../tests/unit/foundation/error.rs"]
mod tests;
