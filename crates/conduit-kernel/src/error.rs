//! Kernel-specific error types.

use conduit_types::ConduitError;
use thiserror::Error;

/// Kernel error type wrapping `ConduitError` with bootstrap context.
#[derive(Error, Debug)]
pub enum KernelError {
    #[error(transparent)]
    Conduit(#[from] ConduitError),

    /// The kernel could not be assembled from its configuration.
    #[error("Boot failed: {0}")]
    BootFailed(String),
}

impl KernelError {
    /// The underlying taxonomy error, if any.
    pub fn as_conduit(&self) -> Option<&ConduitError> {
        match self {
            KernelError::Conduit(e) => Some(e),
            KernelError::BootFailed(_) => None,
        }
    }
}

/// Alias for kernel results.
pub type KernelResult<T> = Result<T, KernelError>;
