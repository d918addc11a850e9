//! Kernel-specific error types.

use botnet_types::error::BotnetError;
use thiserror::Error;

/// Kernel error type wrapping BotnetError with kernel-specific context.
#[derive(Error, Debug)]
pub enum KernelError {
    /// A wrapped BotnetError.
    #[error(transparent)]
    Botnet(#[from] BotnetError),

    /// The node failed to boot.
    #[error("Boot failed: {0}")]
    BootFailed(String),
}

/// Alias for kernel results.
pub type KernelResult<T> = Result<T, KernelError>;
