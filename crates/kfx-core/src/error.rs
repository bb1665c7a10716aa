//! Shared error taxonomy (spec §7).
//!
//! Every component boundary in the data plane returns one of these
//! variants instead of raising across a thread boundary.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PipelineError {
    /// A pool or bounded queue has no free slot left.
    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),

    /// The caller passed a payload whose declared shape contradicts its bytes.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A transport `send` failed; the caller should retry and may reconnect.
    #[error("transient transport failure: {0}")]
    TransientTransport(String),

    /// Unrecoverable initialization failure (e.g. FFT plan creation).
    #[error("internal failure: {0}")]
    PermanentInternal(String),

    /// The component is shutting down; the caller should stop looping.
    #[error("consumer cancelled")]
    ConsumerCancelled,
}

pub type PipelineResult<T> = Result<T, PipelineError>;
