//! The opaque transport boundary (spec §6). The framing itself — RPC
//! codec, retries, TLS — is a collaborator's concern and out of scope
//! here; this crate only fixes the shape of the call.

use crate::wire::{FrameBatchRequest, FrameBatchResponse, Segment};
use kfx_core::PipelineError;

/// Implemented by whatever carries bytes between a sink and the station.
/// `send_segment` is synchronous and non-idempotent; the receiver is
/// expected to dedup on `(track, start_sample)` since retries may
/// resend an already-delivered segment.
pub trait Transport: Send + Sync {
    fn send_segment(&self, payload: &Segment) -> Result<(), PipelineError>;

    /// Reset any transport-level state. Idempotent.
    fn reconnect(&self);

    fn get_next_audio_events(
        &self,
        request: FrameBatchRequest,
    ) -> Result<FrameBatchResponse, PipelineError>;
}

/// Maps an ingestion-side parse failure to the RPC error code a real
/// transport would report back to the sender (spec §6, Error codes).
pub fn map_ingestion_error(err: &PipelineError) -> &'static str {
    match err {
        PipelineError::ResourceExhausted(_) => "resource-exhausted",
        PipelineError::InvalidArgument(_) => "invalid-argument",
        PipelineError::TransientTransport(_) => "unavailable",
        PipelineError::PermanentInternal(_) => "internal",
        PipelineError::ConsumerCancelled => "cancelled",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_codes_match_taxonomy() {
        assert_eq!(
            map_ingestion_error(&PipelineError::ResourceExhausted("x".into())),
            "resource-exhausted"
        );
        assert_eq!(
            map_ingestion_error(&PipelineError::InvalidArgument("x".into())),
            "invalid-argument"
        );
    }
}
