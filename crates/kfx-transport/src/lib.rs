mod loopback;
mod transport;
mod wire;

pub use loopback::LoopbackTransport;
pub use transport::{map_ingestion_error, Transport};
pub use wire::{FrameBatchRequest, FrameBatchResponse, Segment, WireFrame};
