mod datum;
mod store;

pub use datum::{AudioDatum, StorageId};
pub use store::IngestionStore;
