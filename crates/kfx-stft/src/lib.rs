mod engine;
mod window;

pub use engine::StftWorkerPool;
pub use window::hann_table;
