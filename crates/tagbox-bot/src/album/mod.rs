//! Album (media group) reassembly.

mod batch;
mod collector;

pub use batch::{AlbumBatch, BatchStore, Snapshot};
pub use collector::{AlbumCollector, Collected};
