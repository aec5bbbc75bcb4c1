//! Chunk planning.
//!
//! Splits a transfer of known size into fixed-size parts, tracks per-part
//! completion as a bitmap, and feeds parts to workers (resume order included).

mod bitmap;
mod feed;
mod part;

pub use bitmap::PartBitmap;
pub use feed::PartFeed;
pub use part::{ChunkPlan, Part};
