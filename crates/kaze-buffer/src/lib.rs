//! Buffer pool management for KazeDB.
//!
//! This crate provides in-memory page caching with:
//! - Fixed-size buffer pool with configurable frame count
//! - LRU eviction that never selects a pinned frame
//! - Pin counting and latched dirty tracking for write-back

mod frame;
mod pool;
mod replacer;

pub use frame::{Frame, FrameId};
pub use pool::{BufferPool, EvictedPage};
pub use replacer::{LruReplacer, Replacer};
