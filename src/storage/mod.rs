//! # Storage Layer
//!
//! Everything below the tree: the page file (an opaque container of
//! fixed-size pages addressed by `u32` page numbers) and the buffer pool
//! (a pinning frame cache that owns every open file). The index engine
//! never touches a file directly; all page access flows through
//! [`BufferPool`] and the pin-carrying [`PageGuard`] it hands out.
//!
//! The layering mirrors the data flow:
//!
//! ```text
//! BTreeIndex ──fetch/alloc──> BufferPool ──read/write──> PageFile
//!      ^                          │
//!      └───── PageGuard ──────────┘   (pin held, dirty tracked, unpin on drop)
//! ```

mod file;
mod pool;

pub use file::PageFile;
pub use pool::{BufferPool, FileId, PageGuard};
