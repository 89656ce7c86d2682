//! # Index Layer
//!
//! The B+tree itself: key-width dispatch, the on-disk metadata page, the
//! leaf/internal node views, the tree with its insertion engine, and the
//! range-scan state machine. One algorithm serves all three key widths;
//! [`key::IndexKey`] carries everything width-specific.

pub mod key;
pub mod meta;
pub mod node;
pub mod scan;
pub mod tree;

pub use key::{IndexKey, KeyType, Str10};
pub use scan::ScanOp;
pub use tree::BTreeIndex;
