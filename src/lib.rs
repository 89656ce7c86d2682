//! # Spindle - Disk-Backed B+Tree Secondary Index
//!
//! Spindle builds, persists, and queries an on-disk B+tree over one
//! attribute of an external record file: given fixed-length records with
//! the indexed attribute at a known byte offset, it supports bulk
//! construction, point insertion of `(key, record id)` pairs, and range
//! scans with inclusive or exclusive bounds on each side.
//!
//! ## Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use spindle::{BTreeIndex, BufferPool, FixedRecordFile, ScanOp};
//!
//! let pool = Arc::new(BufferPool::new(128));
//! let records = FixedRecordFile::open("./data/orders.dat", 64)?.into_scan()?;
//!
//! // Key is the i32 at byte offset 8 of every record.
//! let mut index = BTreeIndex::<i32>::open(pool, "./data", "orders", 8, records)?;
//!
//! index.start_scan(100, ScanOp::Gte, 200, ScanOp::Lt)?;
//! while let Ok(rid) = index.scan_next() {
//!     println!("{}:{}", rid.page_no(), rid.slot_no());
//! }
//! index.end_scan()?;
//! index.close()?;
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────┐
//! │ index     BTreeIndex<K>: insert, locate, scan  │
//! │           node views · metadata page · widths  │
//! ├────────────────────────────────────────────────┤
//! │ storage   BufferPool (pinning frame cache)     │
//! │           PageFile (fixed-size page container) │
//! ├────────────────────────────────────────────────┤
//! │ records   RecordSource (bulk-load input)       │
//! └────────────────────────────────────────────────┘
//! ```
//!
//! Three key widths, `i32`, `f64`, and the fixed ten-byte [`Str10`],
//! share one tree algorithm through the [`IndexKey`] trait. Every page
//! access is pinned through an RAII guard, so pin balance and dirty
//! propagation hold on every exit path by construction.
//!
//! The engine is single-threaded: one in-flight operation, synchronous
//! I/O, no internal concurrency.

pub mod config;
pub mod error;
pub mod index;
pub mod records;
pub mod storage;

pub use error::{Error, Result};
pub use index::{BTreeIndex, IndexKey, KeyType, ScanOp, Str10};
pub use records::{FixedRecordFile, MemRecords, NoRecords, RecordId, RecordSource};
pub use storage::{BufferPool, FileId, PageFile, PageGuard};
