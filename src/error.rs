//! Error types for the index engine.

use thiserror::Error;

/// Result type alias using [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by the index engine and its storage collaborators.
#[derive(Debug, Error)]
pub enum Error {
    /// The metadata page of an existing index file disagrees with the
    /// relation name, attribute offset, or key type it was opened with.
    #[error("index metadata mismatch: {0}")]
    BadIndexInfo(String),

    /// A scan was started with a lower bound that is not GT/GTE or an
    /// upper bound that is not LT/LTE.
    #[error("invalid scan operators")]
    BadOpcodes,

    /// A scan was started with a lower bound above its upper bound.
    #[error("scan range is empty: low > high")]
    BadScanRange,

    /// No entry satisfies the scan bounds; the scan remains idle.
    #[error("no key in range")]
    NoSuchKeyFound,

    /// The key already exists in the index; the tree is unchanged.
    #[error("duplicate key")]
    DuplicateKey,

    /// The key equals the width's reserved sentinel (or is otherwise not
    /// storable, e.g. a non-finite double) and cannot be indexed.
    #[error("key is reserved and cannot be stored")]
    BadKey,

    /// A scan method was called with no scan in progress.
    #[error("scan not initialized")]
    ScanNotInitialized,

    /// `scan_next` was called after the scan ran past its upper bound.
    /// This is the normal end-of-iteration signal.
    #[error("scan completed")]
    ScanCompleted,

    /// An unpin was requested for a page the pool does not hold pinned.
    #[error("page {page_no} is not pinned")]
    PageNotPinned { page_no: u32 },

    /// Every frame in the buffer pool is pinned; nothing can be evicted.
    #[error("buffer pool exhausted: all {capacity} frames pinned")]
    PoolExhausted { capacity: usize },

    /// A record handed to the bulk loader is too short to contain the
    /// indexed attribute.
    #[error("record too short: {have} bytes, key needs {need}")]
    TruncatedRecord { have: usize, need: usize },

    /// A page's bytes violate the node or metadata layout. Fatal: the
    /// index must be treated as inconsistent.
    #[error("corrupted index page: {0}")]
    Corrupted(String),

    /// I/O failure from the page file. Fatal; propagated unchanged.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io(_)));
    }

    #[test]
    fn test_display_messages() {
        assert_eq!(Error::ScanCompleted.to_string(), "scan completed");
        assert_eq!(
            Error::PageNotPinned { page_no: 4 }.to_string(),
            "page 4 is not pinned"
        );
        assert_eq!(
            Error::TruncatedRecord { have: 6, need: 8 }.to_string(),
            "record too short: 6 bytes, key needs 8"
        );
    }

    #[test]
    fn test_error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Error>();
    }
}
