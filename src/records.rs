//! # Record Sources
//!
//! Bulk construction drains a lazy sequence of `(record id, record bytes)`
//! pairs out of the indexed relation's file. The tree only ever sees the
//! [`RecordSource`] trait; the concrete shape of the record file stays on
//! this side of the boundary.
//!
//! End of sequence is `Ok(None)`; the source is finite and not
//! restartable. [`FixedRecordFile`] is the standard implementation: a flat
//! file of fixed-length records, where record `i` is addressed as
//! `(1 + i / per_page, i % per_page)` with `per_page = PAGE_SIZE /
//! record_len`, matching how a page-organized heap file would number its
//! slots. [`NoRecords`] is the empty source, used when opening an index
//! that already exists on disk.

use std::fs::{File, OpenOptions};
use std::io::{BufReader, Read, Seek, SeekFrom, Write};
use std::path::Path;

use zerocopy::little_endian::{U16, U32};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

use crate::config::{PAGE_SIZE, RID_LEN};
use crate::error::{Error, Result};

/// Opaque reference to one record in the indexed relation: the record
/// file page it lives on and its slot within that page. Compared only for
/// equality, never ordered.
#[repr(C)]
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned,
)]
pub struct RecordId {
    page_no: U32,
    slot_no: U16,
}

const _: () = assert!(std::mem::size_of::<RecordId>() == RID_LEN);

impl RecordId {
    pub fn new(page_no: u32, slot_no: u16) -> Self {
        Self {
            page_no: U32::new(page_no),
            slot_no: U16::new(slot_no),
        }
    }

    pub fn page_no(&self) -> u32 {
        self.page_no.get()
    }

    pub fn slot_no(&self) -> u16 {
        self.slot_no.get()
    }
}

/// A finite, forward-only sequence of records to index.
pub trait RecordSource {
    /// Produces the next record, or `None` once the sequence is drained.
    fn next_record(&mut self) -> Result<Option<(RecordId, Vec<u8>)>>;
}

/// The empty record source.
pub struct NoRecords;

impl RecordSource for NoRecords {
    fn next_record(&mut self) -> Result<Option<(RecordId, Vec<u8>)>> {
        Ok(None)
    }
}

/// In-memory record source; mostly useful in tests and small tools.
pub struct MemRecords {
    records: std::vec::IntoIter<(RecordId, Vec<u8>)>,
}

impl MemRecords {
    pub fn new(records: Vec<(RecordId, Vec<u8>)>) -> Self {
        Self {
            records: records.into_iter(),
        }
    }
}

impl RecordSource for MemRecords {
    fn next_record(&mut self) -> Result<Option<(RecordId, Vec<u8>)>> {
        Ok(self.records.next())
    }
}

/// A flat file of fixed-length records.
pub struct FixedRecordFile {
    file: File,
    record_len: usize,
    record_count: u64,
}

impl FixedRecordFile {
    /// Creates an empty record file. `record_len` must fit a page, since
    /// slot numbering is page-relative.
    pub fn create(path: impl AsRef<Path>, record_len: usize) -> Result<Self> {
        assert!(record_len > 0 && record_len <= PAGE_SIZE);
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(path)?;
        Ok(Self {
            file,
            record_len,
            record_count: 0,
        })
    }

    /// Opens an existing record file of the given record length.
    pub fn open(path: impl AsRef<Path>, record_len: usize) -> Result<Self> {
        assert!(record_len > 0 && record_len <= PAGE_SIZE);
        let file = OpenOptions::new().read(true).write(true).open(&path)?;
        let len = file.metadata()?.len();
        if len % record_len as u64 != 0 {
            return Err(Error::Corrupted(format!(
                "record file length {} not a multiple of record length {}",
                len, record_len
            )));
        }
        Ok(Self {
            file,
            record_len,
            record_count: len / record_len as u64,
        })
    }

    pub fn record_len(&self) -> usize {
        self.record_len
    }

    pub fn record_count(&self) -> u64 {
        self.record_count
    }

    fn records_per_page(&self) -> u64 {
        (PAGE_SIZE / self.record_len) as u64
    }

    fn rid_of(&self, ordinal: u64) -> RecordId {
        let per_page = self.records_per_page();
        RecordId::new(1 + (ordinal / per_page) as u32, (ordinal % per_page) as u16)
    }

    /// Appends one record and returns the id it will scan back under.
    pub fn append(&mut self, record: &[u8]) -> Result<RecordId> {
        if record.len() != self.record_len {
            return Err(Error::Corrupted(format!(
                "record of {} bytes appended to file of {}-byte records",
                record.len(),
                self.record_len
            )));
        }
        self.file.seek(SeekFrom::End(0))?;
        self.file.write_all(record)?;
        let rid = self.rid_of(self.record_count);
        self.record_count += 1;
        Ok(rid)
    }

    /// Starts a scan over all records, consuming the file handle.
    pub fn into_scan(mut self) -> Result<RecordScan> {
        self.file.seek(SeekFrom::Start(0))?;
        let per_page = self.records_per_page();
        Ok(RecordScan {
            reader: BufReader::new(self.file),
            record_len: self.record_len,
            record_count: self.record_count,
            next_ordinal: 0,
            per_page,
        })
    }
}

/// Forward-only cursor over a [`FixedRecordFile`].
pub struct RecordScan {
    reader: BufReader<File>,
    record_len: usize,
    record_count: u64,
    next_ordinal: u64,
    per_page: u64,
}

impl RecordSource for RecordScan {
    fn next_record(&mut self) -> Result<Option<(RecordId, Vec<u8>)>> {
        if self.next_ordinal >= self.record_count {
            return Ok(None);
        }
        let mut buf = vec![0u8; self.record_len];
        self.reader.read_exact(&mut buf)?;

        let ordinal = self.next_ordinal;
        self.next_ordinal += 1;
        let rid = RecordId::new(
            1 + (ordinal / self.per_page) as u32,
            (ordinal % self.per_page) as u16,
        );
        Ok(Some((rid, buf)))
    }
}
