//! # B+Tree Index
//!
//! The index proper: a disk-backed B+tree over one attribute of an
//! external record file, keyed by any [`IndexKey`] width. All node access
//! goes through the buffer pool; the tree itself holds no page bytes, only
//! the file handle, the root's page number, and the root's pin.
//!
//! ## File Layout
//!
//! ```text
//! page 1   metadata (IndexMeta)
//! page 2   initial root: internal node, level 1, one child
//! page 3   initial leaf: empty
//! page 4+  nodes created by splits and root growth
//! ```
//!
//! The root is always an internal node, from creation onward. Its level
//! flag says what its children are (1 = leaves, 0 = internal nodes), so
//! descent always knows when the next hop is a leaf without any per-page
//! type tag.
//!
//! ## Insert Algorithm
//!
//! ```text
//! 1. Reject keys that are sentinel-equal (BadKey)
//! 2. Recursive descent from the root; at each internal node pick the
//!    child for the key and recurse; the node's own guard stays pinned
//!    across the recursion so a child split can be applied to it
//! 3. At the leaf: reject duplicates; insert in place if a slot is free
//! 4. Full leaf: split around ceil((L+1)/2), copy the right page's first
//!    key up, thread the new page into the sibling chain
//! 5. Full internal node: split around the lower-middle separator, push
//!    it up (it moves, unlike the leaf case)
//! 6. A split escaping the root grows the tree: new root with the two
//!    halves as children, metadata page rewritten, root pin moved
//! ```
//!
//! Every page modified on the way is unpinned dirty by its guard. There is
//! no partial-failure recovery: an I/O error in the middle of a split
//! leaves the tree inconsistent, and callers must treat it as fatal.
//!
//! ## Pin Discipline
//!
//! The root is pinned once at open and stays pinned until close. Descent
//! pins at most one guard per level, released on unwind. A scan keeps
//! exactly one leaf pinned while active. After any public call returns,
//! the only pin left standing is the root's (plus the scanned leaf while a
//! scan is open).

use std::cmp::Ordering;
use std::path::Path;
use std::sync::Arc;

use zerocopy::IntoBytes;

use crate::config::{META_PAGE_NO, PAGE_NONE};
use crate::error::{Error, Result};
use crate::records::{RecordId, RecordSource};
use crate::storage::{BufferPool, FileId, PageGuard};

use super::key::IndexKey;
use super::meta::{IndexMeta, META_LEN};
use super::node::{InternalView, InternalViewMut, LeafView, LeafViewMut, SearchResult};
use super::scan::{ActiveScan, ScanOp, ScanState};

/// A child split, as seen by its parent: the separator to adopt and the
/// page that now holds everything at or above it.
struct SplitUp<K> {
    separator: K,
    right_page: u32,
}

/// How `scan_next` moves after emitting the current entry.
enum Advance {
    Within,
    Sibling(u32),
    Exhaust,
}

pub struct BTreeIndex<K: IndexKey> {
    pool: Arc<BufferPool>,
    file: FileId,
    index_name: String,
    attr_byte_offset: u32,
    root_page_no: u32,
    root_guard: Option<PageGuard>,
    scan: ScanState<K>,
    closed: bool,
}

impl<K: IndexKey> BTreeIndex<K> {
    /// Canonical index file name for a relation/attribute pair.
    pub fn index_file_name(relation: &str, attr_byte_offset: u32) -> String {
        format!("{}.{}", relation, attr_byte_offset)
    }

    /// Opens the index for `relation` inside `dir`, creating and
    /// bulk-loading it from `records` if no index file exists yet. When
    /// the file exists, `records` is not consumed and the stored metadata
    /// must match the arguments (`BadIndexInfo` otherwise).
    pub fn open(
        pool: Arc<BufferPool>,
        dir: impl AsRef<Path>,
        relation: &str,
        attr_byte_offset: u32,
        records: impl RecordSource,
    ) -> Result<Self> {
        let index_name = Self::index_file_name(relation, attr_byte_offset);
        let path = dir.as_ref().join(&index_name);

        match pool.create_file(&path) {
            Ok(file) => Self::create(pool, file, index_name, relation, attr_byte_offset, records),
            Err(Error::Io(e)) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                let file = pool.open_file(&path)?;
                Self::open_existing(pool, file, index_name, relation, attr_byte_offset)
            }
            Err(e) => Err(e),
        }
    }

    pub fn index_name(&self) -> &str {
        &self.index_name
    }

    /// Pin count currently held against the index file. One for the
    /// permanently pinned root, plus one for the scanned leaf while a
    /// scan is active; anything beyond that is a leak.
    pub fn pinned_pages(&self) -> usize {
        self.pool.pinned_pages(self.file)
    }

    /// Number of node levels, leaves included. The freshly created tree
    /// has height 2 (root over one leaf); each root split adds one.
    pub fn height(&self) -> Result<u32> {
        let mut levels = 2;
        let mut page_no = self.root_page_no;
        loop {
            let guard = self.pool.fetch_page(self.file, page_no)?;
            let view = InternalView::<K>::new(guard.data());
            if view.level() == 1 {
                return Ok(levels);
            }
            page_no = view.child_at(0);
            levels += 1;
        }
    }

    fn create(
        pool: Arc<BufferPool>,
        file: FileId,
        index_name: String,
        relation: &str,
        attr_byte_offset: u32,
        records: impl RecordSource,
    ) -> Result<Self> {
        let root_page_no;
        {
            let (meta_no, mut meta_guard) = pool.alloc_page(file)?;
            debug_assert_eq!(meta_no, META_PAGE_NO);
            let (root_no, mut root_guard) = pool.alloc_page(file)?;
            let (leaf_no, mut leaf_guard) = pool.alloc_page(file)?;

            LeafViewMut::<K>::init(leaf_guard.data_mut());

            let mut root = InternalViewMut::<K>::init(root_guard.data_mut(), 1);
            root.set_child_at(0, leaf_no);

            let meta = IndexMeta::new(relation, attr_byte_offset, K::KEY_TYPE, root_no);
            meta_guard.data_mut()[..META_LEN].copy_from_slice(meta.as_bytes());

            root_page_no = root_no;
        }

        let root_guard = pool.fetch_page(file, root_page_no)?;
        let mut index = Self {
            pool,
            file,
            index_name,
            attr_byte_offset,
            root_page_no,
            root_guard: Some(root_guard),
            scan: ScanState::Idle,
            closed: false,
        };

        index.bulk_load(records)?;
        Ok(index)
    }

    fn open_existing(
        pool: Arc<BufferPool>,
        file: FileId,
        index_name: String,
        relation: &str,
        attr_byte_offset: u32,
    ) -> Result<Self> {
        let validated = (|| -> Result<u32> {
            let meta_guard = pool.fetch_page(file, META_PAGE_NO)?;
            let meta = IndexMeta::from_bytes(meta_guard.data())?;
            meta.check_matches(relation, attr_byte_offset, K::KEY_TYPE)?;
            Ok(meta.root_page_no())
        })();

        let root_page_no = match validated {
            Ok(root) => root,
            Err(e) => {
                let _ = pool.close_file(file);
                return Err(e);
            }
        };

        let root_guard = pool.fetch_page(file, root_page_no)?;
        Ok(Self {
            pool,
            file,
            index_name,
            attr_byte_offset,
            root_page_no,
            root_guard: Some(root_guard),
            scan: ScanState::Idle,
            closed: false,
        })
    }

    /// Drains the record source, extracting the key at the attribute
    /// offset of every record and inserting it.
    fn bulk_load(&mut self, mut records: impl RecordSource) -> Result<()> {
        let offset = self.attr_byte_offset as usize;
        while let Some((rid, bytes)) = records.next_record()? {
            let need = offset + K::ENCODED_LEN;
            if bytes.len() < need {
                return Err(Error::TruncatedRecord {
                    have: bytes.len(),
                    need,
                });
            }
            let key = K::decode(&bytes[offset..offset + K::ENCODED_LEN]);
            self.insert(key, rid)?;
        }
        Ok(())
    }

    // -----------------------------------------------------------------
    // Insertion
    // -----------------------------------------------------------------

    /// Makes `(key, rid)` visible to all subsequent scans.
    pub fn insert(&mut self, key: K, rid: RecordId) -> Result<()> {
        if !key.is_storable() {
            return Err(Error::BadKey);
        }

        if let Some(split) = self.insert_into_internal(self.root_page_no, &key, rid)? {
            self.grow_root(split)?;
        }
        Ok(())
    }

    fn insert_into_internal(
        &self,
        page_no: u32,
        key: &K,
        rid: RecordId,
    ) -> Result<Option<SplitUp<K>>> {
        let mut guard = self.pool.fetch_page(self.file, page_no)?;

        let (count, index, child, level) = {
            let view = InternalView::<K>::new(guard.data());
            let count = view.occupancy();
            let (index, child) = view.find_child(key);
            (count, index, child, view.level())
        };
        if child == PAGE_NONE {
            return Err(Error::Corrupted(format!(
                "internal node {} has no child to descend into",
                page_no
            )));
        }

        let split = if level == 1 {
            self.insert_into_leaf(child, key, rid)?
        } else {
            self.insert_into_internal(child, key, rid)?
        };

        let Some(split) = split else {
            return Ok(None);
        };

        // The child split: adopt its separator at the descent position,
        // with the new page as the separator's right child.
        if count < K::NODE_CAPACITY {
            let mut node = InternalViewMut::<K>::new(guard.data_mut());
            node.insert_separator_at(index, count, &split.separator, split.right_page);
            return Ok(None);
        }

        self.split_internal(&mut guard, index, split)
    }

    /// Splits a full internal node around the lower-middle separator of
    /// the would-be contents. The middle separator moves up; it appears in
    /// neither half afterwards.
    fn split_internal(
        &self,
        guard: &mut PageGuard,
        index: usize,
        split: SplitUp<K>,
    ) -> Result<Option<SplitUp<K>>> {
        let n = K::NODE_CAPACITY;

        let mut separators: Vec<K> = Vec::with_capacity(n + 1);
        let mut children: Vec<u32> = Vec::with_capacity(n + 2);
        let level = {
            let view = InternalView::<K>::new(guard.data());
            for i in 0..n {
                separators.push(view.key_at(i));
            }
            for i in 0..=n {
                children.push(view.child_at(i));
            }
            view.level()
        };

        separators.insert(index, split.separator);
        children.insert(index + 1, split.right_page);

        // Lower middle of the n + 1 separators.
        let mid = n / 2;
        let promoted = separators[mid];

        {
            let mut left = InternalViewMut::<K>::init(guard.data_mut(), level);
            for (i, separator) in separators[..mid].iter().enumerate() {
                left.set_key_at(i, separator);
            }
            for (i, &child) in children[..=mid].iter().enumerate() {
                left.set_child_at(i, child);
            }
        }

        let (right_no, mut right_guard) = self.pool.alloc_page(self.file)?;
        {
            let mut right = InternalViewMut::<K>::init(right_guard.data_mut(), level);
            for (i, separator) in separators[mid + 1..].iter().enumerate() {
                right.set_key_at(i, separator);
            }
            for (i, &child) in children[mid + 1..].iter().enumerate() {
                right.set_child_at(i, child);
            }
        }

        Ok(Some(SplitUp {
            separator: promoted,
            right_page: right_no,
        }))
    }

    fn insert_into_leaf(&self, page_no: u32, key: &K, rid: RecordId) -> Result<Option<SplitUp<K>>> {
        let mut guard = self.pool.fetch_page(self.file, page_no)?;

        let (count, position) = {
            let view = LeafView::<K>::new(guard.data());
            let position = match view.find_key(key) {
                SearchResult::Found(_) => return Err(Error::DuplicateKey),
                SearchResult::NotFound(position) => position,
            };
            (view.occupancy(), position)
        };

        if count < K::LEAF_CAPACITY {
            let mut leaf = LeafViewMut::<K>::new(guard.data_mut());
            leaf.insert_at(position, count, key, rid);
            return Ok(None);
        }

        self.split_leaf(&mut guard, position, key, rid)
    }

    /// Splits a full leaf. The left page keeps ceil((L+1)/2) entries, the
    /// new right page takes the rest, and the right page's first key is
    /// copied up as the separator; it stays present in the leaf.
    fn split_leaf(
        &self,
        guard: &mut PageGuard,
        position: usize,
        key: &K,
        rid: RecordId,
    ) -> Result<Option<SplitUp<K>>> {
        let l = K::LEAF_CAPACITY;

        let mut entries: Vec<(K, RecordId)> = Vec::with_capacity(l + 1);
        let old_sibling = {
            let view = LeafView::<K>::new(guard.data());
            for i in 0..l {
                entries.push((view.key_at(i), view.rid_at(i)));
            }
            view.right_sibling()
        };
        entries.insert(position, (*key, rid));

        let left_count = (l + 2) / 2; // ceil((l + 1) / 2)
        let promoted = entries[left_count].0;

        let (right_no, mut right_guard) = self.pool.alloc_page(self.file)?;
        {
            let mut right = LeafViewMut::<K>::init(right_guard.data_mut());
            for (i, (entry_key, entry_rid)) in entries[left_count..].iter().enumerate() {
                right.set_key_at(i, entry_key);
                right.set_rid_at(i, *entry_rid);
            }
            right.set_right_sibling(old_sibling);
        }

        {
            let mut left = LeafViewMut::<K>::init(guard.data_mut());
            for (i, (entry_key, entry_rid)) in entries[..left_count].iter().enumerate() {
                left.set_key_at(i, entry_key);
                left.set_rid_at(i, *entry_rid);
            }
            left.set_right_sibling(Some(right_no));
        }

        Ok(Some(SplitUp {
            separator: promoted,
            right_page: right_no,
        }))
    }

    /// A split escaped the root: put a new internal node above the two
    /// halves and move the long-lived root pin over. The old root was an
    /// internal node (the root always is), so the new root's children are
    /// internal and its level is 0.
    fn grow_root(&mut self, split: SplitUp<K>) -> Result<()> {
        let (new_root_no, mut guard) = self.pool.alloc_page(self.file)?;
        {
            let mut root = InternalViewMut::<K>::init(guard.data_mut(), 0);
            root.set_child_at(0, self.root_page_no);
            root.insert_separator_at(0, 0, &split.separator, split.right_page);
        }
        drop(guard);

        {
            let mut meta_guard = self.pool.fetch_page(self.file, META_PAGE_NO)?;
            IndexMeta::from_bytes_mut(meta_guard.data_mut())?.set_root_page_no(new_root_no);
        }

        // Pin the new root before the assignment releases the old pin.
        self.root_guard = Some(self.pool.fetch_page(self.file, new_root_no)?);
        self.root_page_no = new_root_no;
        Ok(())
    }

    // -----------------------------------------------------------------
    // Search
    // -----------------------------------------------------------------

    /// Walks from the root to the leaf that would contain `key`. Read
    /// only; every interior page visited is unpinned as the walk leaves
    /// it.
    fn locate(&self, key: &K) -> Result<u32> {
        let mut page_no = self.root_page_no;
        loop {
            let guard = self.pool.fetch_page(self.file, page_no)?;
            let view = InternalView::<K>::new(guard.data());
            let (_, child) = view.find_child(key);
            if child == PAGE_NONE {
                return Err(Error::Corrupted(format!(
                    "internal node {} has no child to descend into",
                    page_no
                )));
            }
            if view.level() == 1 {
                return Ok(child);
            }
            page_no = child;
        }
    }

    // -----------------------------------------------------------------
    // Range scan
    // -----------------------------------------------------------------

    /// Positions a scan on the first entry inside the bounds.
    /// `NoSuchKeyFound` if the range is empty of entries; the scan stays
    /// idle in that case. An already-active scan is ended first.
    pub fn start_scan(&mut self, low: K, low_op: ScanOp, high: K, high_op: ScanOp) -> Result<()> {
        if !low_op.is_lower_bound() || !high_op.is_upper_bound() {
            return Err(Error::BadOpcodes);
        }
        if low.cmp_key(&high) == Ordering::Greater {
            return Err(Error::BadScanRange);
        }
        self.scan = ScanState::Idle;

        let mut guard = self.pool.fetch_page(self.file, self.locate(&low)?)?;
        loop {
            let first_admitted = {
                let view = LeafView::<K>::new(guard.data());
                let count = view.occupancy();
                (0..count)
                    .map(|i| (i, view.key_at(i)))
                    .find(|(_, k)| low_op.admits(k, &low))
            };

            match first_admitted {
                Some((entry, key)) => {
                    if !high_op.admits(&key, &high) {
                        return Err(Error::NoSuchKeyFound);
                    }
                    self.scan = ScanState::Active(ActiveScan {
                        leaf: guard,
                        entry,
                        high,
                        high_op,
                    });
                    return Ok(());
                }
                None => {
                    // Every entry here is below the lower bound (or the
                    // leaf is empty); move right. Pin the sibling before
                    // this guard drops.
                    let sibling = LeafView::<K>::new(guard.data()).right_sibling();
                    match sibling {
                        None => return Err(Error::NoSuchKeyFound),
                        Some(next) => guard = self.pool.fetch_page(self.file, next)?,
                    }
                }
            }
        }
    }

    /// Emits the record id at the scan position, then advances.
    pub fn scan_next(&mut self) -> Result<RecordId> {
        let (rid, advance) = match &self.scan {
            ScanState::Idle => return Err(Error::ScanNotInitialized),
            ScanState::Exhausted => return Err(Error::ScanCompleted),
            ScanState::Active(scan) => {
                let view = LeafView::<K>::new(scan.leaf.data());
                let rid = view.rid_at(scan.entry);
                let advance = if scan.entry + 1 < view.occupancy() {
                    if scan.high_op.admits(&view.key_at(scan.entry + 1), &scan.high) {
                        Advance::Within
                    } else {
                        Advance::Exhaust
                    }
                } else {
                    match view.right_sibling() {
                        Some(next) => Advance::Sibling(next),
                        None => Advance::Exhaust,
                    }
                };
                (rid, advance)
            }
        };

        match advance {
            Advance::Within => {
                if let ScanState::Active(scan) = &mut self.scan {
                    scan.entry += 1;
                }
            }
            Advance::Exhaust => self.scan = ScanState::Exhausted,
            Advance::Sibling(next) => {
                // Pin the sibling first so the chain stays anchored, then
                // decide whether its first entry still qualifies.
                let next_guard = self.pool.fetch_page(self.file, next)?;
                let qualifies = {
                    let view = LeafView::<K>::new(next_guard.data());
                    let non_empty = view.occupancy() > 0;
                    match &self.scan {
                        ScanState::Active(scan) => {
                            non_empty && scan.high_op.admits(&view.key_at(0), &scan.high)
                        }
                        _ => false,
                    }
                };
                if qualifies {
                    if let ScanState::Active(scan) = &mut self.scan {
                        scan.leaf = next_guard;
                        scan.entry = 0;
                    }
                } else {
                    self.scan = ScanState::Exhausted;
                }
            }
        }

        Ok(rid)
    }

    /// Ends the scan and unpins its leaf. `ScanNotInitialized` when no
    /// scan was started; fine to call from `Exhausted`, where the leaf is
    /// already unpinned.
    pub fn end_scan(&mut self) -> Result<()> {
        match self.scan {
            ScanState::Idle => Err(Error::ScanNotInitialized),
            _ => {
                self.scan = ScanState::Idle;
                Ok(())
            }
        }
    }

    // -----------------------------------------------------------------
    // Teardown
    // -----------------------------------------------------------------

    /// Ends any open scan, releases the root pin, writes the file back,
    /// and closes it. The index is unusable afterwards (enforced by
    /// consuming `self`).
    pub fn close(mut self) -> Result<()> {
        self.shutdown()
    }

    fn shutdown(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;

        match self.end_scan() {
            Ok(()) | Err(Error::ScanNotInitialized) => {}
            Err(e) => return Err(e),
        }
        self.root_guard = None;
        self.pool.close_file(self.file)
    }
}

impl<K: IndexKey> Drop for BTreeIndex<K> {
    fn drop(&mut self) {
        // Best effort; close() is the error-surfacing path.
        let _ = self.shutdown();
    }
}
