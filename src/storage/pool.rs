//! # Pinning Buffer Pool
//!
//! This module implements the page cache the index engine runs against. It
//! owns every open [`PageFile`] and a fixed set of page-sized frames, and
//! hands out pinned access to pages through an RAII guard.
//!
//! ## Pin/Unpin Protocol
//!
//! Pages must be pinned before access so a frame cannot be evicted out from
//! under a reader:
//!
//! 1. `fetch_page` / `alloc_page` return a [`PageGuard`] (pin count +1)
//! 2. The caller reads via `data()` or writes via `data_mut()`
//! 3. Dropping the guard unpins, carrying `dirty = true` iff the guard
//!    handed out mutable access (or was explicitly marked)
//! 4. Frames with a nonzero pin count are never evicted
//!
//! The guard makes pin balance structural: every acquisition site releases
//! exactly once, on every exit path, with the right dirty flag. Holding a
//! guard is holding a pin; there is no separate bookkeeping to get wrong.
//!
//! ## Eviction
//!
//! Frame replacement is a SIEVE-style second-chance scan. A "hand" walks
//! the frame array; pinned frames are skipped, frames accessed since the
//! last visit get their `visited` flag cleared and survive one round, and
//! the first unpinned unvisited frame is the victim. Dirty victims are
//! written back to their file before the frame is reused. If a full sweep
//! finds every frame pinned, the pool is exhausted and the caller gets an
//! error rather than a deadlock.
//!
//! ## Frame Memory
//!
//! ```text
//! Frame {
//!     key:       (FileId, page_no)
//!     pin_count: u32
//!     dirty:     bool
//!     visited:   bool
//!     data:      Box<[u8; PAGE_SIZE]>   // stable heap address
//! }
//! ```
//!
//! Guard data access returns slices built from the frame's `Box` pointer.
//! The box's heap allocation never moves: growing the frame vector or
//! reusing a slot replaces the box's *contents*, not its address, and a
//! pinned frame's slot is never reused. A slice handed out under a pin
//! stays valid for the life of the guard.
//!
//! ## Thread Safety
//!
//! All pool state sits behind one `parking_lot::Mutex`, so every method
//! takes `&self` and guards can unpin from `Drop`. The engine itself is
//! single-threaded; the lock is for shape, not for contention.

use std::path::Path;
use std::sync::Arc;

use hashbrown::HashMap;
use parking_lot::Mutex;

use crate::config::{DEFAULT_POOL_CAPACITY, PAGE_SIZE};
use crate::error::{Error, Result};

use super::file::PageFile;

/// Handle to a file registered with the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FileId(u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct PageKey {
    file: FileId,
    page_no: u32,
}

struct Frame {
    key: PageKey,
    pin_count: u32,
    dirty: bool,
    visited: bool,
    data: Box<[u8; PAGE_SIZE]>,
}

impl Frame {
    fn new(key: PageKey) -> Self {
        Self {
            key,
            pin_count: 0,
            dirty: false,
            visited: false,
            data: Box::new([0u8; PAGE_SIZE]),
        }
    }
}

struct PoolInner {
    files: HashMap<FileId, PageFile>,
    next_file: u32,
    frames: Vec<Frame>,
    table: HashMap<PageKey, usize>,
    hand: usize,
}

pub struct BufferPool {
    inner: Mutex<PoolInner>,
    capacity: usize,
}

impl BufferPool {
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "buffer pool needs at least one frame");
        Self {
            inner: Mutex::new(PoolInner {
                files: HashMap::new(),
                next_file: 0,
                frames: Vec::with_capacity(capacity),
                table: HashMap::with_capacity(capacity),
                hand: 0,
            }),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Creates a new page file and registers it. Fails with
    /// `io::ErrorKind::AlreadyExists` if the path is taken.
    pub fn create_file(&self, path: impl AsRef<Path>) -> Result<FileId> {
        let file = PageFile::create(path)?;
        Ok(self.register(file))
    }

    /// Opens an existing page file and registers it.
    pub fn open_file(&self, path: impl AsRef<Path>) -> Result<FileId> {
        let file = PageFile::open(path)?;
        Ok(self.register(file))
    }

    fn register(&self, file: PageFile) -> FileId {
        let mut inner = self.inner.lock();
        let id = FileId(inner.next_file);
        inner.next_file += 1;
        inner.files.insert(id, file);
        id
    }

    /// Writes back the file's dirty frames, drops its clean frames, and
    /// closes it. Calling this with pages of the file still pinned is a
    /// caller bug and is rejected.
    pub fn close_file(&self, file: FileId) -> Result<()> {
        let mut inner = self.inner.lock();

        if let Some(frame) = inner
            .frames
            .iter()
            .find(|f| f.key.file == file && f.pin_count > 0)
        {
            return Err(Error::Corrupted(format!(
                "file closed while page {} is still pinned",
                frame.key.page_no
            )));
        }

        inner.flush_frames_of(file)?;
        let mut file_obj = inner
            .files
            .remove(&file)
            .ok_or_else(|| Error::Corrupted("close of unregistered file".into()))?;
        file_obj.sync()?;

        // Retire the file's frames: clear their table entries and leave the
        // slots as unpinned, unvisited candidates for immediate reuse.
        for idx in 0..inner.frames.len() {
            if inner.frames[idx].key.file == file {
                let key = inner.frames[idx].key;
                inner.table.remove(&key);
                inner.frames[idx].dirty = false;
                inner.frames[idx].visited = false;
            }
        }
        Ok(())
    }

    /// Allocates a fresh page in `file` and returns it pinned and zeroed.
    pub fn alloc_page(self: &Arc<Self>, file: FileId) -> Result<(u32, PageGuard)> {
        let mut inner = self.inner.lock();
        let page_no = inner
            .files
            .get_mut(&file)
            .ok_or_else(|| Error::Corrupted("alloc on unregistered file".into()))?
            .allocate();

        let key = PageKey { file, page_no };
        let idx = inner.acquire_frame(key, self.capacity)?;
        inner.frames[idx].data.fill(0);
        inner.frames[idx].pin_count = 1;
        inner.frames[idx].visited = true;
        inner.table.insert(key, idx);

        Ok((page_no, PageGuard::new(Arc::clone(self), key)))
    }

    /// Returns the page pinned, reading it from the file on a cache miss.
    pub fn fetch_page(self: &Arc<Self>, file: FileId, page_no: u32) -> Result<PageGuard> {
        let mut inner = self.inner.lock();
        let key = PageKey { file, page_no };

        if let Some(&idx) = inner.table.get(&key) {
            inner.frames[idx].pin_count += 1;
            inner.frames[idx].visited = true;
            return Ok(PageGuard::new(Arc::clone(self), key));
        }

        let idx = inner.acquire_frame(key, self.capacity)?;
        {
            let PoolInner { files, frames, .. } = &mut *inner;
            let file_obj = files
                .get_mut(&file)
                .ok_or_else(|| Error::Corrupted("fetch on unregistered file".into()))?;
            file_obj.read_page(page_no, &mut frames[idx].data)?;
        }
        inner.frames[idx].pin_count = 1;
        inner.frames[idx].visited = true;
        inner.table.insert(key, idx);

        Ok(PageGuard::new(Arc::clone(self), key))
    }

    /// Writes back every dirty frame of the file and syncs it.
    pub fn flush_file(&self, file: FileId) -> Result<()> {
        let mut inner = self.inner.lock();
        inner.flush_frames_of(file)?;
        inner
            .files
            .get_mut(&file)
            .ok_or_else(|| Error::Corrupted("flush of unregistered file".into()))?
            .sync()
    }

    /// Total pin count currently held against the file's pages.
    pub fn pinned_pages(&self, file: FileId) -> usize {
        let inner = self.inner.lock();
        inner
            .frames
            .iter()
            .filter(|f| f.key.file == file)
            .map(|f| f.pin_count as usize)
            .sum()
    }

    fn unpin(&self, key: PageKey, dirty: bool) -> Result<()> {
        let mut inner = self.inner.lock();
        let idx = match inner.table.get(&key) {
            Some(&idx) if inner.frames[idx].pin_count > 0 => idx,
            _ => {
                return Err(Error::PageNotPinned {
                    page_no: key.page_no,
                })
            }
        };
        inner.frames[idx].pin_count -= 1;
        inner.frames[idx].dirty |= dirty;
        Ok(())
    }

    fn data_ptr(&self, key: PageKey) -> *mut u8 {
        let inner = self.inner.lock();
        let idx = *inner
            .table
            .get(&key)
            .expect("guard outlived its frame"); // INVARIANT: a pinned frame is never evicted
        inner.frames[idx].data.as_ptr() as *mut u8
    }
}

impl Default for BufferPool {
    fn default() -> Self {
        Self::new(DEFAULT_POOL_CAPACITY)
    }
}

impl PoolInner {
    /// Returns the index of a frame usable for `key`: an unused slot if the
    /// pool has not reached capacity, otherwise the SIEVE victim's slot.
    fn acquire_frame(&mut self, key: PageKey, capacity: usize) -> Result<usize> {
        if self.frames.len() < capacity {
            self.frames.push(Frame::new(key));
            return Ok(self.frames.len() - 1);
        }

        let victim = self.evict()?;
        let old_key = self.frames[victim].key;
        // Only drop the table entry if it still points at this slot; a
        // frame orphaned by a failed read shares its key with a live one.
        if self.table.get(&old_key) == Some(&victim) {
            self.table.remove(&old_key);
        }
        self.frames[victim].key = key;
        self.frames[victim].dirty = false;
        self.frames[victim].visited = false;
        Ok(victim)
    }

    /// SIEVE second-chance scan. Writes a dirty victim back before
    /// returning its slot.
    fn evict(&mut self) -> Result<usize> {
        let len = self.frames.len();
        let mut examined = 0;

        loop {
            if examined >= 2 * len {
                return Err(Error::PoolExhausted { capacity: len });
            }
            let idx = self.hand;
            self.hand = (self.hand + 1) % len;
            examined += 1;

            let frame = &mut self.frames[idx];
            if frame.pin_count > 0 {
                continue;
            }
            if frame.visited {
                frame.visited = false;
                continue;
            }

            if frame.dirty {
                let key = frame.key;
                let PoolInner { files, frames, .. } = &mut *self;
                if let Some(file_obj) = files.get_mut(&key.file) {
                    file_obj.write_page(key.page_no, &frames[idx].data)?;
                }
                frames[idx].dirty = false;
            }
            return Ok(idx);
        }
    }

    fn flush_frames_of(&mut self, file: FileId) -> Result<()> {
        let PoolInner { files, frames, .. } = self;
        let file_obj = files
            .get_mut(&file)
            .ok_or_else(|| Error::Corrupted("flush of unregistered file".into()))?;

        for frame in frames.iter_mut() {
            if frame.key.file == file && frame.dirty {
                file_obj.write_page(frame.key.page_no, &frame.data)?;
                frame.dirty = false;
            }
        }
        Ok(())
    }
}

/// Pinned access to one page. Dropping the guard releases the pin; if the
/// guard handed out mutable access the release carries the dirty flag.
pub struct PageGuard {
    pool: Arc<BufferPool>,
    key: PageKey,
    dirty: bool,
}

impl PageGuard {
    fn new(pool: Arc<BufferPool>, key: PageKey) -> Self {
        Self {
            pool,
            key,
            dirty: false,
        }
    }

    pub fn page_no(&self) -> u32 {
        self.key.page_no
    }

    pub fn data(&self) -> &[u8] {
        let ptr = self.pool.data_ptr(self.key);
        // SAFETY: the frame is pinned for as long as this guard lives, so
        // its slot cannot be reused and the boxed page buffer (a stable
        // heap allocation of PAGE_SIZE bytes) stays valid. The returned
        // borrow is tied to &self, which cannot outlive the guard.
        unsafe { std::slice::from_raw_parts(ptr, PAGE_SIZE) }
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        self.dirty = true;
        let ptr = self.pool.data_ptr(self.key);
        // SAFETY: as in data(), the pinned frame's buffer is stable and
        // valid for PAGE_SIZE bytes. Exclusivity comes from &mut self plus
        // the engine's single-threaded access discipline: no two guards
        // hand out overlapping mutable access to the same page.
        unsafe { std::slice::from_raw_parts_mut(ptr, PAGE_SIZE) }
    }

    /// Forces the eventual unpin to carry `dirty = true` even if all
    /// mutation happened through an earlier guard view.
    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }
}

impl Drop for PageGuard {
    fn drop(&mut self) {
        let result = self.pool.unpin(self.key, self.dirty);
        debug_assert!(result.is_ok(), "guard unpin failed: {:?}", result);
    }
}
