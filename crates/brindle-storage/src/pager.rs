//! Pin-scoped page access routed through the buffer pool.
//!
//! Every page the index touches is bracketed by a pin and an unpin. The
//! `PageGuard` returned here owns exactly one pin and releases it when
//! dropped, so a forgotten unpin or a double unpin cannot be written: any
//! exit path, including error propagation, unwinds the guards on the stack.
//! Whether the unpin reports the page dirty is the one decision left to the
//! caller, made through `mark_dirty`.

use crate::disk::DiskManager;
use brindle_buffer::{BufferPool, EvictedPage};
use brindle_common::page::{PageId, PAGE_SIZE};
use brindle_common::Result;
use parking_lot::{RwLockReadGuard, RwLockWriteGuard};
use std::sync::Arc;

/// Routes page reads and allocations of index files through the buffer pool,
/// writing evicted dirty pages back to disk as they fall out.
#[derive(Clone)]
pub struct Pager {
    disk: Arc<DiskManager>,
    pool: Arc<BufferPool>,
}

impl Pager {
    /// Creates a pager over a disk manager and a buffer pool.
    pub fn new(disk: Arc<DiskManager>, pool: Arc<BufferPool>) -> Self {
        Self { disk, pool }
    }

    /// Pins a page, reading it from disk if it is not resident.
    pub fn fetch(&self, page_id: PageId) -> Result<PageGuard> {
        if self.pool.fetch_page(page_id).is_some() {
            return Ok(PageGuard::new(self.pool.clone(), page_id));
        }

        let data = self.disk.read_page(page_id)?;
        let (_, evicted) = self.pool.load_page(page_id, &data)?;
        let guard = PageGuard::new(self.pool.clone(), page_id);
        self.write_back(evicted)?;
        Ok(guard)
    }

    /// Allocates a fresh page in the file and pins it, zeroed.
    pub fn alloc(&self, file_id: u32) -> Result<PageGuard> {
        let page_no = self.disk.allocate_page(file_id)?;
        let page_id = PageId::new(file_id, page_no);
        let (_, evicted) = self.pool.new_page(page_id)?;
        let guard = PageGuard::new(self.pool.clone(), page_id);
        self.write_back(evicted)?;
        Ok(guard)
    }

    /// Writes all of a file's dirty resident pages out and syncs the file.
    pub fn flush_file(&self, file_id: u32) -> Result<()> {
        self.pool
            .flush_file(file_id, |page_id, data| self.write_page(page_id, data))?;
        self.disk.sync_file(file_id)
    }

    /// Flushes a file, forgets its cached pages, and closes its handle.
    ///
    /// Fails with `PagePinned` if any of its pages is still pinned.
    pub fn release_file(&self, file_id: u32) -> Result<()> {
        self.pool
            .flush_file(file_id, |page_id, data| self.write_page(page_id, data))?;
        self.pool.drop_file_pages(file_id)?;
        self.disk.close_file(file_id)
    }

    fn write_page(&self, page_id: PageId, data: &[u8]) -> Result<()> {
        let mut page = [0u8; PAGE_SIZE];
        page.copy_from_slice(data);
        self.disk.write_page(page_id, &page)
    }

    fn write_back(&self, evicted: Option<EvictedPage>) -> Result<()> {
        if let Some(evicted) = evicted {
            self.disk.write_page(evicted.page_id, &evicted.data)?;
        }
        Ok(())
    }
}

/// A pinned page. Holds exactly one pin; dropping the guard unpins, passing
/// along whether the page was marked dirty in this scope.
pub struct PageGuard {
    pool: Arc<BufferPool>,
    page_id: PageId,
    dirty: bool,
}

impl PageGuard {
    fn new(pool: Arc<BufferPool>, page_id: PageId) -> Self {
        Self {
            pool,
            page_id,
            dirty: false,
        }
    }

    /// Returns the id of the pinned page.
    pub fn page_id(&self) -> PageId {
        self.page_id
    }

    /// Returns the page number within its file.
    pub fn page_no(&self) -> u32 {
        self.page_id.page_no
    }

    /// Borrows the page bytes for reading.
    pub fn data(&self) -> RwLockReadGuard<'_, Box<[u8; PAGE_SIZE]>> {
        // The pin held by this guard keeps the frame resident
        self.pool
            .frame(self.page_id)
            .expect("pinned page must stay resident")
            .read_data()
    }

    /// Borrows the page bytes for writing. Call `mark_dirty` once mutated.
    pub fn data_mut(&mut self) -> RwLockWriteGuard<'_, Box<[u8; PAGE_SIZE]>> {
        self.pool
            .frame(self.page_id)
            .expect("pinned page must stay resident")
            .write_data()
    }

    /// Records that this scope mutated the page; the unpin will be dirty.
    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }
}

impl Drop for PageGuard {
    fn drop(&mut self) {
        self.pool.unpin_page(self.page_id, self.dirty);
    }
}
