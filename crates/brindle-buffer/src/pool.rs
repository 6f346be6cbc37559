//! Buffer pool manager.

use crate::frame::{BufferFrame, FrameId};
use crate::page_table::PageTable;
use crate::replacer::{ClockReplacer, Replacer};
use brindle_common::page::{PageId, PAGE_SIZE};
use brindle_common::{BrindleError, Result};
use parking_lot::Mutex;
use sysinfo::System;

/// A dirty page that was evicted from the buffer pool.
/// The caller must write it to its file to prevent data loss.
#[derive(Debug)]
pub struct EvictedPage {
    pub page_id: PageId,
    pub data: Box<[u8; PAGE_SIZE]>,
}

/// Configuration for the buffer pool.
#[derive(Debug, Clone)]
pub struct BufferPoolConfig {
    /// Number of frames in the pool.
    pub num_frames: usize,
}

impl Default for BufferPoolConfig {
    fn default() -> Self {
        Self { num_frames: 1024 }
    }
}

/// Buffer pool manager.
///
/// Caches index file pages in a fixed set of frames with pin counting and
/// dirty tracking. The pool itself performs no file I/O: pages enter through
/// `load_page`/`new_page` and leave either through the flush callbacks or as
/// `EvictedPage` values the caller writes back. A pinned page is never
/// evicted, which is what makes a borrowed page view stable for the duration
/// of its pin.
pub struct BufferPool {
    /// Configuration.
    config: BufferPoolConfig,
    /// Array of buffer frames.
    frames: Vec<BufferFrame>,
    /// Page ID to frame ID mapping.
    page_table: PageTable,
    /// List of free frame IDs.
    free_list: Mutex<Vec<FrameId>>,
    /// Page replacement policy.
    replacer: ClockReplacer,
}

impl BufferPool {
    /// Creates a new buffer pool.
    pub fn new(config: BufferPoolConfig) -> Self {
        let num_frames = config.num_frames;

        let frames: Vec<_> = (0..num_frames)
            .map(|i| BufferFrame::new(FrameId(i as u32)))
            .collect();

        // All frames start in the free list
        let free_list: Vec<_> = (0..num_frames).map(|i| FrameId(i as u32)).collect();

        Self {
            config,
            frames,
            page_table: PageTable::new(num_frames),
            free_list: Mutex::new(free_list),
            replacer: ClockReplacer::new(num_frames),
        }
    }

    /// Creates a buffer pool sized to 25% of available system RAM, with a
    /// floor of 1,000 frames so low-memory systems still cache usefully.
    pub fn auto_sized() -> Self {
        let mut sys = System::new_all();
        sys.refresh_memory();

        let available_bytes = sys.available_memory() as usize;
        let target_bytes = available_bytes / 4;
        let num_frames = (target_bytes / PAGE_SIZE).max(1_000);

        Self::new(BufferPoolConfig { num_frames })
    }

    /// Returns the number of frames in the pool.
    pub fn num_frames(&self) -> usize {
        self.config.num_frames
    }

    /// Returns the number of free frames.
    pub fn free_count(&self) -> usize {
        self.free_list.lock().len()
    }

    /// Returns the number of pages currently resident.
    pub fn page_count(&self) -> usize {
        self.page_table.len()
    }

    /// Checks if a page is resident.
    pub fn contains(&self, page_id: PageId) -> bool {
        self.page_table.contains(page_id)
    }

    /// Fetches a resident page, taking a pin on it.
    ///
    /// Returns None if the page is not in the pool; the caller then reads it
    /// from disk and installs it with `load_page`.
    #[inline]
    pub fn fetch_page(&self, page_id: PageId) -> Option<&BufferFrame> {
        let frame_id = self.page_table.get(page_id)?;
        let frame = &self.frames[frame_id.0 as usize];
        frame.pin();
        self.replacer.record_access(frame_id);
        Some(frame)
    }

    /// Returns the frame of a resident page without pinning it.
    ///
    /// Only meaningful while the caller already holds a pin on the page; an
    /// unpinned page may be evicted at any point, invalidating the frame.
    #[inline]
    pub fn frame(&self, page_id: PageId) -> Option<&BufferFrame> {
        let frame_id = self.page_table.get(page_id)?;
        Some(&self.frames[frame_id.0 as usize])
    }

    /// Allocates a frame, evicting an unpinned page if no frame is free.
    fn allocate_frame(&self) -> Result<(FrameId, Option<EvictedPage>)> {
        {
            let mut free_list = self.free_list.lock();
            if let Some(frame_id) = free_list.pop() {
                return Ok((frame_id, None));
            }
        }

        let victim_id = self.replacer.evict(&|fid| {
            let frame = &self.frames[fid.0 as usize];
            frame.page_id().is_some() && !frame.is_pinned()
        });

        if let Some(victim_id) = victim_id {
            let frame = &self.frames[victim_id.0 as usize];

            // Hand a dirty victim back to the caller for write-back
            let evicted = match frame.page_id() {
                Some(page_id) if frame.is_dirty() => {
                    let data_guard = frame.read_data();
                    let mut data = Box::new([0u8; PAGE_SIZE]);
                    data.copy_from_slice(&**data_guard);
                    drop(data_guard);
                    Some(EvictedPage { page_id, data })
                }
                _ => None,
            };

            if let Some(old_page_id) = frame.page_id() {
                self.page_table.remove(old_page_id);
            }

            return Ok((victim_id, evicted));
        }

        Err(BrindleError::BufferPoolFull)
    }

    /// Installs an empty, zeroed page into the pool, pinned.
    ///
    /// Used when a fresh page was allocated in the file. If the page is
    /// somehow already resident, the existing frame is pinned and returned.
    /// The second element is any dirty page evicted to make room.
    pub fn new_page(&self, page_id: PageId) -> Result<(&BufferFrame, Option<EvictedPage>)> {
        if let Some(frame_id) = self.page_table.get(page_id) {
            let frame = &self.frames[frame_id.0 as usize];
            frame.pin();
            self.replacer.record_access(frame_id);
            return Ok((frame, None));
        }

        let (frame_id, evicted) = self.allocate_frame()?;

        let frame = &self.frames[frame_id.0 as usize];
        frame.reset();
        frame.set_page_id(Some(page_id));
        frame.pin();
        self.replacer.record_access(frame_id);

        self.page_table.insert(page_id, frame_id);

        Ok((frame, evicted))
    }

    /// Installs page data read from disk into the pool, pinned.
    pub fn load_page(
        &self,
        page_id: PageId,
        data: &[u8],
    ) -> Result<(&BufferFrame, Option<EvictedPage>)> {
        let (frame, evicted) = self.new_page(page_id)?;
        frame.copy_from(data);
        Ok((frame, evicted))
    }

    /// Drops one pin on a page, OR-ing in the dirty flag.
    ///
    /// A page whose pin count reaches zero becomes an eviction candidate.
    /// Returns false if the page is not resident.
    pub fn unpin_page(&self, page_id: PageId, is_dirty: bool) -> bool {
        if let Some(frame_id) = self.page_table.get(page_id) {
            let frame = &self.frames[frame_id.0 as usize];

            if is_dirty {
                frame.set_dirty(true);
            }

            frame.unpin();
            return true;
        }
        false
    }

    /// Flushes every dirty resident page of one file through the callback and
    /// clears their dirty bits. Returns the number of pages flushed.
    pub fn flush_file<F>(&self, file_id: u32, mut flush_fn: F) -> Result<usize>
    where
        F: FnMut(PageId, &[u8]) -> Result<()>,
    {
        let mut targets = Vec::new();
        self.page_table.for_each(|page_id, frame_id| {
            if page_id.file_id == file_id {
                targets.push((page_id, frame_id));
            }
        });

        let mut flushed = 0;
        for (page_id, frame_id) in targets {
            let frame = &self.frames[frame_id.0 as usize];
            if frame.is_dirty() {
                let data = frame.read_data();
                flush_fn(page_id, &**data)?;
                drop(data);
                frame.set_dirty(false);
                flushed += 1;
            }
        }

        Ok(flushed)
    }

    /// Flushes all dirty pages of every file. Returns the number flushed.
    pub fn flush_all<F>(&self, mut flush_fn: F) -> Result<usize>
    where
        F: FnMut(PageId, &[u8]) -> Result<()>,
    {
        let mut targets = Vec::new();
        self.page_table.for_each(|page_id, frame_id| {
            targets.push((page_id, frame_id));
        });

        let mut flushed = 0;
        for (page_id, frame_id) in targets {
            let frame = &self.frames[frame_id.0 as usize];
            if frame.is_dirty() {
                let data = frame.read_data();
                flush_fn(page_id, &**data)?;
                drop(data);
                frame.set_dirty(false);
                flushed += 1;
            }
        }

        Ok(flushed)
    }

    /// Forgets every resident page of a closed file, returning its frames to
    /// the free list. Fails with `PagePinned` if any page of the file is
    /// still pinned; nothing is removed in that case.
    ///
    /// Callers flush the file first; any still-dirty page is discarded here.
    pub fn drop_file_pages(&self, file_id: u32) -> Result<usize> {
        let mut targets = Vec::new();
        self.page_table.for_each(|page_id, frame_id| {
            if page_id.file_id == file_id {
                targets.push((page_id, frame_id));
            }
        });

        for &(page_id, frame_id) in &targets {
            if self.frames[frame_id.0 as usize].is_pinned() {
                return Err(BrindleError::PagePinned { page_id });
            }
        }

        for &(page_id, frame_id) in &targets {
            let frame = &self.frames[frame_id.0 as usize];
            self.page_table.remove(page_id);
            self.replacer.remove(frame_id);
            frame.reset();
            self.free_list.lock().push(frame_id);
        }

        Ok(targets.len())
    }
}
