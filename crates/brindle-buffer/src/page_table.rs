//! Page table mapping resident pages to buffer frames.

use crate::frame::FrameId;
use brindle_common::page::PageId;
use parking_lot::RwLock;
use std::collections::HashMap;

/// Maps PageId to the frame currently holding that page.
///
/// Keys are the packed u64 form of the PageId so lookups hash a single
/// integer. The table says nothing about pin state; that lives on the frame.
pub struct PageTable {
    entries: RwLock<HashMap<u64, FrameId>>,
}

impl PageTable {
    /// Creates a new page table sized for the given number of frames.
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: RwLock::new(HashMap::with_capacity(capacity)),
        }
    }

    /// Looks up the frame holding a page, if resident.
    #[inline]
    pub fn get(&self, page_id: PageId) -> Option<FrameId> {
        self.entries.read().get(&page_id.as_u64()).copied()
    }

    /// Inserts or replaces a page-to-frame mapping.
    pub fn insert(&self, page_id: PageId, frame_id: FrameId) {
        self.entries.write().insert(page_id.as_u64(), frame_id);
    }

    /// Removes a mapping. Returns the frame it pointed to, if any.
    pub fn remove(&self, page_id: PageId) -> Option<FrameId> {
        self.entries.write().remove(&page_id.as_u64())
    }

    /// Returns true if the page is resident.
    pub fn contains(&self, page_id: PageId) -> bool {
        self.entries.read().contains_key(&page_id.as_u64())
    }

    /// Returns the number of resident pages.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Returns true if no pages are resident.
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Calls `f` for every resident page. Iterates over a snapshot so the
    /// callback is free to mutate the table.
    pub fn for_each<F>(&self, mut f: F)
    where
        F: FnMut(PageId, FrameId),
    {
        let snapshot: Vec<(u64, FrameId)> = self
            .entries
            .read()
            .iter()
            .map(|(&k, &v)| (k, v))
            .collect();
        for (key, frame_id) in snapshot {
            f(PageId::from_u64(key), frame_id);
        }
    }
}
