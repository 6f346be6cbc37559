//! Buffer frame management.

use brindle_common::page::{PageId, PAGE_SIZE};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};

/// Sentinel value indicating no page is loaded in the frame.
const NO_PAGE: u64 = u64::MAX;

/// Unique identifier for a frame in the buffer pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FrameId(pub u32);

impl std::fmt::Display for FrameId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "frame:{}", self.0)
    }
}

/// A frame in the buffer pool holding a single index file page.
///
/// Besides the page bytes themselves a frame carries the metadata the pool
/// needs: which page is resident, how many pins are outstanding, whether the
/// page was modified since it was last written out, and the reference bit for
/// clock replacement. A frame with a nonzero pin count is never evicted.
pub struct BufferFrame {
    /// Frame identifier.
    frame_id: FrameId,
    /// The page currently stored in this frame (packed PageId, NO_PAGE = none).
    page_id: AtomicU64,
    /// Page data buffer.
    data: RwLock<Box<[u8; PAGE_SIZE]>>,
    /// Number of users currently holding this page.
    pin_count: AtomicU32,
    /// Whether the page has been modified since load.
    is_dirty: AtomicBool,
    /// Reference bit for clock replacement.
    reference_bit: AtomicBool,
}

impl BufferFrame {
    /// Creates a new empty buffer frame.
    pub fn new(frame_id: FrameId) -> Self {
        Self {
            frame_id,
            page_id: AtomicU64::new(NO_PAGE),
            data: RwLock::new(Box::new([0u8; PAGE_SIZE])),
            pin_count: AtomicU32::new(0),
            is_dirty: AtomicBool::new(false),
            reference_bit: AtomicBool::new(false),
        }
    }

    /// Returns the frame ID.
    #[inline]
    pub fn frame_id(&self) -> FrameId {
        self.frame_id
    }

    /// Returns the page currently resident in this frame.
    #[inline]
    pub fn page_id(&self) -> Option<PageId> {
        let packed = self.page_id.load(Ordering::Acquire);
        if packed == NO_PAGE {
            None
        } else {
            Some(PageId::from_u64(packed))
        }
    }

    /// Sets the page resident in this frame.
    #[inline]
    pub fn set_page_id(&self, page_id: Option<PageId>) {
        let packed = match page_id {
            Some(pid) => pid.as_u64(),
            None => NO_PAGE,
        };
        self.page_id.store(packed, Ordering::Release);
    }

    /// Returns the current pin count.
    #[inline]
    pub fn pin_count(&self) -> u32 {
        self.pin_count.load(Ordering::Acquire)
    }

    /// Takes a pin on this frame and sets the reference bit.
    #[inline]
    pub fn pin(&self) {
        self.pin_count.fetch_add(1, Ordering::AcqRel);
        self.reference_bit.store(true, Ordering::Relaxed);
    }

    /// Drops one pin. Returns the new pin count.
    #[inline]
    pub fn unpin(&self) -> u32 {
        let prev = self.pin_count.fetch_sub(1, Ordering::AcqRel);
        if prev == 0 {
            // Underflow protection: restore to 0
            self.pin_count.store(0, Ordering::Release);
            return 0;
        }
        prev - 1
    }

    /// Returns true if any pin is outstanding.
    #[inline]
    pub fn is_pinned(&self) -> bool {
        self.pin_count.load(Ordering::Acquire) > 0
    }

    /// Returns true if this frame holds unwritten modifications.
    #[inline]
    pub fn is_dirty(&self) -> bool {
        self.is_dirty.load(Ordering::Acquire)
    }

    /// Sets or clears the dirty flag.
    #[inline]
    pub fn set_dirty(&self, dirty: bool) {
        self.is_dirty.store(dirty, Ordering::Release);
    }

    /// Returns the reference bit value.
    #[inline]
    pub fn reference_bit(&self) -> bool {
        self.reference_bit.load(Ordering::Relaxed)
    }

    /// Sets the reference bit.
    #[inline]
    pub fn set_reference_bit(&self, value: bool) {
        self.reference_bit.store(value, Ordering::Relaxed);
    }

    /// Reads the page data.
    #[inline]
    pub fn read_data(&self) -> parking_lot::RwLockReadGuard<'_, Box<[u8; PAGE_SIZE]>> {
        self.data.read()
    }

    /// Writes to the page data.
    #[inline]
    pub fn write_data(&self) -> parking_lot::RwLockWriteGuard<'_, Box<[u8; PAGE_SIZE]>> {
        self.data.write()
    }

    /// Copies data into the frame.
    #[inline]
    pub fn copy_from(&self, src: &[u8]) {
        let mut data = self.data.write();
        let len = src.len().min(PAGE_SIZE);
        data[..len].copy_from_slice(&src[..len]);
    }

    /// Resets the frame to empty state, zeroing the page bytes.
    #[inline]
    pub fn reset(&self) {
        self.page_id.store(NO_PAGE, Ordering::Release);
        self.pin_count.store(0, Ordering::Release);
        self.is_dirty.store(false, Ordering::Release);
        self.reference_bit.store(false, Ordering::Relaxed);
        let mut data = self.data.write();
        data.fill(0);
    }
}

impl std::fmt::Debug for BufferFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BufferFrame")
            .field("frame_id", &self.frame_id)
            .field("page_id", &self.page_id())
            .field("pin_count", &self.pin_count())
            .field("is_dirty", &self.is_dirty())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buffer_frame_new() {
        let frame = BufferFrame::new(FrameId(0));

        assert_eq!(frame.frame_id(), FrameId(0));
        assert!(frame.page_id().is_none());
        assert_eq!(frame.pin_count(), 0);
        assert!(!frame.is_dirty());
        assert!(!frame.reference_bit());
    }

    #[test]
    fn test_buffer_frame_pin_unpin() {
        let frame = BufferFrame::new(FrameId(0));

        assert!(!frame.is_pinned());

        frame.pin();
        assert!(frame.is_pinned());
        assert_eq!(frame.pin_count(), 1);
        assert!(frame.reference_bit());

        frame.pin();
        assert_eq!(frame.pin_count(), 2);

        frame.unpin();
        assert_eq!(frame.pin_count(), 1);
        assert!(frame.is_pinned());

        frame.unpin();
        assert_eq!(frame.pin_count(), 0);
        assert!(!frame.is_pinned());
    }

    #[test]
    fn test_buffer_frame_unpin_underflow() {
        let frame = BufferFrame::new(FrameId(0));

        // Unpin when already at 0 stays at 0
        assert_eq!(frame.unpin(), 0);
        assert_eq!(frame.pin_count(), 0);
    }

    #[test]
    fn test_buffer_frame_dirty() {
        let frame = BufferFrame::new(FrameId(0));

        assert!(!frame.is_dirty());
        frame.set_dirty(true);
        assert!(frame.is_dirty());
        frame.set_dirty(false);
        assert!(!frame.is_dirty());
    }

    #[test]
    fn test_buffer_frame_page_id() {
        let frame = BufferFrame::new(FrameId(0));
        let page_id = PageId::new(1, 100);

        assert!(frame.page_id().is_none());

        frame.set_page_id(Some(page_id));
        assert_eq!(frame.page_id(), Some(page_id));

        frame.set_page_id(None);
        assert!(frame.page_id().is_none());
    }

    #[test]
    fn test_buffer_frame_data_access() {
        let frame = BufferFrame::new(FrameId(0));

        {
            let mut data = frame.write_data();
            data[0] = 0xAB;
            data[PAGE_SIZE - 1] = 0xCD;
        }

        let data = frame.read_data();
        assert_eq!(data[0], 0xAB);
        assert_eq!(data[PAGE_SIZE - 1], 0xCD);
    }

    #[test]
    fn test_buffer_frame_copy_from() {
        let frame = BufferFrame::new(FrameId(0));
        frame.copy_from(&[1u8, 2, 3, 4, 5]);

        let data = frame.read_data();
        assert_eq!(&data[..5], &[1, 2, 3, 4, 5]);
        assert_eq!(data[5], 0);
    }

    #[test]
    fn test_buffer_frame_reset() {
        let frame = BufferFrame::new(FrameId(0));

        frame.set_page_id(Some(PageId::new(1, 1)));
        frame.pin();
        frame.set_dirty(true);
        frame.set_reference_bit(true);
        frame.write_data()[0] = 0xFF;

        frame.reset();

        assert!(frame.page_id().is_none());
        assert_eq!(frame.pin_count(), 0);
        assert!(!frame.is_dirty());
        assert!(!frame.reference_bit());
        assert_eq!(frame.read_data()[0], 0);
    }
}
