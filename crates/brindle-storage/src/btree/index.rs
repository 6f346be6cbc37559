//! The B+ tree index over one integer attribute of a relation.
//!
//! One index owns one file. The file's first page is the header (metadata),
//! and the root is always an internal node, so even an empty tree is a
//! level-1 root above a single empty leaf. Insertion descends recursively
//! and propagates splits back up as `(page, key)` pairs: leaf splits copy
//! the new right leaf's first key up, internal splits push their median up,
//! and a pair escaping the root grows the tree by one level.
//!
//! At most one scan is active per index. The scan keeps exactly one page
//! pinned, the current leaf, and walks rightward along the sibling chain.

use crate::btree::node::{
    split_internal, split_leaf, InternalNode, LeafNode, MetaNode, LEAF_CAPACITY, LEVEL_ABOVE_LEAF,
    NODE_CAPACITY,
};
use crate::disk::DiskManager;
use crate::pager::{PageGuard, Pager};
use crate::record::Rid;
use brindle_buffer::BufferPool;
use brindle_common::page::{PageId, INVALID_PAGE_NO};
use brindle_common::types::{AttrType, ScanOp};
use brindle_common::{BrindleError, Result};
use bytes::Bytes;
use std::sync::Arc;

/// A `(page, key)` pair propagating out of a split: the new right page and
/// the separator key the parent must install for it.
struct PageKeyPair {
    page_no: u32,
    key: i32,
}

/// State of the one active scan.
struct ScanState {
    low: i32,
    low_op: ScanOp,
    high: i32,
    high_op: ScanOp,
    /// Current leaf, pinned across calls. None once the range is exhausted.
    leaf: Option<PageGuard>,
    /// Slot of the entry `next_scan` will emit next.
    next_entry: usize,
}

impl ScanState {
    /// Walks forward to the next entry satisfying both bounds, hopping
    /// right-sibling leaves as pages run out. On a hit the leaf stays
    /// pinned and `next_entry` points at the match; on exhaustion the leaf
    /// is unpinned and cleared, and false is returned.
    fn advance(&mut self, pager: &Pager, file_id: u32) -> Result<bool> {
        loop {
            let Some(leaf) = self.leaf.as_ref() else {
                return Ok(false);
            };

            let (entry_key, sibling) = {
                let data = leaf.data();
                let view = LeafNode::new(&**data);
                if self.next_entry >= LEAF_CAPACITY || !view.rid(self.next_entry).is_valid() {
                    (None, view.right_sibling())
                } else {
                    (Some(view.key(self.next_entry)), INVALID_PAGE_NO)
                }
            };

            let Some(entry_key) = entry_key else {
                // Unpin the exhausted leaf before pinning its sibling
                self.leaf = None;
                if sibling == INVALID_PAGE_NO {
                    return Ok(false);
                }
                self.leaf = Some(pager.fetch(PageId::new(file_id, sibling))?);
                self.next_entry = 0;
                continue;
            };

            if !self.low_op.compare(entry_key, self.low) {
                // Below the lower bound: descent lands at the leftmost leaf
                // that could hold a match, so this only happens before the
                // first hit
                self.next_entry += 1;
                continue;
            }
            if !self.high_op.compare(entry_key, self.high) {
                self.leaf = None;
                return Ok(false);
            }
            return Ok(true);
        }
    }
}

/// A persistent B+ tree index on a single integer attribute.
pub struct BTreeIndex {
    pager: Pager,
    file_id: u32,
    index_name: String,
    header_page_no: u32,
    root_page_no: u32,
    attr_byte_offset: u32,
    attr_type: AttrType,
    scan: Option<ScanState>,
    closed: bool,
}

impl BTreeIndex {
    /// Opens the index for `relation_name` on the attribute at
    /// `attr_byte_offset`, creating and bulk-building it if its file does
    /// not exist yet. Returns the index and its file name,
    /// `"<relation>.<offset>"`.
    ///
    /// `scan_relation` is invoked only on creation; it yields the relation's
    /// `(rid, record)` pairs and the key is read as a little-endian `i32` at
    /// `attr_byte_offset` of each record. Only `AttrType::Integer` keys are
    /// supported.
    ///
    /// Opening an existing file verifies the stored name, attribute offset,
    /// and type tag against the arguments and fails with `BadIndexInfo` on
    /// any mismatch. The name field is 20 bytes, so an index name longer
    /// than that is stored truncated and can never be reopened.
    pub fn open<F, I>(
        disk: Arc<DiskManager>,
        pool: Arc<BufferPool>,
        relation_name: &str,
        attr_byte_offset: u32,
        attr_type: AttrType,
        scan_relation: F,
    ) -> Result<(BTreeIndex, String)>
    where
        F: FnOnce() -> I,
        I: IntoIterator<Item = (Rid, Bytes)>,
    {
        let index_name = format!("{}.{}", relation_name, attr_byte_offset);

        if disk.exists(&index_name) {
            Self::open_existing(disk, pool, index_name.clone(), attr_byte_offset, attr_type)
                .map(|index| (index, index_name))
        } else {
            Self::create(
                disk,
                pool,
                index_name.clone(),
                attr_byte_offset,
                attr_type,
                scan_relation,
            )
            .map(|index| (index, index_name))
        }
    }

    fn open_existing(
        disk: Arc<DiskManager>,
        pool: Arc<BufferPool>,
        index_name: String,
        attr_byte_offset: u32,
        attr_type: AttrType,
    ) -> Result<BTreeIndex> {
        let file_id = disk.open(&index_name)?;
        // An index file always has its header at the first page; an empty
        // file of the right name is not an index file at all
        let header_page_no = match disk.first_page_no(file_id) {
            Ok(page_no) => page_no,
            Err(_) => {
                disk.close_file(file_id)?;
                return Err(BrindleError::BadIndexInfo { index_name });
            }
        };
        let pager = Pager::new(disk, pool);

        let header = pager.fetch(PageId::new(file_id, header_page_no))?;
        let stored_root = {
            let data = header.data();
            let meta = MetaNode::new(&**data);
            if meta.attr_type_tag() != attr_type.tag()
                || meta.attr_byte_offset() != attr_byte_offset
                || !meta.name_matches(&index_name)
            {
                None
            } else {
                Some(meta.root_page_no())
            }
        };
        // Unpinned clean whether the metadata matched or not
        drop(header);

        let Some(root_page_no) = stored_root else {
            pager.release_file(file_id)?;
            return Err(BrindleError::BadIndexInfo { index_name });
        };

        Ok(BTreeIndex {
            pager,
            file_id,
            index_name,
            header_page_no,
            root_page_no,
            attr_byte_offset,
            attr_type,
            scan: None,
            closed: false,
        })
    }

    fn create<F, I>(
        disk: Arc<DiskManager>,
        pool: Arc<BufferPool>,
        index_name: String,
        attr_byte_offset: u32,
        attr_type: AttrType,
        scan_relation: F,
    ) -> Result<BTreeIndex>
    where
        F: FnOnce() -> I,
        I: IntoIterator<Item = (Rid, Bytes)>,
    {
        let file_id = disk.create(&index_name)?;
        let pager = Pager::new(disk, pool);

        let mut header = pager.alloc(file_id)?;
        let mut root = pager.alloc(file_id)?;
        let mut leaf = pager.alloc(file_id)?;
        let header_page_no = header.page_no();
        let root_page_no = root.page_no();

        {
            let mut data = root.data_mut();
            let mut node = InternalNode::new(&mut **data);
            node.init(LEVEL_ABOVE_LEAF);
            node.set_child(0, leaf.page_no());
        }
        root.mark_dirty();

        {
            let mut data = leaf.data_mut();
            LeafNode::new(&mut **data).init();
        }
        leaf.mark_dirty();

        {
            let mut data = header.data_mut();
            let mut meta = MetaNode::new(&mut **data);
            meta.set_index_name(&index_name);
            meta.set_attr_byte_offset(attr_byte_offset);
            meta.set_attr_type_tag(attr_type.tag());
            meta.set_root_page_no(root_page_no);
        }
        header.mark_dirty();

        drop(header);
        drop(root);
        drop(leaf);

        let mut index = BTreeIndex {
            pager,
            file_id,
            index_name,
            header_page_no,
            root_page_no,
            attr_byte_offset,
            attr_type,
            scan: None,
            closed: false,
        };

        for (rid, record) in scan_relation() {
            let key = extract_key(&record, attr_byte_offset as usize)?;
            index.insert(key, rid)?;
        }
        index.pager.flush_file(file_id)?;

        Ok(index)
    }

    /// Returns the index file name.
    pub fn index_name(&self) -> &str {
        &self.index_name
    }

    /// Returns the byte offset of the indexed attribute.
    pub fn attr_byte_offset(&self) -> u32 {
        self.attr_byte_offset
    }

    /// Returns the declared attribute type.
    pub fn attr_type(&self) -> AttrType {
        self.attr_type
    }

    fn page_id(&self, page_no: u32) -> PageId {
        PageId::new(self.file_id, page_no)
    }

    /// Inserts a `(key, rid)` pair. Duplicate keys are permitted; equal keys
    /// keep no defined rid order.
    pub fn insert(&mut self, key: i32, rid: Rid) -> Result<()> {
        if let Some(pushed) = self.insert_into_subtree(self.root_page_no, key, rid)? {
            // The root itself split: a new root adopts the two halves and
            // the tree grows a level. Its children are internal, so level 0.
            let old_root_page_no = self.root_page_no;
            let mut root = self.pager.alloc(self.file_id)?;
            {
                let mut data = root.data_mut();
                let mut node = InternalNode::new(&mut **data);
                node.init(0);
                node.set_child(0, old_root_page_no);
                node.set_key(0, pushed.key);
                node.set_child(1, pushed.page_no);
            }
            root.mark_dirty();
            self.root_page_no = root.page_no();
            drop(root);

            self.store_root_page_no()?;
        }
        Ok(())
    }

    /// Mirrors a root change into the header page.
    fn store_root_page_no(&self) -> Result<()> {
        let mut header = self.pager.fetch(self.page_id(self.header_page_no))?;
        {
            let mut data = header.data_mut();
            MetaNode::new(&mut **data).set_root_page_no(self.root_page_no);
        }
        header.mark_dirty();
        Ok(())
    }

    /// Inserts below the internal node at `node_page_no`, splitting children
    /// as needed. Returns the pair to install in this node's parent if this
    /// node itself had to split.
    fn insert_into_subtree(
        &self,
        node_page_no: u32,
        key: i32,
        rid: Rid,
    ) -> Result<Option<PageKeyPair>> {
        let mut node = self.pager.fetch(self.page_id(node_page_no))?;
        let (level, child_page_no) = {
            let data = node.data();
            let view = InternalNode::new(&**data);
            (view.level(), view.locate_child(key, ScanOp::Gte))
        };

        let promoted = if level == LEVEL_ABOVE_LEAF {
            self.insert_into_leaf(child_page_no, key, rid)?
        } else {
            self.insert_into_subtree(child_page_no, key, rid)?
        };

        match promoted {
            Some(pair) => self.insert_into_node(&mut node, pair),
            None => Ok(None),
        }
    }

    /// Inserts into a leaf, splitting it when full. Returns the copy-up
    /// pair for the parent on split.
    fn insert_into_leaf(&self, leaf_page_no: u32, key: i32, rid: Rid) -> Result<Option<PageKeyPair>> {
        let mut leaf = self.pager.fetch(self.page_id(leaf_page_no))?;
        let (m, pos) = {
            let data = leaf.data();
            LeafNode::new(&**data).locate_insert(key)
        };

        if m < LEAF_CAPACITY {
            {
                let mut data = leaf.data_mut();
                LeafNode::new(&mut **data).insert_at(m, pos, key, rid);
            }
            leaf.mark_dirty();
            return Ok(None);
        }

        let mut split = self.pager.alloc(self.file_id)?;
        let split_page_no = split.page_no();
        let separator = {
            let mut left_data = leaf.data_mut();
            let mut right_data = split.data_mut();
            let mut left = LeafNode::new(&mut **left_data);
            let mut right = LeafNode::new(&mut **right_data);
            split_leaf(&mut left, &mut right, split_page_no, pos, key, rid)
        };
        leaf.mark_dirty();
        split.mark_dirty();

        Ok(Some(PageKeyPair {
            page_no: split_page_no,
            key: separator,
        }))
    }

    /// Installs a promoted pair into an internal node, splitting it when
    /// full. Returns the push-up pair for the parent on split.
    fn insert_into_node(
        &self,
        node: &mut PageGuard,
        pair: PageKeyPair,
    ) -> Result<Option<PageKeyPair>> {
        let (m, pos) = {
            let data = node.data();
            InternalNode::new(&**data).locate_insert(pair.key)
        };

        if m < NODE_CAPACITY {
            {
                let mut data = node.data_mut();
                InternalNode::new(&mut **data).insert_pair_at(m, pos, pair.key, pair.page_no);
            }
            node.mark_dirty();
            return Ok(None);
        }

        let mut split = self.pager.alloc(self.file_id)?;
        let median = {
            let mut left_data = node.data_mut();
            let mut right_data = split.data_mut();
            let mut left = InternalNode::new(&mut **left_data);
            let mut right = InternalNode::new(&mut **right_data);
            split_internal(&mut left, &mut right, pos, pair.key, pair.page_no)
        };
        node.mark_dirty();
        split.mark_dirty();

        Ok(Some(PageKeyPair {
            page_no: split.page_no(),
            key: median,
        }))
    }

    /// Descends from the root to the leaf that may hold the first key
    /// satisfying `value` under `op`, unpinning each internal page before
    /// pinning the next. No page stays pinned on return.
    fn find_leaf(&self, value: i32, op: ScanOp) -> Result<u32> {
        let mut page_no = self.root_page_no;
        loop {
            let node = self.pager.fetch(self.page_id(page_no))?;
            let (level, next) = {
                let data = node.data();
                let view = InternalNode::new(&**data);
                (view.level(), view.locate_child(value, op))
            };
            drop(node);

            if next == INVALID_PAGE_NO {
                return Ok(INVALID_PAGE_NO);
            }
            if level == LEVEL_ABOVE_LEAF {
                return Ok(next);
            }
            page_no = next;
        }
    }

    /// Starts a bounded range scan. A scan already in progress is ended
    /// first. Fails with `BadOpcodes` for an invalid operator pair,
    /// `BadScanRange` if `low > high`, and `NoSuchKey` if no entry
    /// satisfies the range; the index is left idle in every failure case.
    pub fn start_scan(
        &mut self,
        low: i32,
        low_op: ScanOp,
        high: i32,
        high_op: ScanOp,
    ) -> Result<()> {
        if !low_op.is_lower_bound() || !high_op.is_upper_bound() {
            return Err(BrindleError::BadOpcodes { low_op, high_op });
        }
        if low > high {
            return Err(BrindleError::BadScanRange { low, high });
        }

        // Implicitly end any scan in progress
        self.scan = None;

        let leaf_page_no = self.find_leaf(low, low_op)?;
        if leaf_page_no == INVALID_PAGE_NO {
            return Err(BrindleError::NoSuchKey);
        }

        let leaf = self.pager.fetch(self.page_id(leaf_page_no))?;
        let mut state = ScanState {
            low,
            low_op,
            high,
            high_op,
            leaf: Some(leaf),
            next_entry: 0,
        };

        if !state.advance(&self.pager, self.file_id)? {
            return Err(BrindleError::NoSuchKey);
        }

        self.scan = Some(state);
        Ok(())
    }

    /// Returns the rid of the next entry in the scan, in key-ascending
    /// order. Fails with `ScanNotInitialized` if no scan is active and
    /// `ScanCompleted` once the range is exhausted.
    pub fn next_scan(&mut self) -> Result<Rid> {
        let pager = self.pager.clone();
        let file_id = self.file_id;

        let state = self.scan.as_mut().ok_or(BrindleError::ScanNotInitialized)?;
        let Some(leaf) = state.leaf.as_ref() else {
            return Err(BrindleError::ScanCompleted);
        };

        let rid = {
            let data = leaf.data();
            LeafNode::new(&**data).rid(state.next_entry)
        };

        state.next_entry += 1;
        state.advance(&pager, file_id)?;

        Ok(rid)
    }

    /// Ends the active scan, unpinning its leaf. Fails with
    /// `ScanNotInitialized` if none is active.
    pub fn end_scan(&mut self) -> Result<()> {
        match self.scan.take() {
            Some(_) => Ok(()),
            None => Err(BrindleError::ScanNotInitialized),
        }
    }

    /// Closes the index: ends any active scan, flushes the file, forgets
    /// its cached pages, and releases the handle. Idempotent.
    pub fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.scan = None;
        self.pager.release_file(self.file_id)?;
        self.closed = true;
        Ok(())
    }
}

impl Drop for BTreeIndex {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

/// Reads the key as a little-endian i32 at `offset` inside a record.
fn extract_key(record: &[u8], offset: usize) -> Result<i32> {
    match record.get(offset..offset + 4) {
        Some(b) => Ok(i32::from_le_bytes([b[0], b[1], b[2], b[3]])),
        None => Err(BrindleError::InvalidRecord {
            len: record.len(),
            offset,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_key() {
        let mut record = vec![0u8; 12];
        record[4..8].copy_from_slice(&(-77i32).to_le_bytes());

        assert_eq!(extract_key(&record, 4).unwrap(), -77);
        assert_eq!(extract_key(&record, 0).unwrap(), 0);
        assert!(matches!(
            extract_key(&record, 10),
            Err(BrindleError::InvalidRecord { len: 12, offset: 10 })
        ));
        assert!(extract_key(&[], 0).is_err());
    }
}
