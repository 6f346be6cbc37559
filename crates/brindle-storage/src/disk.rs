//! Disk manager for page-granular index file I/O.

use brindle_common::page::{PageId, PAGE_SIZE};
use brindle_common::{BrindleError, Result};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};

/// Configuration for the disk manager.
#[derive(Debug, Clone)]
pub struct DiskManagerConfig {
    /// Base directory for index files.
    pub data_dir: PathBuf,
    /// Enable fsync after writes.
    pub fsync_enabled: bool,
}

impl Default for DiskManagerConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            fsync_enabled: true,
        }
    }
}

/// Manages reading and writing pages of named index files.
///
/// Files are addressed by name on open/create and by a per-instance `file_id`
/// afterwards; the id is what page ids carry through the buffer pool. Pages
/// are numbered from 1.
pub struct DiskManager {
    /// Configuration.
    config: DiskManagerConfig,
    /// Open file handles keyed by file_id.
    files: Mutex<HashMap<u32, FileHandle>>,
    /// Next file_id to hand out.
    next_file_id: AtomicU32,
}

/// Handle for an open index file.
struct FileHandle {
    /// The file handle.
    file: File,
    /// Path to the file.
    path: PathBuf,
    /// Number of pages in the file.
    num_pages: u32,
}

impl DiskManager {
    /// Creates a new disk manager.
    pub fn new(config: DiskManagerConfig) -> Result<Self> {
        std::fs::create_dir_all(&config.data_dir)?;

        Ok(Self {
            config,
            files: Mutex::new(HashMap::new()),
            next_file_id: AtomicU32::new(0),
        })
    }

    /// Returns the data directory path.
    pub fn data_dir(&self) -> &Path {
        &self.config.data_dir
    }

    fn file_path(&self, name: &str) -> PathBuf {
        self.config.data_dir.join(name)
    }

    /// Returns true if a file of this name exists in the data directory.
    pub fn exists(&self, name: &str) -> bool {
        self.file_path(name).exists()
    }

    /// Creates a new, empty file and opens it. Fails if the name is taken.
    pub fn create(&self, name: &str) -> Result<u32> {
        let path = self.file_path(name);
        if path.exists() {
            return Err(BrindleError::FileExists {
                name: name.to_string(),
            });
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(&path)?;

        Ok(self.register(file, path, 0))
    }

    /// Opens an existing file.
    pub fn open(&self, name: &str) -> Result<u32> {
        let path = self.file_path(name);
        if !path.exists() {
            return Err(BrindleError::FileNotFound {
                name: name.to_string(),
            });
        }

        let file = OpenOptions::new().read(true).write(true).open(&path)?;
        let file_size = file.metadata()?.len();
        let num_pages = (file_size / PAGE_SIZE as u64) as u32;

        Ok(self.register(file, path, num_pages))
    }

    fn register(&self, file: File, path: PathBuf, num_pages: u32) -> u32 {
        let file_id = self.next_file_id.fetch_add(1, Ordering::Relaxed);
        self.files.lock().insert(
            file_id,
            FileHandle {
                file,
                path,
                num_pages,
            },
        );
        file_id
    }

    /// Returns the number of the file's first page.
    pub fn first_page_no(&self, file_id: u32) -> Result<u32> {
        if self.num_pages(file_id)? == 0 {
            return Err(BrindleError::PageNotFound {
                page_id: PageId::new(file_id, 1),
            });
        }
        Ok(1)
    }

    /// Returns the number of pages in a file.
    pub fn num_pages(&self, file_id: u32) -> Result<u32> {
        let files = self.files.lock();
        let handle = files
            .get(&file_id)
            .ok_or(BrindleError::FileNotOpen { file_id })?;
        Ok(handle.num_pages)
    }

    /// Reads a page from disk.
    pub fn read_page(&self, page_id: PageId) -> Result<[u8; PAGE_SIZE]> {
        let mut files = self.files.lock();
        let handle = files
            .get_mut(&page_id.file_id)
            .ok_or(BrindleError::FileNotOpen {
                file_id: page_id.file_id,
            })?;

        if page_id.page_no == 0 || page_id.page_no > handle.num_pages {
            return Err(BrindleError::PageNotFound { page_id });
        }

        let offset = (page_id.page_no as u64 - 1) * (PAGE_SIZE as u64);
        handle.file.seek(SeekFrom::Start(offset))?;

        let mut buffer = [0u8; PAGE_SIZE];
        handle.file.read_exact(&mut buffer)?;

        Ok(buffer)
    }

    /// Writes a page to disk.
    pub fn write_page(&self, page_id: PageId, data: &[u8; PAGE_SIZE]) -> Result<()> {
        let mut files = self.files.lock();
        let handle = files
            .get_mut(&page_id.file_id)
            .ok_or(BrindleError::FileNotOpen {
                file_id: page_id.file_id,
            })?;

        if page_id.page_no == 0 || page_id.page_no > handle.num_pages {
            return Err(BrindleError::PageNotFound { page_id });
        }

        let offset = (page_id.page_no as u64 - 1) * (PAGE_SIZE as u64);
        handle.file.seek(SeekFrom::Start(offset))?;
        handle.file.write_all(data)?;

        if self.config.fsync_enabled {
            handle.file.sync_all()?;
        }

        Ok(())
    }

    /// Allocates a new page at the end of the file, zero-filled on disk.
    ///
    /// Returns the new page number.
    pub fn allocate_page(&self, file_id: u32) -> Result<u32> {
        let mut files = self.files.lock();
        let handle = files
            .get_mut(&file_id)
            .ok_or(BrindleError::FileNotOpen { file_id })?;

        let page_no = handle.num_pages + 1;
        let offset = (page_no as u64 - 1) * (PAGE_SIZE as u64);
        handle.file.seek(SeekFrom::Start(offset))?;
        handle.file.write_all(&[0u8; PAGE_SIZE])?;

        if self.config.fsync_enabled {
            handle.file.sync_all()?;
        }

        handle.num_pages = page_no;

        Ok(page_no)
    }

    /// Flushes pending writes of one file to stable storage.
    pub fn sync_file(&self, file_id: u32) -> Result<()> {
        let files = self.files.lock();
        let handle = files
            .get(&file_id)
            .ok_or(BrindleError::FileNotOpen { file_id })?;
        handle.file.sync_all()?;
        Ok(())
    }

    /// Syncs and releases a file handle. The id becomes invalid.
    pub fn close_file(&self, file_id: u32) -> Result<()> {
        let mut files = self.files.lock();
        if let Some(handle) = files.remove(&file_id) {
            handle.file.sync_all()?;
        }
        Ok(())
    }

    /// Deletes a file by name, closing it first if open.
    pub fn delete_file(&self, name: &str) -> Result<()> {
        let path = self.file_path(name);

        let mut files = self.files.lock();
        let open_id = files
            .iter()
            .find(|(_, handle)| handle.path == path)
            .map(|(&id, _)| id);
        if let Some(id) = open_id {
            files.remove(&id);
        }
        drop(files);

        if path.exists() {
            std::fs::remove_file(path)?;
        }
        Ok(())
    }
}

impl Drop for DiskManager {
    fn drop(&mut self) {
        let files = self.files.lock();
        for handle in files.values() {
            let _ = handle.file.sync_all();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn create_test_disk_manager() -> (DiskManager, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let config = DiskManagerConfig {
            data_dir: dir.path().to_path_buf(),
            fsync_enabled: false,
        };
        let dm = DiskManager::new(config).unwrap();
        (dm, dir)
    }

    #[test]
    fn test_disk_manager_new() {
        let (dm, _dir) = create_test_disk_manager();
        assert!(dm.data_dir().exists());
    }

    #[test]
    fn test_create_and_exists() {
        let (dm, _dir) = create_test_disk_manager();

        assert!(!dm.exists("rel.0"));
        dm.create("rel.0").unwrap();
        assert!(dm.exists("rel.0"));
    }

    #[test]
    fn test_create_existing_fails() {
        let (dm, _dir) = create_test_disk_manager();

        dm.create("rel.0").unwrap();
        let result = dm.create("rel.0");
        assert!(matches!(result, Err(BrindleError::FileExists { .. })));
    }

    #[test]
    fn test_open_missing_fails() {
        let (dm, _dir) = create_test_disk_manager();
        let result = dm.open("rel.0");
        assert!(matches!(result, Err(BrindleError::FileNotFound { .. })));
    }

    #[test]
    fn test_allocate_pages_from_one() {
        let (dm, _dir) = create_test_disk_manager();
        let fid = dm.create("rel.0").unwrap();

        assert_eq!(dm.num_pages(fid).unwrap(), 0);
        assert_eq!(dm.allocate_page(fid).unwrap(), 1);
        assert_eq!(dm.allocate_page(fid).unwrap(), 2);
        assert_eq!(dm.num_pages(fid).unwrap(), 2);
        assert_eq!(dm.first_page_no(fid).unwrap(), 1);
    }

    #[test]
    fn test_first_page_of_empty_file() {
        let (dm, _dir) = create_test_disk_manager();
        let fid = dm.create("rel.0").unwrap();
        assert!(dm.first_page_no(fid).is_err());
    }

    #[test]
    fn test_write_read_page() {
        let (dm, _dir) = create_test_disk_manager();
        let fid = dm.create("rel.0").unwrap();
        let page_no = dm.allocate_page(fid).unwrap();
        let page_id = PageId::new(fid, page_no);

        let mut data = [0u8; PAGE_SIZE];
        data[0] = 0xAB;
        data[PAGE_SIZE - 1] = 0xEF;
        dm.write_page(page_id, &data).unwrap();

        let read_data = dm.read_page(page_id).unwrap();
        assert_eq!(read_data[0], 0xAB);
        assert_eq!(read_data[PAGE_SIZE - 1], 0xEF);
    }

    #[test]
    fn test_fresh_page_is_zeroed() {
        let (dm, _dir) = create_test_disk_manager();
        let fid = dm.create("rel.0").unwrap();
        let page_no = dm.allocate_page(fid).unwrap();

        let data = dm.read_page(PageId::new(fid, page_no)).unwrap();
        assert!(data.iter().all(|&b| b == 0));
    }

    #[test]
    fn test_read_invalid_pages() {
        let (dm, _dir) = create_test_disk_manager();
        let fid = dm.create("rel.0").unwrap();
        dm.allocate_page(fid).unwrap();

        assert!(matches!(
            dm.read_page(PageId::new(fid, 0)),
            Err(BrindleError::PageNotFound { .. })
        ));
        assert!(matches!(
            dm.read_page(PageId::new(fid, 99)),
            Err(BrindleError::PageNotFound { .. })
        ));
    }

    #[test]
    fn test_multiple_files_distinct_ids() {
        let (dm, _dir) = create_test_disk_manager();
        let f0 = dm.create("rel.0").unwrap();
        let f1 = dm.create("rel.4").unwrap();
        assert_ne!(f0, f1);

        let p0 = dm.allocate_page(f0).unwrap();
        let p1 = dm.allocate_page(f1).unwrap();

        let mut data = [0u8; PAGE_SIZE];
        data[0] = 0x11;
        dm.write_page(PageId::new(f0, p0), &data).unwrap();
        data[0] = 0x22;
        dm.write_page(PageId::new(f1, p1), &data).unwrap();

        assert_eq!(dm.read_page(PageId::new(f0, p0)).unwrap()[0], 0x11);
        assert_eq!(dm.read_page(PageId::new(f1, p1)).unwrap()[0], 0x22);
    }

    #[test]
    fn test_persistence_across_reopen() {
        let dir = tempdir().unwrap();
        let config = DiskManagerConfig {
            data_dir: dir.path().to_path_buf(),
            fsync_enabled: true,
        };

        let page_no;
        {
            let dm = DiskManager::new(config.clone()).unwrap();
            let fid = dm.create("rel.0").unwrap();
            page_no = dm.allocate_page(fid).unwrap();

            let mut data = [0u8; PAGE_SIZE];
            data[7] = 0xFF;
            dm.write_page(PageId::new(fid, page_no), &data).unwrap();
            dm.close_file(fid).unwrap();
        }

        {
            let dm = DiskManager::new(config).unwrap();
            let fid = dm.open("rel.0").unwrap();
            assert_eq!(dm.num_pages(fid).unwrap(), 1);

            let data = dm.read_page(PageId::new(fid, page_no)).unwrap();
            assert_eq!(data[7], 0xFF);
        }
    }

    #[test]
    fn test_close_invalidates_id() {
        let (dm, _dir) = create_test_disk_manager();
        let fid = dm.create("rel.0").unwrap();
        dm.close_file(fid).unwrap();

        assert!(matches!(
            dm.num_pages(fid),
            Err(BrindleError::FileNotOpen { .. })
        ));
    }

    #[test]
    fn test_delete_file() {
        let (dm, dir) = create_test_disk_manager();
        dm.create("rel.0").unwrap();

        let path = dir.path().join("rel.0");
        assert!(path.exists());

        dm.delete_file("rel.0").unwrap();
        assert!(!path.exists());
        // Deleting again is a no-op
        dm.delete_file("rel.0").unwrap();
    }
}
