//! Block-addressed page file I/O.

use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use kaze_common::page::PAGE_SIZE;
use kaze_common::types::PageId;
use kaze_common::{KazeError, Result};

/// Owns one append-extensible file of fixed-size pages.
///
/// Page 0 is reserved and never handed out; page 1 is the metadata page.
/// The page manager enforces that policy, the file store only enforces
/// bounds: reads must land inside the file, writes may extend it by at
/// most one page.
pub struct FileStore {
    path: PathBuf,
    fsync_enabled: bool,
    inner: Mutex<FileInner>,
}

struct FileInner {
    file: File,
    page_count: i64,
}

impl FileStore {
    /// Opens or creates the page file.
    pub fn open(path: impl Into<PathBuf>, create_if_missing: bool, fsync_enabled: bool) -> Result<Self> {
        let path = path.into();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(create_if_missing)
            .open(&path)
            .map_err(|source| KazeError::IoRead {
                path: path.clone(),
                page_id: 0,
                source,
            })?;

        let size = file
            .metadata()
            .map_err(|source| KazeError::IoRead {
                path: path.clone(),
                page_id: 0,
                source,
            })?
            .len();
        let page_count = (size / PAGE_SIZE as u64) as i64;

        Ok(Self {
            path,
            fsync_enabled,
            inner: Mutex::new(FileInner { file, page_count }),
        })
    }

    /// Returns the backing file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of pages currently in the file.
    pub fn page_count(&self) -> i64 {
        self.inner.lock().page_count
    }

    /// File size in bytes.
    pub fn size_bytes(&self) -> u64 {
        (self.inner.lock().page_count as u64) * PAGE_SIZE as u64
    }

    /// Reads one page into the buffer.
    pub fn read_page(&self, page_id: PageId, buf: &mut [u8; PAGE_SIZE]) -> Result<()> {
        let mut inner = self.inner.lock();
        if page_id < 0 || page_id >= inner.page_count {
            return Err(KazeError::IoRead {
                path: self.path.clone(),
                page_id,
                source: std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    "page beyond end of file",
                ),
            });
        }
        let offset = page_id as u64 * PAGE_SIZE as u64;
        inner
            .file
            .seek(SeekFrom::Start(offset))
            .and_then(|_| inner.file.read_exact(buf))
            .map_err(|source| KazeError::IoRead {
                path: self.path.clone(),
                page_id,
                source,
            })
    }

    /// Writes one page, extending the file by at most one page.
    pub fn write_page(&self, page_id: PageId, buf: &[u8; PAGE_SIZE]) -> Result<()> {
        let mut inner = self.inner.lock();
        if page_id < 0 || page_id > inner.page_count {
            return Err(KazeError::IoWrite {
                path: self.path.clone(),
                page_id,
                source: std::io::Error::new(
                    std::io::ErrorKind::InvalidInput,
                    "write would leave a hole in the file",
                ),
            });
        }
        let offset = page_id as u64 * PAGE_SIZE as u64;
        inner
            .file
            .seek(SeekFrom::Start(offset))
            .and_then(|_| inner.file.write_all(buf))
            .map_err(|source| KazeError::IoWrite {
                path: self.path.clone(),
                page_id,
                source,
            })?;

        if self.fsync_enabled {
            inner.file.sync_all().map_err(|source| KazeError::IoWrite {
                path: self.path.clone(),
                page_id,
                source,
            })?;
        }

        if page_id == inner.page_count {
            inner.page_count += 1;
        }
        Ok(())
    }

    /// Flushes pending writes to stable storage.
    pub fn sync(&self) -> Result<()> {
        let inner = self.inner.lock();
        inner.file.sync_all().map_err(|source| KazeError::IoWrite {
            path: self.path.clone(),
            page_id: 0,
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn open_store(dir: &tempfile::TempDir) -> FileStore {
        FileStore::open(dir.path().join("pages.kz"), true, false).unwrap()
    }

    #[test]
    fn test_open_creates_empty() {
        let dir = tempdir().unwrap();
        let store = open_store(&dir);
        assert_eq!(store.page_count(), 0);
        assert_eq!(store.size_bytes(), 0);
    }

    #[test]
    fn test_open_missing_without_create() {
        let dir = tempdir().unwrap();
        let result = FileStore::open(dir.path().join("missing.kz"), false, false);
        assert!(result.is_err());
    }

    #[test]
    fn test_write_read_roundtrip() {
        let dir = tempdir().unwrap();
        let store = open_store(&dir);

        let mut page = [0u8; PAGE_SIZE];
        page[0] = 0xAB;
        page[PAGE_SIZE - 1] = 0xEF;
        store.write_page(0, &page).unwrap();
        assert_eq!(store.page_count(), 1);

        let mut out = [0u8; PAGE_SIZE];
        store.read_page(0, &mut out).unwrap();
        assert_eq!(out[0], 0xAB);
        assert_eq!(out[PAGE_SIZE - 1], 0xEF);
    }

    #[test]
    fn test_read_beyond_end_fails() {
        let dir = tempdir().unwrap();
        let store = open_store(&dir);
        let mut out = [0u8; PAGE_SIZE];
        let err = store.read_page(3, &mut out).unwrap_err();
        assert!(matches!(err, KazeError::IoRead { page_id: 3, .. }));
    }

    #[test]
    fn test_write_cannot_leave_hole() {
        let dir = tempdir().unwrap();
        let store = open_store(&dir);
        let page = [0u8; PAGE_SIZE];
        let err = store.write_page(5, &page).unwrap_err();
        assert!(matches!(err, KazeError::IoWrite { page_id: 5, .. }));
    }

    #[test]
    fn test_sequential_extension() {
        let dir = tempdir().unwrap();
        let store = open_store(&dir);
        let page = [7u8; PAGE_SIZE];
        for i in 0..4 {
            store.write_page(i, &page).unwrap();
        }
        assert_eq!(store.page_count(), 4);
        assert_eq!(store.size_bytes(), 4 * PAGE_SIZE as u64);
    }

    #[test]
    fn test_persistence_across_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("pages.kz");
        {
            let store = FileStore::open(&path, true, true).unwrap();
            let mut page = [0u8; PAGE_SIZE];
            page[10] = 0x42;
            store.write_page(0, &page).unwrap();
            store.sync().unwrap();
        }
        let store = FileStore::open(&path, false, true).unwrap();
        assert_eq!(store.page_count(), 1);
        let mut out = [0u8; PAGE_SIZE];
        store.read_page(0, &mut out).unwrap();
        assert_eq!(out[10], 0x42);
    }
}
