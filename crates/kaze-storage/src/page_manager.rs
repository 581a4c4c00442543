//! Page allocation, caching, and the metadata page.

use std::cell::Cell;
use std::path::Path;

use kaze_buffer::{BufferPool, EvictedPage, Frame};
use kaze_common::page::{Page, PageHeader, PageType, PAGE_SIZE};
use kaze_common::types::{is_valid_page, PageId, INVALID_PAGE_ID, META_PAGE_ID};
use kaze_common::{KazeError, Result};

use crate::file::FileStore;

// Metadata page field offsets, relative to the end of the page header.
const META_TABLES_ROOT: usize = 0;
const META_COLUMNS_ROOT: usize = 8;
const META_INDEXES_ROOT: usize = 16;
const META_NEXT_TABLE_ID: usize = 24;
const META_NEXT_INDEX_ID: usize = 28;
const META_FREE_LIST_HEAD: usize = 32;

// A freed page stores the next free-list link at the start of its body.
const FREE_LINK_OFFSET: usize = PageHeader::SIZE;

/// Allocates, frees, and caches pages of a single page file.
///
/// Owns the buffer pool and the file store; all page I/O goes through the
/// pool. The metadata page (page 1) carries the catalog roots, the next
/// table/index id counters, and the free-list head behind typed accessors,
/// which breaks the cycle between the page manager and the catalog.
pub struct PageManager {
    file: FileStore,
    pool: BufferPool,
}

impl PageManager {
    /// Opens a page file and prepares the reserved and metadata pages.
    pub fn open(
        path: impl AsRef<Path>,
        create_if_missing: bool,
        fsync_enabled: bool,
        pool_frames: usize,
    ) -> Result<Self> {
        let file = FileStore::open(path.as_ref().to_path_buf(), create_if_missing, fsync_enabled)?;
        let pm = Self {
            file,
            pool: BufferPool::new(pool_frames),
        };

        if pm.file.page_count() == 0 {
            // Page 0 is reserved and stays zeroed.
            pm.file.write_page(0, &[0u8; PAGE_SIZE])?;
            let mut meta = Page::new(META_PAGE_ID, PageType::Metadata);
            let body = &mut meta.as_bytes_mut()[PageHeader::SIZE..];
            body[META_NEXT_TABLE_ID..META_NEXT_TABLE_ID + 4]
                .copy_from_slice(&1u32.to_le_bytes());
            body[META_NEXT_INDEX_ID..META_NEXT_INDEX_ID + 4]
                .copy_from_slice(&1u32.to_le_bytes());
            pm.file.write_page(META_PAGE_ID, meta.as_bytes())?;
        }

        Ok(pm)
    }

    /// Returns the backing file path.
    pub fn path(&self) -> &Path {
        self.file.path()
    }

    /// Number of pages in the file.
    pub fn page_count(&self) -> i64 {
        self.file.page_count()
    }

    /// Sum of pin counts; zero between public operations.
    pub fn pinned_total(&self) -> u32 {
        self.pool.pinned_total()
    }

    fn write_back(&self, evicted: Option<EvictedPage>) -> Result<()> {
        if let Some(page) = evicted {
            self.file.write_page(page.page_id, &page.data)?;
        }
        Ok(())
    }

    /// Fetches a page, pinning it for the lifetime of the returned guard.
    pub fn fetch(&self, page_id: PageId) -> Result<PageGuard<'_>> {
        if page_id < META_PAGE_ID {
            return Err(KazeError::InvalidArgument(format!(
                "fetch of reserved page {page_id}"
            )));
        }

        if let Some(frame) = self.pool.fetch_page(page_id) {
            return Ok(PageGuard::new(&self.pool, frame, page_id));
        }

        let mut buf = [0u8; PAGE_SIZE];
        self.file.read_page(page_id, &mut buf)?;
        let (frame, evicted) = self.pool.load_page(page_id, &buf)?;
        if let Err(err) = self.write_back(evicted) {
            self.pool.unpin_page(page_id, false);
            return Err(err);
        }
        Ok(PageGuard::new(&self.pool, frame, page_id))
    }

    /// Allocates a page of the given type.
    ///
    /// Reuses the free-list head when the list is non-empty, otherwise
    /// extends the file. The page comes back initialized.
    pub fn new_page(&self, page_type: PageType) -> Result<PageId> {
        let head = self.free_list_head()?;
        if is_valid_page(head) {
            let next = {
                let guard = self.fetch(head)?;
                let data = guard.data();
                i64::from_le_bytes(
                    data[FREE_LINK_OFFSET..FREE_LINK_OFFSET + 8]
                        .try_into()
                        .expect("slice length"),
                )
            };
            {
                let guard = self.fetch(head)?;
                let mut data = guard.data_mut();
                Page::init_in_slice(&mut data[..], head, page_type);
            }
            self.set_free_list_head(next)?;
            return Ok(head);
        }

        let page_id = self.file.page_count();
        let page = Page::new(page_id, page_type);
        self.file.write_page(page_id, page.as_bytes())?;
        let (_, evicted) = self.pool.load_page(page_id, page.as_bytes())?;
        let result = self.write_back(evicted);
        self.pool.unpin_page(page_id, false);
        result?;
        Ok(page_id)
    }

    /// Frees a page, prepending it to the free-list chain.
    pub fn free_page(&self, page_id: PageId) -> Result<()> {
        if !is_valid_page(page_id) {
            return Err(KazeError::InvalidArgument(format!(
                "free of reserved page {page_id}"
            )));
        }
        let head = self.free_list_head()?;
        {
            let guard = self.fetch(page_id)?;
            let mut data = guard.data_mut();
            Page::init_in_slice(&mut data[..], page_id, PageType::Free);
            data[FREE_LINK_OFFSET..FREE_LINK_OFFSET + 8].copy_from_slice(&head.to_le_bytes());
        }
        self.set_free_list_head(page_id)
    }

    /// Writes every dirty frame and syncs the file.
    pub fn flush_all(&self) -> Result<()> {
        self.pool
            .flush_all(|page_id, data| {
                let buf: &[u8; PAGE_SIZE] = data.try_into().map_err(|_| {
                    KazeError::Internal("frame buffer has wrong page size".to_string())
                })?;
                self.file.write_page(page_id, buf)
            })?;
        self.file.sync()
    }

    // =========================================================================
    // Metadata page accessors
    // =========================================================================

    fn meta_read_i64(&self, offset: usize) -> Result<i64> {
        let guard = self.fetch(META_PAGE_ID)?;
        let data = guard.data();
        let base = PageHeader::SIZE + offset;
        Ok(i64::from_le_bytes(
            data[base..base + 8].try_into().expect("slice length"),
        ))
    }

    fn meta_write_i64(&self, offset: usize, value: i64) -> Result<()> {
        let guard = self.fetch(META_PAGE_ID)?;
        let mut data = guard.data_mut();
        let base = PageHeader::SIZE + offset;
        data[base..base + 8].copy_from_slice(&value.to_le_bytes());
        Ok(())
    }

    fn meta_read_u32(&self, offset: usize) -> Result<u32> {
        let guard = self.fetch(META_PAGE_ID)?;
        let data = guard.data();
        let base = PageHeader::SIZE + offset;
        Ok(u32::from_le_bytes(
            data[base..base + 4].try_into().expect("slice length"),
        ))
    }

    fn meta_write_u32(&self, offset: usize, value: u32) -> Result<()> {
        let guard = self.fetch(META_PAGE_ID)?;
        let mut data = guard.data_mut();
        let base = PageHeader::SIZE + offset;
        data[base..base + 4].copy_from_slice(&value.to_le_bytes());
        Ok(())
    }

    /// Root page of the catalog tables list, or `INVALID_PAGE_ID`.
    pub fn catalog_tables_root(&self) -> Result<PageId> {
        self.meta_read_i64(META_TABLES_ROOT)
    }

    pub fn set_catalog_tables_root(&self, page_id: PageId) -> Result<()> {
        self.meta_write_i64(META_TABLES_ROOT, page_id)
    }

    /// Root page of the catalog columns list, or `INVALID_PAGE_ID`.
    pub fn catalog_columns_root(&self) -> Result<PageId> {
        self.meta_read_i64(META_COLUMNS_ROOT)
    }

    pub fn set_catalog_columns_root(&self, page_id: PageId) -> Result<()> {
        self.meta_write_i64(META_COLUMNS_ROOT, page_id)
    }

    /// Root page of the catalog indexes list, or `INVALID_PAGE_ID`.
    pub fn catalog_indexes_root(&self) -> Result<PageId> {
        self.meta_read_i64(META_INDEXES_ROOT)
    }

    pub fn set_catalog_indexes_root(&self, page_id: PageId) -> Result<()> {
        self.meta_write_i64(META_INDEXES_ROOT, page_id)
    }

    /// Next table id to allocate; strictly monotonic.
    pub fn next_table_id(&self) -> Result<u32> {
        self.meta_read_u32(META_NEXT_TABLE_ID)
    }

    pub fn set_next_table_id(&self, id: u32) -> Result<()> {
        self.meta_write_u32(META_NEXT_TABLE_ID, id)
    }

    /// Next index id to allocate; strictly monotonic.
    pub fn next_index_id(&self) -> Result<u32> {
        self.meta_read_u32(META_NEXT_INDEX_ID)
    }

    pub fn set_next_index_id(&self, id: u32) -> Result<()> {
        self.meta_write_u32(META_NEXT_INDEX_ID, id)
    }

    fn free_list_head(&self) -> Result<PageId> {
        self.meta_read_i64(META_FREE_LIST_HEAD)
    }

    fn set_free_list_head(&self, page_id: PageId) -> Result<()> {
        self.meta_write_i64(META_FREE_LIST_HEAD, page_id)
    }
}

impl Drop for PageManager {
    fn drop(&mut self) {
        if let Err(err) = self.flush_all() {
            log::warn!("flush on close failed for {}: {err}", self.path().display());
        }
    }
}

/// RAII pin on a buffered page.
///
/// `data_mut` latches the dirty flag; dropping the guard unpins the frame
/// with the observed flag, so every fetch is paired with an unpin on all
/// paths.
pub struct PageGuard<'a> {
    pool: &'a BufferPool,
    frame: &'a Frame,
    page_id: PageId,
    dirty: Cell<bool>,
}

impl<'a> PageGuard<'a> {
    fn new(pool: &'a BufferPool, frame: &'a Frame, page_id: PageId) -> Self {
        Self {
            pool,
            frame,
            page_id,
            dirty: Cell::new(false),
        }
    }

    /// Returns the page ID.
    pub fn page_id(&self) -> PageId {
        self.page_id
    }

    /// Read access to the page bytes.
    pub fn data(&self) -> parking_lot::RwLockReadGuard<'_, Box<[u8; PAGE_SIZE]>> {
        self.frame.read_data()
    }

    /// Write access to the page bytes; marks the page dirty.
    pub fn data_mut(&self) -> parking_lot::RwLockWriteGuard<'_, Box<[u8; PAGE_SIZE]>> {
        self.dirty.set(true);
        self.frame.write_data()
    }

    /// Latches the dirty flag without taking the write lock.
    pub fn mark_dirty(&self) {
        self.dirty.set(true);
    }
}

impl Drop for PageGuard<'_> {
    fn drop(&mut self) {
        self.pool.unpin_page(self.page_id, self.dirty.get());
    }
}
