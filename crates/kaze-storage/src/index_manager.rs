//! Per-index file management.
//!
//! Every secondary index lives in its own page file next to the main
//! database file. An [`IndexHandle`] is a short-lived view combining the
//! index file's page manager with a B+ tree; handles are opened per
//! operation and flush on drop.

use std::path::PathBuf;
use std::sync::Arc;

use kaze_common::config::{index_path, StorageConfig};
use kaze_common::types::{IndexId, PageId, INVALID_PAGE_ID};
use kaze_common::Result;

use crate::btree::BPlusTree;
use crate::page_manager::PageManager;

/// An opened index: its file's page manager plus the tree rooted in it.
pub struct IndexHandle {
    pm: Arc<PageManager>,
    tree: BPlusTree,
}

impl IndexHandle {
    /// The tree, for reads.
    pub fn tree(&self) -> &BPlusTree {
        &self.tree
    }

    /// The tree, for mutations. The root page id may change on split; the
    /// caller writes it back to the catalog afterwards.
    pub fn tree_mut(&mut self) -> &mut BPlusTree {
        &mut self.tree
    }

    /// Writes all dirty index pages to disk.
    pub fn flush(&self) -> Result<()> {
        self.pm.flush_all()
    }
}

/// Creates, opens, and drops the physical index files.
pub struct IndexManager {
    base_dir: PathBuf,
    pool_frames: usize,
    fsync_enabled: bool,
}

impl IndexManager {
    pub fn new(config: &StorageConfig) -> Self {
        Self {
            base_dir: config.data_dir.clone(),
            pool_frames: config.index_pool_frames,
            fsync_enabled: config.fsync_enabled,
        }
    }

    fn path_for(&self, index_id: IndexId) -> PathBuf {
        index_path(&self.base_dir, index_id)
    }

    /// Creates a fresh index file with an empty tree.
    ///
    /// Any existing file for this index id is discarded first, which is
    /// also how `rebuild_table_indexes` starts each rebuild.
    pub fn create_index(&self, index_id: IndexId, unique: bool) -> Result<IndexHandle> {
        let path = self.path_for(index_id);
        if path.exists() {
            std::fs::remove_file(&path).map_err(|source| kaze_common::KazeError::IoWrite {
                path: path.clone(),
                page_id: 0,
                source,
            })?;
        }
        self.make_handle(index_id, unique, INVALID_PAGE_ID, true)
    }

    /// Opens an existing index rooted at the recorded page.
    pub fn open_index(
        &self,
        index_id: IndexId,
        unique: bool,
        root_page_id: PageId,
    ) -> Result<IndexHandle> {
        self.make_handle(index_id, unique, root_page_id, true)
    }

    /// Deletes the physical index file.
    pub fn drop_index(&self, index_id: IndexId) -> Result<()> {
        let path = self.path_for(index_id);
        if path.exists() {
            std::fs::remove_file(&path).map_err(|source| kaze_common::KazeError::IoWrite {
                path,
                page_id: 0,
                source,
            })?;
        }
        Ok(())
    }

    fn make_handle(
        &self,
        index_id: IndexId,
        unique: bool,
        root_page_id: PageId,
        create_if_missing: bool,
    ) -> Result<IndexHandle> {
        let pm = Arc::new(PageManager::open(
            self.path_for(index_id),
            create_if_missing,
            self.fsync_enabled,
            self.pool_frames,
        )?);
        let tree = BPlusTree::new(pm.clone(), root_page_id, unique)?;
        Ok(IndexHandle { pm, tree })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kaze_common::types::RecordId;
    use tempfile::tempdir;

    fn manager(dir: &tempfile::TempDir) -> IndexManager {
        let mut config = StorageConfig::with_data_dir(dir.path());
        config.fsync_enabled = false;
        IndexManager::new(&config)
    }

    #[test]
    fn test_create_open_roundtrip() {
        let dir = tempdir().unwrap();
        let im = manager(&dir);

        let root;
        {
            let mut handle = im.create_index(1, false).unwrap();
            handle.tree_mut().insert(b"alpha", RecordId::new(2, 0)).unwrap();
            handle.tree_mut().insert(b"beta", RecordId::new(2, 1)).unwrap();
            root = handle.tree().root_page_id();
        }

        let handle = im.open_index(1, false, root).unwrap();
        assert_eq!(
            handle.tree().search(b"alpha").unwrap(),
            Some(RecordId::new(2, 0))
        );
        assert_eq!(
            handle.tree().search(b"beta").unwrap(),
            Some(RecordId::new(2, 1))
        );
    }

    #[test]
    fn test_create_discards_previous_contents() {
        let dir = tempdir().unwrap();
        let im = manager(&dir);

        {
            let mut handle = im.create_index(1, false).unwrap();
            handle.tree_mut().insert(b"stale", RecordId::new(2, 0)).unwrap();
        }
        let handle = im.create_index(1, false).unwrap();
        assert_eq!(handle.tree().search(b"stale").unwrap(), None);
    }

    #[test]
    fn test_drop_removes_file() {
        let dir = tempdir().unwrap();
        let im = manager(&dir);
        {
            im.create_index(3, true).unwrap();
        }
        assert!(index_path(dir.path(), 3).exists());
        im.drop_index(3).unwrap();
        assert!(!index_path(dir.path(), 3).exists());

        // Dropping a missing index is a no-op.
        im.drop_index(3).unwrap();
    }

    #[test]
    fn test_separate_files_per_index() {
        let dir = tempdir().unwrap();
        let im = manager(&dir);
        {
            let mut a = im.create_index(1, false).unwrap();
            let mut b = im.create_index(2, false).unwrap();
            a.tree_mut().insert(b"only-in-a", RecordId::new(2, 0)).unwrap();
            b.tree_mut().insert(b"only-in-b", RecordId::new(2, 1)).unwrap();
        }
        assert!(index_path(dir.path(), 1).exists());
        assert!(index_path(dir.path(), 2).exists());
    }
}
