//! Configuration for the KazeDB storage engine.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::types::{IndexId, TableId};

/// Maximum number of keys a B+ tree node holds before it must split.
pub const BTREE_MAX_KEYS: usize = 64;

/// Maximum length of a serialized index key in bytes.
pub const MAX_KEY_LENGTH: usize = 512;

/// Maximum number of active columns per table.
pub const MAX_COLUMNS_PER_TABLE: usize = 256;

/// When true, `ALTER TABLE ADD COLUMN` without a DEFAULT backfills NULL
/// into existing rows for nullable columns instead of failing.
pub const ALTER_TABLE_IMPLICIT_NULL_FILL: bool = true;

/// Storage configuration for a database instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Directory holding the main database file and per-index files.
    pub data_dir: PathBuf,
    /// Number of frames in the main buffer pool.
    pub buffer_pool_frames: usize,
    /// Number of frames in each per-index buffer pool.
    pub index_pool_frames: usize,
    /// Enable fsync after page writes.
    pub fsync_enabled: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./kaze-data"),
            buffer_pool_frames: 1024,
            index_pool_frames: 128,
            fsync_enabled: true,
        }
    }
}

impl StorageConfig {
    /// Creates a configuration rooted at the given directory.
    pub fn with_data_dir(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            ..Default::default()
        }
    }

    /// Path of the main database file.
    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join("kaze.db")
    }

    /// Path of a per-table data file.
    pub fn table_path(&self, table_id: TableId) -> PathBuf {
        table_path(&self.data_dir, table_id)
    }

    /// Path of a per-index file.
    pub fn index_path(&self, index_id: IndexId) -> PathBuf {
        index_path(&self.data_dir, index_id)
    }
}

/// Path of a per-table data file under `data_dir`.
pub fn table_path(data_dir: &Path, table_id: TableId) -> PathBuf {
    data_dir.join(format!("table_{:06}.tbl", table_id))
}

/// Path of a per-index file under `data_dir`.
pub fn index_path(data_dir: &Path, index_id: IndexId) -> PathBuf {
    data_dir.join(format!("index_{:06}.kzx", index_id))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = StorageConfig::default();
        assert_eq!(config.data_dir, PathBuf::from("./kaze-data"));
        assert_eq!(config.buffer_pool_frames, 1024);
        assert_eq!(config.index_pool_frames, 128);
        assert!(config.fsync_enabled);
    }

    #[test]
    fn test_paths() {
        let config = StorageConfig::with_data_dir("/var/lib/kaze");
        assert_eq!(config.db_path(), PathBuf::from("/var/lib/kaze/kaze.db"));
        assert_eq!(
            config.table_path(7),
            PathBuf::from("/var/lib/kaze/table_000007.tbl")
        );
        assert_eq!(
            config.index_path(12),
            PathBuf::from("/var/lib/kaze/index_000012.kzx")
        );
    }

    #[test]
    fn test_serde_roundtrip() {
        let original = StorageConfig::default();
        let serialized = serde_json::to_string(&original).unwrap();
        let deserialized: StorageConfig = serde_json::from_str(&serialized).unwrap();
        assert_eq!(original.data_dir, deserialized.data_dir);
        assert_eq!(original.buffer_pool_frames, deserialized.buffer_pool_frames);
        assert_eq!(original.fsync_enabled, deserialized.fsync_enabled);
    }
}
