//! Database facade wiring the storage, catalog, and executor layers.

use std::sync::Arc;

use kaze_catalog::CatalogManager;
use kaze_common::config::StorageConfig;
use kaze_common::{KazeError, Result};
use kaze_storage::{IndexManager, PageManager};

use crate::ddl::DdlExecutor;
use crate::dml::DmlExecutor;

/// One opened database: the main page file, its catalog, and the per-index
/// files, assuming single-threaded access.
///
/// Durability is write-through on clean shutdown: call [`Database::flush`]
/// (or drop the database) before exiting.
pub struct Database {
    config: StorageConfig,
    pm: Arc<PageManager>,
    catalog: Arc<CatalogManager>,
    index_manager: Arc<IndexManager>,
}

impl Database {
    /// Opens (or creates) the database under `config.data_dir`.
    pub fn open(config: StorageConfig) -> Result<Self> {
        std::fs::create_dir_all(&config.data_dir).map_err(|source| KazeError::IoWrite {
            path: config.data_dir.clone(),
            page_id: 0,
            source,
        })?;

        let pm = Arc::new(PageManager::open(
            config.db_path(),
            true,
            config.fsync_enabled,
            config.buffer_pool_frames,
        )?);
        let catalog = Arc::new(CatalogManager::new(pm.clone())?);
        let index_manager = Arc::new(IndexManager::new(&config));

        Ok(Self {
            config,
            pm,
            catalog,
            index_manager,
        })
    }

    /// A DDL executor over this database.
    pub fn ddl(&self) -> DdlExecutor {
        DdlExecutor::new(
            self.catalog.clone(),
            self.pm.clone(),
            self.index_manager.clone(),
            self.config.clone(),
        )
    }

    /// A DML executor over this database.
    pub fn dml(&self) -> DmlExecutor {
        DmlExecutor::new(
            self.catalog.clone(),
            self.pm.clone(),
            self.index_manager.clone(),
        )
    }

    /// The catalog, for introspection.
    pub fn catalog(&self) -> &CatalogManager {
        &self.catalog
    }

    /// The main file's page manager.
    pub fn page_manager(&self) -> &Arc<PageManager> {
        &self.pm
    }

    /// Writes all dirty pages of the main file and syncs it.
    pub fn flush(&self) -> Result<()> {
        self.pm.flush_all()
    }
}
