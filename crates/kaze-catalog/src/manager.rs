//! Persistent catalog of tables, columns, and indexes.
//!
//! Each of the three lists lives in a single designated DATA page whose id
//! is recorded in the metadata page; rewriting the page is the commit.
//! Tables and indexes are cached in memory; columns are re-read per query
//! since ALTER mutates them less predictably.

use std::cmp::Ordering;
use std::sync::Arc;

use parking_lot::Mutex;

use kaze_common::config::MAX_COLUMNS_PER_TABLE;
use kaze_common::page::{Page, PageType};
use kaze_common::types::{is_valid_page, ColumnId, IndexId, PageId, TableId};
use kaze_common::{KazeError, Result};
use kaze_storage::PageManager;

use crate::schema::{
    ColumnCatalogEntry, ColumnDef, IndexCatalogEntry, TableCatalogEntry, TableDef,
    DROPPED_ORDINAL,
};

struct CacheState {
    tables_loaded: bool,
    tables: Vec<TableCatalogEntry>,
    indexes_loaded: bool,
    indexes: Vec<IndexCatalogEntry>,
}

/// The catalog manager.
///
/// Holds only the narrow metadata-page accessor surface of the page
/// manager plus its own caches, which keeps the page-manager/catalog
/// dependency one-directional.
pub struct CatalogManager {
    pm: Arc<PageManager>,
    tables_root: PageId,
    columns_root: PageId,
    indexes_root: PageId,
    cache: Mutex<CacheState>,
}

fn column_entry_order(a: &ColumnCatalogEntry, b: &ColumnCatalogEntry) -> Ordering {
    a.table_id
        .cmp(&b.table_id)
        .then_with(|| a.is_dropped.cmp(&b.is_dropped))
        .then_with(|| a.ordinal_position.cmp(&b.ordinal_position))
        .then_with(|| a.column_id.cmp(&b.column_id))
}

fn index_entry_order(a: &IndexCatalogEntry, b: &IndexCatalogEntry) -> Ordering {
    a.table_id.cmp(&b.table_id).then_with(|| a.name.cmp(&b.name))
}

impl CatalogManager {
    /// Opens the catalog, creating its pages on a fresh database.
    ///
    /// The initial cache load is best-effort: a failure is logged and the
    /// caches load lazily on first use instead of aborting the open.
    pub fn new(pm: Arc<PageManager>) -> Result<Self> {
        let tables_root = Self::ensure_root(&pm, pm.catalog_tables_root()?, |pm, id| {
            pm.set_catalog_tables_root(id)
        })?;
        let columns_root = Self::ensure_root(&pm, pm.catalog_columns_root()?, |pm, id| {
            pm.set_catalog_columns_root(id)
        })?;
        let indexes_root = Self::ensure_root(&pm, pm.catalog_indexes_root()?, |pm, id| {
            pm.set_catalog_indexes_root(id)
        })?;

        let catalog = Self {
            pm,
            tables_root,
            columns_root,
            indexes_root,
            cache: Mutex::new(CacheState {
                tables_loaded: false,
                tables: Vec::new(),
                indexes_loaded: false,
                indexes: Vec::new(),
            }),
        };

        {
            let mut state = catalog.cache.lock();
            if let Err(err) = catalog.load_tables_locked(&mut state) {
                log::warn!("catalog tables cache load failed: {err}");
            }
            if let Err(err) = catalog.load_indexes_locked(&mut state) {
                log::warn!("catalog indexes cache load failed: {err}");
            }
        }

        Ok(catalog)
    }

    fn ensure_root(
        pm: &Arc<PageManager>,
        current: PageId,
        store: impl Fn(&PageManager, PageId) -> Result<()>,
    ) -> Result<PageId> {
        if is_valid_page(current) {
            return Ok(current);
        }
        let page_id = pm.new_page(PageType::Data)?;
        store(pm, page_id)?;
        Ok(page_id)
    }

    /// Reads every live slot payload of one catalog page.
    fn read_slots(&self, page_id: PageId) -> Result<Vec<Vec<u8>>> {
        let guard = self.pm.fetch(page_id)?;
        let data = guard.data();
        let slot_count = Page::slot_count_in_slice(&data[..]);
        let mut payloads = Vec::with_capacity(slot_count as usize);
        for slot in 0..slot_count {
            if let Some(payload) = Page::read_in_slice(&data[..], slot) {
                if !payload.is_empty() {
                    payloads.push(payload.to_vec());
                }
            }
        }
        Ok(payloads)
    }

    /// Rewrites one catalog page from scratch; this is the commit point.
    fn rewrite_page(&self, page_id: PageId, entries: &[Vec<u8>], what: &str) -> Result<()> {
        let guard = self.pm.fetch(page_id)?;
        let mut data = guard.data_mut();
        Page::init_in_slice(&mut data[..], page_id, PageType::Data);
        for entry in entries {
            Page::insert_in_slice(&mut data[..], entry).map_err(|err| {
                log::warn!("catalog {what} page overflow: {err}");
                err
            })?;
        }
        Ok(())
    }

    fn append_entry(&self, page_id: PageId, payload: &[u8], what: &str) -> Result<()> {
        let guard = self.pm.fetch(page_id)?;
        let mut data = guard.data_mut();
        Page::insert_in_slice(&mut data[..], payload).map_err(|err| {
            log::warn!("catalog {what} page overflow: {err}");
            err
        })?;
        Ok(())
    }

    fn load_tables_locked(&self, state: &mut CacheState) -> Result<()> {
        if state.tables_loaded {
            return Ok(());
        }
        let mut tables = Vec::new();
        for payload in self.read_slots(self.tables_root)? {
            tables.push(TableCatalogEntry::deserialize(&payload)?);
        }
        state.tables = tables;
        state.tables_loaded = true;
        Ok(())
    }

    fn load_indexes_locked(&self, state: &mut CacheState) -> Result<()> {
        if state.indexes_loaded {
            return Ok(());
        }
        let mut indexes = Vec::new();
        for payload in self.read_slots(self.indexes_root)? {
            indexes.push(IndexCatalogEntry::deserialize(&payload)?);
        }
        indexes.sort_by(index_entry_order);
        state.indexes = indexes;
        state.indexes_loaded = true;
        Ok(())
    }

    fn rewrite_tables_locked(&self, state: &CacheState) -> Result<()> {
        let serialized: Vec<_> = state.tables.iter().map(|e| e.serialize()).collect();
        self.rewrite_page(self.tables_root, &serialized, "tables")
    }

    fn rewrite_indexes_locked(&self, state: &CacheState) -> Result<()> {
        let serialized: Vec<_> = state.indexes.iter().map(|e| e.serialize()).collect();
        self.rewrite_page(self.indexes_root, &serialized, "indexes")
    }

    fn rewrite_columns(&self, entries: &[ColumnCatalogEntry]) -> Result<()> {
        let serialized: Vec<_> = entries.iter().map(|e| e.serialize()).collect();
        self.rewrite_page(self.columns_root, &serialized, "columns")
    }

    // =========================================================================
    // Tables
    // =========================================================================

    pub fn table_exists(&self, name: &str) -> Result<bool> {
        Ok(self.get_table(name)?.is_some())
    }

    pub fn get_table(&self, name: &str) -> Result<Option<TableCatalogEntry>> {
        let mut state = self.cache.lock();
        self.load_tables_locked(&mut state)?;
        Ok(state.tables.iter().find(|t| t.name == name).cloned())
    }

    pub fn get_table_by_id(&self, table_id: TableId) -> Result<Option<TableCatalogEntry>> {
        let mut state = self.cache.lock();
        self.load_tables_locked(&mut state)?;
        Ok(state
            .tables
            .iter()
            .find(|t| t.table_id == table_id)
            .cloned())
    }

    pub fn list_tables(&self) -> Result<Vec<TableCatalogEntry>> {
        let mut state = self.cache.lock();
        self.load_tables_locked(&mut state)?;
        Ok(state.tables.clone())
    }

    /// Registers a table and its columns, allocating the table id.
    pub fn create_table(
        &self,
        def: TableDef,
        root_page_id: PageId,
        create_sql: &str,
    ) -> Result<TableCatalogEntry> {
        let mut state = self.cache.lock();
        self.load_tables_locked(&mut state)?;

        if state.tables.iter().any(|t| t.name == def.name) {
            return Err(KazeError::TableExists(def.name));
        }

        let table_id = self.pm.next_table_id()?;
        self.pm.set_next_table_id(table_id + 1)?;

        let schema_version = def.schema_version.max(1);
        let next_column_id = def.next_column_id.max(def.columns.len() as ColumnId + 1);

        let entry = TableCatalogEntry {
            table_id,
            name: def.name.clone(),
            root_page_id,
            schema_version,
            next_column_id,
            create_sql: create_sql.to_string(),
        };
        self.append_entry(self.tables_root, &entry.serialize(), "tables")?;
        state.tables.push(entry.clone());

        for (i, mut column) in def.columns.into_iter().enumerate() {
            let column_id = i as ColumnId + 1;
            column.id = column_id;
            let col_entry = ColumnCatalogEntry {
                table_id,
                column_id,
                ordinal_position: i as u32,
                schema_version,
                is_dropped: false,
                column,
            };
            self.append_entry(self.columns_root, &col_entry.serialize(), "columns")?;
        }

        Ok(entry)
    }

    /// Removes a table with its columns and index entries.
    ///
    /// Returns false when the table does not exist.
    pub fn drop_table(&self, name: &str, _cascade: bool) -> Result<bool> {
        let mut state = self.cache.lock();
        self.load_tables_locked(&mut state)?;
        self.load_indexes_locked(&mut state)?;

        let Some(pos) = state.tables.iter().position(|t| t.name == name) else {
            return Ok(false);
        };
        let removed = state.tables.remove(pos);
        self.rewrite_tables_locked(&state)?;

        let remaining: Vec<ColumnCatalogEntry> = self
            .read_all_columns()?
            .into_iter()
            .filter(|c| c.table_id != removed.table_id)
            .collect();
        self.rewrite_columns(&remaining)?;

        state.indexes.retain(|i| i.table_id != removed.table_id);
        self.rewrite_indexes_locked(&state)?;

        Ok(true)
    }

    /// Moves a table's heap root, e.g. after a heap migration.
    pub fn set_table_root(&self, table_id: TableId, root_page_id: PageId) -> Result<()> {
        let mut state = self.cache.lock();
        self.load_tables_locked(&mut state)?;
        let entry = state
            .tables
            .iter_mut()
            .find(|t| t.table_id == table_id)
            .ok_or_else(|| KazeError::table_not_found(table_id.to_string()))?;
        entry.root_page_id = root_page_id;
        self.rewrite_tables_locked(&state)
    }

    // =========================================================================
    // Columns
    // =========================================================================

    fn read_all_columns(&self) -> Result<Vec<ColumnCatalogEntry>> {
        let mut columns = Vec::new();
        for payload in self.read_slots(self.columns_root)? {
            columns.push(ColumnCatalogEntry::deserialize(&payload)?);
        }
        columns.sort_by(column_entry_order);
        Ok(columns)
    }

    /// Active columns of a table in ordinal order.
    pub fn get_columns(&self, table_id: TableId) -> Result<Vec<ColumnCatalogEntry>> {
        Ok(self
            .read_all_columns()?
            .into_iter()
            .filter(|c| c.table_id == table_id && !c.is_dropped)
            .collect())
    }

    /// Looks up one column by name.
    pub fn get_column(
        &self,
        table_id: TableId,
        column_name: &str,
        include_dropped: bool,
    ) -> Result<Option<ColumnCatalogEntry>> {
        Ok(self.read_all_columns()?.into_iter().find(|c| {
            c.table_id == table_id
                && (include_dropped || !c.is_dropped)
                && c.column.name == column_name
        }))
    }

    /// Adds a column, optionally at an explicit ordinal position.
    ///
    /// Every column of the table is stamped with the incremented schema
    /// version; later actives shift right when a position is given.
    pub fn add_column(
        &self,
        table_id: TableId,
        mut column: ColumnDef,
        position: Option<u32>,
    ) -> Result<ColumnCatalogEntry> {
        let mut state = self.cache.lock();
        self.load_tables_locked(&mut state)?;
        let table = state
            .tables
            .iter_mut()
            .find(|t| t.table_id == table_id)
            .ok_or_else(|| KazeError::table_not_found(table_id.to_string()))?;

        if column.constraint.primary_key {
            return Err(KazeError::InvalidConstraint(
                "ALTER TABLE ADD COLUMN does not support PRIMARY KEY".to_string(),
            ));
        }

        let mut all_columns = self.read_all_columns()?;
        let mut active_count: u32 = 0;
        for entry in all_columns.iter().filter(|c| c.table_id == table_id) {
            if !entry.is_dropped {
                active_count += 1;
                if entry.column.name == column.name {
                    return Err(KazeError::DuplicateColumn(column.name));
                }
            }
        }

        if active_count as usize >= MAX_COLUMNS_PER_TABLE {
            return Err(KazeError::InvalidConstraint("too many columns".to_string()));
        }
        let insert_pos = position.unwrap_or(active_count);
        if insert_pos > active_count {
            return Err(KazeError::InvalidConstraint(
                "invalid column position".to_string(),
            ));
        }

        let new_schema_version = table.schema_version + 1;
        let column_id = table.next_column_id;
        column.id = column_id;

        let new_entry = ColumnCatalogEntry {
            table_id,
            column_id,
            ordinal_position: insert_pos,
            schema_version: new_schema_version,
            is_dropped: false,
            column,
        };

        for entry in all_columns
            .iter_mut()
            .filter(|c| c.table_id == table_id)
        {
            if !entry.is_dropped && entry.ordinal_position >= insert_pos {
                entry.ordinal_position += 1;
            }
            entry.schema_version = new_schema_version;
        }

        all_columns.push(new_entry.clone());
        all_columns.sort_by(column_entry_order);
        self.rewrite_columns(&all_columns)?;

        table.schema_version = new_schema_version;
        table.next_column_id = column_id + 1;
        self.rewrite_tables_locked(&state)?;

        Ok(new_entry)
    }

    /// Tombstones a column and closes the ordinal gap it leaves.
    pub fn drop_column(&self, table_id: TableId, column_name: &str) -> Result<ColumnCatalogEntry> {
        let mut state = self.cache.lock();
        self.load_tables_locked(&mut state)?;
        let table = state
            .tables
            .iter_mut()
            .find(|t| t.table_id == table_id)
            .ok_or_else(|| KazeError::table_not_found(table_id.to_string()))?;
        let table_name = table.name.clone();

        let mut all_columns = self.read_all_columns()?;
        let target_index = all_columns
            .iter()
            .position(|c| c.table_id == table_id && !c.is_dropped && c.column.name == column_name)
            .ok_or_else(|| {
                KazeError::column_not_found_in(column_name.to_string(), table_name)
            })?;

        if all_columns[target_index].column.constraint.primary_key {
            return Err(KazeError::InvalidConstraint(format!(
                "cannot drop PRIMARY KEY column '{column_name}'"
            )));
        }
        let remaining_active = all_columns
            .iter()
            .enumerate()
            .filter(|(i, c)| *i != target_index && c.table_id == table_id && !c.is_dropped)
            .count();
        if remaining_active == 0 {
            return Err(KazeError::InvalidConstraint(
                "cannot drop the last column".to_string(),
            ));
        }

        let new_schema_version = table.schema_version + 1;
        all_columns[target_index].is_dropped = true;
        all_columns[target_index].ordinal_position = DROPPED_ORDINAL;
        let dropped_copy = {
            let mut copy = all_columns[target_index].clone();
            copy.schema_version = new_schema_version;
            copy
        };

        let mut ordinal: u32 = 0;
        for entry in all_columns
            .iter_mut()
            .filter(|c| c.table_id == table_id)
        {
            entry.schema_version = new_schema_version;
            if !entry.is_dropped {
                entry.ordinal_position = ordinal;
                ordinal += 1;
            }
        }

        all_columns.sort_by(column_entry_order);
        self.rewrite_columns(&all_columns)?;

        table.schema_version = new_schema_version;
        self.rewrite_tables_locked(&state)?;

        Ok(dropped_copy)
    }

    // =========================================================================
    // Indexes
    // =========================================================================

    pub fn index_exists(&self, name: &str) -> Result<bool> {
        Ok(self.get_index(name)?.is_some())
    }

    pub fn get_index(&self, name: &str) -> Result<Option<IndexCatalogEntry>> {
        let mut state = self.cache.lock();
        self.load_indexes_locked(&mut state)?;
        Ok(state.indexes.iter().find(|i| i.name == name).cloned())
    }

    /// Indexes of a table, sorted by name.
    pub fn get_indexes(&self, table_id: TableId) -> Result<Vec<IndexCatalogEntry>> {
        let mut state = self.cache.lock();
        self.load_indexes_locked(&mut state)?;
        Ok(state
            .indexes
            .iter()
            .filter(|i| i.table_id == table_id)
            .cloned()
            .collect())
    }

    pub fn list_indexes(&self) -> Result<Vec<IndexCatalogEntry>> {
        let mut state = self.cache.lock();
        self.load_indexes_locked(&mut state)?;
        Ok(state.indexes.clone())
    }

    /// Registers an index entry, allocating its id.
    pub fn create_index(&self, mut entry: IndexCatalogEntry) -> Result<IndexCatalogEntry> {
        let mut state = self.cache.lock();
        self.load_tables_locked(&mut state)?;
        self.load_indexes_locked(&mut state)?;

        if entry.name.is_empty() {
            return Err(KazeError::InvalidArgument(
                "index name cannot be empty".to_string(),
            ));
        }
        if state.indexes.iter().any(|i| i.name == entry.name) {
            return Err(KazeError::DuplicateKey(format!(
                "index already exists: {}",
                entry.name
            )));
        }
        if !state.tables.iter().any(|t| t.table_id == entry.table_id) {
            return Err(KazeError::table_not_found(entry.table_id.to_string()));
        }
        if entry.column_ids.is_empty() {
            return Err(KazeError::InvalidArgument(format!(
                "index {} requires at least one column",
                entry.name
            )));
        }

        let index_id = self.pm.next_index_id()?;
        self.pm.set_next_index_id(index_id + 1)?;
        entry.index_id = index_id;

        self.append_entry(self.indexes_root, &entry.serialize(), "indexes")?;
        state.indexes.push(entry.clone());
        state.indexes.sort_by(index_entry_order);
        Ok(entry)
    }

    /// Records a tree's (possibly new) root page.
    pub fn set_index_root(&self, index_id: IndexId, root_page_id: PageId) -> Result<()> {
        let mut state = self.cache.lock();
        self.load_indexes_locked(&mut state)?;
        let entry = state
            .indexes
            .iter_mut()
            .find(|i| i.index_id == index_id)
            .ok_or_else(|| KazeError::IndexNotFound(index_id.to_string()))?;
        entry.root_page_id = root_page_id;
        self.rewrite_indexes_locked(&state)
    }

    /// Removes an index entry. Returns false when it does not exist.
    pub fn drop_index(&self, name: &str) -> Result<bool> {
        let mut state = self.cache.lock();
        self.load_indexes_locked(&mut state)?;
        let Some(pos) = state.indexes.iter().position(|i| i.name == name) else {
            return Ok(false);
        };
        state.indexes.remove(pos);
        self.rewrite_indexes_locked(&state)?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kaze_common::config::StorageConfig;
    use kaze_common::types::DataType;
    use kaze_common::StatusCode;
    use crate::schema::ColumnConstraint;
    use tempfile::tempdir;

    fn open_catalog(dir: &tempfile::TempDir) -> (Arc<PageManager>, CatalogManager) {
        let config = StorageConfig::with_data_dir(dir.path());
        let pm = Arc::new(PageManager::open(config.db_path(), true, false, 128).unwrap());
        let catalog = CatalogManager::new(pm.clone()).unwrap();
        (pm, catalog)
    }

    fn column(name: &str, data_type: DataType) -> ColumnDef {
        ColumnDef {
            id: 0,
            name: name.to_string(),
            data_type,
            length: if data_type == DataType::Varchar { 32 } else { 0 },
            constraint: ColumnConstraint::default(),
        }
    }

    fn users_def() -> TableDef {
        TableDef {
            name: "users".to_string(),
            columns: vec![
                column("id", DataType::Integer),
                column("name", DataType::Varchar),
            ],
            schema_version: 1,
            next_column_id: 3,
        }
    }

    fn create_users(pm: &Arc<PageManager>, catalog: &CatalogManager) -> TableCatalogEntry {
        let root = pm.new_page(PageType::Data).unwrap();
        catalog
            .create_table(users_def(), root, "CREATE TABLE users(...)")
            .unwrap()
    }

    #[test]
    fn test_create_and_lookup_table() {
        let dir = tempdir().unwrap();
        let (pm, catalog) = open_catalog(&dir);
        let entry = create_users(&pm, &catalog);

        assert_eq!(entry.table_id, 1);
        assert_eq!(entry.schema_version, 1);
        assert!(catalog.table_exists("users").unwrap());
        assert!(!catalog.table_exists("ghosts").unwrap());
        assert_eq!(catalog.get_table("users").unwrap().unwrap(), entry);
        assert_eq!(
            catalog.get_table_by_id(entry.table_id).unwrap().unwrap(),
            entry
        );

        let columns = catalog.get_columns(entry.table_id).unwrap();
        assert_eq!(columns.len(), 2);
        assert_eq!(columns[0].column.name, "id");
        assert_eq!(columns[0].ordinal_position, 0);
        assert_eq!(columns[1].column.name, "name");
        assert_eq!(columns[1].ordinal_position, 1);
    }

    #[test]
    fn test_duplicate_table_rejected() {
        let dir = tempdir().unwrap();
        let (pm, catalog) = open_catalog(&dir);
        create_users(&pm, &catalog);

        let root = pm.new_page(PageType::Data).unwrap();
        let err = catalog
            .create_table(users_def(), root, "CREATE TABLE users(...)")
            .unwrap_err();
        assert_eq!(err.code(), StatusCode::TableExists);
    }

    #[test]
    fn test_table_ids_monotonic() {
        let dir = tempdir().unwrap();
        let (pm, catalog) = open_catalog(&dir);
        let a = create_users(&pm, &catalog);

        let root = pm.new_page(PageType::Data).unwrap();
        let mut def = users_def();
        def.name = "orders".to_string();
        let b = catalog.create_table(def, root, "").unwrap();

        catalog.drop_table("orders", false).unwrap();
        let root = pm.new_page(PageType::Data).unwrap();
        let mut def = users_def();
        def.name = "orders2".to_string();
        let c = catalog.create_table(def, root, "").unwrap();

        assert!(b.table_id > a.table_id);
        assert!(c.table_id > b.table_id);
    }

    #[test]
    fn test_add_column_bumps_schema_version() {
        let dir = tempdir().unwrap();
        let (pm, catalog) = open_catalog(&dir);
        let table = create_users(&pm, &catalog);

        let added = catalog
            .add_column(table.table_id, column("age", DataType::Integer), None)
            .unwrap();
        assert_eq!(added.column_id, 3);
        assert_eq!(added.ordinal_position, 2);
        assert_eq!(added.schema_version, 2);

        let table = catalog.get_table_by_id(table.table_id).unwrap().unwrap();
        assert_eq!(table.schema_version, 2);
        assert_eq!(table.next_column_id, 4);

        let columns = catalog.get_columns(table.table_id).unwrap();
        assert!(columns.iter().all(|c| c.schema_version == 2));
    }

    #[test]
    fn test_add_column_at_position_shifts_actives() {
        let dir = tempdir().unwrap();
        let (pm, catalog) = open_catalog(&dir);
        let table = create_users(&pm, &catalog);

        catalog
            .add_column(table.table_id, column("rank", DataType::Integer), Some(1))
            .unwrap();

        let names: Vec<_> = catalog
            .get_columns(table.table_id)
            .unwrap()
            .iter()
            .map(|c| c.column.name.clone())
            .collect();
        assert_eq!(names, vec!["id", "rank", "name"]);
    }

    #[test]
    fn test_add_duplicate_column_rejected() {
        let dir = tempdir().unwrap();
        let (pm, catalog) = open_catalog(&dir);
        let table = create_users(&pm, &catalog);
        let err = catalog
            .add_column(table.table_id, column("name", DataType::Text), None)
            .unwrap_err();
        assert_eq!(err.code(), StatusCode::DuplicateColumn);
    }

    #[test]
    fn test_add_primary_key_column_rejected() {
        let dir = tempdir().unwrap();
        let (pm, catalog) = open_catalog(&dir);
        let table = create_users(&pm, &catalog);
        let mut pk = column("pk2", DataType::Integer);
        pk.constraint.primary_key = true;
        let err = catalog.add_column(table.table_id, pk, None).unwrap_err();
        assert_eq!(err.code(), StatusCode::InvalidConstraint);
    }

    #[test]
    fn test_drop_column_reassigns_ordinals() {
        let dir = tempdir().unwrap();
        let (pm, catalog) = open_catalog(&dir);
        let table = create_users(&pm, &catalog);
        catalog
            .add_column(table.table_id, column("age", DataType::Integer), None)
            .unwrap();

        let dropped = catalog.drop_column(table.table_id, "name").unwrap();
        assert!(dropped.is_dropped);
        assert_eq!(dropped.ordinal_position, DROPPED_ORDINAL);

        let columns = catalog.get_columns(table.table_id).unwrap();
        let names: Vec<_> = columns.iter().map(|c| c.column.name.clone()).collect();
        assert_eq!(names, vec!["id", "age"]);
        assert_eq!(columns[0].ordinal_position, 0);
        assert_eq!(columns[1].ordinal_position, 1);

        // Dropped entry remains reachable for historical lookups.
        let historical = catalog
            .get_column(table.table_id, "name", true)
            .unwrap()
            .unwrap();
        assert!(historical.is_dropped);
        assert!(catalog
            .get_column(table.table_id, "name", false)
            .unwrap()
            .is_none());

        // Column ids are never reused.
        let readded = catalog
            .add_column(table.table_id, column("name", DataType::Varchar), None)
            .unwrap();
        assert_eq!(readded.column_id, 4);
    }

    #[test]
    fn test_drop_last_column_rejected() {
        let dir = tempdir().unwrap();
        let (pm, catalog) = open_catalog(&dir);
        let root = pm.new_page(PageType::Data).unwrap();
        let def = TableDef {
            name: "single".to_string(),
            columns: vec![column("only", DataType::Integer)],
            schema_version: 1,
            next_column_id: 2,
        };
        let table = catalog.create_table(def, root, "").unwrap();

        let err = catalog.drop_column(table.table_id, "only").unwrap_err();
        assert_eq!(err.code(), StatusCode::InvalidConstraint);
    }

    #[test]
    fn test_drop_primary_key_column_rejected() {
        let dir = tempdir().unwrap();
        let (pm, catalog) = open_catalog(&dir);
        let root = pm.new_page(PageType::Data).unwrap();
        let mut id = column("id", DataType::Integer);
        id.constraint.primary_key = true;
        let def = TableDef {
            name: "keyed".to_string(),
            columns: vec![id, column("payload", DataType::Text)],
            schema_version: 1,
            next_column_id: 3,
        };
        let table = catalog.create_table(def, root, "").unwrap();

        let err = catalog.drop_column(table.table_id, "id").unwrap_err();
        assert_eq!(err.code(), StatusCode::InvalidConstraint);
        assert!(err.to_string().contains("PRIMARY KEY"));
    }

    #[test]
    fn test_index_crud() {
        let dir = tempdir().unwrap();
        let (pm, catalog) = open_catalog(&dir);
        let table = create_users(&pm, &catalog);

        let entry = catalog
            .create_index(IndexCatalogEntry::new(
                table.table_id,
                "idx_users_name",
                vec![2],
                false,
                false,
                "CREATE INDEX idx_users_name ON users(name)",
            ))
            .unwrap();
        assert_eq!(entry.index_id, 1);

        catalog.set_index_root(entry.index_id, 99).unwrap();
        let reread = catalog.get_index("idx_users_name").unwrap().unwrap();
        assert_eq!(reread.root_page_id, 99);

        // Duplicate names are rejected database-wide.
        let err = catalog
            .create_index(IndexCatalogEntry::new(
                table.table_id,
                "idx_users_name",
                vec![1],
                false,
                false,
                "",
            ))
            .unwrap_err();
        assert_eq!(err.code(), StatusCode::DuplicateKey);

        assert!(catalog.drop_index("idx_users_name").unwrap());
        assert!(!catalog.drop_index("idx_users_name").unwrap());
    }

    #[test]
    fn test_indexes_sorted_by_table_and_name() {
        let dir = tempdir().unwrap();
        let (pm, catalog) = open_catalog(&dir);
        let table = create_users(&pm, &catalog);
        for name in ["zeta", "alpha", "mid"] {
            catalog
                .create_index(IndexCatalogEntry::new(
                    table.table_id,
                    name,
                    vec![1],
                    false,
                    false,
                    "",
                ))
                .unwrap();
        }
        let names: Vec<_> = catalog
            .get_indexes(table.table_id)
            .unwrap()
            .iter()
            .map(|i| i.name.clone())
            .collect();
        assert_eq!(names, vec!["alpha", "mid", "zeta"]);
    }

    #[test]
    fn test_drop_table_removes_columns_and_indexes() {
        let dir = tempdir().unwrap();
        let (pm, catalog) = open_catalog(&dir);
        let table = create_users(&pm, &catalog);
        catalog
            .create_index(IndexCatalogEntry::new(
                table.table_id,
                "idx_gone",
                vec![1],
                false,
                false,
                "",
            ))
            .unwrap();

        assert!(catalog.drop_table("users", false).unwrap());
        assert!(!catalog.table_exists("users").unwrap());
        assert!(catalog.get_columns(table.table_id).unwrap().is_empty());
        assert!(catalog.get_indexes(table.table_id).unwrap().is_empty());
        assert!(!catalog.drop_table("users", false).unwrap());
    }

    #[test]
    fn test_catalog_survives_reopen() {
        let dir = tempdir().unwrap();
        let config = StorageConfig::with_data_dir(dir.path());
        let table_id;
        {
            let pm = Arc::new(PageManager::open(config.db_path(), true, false, 128).unwrap());
            let catalog = CatalogManager::new(pm.clone()).unwrap();
            let table = create_users(&pm, &catalog);
            table_id = table.table_id;
            catalog
                .add_column(table.table_id, column("age", DataType::Integer), None)
                .unwrap();
            pm.flush_all().unwrap();
        }

        let pm = Arc::new(PageManager::open(config.db_path(), false, false, 128).unwrap());
        let catalog = CatalogManager::new(pm).unwrap();
        let table = catalog.get_table("users").unwrap().unwrap();
        assert_eq!(table.table_id, table_id);
        assert_eq!(table.schema_version, 2);
        let columns = catalog.get_columns(table_id).unwrap();
        assert_eq!(columns.len(), 3);
        assert_eq!(columns[2].column.name, "age");
    }
}
