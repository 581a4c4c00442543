//! DDL execution: CREATE/DROP TABLE, CREATE/DROP INDEX, ALTER TABLE.

use std::sync::Arc;

use kaze_catalog::{
    CatalogManager, ColumnConstraint, ColumnDef, IndexCatalogEntry, TableCatalogEntry, TableDef,
};
use kaze_common::config::{StorageConfig, ALTER_TABLE_IMPLICIT_NULL_FILL, MAX_COLUMNS_PER_TABLE};
use kaze_common::types::DataType;
use kaze_common::value::{parse_date, Value};
use kaze_common::{KazeError, Result};
use kaze_storage::record::Field;
use kaze_storage::{HeapMigration, IndexManager, MigrationColumn, PageManager, TableHeap};

use crate::ast::{
    AlterTableAction, AlterTableStatement, ColumnConstraintAst, ColumnDefAst,
    CreateIndexStatement, CreateTableStatement, DropIndexStatement, DropTableStatement,
};
use crate::rows;

fn normalize_identifier(name: &str) -> String {
    name.to_uppercase()
}

/// Executes DDL statements against one opened database.
pub struct DdlExecutor {
    catalog: Arc<CatalogManager>,
    pm: Arc<PageManager>,
    index_manager: Arc<IndexManager>,
    config: StorageConfig,
}

impl DdlExecutor {
    pub fn new(
        catalog: Arc<CatalogManager>,
        pm: Arc<PageManager>,
        index_manager: Arc<IndexManager>,
        config: StorageConfig,
    ) -> Self {
        Self {
            catalog,
            pm,
            index_manager,
            config,
        }
    }

    // =========================================================================
    // CREATE / DROP TABLE
    // =========================================================================

    pub fn create_table(&self, stmt: &CreateTableStatement) -> Result<TableCatalogEntry> {
        if stmt.table.is_empty() {
            return Err(KazeError::SyntaxError("missing table name".to_string()));
        }
        if stmt.columns.is_empty() {
            return Err(KazeError::SyntaxError("missing column list".to_string()));
        }
        if stmt.columns.len() > MAX_COLUMNS_PER_TABLE {
            return Err(KazeError::InvalidConstraint("too many columns".to_string()));
        }

        let mut seen_names = std::collections::HashSet::new();
        let mut primary_key_name: Option<String> = None;
        let mut columns = Vec::with_capacity(stmt.columns.len());
        for (i, column_ast) in stmt.columns.iter().enumerate() {
            if column_ast.name.is_empty() {
                return Err(KazeError::SyntaxError("missing column name".to_string()));
            }
            if !seen_names.insert(normalize_identifier(&column_ast.name)) {
                return Err(KazeError::DuplicateColumn(column_ast.name.clone()));
            }
            let column = map_column(i, column_ast);
            if column.constraint.primary_key {
                if primary_key_name.is_some() {
                    return Err(KazeError::InvalidConstraint(
                        "multiple PRIMARY KEY columns".to_string(),
                    ));
                }
                primary_key_name = Some(column.name.clone());
            }
            columns.push(column);
        }

        let def = TableDef {
            name: stmt.table.clone(),
            next_column_id: columns.len() as u32 + 1,
            columns,
            schema_version: 1,
        };

        let root_page_id = self.pm.new_page(kaze_common::page::PageType::Data)?;
        let create_sql = render_create_table(stmt);
        let entry = self.catalog.create_table(def, root_page_id, &create_sql)?;
        log::debug!("created table {} (id {})", entry.name, entry.table_id);

        if let Some(pk_column) = primary_key_name {
            let pk_stmt = CreateIndexStatement {
                name: format!("{}_pk", entry.name),
                unique: true,
                table: entry.name.clone(),
                columns: vec![pk_column],
                if_not_exists: true,
            };
            self.create_index_internal(&pk_stmt, true)?;
        }

        let table_file = self.config.table_path(entry.table_id);
        if let Err(source) = std::fs::File::create(&table_file) {
            self.catalog.drop_table(&entry.name, true)?;
            self.pm.free_page(entry.root_page_id)?;
            return Err(KazeError::IoWrite {
                path: table_file,
                page_id: 0,
                source,
            });
        }

        Ok(entry)
    }

    /// Drops a table with its indexes, heap root, and per-table file.
    ///
    /// Returns false (a no-op) when the table is missing and `IF EXISTS`
    /// was given.
    pub fn drop_table(&self, stmt: &DropTableStatement) -> Result<bool> {
        let Some(table) = self.catalog.get_table(&stmt.table)? else {
            if stmt.if_exists {
                return Ok(false);
            }
            return Err(KazeError::table_not_found(&stmt.table));
        };

        for index in self.catalog.get_indexes(table.table_id)? {
            self.index_manager.drop_index(index.index_id)?;
        }
        if !self.catalog.drop_table(&stmt.table, stmt.cascade)? {
            if stmt.if_exists {
                return Ok(false);
            }
            return Err(KazeError::table_not_found(&stmt.table));
        }
        self.pm.free_page(table.root_page_id)?;

        let table_file = self.config.table_path(table.table_id);
        if table_file.exists() {
            std::fs::remove_file(&table_file).map_err(|source| KazeError::IoWrite {
                path: table_file,
                page_id: 0,
                source,
            })?;
        }
        log::debug!("dropped table {}", stmt.table);
        Ok(true)
    }

    // =========================================================================
    // CREATE / DROP INDEX
    // =========================================================================

    /// Creates an index; returns None when `IF NOT EXISTS` made it a no-op.
    ///
    /// The physical tree starts empty; tables that already hold rows are
    /// populated through [`DdlExecutor::rebuild_table_indexes`].
    pub fn create_index(&self, stmt: &CreateIndexStatement) -> Result<Option<IndexCatalogEntry>> {
        self.create_index_internal(stmt, false)
    }

    fn create_index_internal(
        &self,
        stmt: &CreateIndexStatement,
        is_primary: bool,
    ) -> Result<Option<IndexCatalogEntry>> {
        if stmt.name.is_empty() {
            return Err(KazeError::SyntaxError("missing index name".to_string()));
        }
        if self.catalog.index_exists(&stmt.name)? {
            if stmt.if_not_exists {
                return Ok(None);
            }
            return Err(KazeError::InvalidConstraint(format!(
                "index already exists: {}",
                stmt.name
            )));
        }
        let table = self
            .catalog
            .get_table(&stmt.table)?
            .ok_or_else(|| KazeError::table_not_found(&stmt.table))?;
        if stmt.columns.is_empty() {
            return Err(KazeError::SyntaxError("missing column list".to_string()));
        }

        let columns = self.catalog.get_columns(table.table_id)?;
        let mut column_ids = Vec::with_capacity(stmt.columns.len());
        for name in &stmt.columns {
            let normalized = normalize_identifier(name);
            let entry = columns
                .iter()
                .find(|c| normalize_identifier(&c.column.name) == normalized)
                .ok_or_else(|| KazeError::column_not_found_in(name.clone(), &stmt.table))?;
            column_ids.push(entry.column_id);
        }

        let entry = IndexCatalogEntry::new(
            table.table_id,
            &stmt.name,
            column_ids,
            stmt.unique,
            is_primary,
            render_create_index(stmt),
        );
        let mut created = self.catalog.create_index(entry)?;

        let handle = self
            .index_manager
            .create_index(created.index_id, created.is_unique)?;
        created.root_page_id = handle.tree().root_page_id();
        self.catalog
            .set_index_root(created.index_id, created.root_page_id)?;
        log::debug!("created index {} (id {})", created.name, created.index_id);
        Ok(Some(created))
    }

    /// Drops an index and its file. Returns false for an `IF EXISTS` no-op.
    pub fn drop_index(&self, stmt: &DropIndexStatement) -> Result<bool> {
        let Some(entry) = self.catalog.get_index(&stmt.name)? else {
            if stmt.if_exists {
                return Ok(false);
            }
            return Err(KazeError::IndexNotFound(stmt.name.clone()));
        };
        self.index_manager.drop_index(entry.index_id)?;
        self.catalog.drop_index(&stmt.name)
    }

    // =========================================================================
    // ALTER TABLE
    // =========================================================================

    pub fn alter_table(&self, stmt: &AlterTableStatement) -> Result<()> {
        let table = self
            .catalog
            .get_table(&stmt.table)?
            .ok_or_else(|| KazeError::table_not_found(&stmt.table))?;
        let old_columns = self.catalog.get_columns(table.table_id)?;

        match &stmt.action {
            AlterTableAction::AddColumn(column_ast) => {
                let mut column = map_column(old_columns.len(), column_ast);
                column.id = table.next_column_id;
                let default_value = self.build_default_value(&column)?;
                let default_field = match &default_value {
                    Some(value) if value.is_null() => {
                        if column.constraint.not_null {
                            return Err(KazeError::InvalidConstraint(format!(
                                "invalid default literal 'NULL' for column '{}'",
                                column.name
                            )));
                        }
                        Some(Field::null(column.data_type))
                    }
                    Some(value) => Some(rows::field_from_value(&column, value)?),
                    None => None,
                };

                let mut migration = migration_columns(&old_columns);
                migration.push(MigrationColumn {
                    name: column.name.clone(),
                    data_type: column.data_type,
                    not_null: column.constraint.not_null,
                    source_index: None,
                    default: default_field,
                });

                let new_root = HeapMigration::rewrite(
                    &self.pm,
                    table.root_page_id,
                    old_columns.len(),
                    &migration,
                )?;

                let added = self.catalog.add_column(table.table_id, column, None)?;
                self.catalog.set_table_root(table.table_id, new_root)?;
                HeapMigration::free_chain(&self.pm, table.root_page_id)?;
                if let Some(updated) = self.catalog.get_table_by_id(table.table_id)? {
                    self.rebuild_table_indexes(&updated)?;
                }
                log::debug!(
                    "added column {} to {} (schema v{})",
                    added.column.name,
                    table.name,
                    added.schema_version
                );
                Ok(())
            }
            AlterTableAction::DropColumn(column_name) => {
                if old_columns.len() <= 1 {
                    return Err(KazeError::InvalidConstraint(
                        "cannot drop the last column".to_string(),
                    ));
                }
                let target = old_columns
                    .iter()
                    .find(|c| &c.column.name == column_name)
                    .ok_or_else(|| {
                        KazeError::column_not_found_in(column_name.clone(), &stmt.table)
                    })?;
                if target.column.constraint.primary_key {
                    return Err(KazeError::InvalidConstraint(format!(
                        "cannot drop PRIMARY KEY column '{column_name}'"
                    )));
                }

                let migration: Vec<MigrationColumn> = old_columns
                    .iter()
                    .enumerate()
                    .filter(|(_, c)| c.column_id != target.column_id)
                    .map(|(i, c)| MigrationColumn {
                        name: c.column.name.clone(),
                        data_type: c.column.data_type,
                        not_null: c.column.constraint.not_null,
                        source_index: Some(i),
                        default: None,
                    })
                    .collect();

                let new_root = HeapMigration::rewrite(
                    &self.pm,
                    table.root_page_id,
                    old_columns.len(),
                    &migration,
                )?;

                self.catalog.drop_column(table.table_id, column_name)?;
                self.catalog.set_table_root(table.table_id, new_root)?;
                HeapMigration::free_chain(&self.pm, table.root_page_id)?;
                if let Some(updated) = self.catalog.get_table_by_id(table.table_id)? {
                    self.rebuild_table_indexes(&updated)?;
                }
                log::debug!("dropped column {column_name} from {}", table.name);
                Ok(())
            }
        }
    }

    fn build_default_value(&self, column: &ColumnDef) -> Result<Option<Value>> {
        let Some(_) = &column.constraint.default_literal else {
            if column.constraint.not_null {
                return Err(KazeError::InvalidConstraint(format!(
                    "ALTER TABLE ADD COLUMN requires DEFAULT for NOT NULL column '{}'",
                    column.name
                )));
            }
            if !ALTER_TABLE_IMPLICIT_NULL_FILL {
                return Err(KazeError::InvalidConstraint(
                    "ALTER TABLE ADD COLUMN requires DEFAULT value".to_string(),
                ));
            }
            return Ok(None);
        };
        parse_default_literal(column).map(Some)
    }

    /// Drops and repopulates every index of a table from its heap.
    ///
    /// Indexes whose keys reference columns that no longer exist are
    /// dropped instead of rebuilt. Record ids are preserved: rows stream
    /// from the heap with their current locations.
    pub fn rebuild_table_indexes(&self, table: &TableCatalogEntry) -> Result<()> {
        let indexes = self.catalog.get_indexes(table.table_id)?;
        if indexes.is_empty() {
            return Ok(());
        }

        let columns = self.catalog.get_columns(table.table_id)?;
        let lookup = rows::build_column_lookup(&columns);

        let mut active_indexes = Vec::with_capacity(indexes.len());
        for index in indexes {
            let missing = index
                .column_ids
                .iter()
                .any(|column_id| !lookup.contains_key(column_id));
            if missing {
                self.index_manager.drop_index(index.index_id)?;
                self.catalog.drop_index(&index.name)?;
                log::debug!("dropped index {} (column gone)", index.name);
                continue;
            }
            active_indexes.push(index);
        }
        if active_indexes.is_empty() {
            return Ok(());
        }

        let heap = TableHeap::new(&self.pm, table.root_page_id)?;
        let mut snapshot: Vec<(kaze_common::types::RecordId, Vec<Value>)> = Vec::new();
        heap.scan(|rid, payload| {
            snapshot.push((rid, rows::decode_row_values(&columns, payload)?));
            Ok(())
        })?;

        for index in &active_indexes {
            self.index_manager.drop_index(index.index_id)?;
            let mut handle = self
                .index_manager
                .create_index(index.index_id, index.is_unique)?;
            self.catalog
                .set_index_root(index.index_id, handle.tree().root_page_id())?;

            let mut key_columns = Vec::with_capacity(index.column_ids.len());
            let mut key_positions = Vec::with_capacity(index.column_ids.len());
            for column_id in &index.column_ids {
                let &pos = lookup.get(column_id).ok_or_else(|| {
                    KazeError::InvalidArgument(format!(
                        "index {} references missing column {column_id}",
                        index.name
                    ))
                })?;
                key_positions.push(pos);
                key_columns.push(columns[pos].clone());
            }

            for (rid, values) in &snapshot {
                let key_values: Vec<Value> =
                    key_positions.iter().map(|&p| values[p].clone()).collect();
                let key = rows::encode_index_key(&key_columns, &key_values)?;
                handle.tree_mut().insert(&key, *rid)?;
            }
            self.catalog
                .set_index_root(index.index_id, handle.tree().root_page_id())?;
            log::debug!(
                "rebuilt index {} over {} rows",
                index.name,
                snapshot.len()
            );
        }
        Ok(())
    }
}

fn migration_columns(old_columns: &[kaze_catalog::ColumnCatalogEntry]) -> Vec<MigrationColumn> {
    old_columns
        .iter()
        .enumerate()
        .map(|(i, c)| MigrationColumn {
            name: c.column.name.clone(),
            data_type: c.column.data_type,
            not_null: c.column.constraint.not_null,
            source_index: Some(i),
            default: None,
        })
        .collect()
}

fn map_constraint(constraint: &ColumnConstraintAst) -> ColumnConstraint {
    ColumnConstraint {
        not_null: constraint.not_null || constraint.primary_key,
        primary_key: constraint.primary_key,
        unique: constraint.unique || constraint.primary_key,
        default_literal: constraint.default_literal.clone(),
    }
}

fn map_column(index: usize, column_ast: &ColumnDefAst) -> ColumnDef {
    ColumnDef {
        id: index as u32 + 1,
        name: column_ast.name.clone(),
        data_type: column_ast.data_type,
        length: column_ast.length,
        constraint: map_constraint(&column_ast.constraint),
    }
}

fn parse_default_literal(column: &ColumnDef) -> Result<Value> {
    let literal = column
        .constraint
        .default_literal
        .as_deref()
        .unwrap_or_default();
    if literal.eq_ignore_ascii_case("NULL") {
        return Ok(Value::null(column.data_type));
    }

    let invalid = || {
        KazeError::InvalidConstraint(format!(
            "invalid default literal '{literal}' for column '{}'",
            column.name
        ))
    };

    match column.data_type {
        DataType::Boolean => {
            if literal.eq_ignore_ascii_case("TRUE") || literal == "1" {
                Ok(Value::Boolean(true))
            } else if literal.eq_ignore_ascii_case("FALSE") || literal == "0" {
                Ok(Value::Boolean(false))
            } else {
                Err(invalid())
            }
        }
        DataType::Integer => {
            let parsed: i64 = literal.parse().map_err(|_| invalid())?;
            let narrowed = i32::try_from(parsed).map_err(|_| {
                KazeError::InvalidConstraint("INTEGER default out of range".to_string())
            })?;
            Ok(Value::Integer(narrowed))
        }
        DataType::BigInt => Ok(Value::BigInt(literal.parse().map_err(|_| invalid())?)),
        DataType::Timestamp => Ok(Value::Timestamp(literal.parse().map_err(|_| invalid())?)),
        DataType::Float | DataType::Double => {
            Ok(Value::Double(literal.parse().map_err(|_| invalid())?))
        }
        DataType::Date => {
            let days = parse_date(literal).ok_or_else(invalid)?;
            Ok(Value::Date(days))
        }
        DataType::Varchar | DataType::Text => {
            Ok(Value::string(literal.to_string(), column.data_type))
        }
        DataType::Null => Err(KazeError::UnsupportedType(
            "default values for this column type are not supported".to_string(),
        )),
    }
}

fn render_type(column: &ColumnDefAst) -> String {
    if column.data_type == DataType::Varchar && column.length > 0 {
        format!("VARCHAR({})", column.length)
    } else {
        column.data_type.to_string()
    }
}

fn render_create_table(stmt: &CreateTableStatement) -> String {
    let columns: Vec<String> = stmt
        .columns
        .iter()
        .map(|column| {
            let mut text = format!("{} {}", column.name, render_type(column));
            if column.constraint.primary_key {
                text.push_str(" PRIMARY KEY");
            }
            if column.constraint.not_null && !column.constraint.primary_key {
                text.push_str(" NOT NULL");
            }
            if column.constraint.unique && !column.constraint.primary_key {
                text.push_str(" UNIQUE");
            }
            if let Some(default) = &column.constraint.default_literal {
                text.push_str(&format!(" DEFAULT {default}"));
            }
            text
        })
        .collect();
    format!("CREATE TABLE {}({})", stmt.table, columns.join(", "))
}

fn render_create_index(stmt: &CreateIndexStatement) -> String {
    format!(
        "CREATE {}INDEX {} ON {}({})",
        if stmt.unique { "UNIQUE " } else { "" },
        stmt.name,
        stmt.table,
        stmt.columns.join(", ")
    )
}
