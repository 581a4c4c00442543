//! DML execution: INSERT, SELECT, UPDATE, DELETE, TRUNCATE.
//!
//! SELECT runs as an ordered-row pipeline: bind names, pick a scan (index
//! equality, index range, order-covering index, or full heap scan), re-apply
//! the full predicate, then sort, dedupe, clip, and stringify. Indexes are
//! semi-decisions only; every candidate row is re-checked against the
//! predicate after the heap read.

use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use kaze_catalog::{CatalogManager, ColumnCatalogEntry, IndexCatalogEntry, TableCatalogEntry};
use kaze_common::types::{ColumnId, DataType, RecordId};
use kaze_common::value::{compare, CompareResult, Value};
use kaze_common::{KazeError, Result};
use kaze_storage::{IndexHandle, IndexManager, PageManager, TableHeap};

use crate::ast::{
    AggregateCall, AggregateFunction, BinaryOp, ColumnRef, DeleteStatement, Expression,
    InsertStatement, SelectItem, SelectStatement, TableRef, TruncateStatement, UpdateStatement,
};
use crate::evaluator::{BindingEntry, ExpressionEvaluator};
use crate::rows;

const CLAUSE_SELECT_LIST: &str = "SELECT list";
const CLAUSE_AGGREGATE: &str = "SELECT aggregate";
const CLAUSE_WHERE: &str = "WHERE clause";
const CLAUSE_ORDER_BY: &str = "ORDER BY clause";
const CLAUSE_FROM: &str = "FROM clause";
const CLAUSE_JOIN: &str = "JOIN clause";
const CLAUSE_JOIN_CONDITION: &str = "JOIN condition";
const CLAUSE_INSERT_TARGET: &str = "INSERT target";
const CLAUSE_UPDATE_TARGET: &str = "UPDATE target";
const CLAUSE_UPDATE_SET: &str = "SET clause";
const CLAUSE_DELETE_TARGET: &str = "DELETE target";
const CLAUSE_TRUNCATE_TARGET: &str = "TRUNCATE target";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InsertResult {
    pub rows_inserted: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeleteResult {
    pub rows_deleted: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpdateResult {
    pub rows_updated: usize,
}

/// A query result: header plus stringified tuples.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectResult {
    pub column_names: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

/// Test-visible callback fired when an index scan is chosen, reporting the
/// index and the record ids it yielded.
pub type IndexUsageObserver = Box<dyn Fn(&IndexCatalogEntry, &[RecordId])>;

struct BoundTable {
    table: TableCatalogEntry,
    columns: Vec<ColumnCatalogEntry>,
    alias: Option<String>,
}

struct BoundColumn {
    column: ColumnCatalogEntry,
    table_name: String,
    table_alias: Option<String>,
}

struct OrderTerm {
    value_index: usize,
    ascending: bool,
    column_id: ColumnId,
}

/// Per-column constraint folded out of the WHERE AND-tree.
#[derive(Debug, Clone, Default)]
struct ColumnPredicate {
    equality: Option<Value>,
    lower: Option<Value>,
    lower_inclusive: bool,
    upper: Option<Value>,
    upper_inclusive: bool,
    contradiction: bool,
}

impl ColumnPredicate {
    fn bounds_compatible(&self) -> bool {
        if self.contradiction {
            return false;
        }
        if let (Some(lower), Some(upper)) = (&self.lower, &self.upper) {
            match compare(lower, upper) {
                CompareResult::Greater => return false,
                CompareResult::Equal if !self.lower_inclusive || !self.upper_inclusive => {
                    return false
                }
                _ => {}
            }
        }
        true
    }

    fn apply_lower(&mut self, value: &Value, inclusive: bool) -> bool {
        if self.contradiction {
            return false;
        }
        if value.is_null() {
            self.contradiction = true;
            return false;
        }
        match &self.lower {
            None => {
                self.lower = Some(value.clone());
                self.lower_inclusive = inclusive;
            }
            Some(current) => match compare(value, current) {
                CompareResult::Greater => {
                    self.lower = Some(value.clone());
                    self.lower_inclusive = inclusive;
                }
                CompareResult::Equal => {
                    self.lower_inclusive = self.lower_inclusive && inclusive;
                }
                CompareResult::Less => {}
                CompareResult::Unknown => {
                    self.contradiction = true;
                    return false;
                }
            },
        }
        if !self.bounds_compatible() {
            self.contradiction = true;
            return false;
        }
        true
    }

    fn apply_upper(&mut self, value: &Value, inclusive: bool) -> bool {
        if self.contradiction {
            return false;
        }
        if value.is_null() {
            self.contradiction = true;
            return false;
        }
        match &self.upper {
            None => {
                self.upper = Some(value.clone());
                self.upper_inclusive = inclusive;
            }
            Some(current) => match compare(value, current) {
                CompareResult::Less => {
                    self.upper = Some(value.clone());
                    self.upper_inclusive = inclusive;
                }
                CompareResult::Equal => {
                    self.upper_inclusive = self.upper_inclusive && inclusive;
                }
                CompareResult::Greater => {}
                CompareResult::Unknown => {
                    self.contradiction = true;
                    return false;
                }
            },
        }
        if !self.bounds_compatible() {
            self.contradiction = true;
            return false;
        }
        true
    }

    fn apply_equality(&mut self, value: &Value) -> bool {
        if self.contradiction {
            return false;
        }
        if value.is_null() {
            self.contradiction = true;
            return false;
        }
        if let Some(current) = &self.equality {
            if compare(current, value) != CompareResult::Equal {
                self.contradiction = true;
                return false;
            }
        }
        self.equality = Some(value.clone());
        self.apply_lower(value, true) && self.apply_upper(value, true)
    }
}

#[derive(Debug, Default)]
struct PredicateExtraction {
    predicates: HashMap<ColumnId, ColumnPredicate>,
    contradiction: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ScanKind {
    Equality,
    Range,
}

#[derive(Debug, Clone)]
struct IndexScanSpec {
    context_index: usize,
    kind: ScanKind,
    equality_values: Vec<Value>,
    lower_value: Option<Value>,
    lower_inclusive: bool,
    upper_value: Option<Value>,
    upper_inclusive: bool,
}

/// Executes DML statements against one opened database.
pub struct DmlExecutor {
    catalog: Arc<CatalogManager>,
    pm: Arc<PageManager>,
    index_manager: Arc<IndexManager>,
    observer: Option<IndexUsageObserver>,
}

impl DmlExecutor {
    pub fn new(
        catalog: Arc<CatalogManager>,
        pm: Arc<PageManager>,
        index_manager: Arc<IndexManager>,
    ) -> Self {
        Self {
            catalog,
            pm,
            index_manager,
            observer: None,
        }
    }

    /// Installs the index-usage observer.
    pub fn set_index_usage_observer(&mut self, observer: IndexUsageObserver) {
        self.observer = Some(observer);
    }

    fn open_handles(&self, entries: &[IndexCatalogEntry]) -> Result<Vec<IndexHandle>> {
        entries
            .iter()
            .map(|entry| {
                self.index_manager
                    .open_index(entry.index_id, entry.is_unique, entry.root_page_id)
            })
            .collect()
    }

    fn record_index_root(
        &self,
        entries: &mut [IndexCatalogEntry],
        handles: &[IndexHandle],
        i: usize,
    ) -> Result<()> {
        let root = handles[i].tree().root_page_id();
        if root != entries[i].root_page_id {
            self.catalog.set_index_root(entries[i].index_id, root)?;
            entries[i].root_page_id = root;
        }
        Ok(())
    }

    fn build_index_key(
        &self,
        entry: &IndexCatalogEntry,
        columns: &[ColumnCatalogEntry],
        row_values: &[Value],
        lookup: &HashMap<ColumnId, usize>,
    ) -> Result<Vec<u8>> {
        let mut key_columns = Vec::with_capacity(entry.column_ids.len());
        let mut key_values = Vec::with_capacity(entry.column_ids.len());
        for column_id in &entry.column_ids {
            let &pos = lookup.get(column_id).ok_or_else(|| {
                KazeError::InvalidArgument(format!(
                    "index {} references missing column {column_id}",
                    entry.name
                ))
            })?;
            key_columns.push(columns[pos].clone());
            key_values.push(row_values[pos].clone());
        }
        rows::encode_index_key(&key_columns, &key_values)
    }

    // =========================================================================
    // INSERT
    // =========================================================================

    pub fn insert(&self, stmt: &InsertStatement) -> Result<InsertResult> {
        let table = self
            .catalog
            .get_table(&stmt.table)?
            .ok_or_else(|| KazeError::table_not_found_in(&stmt.table, CLAUSE_INSERT_TARGET))?;
        let columns = self.catalog.get_columns(table.table_id)?;
        if columns.is_empty() {
            return Err(KazeError::InvalidConstraint(
                "table has no columns".to_string(),
            ));
        }

        let column_names: Vec<String> = if stmt.columns.is_empty() {
            columns.iter().map(|c| c.column.name.clone()).collect()
        } else {
            stmt.columns.clone()
        };
        if column_names.len() != columns.len() {
            return Err(KazeError::InvalidConstraint(
                "column count mismatch".to_string(),
            ));
        }

        let mut index_entries = self.catalog.get_indexes(table.table_id)?;
        let mut handles = self.open_handles(&index_entries)?;
        let lookup = rows::build_column_lookup(&columns);

        let heap = TableHeap::new(&self.pm, table.root_page_id)?;
        let mut inserted = 0;
        for row in &stmt.rows {
            if row.len() != column_names.len() {
                return Err(KazeError::InvalidConstraint(
                    "row value count mismatch".to_string(),
                ));
            }
            let payload = rows::encode_row(&columns, row, &column_names, &table.name)?;
            let row_values = rows::decode_row_values(&columns, &payload)?;
            let location = heap.insert(&payload)?;

            for i in 0..index_entries.len() {
                let key =
                    self.build_index_key(&index_entries[i], &columns, &row_values, &lookup)?;
                handles[i].tree_mut().insert(&key, location)?;
                self.record_index_root(&mut index_entries, &handles, i)?;
            }
            inserted += 1;
        }

        Ok(InsertResult {
            rows_inserted: inserted,
        })
    }

    // =========================================================================
    // SELECT
    // =========================================================================

    fn bind_table(&self, reference: &TableRef, clause: &str) -> Result<BoundTable> {
        let table = self
            .catalog
            .get_table(&reference.table)?
            .ok_or_else(|| KazeError::table_not_found_in(&reference.table, clause))?;
        let columns = self.catalog.get_columns(table.table_id)?;
        if columns.is_empty() {
            return Err(KazeError::InvalidConstraint(
                "table has no columns".to_string(),
            ));
        }
        Ok(BoundTable {
            table,
            columns,
            alias: reference.alias.clone(),
        })
    }

    pub fn select(&self, stmt: &SelectStatement) -> Result<SelectResult> {
        let mut tables = vec![self.bind_table(&stmt.from, CLAUSE_FROM)?];
        for join in &stmt.joins {
            tables.push(self.bind_table(&join.table, CLAUSE_JOIN)?);
        }

        let mut bound_columns = Vec::new();
        for table in &tables {
            for column in &table.columns {
                bound_columns.push(BoundColumn {
                    column: column.clone(),
                    table_name: table.table.name.clone(),
                    table_alias: table.alias.clone(),
                });
            }
        }

        let limit = match stmt.limit {
            Some(n) if n >= 0 => n as usize,
            _ => usize::MAX,
        };

        let mut has_aggregates = false;
        let mut has_scalar_items = false;
        for item in &stmt.items {
            match item {
                SelectItem::Aggregate(_) => has_aggregates = true,
                _ => has_scalar_items = true,
            }
        }
        if has_aggregates && has_scalar_items {
            return Err(KazeError::InvalidConstraint(
                "cannot mix aggregate and scalar select items without GROUP BY".to_string(),
            ));
        }

        let binding_entries: Vec<BindingEntry> = bound_columns
            .iter()
            .enumerate()
            .map(|(i, bound)| {
                let mut qualifiers = vec![bound.table_name.clone()];
                if let Some(alias) = &bound.table_alias {
                    qualifiers.push(alias.clone());
                }
                BindingEntry {
                    column_name: bound.column.column.name.clone(),
                    index: i,
                    data_type: bound.column.column.data_type,
                    qualifiers,
                }
            })
            .collect();
        let full_evaluator = ExpressionEvaluator::new(&binding_entries);

        let mut order_terms = Vec::with_capacity(stmt.order_by.len());
        let mut all_order_descending = true;
        let mut mixed_order_direction = false;
        for (i, term) in stmt.order_by.iter().enumerate() {
            let resolved = full_evaluator.resolve_column(&term.column, CLAUSE_ORDER_BY)?;
            order_terms.push(OrderTerm {
                value_index: resolved.index,
                ascending: term.ascending,
                column_id: bound_columns[resolved.index].column.column_id,
            });
            if term.ascending {
                all_order_descending = false;
            }
            if i > 0 && term.ascending != stmt.order_by[i - 1].ascending {
                mixed_order_direction = true;
            }
        }
        let has_order = !order_terms.is_empty();

        let predicate = stmt.where_clause.as_ref();
        let mut filtered_rows: Vec<Vec<Value>> = Vec::new();
        let mut rows_already_sorted = false;

        if tables.len() == 1 {
            let bound = &tables[0];
            let columns = &bound.columns;
            let index_entries = self.catalog.get_indexes(bound.table.table_id)?;
            let lookup = rows::build_column_lookup(columns);

            let predicate_info = match predicate {
                Some(expr) => {
                    self.extract_column_predicates(expr, columns, &bound.table.name, &bound.alias)?
                }
                None => None,
            };

            let contradiction = predicate_info
                .as_ref()
                .map(|info| info.contradiction)
                .unwrap_or(false);

            if !contradiction {
                // An index whose key prefix matches the ORDER BY terms can
                // hand back rows in final order.
                let mut order_index_context = None;
                if has_order && !mixed_order_direction {
                    for (i, entry) in index_entries.iter().enumerate() {
                        if entry.column_ids.len() < order_terms.len() {
                            continue;
                        }
                        let matches = order_terms
                            .iter()
                            .enumerate()
                            .all(|(j, term)| entry.column_ids[j] == term.column_id);
                        if matches {
                            order_index_context = Some(i);
                            break;
                        }
                    }
                }

                let mut candidate_ids: Vec<RecordId> = Vec::new();
                let mut candidate_ids_populated = false;
                let mut candidate_ids_in_final_order = false;

                if predicate.is_some() && !index_entries.is_empty() {
                    if let Some(info) = &predicate_info {
                        if let Some(spec) = Self::choose_index_scan(&index_entries, info) {
                            let entry = &index_entries[spec.context_index];
                            let handle = self.index_manager.open_index(
                                entry.index_id,
                                entry.is_unique,
                                entry.root_page_id,
                            )?;
                            candidate_ids = self.run_index_scan(
                                &spec,
                                &index_entries,
                                &handle,
                                columns,
                                &lookup,
                            )?;
                            candidate_ids_populated = true;
                            if has_order
                                && !mixed_order_direction
                                && order_index_context == Some(spec.context_index)
                            {
                                candidate_ids_in_final_order = true;
                                if all_order_descending {
                                    candidate_ids.reverse();
                                }
                            }
                        }
                    }
                }

                if !candidate_ids_populated {
                    if let Some(context) = order_index_context {
                        let entry = &index_entries[context];
                        let handle = self.index_manager.open_index(
                            entry.index_id,
                            entry.is_unique,
                            entry.root_page_id,
                        )?;

                        let mut lower_key = None;
                        let mut upper_key = None;
                        let mut lower_inclusive = true;
                        let mut upper_inclusive = true;
                        if let (Some(info), Some(&first_column)) =
                            (&predicate_info, entry.column_ids.first())
                        {
                            if let (Some(column_pred), Some(&pos)) =
                                (info.predicates.get(&first_column), lookup.get(&first_column))
                            {
                                let key_columns = vec![columns[pos].clone()];
                                if let Some(equality) = &column_pred.equality {
                                    let key = rows::encode_index_key(
                                        &key_columns,
                                        std::slice::from_ref(equality),
                                    )?;
                                    lower_key = Some(key.clone());
                                    upper_key = Some(key);
                                } else {
                                    if let Some(lower) = &column_pred.lower {
                                        lower_key = Some(rows::encode_index_key(
                                            &key_columns,
                                            std::slice::from_ref(lower),
                                        )?);
                                        lower_inclusive = column_pred.lower_inclusive;
                                    }
                                    if let Some(upper) = &column_pred.upper {
                                        upper_key = Some(rows::encode_index_key(
                                            &key_columns,
                                            std::slice::from_ref(upper),
                                        )?);
                                        upper_inclusive = column_pred.upper_inclusive;
                                    }
                                }
                            }
                        }

                        candidate_ids = handle.tree().scan_range(
                            lower_key.as_deref(),
                            lower_inclusive,
                            upper_key.as_deref(),
                            upper_inclusive,
                        )?;
                        candidate_ids_populated = true;
                        candidate_ids_in_final_order = true;
                        if all_order_descending {
                            candidate_ids.reverse();
                        }
                    }
                }

                let heap = TableHeap::new(&self.pm, bound.table.root_page_id)?;
                if candidate_ids_populated {
                    for rid in candidate_ids {
                        let Some(payload) = heap.read(rid)? else {
                            continue;
                        };
                        let values = rows::decode_row_values(columns, &payload)?;
                        if let Some(expr) = predicate {
                            if !full_evaluator
                                .evaluate_predicate(expr, &values, CLAUSE_WHERE)?
                                .is_true()
                            {
                                continue;
                            }
                        }
                        filtered_rows.push(values);
                    }
                } else {
                    heap.scan(|_, payload| {
                        let values = rows::decode_row_values(columns, payload)?;
                        if let Some(expr) = predicate {
                            if !full_evaluator
                                .evaluate_predicate(expr, &values, CLAUSE_WHERE)?
                                .is_true()
                            {
                                return Ok(());
                            }
                        }
                        filtered_rows.push(values);
                        Ok(())
                    })?;
                }
                rows_already_sorted = candidate_ids_in_final_order;
            }
        } else {
            // Left-deep nested-loop join over fully materialized inputs.
            let mut table_rows: Vec<Vec<Vec<Value>>> = Vec::with_capacity(tables.len());
            for bound in &tables {
                let heap = TableHeap::new(&self.pm, bound.table.root_page_id)?;
                let mut rows_for_table = Vec::new();
                heap.scan(|_, payload| {
                    rows_for_table.push(rows::decode_row_values(&bound.columns, payload)?);
                    Ok(())
                })?;
                table_rows.push(rows_for_table);
            }

            let prefix_evaluator = |table_count: usize| {
                let mut prefix = Vec::new();
                let mut index = 0usize;
                for bound in tables.iter().take(table_count) {
                    for column in &bound.columns {
                        let mut qualifiers = vec![bound.table.name.clone()];
                        if let Some(alias) = &bound.alias {
                            qualifiers.push(alias.clone());
                        }
                        prefix.push(BindingEntry {
                            column_name: column.column.name.clone(),
                            index,
                            data_type: column.column.data_type,
                            qualifiers,
                        });
                        index += 1;
                    }
                }
                ExpressionEvaluator::new(&prefix)
            };

            let mut combined_rows = table_rows.first().cloned().unwrap_or_default();
            for (join_index, join) in stmt.joins.iter().enumerate() {
                let evaluator = prefix_evaluator(join_index + 2);
                let right_rows = &table_rows[join_index + 1];
                let mut next_rows =
                    Vec::with_capacity(combined_rows.len().saturating_mul(right_rows.len()));
                for left in &combined_rows {
                    for right in right_rows {
                        let mut merged = Vec::with_capacity(left.len() + right.len());
                        merged.extend_from_slice(left);
                        merged.extend_from_slice(right);
                        let passes = match &join.condition {
                            Some(condition) => evaluator
                                .evaluate_predicate(condition, &merged, CLAUSE_JOIN_CONDITION)?
                                .is_true(),
                            None => true,
                        };
                        if passes {
                            next_rows.push(merged);
                        }
                    }
                }
                combined_rows = next_rows;
                if combined_rows.is_empty() {
                    break;
                }
            }

            if let Some(expr) = predicate {
                for row in combined_rows {
                    if full_evaluator
                        .evaluate_predicate(expr, &row, CLAUSE_WHERE)?
                        .is_true()
                    {
                        filtered_rows.push(row);
                    }
                }
            } else {
                filtered_rows = combined_rows;
            }
        }

        if has_aggregates {
            let mut column_names = Vec::new();
            let mut aggregate_values = Vec::new();
            for item in &stmt.items {
                let SelectItem::Aggregate(call) = item else {
                    continue;
                };
                column_names.push(describe_aggregate(call));
                aggregate_values.push(self.evaluate_aggregate(
                    call,
                    &full_evaluator,
                    &filtered_rows,
                )?);
            }
            let mut result = SelectResult {
                column_names,
                rows: Vec::new(),
            };
            if limit == 0 {
                return Ok(result);
            }
            if !aggregate_values.is_empty() {
                result
                    .rows
                    .push(aggregate_values.iter().map(|v| v.to_string()).collect());
            }
            return Ok(result);
        }

        let qualify = tables.len() > 1;
        let (mut projection, mut projection_names) =
            Self::build_projection(stmt, &bound_columns, &full_evaluator, qualify)?;
        if projection.is_empty() {
            projection = (0..bound_columns.len()).collect();
            projection_names = bound_columns
                .iter()
                .map(|bound| Self::projected_name(bound, qualify))
                .collect();
        }

        let mut result = SelectResult {
            column_names: projection_names,
            rows: Vec::new(),
        };
        if limit == 0 {
            return Ok(result);
        }

        let mut row_indices: Vec<usize> = (0..filtered_rows.len()).collect();
        if has_order && !rows_already_sorted {
            row_indices.sort_by(|&a, &b| {
                Self::order_rows(&filtered_rows[a], &filtered_rows[b], &order_terms)
            });
        }

        if stmt.distinct {
            let mut seen = HashSet::with_capacity(row_indices.len());
            row_indices.retain(|&idx| {
                seen.insert(rows::row_signature(&filtered_rows[idx], &projection))
            });
        }

        if row_indices.len() > limit {
            row_indices.truncate(limit);
        }

        for idx in row_indices {
            let row = &filtered_rows[idx];
            result
                .rows
                .push(projection.iter().map(|&p| row[p].to_string()).collect());
        }
        Ok(result)
    }

    fn projected_name(bound: &BoundColumn, qualify: bool) -> String {
        if qualify {
            let qualifier = bound.table_alias.as_ref().unwrap_or(&bound.table_name);
            format!("{qualifier}.{}", bound.column.column.name)
        } else {
            bound.column.column.name.clone()
        }
    }

    fn build_projection(
        stmt: &SelectStatement,
        bound_columns: &[BoundColumn],
        resolver: &ExpressionEvaluator,
        qualify: bool,
    ) -> Result<(Vec<usize>, Vec<String>)> {
        let mut projection = Vec::new();
        let mut names = Vec::new();
        let mut expanded_star = false;

        for item in &stmt.items {
            match item {
                SelectItem::Star => {
                    if !expanded_star {
                        for (i, bound) in bound_columns.iter().enumerate() {
                            projection.push(i);
                            names.push(Self::projected_name(bound, qualify));
                        }
                        expanded_star = true;
                    }
                }
                SelectItem::Column(reference) => {
                    let resolved = resolver.resolve_column(reference, CLAUSE_SELECT_LIST)?;
                    projection.push(resolved.index);
                    names.push(Self::projected_name(&bound_columns[resolved.index], qualify));
                }
                SelectItem::Aggregate(_) => {}
            }
        }
        Ok((projection, names))
    }

    fn order_rows(lhs: &[Value], rhs: &[Value], terms: &[OrderTerm]) -> Ordering {
        for term in terms {
            let lv = &lhs[term.value_index];
            let rv = &rhs[term.value_index];
            // NULL sorts below every value: first ascending, last descending.
            let ord = match (lv.is_null(), rv.is_null()) {
                (true, true) => Ordering::Equal,
                (true, false) => {
                    if term.ascending {
                        Ordering::Less
                    } else {
                        Ordering::Greater
                    }
                }
                (false, true) => {
                    if term.ascending {
                        Ordering::Greater
                    } else {
                        Ordering::Less
                    }
                }
                (false, false) => match compare(lv, rv) {
                    CompareResult::Less => {
                        if term.ascending {
                            Ordering::Less
                        } else {
                            Ordering::Greater
                        }
                    }
                    CompareResult::Greater => {
                        if term.ascending {
                            Ordering::Greater
                        } else {
                            Ordering::Less
                        }
                    }
                    _ => Ordering::Equal,
                },
            };
            if ord != Ordering::Equal {
                return ord;
            }
        }
        Ordering::Equal
    }

    // =========================================================================
    // Plan selection
    // =========================================================================

    fn find_column_index(
        columns: &[ColumnCatalogEntry],
        table_name: &str,
        alias: &Option<String>,
        reference: &ColumnRef,
    ) -> Option<usize> {
        if let Some(qualifier) = &reference.table {
            let alias_matches = alias.as_deref() == Some(qualifier.as_str());
            if qualifier != table_name && !alias_matches {
                return None;
            }
        }
        columns
            .iter()
            .position(|c| c.column.name == reference.column)
    }

    /// Folds the predicate's AND-tree into per-column constraints.
    ///
    /// Returns None when any unhandled shape (OR, NOT, multi-column
    /// comparison, unknown name) aborts extraction; the full predicate is
    /// still applied after the scan either way.
    fn extract_column_predicates(
        &self,
        predicate: &Expression,
        columns: &[ColumnCatalogEntry],
        table_name: &str,
        alias: &Option<String>,
    ) -> Result<Option<PredicateExtraction>> {
        let mut extraction = PredicateExtraction::default();
        if !Self::visit_predicate(predicate, columns, table_name, alias, &mut extraction)? {
            return Ok(None);
        }
        for column_predicate in extraction.predicates.values() {
            if column_predicate.contradiction || !column_predicate.bounds_compatible() {
                extraction.contradiction = true;
                break;
            }
        }
        Ok(Some(extraction))
    }

    fn visit_predicate(
        expression: &Expression,
        columns: &[ColumnCatalogEntry],
        table_name: &str,
        alias: &Option<String>,
        extraction: &mut PredicateExtraction,
    ) -> Result<bool> {
        let Expression::Binary { op, left, right } = expression else {
            return Ok(false);
        };

        if *op == BinaryOp::And {
            if !Self::visit_predicate(left, columns, table_name, alias, extraction)? {
                return Ok(false);
            }
            return Self::visit_predicate(right, columns, table_name, alias, extraction);
        }

        if !matches!(
            op,
            BinaryOp::Equal
                | BinaryOp::Less
                | BinaryOp::LessEqual
                | BinaryOp::Greater
                | BinaryOp::GreaterEqual
        ) {
            return Ok(false);
        }

        let (reference, literal, column_on_left) = match (left.as_ref(), right.as_ref()) {
            (Expression::Column(c), Expression::Literal(l)) => (c, l, true),
            (Expression::Literal(l), Expression::Column(c)) => (c, l, false),
            _ => return Ok(false),
        };

        let Some(column_index) = Self::find_column_index(columns, table_name, alias, reference)
        else {
            return Ok(false);
        };
        let entry = &columns[column_index];
        let literal_value = rows::literal_to_value_for_column(entry, literal)?;
        if literal_value.is_null() {
            return Ok(false);
        }

        let column_predicate = extraction.predicates.entry(entry.column_id).or_default();

        // Normalize `literal OP column` by flipping the operator.
        let effective_op = if column_on_left {
            *op
        } else {
            match op {
                BinaryOp::Less => BinaryOp::Greater,
                BinaryOp::LessEqual => BinaryOp::GreaterEqual,
                BinaryOp::Greater => BinaryOp::Less,
                BinaryOp::GreaterEqual => BinaryOp::LessEqual,
                other => *other,
            }
        };

        let ok = match effective_op {
            BinaryOp::Equal => column_predicate.apply_equality(&literal_value),
            BinaryOp::Greater => column_predicate.apply_lower(&literal_value, false),
            BinaryOp::GreaterEqual => column_predicate.apply_lower(&literal_value, true),
            BinaryOp::Less => column_predicate.apply_upper(&literal_value, false),
            BinaryOp::LessEqual => column_predicate.apply_upper(&literal_value, true),
            _ => false,
        };

        if !ok {
            extraction.contradiction = column_predicate.contradiction;
            if !extraction.contradiction {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Index choice: widest covering equality prefix, else a single-column
    /// range index.
    fn choose_index_scan(
        index_entries: &[IndexCatalogEntry],
        extraction: &PredicateExtraction,
    ) -> Option<IndexScanSpec> {
        if extraction.contradiction || extraction.predicates.is_empty() {
            return None;
        }

        let mut best_spec: Option<IndexScanSpec> = None;
        let mut best_width = 0usize;

        for (i, entry) in index_entries.iter().enumerate() {
            if entry.column_ids.is_empty() {
                continue;
            }
            let mut equality_values = Vec::with_capacity(entry.column_ids.len());
            let matches_all = entry.column_ids.iter().all(|column_id| {
                match extraction.predicates.get(column_id).and_then(|p| p.equality.as_ref()) {
                    Some(value) => {
                        equality_values.push(value.clone());
                        true
                    }
                    None => false,
                }
            });
            if matches_all && (best_spec.is_none() || entry.column_ids.len() > best_width) {
                best_width = entry.column_ids.len();
                best_spec = Some(IndexScanSpec {
                    context_index: i,
                    kind: ScanKind::Equality,
                    equality_values,
                    lower_value: None,
                    lower_inclusive: true,
                    upper_value: None,
                    upper_inclusive: true,
                });
            }
        }
        if best_spec.is_some() {
            return best_spec;
        }

        for (i, entry) in index_entries.iter().enumerate() {
            if entry.column_ids.len() != 1 {
                continue;
            }
            let Some(column_pred) = extraction.predicates.get(&entry.column_ids[0]) else {
                continue;
            };
            if column_pred.contradiction {
                return None;
            }
            if let Some(equality) = &column_pred.equality {
                return Some(IndexScanSpec {
                    context_index: i,
                    kind: ScanKind::Equality,
                    equality_values: vec![equality.clone()],
                    lower_value: None,
                    lower_inclusive: true,
                    upper_value: None,
                    upper_inclusive: true,
                });
            }
            if column_pred.lower.is_some() || column_pred.upper.is_some() {
                return Some(IndexScanSpec {
                    context_index: i,
                    kind: ScanKind::Range,
                    equality_values: Vec::new(),
                    lower_value: column_pred.lower.clone(),
                    lower_inclusive: column_pred.lower_inclusive,
                    upper_value: column_pred.upper.clone(),
                    upper_inclusive: column_pred.upper_inclusive,
                });
            }
        }

        None
    }

    fn run_index_scan(
        &self,
        spec: &IndexScanSpec,
        index_entries: &[IndexCatalogEntry],
        handle: &IndexHandle,
        columns: &[ColumnCatalogEntry],
        lookup: &HashMap<ColumnId, usize>,
    ) -> Result<Vec<RecordId>> {
        let entry = &index_entries[spec.context_index];
        let mut key_columns = Vec::with_capacity(entry.column_ids.len());
        for column_id in &entry.column_ids {
            let &pos = lookup.get(column_id).ok_or_else(|| {
                KazeError::InvalidArgument(format!(
                    "index {} references missing column {column_id}",
                    entry.name
                ))
            })?;
            key_columns.push(columns[pos].clone());
        }

        let result = match spec.kind {
            ScanKind::Equality => {
                if spec.equality_values.len() != key_columns.len() {
                    Vec::new()
                } else {
                    let key = rows::encode_index_key(&key_columns, &spec.equality_values)?;
                    handle.tree().scan_equal(&key)?
                }
            }
            ScanKind::Range => {
                let lower = match &spec.lower_value {
                    Some(value) => Some(rows::encode_index_key(
                        &key_columns[..1],
                        std::slice::from_ref(value),
                    )?),
                    None => None,
                };
                let upper = match &spec.upper_value {
                    Some(value) => Some(rows::encode_index_key(
                        &key_columns[..1],
                        std::slice::from_ref(value),
                    )?),
                    None => None,
                };
                handle.tree().scan_range(
                    lower.as_deref(),
                    spec.lower_inclusive,
                    upper.as_deref(),
                    spec.upper_inclusive,
                )?
            }
        };

        log::debug!(
            "index scan via {} yielded {} candidates",
            entry.name,
            result.len()
        );
        if let Some(observer) = &self.observer {
            observer(entry, &result);
        }
        Ok(result)
    }

    // =========================================================================
    // Aggregates
    // =========================================================================

    fn evaluate_aggregate(
        &self,
        call: &AggregateCall,
        resolver: &ExpressionEvaluator,
        rows_in: &[Vec<Value>],
    ) -> Result<Value> {
        let resolve = |operation: &str| -> Result<crate::evaluator::ResolvedColumn> {
            let reference = call.column.as_ref().ok_or_else(|| {
                KazeError::InvalidConstraint(format!("{operation} requires a column reference"))
            })?;
            resolver.resolve_column(reference, CLAUSE_AGGREGATE)
        };

        match call.function {
            AggregateFunction::Count => {
                if call.star {
                    return Ok(Value::BigInt(rows_in.len() as i64));
                }
                let resolved = resolve("COUNT")?;
                let mut seen = HashSet::new();
                let mut count: i64 = 0;
                for row in rows_in {
                    let value = &row[resolved.index];
                    if value.is_null() {
                        continue;
                    }
                    if call.distinct && !seen.insert(rows::value_signature(value)) {
                        continue;
                    }
                    count += 1;
                }
                Ok(Value::BigInt(count))
            }
            AggregateFunction::Sum => {
                let resolved = resolve("SUM")?;
                if !resolved.data_type.is_numeric() {
                    return Err(KazeError::type_error(
                        "SUM",
                        "numeric",
                        resolved.data_type.to_string(),
                    ));
                }
                let mut seen = HashSet::new();
                let mut any = false;
                let mut total = 0f64;
                for row in rows_in {
                    let value = &row[resolved.index];
                    if value.is_null() {
                        continue;
                    }
                    if call.distinct && !seen.insert(rows::value_signature(value)) {
                        continue;
                    }
                    total += value.as_f64().ok_or_else(|| {
                        KazeError::type_error("SUM", "numeric", value.to_string())
                    })?;
                    any = true;
                }
                let float_input = matches!(resolved.data_type, DataType::Float | DataType::Double);
                if !any {
                    return Ok(Value::null(if float_input {
                        DataType::Double
                    } else {
                        DataType::BigInt
                    }));
                }
                if float_input {
                    Ok(Value::Double(total))
                } else {
                    Ok(Value::BigInt(total as i64))
                }
            }
            AggregateFunction::Avg => {
                let resolved = resolve("AVG")?;
                if !resolved.data_type.is_numeric() {
                    return Err(KazeError::type_error(
                        "AVG",
                        "numeric",
                        resolved.data_type.to_string(),
                    ));
                }
                let mut seen = HashSet::new();
                let mut total = 0f64;
                let mut count: i64 = 0;
                for row in rows_in {
                    let value = &row[resolved.index];
                    if value.is_null() {
                        continue;
                    }
                    if call.distinct && !seen.insert(rows::value_signature(value)) {
                        continue;
                    }
                    total += value.as_f64().ok_or_else(|| {
                        KazeError::type_error("AVG", "numeric", value.to_string())
                    })?;
                    count += 1;
                }
                if count == 0 {
                    return Ok(Value::null(DataType::Double));
                }
                Ok(Value::Double(total / count as f64))
            }
            AggregateFunction::Min | AggregateFunction::Max => {
                let is_min = call.function == AggregateFunction::Min;
                let resolved = resolve(if is_min { "MIN" } else { "MAX" })?;
                let mut seen = HashSet::new();
                let mut best: Option<Value> = None;
                for row in rows_in {
                    let value = &row[resolved.index];
                    if value.is_null() {
                        continue;
                    }
                    if call.distinct && !seen.insert(rows::value_signature(value)) {
                        continue;
                    }
                    best = match best {
                        None => Some(value.clone()),
                        Some(current) => {
                            let replace = match compare(value, &current) {
                                CompareResult::Less => is_min,
                                CompareResult::Greater => !is_min,
                                _ => false,
                            };
                            Some(if replace { value.clone() } else { current })
                        }
                    };
                }
                Ok(best.unwrap_or(Value::null(resolved.data_type)))
            }
        }
    }

    // =========================================================================
    // DELETE
    // =========================================================================

    pub fn delete(&self, stmt: &DeleteStatement) -> Result<DeleteResult> {
        let table = self
            .catalog
            .get_table(&stmt.table)?
            .ok_or_else(|| KazeError::table_not_found_in(&stmt.table, CLAUSE_DELETE_TARGET))?;
        let mut index_entries = self.catalog.get_indexes(table.table_id)?;
        let mut handles = self.open_handles(&index_entries)?;
        let columns = self.catalog.get_columns(table.table_id)?;
        let lookup = rows::build_column_lookup(&columns);

        let heap = TableHeap::new(&self.pm, table.root_page_id)?;
        let evaluator = ExpressionEvaluator::from_columns(&columns, &table.name);
        let predicate = stmt.where_clause.as_ref();

        log::debug!(
            "DELETE table={} predicate={}",
            table.name,
            predicate.map(|p| p.to_string()).unwrap_or_else(|| "<none>".to_string())
        );

        let predicate_info = match predicate {
            Some(expr) => self.extract_column_predicates(expr, &columns, &table.name, &None)?,
            None => None,
        };
        if predicate_info.as_ref().is_some_and(|info| info.contradiction) {
            return Ok(DeleteResult { rows_deleted: 0 });
        }

        let mut candidates: Option<Vec<RecordId>> = None;
        if predicate.is_some() && !index_entries.is_empty() {
            if let Some(info) = &predicate_info {
                if let Some(spec) = Self::choose_index_scan(&index_entries, info) {
                    let ids = self.run_index_scan(
                        &spec,
                        &index_entries,
                        &handles[spec.context_index],
                        &columns,
                        &lookup,
                    )?;
                    candidates = Some(ids);
                }
            }
        }

        // Decide first, then mutate: index-driven deletes iterate candidate
        // ids; scans capture each page's rows before the callback runs.
        let mut targets: Vec<(RecordId, Vec<Value>)> = Vec::new();
        match candidates {
            Some(ids) => {
                for rid in ids {
                    let Some(payload) = heap.read(rid)? else {
                        continue;
                    };
                    let values = rows::decode_row_values(&columns, &payload)?;
                    if let Some(expr) = predicate {
                        if !evaluator
                            .evaluate_predicate(expr, &values, CLAUSE_WHERE)?
                            .is_true()
                        {
                            continue;
                        }
                    }
                    targets.push((rid, values));
                }
            }
            None => {
                heap.scan(|rid, payload| {
                    let values = rows::decode_row_values(&columns, payload)?;
                    if let Some(expr) = predicate {
                        if !evaluator
                            .evaluate_predicate(expr, &values, CLAUSE_WHERE)?
                            .is_true()
                        {
                            return Ok(());
                        }
                    }
                    targets.push((rid, values));
                    Ok(())
                })?;
            }
        }

        let mut deleted = 0;
        for (rid, values) in targets {
            if !heap.erase(rid)? {
                continue;
            }
            for i in 0..index_entries.len() {
                let key = self.build_index_key(&index_entries[i], &columns, &values, &lookup)?;
                handles[i].tree_mut().remove(&key, rid)?;
                self.record_index_root(&mut index_entries, &handles, i)?;
            }
            deleted += 1;
        }

        Ok(DeleteResult {
            rows_deleted: deleted,
        })
    }

    // =========================================================================
    // UPDATE
    // =========================================================================

    pub fn update(&self, stmt: &UpdateStatement) -> Result<UpdateResult> {
        if stmt.assignments.is_empty() {
            return Err(KazeError::InvalidConstraint(
                "UPDATE requires at least one assignment".to_string(),
            ));
        }

        let table = self
            .catalog
            .get_table(&stmt.table)?
            .ok_or_else(|| KazeError::table_not_found_in(&stmt.table, CLAUSE_UPDATE_TARGET))?;
        let mut index_entries = self.catalog.get_indexes(table.table_id)?;
        let mut handles = self.open_handles(&index_entries)?;
        let columns = self.catalog.get_columns(table.table_id)?;
        let lookup = rows::build_column_lookup(&columns);

        let column_index: HashMap<&str, usize> = columns
            .iter()
            .enumerate()
            .map(|(i, c)| (c.column.name.as_str(), i))
            .collect();

        let heap = TableHeap::new(&self.pm, table.root_page_id)?;
        let evaluator = ExpressionEvaluator::from_columns(&columns, &table.name);
        let predicate = stmt.where_clause.as_ref();

        log::debug!(
            "UPDATE table={} assignments={} predicate={}",
            table.name,
            stmt.assignments
                .iter()
                .map(|(name, expr)| format!("{name}={expr}"))
                .collect::<Vec<_>>()
                .join(", "),
            predicate.map(|p| p.to_string()).unwrap_or_else(|| "<none>".to_string())
        );

        let predicate_info = match predicate {
            Some(expr) => self.extract_column_predicates(expr, &columns, &table.name, &None)?,
            None => None,
        };
        if predicate_info.as_ref().is_some_and(|info| info.contradiction) {
            return Ok(UpdateResult { rows_updated: 0 });
        }

        let mut candidates: Option<Vec<RecordId>> = None;
        if predicate.is_some() && !index_entries.is_empty() {
            if let Some(info) = &predicate_info {
                if let Some(spec) = Self::choose_index_scan(&index_entries, info) {
                    candidates = Some(self.run_index_scan(
                        &spec,
                        &index_entries,
                        &handles[spec.context_index],
                        &columns,
                        &lookup,
                    )?);
                }
            }
        }

        let mut targets: Vec<(RecordId, Vec<Value>)> = Vec::new();
        let mut collect = |rid: RecordId, values: Vec<Value>| -> Result<()> {
            if let Some(expr) = predicate {
                if !evaluator
                    .evaluate_predicate(expr, &values, CLAUSE_WHERE)?
                    .is_true()
                {
                    return Ok(());
                }
            }
            targets.push((rid, values));
            Ok(())
        };
        match candidates {
            Some(ids) => {
                for rid in ids {
                    let Some(payload) = heap.read(rid)? else {
                        continue;
                    };
                    let values = rows::decode_row_values(&columns, &payload)?;
                    collect(rid, values)?;
                }
            }
            None => {
                heap.scan(|rid, payload| collect(rid, rows::decode_row_values(&columns, payload)?))?;
            }
        }

        let mut updated = 0;
        for (old_rid, current_values) in targets {
            let mut new_values = current_values.clone();
            for (column_name, expr) in &stmt.assignments {
                let &idx = column_index.get(column_name.as_str()).ok_or_else(|| {
                    KazeError::column_not_found_in(column_name.clone(), CLAUSE_UPDATE_SET)
                })?;
                let evaluated = evaluator.evaluate_scalar(expr, &current_values, CLAUSE_UPDATE_SET)?;
                new_values[idx] = rows::coerce_value_for_column(&columns[idx], &evaluated)?;
            }

            let new_payload = rows::encode_values(&columns, &new_values)?;
            let new_rid = heap.update(old_rid, &new_payload)?;

            for i in 0..index_entries.len() {
                let old_key =
                    self.build_index_key(&index_entries[i], &columns, &current_values, &lookup)?;
                let new_key =
                    self.build_index_key(&index_entries[i], &columns, &new_values, &lookup)?;
                if old_rid == new_rid && old_key == new_key {
                    continue;
                }
                handles[i].tree_mut().remove(&old_key, old_rid)?;
                handles[i].tree_mut().insert(&new_key, new_rid)?;
                self.record_index_root(&mut index_entries, &handles, i)?;
            }
            updated += 1;
        }

        Ok(UpdateResult {
            rows_updated: updated,
        })
    }

    // =========================================================================
    // TRUNCATE
    // =========================================================================

    pub fn truncate(&self, stmt: &TruncateStatement) -> Result<()> {
        let table = self
            .catalog
            .get_table(&stmt.table)?
            .ok_or_else(|| KazeError::table_not_found_in(&stmt.table, CLAUSE_TRUNCATE_TARGET))?;
        let heap = TableHeap::new(&self.pm, table.root_page_id)?;
        heap.truncate()
    }
}

fn describe_aggregate(call: &AggregateCall) -> String {
    let mut text = call.function.to_string();
    text.push('(');
    if call.distinct {
        text.push_str("DISTINCT ");
    }
    if call.star {
        text.push('*');
    } else if let Some(column) = &call.column {
        text.push_str(&column.to_string());
    }
    text.push(')');
    text
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_describe_aggregate() {
        assert_eq!(describe_aggregate(&AggregateCall::count_star()), "COUNT(*)");
        let sum = AggregateCall::over(AggregateFunction::Sum, ColumnRef::bare("age"));
        assert_eq!(describe_aggregate(&sum), "SUM(age)");
        let distinct = AggregateCall::over(AggregateFunction::Count, ColumnRef::bare("a")).distinct();
        assert_eq!(describe_aggregate(&distinct), "COUNT(DISTINCT a)");
    }

    #[test]
    fn test_column_predicate_intersection() {
        let mut pred = ColumnPredicate::default();
        assert!(pred.apply_lower(&Value::Integer(10), true));
        assert!(pred.apply_upper(&Value::Integer(20), true));
        assert!(pred.bounds_compatible());

        // Tighter lower bound wins.
        assert!(pred.apply_lower(&Value::Integer(15), false));
        assert_eq!(pred.lower, Some(Value::Integer(15)));
        assert!(!pred.lower_inclusive);

        // Bounds crossing is a contradiction.
        assert!(!pred.apply_lower(&Value::Integer(25), true));
        assert!(pred.contradiction);
    }

    #[test]
    fn test_column_predicate_equality_conflict() {
        let mut pred = ColumnPredicate::default();
        assert!(pred.apply_equality(&Value::Integer(5)));
        assert!(!pred.apply_equality(&Value::Integer(6)));
        assert!(pred.contradiction);
    }

    #[test]
    fn test_equality_folds_into_bounds() {
        let mut pred = ColumnPredicate::default();
        assert!(pred.apply_equality(&Value::Integer(5)));
        assert_eq!(pred.lower, Some(Value::Integer(5)));
        assert_eq!(pred.upper, Some(Value::Integer(5)));
        assert!(pred.lower_inclusive && pred.upper_inclusive);

        // An equality outside an existing range contradicts.
        let mut pred = ColumnPredicate::default();
        assert!(pred.apply_upper(&Value::Integer(3), true));
        assert!(!pred.apply_equality(&Value::Integer(9)));
        assert!(pred.contradiction);
    }
}
