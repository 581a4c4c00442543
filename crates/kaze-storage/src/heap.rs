//! Table heap: a doubly-linked chain of DATA pages.

use std::cell::Cell;

use kaze_common::config::ALTER_TABLE_IMPLICIT_NULL_FILL;
use kaze_common::page::{Page, PageHeader, PageType};
use kaze_common::types::{is_valid_page, DataType, PageId, RecordId};
use kaze_common::{KazeError, Result};

use crate::page_manager::PageManager;
use crate::record::{self, Field};

/// Row storage for one table.
///
/// The head page id is the table's root; the tail is cached for O(1)
/// append. Row locations are [`RecordId`]s and stay stable until an update
/// grows the row out of its slot or the heap is truncated.
pub struct TableHeap<'a> {
    pm: &'a PageManager,
    root_page_id: PageId,
    tail_page_id: Cell<PageId>,
}

impl<'a> std::fmt::Debug for TableHeap<'a> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TableHeap")
            .field("root_page_id", &self.root_page_id)
            .field("tail_page_id", &self.tail_page_id.get())
            .finish()
    }
}

impl<'a> TableHeap<'a> {
    /// Opens the heap rooted at `root_page_id`.
    pub fn new(pm: &'a PageManager, root_page_id: PageId) -> Result<Self> {
        if !is_valid_page(root_page_id) {
            return Err(KazeError::InvalidArgument(format!(
                "invalid table root {root_page_id}"
            )));
        }
        {
            let guard = pm.fetch(root_page_id)?;
            let header = PageHeader::read(&guard.data()[..])?;
            if header.page_type != PageType::Data {
                return Err(KazeError::InvalidPageType {
                    page_id: root_page_id,
                    found: header.page_type as u8,
                });
            }
        }
        let heap = Self {
            pm,
            root_page_id,
            tail_page_id: Cell::new(root_page_id),
        };
        heap.tail_page_id.set(heap.find_tail(root_page_id)?);
        Ok(heap)
    }

    /// The head page of the chain.
    pub fn root_page_id(&self) -> PageId {
        self.root_page_id
    }

    /// Inserts a row payload, returning its location.
    ///
    /// Tries the cached tail first, then walks forward through pages with
    /// mid-chain slack, and finally appends a fresh page to the chain.
    pub fn insert(&self, payload: &[u8]) -> Result<RecordId> {
        if payload.len() > u16::MAX as usize {
            return Err(KazeError::RecordTooLarge {
                size: payload.len(),
            });
        }

        let mut current = self.tail_page_id.get();
        while is_valid_page(current) {
            let next = {
                let guard = self.pm.fetch(current)?;
                let mut data = guard.data_mut();
                match Page::insert_in_slice(&mut data[..], payload) {
                    Ok(slot) => {
                        drop(data);
                        self.tail_page_id.set(current);
                        return Ok(RecordId::new(current, slot));
                    }
                    Err(KazeError::PageFull { .. }) => Page::next_page_id_in_slice(&data[..]),
                    Err(err) => return Err(err),
                }
            };
            if is_valid_page(next) {
                current = next;
                continue;
            }
            return self.append_new_page(current, payload);
        }
        self.append_new_page(self.root_page_id, payload)
    }

    /// Reads a live row payload, or None for tombstoned/missing locations.
    pub fn read(&self, loc: RecordId) -> Result<Option<Vec<u8>>> {
        let page_id = loc.page_id();
        if !is_valid_page(page_id) || page_id >= self.pm.page_count() {
            return Ok(None);
        }
        let guard = self.pm.fetch(page_id)?;
        let data = guard.data();
        Ok(Page::read_in_slice(&data[..], loc.slot()).map(|p| p.to_vec()))
    }

    /// Replaces a row's payload.
    ///
    /// In place when the new payload fits the old slot; otherwise the row is
    /// erased and re-inserted, and the returned location differs from `loc`.
    pub fn update(&self, loc: RecordId, payload: &[u8]) -> Result<RecordId> {
        if payload.len() > u16::MAX as usize {
            return Err(KazeError::RecordTooLarge {
                size: payload.len(),
            });
        }
        let page_id = loc.page_id();
        if !is_valid_page(page_id) {
            return Err(KazeError::InvalidArgument(format!(
                "update of invalid page {page_id}"
            )));
        }

        let updated = {
            let guard = self.pm.fetch(page_id)?;
            let mut data = guard.data_mut();
            Page::update_in_slice(&mut data[..], loc.slot(), payload)?
        };
        if updated {
            return Ok(loc);
        }

        if !self.erase(loc)? {
            return Err(KazeError::InvalidArgument(format!(
                "update erase failed at {loc}"
            )));
        }
        self.insert(payload)
    }

    /// Tombstones a row. Returns false if it was already gone.
    pub fn erase(&self, loc: RecordId) -> Result<bool> {
        let page_id = loc.page_id();
        if !is_valid_page(page_id) || page_id >= self.pm.page_count() {
            return Ok(false);
        }
        let guard = self.pm.fetch(page_id)?;
        let mut data = guard.data_mut();
        Ok(Page::erase_in_slice(&mut data[..], loc.slot()))
    }

    /// Visits every live row in page-then-slot order.
    ///
    /// Rows of each page are captured before the callback runs, so the
    /// callback may erase or update rows of the page it is visiting.
    pub fn scan<F>(&self, mut f: F) -> Result<()>
    where
        F: FnMut(RecordId, &[u8]) -> Result<()>,
    {
        let mut current = self.root_page_id;
        while is_valid_page(current) {
            let (rows, next) = {
                let guard = self.pm.fetch(current)?;
                let data = guard.data();
                let slot_count = Page::slot_count_in_slice(&data[..]);
                let mut rows = Vec::new();
                for slot in 0..slot_count {
                    if let Some(payload) = Page::read_in_slice(&data[..], slot) {
                        rows.push((RecordId::new(current, slot), payload.to_vec()));
                    }
                }
                (rows, Page::next_page_id_in_slice(&data[..]))
            };
            for (loc, payload) in &rows {
                f(*loc, payload)?;
            }
            current = next;
        }
        Ok(())
    }

    /// Clears the heap: the root page is reinitialized in place, every
    /// subsequent page is freed, and the tail resets to the root. All row
    /// ids are invalidated.
    pub fn truncate(&self) -> Result<()> {
        let next = {
            let guard = self.pm.fetch(self.root_page_id)?;
            let mut data = guard.data_mut();
            let next = Page::next_page_id_in_slice(&data[..]);
            Page::init_in_slice(&mut data[..], self.root_page_id, PageType::Data);
            next
        };

        let mut current = next;
        while is_valid_page(current) {
            let next = {
                let guard = self.pm.fetch(current)?;
                let data = guard.data();
                Page::next_page_id_in_slice(&data[..])
            };
            self.pm.free_page(current)?;
            current = next;
        }
        self.tail_page_id.set(self.root_page_id);
        Ok(())
    }

    fn find_tail(&self, start: PageId) -> Result<PageId> {
        let mut current = start;
        loop {
            let next = {
                let guard = self.pm.fetch(current)?;
                let data = guard.data();
                Page::next_page_id_in_slice(&data[..])
            };
            if !is_valid_page(next) {
                return Ok(current);
            }
            current = next;
        }
    }

    fn append_new_page(&self, previous_tail: PageId, payload: &[u8]) -> Result<RecordId> {
        let new_page_id = self.pm.new_page(PageType::Data)?;

        let slot = {
            let guard = self.pm.fetch(new_page_id)?;
            let mut data = guard.data_mut();
            Page::set_prev_page_id_in_slice(&mut data[..], previous_tail);
            match Page::insert_in_slice(&mut data[..], payload) {
                Ok(slot) => slot,
                Err(err) => {
                    drop(data);
                    drop(guard);
                    self.pm.free_page(new_page_id)?;
                    if matches!(err, KazeError::PageFull { .. }) {
                        return Err(KazeError::RecordTooLarge {
                            size: payload.len(),
                        });
                    }
                    return Err(err);
                }
            }
        };

        {
            let guard = self.pm.fetch(previous_tail)?;
            let mut data = guard.data_mut();
            Page::set_next_page_id_in_slice(&mut data[..], new_page_id);
        }

        self.tail_page_id.set(new_page_id);
        Ok(RecordId::new(new_page_id, slot))
    }
}

/// One output column of a heap rewrite.
#[derive(Debug, Clone)]
pub struct MigrationColumn {
    pub name: String,
    pub data_type: DataType,
    pub not_null: bool,
    /// Field index of this column in the source rows; None for new columns.
    pub source_index: Option<usize>,
    /// Backfill for rows that predate the column.
    pub default: Option<Field>,
}

/// Out-of-place heap rewrite under a new column ordering.
pub struct HeapMigration;

impl HeapMigration {
    /// Streams every live row of `source_root` into a fresh chain laid out
    /// per `columns`, and returns the new root.
    ///
    /// Missing columns are filled from their default, else NULL when the
    /// column is nullable and implicit NULL fill is enabled. The source
    /// chain is left intact; the caller frees it after the catalog has
    /// moved to the new root.
    pub fn rewrite(
        pm: &PageManager,
        source_root: PageId,
        old_field_count: usize,
        columns: &[MigrationColumn],
    ) -> Result<PageId> {
        let new_root = pm.new_page(PageType::Data)?;
        let source = TableHeap::new(pm, source_root)?;
        let dest = TableHeap::new(pm, new_root)?;

        source.scan(|_, payload| {
            let decoded = record::decode(payload)?;
            if decoded.len() != old_field_count {
                return Err(KazeError::InvalidRecordFormat(format!(
                    "row has {} fields, schema has {old_field_count}",
                    decoded.len()
                )));
            }

            let mut fields = Vec::with_capacity(columns.len());
            for column in columns {
                if let Some(idx) = column.source_index {
                    fields.push(decoded[idx].clone());
                    continue;
                }
                if let Some(default) = &column.default {
                    fields.push(default.clone());
                    continue;
                }
                if column.not_null {
                    return Err(KazeError::InvalidConstraint(format!(
                        "column '{}' requires DEFAULT value for existing rows",
                        column.name
                    )));
                }
                if !ALTER_TABLE_IMPLICIT_NULL_FILL {
                    return Err(KazeError::InvalidConstraint(
                        "ALTER TABLE ADD COLUMN requires DEFAULT value for existing rows"
                            .to_string(),
                    ));
                }
                fields.push(Field::null(column.data_type));
            }

            dest.insert(&record::encode(&fields))?;
            Ok(())
        })?;

        Ok(new_root)
    }

    /// Frees an entire heap chain, root page included.
    pub fn free_chain(pm: &PageManager, root_page_id: PageId) -> Result<()> {
        let mut current = root_page_id;
        while is_valid_page(current) {
            let next = {
                let guard = pm.fetch(current)?;
                let data = guard.data();
                Page::next_page_id_in_slice(&data[..])
            };
            pm.free_page(current)?;
            current = next;
        }
        Ok(())
    }
}

// Convenience used by tests and executors alike.
impl TableHeap<'_> {
    /// Counts live rows.
    pub fn row_count(&self) -> Result<usize> {
        let mut count = 0;
        self.scan(|_, _| {
            count += 1;
            Ok(())
        })?;
        Ok(count)
    }
}
