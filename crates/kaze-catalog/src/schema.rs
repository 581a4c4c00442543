//! Catalog entry types and their on-page serialization.
//!
//! Entries are stored as slotted records in the three catalog pages.
//! The codecs are little-endian with `u16`-length-prefixed strings.

use kaze_common::types::{ColumnId, DataType, IndexId, PageId, TableId, INVALID_PAGE_ID};
use kaze_common::{KazeError, Result};

/// Ordinal position assigned to dropped columns.
pub const DROPPED_ORDINAL: u32 = u32::MAX;

/// Column constraints as declared in DDL.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ColumnConstraint {
    pub not_null: bool,
    pub primary_key: bool,
    pub unique: bool,
    /// DEFAULT literal text, if declared.
    pub default_literal: Option<String>,
}

/// A column definition.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnDef {
    /// Column id, unique within the table and never reused.
    pub id: ColumnId,
    pub name: String,
    pub data_type: DataType,
    /// Declared length for VARCHAR(n); 0 otherwise.
    pub length: u32,
    pub constraint: ColumnConstraint,
}

/// A table definition handed to the catalog at CREATE TABLE.
#[derive(Debug, Clone)]
pub struct TableDef {
    pub name: String,
    pub columns: Vec<ColumnDef>,
    pub schema_version: u32,
    pub next_column_id: ColumnId,
}

/// A persisted table.
#[derive(Debug, Clone, PartialEq)]
pub struct TableCatalogEntry {
    pub table_id: TableId,
    pub name: String,
    /// Head of the table's heap chain.
    pub root_page_id: PageId,
    /// Incremented by one on every column add or drop.
    pub schema_version: u32,
    /// Strictly exceeds every column id ever assigned in this table.
    pub next_column_id: ColumnId,
    /// The original CREATE TABLE text, kept for introspection.
    pub create_sql: String,
}

/// A persisted column.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnCatalogEntry {
    pub table_id: TableId,
    pub column_id: ColumnId,
    /// 0-based position among the table's active columns;
    /// [`DROPPED_ORDINAL`] once dropped.
    pub ordinal_position: u32,
    pub schema_version: u32,
    pub is_dropped: bool,
    pub column: ColumnDef,
}

/// A persisted index.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexCatalogEntry {
    pub index_id: IndexId,
    pub table_id: TableId,
    /// Globally unique across the database.
    pub name: String,
    pub is_unique: bool,
    pub is_primary: bool,
    /// Ordered key columns, by column id.
    pub column_ids: Vec<ColumnId>,
    pub root_page_id: PageId,
    pub create_sql: String,
}

impl IndexCatalogEntry {
    /// A fresh entry with no physical tree yet.
    pub fn new(
        table_id: TableId,
        name: impl Into<String>,
        column_ids: Vec<ColumnId>,
        is_unique: bool,
        is_primary: bool,
        create_sql: impl Into<String>,
    ) -> Self {
        Self {
            index_id: 0,
            table_id,
            name: name.into(),
            is_unique,
            is_primary,
            column_ids,
            root_page_id: INVALID_PAGE_ID,
            create_sql: create_sql.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// Serialization
// ---------------------------------------------------------------------------

struct Writer(Vec<u8>);

impl Writer {
    fn new() -> Self {
        Self(Vec::with_capacity(64))
    }
    fn u8(&mut self, v: u8) {
        self.0.push(v);
    }
    fn bool(&mut self, v: bool) {
        self.0.push(v as u8);
    }
    fn u32(&mut self, v: u32) {
        self.0.extend_from_slice(&v.to_le_bytes());
    }
    fn i64(&mut self, v: i64) {
        self.0.extend_from_slice(&v.to_le_bytes());
    }
    fn string(&mut self, v: &str) {
        self.0.extend_from_slice(&(v.len() as u16).to_le_bytes());
        self.0.extend_from_slice(v.as_bytes());
    }
}

struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.buf.len() < self.pos + n {
            return Err(KazeError::InvalidRecordFormat(
                "truncated catalog entry".to_string(),
            ));
        }
        let out = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    fn u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }
    fn bool(&mut self) -> Result<bool> {
        Ok(self.u8()? != 0)
    }
    fn u16(&mut self) -> Result<u16> {
        Ok(u16::from_le_bytes(self.take(2)?.try_into().expect("len")))
    }
    fn u32(&mut self) -> Result<u32> {
        Ok(u32::from_le_bytes(self.take(4)?.try_into().expect("len")))
    }
    fn i64(&mut self) -> Result<i64> {
        Ok(i64::from_le_bytes(self.take(8)?.try_into().expect("len")))
    }
    fn string(&mut self) -> Result<String> {
        let len = self.u16()? as usize;
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec())
            .map_err(|_| KazeError::InvalidRecordFormat("catalog string not UTF-8".to_string()))
    }
    fn data_type(&mut self) -> Result<DataType> {
        let tag = self.u8()?;
        DataType::from_tag(tag).ok_or_else(|| {
            KazeError::InvalidRecordFormat(format!("unknown data type tag {tag} in catalog"))
        })
    }
}

fn write_column_def(w: &mut Writer, def: &ColumnDef) {
    w.u32(def.id);
    w.string(&def.name);
    w.u8(def.data_type as u8);
    w.u32(def.length);
    w.bool(def.constraint.not_null);
    w.bool(def.constraint.primary_key);
    w.bool(def.constraint.unique);
    match &def.constraint.default_literal {
        Some(text) => {
            w.bool(true);
            w.string(text);
        }
        None => w.bool(false),
    }
}

fn read_column_def(r: &mut Reader<'_>) -> Result<ColumnDef> {
    let id = r.u32()?;
    let name = r.string()?;
    let data_type = r.data_type()?;
    let length = r.u32()?;
    let not_null = r.bool()?;
    let primary_key = r.bool()?;
    let unique = r.bool()?;
    let default_literal = if r.bool()? { Some(r.string()?) } else { None };
    Ok(ColumnDef {
        id,
        name,
        data_type,
        length,
        constraint: ColumnConstraint {
            not_null,
            primary_key,
            unique,
            default_literal,
        },
    })
}

impl TableCatalogEntry {
    pub fn serialize(&self) -> Vec<u8> {
        let mut w = Writer::new();
        w.u32(self.table_id);
        w.string(&self.name);
        w.i64(self.root_page_id);
        w.u32(self.schema_version);
        w.u32(self.next_column_id);
        w.string(&self.create_sql);
        w.0
    }

    pub fn deserialize(buf: &[u8]) -> Result<Self> {
        let mut r = Reader::new(buf);
        Ok(Self {
            table_id: r.u32()?,
            name: r.string()?,
            root_page_id: r.i64()?,
            schema_version: r.u32()?,
            next_column_id: r.u32()?,
            create_sql: r.string()?,
        })
    }
}

impl ColumnCatalogEntry {
    pub fn serialize(&self) -> Vec<u8> {
        let mut w = Writer::new();
        w.u32(self.table_id);
        w.u32(self.column_id);
        w.u32(self.ordinal_position);
        w.u32(self.schema_version);
        w.bool(self.is_dropped);
        write_column_def(&mut w, &self.column);
        w.0
    }

    pub fn deserialize(buf: &[u8]) -> Result<Self> {
        let mut r = Reader::new(buf);
        Ok(Self {
            table_id: r.u32()?,
            column_id: r.u32()?,
            ordinal_position: r.u32()?,
            schema_version: r.u32()?,
            is_dropped: r.bool()?,
            column: read_column_def(&mut r)?,
        })
    }
}

impl IndexCatalogEntry {
    pub fn serialize(&self) -> Vec<u8> {
        let mut w = Writer::new();
        w.u32(self.index_id);
        w.u32(self.table_id);
        w.string(&self.name);
        w.bool(self.is_unique);
        w.bool(self.is_primary);
        w.u32(self.column_ids.len() as u32);
        for &id in &self.column_ids {
            w.u32(id);
        }
        w.i64(self.root_page_id);
        w.string(&self.create_sql);
        w.0
    }

    pub fn deserialize(buf: &[u8]) -> Result<Self> {
        let mut r = Reader::new(buf);
        let index_id = r.u32()?;
        let table_id = r.u32()?;
        let name = r.string()?;
        let is_unique = r.bool()?;
        let is_primary = r.bool()?;
        let count = r.u32()? as usize;
        let mut column_ids = Vec::with_capacity(count);
        for _ in 0..count {
            column_ids.push(r.u32()?);
        }
        Ok(Self {
            index_id,
            table_id,
            name,
            is_unique,
            is_primary,
            column_ids,
            root_page_id: r.i64()?,
            create_sql: r.string()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_column(id: ColumnId, name: &str) -> ColumnDef {
        ColumnDef {
            id,
            name: name.to_string(),
            data_type: DataType::Varchar,
            length: 32,
            constraint: ColumnConstraint {
                not_null: true,
                primary_key: false,
                unique: false,
                default_literal: Some("unnamed".to_string()),
            },
        }
    }

    #[test]
    fn test_table_entry_roundtrip() {
        let entry = TableCatalogEntry {
            table_id: 3,
            name: "users".to_string(),
            root_page_id: 42,
            schema_version: 5,
            next_column_id: 9,
            create_sql: "CREATE TABLE users(id INTEGER)".to_string(),
        };
        let decoded = TableCatalogEntry::deserialize(&entry.serialize()).unwrap();
        assert_eq!(decoded, entry);
    }

    #[test]
    fn test_column_entry_roundtrip() {
        let entry = ColumnCatalogEntry {
            table_id: 3,
            column_id: 7,
            ordinal_position: 2,
            schema_version: 4,
            is_dropped: false,
            column: sample_column(7, "nickname"),
        };
        let decoded = ColumnCatalogEntry::deserialize(&entry.serialize()).unwrap();
        assert_eq!(decoded, entry);
    }

    #[test]
    fn test_dropped_column_roundtrip() {
        let mut entry = ColumnCatalogEntry {
            table_id: 1,
            column_id: 2,
            ordinal_position: DROPPED_ORDINAL,
            schema_version: 9,
            is_dropped: true,
            column: sample_column(2, "gone"),
        };
        entry.column.constraint.default_literal = None;
        let decoded = ColumnCatalogEntry::deserialize(&entry.serialize()).unwrap();
        assert_eq!(decoded, entry);
        assert_eq!(decoded.ordinal_position, DROPPED_ORDINAL);
    }

    #[test]
    fn test_index_entry_roundtrip() {
        let entry = IndexCatalogEntry {
            index_id: 11,
            table_id: 3,
            name: "idx_users_email".to_string(),
            is_unique: true,
            is_primary: false,
            column_ids: vec![4, 2],
            root_page_id: 17,
            create_sql: "CREATE UNIQUE INDEX idx_users_email ON users(email)".to_string(),
        };
        let decoded = IndexCatalogEntry::deserialize(&entry.serialize()).unwrap();
        assert_eq!(decoded, entry);
    }

    #[test]
    fn test_truncated_entry_fails() {
        let entry = TableCatalogEntry {
            table_id: 1,
            name: "t".to_string(),
            root_page_id: 2,
            schema_version: 1,
            next_column_id: 2,
            create_sql: String::new(),
        };
        let bytes = entry.serialize();
        assert!(TableCatalogEntry::deserialize(&bytes[..bytes.len() - 1]).is_err());
        assert!(ColumnCatalogEntry::deserialize(&[1, 2, 3]).is_err());
        assert!(IndexCatalogEntry::deserialize(&[]).is_err());
    }
}
