//! Core identifier and data-type definitions for KazeDB.

use serde::{Deserialize, Serialize};

/// Page identifier within a single database or index file.
///
/// Page 0 is reserved and never handed out; page 1 is the metadata page;
/// pages 2 and above hold data, index nodes, or free-list entries.
pub type PageId = i64;

/// Sentinel for "no page".
pub const INVALID_PAGE_ID: PageId = 0;

/// The per-file metadata page.
pub const META_PAGE_ID: PageId = 1;

/// First allocatable page id.
pub const FIRST_PAGE_ID: PageId = 2;

/// Returns true if `id` names an allocatable page.
#[inline]
pub fn is_valid_page(id: PageId) -> bool {
    id >= FIRST_PAGE_ID
}

/// Table identifier, allocated monotonically from the metadata page.
pub type TableId = u32;

/// Column identifier, unique within a table and never reused.
pub type ColumnId = u32;

/// Index identifier, allocated monotonically from the metadata page.
pub type IndexId = u32;

/// Slot index within a page's directory.
pub type SlotId = u16;

/// Stable row locator: page id in the high 32 bits, slot id in the low 32.
///
/// A record id stays valid until the row is physically relocated by an
/// update that grows it, or the heap is truncated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RecordId(u64);

impl RecordId {
    /// Builds a record id from a page id and slot.
    pub fn new(page_id: PageId, slot: SlotId) -> Self {
        Self(((page_id as u64) << 32) | slot as u64)
    }

    /// Reconstructs a record id from its packed form.
    pub fn from_u64(raw: u64) -> Self {
        Self(raw)
    }

    /// Returns the packed 64-bit form.
    pub fn as_u64(&self) -> u64 {
        self.0
    }

    /// Returns the page holding the row.
    pub fn page_id(&self) -> PageId {
        (self.0 >> 32) as PageId
    }

    /// Returns the slot within the page.
    pub fn slot(&self) -> SlotId {
        (self.0 & 0xFFFF_FFFF) as SlotId
    }
}

impl std::fmt::Display for RecordId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.page_id(), self.slot())
    }
}

/// Identifier for all supported data types.
///
/// The discriminants double as the on-disk type tags written by the
/// record codec, so they must never be renumbered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum DataType {
    Null = 0,
    Boolean = 1,
    Integer = 2,
    BigInt = 3,
    Float = 4,
    Double = 5,
    Date = 6,
    Timestamp = 7,
    Varchar = 8,
    Text = 9,
}

impl DataType {
    /// Decodes an on-disk type tag.
    pub fn from_tag(tag: u8) -> Option<DataType> {
        match tag {
            0 => Some(DataType::Null),
            1 => Some(DataType::Boolean),
            2 => Some(DataType::Integer),
            3 => Some(DataType::BigInt),
            4 => Some(DataType::Float),
            5 => Some(DataType::Double),
            6 => Some(DataType::Date),
            7 => Some(DataType::Timestamp),
            8 => Some(DataType::Varchar),
            9 => Some(DataType::Text),
            _ => None,
        }
    }

    /// Returns the fixed payload width in bytes, or None for strings.
    pub fn fixed_size(&self) -> Option<usize> {
        match self {
            DataType::Null => Some(0),
            DataType::Boolean => Some(1),
            DataType::Integer | DataType::Float => Some(4),
            DataType::BigInt | DataType::Double | DataType::Date | DataType::Timestamp => Some(8),
            DataType::Varchar | DataType::Text => None,
        }
    }

    /// Returns true if this type participates in numeric comparison.
    pub fn is_numeric(&self) -> bool {
        matches!(
            self,
            DataType::Integer | DataType::BigInt | DataType::Float | DataType::Double
        )
    }

    /// Returns true if this type is stored as an integer payload.
    pub fn is_integer(&self) -> bool {
        matches!(
            self,
            DataType::Integer | DataType::BigInt | DataType::Date | DataType::Timestamp
        )
    }

    /// Returns true if this type is a string type.
    pub fn is_string(&self) -> bool {
        matches!(self, DataType::Varchar | DataType::Text)
    }

    /// Returns true if this type is a temporal type.
    pub fn is_temporal(&self) -> bool {
        matches!(self, DataType::Date | DataType::Timestamp)
    }
}

impl std::fmt::Display for DataType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            DataType::Null => "NULL",
            DataType::Boolean => "BOOLEAN",
            DataType::Integer => "INTEGER",
            DataType::BigInt => "BIGINT",
            DataType::Float => "FLOAT",
            DataType::Double => "DOUBLE",
            DataType::Date => "DATE",
            DataType::Timestamp => "TIMESTAMP",
            DataType::Varchar => "VARCHAR",
            DataType::Text => "TEXT",
        };
        write!(f, "{}", name)
    }
}
