//! Persistent catalog for KazeDB.
//!
//! Tables, columns, and indexes live as serialized entries in three
//! dedicated catalog pages on the same paged substrate as user data.

mod manager;
pub mod schema;

pub use manager::CatalogManager;
pub use schema::{
    ColumnCatalogEntry, ColumnConstraint, ColumnDef, IndexCatalogEntry, TableCatalogEntry,
    TableDef, DROPPED_ORDINAL,
};
