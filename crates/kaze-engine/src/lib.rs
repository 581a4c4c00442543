//! SQL execution engine for KazeDB.
//!
//! This crate provides:
//! - The SQL AST consumed from the external parser
//! - Name binding and three-valued expression evaluation
//! - DDL execution, including online ALTER TABLE via heap migration
//! - DML execution with index-aware plan selection, joins, and aggregates
//! - The `Database` facade tying storage, catalog, and executors together

pub mod ast;
mod database;
mod ddl;
mod dml;
mod evaluator;
mod rows;

pub use database::Database;
pub use ddl::DdlExecutor;
pub use dml::{
    DeleteResult, DmlExecutor, IndexUsageObserver, InsertResult, SelectResult, UpdateResult,
};
pub use evaluator::{BindingEntry, ExpressionEvaluator, ResolvedColumn};
