//! Page-based B+ tree index.
//!
//! Variable-length keys packed from the page tail, fixed-width payloads
//! (record ids in leaves, child page ids in internals) growing forward,
//! leaves doubly linked in key order. Splitting triggers on either the
//! key-count limit or byte overflow; removal never rebalances.

pub mod node;
pub mod tree;

pub use node::{BPlusTreeNode, InternalEntry, LeafEntry, NodeType, NODE_MAGIC};
pub use tree::BPlusTree;
