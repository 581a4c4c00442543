//! B+ tree over the paged substrate.
//!
//! Keys are opaque byte strings compared lexicographically; callers encode
//! typed keys through the record codec so the tree stays type-agnostic.
//! Values are heap record ids. Leaves are doubly linked in key order.
//! Removal deliberately performs no rebalancing; nodes may go sparse.

use std::cmp::Ordering;
use std::sync::Arc;

use bytes::Bytes;

use kaze_common::config::MAX_KEY_LENGTH;
use kaze_common::page::PageType;
use kaze_common::types::{is_valid_page, PageId, RecordId, INVALID_PAGE_ID};
use kaze_common::{KazeError, Result};

use crate::btree::node::{BPlusTreeNode, InternalEntry, LeafEntry};
use crate::page_manager::PageManager;

#[inline]
fn compare_keys(a: &[u8], b: &[u8]) -> Ordering {
    a.cmp(b)
}

/// A duplicate-aware B+ tree rooted in one page of an index file.
///
/// The root page id changes when the root splits; callers persist the
/// current value via [`BPlusTree::root_page_id`] after every mutation.
pub struct BPlusTree {
    pm: Arc<PageManager>,
    root_page_id: PageId,
    unique: bool,
}

impl BPlusTree {
    /// Opens the tree rooted at `root_page_id`, allocating an empty leaf
    /// root when the id is invalid.
    pub fn new(pm: Arc<PageManager>, root_page_id: PageId, unique: bool) -> Result<Self> {
        let mut tree = Self {
            pm,
            root_page_id,
            unique,
        };
        if !is_valid_page(tree.root_page_id) {
            let page_id = tree.pm.new_page(PageType::Index)?;
            let root = BPlusTreeNode::make_leaf(page_id);
            tree.store_node(&root)?;
            tree.root_page_id = page_id;
        }
        Ok(tree)
    }

    /// Current root page id.
    pub fn root_page_id(&self) -> PageId {
        self.root_page_id
    }

    /// True when the tree rejects duplicate keys.
    pub fn is_unique(&self) -> bool {
        self.unique
    }

    /// Point lookup; returns the value stored at an exactly-equal key.
    pub fn search(&self, key: &[u8]) -> Result<Option<RecordId>> {
        let mut current = self.root_page_id;
        loop {
            let node = self.load_node(current)?;
            if node.is_leaf() {
                let idx = Self::find_leaf_index(&node, key);
                if idx < node.leaf_entries.len()
                    && compare_keys(&node.leaf_entries[idx].key, key) == Ordering::Equal
                {
                    return Ok(Some(node.leaf_entries[idx].value));
                }
                return Ok(None);
            }
            let child_index = Self::find_internal_child(&node, key);
            current = node.children[child_index];
        }
    }

    /// Inserts a key/value pair.
    ///
    /// On an exactly-equal key a unique tree fails with `DUPLICATE_KEY`;
    /// a non-unique tree replaces the value stored at that key position.
    pub fn insert(&mut self, key: &[u8], value: RecordId) -> Result<()> {
        if key.len() > MAX_KEY_LENGTH {
            return Err(KazeError::RecordTooLarge { size: key.len() });
        }
        let key = Bytes::copy_from_slice(key);
        let promoted = self.insert_recursive(self.root_page_id, &key, value)?;

        if let Some((promoted_key, new_child)) = promoted {
            let new_root_page = self.pm.new_page(PageType::Index)?;
            let mut new_root = BPlusTreeNode::make_internal(new_root_page);
            new_root.children.push(self.root_page_id);
            new_root.children.push(new_child);
            new_root.internal_entries.push(InternalEntry {
                key: promoted_key,
                child: new_child,
            });

            let mut left = self.load_node(self.root_page_id)?;
            left.parent = new_root_page;
            self.store_node(&left)?;

            let mut right = self.load_node(new_child)?;
            right.parent = new_root_page;
            self.store_node(&right)?;

            self.store_node(&new_root)?;
            self.root_page_id = new_root_page;
        }
        Ok(())
    }

    /// Removes the leaf entry whose key equals `key` and whose value is
    /// `value`. Missing entries are a no-op; no rebalancing is performed.
    pub fn remove(&mut self, key: &[u8], value: RecordId) -> Result<()> {
        let mut current = self.root_page_id;
        loop {
            let mut node = self.load_node(current)?;
            if node.is_leaf() {
                let mut idx = Self::find_leaf_index(&node, key);
                while idx < node.leaf_entries.len()
                    && compare_keys(&node.leaf_entries[idx].key, key) == Ordering::Equal
                {
                    if node.leaf_entries[idx].value == value {
                        node.leaf_entries.remove(idx);
                        self.store_node(&node)?;
                        return Ok(());
                    }
                    idx += 1;
                }
                return Ok(());
            }
            let child_index = Self::find_internal_child(&node, key);
            current = node.children[child_index];
        }
    }

    /// All values stored at exactly this key.
    pub fn scan_equal(&self, key: &[u8]) -> Result<Vec<RecordId>> {
        self.scan_range(Some(key), true, Some(key), true)
    }

    /// Ordered range scan over the sibling-linked leaves.
    pub fn scan_range(
        &self,
        lower: Option<&[u8]>,
        lower_inclusive: bool,
        upper: Option<&[u8]>,
        upper_inclusive: bool,
    ) -> Result<Vec<RecordId>> {
        let mut results = Vec::new();

        let (mut current, mut start_index) = match lower {
            Some(lower_key) => self.find_leaf_position(lower_key)?,
            None => (self.find_leftmost_leaf()?, 0),
        };

        while is_valid_page(current) {
            let node = self.load_node(current)?;
            if start_index >= node.leaf_entries.len() {
                current = node.next_leaf;
                start_index = 0;
                continue;
            }

            for entry in &node.leaf_entries[start_index..] {
                if let Some(lower_key) = lower {
                    match compare_keys(&entry.key, lower_key) {
                        Ordering::Less => continue,
                        Ordering::Equal if !lower_inclusive => continue,
                        _ => {}
                    }
                }
                if let Some(upper_key) = upper {
                    match compare_keys(&entry.key, upper_key) {
                        Ordering::Greater => return Ok(results),
                        Ordering::Equal if !upper_inclusive => return Ok(results),
                        _ => {}
                    }
                }
                results.push(entry.value);
            }

            current = node.next_leaf;
            start_index = 0;
        }

        Ok(results)
    }

    fn load_node(&self, page_id: PageId) -> Result<BPlusTreeNode> {
        let guard = self.pm.fetch(page_id)?;
        let data = guard.data();
        BPlusTreeNode::deserialize(&data[..])
    }

    fn store_node(&self, node: &BPlusTreeNode) -> Result<()> {
        let guard = self.pm.fetch(node.page_id())?;
        let mut data = guard.data_mut();
        node.serialize(&mut data[..])
    }

    /// Index of the first leaf entry whose key is >= `key`.
    fn find_leaf_index(leaf: &BPlusTreeNode, key: &[u8]) -> usize {
        leaf.leaf_entries
            .partition_point(|entry| compare_keys(&entry.key, key) == Ordering::Less)
    }

    /// Child slot to descend into: the child left of the first separator
    /// strictly greater than `key`.
    fn find_internal_child(node: &BPlusTreeNode, key: &[u8]) -> usize {
        node.internal_entries
            .partition_point(|entry| compare_keys(&entry.key, key) != Ordering::Greater)
    }

    fn find_leaf_position(&self, key: &[u8]) -> Result<(PageId, usize)> {
        let mut current = self.root_page_id;
        loop {
            let node = self.load_node(current)?;
            if node.is_leaf() {
                return Ok((current, Self::find_leaf_index(&node, key)));
            }
            current = node.children[Self::find_internal_child(&node, key)];
        }
    }

    fn find_leftmost_leaf(&self) -> Result<PageId> {
        let mut current = self.root_page_id;
        loop {
            let node = self.load_node(current)?;
            if node.is_leaf() {
                return Ok(current);
            }
            if node.children.is_empty() {
                return Ok(INVALID_PAGE_ID);
            }
            current = node.children[0];
        }
    }

    fn insert_recursive(
        &mut self,
        page_id: PageId,
        key: &Bytes,
        value: RecordId,
    ) -> Result<Option<(Bytes, PageId)>> {
        let mut node = self.load_node(page_id)?;

        if node.is_leaf() {
            let idx = Self::find_leaf_index(&node, key);
            if idx < node.leaf_entries.len()
                && compare_keys(&node.leaf_entries[idx].key, key) == Ordering::Equal
            {
                if self.unique {
                    return Err(KazeError::DuplicateKey(String::new()));
                }
                node.leaf_entries[idx].value = value;
                self.store_node(&node)?;
                return Ok(None);
            }
            node.leaf_entries.insert(
                idx,
                LeafEntry {
                    key: key.clone(),
                    value,
                },
            );

            if !node.requires_split() {
                self.store_node(&node)?;
                return Ok(None);
            }

            let new_page = self.pm.new_page(PageType::Index)?;
            let mut new_leaf = BPlusTreeNode::make_leaf(new_page);
            new_leaf.parent = node.parent;
            let promoted = Self::split_leaf(&mut node, &mut new_leaf);

            new_leaf.next_leaf = node.next_leaf;
            new_leaf.prev_leaf = node.page_id();
            node.next_leaf = new_page;
            if is_valid_page(new_leaf.next_leaf) {
                let mut right_neighbor = self.load_node(new_leaf.next_leaf)?;
                right_neighbor.prev_leaf = new_page;
                self.store_node(&right_neighbor)?;
            }

            self.store_node(&node)?;
            self.store_node(&new_leaf)?;
            return Ok(Some((promoted, new_page)));
        }

        let child_index = Self::find_internal_child(&node, key);
        let child_page = node.children[child_index];
        let promoted = self.insert_recursive(child_page, key, value)?;
        let Some((promoted_key, promoted_child)) = promoted else {
            return Ok(None);
        };

        node.internal_entries.insert(
            child_index,
            InternalEntry {
                key: promoted_key,
                child: promoted_child,
            },
        );
        node.children.insert(child_index + 1, promoted_child);

        if !node.requires_split() {
            self.store_node(&node)?;
            return Ok(None);
        }

        let new_page = self.pm.new_page(PageType::Index)?;
        let mut new_internal = BPlusTreeNode::make_internal(new_page);
        new_internal.parent = node.parent;
        let promoted = Self::split_internal(&mut node, &mut new_internal);

        for &child in &new_internal.children {
            let mut child_node = self.load_node(child)?;
            child_node.parent = new_page;
            self.store_node(&child_node)?;
        }

        self.store_node(&node)?;
        self.store_node(&new_internal)?;
        Ok(Some((promoted, new_page)))
    }

    /// Splits a leaf at the midpoint; the first key of the right half is
    /// copied up as the separator.
    fn split_leaf(node: &mut BPlusTreeNode, new_node: &mut BPlusTreeNode) -> Bytes {
        let split_point = node.leaf_entries.len() / 2;
        new_node.leaf_entries = node.leaf_entries.split_off(split_point);
        new_node.leaf_entries[0].key.clone()
    }

    /// Splits an internal node at the midpoint; the separator is lifted
    /// (removed from both halves) and `split_point + 1` children stay left.
    fn split_internal(node: &mut BPlusTreeNode, new_node: &mut BPlusTreeNode) -> Bytes {
        let split_point = node.internal_entries.len() / 2;
        let mut right_entries = node.internal_entries.split_off(split_point);
        let pivot = right_entries.remove(0);
        new_node.internal_entries = right_entries;
        new_node.children = node.children.split_off(split_point + 1);

        for (i, entry) in new_node.internal_entries.iter_mut().enumerate() {
            entry.child = new_node.children[i + 1];
        }
        pivot.key
    }
}
