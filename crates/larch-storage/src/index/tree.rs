//! Disk-resident B+ tree.
//!
//! The tree operates entirely through page-id indirection: every
//! traversal step fetches a node from the index file by id, and every
//! structural mutation re-encodes the touched nodes and writes them
//! back. Nodes are short-lived stack values; nothing is cached between
//! operations.
//!
//! Structural rules:
//! - leaf splits happen once a leaf reaches `order` pairs, at the
//!   midpoint; the right leaf's first key is promoted
//! - internal splits promote the key at `(order - 1) / 2`
//! - a non-root node underflows below `(order - 1) / 2` keys; repair
//!   prefers borrowing from the left sibling, then the right, then
//!   merging (left first)

use crate::index::file::{IndexFile, IndexFileConfig};
use crate::index::node::{InternalNode, LeafNode, LeafPair, Node};
use larch_common::error::{LarchError, Result};
use larch_common::page::PageId;
use larch_common::types::{Key, Value};
use std::cmp::Ordering;
use std::collections::VecDeque;
use std::path::Path;
use tracing::{debug, trace};

/// Result of a child split propagating into its parent.
struct Promotion {
    key: Key,
    right: PageId,
}

/// A persistent B+ tree backed by a single index file.
pub struct DiskTree {
    file: IndexFile,
    order: u32,
}

impl DiskTree {
    /// Creates a new tree, truncating any existing file at `path`.
    pub fn create(path: impl AsRef<Path>, order: u32) -> Result<Self> {
        Self::create_with(path, order, IndexFileConfig::default())
    }

    /// Creates a new tree with an explicit index file configuration.
    pub fn create_with(
        path: impl AsRef<Path>,
        order: u32,
        config: IndexFileConfig,
    ) -> Result<Self> {
        let file = IndexFile::create_with(path, order, config)?;
        Ok(Self { file, order })
    }

    /// Opens an existing tree.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::open_with(path, IndexFileConfig::default())
    }

    /// Opens an existing tree with an explicit index file configuration.
    pub fn open_with(path: impl AsRef<Path>, config: IndexFileConfig) -> Result<Self> {
        let file = IndexFile::open_with(path, config)?;
        let order = file.order();
        Ok(Self { file, order })
    }

    /// Persists the header and closes the tree.
    pub fn close(self) -> Result<()> {
        self.file.close()
    }

    /// Returns the tree order.
    pub fn order(&self) -> u32 {
        self.order
    }

    /// Returns the root page id (`PageId::NONE` for an empty tree).
    pub fn root(&self) -> PageId {
        self.file.root()
    }

    /// Returns the underlying index file.
    pub fn index(&self) -> &IndexFile {
        &self.file
    }

    /// Inserts a key/value pair.
    ///
    /// Fails with `DuplicateKey` if the key is already present; the tree
    /// is not modified in that case.
    pub fn insert(&self, key: Key, value: Value) -> Result<()> {
        let root_id = self.file.root();

        if root_id.is_none() {
            let leaf = LeafNode {
                pairs: vec![LeafPair::new(key, value)],
                next: PageId::NONE,
                prev: PageId::NONE,
            };
            let page_id = self.file.allocate_page()?;
            self.file.write_node(&Node::Leaf(leaf), page_id)?;
            return self.file.set_root(page_id);
        }

        let root = self.file.read_node(root_id)?;
        if let Some(promo) = self.insert_recursive(key, value, root, root_id)? {
            let new_root = InternalNode {
                keys: vec![promo.key],
                children: vec![root_id, promo.right],
            };
            let new_root_id = self.file.allocate_page()?;
            self.file.write_node(&Node::Internal(new_root), new_root_id)?;
            self.file.set_root(new_root_id)?;
        }
        Ok(())
    }

    /// Looks up the value stored under `key`.
    pub fn search(&self, key: &Key) -> Result<Value> {
        let mut page_id = self.file.root();
        if page_id.is_none() {
            return Err(LarchError::TreeEmpty);
        }

        loop {
            match self.file.read_node(page_id)? {
                Node::Internal(interm) => {
                    let idx = upper_bound(&interm.keys, key);
                    page_id = *interm
                        .children
                        .get(idx)
                        .ok_or_else(|| child_index_error(idx))?;
                }
                Node::Leaf(leaf) => {
                    return match find_exact(&leaf.pairs, key) {
                        Some(idx) => Ok(leaf.pairs[idx].value.clone()),
                        None => Err(LarchError::KeyNotFound),
                    };
                }
            }
        }
    }

    /// Collects all pairs with `start <= key < end` in ascending key
    /// order by walking the leaf sibling chain.
    pub fn range_search(&self, start: &Key, end: &Key) -> Result<Vec<LeafPair>> {
        let mut leaf = self.leftmost_leaf()?;
        let mut results = Vec::new();

        loop {
            for pair in &leaf.pairs {
                if pair.key.cmp_same_kind(end) != Ordering::Less {
                    return Ok(results);
                }
                if pair.key.cmp_same_kind(start) != Ordering::Less {
                    results.push(pair.clone());
                }
            }
            if leaf.next.is_none() {
                break;
            }
            leaf = self.read_leaf(leaf.next)?;
        }
        Ok(results)
    }

    /// Returns the pair with the smallest key.
    pub fn min(&self) -> Result<LeafPair> {
        let leaf = self.leftmost_leaf()?;
        leaf.pairs.first().cloned().ok_or(LarchError::TreeEmpty)
    }

    /// Returns the pair with the largest key.
    pub fn max(&self) -> Result<LeafPair> {
        let leaf = self.rightmost_leaf()?;
        leaf.pairs.last().cloned().ok_or(LarchError::TreeEmpty)
    }

    /// Removes a key and its value.
    ///
    /// Fails with `KeyNotFound` before any write if the key is absent.
    pub fn delete(&self, key: &Key) -> Result<()> {
        let root_id = self.file.root();
        if root_id.is_none() {
            return Err(LarchError::TreeEmpty);
        }

        // Existence pre-check so a miss cannot leave partial writes.
        self.search(key)?;

        let underflow = self.delete_recursive(key, root_id)?;

        // An internal root left with a single child hands that child the
        // root role; the tree shrinks by one level.
        if underflow {
            if let Node::Internal(root) = self.file.read_node(root_id)? {
                if root.keys.is_empty() && root.children.len() == 1 {
                    let new_root = root.children[0];
                    self.file.set_root(new_root)?;
                    self.file.free_page(root_id)?;
                    debug!(
                        old_root = root_id.as_u32(),
                        new_root = new_root.as_u32(),
                        "root collapsed"
                    );
                }
            }
        }
        Ok(())
    }

    /// Renders the tree level by level, one line per level.
    pub fn dump(&self) -> Result<String> {
        let root_id = self.file.root();
        if root_id.is_none() {
            return Ok("tree is empty".to_string());
        }

        let mut out = String::new();
        let mut queue: VecDeque<(PageId, usize)> = VecDeque::new();
        queue.push_back((root_id, 0));
        let mut current_level = 0;
        out.push_str("level 0:");

        while let Some((page_id, level)) = queue.pop_front() {
            if level != current_level {
                current_level = level;
                out.push_str(&format!("\nlevel {}:", level));
            }
            match self.file.read_node(page_id)? {
                Node::Leaf(leaf) => {
                    out.push_str(&format!(" [page {}:", page_id));
                    for pair in &leaf.pairs {
                        out.push_str(&format!(" ({}: {})", pair.key, pair.value));
                    }
                    out.push(']');
                }
                Node::Internal(interm) => {
                    out.push_str(&format!(" [page {}:", page_id));
                    for key in &interm.keys {
                        out.push_str(&format!(" {}", key));
                    }
                    out.push(']');
                    for child in &interm.children {
                        queue.push_back((*child, level + 1));
                    }
                }
            }
        }
        out.push('\n');
        Ok(out)
    }

    fn min_keys(&self) -> usize {
        ((self.order - 1) / 2) as usize
    }

    fn read_leaf(&self, page_id: PageId) -> Result<LeafNode> {
        match self.file.read_node(page_id)? {
            Node::Leaf(leaf) => Ok(leaf),
            Node::Internal(_) => Err(LarchError::Corrupted(format!(
                "page {} should hold a leaf node",
                page_id
            ))),
        }
    }

    fn leftmost_leaf(&self) -> Result<LeafNode> {
        self.edge_leaf(|interm| interm.children.first().copied())
    }

    fn rightmost_leaf(&self) -> Result<LeafNode> {
        self.edge_leaf(|interm| interm.children.last().copied())
    }

    fn edge_leaf(
        &self,
        pick: impl Fn(&InternalNode) -> Option<PageId>,
    ) -> Result<LeafNode> {
        let mut page_id = self.file.root();
        if page_id.is_none() {
            return Err(LarchError::TreeEmpty);
        }
        loop {
            match self.file.read_node(page_id)? {
                Node::Leaf(leaf) => return Ok(leaf),
                Node::Internal(interm) => {
                    page_id = pick(&interm).ok_or_else(|| {
                        LarchError::Corrupted("internal node has no children".to_string())
                    })?;
                }
            }
        }
    }

    fn insert_recursive(
        &self,
        key: Key,
        value: Value,
        node: Node,
        page_id: PageId,
    ) -> Result<Option<Promotion>> {
        match node {
            Node::Leaf(leaf) => self.insert_into_leaf(key, value, leaf, page_id),
            Node::Internal(interm) => self.insert_into_internal(key, value, interm, page_id),
        }
    }

    fn insert_into_leaf(
        &self,
        key: Key,
        value: Value,
        mut leaf: LeafNode,
        page_id: PageId,
    ) -> Result<Option<Promotion>> {
        let idx = lower_bound(&leaf.pairs, &key);
        if idx < leaf.pairs.len() && leaf.pairs[idx].key == key {
            return Err(LarchError::DuplicateKey);
        }
        leaf.pairs.insert(idx, LeafPair::new(key, value));

        if leaf.pairs.len() < self.order as usize {
            self.file.write_node(&Node::Leaf(leaf), page_id)?;
            return Ok(None);
        }

        // Split: the left leaf keeps the lower half, the right leaf takes
        // the rest and slots into the sibling chain after it.
        let split = leaf.pairs.len() / 2;
        let right_pairs = leaf.pairs.split_off(split);
        let right_id = self.file.allocate_page()?;

        let right = LeafNode {
            pairs: right_pairs,
            next: leaf.next,
            prev: page_id,
        };
        leaf.next = right_id;

        if !right.next.is_none() {
            let mut successor = self.read_leaf(right.next)?;
            successor.prev = right_id;
            self.file.write_node(&Node::Leaf(successor), right.next)?;
        }

        let promoted = right.pairs[0].key.clone();
        self.file.write_node(&Node::Leaf(leaf), page_id)?;
        self.file.write_node(&Node::Leaf(right), right_id)?;
        debug!(
            left = page_id.as_u32(),
            right = right_id.as_u32(),
            "leaf split"
        );

        Ok(Some(Promotion {
            key: promoted,
            right: right_id,
        }))
    }

    fn insert_into_internal(
        &self,
        key: Key,
        value: Value,
        mut interm: InternalNode,
        page_id: PageId,
    ) -> Result<Option<Promotion>> {
        let child_idx = upper_bound(&interm.keys, &key);
        let child_id = *interm
            .children
            .get(child_idx)
            .ok_or_else(|| child_index_error(child_idx))?;

        let child = self.file.read_node(child_id)?;
        let Some(promo) = self.insert_recursive(key, value, child, child_id)? else {
            return Ok(None);
        };

        interm.keys.insert(child_idx, promo.key);
        interm.children.insert(child_idx + 1, promo.right);

        if interm.keys.len() < self.order as usize {
            self.file.write_node(&Node::Internal(interm), page_id)?;
            return Ok(None);
        }

        // Split around the middle separator, which moves up rather than
        // staying in either half.
        let split = ((self.order - 1) / 2) as usize;
        let promoted = interm.keys[split].clone();
        let right_keys: Vec<Key> = interm.keys.drain(split + 1..).collect();
        let right_children: Vec<PageId> = interm.children.drain(split + 1..).collect();
        interm.keys.truncate(split);

        let right = InternalNode {
            keys: right_keys,
            children: right_children,
        };
        let right_id = self.file.allocate_page()?;
        self.file.write_node(&Node::Internal(interm), page_id)?;
        self.file.write_node(&Node::Internal(right), right_id)?;
        debug!(
            left = page_id.as_u32(),
            right = right_id.as_u32(),
            "internal split"
        );

        Ok(Some(Promotion {
            key: promoted,
            right: right_id,
        }))
    }

    fn delete_recursive(&self, key: &Key, page_id: PageId) -> Result<bool> {
        match self.file.read_node(page_id)? {
            Node::Leaf(mut leaf) => {
                let Some(idx) = find_exact(&leaf.pairs, key) else {
                    return Ok(false);
                };
                leaf.pairs.remove(idx);
                let underflow = leaf.pairs.len() < self.min_keys();
                self.file.write_node(&Node::Leaf(leaf), page_id)?;
                Ok(underflow)
            }
            Node::Internal(interm) => {
                let child_idx = upper_bound(&interm.keys, key);
                let child_id = *interm
                    .children
                    .get(child_idx)
                    .ok_or_else(|| child_index_error(child_idx))?;

                if !self.delete_recursive(key, child_id)? {
                    return Ok(false);
                }
                self.resolve_underflow(interm, page_id, child_idx)
            }
        }
    }

    /// Repairs an underflowing child of `parent` and reports whether the
    /// parent itself underflows as a result.
    fn resolve_underflow(
        &self,
        mut parent: InternalNode,
        parent_id: PageId,
        child_idx: usize,
    ) -> Result<bool> {
        if child_idx > 0 {
            let left_id = parent.children[child_idx - 1];
            if self.can_lend(left_id)? {
                self.borrow_from_left(&mut parent, child_idx)?;
                self.file.write_node(&Node::Internal(parent), parent_id)?;
                return Ok(false);
            }
        }

        if child_idx + 1 < parent.children.len() {
            let right_id = parent.children[child_idx + 1];
            if self.can_lend(right_id)? {
                self.borrow_from_right(&mut parent, child_idx)?;
                self.file.write_node(&Node::Internal(parent), parent_id)?;
                return Ok(false);
            }
        }

        if child_idx > 0 {
            self.merge_with_left(&parent, child_idx)?;
            parent.keys.remove(child_idx - 1);
            parent.children.remove(child_idx);
        } else if child_idx + 1 < parent.children.len() {
            self.merge_with_right(&parent, child_idx)?;
            parent.keys.remove(child_idx);
            parent.children.remove(child_idx + 1);
        } else {
            return Err(LarchError::Corrupted(
                "underflowing child has no sibling to merge with".to_string(),
            ));
        }

        let underflow = parent.keys.len() < self.min_keys();
        self.file.write_node(&Node::Internal(parent), parent_id)?;
        Ok(underflow)
    }

    fn can_lend(&self, page_id: PageId) -> Result<bool> {
        Ok(self.file.read_node(page_id)?.key_count() > self.min_keys())
    }

    /// Moves the left sibling's last entry to the front of the child.
    fn borrow_from_left(&self, parent: &mut InternalNode, child_idx: usize) -> Result<()> {
        let left_id = parent.children[child_idx - 1];
        let child_id = parent.children[child_idx];

        match (self.file.read_node(left_id)?, self.file.read_node(child_id)?) {
            (Node::Leaf(mut left), Node::Leaf(mut child)) => {
                let borrowed = left.pairs.pop().ok_or_else(|| {
                    LarchError::Corrupted(format!("leaf {} has no pair to lend", left_id))
                })?;
                child.pairs.insert(0, borrowed);
                parent.keys[child_idx - 1] = child.pairs[0].key.clone();
                self.file.write_node(&Node::Leaf(left), left_id)?;
                self.file.write_node(&Node::Leaf(child), child_id)?;
            }
            (Node::Internal(mut left), Node::Internal(mut child)) => {
                let borrowed_key = left.keys.pop().ok_or_else(|| {
                    LarchError::Corrupted(format!("node {} has no key to lend", left_id))
                })?;
                let borrowed_child = left.children.pop().ok_or_else(|| {
                    LarchError::Corrupted(format!("node {} has no pointer to lend", left_id))
                })?;
                child.keys.insert(0, borrowed_key.clone());
                child.children.insert(0, borrowed_child);
                parent.keys[child_idx - 1] = borrowed_key;
                self.file.write_node(&Node::Internal(left), left_id)?;
                self.file.write_node(&Node::Internal(child), child_id)?;
            }
            _ => {
                return Err(LarchError::Corrupted(
                    "sibling node kinds differ".to_string(),
                ))
            }
        }
        trace!(
            child = child_id.as_u32(),
            donor = left_id.as_u32(),
            "borrowed from left sibling"
        );
        Ok(())
    }

    /// Moves the right sibling's first entry to the end of the child.
    fn borrow_from_right(&self, parent: &mut InternalNode, child_idx: usize) -> Result<()> {
        let child_id = parent.children[child_idx];
        let right_id = parent.children[child_idx + 1];

        match (self.file.read_node(child_id)?, self.file.read_node(right_id)?) {
            (Node::Leaf(mut child), Node::Leaf(mut right)) => {
                if right.pairs.is_empty() {
                    return Err(LarchError::Corrupted(format!(
                        "leaf {} has no pair to lend",
                        right_id
                    )));
                }
                let borrowed = right.pairs.remove(0);
                child.pairs.push(borrowed);
                if let Some(first) = right.pairs.first() {
                    parent.keys[child_idx] = first.key.clone();
                }
                self.file.write_node(&Node::Leaf(child), child_id)?;
                self.file.write_node(&Node::Leaf(right), right_id)?;
            }
            (Node::Internal(mut child), Node::Internal(mut right)) => {
                if right.keys.is_empty() || right.children.is_empty() {
                    return Err(LarchError::Corrupted(format!(
                        "node {} has nothing to lend",
                        right_id
                    )));
                }
                let borrowed_key = right.keys.remove(0);
                let borrowed_child = right.children.remove(0);
                child.keys.push(borrowed_key);
                child.children.push(borrowed_child);
                if let Some(first) = right.keys.first() {
                    parent.keys[child_idx] = first.clone();
                }
                self.file.write_node(&Node::Internal(child), child_id)?;
                self.file.write_node(&Node::Internal(right), right_id)?;
            }
            _ => {
                return Err(LarchError::Corrupted(
                    "sibling node kinds differ".to_string(),
                ))
            }
        }
        trace!(
            child = child_id.as_u32(),
            donor = right_id.as_u32(),
            "borrowed from right sibling"
        );
        Ok(())
    }

    /// Folds the child at `child_idx` into its left sibling and frees
    /// the child's page. The caller removes the separator and pointer.
    fn merge_with_left(&self, parent: &InternalNode, child_idx: usize) -> Result<()> {
        let left_id = parent.children[child_idx - 1];
        let child_id = parent.children[child_idx];

        match (self.file.read_node(left_id)?, self.file.read_node(child_id)?) {
            (Node::Leaf(mut left), Node::Leaf(child)) => {
                left.pairs.extend(child.pairs);
                left.next = child.next;
                if !left.next.is_none() {
                    let mut successor = self.read_leaf(left.next)?;
                    successor.prev = left_id;
                    self.file.write_node(&Node::Leaf(successor), left.next)?;
                }
                self.file.write_node(&Node::Leaf(left), left_id)?;
            }
            (Node::Internal(mut left), Node::Internal(child)) => {
                left.keys.push(parent.keys[child_idx - 1].clone());
                left.keys.extend(child.keys);
                left.children.extend(child.children);
                self.file.write_node(&Node::Internal(left), left_id)?;
            }
            _ => {
                return Err(LarchError::Corrupted(
                    "sibling node kinds differ".to_string(),
                ))
            }
        }

        self.file.free_page(child_id)?;
        debug!(
            freed = child_id.as_u32(),
            into = left_id.as_u32(),
            "merged into left sibling"
        );
        Ok(())
    }

    /// Folds the right sibling into the child at `child_idx` and frees
    /// the sibling's page. The caller removes the separator and pointer.
    fn merge_with_right(&self, parent: &InternalNode, child_idx: usize) -> Result<()> {
        let child_id = parent.children[child_idx];
        let right_id = parent.children[child_idx + 1];

        match (self.file.read_node(child_id)?, self.file.read_node(right_id)?) {
            (Node::Leaf(mut child), Node::Leaf(right)) => {
                child.pairs.extend(right.pairs);
                child.next = right.next;
                if !child.next.is_none() {
                    let mut successor = self.read_leaf(child.next)?;
                    successor.prev = child_id;
                    self.file.write_node(&Node::Leaf(successor), child.next)?;
                }
                self.file.write_node(&Node::Leaf(child), child_id)?;
            }
            (Node::Internal(mut child), Node::Internal(right)) => {
                child.keys.push(parent.keys[child_idx].clone());
                child.keys.extend(right.keys);
                child.children.extend(right.children);
                self.file.write_node(&Node::Internal(child), child_id)?;
            }
            _ => {
                return Err(LarchError::Corrupted(
                    "sibling node kinds differ".to_string(),
                ))
            }
        }

        self.file.free_page(right_id)?;
        debug!(
            freed = right_id.as_u32(),
            into = child_id.as_u32(),
            "merged right sibling"
        );
        Ok(())
    }
}

fn child_index_error(idx: usize) -> LarchError {
    LarchError::Corrupted(format!("child index {} out of range", idx))
}

/// First index i with `key < keys[i]`, or `keys.len()` if none.
fn upper_bound(keys: &[Key], key: &Key) -> usize {
    let mut lo = 0;
    let mut hi = keys.len();
    while lo < hi {
        let mid = lo + (hi - lo) / 2;
        if key.cmp_same_kind(&keys[mid]) == Ordering::Less {
            hi = mid;
        } else {
            lo = mid + 1;
        }
    }
    lo
}

/// First index i with `pairs[i].key >= key`, or `pairs.len()` if none.
fn lower_bound(pairs: &[LeafPair], key: &Key) -> usize {
    let mut lo = 0;
    let mut hi = pairs.len();
    while lo < hi {
        let mid = lo + (hi - lo) / 2;
        if pairs[mid].key.cmp_same_kind(key) == Ordering::Less {
            lo = mid + 1;
        } else {
            hi = mid;
        }
    }
    lo
}

/// Binary search for an exact key match.
fn find_exact(pairs: &[LeafPair], key: &Key) -> Option<usize> {
    let idx = lower_bound(pairs, key);
    if idx < pairs.len() && pairs[idx].key == *key {
        Some(idx)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::{tempdir, TempDir};

    fn test_config() -> IndexFileConfig {
        IndexFileConfig {
            fsync_headers: false,
        }
    }

    fn create_tree(order: u32) -> (DiskTree, TempDir) {
        let dir = tempdir().unwrap();
        let tree = DiskTree::create_with(dir.path().join("t.idx"), order, test_config()).unwrap();
        (tree, dir)
    }

    fn insert_int(tree: &DiskTree, key: i32) {
        tree.insert(Key::Int(key), format!("v{}", key).parse().unwrap())
            .unwrap();
    }

    fn assert_found(tree: &DiskTree, key: i32) {
        let value = tree.search(&Key::Int(key)).unwrap();
        assert_eq!(value.as_bytes(), format!("v{}", key).as_bytes());
    }

    #[test]
    fn test_empty_tree_operations() {
        let (tree, _dir) = create_tree(3);

        assert!(tree.root().is_none());
        assert!(matches!(
            tree.search(&Key::Int(1)).unwrap_err(),
            LarchError::TreeEmpty
        ));
        assert!(matches!(
            tree.delete(&Key::Int(1)).unwrap_err(),
            LarchError::TreeEmpty
        ));
        assert!(matches!(tree.min().unwrap_err(), LarchError::TreeEmpty));
        assert!(matches!(tree.max().unwrap_err(), LarchError::TreeEmpty));
        assert!(matches!(
            tree.range_search(&Key::Int(0), &Key::Int(10)).unwrap_err(),
            LarchError::TreeEmpty
        ));
    }

    #[test]
    fn test_first_insert_creates_root_leaf() {
        let (tree, _dir) = create_tree(3);

        insert_int(&tree, 42);
        assert_eq!(tree.root(), PageId::new(1));
        assert_found(&tree, 42);
    }

    #[test]
    fn test_insert_and_search_with_splits() {
        let (tree, _dir) = create_tree(3);

        for key in [10, 20, 5, 15, 25, 1] {
            insert_int(&tree, key);
        }
        for key in [10, 20, 5, 15, 25, 1] {
            assert_found(&tree, key);
        }
        assert!(matches!(
            tree.search(&Key::Int(100)).unwrap_err(),
            LarchError::KeyNotFound
        ));
    }

    #[test]
    fn test_duplicate_insert_rejected_without_change() {
        let (tree, _dir) = create_tree(3);

        for key in 1..=6 {
            insert_int(&tree, key);
        }
        let before = tree.dump().unwrap();

        let err = tree
            .insert(Key::Int(3), "other".parse().unwrap())
            .unwrap_err();
        assert!(matches!(err, LarchError::DuplicateKey));

        assert_eq!(tree.dump().unwrap(), before);
        assert_found(&tree, 3);
    }

    #[test]
    fn test_sequential_inserts_keep_all_keys() {
        let (tree, _dir) = create_tree(3);

        for key in 1..=50 {
            insert_int(&tree, key);
        }
        for key in 1..=50 {
            assert_found(&tree, key);
        }
    }

    #[test]
    fn test_min_max() {
        let (tree, _dir) = create_tree(3);

        for key in [7, 3, 9, 1, 5] {
            insert_int(&tree, key);
        }

        assert_eq!(tree.min().unwrap().key, Key::Int(1));
        assert_eq!(tree.max().unwrap().key, Key::Int(9));
    }

    #[test]
    fn test_range_search_bounds() {
        let (tree, _dir) = create_tree(3);

        for key in 1..=10 {
            insert_int(&tree, key);
        }

        let pairs = tree.range_search(&Key::Int(3), &Key::Int(8)).unwrap();
        let keys: Vec<_> = pairs.iter().map(|p| p.key.clone()).collect();
        assert_eq!(
            keys,
            vec![Key::Int(3), Key::Int(4), Key::Int(5), Key::Int(6), Key::Int(7)]
        );

        // Empty range.
        assert!(tree.range_search(&Key::Int(8), &Key::Int(8)).unwrap().is_empty());

        // Range past the end collects the tail.
        let pairs = tree.range_search(&Key::Int(9), &Key::Int(100)).unwrap();
        assert_eq!(pairs.len(), 2);
    }

    #[test]
    fn test_delete_leaf_only_root() {
        let (tree, _dir) = create_tree(4);

        insert_int(&tree, 1);
        insert_int(&tree, 2);

        tree.delete(&Key::Int(1)).unwrap();
        assert!(matches!(
            tree.search(&Key::Int(1)).unwrap_err(),
            LarchError::KeyNotFound
        ));
        assert_found(&tree, 2);

        // Removing the last key leaves an empty root leaf.
        tree.delete(&Key::Int(2)).unwrap();
        assert!(matches!(
            tree.search(&Key::Int(2)).unwrap_err(),
            LarchError::KeyNotFound
        ));
        assert!(matches!(tree.min().unwrap_err(), LarchError::TreeEmpty));
    }

    #[test]
    fn test_delete_missing_key_fails() {
        let (tree, _dir) = create_tree(3);

        insert_int(&tree, 1);
        assert!(matches!(
            tree.delete(&Key::Int(99)).unwrap_err(),
            LarchError::KeyNotFound
        ));
        assert_found(&tree, 1);
    }

    #[test]
    fn test_delete_with_rebalancing() {
        let (tree, _dir) = create_tree(3);

        for key in 1..=20 {
            insert_int(&tree, key);
        }
        for key in [10, 11, 12, 13] {
            tree.delete(&Key::Int(key)).unwrap();
        }

        for key in 1..=20 {
            if (10..=13).contains(&key) {
                assert!(tree.search(&Key::Int(key)).is_err());
            } else {
                assert_found(&tree, key);
            }
        }

        // Merges reclaimed at least one page.
        assert!(!tree.index().free_list_head().is_none());
    }

    #[test]
    fn test_delete_everything_then_reinsert() {
        let (tree, _dir) = create_tree(3);

        for key in 1..=15 {
            insert_int(&tree, key);
        }
        for key in 1..=15 {
            tree.delete(&Key::Int(key)).unwrap();
        }
        for key in 1..=15 {
            assert!(tree.search(&Key::Int(key)).is_err());
        }

        for key in 1..=15 {
            insert_int(&tree, key);
        }
        for key in 1..=15 {
            assert_found(&tree, key);
        }
    }

    #[test]
    fn test_root_collapse_shrinks_height() {
        let (tree, _dir) = create_tree(3);

        for key in 1..=10 {
            insert_int(&tree, key);
        }
        let tall = tree.dump().unwrap();
        assert!(tall.contains("level 1:"));

        for key in 3..=10 {
            tree.delete(&Key::Int(key)).unwrap();
        }

        assert_found(&tree, 1);
        assert_found(&tree, 2);
        let short = tree.dump().unwrap();
        assert!(short.lines().count() < tall.lines().count());
    }

    #[test]
    fn test_string_keys() {
        let (tree, _dir) = create_tree(3);

        for name in ["cherry", "apple", "banana", "fig", "date", "elderberry"] {
            tree.insert(Key::from(name), name.parse().unwrap()).unwrap();
        }

        assert_eq!(
            tree.search(&Key::from("banana")).unwrap().as_bytes(),
            b"banana"
        );
        assert_eq!(tree.min().unwrap().key, Key::from("apple"));
        assert_eq!(tree.max().unwrap().key, Key::from("fig"));

        let pairs = tree
            .range_search(&Key::from("banana"), &Key::from("elderberry"))
            .unwrap();
        let keys: Vec<_> = pairs.iter().map(|p| p.key.to_string()).collect();
        assert_eq!(keys, vec!["banana", "cherry", "date"]);
    }

    #[test]
    fn test_float_keys() {
        let (tree, _dir) = create_tree(3);

        for v in [2.5, -1.0, 0.25, 10.0, 3.75] {
            tree.insert(Key::Float(v), format!("{}", v).parse().unwrap())
                .unwrap();
        }

        assert_eq!(tree.min().unwrap().key, Key::Float(-1.0));
        assert_eq!(tree.max().unwrap().key, Key::Float(10.0));
        assert_eq!(
            tree.search(&Key::Float(0.25)).unwrap().as_bytes(),
            b"0.25"
        );
    }

    #[test]
    fn test_persistence_across_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("t.idx");
        let root_before;

        {
            let tree = DiskTree::create_with(&path, 3, test_config()).unwrap();
            for key in [10, 5, 15, 3, 7, 12, 18, 1, 25, 30] {
                insert_int(&tree, key);
            }
            root_before = tree.root();
            tree.close().unwrap();
        }

        let tree = DiskTree::open_with(&path, test_config()).unwrap();
        assert_eq!(tree.root(), root_before);
        assert_eq!(tree.order(), 3);
        for key in [10, 5, 15, 3, 7, 12, 18, 1, 25, 30] {
            assert_found(&tree, key);
        }
        assert!(tree.search(&Key::Int(100)).is_err());
    }

    #[test]
    fn test_bound_helpers() {
        let keys: Vec<Key> = [10, 20, 30].into_iter().map(Key::Int).collect();
        assert_eq!(upper_bound(&keys, &Key::Int(5)), 0);
        assert_eq!(upper_bound(&keys, &Key::Int(10)), 1);
        assert_eq!(upper_bound(&keys, &Key::Int(25)), 2);
        assert_eq!(upper_bound(&keys, &Key::Int(35)), 3);

        let pairs: Vec<LeafPair> = [10, 20, 30]
            .into_iter()
            .map(|k| LeafPair::new(Key::Int(k), "x".parse().unwrap()))
            .collect();
        assert_eq!(lower_bound(&pairs, &Key::Int(10)), 0);
        assert_eq!(lower_bound(&pairs, &Key::Int(15)), 1);
        assert_eq!(lower_bound(&pairs, &Key::Int(31)), 3);
        assert_eq!(find_exact(&pairs, &Key::Int(20)), Some(1));
        assert_eq!(find_exact(&pairs, &Key::Int(21)), None);
    }
}
