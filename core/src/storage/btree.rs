//! B+Tree ordered index
//!
//! Nodes live in a single arena and refer to each other by position, so
//! splits can rewrite parents and siblings without holding references
//! across arena growth. Leaves are chained in ascending key order.

use crate::Row;
use crate::error::{KodiakError, KodiakResult};
use std::collections::VecDeque;
use std::fmt;

/// Position of a node in the arena
///
/// Only the tree hands these out, so every id a caller holds is in bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub(crate) usize);

#[derive(Debug, Clone)]
enum NodeKind {
    Leaf {
        rows: Vec<Row>,
        next: Option<NodeId>,
    },
    Internal {
        children: Vec<NodeId>,
    },
}

/// Index node
#[derive(Debug, Clone)]
pub struct Node {
    keys: Vec<i64>,
    parent: Option<NodeId>,
    kind: NodeKind,
}

impl Node {
    fn empty_leaf() -> Self {
        Self {
            keys: Vec::new(),
            parent: None,
            kind: NodeKind::Leaf {
                rows: Vec::new(),
                next: None,
            },
        }
    }

    pub fn is_leaf(&self) -> bool {
        matches!(self.kind, NodeKind::Leaf { .. })
    }

    pub fn keys(&self) -> &[i64] {
        &self.keys
    }

    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    /// Child references of an internal node, empty for leaves
    pub fn children(&self) -> &[NodeId] {
        match &self.kind {
            NodeKind::Internal { children } => children,
            NodeKind::Leaf { .. } => &[],
        }
    }

    /// Forward link of a leaf
    pub fn next_leaf(&self) -> Option<NodeId> {
        match &self.kind {
            NodeKind::Leaf { next, .. } => *next,
            NodeKind::Internal { .. } => None,
        }
    }
}

/// B+Tree keyed by integer row keys
#[derive(Debug, Clone)]
pub struct BPlusTree {
    nodes: Vec<Node>,
    root: NodeId,
    order: usize,
    len: usize,
}

impl BPlusTree {
    /// Create a tree holding one empty leaf
    pub fn new(order: usize) -> KodiakResult<Self> {
        if order < 3 {
            return Err(KodiakError::InvalidInput(format!(
                "B+Tree order must be at least 3, got {}",
                order
            )));
        }

        Ok(Self {
            nodes: vec![Node::empty_leaf()],
            root: NodeId(0),
            order,
            len: 0,
        })
    }

    pub fn order(&self) -> usize {
        self.order
    }

    /// Number of stored entries, duplicates included
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.0]
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Levels from root to leaves, 1 for a lone leaf
    pub fn height(&self) -> usize {
        let mut height = 1;
        let mut current = self.root;
        while let Some(first) = self.node(current).children().first() {
            current = *first;
            height += 1;
        }
        height
    }

    /// Insert an entry. An existing key is not replaced, the new entry is
    /// stored after it.
    pub fn insert(&mut self, key: i64, row: Row) {
        let leaf_id = self.find_leaf(key);
        let max_keys = self.order - 1;

        let overflow = {
            let Node { keys, kind, .. } = self.node_mut(leaf_id);
            let pos = keys.partition_point(|k| *k <= key);
            keys.insert(pos, key);
            if let NodeKind::Leaf { rows, .. } = kind {
                rows.insert(pos, row);
            }
            keys.len() > max_keys
        };
        self.len += 1;

        if overflow {
            self.split(leaf_id);
        }
    }

    /// Exact-match lookup
    ///
    /// Descends the way `insert` does and returns the first matching entry
    /// in that leaf. Once duplicates of `key` span several leaves this is
    /// the first entry of the rightmost leaf they reach, which need not be
    /// the earliest insert.
    pub fn search(&self, key: i64) -> Option<&Row> {
        let leaf = self.node(self.find_leaf(key));
        let NodeKind::Leaf { rows, .. } = &leaf.kind else {
            return None;
        };
        leaf.keys.iter().position(|k| *k == key).map(|pos| &rows[pos])
    }

    /// All entries with `start <= key <= end`, ascending
    pub fn range(&self, start: i64, end: i64) -> Vec<(i64, &Row)> {
        let mut result = Vec::new();
        if start > end {
            return result;
        }

        // Descend to the leftmost leaf that may hold `start`
        let mut current = self.root;
        while let NodeKind::Internal { children } = &self.node(current).kind {
            let idx = self.node(current).keys.partition_point(|k| *k < start);
            current = children[idx];
        }

        let mut leaf_id = Some(current);
        while let Some(id) = leaf_id {
            let leaf = self.node(id);
            let NodeKind::Leaf { rows, next } = &leaf.kind else {
                break;
            };
            for (key, row) in leaf.keys.iter().zip(rows) {
                if *key > end {
                    return result;
                }
                if *key >= start {
                    result.push((*key, row));
                }
            }
            leaf_id = *next;
        }

        result
    }

    /// In-order traversal along the leaf chain
    pub fn iter(&self) -> LeafIter<'_> {
        let mut current = self.root;
        while let Some(first) = self.node(current).children().first() {
            current = *first;
        }

        LeafIter {
            tree: self,
            leaf: Some(current),
            pos: 0,
        }
    }

    pub fn keys(&self) -> Vec<i64> {
        self.iter().map(|(key, _)| key).collect()
    }

    fn node_mut(&mut self, id: NodeId) -> &mut Node {
        &mut self.nodes[id.0]
    }

    fn alloc(&mut self, node: Node) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(node);
        id
    }

    /// Follow the last child whose separator is <= key
    fn find_leaf(&self, key: i64) -> NodeId {
        let mut current = self.root;
        while let NodeKind::Internal { children } = &self.node(current).kind {
            let idx = self.node(current).keys.partition_point(|k| *k <= key);
            current = children[idx];
        }
        current
    }

    /// Split an overflowing node, propagating upward while parents overflow
    fn split(&mut self, id: NodeId) {
        let max_keys = self.order - 1;
        let mut current = id;

        loop {
            let sibling_id = NodeId(self.nodes.len());
            let parent = self.node(current).parent;

            let (promoted, sibling) = {
                let Node { keys, kind, .. } = self.node_mut(current);
                let mid = keys.len() / 2;

                match kind {
                    NodeKind::Leaf { rows, next } => {
                        let sibling_keys = keys.split_off(mid);
                        let sibling_rows = rows.split_off(mid);
                        let promoted = sibling_keys[0];
                        let sibling = Node {
                            keys: sibling_keys,
                            parent,
                            kind: NodeKind::Leaf {
                                rows: sibling_rows,
                                next: next.take(),
                            },
                        };
                        *next = Some(sibling_id);
                        (promoted, sibling)
                    }
                    NodeKind::Internal { children } => {
                        let mut sibling_keys = keys.split_off(mid);
                        let promoted = sibling_keys.remove(0);
                        let sibling_children = children.split_off(mid + 1);
                        debug_assert_eq!(children.len(), keys.len() + 1);
                        debug_assert_eq!(sibling_children.len(), sibling_keys.len() + 1);
                        let sibling = Node {
                            keys: sibling_keys,
                            parent,
                            kind: NodeKind::Internal {
                                children: sibling_children,
                            },
                        };
                        (promoted, sibling)
                    }
                }
            };

            let moved_children = sibling.children().to_vec();
            let allocated = self.alloc(sibling);
            debug_assert_eq!(allocated, sibling_id);
            for child in moved_children {
                self.node_mut(child).parent = Some(sibling_id);
            }

            let Some(parent_id) = parent else {
                let new_root = self.alloc(Node {
                    keys: vec![promoted],
                    parent: None,
                    kind: NodeKind::Internal {
                        children: vec![current, sibling_id],
                    },
                });
                self.node_mut(current).parent = Some(new_root);
                self.node_mut(sibling_id).parent = Some(new_root);
                self.root = new_root;
                tracing::debug!(
                    "B+Tree root split on key {}, height now {}",
                    promoted,
                    self.height()
                );
                return;
            };

            let overflow = {
                let Node { keys, kind, .. } = self.node_mut(parent_id);
                if let NodeKind::Internal { children } = kind {
                    let slot = children
                        .iter()
                        .position(|child| *child == current)
                        .unwrap_or_else(|| keys.partition_point(|k| *k <= promoted));
                    keys.insert(slot, promoted);
                    children.insert(slot + 1, sibling_id);
                    debug_assert_eq!(children.len(), keys.len() + 1);
                }
                keys.len() > max_keys
            };

            if !overflow {
                return;
            }
            current = parent_id;
        }
    }

    /// Verify structural invariants, reporting the first violation found
    pub fn check_invariants(&self) -> KodiakResult<()> {
        let violation = |msg: String| -> KodiakResult<()> { Err(KodiakError::Storage(msg)) };

        if self.node(self.root).parent.is_some() {
            return violation("root has a parent".to_string());
        }

        let mut leaves = Vec::new();
        let mut leaf_depth = None;
        let mut stack = vec![(self.root, 1usize, None::<i64>, None::<i64>)];

        while let Some((id, depth, lower, upper)) = stack.pop() {
            let node = self.node(id);

            if node.keys.len() > self.order - 1 {
                return violation(format!("node {:?} holds {} keys", id, node.keys.len()));
            }
            if node.keys.windows(2).any(|w| w[0] > w[1]) {
                return violation(format!("node {:?} keys are not ascending", id));
            }
            if let Some(lower) = lower {
                if node.keys.iter().any(|k| *k < lower) {
                    return violation(format!("node {:?} has a key below {}", id, lower));
                }
            }
            if let Some(upper) = upper {
                if node.keys.iter().any(|k| *k > upper) {
                    return violation(format!("node {:?} has a key above {}", id, upper));
                }
            }

            match &node.kind {
                NodeKind::Leaf { rows, .. } => {
                    if rows.len() != node.keys.len() {
                        return violation(format!("leaf {:?} rows and keys differ", id));
                    }
                    match leaf_depth {
                        None => leaf_depth = Some(depth),
                        Some(d) if d != depth => {
                            return violation(format!("leaf {:?} at depth {}", id, depth));
                        }
                        Some(_) => {}
                    }
                    leaves.push(id);
                }
                NodeKind::Internal { children } => {
                    if children.len() != node.keys.len() + 1 {
                        return violation(format!(
                            "internal {:?} has {} children for {} keys",
                            id,
                            children.len(),
                            node.keys.len()
                        ));
                    }
                    // Reverse push so leaves are visited left to right
                    for (i, child) in children.iter().enumerate().rev() {
                        if self.node(*child).parent != Some(id) {
                            return violation(format!("child {:?} lost its parent link", child));
                        }
                        let child_lower = if i == 0 { lower } else { Some(node.keys[i - 1]) };
                        let child_upper = node.keys.get(i).copied().or(upper);
                        stack.push((*child, depth + 1, child_lower, child_upper));
                    }
                }
            }
        }

        for pair in leaves.windows(2) {
            if self.node(pair[0]).next_leaf() != Some(pair[1]) {
                return violation(format!("leaf chain broken after {:?}", pair[0]));
            }
        }
        if let Some(last) = leaves.last() {
            if self.node(*last).next_leaf().is_some() {
                return violation("last leaf has a forward link".to_string());
            }
        }

        let chained = self.iter().count();
        if chained != self.len {
            return violation(format!("leaf chain holds {} of {} entries", chained, self.len));
        }

        Ok(())
    }
}

/// Iterator over `(key, row)` pairs following the leaf chain
pub struct LeafIter<'a> {
    tree: &'a BPlusTree,
    leaf: Option<NodeId>,
    pos: usize,
}

impl<'a> Iterator for LeafIter<'a> {
    type Item = (i64, &'a Row);

    fn next(&mut self) -> Option<Self::Item> {
        while let Some(id) = self.leaf {
            let node = self.tree.node(id);
            let NodeKind::Leaf { rows, next } = &node.kind else {
                return None;
            };
            if self.pos < node.keys.len() {
                let item = (node.keys[self.pos], &rows[self.pos]);
                self.pos += 1;
                return Some(item);
            }
            self.leaf = *next;
            self.pos = 0;
        }
        None
    }
}

impl fmt::Display for BPlusTree {
    /// One line per level, e.g. `[5]` then `[1 3] [5 8 9]`
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut level = VecDeque::from([self.root]);

        while !level.is_empty() {
            let mut next_level = VecDeque::new();
            let mut first = true;
            for id in level {
                let node = self.node(id);
                if !first {
                    write!(f, " ")?;
                }
                first = false;

                let keys: Vec<String> = node.keys.iter().map(|k| k.to_string()).collect();
                write!(f, "[{}]", keys.join(" "))?;
                next_level.extend(node.children().iter().copied());
            }
            writeln!(f)?;
            level = next_level;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;
    use std::collections::BTreeMap;

    fn row_for(key: i64) -> Row {
        Row::from([("k".to_string(), key.to_string())])
    }

    #[test]
    fn test_rejects_small_order() {
        assert!(matches!(
            BPlusTree::new(2),
            Err(KodiakError::InvalidInput(_))
        ));
        assert!(BPlusTree::new(3).is_ok());
    }

    #[test]
    fn test_empty_tree() {
        let tree = BPlusTree::new(3).unwrap();
        assert!(tree.is_empty());
        assert_eq!(tree.height(), 1);
        assert!(tree.search(1).is_none());
        assert!(tree.keys().is_empty());
        assert!(tree.range(i64::MIN, i64::MAX).is_empty());
        tree.check_invariants().unwrap();
    }

    #[test]
    fn test_small_scenario() {
        let mut tree = BPlusTree::new(3).unwrap();
        for key in [5, 3, 8, 1, 9, 2] {
            tree.insert(key, row_for(key));
            tree.check_invariants().unwrap();
        }

        assert_eq!(tree.search(3), Some(&row_for(3)));
        assert_eq!(tree.keys(), vec![1, 2, 3, 5, 8, 9]);
        assert!(tree.search(4).is_none());
    }

    #[test]
    fn test_leaf_split_promotes_sibling_first_key() {
        let mut tree = BPlusTree::new(3).unwrap();
        for key in [10, 20, 30] {
            tree.insert(key, row_for(key));
        }

        // Three keys overflow an order-3 leaf: [10] | [20 30], separator 20
        let root = tree.node(tree.root());
        assert!(!root.is_leaf());
        assert_eq!(root.keys(), &[20]);
        assert_eq!(tree.node(root.children()[0]).keys(), &[10]);
        assert_eq!(tree.node(root.children()[1]).keys(), &[20, 30]);
        assert_eq!(tree.height(), 2);
    }

    #[test]
    fn test_cascading_splits_grow_height() {
        let mut tree = BPlusTree::new(3).unwrap();
        let mut heights = Vec::new();
        for key in 0..64 {
            tree.insert(key, row_for(key));
            heights.push(tree.height());
        }

        tree.check_invariants().unwrap();
        assert!(tree.height() >= 4);
        // Height only ever grows by a single level at a time
        assert!(heights.windows(2).all(|w| w[1] == w[0] || w[1] == w[0] + 1));
        assert_eq!(tree.keys(), (0..64).collect::<Vec<_>>());
    }

    #[test]
    fn test_descending_and_interleaved_inserts() {
        for order in [3, 4, 5, 8] {
            let mut tree = BPlusTree::new(order).unwrap();
            let keys: Vec<i64> = (0..200).map(|i| (i * 37) % 211 - 100).collect();
            for key in keys.iter().rev() {
                tree.insert(*key, row_for(*key));
            }

            tree.check_invariants().unwrap();
            let mut expected = keys.clone();
            expected.sort();
            assert_eq!(tree.keys(), expected);
            for key in &keys {
                assert_eq!(tree.search(*key), Some(&row_for(*key)));
            }
        }
    }

    #[test]
    fn test_duplicate_keys_are_kept() {
        let mut tree = BPlusTree::new(4).unwrap();
        tree.insert(7, Row::from([("v".to_string(), "first".to_string())]));
        tree.insert(7, Row::from([("v".to_string(), "second".to_string())]));

        assert_eq!(tree.len(), 2);
        assert_eq!(tree.keys(), vec![7, 7]);
        let found = tree.search(7).unwrap();
        assert_eq!(found["v"], "first");
        tree.check_invariants().unwrap();
    }

    #[test]
    fn test_duplicate_search_after_split_finds_sibling_entry() {
        let mut tree = BPlusTree::new(3).unwrap();
        for label in ["a", "b", "c"] {
            tree.insert(1, Row::from([("v".to_string(), label.to_string())]));
        }

        // [a, b, c] splits into [a] | [b, c] with separator 1
        assert_eq!(tree.height(), 2);
        assert_eq!(tree.node(tree.root()).keys(), &[1]);
        assert_eq!(tree.search(1).unwrap()["v"], "b");

        let labels: Vec<&str> = tree.range(1, 1).into_iter().map(|(_, row)| row["v"].as_str()).collect();
        assert_eq!(labels, vec!["a", "b", "c"]);
        tree.check_invariants().unwrap();
    }

    #[test]
    fn test_many_duplicates_survive_splits() {
        let mut tree = BPlusTree::new(3).unwrap();
        for i in 0..20 {
            tree.insert(1, row_for(i));
            tree.insert(2, row_for(i));
        }

        tree.check_invariants().unwrap();
        assert_eq!(tree.len(), 40);
        assert!(tree.search(1).is_some());
        assert!(tree.search(2).is_some());
        assert_eq!(tree.range(1, 1).len(), 20);
    }

    #[test]
    fn test_range_scan() {
        let mut tree = BPlusTree::new(4).unwrap();
        for key in (0..100).step_by(5) {
            tree.insert(key, row_for(key));
        }

        let keys: Vec<i64> = tree.range(12, 41).into_iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec![15, 20, 25, 30, 35, 40]);

        let keys: Vec<i64> = tree.range(15, 15).into_iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec![15]);

        assert!(tree.range(41, 12).is_empty());
        assert!(tree.range(101, 500).is_empty());
        assert_eq!(tree.range(i64::MIN, i64::MAX).len(), 20);
    }

    #[test]
    fn test_display_by_level() {
        let mut tree = BPlusTree::new(3).unwrap();
        for key in [10, 20, 30] {
            tree.insert(key, row_for(key));
        }
        assert_eq!(tree.to_string(), "[20]\n[10] [20 30]\n");
    }

    #[test]
    fn test_parent_links_after_internal_split() {
        let mut tree = BPlusTree::new(3).unwrap();
        for key in 1..=10 {
            tree.insert(key, row_for(key));
        }

        let root = tree.node(tree.root());
        for child in root.children() {
            assert_eq!(tree.node(*child).parent(), Some(tree.root()));
        }
        tree.check_invariants().unwrap();
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]
        #[test]
        fn index_matches_btreemap(
            order in 3usize..9,
            keys in prop::collection::hash_set(-1000i64..1000, 0..300),
        ) {
            let mut tree = BPlusTree::new(order).unwrap();
            let mut reference = BTreeMap::new();

            for key in &keys {
                let row = Row::from([("k".to_string(), format!("row-{}", key))]);
                tree.insert(*key, row.clone());
                reference.insert(*key, row);
            }

            prop_assert!(tree.check_invariants().is_ok());
            prop_assert_eq!(tree.keys(), reference.keys().copied().collect::<Vec<_>>());
            for (key, row) in &reference {
                prop_assert_eq!(tree.search(*key), Some(row));
            }
            for probe in [-2000i64, 1500, 5000] {
                prop_assert!(tree.search(probe).is_none());
            }
        }
    }
}
