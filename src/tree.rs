//! Category tree builder
//!
//! Folds categorized records into a nested tree keyed by category path
//! segment. A segment name can end one path and prefix another at the same
//! time ("X" and "X/Y"); such a node becomes a `Branch` whose `items` bucket
//! holds the records terminating there. The outcome is the same whatever the
//! insertion order.

use std::collections::BTreeMap;

use crate::bookmarks::{BookmarkRecord, UNCATEGORIZED};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CategoryNode {
    /// Records whose path ends at this segment, no deeper paths use it
    Leaf(Vec<BookmarkRecord>),
    /// Named children; `items` holds records whose path ends here (often empty)
    Branch {
        children: BTreeMap<String, CategoryNode>,
        items: Vec<BookmarkRecord>,
    },
}

impl CategoryNode {
    fn empty_branch() -> Self {
        CategoryNode::Branch {
            children: BTreeMap::new(),
            items: Vec::new(),
        }
    }

    /// Records terminating at this node
    pub fn items(&self) -> &[BookmarkRecord] {
        match self {
            CategoryNode::Leaf(items) => items,
            CategoryNode::Branch { items, .. } => items,
        }
    }

    fn items_mut(&mut self) -> &mut Vec<BookmarkRecord> {
        match self {
            CategoryNode::Leaf(items) => items,
            CategoryNode::Branch { items, .. } => items,
        }
    }

    /// Children of this node, turning a leaf into a branch that keeps its records
    fn children_mut(&mut self) -> &mut BTreeMap<String, CategoryNode> {
        if let CategoryNode::Leaf(items) = self {
            let items = std::mem::take(items);
            *self = CategoryNode::Branch {
                children: BTreeMap::new(),
                items,
            };
        }
        match self {
            CategoryNode::Branch { children, .. } => children,
            CategoryNode::Leaf(_) => unreachable!("leaf was promoted to a branch"),
        }
    }

    pub fn record_count(&self) -> usize {
        match self {
            CategoryNode::Leaf(items) => items.len(),
            CategoryNode::Branch { children, items } => {
                items.len() + children.values().map(CategoryNode::record_count).sum::<usize>()
            }
        }
    }
}

/// Root of a category tree. The root itself never holds records.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CategoryTree {
    pub children: BTreeMap<String, CategoryNode>,
}

impl CategoryTree {
    /// Build a tree from categorized records, `None` when there are none
    pub fn build<I>(records: I) -> Option<Self>
    where
        I: IntoIterator<Item = BookmarkRecord>,
    {
        let mut tree = CategoryTree::default();
        let mut inserted = 0usize;
        for record in records {
            tree.insert(record);
            inserted += 1;
        }
        (inserted > 0).then_some(tree)
    }

    pub fn insert(&mut self, record: BookmarkRecord) {
        let segments = category_segments(record.effective_category());
        insert_at(&mut self.children, &segments, record);
    }

    pub fn record_count(&self) -> usize {
        self.children.values().map(CategoryNode::record_count).sum()
    }

    /// Every category path that has at least one record, slash-joined, sorted
    pub fn category_paths(&self) -> Vec<String> {
        let mut paths = Vec::new();
        let mut prefix = Vec::new();
        collect_paths(&self.children, &mut prefix, &mut paths);
        paths
    }

    /// Record count per top-level category
    pub fn top_level_counts(&self) -> Vec<(String, usize)> {
        self.children
            .iter()
            .map(|(name, node)| (name.clone(), node.record_count()))
            .collect()
    }
}

/// Split a category path into trimmed, non-empty segments.
/// A path with no usable segment files the record under the sentinel.
pub fn category_segments(category: &str) -> Vec<String> {
    let segments: Vec<String> = category
        .split('/')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect();

    if segments.is_empty() {
        vec![UNCATEGORIZED.to_string()]
    } else {
        segments
    }
}

fn insert_at(children: &mut BTreeMap<String, CategoryNode>, segments: &[String], record: BookmarkRecord) {
    let Some((head, rest)) = segments.split_first() else {
        return;
    };

    if rest.is_empty() {
        children
            .entry(head.clone())
            .or_insert_with(|| CategoryNode::Leaf(Vec::new()))
            .items_mut()
            .push(record);
        return;
    }

    let node = children.entry(head.clone()).or_insert_with(CategoryNode::empty_branch);
    insert_at(node.children_mut(), rest, record);
}

fn collect_paths(children: &BTreeMap<String, CategoryNode>, prefix: &mut Vec<String>, paths: &mut Vec<String>) {
    for (name, node) in children {
        prefix.push(name.clone());
        if !node.items().is_empty() {
            paths.push(prefix.join("/"));
        }
        if let CategoryNode::Branch { children, .. } = node {
            collect_paths(children, prefix, paths);
        }
        prefix.pop();
    }
}
