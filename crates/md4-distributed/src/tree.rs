//! Nested batch structures and leaf paths.
//!
//! A batch is a [`Tree`] of named fields and sequences whose leaves are arrays.
//! Mapping over a tree hands every leaf its [`KeyPath`] so failures can name
//! the field they happened in.

use core::convert::Infallible;
use core::fmt;
use std::collections::BTreeMap;

/// One step from a node to one of its children.
#[derive(Clone, Debug, Hash, PartialEq, Eq)]
pub enum PathEntry {
    /// Child of a mapping node.
    Key(String),
    /// Child of a sequence node.
    Index(usize),
}

impl fmt::Display for PathEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PathEntry::Key(key) => write!(f, "['{key}']"),
            PathEntry::Index(index) => write!(f, "[{index}]"),
        }
    }
}

/// Position of a node, from the root of a [`Tree`].
///
/// Displayed as the concatenation of its entries, e.g. `['inputs'][0]`. The
/// root path displays as an empty string.
#[derive(Clone, Debug, Default, Hash, PartialEq, Eq)]
pub struct KeyPath(Vec<PathEntry>);

impl KeyPath {
    /// The path of the root node.
    pub fn root() -> Self {
        Self::default()
    }

    /// Returns the path of a child of this node.
    pub fn child(&self, entry: PathEntry) -> Self {
        let mut entries = self.0.clone();
        entries.push(entry);
        Self(entries)
    }

    /// Entries from the root to the node.
    pub fn entries(&self) -> &[PathEntry] {
        &self.0
    }

    fn push(&mut self, entry: PathEntry) {
        self.0.push(entry);
    }

    fn pop(&mut self) {
        self.0.pop();
    }
}

impl fmt::Display for KeyPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for entry in &self.0 {
            write!(f, "{entry}")?;
        }
        Ok(())
    }
}

impl FromIterator<PathEntry> for KeyPath {
    fn from_iter<I: IntoIterator<Item = PathEntry>>(entries: I) -> Self {
        Self(entries.into_iter().collect())
    }
}

/// A nested structure of mappings and sequences with leaves of type `L`.
///
/// Mapping keys are ordered, so two trees with the same keys are always
/// walked in the same order.
#[derive(Clone, Debug, PartialEq)]
pub enum Tree<L> {
    /// A single value.
    Leaf(L),
    /// An ordered list of subtrees.
    Seq(Vec<Tree<L>>),
    /// Named subtrees.
    Map(BTreeMap<String, Tree<L>>),
}

impl<L> Tree<L> {
    /// Builds a mapping node from `(name, subtree)` pairs.
    pub fn map<K, I>(entries: I) -> Self
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, Tree<L>)>,
    {
        Tree::Map(
            entries
                .into_iter()
                .map(|(key, tree)| (key.into(), tree))
                .collect(),
        )
    }

    /// Builds a sequence node.
    pub fn seq<I: IntoIterator<Item = Tree<L>>>(items: I) -> Self {
        Tree::Seq(items.into_iter().collect())
    }

    /// Returns the value if this node is a leaf.
    pub fn as_leaf(&self) -> Option<&L> {
        match self {
            Tree::Leaf(leaf) => Some(leaf),
            _ => None,
        }
    }

    /// Follows `path` from this node.
    pub fn get(&self, path: &KeyPath) -> Option<&Tree<L>> {
        let mut node = self;
        for entry in path.entries() {
            node = match (node, entry) {
                (Tree::Map(children), PathEntry::Key(key)) => children.get(key)?,
                (Tree::Seq(items), PathEntry::Index(index)) => items.get(*index)?,
                _ => return None,
            };
        }
        Some(node)
    }

    /// All leaves with their paths, in walk order.
    pub fn leaves(&self) -> Vec<(KeyPath, &L)> {
        let mut leaves = Vec::new();
        self.collect_leaves(&mut KeyPath::root(), &mut leaves);
        leaves
    }

    /// Applies `f` to every leaf, stopping at the first error.
    ///
    /// The structure of the tree is preserved and `f` receives the path of
    /// the leaf it is called on.
    pub fn try_map_with_path<M, E, F>(self, mut f: F) -> Result<Tree<M>, E>
    where
        F: FnMut(&KeyPath, L) -> Result<M, E>,
    {
        self.try_map_at(&mut KeyPath::root(), &mut f)
    }

    /// Infallible version of [`Tree::try_map_with_path`].
    pub fn map_with_path<M, F>(self, mut f: F) -> Tree<M>
    where
        F: FnMut(&KeyPath, L) -> M,
    {
        match self.try_map_with_path(|path, leaf| Ok::<_, Infallible>(f(path, leaf))) {
            Ok(tree) => tree,
            Err(never) => match never {},
        }
    }

    fn try_map_at<M, E, F>(self, path: &mut KeyPath, f: &mut F) -> Result<Tree<M>, E>
    where
        F: FnMut(&KeyPath, L) -> Result<M, E>,
    {
        match self {
            Tree::Leaf(leaf) => f(path, leaf).map(Tree::Leaf),
            Tree::Seq(items) => {
                let mut mapped = Vec::with_capacity(items.len());
                for (index, item) in items.into_iter().enumerate() {
                    path.push(PathEntry::Index(index));
                    let result = item.try_map_at(path, f);
                    path.pop();
                    mapped.push(result?);
                }
                Ok(Tree::Seq(mapped))
            }
            Tree::Map(children) => {
                let mut mapped = BTreeMap::new();
                for (key, child) in children {
                    path.push(PathEntry::Key(key.clone()));
                    let result = child.try_map_at(path, f);
                    path.pop();
                    mapped.insert(key, result?);
                }
                Ok(Tree::Map(mapped))
            }
        }
    }

    fn collect_leaves<'a>(&'a self, path: &mut KeyPath, leaves: &mut Vec<(KeyPath, &'a L)>) {
        match self {
            Tree::Leaf(leaf) => leaves.push((path.clone(), leaf)),
            Tree::Seq(items) => {
                for (index, item) in items.iter().enumerate() {
                    path.push(PathEntry::Index(index));
                    item.collect_leaves(path, leaves);
                    path.pop();
                }
            }
            Tree::Map(children) => {
                for (key, child) in children {
                    path.push(PathEntry::Key(key.clone()));
                    child.collect_leaves(path, leaves);
                    path.pop();
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn batch() -> Tree<i32> {
        Tree::map([
            ("label", Tree::Leaf(3)),
            ("image", Tree::seq([Tree::Leaf(1), Tree::Leaf(2)])),
        ])
    }

    #[test]
    fn test_key_path_display() {
        let path = KeyPath::root()
            .child(PathEntry::Key("image".into()))
            .child(PathEntry::Index(1));

        assert_eq!(path.to_string(), "['image'][1]");
        assert_eq!(KeyPath::root().to_string(), "");
    }

    #[test]
    fn test_map_with_path_preserves_structure() {
        let mapped = batch().map_with_path(|path, leaf| format!("{path}={leaf}"));

        let expected = Tree::map([
            ("label", Tree::Leaf("['label']=3".to_string())),
            (
                "image",
                Tree::seq([
                    Tree::Leaf("['image'][0]=1".to_string()),
                    Tree::Leaf("['image'][1]=2".to_string()),
                ]),
            ),
        ]);
        assert_eq!(mapped, expected);
    }

    #[test]
    fn test_leaves_are_walked_in_key_order() {
        let tree = batch();
        let paths: Vec<String> = tree
            .leaves()
            .into_iter()
            .map(|(path, _)| path.to_string())
            .collect();

        assert_eq!(paths, ["['image'][0]", "['image'][1]", "['label']"]);
    }

    #[test]
    fn test_try_map_with_path_stops_at_first_error() {
        let mut visited = Vec::new();
        let result = batch().try_map_with_path(|path, leaf| {
            visited.push(path.clone());
            if leaf == 2 { Err(path.clone()) } else { Ok(leaf) }
        });

        let failing: KeyPath = [PathEntry::Key("image".into()), PathEntry::Index(1)]
            .into_iter()
            .collect();
        assert_eq!(result, Err(failing));
        assert_eq!(visited.len(), 2);
    }

    #[test]
    fn test_get_follows_path() {
        let tree = batch();
        let path: KeyPath = [PathEntry::Key("image".into()), PathEntry::Index(0)]
            .into_iter()
            .collect();

        assert_eq!(tree.get(&path).and_then(Tree::as_leaf), Some(&1));
        let mismatched = KeyPath::root().child(PathEntry::Index(0));
        assert!(tree.get(&mismatched).is_none());
    }
}
