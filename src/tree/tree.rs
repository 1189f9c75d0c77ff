use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::{Result, TrainErr};

/// A nested container of leaves: a leaf, a mapping of named subtrees or a sequence of subtrees.
///
/// Mappings iterate their keys in sorted order, so flattening a tree always yields its leaves
/// in the same order for trees with the same structure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tree<T> {
    Leaf(T),
    Map(BTreeMap<String, Tree<T>>),
    Seq(Vec<Tree<T>>),
}

/// Joins a parent path and a child key with `/`.
pub(crate) fn join(path: &str, key: &str) -> String {
    if path.is_empty() {
        key.to_string()
    } else {
        format!("{path}/{key}")
    }
}

impl<T> Tree<T> {
    /// Creates a new leaf.
    pub fn leaf(value: T) -> Self {
        Self::Leaf(value)
    }

    /// Creates a new mapping node.
    ///
    /// # Arguments
    /// * `entries` - The named subtrees, a repeated key keeps the last subtree.
    ///
    /// # Returns
    /// A new `Tree::Map`.
    pub fn mapping<K, I>(entries: I) -> Self
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, Tree<T>)>,
    {
        Self::Map(entries.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    /// Creates a new sequence node.
    pub fn sequence<I>(items: I) -> Self
    where
        I: IntoIterator<Item = Tree<T>>,
    {
        Self::Seq(items.into_iter().collect())
    }

    /// Returns the leaf value if this node is a leaf.
    pub fn as_leaf(&self) -> Option<&T> {
        match self {
            Tree::Leaf(value) => Some(value),
            _ => None,
        }
    }

    /// Returns the subtree stored under `key` if this node is a mapping.
    pub fn get(&self, key: &str) -> Option<&Tree<T>> {
        match self {
            Tree::Map(entries) => entries.get(key),
            _ => None,
        }
    }

    /// Returns the subtree at `index` if this node is a sequence.
    pub fn at(&self, index: usize) -> Option<&Tree<T>> {
        match self {
            Tree::Seq(items) => items.get(index),
            _ => None,
        }
    }

    /// Returns the amount of leaves in the tree.
    pub fn num_leaves(&self) -> usize {
        match self {
            Tree::Leaf(_) => 1,
            Tree::Map(entries) => entries.values().map(Tree::num_leaves).sum(),
            Tree::Seq(items) => items.iter().map(Tree::num_leaves).sum(),
        }
    }

    /// Flattens the tree into its leaves, in key order for mappings and index order for
    /// sequences.
    pub fn leaves(&self) -> Vec<&T> {
        let mut out = Vec::with_capacity(self.num_leaves());
        self.collect_leaves(&mut out);
        out
    }

    fn collect_leaves<'a>(&'a self, out: &mut Vec<&'a T>) {
        match self {
            Tree::Leaf(value) => out.push(value),
            Tree::Map(entries) => entries.values().for_each(|v| v.collect_leaves(out)),
            Tree::Seq(items) => items.iter().for_each(|v| v.collect_leaves(out)),
        }
    }

    /// Same as `leaves` but pairs every leaf with its `/` separated path.
    pub fn leaves_with_path(&self) -> Vec<(String, &T)> {
        let mut out = Vec::with_capacity(self.num_leaves());
        self.collect_leaves_with_path(String::new(), &mut out);
        out
    }

    fn collect_leaves_with_path<'a>(&'a self, path: String, out: &mut Vec<(String, &'a T)>) {
        match self {
            Tree::Leaf(value) => out.push((path, value)),
            Tree::Map(entries) => {
                for (key, value) in entries {
                    value.collect_leaves_with_path(join(&path, key), out);
                }
            }
            Tree::Seq(items) => {
                for (i, value) in items.iter().enumerate() {
                    value.collect_leaves_with_path(join(&path, &i.to_string()), out);
                }
            }
        }
    }

    /// Maps every leaf of the tree, keeping its structure.
    pub fn map<U, F>(&self, mut f: F) -> Tree<U>
    where
        F: FnMut(&T) -> U,
    {
        self.map_inner(&mut f)
    }

    fn map_inner<U, F>(&self, f: &mut F) -> Tree<U>
    where
        F: FnMut(&T) -> U,
    {
        match self {
            Tree::Leaf(value) => Tree::Leaf(f(value)),
            Tree::Map(entries) => Tree::Map(
                entries
                    .iter()
                    .map(|(k, v)| (k.clone(), v.map_inner(f)))
                    .collect(),
            ),
            Tree::Seq(items) => Tree::Seq(items.iter().map(|v| v.map_inner(f)).collect()),
        }
    }

    /// Fallible version of `map`, the closure also receives the leaf's path.
    ///
    /// # Returns
    /// The mapped tree or the first error returned by `f`.
    pub fn try_map<U, F>(&self, mut f: F) -> Result<Tree<U>>
    where
        F: FnMut(&str, &T) -> Result<U>,
    {
        self.try_map_inner("", &mut f)
    }

    fn try_map_inner<U, F>(&self, path: &str, f: &mut F) -> Result<Tree<U>>
    where
        F: FnMut(&str, &T) -> Result<U>,
    {
        let tree = match self {
            Tree::Leaf(value) => Tree::Leaf(f(path, value)?),
            Tree::Map(entries) => {
                let mut out = BTreeMap::new();
                for (key, value) in entries {
                    out.insert(key.clone(), value.try_map_inner(&join(path, key), f)?);
                }
                Tree::Map(out)
            }
            Tree::Seq(items) => {
                let mut out = Vec::with_capacity(items.len());
                for (i, value) in items.iter().enumerate() {
                    out.push(value.try_map_inner(&join(path, &i.to_string()), f)?);
                }
                Tree::Seq(out)
            }
        };

        Ok(tree)
    }

    /// Combines two trees with the same structure leaf by leaf.
    ///
    /// # Arguments
    /// * `other` - The tree to zip with, it must have the same structure as `self`.
    /// * `what` - A name for `other` used in error messages.
    /// * `f` - Receives the leaf path and both leaves.
    ///
    /// # Returns
    /// The combined tree, or a `StructureMismatch` pointing to the first node where the
    /// trees diverge.
    pub fn zip_with<U, V, F>(&self, other: &Tree<U>, what: &'static str, mut f: F) -> Result<Tree<V>>
    where
        F: FnMut(&str, &T, &U) -> Result<V>,
    {
        self.zip_inner(other, what, "", &mut f)
    }

    fn zip_inner<U, V, F>(
        &self,
        other: &Tree<U>,
        what: &'static str,
        path: &str,
        f: &mut F,
    ) -> Result<Tree<V>>
    where
        F: FnMut(&str, &T, &U) -> Result<V>,
    {
        let mismatch = |path: String| TrainErr::StructureMismatch { what, path };

        let tree = match (self, other) {
            (Tree::Leaf(a), Tree::Leaf(b)) => Tree::Leaf(f(path, a, b)?),
            (Tree::Map(a), Tree::Map(b)) => {
                if let Some(key) = divergent_key(a, b) {
                    return Err(mismatch(join(path, key)));
                }

                let mut out = BTreeMap::new();
                for ((key, x), y) in a.iter().zip(b.values()) {
                    out.insert(key.clone(), x.zip_inner(y, what, &join(path, key), f)?);
                }
                Tree::Map(out)
            }
            (Tree::Seq(a), Tree::Seq(b)) => {
                if a.len() != b.len() {
                    let idx = a.len().min(b.len());
                    return Err(mismatch(join(path, &idx.to_string())));
                }

                let mut out = Vec::with_capacity(a.len());
                for (i, (x, y)) in a.iter().zip(b).enumerate() {
                    out.push(x.zip_inner(y, what, &join(path, &i.to_string()), f)?);
                }
                Tree::Seq(out)
            }
            _ => return Err(mismatch(path.to_string())),
        };

        Ok(tree)
    }

    /// Returns whether both trees have the same nesting, keys and sequence lengths.
    pub fn same_structure<U>(&self, other: &Tree<U>) -> bool {
        match (self, other) {
            (Tree::Leaf(_), Tree::Leaf(_)) => true,
            (Tree::Map(a), Tree::Map(b)) => {
                a.len() == b.len()
                    && a.iter()
                        .zip(b)
                        .all(|((ka, va), (kb, vb))| ka == kb && va.same_structure(vb))
            }
            (Tree::Seq(a), Tree::Seq(b)) => {
                a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.same_structure(y))
            }
            _ => false,
        }
    }
}

/// Finds the first key, in sorted order, present in only one of both maps.
fn divergent_key<'a, A, B>(
    a: &'a BTreeMap<String, A>,
    b: &'a BTreeMap<String, B>,
) -> Option<&'a str> {
    let mut ka = a.keys();
    let mut kb = b.keys();

    loop {
        match (ka.next(), kb.next()) {
            (None, None) => return None,
            (Some(x), Some(y)) if x == y => continue,
            (Some(x), Some(y)) => return Some(x.min(y).as_str()),
            (Some(x), None) | (None, Some(x)) => return Some(x.as_str()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Tree<i32> {
        Tree::mapping([
            ("b", Tree::sequence([Tree::leaf(2), Tree::leaf(3)])),
            ("a", Tree::leaf(1)),
        ])
    }

    #[test]
    fn leaves_follow_sorted_keys() {
        let tree = sample();
        assert_eq!(tree.leaves(), [&1, &2, &3]);
        assert_eq!(tree.num_leaves(), 3);
    }

    #[test]
    fn leaves_carry_their_path() {
        let tree = sample();
        let paths: Vec<_> = tree
            .leaves_with_path()
            .into_iter()
            .map(|(p, _)| p)
            .collect();

        assert_eq!(paths, ["a", "b/0", "b/1"]);
    }

    #[test]
    fn map_keeps_structure() {
        let tree = sample();
        let doubled = tree.map(|x| x * 2);

        assert!(tree.same_structure(&doubled));
        assert_eq!(doubled.leaves(), [&2, &4, &6]);
    }

    #[test]
    fn try_map_stops_at_first_error() {
        let tree = sample();
        let res: Result<Tree<i32>> = tree.try_map(|path, &x| {
            if x == 2 {
                Err(TrainErr::MissingBatchAxis {
                    path: path.to_string(),
                })
            } else {
                Ok(x)
            }
        });

        let Err(TrainErr::MissingBatchAxis { path }) = res else {
            panic!("expected the error of the second leaf");
        };
        assert_eq!(path, "b/0");
    }

    #[test]
    fn zip_with_combines_leaves() {
        let a = sample();
        let b = sample().map(|x| x * 10);

        let sum = a.zip_with(&b, "other", |_, x, y| Ok(x + y)).unwrap();
        assert_eq!(sum.leaves(), [&11, &22, &33]);
    }

    #[test]
    fn zip_with_reports_missing_key() {
        let a = sample();
        let b = Tree::mapping([("a", Tree::leaf(1)), ("c", Tree::leaf(2))]);

        let err = a.zip_with(&b, "other", |_, x, y| Ok(x + y)).unwrap_err();
        let TrainErr::StructureMismatch { what, path } = err else {
            panic!("expected a structure mismatch");
        };
        assert_eq!(what, "other");
        assert_eq!(path, "b");
    }

    #[test]
    fn zip_with_reports_sequence_length() {
        let a = Tree::sequence([Tree::leaf(1), Tree::leaf(2)]);
        let b = Tree::sequence([Tree::leaf(1)]);

        let err = a.zip_with(&b, "other", |_, x, y| Ok(x + y)).unwrap_err();
        assert!(matches!(err, TrainErr::StructureMismatch { path, .. } if path == "1"));
    }

    #[test]
    fn leaf_and_container_have_different_structure() {
        let a = Tree::leaf(1);
        let b = Tree::sequence([Tree::leaf(1)]);

        assert!(!a.same_structure(&b));
        assert!(a.zip_with(&b, "other", |_, x, y| Ok(x + y)).is_err());
    }

    #[test]
    fn accessors() {
        let tree = sample();
        assert_eq!(tree.get("a").and_then(Tree::as_leaf), Some(&1));
        assert_eq!(
            tree.get("b").and_then(|b| b.at(1)).and_then(Tree::as_leaf),
            Some(&3)
        );
        assert!(tree.get("z").is_none());
        assert!(tree.at(0).is_none());
    }
}
