//! A growable bit set over [`NodeId`]s.
//!
//! Structuring works with many node sets at once (interval bounds, loop bodies,
//! dominator subtrees). Storing them as 64-nodes-per-word bit vectors keeps the
//! containment and overlap checks that dominate that stage cheap.

use std::fmt;

use crate::utils::graph::NodeId;

/// A set of nodes stored as a bit vector.
///
/// Unlike a fixed-capacity bit set, inserting a node past the current capacity
/// grows the set, so sets stay valid while normalization appends blocks to a graph.
#[derive(Clone, Default)]
pub struct NodeSet {
    words: Vec<u64>,
}

impl NodeSet {
    /// Creates an empty set.
    #[must_use]
    pub fn new() -> Self {
        NodeSet { words: Vec::new() }
    }

    /// Creates an empty set with room for `capacity` nodes.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        NodeSet {
            words: vec![0; capacity.div_ceil(64)],
        }
    }

    /// Creates a set containing exactly one node.
    #[must_use]
    pub fn singleton(node: NodeId) -> Self {
        let mut set = NodeSet::new();
        set.insert(node);
        set
    }

    /// Returns `true` if the set has no members.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.words.iter().all(|&w| w == 0)
    }

    /// Returns the number of members.
    #[must_use]
    pub fn len(&self) -> usize {
        self.words.iter().map(|w| w.count_ones() as usize).sum()
    }

    /// Inserts a node. Returns `true` if it was not already present.
    pub fn insert(&mut self, node: NodeId) -> bool {
        let (word, bit) = (node.index() / 64, node.index() % 64);
        if word >= self.words.len() {
            self.words.resize(word + 1, 0);
        }
        let old = self.words[word];
        self.words[word] |= 1u64 << bit;
        old != self.words[word]
    }

    /// Removes a node. Returns `true` if it was present.
    pub fn remove(&mut self, node: NodeId) -> bool {
        let (word, bit) = (node.index() / 64, node.index() % 64);
        match self.words.get_mut(word) {
            Some(w) => {
                let old = *w;
                *w &= !(1u64 << bit);
                old != *w
            }
            None => false,
        }
    }

    /// Returns `true` if the node is a member.
    #[must_use]
    pub fn contains(&self, node: NodeId) -> bool {
        let (word, bit) = (node.index() / 64, node.index() % 64);
        self.words
            .get(word)
            .is_some_and(|w| (w & (1u64 << bit)) != 0)
    }

    /// Adds every member of `other`. Returns `true` if `self` changed.
    pub fn union_with(&mut self, other: &NodeSet) -> bool {
        if other.words.len() > self.words.len() {
            self.words.resize(other.words.len(), 0);
        }
        let mut changed = false;
        for (a, b) in self.words.iter_mut().zip(other.words.iter()) {
            let old = *a;
            *a |= *b;
            changed |= old != *a;
        }
        changed
    }

    /// Keeps only members also in `other`. Returns `true` if `self` changed.
    pub fn intersect_with(&mut self, other: &NodeSet) -> bool {
        let mut changed = false;
        for (i, a) in self.words.iter_mut().enumerate() {
            let old = *a;
            *a &= other.words.get(i).copied().unwrap_or(0);
            changed |= old != *a;
        }
        changed
    }

    /// Removes every member of `other`. Returns `true` if `self` changed.
    pub fn difference_with(&mut self, other: &NodeSet) -> bool {
        let mut changed = false;
        for (a, b) in self.words.iter_mut().zip(other.words.iter()) {
            let old = *a;
            *a &= !*b;
            changed |= old != *a;
        }
        changed
    }

    /// Returns `true` if every member of `self` is in `other`.
    #[must_use]
    pub fn is_subset(&self, other: &NodeSet) -> bool {
        self.words
            .iter()
            .enumerate()
            .all(|(i, &w)| w & !other.words.get(i).copied().unwrap_or(0) == 0)
    }

    /// Returns `true` if the two sets share a member.
    #[must_use]
    pub fn intersects(&self, other: &NodeSet) -> bool {
        self.words
            .iter()
            .zip(other.words.iter())
            .any(|(a, b)| a & b != 0)
    }

    /// Iterates over the members in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.words.iter().enumerate().flat_map(|(wi, &word)| {
            (0..64)
                .filter(move |bit| word & (1u64 << bit) != 0)
                .map(move |bit| NodeId::new(wi * 64 + bit))
        })
    }
}

impl PartialEq for NodeSet {
    fn eq(&self, other: &Self) -> bool {
        let longest = self.words.len().max(other.words.len());
        (0..longest).all(|i| {
            self.words.get(i).copied().unwrap_or(0) == other.words.get(i).copied().unwrap_or(0)
        })
    }
}

impl Eq for NodeSet {}

impl FromIterator<NodeId> for NodeSet {
    fn from_iter<T: IntoIterator<Item = NodeId>>(iter: T) -> Self {
        let mut set = NodeSet::new();
        for node in iter {
            set.insert(node);
        }
        set
    }
}

impl Extend<NodeId> for NodeSet {
    fn extend<T: IntoIterator<Item = NodeId>>(&mut self, iter: T) {
        for node in iter {
            self.insert(node);
        }
    }
}

impl fmt::Debug for NodeSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(ids: &[usize]) -> NodeSet {
        ids.iter().map(|&i| NodeId::new(i)).collect()
    }

    #[test]
    fn test_insert_grows() {
        let mut s = NodeSet::new();
        assert!(s.insert(NodeId::new(130)));
        assert!(!s.insert(NodeId::new(130)));
        assert!(s.contains(NodeId::new(130)));
        assert!(!s.contains(NodeId::new(129)));
        assert!(!s.contains(NodeId::new(10_000)));
        assert_eq!(s.len(), 1);
    }

    #[test]
    fn test_set_operations() {
        let mut a = set(&[1, 2, 3, 70]);
        let b = set(&[2, 70, 200]);

        assert!(a.intersects(&b));
        assert!(!a.is_subset(&b));

        let mut i = a.clone();
        i.intersect_with(&b);
        assert_eq!(i, set(&[2, 70]));
        assert!(i.is_subset(&a));

        let mut d = a.clone();
        d.difference_with(&b);
        assert_eq!(d, set(&[1, 3]));

        assert!(a.union_with(&b));
        assert_eq!(a, set(&[1, 2, 3, 70, 200]));
        assert!(!a.union_with(&b));
    }

    #[test]
    fn test_equality_ignores_trailing_words() {
        let mut a = set(&[1, 300]);
        a.remove(NodeId::new(300));
        assert_eq!(a, set(&[1]));
        assert_eq!(
            a.iter().collect::<Vec<_>>(),
            vec![NodeId::new(1)]
        );
    }
}
