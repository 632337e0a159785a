use std::collections::{BTreeMap, HashMap};
use std::ops::Bound;
use std::sync::Arc;

use super::node::NodeId;
use crate::dns::name::Name;
use crate::errors::ZoneError;

/**
Canonical-order index of owner names to arena nodes.

`Name`'s `Ord` is the RFC 4034 canonical ordering, so the B-tree walks
the zone in canonical order and `find_less_equal` answers predecessor
queries directly.  The hash index gives O(1) exact lookups; the tree
stays authoritative for everything order-related.  Duplicate owners
are rejected.
*/
#[derive(Debug, Clone, Default)]
pub struct ZoneTree {
    by_name: BTreeMap<Arc<Name>, NodeId>,
    index: HashMap<Arc<Name>, NodeId>,
}

/// Outcome of `find_less_equal`: whether the name itself is present,
/// and the node at or canonically before it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LesserOrEqual {
    pub matched: bool,
    pub node: Option<NodeId>,
}

impl ZoneTree {
    pub fn new() -> Self {
        ZoneTree::default()
    }

    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }

    pub fn insert(&mut self, name: Arc<Name>, id: NodeId) -> Result<(), ZoneError> {
        if self.index.contains_key(&*name) {
            return Err(ZoneError::DuplicateNode);
        }
        self.by_name.insert(name.clone(), id);
        self.index.insert(name, id);
        Ok(())
    }

    pub fn remove(&mut self, name: &Name) -> Option<NodeId> {
        self.index.remove(name);
        self.by_name.remove(name)
    }

    /// Exact match through the hash index.
    pub fn get(&self, name: &Name) -> Option<NodeId> {
        self.index.get(name).copied()
    }

    /// The central lookup primitive: exact hit plus canonical
    /// predecessor in one walk.
    pub fn find_less_equal(&self, name: &Name) -> LesserOrEqual {
        match self
            .by_name
            .range::<Name, _>((Bound::Unbounded, Bound::Included(name)))
            .next_back()
        {
            Some((found, &id)) => LesserOrEqual {
                matched: &**found == name,
                node: Some(id),
            },
            None => LesserOrEqual {
                matched: false,
                node: None,
            },
        }
    }

    /// Strict canonical predecessor, wrapping past the first name to
    /// the last; the tree is circular for previous-name queries.
    pub fn previous(&self, name: &Name) -> Option<NodeId> {
        self.by_name
            .range::<Name, _>((Bound::Unbounded, Bound::Excluded(name)))
            .next_back()
            .map(|(_, &id)| id)
            .or_else(|| self.last())
    }

    /// Strict canonical successor of `name`, without wrapping.
    pub fn next_after(&self, name: &Name) -> Option<NodeId> {
        self.by_name
            .range::<Name, _>((Bound::Excluded(name), Bound::Unbounded))
            .next()
            .map(|(_, &id)| id)
    }

    pub fn first(&self) -> Option<NodeId> {
        self.by_name.values().next().copied()
    }

    pub fn last(&self) -> Option<NodeId> {
        self.by_name.values().next_back().copied()
    }

    /// In-order (canonical) traversal.
    pub fn iter(&self) -> impl Iterator<Item = (&Arc<Name>, NodeId)> + '_ {
        self.by_name.iter().map(|(name, &id)| (name, id))
    }

    /// Reverse canonical traversal.
    pub fn iter_rev(&self) -> impl Iterator<Item = (&Arc<Name>, NodeId)> + '_ {
        self.by_name.iter().rev().map(|(name, &id)| (name, id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tree_of(names: &[&str]) -> ZoneTree {
        let mut tree = ZoneTree::new();
        for (id, text) in names.iter().enumerate() {
            tree.insert(Arc::new(Name::from_text(text).unwrap()), id)
                .unwrap();
        }
        tree
    }

    #[test]
    fn test_insert_rejects_duplicates() {
        let mut tree = tree_of(&["example.com."]);
        assert_eq!(
            Err(ZoneError::DuplicateNode),
            tree.insert(Arc::new(Name::from_text("EXAMPLE.com.").unwrap()), 9)
        );
    }

    #[test]
    fn test_find_less_equal() {
        let tree = tree_of(&["example.com.", "a.example.com.", "m.example.com."]);

        let hit = tree.find_less_equal(&Name::from_text("a.example.com.").unwrap());
        assert!(hit.matched);
        assert_eq!(Some(1), hit.node);

        // between "a" and "m" in canonical order
        let miss = tree.find_less_equal(&Name::from_text("b.example.com.").unwrap());
        assert!(!miss.matched);
        assert_eq!(Some(1), miss.node);

        // before everything
        let below = tree.find_less_equal(&Name::from_text("com.").unwrap());
        assert!(!below.matched);
        assert_eq!(None, below.node);
    }

    #[test]
    fn test_previous_wraps() {
        let tree = tree_of(&["example.com.", "a.example.com.", "m.example.com."]);
        // the apex is canonically first; its predecessor wraps to the last
        assert_eq!(
            Some(2),
            tree.previous(&Name::from_text("example.com.").unwrap())
        );
        assert_eq!(
            Some(0),
            tree.previous(&Name::from_text("a.example.com.").unwrap())
        );
    }

    #[test]
    fn test_iteration_is_canonical() {
        let tree = tree_of(&["m.example.com.", "example.com.", "a.example.com."]);
        let order: Vec<String> = tree.iter().map(|(n, _)| n.to_string()).collect();
        assert_eq!(
            vec!["example.com.", "a.example.com.", "m.example.com."],
            order
        );

        let reversed: Vec<String> = tree.iter_rev().map(|(n, _)| n.to_string()).collect();
        assert_eq!(
            vec!["m.example.com.", "a.example.com.", "example.com."],
            reversed
        );
    }

    #[test]
    fn test_next_after_finds_descendants() {
        let tree = tree_of(&["example.com.", "sub.example.com.", "x.sub.example.com."]);
        let after = tree.next_after(&Name::from_text("sub.example.com.").unwrap());
        assert_eq!(Some(2), after);
    }
}
