//! Archetype keys and compatibility.
//!
//! An archetype identifies an unordered set of component types. The index
//! hands out one [`ArchetypeId`] per distinct set, no matter in which order
//! or with how many duplicates the set is described, and answers "does
//! archetype A hold every component of archetype B" with a per-pair cache.
//!
//! Lookups go through a trie keyed on the component ids in the order they
//! were given, so describing the same set the same way twice never sorts.

use std::fmt;

use rustc_hash::FxHashMap;
use smallvec::SmallVec;

use crate::component::ComponentId;

/// Sorted, duplicate-free component list.
pub type ComponentSetKey = SmallVec<[ComponentId; 8]>;

/// Unique identifier for an archetype.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ArchetypeId(u32);

impl ArchetypeId {
    /// Create an archetype ID from a raw value.
    #[must_use]
    pub const fn from_raw(id: u32) -> Self {
        Self(id)
    }

    /// Get the raw ID value.
    #[must_use]
    pub const fn as_raw(self) -> u32 {
        self.0
    }
}

impl fmt::Debug for ArchetypeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ArchetypeId({})", self.0)
    }
}

#[derive(Default)]
struct TrieNode {
    children: FxHashMap<ComponentId, usize>,
    archetype: Option<ArchetypeId>,
}

/// Interns component sets and caches compatibility between them.
pub struct ArchetypeIndex {
    /// Node 0 is the root.
    trie: Vec<TrieNode>,
    interned: FxHashMap<ComponentSetKey, ArchetypeId>,
    /// Component lists indexed by archetype id.
    archetypes: Vec<ComponentSetKey>,
    compatibility: FxHashMap<(ArchetypeId, ArchetypeId), bool>,
}

impl ArchetypeIndex {
    #[must_use]
    pub fn new() -> Self {
        Self {
            trie: vec![TrieNode::default()],
            interned: FxHashMap::default(),
            archetypes: Vec::new(),
            compatibility: FxHashMap::default(),
        }
    }

    /// Archetype of the given component set.
    pub fn archetype_of(&mut self, components: &[ComponentId]) -> ArchetypeId {
        let mut node = 0;
        for &component in components {
            node = match self.trie[node].children.get(&component) {
                Some(&child) => child,
                None => {
                    let child = self.trie.len();
                    self.trie.push(TrieNode::default());
                    self.trie[node].children.insert(component, child);
                    child
                }
            };
        }

        if let Some(archetype) = self.trie[node].archetype {
            return archetype;
        }

        let archetype = self.intern(components);
        self.trie[node].archetype = Some(archetype);
        archetype
    }

    fn intern(&mut self, components: &[ComponentId]) -> ArchetypeId {
        let mut key: ComponentSetKey = components.iter().copied().collect();
        key.sort_unstable();
        key.dedup();

        if let Some(&archetype) = self.interned.get(&key) {
            return archetype;
        }

        let archetype = ArchetypeId(self.archetypes.len() as u32);
        self.archetypes.push(key.clone());
        self.interned.insert(key, archetype);
        archetype
    }

    /// `true` iff `target` holds every component of `query`. Not symmetric.
    pub fn are_compatible(&mut self, query: ArchetypeId, target: ArchetypeId) -> bool {
        let archetypes = &self.archetypes;
        *self
            .compatibility
            .entry((query, target))
            .or_insert_with(|| {
                let wanted = archetypes.get(query.0 as usize).map_or(&[][..], |c| c.as_slice());
                let held = archetypes.get(target.0 as usize).map_or(&[][..], |c| c.as_slice());
                wanted.iter().all(|c| held.binary_search(c).is_ok())
            })
    }

    /// Sorted component list of an archetype.
    #[must_use]
    pub fn components(&self, archetype: ArchetypeId) -> &[ComponentId] {
        self.archetypes
            .get(archetype.0 as usize)
            .map_or(&[], |components| components.as_slice())
    }

    #[must_use]
    pub fn contains(&self, archetype: ArchetypeId, component: ComponentId) -> bool {
        self.components(archetype).binary_search(&component).is_ok()
    }

    /// Number of distinct archetypes seen.
    #[must_use]
    pub fn len(&self) -> usize {
        self.archetypes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.archetypes.is_empty()
    }
}

impl Default for ArchetypeIndex {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ArchetypeIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ArchetypeIndex")
            .field("archetypes", &self.archetypes.len())
            .field("trie_nodes", &self.trie.len())
            .field("cached_pairs", &self.compatibility.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(raw: &[u32]) -> Vec<ComponentId> {
        raw.iter().copied().map(ComponentId::from_raw).collect()
    }

    #[test]
    fn test_permutation_invariant() {
        let mut index = ArchetypeIndex::new();

        let abc = index.archetype_of(&ids(&[1, 2, 3]));
        assert_eq!(index.archetype_of(&ids(&[3, 1, 2])), abc);
        assert_eq!(index.archetype_of(&ids(&[2, 3, 1])), abc);
        assert_eq!(index.archetype_of(&ids(&[1, 2, 3])), abc);
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn test_duplicates_collapse() {
        let mut index = ArchetypeIndex::new();

        let ab = index.archetype_of(&ids(&[1, 2]));
        assert_eq!(index.archetype_of(&ids(&[2, 1, 2, 1])), ab);
        assert_eq!(index.components(ab), ids(&[1, 2]).as_slice());
    }

    #[test]
    fn test_distinct_sets_distinct_keys() {
        let mut index = ArchetypeIndex::new();

        let empty = index.archetype_of(&[]);
        let a = index.archetype_of(&ids(&[1]));
        let ab = index.archetype_of(&ids(&[1, 2]));

        assert_ne!(empty, a);
        assert_ne!(a, ab);
        assert!(index.components(empty).is_empty());
        assert_eq!(index.len(), 3);
    }

    #[test]
    fn test_compatibility_is_superset_test() {
        let mut index = ArchetypeIndex::new();

        let a = index.archetype_of(&ids(&[1]));
        let ab = index.archetype_of(&ids(&[1, 2]));
        let ac = index.archetype_of(&ids(&[1, 3]));
        let empty = index.archetype_of(&[]);

        assert!(index.are_compatible(a, ab));
        assert!(!index.are_compatible(ab, a));
        assert!(!index.are_compatible(ab, ac));
        assert!(index.are_compatible(ab, ab));
        assert!(index.are_compatible(empty, ac));

        // cached answers stay the same
        assert!(index.are_compatible(a, ab));
        assert!(!index.are_compatible(ab, a));
    }

    #[test]
    fn test_contains() {
        let mut index = ArchetypeIndex::new();
        let ab = index.archetype_of(&ids(&[4, 2]));

        assert!(index.contains(ab, ComponentId::from_raw(2)));
        assert!(index.contains(ab, ComponentId::from_raw(4)));
        assert!(!index.contains(ab, ComponentId::from_raw(3)));
    }
}
