//! Archetype buckets.

use std::collections::BTreeMap;
use std::ops::Bound;

use crate::component::ComponentMap;
use crate::entity::EntityId;

/// The entities of one archetype and their component maps.
///
/// Kept ordered by entity id so a query cursor can resume after the last
/// entity it yielded, whatever happened to the bucket in between.
#[derive(Default)]
pub(crate) struct Bucket {
    entities: BTreeMap<EntityId, ComponentMap>,
}

impl Bucket {
    pub(crate) fn insert(&mut self, entity: EntityId, components: ComponentMap) {
        self.entities.insert(entity, components);
    }

    pub(crate) fn remove(&mut self, entity: EntityId) -> Option<ComponentMap> {
        self.entities.remove(&entity)
    }

    pub(crate) fn get(&self, entity: EntityId) -> Option<&ComponentMap> {
        self.entities.get(&entity)
    }

    pub(crate) fn get_mut(&mut self, entity: EntityId) -> Option<&mut ComponentMap> {
        self.entities.get_mut(&entity)
    }

    /// Entities with an id greater than `after`, or all of them.
    pub(crate) fn after(
        &self,
        after: Option<EntityId>,
    ) -> impl Iterator<Item = (EntityId, &ComponentMap)> + '_ {
        let lower = after.map_or(Bound::Unbounded, Bound::Excluded);
        self.entities
            .range((lower, Bound::Unbounded))
            .map(|(&entity, components)| (entity, components))
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = (EntityId, &ComponentMap)> + '_ {
        self.after(None)
    }

    pub(crate) fn len(&self) -> usize {
        self.entities.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }
}
