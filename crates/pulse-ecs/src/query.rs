//! Query cursors over archetype buckets.
//!
//! A [`QueryResult`] is a detached cursor: it remembers which compatible
//! buckets exist, which bucket it is walking and the last entity it
//! yielded, but it does not borrow the world. Each step takes the world as
//! an argument, so the world can be mutated between steps.
//!
//! # Basic Usage
//!
//! ```
//! use pulse_ecs::{Component, World};
//!
//! #[derive(Component)]
//! struct Position(i32, i32);
//! #[derive(Component)]
//! struct Frozen;
//!
//! let mut world = World::new();
//! world.spawn(Position(0, 0)).unwrap();
//! world.spawn((Position(1, 1), Frozen)).unwrap();
//!
//! let mut moving = world.query::<Position>().without::<Frozen>();
//! while let Some((entity, pos)) = moving.next(&world) {
//!     world.insert(entity, Position(pos.0 + 1, pos.1)).unwrap();
//! }
//! ```
//!
//! # Iterator invalidation
//!
//! Buckets are walked in ascending entity-id order. Between steps it is
//! always safe to despawn entities, to insert components the entity already
//! holds, and to remove components so that the entity no longer matches.
//! Removing a component while the entity still matches moves it to another
//! bucket, where it may be yielded a second time. Whether entities that
//! start matching mid-iteration are seen is unspecified.

use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use smallvec::SmallVec;

use crate::archetype::ArchetypeId;
use crate::bundle::ComponentSet;
use crate::component::ComponentId;
use crate::entity::EntityId;
use crate::world::World;

// ============================================================================
// QueryResult - detached cursor
// ============================================================================

/// Lazy cursor over every entity holding all of `Q`.
pub struct QueryResult<Q: ComponentSet> {
    /// Compatible buckets in ascending archetype order; `None` when nothing
    /// was compatible at query time.
    archetypes: Option<Arc<Vec<ArchetypeId>>>,
    position: usize,
    last: Option<EntityId>,
    without: SmallVec<[ComponentId; 4]>,
    _marker: PhantomData<fn() -> Q>,
}

impl<Q: ComponentSet> QueryResult<Q> {
    pub(crate) fn new(archetypes: Arc<Vec<ArchetypeId>>) -> Self {
        if archetypes.is_empty() {
            return Self::empty();
        }
        Self {
            archetypes: Some(archetypes),
            position: 0,
            last: None,
            without: SmallVec::new(),
            _marker: PhantomData,
        }
    }

    /// A cursor that yields nothing.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            archetypes: None,
            position: 0,
            last: None,
            without: SmallVec::new(),
            _marker: PhantomData,
        }
    }

    /// Skip entities that hold any of `W`, checked as each entity is
    /// reached.
    #[must_use]
    pub fn without<W: ComponentSet>(mut self) -> Self {
        self.without.extend(W::ids());
        self
    }

    /// `true` if no bucket was compatible when the query was made.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.archetypes.is_none()
    }

    /// Advance to the next matching entity.
    pub fn next(&mut self, world: &World) -> Option<(EntityId, Q::Item)> {
        let Self {
            archetypes,
            position,
            last,
            without,
            ..
        } = self;
        let archetypes = archetypes.as_deref()?;

        while let Some(&archetype) = archetypes.get(*position) {
            if let Some(bucket) = world.bucket(archetype) {
                for (entity, components) in bucket.after(*last) {
                    *last = Some(entity);

                    if without.iter().any(|c| components.contains_key(c)) {
                        continue;
                    }
                    if let Some(item) = Q::fetch(&mut |id| components.get(&id).cloned()) {
                        return Some((entity, item));
                    }
                }
            }

            *position += 1;
            *last = None;
        }

        None
    }

    /// Borrowing iterator over the remaining matches.
    pub fn iter(self, world: &World) -> QueryIter<'_, Q> {
        QueryIter {
            world,
            cursor: self,
        }
    }

    /// Collect the remaining matches.
    pub fn collect_all(self, world: &World) -> Vec<(EntityId, Q::Item)> {
        self.iter(world).collect()
    }
}

impl<Q: ComponentSet> fmt::Debug for QueryResult<Q> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryResult")
            .field("buckets", &self.archetypes.as_ref().map_or(0, |a| a.len()))
            .field("position", &self.position)
            .field("last", &self.last)
            .field("without", &self.without)
            .finish()
    }
}

// ============================================================================
// QueryIter - borrowing adapter
// ============================================================================

/// [`Iterator`] over a [`QueryResult`] that holds the world borrowed.
pub struct QueryIter<'w, Q: ComponentSet> {
    world: &'w World,
    cursor: QueryResult<Q>,
}

impl<Q: ComponentSet> Iterator for QueryIter<'_, Q> {
    type Item = (EntityId, Q::Item);

    fn next(&mut self) -> Option<Self::Item> {
        self.cursor.next(self.world)
    }
}

impl<Q: ComponentSet> fmt::Debug for QueryIter<'_, Q> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryIter")
            .field("cursor", &self.cursor)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::component::Component;

    #[derive(Debug, PartialEq)]
    struct A(u32);
    impl Component for A {}

    struct B;
    impl Component for B {}

    struct C;
    impl Component for C {}

    fn entities<Q: ComponentSet>(world: &mut World) -> Vec<EntityId> {
        world.query::<Q>().iter(world).map(|(e, _)| e).collect()
    }

    #[test]
    fn test_query_spans_compatible_buckets() {
        let mut world = World::new();
        let a = world.spawn(A(1)).unwrap();
        let ab = world.spawn((A(2), B)).unwrap();
        let _b = world.spawn(B).unwrap();
        let ac = world.spawn((C, A(3))).unwrap();

        let mut found = entities::<A>(&mut world);
        found.sort();
        assert_eq!(found, vec![a, ab, ac]);

        assert_eq!(entities::<(A, B)>(&mut world), vec![ab]);
        assert!(entities::<(A, B, C)>(&mut world).is_empty());
    }

    #[test]
    fn test_query_items() {
        let mut world = World::new();
        world.spawn((A(7), B)).unwrap();

        let items = world.query::<(A, B)>().collect_all(&world);
        assert_eq!(items.len(), 1);
        assert_eq!(*items[0].1.0, A(7));
    }

    #[test]
    fn test_without_filters_per_entity() {
        let mut world = World::new();
        let plain = world.spawn(A(1)).unwrap();
        let tagged = world.spawn((A(2), C)).unwrap();

        let mut query = world.query::<A>().without::<C>();
        assert_eq!(query.next(&world).map(|(e, _)| e), Some(plain));
        assert!(query.next(&world).is_none());

        let query = world.query::<A>().without::<B>();
        world.remove::<C>(tagged).unwrap();
        let mut left: Vec<_> = query.iter(&world).map(|(e, _)| e).collect();
        left.sort();
        assert_eq!(left, vec![plain, tagged]);
    }

    #[test]
    fn test_empty_query_is_shared_empty_cursor() {
        let mut world = World::new();
        world.spawn(A(1)).unwrap();

        let mut query = world.query::<C>();
        assert!(query.is_empty());
        assert!(query.next(&world).is_none());
    }

    #[test]
    fn test_despawn_during_iteration_is_safe() {
        let mut world = World::new();
        let ids: Vec<_> = (0..5).map(|n| world.spawn(A(n)).unwrap()).collect();

        let mut seen = Vec::new();
        let mut query = world.query::<A>();
        while let Some((entity, _)) = query.next(&world) {
            seen.push(entity);
            if let Some(&next) = ids.iter().find(|&&id| id > entity) {
                world.despawn(next).unwrap();
            }
        }

        assert_eq!(seen, vec![ids[0], ids[2], ids[4]]);
    }

    #[test]
    fn test_removing_matched_component_is_safe() {
        let mut world = World::new();
        for n in 0..4 {
            world.spawn((A(n), B)).unwrap();
        }

        let mut count = 0;
        let mut query = world.query::<(A, B)>();
        while let Some((entity, _)) = query.next(&world) {
            world.remove::<B>(entity).unwrap();
            count += 1;
        }

        assert_eq!(count, 4);
        assert!(entities::<(A, B)>(&mut world).is_empty());
    }
}
