//! World - the entity store.
//!
//! The World owns every entity and its components. Entities with the same
//! set of component types share an archetype bucket; queries resolve to the
//! list of buckets whose archetype holds every requested type, and that list
//! is cached per requested set and extended whenever a new bucket appears.
//!
//! Every mutation that changes a component value is reported to the change
//! subscriptions created by [`World::query_changed`].

use std::fmt;
use std::sync::Arc;

use pulse_hooks::{Discriminator, HookRuntime};
use rustc_hash::FxHashMap;
use smallvec::SmallVec;
use tracing::{debug, trace};

use crate::archetype::{ArchetypeId, ArchetypeIndex};
use crate::bundle::{Bundle, ComponentSet};
use crate::change::{ChangeRecord, ChangeTrackers, ChangedIter, SharedQueue};
use crate::component::{Component, ComponentId, ComponentMap, ComponentValue};
use crate::entity::EntityId;
use crate::error::{WorldError, WorldResult};
use crate::query::QueryResult;
use crate::storage::Bucket;

/// Hook state behind one `query_changed` call site.
#[derive(Default)]
struct ChangeSubscription {
    queue: Option<SharedQueue>,
}

/// The entity store.
pub struct World {
    archetypes: ArchetypeIndex,
    /// Buckets are never removed, only emptied.
    buckets: FxHashMap<ArchetypeId, Bucket>,
    locations: FxHashMap<EntityId, ArchetypeId>,
    next_id: EntityId,
    /// Compatible buckets per requested archetype, ascending.
    query_cache: FxHashMap<ArchetypeId, Arc<Vec<ArchetypeId>>>,
    trackers: ChangeTrackers,
}

impl Default for World {
    fn default() -> Self {
        Self::new()
    }
}

impl World {
    /// Create an empty world.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(0)
    }

    /// Create an empty world with room for `entities` live entities.
    #[must_use]
    pub fn with_capacity(entities: usize) -> Self {
        let mut locations = FxHashMap::default();
        locations.reserve(entities);
        Self {
            archetypes: ArchetypeIndex::new(),
            buckets: FxHashMap::default(),
            locations,
            next_id: EntityId::from_raw(0),
            query_cache: FxHashMap::default(),
            trackers: ChangeTrackers::default(),
        }
    }

    // ========================================================================
    // Entity lifecycle
    // ========================================================================

    /// Spawn a new entity with the given components.
    pub fn spawn<B: Bundle>(&mut self, bundle: B) -> WorldResult<EntityId> {
        let components = unique_components(bundle)?;
        let entity = self.next_id;
        self.next_id = entity.next();
        self.spawn_filed(entity, components);
        Ok(entity)
    }

    /// Spawn an entity with a caller-chosen id.
    ///
    /// Later [`spawn`](Self::spawn) calls continue after the highest id used.
    pub fn spawn_at<B: Bundle>(&mut self, entity: EntityId, bundle: B) -> WorldResult<()> {
        if self.contains(entity) {
            return Err(WorldError::EntityExists(entity));
        }
        let components = unique_components(bundle)?;
        if entity >= self.next_id {
            self.next_id = entity.next();
        }
        self.spawn_filed(entity, components);
        Ok(())
    }

    fn spawn_filed(&mut self, entity: EntityId, components: ComponentMap) {
        for (&component, value) in &components {
            self.trackers.record(entity, component, None, Some(value));
        }
        self.file(entity, components);
    }

    /// Replace every component of `entity` with `bundle`.
    ///
    /// Types the entity held that are not in `bundle` are removed.
    pub fn replace<B: Bundle>(&mut self, entity: EntityId, bundle: B) -> WorldResult<()> {
        if !self.contains(entity) {
            return Err(WorldError::UnknownEntity(entity));
        }
        let components = unique_components(bundle)?;
        let old = self.unfile(entity).unwrap_or_default();

        for (&component, value) in &components {
            self.trackers
                .record(entity, component, old.get(&component), Some(value));
        }
        for (&component, value) in &old {
            if !components.contains_key(&component) {
                self.trackers.record(entity, component, Some(value), None);
            }
        }

        self.file(entity, components);
        Ok(())
    }

    /// Despawn an entity. Its id is never handed out again by `spawn`.
    pub fn despawn(&mut self, entity: EntityId) -> WorldResult<()> {
        let components = self
            .unfile(entity)
            .ok_or(WorldError::UnknownEntity(entity))?;

        for (&component, value) in &components {
            self.trackers.record(entity, component, Some(value), None);
        }
        Ok(())
    }

    /// Drop every entity without notifying change subscriptions.
    ///
    /// Archetype keys and change subscriptions survive; buckets and the query
    /// cache do not.
    pub fn clear(&mut self) {
        debug!(entities = self.locations.len(), "clearing world");
        self.buckets.clear();
        self.locations.clear();
        self.query_cache.clear();
    }

    /// `true` if `entity` is live.
    #[must_use]
    pub fn contains(&self, entity: EntityId) -> bool {
        self.locations.contains_key(&entity)
    }

    /// Number of live entities.
    #[must_use]
    pub fn len(&self) -> usize {
        self.locations.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.locations.is_empty()
    }

    /// Ids of all live entities, bucket by bucket in archetype creation
    /// order and ascending within a bucket.
    pub fn entities(&self) -> impl Iterator<Item = EntityId> + '_ {
        self.buckets_in_order()
            .flat_map(|(_, bucket)| bucket.iter().map(|(entity, _)| entity))
    }

    // ========================================================================
    // Component access
    // ========================================================================

    /// Read components of an entity; each member of `Q` is `None` if not
    /// held.
    pub fn get<Q: ComponentSet>(&self, entity: EntityId) -> WorldResult<Q::Maybe> {
        let components = self
            .components_of(entity)
            .ok_or(WorldError::UnknownEntity(entity))?;
        Ok(Q::fetch_each(&mut |id| components.get(&id).cloned()))
    }

    /// `true` if `entity` is live and holds a `T`.
    #[must_use]
    pub fn has<T: Component>(&self, entity: EntityId) -> bool {
        self.components_of(entity)
            .is_some_and(|components| components.contains_key(&ComponentId::of::<T>()))
    }

    /// Add or overwrite components on an entity.
    ///
    /// The entity only moves to another bucket if it gained a type.
    pub fn insert<B: Bundle>(&mut self, entity: EntityId, bundle: B) -> WorldResult<()> {
        let incoming = bundle.into_values();
        let components = self
            .locations
            .get(&entity)
            .and_then(|archetype| self.buckets.get_mut(archetype))
            .and_then(|bucket| bucket.get_mut(entity))
            .ok_or(WorldError::UnknownEntity(entity))?;

        let mut gained = false;
        for (component, value) in incoming {
            let old = components.insert(component, Arc::clone(&value));
            gained |= old.is_none();
            self.trackers
                .record(entity, component, old.as_ref(), Some(&value));
        }

        if gained {
            self.refile(entity);
        }
        Ok(())
    }

    /// Remove components from an entity, returning what it held.
    ///
    /// The entity is always re-filed, even if nothing was held.
    pub fn remove<Q: ComponentSet>(&mut self, entity: EntityId) -> WorldResult<Q::Maybe> {
        let components = self
            .locations
            .get(&entity)
            .and_then(|archetype| self.buckets.get_mut(archetype))
            .and_then(|bucket| bucket.get_mut(entity))
            .ok_or(WorldError::UnknownEntity(entity))?;

        let mut removed = ComponentMap::default();
        for component in Q::ids() {
            if let Some(old) = components.remove(&component) {
                self.trackers.record(entity, component, Some(&old), None);
                removed.insert(component, old);
            }
        }

        self.refile(entity);
        Ok(Q::fetch_each(&mut |id| removed.get(&id).cloned()))
    }

    // ========================================================================
    // Queries
    // ========================================================================

    /// Cursor over every entity holding all of `Q`.
    pub fn query<Q: ComponentSet>(&mut self) -> QueryResult<Q> {
        let requested = self.archetypes.archetype_of(&Q::ids());
        QueryResult::new(self.compatible_buckets(requested))
    }

    /// Drain the changes to `T` since this call site last ran.
    ///
    /// The first call from a call site subscribes and reports every entity
    /// that currently holds a `T` as added. The subscription lives in the
    /// calling frame's hook storage and ends when the call site stops
    /// running.
    ///
    /// # Panics
    ///
    /// Panics when called outside of a hook frame.
    #[track_caller]
    pub fn query_changed<'w, T: Component>(
        &'w mut self,
        hooks: &mut HookRuntime,
    ) -> impl Iterator<Item = (EntityId, ChangeRecord<T>)> + use<'w, T> {
        self.query_changed_with::<T, ()>(hooks)
            .map(|(entity, change, ())| (entity, change))
    }

    /// Like [`query_changed`](Self::query_changed), skipping entities that
    /// are despawned or do not hold every member of `F` at drain time.
    ///
    /// # Panics
    ///
    /// Panics when called outside of a hook frame.
    #[track_caller]
    pub fn query_changed_with<T: Component, F: ComponentSet>(
        &mut self,
        hooks: &mut HookRuntime,
    ) -> ChangedIter<'_, T, F> {
        let component = ComponentId::of::<T>();
        let subscription =
            hooks.use_hook_state::<ChangeSubscription>(Some(Discriminator::of(&component)));

        let queue = match &subscription.queue {
            Some(queue) => Arc::clone(queue),
            None => {
                let holders = self.holders_of(component);
                let queue = self.trackers.subscribe(component, holders);
                subscription.queue = Some(Arc::clone(&queue));
                queue
            }
        };

        ChangedIter::new(self, queue)
    }

    // ========================================================================
    // Introspection
    // ========================================================================

    /// Current archetype of a live entity.
    #[must_use]
    pub fn archetype_of(&self, entity: EntityId) -> Option<ArchetypeId> {
        self.locations.get(&entity).copied()
    }

    /// Component types of an archetype, sorted by id.
    #[must_use]
    pub fn archetype_components(&self, archetype: ArchetypeId) -> &[ComponentId] {
        self.archetypes.components(archetype)
    }

    /// Number of buckets created so far, empty ones included.
    #[must_use]
    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }

    // ========================================================================
    // Internals
    // ========================================================================

    pub(crate) fn bucket(&self, archetype: ArchetypeId) -> Option<&Bucket> {
        self.buckets.get(&archetype)
    }

    pub(crate) fn components_of(&self, entity: EntityId) -> Option<&ComponentMap> {
        let archetype = self.locations.get(&entity)?;
        self.buckets.get(archetype)?.get(entity)
    }

    fn buckets_in_order(&self) -> impl Iterator<Item = (ArchetypeId, &Bucket)> + '_ {
        let mut archetypes: Vec<ArchetypeId> = self.buckets.keys().copied().collect();
        archetypes.sort_unstable();

        archetypes.into_iter().filter_map(move |archetype| {
            self.buckets.get(&archetype).map(|bucket| (archetype, bucket))
        })
    }

    /// Every live holder of `component`, bucket by bucket.
    fn holders_of(&self, component: ComponentId) -> Vec<(EntityId, ComponentValue)> {
        self.buckets_in_order()
            .filter(|&(archetype, _)| self.archetypes.contains(archetype, component))
            .flat_map(|(_, bucket)| bucket.iter())
            .filter_map(|(entity, components)| {
                components
                    .get(&component)
                    .map(|value| (entity, Arc::clone(value)))
            })
            .collect()
    }

    fn file(&mut self, entity: EntityId, components: ComponentMap) {
        let ids: SmallVec<[ComponentId; 8]> = components.keys().copied().collect();
        let archetype = self.archetypes.archetype_of(&ids);

        if !self.buckets.contains_key(&archetype) {
            self.create_bucket(archetype);
        }
        if let Some(bucket) = self.buckets.get_mut(&archetype) {
            bucket.insert(entity, components);
        }
        self.locations.insert(entity, archetype);
    }

    fn unfile(&mut self, entity: EntityId) -> Option<ComponentMap> {
        let archetype = self.locations.remove(&entity)?;
        self.buckets.get_mut(&archetype)?.remove(entity)
    }

    fn refile(&mut self, entity: EntityId) {
        if let Some(components) = self.unfile(entity) {
            self.file(entity, components);
        }
    }

    fn create_bucket(&mut self, archetype: ArchetypeId) {
        trace!(
            ?archetype,
            components = ?self.archetypes.components(archetype),
            "creating bucket"
        );

        for (&requested, compatible) in &mut self.query_cache {
            if self.archetypes.are_compatible(requested, archetype) {
                let compatible = Arc::make_mut(compatible);
                if let Err(at) = compatible.binary_search(&archetype) {
                    compatible.insert(at, archetype);
                }
            }
        }

        self.buckets.insert(archetype, Bucket::default());
    }

    fn compatible_buckets(&mut self, requested: ArchetypeId) -> Arc<Vec<ArchetypeId>> {
        if let Some(compatible) = self.query_cache.get(&requested) {
            return Arc::clone(compatible);
        }

        let archetypes = &mut self.archetypes;
        let mut compatible: Vec<ArchetypeId> = self
            .buckets
            .keys()
            .copied()
            .filter(|&target| archetypes.are_compatible(requested, target))
            .collect();
        compatible.sort_unstable();

        trace!(
            ?requested,
            buckets = compatible.len(),
            "caching compatible buckets"
        );

        let compatible = Arc::new(compatible);
        self.query_cache.insert(requested, Arc::clone(&compatible));
        compatible
    }
}

/// Collect a bundle, rejecting repeated component types.
fn unique_components<B: Bundle>(bundle: B) -> WorldResult<ComponentMap> {
    let values = bundle.into_values();
    let mut components = ComponentMap::default();
    components.reserve(values.len());

    for (component, value) in values {
        if components.insert(component, value).is_some() {
            return Err(WorldError::DuplicateComponentType {
                name: component.name(),
            });
        }
    }
    Ok(components)
}

impl fmt::Debug for World {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("World")
            .field("entities", &self.locations.len())
            .field("buckets", &self.buckets.len())
            .field("next_id", &self.next_id)
            .field("archetypes", &self.archetypes)
            .finish_non_exhaustive()
    }
}
