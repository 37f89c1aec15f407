//! Change tracking.
//!
//! Every `query_changed` call site owns a [`ChangeQueue`] for one component
//! type. The world pushes a record into every live queue of a type whenever
//! an entity's value of that type changes; the call site drains its queue
//! one entity at a time. A queue holds at most one record per entity: a
//! second change before the entity is drained replaces the first.

use std::collections::VecDeque;
use std::fmt;
use std::marker::PhantomData;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use rustc_hash::FxHashMap;

use crate::bundle::{ComponentSet, downcast};
use crate::component::{Component, ComponentId, ComponentValue};
use crate::entity::EntityId;
use crate::world::World;

/// One observed change of a component value.
pub struct ChangeRecord<T> {
    /// Value after the change, `None` if the component was removed.
    pub new: Option<Arc<T>>,
    /// Value before the change, `None` if the component was added.
    pub old: Option<Arc<T>>,
}

impl<T> ChangeRecord<T> {
    #[must_use]
    pub fn is_added(&self) -> bool {
        self.old.is_none() && self.new.is_some()
    }

    #[must_use]
    pub fn is_removed(&self) -> bool {
        self.new.is_none()
    }
}

impl<T> Clone for ChangeRecord<T> {
    fn clone(&self) -> Self {
        Self {
            new: self.new.clone(),
            old: self.old.clone(),
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for ChangeRecord<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChangeRecord")
            .field("new", &self.new)
            .field("old", &self.old)
            .finish()
    }
}

#[derive(Clone)]
pub(crate) struct RawChange {
    new: Option<ComponentValue>,
    old: Option<ComponentValue>,
}

impl RawChange {
    fn typed<T: Component>(self) -> ChangeRecord<T> {
        ChangeRecord {
            new: self.new.and_then(downcast),
            old: self.old.and_then(downcast),
        }
    }
}

/// Pending changes of one subscription, in first-change order.
#[derive(Default)]
pub(crate) struct ChangeQueue {
    order: VecDeque<EntityId>,
    pending: FxHashMap<EntityId, RawChange>,
}

impl ChangeQueue {
    fn push(&mut self, entity: EntityId, change: RawChange) {
        if self.pending.insert(entity, change).is_none() {
            self.order.push_back(entity);
        }
    }

    fn pop(&mut self) -> Option<(EntityId, RawChange)> {
        while let Some(entity) = self.order.pop_front() {
            if let Some(change) = self.pending.remove(&entity) {
                return Some((entity, change));
            }
        }
        None
    }

    pub(crate) fn len(&self) -> usize {
        self.pending.len()
    }
}

pub(crate) type SharedQueue = Arc<Mutex<ChangeQueue>>;

/// Live change subscriptions, per component type.
#[derive(Default)]
pub(crate) struct ChangeTrackers {
    queues: FxHashMap<ComponentId, Vec<Weak<Mutex<ChangeQueue>>>>,
}

impl ChangeTrackers {
    /// Register a new queue for `component`, pre-filled with `existing`.
    pub(crate) fn subscribe(
        &mut self,
        component: ComponentId,
        existing: impl IntoIterator<Item = (EntityId, ComponentValue)>,
    ) -> SharedQueue {
        let mut queue = ChangeQueue::default();
        for (entity, value) in existing {
            queue.push(
                entity,
                RawChange {
                    new: Some(value),
                    old: None,
                },
            );
        }

        let queue = Arc::new(Mutex::new(queue));
        self.queues
            .entry(component)
            .or_default()
            .push(Arc::downgrade(&queue));

        tracing::trace!(component = component.name(), "change subscription registered");
        queue
    }

    /// Whether anyone is listening for `component`.
    pub(crate) fn is_tracked(&self, component: ComponentId) -> bool {
        self.queues.contains_key(&component)
    }

    /// Deliver a change to every live subscription of `component`.
    ///
    /// Nothing is recorded when both sides are absent or are the same
    /// allocation.
    pub(crate) fn record(
        &mut self,
        entity: EntityId,
        component: ComponentId,
        old: Option<&ComponentValue>,
        new: Option<&ComponentValue>,
    ) {
        let unchanged = match (old, new) {
            (None, None) => true,
            (Some(old), Some(new)) => Arc::ptr_eq(old, new),
            _ => false,
        };
        if unchanged {
            return;
        }

        let Some(queues) = self.queues.get_mut(&component) else {
            return;
        };

        let change = RawChange {
            new: new.cloned(),
            old: old.cloned(),
        };
        queues.retain(|queue| match queue.upgrade() {
            Some(queue) => {
                queue.lock().push(entity, change.clone());
                true
            }
            None => false,
        });

        if queues.is_empty() {
            self.queues.remove(&component);
        }
    }
}

/// Draining iterator returned by
/// [`World::query_changed_with`](crate::World::query_changed_with).
///
/// Each call to `next` removes one entity's record from the queue, so
/// stopping early leaves the rest for the next frame.
pub struct ChangedIter<'w, T, F = ()> {
    world: &'w World,
    queue: SharedQueue,
    filter: bool,
    _marker: PhantomData<fn() -> (T, F)>,
}

impl<'w, T, F: ComponentSet> ChangedIter<'w, T, F> {
    pub(crate) fn new(world: &'w World, queue: SharedQueue) -> Self {
        Self {
            world,
            queue,
            filter: !F::ids().is_empty(),
            _marker: PhantomData,
        }
    }
}

impl<T: Component, F: ComponentSet> Iterator for ChangedIter<'_, T, F> {
    type Item = (EntityId, ChangeRecord<T>, F::Item);

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let (entity, change) = self.queue.lock().pop()?;

            if !self.filter {
                let mut nothing = |_: ComponentId| -> Option<ComponentValue> { None };
                if let Some(item) = F::fetch(&mut nothing) {
                    return Some((entity, change.typed(), item));
                }
                continue;
            }

            let Some(components) = self.world.components_of(entity) else {
                continue;
            };
            if let Some(item) = F::fetch(&mut |id| components.get(&id).cloned()) {
                return Some((entity, change.typed(), item));
            }
        }
    }
}

impl<T, F> fmt::Debug for ChangedIter<'_, T, F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChangedIter")
            .field("pending", &self.queue.lock().len())
            .finish_non_exhaustive()
    }
}
