#![allow(clippy::missing_fields_in_debug)]

//! Pulse ECS - archetype-indexed entity store
//!
//! Entities are integer ids; components are immutable, `Arc`-shared values
//! keyed by Rust type. Entities holding the same set of component types are
//! filed together, so a query only visits the buckets whose archetype holds
//! every requested type.
//!
//! # Key Concepts
//!
//! - **Entity**: an [`EntityId`], never recycled
//! - **Component**: any `#[derive(Component)]` type
//! - **Archetype**: a set of component types, see [`ArchetypeIndex`]
//! - **Bundle / ComponentSet**: tuples of values / types passed to the world
//!
//! # Access Patterns
//!
//! Reads hand out `Arc<T>`; writes replace the stored `Arc`:
//! - `get::<(A, B)>(e)` - each member `Option<Arc<_>>`
//! - `insert(e, (A, B))` - add or overwrite
//! - `replace(e, (A, B))` - overwrite the whole set
//! - `remove::<(A, B)>(e)` - remove and return
//!
//! # Change tracking
//!
//! Inside a hook frame (see `pulse-hooks`), [`World::query_changed`] drains
//! the changes made to one component type since the same call site last
//! ran:
//!
//! ```
//! use pulse_ecs::{Component, World};
//! use pulse_hooks::{FrameState, HookNode, HookRuntime};
//!
//! #[derive(Component)]
//! struct Health(u32);
//!
//! let mut world = World::new();
//! let mut runtime = HookRuntime::new();
//! let mut node = HookNode::new();
//!
//! let entity = world.spawn(Health(10)).unwrap();
//!
//! let system = |world: &mut World, runtime: &mut HookRuntime, node: &mut HookNode| {
//!     runtime.start(node, FrameState::default(), |hooks| {
//!         world
//!             .query_changed::<Health>(hooks)
//!             .map(|(id, change)| (id, change.new.map(|h| h.0), change.old.map(|h| h.0)))
//!             .collect::<Vec<_>>()
//!     })
//! };
//!
//! assert_eq!(system(&mut world, &mut runtime, &mut node), vec![(entity, Some(10), None)]);
//! world.insert(entity, Health(5)).unwrap();
//! assert_eq!(system(&mut world, &mut runtime, &mut node), vec![(entity, Some(5), Some(10))]);
//! ```

mod archetype;
mod bundle;
mod change;
mod component;
mod entity;
mod error;
mod query;
mod storage;
mod world;

pub use archetype::{ArchetypeId, ArchetypeIndex, ComponentSetKey};
pub use bundle::{Bundle, BundleValues, ComponentIds, ComponentSet, Lookup};
pub use change::{ChangeRecord, ChangedIter};
pub use component::{
    Component, ComponentId, ComponentInfo, ComponentMap, ComponentValue, component_info,
};
pub use entity::EntityId;
pub use error::{WorldError, WorldResult};
pub use pulse_ecs_derive::Component;
pub use query::{QueryIter, QueryResult};
pub use world::World;

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::{
        Bundle, ChangeRecord, Component, ComponentSet, EntityId, QueryResult, World, WorldError,
        WorldResult,
    };
}
