//! Component type registration and metadata.
//!
//! Components are immutable records attached to entities. Each Rust type
//! used as a component is assigned a [`ComponentId`] the first time it is
//! seen; ids are handed out in increasing order and never reused, which is
//! what lets archetype keys be built from sorted id lists.

use std::any::{Any, TypeId};
use std::fmt;
use std::sync::{Arc, LazyLock};

use parking_lot::RwLock;
use rustc_hash::FxHashMap;

/// Marker trait for types that can be used as components.
///
/// Usually implemented with `#[derive(Component)]`, which also rejects
/// fields that would let a stored instance change behind the world's back.
///
/// # Example
///
/// ```
/// use pulse_ecs::Component;
///
/// #[derive(Component)]
/// struct Health(u32);
///
/// #[derive(Component)]
/// #[component(name = "Poisoned")]
/// struct Poison;
///
/// assert_eq!(Poison::name(), "Poisoned");
/// ```
pub trait Component: Send + Sync + 'static {
    /// Debug name of the component type.
    #[must_use]
    fn name() -> &'static str {
        std::any::type_name::<Self>()
    }
}

/// A stored component instance.
///
/// Instances are shared, never mutated: replacing a component stores a new
/// `Arc`, and two values are "the same" only if they are the same
/// allocation.
pub type ComponentValue = Arc<dyn Any + Send + Sync>;

/// The components held by one entity.
pub type ComponentMap = FxHashMap<ComponentId, ComponentValue>;

/// Unique identifier for a component type.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ComponentId(u32);

impl ComponentId {
    /// Id of `T`, registering it on first use.
    #[must_use]
    pub fn of<T: Component>() -> Self {
        let type_id = TypeId::of::<T>();
        if let Some(&id) = REGISTRY.read().type_to_id.get(&type_id) {
            return id;
        }
        REGISTRY.write().register::<T>()
    }

    /// Create a component ID from a raw value.
    #[must_use]
    pub const fn from_raw(id: u32) -> Self {
        Self(id)
    }

    /// Get the raw ID value.
    #[must_use]
    pub const fn as_raw(self) -> u32 {
        self.0
    }

    /// Debug name of the component type, or `"<unregistered>"`.
    #[must_use]
    pub fn name(self) -> &'static str {
        REGISTRY
            .read()
            .infos
            .get(self.0 as usize)
            .map_or("<unregistered>", ComponentInfo::name)
    }
}

impl fmt::Debug for ComponentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ComponentId({}: {})", self.0, self.name())
    }
}

/// Runtime information about a component type.
#[derive(Clone, Debug)]
pub struct ComponentInfo {
    id: ComponentId,
    name: &'static str,
    type_id: TypeId,
}

impl ComponentInfo {
    #[must_use]
    pub const fn id(&self) -> ComponentId {
        self.id
    }

    #[must_use]
    pub const fn name(&self) -> &'static str {
        self.name
    }

    /// Check if this info is for the given type.
    #[must_use]
    pub fn is<T: 'static>(&self) -> bool {
        self.type_id == TypeId::of::<T>()
    }
}

/// Process-wide mapping from Rust types to component ids.
#[derive(Default)]
struct ComponentRegistry {
    type_to_id: FxHashMap<TypeId, ComponentId>,
    infos: Vec<ComponentInfo>,
}

impl ComponentRegistry {
    fn register<T: Component>(&mut self) -> ComponentId {
        let type_id = TypeId::of::<T>();

        // Another thread may have won the race between our read and write.
        if let Some(&id) = self.type_to_id.get(&type_id) {
            return id;
        }

        let id = ComponentId(self.infos.len() as u32);
        self.infos.push(ComponentInfo {
            id,
            name: T::name(),
            type_id,
        });
        self.type_to_id.insert(type_id, id);

        tracing::trace!(id = id.0, name = T::name(), "registered component type");
        id
    }
}

static REGISTRY: LazyLock<RwLock<ComponentRegistry>> =
    LazyLock::new(|| RwLock::new(ComponentRegistry::default()));

/// Info for a registered component id.
#[must_use]
pub fn component_info(id: ComponentId) -> Option<ComponentInfo> {
    REGISTRY.read().infos.get(id.0 as usize).cloned()
}
