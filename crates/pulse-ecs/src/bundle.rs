//! Component bundles and component sets.
//!
//! A [`Bundle`] is a group of component *values* passed to `spawn`,
//! `insert` or `replace`. A [`ComponentSet`] is a group of component
//! *types* passed to `get`, `remove` and `query`. Both are implemented for
//! single components and for tuples of up to eight members.

use std::sync::Arc;

use smallvec::SmallVec;

use crate::component::{Component, ComponentId, ComponentValue};

/// Component values collected from a bundle, in argument order.
pub type BundleValues = SmallVec<[(ComponentId, ComponentValue); 8]>;

/// Component ids of a set, in argument order.
pub type ComponentIds = SmallVec<[ComponentId; 8]>;

/// Looks up one component value of the entity being read.
pub type Lookup<'a> = dyn FnMut(ComponentId) -> Option<ComponentValue> + 'a;

/// A group of component values.
///
/// Values may be given owned (`Health(10)`) or already shared
/// (`Arc<Health>`); passing the same `Arc` that is already stored is not a
/// change.
pub trait Bundle: Send + 'static {
    /// Append this bundle's values to `out`.
    fn push_values(self, out: &mut BundleValues);

    /// Collect the bundle's values.
    fn into_values(self) -> BundleValues
    where
        Self: Sized,
    {
        let mut out = BundleValues::new();
        self.push_values(&mut out);
        out
    }
}

impl<C: Component> Bundle for C {
    fn push_values(self, out: &mut BundleValues) {
        let value: ComponentValue = Arc::new(self);
        out.push((ComponentId::of::<C>(), value));
    }
}

impl<C: Component> Bundle for Arc<C> {
    fn push_values(self, out: &mut BundleValues) {
        let value: ComponentValue = self;
        out.push((ComponentId::of::<C>(), value));
    }
}

impl Bundle for () {
    fn push_values(self, _out: &mut BundleValues) {}
}

/// A group of component types that can be read from an entity.
pub trait ComponentSet: 'static {
    /// Values when every member is present.
    type Item;
    /// Values with each member independently optional.
    type Maybe;

    /// Append the member ids to `out`.
    fn push_ids(out: &mut ComponentIds);

    /// All member values, or `None` if any is missing.
    fn fetch(lookup: &mut Lookup<'_>) -> Option<Self::Item>;

    /// Each member value, `None` where missing.
    fn fetch_each(lookup: &mut Lookup<'_>) -> Self::Maybe;

    #[must_use]
    fn ids() -> ComponentIds {
        let mut out = ComponentIds::new();
        Self::push_ids(&mut out);
        out
    }
}

pub(crate) fn downcast<C: Component>(value: ComponentValue) -> Option<Arc<C>> {
    value.downcast::<C>().ok()
}

impl<C: Component> ComponentSet for C {
    type Item = Arc<C>;
    type Maybe = Option<Arc<C>>;

    fn push_ids(out: &mut ComponentIds) {
        out.push(ComponentId::of::<C>());
    }

    fn fetch(lookup: &mut Lookup<'_>) -> Option<Self::Item> {
        lookup(ComponentId::of::<C>()).and_then(downcast)
    }

    fn fetch_each(lookup: &mut Lookup<'_>) -> Self::Maybe {
        Self::fetch(lookup)
    }
}

impl ComponentSet for () {
    type Item = ();
    type Maybe = ();

    fn push_ids(_out: &mut ComponentIds) {}

    fn fetch(_lookup: &mut Lookup<'_>) -> Option<Self::Item> {
        Some(())
    }

    fn fetch_each(_lookup: &mut Lookup<'_>) -> Self::Maybe {}
}

macro_rules! impl_tuples {
    ($($name:ident),+) => {
        impl<$($name: Bundle),+> Bundle for ($($name,)+) {
            #[allow(non_snake_case)]
            fn push_values(self, out: &mut BundleValues) {
                let ($($name,)+) = self;
                $($name.push_values(out);)+
            }
        }

        impl<$($name: ComponentSet),+> ComponentSet for ($($name,)+) {
            type Item = ($($name::Item,)+);
            type Maybe = ($($name::Maybe,)+);

            fn push_ids(out: &mut ComponentIds) {
                $($name::push_ids(out);)+
            }

            fn fetch(lookup: &mut Lookup<'_>) -> Option<Self::Item> {
                Some(($($name::fetch(lookup)?,)+))
            }

            fn fetch_each(lookup: &mut Lookup<'_>) -> Self::Maybe {
                ($($name::fetch_each(lookup),)+)
            }
        }
    };
}

impl_tuples!(A);
impl_tuples!(A, B);
impl_tuples!(A, B, C);
impl_tuples!(A, B, C, D);
impl_tuples!(A, B, C, D, E);
impl_tuples!(A, B, C, D, E, F);
impl_tuples!(A, B, C, D, E, F, G);
impl_tuples!(A, B, C, D, E, F, G, H);
