//! Hook cell keys.

use core::fmt;
use core::hash::{Hash, Hasher};
use core::panic::Location;

use rustc_hash::FxHasher;

/// Distinguishes several hook cells created from the same call site.
///
/// Without an explicit discriminator a cell is keyed by its ordinal: the
/// number of times the same call site has already asked for a cell during
/// the current frame. Calling a hook in a loop therefore yields one cell per
/// iteration, as long as the iteration order is stable.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub enum Discriminator {
    /// Position among same-site calls within a frame.
    Ordinal(u32),
    /// Caller supplied key, pre-hashed.
    Keyed(u64),
}

impl Discriminator {
    /// Key a cell by any hashable value.
    #[must_use]
    pub fn of<K: Hash + ?Sized>(key: &K) -> Self {
        let mut hasher = FxHasher::default();
        key.hash(&mut hasher);
        Self::Keyed(hasher.finish())
    }
}

impl fmt::Debug for Discriminator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ordinal(n) => write!(f, "#{n}"),
            Self::Keyed(hash) => write!(f, "key:{hash:016x}"),
        }
    }
}

/// Identity of a hook cell within a [`HookNode`](crate::HookNode).
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct HookKey {
    location: &'static Location<'static>,
    discriminator: Discriminator,
}

impl HookKey {
    #[must_use]
    pub const fn new(location: &'static Location<'static>, discriminator: Discriminator) -> Self {
        Self {
            location,
            discriminator,
        }
    }

    /// Source location of the call that created the cell.
    #[must_use]
    pub const fn location(&self) -> &'static Location<'static> {
        self.location
    }

    #[must_use]
    pub const fn discriminator(&self) -> Discriminator {
        self.discriminator
    }
}

impl fmt::Debug for HookKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{:?}]", self.location, self.discriminator)
    }
}
