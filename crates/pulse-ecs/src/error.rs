//! World error types.

use thiserror::Error;

use crate::entity::EntityId;

/// World error type.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WorldError {
    /// The entity was never spawned, or has been despawned or cleared.
    #[error("unknown entity: {0:?}")]
    UnknownEntity(EntityId),

    /// The same component type was passed twice in one call.
    #[error("duplicate component type: {name}")]
    DuplicateComponentType {
        /// Debug name of the repeated type.
        name: &'static str,
    },

    /// `spawn_at` with an id that is already live.
    #[error("entity already exists: {0:?}")]
    EntityExists(EntityId),
}

/// Result type for world operations.
pub type WorldResult<T> = Result<T, WorldError>;
