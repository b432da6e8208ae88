//! # Core Error Types
//!
//! All errors raised by component storage and the event notifier.
//!
//! These are programmer errors: every variant names the entity and the
//! component involved so misuse can be located from the message alone.

use thiserror::Error;

use crate::ecs::{ComponentId, EntityId};

/// Errors raised by the entity / component data model.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoreError {
    /// `add_data` was called for a component the entity already has.
    #[error("entity {entity} already has component {component} (id {component_id})")]
    DuplicateComponent {
        /// Entity that was modified.
        entity: EntityId,
        /// Type name of the component.
        component: &'static str,
        /// Registered id of the component.
        component_id: ComponentId,
    },

    /// A component was read, modified or removed but is absent
    /// (or already pending removal).
    #[error("entity {entity} has no component {component} (id {component_id})")]
    MissingComponent {
        /// Entity that was accessed.
        entity: EntityId,
        /// Type name of the component.
        component: &'static str,
        /// Registered id of the component.
        component_id: ComponentId,
    },

    /// A record was accessed through an accessor of a different type than
    /// the one it was created with. Happens when two registries are mixed.
    #[error("entity {entity}: component id {component_id} does not hold a {expected}")]
    ComponentTypeMismatch {
        /// Entity that was accessed.
        entity: EntityId,
        /// Registered id that was used.
        component_id: ComponentId,
        /// Type the caller expected.
        expected: &'static str,
    },

    /// A component name (e.g. from a snapshot) is not registered.
    #[error("component {name} is not registered")]
    UnknownComponent {
        /// The unregistered component name.
        name: String,
    },

    /// Restored component bytes do not match the registered type's size.
    #[error("component {name}: expected {expected} bytes, got {actual}")]
    ComponentSizeMismatch {
        /// Component type name.
        name: String,
        /// Size of the registered type.
        expected: usize,
        /// Size of the provided payload.
        actual: usize,
    },
}

/// Errors raised by the [`EventNotifier`](crate::events::EventNotifier).
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventError {
    /// `dispatch_events` was called while another dispatch is running on
    /// the same notifier (including from inside a callback).
    #[error("event dispatch already in progress on this notifier")]
    DispatchInProgress,
}

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;
