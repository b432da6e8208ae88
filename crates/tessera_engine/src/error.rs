//! # Engine Error Types
//!
//! Errors raised while building an engine or running a tick.
//!
//! Every variant is a local contract violation reported synchronously to
//! the caller. Nothing is retried internally; a failed tick leaves the last
//! committed state untouched.

use thiserror::Error;

use tessera_core::{CoreError, EntityId, EventError};

use crate::system::Trigger;

/// Error returned by a system callback.
///
/// Entity operations return [`CoreError`], so `?` works inside callbacks.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SystemError {
    /// A component operation inside the callback failed.
    #[error(transparent)]
    Component(#[from] CoreError),

    /// Free-form failure reported by the system.
    #[error("{0}")]
    Message(String),
}

impl SystemError {
    /// Builds a [`SystemError::Message`].
    #[must_use]
    pub fn message(text: impl Into<String>) -> Self {
        Self::Message(text.into())
    }
}

/// Result type of system callbacks.
pub type SystemResult = Result<(), SystemError>;

/// Errors raised by the engine.
#[derive(Error, Debug)]
pub enum EngineError {
    /// The Before / After relation between systems contains a cycle.
    #[error("system ordering cycle: {}", cycle.join(" -> "))]
    OrderingCycle {
        /// Names of the systems on the cycle; the first name is repeated
        /// at the end.
        cycle: Vec<String>,
    },

    /// `get_system` found no system of the requested type.
    #[error("no system of type {type_name} is registered")]
    UnknownSystem {
        /// Requested Rust type.
        type_name: &'static str,
    },

    /// The entity is not owned by this engine (or cannot be removed).
    #[error("entity {entity} is not known to this engine")]
    UnknownEntity {
        /// Requested entity.
        entity: EntityId,
    },

    /// A system callback failed; the tick was aborted before commit.
    #[error("system `{system}` failed in {trigger} on {}: {source}", describe_target(.entity))]
    SystemFailed {
        /// Name of the failing system.
        system: String,
        /// Trigger that was running.
        trigger: Trigger,
        /// Entity the callback ran on (`None` for global triggers).
        entity: Option<EntityId>,
        /// Error returned by the callback.
        #[source]
        source: SystemError,
    },

    /// A snapshot cannot be restored into this engine.
    #[error("snapshot does not match engine: {reason}")]
    SnapshotMismatch {
        /// What did not match.
        reason: String,
    },

    /// Invalid engine configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// The bounded input queue is full.
    #[error("input queue is full (capacity {capacity})")]
    InputQueueFull {
        /// Configured capacity.
        capacity: usize,
    },

    /// The engine owning the input queue has been dropped.
    #[error("input queue is closed")]
    InputQueueClosed,

    /// A driven tick did not run to completion (a system panicked).
    #[error("tick aborted: {reason}")]
    TickAborted {
        /// Panic or cancellation message.
        reason: String,
    },

    /// Component storage error outside a system callback.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// Event notifier error.
    #[error(transparent)]
    Event(#[from] EventError),
}

fn describe_target(entity: &Option<EntityId>) -> String {
    match entity {
        Some(entity) => format!("entity {entity}"),
        None => "the global entity".to_owned(),
    }
}

/// Result type for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;
