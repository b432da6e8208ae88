//! # TESSERA Core
//!
//! Data model of the TESSERA simulation runtime:
//! - Registered, double-buffered components (`current` / `previous`)
//! - Entities with added / modified / removed bookkeeping
//! - Filters over component ids
//! - A typed event notifier with a single flusher and many submitters
//!
//! ## Example
//!
//! ```rust,ignore
//! use tessera_core::{ComponentRegistry, Entity, EntityId};
//!
//! let mut registry = ComponentRegistry::new();
//! let health = registry.register::<Health>();
//!
//! let mut entity = Entity::new(EntityId::new(1), "player");
//! entity.add_data(health)?.value = 100;
//! entity.commit();
//! ```

#![deny(unsafe_code)]
#![warn(clippy::pedantic)]
#![deny(clippy::perf)]
#![allow(clippy::module_name_repetitions)]

pub mod ecs;
pub mod error;
pub mod events;

pub use ecs::{
    Component, ComponentId, ComponentInfo, ComponentRecord, ComponentRegistry, DataAccessor,
    Entity, EntityHandle, EntityId, Filter, IdGenerator, RecordFlags, RecordView,
};
pub use error::{CoreError, CoreResult, EventError};
pub use events::{Event, EventNotifier, EventSubmitter};
