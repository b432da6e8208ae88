//! # Entity Component Data Model
//!
//! ## Design Philosophy
//!
//! - Component ids come from an explicit registry, never from a global counter
//! - Every component is double-buffered: `current` for this tick, `previous`
//!   for the last commit
//! - Entities live behind a lock so worker threads can share them
//! - Filters are plain id sets, checked per entity

mod component;
mod entity;
mod filter;
mod record;

pub use component::{Component, ComponentId, ComponentInfo, ComponentRegistry, DataAccessor};
pub use entity::{Entity, EntityHandle, EntityId, IdGenerator, RecordView};
pub use filter::Filter;
pub use record::{ComponentRecord, RecordFlags};
