//! # TESSERA Engine
//!
//! Fixed-pipeline tick engine for the TESSERA simulation runtime.
//!
//! ## Architecture
//!
//! ```text
//! EngineBuilder ──build──> Engine
//!   systems                 ├── ExecutionPlan   (groups, computed once)
//!   registry                ├── Added / Active / Removed entity sets
//!   config / snapshot       ├── global entity
//!                           ├── EventNotifier   (EntityAdded / EntityRemoved)
//!                           └── input queue     (crossbeam, FIFO)
//!
//! update(inputs):
//!   admission ─> pre-update ─> update ─> input ─> post-update ─> commit
//! ```
//!
//! ## Determinism
//!
//! - Callbacks are ordered by the Before / After relation and nothing else
//! - OnModified is decided from modification sets drained at the start of
//!   the update pass
//! - The verification hash ignores component ids and set order
//!
//! ## Example
//!
//! ```rust,ignore
//! let mut registry = ComponentRegistry::new();
//! let health = registry.register::<Health>();
//!
//! let mut engine = EngineBuilder::new(registry)
//!     .with_system(Regeneration { health })
//!     .build()?;
//!
//! engine.create_entity("hero").write().add_data(health)?.value = 100;
//! let stats = engine.update(Vec::new())?;
//! ```

#![deny(unsafe_code)]
#![warn(clippy::pedantic)]
#![deny(clippy::perf)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod context;
pub mod driver;
pub mod engine;
pub mod error;
pub mod input;
pub mod scheduler;
pub mod snapshot;
pub mod stats;
pub mod system;

pub use config::EngineConfig;
pub use context::TickContext;
pub use driver::TickDriver;
pub use engine::{Engine, EngineBuilder, EntityAddedEvent, EntityRemovedEvent};
pub use error::{EngineError, EngineResult, SystemError, SystemResult};
pub use input::{boxed, BoxedInput, GameInput, InputSender};
pub use scheduler::{ExecutionPlan, SystemExecutionGroup};
pub use snapshot::{ComponentSnapshot, EntitySnapshot, Snapshot};
pub use stats::{TickStats, TimingStats};
pub use system::{is_system, AsAny, Capabilities, System, SystemOrdering, Trigger};
