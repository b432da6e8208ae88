//! # Systems
//!
//! A system is a per-tick behavior. It declares:
//! - a [`Filter`] selecting the entities it sees
//! - a [`Capabilities`] bitmask naming the triggers it implements
//! - its ordering relative to every other system
//!
//! Capabilities and accepted input types are queried once when the system
//! is registered and cached; the pipeline never probes a system again to
//! find out what it implements.
//!
//! Systems are shared between worker threads, so callbacks take `&self`.
//! Keep mutable state behind a lock or an atomic.

use std::any::{Any, TypeId};
use std::collections::BTreeSet;
use std::fmt;
use std::ops::{BitOr, BitOrAssign};

use tessera_core::{ComponentId, Entity, Filter};

use crate::context::TickContext;
use crate::error::SystemResult;
use crate::input::GameInput;

/// One callback kind of the tick pipeline.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Trigger {
    /// An entity was admitted into the active set.
    Added,
    /// An entity left the active set.
    Removed,
    /// Filtered components of an active entity were modified.
    Modified,
    /// Per-entity update.
    Update,
    /// Once per tick on the global entity, before the update pass.
    GlobalPreUpdate,
    /// Once per tick on the global entity, after the update and input passes.
    GlobalPostUpdate,
    /// Per-entity input delivery.
    Input,
    /// Input delivery on the global entity.
    GlobalInput,
}

impl Trigger {
    /// Every trigger, in pipeline order.
    pub const ALL: [Self; 8] = [
        Self::Added,
        Self::Removed,
        Self::GlobalPreUpdate,
        Self::Modified,
        Self::Update,
        Self::Input,
        Self::GlobalInput,
        Self::GlobalPostUpdate,
    ];

    /// The capability bit a system must declare to receive this trigger.
    #[must_use]
    pub const fn capability(self) -> Capabilities {
        match self {
            Self::Added => Capabilities::ON_ADDED,
            Self::Removed => Capabilities::ON_REMOVED,
            Self::Modified => Capabilities::ON_MODIFIED,
            Self::Update => Capabilities::ON_UPDATE,
            Self::GlobalPreUpdate => Capabilities::ON_GLOBAL_PRE_UPDATE,
            Self::GlobalPostUpdate => Capabilities::ON_GLOBAL_POST_UPDATE,
            Self::Input => Capabilities::ON_INPUT,
            Self::GlobalInput => Capabilities::ON_GLOBAL_INPUT,
        }
    }

    /// Dense index, used for per-trigger counters.
    #[must_use]
    pub const fn index(self) -> usize {
        match self {
            Self::Added => 0,
            Self::Removed => 1,
            Self::Modified => 2,
            Self::Update => 3,
            Self::GlobalPreUpdate => 4,
            Self::GlobalPostUpdate => 5,
            Self::Input => 6,
            Self::GlobalInput => 7,
        }
    }
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Added => "OnAdded",
            Self::Removed => "OnRemoved",
            Self::Modified => "OnModified",
            Self::Update => "OnUpdate",
            Self::GlobalPreUpdate => "OnGlobalPreUpdate",
            Self::GlobalPostUpdate => "OnGlobalPostUpdate",
            Self::Input => "OnInput",
            Self::GlobalInput => "OnGlobalInput",
        };
        f.write_str(name)
    }
}

/// Bitmask of the triggers a system implements.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Capabilities(u16);

impl Capabilities {
    /// No triggers.
    pub const NONE: Self = Self(0);
    /// Receives [`Trigger::Added`].
    pub const ON_ADDED: Self = Self(1 << 0);
    /// Receives [`Trigger::Removed`].
    pub const ON_REMOVED: Self = Self(1 << 1);
    /// Receives [`Trigger::Modified`].
    pub const ON_MODIFIED: Self = Self(1 << 2);
    /// Receives [`Trigger::Update`].
    pub const ON_UPDATE: Self = Self(1 << 3);
    /// Receives [`Trigger::GlobalPreUpdate`].
    pub const ON_GLOBAL_PRE_UPDATE: Self = Self(1 << 4);
    /// Receives [`Trigger::GlobalPostUpdate`].
    pub const ON_GLOBAL_POST_UPDATE: Self = Self(1 << 5);
    /// Receives [`Trigger::Input`].
    pub const ON_INPUT: Self = Self(1 << 6);
    /// Receives [`Trigger::GlobalInput`].
    pub const ON_GLOBAL_INPUT: Self = Self(1 << 7);

    /// Raw bits.
    #[inline]
    #[must_use]
    pub const fn bits(self) -> u16 {
        self.0
    }

    /// Returns true if every bit of `other` is set.
    #[inline]
    #[must_use]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Returns true if any bit of `other` is set.
    #[inline]
    #[must_use]
    pub const fn intersects(self, other: Self) -> bool {
        self.0 & other.0 != 0
    }

    /// Union of both masks.
    #[inline]
    #[must_use]
    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    /// Returns true if no trigger is set.
    #[inline]
    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl BitOr for Capabilities {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        self.union(rhs)
    }
}

impl BitOrAssign for Capabilities {
    fn bitor_assign(&mut self, rhs: Self) {
        *self = self.union(rhs);
    }
}

impl fmt::Debug for Capabilities {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut set = f.debug_set();
        for trigger in Trigger::ALL {
            if self.contains(trigger.capability()) {
                set.entry(&format_args!("{trigger}"));
            }
        }
        set.finish()
    }
}

/// Answer of one system about its order relative to another.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum SystemOrdering {
    /// This system must run before the other one.
    Before,
    /// This system must run after the other one.
    After,
    /// No opinion.
    #[default]
    Concurrent,
}

/// Upcast to [`Any`], implemented for every `'static` type.
pub trait AsAny: Any {
    /// Returns `self` as `&dyn Any`.
    fn as_any(&self) -> &dyn Any;
}

impl<T: Any> AsAny for T {
    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// A per-tick behavior.
///
/// Every trigger method defaults to a no-op; a system only receives the
/// triggers named in [`System::capabilities`].
///
/// # Example
///
/// ```rust,ignore
/// struct Gravity { velocity: DataAccessor<Velocity> }
///
/// impl System for Gravity {
///     fn filter(&self) -> Filter {
///         Filter::empty().with(self.velocity)
///     }
///
///     fn capabilities(&self) -> Capabilities {
///         Capabilities::ON_UPDATE
///     }
///
///     fn on_update(&self, _ctx: &TickContext<'_>, entity: &mut Entity) -> SystemResult {
///         entity.modify(self.velocity)?.dy -= 9.81;
///         Ok(())
///     }
/// }
/// ```
#[allow(unused_variables)]
pub trait System: AsAny + Send + Sync {
    /// Display name, used in logs, errors and snapshots.
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }

    /// Components an entity must carry for this system to see it.
    fn filter(&self) -> Filter {
        Filter::empty()
    }

    /// Triggers this system implements.
    fn capabilities(&self) -> Capabilities;

    /// Input types accepted by the input triggers. Empty accepts every type.
    fn input_types(&self) -> Vec<TypeId> {
        Vec::new()
    }

    /// Order of this system relative to `other`.
    fn ordering(&self, other: &dyn System) -> SystemOrdering {
        SystemOrdering::Concurrent
    }

    /// Entity admitted into the active set.
    fn on_added(&self, ctx: &TickContext<'_>, entity: &mut Entity) -> SystemResult {
        Ok(())
    }

    /// Entity removed from the active set. Its components are still readable.
    fn on_removed(&self, ctx: &TickContext<'_>, entity: &mut Entity) -> SystemResult {
        Ok(())
    }

    /// Components in `modified` (at least one of them in the filter) changed
    /// since the previous update pass. Runs before `on_update`.
    fn on_modified(
        &self,
        ctx: &TickContext<'_>,
        entity: &mut Entity,
        modified: &BTreeSet<ComponentId>,
    ) -> SystemResult {
        Ok(())
    }

    /// Per-entity update.
    fn on_update(&self, ctx: &TickContext<'_>, entity: &mut Entity) -> SystemResult {
        Ok(())
    }

    /// Once per tick before the update pass.
    fn on_global_pre_update(&self, ctx: &TickContext<'_>, global: &mut Entity) -> SystemResult {
        Ok(())
    }

    /// Once per tick after the update and input passes.
    fn on_global_post_update(&self, ctx: &TickContext<'_>, global: &mut Entity) -> SystemResult {
        Ok(())
    }

    /// One input delivered to one matching entity.
    fn on_input(
        &self,
        ctx: &TickContext<'_>,
        input: &dyn GameInput,
        entity: &mut Entity,
    ) -> SystemResult {
        Ok(())
    }

    /// One input delivered to the global entity.
    fn on_global_input(
        &self,
        ctx: &TickContext<'_>,
        input: &dyn GameInput,
        global: &mut Entity,
    ) -> SystemResult {
        Ok(())
    }
}

/// Returns true if `other` is a `T`. Used by `ordering` implementations.
#[must_use]
pub fn is_system<T: System>(other: &dyn System) -> bool {
    other.as_any().is::<T>()
}
