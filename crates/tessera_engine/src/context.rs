//! Per-tick context handed to every system callback.

use parking_lot::Mutex;

use tessera_core::{
    Component, ComponentRegistry, DataAccessor, Entity, EntityHandle, EntityId, Event,
    EventSubmitter, IdGenerator,
};

/// Structural change requested from inside a tick.
#[derive(Debug)]
pub(crate) enum Command {
    Create(EntityHandle),
    Remove(EntityId),
}

/// What a callback may see and do besides editing its own entity.
///
/// Structural changes are deferred: entities created here join the Added
/// set after the tick commits, and removals are applied at the same point,
/// so both take part in the next tick's admission.
pub struct TickContext<'a> {
    tick: u64,
    registry: &'a ComponentRegistry,
    events: &'a EventSubmitter,
    ids: &'a IdGenerator,
    commands: &'a Mutex<Vec<Command>>,
}

impl<'a> TickContext<'a> {
    pub(crate) fn new(
        tick: u64,
        registry: &'a ComponentRegistry,
        events: &'a EventSubmitter,
        ids: &'a IdGenerator,
        commands: &'a Mutex<Vec<Command>>,
    ) -> Self {
        Self {
            tick,
            registry,
            events,
            ids,
            commands,
        }
    }

    /// Number of the tick being run (0 for the first tick).
    #[inline]
    #[must_use]
    pub fn tick(&self) -> u64 {
        self.tick
    }

    /// The engine's component registry.
    #[must_use]
    pub fn registry(&self) -> &'a ComponentRegistry {
        self.registry
    }

    /// Accessor for a registered component type.
    #[must_use]
    pub fn accessor<C: Component>(&self) -> Option<DataAccessor<C>> {
        self.registry.accessor::<C>()
    }

    /// Submits an event for the next `dispatch_events`.
    pub fn submit_event<E: Event>(&self, event: E) {
        self.events.submit(event);
    }

    /// Creates an entity that joins the Added set once this tick commits.
    ///
    /// The returned handle may be used right away to add components.
    pub fn create_entity(&self, name: impl Into<String>) -> EntityHandle {
        let handle = EntityHandle::new(Entity::new(self.ids.next_id(), name));
        self.commands.lock().push(Command::Create(handle.clone()));
        handle
    }

    /// Requests removal of an entity once this tick commits.
    pub fn remove_entity(&self, entity: EntityId) {
        self.commands.lock().push(Command::Remove(entity));
    }
}

impl std::fmt::Debug for TickContext<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TickContext")
            .field("tick", &self.tick)
            .field("deferred", &self.commands.lock().len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tessera_core::EventNotifier;

    #[test]
    fn test_commands_are_deferred_in_order() {
        let registry = ComponentRegistry::new();
        let notifier = EventNotifier::new();
        let submitter = notifier.submitter();
        let ids = IdGenerator::new();
        let commands = Mutex::new(Vec::new());
        let ctx = TickContext::new(4, &registry, &submitter, &ids, &commands);

        let spawned = ctx.create_entity("spawned");
        ctx.remove_entity(EntityId::new(9));
        ctx.submit_event(42u32);

        assert_eq!(ctx.tick(), 4);
        assert_eq!(spawned.id(), EntityId::new(1));
        assert_eq!(notifier.pending_count(), 1);

        let commands = commands.into_inner();
        assert!(matches!(&commands[0], Command::Create(handle) if handle.ptr_eq(&spawned)));
        assert!(matches!(commands[1], Command::Remove(id) if id == EntityId::new(9)));
    }
}
