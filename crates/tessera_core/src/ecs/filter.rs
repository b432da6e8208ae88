//! # Filters
//!
//! A filter is the immutable set of component ids an entity must carry for
//! a system to consider it. The empty filter matches every entity.

use std::collections::BTreeSet;

use super::component::{Component, ComponentId, DataAccessor};
use super::entity::Entity;

/// Immutable set of required component ids.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct Filter {
    required: BTreeSet<ComponentId>,
}

impl Filter {
    /// The filter with no requirements.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Builds a filter from component ids.
    #[must_use]
    pub fn new(required: impl IntoIterator<Item = ComponentId>) -> Self {
        Self {
            required: required.into_iter().collect(),
        }
    }

    /// Returns a filter that additionally requires `C`.
    #[must_use]
    pub fn with<C: Component>(mut self, accessor: DataAccessor<C>) -> Self {
        self.required.insert(accessor.id());
        self
    }

    /// Returns true if the entity has every required component
    /// (records pending removal do not count).
    #[must_use]
    pub fn matches(&self, entity: &Entity) -> bool {
        self.required.iter().all(|&id| entity.contains(id))
    }

    /// Returns true if at least one required component was flagged
    /// modified since the last commit.
    #[must_use]
    pub fn touched_by_modification(&self, entity: &Entity) -> bool {
        self.required.iter().any(|&id| entity.was_modified(id))
    }

    /// Returns true if any required component is in `modified`.
    ///
    /// The empty filter is touched by any non-empty modification set.
    #[must_use]
    pub fn intersects(&self, modified: &BTreeSet<ComponentId>) -> bool {
        if self.required.is_empty() {
            return !modified.is_empty();
        }
        self.required.iter().any(|id| modified.contains(id))
    }

    /// Required ids in ascending order.
    pub fn required(&self) -> impl Iterator<Item = ComponentId> + '_ {
        self.required.iter().copied()
    }

    /// Number of required components.
    #[must_use]
    pub fn len(&self) -> usize {
        self.required.len()
    }

    /// Returns true for the empty filter.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.required.is_empty()
    }
}

impl FromIterator<ComponentId> for Filter {
    fn from_iter<I: IntoIterator<Item = ComponentId>>(iter: I) -> Self {
        Self::new(iter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ecs::{ComponentRegistry, EntityId};
    use bytemuck::{Pod, Zeroable};

    #[derive(Clone, Copy, Debug, Default, Pod, Zeroable)]
    #[repr(C)]
    struct Position {
        x: f32,
    }

    impl Component for Position {}

    #[derive(Clone, Copy, Debug, Default, Pod, Zeroable)]
    #[repr(C)]
    struct Velocity {
        dx: f32,
    }

    impl Component for Velocity {}

    #[test]
    fn test_empty_filter_matches_everything() {
        let entity = Entity::new(EntityId::new(1), "bare");
        assert!(Filter::empty().matches(&entity));
        assert!(!Filter::empty().touched_by_modification(&entity));
    }

    #[test]
    fn test_filter_requires_all_components() {
        let mut registry = ComponentRegistry::new();
        let position = registry.register::<Position>();
        let velocity = registry.register::<Velocity>();
        let filter = Filter::empty().with(position).with(velocity);

        let mut entity = Entity::new(EntityId::new(1), "mover");
        entity.add_data(position).unwrap();
        assert!(!filter.matches(&entity));

        entity.add_data(velocity).unwrap();
        assert!(filter.matches(&entity));

        entity.commit();
        entity.remove_data(velocity).unwrap();
        assert!(!filter.matches(&entity));
    }

    #[test]
    fn test_touched_by_modification() {
        let mut registry = ComponentRegistry::new();
        let position = registry.register::<Position>();
        let velocity = registry.register::<Velocity>();
        let filter = Filter::empty().with(position);

        let mut entity = Entity::new(EntityId::new(1), "mover");
        entity.add_data(position).unwrap();
        entity.add_data(velocity).unwrap();
        entity.commit();

        entity.modify(velocity).unwrap().dx = 1.0;
        assert!(!filter.touched_by_modification(&entity));
        assert!(!filter.intersects(entity.pending_modifications()));

        entity.modify(position).unwrap().x = 1.0;
        assert!(filter.touched_by_modification(&entity));
        assert!(filter.intersects(entity.pending_modifications()));
    }

    #[test]
    fn test_filter_from_ids_is_a_set() {
        let filter: Filter = [ComponentId::new(2), ComponentId::new(1), ComponentId::new(2)]
            .into_iter()
            .collect();
        assert_eq!(filter.len(), 2);
        assert_eq!(
            filter.required().collect::<Vec<_>>(),
            vec![ComponentId::new(1), ComponentId::new(2)]
        );
    }
}
