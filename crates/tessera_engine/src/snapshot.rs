//! # Snapshots
//!
//! A snapshot is a point-in-time copy of everything needed to rebuild an
//! equivalent engine: the global entity, the Active / Added / Removed sets,
//! the pipeline position and the list of systems.
//!
//! Components are captured as raw bytes (they are `Pod`) and referred to by
//! name, so a snapshot can be restored into an engine whose registry
//! assigned different ids. The persisted format is left to the caller; the
//! types only derive serde.
//!
//! ## Verification hash
//!
//! ```text
//! SipHash-2-4 (keys 0, 0) over:
//!   global entity
//!   'A' count  active entities sorted by id
//!   '+' count  added entities sorted by id
//!   '-' count  removed entities sorted by id
//! entity    = id, name, component count, components sorted by name
//! component = name, flag bits, current bytes, previous bytes
//! ```

use std::hash::Hasher;

use serde::{Deserialize, Serialize};
use siphasher::sip::SipHasher24;

use tessera_core::{ComponentRegistry, CoreError, Entity, EntityId, RecordFlags};

use crate::error::EngineResult;

/// Captured state of one component record.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentSnapshot {
    /// Registered component name.
    pub name: String,
    /// Bookkeeping flags.
    pub flags: RecordFlags,
    /// Bytes of the current value.
    pub current: Vec<u8>,
    /// Bytes of the previous value.
    pub previous: Vec<u8>,
}

/// Captured state of one entity.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntitySnapshot {
    /// Unique id.
    pub id: EntityId,
    /// Pretty name.
    pub name: String,
    /// Records in component id order.
    pub components: Vec<ComponentSnapshot>,
    /// Names of components modified but not yet seen by an update pass.
    pub pending_modified: Vec<String>,
}

impl EntitySnapshot {
    /// Captures an entity.
    #[must_use]
    pub fn capture(entity: &Entity, registry: &ComponentRegistry) -> Self {
        let components = entity
            .records()
            .map(|view| ComponentSnapshot {
                name: registry.name_of(view.id).to_owned(),
                flags: view.flags,
                current: view.current.to_vec(),
                previous: view.previous.to_vec(),
            })
            .collect();
        let pending_modified = entity
            .pending_modifications()
            .iter()
            .map(|&id| registry.name_of(id).to_owned())
            .collect();

        Self {
            id: entity.id(),
            name: entity.pretty_name().to_owned(),
            components,
            pending_modified,
        }
    }

    /// Rebuilds the entity through the registry's factories.
    ///
    /// # Errors
    ///
    /// [`CoreError::UnknownComponent`] for a name the registry does not
    /// know, [`CoreError::ComponentSizeMismatch`] for a payload of the
    /// wrong size.
    pub fn restore(&self, registry: &ComponentRegistry) -> EngineResult<Entity> {
        let mut entity = Entity::new(self.id, self.name.clone());
        for component in &self.components {
            let info = registry
                .info_by_name(&component.name)
                .ok_or_else(|| CoreError::UnknownComponent {
                    name: component.name.clone(),
                })?;
            entity.restore_record(info, &component.current, &component.previous, component.flags)?;
        }

        let mut pending = Vec::with_capacity(self.pending_modified.len());
        for name in &self.pending_modified {
            let info = registry
                .info_by_name(name)
                .ok_or_else(|| CoreError::UnknownComponent { name: name.clone() })?;
            pending.push(info.id());
        }
        entity.restore_modifications(pending);

        Ok(entity)
    }

    fn hash_into(&self, hasher: &mut SipHasher24) {
        hasher.write_u64(self.id.raw());
        write_str(hasher, &self.name);
        hasher.write_u64(self.components.len() as u64);

        let mut components: Vec<&ComponentSnapshot> = self.components.iter().collect();
        components.sort_by(|a, b| a.name.cmp(&b.name));
        for component in components {
            write_str(hasher, &component.name);
            hasher.write_u8(component.flags.bits());
            write_bytes(hasher, &component.current);
            write_bytes(hasher, &component.previous);
        }
    }
}

/// Everything needed to rebuild an engine.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    /// Number of the next tick to run.
    pub tick: u64,
    /// Next id the entity id generator hands out.
    pub next_entity_id: u64,
    /// Admission already ran for `tick`.
    pub admission_done: bool,
    /// Leading entries of `removed` whose removal was already notified.
    pub evictions_notified: usize,
    /// The global entity.
    pub global: EntitySnapshot,
    /// Active entities in admission order.
    pub active: Vec<EntitySnapshot>,
    /// Entities waiting for admission.
    pub added: Vec<EntitySnapshot>,
    /// Entities waiting for eviction.
    pub removed: Vec<EntitySnapshot>,
    /// System names in registration order.
    pub systems: Vec<String>,
}

impl Snapshot {
    /// Structural hash of the captured entity state.
    ///
    /// Independent of component ids, set order and the pipeline position.
    #[must_use]
    pub fn verification_hash(&self) -> u64 {
        let mut hasher = SipHasher24::new_with_keys(0, 0);
        self.global.hash_into(&mut hasher);

        for (tag, entities) in [(b'A', &self.active), (b'+', &self.added), (b'-', &self.removed)] {
            hasher.write_u8(tag);
            hasher.write_u64(entities.len() as u64);

            let mut sorted: Vec<&EntitySnapshot> = entities.iter().collect();
            sorted.sort_by_key(|entity| entity.id);
            for entity in sorted {
                entity.hash_into(&mut hasher);
            }
        }

        hasher.finish()
    }

    /// Number of entities, the global entity excluded.
    #[must_use]
    pub fn entity_count(&self) -> usize {
        self.active.len() + self.added.len() + self.removed.len()
    }
}

fn write_str(hasher: &mut SipHasher24, text: &str) {
    write_bytes(hasher, text.as_bytes());
}

fn write_bytes(hasher: &mut SipHasher24, bytes: &[u8]) {
    hasher.write_u64(bytes.len() as u64);
    hasher.write(bytes);
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytemuck::{Pod, Zeroable};
    use tessera_core::Component;

    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
    #[repr(C)]
    struct Fuel {
        liters: u32,
    }

    impl Component for Fuel {
        fn name() -> &'static str {
            "Fuel"
        }
    }

    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
    #[repr(C)]
    struct Crew {
        count: u16,
        _pad: u16,
    }

    impl Component for Crew {
        fn name() -> &'static str {
            "Crew"
        }
    }

    fn empty_snapshot(global: EntitySnapshot) -> Snapshot {
        Snapshot {
            tick: 0,
            next_entity_id: 1,
            admission_done: false,
            evictions_notified: 0,
            global,
            active: Vec::new(),
            added: Vec::new(),
            removed: Vec::new(),
            systems: Vec::new(),
        }
    }

    #[test]
    fn test_entity_capture_restore() {
        let mut registry = ComponentRegistry::new();
        let fuel = registry.register::<Fuel>();
        let crew = registry.register::<Crew>();

        let mut ship = Entity::new(EntityId::new(3), "ship");
        ship.add_data(fuel).unwrap().liters = 500;
        ship.add_data(crew).unwrap().count = 4;
        ship.commit();
        ship.modify(fuel).unwrap().liters = 480;

        let captured = EntitySnapshot::capture(&ship, &registry);
        assert_eq!(captured.pending_modified, vec!["Fuel".to_owned()]);

        let restored = captured.restore(&registry).unwrap();
        assert_eq!(restored.current(fuel).unwrap().liters, 480);
        assert_eq!(restored.previous(fuel).unwrap().liters, 500);
        assert_eq!(restored.current(crew).unwrap().count, 4);
        assert_eq!(restored.pending_modifications(), ship.pending_modifications());
        assert_eq!(EntitySnapshot::capture(&restored, &registry), captured);
    }

    #[test]
    fn test_restore_across_registries() {
        let mut source = ComponentRegistry::new();
        source.register::<Fuel>();
        let crew = source.register::<Crew>();

        let mut target = ComponentRegistry::new();
        let target_crew = target.register::<Crew>();
        target.register::<Fuel>();
        assert_ne!(crew.id(), target_crew.id());

        let mut entity = Entity::new(EntityId::new(1), "boat");
        entity.add_data(crew).unwrap().count = 2;
        let captured = EntitySnapshot::capture(&entity, &source);

        let restored = captured.restore(&target).unwrap();
        assert_eq!(restored.current(target_crew).unwrap().count, 2);

        let rehashed = EntitySnapshot::capture(&restored, &target);
        assert_eq!(
            empty_snapshot(rehashed).verification_hash(),
            empty_snapshot(captured).verification_hash()
        );
    }

    #[test]
    fn test_unknown_component_name() {
        let registry = ComponentRegistry::new();
        let captured = EntitySnapshot {
            id: EntityId::new(1),
            name: "ghost".into(),
            components: vec![ComponentSnapshot {
                name: "Plasma".into(),
                flags: RecordFlags::default(),
                current: vec![0; 4],
                previous: vec![0; 4],
            }],
            pending_modified: Vec::new(),
        };

        let err = captured.restore(&registry).unwrap_err();
        assert!(err.to_string().contains("Plasma"));
    }

    #[test]
    fn test_hash_ignores_set_order_but_not_values() {
        let mut registry = ComponentRegistry::new();
        let fuel = registry.register::<Fuel>();
        let global = EntitySnapshot::capture(&Entity::new(EntityId::GLOBAL, "global"), &registry);

        let capture = |id: u64, liters: u32| {
            let mut entity = Entity::new(EntityId::new(id), "tank");
            entity.add_data(fuel).unwrap().liters = liters;
            EntitySnapshot::capture(&entity, &registry)
        };

        let mut first = empty_snapshot(global.clone());
        first.active = vec![capture(1, 10), capture(2, 20)];
        let mut second = empty_snapshot(global);
        second.active = vec![capture(2, 20), capture(1, 10)];
        second.tick = 99;
        assert_eq!(first.verification_hash(), second.verification_hash());

        second.active[0] = capture(2, 21);
        assert_ne!(first.verification_hash(), second.verification_hash());

        let mut moved = first.clone();
        let entity = moved.active.pop().unwrap();
        moved.removed.push(entity);
        assert_ne!(first.verification_hash(), moved.verification_hash());
        assert_eq!(moved.entity_count(), 2);
    }
}
