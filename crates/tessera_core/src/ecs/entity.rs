//! # Entity Management
//!
//! An entity is a unique id, a human-readable name, and a sparse map from
//! component id to a double-buffered [`ComponentRecord`].
//!
//! ## Record lifecycle
//!
//! ```text
//! add_data ──> [added] ──commit──> [live] ──remove_data──> [removed] ──commit──> gone
//!     │                              │  ▲
//!     └──remove_data──> gone         └──┘ modify (flags modified)
//! ```
//!
//! Entities are shared between the engine and worker threads through an
//! [`EntityHandle`], which wraps the entity in a `parking_lot::RwLock`.

use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use serde::{Deserialize, Serialize};

use super::component::{Component, ComponentId, ComponentInfo, DataAccessor};
use super::record::{ComponentRecord, ErasedRecord, RecordFlags};
use crate::error::{CoreError, CoreResult};

/// Unique identifier for an entity. Never reused within one id generator.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(transparent)]
pub struct EntityId(u64);

impl EntityId {
    /// Id of the global (world singleton) entity.
    pub const GLOBAL: Self = Self(0);

    /// Creates an entity id from its raw value.
    #[inline]
    #[must_use]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Returns the raw value.
    #[inline]
    #[must_use]
    pub const fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Generator of entity ids.
///
/// Owned by the engine and passed by reference; ids start at 1 because
/// 0 is reserved for the global entity.
#[derive(Debug)]
pub struct IdGenerator {
    next: AtomicU64,
}

impl IdGenerator {
    /// Creates a generator whose first id is 1.
    #[must_use]
    pub const fn new() -> Self {
        Self::starting_at(1)
    }

    /// Creates a generator whose first id is `first`.
    #[must_use]
    pub const fn starting_at(first: u64) -> Self {
        Self {
            next: AtomicU64::new(first),
        }
    }

    /// Hands out the next id.
    pub fn next_id(&self) -> EntityId {
        EntityId(self.next.fetch_add(1, Ordering::Relaxed))
    }

    /// The id the next call to [`IdGenerator::next_id`] will return.
    #[must_use]
    pub fn peek(&self) -> u64 {
        self.next.load(Ordering::Relaxed)
    }
}

impl Default for IdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

/// Borrowed view of one record, used for hashing and snapshots.
#[derive(Clone, Copy, Debug)]
pub struct RecordView<'a> {
    /// Component id of the record.
    pub id: ComponentId,
    /// Bookkeeping flags.
    pub flags: RecordFlags,
    /// Bytes of the current value.
    pub current: &'a [u8],
    /// Bytes of the previous value.
    pub previous: &'a [u8],
}

/// An entity and its component records.
pub struct Entity {
    id: EntityId,
    pretty_name: String,
    components: BTreeMap<ComponentId, Box<dyn ErasedRecord>>,
    /// Components modified since the engine last drained this set.
    modified: BTreeSet<ComponentId>,
}

impl Entity {
    /// Creates an entity with no components.
    #[must_use]
    pub fn new(id: EntityId, pretty_name: impl Into<String>) -> Self {
        Self {
            id,
            pretty_name: pretty_name.into(),
            components: BTreeMap::new(),
            modified: BTreeSet::new(),
        }
    }

    /// Unique id.
    #[inline]
    #[must_use]
    pub const fn id(&self) -> EntityId {
        self.id
    }

    /// Human-readable name.
    #[inline]
    #[must_use]
    pub fn pretty_name(&self) -> &str {
        &self.pretty_name
    }

    /// Renames the entity.
    pub fn set_pretty_name(&mut self, name: impl Into<String>) {
        self.pretty_name = name.into();
    }

    /// Number of records, including ones pending removal.
    #[must_use]
    pub fn component_count(&self) -> usize {
        self.components.len()
    }

    /// Adds a default-valued component and returns its current value for
    /// initialization.
    ///
    /// A component that is pending removal is revived instead: the removal
    /// is cancelled, `current` is reset to the default and the record is
    /// marked modified.
    ///
    /// # Errors
    ///
    /// [`CoreError::DuplicateComponent`] if a live record already exists.
    pub fn add_data<C: Component>(&mut self, accessor: DataAccessor<C>) -> CoreResult<&mut C> {
        let id = accessor.id();
        match self.components.entry(id) {
            Entry::Occupied(mut slot) => {
                let record = slot.get_mut();
                if !record.flags().was_removed {
                    return Err(CoreError::DuplicateComponent {
                        entity: self.id,
                        component: C::name(),
                        component_id: id,
                    });
                }
                record.reset_current();
                let flags = record.flags_mut();
                flags.was_removed = false;
                flags.was_modified = true;
                self.modified.insert(id);
            }
            Entry::Vacant(slot) => {
                slot.insert(Box::new(ComponentRecord::<C>::added()));
            }
        }

        self.record_mut::<C>(id).map(ComponentRecord::current_mut)
    }

    /// Current value of a live component.
    ///
    /// # Errors
    ///
    /// [`CoreError::MissingComponent`] if absent or pending removal.
    pub fn current<C: Component>(&self, accessor: DataAccessor<C>) -> CoreResult<&C> {
        let record = self.record::<C>(accessor.id())?;
        if record.flags().was_removed {
            return Err(self.missing::<C>(accessor.id()));
        }
        Ok(record.current())
    }

    /// Value of the component at the last commit.
    ///
    /// Still readable while the component is pending removal.
    ///
    /// # Errors
    ///
    /// [`CoreError::MissingComponent`] if no record exists.
    pub fn previous<C: Component>(&self, accessor: DataAccessor<C>) -> CoreResult<&C> {
        self.record::<C>(accessor.id()).map(ComponentRecord::previous)
    }

    /// Marks the component modified and returns its current value for
    /// in-place editing.
    ///
    /// A component added since the last commit is flagged but not queued as
    /// a modification: nobody has observed its value yet.
    ///
    /// # Errors
    ///
    /// [`CoreError::MissingComponent`] if absent or pending removal.
    pub fn modify<C: Component>(&mut self, accessor: DataAccessor<C>) -> CoreResult<&mut C> {
        let id = accessor.id();
        let entity = self.id;
        let record = self.record_mut::<C>(id)?;
        if record.flags().was_removed {
            return Err(CoreError::MissingComponent {
                entity,
                component: C::name(),
                component_id: id,
            });
        }

        let flags = record.flags_mut();
        flags.was_modified = true;
        let queue = !flags.was_added;
        if queue {
            self.modified.insert(id);
        }

        self.record_mut::<C>(id).map(ComponentRecord::current_mut)
    }

    /// Removes a component.
    ///
    /// A component added since the last commit disappears immediately;
    /// otherwise the record is flagged and deleted at the next commit.
    ///
    /// # Errors
    ///
    /// [`CoreError::MissingComponent`] if absent or already pending removal.
    pub fn remove_data<C: Component>(&mut self, accessor: DataAccessor<C>) -> CoreResult<()> {
        let id = accessor.id();
        let flags = self
            .flags(id)
            .filter(|flags| !flags.was_removed)
            .ok_or_else(|| self.missing::<C>(id))?;

        if flags.was_added {
            self.components.remove(&id);
        } else if let Some(record) = self.components.get_mut(&id) {
            record.flags_mut().was_removed = true;
        }
        self.modified.remove(&id);
        Ok(())
    }

    /// Returns true if the component is present and not pending removal.
    #[must_use]
    pub fn contains(&self, id: ComponentId) -> bool {
        self.components
            .get(&id)
            .is_some_and(|record| !record.flags().was_removed)
    }

    /// Flags of a record, if one exists.
    #[must_use]
    pub fn flags(&self, id: ComponentId) -> Option<RecordFlags> {
        self.components.get(&id).map(|record| record.flags())
    }

    /// Returns true if the component was added since the last commit.
    #[must_use]
    pub fn was_added(&self, id: ComponentId) -> bool {
        self.flags(id).is_some_and(|flags| flags.was_added)
    }

    /// Returns true if the component was modified since the last commit.
    #[must_use]
    pub fn was_modified(&self, id: ComponentId) -> bool {
        self.flags(id).is_some_and(|flags| flags.was_modified)
    }

    /// Returns true if the component is pending removal.
    #[must_use]
    pub fn was_removed(&self, id: ComponentId) -> bool {
        self.flags(id).is_some_and(|flags| flags.was_removed)
    }

    /// Lists component ids in id order.
    ///
    /// Records pending removal are skipped unless `include_removed` is set.
    pub fn select_components<P>(&self, include_removed: bool, mut predicate: P) -> Vec<ComponentId>
    where
        P: FnMut(ComponentId, RecordFlags) -> bool,
    {
        self.components
            .iter()
            .filter(|(_, record)| include_removed || !record.flags().was_removed)
            .filter(|&(&id, record)| predicate(id, record.flags()))
            .map(|(&id, _)| id)
            .collect()
    }

    /// Components modified since the set was last drained.
    #[must_use]
    pub fn pending_modifications(&self) -> &BTreeSet<ComponentId> {
        &self.modified
    }

    /// Drains the set of components modified since the last drain.
    pub fn take_modifications(&mut self) -> BTreeSet<ComponentId> {
        std::mem::take(&mut self.modified)
    }

    /// Replaces the pending modification set (snapshot restore).
    pub fn restore_modifications(&mut self, modified: impl IntoIterator<Item = ComponentId>) {
        self.modified = modified
            .into_iter()
            .filter(|id| self.components.contains_key(id))
            .collect();
    }

    /// Commits the tick: `previous := current` for every record, clears the
    /// per-tick flags and deletes records flagged removed.
    pub fn commit(&mut self) {
        self.components.retain(|_, record| !record.flags().was_removed);
        for record in self.components.values_mut() {
            record.commit();
        }
        let components = &self.components;
        self.modified.retain(|id| components.contains_key(id));
    }

    /// Iterates over all records in component id order.
    pub fn records(&self) -> impl Iterator<Item = RecordView<'_>> {
        self.components.iter().map(|(&id, record)| RecordView {
            id,
            flags: record.flags(),
            current: record.current_bytes(),
            previous: record.previous_bytes(),
        })
    }

    /// Inserts a record rebuilt from captured bytes, replacing any record
    /// with the same id.
    ///
    /// # Errors
    ///
    /// [`CoreError::ComponentSizeMismatch`] if a payload does not match the
    /// registered type's size.
    pub fn restore_record(
        &mut self,
        info: &ComponentInfo,
        current: &[u8],
        previous: &[u8],
        flags: RecordFlags,
    ) -> CoreResult<()> {
        let record = info.restore(current, previous, flags)?;
        self.components.insert(info.id(), record);
        Ok(())
    }

    fn record<C: Component>(&self, id: ComponentId) -> CoreResult<&ComponentRecord<C>> {
        let record = self
            .components
            .get(&id)
            .ok_or_else(|| self.missing::<C>(id))?;
        record
            .as_any()
            .downcast_ref::<ComponentRecord<C>>()
            .ok_or(CoreError::ComponentTypeMismatch {
                entity: self.id,
                component_id: id,
                expected: C::name(),
            })
    }

    fn record_mut<C: Component>(&mut self, id: ComponentId) -> CoreResult<&mut ComponentRecord<C>> {
        let entity = self.id;
        let record = self
            .components
            .get_mut(&id)
            .ok_or(CoreError::MissingComponent {
                entity,
                component: C::name(),
                component_id: id,
            })?;
        record
            .as_any_mut()
            .downcast_mut::<ComponentRecord<C>>()
            .ok_or(CoreError::ComponentTypeMismatch {
                entity,
                component_id: id,
                expected: C::name(),
            })
    }

    fn missing<C: Component>(&self, id: ComponentId) -> CoreError {
        CoreError::MissingComponent {
            entity: self.id,
            component: C::name(),
            component_id: id,
        }
    }
}

impl Clone for Entity {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            pretty_name: self.pretty_name.clone(),
            components: self
                .components
                .iter()
                .map(|(&id, record)| (id, record.boxed_clone()))
                .collect(),
            modified: self.modified.clone(),
        }
    }
}

impl fmt::Debug for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Entity")
            .field("id", &self.id)
            .field("pretty_name", &self.pretty_name)
            .field("components", &self.components.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

/// Shared, lockable reference to an entity.
///
/// Concurrent systems that both touch one entity are serialized on its lock.
#[derive(Clone)]
pub struct EntityHandle {
    id: EntityId,
    inner: Arc<RwLock<Entity>>,
}

impl EntityHandle {
    /// Wraps an entity.
    #[must_use]
    pub fn new(entity: Entity) -> Self {
        Self {
            id: entity.id(),
            inner: Arc::new(RwLock::new(entity)),
        }
    }

    /// Id of the wrapped entity.
    #[inline]
    #[must_use]
    pub const fn id(&self) -> EntityId {
        self.id
    }

    /// Shared access.
    pub fn read(&self) -> RwLockReadGuard<'_, Entity> {
        self.inner.read()
    }

    /// Exclusive access.
    pub fn write(&self) -> RwLockWriteGuard<'_, Entity> {
        self.inner.write()
    }

    /// Exclusive access without blocking; `None` if the entity is locked.
    pub fn try_write(&self) -> Option<RwLockWriteGuard<'_, Entity>> {
        self.inner.try_write()
    }

    /// Returns true if both handles point at the same entity.
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for EntityHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntityHandle").field("id", &self.id).finish_non_exhaustive()
    }
}
