//! # Component Registry
//!
//! Components are pure data containers with no behavior.
//! They must be `Pod` so a record can be captured as bytes for snapshots
//! and hashed without per-type serialization code.
//!
//! Component ids are handed out by a [`ComponentRegistry`] owned by the
//! engine. There is no process-wide counter: two registries may assign
//! different ids to the same type, which is why snapshots and the
//! verification hash refer to components by name.

use std::any::TypeId;
use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;

use bytemuck::Pod;
use serde::{Deserialize, Serialize};

use super::record::{ComponentRecord, ErasedRecord, RecordFlags};
use crate::error::{CoreError, CoreResult};

/// Marker trait for ECS components.
///
/// Components must be:
/// - `Pod`: Plain old data, captured as bytes for snapshots and hashing
/// - `Default`: A freshly added component starts at its default value
/// - `Send + Sync`: Systems run on worker threads
///
/// # Example
///
/// ```rust,ignore
/// #[derive(Clone, Copy, Debug, Default, Pod, Zeroable)]
/// #[repr(C)]
/// struct Health {
///     value: i32,
/// }
///
/// impl Component for Health {}
/// ```
pub trait Component: Pod + Default + Send + Sync + 'static {
    /// Stable name of the component type.
    ///
    /// Used to match components across registries (snapshot restore,
    /// verification hash). Defaults to the full type path.
    #[must_use]
    fn name() -> &'static str {
        std::any::type_name::<Self>()
    }
}

/// Dense integer identifier for a registered component type.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(transparent)]
pub struct ComponentId(u32);

impl ComponentId {
    /// Creates a component id from its raw index.
    #[inline]
    #[must_use]
    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    /// Returns the raw index.
    #[inline]
    #[must_use]
    pub const fn raw(self) -> u32 {
        self.0
    }
}

impl fmt::Display for ComponentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Typed handle for one registered component type.
///
/// Obtained from [`ComponentRegistry::register`]. All typed entity
/// operations take an accessor, so a component can only be touched through
/// the id its registry assigned.
pub struct DataAccessor<C: Component> {
    id: ComponentId,
    _marker: PhantomData<fn() -> C>,
}

impl<C: Component> DataAccessor<C> {
    /// The component id this accessor resolves to.
    #[inline]
    #[must_use]
    pub const fn id(self) -> ComponentId {
        self.id
    }

    /// Name of the component type.
    #[inline]
    #[must_use]
    pub fn name(self) -> &'static str {
        C::name()
    }
}

impl<C: Component> Clone for DataAccessor<C> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<C: Component> Copy for DataAccessor<C> {}

impl<C: Component> fmt::Debug for DataAccessor<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DataAccessor")
            .field("id", &self.id)
            .field("name", &C::name())
            .finish()
    }
}

impl<C: Component> From<DataAccessor<C>> for ComponentId {
    fn from(accessor: DataAccessor<C>) -> Self {
        accessor.id
    }
}

/// Rebuilds a typed record from captured bytes.
pub(crate) type RecordFactory =
    fn(&ComponentInfo, &[u8], &[u8], RecordFlags) -> CoreResult<Box<dyn ErasedRecord>>;

/// Registration data for one component type.
#[derive(Clone, Copy)]
pub struct ComponentInfo {
    id: ComponentId,
    name: &'static str,
    type_id: TypeId,
    size: usize,
    factory: RecordFactory,
}

impl ComponentInfo {
    /// Registered id.
    #[inline]
    #[must_use]
    pub const fn id(&self) -> ComponentId {
        self.id
    }

    /// Component type name.
    #[inline]
    #[must_use]
    pub const fn name(&self) -> &'static str {
        self.name
    }

    /// Rust type id of the component.
    #[inline]
    #[must_use]
    pub const fn type_id(&self) -> TypeId {
        self.type_id
    }

    /// Size of one component value in bytes.
    #[inline]
    #[must_use]
    pub const fn size(&self) -> usize {
        self.size
    }

    pub(crate) fn restore(
        &self,
        current: &[u8],
        previous: &[u8],
        flags: RecordFlags,
    ) -> CoreResult<Box<dyn ErasedRecord>> {
        (self.factory)(self, current, previous, flags)
    }
}

impl fmt::Debug for ComponentInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComponentInfo")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("size", &self.size)
            .finish_non_exhaustive()
    }
}

fn restore_record<C: Component>(
    info: &ComponentInfo,
    current: &[u8],
    previous: &[u8],
    flags: RecordFlags,
) -> CoreResult<Box<dyn ErasedRecord>> {
    for payload in [current, previous] {
        if payload.len() != info.size {
            return Err(CoreError::ComponentSizeMismatch {
                name: info.name.to_owned(),
                expected: info.size,
                actual: payload.len(),
            });
        }
    }

    let current: C = bytemuck::pod_read_unaligned(current);
    let previous: C = bytemuck::pod_read_unaligned(previous);
    Ok(Box::new(ComponentRecord::from_parts(current, previous, flags)))
}

/// Registry mapping component types to dense ids.
///
/// Each type registers once; the registry keeps an explicit id-to-factory
/// table used to rebuild records from snapshots.
#[derive(Debug, Default)]
pub struct ComponentRegistry {
    infos: Vec<ComponentInfo>,
    by_type: HashMap<TypeId, ComponentId>,
    by_name: HashMap<&'static str, ComponentId>,
}

impl ComponentRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `C`, returning its accessor.
    ///
    /// Registering the same type again returns the existing accessor.
    ///
    /// # Panics
    ///
    /// Panics if more than `u32::MAX` component types are registered.
    pub fn register<C: Component>(&mut self) -> DataAccessor<C> {
        let type_id = TypeId::of::<C>();
        if let Some(&id) = self.by_type.get(&type_id) {
            return DataAccessor {
                id,
                _marker: PhantomData,
            };
        }

        let raw = u32::try_from(self.infos.len()).expect("component id space exhausted");
        let id = ComponentId(raw);
        self.infos.push(ComponentInfo {
            id,
            name: C::name(),
            type_id,
            size: std::mem::size_of::<C>(),
            factory: restore_record::<C>,
        });
        self.by_type.insert(type_id, id);
        self.by_name.insert(C::name(), id);
        tracing::trace!(component = C::name(), id = raw, "registered component");

        DataAccessor {
            id,
            _marker: PhantomData,
        }
    }

    /// Returns the accessor for `C` if it has been registered.
    #[must_use]
    pub fn accessor<C: Component>(&self) -> Option<DataAccessor<C>> {
        self.by_type.get(&TypeId::of::<C>()).map(|&id| DataAccessor {
            id,
            _marker: PhantomData,
        })
    }

    /// Looks up registration data by id.
    #[must_use]
    pub fn info(&self, id: ComponentId) -> Option<&ComponentInfo> {
        self.infos.get(id.0 as usize)
    }

    /// Looks up registration data by component name.
    #[must_use]
    pub fn info_by_name(&self, name: &str) -> Option<&ComponentInfo> {
        self.by_name.get(name).and_then(|&id| self.info(id))
    }

    /// Name of a registered component, or `"<unregistered>"`.
    #[must_use]
    pub fn name_of(&self, id: ComponentId) -> &'static str {
        self.info(id).map_or("<unregistered>", ComponentInfo::name)
    }

    /// Number of registered component types.
    #[must_use]
    pub fn len(&self) -> usize {
        self.infos.len()
    }

    /// Returns true if no component has been registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.infos.is_empty()
    }

    /// Iterates over all registrations in id order.
    pub fn iter(&self) -> impl Iterator<Item = &ComponentInfo> {
        self.infos.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytemuck::Zeroable;

    #[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
    #[repr(C)]
    struct Position {
        x: f32,
        y: f32,
    }

    impl Component for Position {}

    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
    #[repr(C)]
    struct Health {
        value: i32,
    }

    impl Component for Health {
        fn name() -> &'static str {
            "Health"
        }
    }

    #[test]
    fn test_register_assigns_dense_ids() {
        let mut registry = ComponentRegistry::new();
        let position = registry.register::<Position>();
        let health = registry.register::<Health>();

        assert_eq!(position.id(), ComponentId::new(0));
        assert_eq!(health.id(), ComponentId::new(1));
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_register_is_idempotent() {
        let mut registry = ComponentRegistry::new();
        let first = registry.register::<Health>();
        let second = registry.register::<Health>();

        assert_eq!(first.id(), second.id());
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.accessor::<Health>().map(DataAccessor::id), Some(first.id()));
    }

    #[test]
    fn test_lookup_by_name() {
        let mut registry = ComponentRegistry::new();
        registry.register::<Position>();
        let health = registry.register::<Health>();

        let info = registry.info_by_name("Health").unwrap();
        assert_eq!(info.id(), health.id());
        assert_eq!(info.size(), 4);
        assert!(registry.info_by_name("Mana").is_none());
        assert_eq!(registry.name_of(ComponentId::new(7)), "<unregistered>");
    }

    #[test]
    fn test_factory_rejects_wrong_size() {
        let mut registry = ComponentRegistry::new();
        let health = registry.register::<Health>();
        let info = registry.info(health.id()).unwrap();

        let result = info.restore(&[0u8; 3], &[0u8; 4], RecordFlags::default());
        assert!(matches!(
            result,
            Err(CoreError::ComponentSizeMismatch { expected: 4, actual: 3, .. })
        ));
    }
}
