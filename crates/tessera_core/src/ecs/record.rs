//! # Component Records
//!
//! Every component an entity owns is a double-buffered record:
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │ ComponentRecord<C>                           │
//! │   current   <- written by Modify this tick   │
//! │   previous  <- value at the last commit      │
//! │   flags     <- added / modified / removed    │
//! └──────────────────────────────────────────────┘
//!
//! Commit:  previous := current, clear added + modified,
//!          drop records flagged removed
//! ```
//!
//! Readers that must not observe in-flight writes use `previous`; the
//! removal of a record only becomes visible after the commit that follows
//! it, so `previous` stays readable during the removal tick.

use std::any::Any;

use serde::{Deserialize, Serialize};

use super::component::Component;

/// Per-tick bookkeeping flags of a record.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RecordFlags {
    /// Added since the last commit.
    pub was_added: bool,
    /// Modified since the last commit.
    pub was_modified: bool,
    /// Removal requested; the record is deleted at the next commit.
    pub was_removed: bool,
}

impl RecordFlags {
    /// Flags of a freshly added record.
    pub const ADDED: Self = Self {
        was_added: true,
        was_modified: false,
        was_removed: false,
    };

    /// Packs the flags into the low three bits of a byte.
    #[inline]
    #[must_use]
    pub const fn bits(self) -> u8 {
        (self.was_added as u8) | ((self.was_modified as u8) << 1) | ((self.was_removed as u8) << 2)
    }
}

/// A double-buffered component value.
#[derive(Clone, Copy, Debug)]
pub struct ComponentRecord<C: Component> {
    current: C,
    previous: C,
    flags: RecordFlags,
}

impl<C: Component> ComponentRecord<C> {
    /// A record as created by `add_data`: both buffers hold the default.
    #[must_use]
    pub fn added() -> Self {
        Self {
            current: C::default(),
            previous: C::default(),
            flags: RecordFlags::ADDED,
        }
    }

    /// Builds a record from explicit parts (snapshot restore).
    #[must_use]
    pub fn from_parts(current: C, previous: C, flags: RecordFlags) -> Self {
        Self {
            current,
            previous,
            flags,
        }
    }

    /// Value being written this tick.
    #[inline]
    #[must_use]
    pub fn current(&self) -> &C {
        &self.current
    }

    /// Value at the last commit.
    #[inline]
    #[must_use]
    pub fn previous(&self) -> &C {
        &self.previous
    }

    /// Bookkeeping flags.
    #[inline]
    #[must_use]
    pub fn flags(&self) -> RecordFlags {
        self.flags
    }

    pub(crate) fn current_mut(&mut self) -> &mut C {
        &mut self.current
    }
}

/// Type-erased view of a [`ComponentRecord`], stored in the entity's map.
pub(crate) trait ErasedRecord: Send + Sync {
    fn flags(&self) -> RecordFlags;

    fn flags_mut(&mut self) -> &mut RecordFlags;

    /// `previous := current`, clear the added and modified flags.
    fn commit(&mut self);

    /// Resets `current` to the default value.
    fn reset_current(&mut self);

    fn current_bytes(&self) -> &[u8];

    fn previous_bytes(&self) -> &[u8];

    fn boxed_clone(&self) -> Box<dyn ErasedRecord>;

    fn as_any(&self) -> &dyn Any;

    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<C: Component> ErasedRecord for ComponentRecord<C> {
    fn flags(&self) -> RecordFlags {
        self.flags
    }

    fn flags_mut(&mut self) -> &mut RecordFlags {
        &mut self.flags
    }

    fn commit(&mut self) {
        self.previous = self.current;
        self.flags.was_added = false;
        self.flags.was_modified = false;
    }

    fn reset_current(&mut self) {
        self.current = C::default();
    }

    fn current_bytes(&self) -> &[u8] {
        bytemuck::bytes_of(&self.current)
    }

    fn previous_bytes(&self) -> &[u8] {
        bytemuck::bytes_of(&self.previous)
    }

    fn boxed_clone(&self) -> Box<dyn ErasedRecord> {
        Box::new(*self)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
