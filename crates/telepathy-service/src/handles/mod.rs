//! Connection-scoped handles naming contacts, rooms, lists and groups.
//!
//! A [`Handle`] is an interned integer; the string it stands for lives in a
//! [`HandleTable`]. Components never keep bare handles: they hold a
//! [`HandleRef`], which counts as a reference for as long as it is alive and
//! releases it on drop, or a [`HandleSet`] of them.

mod repo;
mod tables;

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::collections::btree_map;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::num::NonZeroU32;
use std::rc::Rc;

use serde::{Serialize, Serializer};
use strum::Display;

use crate::errors::HandleError;

pub use repo::HandleRepo;
pub use tables::HandleTables;

/// Non-zero numeric handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct Handle(NonZeroU32);

impl Handle {
    /// Wraps a raw wire value; `0` (the "no handle" value) yields `None`.
    #[must_use]
    pub const fn new(raw: u32) -> Option<Self> {
        match NonZeroU32::new(raw) {
            Some(value) => Some(Self(value)),
            None => None,
        }
    }

    /// Raw wire value.
    #[must_use]
    pub const fn get(self) -> u32 {
        self.0.get()
    }

    /// Wire value for an optional handle, `0` when absent.
    #[must_use]
    pub fn raw_or_zero(handle: Option<Self>) -> u32 {
        handle.map_or(0, Self::get)
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "{}", self.0)
    }
}

/// Kind of entity a handle names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Display)]
#[strum(serialize_all = "lowercase")]
pub enum EntityType {
    /// No target at all.
    None,
    /// A contact.
    Contact,
    /// A chat room.
    Room,
    /// A server-side contact list (subscribe, publish, stored, deny).
    List,
    /// A user-defined contact group.
    Group,
}

impl EntityType {
    /// Decodes the wire integer.
    #[must_use]
    pub const fn from_wire(raw: u32) -> Option<Self> {
        match raw {
            0 => Some(Self::None),
            1 => Some(Self::Contact),
            2 => Some(Self::Room),
            3 => Some(Self::List),
            4 => Some(Self::Group),
            _ => None,
        }
    }

    /// Wire integer.
    #[must_use]
    pub const fn as_wire(self) -> u32 {
        match self {
            Self::None => 0,
            Self::Contact => 1,
            Self::Room => 2,
            Self::List => 3,
            Self::Group => 4,
        }
    }
}

impl Serialize for EntityType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u32(self.as_wire())
    }
}

/// Reference bookkeeping behind [`HandleRef`].
///
/// Implementors count one reference per live `HandleRef`. `release` must not
/// invalidate the handle by itself; tables decide when unreferenced handles
/// are reclaimed.
pub trait HandleLedger {
    /// Records one more reference to `handle`.
    fn retain(&self, handle: Handle);

    /// Drops one reference to `handle`.
    fn release(&self, handle: Handle);
}

/// Interned mapping between handles and identifiers for one entity type.
pub trait HandleTable {
    /// Entity type served by this table.
    fn entity_type(&self) -> EntityType;

    /// Normalises `id` and returns a reference to its handle, allocating one
    /// when the identifier has not been seen before.
    ///
    /// # Errors
    ///
    /// Returns [`HandleError::InvalidIdentifier`] when `id` cannot be
    /// normalised and [`HandleError::LookupRequired`] when the identifier has
    /// to be resolved remotely first.
    fn ensure(&self, id: &str) -> Result<HandleRef, HandleError>;

    /// Looks up an identifier without allocating.
    fn lookup(&self, id: &str) -> Option<HandleRef>;

    /// Takes a new reference to an already allocated handle.
    ///
    /// # Errors
    ///
    /// Returns [`HandleError::InvalidHandle`] when the handle is not
    /// allocated.
    fn hold(&self, handle: Handle) -> Result<HandleRef, HandleError>;

    /// Identifier for an allocated handle.
    fn inspect(&self, handle: Handle) -> Option<String>;

    /// Whether the handle is currently allocated.
    fn is_valid(&self, handle: Handle) -> bool;

    /// Reclaims handles nobody references any more, returning how many were
    /// dropped.
    fn collect_unreferenced(&self) -> usize {
        0
    }
}

impl fmt::Debug for dyn HandleTable {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "HandleTable({})", self.entity_type())
    }
}

/// Owned reference to a handle; dropping it releases the reference.
pub struct HandleRef {
    handle: Handle,
    ledger: Rc<dyn HandleLedger>,
}

impl HandleRef {
    /// Records a new reference to `handle` in `ledger`.
    pub fn acquire(handle: Handle, ledger: Rc<dyn HandleLedger>) -> Self {
        ledger.retain(handle);
        Self { handle, ledger }
    }

    /// The referenced handle.
    #[must_use]
    pub const fn handle(&self) -> Handle {
        self.handle
    }
}

impl Clone for HandleRef {
    fn clone(&self) -> Self {
        Self::acquire(self.handle, Rc::clone(&self.ledger))
    }
}

impl Drop for HandleRef {
    fn drop(&mut self) {
        self.ledger.release(self.handle);
    }
}

impl fmt::Debug for HandleRef {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.debug_tuple("HandleRef").field(&self.handle).finish()
    }
}

impl PartialEq for HandleRef {
    fn eq(&self, other: &Self) -> bool {
        self.handle == other.handle
    }
}

impl Eq for HandleRef {}

impl PartialOrd for HandleRef {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HandleRef {
    fn cmp(&self, other: &Self) -> Ordering {
        self.handle.cmp(&other.handle)
    }
}

impl Hash for HandleRef {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.handle.hash(state);
    }
}

/// Ordered set of handle references.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HandleSet {
    entries: BTreeMap<Handle, HandleRef>,
}

impl HandleSet {
    /// Empty set.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            entries: BTreeMap::new(),
        }
    }

    /// Inserts a reference, returning `true` if the handle was not present.
    pub fn insert(&mut self, handle: HandleRef) -> bool {
        match self.entries.entry(handle.handle()) {
            btree_map::Entry::Occupied(_) => false,
            btree_map::Entry::Vacant(slot) => {
                slot.insert(handle);
                true
            }
        }
    }

    /// Removes a handle, returning the reference the set held.
    pub fn remove(&mut self, handle: Handle) -> Option<HandleRef> {
        self.entries.remove(&handle)
    }

    /// Whether the handle is in the set.
    #[must_use]
    pub fn contains(&self, handle: Handle) -> bool {
        self.entries.contains_key(&handle)
    }

    /// Reference held for `handle`.
    #[must_use]
    pub fn get(&self, handle: Handle) -> Option<&HandleRef> {
        self.entries.get(&handle)
    }

    /// Number of handles.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the set is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterates the references in handle order.
    pub fn iter(&self) -> impl Iterator<Item = &HandleRef> {
        self.entries.values()
    }

    /// Handles in ascending order.
    #[must_use]
    pub fn handles(&self) -> Vec<Handle> {
        self.entries.keys().copied().collect()
    }

    /// Whether the two sets share any handle.
    #[must_use]
    pub fn intersects(&self, other: &Self) -> bool {
        self.entries.keys().any(|handle| other.contains(*handle))
    }

    /// Removes every handle and returns the references.
    pub fn drain(&mut self) -> Self {
        std::mem::take(self)
    }
}

impl FromIterator<HandleRef> for HandleSet {
    fn from_iter<I: IntoIterator<Item = HandleRef>>(iter: I) -> Self {
        let mut set = Self::new();
        set.extend(iter);
        set
    }
}

impl Extend<HandleRef> for HandleSet {
    fn extend<I: IntoIterator<Item = HandleRef>>(&mut self, iter: I) {
        for handle in iter {
            self.insert(handle);
        }
    }
}

impl IntoIterator for HandleSet {
    type Item = HandleRef;
    type IntoIter = btree_map::IntoValues<Handle, HandleRef>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_values()
    }
}

impl<'a> IntoIterator for &'a HandleSet {
    type Item = &'a HandleRef;
    type IntoIter = btree_map::Values<'a, Handle, HandleRef>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.values()
    }
}

#[cfg(test)]
mod tests;
