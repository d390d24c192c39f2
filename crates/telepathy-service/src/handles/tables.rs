use std::rc::Rc;

use super::{EntityType, HandleTable};
use crate::errors::HandleError;

/// The handle tables owned by one connection, one per entity type.
///
/// Contacts are mandatory; rooms, lists and groups exist only when the
/// backend supports them.
#[derive(Debug, Clone)]
pub struct HandleTables {
    contact: Rc<dyn HandleTable>,
    room: Option<Rc<dyn HandleTable>>,
    list: Option<Rc<dyn HandleTable>>,
    group: Option<Rc<dyn HandleTable>>,
}

impl HandleTables {
    /// Tables holding only a contact table.
    #[must_use]
    pub fn new(contact: Rc<dyn HandleTable>) -> Self {
        Self {
            contact,
            room: None,
            list: None,
            group: None,
        }
    }

    /// Adds a room table.
    #[must_use]
    pub fn with_rooms(mut self, table: Rc<dyn HandleTable>) -> Self {
        self.room = Some(table);
        self
    }

    /// Adds a list table.
    #[must_use]
    pub fn with_lists(mut self, table: Rc<dyn HandleTable>) -> Self {
        self.list = Some(table);
        self
    }

    /// Adds a group table.
    #[must_use]
    pub fn with_groups(mut self, table: Rc<dyn HandleTable>) -> Self {
        self.group = Some(table);
        self
    }

    /// Contact table.
    #[must_use]
    pub fn contacts(&self) -> &Rc<dyn HandleTable> {
        &self.contact
    }

    /// Table for `entity`.
    ///
    /// # Errors
    ///
    /// Returns [`HandleError::UnsupportedEntity`] for [`EntityType::None`] and
    /// for entity types the connection has no table for.
    pub fn get(&self, entity: EntityType) -> Result<&Rc<dyn HandleTable>, HandleError> {
        let table = match entity {
            EntityType::Contact => Some(&self.contact),
            EntityType::Room => self.room.as_ref(),
            EntityType::List => self.list.as_ref(),
            EntityType::Group => self.group.as_ref(),
            EntityType::None => None,
        };
        table.ok_or(HandleError::UnsupportedEntity { entity })
    }

    /// Reclaims unreferenced handles in every table.
    pub fn collect_unreferenced(&self) -> usize {
        [
            Some(&self.contact),
            self.room.as_ref(),
            self.list.as_ref(),
            self.group.as_ref(),
        ]
        .into_iter()
        .flatten()
        .map(|table| table.collect_unreferenced())
        .sum()
    }
}
