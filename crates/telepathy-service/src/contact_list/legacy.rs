//! Raw-integer view of contact-list channels for old clients.
//!
//! Older clients list channels as `(path, type, entity type, handle)` tuples
//! and address members by bare handle numbers. [`LegacyContactList`] borrows a
//! [`ContactListManager`] and translates both at the boundary; the manager
//! itself only ever sees [`HandleSet`]s.

use super::{ContactListBackend, ContactListManager};
use crate::channel_manager::ChannelManager;
use crate::connection::ChannelInfo;
use crate::errors::TpError;
use crate::handles::{Handle, HandleRef, HandleSet};
use crate::membership::{LocalPendingInfo, Membership};
use crate::transport::ObjectPath;

/// Legacy adapter over a [`ContactListManager`].
#[derive(Debug)]
pub struct LegacyContactList<'a, B: ContactListBackend> {
    manager: &'a mut ContactListManager<B>,
}

impl<'a, B: ContactListBackend> LegacyContactList<'a, B> {
    /// Wraps `manager` for the duration of one legacy call.
    #[must_use]
    pub const fn new(manager: &'a mut ContactListManager<B>) -> Self {
        Self { manager }
    }

    /// Announced contact-list channels in `ListChannels` shape.
    #[must_use]
    pub fn list_channels(&self) -> Vec<ChannelInfo> {
        self.manager
            .channels()
            .iter()
            .map(ChannelInfo::from)
            .collect()
    }

    /// `AddMembers` with raw contact handles.
    ///
    /// # Errors
    ///
    /// Returns `InvalidHandle` for `0` or unallocated handles, otherwise
    /// whatever [`ContactListManager::add_members`] returns.
    pub fn add_members(
        &mut self,
        path: &ObjectPath,
        contacts: &[u32],
        message: &str,
    ) -> Result<(), TpError> {
        let resolved = self.hold_contacts(contacts)?;
        self.manager.add_members(path, &resolved, message)
    }

    /// `RemoveMembers` with raw contact handles.
    ///
    /// # Errors
    ///
    /// Returns `InvalidHandle` for `0` or unallocated handles, otherwise
    /// whatever [`ContactListManager::remove_members`] returns.
    pub fn remove_members(
        &mut self,
        path: &ObjectPath,
        contacts: &[u32],
        message: &str,
    ) -> Result<(), TpError> {
        let resolved = self.hold_contacts(contacts)?;
        self.manager.remove_members(path, &resolved, message)
    }

    /// `GetAllMembers`: members, local-pending and remote-pending.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` when no contact-list channel lives at
    /// `path`.
    pub fn get_all_members(
        &self,
        path: &ObjectPath,
    ) -> Result<(Vec<u32>, Vec<u32>, Vec<u32>), TpError> {
        let (members, local, remote) = self.membership_at(path)?.all_members();
        Ok((raw(&members), raw(&local), raw(&remote)))
    }

    /// `GetLocalPendingMembersWithInfo`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` when no contact-list channel lives at
    /// `path`.
    pub fn get_local_pending_members_with_info(
        &self,
        path: &ObjectPath,
    ) -> Result<Vec<LocalPendingInfo>, TpError> {
        Ok(self.membership_at(path)?.local_pending_info())
    }

    /// `GetGroupFlags` as the raw bit pattern.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` when no contact-list channel lives at
    /// `path`.
    pub fn get_group_flags(&self, path: &ObjectPath) -> Result<u32, TpError> {
        Ok(self.membership_at(path)?.flags().bits())
    }

    fn membership_at(&self, path: &ObjectPath) -> Result<&Membership, TpError> {
        self.manager
            .channel_at(path)
            .filter(|channel| channel.is_announced())
            .map(super::ContactListChannel::membership)
            .ok_or_else(|| TpError::invalid_argument(format!("no contact list channel at {path}")))
    }

    fn hold_contacts(&self, contacts: &[u32]) -> Result<HandleSet, TpError> {
        let table = self.manager.tables.contacts();
        contacts
            .iter()
            .map(|&raw_handle| -> Result<HandleRef, TpError> {
                let handle = Handle::new(raw_handle).ok_or_else(|| {
                    TpError::invalid_handle("handle 0 is never a valid contact")
                })?;
                Ok(table.hold(handle)?)
            })
            .collect()
    }
}

fn raw(handles: &[Handle]) -> Vec<u32> {
    handles.iter().copied().map(Handle::get).collect()
}
