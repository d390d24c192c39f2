//! Contact-list synchroniser: presence lists and groups as group-shaped
//! channels.
//!
//! [`ContactListManager`] is a [`ChannelManager`] whose channels mirror
//! state a [`ContactListBackend`] owns. The well-known lists exist from
//! construction but stay unannounced until the backend calls
//! [`ContactListManager::mark_roster_received`]; requests naming them before
//! that point are queued on the channel and answered when it is announced.
//! After the roster arrives, the backend reports every change through the
//! `notify_*` methods and the manager turns it into membership deltas.

mod backend;
mod channel;
pub mod legacy;

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;
use std::str::FromStr;

use serde_json::json;
use strum::IntoEnumIterator;
use tracing::{debug, info, warn};

use crate::channel_manager::{
    ChannelDetails, ChannelManager, ManagerContext, Offer, RequestableChannelClass,
};
use crate::connection::ConnectionStatus;
use crate::errors::TpError;
use crate::handles::{EntityType, HandleRef, HandleSet, HandleTables};
use crate::membership::{ChangeReason, GroupFlags, Membership, MembershipChange};
use crate::requests::{
    CHANNEL_TYPE, CHANNEL_TYPE_CONTACT_LIST, ChannelRequest, ManagerEvents, RequestMethod,
    RequestToken, TARGET_HANDLE, TARGET_HANDLE_TYPE, TARGET_ID,
};
use crate::transport::{ObjectPath, Signal, SignalEmitter, Transport};

pub use backend::{
    ContactListBackend, ContactListCapabilities, GroupRename, GroupSupport, PresenceState,
    PresenceStates,
};
pub use channel::{ContactListChannel, ContactListTarget, ListKind};

/// Tracing target for contact-list synchronisation.
pub(crate) const CONTACT_LIST_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::contact_list");

/// Progress of the initial roster download.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RosterState {
    /// Waiting for the backend; requests queue.
    Pending,
    /// The roster is known and changes are applied as they arrive.
    Received,
    /// The roster could not be retrieved; requests fail with this error.
    Failed(TpError),
    /// The connection has gone; nothing is served any more.
    Disconnected,
}

/// Channel manager for contact lists and groups.
#[derive(Debug)]
pub struct ContactListManager<B: ContactListBackend> {
    backend: B,
    capabilities: ContactListCapabilities,
    transport: Rc<dyn Transport>,
    base_path: ObjectPath,
    tables: HandleTables,
    events: ManagerEvents,
    queue_limit: usize,
    roster: RosterState,
    lists: BTreeMap<ListKind, ContactListChannel>,
    groups: BTreeMap<String, ContactListChannel>,
}

impl<B: ContactListBackend> ContactListManager<B> {
    /// Builds the manager and its always-present list channels.
    #[must_use]
    pub fn new(context: &ManagerContext, backend: B) -> Self {
        let capabilities = backend.capabilities();
        let mut manager = Self {
            backend,
            capabilities,
            transport: Rc::clone(context.transport()),
            base_path: context.connection_path().child("ContactList"),
            tables: context.tables().clone(),
            events: context.events().clone(),
            queue_limit: context.config().roster_queue_limit(),
            roster: RosterState::Pending,
            lists: BTreeMap::new(),
            groups: BTreeMap::new(),
        };
        manager.create_supported_lists();
        manager
    }

    /// Builds the manager behind the shared cell a connection registers.
    #[must_use]
    pub fn shared(context: &ManagerContext, backend: B) -> Rc<RefCell<Self>> {
        Rc::new(RefCell::new(Self::new(context, backend)))
    }

    /// The protocol backend.
    #[must_use]
    pub const fn backend(&self) -> &B {
        &self.backend
    }

    /// Capabilities read at construction.
    #[must_use]
    pub const fn capabilities(&self) -> ContactListCapabilities {
        self.capabilities
    }

    /// Progress of the initial roster download.
    #[must_use]
    pub const fn roster_state(&self) -> &RosterState {
        &self.roster
    }

    /// Channel of a well-known list, announced or not.
    #[must_use]
    pub fn list(&self, kind: ListKind) -> Option<&ContactListChannel> {
        self.lists.get(&kind)
    }

    /// Channel of a group, by normalised name.
    #[must_use]
    pub fn group(&self, name: &str) -> Option<&ContactListChannel> {
        self.groups.get(name)
    }

    /// Names of every group with a channel.
    #[must_use]
    pub fn group_names(&self) -> Vec<String> {
        self.groups.keys().cloned().collect()
    }

    /// Channel at `path`.
    #[must_use]
    pub fn channel_at(&self, path: &ObjectPath) -> Option<&ContactListChannel> {
        self.all_channels().find(|channel| channel.path() == path)
    }

    /// Every list channel followed by every group channel.
    pub fn all_channels(&self) -> impl Iterator<Item = &ContactListChannel> {
        self.lists.values().chain(self.groups.values())
    }

    /// Requests waiting for the roster.
    #[must_use]
    pub fn queued_requests(&self) -> usize {
        self.all_channels().map(|channel| channel.queued().len()).sum()
    }

    /// Records that the initial roster is available.
    ///
    /// Creates the remaining list channels and the groups the backend knows,
    /// loads contacts, blocked contacts and group memberships, then announces
    /// every channel together with the requests queued on it. Only the first
    /// call has any effect.
    pub fn mark_roster_received(&mut self) {
        if self.roster != RosterState::Pending {
            warn!(
                target: CONTACT_LIST_TARGET,
                state = ?self.roster,
                "roster received more than once"
            );
            return;
        }
        self.roster = RosterState::Received;
        self.create_supported_lists();

        let known_groups: Vec<String> = if self.capabilities.groups.is_supported() {
            self.backend
                .groups()
                .iter()
                .filter_map(|name| self.backend.normalize_group(name))
                .collect()
        } else {
            Vec::new()
        };
        for name in &known_groups {
            if let Err(error) = self.ensure_group(name, false) {
                warn!(target: CONTACT_LIST_TARGET, group = %name, %error, "group skipped");
            }
        }
        self.settle_requested_groups(&known_groups);

        let contacts = self.backend.contacts();
        info!(
            target: CONTACT_LIST_TARGET,
            contacts = contacts.len(),
            groups = known_groups.len(),
            "roster received"
        );
        self.apply_contacts(&contacts, &HandleSet::new());

        if self.capabilities.can_block {
            let blocked = self.backend.blocked_contacts();
            if let Some(deny) = self.lists.get_mut(&ListKind::Deny) {
                deny.membership_mut()
                    .change_members(MembershipChange::new().add(blocked));
            }
        }

        if self.capabilities.groups.is_supported() {
            self.load_group_members(&contacts);
        }

        // Channels carry the initial state by the time clients see them.
        self.announce_pending();
    }

    /// Records that the initial roster cannot be retrieved.
    ///
    /// Every queued request fails with `error`, as do later requests.
    pub fn mark_roster_failed(&mut self, error: TpError) {
        if self.roster != RosterState::Pending {
            warn!(
                target: CONTACT_LIST_TARGET,
                state = ?self.roster,
                "roster failure after the roster settled ignored"
            );
            return;
        }
        warn!(target: CONTACT_LIST_TARGET, %error, "roster download failed");
        let queued: Vec<RequestToken> = self
            .lists
            .values_mut()
            .chain(self.groups.values_mut())
            .flat_map(ContactListChannel::take_queued)
            .collect();
        for token in queued {
            self.events.request_failed(token, error.clone());
        }
        self.roster = RosterState::Failed(error);
    }

    /// Re-reads presence states of `changed` and drops `removed` from the
    /// subscribe, publish and stored lists.
    ///
    /// Ignored until the roster has been received.
    pub fn notify_contacts_changed(&mut self, changed: &HandleSet, removed: &HandleSet) {
        if self.roster != RosterState::Received {
            debug!(
                target: CONTACT_LIST_TARGET,
                changed = changed.len(),
                removed = removed.len(),
                "contact change before the roster ignored"
            );
            return;
        }
        self.apply_contacts(changed, removed);
    }

    /// Re-reads whether each of `contacts` is blocked and updates the deny
    /// list.
    pub fn notify_blocking_changed(&mut self, contacts: &HandleSet) {
        if self.roster != RosterState::Received {
            return;
        }
        let (blocked, unblocked): (Vec<HandleRef>, Vec<HandleRef>) = contacts
            .iter()
            .cloned()
            .partition(|contact| self.backend.is_blocked(contact.handle()));
        let Some(deny) = self.lists.get_mut(&ListKind::Deny) else {
            warn!(target: CONTACT_LIST_TARGET, "blocking change without a deny list");
            return;
        };
        debug!(
            target: CONTACT_LIST_TARGET,
            blocked = blocked.len(),
            unblocked = unblocked.len(),
            "blocking changed"
        );
        deny.membership_mut()
            .change_members(MembershipChange::new().add(blocked).remove(unblocked));
    }

    /// Creates channels for new groups.
    pub fn notify_groups_created(&mut self, names: &[String]) {
        if !self.accepts_group_notifications() {
            return;
        }
        for raw in names {
            let Some(name) = self.backend.normalize_group(raw) else {
                warn!(target: CONTACT_LIST_TARGET, group = %raw, "invalid group name ignored");
                continue;
            };
            if let Err(error) = self.ensure_group(&name, false) {
                warn!(target: CONTACT_LIST_TARGET, group = %name, %error, "group skipped");
            }
        }
        self.announce_pending();
    }

    /// Empties and closes the channels of removed groups.
    pub fn notify_groups_removed(&mut self, names: &[String]) {
        if !self.accepts_group_notifications() {
            return;
        }
        for raw in names {
            let Some(name) = self.backend.normalize_group(raw) else {
                continue;
            };
            let Some(mut channel) = self.groups.remove(&name) else {
                debug!(target: CONTACT_LIST_TARGET, group = %name, "unknown group removed");
                continue;
            };
            channel.membership_mut().remove_all(ChangeReason::None);
            info!(target: CONTACT_LIST_TARGET, group = %name, "group removed");
            self.close(channel, &TpError::not_available(format!("group '{name}' was removed")));
        }
    }

    /// Moves the members of `old` to a channel for `new` and closes `old`.
    pub fn notify_groups_renamed(&mut self, old: &str, new: &str) {
        if !self.accepts_group_notifications() {
            return;
        }
        let (Some(old_name), Some(new_name)) = (
            self.backend.normalize_group(old),
            self.backend.normalize_group(new),
        ) else {
            warn!(target: CONTACT_LIST_TARGET, old, new, "invalid group rename ignored");
            return;
        };
        let Some(mut previous) = self.groups.remove(&old_name) else {
            warn!(target: CONTACT_LIST_TARGET, group = %old_name, "rename of unknown group");
            return;
        };
        let members = previous.membership().members().clone();
        if let Err(error) = self.ensure_group(&new_name, false) {
            warn!(target: CONTACT_LIST_TARGET, group = %new_name, %error, "renamed group skipped");
        }
        self.announce_pending();
        if let Some(renamed) = self.groups.get_mut(&new_name) {
            renamed.membership_mut().change_members(
                MembershipChange::new()
                    .add(members)
                    .reason(ChangeReason::Renamed),
            );
        }
        previous.membership_mut().remove_all(ChangeReason::Renamed);
        info!(target: CONTACT_LIST_TARGET, old = %old_name, new = %new_name, "group renamed");
        self.close(
            previous,
            &TpError::not_available(format!("group '{old_name}' was renamed")),
        );
    }

    /// Adds `contacts` to the `added` groups and removes them from the
    /// `removed` groups, creating channels for groups seen for the first
    /// time.
    pub fn notify_groups_changed(
        &mut self,
        contacts: &HandleSet,
        added: &[String],
        removed: &[String],
    ) {
        if !self.accepts_group_notifications() || self.roster != RosterState::Received {
            return;
        }
        let joined: Vec<String> = added
            .iter()
            .filter_map(|name| self.backend.normalize_group(name))
            .collect();
        let left: Vec<String> = removed
            .iter()
            .filter_map(|name| self.backend.normalize_group(name))
            .collect();
        for name in &joined {
            if let Err(error) = self.ensure_group(name, false) {
                warn!(target: CONTACT_LIST_TARGET, group = %name, %error, "group skipped");
            }
        }
        self.announce_pending();
        for name in &joined {
            if let Some(group) = self.groups.get_mut(name) {
                group
                    .membership_mut()
                    .change_members(MembershipChange::new().add(contacts.iter().cloned()));
            }
        }
        for name in &left {
            if let Some(group) = self.groups.get_mut(name) {
                group
                    .membership_mut()
                    .change_members(MembershipChange::new().remove(contacts.iter().cloned()));
            }
        }
    }

    /// Handles a client adding `contacts` to the channel at `path`.
    ///
    /// The channel's group flags are checked first; the matching backend
    /// mutator runs only for contacts that are not members yet.
    ///
    /// # Errors
    ///
    /// Returns `NotAvailable` before the roster arrives,
    /// `InvalidArgument` for an unknown path, the policy error from the
    /// membership check, or the backend's error.
    pub fn add_members(
        &mut self,
        path: &ObjectPath,
        contacts: &HandleSet,
        message: &str,
    ) -> Result<(), TpError> {
        self.ensure_roster_received()?;
        let target = self.target_at(path)?;
        let outstanding = self.channel(&target)?.membership().check_add(contacts)?;
        if outstanding.is_empty() {
            return Ok(());
        }
        debug!(
            target: CONTACT_LIST_TARGET,
            channel = target.name(),
            contacts = outstanding.len(),
            "client adding members"
        );
        let nobody = HandleSet::new();
        match &target {
            ContactListTarget::List(ListKind::Subscribe) => {
                self.backend.request_subscription(&outstanding, message)?;
                self.apply_contacts(&outstanding, &nobody);
            }
            ContactListTarget::List(ListKind::Publish) => {
                self.backend.authorize_publication(&outstanding)?;
                self.apply_contacts(&outstanding, &nobody);
            }
            ContactListTarget::List(ListKind::Stored) => {
                self.backend.store_contacts(&outstanding)?;
                self.apply_contacts(&outstanding, &nobody);
            }
            ContactListTarget::List(ListKind::Deny) => {
                self.backend.block_contacts(&outstanding)?;
                self.notify_blocking_changed(&outstanding);
            }
            ContactListTarget::Group(name) => {
                self.backend.add_to_group(name, &outstanding)?;
                self.notify_groups_changed(&outstanding, &[name.clone()], &[]);
            }
        }
        Ok(())
    }

    /// Handles a client removing `contacts` from the channel at `path`.
    ///
    /// # Errors
    ///
    /// Returns `NotAvailable` before the roster arrives or for contacts in
    /// none of the channel's sets, `InvalidArgument` for an unknown path,
    /// `PermissionDenied` when the flags forbid it, or the backend's error.
    pub fn remove_members(
        &mut self,
        path: &ObjectPath,
        contacts: &HandleSet,
        message: &str,
    ) -> Result<(), TpError> {
        self.ensure_roster_received()?;
        let target = self.target_at(path)?;
        self.channel(&target)?.membership().check_remove(contacts)?;
        debug!(
            target: CONTACT_LIST_TARGET,
            channel = target.name(),
            contacts = contacts.len(),
            message,
            "client removing members"
        );
        let nobody = HandleSet::new();
        match &target {
            ContactListTarget::List(ListKind::Subscribe) => {
                self.backend.unsubscribe(contacts)?;
                self.apply_contacts(contacts, &nobody);
            }
            ContactListTarget::List(ListKind::Publish) => {
                self.backend.unpublish(contacts)?;
                self.apply_contacts(contacts, &nobody);
            }
            ContactListTarget::List(ListKind::Stored) => {
                self.backend.remove_contacts(contacts)?;
                self.apply_contacts(&nobody, contacts);
            }
            ContactListTarget::List(ListKind::Deny) => {
                self.backend.unblock_contacts(contacts)?;
                self.notify_blocking_changed(contacts);
            }
            ContactListTarget::Group(name) => {
                self.backend.remove_from_group(name, contacts)?;
                self.notify_groups_changed(contacts, &[], &[name.clone()]);
            }
        }
        Ok(())
    }

    /// Handles `Close` on the channel at `path`.
    ///
    /// # Errors
    ///
    /// Lists cannot be closed (`NotImplemented`); non-empty groups cannot be
    /// deleted (`NotAvailable`); empty groups are removed through the
    /// backend, whose error is returned unchanged.
    pub fn close_channel(&mut self, path: &ObjectPath) -> Result<(), TpError> {
        let target = self.target_at(path)?;
        let ContactListTarget::Group(name) = target else {
            return Err(TpError::not_implemented(
                "ContactList channels with handle type LIST may not be closed",
            ));
        };
        let (members, local, remote) = self.channel_for_group(&name)?.membership().all_members();
        if !(members.is_empty() && local.is_empty() && remote.is_empty()) {
            return Err(TpError::not_available(
                "Non-empty groups may not be deleted (closed)",
            ));
        }
        if !self.capabilities.groups.is_mutable() {
            return Err(TpError::not_implemented(
                "groups cannot be removed from this contact list",
            ));
        }
        self.backend.remove_group(&name)?;
        self.notify_groups_removed(&[name]);
        Ok(())
    }

    /// Renames a group through the backend, natively or by copying members
    /// into a new group.
    ///
    /// # Errors
    ///
    /// Returns `NotImplemented` without mutable groups, `InvalidArgument`
    /// for unacceptable names, `NotAvailable` when `old` does not exist or
    /// `new` already does, or the backend's error.
    pub fn rename_group(&mut self, old: &str, new: &str) -> Result<(), TpError> {
        let GroupSupport::Mutable(strategy) = self.capabilities.groups else {
            return Err(TpError::not_implemented(
                "groups cannot be renamed on this contact list",
            ));
        };
        let old_name = self.normalise_group_name(old)?;
        let new_name = self.normalise_group_name(new)?;
        let members = self.channel_for_group(&old_name)?.membership().members().clone();
        if self.groups.contains_key(&new_name) {
            return Err(TpError::not_available(format!(
                "group '{new_name}' already exists"
            )));
        }
        match strategy {
            GroupRename::Native => self.backend.rename_group(&old_name, &new_name)?,
            GroupRename::Emulated => self.emulate_rename(&old_name, &new_name, &members)?,
        }
        self.notify_groups_renamed(&old_name, &new_name);
        Ok(())
    }

    /// Creates `new`, copies `members` into it and removes `old`.
    ///
    /// Once `new` exists on the backend it gets a channel even when a later
    /// step fails, so the manager never loses track of it.
    fn emulate_rename(
        &mut self,
        old: &str,
        new: &str,
        members: &HandleSet,
    ) -> Result<(), TpError> {
        self.backend.create_groups(&[new.to_owned()])?;
        let copied = if members.is_empty() {
            Ok(())
        } else {
            self.backend.add_to_group(new, members)
        };
        if let Err(error) = copied {
            warn!(target: CONTACT_LIST_TARGET, group = new, %error, "rename stopped after creating the group");
            self.notify_groups_created(&[new.to_owned()]);
            return Err(error);
        }
        if let Err(error) = self.backend.remove_group(old) {
            warn!(target: CONTACT_LIST_TARGET, group = old, %error, "rename left the old group in place");
            self.notify_groups_changed(members, &[new.to_owned()], &[]);
            return Err(error);
        }
        Ok(())
    }

    fn handle_request(&mut self, request: &ChannelRequest) -> Offer {
        if request.channel_type() != CHANNEL_TYPE_CONTACT_LIST {
            return Offer::Declined;
        }
        let outcome = match request.entity_type() {
            EntityType::List => self.request_list(request),
            EntityType::Group => self.request_group(request),
            EntityType::None | EntityType::Contact | EntityType::Room => {
                return Offer::Declined;
            }
        };
        if let Err(error) = outcome {
            debug!(
                target: CONTACT_LIST_TARGET,
                token = %request.token(),
                %error,
                "contact list request refused"
            );
            self.events.request_failed(request.token(), error);
        }
        Offer::Accepted
    }

    fn request_list(&mut self, request: &ChannelRequest) -> Result<(), TpError> {
        let name = request.target_id().unwrap_or_default();
        let kind = ListKind::from_str(name)
            .map_err(|_| TpError::invalid_handle(format!("'{name}' is not a contact list")))?;
        if !kind.is_supported(self.capabilities) {
            return Err(TpError::not_implemented(format!(
                "the {name} list is not supported by this connection"
            )));
        }
        if request.method() == RequestMethod::Create {
            return Err(TpError::not_available(format!(
                "the {name} list already exists; use EnsureChannel"
            )));
        }
        self.ensure_requests_servable()?;
        self.ensure_list(kind)?;
        let Some(channel) = self.lists.get_mut(&kind) else {
            return Err(TpError::not_available(format!("the {name} list is unavailable")));
        };
        Self::satisfy_or_queue(&self.events, channel, request.token());
        Ok(())
    }

    fn request_group(&mut self, request: &ChannelRequest) -> Result<(), TpError> {
        if !self.capabilities.groups.is_supported() {
            return Err(TpError::not_implemented(
                "contact groups are not supported by this connection",
            ));
        }
        let name = self
            .backend
            .normalize_group(request.target_id().unwrap_or_default())
            .ok_or_else(|| {
                TpError::invalid_handle(format!(
                    "'{}' is not a valid group name",
                    request.target_id().unwrap_or_default()
                ))
            })?;
        self.ensure_requests_servable()?;

        if let Some(existing) = self.groups.get_mut(&name) {
            if request.method() == RequestMethod::Create {
                return Err(TpError::not_available(format!(
                    "group '{name}' already exists"
                )));
            }
            Self::satisfy_or_queue(&self.events, existing, request.token());
            return Ok(());
        }

        if self.roster == RosterState::Received {
            if !self.capabilities.groups.is_mutable() {
                return Err(TpError::not_available(format!(
                    "group '{name}' does not exist and groups cannot be created"
                )));
            }
            self.backend.create_groups(&[name.clone()])?;
            self.ensure_group(&name, true)?;
            if let Some(created) = self.groups.get_mut(&name) {
                let mut tokens = created.announce();
                tokens.push(request.token());
                info!(target: CONTACT_LIST_TARGET, group = %name, "group created on request");
                self.events.new_channel(created.details(), tokens);
            }
            return Ok(());
        }

        self.ensure_group(&name, true)?;
        if let Some(created) = self.groups.get_mut(&name) {
            created.queue(request.token());
        }
        Ok(())
    }

    fn satisfy_or_queue(
        events: &ManagerEvents,
        channel: &mut ContactListChannel,
        token: RequestToken,
    ) {
        if channel.is_announced() {
            events.request_already_satisfied(token, &channel.details());
        } else {
            debug!(
                target: CONTACT_LIST_TARGET,
                %token,
                channel = channel.target().name(),
                "request queued until the roster arrives"
            );
            channel.queue(token);
        }
    }

    fn ensure_requests_servable(&self) -> Result<(), TpError> {
        match &self.roster {
            RosterState::Received => Ok(()),
            RosterState::Pending if self.queued_requests() >= self.queue_limit => {
                Err(TpError::not_available(
                    "too many contact list requests are waiting for the roster",
                ))
            }
            RosterState::Pending => Ok(()),
            RosterState::Failed(error) => Err(error.clone()),
            RosterState::Disconnected => Err(TpError::disconnected("Connection is disconnected")),
        }
    }

    fn ensure_roster_received(&self) -> Result<(), TpError> {
        match &self.roster {
            RosterState::Received => Ok(()),
            RosterState::Pending => Err(TpError::not_available(
                "the contact list has not been received yet",
            )),
            RosterState::Failed(error) => Err(error.clone()),
            RosterState::Disconnected => Err(TpError::disconnected("Connection is disconnected")),
        }
    }

    const fn accepts_group_notifications(&self) -> bool {
        self.capabilities.groups.is_supported()
            && !matches!(self.roster, RosterState::Disconnected)
    }

    fn target_at(&self, path: &ObjectPath) -> Result<ContactListTarget, TpError> {
        self.channel_at(path)
            .map(|channel| channel.target().clone())
            .ok_or_else(|| TpError::invalid_argument(format!("no contact list channel at {path}")))
    }

    fn channel(&self, target: &ContactListTarget) -> Result<&ContactListChannel, TpError> {
        match target {
            ContactListTarget::List(kind) => self.lists.get(kind).ok_or_else(|| {
                TpError::not_available(format!("the {} list is unavailable", kind.name()))
            }),
            ContactListTarget::Group(name) => self.channel_for_group(name),
        }
    }

    fn channel_for_group(&self, name: &str) -> Result<&ContactListChannel, TpError> {
        self.groups
            .get(name)
            .ok_or_else(|| TpError::not_available(format!("group '{name}' does not exist")))
    }

    fn normalise_group_name(&self, raw: &str) -> Result<String, TpError> {
        self.backend
            .normalize_group(raw)
            .ok_or_else(|| TpError::invalid_argument(format!("'{raw}' is not a valid group name")))
    }

    fn create_supported_lists(&mut self) {
        let capabilities = self.capabilities;
        for kind in ListKind::iter().filter(|kind| kind.is_supported(capabilities)) {
            if let Err(error) = self.ensure_list(kind) {
                warn!(
                    target: CONTACT_LIST_TARGET,
                    list = kind.name(),
                    %error,
                    "list channel unavailable"
                );
            }
        }
    }

    fn ensure_list(&mut self, kind: ListKind) -> Result<(), TpError> {
        if self.lists.contains_key(&kind) {
            return Ok(());
        }
        let handle = Self::target_handle(&self.tables, EntityType::List, kind.name())?;
        let channel = self.build_channel(
            ContactListTarget::List(kind),
            handle,
            kind.flags(self.capabilities),
            false,
        );
        debug!(
            target: CONTACT_LIST_TARGET,
            list = kind.name(),
            path = %channel.path(),
            "list channel created"
        );
        self.lists.insert(kind, channel);
        Ok(())
    }

    fn ensure_group(&mut self, name: &str, requested: bool) -> Result<(), TpError> {
        if self.groups.contains_key(name) {
            return Ok(());
        }
        let handle = Self::target_handle(&self.tables, EntityType::Group, name)?;
        let flags = if self.capabilities.groups.is_mutable() {
            GroupFlags::CAN_ADD | GroupFlags::CAN_REMOVE | GroupFlags::PROPERTIES
        } else {
            GroupFlags::PROPERTIES
        };
        let channel = self.build_channel(
            ContactListTarget::Group(name.to_owned()),
            handle,
            flags,
            requested,
        );
        debug!(
            target: CONTACT_LIST_TARGET,
            group = name,
            path = %channel.path(),
            "group channel created"
        );
        self.groups.insert(name.to_owned(), channel);
        Ok(())
    }

    fn target_handle(
        tables: &HandleTables,
        entity: EntityType,
        name: &str,
    ) -> Result<HandleRef, TpError> {
        Ok(tables.get(entity)?.ensure(name)?)
    }

    fn build_channel(
        &self,
        target: ContactListTarget,
        handle: HandleRef,
        flags: GroupFlags,
        requested: bool,
    ) -> ContactListChannel {
        let prefix = match target {
            ContactListTarget::List(_) => "List",
            ContactListTarget::Group(_) => "Group",
        };
        let path = self
            .base_path
            .child(&format!("{prefix}{}", handle.handle()));
        let membership = Membership::new(
            SignalEmitter::new(Rc::clone(&self.transport), path),
            None,
            flags,
        );
        ContactListChannel::new(target, handle, membership, requested)
    }

    /// Drops queued group channels the backend does not know, creating the
    /// groups first when clients may create them.
    fn settle_requested_groups(&mut self, known: &[String]) {
        let unknown: Vec<String> = self
            .groups
            .keys()
            .filter(|name| !known.contains(name))
            .cloned()
            .collect();
        if unknown.is_empty() {
            return;
        }
        let created = if self.capabilities.groups.is_mutable() {
            self.backend.create_groups(&unknown)
        } else {
            Err(TpError::not_available(
                "the requested group does not exist and groups cannot be created",
            ))
        };
        let Err(error) = created else {
            info!(
                target: CONTACT_LIST_TARGET,
                groups = unknown.len(),
                "requested groups created"
            );
            return;
        };
        for name in unknown {
            if let Some(channel) = self.groups.remove(&name) {
                warn!(target: CONTACT_LIST_TARGET, group = %name, %error, "requested group dropped");
                self.close(channel, &error);
            }
        }
    }

    fn announce_pending(&mut self) {
        if self.roster != RosterState::Received {
            return;
        }
        let batch: Vec<(ChannelDetails, Vec<RequestToken>)> = self
            .lists
            .values_mut()
            .chain(self.groups.values_mut())
            .filter(|channel| !channel.is_announced())
            .map(|channel| {
                let tokens = channel.announce();
                (channel.details(), tokens)
            })
            .collect();
        if batch.is_empty() {
            return;
        }
        debug!(
            target: CONTACT_LIST_TARGET,
            channels = batch.len(),
            "announcing contact list channels"
        );
        self.events.new_channels(batch);
    }

    fn apply_contacts(&mut self, changed: &HandleSet, removed: &HandleSet) {
        let mut subscribed = HandleSet::new();
        let mut asked = HandleSet::new();
        let mut unsubscribed: HandleSet = removed.clone();
        let mut published = HandleSet::new();
        let mut unpublished: HandleSet = removed.clone();
        let mut requests: Vec<(HandleRef, String)> = Vec::new();
        let mut stored = HandleSet::new();

        for contact in changed {
            if removed.contains(contact.handle()) {
                continue;
            }
            let states = self.backend.states(contact.handle());
            debug!(
                target: CONTACT_LIST_TARGET,
                contact = %contact.handle(),
                subscribe = %states.subscribe,
                publish = %states.publish,
                "contact changed"
            );
            let subscribe_bucket = match states.subscribe {
                PresenceState::Yes => &mut subscribed,
                PresenceState::Ask => &mut asked,
                PresenceState::No => &mut unsubscribed,
            };
            subscribe_bucket.insert(contact.clone());
            match states.publish {
                PresenceState::Yes => {
                    published.insert(contact.clone());
                }
                PresenceState::Ask => requests.push((contact.clone(), states.publish_request)),
                PresenceState::No => {
                    unpublished.insert(contact.clone());
                }
            }
            stored.insert(contact.clone());
        }

        if let Some(subscribe) = self.lists.get_mut(&ListKind::Subscribe) {
            subscribe.membership_mut().change_members(
                MembershipChange::new()
                    .add(subscribed)
                    .remote_pending(asked)
                    .remove(unsubscribed),
            );
        }
        if let Some(publish) = self.lists.get_mut(&ListKind::Publish) {
            publish.membership_mut().change_members(
                MembershipChange::new()
                    .add(published)
                    .remove(unpublished),
            );
            for (contact, message) in requests {
                publish.membership_mut().change_members(
                    MembershipChange::new()
                        .local_pending([contact])
                        .message(message),
                );
            }
        }
        if let Some(stored_list) = self.lists.get_mut(&ListKind::Stored) {
            stored_list.membership_mut().change_members(
                MembershipChange::new()
                    .add(stored)
                    .remove(removed.iter().cloned()),
            );
        }
    }

    fn load_group_members(&mut self, contacts: &HandleSet) {
        let mut by_group: BTreeMap<String, HandleSet> = BTreeMap::new();
        for contact in contacts {
            for raw in self.backend.contact_groups(contact.handle()) {
                if let Some(name) = self.backend.normalize_group(&raw) {
                    by_group.entry(name).or_default().insert(contact.clone());
                }
            }
        }
        for name in by_group.keys() {
            if let Err(error) = self.ensure_group(name, false) {
                warn!(target: CONTACT_LIST_TARGET, group = %name, %error, "group skipped");
            }
        }
        for (name, members) in by_group {
            if let Some(group) = self.groups.get_mut(&name) {
                group
                    .membership_mut()
                    .change_members(MembershipChange::new().add(members));
            }
        }
    }

    fn close(&self, mut channel: ContactListChannel, error: &TpError) {
        for token in channel.take_queued() {
            self.events.request_failed(token, error.clone());
        }
        if channel.is_announced() {
            self.transport.emit_signal(channel.path(), Signal::Closed);
            self.events.channel_closed(channel.path());
        }
    }

    fn disconnect(&mut self) {
        self.roster = RosterState::Disconnected;
        let channels: Vec<ContactListChannel> = std::mem::take(&mut self.lists)
            .into_values()
            .chain(std::mem::take(&mut self.groups).into_values())
            .collect();
        let mut dropped = 0;
        for mut channel in channels {
            dropped += channel.take_queued().len();
            if channel.is_announced() {
                self.transport.emit_signal(channel.path(), Signal::Closed);
            }
        }
        info!(
            target: CONTACT_LIST_TARGET,
            dropped_requests = dropped,
            "contact list torn down"
        );
    }
}

impl<B: ContactListBackend> ChannelManager for ContactListManager<B> {
    fn channels(&self) -> Vec<ChannelDetails> {
        self.all_channels()
            .filter(|channel| channel.is_announced())
            .map(ContactListChannel::details)
            .collect()
    }

    fn requestable_channel_classes(&self) -> Vec<RequestableChannelClass> {
        let mut classes = vec![contact_list_class(EntityType::List)];
        if self.capabilities.groups.is_supported() {
            classes.push(contact_list_class(EntityType::Group));
        }
        classes
    }

    fn create_channel(&mut self, request: &ChannelRequest) -> Offer {
        self.handle_request(request)
    }

    fn ensure_channel(&mut self, request: &ChannelRequest) -> Offer {
        self.handle_request(request)
    }

    fn status_changed(&mut self, status: ConnectionStatus) {
        if status == ConnectionStatus::Disconnected {
            self.disconnect();
        }
    }
}

fn contact_list_class(entity: EntityType) -> RequestableChannelClass {
    RequestableChannelClass {
        fixed: [
            (CHANNEL_TYPE.to_owned(), json!(CHANNEL_TYPE_CONTACT_LIST)),
            (TARGET_HANDLE_TYPE.to_owned(), json!(entity.as_wire())),
        ]
        .into_iter()
        .collect(),
        allowed: vec![TARGET_HANDLE.to_owned(), TARGET_ID.to_owned()],
    }
}

#[cfg(test)]
mod tests;
