use strum::Display;

use crate::errors::TpError;
use crate::handles::{Handle, HandleSet};

/// One direction of a presence subscription.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Display)]
#[strum(serialize_all = "UPPERCASE")]
pub enum PresenceState {
    /// No subscription.
    #[default]
    No,
    /// Requested and not yet answered.
    Ask,
    /// Subscription in place.
    Yes,
}

/// Subscription state of one contact, as the backend currently knows it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PresenceStates {
    /// Whether we receive the contact's presence.
    pub subscribe: PresenceState,
    /// Whether the contact receives ours.
    pub publish: PresenceState,
    /// Message the contact attached when asking for our presence.
    pub publish_request: String,
}

impl PresenceStates {
    /// States without a publish request message.
    #[must_use]
    pub const fn new(subscribe: PresenceState, publish: PresenceState) -> Self {
        Self {
            subscribe,
            publish,
            publish_request: String::new(),
        }
    }

    /// Attaches the message sent with a publish request.
    #[must_use]
    pub fn with_request(mut self, message: impl Into<String>) -> Self {
        self.publish_request = message.into();
        self
    }
}

/// How a backend renames groups.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupRename {
    /// The protocol renames in one step.
    Native,
    /// Create the new group, copy its members, drop the old one.
    Emulated,
}

/// Level of group support.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum GroupSupport {
    /// No groups at all.
    #[default]
    None,
    /// Groups are reported but clients cannot change them.
    ReadOnly,
    /// Clients may change groups.
    Mutable(GroupRename),
}

impl GroupSupport {
    /// Whether groups exist at all.
    #[must_use]
    pub const fn is_supported(self) -> bool {
        !matches!(self, Self::None)
    }

    /// Whether clients may change groups.
    #[must_use]
    pub const fn is_mutable(self) -> bool {
        matches!(self, Self::Mutable(_))
    }
}

/// What a contact-list backend can do, fixed when the manager is built.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ContactListCapabilities {
    /// Clients may change subscriptions and the stored list.
    pub can_change_contact_list: bool,
    /// The roster persists on the server, so a stored list exists.
    pub contact_list_persists: bool,
    /// Subscription requests carry a message.
    pub request_uses_message: bool,
    /// Contacts can be blocked, so a deny list exists.
    pub can_block: bool,
    /// Group support.
    pub groups: GroupSupport,
}

/// Protocol side of a contact list.
///
/// Read accessors must already reflect a change when the manager is notified
/// of it. Mutators run synchronously; once one returns `Ok`, the manager
/// re-reads the affected state itself, so a backend must not notify the
/// manager from inside a mutator. Mutators a backend does not support keep
/// their default, which fails with `NotImplemented`.
pub trait ContactListBackend {
    /// Capabilities, read once at construction.
    fn capabilities(&self) -> ContactListCapabilities;

    /// Every contact on the roster.
    fn contacts(&self) -> HandleSet;

    /// Subscription state of `contact`.
    fn states(&self, contact: Handle) -> PresenceStates;

    /// Every group name.
    fn groups(&self) -> Vec<String> {
        Vec::new()
    }

    /// Groups `contact` belongs to.
    fn contact_groups(&self, _contact: Handle) -> Vec<String> {
        Vec::new()
    }

    /// Every blocked contact.
    fn blocked_contacts(&self) -> HandleSet {
        HandleSet::new()
    }

    /// Whether `contact` is blocked.
    fn is_blocked(&self, _contact: Handle) -> bool {
        false
    }

    /// Canonical form of a group name, `None` when it is not acceptable.
    fn normalize_group(&self, name: &str) -> Option<String> {
        let trimmed = name.trim();
        (!trimmed.is_empty()).then(|| trimmed.to_owned())
    }

    /// Asks `contacts` for their presence.
    ///
    /// # Errors
    ///
    /// Fails when the protocol refuses; nothing changes locally.
    fn request_subscription(&self, _contacts: &HandleSet, _message: &str) -> Result<(), TpError> {
        Err(unsupported("requesting subscriptions"))
    }

    /// Lets `contacts` see our presence.
    ///
    /// # Errors
    ///
    /// Fails when the protocol refuses; nothing changes locally.
    fn authorize_publication(&self, _contacts: &HandleSet) -> Result<(), TpError> {
        Err(unsupported("authorizing publication"))
    }

    /// Stores `contacts` on the roster without subscribing.
    ///
    /// # Errors
    ///
    /// Fails when the protocol refuses; nothing changes locally.
    fn store_contacts(&self, _contacts: &HandleSet) -> Result<(), TpError> {
        Err(unsupported("storing contacts"))
    }

    /// Removes `contacts` from the roster entirely.
    ///
    /// # Errors
    ///
    /// Fails when the protocol refuses; nothing changes locally.
    fn remove_contacts(&self, _contacts: &HandleSet) -> Result<(), TpError> {
        Err(unsupported("removing contacts"))
    }

    /// Stops receiving, or withdraws the request for, `contacts`' presence.
    ///
    /// # Errors
    ///
    /// Fails when the protocol refuses; nothing changes locally.
    fn unsubscribe(&self, _contacts: &HandleSet) -> Result<(), TpError> {
        Err(unsupported("unsubscribing"))
    }

    /// Stops, or refuses, sending our presence to `contacts`.
    ///
    /// # Errors
    ///
    /// Fails when the protocol refuses; nothing changes locally.
    fn unpublish(&self, _contacts: &HandleSet) -> Result<(), TpError> {
        Err(unsupported("unpublishing"))
    }

    /// Blocks `contacts`.
    ///
    /// # Errors
    ///
    /// Fails when the protocol refuses; nothing changes locally.
    fn block_contacts(&self, _contacts: &HandleSet) -> Result<(), TpError> {
        Err(unsupported("blocking contacts"))
    }

    /// Unblocks `contacts`.
    ///
    /// # Errors
    ///
    /// Fails when the protocol refuses; nothing changes locally.
    fn unblock_contacts(&self, _contacts: &HandleSet) -> Result<(), TpError> {
        Err(unsupported("unblocking contacts"))
    }

    /// Creates empty groups.
    ///
    /// # Errors
    ///
    /// Fails when the protocol refuses; nothing changes locally.
    fn create_groups(&self, _names: &[String]) -> Result<(), TpError> {
        Err(unsupported("creating groups"))
    }

    /// Renames a group in one step.
    ///
    /// # Errors
    ///
    /// Fails when the protocol refuses; nothing changes locally.
    fn rename_group(&self, _old: &str, _new: &str) -> Result<(), TpError> {
        Err(unsupported("renaming groups"))
    }

    /// Deletes a group.
    ///
    /// # Errors
    ///
    /// Fails when the protocol refuses; nothing changes locally.
    fn remove_group(&self, _name: &str) -> Result<(), TpError> {
        Err(unsupported("removing groups"))
    }

    /// Adds `contacts` to a group.
    ///
    /// # Errors
    ///
    /// Fails when the protocol refuses; nothing changes locally.
    fn add_to_group(&self, _group: &str, _contacts: &HandleSet) -> Result<(), TpError> {
        Err(unsupported("adding contacts to groups"))
    }

    /// Removes `contacts` from a group.
    ///
    /// # Errors
    ///
    /// Fails when the protocol refuses; nothing changes locally.
    fn remove_from_group(&self, _group: &str, _contacts: &HandleSet) -> Result<(), TpError> {
        Err(unsupported("removing contacts from groups"))
    }
}

fn unsupported(operation: &str) -> TpError {
    TpError::not_implemented(format!("{operation} is not supported by this contact list"))
}
