use serde_json::{Value, json};
use strum::{EnumIter, EnumString};

use super::backend::ContactListCapabilities;
use crate::channel_manager::ChannelDetails;
use crate::handles::{EntityType, Handle, HandleRef};
use crate::membership::{GroupFlags, Membership};
use crate::requests::{
    CHANNEL_TYPE, CHANNEL_TYPE_CONTACT_LIST, GROUP_INTERFACE, INTERFACES, PropertyMap, REQUESTED,
    RequestToken, TARGET_HANDLE, TARGET_HANDLE_TYPE, TARGET_ID,
};
use crate::transport::ObjectPath;

/// The well-known contact lists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, EnumString, EnumIter)]
#[strum(serialize_all = "lowercase")]
pub enum ListKind {
    /// Contacts whose presence we receive.
    Subscribe,
    /// Contacts who receive our presence.
    Publish,
    /// Contacts stored on the server-side roster.
    Stored,
    /// Blocked contacts.
    Deny,
}

impl ListKind {
    /// List name as used for list handles.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Subscribe => "subscribe",
            Self::Publish => "publish",
            Self::Stored => "stored",
            Self::Deny => "deny",
        }
    }

    /// Whether a backend with `capabilities` has this list.
    #[must_use]
    pub const fn is_supported(self, capabilities: ContactListCapabilities) -> bool {
        match self {
            Self::Subscribe | Self::Publish => true,
            Self::Stored => capabilities.contact_list_persists,
            Self::Deny => capabilities.can_block,
        }
    }

    /// Group flags advertised on this list's channel.
    #[must_use]
    pub fn flags(self, capabilities: ContactListCapabilities) -> GroupFlags {
        let editable = match self {
            Self::Deny => true,
            Self::Subscribe | Self::Publish | Self::Stored => capabilities.can_change_contact_list,
        };
        if !editable {
            return GroupFlags::PROPERTIES;
        }
        let bits = match self {
            Self::Subscribe if capabilities.request_uses_message => {
                GroupFlags::CAN_ADD
                    | GroupFlags::CAN_REMOVE
                    | GroupFlags::CAN_RESCIND
                    | GroupFlags::MESSAGE_ADD
            }
            Self::Subscribe => GroupFlags::CAN_ADD | GroupFlags::CAN_REMOVE | GroupFlags::CAN_RESCIND,
            Self::Publish => {
                GroupFlags::CAN_REMOVE | GroupFlags::MESSAGE_REJECT | GroupFlags::MESSAGE_REMOVE
            }
            Self::Stored | Self::Deny => GroupFlags::CAN_ADD | GroupFlags::CAN_REMOVE,
        };
        bits | GroupFlags::PROPERTIES
    }
}

/// What a contact-list channel stands for.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ContactListTarget {
    /// One of the well-known lists.
    List(ListKind),
    /// A user-defined group.
    Group(String),
}

impl ContactListTarget {
    /// Entity type of the channel's target handle.
    #[must_use]
    pub const fn entity_type(&self) -> EntityType {
        match self {
            Self::List(_) => EntityType::List,
            Self::Group(_) => EntityType::Group,
        }
    }

    /// List or group name.
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::List(kind) => kind.name(),
            Self::Group(name) => name,
        }
    }
}

/// A list or group channel backed by a [`Membership`].
#[derive(Debug)]
pub struct ContactListChannel {
    target: ContactListTarget,
    handle: HandleRef,
    membership: Membership,
    requested: bool,
    announced: bool,
    queued: Vec<RequestToken>,
}

impl ContactListChannel {
    pub(super) const fn new(
        target: ContactListTarget,
        handle: HandleRef,
        membership: Membership,
        requested: bool,
    ) -> Self {
        Self {
            target,
            handle,
            membership,
            requested,
            announced: false,
            queued: Vec::new(),
        }
    }

    /// What the channel stands for.
    #[must_use]
    pub const fn target(&self) -> &ContactListTarget {
        &self.target
    }

    /// Target handle of the channel.
    #[must_use]
    pub const fn handle(&self) -> Handle {
        self.handle.handle()
    }

    /// Object path of the channel.
    #[must_use]
    pub const fn path(&self) -> &ObjectPath {
        self.membership.path()
    }

    /// Membership of the list or group.
    #[must_use]
    pub const fn membership(&self) -> &Membership {
        &self.membership
    }

    /// Whether clients have been told about the channel.
    #[must_use]
    pub const fn is_announced(&self) -> bool {
        self.announced
    }

    /// Requests waiting for the roster.
    #[must_use]
    pub fn queued(&self) -> &[RequestToken] {
        &self.queued
    }

    /// Path, type and target, as announced to clients.
    #[must_use]
    pub fn details(&self) -> ChannelDetails {
        let mut properties = PropertyMap::new();
        properties.insert(CHANNEL_TYPE.to_owned(), json!(CHANNEL_TYPE_CONTACT_LIST));
        properties.insert(
            TARGET_HANDLE_TYPE.to_owned(),
            Value::from(self.target.entity_type().as_wire()),
        );
        properties.insert(TARGET_HANDLE.to_owned(), Value::from(self.handle().get()));
        properties.insert(TARGET_ID.to_owned(), json!(self.target.name()));
        properties.insert(REQUESTED.to_owned(), Value::from(self.requested));
        properties.insert(INTERFACES.to_owned(), json!([GROUP_INTERFACE]));
        ChannelDetails::new(self.path().clone(), properties)
    }

    pub(super) const fn membership_mut(&mut self) -> &mut Membership {
        &mut self.membership
    }

    pub(super) fn queue(&mut self, token: RequestToken) {
        self.queued.push(token);
    }

    pub(super) fn announce(&mut self) -> Vec<RequestToken> {
        self.announced = true;
        std::mem::take(&mut self.queued)
    }

    pub(super) fn take_queued(&mut self) -> Vec<RequestToken> {
        std::mem::take(&mut self.queued)
    }
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use rstest::rstest;

    use super::*;
    use crate::contact_list::backend::GroupSupport;

    fn capabilities(can_change: bool, message: bool) -> ContactListCapabilities {
        ContactListCapabilities {
            can_change_contact_list: can_change,
            contact_list_persists: true,
            request_uses_message: message,
            can_block: true,
            groups: GroupSupport::None,
        }
    }

    #[rstest]
    #[case("subscribe", ListKind::Subscribe)]
    #[case("publish", ListKind::Publish)]
    #[case("stored", ListKind::Stored)]
    #[case("deny", ListKind::Deny)]
    fn parses_list_names(#[case] name: &str, #[case] kind: ListKind) {
        assert_eq!(ListKind::from_str(name), Ok(kind));
        assert_eq!(kind.name(), name);
    }

    #[rstest]
    fn rejects_unknown_list_names() {
        assert!(ListKind::from_str("known").is_err());
    }

    #[rstest]
    #[case(ListKind::Subscribe, true, GroupFlags::CAN_ADD | GroupFlags::CAN_REMOVE | GroupFlags::CAN_RESCIND | GroupFlags::MESSAGE_ADD)]
    #[case(ListKind::Subscribe, false, GroupFlags::CAN_ADD | GroupFlags::CAN_REMOVE | GroupFlags::CAN_RESCIND)]
    #[case(ListKind::Publish, true, GroupFlags::CAN_REMOVE | GroupFlags::MESSAGE_REJECT | GroupFlags::MESSAGE_REMOVE)]
    #[case(ListKind::Stored, true, GroupFlags::CAN_ADD | GroupFlags::CAN_REMOVE)]
    fn editable_lists_advertise_their_operations(
        #[case] kind: ListKind,
        #[case] message: bool,
        #[case] expected: GroupFlags,
    ) {
        assert_eq!(
            kind.flags(capabilities(true, message)),
            expected | GroupFlags::PROPERTIES
        );
    }

    #[rstest]
    fn read_only_lists_only_carry_properties() {
        let fixed = capabilities(false, true);
        assert_eq!(ListKind::Subscribe.flags(fixed), GroupFlags::PROPERTIES);
        assert_eq!(
            ListKind::Deny.flags(fixed),
            GroupFlags::CAN_ADD | GroupFlags::CAN_REMOVE | GroupFlags::PROPERTIES
        );
    }

    #[rstest]
    fn optional_lists_follow_capabilities() {
        let bare = ContactListCapabilities::default();
        assert!(ListKind::Subscribe.is_supported(bare));
        assert!(!ListKind::Stored.is_supported(bare));
        assert!(!ListKind::Deny.is_supported(bare));
    }
}
