//! Channel property maps and the well-known keys the dispatcher reads.

use std::collections::BTreeMap;

use serde_json::Value;

/// Property map as delivered by the transport (`a{sv}`).
pub type PropertyMap = BTreeMap<String, Value>;

/// `org.freedesktop.Telepathy.Channel` interface name.
pub const CHANNEL_INTERFACE: &str = "org.freedesktop.Telepathy.Channel";

/// Requested channel type.
pub const CHANNEL_TYPE: &str = "org.freedesktop.Telepathy.Channel.ChannelType";
/// Target entity type.
pub const TARGET_HANDLE_TYPE: &str = "org.freedesktop.Telepathy.Channel.TargetHandleType";
/// Target handle.
pub const TARGET_HANDLE: &str = "org.freedesktop.Telepathy.Channel.TargetHandle";
/// Target identifier.
pub const TARGET_ID: &str = "org.freedesktop.Telepathy.Channel.TargetID";
/// Initiator handle, set by the connection only.
pub const INITIATOR_HANDLE: &str = "org.freedesktop.Telepathy.Channel.InitiatorHandle";
/// Initiator identifier, set by the connection only.
pub const INITIATOR_ID: &str = "org.freedesktop.Telepathy.Channel.InitiatorID";
/// Whether the channel was requested, set by the connection only.
pub const REQUESTED: &str = "org.freedesktop.Telepathy.Channel.Requested";
/// Extra interfaces a channel implements.
pub const INTERFACES: &str = "org.freedesktop.Telepathy.Channel.Interfaces";

/// Contact list channel type.
pub const CHANNEL_TYPE_CONTACT_LIST: &str = "org.freedesktop.Telepathy.Channel.Type.ContactList";
/// Group interface name.
pub const GROUP_INTERFACE: &str = "org.freedesktop.Telepathy.Channel.Interface.Group";

/// String value stored under `key`, if it is a string.
#[must_use]
pub fn string_property<'a>(properties: &'a PropertyMap, key: &str) -> Option<&'a str> {
    properties.get(key).and_then(Value::as_str)
}

/// `u32` value stored under `key`, if it is an integer in range.
#[must_use]
pub fn u32_property(properties: &PropertyMap, key: &str) -> Option<u32> {
    properties
        .get(key)
        .and_then(Value::as_u64)
        .and_then(|raw| u32::try_from(raw).ok())
}
