use bitflags::bitflags;
use serde::Serialize;
use strum::Display;

bitflags! {
    /// Capabilities and behaviour of a group-shaped channel.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize)]
    pub struct GroupFlags: u32 {
        /// Clients may add members (or accept local-pending ones without it).
        const CAN_ADD = 1 << 0;
        /// Clients may remove members and reject local-pending ones.
        const CAN_REMOVE = 1 << 1;
        /// Clients may rescind remote-pending invitations.
        const CAN_RESCIND = 1 << 2;
        /// A message accompanies additions.
        const MESSAGE_ADD = 1 << 3;
        /// A message accompanies removals.
        const MESSAGE_REMOVE = 1 << 4;
        /// A message accompanies accepting local-pending members.
        const MESSAGE_ACCEPT = 1 << 5;
        /// A message accompanies rejecting local-pending members.
        const MESSAGE_REJECT = 1 << 6;
        /// A message accompanies rescinding remote-pending members.
        const MESSAGE_RESCIND = 1 << 7;
        /// Members are channel-specific handles with global owners.
        const CHANNEL_SPECIFIC_HANDLES = 1 << 8;
        /// A contact can be in at most one such group.
        const ONLY_ONE_GROUP = 1 << 9;
        /// Owners of channel-specific handles cannot be discovered.
        const HANDLE_OWNERS_NOT_AVAILABLE = 1 << 10;
        /// Group state is exposed as properties.
        const PROPERTIES = 1 << 11;
        /// Detailed membership-change signals are emitted.
        const MEMBERS_CHANGED_DETAILED = 1 << 12;
    }
}

/// Why membership changed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Display, Serialize)]
#[strum(serialize_all = "snake_case")]
pub enum ChangeReason {
    /// No reason given.
    #[default]
    None,
    /// The member went offline.
    Offline,
    /// The member was kicked.
    Kicked,
    /// The member was busy.
    Busy,
    /// The member was invited.
    Invited,
    /// The member was banned.
    Banned,
    /// An error occurred.
    Error,
    /// The contact does not exist.
    InvalidContact,
    /// The contact did not answer.
    NoAnswer,
    /// The member was renamed, or moved along with a renamed group.
    Renamed,
    /// Policy forbade the change.
    PermissionDenied,
    /// The member was separated from the group.
    Separated,
}

impl ChangeReason {
    /// Wire integer.
    #[must_use]
    pub const fn as_wire(self) -> u32 {
        match self {
            Self::None => 0,
            Self::Offline => 1,
            Self::Kicked => 2,
            Self::Busy => 3,
            Self::Invited => 4,
            Self::Banned => 5,
            Self::Error => 6,
            Self::InvalidContact => 7,
            Self::NoAnswer => 8,
            Self::Renamed => 9,
            Self::PermissionDenied => 10,
            Self::Separated => 11,
        }
    }
}
