//! Protocol-independent core for Telepathy connection managers.
//!
//! A connection manager implements a [`ConnectionBackend`] for its protocol
//! and wraps it in a [`Connection`]. The connection drives the status
//! lifecycle, keeps the per-connection [handle tables](handles), tracks client
//! interest and routes channel requests to [`ChannelManager`]s. Group-shaped
//! channels share the [`Membership`] engine; contact lists and groups are
//! provided ready-made by [`ContactListManager`] on top of a
//! [`ContactListBackend`].
//!
//! Nothing here talks to D-Bus directly. Objects, signals and method replies
//! go through the [`Transport`] seam, and structured logging is set up with
//! [`telemetry::initialise`].
//!
//! Everything runs on one thread: method calls and backend notifications are
//! processed one at a time, and each runs to completion.

pub mod channel_manager;
pub mod connection;
pub mod contact_list;
pub mod errors;
pub mod handles;
pub mod membership;
pub mod requests;
pub mod telemetry;
pub mod transport;

pub use channel_manager::{
    ChannelDetails, ChannelManager, ManagerContext, Offer, RequestableChannelClass, SharedManager,
};
pub use connection::{
    ChannelInfo, Connection, ConnectionBackend, ConnectionStatus, ConnectionStatusReason, Shutdown,
};
pub use contact_list::{
    ContactListBackend, ContactListCapabilities, ContactListManager, GroupRename, GroupSupport,
    ListKind, PresenceState, PresenceStates, RosterState,
};
pub use errors::{HandleError, TpError, TransportError};
pub use handles::{EntityType, Handle, HandleRef, HandleRepo, HandleSet, HandleTable, HandleTables};
pub use membership::{ChangeReason, GroupFlags, Membership, MembershipChange};
pub use requests::{ChannelRequest, ManagerEvents, RequestMethod, RequestToken};
pub use telemetry::{TelemetryError, TelemetryHandle};
pub use transport::{ObjectPath, Signal, SignalEmitter, Transport};

#[cfg(test)]
mod tests;
