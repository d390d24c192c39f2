//! Seam to the message bus.
//!
//! The crate never marshals anything itself. It asks a [`Transport`] to
//! export objects, emit [`Signal`]s and complete pending method calls, and it
//! is told about vanished clients through the connection API.

#[cfg(any(test, feature = "test-support"))]
mod recording;

use std::fmt;
use std::rc::Rc;

use serde::Serialize;

use crate::channel_manager::ChannelDetails;
use crate::connection::{ConnectionStatus, ConnectionStatusReason};
use crate::errors::{TpError, TransportError};
use crate::handles::{EntityType, Handle};
use crate::membership::{GroupFlags, MembersChanged};
use crate::requests::PropertyMap;

#[cfg(any(test, feature = "test-support"))]
pub use recording::RecordingTransport;

/// Bus object path.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct ObjectPath(String);

impl ObjectPath {
    /// Wraps a path without validation.
    pub fn new(path: impl Into<String>) -> Self {
        Self(path.into())
    }

    /// Path of a child object, `segment` appended after a `/`.
    #[must_use]
    pub fn child(&self, segment: &str) -> Self {
        Self(format!("{}/{segment}", self.0))
    }

    /// Path as text.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ObjectPath {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(&self.0)
    }
}

/// Well-known bus name.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct BusName(String);

impl BusName {
    /// Wraps a bus name without validation.
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Name as text.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BusName {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(&self.0)
    }
}

/// Unique bus name of a remote client, e.g. `:1.42`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct ClientName(String);

impl ClientName {
    /// Wraps a unique name.
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Name as text.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ClientName {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(&self.0)
    }
}

/// Transport-assigned identifier of a method call awaiting its reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct CallId(pub u64);

impl fmt::Display for CallId {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "call#{}", self.0)
    }
}

/// A method call that must be answered exactly once.
///
/// The context is consumed by [`CallContext::complete`], so a reply can
/// never be sent twice.
#[derive(Debug, PartialEq, Eq)]
#[must_use = "a pending call must be completed"]
pub struct CallContext {
    id: CallId,
}

impl CallContext {
    /// Context for the call the transport delivered as `id`.
    pub const fn new(id: CallId) -> Self {
        Self { id }
    }

    /// Identifier of the call.
    #[must_use]
    pub const fn id(&self) -> CallId {
        self.id
    }

    /// Sends the reply (or error) for this call.
    pub fn complete(self, transport: &dyn Transport, reply: Result<MethodReply, TpError>) {
        transport.complete_call(self.id, reply);
    }
}

/// Successful method replies the core produces.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MethodReply {
    /// A method without return values.
    Unit,
    /// `CreateChannel` reply.
    ChannelCreated {
        /// Channel object path.
        path: ObjectPath,
        /// Immutable channel properties.
        properties: PropertyMap,
    },
    /// `EnsureChannel` reply.
    ChannelEnsured {
        /// Whether the caller should handle the channel itself.
        yours: bool,
        /// Channel object path.
        path: ObjectPath,
        /// Immutable channel properties.
        properties: PropertyMap,
    },
    /// Legacy `RequestChannel` reply.
    ChannelRequested {
        /// Channel object path.
        path: ObjectPath,
    },
}

/// Signals the core emits.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "signal")]
pub enum Signal {
    /// Connection status changed.
    StatusChanged {
        /// New status.
        status: ConnectionStatus,
        /// Why it changed.
        reason: ConnectionStatusReason,
    },
    /// The connection's own contact changed.
    SelfContactChanged {
        /// New self handle.
        handle: Handle,
        /// Identifier of the new self handle.
        identifier: String,
    },
    /// One or more channels were announced.
    NewChannels {
        /// Announced channels.
        channels: Vec<ChannelDetails>,
    },
    /// Legacy single-channel announcement.
    NewChannel {
        /// Channel object path.
        path: ObjectPath,
        /// Channel type interface name.
        channel_type: String,
        /// Target entity type.
        entity_type: EntityType,
        /// Target handle, `0` for none.
        handle: u32,
        /// Whether a requester already intends to handle the channel.
        suppress_handler: bool,
    },
    /// A channel went away (emitted on the connection).
    ChannelClosed {
        /// Closed channel.
        path: ObjectPath,
    },
    /// A channel went away (emitted on the channel itself).
    Closed,
    /// Group membership changed.
    MembersChanged(MembersChanged),
    /// Group flags changed.
    GroupFlagsChanged {
        /// Flags newly set.
        added: GroupFlags,
        /// Flags newly cleared.
        removed: GroupFlags,
    },
}

impl Signal {
    /// Member name of the signal on the bus.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::StatusChanged { .. } => "StatusChanged",
            Self::SelfContactChanged { .. } => "SelfContactChanged",
            Self::NewChannels { .. } => "NewChannels",
            Self::NewChannel { .. } => "NewChannel",
            Self::ChannelClosed { .. } => "ChannelClosed",
            Self::Closed => "Closed",
            Self::MembersChanged(_) => "MembersChanged",
            Self::GroupFlagsChanged { .. } => "GroupFlagsChanged",
        }
    }
}

/// Operations the core needs from the message bus.
///
/// Calls arrive one at a time; implementations may assume no re-entrant use.
pub trait Transport {
    /// Exports an object exposing `interfaces` at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Registration`] when the path is taken or the
    /// bus refuses the export.
    fn register_object(&self, path: &ObjectPath, interfaces: &[String])
    -> Result<(), TransportError>;

    /// Claims a well-known bus name.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::NameUnavailable`] when the name is owned by
    /// somebody else.
    fn request_name(&self, name: &BusName) -> Result<(), TransportError>;

    /// Withdraws an exported object.
    fn unregister_object(&self, path: &ObjectPath);

    /// Gives up a well-known bus name.
    fn release_name(&self, name: &BusName);

    /// Emits `signal` from the object at `path`.
    fn emit_signal(&self, path: &ObjectPath, signal: Signal);

    /// Sends the reply for a pending call.
    fn complete_call(&self, call: CallId, reply: Result<MethodReply, TpError>);

    /// Starts reporting when `client` leaves the bus.
    fn watch_client(&self, client: &ClientName);

    /// Stops reporting on `client`.
    fn unwatch_client(&self, client: &ClientName);
}

impl fmt::Debug for dyn Transport {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str("Transport")
    }
}

/// Emits signals from one object.
#[derive(Debug, Clone)]
pub struct SignalEmitter {
    transport: Rc<dyn Transport>,
    path: ObjectPath,
}

impl SignalEmitter {
    /// Emitter for the object at `path`.
    pub const fn new(transport: Rc<dyn Transport>, path: ObjectPath) -> Self {
        Self { transport, path }
    }

    /// Object the signals come from.
    #[must_use]
    pub const fn path(&self) -> &ObjectPath {
        &self.path
    }

    /// Transport used for emission.
    #[must_use]
    pub fn transport(&self) -> &Rc<dyn Transport> {
        &self.transport
    }

    /// Emits `signal`.
    pub fn emit(&self, signal: Signal) {
        self.transport.emit_signal(&self.path, signal);
    }
}
