//! The seam between a connection and the components that own its channels.
//!
//! A backend registers an ordered list of [`ChannelManager`]s when the
//! connection is built. The dispatcher offers each request to them in that
//! order; the first manager to answer [`Offer::Accepted`] owns the request
//! and must eventually resolve it through the [`ManagerEvents`] in its
//! [`ManagerContext`].

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use serde::Serialize;
use telepathy_config::Config;

use crate::connection::ConnectionStatus;
use crate::handles::{EntityType, Handle, HandleTables};
use crate::requests::{
    CHANNEL_TYPE, ChannelRequest, ManagerEvents, PropertyMap, TARGET_HANDLE, TARGET_HANDLE_TYPE,
    string_property, u32_property,
};
use crate::transport::{ObjectPath, Transport};

/// A channel as announced to clients: its path and immutable properties.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChannelDetails {
    /// Channel object path.
    pub path: ObjectPath,
    /// Immutable properties, keyed by fully qualified name.
    pub properties: PropertyMap,
}

impl ChannelDetails {
    /// Details for the channel at `path`.
    #[must_use]
    pub const fn new(path: ObjectPath, properties: PropertyMap) -> Self {
        Self { path, properties }
    }

    /// Channel type, if the properties carry one.
    #[must_use]
    pub fn channel_type(&self) -> Option<&str> {
        string_property(&self.properties, CHANNEL_TYPE)
    }

    /// Target entity type; channels without one are untargeted.
    #[must_use]
    pub fn entity_type(&self) -> EntityType {
        u32_property(&self.properties, TARGET_HANDLE_TYPE)
            .and_then(EntityType::from_wire)
            .unwrap_or(EntityType::None)
    }

    /// Target handle, if any.
    #[must_use]
    pub fn target_handle(&self) -> Option<Handle> {
        u32_property(&self.properties, TARGET_HANDLE).and_then(Handle::new)
    }
}

/// One entry of the `RequestableChannelClasses` property.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RequestableChannelClass {
    /// Properties a request must carry with exactly these values.
    pub fixed: PropertyMap,
    /// Further properties a request may set.
    pub allowed: Vec<String>,
}

/// A manager's answer to a channel request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Offer {
    /// The manager owns the request and will resolve it.
    Accepted,
    /// Not for this manager; try the next one.
    Declined,
}

/// A component owning some of the connection's channels.
///
/// Managers must answer [`Offer::Accepted`] for every request they resolve,
/// whether they resolve it immediately (inside the call) or later.
pub trait ChannelManager {
    /// Channels that currently exist.
    fn channels(&self) -> Vec<ChannelDetails>;

    /// Channel classes clients may request from this manager.
    fn requestable_channel_classes(&self) -> Vec<RequestableChannelClass>;

    /// Handles `CreateChannel`.
    fn create_channel(&mut self, request: &ChannelRequest) -> Offer;

    /// Handles `EnsureChannel`.
    fn ensure_channel(&mut self, request: &ChannelRequest) -> Offer;

    /// Handles the legacy `RequestChannel`; by default the same as ensure.
    fn request_channel(&mut self, request: &ChannelRequest) -> Offer {
        self.ensure_channel(request)
    }

    /// Observes connection status transitions.
    fn status_changed(&mut self, _status: ConnectionStatus) {}
}

impl fmt::Debug for dyn ChannelManager {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str("ChannelManager")
    }
}

/// How the connection stores its managers.
pub type SharedManager = Rc<RefCell<dyn ChannelManager>>;

/// Everything a manager needs from its connection.
#[derive(Debug, Clone)]
pub struct ManagerContext {
    transport: Rc<dyn Transport>,
    connection_path: ObjectPath,
    tables: HandleTables,
    events: ManagerEvents,
    config: Config,
}

impl ManagerContext {
    pub(crate) const fn new(
        transport: Rc<dyn Transport>,
        connection_path: ObjectPath,
        tables: HandleTables,
        events: ManagerEvents,
        config: Config,
    ) -> Self {
        Self {
            transport,
            connection_path,
            tables,
            events,
            config,
        }
    }

    /// Transport for registering channel objects and emitting their signals.
    #[must_use]
    pub const fn transport(&self) -> &Rc<dyn Transport> {
        &self.transport
    }

    /// Object path of the owning connection; channel paths live below it.
    #[must_use]
    pub const fn connection_path(&self) -> &ObjectPath {
        &self.connection_path
    }

    /// The connection's handle tables.
    #[must_use]
    pub const fn tables(&self) -> &HandleTables {
        &self.tables
    }

    /// Sink for new channels and request outcomes.
    #[must_use]
    pub const fn events(&self) -> &ManagerEvents {
        &self.events
    }

    /// Process configuration.
    #[must_use]
    pub const fn config(&self) -> &Config {
        &self.config
    }
}
