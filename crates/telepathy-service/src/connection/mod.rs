//! Connection lifecycle and the aggregation point for channel managers.
//!
//! A [`Connection`] owns a protocol [`ConnectionBackend`], the handle tables
//! and channel managers the backend builds at construction, the in-flight
//! request set and the client interest table. Every status transition runs to
//! completion before the next call is processed:
//!
//! 1. the status is updated and `StatusChanged` emitted;
//! 2. the backend's matching hook runs, then every manager observes the new
//!    status;
//! 3. on DISCONNECTED, outstanding requests fail, the self handle and client
//!    interests are dropped and the backend shuts down. Once shutdown
//!    completes the connection leaves the bus and answers queued `Disconnect`
//!    calls.

mod backend;
mod interest;
mod naming;
mod status;

use std::rc::Rc;

use telepathy_config::Config;
use tracing::{debug, info, warn};

use crate::channel_manager::{ChannelDetails, ManagerContext, RequestableChannelClass};
use crate::errors::TpError;
use crate::handles::{Handle, HandleRef, HandleTables};
use crate::requests::{
    DispatchCore, Dispatcher, LookupTicket, ManagerEvents, PropertyMap, RequestMethod,
    Submission, legacy_properties, validate,
};
use crate::transport::{BusName, CallContext, ClientName, MethodReply, ObjectPath, Signal, Transport};

pub use backend::{ConnectionBackend, Shutdown};
pub use interest::{InterestTable, InterestTransition, InterestUpdate, Watch};
pub use naming::{ConnectionNames, escape_as_identifier};
pub use status::{ConnectionStatus, ConnectionStatusReason, TransitionError};

use status::{Step, plan_transition};

/// Tracing target for connection lifecycle events.
pub(crate) const CONNECTION_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::connection");

/// Interface implemented by every connection object.
pub const CONNECTION_INTERFACE: &str = "org.freedesktop.Telepathy.Connection";
/// Interface carrying `CreateChannel` and `EnsureChannel`.
pub const REQUESTS_INTERFACE: &str = "org.freedesktop.Telepathy.Connection.Interface.Requests";

const DISCONNECTING_MESSAGE: &str =
    "unable to service this channel request, we're disconnecting!";

/// Legacy `ListChannels` entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelInfo {
    /// Channel object path.
    pub path: ObjectPath,
    /// Channel type interface name.
    pub channel_type: String,
    /// Target entity type as a wire integer.
    pub entity_type: u32,
    /// Target handle, `0` for none.
    pub handle: u32,
}

impl From<&ChannelDetails> for ChannelInfo {
    fn from(details: &ChannelDetails) -> Self {
        Self {
            path: details.path.clone(),
            channel_type: details.channel_type().unwrap_or_default().to_owned(),
            entity_type: details.entity_type().as_wire(),
            handle: Handle::raw_or_zero(details.target_handle()),
        }
    }
}

/// One connection to a communication service.
#[derive(Debug)]
pub struct Connection<B: ConnectionBackend> {
    backend: B,
    config: Config,
    names: ConnectionNames,
    core: Rc<DispatchCore>,
    dispatcher: Dispatcher,
    tables: HandleTables,
    status: ConnectionStatus,
    self_handle: Option<HandleRef>,
    interests: InterestTable,
    disconnect_calls: Vec<CallContext>,
    registered: bool,
    shutdown_finished: bool,
}

impl<B: ConnectionBackend> Connection<B> {
    /// Builds a NEW connection.
    ///
    /// The backend creates its handle tables and channel managers here; both
    /// stay fixed for the connection's lifetime.
    pub fn new(backend: B, transport: Rc<dyn Transport>, config: &Config) -> Self {
        let names = ConnectionNames::new(
            config.connection_manager(),
            backend.protocol(),
            &backend.unique_connection_name(),
        );
        let core = Rc::new(DispatchCore::new(
            Rc::clone(&transport),
            names.object_path().clone(),
        ));
        let tables = backend.create_handle_tables();
        let context = ManagerContext::new(
            transport,
            names.object_path().clone(),
            tables.clone(),
            ManagerEvents::new(Rc::clone(&core)),
            config.clone(),
        );
        let mut dispatcher = Dispatcher::new(Rc::clone(&core));
        dispatcher.set_managers(backend.create_channel_managers(&context));
        let interests = InterestTable::new(backend.possible_client_interests());
        debug!(
            target: CONNECTION_TARGET,
            path = %names.object_path(),
            managers = dispatcher.managers().len(),
            "connection created"
        );
        Self {
            backend,
            config: config.clone(),
            names,
            core,
            dispatcher,
            tables,
            status: ConnectionStatus::New,
            self_handle: None,
            interests,
            disconnect_calls: Vec::new(),
            registered: false,
            shutdown_finished: false,
        }
    }

    /// The protocol backend.
    #[must_use]
    pub const fn backend(&self) -> &B {
        &self.backend
    }

    /// Current status.
    #[must_use]
    pub const fn status(&self) -> ConnectionStatus {
        self.status
    }

    /// Well-known bus name.
    #[must_use]
    pub const fn bus_name(&self) -> &BusName {
        self.names.bus_name()
    }

    /// Object path of the connection.
    #[must_use]
    pub const fn object_path(&self) -> &ObjectPath {
        self.names.object_path()
    }

    /// The connection's handle tables.
    #[must_use]
    pub const fn tables(&self) -> &HandleTables {
        &self.tables
    }

    /// The local user's contact handle, once known.
    #[must_use]
    pub fn self_handle(&self) -> Option<Handle> {
        self.self_handle.as_ref().map(HandleRef::handle)
    }

    /// Requests accepted by a manager or parked on a lookup.
    #[must_use]
    pub fn outstanding_requests(&self) -> usize {
        self.core.in_flight_len() + self.dispatcher.pending_lookups()
    }

    /// Whether shutdown has completed.
    #[must_use]
    pub const fn is_shut_down(&self) -> bool {
        self.shutdown_finished
    }

    /// Claims the bus name and exports the connection object.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` when the configured connection manager name
    /// cannot appear in a bus name, and `NotAvailable` when the name is owned
    /// elsewhere or the object cannot be exported. Nothing stays registered
    /// in either case.
    pub fn register(&mut self) -> Result<(), TpError> {
        self.config.validate()?;
        let transport = self.core.transport();
        transport.request_name(self.names.bus_name())?;
        let mut interfaces = vec![CONNECTION_INTERFACE.to_owned(), REQUESTS_INTERFACE.to_owned()];
        interfaces.extend(self.backend.interfaces());
        if let Err(error) = transport.register_object(self.names.object_path(), &interfaces) {
            transport.release_name(self.names.bus_name());
            return Err(error.into());
        }
        self.registered = true;
        info!(
            target: CONNECTION_TARGET,
            bus_name = %self.names.bus_name(),
            path = %self.names.object_path(),
            "connection registered"
        );
        Ok(())
    }

    /// Handles `Connect`.
    ///
    /// Only a NEW connection starts connecting; in any other state this is a
    /// successful no-op.
    ///
    /// # Errors
    ///
    /// Returns the backend's error after moving to DISCONNECTED with the
    /// mapped status reason.
    pub fn connect(&mut self) -> Result<(), TpError> {
        if self.status != ConnectionStatus::New {
            return Ok(());
        }
        if let Err(error) = self.backend.start_connecting(&self.tables) {
            warn!(target: CONNECTION_TARGET, %error, "failed to start connecting");
            self.transition_or_warn(ConnectionStatus::Disconnected, error.status_reason());
            return Err(error);
        }
        if self.status == ConnectionStatus::New {
            self.change_status(ConnectionStatus::Connecting, ConnectionStatusReason::Requested)?;
        }
        Ok(())
    }

    /// Handles `Disconnect`; `call` is answered once shutdown finishes.
    pub fn disconnect(&mut self, call: CallContext) {
        if self.shutdown_finished {
            self.core.reply(call, Ok(MethodReply::Unit));
            return;
        }
        self.disconnect_calls.push(call);
        if self.status != ConnectionStatus::Disconnected {
            self.transition_or_warn(
                ConnectionStatus::Disconnected,
                ConnectionStatusReason::Requested,
            );
        }
    }

    /// Moves the connection to `status`.
    ///
    /// NEW to CONNECTED is carried out as two transitions through CONNECTING.
    /// Requesting the current status is logged and ignored.
    ///
    /// # Errors
    ///
    /// Returns [`TransitionError::Terminal`] once DISCONNECTED,
    /// [`TransitionError::Illegal`] for backwards moves and
    /// [`TransitionError::MissingSelfHandle`] when CONNECTED is requested
    /// without a valid self handle.
    pub fn change_status(
        &mut self,
        status: ConnectionStatus,
        reason: ConnectionStatusReason,
    ) -> Result<(), TransitionError> {
        let step = plan_transition(self.status, status)?;
        if status == ConnectionStatus::Connected
            && step != Step::Unchanged
            && !self.has_valid_self_handle()
        {
            return Err(TransitionError::MissingSelfHandle);
        }
        match step {
            Step::Unchanged => {
                warn!(
                    target: CONNECTION_TARGET,
                    %status,
                    "status change to the current status ignored"
                );
            }
            Step::Direct => self.enter(status, reason),
            Step::ViaConnecting => {
                self.enter(ConnectionStatus::Connecting, reason);
                self.enter(ConnectionStatus::Connected, reason);
            }
        }
        Ok(())
    }

    /// Sets the local user's contact handle.
    ///
    /// A change while CONNECTED is announced with `SelfContactChanged`.
    pub fn set_self_handle(&mut self, handle: HandleRef) {
        if self.status == ConnectionStatus::Disconnected {
            warn!(target: CONNECTION_TARGET, "self handle set after disconnection ignored");
            return;
        }
        let changed = self.self_handle() != Some(handle.handle());
        let raw = handle.handle();
        self.self_handle = Some(handle);
        if changed && self.status == ConnectionStatus::Connected {
            let identifier = self.tables.contacts().inspect(raw).unwrap_or_default();
            debug!(target: CONNECTION_TARGET, handle = %raw, %identifier, "self contact changed");
            self.emit(Signal::SelfContactChanged {
                handle: raw,
                identifier,
            });
        }
    }

    /// Completes the shutdown the backend deferred.
    ///
    /// Withdraws the connection from the bus, answers queued `Disconnect`
    /// calls and reclaims unreferenced handles. Ignored before DISCONNECTED
    /// and after the first call.
    pub fn finish_shutdown(&mut self) {
        if self.status != ConnectionStatus::Disconnected {
            warn!(
                target: CONNECTION_TARGET,
                status = %self.status,
                "shutdown finished before disconnection ignored"
            );
            return;
        }
        if self.shutdown_finished {
            warn!(target: CONNECTION_TARGET, "shutdown already finished");
            return;
        }
        self.shutdown_finished = true;
        if self.registered {
            let transport = self.core.transport();
            transport.unregister_object(self.names.object_path());
            transport.release_name(self.names.bus_name());
            self.registered = false;
        }
        for call in std::mem::take(&mut self.disconnect_calls) {
            self.core.reply(call, Ok(MethodReply::Unit));
        }
        let reclaimed = self.tables.collect_unreferenced();
        info!(
            target: CONNECTION_TARGET,
            path = %self.names.object_path(),
            reclaimed,
            "connection shut down"
        );
    }

    /// Handles `CreateChannel`.
    pub fn create_channel(&mut self, call: CallContext, properties: PropertyMap) {
        self.request(call, RequestMethod::Create, properties);
    }

    /// Handles `EnsureChannel`.
    pub fn ensure_channel(&mut self, call: CallContext, properties: PropertyMap) {
        self.request(call, RequestMethod::Ensure, properties);
    }

    /// Handles the legacy `RequestChannel`.
    pub fn request_channel(
        &mut self,
        call: CallContext,
        channel_type: &str,
        entity_type: u32,
        handle: u32,
        suppress_handler: bool,
    ) {
        self.request(
            call,
            RequestMethod::Request { suppress_handler },
            legacy_properties(channel_type, entity_type, handle),
        );
    }

    /// Resumes the request parked on `ticket` with the lookup's outcome.
    ///
    /// # Errors
    ///
    /// Returns `NotAvailable` when no request is parked on `ticket`.
    pub fn complete_lookup(
        &mut self,
        ticket: LookupTicket,
        result: Result<HandleRef, TpError>,
    ) -> Result<(), TpError> {
        self.dispatcher.complete_lookup(&self.tables, ticket, result)
    }

    /// Abandons the request parked on `ticket`; its caller gets `Cancelled`.
    ///
    /// # Errors
    ///
    /// Returns `NotAvailable` when no request is parked on `ticket`.
    pub fn cancel_lookup(&mut self, ticket: LookupTicket) -> Result<(), TpError> {
        self.dispatcher.cancel_lookup(ticket)
    }

    /// Every channel the managers own.
    ///
    /// # Errors
    ///
    /// Returns `Disconnected` unless CONNECTED.
    pub fn channels(&self) -> Result<Vec<ChannelDetails>, TpError> {
        self.ensure_connected()?;
        Ok(self.dispatcher.channels())
    }

    /// Every channel in the legacy `ListChannels` shape.
    ///
    /// # Errors
    ///
    /// Returns `Disconnected` unless CONNECTED.
    pub fn list_channels(&self) -> Result<Vec<ChannelInfo>, TpError> {
        Ok(self.channels()?.iter().map(ChannelInfo::from).collect())
    }

    /// The `RequestableChannelClasses` property.
    #[must_use]
    pub fn requestable_channel_classes(&self) -> Vec<RequestableChannelClass> {
        self.dispatcher.requestable_channel_classes()
    }

    /// Handles `AddClientInterest`.
    ///
    /// # Errors
    ///
    /// Returns `Disconnected` once the connection is DISCONNECTED.
    pub fn add_client_interest(
        &mut self,
        client: &ClientName,
        tokens: &[String],
    ) -> Result<(), TpError> {
        if self.status == ConnectionStatus::Disconnected {
            return Err(TpError::disconnected("Connection is disconnected"));
        }
        let update = self.interests.add(client, tokens);
        self.apply_interest(client, update);
        Ok(())
    }

    /// Handles `RemoveClientInterest`; undeclared interest is ignored.
    pub fn remove_client_interest(&mut self, client: &ClientName, tokens: &[String]) {
        let update = self.interests.remove(client, tokens);
        self.apply_interest(client, update);
    }

    /// Forgets every interest of a client that left the bus.
    pub fn client_vanished(&mut self, client: &ClientName) {
        let update = self.interests.client_vanished(client);
        self.apply_interest(client, update);
    }

    /// Whether any client currently holds `token`.
    #[must_use]
    pub fn is_interest_wanted(&self, token: &str) -> bool {
        self.interests.is_wanted(token)
    }

    fn request(&mut self, call: CallContext, method: RequestMethod, properties: PropertyMap) {
        if let Err(error) = self.ensure_connected() {
            self.core.reply(call, Err(error));
            return;
        }
        let validated = match validate(method, properties) {
            Ok(validated) => validated,
            Err(error) => {
                debug!(target: CONNECTION_TARGET, %method, %error, "request rejected");
                self.core.reply(call, Err(error));
                return;
            }
        };
        let Submission::Lookup { ticket, entity, id } =
            self.dispatcher.submit(&self.tables, call, validated)
        else {
            return;
        };
        let Err(error) = self.backend.begin_lookup(ticket, entity, &id) else {
            return;
        };
        if let Err(stale) = self.dispatcher.complete_lookup_with(ticket, error) {
            warn!(target: CONNECTION_TARGET, %ticket, %stale, "lookup vanished");
        }
    }

    fn enter(&mut self, status: ConnectionStatus, reason: ConnectionStatusReason) {
        let previous = self.status;
        self.status = status;
        info!(
            target: CONNECTION_TARGET,
            from = %previous,
            to = %status,
            %reason,
            "status changed"
        );
        self.emit(Signal::StatusChanged { status, reason });

        match status {
            ConnectionStatus::Connecting => self.backend.connecting(),
            ConnectionStatus::Connected => self.backend.connected(),
            ConnectionStatus::Disconnected if previous != ConnectionStatus::New => {
                self.backend.disconnected();
            }
            ConnectionStatus::Disconnected | ConnectionStatus::New => {}
        }
        self.dispatcher.notify_status(status);

        if status == ConnectionStatus::Disconnected {
            self.tear_down();
        }
    }

    fn tear_down(&mut self) {
        self.dispatcher
            .fail_everything(&TpError::disconnected(DISCONNECTING_MESSAGE));
        self.self_handle = None;
        for client in self.interests.clear() {
            self.core.transport().unwatch_client(&client);
        }
        match self.backend.shut_down() {
            Shutdown::Complete => self.finish_shutdown(),
            Shutdown::Deferred => {
                debug!(target: CONNECTION_TARGET, "backend deferred shutdown");
            }
        }
    }

    fn transition_or_warn(&mut self, status: ConnectionStatus, reason: ConnectionStatusReason) {
        if let Err(error) = self.change_status(status, reason) {
            warn!(target: CONNECTION_TARGET, %error, "status change rejected");
        }
    }

    fn apply_interest(&self, client: &ClientName, update: InterestUpdate) {
        let transport = self.core.transport();
        match update.watch {
            Watch::Start => transport.watch_client(client),
            Watch::Stop => transport.unwatch_client(client),
            Watch::Keep => {}
        }
        for transition in update.transitions {
            match transition {
                InterestTransition::Interested(token) => {
                    debug!(target: CONNECTION_TARGET, %token, "clients interested");
                    self.backend.clients_interested(&token);
                }
                InterestTransition::Uninterested(token) => {
                    debug!(target: CONNECTION_TARGET, %token, "clients uninterested");
                    self.backend.clients_uninterested(&token);
                }
            }
        }
    }

    fn has_valid_self_handle(&self) -> bool {
        self.self_handle
            .as_ref()
            .is_some_and(|handle| self.tables.contacts().is_valid(handle.handle()))
    }

    fn ensure_connected(&self) -> Result<(), TpError> {
        if self.status == ConnectionStatus::Connected {
            Ok(())
        } else {
            Err(TpError::disconnected("Connection is disconnected"))
        }
    }

    fn emit(&self, signal: Signal) {
        self.core
            .transport()
            .emit_signal(self.names.object_path(), signal);
    }
}
