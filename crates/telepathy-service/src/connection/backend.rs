use std::fmt;
use std::rc::Rc;

use crate::channel_manager::{ManagerContext, SharedManager};
use crate::errors::TpError;
use crate::handles::{EntityType, HandleTables};
use crate::requests::LookupTicket;

/// Whether a backend finished shutting down inside [`ConnectionBackend::shut_down`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shutdown {
    /// Nothing left to do; the connection finishes immediately.
    Complete,
    /// The backend calls [`Connection::finish_shutdown`](super::Connection::finish_shutdown)
    /// once its own teardown completes.
    Deferred,
}

/// Protocol-specific behaviour plugged into a [`Connection`](super::Connection).
///
/// Hooks run on the connection's thread and must not call back into the
/// connection that invoked them.
pub trait ConnectionBackend {
    /// Protocol name, e.g. `jabber`.
    fn protocol(&self) -> &str;

    /// Identifier unique among this backend's connections, typically the
    /// account name. It is escaped before use in bus names.
    fn unique_connection_name(&self) -> String;

    /// Builds the handle tables once, at construction.
    fn create_handle_tables(&self) -> HandleTables;

    /// Builds the channel managers once, at construction. The order is the
    /// order in which requests are offered.
    fn create_channel_managers(&self, context: &ManagerContext) -> Vec<SharedManager>;

    /// Starts connecting to the service.
    ///
    /// # Errors
    ///
    /// An error aborts the attempt; the connection becomes DISCONNECTED with
    /// a reason derived from it.
    fn start_connecting(&self, tables: &HandleTables) -> Result<(), TpError>;

    /// Tears down protocol state after DISCONNECTED was entered.
    fn shut_down(&self) -> Shutdown;

    /// Called after the status became CONNECTING.
    fn connecting(&self) {}

    /// Called after the status became CONNECTED.
    fn connected(&self) {}

    /// Called after the status became DISCONNECTED, unless the connection
    /// never left NEW.
    fn disconnected(&self) {}

    /// Extra interfaces exported on the connection object.
    fn interfaces(&self) -> Vec<String> {
        Vec::new()
    }

    /// Tokens clients may declare interest in; others are ignored.
    fn possible_client_interests(&self) -> Vec<String> {
        Vec::new()
    }

    /// The first client declared interest in `token`.
    fn clients_interested(&self, _token: &str) {}

    /// The last interested client withdrew `token`.
    fn clients_uninterested(&self, _token: &str) {}

    /// Starts resolving `id` remotely. The backend later reports the outcome
    /// through [`Connection::complete_lookup`](super::Connection::complete_lookup).
    ///
    /// # Errors
    ///
    /// An error fails the parked request at once.
    fn begin_lookup(
        &self,
        _ticket: LookupTicket,
        entity: EntityType,
        _id: &str,
    ) -> Result<(), TpError> {
        Err(TpError::not_implemented(format!(
            "{entity} identifiers cannot be looked up"
        )))
    }
}

impl fmt::Debug for dyn ConnectionBackend {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "ConnectionBackend({})", self.protocol())
    }
}

impl<T> ConnectionBackend for Rc<T>
where
    T: ConnectionBackend,
{
    fn protocol(&self) -> &str {
        (**self).protocol()
    }

    fn unique_connection_name(&self) -> String {
        (**self).unique_connection_name()
    }

    fn create_handle_tables(&self) -> HandleTables {
        (**self).create_handle_tables()
    }

    fn create_channel_managers(&self, context: &ManagerContext) -> Vec<SharedManager> {
        (**self).create_channel_managers(context)
    }

    fn start_connecting(&self, tables: &HandleTables) -> Result<(), TpError> {
        (**self).start_connecting(tables)
    }

    fn shut_down(&self) -> Shutdown {
        (**self).shut_down()
    }

    fn connecting(&self) {
        (**self).connecting();
    }

    fn connected(&self) {
        (**self).connected();
    }

    fn disconnected(&self) {
        (**self).disconnected();
    }

    fn interfaces(&self) -> Vec<String> {
        (**self).interfaces()
    }

    fn possible_client_interests(&self) -> Vec<String> {
        (**self).possible_client_interests()
    }

    fn clients_interested(&self, token: &str) {
        (**self).clients_interested(token);
    }

    fn clients_uninterested(&self, token: &str) {
        (**self).clients_uninterested(token);
    }

    fn begin_lookup(
        &self,
        ticket: LookupTicket,
        entity: EntityType,
        id: &str,
    ) -> Result<(), TpError> {
        (**self).begin_lookup(ticket, entity, id)
    }
}
