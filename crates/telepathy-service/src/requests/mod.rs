//! Channel request dispatch.
//!
//! Client calls to `CreateChannel`, `EnsureChannel` and the legacy
//! `RequestChannel` pass through three stages: structural validation of the
//! property map ([`validation`]), resolution of the target against the handle
//! tables, and an offer to each channel manager in turn ([`Dispatcher`]).
//! Accepted requests are tracked in [`InFlightRequests`] until a manager
//! reports them satisfied or failed through [`ManagerEvents`].

mod dispatcher;
mod events;
mod properties;
mod validation;

use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

use serde_json::Value;
use strum::Display;
use tracing::debug;

use crate::errors::TpError;
use crate::handles::{EntityType, HandleRef};
use crate::transport::{CallContext, MethodReply, ObjectPath, Transport};

pub use dispatcher::{Dispatcher, LookupTicket};
pub(crate) use dispatcher::Submission;
pub use events::ManagerEvents;
pub use properties::{
    CHANNEL_INTERFACE, CHANNEL_TYPE, CHANNEL_TYPE_CONTACT_LIST, GROUP_INTERFACE, INITIATOR_HANDLE,
    INITIATOR_ID, INTERFACES, PropertyMap, REQUESTED, TARGET_HANDLE, TARGET_HANDLE_TYPE,
    TARGET_ID, string_property, u32_property,
};
pub use validation::{RequestedTarget, ValidatedRequest, legacy_properties, validate};

/// Tracing target for request dispatch.
pub(crate) const DISPATCH_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::dispatch");

/// Identifies one in-flight channel request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RequestToken(u64);

impl RequestToken {
    /// Raw token value.
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for RequestToken {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "request#{}", self.0)
    }
}

/// Client method that produced a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum RequestMethod {
    /// `CreateChannel`: always a fresh channel.
    #[strum(serialize = "CreateChannel")]
    Create,
    /// `EnsureChannel`: an existing channel is fine.
    #[strum(serialize = "EnsureChannel")]
    Ensure,
    /// Legacy `RequestChannel`.
    #[strum(serialize = "RequestChannel")]
    Request {
        /// Whether the caller will handle the channel itself.
        suppress_handler: bool,
    },
}

impl RequestMethod {
    /// Whether a satisfied request of this kind suppresses other handlers.
    #[must_use]
    pub const fn suppresses_handler(self) -> bool {
        match self {
            Self::Create => true,
            Self::Ensure => false,
            Self::Request { suppress_handler } => suppress_handler,
        }
    }
}

/// A validated, resolved request as offered to channel managers.
#[derive(Debug)]
pub struct ChannelRequest {
    token: RequestToken,
    method: RequestMethod,
    channel_type: String,
    entity_type: EntityType,
    target: Option<HandleRef>,
    target_id: Option<String>,
    properties: PropertyMap,
}

impl ChannelRequest {
    /// Token to hand back through [`ManagerEvents`].
    #[must_use]
    pub const fn token(&self) -> RequestToken {
        self.token
    }

    /// Originating client method.
    #[must_use]
    pub const fn method(&self) -> RequestMethod {
        self.method
    }

    /// Requested channel type.
    #[must_use]
    pub fn channel_type(&self) -> &str {
        &self.channel_type
    }

    /// Target entity type, [`EntityType::None`] for untargeted requests.
    #[must_use]
    pub const fn entity_type(&self) -> EntityType {
        self.entity_type
    }

    /// Target handle, if the request has one.
    #[must_use]
    pub const fn target(&self) -> Option<&HandleRef> {
        self.target.as_ref()
    }

    /// Identifier of the target, as normalised by the handle table.
    #[must_use]
    pub fn target_id(&self) -> Option<&str> {
        self.target_id.as_deref()
    }

    /// Requested properties with the target expressed as a handle.
    #[must_use]
    pub const fn properties(&self) -> &PropertyMap {
        &self.properties
    }

    pub(crate) fn new(
        token: RequestToken,
        validated: ValidatedRequest,
        target: Option<HandleRef>,
        target_id: Option<String>,
    ) -> Self {
        let ValidatedRequest {
            method,
            channel_type,
            entity_type,
            mut properties,
            ..
        } = validated;
        properties.remove(TARGET_ID);
        properties.insert(
            TARGET_HANDLE_TYPE.to_owned(),
            Value::from(entity_type.as_wire()),
        );
        if let Some(handle) = &target {
            properties.insert(TARGET_HANDLE.to_owned(), Value::from(handle.handle().get()));
        }
        Self {
            token,
            method,
            channel_type,
            entity_type,
            target,
            target_id,
            properties,
        }
    }
}

/// Book-keeping for one accepted request until it resolves.
#[derive(Debug)]
pub(crate) struct InFlight {
    pub(crate) call: CallContext,
    pub(crate) method: RequestMethod,
    pub(crate) channel_type: String,
    #[expect(dead_code, reason = "held so the target stays referenced while pending")]
    pub(crate) target: Option<HandleRef>,
}

/// Requests accepted by a manager and not yet satisfied or failed.
#[derive(Debug, Default)]
pub struct InFlightRequests {
    next: u64,
    entries: BTreeMap<RequestToken, InFlight>,
}

impl InFlightRequests {
    /// Number of pending requests.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing is pending.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Whether `token` is pending.
    #[must_use]
    pub fn contains(&self, token: RequestToken) -> bool {
        self.entries.contains_key(&token)
    }

    fn allocate(&mut self) -> RequestToken {
        self.next += 1;
        RequestToken(self.next)
    }

    fn insert(&mut self, token: RequestToken, entry: InFlight) {
        let previous = self.entries.insert(token, entry);
        assert!(previous.is_none(), "{token} dispatched twice");
    }

    fn take(&mut self, token: RequestToken) -> Option<InFlight> {
        self.entries.remove(&token)
    }

    fn drain(&mut self) -> Vec<(RequestToken, InFlight)> {
        std::mem::take(&mut self.entries).into_iter().collect()
    }
}

/// State shared by the dispatcher and the event sink handed to managers.
///
/// Managers report back while the dispatcher is still offering a request,
/// so the in-flight table sits behind a `RefCell` that is never borrowed
/// across a manager call.
#[derive(Debug)]
pub struct DispatchCore {
    transport: Rc<dyn Transport>,
    connection_path: ObjectPath,
    in_flight: RefCell<InFlightRequests>,
    lookups: Cell<u64>,
}

impl DispatchCore {
    /// Core emitting on the connection object at `connection_path`.
    pub fn new(transport: Rc<dyn Transport>, connection_path: ObjectPath) -> Self {
        Self {
            transport,
            connection_path,
            in_flight: RefCell::new(InFlightRequests::default()),
            lookups: Cell::new(0),
        }
    }

    /// Transport used for signals and replies.
    #[must_use]
    pub const fn transport(&self) -> &Rc<dyn Transport> {
        &self.transport
    }

    /// Connection object path.
    #[must_use]
    pub const fn connection_path(&self) -> &ObjectPath {
        &self.connection_path
    }

    /// Number of requests awaiting a manager's verdict.
    #[must_use]
    pub fn in_flight_len(&self) -> usize {
        self.in_flight.borrow().len()
    }

    /// Whether `token` is still awaiting a manager's verdict.
    #[must_use]
    pub fn is_in_flight(&self, token: RequestToken) -> bool {
        self.in_flight.borrow().contains(token)
    }

    pub(crate) fn allocate_token(&self) -> RequestToken {
        self.in_flight.borrow_mut().allocate()
    }

    pub(crate) fn allocate_ticket(&self) -> LookupTicket {
        let next = self.lookups.get() + 1;
        self.lookups.set(next);
        LookupTicket::new(next)
    }

    pub(crate) fn track(&self, token: RequestToken, entry: InFlight) {
        self.in_flight.borrow_mut().insert(token, entry);
    }

    pub(crate) fn claim(&self, token: RequestToken) -> Option<InFlight> {
        self.in_flight.borrow_mut().take(token)
    }

    pub(crate) fn reply(&self, call: CallContext, reply: Result<MethodReply, TpError>) {
        call.complete(self.transport.as_ref(), reply);
    }

    /// Fails every in-flight request with `error`, returning how many failed.
    pub(crate) fn fail_all(&self, error: &TpError) -> usize {
        let drained = self.in_flight.borrow_mut().drain();
        let count = drained.len();
        for (token, entry) in drained {
            debug!(
                target: DISPATCH_TARGET,
                %token,
                channel_type = %entry.channel_type,
                "cancelling channel request"
            );
            self.reply(entry.call, Err(error.clone()));
        }
        count
    }
}
