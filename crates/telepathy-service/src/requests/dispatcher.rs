use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

use tracing::{debug, warn};

use super::validation::{RequestedTarget, ValidatedRequest};
use super::{ChannelRequest, DISPATCH_TARGET, DispatchCore, InFlight, RequestMethod};
use crate::channel_manager::{ChannelDetails, Offer, RequestableChannelClass, SharedManager};
use crate::connection::ConnectionStatus;
use crate::errors::{HandleError, TpError};
use crate::handles::{EntityType, HandleRef, HandleTables};
use crate::transport::CallContext;

/// Identifies a request parked on a remote identifier lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LookupTicket(u64);

impl LookupTicket {
    pub(crate) const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Raw ticket value.
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for LookupTicket {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "lookup#{}", self.0)
    }
}

#[derive(Debug)]
struct PendingLookup {
    call: CallContext,
    request: ValidatedRequest,
    id: String,
}

/// Outcome of submitting a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Submission {
    /// The call has been answered or handed to a manager.
    Dispatched,
    /// The target identifier needs a remote lookup before dispatch resumes.
    Lookup {
        ticket: LookupTicket,
        entity: EntityType,
        id: String,
    },
}

/// Resolves requests and offers them to channel managers in order.
#[derive(Debug)]
pub struct Dispatcher {
    core: Rc<DispatchCore>,
    managers: Vec<SharedManager>,
    lookups: BTreeMap<LookupTicket, PendingLookup>,
}

impl Dispatcher {
    pub(crate) const fn new(core: Rc<DispatchCore>) -> Self {
        Self {
            core,
            managers: Vec::new(),
            lookups: BTreeMap::new(),
        }
    }

    pub(crate) fn set_managers(&mut self, managers: Vec<SharedManager>) {
        self.managers = managers;
    }

    /// Registered managers, in offer order.
    #[must_use]
    pub fn managers(&self) -> &[SharedManager] {
        &self.managers
    }

    /// Number of requests parked on identifier lookups.
    #[must_use]
    pub fn pending_lookups(&self) -> usize {
        self.lookups.len()
    }

    /// Every channel the managers currently own.
    #[must_use]
    pub fn channels(&self) -> Vec<ChannelDetails> {
        self.managers
            .iter()
            .flat_map(|manager| manager.borrow().channels())
            .collect()
    }

    /// Union of the managers' requestable classes, first occurrence wins.
    #[must_use]
    pub fn requestable_channel_classes(&self) -> Vec<RequestableChannelClass> {
        let mut classes: Vec<RequestableChannelClass> = Vec::new();
        for manager in &self.managers {
            for class in manager.borrow().requestable_channel_classes() {
                if !classes.contains(&class) {
                    classes.push(class);
                }
            }
        }
        classes
    }

    pub(crate) fn notify_status(&self, status: ConnectionStatus) {
        for manager in &self.managers {
            manager.borrow_mut().status_changed(status);
        }
    }

    /// Resolves the target of a validated request and dispatches it.
    ///
    /// Validation and resolution failures answer the call immediately; the
    /// request never becomes in-flight.
    pub(crate) fn submit(
        &mut self,
        tables: &HandleTables,
        call: CallContext,
        request: ValidatedRequest,
    ) -> Submission {
        let resolved = match &request.target {
            RequestedTarget::None => Ok(None),
            RequestedTarget::Handle(handle) => tables
                .get(request.entity_type)
                .and_then(|table| table.hold(*handle))
                .map(Some),
            RequestedTarget::Id(id) => tables
                .get(request.entity_type)
                .and_then(|table| table.ensure(id))
                .map(Some),
        };

        match resolved {
            Ok(target) => self.offer(tables, call, request, target),
            Err(HandleError::LookupRequired { entity, id }) => {
                let ticket = self.core.allocate_ticket();
                debug!(
                    target: DISPATCH_TARGET,
                    %ticket,
                    %entity,
                    %id,
                    "target needs a remote lookup"
                );
                self.lookups.insert(
                    ticket,
                    PendingLookup {
                        call,
                        request,
                        id: id.clone(),
                    },
                );
                return Submission::Lookup { ticket, entity, id };
            }
            Err(error) => {
                debug!(target: DISPATCH_TARGET, %error, "request target did not resolve");
                self.core.reply(call, Err(error.into()));
            }
        }
        Submission::Dispatched
    }

    /// Resumes a request parked on `ticket`.
    ///
    /// # Errors
    ///
    /// Returns `NotAvailable` when no request is parked on `ticket`.
    pub(crate) fn complete_lookup(
        &mut self,
        tables: &HandleTables,
        ticket: LookupTicket,
        result: Result<HandleRef, TpError>,
    ) -> Result<(), TpError> {
        let pending = self
            .lookups
            .remove(&ticket)
            .ok_or_else(|| TpError::not_available(format!("{ticket} is not pending")))?;
        match result {
            Ok(handle) => {
                debug!(target: DISPATCH_TARGET, %ticket, id = %pending.id, "lookup resolved");
                self.offer(tables, pending.call, pending.request, Some(handle));
            }
            Err(error) => {
                debug!(target: DISPATCH_TARGET, %ticket, %error, "lookup failed");
                self.core.reply(pending.call, Err(error));
            }
        }
        Ok(())
    }

    /// Abandons a parked request, answering it with `Cancelled`.
    ///
    /// # Errors
    ///
    /// Returns `NotAvailable` when no request is parked on `ticket`.
    pub(crate) fn cancel_lookup(&mut self, ticket: LookupTicket) -> Result<(), TpError> {
        self.complete_lookup_with(ticket, TpError::cancelled("identifier lookup was cancelled"))
    }

    /// Fails a parked request with `error`.
    ///
    /// # Errors
    ///
    /// Returns `NotAvailable` when no request is parked on `ticket`.
    pub(crate) fn complete_lookup_with(
        &mut self,
        ticket: LookupTicket,
        error: TpError,
    ) -> Result<(), TpError> {
        let pending = self
            .lookups
            .remove(&ticket)
            .ok_or_else(|| TpError::not_available(format!("{ticket} is not pending")))?;
        debug!(target: DISPATCH_TARGET, %ticket, %error, "lookup abandoned");
        self.core.reply(pending.call, Err(error));
        Ok(())
    }

    /// Fails every parked lookup and in-flight request with `error`.
    pub(crate) fn fail_everything(&mut self, error: &TpError) -> usize {
        let lookups = std::mem::take(&mut self.lookups);
        let parked = lookups.len();
        for (_, pending) in lookups {
            self.core.reply(pending.call, Err(error.clone()));
        }
        let in_flight = self.core.fail_all(error);
        if parked + in_flight > 0 {
            warn!(
                target: DISPATCH_TARGET,
                parked,
                in_flight,
                "failed outstanding channel requests"
            );
        }
        parked + in_flight
    }

    fn offer(
        &self,
        tables: &HandleTables,
        call: CallContext,
        request: ValidatedRequest,
        target: Option<HandleRef>,
    ) {
        let target_id = target.as_ref().and_then(|handle| {
            tables
                .get(request.entity_type)
                .ok()
                .and_then(|table| table.inspect(handle.handle()))
        });
        let method = request.method;
        let token = self.core.allocate_token();
        let channel_request = ChannelRequest::new(token, request, target, target_id);
        self.core.track(
            token,
            InFlight {
                call,
                method,
                channel_type: channel_request.channel_type().to_owned(),
                target: channel_request.target().cloned(),
            },
        );
        debug!(
            target: DISPATCH_TARGET,
            %token,
            %method,
            channel_type = channel_request.channel_type(),
            entity = %channel_request.entity_type(),
            "offering channel request"
        );

        for manager in &self.managers {
            let offer = {
                let mut owner = manager.borrow_mut();
                match method {
                    RequestMethod::Create => owner.create_channel(&channel_request),
                    RequestMethod::Ensure => owner.ensure_channel(&channel_request),
                    RequestMethod::Request { .. } => owner.request_channel(&channel_request),
                }
            };
            if offer == Offer::Accepted {
                return;
            }
        }

        if let Some(entry) = self.core.claim(token) {
            debug!(target: DISPATCH_TARGET, %token, "no channel manager accepted the request");
            self.core.reply(
                entry.call,
                Err(TpError::not_implemented(format!(
                    "unsupported channel type {}",
                    channel_request.channel_type()
                ))),
            );
        }
    }
}
