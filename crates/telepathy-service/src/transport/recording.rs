use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet};

use super::{BusName, CallId, ClientName, MethodReply, ObjectPath, Signal, Transport};
use crate::errors::{TpError, TransportError};

/// In-memory transport recording everything the core asks of the bus.
#[derive(Debug, Default)]
pub struct RecordingTransport {
    objects: RefCell<BTreeMap<ObjectPath, Vec<String>>>,
    names: RefCell<BTreeSet<BusName>>,
    signals: RefCell<Vec<(ObjectPath, Signal)>>,
    replies: RefCell<Vec<(CallId, Result<MethodReply, TpError>)>>,
    watched: RefCell<BTreeSet<ClientName>>,
}

impl RecordingTransport {
    /// Empty recorder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether an object is exported at `path`.
    #[must_use]
    pub fn is_registered(&self, path: &ObjectPath) -> bool {
        self.objects.borrow().contains_key(path)
    }

    /// Interfaces exported at `path`.
    #[must_use]
    pub fn interfaces(&self, path: &ObjectPath) -> Option<Vec<String>> {
        self.objects.borrow().get(path).cloned()
    }

    /// Whether the well-known name is owned.
    #[must_use]
    pub fn owns_name(&self, name: &BusName) -> bool {
        self.names.borrow().contains(name)
    }

    /// Every signal emitted so far, in order.
    #[must_use]
    pub fn signals(&self) -> Vec<(ObjectPath, Signal)> {
        self.signals.borrow().clone()
    }

    /// Signals emitted from `path` with the given member name.
    #[must_use]
    pub fn signals_named(&self, path: &ObjectPath, name: &str) -> Vec<Signal> {
        self.signals
            .borrow()
            .iter()
            .filter(|(source, signal)| source == path && signal.name() == name)
            .map(|(_, signal)| signal.clone())
            .collect()
    }

    /// Drains the recorded signals.
    pub fn take_signals(&self) -> Vec<(ObjectPath, Signal)> {
        std::mem::take(&mut *self.signals.borrow_mut())
    }

    /// Every reply sent so far, in order.
    #[must_use]
    pub fn replies(&self) -> Vec<(CallId, Result<MethodReply, TpError>)> {
        self.replies.borrow().clone()
    }

    /// Replies sent for `call`; a well-behaved core sends exactly one.
    #[must_use]
    pub fn replies_to(&self, call: CallId) -> Vec<Result<MethodReply, TpError>> {
        self.replies
            .borrow()
            .iter()
            .filter(|(id, _)| *id == call)
            .map(|(_, reply)| reply.clone())
            .collect()
    }

    /// The single reply sent for `call`, if exactly one was sent.
    #[must_use]
    pub fn reply_to(&self, call: CallId) -> Option<Result<MethodReply, TpError>> {
        let mut replies = self.replies_to(call);
        if replies.len() == 1 { replies.pop() } else { None }
    }

    /// Whether liveness of `client` is being watched.
    #[must_use]
    pub fn is_watching(&self, client: &ClientName) -> bool {
        self.watched.borrow().contains(client)
    }
}

impl Transport for RecordingTransport {
    fn register_object(
        &self,
        path: &ObjectPath,
        interfaces: &[String],
    ) -> Result<(), TransportError> {
        let mut objects = self.objects.borrow_mut();
        if objects.contains_key(path) {
            return Err(TransportError::Registration {
                path: path.to_string(),
                message: "path already exported".to_owned(),
            });
        }
        objects.insert(path.clone(), interfaces.to_vec());
        Ok(())
    }

    fn request_name(&self, name: &BusName) -> Result<(), TransportError> {
        if self.names.borrow_mut().insert(name.clone()) {
            Ok(())
        } else {
            Err(TransportError::NameUnavailable {
                name: name.to_string(),
                message: "name already owned".to_owned(),
            })
        }
    }

    fn unregister_object(&self, path: &ObjectPath) {
        self.objects.borrow_mut().remove(path);
    }

    fn release_name(&self, name: &BusName) {
        self.names.borrow_mut().remove(name);
    }

    fn emit_signal(&self, path: &ObjectPath, signal: Signal) {
        self.signals.borrow_mut().push((path.clone(), signal));
    }

    fn complete_call(&self, call: CallId, reply: Result<MethodReply, TpError>) {
        self.replies.borrow_mut().push((call, reply));
    }

    fn watch_client(&self, client: &ClientName) {
        self.watched.borrow_mut().insert(client.clone());
    }

    fn unwatch_client(&self, client: &ClientName) {
        self.watched.borrow_mut().remove(client);
    }
}
