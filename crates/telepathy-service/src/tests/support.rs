//! Fakes shared by the contact-list unit tests and behaviour scenarios.

use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet};
use std::rc::Rc;

use serde_json::json;
use telepathy_config::Config;

use crate::channel_manager::{ManagerContext, SharedManager};
use crate::connection::{
    Connection, ConnectionBackend, ConnectionStatus, ConnectionStatusReason, Shutdown,
};
use crate::contact_list::{
    ContactListBackend, ContactListCapabilities, ContactListManager, GroupSupport, ListKind,
    PresenceState, PresenceStates,
};
use crate::errors::TpError;
use crate::handles::{EntityType, Handle, HandleRef, HandleRepo, HandleSet, HandleTable, HandleTables};
use crate::requests::{CHANNEL_TYPE, CHANNEL_TYPE_CONTACT_LIST, PropertyMap, TARGET_HANDLE_TYPE, TARGET_ID};
use crate::transport::{
    CallContext, CallId, MethodReply, ObjectPath, RecordingTransport, Signal,
};

#[derive(Default)]
pub(crate) struct RosterData {
    entries: BTreeMap<Handle, (HandleRef, PresenceStates)>,
    groups: BTreeMap<String, BTreeSet<Handle>>,
    blocked: HandleSet,
    calls: Vec<String>,
    refusing: bool,
    refused_calls: Vec<String>,
}

/// Server-side roster that acknowledges every mutation synchronously.
#[derive(Clone)]
pub(crate) struct FakeRoster {
    capabilities: ContactListCapabilities,
    names: Rc<HandleRepo>,
    data: Rc<RefCell<RosterData>>,
}

impl FakeRoster {
    pub(crate) fn set(&self, contact: &HandleRef, states: PresenceStates) {
        self.data
            .borrow_mut()
            .entries
            .insert(contact.handle(), (contact.clone(), states));
    }

    pub(crate) fn join(&self, group: &str, contact: &HandleRef) {
        self.data
            .borrow_mut()
            .groups
            .entry(group.to_owned())
            .or_default()
            .insert(contact.handle());
    }

    pub(crate) fn calls(&self) -> Vec<String> {
        self.data.borrow().calls.clone()
    }

    pub(crate) fn refuse(&self) {
        self.data.borrow_mut().refusing = true;
    }

    /// Refuses only calls whose record starts with `prefix`.
    pub(crate) fn refuse_calls(&self, prefix: &str) {
        self.data.borrow_mut().refused_calls.push(prefix.to_owned());
    }

    pub(crate) fn has_group(&self, name: &str) -> bool {
        self.data.borrow().groups.contains_key(name)
    }

    fn record(&self, call: String) -> Result<(), TpError> {
        let mut data = self.data.borrow_mut();
        let refused = data.refusing
            || data
                .refused_calls
                .iter()
                .any(|prefix| call.starts_with(prefix.as_str()));
        if refused {
            return Err(TpError::permission_denied("server refused"));
        }
        data.calls.push(call);
        Ok(())
    }

    fn describe(&self, contacts: &HandleSet) -> String {
        contacts
            .iter()
            .filter_map(|contact| self.names.inspect(contact.handle()))
            .collect::<Vec<_>>()
            .join(",")
    }

    fn update(&self, contacts: &HandleSet, change: impl Fn(&mut PresenceStates)) {
        let mut data = self.data.borrow_mut();
        for contact in contacts {
            let entry = data
                .entries
                .entry(contact.handle())
                .or_insert_with(|| (contact.clone(), PresenceStates::default()));
            change(&mut entry.1);
        }
    }
}

impl ContactListBackend for FakeRoster {
    fn capabilities(&self) -> ContactListCapabilities {
        self.capabilities
    }

    fn contacts(&self) -> HandleSet {
        self.data
            .borrow()
            .entries
            .values()
            .map(|(contact, _)| contact.clone())
            .collect()
    }

    fn states(&self, contact: Handle) -> PresenceStates {
        self.data
            .borrow()
            .entries
            .get(&contact)
            .map(|(_, states)| states.clone())
            .unwrap_or_default()
    }

    fn groups(&self) -> Vec<String> {
        self.data.borrow().groups.keys().cloned().collect()
    }

    fn contact_groups(&self, contact: Handle) -> Vec<String> {
        self.data
            .borrow()
            .groups
            .iter()
            .filter(|(_, members)| members.contains(&contact))
            .map(|(name, _)| name.clone())
            .collect()
    }

    fn blocked_contacts(&self) -> HandleSet {
        self.data.borrow().blocked.clone()
    }

    fn is_blocked(&self, contact: Handle) -> bool {
        self.data.borrow().blocked.contains(contact)
    }

    fn request_subscription(&self, contacts: &HandleSet, message: &str) -> Result<(), TpError> {
        self.record(format!("subscribe:{}:{message}", self.describe(contacts)))?;
        self.update(contacts, |states| states.subscribe = PresenceState::Ask);
        Ok(())
    }

    fn authorize_publication(&self, contacts: &HandleSet) -> Result<(), TpError> {
        self.record(format!("authorize:{}", self.describe(contacts)))?;
        self.update(contacts, |states| {
            states.publish = PresenceState::Yes;
            states.publish_request.clear();
        });
        Ok(())
    }

    fn store_contacts(&self, contacts: &HandleSet) -> Result<(), TpError> {
        self.record(format!("store:{}", self.describe(contacts)))?;
        self.update(contacts, |_| {});
        Ok(())
    }

    fn remove_contacts(&self, contacts: &HandleSet) -> Result<(), TpError> {
        self.record(format!("remove:{}", self.describe(contacts)))?;
        let mut data = self.data.borrow_mut();
        for contact in contacts {
            data.entries.remove(&contact.handle());
        }
        Ok(())
    }

    fn unsubscribe(&self, contacts: &HandleSet) -> Result<(), TpError> {
        self.record(format!("unsubscribe:{}", self.describe(contacts)))?;
        self.update(contacts, |states| states.subscribe = PresenceState::No);
        Ok(())
    }

    fn unpublish(&self, contacts: &HandleSet) -> Result<(), TpError> {
        self.record(format!("unpublish:{}", self.describe(contacts)))?;
        self.update(contacts, |states| states.publish = PresenceState::No);
        Ok(())
    }

    fn block_contacts(&self, contacts: &HandleSet) -> Result<(), TpError> {
        self.record(format!("block:{}", self.describe(contacts)))?;
        self.data
            .borrow_mut()
            .blocked
            .extend(contacts.iter().cloned());
        Ok(())
    }

    fn unblock_contacts(&self, contacts: &HandleSet) -> Result<(), TpError> {
        self.record(format!("unblock:{}", self.describe(contacts)))?;
        let mut data = self.data.borrow_mut();
        for contact in contacts {
            data.blocked.remove(contact.handle());
        }
        Ok(())
    }

    fn create_groups(&self, names: &[String]) -> Result<(), TpError> {
        self.record(format!("create-groups:{}", names.join(",")))?;
        let mut data = self.data.borrow_mut();
        for name in names {
            data.groups.entry(name.clone()).or_default();
        }
        Ok(())
    }

    fn rename_group(&self, old: &str, new: &str) -> Result<(), TpError> {
        self.record(format!("rename-group:{old}:{new}"))?;
        let mut data = self.data.borrow_mut();
        let members = data.groups.remove(old).unwrap_or_default();
        data.groups.insert(new.to_owned(), members);
        Ok(())
    }

    fn remove_group(&self, name: &str) -> Result<(), TpError> {
        self.record(format!("remove-group:{name}"))?;
        self.data.borrow_mut().groups.remove(name);
        Ok(())
    }

    fn add_to_group(&self, group: &str, contacts: &HandleSet) -> Result<(), TpError> {
        self.record(format!("add-to-group:{group}:{}", self.describe(contacts)))?;
        let mut data = self.data.borrow_mut();
        let members = data.groups.entry(group.to_owned()).or_default();
        members.extend(contacts.iter().map(HandleRef::handle));
        Ok(())
    }

    fn remove_from_group(&self, group: &str, contacts: &HandleSet) -> Result<(), TpError> {
        self.record(format!(
            "remove-from-group:{group}:{}",
            self.describe(contacts)
        ))?;
        if let Some(members) = self.data.borrow_mut().groups.get_mut(group) {
            for contact in contacts {
                members.remove(&contact.handle());
            }
        }
        Ok(())
    }
}

/// Connection backend whose only manager is the contact list.
pub(crate) struct RosterConnection {
    contacts: Rc<HandleRepo>,
    roster: FakeRoster,
    manager: RefCell<Option<Rc<RefCell<ContactListManager<FakeRoster>>>>>,
    hooks: RefCell<Vec<String>>,
}

impl ConnectionBackend for RosterConnection {
    fn protocol(&self) -> &str {
        "example"
    }

    fn unique_connection_name(&self) -> String {
        "alice@example.com".to_owned()
    }

    fn create_handle_tables(&self) -> HandleTables {
        let contacts: Rc<dyn HandleTable> = self.contacts.clone();
        HandleTables::new(contacts)
            .with_lists(Rc::new(HandleRepo::fixed(
                EntityType::List,
                &["subscribe", "publish", "stored", "deny"],
            )))
            .with_groups(Rc::new(HandleRepo::new(EntityType::Group)))
    }

    fn create_channel_managers(&self, context: &ManagerContext) -> Vec<SharedManager> {
        let manager = ContactListManager::shared(context, self.roster.clone());
        *self.manager.borrow_mut() = Some(manager.clone());
        let shared: SharedManager = manager;
        vec![shared]
    }

    fn start_connecting(&self, _tables: &HandleTables) -> Result<(), TpError> {
        Ok(())
    }

    fn shut_down(&self) -> Shutdown {
        Shutdown::Complete
    }

    fn possible_client_interests(&self) -> Vec<String> {
        vec!["presence".to_owned()]
    }

    fn clients_interested(&self, token: &str) {
        self.hooks.borrow_mut().push(format!("interested:{token}"));
    }

    fn clients_uninterested(&self, token: &str) {
        self.hooks.borrow_mut().push(format!("uninterested:{token}"));
    }
}

pub(crate) struct RosterHarness {
    pub(crate) transport: Rc<RecordingTransport>,
    backend: Rc<RosterConnection>,
    pub(crate) connection: Connection<Rc<RosterConnection>>,
    next_call: u64,
}

impl RosterHarness {
    pub(crate) fn new(capabilities: ContactListCapabilities, config: &Config) -> Self {
        let transport = Rc::new(RecordingTransport::new());
        let contacts = Rc::new(HandleRepo::new(EntityType::Contact));
        let backend = Rc::new(RosterConnection {
            contacts: contacts.clone(),
            roster: FakeRoster {
                capabilities,
                names: contacts,
                data: Rc::new(RefCell::new(RosterData::default())),
            },
            manager: RefCell::new(None),
            hooks: RefCell::new(Vec::new()),
        });
        let connection = Connection::new(backend.clone(), transport.clone(), config);
        Self {
            transport,
            backend,
            connection,
            next_call: 0,
        }
    }

    pub(crate) fn connected(mut self) -> Self {
        self.register();
        self.come_online();
        self
    }

    pub(crate) fn register(&mut self) {
        self.connection
            .register()
            .expect("connection registers on an empty bus");
    }

    pub(crate) fn come_online(&mut self) {
        let own = self.contact("alice@example.com");
        self.connection.connect().expect("connect starts");
        self.connection.set_self_handle(own);
        self.connection
            .change_status(ConnectionStatus::Connected, ConnectionStatusReason::Requested)
            .expect("self handle is valid");
    }

    pub(crate) fn hooks(&self) -> Vec<String> {
        self.backend.hooks.borrow().clone()
    }

    pub(crate) fn statuses(&self) -> Vec<ConnectionStatus> {
        self.transport
            .signals_named(self.connection.object_path(), "StatusChanged")
            .into_iter()
            .filter_map(|signal| match signal {
                Signal::StatusChanged { status, .. } => Some(status),
                _ => None,
            })
            .collect()
    }

    pub(crate) fn roster(&self) -> FakeRoster {
        self.backend.roster.clone()
    }

    pub(crate) fn manager(&self) -> Rc<RefCell<ContactListManager<FakeRoster>>> {
        self.backend
            .manager
            .borrow()
            .clone()
            .expect("managers are created with the connection")
    }

    pub(crate) fn contact(&self, id: &str) -> HandleRef {
        self.backend
            .contacts
            .intern(id)
            .expect("contact identifiers intern")
    }

    pub(crate) fn contacts(&self, ids: &[&str]) -> HandleSet {
        ids.iter().map(|id| self.contact(id)).collect()
    }

    pub(crate) fn receive_roster(&self) {
        self.manager().borrow_mut().mark_roster_received();
    }

    pub(crate) fn call(&mut self) -> CallId {
        self.next_call += 1;
        CallId(self.next_call)
    }

    pub(crate) fn ensure(&mut self, entity: EntityType, id: &str) -> CallId {
        let call = self.call();
        self.connection
            .ensure_channel(CallContext::new(call), properties(entity, id));
        call
    }

    pub(crate) fn create(&mut self, entity: EntityType, id: &str) -> CallId {
        let call = self.call();
        self.connection
            .create_channel(CallContext::new(call), properties(entity, id));
        call
    }

    pub(crate) fn reply(&self, call: CallId) -> Result<MethodReply, TpError> {
        self.transport
            .reply_to(call)
            .expect("exactly one reply for the call")
    }

    pub(crate) fn error_class(&self, call: CallId) -> &'static str {
        self.reply(call)
            .expect_err("request should have failed")
            .class()
    }

    pub(crate) fn list_path(&self, kind: ListKind) -> ObjectPath {
        self.manager()
            .borrow()
            .list(kind)
            .map(|channel| channel.path().clone())
            .expect("list channel exists")
    }

    pub(crate) fn group_path(&self, name: &str) -> ObjectPath {
        self.manager()
            .borrow()
            .group(name)
            .map(|channel| channel.path().clone())
            .expect("group channel exists")
    }

    pub(crate) fn members(&self, path: &ObjectPath) -> (Vec<Handle>, Vec<Handle>, Vec<Handle>) {
        self.manager()
            .borrow()
            .channel_at(path)
            .map(|channel| channel.membership().all_members())
            .expect("channel exists")
    }
}

pub(crate) fn properties(entity: EntityType, id: &str) -> PropertyMap {
    [
        (CHANNEL_TYPE.to_owned(), json!(CHANNEL_TYPE_CONTACT_LIST)),
        (TARGET_HANDLE_TYPE.to_owned(), json!(entity.as_wire())),
        (TARGET_ID.to_owned(), json!(id)),
    ]
    .into_iter()
    .collect()
}

pub(crate) fn capabilities(groups: GroupSupport) -> ContactListCapabilities {
    ContactListCapabilities {
        can_change_contact_list: true,
        contact_list_persists: true,
        request_uses_message: true,
        can_block: true,
        groups,
    }
}
