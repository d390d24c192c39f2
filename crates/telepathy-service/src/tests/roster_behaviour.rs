//! Behavioural tests for contact-list synchronisation.

use std::cell::RefCell;

use rstest::fixture;
use rstest_bdd_macros::{given, scenario, then, when};
use telepathy_config::Config;

use super::support::{RosterHarness, capabilities};
use crate::contact_list::{GroupRename, GroupSupport, ListKind, PresenceState, PresenceStates};
use crate::handles::EntityType;
use crate::transport::{CallContext, CallId, MethodReply};

#[derive(Default)]
struct RosterWorld {
    harness: Option<RosterHarness>,
    request: Option<CallId>,
}

impl RosterWorld {
    fn harness(&self) -> &RosterHarness {
        self.harness.as_ref().expect("a contact list was set up")
    }

    fn harness_mut(&mut self) -> &mut RosterHarness {
        self.harness.as_mut().expect("a contact list was set up")
    }

    fn request(&self) -> CallId {
        self.request.expect("a request was made")
    }

    fn set_states(&self, id: &str, states: PresenceStates) {
        let harness = self.harness();
        let contact = harness.contact(id);
        harness.roster().set(&contact, states);
    }

    fn list_has(&self, kind: ListKind, id: &str, remote: bool) -> bool {
        let harness = self.harness();
        let handle = harness.contact(id).handle();
        let (members, _, remote_pending) = harness.members(&harness.list_path(kind));
        if remote {
            remote_pending.contains(&handle)
        } else {
            members.contains(&handle)
        }
    }
}

#[fixture]
fn world() -> RefCell<RosterWorld> {
    RefCell::new(RosterWorld::default())
}

#[given("a connected contact list")]
fn given_connected(world: &RefCell<RosterWorld>) {
    world.borrow_mut().harness = Some(
        RosterHarness::new(
            capabilities(GroupSupport::Mutable(GroupRename::Native)),
            &Config::default(),
        )
        .connected(),
    );
}

#[given("{id} is subscribed both ways")]
fn given_mutual(world: &RefCell<RosterWorld>, id: String) {
    world.borrow().set_states(
        strip_quotes(&id),
        PresenceStates::new(PresenceState::Yes, PresenceState::Yes),
    );
}

#[given("{id} has been asked for their presence")]
fn given_asked(world: &RefCell<RosterWorld>, id: String) {
    world.borrow().set_states(
        strip_quotes(&id),
        PresenceStates::new(PresenceState::Ask, PresenceState::No),
    );
}

#[when("the roster arrives")]
fn when_roster_arrives(world: &RefCell<RosterWorld>) {
    world.borrow().harness().receive_roster();
}

#[when("a client ensures the {name} list")]
fn when_ensure_list(world: &RefCell<RosterWorld>, name: String) {
    let mut state = world.borrow_mut();
    let call = state
        .harness_mut()
        .ensure(EntityType::List, strip_quotes(&name));
    state.request = Some(call);
}

#[when("a client ensures the {name} group")]
fn when_ensure_group(world: &RefCell<RosterWorld>, name: String) {
    let mut state = world.borrow_mut();
    let call = state
        .harness_mut()
        .ensure(EntityType::Group, strip_quotes(&name));
    state.request = Some(call);
}

#[when("the connection disconnects")]
fn when_disconnects(world: &RefCell<RosterWorld>) {
    let mut state = world.borrow_mut();
    let harness = state.harness_mut();
    let call = harness.call();
    harness.connection.disconnect(CallContext::new(call));
}

#[then("the subscribe list has member {id}")]
fn then_subscribed(world: &RefCell<RosterWorld>, id: String) {
    assert!(
        world
            .borrow()
            .list_has(ListKind::Subscribe, strip_quotes(&id), false)
    );
}

#[then("the subscribe list has remote-pending {id}")]
fn then_asked(world: &RefCell<RosterWorld>, id: String) {
    assert!(
        world
            .borrow()
            .list_has(ListKind::Subscribe, strip_quotes(&id), true)
    );
}

#[then("the publish list has member {id}")]
fn then_published(world: &RefCell<RosterWorld>, id: String) {
    assert!(
        world
            .borrow()
            .list_has(ListKind::Publish, strip_quotes(&id), false)
    );
}

#[then("the request is still waiting")]
fn then_waiting(world: &RefCell<RosterWorld>) {
    let state = world.borrow();
    assert!(state.harness().transport.reply_to(state.request()).is_none());
    assert_eq!(state.harness().manager().borrow().queued_requests(), 1);
}

#[then("the request is answered with the {name} list")]
fn then_answered_with_list(world: &RefCell<RosterWorld>, name: String) {
    let state = world.borrow();
    let kind = strip_quotes(&name)
        .parse::<ListKind>()
        .expect("scenario names a known list");
    let expected = state.harness().list_path(kind);
    assert!(matches!(
        state.harness().reply(state.request()),
        Ok(MethodReply::ChannelEnsured { path, .. }) if path == expected
    ));
}

#[then("the request is answered with the {name} group")]
fn then_answered_with_group(world: &RefCell<RosterWorld>, name: String) {
    let state = world.borrow();
    let expected = state.harness().group_path(strip_quotes(&name));
    assert!(matches!(
        state.harness().reply(state.request()),
        Ok(MethodReply::ChannelEnsured { path, .. }) if path == expected
    ));
}

#[then("the backend has a group {name}")]
fn then_backend_group(world: &RefCell<RosterWorld>, name: String) {
    assert!(world.borrow().harness().roster().has_group(strip_quotes(&name)));
}

#[then("the request fails with {class}")]
fn then_fails(world: &RefCell<RosterWorld>, class: String) {
    let state = world.borrow();
    assert_eq!(
        state.harness().error_class(state.request()),
        strip_quotes(&class)
    );
}

#[rustfmt::skip]
fn strip_quotes(value: &str) -> &str { value.trim_matches('"') }

#[scenario(path = "tests/features/contact_list.feature")]
fn contact_list_scenarios(#[from(world)] world: RefCell<RosterWorld>) {
    drop(world);
}
