//! Behavioural tests for connection status and client interest.

use std::cell::RefCell;

use rstest::fixture;
use rstest_bdd_macros::{given, scenario, then, when};
use telepathy_config::Config;

use super::support::{RosterHarness, capabilities};
use crate::contact_list::GroupSupport;
use crate::transport::ClientName;

#[derive(Default)]
struct LifecycleWorld {
    harness: Option<RosterHarness>,
}

impl LifecycleWorld {
    fn harness(&self) -> &RosterHarness {
        self.harness.as_ref().expect("a connection was set up")
    }

    fn harness_mut(&mut self) -> &mut RosterHarness {
        self.harness.as_mut().expect("a connection was set up")
    }
}

#[fixture]
fn world() -> RefCell<LifecycleWorld> {
    RefCell::new(LifecycleWorld::default())
}

#[given("a registered connection")]
fn given_registered(world: &RefCell<LifecycleWorld>) {
    let mut harness = RosterHarness::new(capabilities(GroupSupport::None), &Config::default());
    harness.register();
    world.borrow_mut().harness = Some(harness);
}

#[when("the connection comes online")]
fn when_online(world: &RefCell<LifecycleWorld>) {
    world.borrow_mut().harness_mut().come_online();
}

#[when("client {client} declares interest in {token}")]
fn when_interested(world: &RefCell<LifecycleWorld>, client: String, token: String) {
    world
        .borrow_mut()
        .harness_mut()
        .connection
        .add_client_interest(
            &ClientName::new(strip_quotes(&client)),
            &[strip_quotes(&token).to_owned()],
        )
        .expect("interest is accepted before disconnection");
}

#[when("client {client} leaves the bus")]
fn when_client_leaves(world: &RefCell<LifecycleWorld>, client: String) {
    world
        .borrow_mut()
        .harness_mut()
        .connection
        .client_vanished(&ClientName::new(strip_quotes(&client)));
}

#[then("the reported statuses are {statuses}")]
fn then_statuses(world: &RefCell<LifecycleWorld>, statuses: String) {
    let reported: Vec<String> = world
        .borrow()
        .harness()
        .statuses()
        .iter()
        .map(ToString::to_string)
        .collect();
    assert_eq!(reported.join(","), strip_quotes(&statuses));
}

#[then("the backend was told {hooks}")]
fn then_hooks(world: &RefCell<LifecycleWorld>, hooks: String) {
    assert_eq!(world.borrow().harness().hooks().join(","), strip_quotes(&hooks));
}

#[then("the backend heard nothing")]
fn then_silence(world: &RefCell<LifecycleWorld>) {
    assert!(world.borrow().harness().hooks().is_empty());
}

#[rustfmt::skip]
fn strip_quotes(value: &str) -> &str { value.trim_matches('"') }

#[scenario(path = "tests/features/connection_lifecycle.feature")]
fn connection_lifecycle_scenarios(#[from(world)] world: RefCell<LifecycleWorld>) {
    drop(world);
}
