//! Contact-list synchronisation through a live connection.

use rstest::{fixture, rstest};
use telepathy_config::Config;

use super::legacy::LegacyContactList;
use super::*;
use crate::tests::support::{RosterHarness as Harness, capabilities};
use crate::transport::{CallContext, MethodReply};

#[fixture]
fn harness() -> Harness {
    Harness::new(
        capabilities(GroupSupport::Mutable(GroupRename::Native)),
        &Config::default(),
    )
    .connected()
}

#[rstest]
fn roster_states_become_list_membership(harness: Harness) {
    let roster = harness.roster();
    let alice = harness.contact("alice@example.com");
    let bob = harness.contact("bob@example.com");
    roster.set(
        &alice,
        PresenceStates::new(PresenceState::Yes, PresenceState::Yes),
    );
    roster.set(
        &bob,
        PresenceStates::new(PresenceState::Ask, PresenceState::No),
    );

    harness.receive_roster();

    let (members, local, remote) = harness.members(&harness.list_path(ListKind::Subscribe));
    assert_eq!(members, vec![alice.handle()]);
    assert!(local.is_empty());
    assert_eq!(remote, vec![bob.handle()]);
    let (published, _, _) = harness.members(&harness.list_path(ListKind::Publish));
    assert_eq!(published, vec![alice.handle()]);
    let (stored, _, _) = harness.members(&harness.list_path(ListKind::Stored));
    assert_eq!(stored, vec![alice.handle(), bob.handle()]);
}

#[rstest]
fn lists_stay_hidden_until_the_roster_arrives(harness: Harness) {
    assert!(harness.connection.channels().expect("connected").is_empty());

    harness.receive_roster();

    let announced = harness.connection.list_channels().expect("connected");
    assert_eq!(announced.len(), 4);
    assert!(
        announced
            .iter()
            .all(|info| info.entity_type == EntityType::List.as_wire())
    );
}

#[rstest]
fn requests_before_the_roster_are_answered_when_it_arrives(mut harness: Harness) {
    let call = harness.ensure(EntityType::List, "stored");
    assert!(harness.transport.reply_to(call).is_none());
    assert_eq!(harness.manager().borrow().queued_requests(), 1);

    harness.receive_roster();

    let stored = harness.list_path(ListKind::Stored);
    let connection = harness.connection.object_path().clone();
    assert_eq!(
        harness
            .transport
            .signals_named(&connection, "NewChannels")
            .len(),
        1
    );
    assert!(matches!(
        harness.reply(call),
        Ok(MethodReply::ChannelEnsured { path, .. }) if path == stored
    ));
    assert_eq!(harness.manager().borrow().queued_requests(), 0);
}

#[rstest]
fn channels_are_announced_with_the_initial_roster(mut harness: Harness) {
    let roster = harness.roster();
    let alice = harness.contact("alice@example.com");
    roster.set(
        &alice,
        PresenceStates::new(PresenceState::Yes, PresenceState::Yes),
    );
    roster.join("Friends", &alice);
    let call = harness.ensure(EntityType::List, "stored");

    harness.receive_roster();

    let connection = harness.connection.object_path().clone();
    let watched = [
        harness.list_path(ListKind::Stored),
        harness.group_path("Friends"),
    ];
    let order: Vec<&str> = harness
        .transport
        .signals()
        .iter()
        .filter(|(path, signal)| {
            (*path == connection && signal.name() == "NewChannels")
                || (watched.contains(path) && signal.name() == "MembersChanged")
        })
        .map(|(_, signal)| signal.name())
        .collect();
    assert_eq!(order, ["MembersChanged", "MembersChanged", "NewChannels"]);
    assert!(matches!(
        harness.reply(call),
        Ok(MethodReply::ChannelEnsured { .. })
    ));
}

#[rstest]
fn requests_after_the_roster_find_the_existing_list(mut harness: Harness) {
    harness.receive_roster();

    let call = harness.ensure(EntityType::List, "subscribe");

    assert!(matches!(
        harness.reply(call),
        Ok(MethodReply::ChannelEnsured { yours: false, .. })
    ));
}

#[rstest]
#[case("subscribe", "NotAvailable")]
#[case("friends", "InvalidHandle")]
fn list_requests_that_cannot_succeed(
    mut harness: Harness,
    #[case] list: &str,
    #[case] class: &str,
) {
    let call = harness.create(EntityType::List, list);

    assert_eq!(harness.error_class(call), class);
}

#[rstest]
fn lists_the_protocol_lacks_are_not_implemented() {
    let mut harness = Harness::new(
        ContactListCapabilities::default(),
        &Config::default(),
    )
    .connected();

    let stored = harness.ensure(EntityType::List, "stored");
    let group = harness.ensure(EntityType::Group, "Friends");

    assert_eq!(harness.error_class(stored), "NotImplemented");
    assert_eq!(harness.error_class(group), "NotImplemented");
    assert!(harness.manager().borrow().list(ListKind::Deny).is_none());
}

#[rstest]
fn the_roster_queue_is_bounded() {
    let mut harness = Harness::new(
        capabilities(GroupSupport::None),
        &Config::default().with_roster_queue_limit(1),
    )
    .connected();

    let first = harness.ensure(EntityType::List, "subscribe");
    let second = harness.ensure(EntityType::List, "publish");

    assert!(harness.transport.reply_to(first).is_none());
    assert_eq!(harness.error_class(second), "NotAvailable");
}

#[rstest]
fn a_failed_roster_fails_waiting_and_later_requests(mut harness: Harness) {
    let waiting = harness.ensure(EntityType::List, "publish");

    harness
        .manager()
        .borrow_mut()
        .mark_roster_failed(TpError::network("roster download timed out"));
    let later = harness.ensure(EntityType::List, "publish");

    assert_eq!(harness.error_class(waiting), "NetworkError");
    assert_eq!(harness.error_class(later), "NetworkError");
}

#[rstest]
fn groups_requested_early_are_created_with_the_roster(mut harness: Harness) {
    let call = harness.ensure(EntityType::Group, "Friends");

    harness.receive_roster();

    let roster = harness.roster();
    assert_eq!(roster.calls(), vec!["create-groups:Friends".to_owned()]);
    assert!(roster.has_group("Friends"));
    let friends = harness.group_path("Friends");
    assert!(matches!(
        harness.reply(call),
        Ok(MethodReply::ChannelEnsured { path, .. }) if path == friends
    ));
}

#[rstest]
fn early_group_requests_fail_when_groups_are_read_only() {
    let mut harness = Harness::new(capabilities(GroupSupport::ReadOnly), &Config::default())
        .connected();
    let call = harness.ensure(EntityType::Group, "Friends");

    harness.receive_roster();

    assert_eq!(harness.error_class(call), "NotAvailable");
    assert!(harness.manager().borrow().group("Friends").is_none());
}

#[rstest]
fn creating_a_group_after_the_roster_goes_through_the_backend(mut harness: Harness) {
    harness.receive_roster();

    let call = harness.create(EntityType::Group, "Work");

    assert!(harness.roster().has_group("Work"));
    assert!(matches!(harness.reply(call), Ok(MethodReply::ChannelCreated { .. })));
    let again = harness.create(EntityType::Group, "Work");
    assert_eq!(harness.error_class(again), "NotAvailable");
}

#[rstest]
fn known_groups_load_their_members(harness: Harness) {
    let roster = harness.roster();
    let bob = harness.contact("bob@example.com");
    roster.set(
        &bob,
        PresenceStates::new(PresenceState::Yes, PresenceState::Yes),
    );
    roster.join("Friends", &bob);

    harness.receive_roster();

    let (members, _, _) = harness.members(&harness.group_path("Friends"));
    assert_eq!(members, vec![bob.handle()]);
}

#[rstest]
fn adding_to_subscribe_asks_for_presence(harness: Harness) {
    harness.receive_roster();
    let carol = harness.contacts(&["carol@example.com"]);
    let subscribe = harness.list_path(ListKind::Subscribe);

    harness
        .manager()
        .borrow_mut()
        .add_members(&subscribe, &carol, "hello")
        .expect("subscription requested");

    assert_eq!(
        harness.roster().calls(),
        vec!["subscribe:carol@example.com:hello".to_owned()]
    );
    let (_, _, remote) = harness.members(&subscribe);
    assert_eq!(remote, carol.handles());
}

#[rstest]
fn refused_mutations_change_nothing(harness: Harness) {
    harness.receive_roster();
    let carol = harness.contacts(&["carol@example.com"]);
    let stored = harness.list_path(ListKind::Stored);
    harness.roster().refuse();

    let result = harness
        .manager()
        .borrow_mut()
        .add_members(&stored, &carol, "");

    assert_eq!(
        result.map_err(|error| error.class()),
        Err("PermissionDenied")
    );
    assert_eq!(harness.members(&stored), (Vec::new(), Vec::new(), Vec::new()));
}

#[rstest]
fn publish_requests_carry_their_message(harness: Harness) {
    harness.receive_roster();
    let dave = harness.contact("dave@example.com");
    harness.roster().set(
        &dave,
        PresenceStates::new(PresenceState::No, PresenceState::Ask).with_request("may I see?"),
    );

    harness
        .manager()
        .borrow_mut()
        .notify_contacts_changed(&harness.contacts(&["dave@example.com"]), &HandleSet::new());

    let manager = harness.manager();
    let info = manager
        .borrow()
        .list(ListKind::Publish)
        .map(|channel| channel.membership().local_pending_info())
        .expect("publish list exists");
    assert_eq!(info.len(), 1);
    assert_eq!(info.first().map(|entry| entry.message.as_str()), Some("may I see?"));
}

#[rstest]
fn removed_contacts_leave_every_roster_list(harness: Harness) {
    let alice = harness.contact("alice@example.com");
    harness.roster().set(
        &alice,
        PresenceStates::new(PresenceState::Yes, PresenceState::Yes),
    );
    harness.receive_roster();

    harness
        .manager()
        .borrow_mut()
        .notify_contacts_changed(&HandleSet::new(), &harness.contacts(&["alice@example.com"]));

    for kind in [ListKind::Subscribe, ListKind::Publish, ListKind::Stored] {
        let (members, local, remote) = harness.members(&harness.list_path(kind));
        assert!(members.is_empty() && local.is_empty() && remote.is_empty());
    }
}

#[rstest]
fn contact_changes_before_the_roster_are_ignored(harness: Harness) {
    let erin = harness.contact("erin@example.com");
    harness.roster().set(
        &erin,
        PresenceStates::new(PresenceState::Yes, PresenceState::No),
    );

    harness
        .manager()
        .borrow_mut()
        .notify_contacts_changed(&harness.contacts(&["erin@example.com"]), &HandleSet::new());

    let (members, _, _) = harness.members(&harness.list_path(ListKind::Subscribe));
    assert!(members.is_empty());
}

#[rstest]
fn the_deny_list_follows_blocking(harness: Harness) {
    harness.receive_roster();
    let mallory = harness.contacts(&["mallory@example.com"]);
    let deny = harness.list_path(ListKind::Deny);

    harness
        .manager()
        .borrow_mut()
        .add_members(&deny, &mallory, "")
        .expect("block succeeds");
    let (blocked, _, _) = harness.members(&deny);
    assert_eq!(blocked, mallory.handles());

    harness
        .manager()
        .borrow_mut()
        .remove_members(&deny, &mallory, "")
        .expect("unblock succeeds");
    let (still_blocked, _, _) = harness.members(&deny);
    assert!(still_blocked.is_empty());
    assert_eq!(
        harness.roster().calls(),
        vec![
            "block:mallory@example.com".to_owned(),
            "unblock:mallory@example.com".to_owned(),
        ]
    );
}

#[rstest]
#[case(GroupRename::Native, &["rename-group:Friends:Pals"])]
#[case(
    GroupRename::Emulated,
    &["create-groups:Pals", "add-to-group:Pals:bob@example.com", "remove-group:Friends"]
)]
fn renaming_a_group_moves_its_members(#[case] strategy: GroupRename, #[case] calls: &[&str]) {
    let harness = Harness::new(
        capabilities(GroupSupport::Mutable(strategy)),
        &Config::default(),
    )
    .connected();
    let roster = harness.roster();
    let bob = harness.contact("bob@example.com");
    roster.set(
        &bob,
        PresenceStates::new(PresenceState::Yes, PresenceState::Yes),
    );
    roster.join("Friends", &bob);
    harness.receive_roster();
    let old_path = harness.group_path("Friends");

    harness
        .manager()
        .borrow_mut()
        .rename_group("Friends", "Pals")
        .expect("rename succeeds");

    assert_eq!(roster.calls(), calls);
    assert!(harness.manager().borrow().group("Friends").is_none());
    let (members, _, _) = harness.members(&harness.group_path("Pals"));
    assert_eq!(members, vec![bob.handle()]);
    assert_eq!(harness.transport.signals_named(&old_path, "Closed").len(), 1);
    let renamed = harness
        .transport
        .signals_named(&harness.group_path("Pals"), "MembersChanged");
    assert!(matches!(
        renamed.last(),
        Some(Signal::MembersChanged(change)) if change.reason == ChangeReason::Renamed
    ));
}

#[rstest]
#[case("add-to-group", &["create-groups:Pals"], false)]
#[case(
    "remove-group",
    &["create-groups:Pals", "add-to-group:Pals:bob@example.com"],
    true
)]
fn interrupted_emulated_renames_keep_the_new_group(
    #[case] refused: &str,
    #[case] calls: &[&str],
    #[case] copied: bool,
) {
    let harness = Harness::new(
        capabilities(GroupSupport::Mutable(GroupRename::Emulated)),
        &Config::default(),
    )
    .connected();
    let roster = harness.roster();
    let bob = harness.contact("bob@example.com");
    roster.set(
        &bob,
        PresenceStates::new(PresenceState::Yes, PresenceState::Yes),
    );
    roster.join("Friends", &bob);
    harness.receive_roster();
    roster.refuse_calls(refused);

    let error = harness
        .manager()
        .borrow_mut()
        .rename_group("Friends", "Pals")
        .expect_err("backend refuses part of the rename");

    assert_eq!(error.class(), "PermissionDenied");
    assert_eq!(roster.calls(), calls);
    assert!(harness.manager().borrow().group("Friends").is_some());
    let pals = harness.group_path("Pals");
    assert!(
        harness
            .manager()
            .borrow()
            .channels()
            .iter()
            .any(|details| details.path == pals)
    );
    let (members, _, _) = harness.members(&pals);
    assert_eq!(members.contains(&bob.handle()), copied);
}

#[rstest]
fn only_empty_groups_can_be_closed(harness: Harness) {
    let roster = harness.roster();
    let bob = harness.contact("bob@example.com");
    roster.set(
        &bob,
        PresenceStates::new(PresenceState::Yes, PresenceState::Yes),
    );
    roster.join("Friends", &bob);
    roster
        .create_groups(&["Empty".to_owned()])
        .expect("fake roster accepts groups");
    harness.receive_roster();
    let subscribe = harness.list_path(ListKind::Subscribe);
    let friends = harness.group_path("Friends");
    let empty_path = harness.group_path("Empty");
    let manager = harness.manager();

    let list = manager.borrow_mut().close_channel(&subscribe);
    let busy = manager.borrow_mut().close_channel(&friends);
    manager
        .borrow_mut()
        .close_channel(&empty_path)
        .expect("empty groups close");

    assert_eq!(list.map_err(|error| error.class()), Err("NotImplemented"));
    assert_eq!(busy.map_err(|error| error.class()), Err("NotAvailable"));
    assert!(!roster.has_group("Empty"));
    assert!(manager.borrow().group("Empty").is_none());
    let connection = harness.connection.object_path().clone();
    assert!(
        harness
            .transport
            .signals_named(&connection, "ChannelClosed")
            .contains(&Signal::ChannelClosed { path: empty_path })
    );
}

#[rstest]
fn disconnecting_fails_queued_requests_once(mut harness: Harness) {
    let waiting = harness.ensure(EntityType::List, "subscribe");
    let call = harness.call();

    harness.connection.disconnect(CallContext::new(call));

    assert_eq!(harness.transport.replies_to(waiting).len(), 1);
    assert_eq!(harness.error_class(waiting), "Disconnected");
    let manager = harness.manager();
    assert_eq!(manager.borrow().roster_state(), &RosterState::Disconnected);
    assert_eq!(manager.borrow().all_channels().count(), 0);
    assert_eq!(manager.borrow().queued_requests(), 0);
}

#[rstest]
fn the_legacy_view_speaks_raw_handles(harness: Harness) {
    let bob = harness.contact("bob@example.com");
    harness.roster().set(
        &bob,
        PresenceStates::new(PresenceState::Yes, PresenceState::No),
    );
    harness.receive_roster();
    let subscribe = harness.list_path(ListKind::Subscribe);
    let manager = harness.manager();
    let mut borrowed = manager.borrow_mut();
    let mut legacy = LegacyContactList::new(&mut borrowed);

    assert_eq!(legacy.list_channels().len(), 4);
    assert_eq!(
        legacy.get_all_members(&subscribe).map(|(members, _, _)| members),
        Ok(vec![bob.handle().get()])
    );
    assert_eq!(
        legacy.get_group_flags(&subscribe),
        Ok(ListKind::Subscribe
            .flags(capabilities(GroupSupport::None))
            .bits())
    );
    assert_eq!(
        legacy
            .add_members(&subscribe, &[0], "")
            .map_err(|error| error.class()),
        Err("InvalidHandle")
    );
    assert_eq!(
        legacy
            .remove_members(&subscribe, &[bob.handle().get()], "")
            .map_err(|error| error.class()),
        Ok(())
    );
}
