use std::rc::Rc;

use rstest::{fixture, rstest};

use super::*;

#[fixture]
fn contacts() -> HandleRepo {
    HandleRepo::with_normaliser(EntityType::Contact, |id: &str| {
        let trimmed = id.trim();
        if trimmed.contains('@') {
            Ok(trimmed.to_ascii_lowercase())
        } else {
            Err("missing '@'".to_owned())
        }
    })
}

#[rstest]
fn ensure_interns_normalised_identifiers(contacts: HandleRepo) {
    let first = contacts.ensure("Alice@Example.com").expect("alice");
    let second = contacts.ensure(" alice@example.com ").expect("alice again");

    assert_eq!(first.handle(), second.handle());
    assert_eq!(
        contacts.inspect(first.handle()).as_deref(),
        Some("alice@example.com")
    );
    assert_eq!(contacts.references_to(first.handle()), 2);
}

#[rstest]
fn ensure_rejects_identifiers_the_normaliser_refuses(contacts: HandleRepo) {
    match contacts.ensure("alice") {
        Err(HandleError::InvalidIdentifier { reason, .. }) => assert_eq!(reason, "missing '@'"),
        other => panic!("expected invalid identifier, got {other:?}"),
    }
}

#[rstest]
fn dropping_refs_keeps_handles_until_collected(contacts: HandleRepo) {
    let handle = contacts.ensure("bob@example.com").expect("bob").handle();

    assert!(contacts.is_valid(handle));
    assert_eq!(contacts.live_references(), 0);
    assert_eq!(contacts.collect_unreferenced(), 1);
    assert!(!contacts.is_valid(handle));
    assert!(contacts.lookup("bob@example.com").is_none());
}

#[rstest]
fn collection_spares_referenced_handles(contacts: HandleRepo) {
    let kept = contacts.ensure("carol@example.com").expect("carol");
    let clone = kept.clone();
    drop(kept);

    assert_eq!(contacts.collect_unreferenced(), 0);
    assert!(contacts.is_valid(clone.handle()));
}

#[rstest]
fn hold_rejects_unallocated_handles(contacts: HandleRepo) {
    let Some(unknown) = Handle::new(42) else {
        panic!("42 is non-zero");
    };
    assert!(matches!(
        contacts.hold(unknown),
        Err(HandleError::InvalidHandle { handle: 42, .. })
    ));
}

#[test]
fn fixed_tables_only_know_their_names() {
    let lists = HandleRepo::fixed(EntityType::List, &["subscribe", "publish"]);

    assert!(lists.ensure("publish").is_ok());
    assert!(matches!(
        lists.ensure("stored"),
        Err(HandleError::InvalidIdentifier { .. })
    ));
    assert_eq!(lists.collect_unreferenced(), 0);
}

#[test]
fn lookup_tables_defer_unknown_identifiers() {
    let contacts = HandleRepo::requiring_lookup(EntityType::Contact);

    assert!(matches!(
        contacts.ensure("dave"),
        Err(HandleError::LookupRequired { ref id, .. }) if id == "dave"
    ));
    let interned = contacts.intern("dave").expect("intern");
    let ensured = contacts.ensure("dave").expect("known after intern");
    assert_eq!(interned.handle(), ensured.handle());
}

#[test]
fn handle_sets_hold_one_reference_per_member() {
    let repo = HandleRepo::new(EntityType::Contact);
    let alice = repo.ensure("alice").expect("alice");
    let handle = alice.handle();

    let mut set = HandleSet::new();
    assert!(set.insert(alice.clone()));
    assert!(!set.insert(alice));
    assert_eq!(repo.references_to(handle), 1);

    drop(set);
    assert_eq!(repo.references_to(handle), 0);
}

#[test]
fn tables_report_unsupported_entities() {
    let tables = HandleTables::new(Rc::new(HandleRepo::new(EntityType::Contact)));

    assert!(tables.get(EntityType::Contact).is_ok());
    assert!(matches!(
        tables.get(EntityType::Room),
        Err(HandleError::UnsupportedEntity {
            entity: EntityType::Room
        })
    ));
}

#[rstest]
#[case(0, Some(EntityType::None))]
#[case(3, Some(EntityType::List))]
#[case(5, None)]
fn entity_types_decode_from_the_wire(#[case] raw: u32, #[case] expected: Option<EntityType>) {
    assert_eq!(EntityType::from_wire(raw), expected);
}
