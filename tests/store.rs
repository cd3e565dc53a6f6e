use std::collections::HashMap;

use satchel::error::Error;
use satchel::store::view::{self, ResolvedTiddler};
use satchel::store::{SqliteStore, Store, SyncOptions};

fn setup() -> SqliteStore {
    let store = SqliteStore::in_memory().unwrap();
    store.initialize().unwrap();
    store
}

fn fields(title: &str, text: &str) -> HashMap<String, String> {
    HashMap::from([
        ("title".to_string(), title.to_string()),
        ("text".to_string(), text.to_string()),
    ])
}

#[test]
fn revision_ids_strictly_increase_across_bags_and_deletes() {
    let store = setup();
    let a = store.upsert_bag("a", "", None).unwrap();
    let b = store.upsert_bag("b", "", None).unwrap();

    let r1 = store.save_tiddler(a.id, &fields("One", "x"), None).unwrap();
    let r2 = store.save_tiddler(b.id, &fields("Two", "y"), None).unwrap();
    let r3 = store.delete_tiddler(a.id, "One").unwrap();
    let r4 = store.save_tiddler(a.id, &fields("One", "z"), None).unwrap();

    assert!(r1 < r2 && r2 < r3 && r3 < r4);
    assert_eq!(store.max_revision_id().unwrap(), r4);
}

#[test]
fn max_revision_survives_delete_then_insert() {
    let store = setup();
    let bag = store.upsert_bag("a", "", None).unwrap();
    let r1 = store.save_tiddler(bag.id, &fields("One", "x"), None).unwrap();
    // saving again replaces the row but must never reuse or lower the id
    let r2 = store.save_tiddler(bag.id, &fields("One", "y"), None).unwrap();
    assert!(r2 > r1);
    assert!(store.max_revision_id().unwrap() >= r2);
}

#[test]
fn save_requires_title_and_rejects_text_with_attachment() {
    let store = setup();
    let bag = store.upsert_bag("a", "", None).unwrap();

    let no_title = HashMap::from([("text".to_string(), "x".to_string())]);
    assert!(store.save_tiddler(bag.id, &no_title, None).is_err());

    assert!(
        store
            .save_tiddler(bag.id, &fields("One", "inline"), Some("deadbeef"))
            .is_err()
    );
}

#[test]
fn title_is_materialized_as_a_field_on_read() {
    let store = setup();
    let bag = store.upsert_bag("a", "", None).unwrap();
    store.save_tiddler(bag.id, &fields("One", "x"), None).unwrap();
    let tiddler = store.tiddler(bag.id, "One").unwrap().unwrap();
    assert_eq!(tiddler.fields["title"], "One");
}

#[test]
fn position_zero_wins_the_overlay() {
    let store = setup();
    let top = store.upsert_bag("top", "", None).unwrap();
    let base = store.upsert_bag("base", "", None).unwrap();
    store.save_tiddler(base.id, &fields("Shared", "from base"), None).unwrap();
    store.save_tiddler(top.id, &fields("Shared", "from top"), None).unwrap();
    store.save_tiddler(base.id, &fields("Deep", "only base"), None).unwrap();

    let recipe = store
        .upsert_recipe(
            "wiki",
            "",
            None,
            &[("top".to_string(), false), ("base".to_string(), false)],
            &[],
            false,
            false,
        )
        .unwrap();
    let bags = store.recipe_bags(recipe.id).unwrap();
    assert_eq!(bags[0].bag_name, "top");

    let resolved = view::resolve_recipe_view(&store, &bags, SyncOptions::default()).unwrap();
    let shared: &ResolvedTiddler = resolved
        .iter()
        .find(|r| r.tiddler.title == "Shared")
        .unwrap();
    assert_eq!(shared.bag_name, "top");
    assert_eq!(shared.tiddler.fields["text"], "from top");
    assert!(resolved.iter().any(|r| r.tiddler.title == "Deep"));
}

#[test]
fn tombstone_in_winning_bag_hides_deeper_content() {
    let store = setup();
    let top = store.upsert_bag("top", "", None).unwrap();
    let base = store.upsert_bag("base", "", None).unwrap();
    store.save_tiddler(base.id, &fields("Shared", "live below"), None).unwrap();
    store.save_tiddler(top.id, &fields("Shared", "was here"), None).unwrap();
    store.delete_tiddler(top.id, "Shared").unwrap();

    let recipe = store
        .upsert_recipe(
            "wiki",
            "",
            None,
            &[("top".to_string(), false), ("base".to_string(), false)],
            &[],
            false,
            false,
        )
        .unwrap();
    let bags = store.recipe_bags(recipe.id).unwrap();

    let resolved = view::resolve_recipe_view(&store, &bags, SyncOptions::default()).unwrap();
    assert!(!resolved.iter().any(|r| r.tiddler.title == "Shared"));
    assert!(view::recipe_tiddler(&store, &bags, "Shared").unwrap().is_none());
}

#[test]
fn bag_state_respects_the_cursor() {
    let store = setup();
    let bag = store.upsert_bag("a", "", None).unwrap();
    let r1 = store.save_tiddler(bag.id, &fields("One", "x"), None).unwrap();
    let r2 = store.save_tiddler(bag.id, &fields("Two", "y"), None).unwrap();

    let all = store.bag_state(bag.id, SyncOptions::default()).unwrap();
    assert_eq!(all.len(), 2);

    let newer = store
        .bag_state(
            bag.id,
            SyncOptions {
                last_known_revision_id: Some(r1),
                include_deleted: true,
            },
        )
        .unwrap();
    assert_eq!(newer.len(), 1);
    assert_eq!(newer[0].revision_id, r2);
}

#[test]
fn recipe_must_reference_at_least_one_bag() {
    let store = setup();
    let err = store
        .upsert_recipe("empty", "", None, &[], &[], false, false)
        .unwrap_err();
    assert!(matches!(err, Error::Conflict(_)));
}

#[test]
fn recipe_membership_replacement_is_atomic() {
    let store = setup();
    store.upsert_bag("a", "", None).unwrap();
    store.upsert_bag("b", "", None).unwrap();
    let recipe = store
        .upsert_recipe("wiki", "", None, &[("a".to_string(), false)], &[], false, false)
        .unwrap();

    // replacing the membership with an unknown bag must leave the old list
    let err = store.upsert_recipe(
        "wiki",
        "",
        None,
        &[("missing".to_string(), false)],
        &[],
        false,
        false,
    );
    assert!(err.is_err());
    let bags = store.recipe_bags(recipe.id).unwrap();
    assert_eq!(bags.len(), 1);
    assert_eq!(bags[0].bag_name, "a");

    store
        .upsert_recipe(
            "wiki",
            "",
            None,
            &[("b".to_string(), false), ("a".to_string(), false)],
            &[],
            false,
            false,
        )
        .unwrap();
    let bags = store.recipe_bags(recipe.id).unwrap();
    assert_eq!(bags.len(), 2);
    assert_eq!(bags[0].bag_name, "b");
    assert_eq!(bags[0].position, 0);
}

#[test]
fn bag_deletion_refused_while_referenced_and_populated() {
    let store = setup();
    let bag = store.upsert_bag("a", "", None).unwrap();
    store.upsert_bag("b", "", None).unwrap();
    store.save_tiddler(bag.id, &fields("One", "x"), None).unwrap();
    store
        .upsert_recipe(
            "wiki",
            "",
            None,
            &[("a".to_string(), false), ("b".to_string(), false)],
            &[],
            false,
            false,
        )
        .unwrap();

    assert!(matches!(store.delete_bag(bag.id), Err(Error::Conflict(_))));

    // emptied, but removing it would leave no recipes short a bag only if
    // another member remains; "b" is still there so this succeeds
    store.empty_bag(bag.id).unwrap();
    store.delete_bag(bag.id).unwrap();
    assert!(store.get_bag_by_name("a").unwrap().is_none());
}

#[test]
fn deleting_the_last_recipe_bag_is_refused() {
    let store = setup();
    let bag = store.upsert_bag("only", "", None).unwrap();
    store
        .upsert_recipe("wiki", "", None, &[("only".to_string(), false)], &[], false, false)
        .unwrap();
    assert!(matches!(store.delete_bag(bag.id), Err(Error::Conflict(_))));
}

#[test]
fn reserved_roles_cannot_be_renamed_or_deleted() {
    let store = setup();
    let admin = store.get_role_by_name("ADMIN").unwrap().unwrap();
    assert!(matches!(
        store.rename_role(admin.id, "SUPER", None),
        Err(Error::Conflict(_))
    ));
    assert!(matches!(store.delete_role(admin.id), Err(Error::Conflict(_))));

    let custom = store.create_role("editors", None).unwrap();
    store.rename_role(custom.id, "writers", None).unwrap();
    assert!(store.delete_role(custom.id).unwrap());
}

#[test]
fn sessions_roundtrip_and_delete() {
    let store = setup();
    let user = store.create_user("alice", None, "hash").unwrap();
    let session = store.create_session(user.id).unwrap();

    let found = store.get_session(&session.id).unwrap().unwrap();
    assert_eq!(found.user_id, user.id);

    assert!(store.delete_session(&session.id).unwrap());
    assert!(store.get_session(&session.id).unwrap().is_none());
}

#[test]
fn duplicate_names_surface_as_already_exists() {
    let store = setup();
    store.create_user("alice", None, "h").unwrap();
    assert!(matches!(
        store.create_user("alice", None, "h"),
        Err(Error::AlreadyExists)
    ));
}
