mod common;

use common::{fields, open_store, Menu, MenuItem};
use datakit_core::{
    CodeKeyed, Entity, EntityKey, FieldValue, Keyed, RepoError, Repository, StoreHandle,
};

/// Menus addressed by their display name.
struct NamedMenu;

impl Keyed for NamedMenu {
    const TYPE_ID: &'static str = "named_menus";
    const TABLE: &'static str = "cms_nav_menus";
    const COLUMNS: &'static [&'static str] = &["code", "name"];
    const TIMESTAMPS: bool = true;
}

impl CodeKeyed for NamedMenu {
    const CODE_FIELD: &'static str = "name";
}

fn seeded_menus() -> (StoreHandle, Repository<Menu>) {
    let store = open_store();
    store
        .execute_batch(
            "INSERT INTO cms_nav_menus (code, name) VALUES
                ('main', 'Main'),
                ('footer', 'Footer'),
                ('legal', 'Legal');",
        )
        .unwrap();
    let repo = Repository::new(store.clone());
    (store, repo)
}

#[test]
fn find_code_trims_the_lookup_value() {
    let (_store, repo) = seeded_menus();
    let menu = repo.find_code("  footer ").unwrap().unwrap();
    assert_eq!(menu.get("name"), Some(&FieldValue::from("Footer")));
    assert!(menu.is_code_set());
    assert!(repo.find_code("sidebar").unwrap().is_none());
}

#[test]
fn find_code_or_new_sets_code_on_new_entity() {
    let (_store, repo) = seeded_menus();
    assert!(repo.find_code_or_new("main").unwrap().exists());

    let fresh = repo.find_code_or_new("sidebar").unwrap();
    assert!(!fresh.exists());
    assert_eq!(fresh.code(), Some(&FieldValue::from("sidebar")));
}

#[test]
fn find_code_load_merges_attributes_and_forces_code() {
    let (_store, repo) = seeded_menus();
    let attributes = fields(&[
        ("name", FieldValue::from("Main navigation")),
        ("code", FieldValue::from("ignored")),
    ]);

    let loaded = repo.find_code_load("main", attributes).unwrap();
    assert!(loaded.exists());
    assert_eq!(loaded.code(), Some(&FieldValue::from("main")));
    assert_eq!(loaded.get("name"), Some(&FieldValue::from("Main navigation")));

    let stored = repo.find_code("main").unwrap().unwrap();
    assert_eq!(stored.get("name"), Some(&FieldValue::from("Main")));
}

#[test]
fn all_codes_follows_key_order_and_caps_results() {
    let store = open_store();
    store
        .execute_batch(
            "WITH RECURSIVE seq(n) AS (SELECT 1 UNION ALL SELECT n + 1 FROM seq WHERE n < 10005)
             INSERT INTO cms_nav_menus (code, name) SELECT 'menu-' || n, 'Menu ' || n FROM seq;",
        )
        .unwrap();
    let repo = Repository::<Menu>::new(store);

    let codes = repo.all_codes().unwrap();
    assert_eq!(codes.len(), 10_000);
    assert_eq!(codes[0], FieldValue::from("menu-1"));
    assert_eq!(codes[9_999], FieldValue::from("menu-10000"));
    assert_eq!(repo.count().unwrap(), 10_005);
}

#[test]
fn delete_not_codes_returns_removed_count_and_keeps_null_codes() {
    let (store, repo) = seeded_menus();
    store
        .execute_batch("INSERT INTO cms_nav_menus (code, name) VALUES (NULL, 'Draft');")
        .unwrap();

    let deleted = repo.delete_not_codes(&[" main ", "legal\n"]).unwrap();
    assert_eq!(deleted, 1);
    assert!(repo.find_code("footer").unwrap().is_none());
    assert_eq!(repo.count().unwrap(), 3);

    let none: [&str; 0] = [];
    assert_eq!(repo.delete_not_codes(&none).unwrap(), 3);
    assert_eq!(repo.count().unwrap(), 0);
}

#[test]
fn delete_not_codes_accepts_more_codes_than_bind_slots() {
    let store = open_store();
    store
        .execute_batch(
            "WITH RECURSIVE seq(n) AS (SELECT 1 UNION ALL SELECT n + 1 FROM seq WHERE n < 33005)
             INSERT INTO cms_nav_menus (code, name) SELECT 'menu-' || n, 'Menu ' || n FROM seq;",
        )
        .unwrap();
    let repo = Repository::<Menu>::new(store);

    let kept = (1..=33_000).map(|n| format!("menu-{n}")).collect::<Vec<_>>();
    assert_eq!(repo.delete_not_codes(&kept).unwrap(), 5);
    assert_eq!(repo.count().unwrap(), 33_000);
    assert!(repo.find_code("menu-33001").unwrap().is_none());
    assert!(repo.find_code("menu-33000").unwrap().is_some());
}

#[test]
fn replace_code_inserts_then_updates() {
    let repo = Repository::<Menu>::new(open_store());

    let inserted = repo
        .replace_code("main", fields(&[("name", FieldValue::from("Main"))]))
        .unwrap();
    let key = inserted.key().unwrap();

    let updated = repo
        .replace_code("main", fields(&[("name", FieldValue::from("Main v2"))]))
        .unwrap();
    assert_eq!(updated.key(), Some(key));
    assert_eq!(repo.count().unwrap(), 1);
    assert_eq!(
        repo.find_code("main").unwrap().unwrap().get("name"),
        Some(&FieldValue::from("Main v2"))
    );
}

#[test]
fn replace_with_adopts_identity_of_coded_row() {
    let (_store, repo) = seeded_menus();
    let existing_key = repo.find_code("footer").unwrap().unwrap().key().unwrap();

    let replacement = Entity::<Menu>::new()
        .with("code", "footer")
        .unwrap()
        .with("name", "Site footer")
        .unwrap();
    let saved = repo.replace_with("footer", replacement).unwrap();
    assert!(saved.exists());
    assert_eq!(saved.key(), Some(existing_key));
    assert_eq!(repo.count().unwrap(), 3);

    let fresh = Entity::<Menu>::new()
        .with("code", "sidebar")
        .unwrap()
        .with("name", "Sidebar")
        .unwrap();
    let inserted = repo.replace_with("sidebar", fresh).unwrap();
    assert_eq!(inserted.key(), Some(EntityKey::Integer(4)));
}

#[test]
fn code_lists_select_matching_rows() {
    let (_store, repo) = seeded_menus();

    let listed = repo.find_codes_all(&[" main", "legal ", "missing"]).unwrap();
    assert_eq!(listed.len(), 2);

    let parsed = repo.find_with_codes("footer, legal,,").unwrap();
    let mut codes = parsed
        .iter()
        .filter_map(|menu| menu.code().and_then(FieldValue::to_text))
        .collect::<Vec<_>>();
    codes.sort();
    assert_eq!(codes, vec!["footer".to_string(), "legal".to_string()]);

    assert_eq!(repo.with_codes(&["main"]).count().unwrap(), 1);
}

#[test]
fn set_code_switches_business_key() {
    let (_store, mut repo) = seeded_menus();
    repo.set_code("name").unwrap();

    let menu = repo.find_code("Legal").unwrap().unwrap();
    assert_eq!(menu.code(), Some(&FieldValue::from("legal")));

    let err = repo.set_code("slug").unwrap_err();
    assert!(matches!(err, RepoError::InvalidArgument(_)));
}

#[test]
fn code_operations_follow_declared_code_field() {
    let (store, _) = seeded_menus();
    let repo = Repository::<NamedMenu>::new(store);
    assert_eq!(repo.code_field(), "name");

    let menu = repo.find_code(" Footer ").unwrap().unwrap();
    assert_eq!(menu.code(), Some(&FieldValue::from("Footer")));
    assert_eq!(menu.get("code"), Some(&FieldValue::from("footer")));
    assert!(repo.find_code("footer").unwrap().is_none());

    assert_eq!(
        repo.all_codes().unwrap(),
        vec![
            FieldValue::from("Main"),
            FieldValue::from("Footer"),
            FieldValue::from("Legal"),
        ]
    );
    assert_eq!(repo.find_with_codes("Main, Legal").unwrap().len(), 2);

    let fresh = repo.find_code_or_new("Sidebar").unwrap();
    assert_eq!(fresh.get("name"), Some(&FieldValue::from("Sidebar")));
    assert!(fresh.get("code").is_none());

    assert_eq!(repo.delete_not_codes(&["Main"]).unwrap(), 2);
    assert_eq!(repo.count().unwrap(), 1);
}

#[test]
fn form_set_upserts_the_single_row() {
    let repo = Repository::<MenuItem>::new(open_store());

    let first = repo
        .form_set(fields(&[
            ("name", FieldValue::from("Home")),
            ("position", FieldValue::from(1_i64)),
        ]))
        .unwrap();
    let second = repo
        .form_set(fields(&[("position", FieldValue::from(2_i64))]))
        .unwrap();

    assert_eq!(first.key(), second.key());
    assert_eq!(repo.count().unwrap(), 1);
    let stored = repo.find_instance().unwrap().unwrap();
    assert_eq!(stored.get("name"), Some(&FieldValue::from("Home")));
    assert_eq!(stored.get("position"), Some(&FieldValue::Integer(2)));
}
