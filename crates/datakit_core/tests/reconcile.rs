mod common;

use common::{open_store, Menu, MenuItem};
use datakit_core::{
    Entity, EntityKey, FieldValue, Reconciler, RepoError, Repository, RuleValidator, StoreHandle,
};
use std::collections::BTreeSet;
use std::sync::Arc;

fn item(code: &str, name: &str, position: i64) -> Entity<MenuItem> {
    Entity::new()
        .with("code", code)
        .unwrap()
        .with("name", name)
        .unwrap()
        .with("position", position)
        .unwrap()
}

fn seeded_items() -> (StoreHandle, Repository<MenuItem>) {
    let store = open_store();
    store
        .execute_batch(
            "INSERT INTO cms_nav_items (code, name, position) VALUES
                ('home', 'Home', 1),
                ('blog', 'Blog', 2),
                ('shop', 'Shop', 3);",
        )
        .unwrap();
    let repo = Repository::new(store.clone());
    (store, repo)
}

fn stored_codes(repo: &Repository<MenuItem>) -> BTreeSet<String> {
    repo.all()
        .unwrap()
        .iter()
        .filter_map(|item| item.code().and_then(FieldValue::to_text))
        .collect()
}

#[test]
fn reconcile_makes_store_match_input_exactly() {
    let (_store, repo) = seeded_items();
    let home_key = repo.find_code("home").unwrap().unwrap().key();

    let result = Reconciler::new(&repo)
        .reconcile(
            "code",
            vec![item("home", "Start", 10), item("about", "About", 20)],
        )
        .unwrap();

    assert_eq!(
        result.keys().cloned().collect::<Vec<_>>(),
        vec![EntityKey::from("about"), EntityKey::from("home")]
    );
    assert_eq!(
        stored_codes(&repo),
        BTreeSet::from(["about".to_string(), "home".to_string()])
    );

    let home = repo.find_code("home").unwrap().unwrap();
    assert_eq!(home.key(), home_key);
    assert_eq!(home.get("name"), Some(&FieldValue::from("Start")));
    assert_eq!(home.get("position"), Some(&FieldValue::Integer(10)));

    let about = &result[&EntityKey::from("about")];
    assert!(about.exists());
    assert!(about.key().is_some());
}

#[test]
fn reconcile_ignores_input_primary_keys_on_update() {
    let (_store, repo) = seeded_items();
    let home_key = repo.find_code("home").unwrap().unwrap().key();

    let mut renamed = item("home", "Home", 1);
    renamed.set("id", 999_i64).unwrap();
    let result = Reconciler::new(&repo)
        .reconcile("code", vec![renamed])
        .unwrap();

    assert_eq!(result[&EntityKey::from("home")].key(), home_key);
    assert!(repo.find(999_i64).unwrap().is_none());
}

#[test]
fn reconcile_is_idempotent() {
    let (_store, repo) = seeded_items();
    let input = || vec![item("blog", "Blog", 2), item("news", "News", 4)];
    let reconciler = Reconciler::new(&repo);

    let first = reconciler.reconcile("code", input()).unwrap();
    let snapshot = repo.all().unwrap();
    let second = reconciler.reconcile("code", input()).unwrap();

    assert_eq!(repo.all().unwrap(), snapshot);
    assert_eq!(
        first.values().map(Entity::key).collect::<Vec<_>>(),
        second.values().map(Entity::key).collect::<Vec<_>>()
    );
}

#[test]
fn reconcile_with_empty_input_clears_table() {
    let (_store, repo) = seeded_items();
    let result = Reconciler::new(&repo).reconcile("code", Vec::new()).unwrap();
    assert!(result.is_empty());
    assert_eq!(repo.count().unwrap(), 0);
}

#[test]
fn reconcile_removes_rows_without_a_key_value() {
    let (store, repo) = seeded_items();
    store
        .execute_batch("INSERT INTO cms_nav_items (code, name) VALUES (NULL, 'Orphan');")
        .unwrap();

    Reconciler::new(&repo)
        .reconcile("code", vec![item("home", "Home", 1)])
        .unwrap();
    assert_eq!(repo.count().unwrap(), 1);
}

#[test]
fn inserts_follow_input_order() {
    let repo = Repository::<MenuItem>::new(open_store());
    let result = Reconciler::new(&repo)
        .reconcile(
            "code",
            vec![item("c", "C", 1), item("a", "A", 2), item("b", "B", 3)],
        )
        .unwrap();

    assert_eq!(result[&EntityKey::from("c")].key(), Some(EntityKey::Integer(1)));
    assert_eq!(result[&EntityKey::from("a")].key(), Some(EntityKey::Integer(2)));
    assert_eq!(result[&EntityKey::from("b")].key(), Some(EntityKey::Integer(3)));
}

#[test]
fn duplicate_input_keys_are_rejected_before_writing() {
    let (_store, repo) = seeded_items();
    let err = Reconciler::new(&repo)
        .reconcile(
            "code",
            vec![item("home", "Home", 1), item("home", "Home again", 2)],
        )
        .unwrap_err();

    assert!(matches!(err, RepoError::InvalidArgument(message) if message.contains("duplicate")));
    assert_eq!(repo.count().unwrap(), 3);
}

#[test]
fn missing_input_key_is_rejected_before_writing() {
    let (_store, repo) = seeded_items();
    let keyless = Entity::<MenuItem>::new().with("name", "Nameless").unwrap();

    let err = Reconciler::new(&repo)
        .reconcile("code", vec![item("home", "Home", 1), keyless])
        .unwrap_err();
    assert!(matches!(err, RepoError::InvalidArgument(message) if message.contains("index 1")));
    assert_eq!(repo.count().unwrap(), 3);
}

fn menu(code: &str, name: Option<&str>) -> Entity<Menu> {
    let menu = Entity::new().with("code", code).unwrap();
    match name {
        Some(name) => menu.with("name", name).unwrap(),
        None => menu,
    }
}

fn seeded_menus() -> Repository<Menu> {
    let store = open_store();
    store
        .execute_batch(
            "INSERT INTO cms_nav_menus (code, name) VALUES ('main', 'Main'), ('footer', 'Footer');",
        )
        .unwrap();
    Repository::new(store).with_validator(Arc::new(RuleValidator))
}

#[test]
fn failed_reconcile_applies_partially() {
    let repo = seeded_menus();
    let err = Reconciler::new(&repo)
        .reconcile("code", vec![menu("main", Some("Main")), menu("legal", None)])
        .unwrap_err();

    assert!(matches!(err, RepoError::Validation(_)));
    assert!(repo.find_code("footer").unwrap().is_none());
    assert_eq!(repo.count().unwrap(), 1);
}

#[test]
fn atomic_reconcile_rolls_back_on_failure() {
    let repo = seeded_menus();
    let err = Reconciler::new(&repo)
        .reconcile_atomic("code", vec![menu("main", Some("Main")), menu("legal", None)])
        .unwrap_err();

    assert!(matches!(err, RepoError::Validation(_)));
    assert!(repo.find_code("footer").unwrap().is_some());
    assert_eq!(repo.count().unwrap(), 2);

    let saved = Reconciler::new(&repo)
        .reconcile_atomic("code", vec![menu("legal", Some("Legal"))])
        .unwrap();
    assert_eq!(saved.len(), 1);
    assert_eq!(repo.count().unwrap(), 1);
}

#[test]
fn reconcile_handles_more_keys_than_bind_slots() {
    let store = open_store();
    store
        .execute_batch(
            "WITH RECURSIVE seq(n) AS (SELECT 1 UNION ALL SELECT n + 1 FROM seq WHERE n < 33005)
             INSERT INTO cms_nav_items (code, name, position) SELECT 'item-' || n, 'Item ' || n, n FROM seq;",
        )
        .unwrap();
    let repo = Repository::<MenuItem>::new(store);

    let input = (1..=33_000_i64)
        .map(|n| item(&format!("item-{n}"), &format!("Item {n}"), n))
        .collect::<Vec<_>>();
    let result = Reconciler::new(&repo)
        .reconcile_atomic("code", input)
        .unwrap();

    assert_eq!(result.len(), 33_000);
    assert_eq!(repo.count().unwrap(), 33_000);
    assert!(repo.find_code("item-33001").unwrap().is_none());
    assert_eq!(
        repo.find_code("item-33000").unwrap().unwrap().key(),
        Some(EntityKey::Integer(33_000))
    );
}
