#![allow(dead_code)]

use datakit_core::{
    CodeKeyed, FieldMap, FieldRule, FieldValue, KeyStrategy, Keyed, Migration, StoreHandle,
};

pub struct User;

impl Keyed for User {
    const TYPE_ID: &'static str = "users";
    const TABLE: &'static str = "users";
    const COLUMNS: &'static [&'static str] = &["name", "email"];
}

pub struct Menu;

impl Keyed for Menu {
    const TYPE_ID: &'static str = "menus";
    const TABLE: &'static str = "cms_nav_menus";
    const COLUMNS: &'static [&'static str] = &["code", "name"];
    const TIMESTAMPS: bool = true;

    fn rules() -> &'static [FieldRule] {
        &[FieldRule::Required("name"), FieldRule::MaxLength("name", 40)]
    }
}

impl CodeKeyed for Menu {}

pub struct MenuItem;

impl Keyed for MenuItem {
    const TYPE_ID: &'static str = "menu_items";
    const TABLE: &'static str = "cms_nav_items";
    const COLUMNS: &'static [&'static str] =
        &["menu_id", "code", "name", "position", "link", "is_external"];
}

impl CodeKeyed for MenuItem {}

pub struct Setting;

impl Keyed for Setting {
    const TYPE_ID: &'static str = "settings";
    const TABLE: &'static str = "settings";
    const PRIMARY_KEY: &'static str = "setting_key";
    const COLUMNS: &'static [&'static str] = &["value"];
    const KEY_STRATEGY: KeyStrategy = KeyStrategy::Manual;
}

pub const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        sql: "CREATE TABLE users (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL,
            email TEXT
        );
        CREATE TABLE cms_nav_menus (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            code TEXT UNIQUE,
            name TEXT NOT NULL,
            created_at INTEGER,
            updated_at INTEGER
        );",
    },
    Migration {
        version: 2,
        sql: "CREATE TABLE cms_nav_items (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            menu_id INTEGER REFERENCES cms_nav_menus(id),
            code TEXT,
            name TEXT,
            position INTEGER NOT NULL DEFAULT 0,
            link TEXT,
            is_external INTEGER NOT NULL DEFAULT 0
        );
        CREATE TABLE settings (
            setting_key TEXT PRIMARY KEY,
            value TEXT
        );",
    },
];

pub fn open_store() -> StoreHandle {
    StoreHandle::open_in_memory(MIGRATIONS).expect("in-memory store should open")
}

/// Store with users 1..=count named `user-<n>`.
pub fn store_with_users(count: u32) -> StoreHandle {
    let store = open_store();
    store
        .execute_batch(&format!(
            "WITH RECURSIVE seq(n) AS (SELECT 1 UNION ALL SELECT n + 1 FROM seq WHERE n < {count})
             INSERT INTO users (name, email) SELECT 'user-' || n, 'user' || n || '@example.com' FROM seq;"
        ))
        .expect("users should seed");
    store
}

pub fn fields(pairs: &[(&str, FieldValue)]) -> FieldMap {
    pairs
        .iter()
        .map(|(field, value)| ((*field).to_string(), value.clone()))
        .collect()
}
