mod common;

use common::{FixtureModule, HookLog, load_db};
use moddb::{
    Error, upgrade,
    core::module::{MODULE_TABLE, ModuleState, lifecycle::Lifecycle},
    prelude::*,
};

fn state(db: &Db, name: &str) -> ModuleState {
    Lifecycle::new(db).state_of(name).expect("known module")
}

#[test]
fn conditional_cascade_fires_once_the_full_set_is_installed() {
    let db = load_db(
        "it_cascade",
        vec![
            FixtureModule::new("test-blok1"),
            FixtureModule::new("test-blok4"),
            FixtureModule::new("test-blok5").conditionally(["test-blok1", "test-blok4"]),
        ],
    );

    upgrade(&db, &["test-blok1"], &[], &[]).expect("install test-blok1");
    assert_eq!(state(&db, "test-blok4"), ModuleState::Uninstalled);
    assert_eq!(state(&db, "test-blok5"), ModuleState::Uninstalled);

    upgrade(&db, &["test-blok4"], &[], &[]).expect("install test-blok4");
    assert_eq!(state(&db, "test-blok5"), ModuleState::Installed);
}

#[test]
fn uninstall_cascades_back_through_conditional_dependents() {
    let log = HookLog::new();
    let db = load_db(
        "it_reverse_cascade",
        vec![
            FixtureModule::new("test-blok1"),
            FixtureModule::new("test-blok4"),
            FixtureModule::new("test-blok5")
                .conditionally(["test-blok1", "test-blok4"])
                .logging(&log),
        ],
    );

    upgrade(&db, &["test-blok1", "test-blok4"], &[], &[]).expect("install both");
    assert_eq!(state(&db, "test-blok5"), ModuleState::Installed);

    upgrade(&db, &[], &[], &["test-blok4"]).expect("uninstall test-blok4");
    assert_eq!(state(&db, "test-blok5"), ModuleState::Uninstalled);
    assert_eq!(log.calls(), ["install:test-blok5", "uninstall:test-blok5"]);
}

#[test]
fn installing_an_installed_module_is_illegal() {
    let db = load_db("it_illegal_install", vec![FixtureModule::new("base")]);

    upgrade(&db, &["base"], &[], &[]).expect("first install");
    let err = upgrade(&db, &["base"], &[], &[]).expect_err("second install must fail");
    assert!(matches!(err, Error::Lifecycle(_)), "got {err}");
}

#[test]
fn uninstalling_an_uninstalled_module_is_illegal() {
    let db = load_db("it_illegal_uninstall", vec![FixtureModule::new("base")]);

    let err = upgrade(&db, &[], &[], &["base"]).expect_err("uninstall must fail");
    assert!(matches!(err, Error::Lifecycle(_)), "got {err}");
}

#[test]
fn update_passes_the_previously_installed_version() {
    let log = HookLog::new();
    let db = load_db(
        "it_update",
        vec![FixtureModule::new("base").version("3.2.0").logging(&log)],
    );

    upgrade(&db, &["base"], &[], &[]).expect("install");
    upgrade(&db, &[], &["base"], &[]).expect("update");

    assert_eq!(state(&db, "base"), ModuleState::Installed);
    assert_eq!(log.calls(), ["install:base", "update:base:3.2.0"]);
}

#[test]
fn upgrade_builder_batches_all_three_sets() {
    let log = HookLog::new();
    let db = load_db(
        "it_batch",
        vec![
            FixtureModule::new("one").logging(&log),
            FixtureModule::new("two").logging(&log),
            FixtureModule::new("three").logging(&log),
        ],
    );

    upgrade(&db, &["two", "three"], &[], &[]).expect("seed installs");

    Upgrade::new()
        .install("one")
        .update("two")
        .uninstall("three")
        .apply(&db)
        .expect("mixed batch");

    assert_eq!(state(&db, "one"), ModuleState::Installed);
    assert_eq!(state(&db, "two"), ModuleState::Installed);
    assert_eq!(state(&db, "three"), ModuleState::Uninstalled);
    // Within one batch the install set drains in name order.
    assert_eq!(
        log.calls(),
        [
            "install:three",
            "install:two",
            "install:one",
            "update:two:1.0.0",
            "uninstall:three",
        ],
    );
}

#[test]
fn module_rows_survive_in_the_persisted_schema() {
    let db = load_db(
        "it_module_rows",
        vec![
            FixtureModule::new("base"),
            FixtureModule::new("app").requires(["base"]),
        ],
    );
    upgrade(&db, &["app", "base"], &[], &[]).expect("install");

    let rows = db
        .backend()
        .select(MODULE_TABLE, &Filter::new())
        .expect("module table exists");
    assert_eq!(rows.len(), 2);

    let base = rows
        .iter()
        .find(|row| row["name"] == Value::Text("base".to_string()))
        .expect("base row");
    assert_eq!(base["state"], Value::Text("Installed".to_string()));
    assert_eq!(base["order"], Value::Int(0), "required dep resolves first");
    assert_eq!(base["installed_version"], Value::Text("1.0.0".to_string()));
}
