use rusqlite::Connection;
use zerver_common::{Dialect, Error, MigrationKey};
use zerver_db::database::{introspect_schema, open, open_in_memory};
use zerver_db::schema::index_name;
use zerver_db::{ColumnDefault, FieldType, MigrationExecutor, MigrationTarget, OnDelete, SchemaEditor, history};

const TYPING: &str = "0508_realmuserdefault_receives_typing_notifications_and_more";
const EMAILS: &str = "0616_userprofile_can_change_user_emails";
const SUBSCRIBE: &str = "0673_stream_can_subscribe_group";
const PRIOR: [&str; 3] = [
    "0507_rework_realm_upload_quota_gb",
    "0615_system_bot_avatars",
    "0672_fix_attachment_realm",
];

fn key(name: &str) -> MigrationKey {
    MigrationKey::new("zerver", name)
}

/// The tables prior history leaves behind, with a row in each.
fn create_prior_schema(conn: &Connection) {
    conn.execute_batch(
        "CREATE TABLE realmuserdefault (id INTEGER NOT NULL PRIMARY KEY AUTOINCREMENT);
         CREATE TABLE userprofile (
             id INTEGER NOT NULL PRIMARY KEY AUTOINCREMENT,
             email TEXT NOT NULL
         );
         CREATE TABLE usergroup (
             id INTEGER NOT NULL PRIMARY KEY AUTOINCREMENT,
             name TEXT NOT NULL
         );
         CREATE TABLE stream (
             id INTEGER NOT NULL PRIMARY KEY AUTOINCREMENT,
             name TEXT NOT NULL UNIQUE CHECK (name <> ''),
             date_created TEXT NOT NULL DEFAULT (datetime('now'))
         );
         CREATE INDEX stream_name_idx ON stream(name);
         INSERT INTO realmuserdefault (id) VALUES (1);
         INSERT INTO userprofile (id, email) VALUES (1, 'iago@zulip.com');
         INSERT INTO usergroup (id, name) VALUES (1, 'role:members');
         INSERT INTO stream (id, name) VALUES (1, 'general');",
    )
    .expect("failed to create prior schema");
}

fn migrated_executor() -> MigrationExecutor {
    let conn = open_in_memory().expect("failed to open in-memory db");
    create_prior_schema(&conn);

    let mut executor = MigrationExecutor::with_history(conn).expect("executor should start");
    for name in PRIOR {
        executor.record_prior(&key(name)).expect("record prior should succeed");
    }
    executor.migrate_to_latest(false).expect("migrate should succeed");
    executor
}

#[test]
fn migrate_applies_units_in_history_order() {
    let conn = open_in_memory().expect("failed to open in-memory db");
    create_prior_schema(&conn);
    let mut executor = MigrationExecutor::with_history(conn).expect("executor should start");
    for name in PRIOR {
        executor.record_prior(&key(name)).expect("record prior should succeed");
    }

    let plan = executor
        .migration_plan(&[MigrationTarget::Latest(history::APP_LABEL.to_string())])
        .expect("plan should succeed");
    let names: Vec<&str> = plan.iter().map(|s| s.key.name.as_str()).collect();
    assert_eq!(names, [TYPING, EMAILS, SUBSCRIBE]);
    assert!(plan.iter().all(|s| !s.backwards));

    executor.migrate(&plan, false).expect("migrate should succeed");
    assert!(
        executor
            .migration_plan(&[MigrationTarget::Latest(history::APP_LABEL.to_string())])
            .expect("plan should succeed")
            .is_empty()
    );
}

#[test]
fn typing_notification_columns_default_to_true() {
    let executor = migrated_executor();
    let state = executor.project_state().expect("introspection should succeed");

    for table in ["realmuserdefault", "userprofile"] {
        let column = state
            .table(table)
            .expect("table exists")
            .column("receives_typing_notifications")
            .expect("column was added");
        assert_eq!(column.field.field_type, FieldType::Boolean);
        assert_eq!(column.field.default, ColumnDefault::Bool(true));
        assert!(!column.field.null);
    }

    let value: bool = executor
        .connection()
        .query_row(
            "SELECT receives_typing_notifications FROM userprofile WHERE id = 1",
            [],
            |row| row.get(0),
        )
        .expect("existing row should be readable");
    assert!(value);
}

#[test]
fn can_change_user_emails_defaults_to_false_and_is_indexed() {
    let executor = migrated_executor();
    let state = executor.project_state().expect("introspection should succeed");
    let userprofile = state.table("userprofile").expect("table exists");

    let column = userprofile
        .column("can_change_user_emails")
        .expect("column was added");
    assert_eq!(column.field.default, ColumnDefault::Bool(false));
    assert!(!column.field.null);
    assert!(column.field.db_index);
    assert_eq!(
        userprofile.indexes_on("can_change_user_emails").next().map(|i| i.name.clone()),
        Some(index_name("userprofile", "can_change_user_emails"))
    );

    // One column per unit: the userprofile table gained exactly two.
    assert_eq!(userprofile.columns.len(), 4);
}

#[test]
fn can_subscribe_group_is_a_nullable_restricting_foreign_key() {
    let executor = migrated_executor();
    let state = executor.project_state().expect("introspection should succeed");
    let column = state
        .table("stream")
        .expect("table exists")
        .column("can_subscribe_group_id")
        .expect("column was added");

    assert!(column.field.null);
    assert_eq!(column.field.default, ColumnDefault::None);
    assert!(matches!(
        &column.field.field_type,
        FieldType::ForeignKey { to, on_delete: OnDelete::Restrict, .. } if to == "usergroup"
    ));
}

#[test]
fn foreign_key_accepts_null_and_rejects_missing_groups() {
    let executor = migrated_executor();
    let conn = executor.connection();

    conn.execute(
        "INSERT INTO stream (name, can_subscribe_group_id) VALUES ('null-group', NULL)",
        [],
    )
    .expect("NULL group should be accepted");
    conn.execute(
        "INSERT INTO stream (name, can_subscribe_group_id) VALUES ('members', 1)",
        [],
    )
    .expect("existing group should be accepted");

    let err = conn
        .execute(
            "INSERT INTO stream (name, can_subscribe_group_id) VALUES ('ghost', 404)",
            [],
        )
        .expect_err("missing group should be rejected");
    assert!(err.to_string().contains("FOREIGN KEY constraint failed"));
}

#[test]
fn deleting_a_referenced_group_is_restricted() {
    let executor = migrated_executor();
    let conn = executor.connection();
    conn.execute("UPDATE stream SET can_subscribe_group_id = 1 WHERE id = 1", [])
        .expect("update should succeed");

    let err = conn
        .execute("DELETE FROM usergroup WHERE id = 1", [])
        .expect_err("referenced group should not be deletable");
    assert!(err.to_string().contains("FOREIGN KEY constraint failed"));

    conn.execute("UPDATE stream SET can_subscribe_group_id = NULL WHERE id = 1", [])
        .expect("update should succeed");
    conn.execute("DELETE FROM usergroup WHERE id = 1", [])
        .expect("unreferenced group should be deletable");
}

#[test]
fn applying_a_unit_twice_is_rejected() {
    let mut executor = migrated_executor();

    assert!(matches!(
        executor.apply_migration(&key(EMAILS), false),
        Err(Error::AlreadyApplied(_))
    ));

    // Bypassing the recorder, the database itself refuses the duplicate column.
    let migration = executor
        .graph()
        .node(&key(EMAILS))
        .expect("unit exists")
        .clone();
    let conn = executor.connection();
    let mut state = introspect_schema(conn).expect("introspection should succeed");
    state
        .table_mut("userprofile")
        .expect("table exists")
        .remove_column("can_change_user_emails")
        .expect("column present");
    let mut editor = SchemaEditor::execute(conn);
    let err = migration
        .apply(&mut state, &mut editor)
        .expect_err("duplicate column should be rejected");
    assert!(err.to_string().contains("duplicate column name"));
}

#[test]
fn rolling_back_to_zero_removes_columns_and_keeps_rows() {
    let mut executor = migrated_executor();
    let plan = executor
        .migration_plan(&[MigrationTarget::Zero(history::APP_LABEL.to_string())])
        .expect("plan should succeed");
    let names: Vec<&str> = plan.iter().map(|s| s.key.name.as_str()).collect();
    assert_eq!(names, [SUBSCRIBE, EMAILS, TYPING]);

    executor.migrate(&plan, false).expect("rollback should succeed");

    let state = executor.project_state().expect("introspection should succeed");
    assert!(!state.table("stream").expect("table exists").has_column("can_subscribe_group_id"));
    assert!(!state.table("userprofile").expect("table exists").has_column("can_change_user_emails"));
    assert!(
        !state
            .table("realmuserdefault")
            .expect("table exists")
            .has_column("receives_typing_notifications")
    );
    assert_eq!(
        state.table("stream").expect("table exists").indexes.len(),
        1,
        "unrelated stream index should survive the table rebuild"
    );

    let name: String = executor
        .connection()
        .query_row("SELECT name FROM stream WHERE id = 1", [], |row| row.get(0))
        .expect("row should survive");
    assert_eq!(name, "general");

    let applied = executor.applied_migrations().expect("list should succeed");
    assert_eq!(applied.len(), PRIOR.len());

    // And forward again.
    executor.migrate_to_latest(false).expect("re-apply should succeed");
}

#[test]
fn rolling_back_the_stream_rebuild_keeps_constraints_and_defaults() {
    let mut executor = migrated_executor();
    let plan = executor
        .migration_plan(&[MigrationTarget::Zero(history::APP_LABEL.to_string())])
        .expect("plan should succeed");
    executor.migrate(&plan, false).expect("rollback should succeed");

    let conn = executor.connection();
    conn.execute("INSERT INTO stream (name) VALUES ('general')", [])
        .expect_err("duplicate stream name should still be rejected");
    conn.execute("INSERT INTO stream (name) VALUES ('')", [])
        .expect_err("empty stream name should still be rejected");
    conn.execute("INSERT INTO stream (name) VALUES ('design')", [])
        .expect("insert relying on the date_created default should succeed");

    let created: String = conn
        .query_row("SELECT date_created FROM stream WHERE name = 'design'", [], |row| {
            row.get(0)
        })
        .expect("new row should be readable");
    assert!(!created.is_empty());
}

#[test]
fn sqlmigrate_postgres_matches_expected_statements() {
    let conn = open_in_memory().expect("failed to open in-memory db");
    let executor = MigrationExecutor::with_history(conn).expect("executor should start");

    let typing = executor
        .sql_for(&key(TYPING), false, Dialect::Postgres)
        .expect("render should succeed");
    assert_eq!(
        typing,
        [
            "ALTER TABLE realmuserdefault ADD COLUMN receives_typing_notifications BOOLEAN DEFAULT TRUE NOT NULL;",
            "ALTER TABLE userprofile ADD COLUMN receives_typing_notifications BOOLEAN DEFAULT TRUE NOT NULL;",
        ]
    );

    let emails = executor
        .sql_for(&key(EMAILS), false, Dialect::Postgres)
        .expect("render should succeed");
    assert_eq!(
        emails[0],
        "ALTER TABLE userprofile ADD COLUMN can_change_user_emails BOOLEAN DEFAULT FALSE NOT NULL;"
    );
    assert!(emails[1].starts_with("CREATE INDEX userprofile_can_change_user_emails_"));
    assert!(emails[1].ends_with(" ON userprofile(can_change_user_emails);"));

    let subscribe = executor
        .sql_for(&key(SUBSCRIBE), false, Dialect::Postgres)
        .expect("render should succeed");
    assert_eq!(
        subscribe[0],
        "ALTER TABLE stream ADD COLUMN can_subscribe_group_id INTEGER NULL REFERENCES usergroup(id) ON DELETE RESTRICT;"
    );
}

#[test]
fn on_disk_database_keeps_records_between_connections() {
    let dir = tempfile::tempdir().expect("failed to create temp dir");
    let path = dir.path().join("zerver.db");

    {
        let conn = open(&path).expect("failed to open database");
        create_prior_schema(&conn);
        let mut executor = MigrationExecutor::with_history(conn).expect("executor should start");
        for name in PRIOR {
            executor.record_prior(&key(name)).expect("record prior should succeed");
        }
        executor.migrate_to_latest(false).expect("migrate should succeed");
    }

    let conn = open(&path).expect("failed to reopen database");
    let executor = MigrationExecutor::with_history(conn).expect("executor should start");
    let statuses = executor.show_migrations().expect("status should succeed");
    assert_eq!(statuses.len(), 6);
    assert!(statuses.iter().all(|s| s.applied.is_some()));
}
