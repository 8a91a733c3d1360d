//! Plans and applies migration units against a SQLite database.
//!
//! Every step runs with foreign key enforcement switched off so tables can
//! be rebuilt, inside its own transaction when the unit is atomic. The
//! foreign key check runs before commit, and enforcement is switched back
//! on afterwards whether or not the step succeeded.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use chrono::{DateTime, Utc};
use rusqlite::Connection;
use serde::Serialize;
use tracing::{info, warn};
use zerver_common::{Dialect, Error, MigrationKey, Result};

use crate::database::{check_foreign_keys, introspect_schema, set_foreign_keys};
use crate::ddl::SchemaEditor;
use crate::graph::MigrationGraph;
use crate::history;
use crate::migration::Migration;
use crate::recorder::MigrationRecorder;
use crate::schema::SchemaState;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MigrationTarget {
    /// Every unapplied unit of the app.
    Latest(String),
    /// Forward to this unit, or back to it if it is already applied.
    To(MigrationKey),
    /// Unapply every unit of the app.
    Zero(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlanStep {
    pub key: MigrationKey,
    pub backwards: bool,
}

impl fmt::Display for PlanStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let action = if self.backwards { "Unapply" } else { "Apply" };
        write!(f, "{action} {}", self.key)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MigrationStatus {
    pub key: MigrationKey,
    pub applied: Option<DateTime<Utc>>,
    /// Prior history that is not shipped with this crate.
    pub external: bool,
}

pub struct MigrationExecutor {
    conn: Connection,
    graph: MigrationGraph,
    recorder: MigrationRecorder,
}

impl MigrationExecutor {
    pub fn new(conn: Connection, graph: MigrationGraph) -> Result<Self> {
        let recorder = MigrationRecorder::new();
        recorder.ensure_schema(&conn)?;
        Ok(Self {
            conn,
            graph,
            recorder,
        })
    }

    /// Executor over the schema history shipped with this crate.
    pub fn with_history(conn: Connection) -> Result<Self> {
        Self::new(conn, MigrationGraph::build(history::migrations())?)
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    pub fn graph(&self) -> &MigrationGraph {
        &self.graph
    }

    pub fn into_connection(self) -> Connection {
        self.conn
    }

    pub fn applied_migrations(&self) -> Result<BTreeMap<MigrationKey, DateTime<Utc>>> {
        self.recorder.applied_migrations(&self.conn)
    }

    pub fn is_applied(&self, key: &MigrationKey) -> Result<bool> {
        self.recorder.is_applied(&self.conn, key)
    }

    /// Fails if an applied unit depends on a local unit that is not applied.
    pub fn check_consistent_history(&self) -> Result<()> {
        let applied = self.applied_migrations()?;
        for key in applied.keys().filter(|k| self.graph.contains(k)) {
            if let Some(parent) = self
                .graph
                .parents_of(key)
                .find(|p| !applied.contains_key(*p))
            {
                return Err(Error::InconsistentHistory(format!(
                    "{key} is applied before its dependency {parent}"
                )));
            }
        }
        Ok(())
    }

    pub fn migration_plan(&self, targets: &[MigrationTarget]) -> Result<Vec<PlanStep>> {
        let applied = self.applied_migrations()?;
        let mut plan = Vec::new();
        let mut seen = BTreeSet::new();
        let mut push = |key: MigrationKey, backwards: bool| {
            if seen.insert((key.clone(), backwards)) {
                plan.push(PlanStep { key, backwards });
            }
        };

        for target in targets {
            match target {
                MigrationTarget::Latest(app) => {
                    self.require_app(app)?;
                    for leaf in self.graph.leaf_nodes(app) {
                        for key in self.graph.forwards_plan(leaf)? {
                            if !applied.contains_key(&key) {
                                push(key, false);
                            }
                        }
                    }
                }
                MigrationTarget::To(target) if applied.contains_key(target) => {
                    let followers: Vec<&MigrationKey> = self
                        .graph
                        .children_of(target)
                        .filter(|c| c.app_label == target.app_label)
                        .collect();
                    for follower in followers {
                        for key in self.graph.backwards_plan(follower)? {
                            if applied.contains_key(&key) {
                                push(key, true);
                            }
                        }
                    }
                }
                MigrationTarget::To(target) => {
                    for key in self.graph.forwards_plan(target)? {
                        if !applied.contains_key(&key) {
                            push(key, false);
                        }
                    }
                }
                MigrationTarget::Zero(app) => {
                    self.require_app(app)?;
                    // Newest history first.
                    for root in self.graph.root_nodes(app).into_iter().rev() {
                        for key in self.graph.backwards_plan(root)? {
                            if applied.contains_key(&key) {
                                push(key, true);
                            }
                        }
                    }
                }
            }
        }

        Ok(plan)
    }

    fn require_app(&self, app: &str) -> Result<()> {
        if self.graph.apps().contains(app) {
            Ok(())
        } else {
            Err(Error::NodeNotFound(format!("app '{app}' has no migrations")))
        }
    }

    /// Runs `plan` step by step. Returns the steps that were executed.
    pub fn migrate(&mut self, plan: &[PlanStep], fake: bool) -> Result<Vec<PlanStep>> {
        self.check_consistent_history()?;

        let applied = self.applied_migrations()?;
        for step in plan.iter().filter(|s| !s.backwards) {
            if let Some(missing) = self
                .graph
                .external_dependencies(&step.key)
                .find(|dep| !applied.contains_key(*dep))
            {
                return Err(Error::NodeNotFound(format!(
                    "{missing}, required by {}, is not recorded as applied",
                    step.key
                )));
            }
        }

        if plan.is_empty() {
            info!("no migrations to apply");
        }

        let mut executed = Vec::with_capacity(plan.len());
        for step in plan {
            if step.backwards {
                self.unapply_migration(&step.key, fake)?;
            } else {
                self.apply_migration(&step.key, fake)?;
            }
            executed.push(step.clone());
        }
        Ok(executed)
    }

    /// Brings every app up to its latest unit.
    pub fn migrate_to_latest(&mut self, fake: bool) -> Result<Vec<PlanStep>> {
        let targets: Vec<MigrationTarget> = self
            .graph
            .apps()
            .into_iter()
            .map(|app| MigrationTarget::Latest(app.to_string()))
            .collect();
        let plan = self.migration_plan(&targets)?;
        self.migrate(&plan, fake)
    }

    /// Applies one unit. Every dependency, local or prior history, must
    /// already be recorded.
    pub fn apply_migration(&mut self, key: &MigrationKey, fake: bool) -> Result<()> {
        self.graph.node(key)?;
        let applied = self.applied_migrations()?;
        if applied.contains_key(key) {
            return Err(Error::AlreadyApplied(key.to_string()));
        }
        if let Some(parent) = self.graph.parents_of(key).find(|p| !applied.contains_key(*p)) {
            return Err(Error::InconsistentHistory(format!(
                "{key} cannot be applied before its dependency {parent}"
            )));
        }
        if let Some(missing) = self
            .graph
            .external_dependencies(key)
            .find(|dep| !applied.contains_key(*dep))
        {
            return Err(Error::NodeNotFound(format!(
                "{missing}, required by {key}, is not recorded as applied"
            )));
        }
        self.run_step(key, false, fake)
    }

    /// Unapplies one unit. No applied unit may still depend on it.
    pub fn unapply_migration(&mut self, key: &MigrationKey, fake: bool) -> Result<()> {
        self.graph.node(key)?;
        let applied = self.applied_migrations()?;
        if !applied.contains_key(key) {
            return Err(Error::NotApplied(key.to_string()));
        }
        if let Some(child) = self.graph.children_of(key).find(|c| applied.contains_key(*c)) {
            return Err(Error::InconsistentHistory(format!(
                "{key} cannot be unapplied while {child} depends on it"
            )));
        }
        self.run_step(key, true, fake)
    }

    fn run_step(&mut self, key: &MigrationKey, backwards: bool, fake: bool) -> Result<()> {
        let migration = self.graph.node(key)?;
        let conn = &mut self.conn;

        set_foreign_keys(conn, false)?;
        let result = run_in_transaction(conn, self.recorder, migration, backwards, fake);
        let restored = set_foreign_keys(conn, true);
        result?;
        restored
    }

    /// Records prior history (a unit applied by an earlier release) as applied.
    pub fn record_prior(&self, key: &MigrationKey) -> Result<()> {
        if self.graph.contains(key) {
            return Err(Error::Other(format!(
                "{key} is part of the shipped history; fake it with migrate instead"
            )));
        }
        if self.is_applied(key)? {
            return Err(Error::AlreadyApplied(key.to_string()));
        }
        self.recorder.record_applied(&self.conn, key)?;
        info!("recorded prior migration {key} as applied");
        Ok(())
    }

    /// The live schema as it stands in the database.
    pub fn project_state(&self) -> Result<SchemaState> {
        introspect_schema(&self.conn)
    }

    /// Status of every shipped unit and every prior unit they depend on.
    pub fn show_migrations(&self) -> Result<Vec<MigrationStatus>> {
        let applied = self.applied_migrations()?;
        let mut statuses: BTreeMap<&MigrationKey, bool> = BTreeMap::new();
        for key in self.graph.keys() {
            statuses.insert(key, false);
        }
        for key in self.graph.all_external_dependencies() {
            statuses.insert(key, true);
        }

        Ok(statuses
            .into_iter()
            .map(|(key, external)| MigrationStatus {
                key: key.clone(),
                applied: applied.get(key).copied(),
                external,
            })
            .collect())
    }

    /// Statements `key` would run, rendered for `dialect` without executing.
    ///
    /// Tables the unit touches but the database lacks are assumed to exist
    /// with only their primary key, as prior history would have left them.
    pub fn sql_for(&self, key: &MigrationKey, backwards: bool, dialect: Dialect) -> Result<Vec<String>> {
        let migration = self.graph.node(key)?;
        let mut state = self.project_state()?;
        for operation in &migration.operations {
            for table in operation.referenced_tables() {
                if !state.has_table(table) {
                    warn!("table {table} not found, assuming primary key only");
                    state.ensure_table(table);
                }
            }
        }

        let applied = self.is_applied(key)?;
        let mut editor = SchemaEditor::collect(dialect);
        if backwards {
            if !applied {
                migration.mutate_state(&mut state)?;
            }
            migration.unapply(&mut state, &mut editor)?;
        } else {
            if applied {
                migration.revert_state(&mut state)?;
            }
            migration.apply(&mut state, &mut editor)?;
        }
        Ok(editor.into_statements())
    }
}

fn run_in_transaction(
    conn: &mut Connection,
    recorder: MigrationRecorder,
    migration: &Migration,
    backwards: bool,
    fake: bool,
) -> Result<()> {
    if !migration.atomic {
        return run_operations(conn, recorder, migration, backwards, fake);
    }

    let tx = conn
        .transaction()
        .map_err(|e| Error::Database(format!("failed to begin transaction: {e}")))?;
    run_operations(&tx, recorder, migration, backwards, fake)?;
    tx.commit()
        .map_err(|e| Error::Database(format!("failed to commit {}: {e}", migration.key())))
}

fn run_operations(
    conn: &Connection,
    recorder: MigrationRecorder,
    migration: &Migration,
    backwards: bool,
    fake: bool,
) -> Result<()> {
    let key = migration.key();

    if !fake {
        let mut state = introspect_schema(conn)?;
        let mut editor = SchemaEditor::execute(conn);
        if backwards {
            migration.unapply(&mut state, &mut editor)?;
        } else {
            migration.apply(&mut state, &mut editor)?;
        }
        check_foreign_keys(conn)?;
    }

    let suffix = if fake { " (fake)" } else { "" };
    if backwards {
        recorder.record_unapplied(conn, &key)?;
        info!("unapplied {key}{suffix}");
    } else {
        recorder.record_applied(conn, &key)?;
        info!("applied {key}{suffix}");
    }
    Ok(())
}
