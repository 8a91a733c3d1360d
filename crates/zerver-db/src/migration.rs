use serde::{Deserialize, Serialize};
use zerver_common::{MigrationKey, Result};

use crate::ddl::SchemaEditor;
use crate::operations::Operation;
use crate::schema::SchemaState;

/// One versioned schema-change record: the migrations it depends on and the
/// ordered operations it applies. Immutable once applied anywhere.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Migration {
    pub app_label: String,
    pub name: String,
    pub dependencies: Vec<MigrationKey>,
    pub operations: Vec<Operation>,
    /// Run inside a single transaction.
    pub atomic: bool,
}

impl Migration {
    pub fn new(app_label: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            app_label: app_label.into(),
            name: name.into(),
            dependencies: Vec::new(),
            operations: Vec::new(),
            atomic: true,
        }
    }

    pub fn depends_on(mut self, app_label: impl Into<String>, name: impl Into<String>) -> Self {
        self.dependencies.push(MigrationKey::new(app_label, name));
        self
    }

    pub fn operation(mut self, operation: Operation) -> Self {
        self.operations.push(operation);
        self
    }

    pub fn key(&self) -> MigrationKey {
        MigrationKey::new(&self.app_label, &self.name)
    }

    /// Applies every operation in order, updating `state` before each one
    /// emits its DDL.
    pub fn apply(&self, state: &mut SchemaState, editor: &mut SchemaEditor<'_>) -> Result<()> {
        for operation in &self.operations {
            operation.state_forwards(state)?;
            operation.database_forwards(state, editor)?;
        }
        Ok(())
    }

    /// Reverts every operation, last one first.
    pub fn unapply(&self, state: &mut SchemaState, editor: &mut SchemaEditor<'_>) -> Result<()> {
        for operation in self.operations.iter().rev() {
            operation.database_backwards(state, editor)?;
            operation.state_backwards(state)?;
        }
        Ok(())
    }

    /// Folds the operations into `state` without emitting any SQL.
    pub fn mutate_state(&self, state: &mut SchemaState) -> Result<()> {
        for operation in &self.operations {
            operation.state_forwards(state)?;
        }
        Ok(())
    }

    /// Removes the operations' effects from `state` without emitting any SQL.
    pub fn revert_state(&self, state: &mut SchemaState) -> Result<()> {
        for operation in self.operations.iter().rev() {
            operation.state_backwards(state)?;
        }
        Ok(())
    }
}
