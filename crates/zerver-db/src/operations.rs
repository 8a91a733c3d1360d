use serde::{Deserialize, Serialize};
use zerver_common::{Error, Result};

use crate::ddl::SchemaEditor;
use crate::schema::{Column, Field, SchemaState};

/// One atomic change to a table's structure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Operation {
    AddField {
        model_name: String,
        name: String,
        field: Field,
    },
}

impl Operation {
    pub fn add_field(model_name: impl Into<String>, name: impl Into<String>, field: Field) -> Self {
        Self::AddField {
            model_name: model_name.into(),
            name: name.into(),
            field,
        }
    }

    /// Table the operation touches.
    pub fn table(&self) -> &str {
        match self {
            Self::AddField { model_name, .. } => model_name,
        }
    }

    /// Every table the operation needs to exist, including referenced ones.
    pub fn referenced_tables(&self) -> Vec<&str> {
        match self {
            Self::AddField {
                model_name, field, ..
            } => std::iter::once(model_name.as_str())
                .chain(field.related_table())
                .collect(),
        }
    }

    pub fn describe(&self) -> String {
        match self {
            Self::AddField {
                model_name, name, ..
            } => format!("Add field {name} to {model_name}"),
        }
    }

    pub fn state_forwards(&self, state: &mut SchemaState) -> Result<()> {
        match self {
            Self::AddField {
                model_name,
                name,
                field,
            } => {
                if let Some(to) = field.related_table() {
                    if !state.has_table(to) {
                        return Err(Error::UnknownTable(to.to_string()));
                    }
                }
                state
                    .table_mut(model_name)?
                    .add_column(Column::new(field.column_name(name), field.clone()))
            }
        }
    }

    pub fn state_backwards(&self, state: &mut SchemaState) -> Result<()> {
        match self {
            Self::AddField {
                model_name,
                name,
                field,
            } => {
                state
                    .table_mut(model_name)?
                    .remove_column(&field.column_name(name))?;
                Ok(())
            }
        }
    }

    /// Emit the DDL for applying the operation. `state` must already reflect it.
    pub fn database_forwards(&self, state: &SchemaState, editor: &mut SchemaEditor<'_>) -> Result<()> {
        match self {
            Self::AddField {
                model_name,
                name,
                field,
            } => {
                let column_name = field.column_name(name);
                let table = state.table(model_name)?;
                let column = table.column(&column_name).ok_or_else(|| Error::UnknownColumn {
                    table: model_name.clone(),
                    column: column_name.clone(),
                })?;
                editor.add_field(model_name, column)
            }
        }
    }

    /// Emit the DDL for reverting the operation. `state` is the schema before
    /// the revert.
    pub fn database_backwards(&self, state: &SchemaState, editor: &mut SchemaEditor<'_>) -> Result<()> {
        match self {
            Self::AddField {
                model_name,
                name,
                field,
            } => {
                let column_name = field.column_name(name);
                let table = state.table(model_name)?;
                let column = table.column(&column_name).ok_or_else(|| Error::UnknownColumn {
                    table: model_name.clone(),
                    column: column_name.clone(),
                })?;
                editor.remove_field(table, column)
            }
        }
    }
}
