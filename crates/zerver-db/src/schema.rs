//! In-memory model of the relational schema.
//!
//! A [`SchemaState`] is "the current schema": the fold of every schema
//! operation applied along the migration chain. Operations mutate it before
//! they touch the database, so impossible changes (a duplicate column, a
//! reference to a missing table) are rejected without issuing any SQL.

use ring::digest::{SHA256, digest};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use zerver_common::{Error, Result};

/// Longest identifier PostgreSQL accepts without truncating it.
const MAX_IDENTIFIER_LEN: usize = 63;

/// Primary key column every table carries.
pub const PRIMARY_KEY_COLUMN: &str = "id";

/// Referential action taken when a referenced row is deleted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OnDelete {
    /// The database refuses to delete a row that is still referenced.
    Restrict,
    Cascade,
    /// Enforced by the application before deleting; no database action.
    Protect,
    SetNull,
    DoNothing,
}

impl OnDelete {
    /// Action rendered in the column's `REFERENCES` clause, if any.
    pub fn sql_action(&self) -> Option<&'static str> {
        match self {
            Self::Restrict => Some("RESTRICT"),
            Self::Cascade => Some("CASCADE"),
            Self::SetNull => Some("SET NULL"),
            Self::Protect | Self::DoNothing => None,
        }
    }

    pub fn from_sql(action: &str) -> Self {
        match action.trim().to_ascii_uppercase().as_str() {
            "RESTRICT" => Self::Restrict,
            "CASCADE" => Self::Cascade,
            "SET NULL" => Self::SetNull,
            _ => Self::DoNothing,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    /// Auto-incrementing integer primary key.
    AutoField,
    Boolean,
    Integer,
    Text,
    ForeignKey {
        to: String,
        on_delete: OnDelete,
        /// `Some("+")` disables the reverse accessor on the referenced model.
        related_name: Option<String>,
    },
    /// Declared type found by introspection that has no dedicated variant.
    Raw(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnDefault {
    #[default]
    None,
    Bool(bool),
    Int(i64),
    Raw(String),
}

/// Column specification: semantic type, nullability, default and indexing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Field {
    pub field_type: FieldType,
    pub null: bool,
    pub default: ColumnDefault,
    pub db_index: bool,
}

impl Field {
    pub fn auto() -> Self {
        Self::new(FieldType::AutoField)
    }

    pub fn boolean(default: bool) -> Self {
        Self {
            default: ColumnDefault::Bool(default),
            ..Self::new(FieldType::Boolean)
        }
    }

    pub fn integer() -> Self {
        Self::new(FieldType::Integer)
    }

    pub fn text() -> Self {
        Self::new(FieldType::Text)
    }

    /// Foreign keys are indexed unless told otherwise.
    pub fn foreign_key(to: impl Into<String>, on_delete: OnDelete) -> Self {
        Self {
            db_index: true,
            ..Self::new(FieldType::ForeignKey {
                to: to.into(),
                on_delete,
                related_name: None,
            })
        }
    }

    fn new(field_type: FieldType) -> Self {
        Self {
            field_type,
            null: false,
            default: ColumnDefault::None,
            db_index: false,
        }
    }

    pub fn null(mut self, null: bool) -> Self {
        self.null = null;
        self
    }

    pub fn db_index(mut self, db_index: bool) -> Self {
        self.db_index = db_index;
        self
    }

    pub fn default_value(mut self, default: ColumnDefault) -> Self {
        self.default = default;
        self
    }

    pub fn related_name(mut self, name: impl Into<String>) -> Self {
        if let FieldType::ForeignKey { related_name, .. } = &mut self.field_type {
            *related_name = Some(name.into());
        }
        self
    }

    /// Database column backing a field called `name`.
    pub fn column_name(&self, name: &str) -> String {
        if self.is_relation() {
            format!("{name}_{PRIMARY_KEY_COLUMN}")
        } else {
            name.to_string()
        }
    }

    pub fn is_relation(&self) -> bool {
        matches!(self.field_type, FieldType::ForeignKey { .. })
    }

    pub fn related_table(&self) -> Option<&str> {
        match &self.field_type {
            FieldType::ForeignKey { to, .. } => Some(to),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    pub field: Field,
}

impl Column {
    pub fn new(name: impl Into<String>, field: Field) -> Self {
        Self {
            name: name.into(),
            field,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Index {
    pub name: String,
    pub columns: Vec<String>,
}

/// Deterministic name for a single-column index: `<table>_<column>_<hash>`.
pub fn index_name(table: &str, column: &str) -> String {
    let hash = digest(&SHA256, format!("{table}.{column}").as_bytes());
    let suffix: String = hash.as_ref()[..4]
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect();

    let mut prefix = format!("{table}_{column}");
    prefix.truncate(MAX_IDENTIFIER_LEN - suffix.len() - 1);
    format!("{prefix}_{suffix}")
}

/// Table-level integrity rule carried across table rebuilds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Constraint {
    Unique { columns: Vec<String> },
    Check { expression: String },
}

impl Constraint {
    /// Whether the constraint refers to `column`.
    pub fn mentions(&self, column: &str) -> bool {
        match self {
            Self::Unique { columns } => columns.iter().any(|c| c == column),
            Self::Check { expression } => expression
                .split(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
                .any(|token| token.eq_ignore_ascii_case(column)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableState {
    pub name: String,
    pub columns: Vec<Column>,
    pub indexes: Vec<Index>,
    #[serde(default)]
    pub constraints: Vec<Constraint>,
}

impl TableState {
    /// A table holding only its auto-incrementing primary key.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            columns: vec![Column::new(PRIMARY_KEY_COLUMN, Field::auto())],
            indexes: Vec::new(),
            constraints: Vec::new(),
        }
    }

    /// A table with no columns at all, filled in by introspection.
    pub fn empty(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            columns: Vec::new(),
            indexes: Vec::new(),
            constraints: Vec::new(),
        }
    }

    pub fn with_column(mut self, name: impl Into<String>, field: Field) -> Self {
        self.columns.push(Column::new(name, field));
        self
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column(name).is_some()
    }

    pub fn add_column(&mut self, column: Column) -> Result<()> {
        if self.has_column(&column.name) {
            return Err(Error::DuplicateColumn {
                table: self.name.clone(),
                column: column.name,
            });
        }

        if column.field.db_index {
            self.indexes.push(Index {
                name: index_name(&self.name, &column.name),
                columns: vec![column.name.clone()],
            });
        }
        self.columns.push(column);
        Ok(())
    }

    /// Removes a column together with every index that covers it.
    pub fn remove_column(&mut self, name: &str) -> Result<Column> {
        let position = self
            .columns
            .iter()
            .position(|c| c.name == name)
            .ok_or_else(|| Error::UnknownColumn {
                table: self.name.clone(),
                column: name.to_string(),
            })?;

        self.indexes
            .retain(|index| !index.columns.iter().any(|c| c == name));
        Ok(self.columns.remove(position))
    }

    pub fn indexes_on<'a>(&'a self, column: &'a str) -> impl Iterator<Item = &'a Index> + 'a {
        self.indexes
            .iter()
            .filter(move |index| index.columns.iter().any(|c| c == column))
    }
}

/// The whole schema: tables keyed by name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaState {
    tables: BTreeMap<String, TableState>,
}

impl SchemaState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_table(&mut self, table: TableState) {
        self.tables.insert(table.name.clone(), table);
    }

    pub fn with_table(mut self, table: TableState) -> Self {
        self.add_table(table);
        self
    }

    pub fn has_table(&self, name: &str) -> bool {
        self.tables.contains_key(name)
    }

    pub fn table(&self, name: &str) -> Result<&TableState> {
        self.tables
            .get(name)
            .ok_or_else(|| Error::UnknownTable(name.to_string()))
    }

    pub fn table_mut(&mut self, name: &str) -> Result<&mut TableState> {
        self.tables
            .get_mut(name)
            .ok_or_else(|| Error::UnknownTable(name.to_string()))
    }

    /// Returns the named table, inserting a primary-key-only table if absent.
    pub fn ensure_table(&mut self, name: &str) -> &mut TableState {
        self.tables
            .entry(name.to_string())
            .or_insert_with(|| TableState::new(name))
    }

    pub fn tables(&self) -> impl Iterator<Item = &TableState> {
        self.tables.values()
    }
}
