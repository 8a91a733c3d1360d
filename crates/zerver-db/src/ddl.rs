//! SQL generation for schema operations.
//!
//! A [`SchemaEditor`] either collects the statements it renders (for
//! printing) or executes each one against a SQLite connection as soon as
//! it is rendered.

use rusqlite::Connection;
use tracing::debug;
use zerver_common::{Dialect, Error, Result};

use crate::schema::{
    Column, ColumnDefault, Constraint, FieldType, PRIMARY_KEY_COLUMN, TableState, index_name,
};

pub struct SchemaEditor<'c> {
    dialect: Dialect,
    conn: Option<&'c Connection>,
    statements: Vec<String>,
}

impl<'c> SchemaEditor<'c> {
    /// Render statements without running them.
    pub fn collect(dialect: Dialect) -> Self {
        Self {
            dialect,
            conn: None,
            statements: Vec::new(),
        }
    }

    /// Run every rendered statement against `conn`.
    pub fn execute(conn: &'c Connection) -> Self {
        Self {
            dialect: Dialect::Sqlite,
            conn: Some(conn),
            statements: Vec::new(),
        }
    }

    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    pub fn statements(&self) -> &[String] {
        &self.statements
    }

    pub fn into_statements(self) -> Vec<String> {
        self.statements
    }

    fn run(&mut self, sql: String) -> Result<()> {
        debug!("{sql}");
        if let Some(conn) = self.conn {
            conn.execute_batch(&sql)
                .map_err(|e| Error::Database(format!("failed to execute `{sql}`: {e}")))?;
        }
        self.statements.push(sql);
        Ok(())
    }

    /// Column definition as it appears in `CREATE TABLE` / `ADD COLUMN`.
    pub fn column_sql(&self, column: &Column) -> String {
        let field = &column.field;
        let mut sql = format!("{} {}", column.name, self.type_sql(&field.field_type));

        if field.field_type == FieldType::AutoField {
            sql.push_str(" NOT NULL PRIMARY KEY");
            if self.dialect == Dialect::Sqlite {
                sql.push_str(" AUTOINCREMENT");
            }
            return sql;
        }

        if let Some(default) = self.default_sql(&field.default) {
            sql.push_str(" DEFAULT ");
            sql.push_str(&default);
        }
        sql.push_str(if field.null { " NULL" } else { " NOT NULL" });

        if let FieldType::ForeignKey { to, on_delete, .. } = &field.field_type {
            sql.push_str(&format!(" REFERENCES {to}({PRIMARY_KEY_COLUMN})"));
            if let Some(action) = on_delete.sql_action() {
                sql.push_str(" ON DELETE ");
                sql.push_str(action);
            }
        }
        sql
    }

    fn type_sql(&self, field_type: &FieldType) -> String {
        match (field_type, self.dialect) {
            (FieldType::AutoField, Dialect::Postgres) => "SERIAL".to_string(),
            (FieldType::AutoField | FieldType::Integer | FieldType::ForeignKey { .. }, _) => {
                "INTEGER".to_string()
            }
            (FieldType::Boolean, _) => "BOOLEAN".to_string(),
            (FieldType::Text, _) => "TEXT".to_string(),
            (FieldType::Raw(raw), _) => raw.clone(),
        }
    }

    fn default_sql(&self, default: &ColumnDefault) -> Option<String> {
        match (default, self.dialect) {
            (ColumnDefault::None, _) => None,
            (ColumnDefault::Bool(b), Dialect::Postgres) => {
                Some(if *b { "TRUE" } else { "FALSE" }.to_string())
            }
            (ColumnDefault::Bool(b), Dialect::Sqlite) => Some(if *b { "1" } else { "0" }.to_string()),
            (ColumnDefault::Int(i), _) => Some(i.to_string()),
            (ColumnDefault::Raw(raw), _) if is_literal(raw) => Some(raw.clone()),
            // Expression defaults must be parenthesized in a column definition.
            (ColumnDefault::Raw(raw), _) => Some(format!("({raw})")),
        }
    }

    pub fn add_field(&mut self, table: &str, column: &Column) -> Result<()> {
        self.run(format!(
            "ALTER TABLE {table} ADD COLUMN {};",
            self.column_sql(column)
        ))?;

        if column.field.db_index {
            self.run(format!(
                "CREATE INDEX {} ON {table}({});",
                index_name(table, &column.name),
                column.name
            ))?;
        }
        Ok(())
    }

    /// Drops `column` from `table`, which still describes the table before
    /// the removal.
    pub fn remove_field(&mut self, table: &TableState, column: &Column) -> Result<()> {
        match self.dialect {
            Dialect::Postgres => self.run(format!(
                "ALTER TABLE {} DROP COLUMN {} CASCADE;",
                table.name, column.name
            )),
            // SQLite refuses DROP COLUMN on foreign key columns.
            Dialect::Sqlite if column.field.is_relation() => self.remake_table(table, &column.name),
            Dialect::Sqlite => {
                let indexes: Vec<String> = table
                    .indexes_on(&column.name)
                    .map(|index| index.name.clone())
                    .collect();
                for index in indexes {
                    self.run(format!("DROP INDEX IF EXISTS {index};"))?;
                }
                self.run(format!(
                    "ALTER TABLE {} DROP COLUMN {};",
                    table.name, column.name
                ))
            }
        }
    }

    /// Rebuilds `table` without `dropped`: create a copy carrying the
    /// surviving constraints, move the rows, swap it in, and restore the
    /// surviving indexes.
    fn remake_table(&mut self, table: &TableState, dropped: &str) -> Result<()> {
        let kept: Vec<&Column> = table.columns.iter().filter(|c| c.name != dropped).collect();
        let temp = format!("new__{}", table.name);

        let mut definitions: Vec<String> = kept.iter().map(|c| self.column_sql(c)).collect();
        for constraint in &table.constraints {
            if constraint.mentions(dropped) {
                continue;
            }
            definitions.push(match constraint {
                Constraint::Unique { columns } => format!("UNIQUE ({})", columns.join(", ")),
                Constraint::Check { expression } => format!("CHECK ({expression})"),
            });
        }
        self.run(format!(
            "CREATE TABLE {temp} ({});",
            definitions.join(", ")
        ))?;

        let names: Vec<&str> = kept.iter().map(|c| c.name.as_str()).collect();
        let names = names.join(", ");
        self.run(format!(
            "INSERT INTO {temp} ({names}) SELECT {names} FROM {};",
            table.name
        ))?;
        self.run(format!("DROP TABLE {};", table.name))?;
        self.run(format!("ALTER TABLE {temp} RENAME TO {};", table.name))?;

        for index in &table.indexes {
            if index.columns.iter().any(|c| c == dropped) {
                continue;
            }
            self.run(format!(
                "CREATE INDEX {} ON {}({});",
                index.name,
                table.name,
                index.columns.join(", ")
            ))?;
        }
        Ok(())
    }
}

/// Default values SQLite accepts without parentheses.
fn is_literal(raw: &str) -> bool {
    let raw = raw.trim();
    if raw.parse::<f64>().is_ok() {
        return true;
    }
    if raw.len() >= 2 && raw.starts_with('\'') && raw.ends_with('\'') {
        return !raw[1..raw.len() - 1].replace("''", "").contains('\'');
    }
    ["NULL", "TRUE", "FALSE", "CURRENT_TIME", "CURRENT_DATE", "CURRENT_TIMESTAMP"]
        .iter()
        .any(|keyword| raw.eq_ignore_ascii_case(keyword))
}
