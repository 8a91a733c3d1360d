use std::collections::HashMap;
use std::path::Path;

use rusqlite::{Connection, params};
use tracing::info;
use zerver_common::{Error, Result};

use crate::recorder::MIGRATIONS_TABLE;
use crate::schema::{
    Column, ColumnDefault, Constraint, Field, FieldType, Index, OnDelete, SchemaState, TableState,
};

/// Opens a database file with write-ahead logging and foreign keys enforced.
pub fn open(db_path: &Path) -> Result<Connection> {
    info!("opening database at {}", db_path.display());
    let conn = Connection::open(db_path)
        .map_err(|e| Error::Database(format!("failed to open database: {e}")))?;

    conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")
        .map_err(|e| Error::Database(format!("failed to set pragmas: {e}")))?;
    Ok(conn)
}

pub fn open_in_memory() -> Result<Connection> {
    let conn = Connection::open_in_memory()
        .map_err(|e| Error::Database(format!("failed to open in-memory database: {e}")))?;

    conn.execute_batch("PRAGMA foreign_keys=ON;")
        .map_err(|e| Error::Database(format!("failed to set pragmas: {e}")))?;
    Ok(conn)
}

/// Toggles foreign key enforcement. Has no effect inside a transaction.
pub fn set_foreign_keys(conn: &Connection, enabled: bool) -> Result<()> {
    let value = if enabled { "ON" } else { "OFF" };
    conn.execute_batch(&format!("PRAGMA foreign_keys={value};"))
        .map_err(|e| Error::Database(format!("failed to set foreign_keys={value}: {e}")))
}

/// Fails if any row references a parent row that does not exist.
pub fn check_foreign_keys(conn: &Connection) -> Result<()> {
    let mut stmt = conn
        .prepare("PRAGMA foreign_key_check")
        .map_err(|e| Error::Database(format!("failed to prepare foreign key check: {e}")))?;
    let mut rows = stmt
        .query([])
        .map_err(|e| Error::Database(format!("failed to run foreign key check: {e}")))?;

    if let Some(row) = rows
        .next()
        .map_err(|e| Error::Database(format!("failed to read foreign key check: {e}")))?
    {
        let read_err = |e: rusqlite::Error| {
            Error::Database(format!("failed to read foreign key violation: {e}"))
        };
        let table: String = row.get(0).map_err(read_err)?;
        let rowid: Option<i64> = row.get(1).map_err(read_err)?;
        let parent: String = row.get(2).map_err(read_err)?;
        return Err(Error::Database(format!(
            "foreign key violation: row {} of {table} references a missing {parent} row",
            rowid.map_or_else(|| "?".to_string(), |r| r.to_string())
        )));
    }
    Ok(())
}

/// Reads the live schema of every user table.
pub fn introspect_schema(conn: &Connection) -> Result<SchemaState> {
    let mut stmt = conn
        .prepare(
            "SELECT name FROM sqlite_master
             WHERE type = 'table' AND name NOT LIKE 'sqlite_%' AND name != ?1
             ORDER BY name",
        )
        .map_err(|e| Error::Database(format!("failed to prepare table listing: {e}")))?;
    let names = stmt
        .query_map(params![MIGRATIONS_TABLE], |row| row.get::<_, String>(0))
        .map_err(|e| Error::Database(format!("failed to list tables: {e}")))?
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| Error::Database(format!("failed to read table name: {e}")))?;

    let mut state = SchemaState::new();
    for name in names {
        state.add_table(introspect_table(conn, &name)?);
    }
    Ok(state)
}

fn introspect_table(conn: &Connection, name: &str) -> Result<TableState> {
    let db_err = |e: rusqlite::Error| Error::Database(format!("failed to introspect {name}: {e}"));

    let mut foreign_keys: HashMap<String, (String, String)> = HashMap::new();
    let mut stmt = conn
        .prepare(r#"SELECT "from", "table", on_delete FROM pragma_foreign_key_list(?1)"#)
        .map_err(db_err)?;
    let rows = stmt
        .query_map(params![name], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?, row.get::<_, String>(2)?))
        })
        .map_err(db_err)?;
    for row in rows {
        let (from, to, on_delete) = row.map_err(db_err)?;
        foreign_keys.insert(from, (to, on_delete));
    }

    let mut table = TableState::empty(name);
    let mut stmt = conn
        .prepare(r#"SELECT name, type, "notnull", dflt_value, pk FROM pragma_table_info(?1) ORDER BY cid"#)
        .map_err(db_err)?;
    let rows = stmt
        .query_map(params![name], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, bool>(2)?,
                row.get::<_, Option<String>>(3)?,
                row.get::<_, i64>(4)? > 0,
            ))
        })
        .map_err(db_err)?;
    for row in rows {
        let (column, declared, not_null, default, primary_key) = row.map_err(db_err)?;
        let field_type = match foreign_keys.get(&column) {
            Some((to, on_delete)) => FieldType::ForeignKey {
                to: to.clone(),
                on_delete: OnDelete::from_sql(on_delete),
                related_name: None,
            },
            None => field_type_for(&declared, primary_key),
        };
        let default = default.map_or(ColumnDefault::None, |d| default_for(&field_type, d));
        let field = Field {
            null: !not_null && !primary_key,
            default,
            db_index: false,
            field_type,
        };
        table.columns.push(Column::new(column, field));
    }

    let mut stmt = conn
        .prepare("SELECT name FROM pragma_index_list(?1) WHERE origin = 'c' ORDER BY name")
        .map_err(db_err)?;
    let index_names = stmt
        .query_map(params![name], |row| row.get::<_, String>(0))
        .map_err(db_err)?
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(db_err)?;

    for index_name in index_names {
        let mut stmt = conn
            .prepare("SELECT name FROM pragma_index_info(?1) ORDER BY seqno")
            .map_err(db_err)?;
        let columns = stmt
            .query_map(params![index_name], |row| row.get::<_, String>(0))
            .map_err(db_err)?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(db_err)?;

        if let [only] = columns.as_slice() {
            if let Some(column) = table.columns.iter_mut().find(|c| &c.name == only) {
                column.field.db_index = true;
            }
        }
        table.indexes.push(Index {
            name: index_name,
            columns,
        });
    }

    // Automatic indexes backing UNIQUE clauses; recreated with the table.
    let mut stmt = conn
        .prepare("SELECT name FROM pragma_index_list(?1) WHERE origin = 'u' ORDER BY name")
        .map_err(db_err)?;
    let unique_indexes = stmt
        .query_map(params![name], |row| row.get::<_, String>(0))
        .map_err(db_err)?
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(db_err)?;
    for index_name in unique_indexes {
        let mut stmt = conn
            .prepare("SELECT name FROM pragma_index_info(?1) ORDER BY seqno")
            .map_err(db_err)?;
        let columns = stmt
            .query_map(params![index_name], |row| row.get::<_, String>(0))
            .map_err(db_err)?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(db_err)?;
        table.constraints.push(Constraint::Unique { columns });
    }

    let create_sql: Option<String> = conn
        .query_row(
            "SELECT sql FROM sqlite_master WHERE type = 'table' AND name = ?1",
            params![name],
            |row| row.get(0),
        )
        .map_err(db_err)?;
    if let Some(sql) = create_sql {
        table.constraints.extend(
            check_expressions(&sql)
                .into_iter()
                .map(|expression| Constraint::Check { expression }),
        );
    }

    Ok(table)
}

/// Extracts the body of every `CHECK (...)` clause in a `CREATE TABLE`
/// statement, skipping quoted text and identifiers.
fn check_expressions(sql: &str) -> Vec<String> {
    let bytes = sql.as_bytes();
    let mut found = Vec::new();
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'\'' | b'"' | b'`' => i = skip_quoted(bytes, i, bytes[i]),
            b'[' => i = skip_quoted(bytes, i, b']'),
            b if b.is_ascii_alphabetic() || b == b'_' => {
                let start = i;
                while i < bytes.len() && (bytes[i].is_ascii_alphanumeric() || bytes[i] == b'_') {
                    i += 1;
                }
                if !sql[start..i].eq_ignore_ascii_case("CHECK") {
                    continue;
                }
                let mut open = i;
                while open < bytes.len() && bytes[open].is_ascii_whitespace() {
                    open += 1;
                }
                if bytes.get(open) != Some(&b'(') {
                    continue;
                }
                if let Some(close) = matching_paren(bytes, open) {
                    found.push(sql[open + 1..close].trim().to_string());
                    i = close + 1;
                }
            }
            _ => i += 1,
        }
    }
    found
}

/// Index just past the quoted run starting at `start`. Doubled closing
/// quotes are escapes.
fn skip_quoted(bytes: &[u8], start: usize, close: u8) -> usize {
    let mut i = start + 1;
    while i < bytes.len() {
        if bytes[i] == close {
            if close != b']' && bytes.get(i + 1) == Some(&close) {
                i += 2;
                continue;
            }
            return i + 1;
        }
        i += 1;
    }
    bytes.len()
}

fn matching_paren(bytes: &[u8], open: usize) -> Option<usize> {
    let mut depth = 0usize;
    let mut i = open;
    while i < bytes.len() {
        match bytes[i] {
            b'\'' | b'"' | b'`' => {
                i = skip_quoted(bytes, i, bytes[i]);
                continue;
            }
            b'[' => {
                i = skip_quoted(bytes, i, b']');
                continue;
            }
            b'(' => depth += 1,
            b')' => {
                depth -= 1;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
        i += 1;
    }
    None
}

fn field_type_for(declared: &str, primary_key: bool) -> FieldType {
    match declared.to_ascii_uppercase().as_str() {
        "INTEGER" | "INT" | "BIGINT" if primary_key => FieldType::AutoField,
        "INTEGER" | "INT" | "BIGINT" => FieldType::Integer,
        "BOOLEAN" | "BOOL" => FieldType::Boolean,
        "TEXT" => FieldType::Text,
        _ => FieldType::Raw(declared.to_string()),
    }
}

fn default_for(field_type: &FieldType, raw: String) -> ColumnDefault {
    if *field_type == FieldType::Boolean {
        match raw.to_ascii_uppercase().as_str() {
            "1" | "TRUE" => return ColumnDefault::Bool(true),
            "0" | "FALSE" => return ColumnDefault::Bool(false),
            _ => {}
        }
    }
    match raw.parse::<i64>() {
        Ok(value) => ColumnDefault::Int(value),
        Err(_) => ColumnDefault::Raw(raw),
    }
}
