//! Textual SQL dump and load
//!
//! The dump is a self-contained script: table definitions followed by their
//! rows, then indexes, wrapped in one transaction. Loading it into an empty
//! connection reproduces the database.

use rusqlite::types::ValueRef;
use rusqlite::Connection;
use snapsched_util::FsName;
use tracing::debug;

use crate::schema::REQUIRED_TABLES;
use crate::{StoreError, StoreResult};

/// Serialize schema and data of every user table.
pub fn dump_database(conn: &Connection) -> rusqlite::Result<String> {
    let mut out = String::from("BEGIN TRANSACTION;\n");

    let tables: Vec<(String, String)> = {
        let mut stmt = conn.prepare(
            "SELECT name, sql FROM sqlite_master \
             WHERE type = 'table' AND name NOT LIKE 'sqlite_%' AND sql NOT NULL \
             ORDER BY name",
        )?;
        let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?;
        rows.collect::<rusqlite::Result<_>>()?
    };

    for (name, create_sql) in &tables {
        out.push_str(create_sql);
        out.push_str(";\n");

        let table = quote_ident(name);
        let mut stmt = conn.prepare(&format!("SELECT * FROM {} ORDER BY rowid", table))?;
        let columns = stmt.column_count();
        let mut rows = stmt.query([])?;
        while let Some(row) = rows.next()? {
            let mut values = Vec::with_capacity(columns);
            for i in 0..columns {
                values.push(sql_literal(row.get_ref(i)?));
            }
            out.push_str(&format!("INSERT INTO {} VALUES({});\n", table, values.join(",")));
        }
    }

    let mut stmt = conn.prepare(
        "SELECT sql FROM sqlite_master \
         WHERE type IN ('index', 'trigger', 'view') AND sql NOT NULL \
         ORDER BY name",
    )?;
    let extras = stmt.query_map([], |row| row.get::<_, String>(0))?;
    for sql in extras {
        out.push_str(&sql?);
        out.push_str(";\n");
    }

    out.push_str("COMMIT;\n");
    Ok(out)
}

/// Execute a dump into an empty connection and check that the result is a
/// usable schedule database.
///
/// Any failure is corruption of `fs`'s persisted state.
pub(crate) fn load_database(conn: &Connection, fs: &FsName, sql: &str) -> StoreResult<()> {
    let corrupt = |message: String| StoreError::Corruption {
        fs: fs.clone(),
        message,
    };

    conn.execute_batch(sql).map_err(|e| corrupt(e.to_string()))?;

    if !conn.is_autocommit() {
        return Err(corrupt("dump ends inside an open transaction".into()));
    }

    for table in REQUIRED_TABLES {
        let present: i64 = conn
            .query_row(
                "SELECT count(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
                [table],
                |row| row.get(0),
            )
            .map_err(|e| corrupt(e.to_string()))?;
        if present == 0 {
            return Err(corrupt(format!("missing table '{}'", table)));
        }
    }

    let dangling: i64 = conn
        .query_row("SELECT count(*) FROM pragma_foreign_key_check", [], |row| {
            row.get(0)
        })
        .map_err(|e| corrupt(e.to_string()))?;
    if dangling > 0 {
        return Err(corrupt(format!("{} rules reference missing paths", dangling)));
    }

    debug!(fs = %fs, bytes = sql.len(), "Schedule database loaded");
    Ok(())
}

fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn sql_literal(value: ValueRef<'_>) -> String {
    match value {
        ValueRef::Null => "NULL".to_string(),
        ValueRef::Integer(i) => i.to_string(),
        ValueRef::Real(f) if f.is_infinite() => {
            let literal = if f > 0.0 { "9e999" } else { "-9e999" };
            literal.to_string()
        }
        ValueRef::Real(f) => format!("{:?}", f),
        ValueRef::Text(t) => format!("'{}'", String::from_utf8_lossy(t).replace('\'', "''")),
        ValueRef::Blob(b) => {
            let hex: String = b.iter().map(|byte| format!("{:02X}", byte)).collect();
            format!("X'{}'", hex)
        }
    }
}
