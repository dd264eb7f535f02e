use std::path::PathBuf;

use rusqlite::types::ValueRef;
use rusqlite::{Connection, OpenFlags};
use schemars::{JsonSchema, schema_for};
use serde::Deserialize;
use serde_json::Value;
use thoughtloop_core::tool::{Error as ToolError, Tool, ToolResult};

const MAX_ROWS: usize = 20;
const ALLOWED_STATEMENTS: &[&str] = &["select", "with", "pragma"];

#[derive(Deserialize, JsonSchema)]
pub struct SqlQueryParameters {
    #[schemars(description = "実行するSQLクエリ (SELECTのみ)")]
    query: String,
}

/// A tool for running read-only queries against a SQLite database.
pub struct SqlQueryTool {
    db_path: PathBuf,
    parameter_schema: Value,
}

impl SqlQueryTool {
    /// Creates a tool querying the database at `db_path`.
    pub fn new(db_path: impl Into<PathBuf>) -> Self {
        SqlQueryTool {
            db_path: db_path.into(),
            parameter_schema: schema_for!(SqlQueryParameters).to_value(),
        }
    }
}

impl Tool for SqlQueryTool {
    type Input = SqlQueryParameters;

    fn name(&self) -> &str {
        "sql_query"
    }

    fn description(&self) -> &str {
        "SQLiteデータベースに読み取り専用のクエリを実行するツール。入力はSQL文。"
    }

    fn parameter_schema(&self) -> &Value {
        &self.parameter_schema
    }

    #[allow(clippy::manual_async_fn)]
    fn execute(
        &self,
        input: SqlQueryParameters,
    ) -> impl Future<Output = ToolResult> + Send + 'static {
        let db_path = self.db_path.clone();
        async move {
            let query = input.query.trim().trim_end_matches(';').to_owned();
            if !is_read_only(&query) {
                return Err(ToolError::invalid_input()
                    .with_reason("only SELECT, WITH and PRAGMA statements are allowed"));
            }
            debug!("running query on {}: {query}", db_path.display());
            tokio::task::spawn_blocking(move || run_query(&db_path, &query))
                .await
                .map_err(|err| {
                    ToolError::execution_error()
                        .with_reason(format!("query database: {err}"))
                })?
                .map_err(|err| {
                    ToolError::execution_error()
                        .with_reason(format!("query database: {err}"))
                })
        }
    }
}

fn is_read_only(query: &str) -> bool {
    let keyword = query
        .split(|c: char| c.is_whitespace() || c == '(')
        .next()
        .unwrap_or_default()
        .to_ascii_lowercase();
    ALLOWED_STATEMENTS.contains(&keyword.as_str()) && !query.contains(';')
}

fn run_query(
    db_path: &std::path::Path,
    query: &str,
) -> Result<String, rusqlite::Error> {
    let conn = Connection::open_with_flags(
        db_path,
        OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )?;
    let mut stmt = conn.prepare(query)?;
    let columns: Vec<String> =
        stmt.column_names().iter().map(|name| name.to_string()).collect();
    let column_count = columns.len();

    let mut lines = vec![columns.join(" | ")];
    let mut rows = stmt.query([])?;
    let mut truncated = false;
    while let Some(row) = rows.next()? {
        if lines.len() > MAX_ROWS {
            truncated = true;
            break;
        }
        let mut cells = Vec::with_capacity(column_count);
        for idx in 0..column_count {
            cells.push(format_value(row.get_ref(idx)?));
        }
        lines.push(cells.join(" | "));
    }

    if lines.len() == 1 {
        lines.push("(no rows)".to_owned());
    } else if truncated {
        lines.push(format!("... (showing first {MAX_ROWS} rows)"));
    }
    Ok(lines.join("\n"))
}

fn format_value(value: ValueRef<'_>) -> String {
    match value {
        ValueRef::Null => "NULL".to_owned(),
        ValueRef::Integer(i) => i.to_string(),
        ValueRef::Real(f) => f.to_string(),
        ValueRef::Text(text) => String::from_utf8_lossy(text).into_owned(),
        ValueRef::Blob(blob) => format!("<{} bytes>", blob.len()),
    }
}
