//! Additive schema reconciliation for the `users` table.
//!
//! The expected shape is a declaration-ordered list of columns. At startup
//! the live table is introspected and every missing column is added with its
//! default; nothing is ever dropped or narrowed.

use std::collections::HashMap;

use lazy_static::lazy_static;
use regex::Regex;
use sqlx::{FromRow, SqlitePool};
use tracing::{debug, info, instrument};

pub const USERS_TABLE: &str = "users";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnDefault {
    Null,
    Text(&'static str),
    Integer(i64),
}

impl ColumnDefault {
    fn sql_literal(&self) -> String {
        match self {
            ColumnDefault::Null => "NULL".to_string(),
            ColumnDefault::Text(s) => format!("'{}'", s.replace('\'', "''")),
            ColumnDefault::Integer(i) => i.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColumnSpec {
    pub name: &'static str,
    pub sql_type: &'static str,
    pub not_null: bool,
    pub default: ColumnDefault,
}

impl ColumnSpec {
    pub const fn text(name: &'static str) -> Self {
        Self {
            name,
            sql_type: "TEXT",
            not_null: true,
            default: ColumnDefault::Text(""),
        }
    }

    fn add_column_sql(&self, table: &str) -> String {
        let mut sql = format!(
            "ALTER TABLE {table} ADD COLUMN {} {}",
            self.name, self.sql_type
        );
        // SQLite only accepts NOT NULL on ADD COLUMN with a non-null default.
        if self.not_null && self.default != ColumnDefault::Null {
            sql.push_str(" NOT NULL");
        }
        sql.push_str(" DEFAULT ");
        sql.push_str(&self.default.sql_literal());
        sql
    }
}

/// Columns the credential queries rely on. They are never added by the
/// migrator; a table without them is rejected.
pub const USER_BASE_COLUMNS: &[(&str, &str)] = &[
    ("id", "INTEGER"),
    ("username", "TEXT"),
    ("password_hash", "TEXT"),
    ("created_at", "TEXT"),
];

/// Profile columns, in the order they were introduced.
pub const USER_PROFILE_COLUMNS: &[ColumnSpec] = &[
    ColumnSpec::text("first_name"),
    ColumnSpec::text("last_name"),
    ColumnSpec::text("email"),
    ColumnSpec::text("job_title"),
    ColumnSpec::text("favorite_service"),
    ColumnSpec::text("region"),
    ColumnSpec::text("instance_type"),
    ColumnSpec::text("bio"),
];

const CREATE_USERS_TABLE: &str = r#"
    CREATE TABLE IF NOT EXISTS users (
        id            INTEGER PRIMARY KEY AUTOINCREMENT,
        username      TEXT NOT NULL UNIQUE,
        password_hash TEXT NOT NULL CHECK (length(password_hash) > 0),
        created_at    TEXT NOT NULL
    )
"#;

#[derive(Debug, thiserror::Error)]
pub enum MigrationError {
    #[error("store error during migration: {0}")]
    Store(#[from] sqlx::Error),
    #[error("table `{0}` does not exist")]
    MissingTable(String),
    #[error("required column `{0}` is missing")]
    MissingColumn(String),
    #[error("invalid identifier `{0}`")]
    InvalidIdentifier(String),
    #[error("column `{column}` exists as {found}, expected {expected}")]
    TypeConflict {
        column: String,
        expected: String,
        found: String,
    },
    #[error("adding column `{column}` was rejected: {source}")]
    Rejected {
        column: String,
        #[source]
        source: sqlx::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct LiveColumn {
    pub name: String,
    #[sqlx(rename = "type")]
    pub sql_type: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationReport {
    pub table: String,
    pub added: Vec<String>,
}

impl MigrationReport {
    pub fn is_noop(&self) -> bool {
        self.added.is_empty()
    }
}

fn check_identifier(ident: &str) -> Result<(), MigrationError> {
    lazy_static! {
        static ref IDENT_RE: Regex = Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").unwrap();
    }
    if IDENT_RE.is_match(ident) {
        Ok(())
    } else {
        Err(MigrationError::InvalidIdentifier(ident.to_string()))
    }
}

pub async fn live_columns(db: &SqlitePool, table: &str) -> Result<Vec<LiveColumn>, MigrationError> {
    check_identifier(table)?;
    let cols = sqlx::query_as::<_, LiveColumn>(
        r#"SELECT name, type FROM pragma_table_info(?1) ORDER BY cid"#,
    )
    .bind(table)
    .fetch_all(db)
    .await?;
    Ok(cols)
}

/// Columns of `expected` missing from `live`, in declaration order.
pub fn plan<'a>(
    expected: &'a [ColumnSpec],
    live: &[LiveColumn],
) -> Result<Vec<&'a ColumnSpec>, MigrationError> {
    let live_by_name: HashMap<&str, &str> = live
        .iter()
        .map(|c| (c.name.as_str(), c.sql_type.as_str()))
        .collect();

    let mut missing = Vec::new();
    for spec in expected {
        check_identifier(spec.name)?;
        match live_by_name.get(spec.name) {
            Some(found) if !found.eq_ignore_ascii_case(spec.sql_type) => {
                return Err(MigrationError::TypeConflict {
                    column: spec.name.to_string(),
                    expected: spec.sql_type.to_string(),
                    found: found.to_string(),
                });
            }
            Some(_) => {}
            None => missing.push(spec),
        }
    }
    Ok(missing)
}

/// Fail unless every `(name, type)` in `required` is present in `live`.
pub fn require_columns(required: &[(&str, &str)], live: &[LiveColumn]) -> Result<(), MigrationError> {
    for (name, sql_type) in required {
        match live.iter().find(|c| c.name == *name) {
            None => return Err(MigrationError::MissingColumn(name.to_string())),
            Some(c) if !c.sql_type.eq_ignore_ascii_case(sql_type) => {
                return Err(MigrationError::TypeConflict {
                    column: name.to_string(),
                    expected: sql_type.to_string(),
                    found: c.sql_type.clone(),
                });
            }
            Some(_) => {}
        }
    }
    Ok(())
}

/// Add every column of `expected` that `table` lacks. Running it again with the
/// same input is a no-op.
#[instrument(skip(db, expected), fields(columns = expected.len()))]
pub async fn ensure_schema(
    db: &SqlitePool,
    table: &str,
    expected: &[ColumnSpec],
) -> Result<MigrationReport, MigrationError> {
    let live = live_columns(db, table).await?;
    if live.is_empty() {
        return Err(MigrationError::MissingTable(table.to_string()));
    }

    let missing = plan(expected, &live)?;
    if missing.is_empty() {
        debug!(table, "schema up to date");
        return Ok(MigrationReport {
            table: table.to_string(),
            added: Vec::new(),
        });
    }

    let mut tx = db.begin().await?;
    let mut added = Vec::with_capacity(missing.len());
    for spec in missing {
        sqlx::query(&spec.add_column_sql(table))
            .execute(&mut *tx)
            .await
            .map_err(|source| MigrationError::Rejected {
                column: spec.name.to_string(),
                source,
            })?;
        info!(table, column = spec.name, sql_type = spec.sql_type, "added column");
        added.push(spec.name.to_string());
    }
    tx.commit().await?;

    Ok(MigrationReport {
        table: table.to_string(),
        added,
    })
}

/// Create the base `users` table if needed and bring it up to the current shape.
pub async fn init_store(db: &SqlitePool) -> Result<MigrationReport, MigrationError> {
    sqlx::query(CREATE_USERS_TABLE).execute(db).await?;
    require_columns(USER_BASE_COLUMNS, &live_columns(db, USERS_TABLE).await?)?;
    ensure_schema(db, USERS_TABLE, USER_PROFILE_COLUMNS).await
}
