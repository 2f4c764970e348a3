pub mod audit;
pub mod bugs;
pub mod jobs;
pub mod metadata;
pub mod releases;
pub mod settings;
pub mod test_results;

use std::str::FromStr;
use std::time::Duration;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
pub use sqlx::SqlitePool;

const SCHEMA: &str = include_str!("schema.sql");

/// SQL expression stripping a `[param]` suffix from a test-name column.
/// Every metadata join and backfill matches on this normalized form so that
/// parameterized executions (`test_foo[Hub]`) find their `test_foo` metadata.
pub fn normalized_name_expr(column: &str) -> String {
    format!(
        "CASE WHEN INSTR({column}, '[') > 0 \
         THEN SUBSTR({column}, 1, INSTR({column}, '[') - 1) \
         ELSE {column} END"
    )
}

/// Open the application database, creating the file if needed.
pub async fn connect(url: &str) -> sqlx::Result<SqlitePool> {
    let options = SqliteConnectOptions::from_str(url)?
        .create_if_missing(true)
        .foreign_keys(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(Duration::from_secs(30));

    SqlitePoolOptions::new()
        .max_connections(8)
        .connect_with(options)
        .await
}

/// Apply the embedded schema. Idempotent; runs at startup in place of a
/// migration chain.
pub async fn apply_schema(pool: &SqlitePool) -> sqlx::Result<()> {
    for statement in SCHEMA.split(';') {
        let statement = statement.trim();
        if statement.is_empty() {
            continue;
        }
        sqlx::query(statement).execute(pool).await?;
    }
    Ok(())
}

/// An in-memory database with the schema applied. A single pooled connection,
/// since each `:memory:` connection is its own database.
pub async fn memory_pool() -> SqlitePool {
    let options = SqliteConnectOptions::from_str("sqlite::memory:")
        .unwrap()
        .foreign_keys(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(options)
        .await
        .expect("failed to open in-memory database");
    apply_schema(&pool).await.expect("failed to apply schema");
    pool
}
