//! Database bootstrap and shared tables
//!
//! Opens (or creates) the SQLite database and creates the tables shared by
//! every DropAnalyzer component: `settings` (key/value) and `users`.
//! Component-specific tables are created by the owning crate.

use crate::{Error, Result};
use sqlx::{sqlite::SqlitePoolOptions, Row, SqlitePool};
use std::path::Path;
use tracing::info;
use uuid::Uuid;

/// Open or create the database file and create shared tables
pub async fn init_database(db_path: &Path) -> Result<SqlitePool> {
    let newly_created = !db_path.exists();

    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let db_url = format!("sqlite://{}?mode=rwc", db_path.display());
    let pool = SqlitePoolOptions::new()
        .max_connections(10)
        .connect(&db_url)
        .await?;

    if newly_created {
        info!("Initialized new database: {}", db_path.display());
    } else {
        info!("Opened existing database: {}", db_path.display());
    }

    // WAL lets report listings read while an analysis upserts
    sqlx::query("PRAGMA journal_mode = WAL")
        .execute(&pool)
        .await?;
    sqlx::query("PRAGMA busy_timeout = 5000")
        .execute(&pool)
        .await?;

    create_shared_tables(&pool).await?;
    Ok(pool)
}

/// Single-connection in-memory database with shared tables
///
/// An in-memory SQLite database is private to its connection, so the pool
/// is capped at one connection.
pub async fn init_in_memory() -> Result<SqlitePool> {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await?;
    create_shared_tables(&pool).await?;
    Ok(pool)
}

/// Create `settings` and `users` tables (idempotent)
pub async fn create_shared_tables(pool: &SqlitePool) -> Result<()> {
    create_settings_table(pool).await?;
    create_users_table(pool).await?;
    Ok(())
}

/// Create the settings table
///
/// Stores application configuration key-value pairs.
pub async fn create_settings_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS settings (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL,
            updated_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;
    Ok(())
}

async fn create_users_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS users (
            guid TEXT PRIMARY KEY,
            username TEXT NOT NULL UNIQUE,
            password_hash TEXT NOT NULL,
            password_salt TEXT NOT NULL,
            created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;
    Ok(())
}

/// Read a raw setting value
pub async fn get_setting(pool: &SqlitePool, key: &str) -> Result<Option<String>> {
    let row: Option<(String,)> = sqlx::query_as("SELECT value FROM settings WHERE key = ?")
        .bind(key)
        .fetch_optional(pool)
        .await?;
    Ok(row.map(|(value,)| value))
}

/// Insert or replace a setting value
pub async fn set_setting(pool: &SqlitePool, key: &str, value: impl ToString) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO settings (key, value, updated_at) VALUES (?, ?, CURRENT_TIMESTAMP)
        ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at
        "#,
    )
    .bind(key)
    .bind(value.to_string())
    .execute(pool)
    .await?;
    Ok(())
}

/// Stored credential for one user
#[derive(Debug, Clone)]
pub struct UserRecord {
    pub guid: Uuid,
    pub username: String,
    pub password_hash: String,
    pub password_salt: String,
}

/// Look up a user by name
pub async fn find_user(pool: &SqlitePool, username: &str) -> Result<Option<UserRecord>> {
    let row = sqlx::query(
        "SELECT guid, username, password_hash, password_salt FROM users WHERE username = ?",
    )
    .bind(username)
    .fetch_optional(pool)
    .await?;

    match row {
        Some(row) => {
            let guid: String = row.get("guid");
            let guid = Uuid::parse_str(&guid)
                .map_err(|e| Error::Internal(format!("Corrupt user guid: {}", e)))?;
            Ok(Some(UserRecord {
                guid,
                username: row.get("username"),
                password_hash: row.get("password_hash"),
                password_salt: row.get("password_salt"),
            }))
        }
        None => Ok(None),
    }
}

/// Insert a user with an already-hashed password
pub async fn insert_user(
    pool: &SqlitePool,
    username: &str,
    password_hash: &str,
    password_salt: &str,
) -> Result<Uuid> {
    let guid = Uuid::new_v4();
    sqlx::query(
        "INSERT INTO users (guid, username, password_hash, password_salt) VALUES (?, ?, ?, ?)",
    )
    .bind(guid.to_string())
    .bind(username)
    .bind(password_hash)
    .bind(password_salt)
    .execute(pool)
    .await?;
    Ok(guid)
}

/// Number of registered users
pub async fn count_users(pool: &SqlitePool) -> Result<i64> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM users")
        .fetch_one(pool)
        .await?;
    Ok(count)
}
