//! Database access for dra-engine
//!
//! Shares the SQLite file bootstrapped by `dra_common::db` and adds the
//! `reports` table.

pub mod reports;
pub mod settings;

pub use reports::{ReportStore, SqliteReportStore};

use dra_common::Result;
use sqlx::SqlitePool;
use std::path::Path;

/// Open (or create) the database and create all tables
pub async fn init_database_pool(db_path: &Path) -> Result<SqlitePool> {
    let pool = dra_common::db::init_database(db_path).await?;
    init_tables(&pool).await?;
    Ok(pool)
}

/// In-memory database with all tables (tests, ephemeral runs)
pub async fn init_in_memory_pool() -> Result<SqlitePool> {
    let pool = dra_common::db::init_in_memory().await?;
    init_tables(&pool).await?;
    Ok(pool)
}

/// Create engine-specific tables (idempotent)
async fn init_tables(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS reports (
            domain TEXT PRIMARY KEY,
            has_snapshots INTEGER NOT NULL,
            is_good INTEGER NOT NULL,
            recommended INTEGER NOT NULL,
            category TEXT NOT NULL,
            band TEXT,
            total_snapshots INTEGER NOT NULL,
            years_covered INTEGER NOT NULL,
            first_snapshot TEXT,
            last_snapshot TEXT,
            quality_score REAL NOT NULL,
            avg_interval_days REAL,
            max_gap_days INTEGER,
            unique_versions INTEGER NOT NULL DEFAULT 0,
            snapshots_per_year TEXT NOT NULL DEFAULT '{}',
            long_live INTEGER NOT NULL DEFAULT 0,
            availability_timestamp TEXT,
            timemap_count INTEGER,
            narrative TEXT,
            narrative_status TEXT NOT NULL,
            analysis_ms INTEGER NOT NULL DEFAULT 0,
            computed_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_reports_recommended ON reports(recommended)")
        .execute(pool)
        .await?;

    add_missing_report_columns(pool).await?;

    tracing::info!("Database tables initialized (reports)");

    Ok(())
}

/// Columns added after the first release; older databases gain them here
const LATER_REPORT_COLUMNS: &[(&str, &str)] = &[
    ("long_live", "INTEGER NOT NULL DEFAULT 0"),
    ("availability_timestamp", "TEXT"),
    ("timemap_count", "INTEGER"),
];

async fn add_missing_report_columns(pool: &SqlitePool) -> Result<()> {
    for &(column, definition) in LATER_REPORT_COLUMNS {
        let has_column: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM pragma_table_info('reports') WHERE name = ?")
                .bind(column)
                .fetch_one(pool)
                .await?;
        if has_column > 0 {
            continue;
        }

        sqlx::query(&format!("ALTER TABLE reports ADD COLUMN {} {}", column, definition))
            .execute(pool)
            .await?;
        tracing::info!("Added {} column to reports table", column);
    }
    Ok(())
}
