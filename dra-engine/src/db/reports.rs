//! Report persistence
//!
//! One row per normalized domain. Writes are a single upsert statement, so a
//! reader sees either the previous report or the new one, never a mix.

use crate::models::{Category, NarrativeStatus, Report, ReportFilter};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dra_common::{Error, Result};
use sqlx::{sqlite::SqliteRow, Row, SqlitePool};
use std::collections::BTreeMap;

/// Durable report repository
#[async_trait]
pub trait ReportStore: Send + Sync {
    /// Insert or replace the report for `report.domain`
    async fn put(&self, report: &Report) -> Result<()>;

    async fn get(&self, domain: &str) -> Result<Option<Report>>;

    /// Reports matching `filter` whose domain contains `search`
    /// (case-insensitive), ordered by domain
    async fn list(&self, filter: ReportFilter, search: &str) -> Result<Vec<Report>>;
}

/// SQLite-backed [`ReportStore`]
#[derive(Clone)]
pub struct SqliteReportStore {
    pool: SqlitePool,
}

impl SqliteReportStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

const SELECT_COLUMNS: &str = r#"
    SELECT domain, has_snapshots, is_good, recommended, category, band,
           total_snapshots, years_covered, first_snapshot, last_snapshot,
           quality_score, avg_interval_days, max_gap_days, unique_versions,
           snapshots_per_year, long_live, availability_timestamp, timemap_count,
           narrative, narrative_status, analysis_ms, computed_at
    FROM reports
"#;

#[async_trait]
impl ReportStore for SqliteReportStore {
    async fn put(&self, report: &Report) -> Result<()> {
        // Prepare all values before touching the pool
        let per_year = serde_json::to_string(&report.snapshots_per_year)
            .map_err(|e| Error::Internal(format!("Failed to serialize snapshots_per_year: {}", e)))?;
        let first_snapshot = report.first_snapshot.map(|dt| dt.to_rfc3339());
        let last_snapshot = report.last_snapshot.map(|dt| dt.to_rfc3339());
        let availability_timestamp = report.availability_timestamp.map(|dt| dt.to_rfc3339());
        let computed_at = report.computed_at.to_rfc3339();

        sqlx::query(
            r#"
            INSERT INTO reports (
                domain, has_snapshots, is_good, recommended, category, band,
                total_snapshots, years_covered, first_snapshot, last_snapshot,
                quality_score, avg_interval_days, max_gap_days, unique_versions,
                snapshots_per_year, long_live, availability_timestamp, timemap_count,
                narrative, narrative_status, analysis_ms, computed_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(domain) DO UPDATE SET
                has_snapshots = excluded.has_snapshots,
                is_good = excluded.is_good,
                recommended = excluded.recommended,
                category = excluded.category,
                band = excluded.band,
                total_snapshots = excluded.total_snapshots,
                years_covered = excluded.years_covered,
                first_snapshot = excluded.first_snapshot,
                last_snapshot = excluded.last_snapshot,
                quality_score = excluded.quality_score,
                avg_interval_days = excluded.avg_interval_days,
                max_gap_days = excluded.max_gap_days,
                unique_versions = excluded.unique_versions,
                snapshots_per_year = excluded.snapshots_per_year,
                long_live = excluded.long_live,
                availability_timestamp = excluded.availability_timestamp,
                timemap_count = excluded.timemap_count,
                narrative = excluded.narrative,
                narrative_status = excluded.narrative_status,
                analysis_ms = excluded.analysis_ms,
                computed_at = excluded.computed_at
            "#,
        )
        .bind(&report.domain)
        .bind(report.has_snapshots)
        .bind(report.is_good)
        .bind(report.recommended)
        .bind(report.category.as_str())
        .bind(&report.band)
        .bind(report.total_snapshots as i64)
        .bind(report.years_covered as i64)
        .bind(&first_snapshot)
        .bind(&last_snapshot)
        .bind(report.quality_score)
        .bind(report.avg_interval_days)
        .bind(report.max_gap_days)
        .bind(report.unique_versions as i64)
        .bind(&per_year)
        .bind(report.long_live)
        .bind(&availability_timestamp)
        .bind(report.timemap_count.map(|n| n as i64))
        .bind(&report.narrative)
        .bind(report.narrative_status.as_str())
        .bind(report.analysis_ms as i64)
        .bind(&computed_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get(&self, domain: &str) -> Result<Option<Report>> {
        let query = format!("{} WHERE domain = ?", SELECT_COLUMNS);
        let row = sqlx::query(&query)
            .bind(domain)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(report_from_row).transpose()
    }

    async fn list(&self, filter: ReportFilter, search: &str) -> Result<Vec<Report>> {
        let search = search.trim().to_lowercase();
        let filter_clause = match filter {
            ReportFilter::All => "1 = 1",
            ReportFilter::Recommended => "recommended = 1",
            ReportFilter::LowQuality => "recommended = 0",
        };
        let query = format!(
            "{} WHERE {} AND (? = '' OR instr(lower(domain), ?) > 0) ORDER BY domain",
            SELECT_COLUMNS, filter_clause
        );

        let rows = sqlx::query(&query)
            .bind(&search)
            .bind(&search)
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(report_from_row).collect()
    }
}

fn parse_timestamp(column: &str, value: Option<String>) -> Result<Option<DateTime<Utc>>> {
    value
        .map(|raw| {
            DateTime::parse_from_rfc3339(&raw)
                .map(|dt| dt.with_timezone(&Utc))
                .map_err(|e| Error::Internal(format!("Failed to parse {}: {}", column, e)))
        })
        .transpose()
}

fn report_from_row(row: &SqliteRow) -> Result<Report> {
    let category: String = row.get("category");
    let category: Category = category.parse().map_err(Error::Internal)?;

    let narrative_status: String = row.get("narrative_status");
    let narrative_status: NarrativeStatus = narrative_status.parse().map_err(Error::Internal)?;

    let per_year: String = row.get("snapshots_per_year");
    let snapshots_per_year: BTreeMap<i32, u64> = serde_json::from_str(&per_year)
        .map_err(|e| Error::Internal(format!("Failed to deserialize snapshots_per_year: {}", e)))?;

    let computed_at: String = row.get("computed_at");
    let computed_at = parse_timestamp("computed_at", Some(computed_at))?
        .ok_or_else(|| Error::Internal("computed_at missing".to_string()))?;

    Ok(Report {
        domain: row.get("domain"),
        has_snapshots: row.get("has_snapshots"),
        is_good: row.get("is_good"),
        recommended: row.get("recommended"),
        category,
        band: row.get("band"),
        total_snapshots: row.get::<i64, _>("total_snapshots") as u64,
        years_covered: row.get::<i64, _>("years_covered") as u32,
        first_snapshot: parse_timestamp("first_snapshot", row.get("first_snapshot"))?,
        last_snapshot: parse_timestamp("last_snapshot", row.get("last_snapshot"))?,
        quality_score: row.get("quality_score"),
        avg_interval_days: row.get("avg_interval_days"),
        max_gap_days: row.get("max_gap_days"),
        unique_versions: row.get::<i64, _>("unique_versions") as u64,
        snapshots_per_year,
        long_live: row.get("long_live"),
        availability_timestamp: parse_timestamp(
            "availability_timestamp",
            row.get("availability_timestamp"),
        )?,
        timemap_count: row.get::<Option<i64>, _>("timemap_count").map(|n| n as u64),
        narrative: row.get("narrative"),
        narrative_status,
        analysis_ms: row.get::<i64, _>("analysis_ms") as u64,
        computed_at,
    })
}
