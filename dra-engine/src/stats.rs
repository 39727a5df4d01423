//! Dashboard rollups over stored reports

use crate::db::ReportStore;
use crate::models::{Category, DashboardStats, QualityDistribution, Report, ReportFilter};
use chrono::Datelike;
use dra_common::Result;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;

/// Computes [`DashboardStats`] from the report store
///
/// With a non-zero TTL the last rollup is reused until it expires; zero
/// recomputes on every call.
pub struct StatsAggregator {
    store: Arc<dyn ReportStore>,
    ttl: Duration,
    cached: Mutex<Option<(Instant, DashboardStats)>>,
}

impl StatsAggregator {
    pub fn new(store: Arc<dyn ReportStore>, ttl: Duration) -> Self {
        Self {
            store,
            ttl,
            cached: Mutex::new(None),
        }
    }

    pub async fn dashboard(&self) -> Result<DashboardStats> {
        if !self.ttl.is_zero() {
            let cached = self.cached.lock().unwrap_or_else(|e| e.into_inner());
            if let Some((computed_at, stats)) = cached.as_ref() {
                if computed_at.elapsed() < self.ttl {
                    return Ok(stats.clone());
                }
            }
        }

        let reports = self.store.list(ReportFilter::All, "").await?;
        let stats = rollup(&reports, dra_common::time::current_year());

        if !self.ttl.is_zero() {
            *self.cached.lock().unwrap_or_else(|e| e.into_inner()) =
                Some((Instant::now(), stats.clone()));
        }
        Ok(stats)
    }

    /// Drop the cached rollup (after a new report lands)
    pub fn invalidate(&self) {
        *self.cached.lock().unwrap_or_else(|e| e.into_inner()) = None;
    }
}

/// Pure rollup; `current_year` decides "recently active"
pub fn rollup(reports: &[Report], current_year: i32) -> DashboardStats {
    let mut stats = DashboardStats {
        total_domains: reports.len() as u64,
        ..DashboardStats::default()
    };

    for category in [Category::Recommended, Category::LowQuality] {
        stats.tier_histogram.insert(category.as_str().to_string(), 0);
    }

    for report in reports {
        if report.has_snapshots {
            stats.domains_with_snapshots += 1;
        }
        if report.is_good {
            stats.good_domains += 1;
        }
        if report.recommended {
            stats.recommended_domains += 1;
        }
        if report
            .last_snapshot
            .is_some_and(|last| last.year() == current_year)
        {
            stats.recently_active += 1;
        }
        if report.long_live {
            stats.long_live_domains += 1;
        }

        *stats
            .tier_histogram
            .entry(report.category.as_str().to_string())
            .or_default() += 1;
        if let Some(band) = &report.band {
            *stats.tier_histogram.entry(band.clone()).or_default() += 1;
        }
    }

    stats.quality_distribution = QualityDistribution {
        recommended: stats.recommended_domains,
        low_quality: stats.total_domains - stats.recommended_domains,
    };
    stats
}
