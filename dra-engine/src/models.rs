//! Core data model: snapshot timelines, metrics, reports and rollups

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::str::FromStr;

/// One archived capture of a domain
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    /// Capture instant
    pub captured_at: DateTime<Utc>,
    /// HTTP status recorded by the archive, when known
    pub status_code: Option<u16>,
    /// Content digest; identical digests mean identical page content
    pub digest: Option<String>,
}

impl Snapshot {
    pub fn at(captured_at: DateTime<Utc>) -> Self {
        Self {
            captured_at,
            status_code: None,
            digest: None,
        }
    }
}

/// Ordered capture history of one domain
///
/// Immutable once built; snapshots are always sorted by capture time.
#[derive(Debug, Clone, PartialEq)]
pub struct SnapshotTimeline {
    domain: String,
    snapshots: Vec<Snapshot>,
}

impl SnapshotTimeline {
    pub fn new(domain: impl Into<String>, mut snapshots: Vec<Snapshot>) -> Self {
        snapshots.sort_by_key(|s| s.captured_at);
        Self {
            domain: domain.into(),
            snapshots,
        }
    }

    /// Timeline of a domain the archive has never captured
    pub fn empty(domain: impl Into<String>) -> Self {
        Self::new(domain, Vec::new())
    }

    pub fn domain(&self) -> &str {
        &self.domain
    }

    pub fn snapshots(&self) -> &[Snapshot] {
        &self.snapshots
    }

    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }

    pub fn first(&self) -> Option<&Snapshot> {
        self.snapshots.first()
    }

    pub fn last(&self) -> Option<&Snapshot> {
        self.snapshots.last()
    }
}

/// Metrics derived from a [`SnapshotTimeline`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityMetrics {
    pub total_snapshots: u64,
    pub first_snapshot: Option<DateTime<Utc>>,
    pub last_snapshot: Option<DateTime<Utc>>,
    /// Distinct calendar years containing at least one capture
    pub years_covered: u32,
    /// 0-100
    pub score: f64,
    /// Mean days between consecutive captures (None below two captures)
    pub avg_interval_days: Option<f64>,
    /// Longest gap between consecutive captures in days
    pub max_gap_days: Option<i64>,
    /// Distinct content digests
    pub unique_versions: u64,
    pub snapshots_per_year: BTreeMap<i32, u64>,
    /// Captures per covered year
    pub density: f64,
}

impl QualityMetrics {
    /// Metrics of an empty timeline
    pub fn zero() -> Self {
        Self {
            total_snapshots: 0,
            first_snapshot: None,
            last_snapshot: None,
            years_covered: 0,
            score: 0.0,
            avg_interval_days: None,
            max_gap_days: None,
            unique_versions: 0,
            snapshots_per_year: BTreeMap::new(),
            density: 0.0,
        }
    }
}

/// Two-tier quality category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Category {
    Recommended,
    LowQuality,
}

impl Category {
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Recommended => "Recommended",
            Category::LowQuality => "LowQuality",
        }
    }
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Recommended" => Ok(Category::Recommended),
            "LowQuality" | "Low Quality" => Ok(Category::LowQuality),
            other => Err(format!("Unknown category: {}", other)),
        }
    }
}

/// Classifier output
#[derive(Debug, Clone, PartialEq)]
pub struct Classification {
    pub category: Category,
    pub recommended: bool,
    pub is_good: bool,
    /// Optional finer-grained label from configured score bands
    pub band: Option<String>,
}

/// Outcome of the best-effort narrative stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NarrativeStatus {
    /// Narrative present
    Generated,
    /// Language model not configured
    Disabled,
    /// Synthesis failed or timed out; report is otherwise complete
    Unavailable,
}

impl NarrativeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            NarrativeStatus::Generated => "generated",
            NarrativeStatus::Disabled => "disabled",
            NarrativeStatus::Unavailable => "unavailable",
        }
    }
}

impl FromStr for NarrativeStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "generated" => Ok(NarrativeStatus::Generated),
            "disabled" => Ok(NarrativeStatus::Disabled),
            "unavailable" => Ok(NarrativeStatus::Unavailable),
            other => Err(format!("Unknown narrative status: {}", other)),
        }
    }
}

/// Archive lookups beyond the capture index; each is `None` when skipped
/// or failed
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExtendedMetrics {
    /// Closest capture reported by the availability API
    pub availability_timestamp: Option<DateTime<Utc>>,
    /// Mementos listed in the timemap
    pub timemap_count: Option<u64>,
}

/// Persisted analysis result, one per normalized domain
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Report {
    pub domain: String,
    pub has_snapshots: bool,
    pub is_good: bool,
    pub recommended: bool,
    pub category: Category,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub band: Option<String>,
    pub total_snapshots: u64,
    pub years_covered: u32,
    pub first_snapshot: Option<DateTime<Utc>>,
    pub last_snapshot: Option<DateTime<Utc>>,
    pub quality_score: f64,
    pub avg_interval_days: Option<f64>,
    pub max_gap_days: Option<i64>,
    pub unique_versions: u64,
    pub snapshots_per_year: BTreeMap<i32, u64>,
    /// On the operator's long-live list; informational, never changes `recommended`
    #[serde(default)]
    pub long_live: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub availability_timestamp: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timemap_count: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub narrative: Option<String>,
    pub narrative_status: NarrativeStatus,
    pub analysis_ms: u64,
    pub computed_at: DateTime<Utc>,
}

impl Report {
    /// Assemble a report from pipeline outputs
    pub fn assemble(
        domain: impl Into<String>,
        metrics: QualityMetrics,
        classification: Classification,
        narrative: Option<String>,
        narrative_status: NarrativeStatus,
        analysis_ms: u64,
        computed_at: DateTime<Utc>,
    ) -> Self {
        Self {
            domain: domain.into(),
            has_snapshots: metrics.total_snapshots > 0,
            is_good: classification.is_good,
            recommended: classification.recommended,
            category: classification.category,
            band: classification.band,
            total_snapshots: metrics.total_snapshots,
            years_covered: metrics.years_covered,
            first_snapshot: metrics.first_snapshot,
            last_snapshot: metrics.last_snapshot,
            quality_score: metrics.score,
            avg_interval_days: metrics.avg_interval_days,
            max_gap_days: metrics.max_gap_days,
            unique_versions: metrics.unique_versions,
            snapshots_per_year: metrics.snapshots_per_year,
            long_live: false,
            availability_timestamp: None,
            timemap_count: None,
            narrative,
            narrative_status,
            analysis_ms,
            computed_at,
        }
    }

    /// Attach the long-live flag and extended archive lookups
    pub fn with_extensions(mut self, long_live: bool, extended: ExtendedMetrics) -> Self {
        self.long_live = long_live;
        self.availability_timestamp = extended.availability_timestamp;
        self.timemap_count = extended.timemap_count;
        self
    }
}

/// Report listing filter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportFilter {
    #[default]
    All,
    Recommended,
    LowQuality,
}

impl ReportFilter {
    pub fn matches(&self, report: &Report) -> bool {
        match self {
            ReportFilter::All => true,
            ReportFilter::Recommended => report.recommended,
            ReportFilter::LowQuality => !report.recommended,
        }
    }
}

impl FromStr for ReportFilter {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "" | "all" => Ok(ReportFilter::All),
            "recommended" => Ok(ReportFilter::Recommended),
            "low_quality" => Ok(ReportFilter::LowQuality),
            other => Err(format!(
                "Unknown filter '{}' (expected all, recommended or low_quality)",
                other
            )),
        }
    }
}

/// Two-bucket distribution shown on the dashboard
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QualityDistribution {
    pub recommended: u64,
    pub low_quality: u64,
}

/// Dashboard rollup over all stored reports
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DashboardStats {
    pub total_domains: u64,
    pub domains_with_snapshots: u64,
    pub good_domains: u64,
    pub recommended_domains: u64,
    /// Domains whose last capture falls in the current calendar year
    pub recently_active: u64,
    /// Reports flagged `long_live`
    pub long_live_domains: u64,
    pub quality_distribution: QualityDistribution,
    /// Count per category label, plus per band label when bands are configured
    pub tier_histogram: BTreeMap<String, u64>,
}
