//! Quality scoring and classification
//!
//! Both stages are pure: the same timeline, configuration and `as_of`
//! instant always yield the same metrics and classification.
//!
//! **Score (0-100):**
//! ```text
//! count   = min(1, ln(1 + n) / ln(1 + count_saturation))
//! span    = min(1, years_covered / span_saturation_years)
//! recency = 1                                   if dormant <= grace
//!           max(0, 1 - (dormant - grace) / horizon)  otherwise
//! score   = count_weight*count + span_weight*span + recency_weight*recency
//! ```
//! where `dormant` is the number of years from the last capture to `as_of`.
//! An empty timeline scores 0.

use crate::config::ScoringConfig;
use crate::models::{Category, Classification, QualityMetrics, SnapshotTimeline};
use chrono::{DateTime, Datelike, Utc};
use dra_common::time::years_between;
use std::collections::{BTreeMap, HashSet};

/// Derive metrics and score from a timeline
pub fn score(timeline: &SnapshotTimeline, config: &ScoringConfig, as_of: DateTime<Utc>) -> QualityMetrics {
    let (Some(first), Some(last)) = (timeline.first(), timeline.last()) else {
        return QualityMetrics::zero();
    };
    let first = first.captured_at;
    let last = last.captured_at;

    let total = timeline.len() as u64;

    let mut snapshots_per_year: BTreeMap<i32, u64> = BTreeMap::new();
    for snapshot in timeline.snapshots() {
        *snapshots_per_year
            .entry(snapshot.captured_at.year())
            .or_default() += 1;
    }
    let years_covered = snapshots_per_year.len() as u32;

    let unique_versions = timeline
        .snapshots()
        .iter()
        .filter_map(|s| s.digest.as_deref())
        .collect::<HashSet<_>>()
        .len() as u64;

    let (avg_interval_days, max_gap_days) = if total >= 2 {
        let span_days = last.signed_duration_since(first).num_seconds() as f64 / 86_400.0;
        let max_gap = timeline
            .snapshots()
            .windows(2)
            .map(|pair| {
                pair[1]
                    .captured_at
                    .signed_duration_since(pair[0].captured_at)
                    .num_days()
            })
            .max()
            .unwrap_or(0);
        (Some(span_days / (total - 1) as f64), Some(max_gap))
    } else {
        (None, None)
    };

    let count_part = ((total as f64).ln_1p() / (config.count_saturation as f64).ln_1p()).min(1.0);
    let span_part = (years_covered as f64 / config.span_saturation_years).min(1.0);
    let recency_part = recency_factor(last, as_of, config);

    let raw = config.count_weight * count_part
        + config.span_weight * span_part
        + config.recency_weight * recency_part;

    QualityMetrics {
        total_snapshots: total,
        first_snapshot: Some(first),
        last_snapshot: Some(last),
        years_covered,
        score: round2(raw.clamp(0.0, 100.0)),
        avg_interval_days: avg_interval_days.map(round2),
        max_gap_days,
        unique_versions,
        snapshots_per_year,
        density: round2(total as f64 / years_covered as f64),
    }
}

/// 1.0 while the domain was captured within the grace period, decaying
/// linearly to 0.0 over the dormancy horizon
fn recency_factor(last: DateTime<Utc>, as_of: DateTime<Utc>, config: &ScoringConfig) -> f64 {
    let dormant = years_between(last, as_of).max(0.0);
    if dormant <= config.dormancy_grace_years {
        return 1.0;
    }
    (1.0 - (dormant - config.dormancy_grace_years) / config.dormancy_horizon_years).max(0.0)
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Map metrics onto the two-tier category and the optional band label
pub fn classify(metrics: &QualityMetrics, config: &ScoringConfig) -> Classification {
    let has_snapshots = metrics.total_snapshots > 0;
    let recommended = has_snapshots && metrics.score > config.recommend_threshold;

    let band = config
        .bands
        .iter()
        .filter(|band| metrics.score >= band.min_score)
        .max_by(|a, b| a.min_score.total_cmp(&b.min_score))
        .map(|band| band.label.clone());

    Classification {
        category: if recommended {
            Category::Recommended
        } else {
            Category::LowQuality
        },
        recommended,
        is_good: has_snapshots && metrics.score >= config.good_threshold,
        band,
    }
}
