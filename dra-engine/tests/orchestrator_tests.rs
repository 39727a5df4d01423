//! Pipeline scheduling tests: de-duplication, caching, retry, admission,
//! cancellation and failure isolation

mod helpers;

use dra_engine::archive::SourceError;
use dra_engine::models::{Category, NarrativeStatus};
use dra_engine::AnalysisError;
use helpers::{harness, test_config, yearly_snapshots, FakeProvider, FakeSource};
use chrono::{TimeZone, Utc};
use std::time::{Duration, Instant};

#[tokio::test]
async fn test_single_analysis_produces_stored_report() {
    let h = harness(
        test_config(),
        FakeSource::new(yearly_snapshots(2010, 2023)),
        Some(FakeProvider::replying("  Long, steady history.  ")),
    )
    .await;

    let report = h.orchestrator.analyze("https://www.Example.com/about").await.unwrap();

    assert_eq!(report.domain, "example.com");
    assert_eq!(report.total_snapshots, 14);
    assert_eq!(report.years_covered, 14);
    assert!(report.has_snapshots);
    assert_eq!(report.narrative.as_deref(), Some("Long, steady history."));
    assert_eq!(report.narrative_status, NarrativeStatus::Generated);

    let stored = h.store.get("example.com").await.unwrap().unwrap();
    assert_eq!(stored, *report);
    assert_eq!(h.orchestrator.in_flight_count(), 0);
}

#[tokio::test]
async fn test_concurrent_callers_share_one_run() {
    let h = harness(
        test_config(),
        FakeSource::new(yearly_snapshots(2015, 2020)).with_delay(Duration::from_millis(100)),
        Some(FakeProvider::replying("shared")),
    )
    .await;

    let spellings = [
        "example.com",
        "EXAMPLE.COM",
        "www.example.com",
        "http://example.com/",
        "example.com.",
        "https://example.com:443/x?y=1",
    ];
    let tasks: Vec<_> = spellings
        .iter()
        .map(|domain| {
            let orchestrator = h.orchestrator.clone();
            let domain = domain.to_string();
            tokio::spawn(async move { orchestrator.analyze(&domain).await })
        })
        .collect();

    let mut reports = Vec::new();
    for task in tasks {
        reports.push(task.await.unwrap().unwrap());
    }

    assert_eq!(h.source.calls(), 1);
    assert_eq!(h.provider.as_ref().unwrap().calls(), 1);
    assert!(reports.iter().all(|r| **r == *reports[0]));
    assert_eq!(h.orchestrator.in_flight_count(), 0);
}

#[tokio::test]
async fn test_cached_result_reused_until_invalidated() {
    let h = harness(test_config(), FakeSource::new(yearly_snapshots(2018, 2020)), None).await;

    let first = h.orchestrator.analyze("example.com").await.unwrap();
    let second = h.orchestrator.analyze("www.example.com").await.unwrap();
    assert_eq!(h.source.calls(), 1);
    assert_eq!(first.computed_at, second.computed_at);

    assert!(h.orchestrator.invalidate("Example.com").unwrap());
    assert!(!h.orchestrator.invalidate("example.com").unwrap());

    h.orchestrator.analyze("example.com").await.unwrap();
    assert_eq!(h.source.calls(), 2);
}

#[tokio::test]
async fn test_transient_failures_retried_with_spacing() {
    let h = harness(
        test_config(),
        FakeSource::new(yearly_snapshots(2012, 2016)).failing_with(vec![
            SourceError::Transient("connection reset".into()),
            SourceError::RateLimited("429".into()),
        ]),
        None,
    )
    .await;

    let started = Instant::now();
    let report = h.orchestrator.analyze("example.com").await.unwrap();

    assert_eq!(report.total_snapshots, 5);
    assert_eq!(h.source.calls(), 3);
    // 20ms after the transient failure, 20ms + 10ms after the rate limit
    assert!(started.elapsed() >= Duration::from_millis(50));
}

#[tokio::test]
async fn test_retry_budget_exhausted_is_source_unavailable() {
    let h = harness(
        test_config(),
        FakeSource::new(yearly_snapshots(2012, 2016)).failing_with(vec![
            SourceError::Transient("503".into()),
            SourceError::Transient("503".into()),
            SourceError::Transient("503".into()),
        ]),
        None,
    )
    .await;

    let err = h.orchestrator.analyze("example.com").await.unwrap_err();

    assert!(matches!(err, AnalysisError::SourceUnavailable(_)));
    assert!(err.is_retryable());
    assert_eq!(h.source.calls(), 3);
    assert!(h.store.get("example.com").await.unwrap().is_none());
    assert!(h.orchestrator.cache().is_empty());
}

#[tokio::test]
async fn test_archive_rejection_is_not_retried() {
    let h = harness(
        test_config(),
        FakeSource::new(Vec::new()).rejecting("example.com"),
        None,
    )
    .await;

    let err = h.orchestrator.analyze("example.com").await.unwrap_err();

    assert!(matches!(err, AnalysisError::InvalidInput(_)));
    assert_eq!(h.source.calls(), 1);
}

#[tokio::test]
async fn test_malformed_domain_never_reaches_source() {
    let h = harness(test_config(), FakeSource::new(Vec::new()), None).await;

    for input in ["", "localhost", "not a domain", "bad..example.com"] {
        let err = h.orchestrator.analyze(input).await.unwrap_err();
        assert!(
            matches!(err, AnalysisError::InvalidInput(_)),
            "{:?} gave {:?}",
            input,
            err
        );
    }
    assert_eq!(h.source.calls(), 0);
}

#[tokio::test]
async fn test_unarchived_domain_yields_zero_report() {
    let h = harness(
        test_config(),
        FakeSource::new(Vec::new())
            .failing_with(vec![SourceError::NotFound("never-archived.test".into())]),
        None,
    )
    .await;

    let report = h.orchestrator.analyze("never-archived.test").await.unwrap();

    assert!(!report.has_snapshots);
    assert_eq!(report.total_snapshots, 0);
    assert_eq!(report.years_covered, 0);
    assert_eq!(report.quality_score, 0.0);
    assert_eq!(report.category, Category::LowQuality);
    assert!(!report.recommended);
    assert!(!report.is_good);
    assert!(report.first_snapshot.is_none());
    assert_eq!(report.narrative_status, NarrativeStatus::Disabled);
    assert_eq!(h.source.calls(), 1);
}

#[tokio::test]
async fn test_long_live_flag_does_not_override_score() {
    let mut config = test_config();
    config.scoring.long_live_domains = vec!["Kept-Forever.test".to_string()];
    let h = harness(
        config,
        FakeSource::new(Vec::new())
            .failing_with(vec![SourceError::NotFound("kept-forever.test".into())]),
        None,
    )
    .await;

    let listed = h.orchestrator.analyze("www.kept-forever.test").await.unwrap();
    assert!(listed.long_live);
    assert!(!listed.recommended);
    assert_eq!(listed.category, Category::LowQuality);
    assert_eq!(listed.quality_score, 0.0);

    let unlisted = h.orchestrator.analyze("other.test").await.unwrap();
    assert!(!unlisted.long_live);

    let stored = h.store.get("kept-forever.test").await.unwrap().unwrap();
    assert!(stored.long_live);
}

#[tokio::test]
async fn test_extended_metrics_recorded_when_enabled() {
    let captured = Utc.with_ymd_and_hms(2023, 6, 1, 12, 0, 0).unwrap();
    let source = || {
        FakeSource::new(yearly_snapshots(2010, 2023))
            .with_availability(Ok(Some(captured)))
            .with_timemap(Ok(Some(14)))
    };

    let mut config = test_config();
    config.archive.extended_metrics = true;
    let h = harness(config, source(), None).await;
    let report = h.orchestrator.analyze("example.com").await.unwrap();
    assert_eq!(report.availability_timestamp, Some(captured));
    assert_eq!(report.timemap_count, Some(14));
    assert_eq!(h.store.get("example.com").await.unwrap().unwrap(), *report);

    let disabled = harness(test_config(), source(), None).await;
    let report = disabled.orchestrator.analyze("example.com").await.unwrap();
    assert_eq!(report.availability_timestamp, None);
    assert_eq!(report.timemap_count, None);
}

#[tokio::test]
async fn test_failed_extended_lookup_leaves_report_intact() {
    let mut config = test_config();
    config.archive.extended_metrics = true;
    let h = harness(
        config,
        FakeSource::new(yearly_snapshots(2010, 2023))
            .with_availability(Err(SourceError::Transient("503".into())))
            .with_timemap(Ok(Some(9))),
        None,
    )
    .await;

    let report = h.orchestrator.analyze("example.com").await.unwrap();

    assert_eq!(report.availability_timestamp, None);
    assert_eq!(report.timemap_count, Some(9));
    assert_eq!(report.total_snapshots, 14);
    assert!(report.recommended);
}

#[tokio::test]
async fn test_narrative_failure_does_not_fail_analysis() {
    let h = harness(
        test_config(),
        FakeSource::new(yearly_snapshots(2005, 2024)),
        Some(FakeProvider::failing()),
    )
    .await;

    let report = h.orchestrator.analyze("example.com").await.unwrap();

    assert!(report.narrative.is_none());
    assert_eq!(report.narrative_status, NarrativeStatus::Unavailable);
    assert!(report.quality_score > 0.0);
    assert_eq!(h.provider.as_ref().unwrap().calls(), 1);

    let stored = h.store.get("example.com").await.unwrap().unwrap();
    assert_eq!(stored.narrative_status, NarrativeStatus::Unavailable);
}

#[tokio::test]
async fn test_overloaded_when_no_slot_within_admission_timeout() {
    let mut config = test_config();
    config.analysis.max_concurrent_analysis = 1;
    config.analysis.admission_timeout_ms = 50;
    let h = harness(
        config,
        FakeSource::new(yearly_snapshots(2019, 2020)).with_delay(Duration::from_millis(500)),
        None,
    )
    .await;

    let busy = {
        let orchestrator = h.orchestrator.clone();
        tokio::spawn(async move { orchestrator.analyze("busy.com").await })
    };
    tokio::time::sleep(Duration::from_millis(30)).await;
    assert_eq!(h.orchestrator.available_slots(), 0);

    let err = h.orchestrator.analyze("waiting.com").await.unwrap_err();
    assert_eq!(err, AnalysisError::Overloaded { retry_after_secs: 5 });
    assert!(err.is_retryable());

    assert!(busy.await.unwrap().is_ok());
    assert_eq!(h.source.calls(), 1);
    assert_eq!(h.orchestrator.available_slots(), 1);
}

#[tokio::test]
async fn test_queued_requests_run_within_ceiling() {
    let mut config = test_config();
    config.analysis.max_concurrent_analysis = 2;
    let h = harness(
        config,
        FakeSource::new(yearly_snapshots(2019, 2020)).with_delay(Duration::from_millis(80)),
        None,
    )
    .await;

    let domains: Vec<String> = (0..5).map(|i| format!("site{}.com", i)).collect();
    let started = Instant::now();
    let outcomes = h.orchestrator.analyze_batch(&domains).await;

    assert!(outcomes.iter().all(|(_, outcome)| outcome.is_ok()));
    assert_eq!(h.source.calls(), 5);
    assert_eq!(h.source.peak_concurrency(), 2);
    // Five runs through two slots need at least three rounds
    assert!(started.elapsed() >= Duration::from_millis(240));
}

#[tokio::test]
async fn test_store_failure_leaves_nothing_committed() {
    let h = harness(test_config(), FakeSource::new(yearly_snapshots(2010, 2012)), None).await;
    h.pool.close().await;

    let err = h.orchestrator.analyze("example.com").await.unwrap_err();

    assert!(matches!(err, AnalysisError::StoreFailure(_)));
    assert!(h.orchestrator.cache().get("example.com").is_none());
    assert_eq!(h.orchestrator.in_flight_count(), 0);
    assert_eq!(h.orchestrator.available_slots(), 5);
}

#[tokio::test]
async fn test_analysis_timeout_bounds_the_fetch() {
    let mut config = test_config();
    config.analysis.analysis_timeout_ms = 100;
    let h = harness(
        config,
        FakeSource::new(yearly_snapshots(2010, 2012)).with_delay(Duration::from_secs(1)),
        None,
    )
    .await;

    let started = Instant::now();
    let err = h.orchestrator.analyze("slow.com").await.unwrap_err();

    assert_eq!(err, AnalysisError::Timeout(100));
    assert!(started.elapsed() < Duration::from_millis(900));
    assert!(h.store.get("slow.com").await.unwrap().is_none());
}

#[tokio::test]
async fn test_dropping_every_caller_cancels_the_run() {
    let h = harness(
        test_config(),
        FakeSource::new(yearly_snapshots(2010, 2012)).with_delay(Duration::from_secs(10)),
        None,
    )
    .await;

    let task = {
        let orchestrator = h.orchestrator.clone();
        tokio::spawn(async move { orchestrator.analyze("example.com").await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(h.orchestrator.in_flight_count(), 1);
    assert_eq!(h.orchestrator.available_slots(), 4);
    assert_eq!(h.source.active(), 1);

    task.abort();
    assert!(task.await.unwrap_err().is_cancelled());

    assert_eq!(h.orchestrator.in_flight_count(), 0);
    assert_eq!(h.orchestrator.available_slots(), 5);
    assert_eq!(h.source.active(), 0);
    assert!(h.store.get("example.com").await.unwrap().is_none());
}

#[tokio::test]
async fn test_shutdown_cancels_in_flight_and_refuses_new_work() {
    let h = harness(
        test_config(),
        FakeSource::new(yearly_snapshots(2010, 2012)).with_delay(Duration::from_secs(10)),
        None,
    )
    .await;

    let task = {
        let orchestrator = h.orchestrator.clone();
        tokio::spawn(async move { orchestrator.analyze("example.com").await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;

    h.orchestrator.shutdown();
    assert!(h.shutdown.is_cancelled());

    assert_eq!(task.await.unwrap().unwrap_err(), AnalysisError::Cancelled);
    assert_eq!(
        h.orchestrator.analyze("other.com").await.unwrap_err(),
        AnalysisError::Cancelled
    );
    assert_eq!(h.orchestrator.in_flight_count(), 0);
}

#[tokio::test]
async fn test_batch_preserves_order_and_isolates_failures() {
    let h = harness(
        test_config(),
        FakeSource::new(yearly_snapshots(2016, 2021)).rejecting("bad.com"),
        None,
    )
    .await;

    let domains = vec![
        "good.com".to_string(),
        "bad.com".to_string(),
        "not a domain".to_string(),
        "www.good.com".to_string(),
    ];
    let outcomes = h.orchestrator.analyze_batch(&domains).await;

    let names: Vec<&str> = outcomes.iter().map(|(d, _)| d.as_str()).collect();
    assert_eq!(names, ["good.com", "bad.com", "not a domain", "www.good.com"]);
    assert!(outcomes[0].1.is_ok());
    assert!(matches!(outcomes[1].1, Err(AnalysisError::InvalidInput(_))));
    assert!(matches!(outcomes[2].1, Err(AnalysisError::InvalidInput(_))));
    assert_eq!(outcomes[3].1.as_ref().unwrap().domain, "good.com");

    // good.com once, bad.com once
    assert_eq!(h.source.calls(), 2);
}

#[tokio::test]
async fn test_updated_config_applies_to_next_run() {
    let h = harness(test_config(), FakeSource::new(yearly_snapshots(2010, 2023)), None).await;

    let before = h.orchestrator.analyze("example.com").await.unwrap();
    assert!(before.recommended);

    let mut config = test_config();
    config.scoring.recommend_threshold = 99.5;
    config.analysis.max_concurrent_analysis = 64;
    h.orchestrator
        .update_config(config, dra_engine::narrative::NarrativeSynthesizer::disabled());

    assert_eq!(h.orchestrator.config().scoring.recommend_threshold, 99.5);
    assert_eq!(h.orchestrator.config().analysis.max_concurrent_analysis, 5);

    h.orchestrator.invalidate("example.com").unwrap();
    let after = h.orchestrator.analyze("example.com").await.unwrap();
    assert!(!after.recommended);
    assert_eq!(after.category, Category::LowQuality);
}
