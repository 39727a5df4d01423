//! Analysis orchestrator
//!
//! Drives one domain through fetch → score → classify → narrative →
//! persist → cache, under a global concurrency ceiling.
//!
//! **Per-request flow:**
//! 1. Normalize the domain (all keying uses the normalized form)
//! 2. Under the in-flight lock: return a live cache entry, or attach to the
//!    run already in flight for the key, or register a new run
//! 3. A new run waits (FIFO) for a concurrency slot, failing with
//!    `Overloaded` once the admission timeout elapses
//! 4. Fetch with retry, bounded by the analysis timeout; a domain the
//!    archive has never seen yields an empty timeline. When enabled, the
//!    availability and timemap lookups follow (best-effort)
//! 5. Best-effort narrative
//! 6. Persist, populate the cache, then release the in-flight entry and the
//!    slot (in that order)
//!
//! A run is a shared future owned by its callers. When every caller has
//! gone away the future is dropped, which cancels outstanding I/O and
//! releases the in-flight entry and slot through their guards. Shutdown
//! cancels every run with `Cancelled`. Nothing is persisted unless the whole
//! pipeline succeeded.

use crate::archive::{SnapshotSource, SourceError};
use crate::cache::ResultCache;
use crate::config::EngineConfig;
use crate::db::ReportStore;
use crate::error::AnalysisError;
use crate::models::{ExtendedMetrics, NarrativeStatus, Report, SnapshotTimeline};
use crate::narrative::NarrativeSynthesizer;
use crate::retry::RetryPolicy;
use crate::scoring;
use chrono::Utc;
use dra_common::normalize_domain;
use futures::future::{BoxFuture, FutureExt, Shared, WeakShared};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use std::time::{Duration, Instant};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

type RunOutput = Result<Arc<Report>, AnalysisError>;
type RunFuture = BoxFuture<'static, RunOutput>;

/// Registered run for one key
struct InFlightRun {
    id: u64,
    run: WeakShared<RunFuture>,
}

/// Removes the key's in-flight entry when the run ends, however it ends
struct InFlightGuard {
    inner: Arc<Inner>,
    key: String,
    id: u64,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        let mut in_flight = self.inner.lock_in_flight();
        if in_flight.get(&self.key).is_some_and(|run| run.id == self.id) {
            in_flight.remove(&self.key);
        }
    }
}

/// Resources held by an admitted run
///
/// Fields drop in declaration order: the in-flight entry goes first, then
/// the concurrency slot.
struct RunLease {
    _token: InFlightGuard,
    _slot: OwnedSemaphorePermit,
}

struct Inner {
    config: RwLock<Arc<EngineConfig>>,
    narrator: RwLock<Arc<NarrativeSynthesizer>>,
    source: Arc<dyn SnapshotSource>,
    store: Arc<dyn ReportStore>,
    cache: Arc<ResultCache>,
    slots: Arc<Semaphore>,
    max_slots: usize,
    in_flight: Mutex<HashMap<String, InFlightRun>>,
    next_run_id: AtomicU64,
    shutdown: CancellationToken,
}

impl Inner {
    fn lock_in_flight(&self) -> MutexGuard<'_, HashMap<String, InFlightRun>> {
        self.in_flight.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn config(&self) -> Arc<EngineConfig> {
        self.config
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn narrator(&self) -> Arc<NarrativeSynthesizer> {
        self.narrator
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    async fn run_pipeline(self: Arc<Self>, key: String, token: InFlightGuard) -> RunOutput {
        let started = Instant::now();
        let config = self.config();

        // Admission: FIFO wait for a slot, bounded by the admission timeout
        let admission = tokio::time::timeout(
            config.analysis.admission_timeout(),
            self.slots.clone().acquire_owned(),
        );
        let slot = tokio::select! {
            _ = self.shutdown.cancelled() => return Err(AnalysisError::Cancelled),
            admitted = admission => match admitted {
                Ok(Ok(permit)) => permit,
                Ok(Err(_closed)) => return Err(AnalysisError::Cancelled),
                Err(_) => {
                    let retry_after_secs = config.analysis.analysis_timeout().as_secs().max(1);
                    warn!(
                        domain = %key,
                        waited_ms = started.elapsed().as_millis() as u64,
                        "Admission timeout, analysis capacity exhausted"
                    );
                    return Err(AnalysisError::Overloaded { retry_after_secs });
                }
            },
        };
        let lease = RunLease {
            _token: token,
            _slot: slot,
        };

        debug!(domain = %key, queued_ms = started.elapsed().as_millis() as u64, "Analysis admitted");

        let timeline = self.fetch_timeline(&key, &config).await?;
        let extended = if config.archive.extended_metrics {
            tokio::select! {
                _ = self.shutdown.cancelled() => return Err(AnalysisError::Cancelled),
                extended = self.fetch_extended(&key, &config) => extended,
            }
        } else {
            ExtendedMetrics::default()
        };
        let long_live = config.scoring.is_long_live(&key);

        let metrics = scoring::score(&timeline, &config.scoring, Utc::now());
        let classification = scoring::classify(&metrics, &config.scoring);

        let narrator = self.narrator();
        let (narrative, narrative_status) = if narrator.is_enabled() {
            tokio::select! {
                _ = self.shutdown.cancelled() => return Err(AnalysisError::Cancelled),
                result = narrator.synthesize(&key, &metrics) => match result {
                    Ok(text) => (Some(text), NarrativeStatus::Generated),
                    Err(e) => {
                        warn!(domain = %key, error = %e, "Narrative unavailable, report continues without it");
                        (None, NarrativeStatus::Unavailable)
                    }
                },
            }
        } else {
            (None, NarrativeStatus::Disabled)
        };

        if self.shutdown.is_cancelled() {
            return Err(AnalysisError::Cancelled);
        }

        let report = Arc::new(Report::assemble(
            key.clone(),
            metrics,
            classification,
            narrative,
            narrative_status,
            started.elapsed().as_millis() as u64,
            Utc::now(),
        )
        .with_extensions(long_live, extended));

        if let Err(e) = self.store.put(&report).await {
            error!(domain = %key, error = %e, "Failed to persist report");
            return Err(AnalysisError::StoreFailure(e.to_string()));
        }

        self.cache
            .put(key.clone(), report.clone(), config.analysis.cache_expiration());

        info!(
            domain = %key,
            total_snapshots = report.total_snapshots,
            score = report.quality_score,
            category = %report.category,
            long_live = report.long_live,
            narrative = report.narrative_status.as_str(),
            elapsed_ms = report.analysis_ms,
            "Analysis complete"
        );

        drop(lease);
        Ok(report)
    }

    async fn fetch_timeline(
        &self,
        key: &str,
        config: &EngineConfig,
    ) -> Result<SnapshotTimeline, AnalysisError> {
        let policy = RetryPolicy::from_config(
            &config.retry,
            Duration::from_millis(config.archive.wayback_machine_timeout_ms),
        );
        let request_timeout = Duration::from_millis(config.archive.cdx_api_timeout_ms);
        let analysis_timeout = config.analysis.analysis_timeout();

        let fetch = policy.run(self.source.name(), || self.source.fetch(key, request_timeout));

        let outcome = tokio::select! {
            _ = self.shutdown.cancelled() => return Err(AnalysisError::Cancelled),
            outcome = tokio::time::timeout(analysis_timeout, fetch) => outcome,
        };

        match outcome {
            Err(_) => {
                warn!(domain = %key, timeout_ms = analysis_timeout.as_millis() as u64, "Snapshot fetch timed out");
                Err(AnalysisError::Timeout(analysis_timeout.as_millis() as u64))
            }
            Ok(Ok(timeline)) => Ok(timeline),
            Ok(Err(SourceError::NotFound(_))) => {
                debug!(domain = %key, "Domain absent from archive");
                Ok(SnapshotTimeline::empty(key))
            }
            Ok(Err(SourceError::InvalidInput(msg))) => Err(AnalysisError::InvalidInput(msg)),
            Ok(Err(e)) => Err(AnalysisError::SourceUnavailable(e.to_string())),
        }
    }

    /// Availability and timemap lookups, run together; a failed lookup is
    /// logged and left empty
    async fn fetch_extended(&self, key: &str, config: &EngineConfig) -> ExtendedMetrics {
        let request_timeout = Duration::from_millis(config.archive.cdx_api_timeout_ms);

        let (closest, timemap) = tokio::join!(
            tokio::time::timeout(request_timeout, self.source.closest_capture(key, request_timeout)),
            tokio::time::timeout(request_timeout, self.source.timemap_count(key, request_timeout)),
        );

        ExtendedMetrics {
            availability_timestamp: extended_value(key, "availability", closest),
            timemap_count: extended_value(key, "timemap", timemap),
        }
    }
}

fn extended_value<T>(
    key: &str,
    lookup: &'static str,
    outcome: Result<Result<Option<T>, SourceError>, tokio::time::error::Elapsed>,
) -> Option<T> {
    match outcome {
        Ok(Ok(value)) => value,
        Ok(Err(e)) => {
            warn!(domain = %key, lookup, error = %e, "Extended archive lookup failed");
            None
        }
        Err(_) => {
            warn!(domain = %key, lookup, "Extended archive lookup timed out");
            None
        }
    }
}

/// Scheduling core; cheap to clone
#[derive(Clone)]
pub struct AnalysisOrchestrator {
    inner: Arc<Inner>,
}

impl AnalysisOrchestrator {
    /// Build an orchestrator; the concurrency ceiling is fixed here
    pub fn new(
        config: EngineConfig,
        source: Arc<dyn SnapshotSource>,
        narrator: NarrativeSynthesizer,
        store: Arc<dyn ReportStore>,
        cache: Arc<ResultCache>,
        shutdown: CancellationToken,
    ) -> Self {
        let max_slots = config.analysis.max_concurrent_analysis.max(1);
        Self {
            inner: Arc::new(Inner {
                config: RwLock::new(Arc::new(config)),
                narrator: RwLock::new(Arc::new(narrator)),
                source,
                store,
                cache,
                slots: Arc::new(Semaphore::new(max_slots)),
                max_slots,
                in_flight: Mutex::new(HashMap::new()),
                next_run_id: AtomicU64::new(1),
                shutdown,
            }),
        }
    }

    /// Analyze one domain
    ///
    /// # Errors
    /// See [`AnalysisError`]; every caller attached to the same run gets the
    /// same outcome.
    pub async fn analyze(&self, domain: &str) -> RunOutput {
        let key = normalize_domain(domain)?;

        if self.inner.shutdown.is_cancelled() {
            return Err(AnalysisError::Cancelled);
        }

        let run: Shared<RunFuture> = {
            let mut in_flight = self.inner.lock_in_flight();

            if let Some(report) = self.inner.cache.get(&key) {
                debug!(domain = %key, "Cache hit");
                return Ok(report);
            }

            match in_flight.get(&key).and_then(|entry| entry.run.upgrade()) {
                Some(run) => {
                    debug!(domain = %key, "Attached to in-flight analysis");
                    run
                }
                None => {
                    let id = self.inner.next_run_id.fetch_add(1, Ordering::Relaxed);
                    let token = InFlightGuard {
                        inner: self.inner.clone(),
                        key: key.clone(),
                        id,
                    };
                    let run = self
                        .inner
                        .clone()
                        .run_pipeline(key.clone(), token)
                        .boxed()
                        .shared();
                    if let Some(weak) = run.downgrade() {
                        in_flight.insert(key.clone(), InFlightRun { id, run: weak });
                    }
                    debug!(domain = %key, "Analysis started");
                    run
                }
            }
        };

        run.await
    }

    /// Analyze several domains concurrently, preserving input order
    pub async fn analyze_batch(&self, domains: &[String]) -> Vec<(String, RunOutput)> {
        let runs = domains.iter().map(|domain| async move {
            let outcome = self.analyze(domain).await;
            (domain.clone(), outcome)
        });
        futures::future::join_all(runs).await
    }

    /// Drop the cached report for `domain`; returns whether one was cached
    pub fn invalidate(&self, domain: &str) -> Result<bool, AnalysisError> {
        let key = normalize_domain(domain)?;
        Ok(self.inner.cache.invalidate(&key))
    }

    /// Active configuration snapshot
    pub fn config(&self) -> Arc<EngineConfig> {
        self.inner.config()
    }

    /// Swap configuration and narrative synthesizer for subsequent runs
    ///
    /// Runs already in flight keep the snapshot they started with. The
    /// concurrency ceiling cannot change at runtime; the stored value is
    /// kept.
    pub fn update_config(&self, mut config: EngineConfig, narrator: NarrativeSynthesizer) {
        config.analysis.max_concurrent_analysis = self.inner.max_slots;
        *self
            .inner
            .config
            .write()
            .unwrap_or_else(|e| e.into_inner()) = Arc::new(config);
        *self
            .inner
            .narrator
            .write()
            .unwrap_or_else(|e| e.into_inner()) = Arc::new(narrator);
        info!("Engine configuration updated");
    }

    /// Number of domains currently being analyzed (including queued runs)
    pub fn in_flight_count(&self) -> usize {
        self.inner.lock_in_flight().len()
    }

    /// Concurrency slots not currently held
    pub fn available_slots(&self) -> usize {
        self.inner.slots.available_permits()
    }

    pub fn cache(&self) -> &Arc<ResultCache> {
        &self.inner.cache
    }

    pub fn store(&self) -> &Arc<dyn ReportStore> {
        &self.inner.store
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.inner.shutdown.clone()
    }

    /// Cancel every run and refuse new ones
    pub fn shutdown(&self) {
        self.inner.shutdown.cancel();
    }
}
