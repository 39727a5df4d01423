//! Snapshot sources
//!
//! A [`SnapshotSource`] returns the capture timeline of one domain from an
//! external web archive. Only the Wayback Machine CDX index is implemented;
//! other archives plug in behind the same trait.
//!
//! The availability and timemap lookups are optional extras; sources without
//! them keep the default implementations, which report nothing.

pub mod wayback;

pub use wayback::WaybackClient;

use crate::models::SnapshotTimeline;
use crate::retry::{RetryClass, Retryable};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::time::Duration;
use thiserror::Error;

/// Snapshot source failures
#[derive(Debug, Clone, Error, PartialEq)]
pub enum SourceError {
    /// Network error or 5xx; retried
    #[error("Transient archive failure: {0}")]
    Transient(String),

    /// Archive throttled us (HTTP 429); retried after the rate-limit delay
    #[error("Archive rate limit: {0}")]
    RateLimited(String),

    /// Archive holds no captures for the domain (not an analysis error)
    #[error("No captures for {0}")]
    NotFound(String),

    /// Archive rejected the query; never retried
    #[error("Archive rejected input: {0}")]
    InvalidInput(String),

    /// One attempt exceeded its time bound
    #[error("Archive request timed out after {0:?}")]
    TimedOut(Duration),
}

impl Retryable for SourceError {
    fn retry_class(&self) -> RetryClass {
        match self {
            SourceError::Transient(_) | SourceError::TimedOut(_) => RetryClass::Transient,
            SourceError::RateLimited(_) => RetryClass::RateLimited,
            SourceError::NotFound(_) | SourceError::InvalidInput(_) => RetryClass::Fatal,
        }
    }

    fn attempt_timed_out(after: Duration) -> Self {
        SourceError::TimedOut(after)
    }
}

/// Capability to fetch a domain's capture history
#[async_trait]
pub trait SnapshotSource: Send + Sync {
    /// Source name for logging
    fn name(&self) -> &'static str;

    /// Fetch the full timeline of `domain` (already normalized)
    ///
    /// `request_timeout` bounds each individual request the source makes.
    ///
    /// # Errors
    /// `NotFound` when the archive has no captures; `Transient`/`RateLimited`
    /// for retryable failures; `InvalidInput` when the archive rejects the
    /// query.
    async fn fetch(
        &self,
        domain: &str,
        request_timeout: Duration,
    ) -> Result<SnapshotTimeline, SourceError>;

    /// Closest capture the archive reports as available, if any
    async fn closest_capture(
        &self,
        _domain: &str,
        _request_timeout: Duration,
    ) -> Result<Option<DateTime<Utc>>, SourceError> {
        Ok(None)
    }

    /// Number of mementos in the archive's timemap; `None` when unsupported
    async fn timemap_count(
        &self,
        _domain: &str,
        _request_timeout: Duration,
    ) -> Result<Option<u64>, SourceError> {
        Ok(None)
    }
}
