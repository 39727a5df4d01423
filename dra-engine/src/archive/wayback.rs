//! Wayback Machine CDX client
//!
//! Pages through the CDX index for one domain and builds its capture
//! timeline.
//!
//! # API Reference
//! - Endpoint: https://web.archive.org/cdx/search/cdx
//! - Query: `url=<domain>&matchType=exact&output=json&fl=timestamp,original,statuscode,digest`
//!   with `limit`/`offset` paging
//! - Response: JSON array of rows; the first row names the columns
//! - Timestamps: 14 digits, `YYYYMMDDhhmmss`, UTC
//!
//! Extended lookups (when `archive.extended_metrics` is on):
//! - Availability: `https://archive.org/wayback/available?url=<domain>` returns
//!   `{"archived_snapshots": {"closest": {"available": true, "timestamp": ...}}}`
//! - Timemap: `https://web.archive.org/web/timemap/link/<domain>` returns one
//!   link-format entry per line; entries whose `rel` includes `memento` are
//!   captures

use super::{SnapshotSource, SourceError};
use crate::config::ArchiveConfig;
use crate::models::{Snapshot, SnapshotTimeline};
use async_trait::async_trait;
use chrono::{NaiveDateTime, TimeZone, Utc};
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use reqwest::StatusCode;
use serde::Deserialize;
use std::num::NonZeroU32;
use std::time::Duration;
use tracing::debug;

const CDX_FIELDS: &str = "timestamp,original,statuscode,digest";
const CDX_TIMESTAMP_FORMAT: &str = "%Y%m%d%H%M%S";

/// Wayback CDX client with a process-wide request rate limit
pub struct WaybackClient {
    http_client: reqwest::Client,
    endpoint: String,
    availability_endpoint: String,
    timemap_endpoint: String,
    page_size: usize,
    max_records: usize,
    rate_limiter: DefaultDirectRateLimiter,
}

impl WaybackClient {
    pub fn new(config: &ArchiveConfig) -> Result<Self, SourceError> {
        let http_client = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .timeout(Duration::from_millis(config.wayback_machine_timeout_ms))
            .build()
            .map_err(|e| SourceError::Transient(format!("HTTP client build failed: {}", e)))?;

        let per_second = NonZeroU32::new(config.requests_per_second).unwrap_or(NonZeroU32::MIN);

        Ok(Self {
            http_client,
            endpoint: config.cdx_endpoint.clone(),
            availability_endpoint: config.availability_endpoint.clone(),
            timemap_endpoint: config.timemap_endpoint.clone(),
            page_size: config.page_size.max(1),
            max_records: config.max_records.max(1),
            rate_limiter: RateLimiter::direct(Quota::per_second(per_second)),
        })
    }

    /// Fetch one CDX page and return its data rows (header stripped)
    async fn fetch_page(
        &self,
        domain: &str,
        offset: usize,
        request_timeout: Duration,
    ) -> Result<Vec<Snapshot>, SourceError> {
        self.rate_limiter.until_ready().await;

        debug!(domain = %domain, offset, "Querying Wayback CDX API");

        let limit = self.page_size.to_string();
        let offset_param = offset.to_string();
        let response = self
            .http_client
            .get(&self.endpoint)
            .query(&[
                ("url", domain),
                ("matchType", "exact"),
                ("output", "json"),
                ("fl", CDX_FIELDS),
                ("limit", limit.as_str()),
                ("offset", offset_param.as_str()),
            ])
            .timeout(request_timeout)
            .send()
            .await
            .map_err(map_transport_error)?;

        let status = response.status();
        if let Some(err) = classify_status(status, domain) {
            return Err(err);
        }

        let body = response.text().await.map_err(map_transport_error)?;
        parse_cdx_page(&body)
    }

    /// GET `url` under the rate limit; `None` on 404
    async fn get_text(
        &self,
        url: &str,
        query: &[(&str, &str)],
        domain: &str,
        request_timeout: Duration,
    ) -> Result<Option<String>, SourceError> {
        self.rate_limiter.until_ready().await;

        let response = self
            .http_client
            .get(url)
            .query(query)
            .timeout(request_timeout)
            .send()
            .await
            .map_err(map_transport_error)?;

        match classify_status(response.status(), domain) {
            Some(SourceError::NotFound(_)) => Ok(None),
            Some(err) => Err(err),
            None => response.text().await.map(Some).map_err(map_transport_error),
        }
    }
}

#[async_trait]
impl SnapshotSource for WaybackClient {
    fn name(&self) -> &'static str {
        "wayback-cdx"
    }

    async fn fetch(
        &self,
        domain: &str,
        request_timeout: Duration,
    ) -> Result<SnapshotTimeline, SourceError> {
        let mut snapshots = Vec::new();
        let mut offset = 0usize;

        loop {
            let page = self.fetch_page(domain, offset, request_timeout).await?;
            let page_len = page.len();
            snapshots.extend(page);

            if page_len < self.page_size {
                break;
            }
            offset += self.page_size;
            if offset >= self.max_records {
                debug!(domain = %domain, offset, "CDX record cap reached");
                break;
            }
        }

        if snapshots.is_empty() {
            return Err(SourceError::NotFound(domain.to_string()));
        }

        snapshots.truncate(self.max_records);
        Ok(SnapshotTimeline::new(domain, snapshots))
    }

    async fn closest_capture(
        &self,
        domain: &str,
        request_timeout: Duration,
    ) -> Result<Option<chrono::DateTime<Utc>>, SourceError> {
        debug!(domain = %domain, "Querying Wayback availability API");
        let body = self
            .get_text(&self.availability_endpoint, &[("url", domain)], domain, request_timeout)
            .await?;
        match body {
            Some(body) => parse_availability(&body),
            None => Ok(None),
        }
    }

    async fn timemap_count(
        &self,
        domain: &str,
        request_timeout: Duration,
    ) -> Result<Option<u64>, SourceError> {
        debug!(domain = %domain, "Fetching Wayback timemap");
        let url = format!("{}{}", self.timemap_endpoint, domain);
        let body = self.get_text(&url, &[], domain, request_timeout).await?;
        Ok(Some(body.as_deref().map(count_timemap_mementos).unwrap_or(0)))
    }
}

fn map_transport_error(err: reqwest::Error) -> SourceError {
    if err.is_timeout() {
        SourceError::Transient(format!("request timed out: {}", err))
    } else {
        SourceError::Transient(err.to_string())
    }
}

/// Map a non-success HTTP status onto the source error taxonomy
pub fn classify_status(status: StatusCode, domain: &str) -> Option<SourceError> {
    if status.is_success() {
        return None;
    }

    Some(match status {
        StatusCode::TOO_MANY_REQUESTS => {
            SourceError::RateLimited(format!("HTTP {} for {}", status.as_u16(), domain))
        }
        StatusCode::NOT_FOUND => SourceError::NotFound(domain.to_string()),
        StatusCode::REQUEST_TIMEOUT => {
            SourceError::Transient(format!("HTTP {} for {}", status.as_u16(), domain))
        }
        s if s.is_server_error() => {
            SourceError::Transient(format!("HTTP {} for {}", s.as_u16(), domain))
        }
        s => SourceError::InvalidInput(format!("HTTP {} for {}", s.as_u16(), domain)),
    })
}

/// Parse one CDX JSON page into snapshots
///
/// Empty bodies and `[]` mean "no rows". Rows whose timestamp does not
/// parse are skipped.
pub fn parse_cdx_page(body: &str) -> Result<Vec<Snapshot>, SourceError> {
    if body.trim().is_empty() {
        return Ok(Vec::new());
    }

    let rows: Vec<Vec<String>> = serde_json::from_str(body)
        .map_err(|e| SourceError::Transient(format!("Malformed CDX response: {}", e)))?;

    let Some((header, data)) = rows.split_first() else {
        return Ok(Vec::new());
    };

    let column = |name: &str| header.iter().position(|h| h == name);
    let ts_idx = column("timestamp").ok_or_else(|| {
        SourceError::Transient("CDX response lacks a timestamp column".to_string())
    })?;
    let status_idx = column("statuscode");
    let digest_idx = column("digest");

    let snapshots = data
        .iter()
        .filter(|row| row.len() == header.len())
        .filter_map(|row| {
            let captured_at = parse_cdx_timestamp(&row[ts_idx])?;
            let status_code = status_idx.and_then(|i| row[i].parse::<u16>().ok());
            let digest = digest_idx
                .map(|i| row[i].clone())
                .filter(|d| !d.is_empty() && d != "-");
            Some(Snapshot {
                captured_at,
                status_code,
                digest,
            })
        })
        .collect();

    Ok(snapshots)
}

#[derive(Debug, Default, Deserialize)]
struct AvailabilityResponse {
    #[serde(default)]
    archived_snapshots: ArchivedSnapshots,
}

#[derive(Debug, Default, Deserialize)]
struct ArchivedSnapshots {
    closest: Option<ClosestSnapshot>,
}

#[derive(Debug, Deserialize)]
struct ClosestSnapshot {
    #[serde(default)]
    available: bool,
    timestamp: Option<String>,
}

/// Closest available capture from an availability API response
pub fn parse_availability(body: &str) -> Result<Option<chrono::DateTime<Utc>>, SourceError> {
    let response: AvailabilityResponse = serde_json::from_str(body)
        .map_err(|e| SourceError::Transient(format!("Malformed availability response: {}", e)))?;

    Ok(response
        .archived_snapshots
        .closest
        .filter(|closest| closest.available)
        .and_then(|closest| closest.timestamp)
        .and_then(|ts| parse_cdx_timestamp(&ts)))
}

/// Count link-format timemap entries whose `rel` includes `memento`
pub fn count_timemap_mementos(body: &str) -> u64 {
    body.lines()
        .filter_map(|line| {
            let start = line.find("rel=\"")? + 5;
            let len = line[start..].find('"')?;
            Some(&line[start..start + len])
        })
        .filter(|rel| rel.split_whitespace().any(|token| token == "memento"))
        .count() as u64
}

/// Parse a 14-digit CDX timestamp
pub fn parse_cdx_timestamp(raw: &str) -> Option<chrono::DateTime<Utc>> {
    if raw.len() != 14 || !raw.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    NaiveDateTime::parse_from_str(raw, CDX_TIMESTAMP_FORMAT)
        .ok()
        .map(|naive| Utc.from_utc_datetime(&naive))
}
