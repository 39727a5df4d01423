//! Domain name normalization
//!
//! Every cache key, in-flight key and report key is a normalized domain:
//! lower-case host with scheme, credentials, port, path, query and fragment
//! stripped, and a leading `www.` and trailing dot removed.

use crate::{Error, Result};

/// Maximum total length of a DNS name
const MAX_DOMAIN_LEN: usize = 253;

/// Maximum length of one DNS label
const MAX_LABEL_LEN: usize = 63;

/// Normalize user input into a bare, lower-case domain name
///
/// # Examples
///
/// ```
/// use dra_common::normalize_domain;
///
/// assert_eq!(normalize_domain("https://Example.COM/path?q=1").unwrap(), "example.com");
/// assert_eq!(normalize_domain("www.example.org.").unwrap(), "example.org");
/// assert!(normalize_domain("not a domain").is_err());
/// ```
pub fn normalize_domain(input: &str) -> Result<String> {
    let mut rest = input.trim();

    if let Some(idx) = rest.find("://") {
        rest = &rest[idx + 3..];
    }

    // Path, query and fragment
    if let Some(idx) = rest.find(|c| c == '/' || c == '?' || c == '#') {
        rest = &rest[..idx];
    }

    // user:pass@host
    if let Some(idx) = rest.rfind('@') {
        rest = &rest[idx + 1..];
    }

    // host:port
    if let Some(idx) = rest.find(':') {
        rest = &rest[..idx];
    }

    let mut host = rest.trim_end_matches('.').to_ascii_lowercase();
    if let Some(stripped) = host.strip_prefix("www.") {
        host = stripped.to_string();
    }

    validate_host(&host)?;
    Ok(host)
}

fn validate_host(host: &str) -> Result<()> {
    if host.is_empty() {
        return Err(Error::InvalidInput("Domain is required".to_string()));
    }

    if host.len() > MAX_DOMAIN_LEN {
        return Err(Error::InvalidInput(format!(
            "Domain exceeds {} characters",
            MAX_DOMAIN_LEN
        )));
    }

    let labels: Vec<&str> = host.split('.').collect();
    if labels.len() < 2 {
        return Err(Error::InvalidInput(format!(
            "'{}' is not a fully qualified domain",
            host
        )));
    }

    for label in &labels {
        if label.is_empty() || label.len() > MAX_LABEL_LEN {
            return Err(Error::InvalidInput(format!("Invalid label in '{}'", host)));
        }
        if label.starts_with('-') || label.ends_with('-') {
            return Err(Error::InvalidInput(format!(
                "Label '{}' may not start or end with '-'",
                label
            )));
        }
        if !label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-') {
            return Err(Error::InvalidInput(format!(
                "Label '{}' contains invalid characters",
                label
            )));
        }
    }

    Ok(())
}
