//! # DropAnalyzer Common Library
//!
//! Shared code for the DropAnalyzer crates including:
//! - Error and result types
//! - Configuration file resolution and write-back
//! - Database bootstrap (settings and users tables)
//! - Password hashing and bearer token issuing/validation
//! - Domain name normalization
//! - Time helpers

pub mod auth;
pub mod config;
#[cfg(feature = "sqlx")]
pub mod db;
pub mod domain;
pub mod error;
pub mod time;

pub use domain::normalize_domain;
pub use error::{Error, Result};
