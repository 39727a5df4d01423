//! Persisted engine settings
//!
//! The settings screen writes the whole tunable configuration as one JSON
//! document under [`ENGINE_CONFIG_KEY`]; startup re-applies it on top of the
//! file configuration.

use crate::config::EngineConfig;
use dra_common::db::{get_setting, set_setting};
use dra_common::{Error, Result};
use sqlx::SqlitePool;

pub const ENGINE_CONFIG_KEY: &str = "engine_config";

/// Last configuration saved through the settings API, if any
pub async fn load_engine_config(pool: &SqlitePool) -> Result<Option<EngineConfig>> {
    match get_setting(pool, ENGINE_CONFIG_KEY).await? {
        Some(raw) => serde_json::from_str(&raw)
            .map(Some)
            .map_err(|e| Error::Config(format!("Stored engine settings unreadable: {}", e))),
        None => Ok(None),
    }
}

pub async fn save_engine_config(pool: &SqlitePool, config: &EngineConfig) -> Result<()> {
    let raw = serde_json::to_string(config)
        .map_err(|e| Error::Internal(format!("Failed to serialize settings: {}", e)))?;
    set_setting(pool, ENGINE_CONFIG_KEY, raw).await
}
