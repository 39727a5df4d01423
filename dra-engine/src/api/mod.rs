//! HTTP API handlers for dra-engine
//!
//! All JSON routes live under `/api/v1`; `/health` sits at the root.

pub mod analyze;
pub mod auth;
pub mod dashboard;
pub mod health;
pub mod reports;
pub mod settings;

pub use analyze::analyze_routes;
pub use auth::login_routes;
pub use dashboard::dashboard_routes;
pub use health::health_routes;
pub use reports::report_routes;
pub use settings::settings_routes;
