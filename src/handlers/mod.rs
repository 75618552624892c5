mod admin;
mod health;
mod metrics;

pub use admin::{AdmissionStats, admission_stats_handler};
pub use health::health_handler;
pub use metrics::metrics_handler;
