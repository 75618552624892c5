use axum::{Json, extract::State};
use serde::Serialize;

use crate::connection::TrackerStats;
use crate::state::AppState;

#[derive(Serialize)]
pub struct AdmissionStats {
    pub connections: TrackerStats,
    pub max_concurrent: usize,
    pub block_duration_secs: u64,
    pub rate_buckets: usize,
    pub requests_per_second: f64,
    pub burst_limit: u32,
}

// Snapshot of the admission maps for operators
pub async fn admission_stats_handler(State(state): State<AppState>) -> Json<AdmissionStats> {
    let admission = &state.admission;
    Json(AdmissionStats {
        connections: admission.tracker.stats(),
        max_concurrent: admission.tracker.max_concurrent(),
        block_duration_secs: admission.tracker.block_duration().as_secs(),
        rate_buckets: admission.limiter.tracked(),
        requests_per_second: admission.limiter.rate_per_second(),
        burst_limit: admission.limiter.burst(),
    })
}
