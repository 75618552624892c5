use lazy_static::lazy_static;
use prometheus::{Counter, Gauge, register_counter, register_gauge};

lazy_static! {
    pub static ref REQUEST_TOTAL: Counter = register_counter!(
        "admission_requests_total",
        "Total number of requests seen by the admission layer"
    )
    .unwrap();
    pub static ref CONNECTION_DENIED: Counter = register_counter!(
        "admission_connection_denied_total",
        "Requests denied by the connection tracker"
    )
    .unwrap();
    pub static ref RATE_LIMITED: Counter = register_counter!(
        "admission_rate_limited_total",
        "Requests denied by the rate limiter"
    )
    .unwrap();
    pub static ref AUDIT_DROPPED: Counter = register_counter!(
        "admission_audit_dropped_total",
        "Audit events dropped before reaching the sink"
    )
    .unwrap();
    pub static ref TRACKED_IDENTITIES: Gauge = register_gauge!(
        "admission_tracked_identities",
        "Identities held by the connection tracker"
    )
    .unwrap();
    pub static ref ACTIVE_UNITS: Gauge = register_gauge!(
        "admission_active_units",
        "Admitted requests not yet released"
    )
    .unwrap();
}
