//! Request admission: the connection tracker and the rate limiter composed
//! into one axum middleware.
//!
//! Order per request:
//! 1. resolve the client identity
//! 2. connection tracker; a denial is audited and answered with 429
//! 3. hold a [`ConnectionGuard`] for the rest of the request
//! 4. rate limiter; a denial is answered with 429 and a retry hint
//! 5. forward to the router
//!
//! Only connection denials reach the audit sink.

use axum::extract::{ConnectInfo, Request, State};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::audit::{AuditHandle, CONNECTION_BLOCKED};
use crate::config::AdmissionConfig;
use crate::connection::{ConnectionGuard, ConnectionTracker};
use crate::error::{AdmissionError, ConfigError};
use crate::identity::{ClientIdentity, client_identity};
use crate::metrics::{ACTIVE_UNITS, CONNECTION_DENIED, RATE_LIMITED, REQUEST_TOTAL, TRACKED_IDENTITIES};
use crate::rate_limit::RateLimiterRegistry;

#[derive(Clone)]
pub struct Admission {
    pub tracker: Arc<ConnectionTracker>,
    pub limiter: Arc<RateLimiterRegistry>,
    audit: AuditHandle,
}

impl Admission {
    pub fn new(config: &AdmissionConfig, audit: AuditHandle) -> Result<Self, ConfigError> {
        let tracker = ConnectionTracker::new(config.max_concurrent_connections, config.block_duration)?;
        let limiter = RateLimiterRegistry::new(config.requests_per_second, config.burst_limit)?;
        Ok(Self {
            tracker: Arc::new(tracker),
            limiter: Arc::new(limiter),
            audit,
        })
    }

    /// Runs both gates for `identity`. On success the returned guard must be
    /// kept alive until the request is finished.
    pub fn admit(&self, identity: &ClientIdentity) -> Result<ConnectionGuard, AdmissionError> {
        REQUEST_TOTAL.inc();

        let Some(guard) = self.tracker.acquire(identity.as_str()) else {
            CONNECTION_DENIED.inc();
            warn!(identity = %identity, "rejected: too many connections");
            self.audit.record(
                identity.as_str(),
                CONNECTION_BLOCKED,
                HashMap::from([("reason".to_string(), "too many connections".to_string())]),
            );
            return Err(AdmissionError::TooManyConnections);
        };

        if !self.limiter.allow(identity.as_str()) {
            RATE_LIMITED.inc();
            debug!(identity = %identity, "rejected: rate limit exceeded");
            // dropping the guard here releases the unit
            return Err(AdmissionError::RateLimited {
                retry_after: self.limiter.retry_after(),
                retry_after_secs: self.limiter.retry_after_secs(),
            });
        }

        Ok(guard)
    }

    pub fn refresh_gauges(&self) {
        let stats = self.tracker.stats();
        TRACKED_IDENTITIES.set(stats.tracked_identities as f64);
        ACTIVE_UNITS.set(stats.active_units as f64);
    }
}

/// Middleware for `axum::middleware::from_fn_with_state`. Needs the server
/// to be built with `into_make_service_with_connect_info::<SocketAddr>()`
/// for the remote address; without it the header fallback applies.
pub async fn admission_middleware(
    State(admission): State<Admission>,
    mut request: Request,
    next: Next,
) -> Response {
    let remote = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.to_string());
    let identity = client_identity(remote.as_deref(), request.headers());

    let guard = match admission.admit(&identity) {
        Ok(guard) => guard,
        Err(rejection) => return rejection.into_response(),
    };

    request.extensions_mut().insert(identity);
    let response = next.run(request).await;

    // an aborted request drops this future, and the guard with it
    drop(guard);
    response
}
