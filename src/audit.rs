//! Fire-and-forget audit trail for admission denials.
//!
//! The request path only ever does a non-blocking `try_send` into a bounded
//! channel. A background worker drains it into an [`AuditSink`]; sink
//! failures are logged and dropped, never fed back into admission.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{info, warn};

use crate::error::AuditError;
use crate::metrics::AUDIT_DROPPED;

pub const CONNECTION_BLOCKED: &str = "connection_blocked";

#[derive(Debug, Clone)]
pub struct AuditEvent {
    pub identity: String,
    pub action: String,
    pub details: HashMap<String, String>,
    pub recorded_at: DateTime<Utc>,
}

pub trait AuditSink: Send + Sync {
    fn record_event(
        &self,
        identity: &str,
        action: &str,
        details: &HashMap<String, String>,
    ) -> Result<(), AuditError>;
}

// Default sink: structured log lines under the `audit` target
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn record_event(
        &self,
        identity: &str,
        action: &str,
        details: &HashMap<String, String>,
    ) -> Result<(), AuditError> {
        info!(target: "audit", identity = %identity, action = %action, details = ?details, "audit event");
        Ok(())
    }
}

/// Sending half handed to the middleware. Cloning is cheap.
#[derive(Clone)]
pub struct AuditHandle {
    tx: mpsc::Sender<AuditEvent>,
}

impl AuditHandle {
    pub fn record(&self, identity: &str, action: &str, details: HashMap<String, String>) {
        let event = AuditEvent {
            identity: identity.to_string(),
            action: action.to_string(),
            details,
            recorded_at: Utc::now(),
        };

        match self.tx.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(event)) => {
                AUDIT_DROPPED.inc();
                warn!(identity = %event.identity, action = %event.action, "audit buffer full, event dropped");
            }
            Err(TrySendError::Closed(event)) => {
                AUDIT_DROPPED.inc();
                warn!(identity = %event.identity, action = %event.action, "audit worker gone, event dropped");
            }
        }
    }
}

/// Creates the audit channel; the receiver goes to [`audit_worker`].
pub fn audit_channel(buffer: usize) -> (AuditHandle, mpsc::Receiver<AuditEvent>) {
    let (tx, rx) = mpsc::channel(buffer.max(1));
    (AuditHandle { tx }, rx)
}

pub async fn audit_worker(mut rx: mpsc::Receiver<AuditEvent>, sink: Arc<dyn AuditSink>) {
    info!("audit worker started");

    while let Some(event) = rx.recv().await {
        if let Err(e) = sink.record_event(&event.identity, &event.action, &event.details) {
            warn!(
                identity = %event.identity,
                action = %event.action,
                recorded_at = %event.recorded_at.to_rfc3339(),
                error = %e,
                "audit sink failed, event discarded"
            );
        }
    }

    info!("audit worker stopped");
}
