use anyhow::Context;
use clap::Parser;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::info;

use admission_gate::admission::Admission;
use admission_gate::audit::{TracingAuditSink, audit_channel, audit_worker};
use admission_gate::config::{AdmissionConfig, Args};
use admission_gate::logging::init_logging;
use admission_gate::router;
use admission_gate::state::AppState;
use admission_gate::sweeper::spawn_sweeper;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // parse cli arguments
    let args = Args::parse();
    init_logging(&args.log_level)?;

    let config = AdmissionConfig::from(&args);
    let (audit, audit_rx) = audit_channel(args.audit_buffer);
    let admission = Admission::new(&config, audit).context("invalid admission limits")?;

    // spawn the background workers
    tokio::spawn(audit_worker(audit_rx, Arc::new(TracingAuditSink)));
    if let Some(sweep) = args.sweep() {
        spawn_sweeper(admission.clone(), sweep);
    }

    let app = router(AppState { admission });

    let addr = format!("0.0.0.0:{}", args.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;

    info!(%addr, "admission gate listening");
    info!(
        max_connections = config.max_concurrent_connections,
        block_secs = config.block_duration.as_secs(),
        "connection limit"
    );
    info!(
        requests_per_second = config.requests_per_second,
        burst = config.burst_limit,
        "rate limit"
    );

    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    info!("admission gate stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}
