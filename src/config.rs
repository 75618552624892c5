use clap::Parser;
use std::time::Duration;

// CLI argument structure, every flag can also come from the environment
#[derive(Parser, Debug, Clone)]
#[command(name = "admission-gate")]
#[command(about = "Per-client connection and rate admission control in front of an HTTP service")]
pub struct Args {
    // Port to run the server on
    #[arg(short, long, env = "ADMISSION_PORT", default_value_t = 8080)]
    pub port: u16,

    // Max in-flight requests per client before it gets blocked
    #[arg(long, env = "ADMISSION_MAX_CONNECTIONS", default_value_t = 10)]
    pub max_connections: usize,

    // Block duration in seconds
    #[arg(long, env = "ADMISSION_BLOCK_DURATION", default_value_t = 300)]
    pub block_duration: u64,

    // Sustained requests per second per client
    #[arg(long, env = "ADMISSION_REQUESTS_PER_SECOND")]
    pub requests_per_second: f64,

    // Burst allowance per client
    #[arg(long, env = "ADMISSION_BURST_LIMIT")]
    pub burst_limit: u32,

    // Audit events buffered before new ones are dropped
    #[arg(long, env = "ADMISSION_AUDIT_BUFFER", default_value_t = 1024)]
    pub audit_buffer: usize,

    // Idle sweep interval in seconds, 0 keeps every identity forever
    #[arg(long, env = "ADMISSION_SWEEP_INTERVAL", default_value_t = 0)]
    pub sweep_interval: u64,

    // Buckets untouched this many seconds are dropped by the sweep
    #[arg(long, env = "ADMISSION_IDLE_TTL", default_value_t = 600)]
    pub idle_ttl: u64,

    // Used when RUST_LOG is not set
    #[arg(long, env = "ADMISSION_LOG_LEVEL", default_value = "info")]
    pub log_level: String,
}

/// Limits for one admission layer. Routes with different budgets get their
/// own value.
#[derive(Debug, Clone, PartialEq)]
pub struct AdmissionConfig {
    pub max_concurrent_connections: usize,
    pub block_duration: Duration,
    pub requests_per_second: f64,
    pub burst_limit: u32,
}

impl AdmissionConfig {
    // Defaults of the reference deployment, rates supplied by the caller
    pub fn with_rate(requests_per_second: f64, burst_limit: u32) -> Self {
        Self {
            max_concurrent_connections: 10,
            block_duration: Duration::from_secs(5 * 60),
            requests_per_second,
            burst_limit,
        }
    }
}

impl From<&Args> for AdmissionConfig {
    fn from(args: &Args) -> Self {
        Self {
            max_concurrent_connections: args.max_connections,
            block_duration: Duration::from_secs(args.block_duration),
            requests_per_second: args.requests_per_second,
            burst_limit: args.burst_limit,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SweepConfig {
    pub interval: Duration,
    pub idle_ttl: Duration,
}

impl Args {
    // None when sweeping is off
    pub fn sweep(&self) -> Option<SweepConfig> {
        (self.sweep_interval > 0).then(|| SweepConfig {
            interval: Duration::from_secs(self.sweep_interval),
            idle_ttl: Duration::from_secs(self.idle_ttl),
        })
    }
}
