//! Remote connection pool management.

use std::time::{Duration, Instant};

use sqlx::mysql::{MySqlConnectOptions, MySqlPool, MySqlPoolOptions};
use tracing::info;

use sitegraft_core::{Error, Result};
use sitegraft_crypto::{CredentialRecord, HostSpec};

/// Default maximum number of connections in the pool.
pub const DEFAULT_MAX_CONNECTIONS: u32 = 4;

/// Default connection acquire timeout in seconds (short: an unreachable
/// source should fail the run quickly).
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 5;

/// Default idle timeout in seconds.
pub const DEFAULT_IDLE_TIMEOUT_SECS: u64 = 300;

/// Pool configuration options.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Maximum number of connections in the pool.
    pub max_connections: u32,
    /// Connection acquire timeout duration.
    pub connect_timeout: Duration,
    /// Idle connection timeout duration.
    pub idle_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_connections: DEFAULT_MAX_CONNECTIONS,
            connect_timeout: Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS),
            idle_timeout: Duration::from_secs(DEFAULT_IDLE_TIMEOUT_SECS),
        }
    }
}

impl PoolConfig {
    /// Create a new pool configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the maximum number of connections.
    pub fn max_connections(mut self, n: u32) -> Self {
        self.max_connections = n;
        self
    }

    /// Set the connection acquire timeout.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set the idle connection timeout.
    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }
}

/// Connect to the remote source described by a credential record.
pub async fn connect(record: &CredentialRecord) -> Result<MySqlPool> {
    connect_with_config(record, PoolConfig::default()).await
}

/// Connect with custom pool configuration.
///
/// The record is validated before any I/O; incomplete credentials surface
/// as [`Error::Config`], unreachable hosts as [`Error::Connection`].
pub async fn connect_with_config(record: &CredentialRecord, config: PoolConfig) -> Result<MySqlPool> {
    record
        .validate()
        .map_err(|e| Error::Config(e.to_string()))?;

    let start = Instant::now();

    let mut options = MySqlConnectOptions::new()
        .username(&record.user)
        .password(&record.secret)
        .database(&record.database)
        .charset(&record.charset);

    let (log_host, log_port) = match record.host_spec() {
        HostSpec::Tcp { host, port } => {
            options = options.host(&host).port(port);
            (host, port)
        }
        HostSpec::Socket(path) => {
            options = options.socket(&path);
            (path, 0)
        }
    };

    info!(
        subsystem = "db",
        component = "pool",
        op = "connect",
        host = %log_host,
        port = log_port,
        database = %record.database,
        max_connections = config.max_connections,
        connect_timeout_secs = config.connect_timeout.as_secs(),
        "Connecting to remote source"
    );

    let pool = MySqlPoolOptions::new()
        .max_connections(config.max_connections)
        .acquire_timeout(config.connect_timeout)
        .idle_timeout(config.idle_timeout)
        .connect_with(options)
        .await
        .map_err(|e| Error::Connection(e.to_string()))?;

    info!(
        subsystem = "db",
        component = "pool",
        op = "established",
        pool_size = pool.size(),
        duration_ms = start.elapsed().as_millis() as u64,
        "Remote connection pool established"
    );
    Ok(pool)
}
