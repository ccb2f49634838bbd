use anyhow::{Context, bail};
use clap::Parser;
use core::{fmt, time::Duration};
use pgsink_cluster::{ClusterConfig, DEFAULT_MAX_WORKERS, default_worker_count};
use pgsink_queue::QueueConfig;
use std::net::{IpAddr, SocketAddr};

/// Runtime configuration for the `pgsink-server` binary.
///
/// Every flag can also be set through the environment variable named next to
/// it; a `.env` file in the working directory is loaded first. Workers inherit
/// the coordinator's environment and arguments, so all processes of a fleet
/// parse the same configuration.
#[derive(Parser, Debug, Clone)]
#[command(
    name = "pgsink-server",
    version,
    about = "Buffers HTTP payloads in a fleet of workers and writes them to Postgres"
)]
pub struct CliArgs {
    /// Port every worker listens on.
    ///
    /// Environment variable: `PORT`
    #[arg(long, env = "PORT", default_value_t = 9932)]
    pub port: u16,

    /// Address to bind the listener to.
    ///
    /// Environment variable: `HOST`
    #[arg(long, env = "HOST", default_value_t = String::from("0.0.0.0"))]
    pub host: String,

    /// Environment variable: `PG_HOST`
    #[arg(long, env = "PG_HOST", default_value_t = String::from("localhost"))]
    pub pg_host: String,

    /// Environment variable: `PG_PORT`
    #[arg(long, env = "PG_PORT", default_value_t = 5432)]
    pub pg_port: u16,

    /// Environment variable: `PG_USER`
    #[arg(long, env = "PG_USER", default_value_t = String::from("postgres"))]
    pub pg_user: String,

    /// Environment variable: `PG_PASS`
    #[arg(long, env = "PG_PASS", default_value_t = String::from("postgres"), hide_env_values = true)]
    pub pg_pass: String,

    /// Environment variable: `PG_DB`
    #[arg(long, env = "PG_DB", default_value_t = String::from("test"))]
    pub pg_db: String,

    /// Base size of each worker's connection pool.
    ///
    /// The pool may grow to twice this size and keeps at least half of it
    /// open. It is also the number of items a worker writes concurrently.
    ///
    /// Environment variable: `PG_POOL_SIZE`
    #[arg(long, env = "PG_POOL_SIZE", default_value_t = 5)]
    pub pg_pool_size: u32,

    /// Number of worker processes. Defaults to the number of CPUs, capped at
    /// `MAX_WORKERS`.
    ///
    /// Environment variable: `WORKERS`
    #[arg(long, env = "WORKERS")]
    pub workers: Option<usize>,

    /// Environment variable: `MAX_WORKERS`
    #[arg(long, env = "MAX_WORKERS", default_value_t = DEFAULT_MAX_WORKERS)]
    pub max_workers: usize,

    /// Seconds the coordinator waits for workers after a shutdown request
    /// before exiting anyway.
    ///
    /// Environment variable: `SHUTDOWN_TIMEOUT_SECS`
    #[arg(long, env = "SHUTDOWN_TIMEOUT_SECS", default_value_t = 100)]
    pub shutdown_timeout_secs: u64,

    /// Retries after the first failed write of an item.
    ///
    /// Environment variable: `QUEUE_MAX_RETRIES`
    #[arg(long, env = "QUEUE_MAX_RETRIES", default_value_t = 5)]
    pub queue_max_retries: u32,

    /// Environment variable: `QUEUE_RETRY_DELAY_MS`
    #[arg(long, env = "QUEUE_RETRY_DELAY_MS", default_value_t = 1000)]
    pub queue_retry_delay_ms: u64,

    /// Seconds between two store health probes.
    ///
    /// Environment variable: `QUEUE_HEALTH_INTERVAL_SECS`
    #[arg(long, env = "QUEUE_HEALTH_INTERVAL_SECS", default_value_t = 10)]
    pub queue_health_interval_secs: u64,

    /// How often a paused queue checks whether the store recovered.
    ///
    /// Environment variable: `QUEUE_PRECONDITION_RETRY_MS`
    #[arg(long, env = "QUEUE_PRECONDITION_RETRY_MS", default_value_t = 2000)]
    pub queue_precondition_retry_ms: u64,

    /// Maximum number of buffered items per worker. Unbounded when unset;
    /// requests beyond the cap are answered with 503.
    ///
    /// Environment variable: `QUEUE_CAPACITY`
    #[arg(long, env = "QUEUE_CAPACITY")]
    pub queue_capacity: Option<usize>,

    /// Upper bound on a single write attempt. No limit when unset.
    ///
    /// Environment variable: `QUEUE_ATTEMPT_TIMEOUT_MS`
    #[arg(long, env = "QUEUE_ATTEMPT_TIMEOUT_MS")]
    pub queue_attempt_timeout_ms: Option<u64>,

    /// Largest accepted `PUT /data` body in bytes.
    ///
    /// Environment variable: `MAX_BODY_BYTES`
    #[arg(long, env = "MAX_BODY_BYTES", default_value_t = 10 * 1024 * 1024)]
    pub max_body_bytes: usize,
}

/// Connection settings for the Postgres store.
#[derive(Clone, PartialEq, Eq)]
pub struct StoreConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub database: String,
    pub max_connections: u32,
    pub min_connections: u32,
}

impl fmt::Debug for StoreConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .field("database", &self.database)
            .field("max_connections", &self.max_connections)
            .field("min_connections", &self.min_connections)
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub addr: SocketAddr,
    pub store: StoreConfig,
    pub cluster: ClusterConfig,
    pub queue: QueueConfig,
    pub max_body_bytes: usize,
}

impl TryFrom<CliArgs> for ServerConfig {
    type Error = anyhow::Error;

    fn try_from(args: CliArgs) -> Result<Self, Self::Error> {
        if args.pg_pool_size == 0 {
            bail!("PG_POOL_SIZE must be greater than 0");
        }
        if args.max_workers == 0 {
            bail!("MAX_WORKERS must be greater than 0");
        }
        if args.workers == Some(0) {
            bail!("WORKERS must be greater than 0");
        }
        if args.queue_capacity == Some(0) {
            bail!("QUEUE_CAPACITY must be greater than 0 when set");
        }

        let ip: IpAddr = args
            .host
            .parse()
            .with_context(|| format!("HOST `{}` is not an IP address", args.host))?;

        let concurrency = usize::try_from(args.pg_pool_size).context("PG_POOL_SIZE too large")?;
        let max_connections = args
            .pg_pool_size
            .checked_mul(2)
            .context("PG_POOL_SIZE too large")?;

        Ok(Self {
            addr: SocketAddr::new(ip, args.port),
            store: StoreConfig {
                host: args.pg_host,
                port: args.pg_port,
                user: args.pg_user,
                password: args.pg_pass,
                database: args.pg_db,
                max_connections,
                min_connections: args.pg_pool_size / 2,
            },
            cluster: ClusterConfig {
                workers: args
                    .workers
                    .unwrap_or_else(|| default_worker_count(args.max_workers)),
                shutdown_timeout: Duration::from_secs(args.shutdown_timeout_secs),
            },
            queue: QueueConfig {
                concurrency,
                max_retries: args.queue_max_retries,
                retry_delay: Duration::from_millis(args.queue_retry_delay_ms),
                health_interval: Duration::from_secs(args.queue_health_interval_secs),
                precondition_retry_timeout: Duration::from_millis(
                    args.queue_precondition_retry_ms,
                ),
                capacity: args.queue_capacity,
                attempt_timeout: args.queue_attempt_timeout_ms.map(Duration::from_millis),
            },
            max_body_bytes: args.max_body_bytes,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> anyhow::Result<ServerConfig> {
        let argv = std::iter::once("pgsink-server").chain(args.iter().copied());
        ServerConfig::try_from(CliArgs::try_parse_from(argv)?)
    }

    #[test]
    fn pool_size_drives_pool_bounds_and_concurrency() {
        let config = parse(&["--pg-pool-size", "8", "--workers", "2"]).unwrap();

        assert_eq!(config.store.max_connections, 16);
        assert_eq!(config.store.min_connections, 4);
        assert_eq!(config.queue.concurrency, 8);
        assert_eq!(config.cluster.workers, 2);
    }

    #[test]
    fn optional_queue_limits() {
        let config = parse(&[
            "--queue-capacity",
            "100",
            "--queue-attempt-timeout-ms",
            "250",
            "--workers",
            "1",
        ])
        .unwrap();

        assert_eq!(config.queue.capacity, Some(100));
        assert_eq!(config.queue.attempt_timeout, Some(Duration::from_millis(250)));
    }

    #[test]
    fn derived_worker_count_respects_cap() {
        let config = parse(&["--max-workers", "1", "--pg-pool-size", "3"]).unwrap();
        assert_eq!(config.cluster.workers, 1);
        assert_eq!(config.store.min_connections, 1);
    }

    #[test]
    fn rejects_invalid_values() {
        assert!(parse(&["--pg-pool-size", "0"]).is_err());
        assert!(parse(&["--workers", "0"]).is_err());
        assert!(parse(&["--max-workers", "0"]).is_err());
        assert!(parse(&["--queue-capacity", "0"]).is_err());
        assert!(parse(&["--host", "not-an-ip"]).is_err());
    }

    #[test]
    fn password_is_not_printed() {
        let config = parse(&["--pg-pass", "hunter2", "--workers", "1"]).unwrap();
        assert!(!format!("{config:?}").contains("hunter2"));
    }
}
