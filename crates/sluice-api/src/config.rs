//! Configuration for the Sluice service.

use std::{collections::HashMap, net::SocketAddr, str::FromStr, time::Duration};

use anyhow::{Context, Result};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use sluice_delivery::{CircuitBreakerConfig, ClientConfig, DispatcherConfig, RetryPolicy};

const CONFIG_FILE: &str = "config.toml";

/// Complete service configuration with defaults, file, and environment
/// overrides.
///
/// Configuration is loaded in priority order:
/// 1. Environment variables (highest priority)
/// 2. Configuration file (`config.toml`)
/// 3. Built-in defaults (lowest priority)
///
/// The service works out-of-the-box with development defaults. Create
/// `config.toml` to customize configuration, or use environment
/// variables for deployment-specific overrides. The default shared
/// secret is for development only and must be overridden in any real
/// deployment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    // Server
    /// Server bind address.
    ///
    /// Environment variable: `HOST`
    #[serde(default = "default_host", alias = "HOST")]
    pub host: String,
    /// Server bind port.
    ///
    /// Environment variable: `PORT`
    #[serde(default = "default_port", alias = "PORT")]
    pub port: u16,
    /// HTTP request timeout in seconds.
    ///
    /// Environment variable: `REQUEST_TIMEOUT`
    #[serde(default = "default_request_timeout", alias = "REQUEST_TIMEOUT")]
    pub request_timeout: u64,

    // Ingestion
    /// Shared secret for inbound signature verification and outbound
    /// signing.
    ///
    /// Environment variable: `SHARED_SECRET`
    #[serde(default = "default_shared_secret", alias = "SHARED_SECRET")]
    pub shared_secret: String,
    /// Maximum accepted timestamp skew in seconds.
    ///
    /// Environment variable: `FRESHNESS_WINDOW_SECONDS`
    #[serde(default = "default_freshness_window", alias = "FRESHNESS_WINDOW_SECONDS")]
    pub freshness_window_seconds: i64,
    /// How long admitted event identifiers are remembered, in seconds.
    ///
    /// Environment variable: `IDEMPOTENCY_RETENTION_SECONDS`
    #[serde(default = "default_idempotency_retention", alias = "IDEMPOTENCY_RETENTION_SECONDS")]
    pub idempotency_retention_seconds: u64,

    // Dispatcher
    /// Number of concurrent dispatcher workers.
    ///
    /// Environment variable: `WORKER_POOL_SIZE`
    #[serde(default = "default_worker_count", alias = "WORKER_POOL_SIZE")]
    pub worker_pool_size: usize,
    /// Idle worker poll interval in milliseconds.
    ///
    /// Environment variable: `POLL_INTERVAL_MS`
    #[serde(default = "default_poll_interval_ms", alias = "POLL_INTERVAL_MS")]
    pub poll_interval_ms: u64,
    /// Queue lease duration in seconds.
    ///
    /// Environment variable: `LEASE_DURATION_SECONDS`
    #[serde(default = "default_lease_duration", alias = "LEASE_DURATION_SECONDS")]
    pub lease_duration_seconds: u64,
    /// Graceful shutdown timeout in seconds.
    ///
    /// Environment variable: `SHUTDOWN_TIMEOUT_SECONDS`
    #[serde(default = "default_shutdown_timeout", alias = "SHUTDOWN_TIMEOUT_SECONDS")]
    pub shutdown_timeout_seconds: u64,

    // Retry
    /// Maximum delivery attempts per event.
    ///
    /// Environment variable: `MAX_RETRY_ATTEMPTS`
    #[serde(default = "default_retry_attempts", alias = "MAX_RETRY_ATTEMPTS")]
    pub max_retry_attempts: u32,
    /// Base delay for exponential backoff in milliseconds.
    ///
    /// Environment variable: `RETRY_BASE_DELAY_MS`
    #[serde(default = "default_base_delay_ms", alias = "RETRY_BASE_DELAY_MS")]
    pub retry_base_delay_ms: u64,
    /// Maximum backoff delay in milliseconds.
    ///
    /// Environment variable: `RETRY_MAX_DELAY_MS`
    #[serde(default = "default_max_delay_ms", alias = "RETRY_MAX_DELAY_MS")]
    pub retry_max_delay_ms: u64,
    /// Jitter factor for retry timing (0.0 to 1.0).
    ///
    /// Environment variable: `RETRY_JITTER_FACTOR`
    #[serde(default = "default_jitter_factor", alias = "RETRY_JITTER_FACTOR")]
    pub retry_jitter_factor: f64,

    // Circuit breaker
    /// Consecutive failures that open an endpoint's circuit.
    ///
    /// Environment variable: `CIRCUIT_BREAKER_FAILURE_THRESHOLD`
    #[serde(default = "default_failure_threshold", alias = "CIRCUIT_BREAKER_FAILURE_THRESHOLD")]
    pub circuit_breaker_failure_threshold: u32,
    /// Probe successes that close a half-open circuit.
    ///
    /// Environment variable: `CIRCUIT_BREAKER_SUCCESS_THRESHOLD`
    #[serde(default = "default_success_threshold", alias = "CIRCUIT_BREAKER_SUCCESS_THRESHOLD")]
    pub circuit_breaker_success_threshold: u32,
    /// Seconds an open circuit waits before probing.
    ///
    /// Environment variable: `CIRCUIT_BREAKER_TIMEOUT_SECONDS`
    #[serde(default = "default_circuit_timeout", alias = "CIRCUIT_BREAKER_TIMEOUT_SECONDS")]
    pub circuit_breaker_timeout_seconds: u64,

    // Delivery client
    /// HTTP timeout for outbound forwarding in seconds. Must be less
    /// than `lease_duration_seconds` so a slow delivery cannot outlive
    /// its lease and be claimed by a second worker.
    ///
    /// Environment variable: `DELIVERY_TIMEOUT_SECONDS`
    #[serde(default = "default_delivery_timeout", alias = "DELIVERY_TIMEOUT_SECONDS")]
    pub delivery_timeout_seconds: u64,

    // Routing
    /// Event type to downstream URL map. Configured via `config.toml`:
    ///
    /// ```toml
    /// [routes]
    /// "order.created" = "https://billing.internal/hooks"
    /// ```
    #[serde(default)]
    pub routes: HashMap<String, String>,
    /// Catch-all downstream URL for event types without an explicit
    /// route. Events remain unroutable when unset and unmatched.
    ///
    /// Environment variable: `DOWNSTREAM_URL`
    #[serde(default, alias = "DOWNSTREAM_URL")]
    pub downstream_url: Option<String>,

    // Logging
    /// Log level configuration.
    ///
    /// Environment variable: `RUST_LOG`
    #[serde(default = "default_log_level", alias = "RUST_LOG")]
    pub rust_log: String,
}

impl Config {
    /// Loads configuration from defaults, config file, and environment
    /// variable overrides.
    pub fn load() -> Result<Self> {
        let figment = Figment::new()
            .merge(Serialized::defaults(Self::default()))
            .merge(Toml::file(CONFIG_FILE))
            .merge(Env::prefixed(""));

        let config: Self = figment.extract().context("failed to load configuration")?;
        config.validate()?;
        Ok(config)
    }

    /// Converts to the delivery crate's retry policy.
    pub fn to_retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_retry_attempts,
            base_delay: Duration::from_millis(self.retry_base_delay_ms),
            max_delay: Duration::from_millis(self.retry_max_delay_ms),
            jitter_factor: self.retry_jitter_factor,
        }
    }

    /// Converts to outbound client configuration.
    pub fn to_client_config(&self) -> ClientConfig {
        ClientConfig {
            timeout: Duration::from_secs(self.delivery_timeout_seconds),
            user_agent: "Sluice/0.1".to_string(),
            max_redirects: 3,
        }
    }

    /// Converts to circuit breaker configuration.
    pub fn to_circuit_config(&self) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: self.circuit_breaker_failure_threshold,
            open_timeout: Duration::from_secs(self.circuit_breaker_timeout_seconds),
            success_threshold: self.circuit_breaker_success_threshold,
        }
    }

    /// Converts to dispatcher configuration.
    pub fn to_dispatcher_config(&self) -> DispatcherConfig {
        DispatcherConfig {
            worker_count: self.worker_pool_size,
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            lease_duration: Duration::from_secs(self.lease_duration_seconds),
            shutdown_timeout: Duration::from_secs(self.shutdown_timeout_seconds),
        }
    }

    /// Parses the server socket address from host and port.
    pub fn parse_server_addr(&self) -> Result<SocketAddr> {
        let addr_str = format!("{}:{}", self.host, self.port);
        SocketAddr::from_str(&addr_str).context("invalid server address")
    }

    fn validate(&self) -> Result<()> {
        if self.port == 0 {
            anyhow::bail!("port must be greater than 0");
        }

        if self.shared_secret.is_empty() {
            anyhow::bail!("shared_secret must not be empty");
        }

        if self.freshness_window_seconds <= 0 {
            anyhow::bail!("freshness_window_seconds must be greater than 0");
        }

        if self.worker_pool_size == 0 {
            anyhow::bail!("worker_pool_size must be greater than 0");
        }

        if self.max_retry_attempts == 0 {
            anyhow::bail!("max_retry_attempts must be greater than 0");
        }

        if !(0.0..=1.0).contains(&self.retry_jitter_factor) {
            anyhow::bail!("retry_jitter_factor must be between 0.0 and 1.0");
        }

        if self.retry_base_delay_ms > self.retry_max_delay_ms {
            anyhow::bail!("retry_base_delay_ms cannot exceed retry_max_delay_ms");
        }

        if self.circuit_breaker_failure_threshold == 0 {
            anyhow::bail!("circuit_breaker_failure_threshold must be greater than 0");
        }

        if self.delivery_timeout_seconds >= self.lease_duration_seconds {
            anyhow::bail!(
                "delivery_timeout_seconds must be less than lease_duration_seconds; \
                 a delivery that outlives its lease can be claimed twice"
            );
        }

        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            request_timeout: default_request_timeout(),
            shared_secret: default_shared_secret(),
            freshness_window_seconds: default_freshness_window(),
            idempotency_retention_seconds: default_idempotency_retention(),
            worker_pool_size: default_worker_count(),
            poll_interval_ms: default_poll_interval_ms(),
            lease_duration_seconds: default_lease_duration(),
            shutdown_timeout_seconds: default_shutdown_timeout(),
            max_retry_attempts: default_retry_attempts(),
            retry_base_delay_ms: default_base_delay_ms(),
            retry_max_delay_ms: default_max_delay_ms(),
            retry_jitter_factor: default_jitter_factor(),
            circuit_breaker_failure_threshold: default_failure_threshold(),
            circuit_breaker_success_threshold: default_success_threshold(),
            circuit_breaker_timeout_seconds: default_circuit_timeout(),
            delivery_timeout_seconds: default_delivery_timeout(),
            routes: HashMap::new(),
            downstream_url: None,
            rust_log: default_log_level(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8000
}

fn default_request_timeout() -> u64 {
    30
}

fn default_shared_secret() -> String {
    "dev-secret-key".to_string()
}

fn default_freshness_window() -> i64 {
    300
}

fn default_idempotency_retention() -> u64 {
    86_400
}

fn default_worker_count() -> usize {
    4
}

fn default_poll_interval_ms() -> u64 {
    100
}

fn default_lease_duration() -> u64 {
    30
}

fn default_shutdown_timeout() -> u64 {
    10
}

fn default_retry_attempts() -> u32 {
    5
}

fn default_base_delay_ms() -> u64 {
    1000
}

fn default_max_delay_ms() -> u64 {
    16_000
}

fn default_jitter_factor() -> f64 {
    0.2
}

fn default_failure_threshold() -> u32 {
    5
}

fn default_success_threshold() -> u32 {
    3
}

fn default_circuit_timeout() -> u64 {
    30
}

// Below the 30s lease so deliveries always resolve before the lease
// expires.
fn default_delivery_timeout() -> u64 {
    20
}

fn default_log_level() -> String {
    "info".to_string()
}
