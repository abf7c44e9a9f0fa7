//! Per-endpoint circuit breakers for outbound delivery.
//!
//! Tracks consecutive failures per downstream endpoint and stops
//! sending once a threshold is crossed. After a cooldown the circuit
//! admits probe traffic; a run of successes closes it again, a single
//! failure reopens it.

use std::{collections::HashMap, sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use sluice_core::Clock;
use tokio::sync::Mutex;
use tracing::{info, warn};

/// Tuning parameters for the circuit breakers.
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that open the circuit.
    pub failure_threshold: u32,
    /// How long an open circuit rejects traffic before probing.
    pub open_timeout: Duration,
    /// Consecutive probe successes that close a half-open circuit.
    pub success_threshold: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            open_timeout: Duration::from_secs(30),
            success_threshold: 3,
        }
    }
}

/// Observable state of a single circuit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Traffic flows normally.
    Closed,
    /// Traffic is rejected until the cooldown elapses.
    Open,
    /// Probe traffic is admitted while recovery is confirmed.
    HalfOpen,
}

#[derive(Debug)]
enum Circuit {
    Closed { consecutive_failures: u32 },
    Open { opened_at: DateTime<Utc> },
    HalfOpen { consecutive_successes: u32 },
}

/// Circuit breakers keyed by endpoint URL.
///
/// Breakers are created lazily on first use; an endpoint never seen is
/// implicitly closed.
#[derive(Debug)]
pub struct CircuitBreakerManager {
    circuits: Mutex<HashMap<String, Circuit>>,
    config: CircuitBreakerConfig,
    clock: Arc<dyn Clock>,
}

impl CircuitBreakerManager {
    /// Creates a manager with the given tuning.
    pub fn new(config: CircuitBreakerConfig, clock: Arc<dyn Clock>) -> Self {
        Self { circuits: Mutex::new(HashMap::new()), config, clock }
    }

    /// Whether a request to `endpoint` may be sent right now.
    ///
    /// An open circuit whose cooldown has elapsed transitions to
    /// half-open here and admits the caller as a probe.
    pub async fn allow(&self, endpoint: &str) -> bool {
        let now = self.clock.now();
        let mut circuits = self.circuits.lock().await;
        let Some(circuit) = circuits.get_mut(endpoint) else {
            return true;
        };

        match circuit {
            Circuit::Closed { .. } | Circuit::HalfOpen { .. } => true,
            Circuit::Open { opened_at } => {
                let cooldown = chrono::Duration::from_std(self.config.open_timeout)
                    .unwrap_or_else(|_| chrono::Duration::MAX);
                if now - *opened_at >= cooldown {
                    info!(endpoint, "circuit cooldown elapsed, admitting probe traffic");
                    *circuit = Circuit::HalfOpen { consecutive_successes: 0 };
                    true
                } else {
                    false
                }
            }
        }
    }

    /// Records a successful delivery to `endpoint`.
    pub async fn record_success(&self, endpoint: &str) {
        let mut circuits = self.circuits.lock().await;
        let Some(circuit) = circuits.get_mut(endpoint) else {
            return;
        };

        match circuit {
            Circuit::Closed { consecutive_failures } => {
                *consecutive_failures = 0;
            }
            Circuit::HalfOpen { consecutive_successes } => {
                *consecutive_successes += 1;
                if *consecutive_successes >= self.config.success_threshold {
                    info!(endpoint, "circuit closed after successful probes");
                    *circuit = Circuit::Closed { consecutive_failures: 0 };
                }
            }
            Circuit::Open { .. } => {}
        }
    }

    /// Records a failed delivery to `endpoint`.
    pub async fn record_failure(&self, endpoint: &str) {
        let now = self.clock.now();
        let mut circuits = self.circuits.lock().await;
        let circuit = circuits
            .entry(endpoint.to_string())
            .or_insert(Circuit::Closed { consecutive_failures: 0 });

        match circuit {
            Circuit::Closed { consecutive_failures } => {
                *consecutive_failures += 1;
                if *consecutive_failures >= self.config.failure_threshold {
                    warn!(
                        endpoint,
                        failures = *consecutive_failures,
                        "failure threshold crossed, circuit opened"
                    );
                    *circuit = Circuit::Open { opened_at: now };
                }
            }
            Circuit::HalfOpen { .. } => {
                warn!(endpoint, "probe failed, circuit reopened");
                *circuit = Circuit::Open { opened_at: now };
            }
            Circuit::Open { .. } => {}
        }
    }

    /// Current state of the circuit for `endpoint`.
    pub async fn state(&self, endpoint: &str) -> CircuitState {
        let circuits = self.circuits.lock().await;
        match circuits.get(endpoint) {
            None | Some(Circuit::Closed { .. }) => CircuitState::Closed,
            Some(Circuit::Open { .. }) => CircuitState::Open,
            Some(Circuit::HalfOpen { .. }) => CircuitState::HalfOpen,
        }
    }
}

#[cfg(test)]
mod tests {
    use sluice_core::TestClock;

    use super::*;

    fn manager() -> (CircuitBreakerManager, TestClock) {
        let clock = TestClock::new();
        let manager =
            CircuitBreakerManager::new(CircuitBreakerConfig::default(), Arc::new(clock.clone()));
        (manager, clock)
    }

    #[tokio::test]
    async fn unknown_endpoint_is_closed() {
        let (manager, _clock) = manager();
        assert!(manager.allow("https://a.example").await);
        assert_eq!(manager.state("https://a.example").await, CircuitState::Closed);
    }

    #[tokio::test]
    async fn opens_after_consecutive_failures() {
        let (manager, _clock) = manager();
        for _ in 0..4 {
            manager.record_failure("https://a.example").await;
            assert!(manager.allow("https://a.example").await);
        }
        manager.record_failure("https://a.example").await;
        assert!(!manager.allow("https://a.example").await);
        assert_eq!(manager.state("https://a.example").await, CircuitState::Open);
    }

    #[tokio::test]
    async fn success_resets_failure_streak() {
        let (manager, _clock) = manager();
        for _ in 0..4 {
            manager.record_failure("https://a.example").await;
        }
        manager.record_success("https://a.example").await;
        for _ in 0..4 {
            manager.record_failure("https://a.example").await;
        }
        assert!(manager.allow("https://a.example").await);
    }

    #[tokio::test]
    async fn cooldown_admits_probes_and_successes_close() {
        let (manager, clock) = manager();
        for _ in 0..5 {
            manager.record_failure("https://a.example").await;
        }
        assert!(!manager.allow("https://a.example").await);

        clock.advance(Duration::from_secs(31));
        assert!(manager.allow("https://a.example").await);
        assert_eq!(manager.state("https://a.example").await, CircuitState::HalfOpen);

        for _ in 0..3 {
            manager.record_success("https://a.example").await;
        }
        assert_eq!(manager.state("https://a.example").await, CircuitState::Closed);
    }

    #[tokio::test]
    async fn probe_failure_reopens() {
        let (manager, clock) = manager();
        for _ in 0..5 {
            manager.record_failure("https://a.example").await;
        }
        clock.advance(Duration::from_secs(31));
        assert!(manager.allow("https://a.example").await);

        manager.record_failure("https://a.example").await;
        assert_eq!(manager.state("https://a.example").await, CircuitState::Open);
        assert!(!manager.allow("https://a.example").await);
    }

    #[tokio::test]
    async fn circuits_are_independent_per_endpoint() {
        let (manager, _clock) = manager();
        for _ in 0..5 {
            manager.record_failure("https://a.example").await;
        }
        assert!(!manager.allow("https://a.example").await);
        assert!(manager.allow("https://b.example").await);
    }
}
