//! Readiness of the ledger store behind the API.

use serde::Serialize;
use std::collections::HashMap;
use std::future::Future;
use std::time::{Duration, Instant};
use tokio::time::timeout;
use tracing::{error, info};

const PROBE_TIMEOUT: Duration = Duration::from_secs(5);
const LEDGER_STORE: &str = "ledger_store";

#[derive(Debug, Serialize, Clone)]
pub struct HealthStatus {
    pub status: HealthState,
    pub checks: HashMap<String, ComponentHealth>,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum HealthState {
    Healthy,
    Degraded,
    Unhealthy,
}

#[derive(Debug, Serialize, Clone)]
pub struct ComponentHealth {
    pub status: ComponentState,
    pub response_time_ms: Option<u128>,
    pub details: Option<String>,
}

#[derive(Debug, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ComponentState {
    Up,
    Down,
    Warning,
}

impl ComponentState {
    /// Worst-case contribution of one component to the overall state.
    fn overall(self) -> HealthState {
        match self {
            ComponentState::Up => HealthState::Healthy,
            ComponentState::Warning => HealthState::Degraded,
            ComponentState::Down => HealthState::Unhealthy,
        }
    }
}

impl HealthStatus {
    fn from_checks(checks: HashMap<String, ComponentHealth>) -> Self {
        let status = checks
            .values()
            .map(|c| c.status.overall())
            .max_by_key(|s| match s {
                HealthState::Healthy => 0,
                HealthState::Degraded => 1,
                HealthState::Unhealthy => 2,
            })
            .unwrap_or(HealthState::Healthy);
        Self {
            status,
            checks,
            timestamp: chrono::Utc::now(),
        }
    }
}

impl ComponentHealth {
    fn new(status: ComponentState, response_time_ms: Option<u128>, details: Option<String>) -> Self {
        Self {
            status,
            response_time_ms,
            details,
        }
    }
}

/// Times a probe and turns its outcome into a component report.
async fn probe<F, E>(name: &str, check: F) -> ComponentHealth
where
    F: Future<Output = Result<(), E>>,
    E: std::fmt::Display,
{
    let start = Instant::now();
    match timeout(PROBE_TIMEOUT, check).await {
        Ok(Ok(())) => {
            let elapsed = start.elapsed().as_millis();
            info!(component = name, response_time_ms = elapsed, "health probe ok");
            ComponentHealth::new(ComponentState::Up, Some(elapsed), None)
        }
        Ok(Err(e)) => {
            error!(component = name, error = %e, "health probe failed");
            ComponentHealth::new(ComponentState::Down, None, Some(e.to_string()))
        }
        Err(_) => {
            error!(component = name, timeout_secs = PROBE_TIMEOUT.as_secs(), "health probe timed out");
            ComponentHealth::new(ComponentState::Down, None, Some("Timeout".to_string()))
        }
    }
}

/// Without a pool the ledger lives in memory, which is reported as degraded
/// rather than down.
#[derive(Clone, Default)]
pub struct HealthChecker {
    db_pool: Option<sqlx::PgPool>,
}

impl HealthChecker {
    pub fn new(db_pool: Option<sqlx::PgPool>) -> Self {
        Self { db_pool }
    }

    pub async fn check_health(&self) -> HealthStatus {
        let ledger = match &self.db_pool {
            Some(pool) => {
                probe(LEDGER_STORE, async {
                    sqlx::query("SELECT 1").execute(pool).await.map(|_| ())
                })
                .await
            }
            None => ComponentHealth::new(
                ComponentState::Warning,
                None,
                Some("in-memory store, balances are not durable".to_string()),
            ),
        };
        HealthStatus::from_checks(HashMap::from([(LEDGER_STORE.to_string(), ledger)]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn in_memory_store_is_degraded() {
        let status = HealthChecker::new(None).check_health().await;
        assert_eq!(status.status, HealthState::Degraded);
        assert_eq!(status.checks[LEDGER_STORE].status, ComponentState::Warning);
    }

    #[tokio::test]
    async fn failing_probe_reports_down() {
        let health = probe("ledger_store", async { Err::<(), _>("connection refused") }).await;
        assert_eq!(health.status, ComponentState::Down);
        assert_eq!(health.details.as_deref(), Some("connection refused"));

        let health = probe("ledger_store", async { Ok::<(), String>(()) }).await;
        assert_eq!(health.status, ComponentState::Up);
        assert!(health.response_time_ms.is_some());
    }

    #[test]
    fn worst_component_wins() {
        let checks = HashMap::from([
            ("a".to_string(), ComponentHealth::new(ComponentState::Up, Some(3), None)),
            ("b".to_string(), ComponentHealth::new(ComponentState::Down, None, None)),
            ("c".to_string(), ComponentHealth::new(ComponentState::Warning, None, None)),
        ]);
        assert_eq!(HealthStatus::from_checks(checks).status, HealthState::Unhealthy);
        assert_eq!(HealthStatus::from_checks(HashMap::new()).status, HealthState::Healthy);
    }
}
