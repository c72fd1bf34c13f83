//! Dependency report served on `/health`.
//!
//! Postgres is pinged with a deadline. Payment providers are only checked for
//! credentials; calling them here would spend API quota on every check.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{error, warn};

use crate::database::{self, PoolUsage};
use crate::payments::registry::PaymentRegistry;
use crate::payments::types::ProviderName;

const DATABASE_DEADLINE: Duration = Duration::from_secs(5);

/// Overall verdict, the worst of the dependency states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Readiness {
    Ready,
    Degraded,
    Unavailable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DependencyState {
    Up,
    Impaired,
    Down,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Dependency {
    pub state: DependencyState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pool: Option<PoolUsage>,
}

impl Dependency {
    fn new(state: DependencyState) -> Self {
        Self {
            state,
            latency_ms: None,
            note: None,
            pool: None,
        }
    }

    fn noted(state: DependencyState, note: impl Into<String>) -> Self {
        Self {
            note: Some(note.into()),
            ..Self::new(state)
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthReport {
    pub status: Readiness,
    pub dependencies: BTreeMap<String, Dependency>,
    pub checked_at: DateTime<Utc>,
}

impl HealthReport {
    fn from_dependencies(dependencies: BTreeMap<String, Dependency>) -> Self {
        let worst = dependencies
            .values()
            .map(|d| d.state)
            .max_by_key(|state| match state {
                DependencyState::Up => 0,
                DependencyState::Impaired => 1,
                DependencyState::Down => 2,
            });
        let status = match worst {
            Some(DependencyState::Down) => Readiness::Unavailable,
            Some(DependencyState::Impaired) => Readiness::Degraded,
            _ => Readiness::Ready,
        };
        Self {
            status,
            dependencies,
            checked_at: Utc::now(),
        }
    }

    pub fn is_available(&self) -> bool {
        self.status != Readiness::Unavailable
    }
}

#[derive(Clone)]
pub struct HealthChecker {
    /// `None` when running on the in-process store
    db_pool: Option<sqlx::PgPool>,
    payments: PaymentRegistry,
}

impl HealthChecker {
    pub fn new(db_pool: Option<sqlx::PgPool>, payments: PaymentRegistry) -> Self {
        Self { db_pool, payments }
    }

    pub async fn check_health(&self) -> HealthReport {
        let mut dependencies = BTreeMap::new();
        dependencies.insert("database".to_string(), self.database().await);
        for provider in [ProviderName::PayPal, ProviderName::Paystack] {
            let dependency = if self.payments.is_configured(provider) {
                Dependency::new(DependencyState::Up)
            } else {
                Dependency::noted(DependencyState::Impaired, "credentials not configured")
            };
            dependencies.insert(format!("payments.{}", provider), dependency);
        }
        HealthReport::from_dependencies(dependencies)
    }

    async fn database(&self) -> Dependency {
        let Some(pool) = &self.db_pool else {
            // Nothing is persisted across restarts
            return Dependency::noted(DependencyState::Impaired, "in-memory store");
        };

        match timeout(DATABASE_DEADLINE, database::ping(pool)).await {
            Ok(Ok(latency)) => Dependency {
                latency_ms: Some(latency.as_millis() as u64),
                pool: Some(PoolUsage::of(pool)),
                ..Dependency::new(DependencyState::Up)
            },
            Ok(Err(e)) => {
                error!(error = %e, "database ping failed");
                Dependency::noted(DependencyState::Down, e.to_string())
            }
            Err(_) => {
                warn!(deadline_secs = DATABASE_DEADLINE.as_secs(), "database ping timed out");
                Dependency::noted(DependencyState::Down, "ping timed out")
            }
        }
    }
}
