use std::{collections::HashMap, sync::Arc, time::Instant};

use anyhow::{Error, Result, anyhow};
use async_trait::async_trait;
use chrono::Utc;
use tracing::{debug, warn};

use crate::{
    clients::{database::DatabaseClient, rbmq::RabbitMqClient, redis::RedisClient},
    models::health::{HealthCheckResponse, HealthStatus, ServiceHealth},
};

#[async_trait]
pub trait HealthProbe: Send + Sync {
    async fn probe(&self) -> Result<(), Error>;
}

#[async_trait]
impl HealthProbe for DatabaseClient {
    async fn probe(&self) -> Result<(), Error> {
        self.health_check().await
    }
}

#[async_trait]
impl HealthProbe for RedisClient {
    async fn probe(&self) -> Result<(), Error> {
        self.health_check().await
    }
}

#[async_trait]
impl HealthProbe for RabbitMqClient {
    async fn probe(&self) -> Result<(), Error> {
        if self.is_connected() {
            Ok(())
        } else {
            Err(anyhow!("Connection to broker is not open"))
        }
    }
}

struct Check {
    probe: Arc<dyn HealthProbe>,
    critical: bool,
}

#[derive(Default)]
pub struct HealthChecker {
    checks: HashMap<String, Check>,
}

impl HealthChecker {
    pub fn new() -> Self {
        Self::default()
    }

    /// A failing critical probe makes the service unhealthy; a failing
    /// optional one only degrades it.
    pub fn with_probe(mut self, name: &str, probe: Arc<dyn HealthProbe>, critical: bool) -> Self {
        self.checks.insert(name.to_string(), Check { probe, critical });
        self
    }

    pub async fn check_all(&self) -> HealthCheckResponse {
        let mut checks = HashMap::new();

        for (name, check) in &self.checks {
            let start = Instant::now();
            let health = match check.probe.probe().await {
                Ok(()) => {
                    let elapsed = start.elapsed().as_millis() as u64;
                    debug!(check = %name, response_time_ms = elapsed, "Health check passed");
                    ServiceHealth::healthy(elapsed)
                }
                Err(e) if check.critical => {
                    warn!(check = %name, error = %e, "Health check failed");
                    ServiceHealth::unhealthy(e.to_string())
                }
                Err(e) => {
                    warn!(check = %name, error = %e, "Optional dependency unavailable");
                    ServiceHealth::degraded(e.to_string())
                }
            };
            checks.insert(name.clone(), health);
        }

        HealthCheckResponse {
            status: determine_overall_status(&checks),
            timestamp: Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
            checks,
        }
    }
}

fn determine_overall_status(checks: &HashMap<String, ServiceHealth>) -> HealthStatus {
    if checks
        .values()
        .any(|health| health.status == HealthStatus::Unhealthy)
    {
        HealthStatus::Unhealthy
    } else if checks
        .values()
        .any(|health| health.status == HealthStatus::Degraded)
    {
        HealthStatus::Degraded
    } else {
        HealthStatus::Healthy
    }
}
