use std::time::Duration;

use anyhow::{Error, Result, anyhow};
use dotenvy::dotenv;
use serde::Deserialize;

use crate::{
    mediums::MissingAddressPolicy,
    models::retry::{RetryConfig, TaskRetryPolicy},
};

#[derive(Clone, Copy, Deserialize, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Postgres,
    Memory,
}

#[derive(Clone, Deserialize, Debug)]
pub struct Config {
    #[serde(default = "default_storage_backend")]
    pub storage_backend: StorageBackend,
    pub database_url: String,

    pub rabbitmq_url: String,
    #[serde(default = "default_dispatch_queue")]
    pub dispatch_queue_name: String,
    #[serde(default = "default_retry_queue")]
    pub retry_queue_name: String,
    #[serde(default = "default_failed_queue")]
    pub failed_queue_name: String,
    #[serde(default = "default_prefetch_count")]
    pub prefetch_count: u16,

    pub redis_url: String,
    #[serde(default)]
    pub dispatch_lease_enabled: bool,
    #[serde(default = "default_lease_ttl")]
    pub dispatch_lease_ttl_seconds: u64,

    #[serde(default = "default_max_task_retries")]
    pub max_task_retries: u32,
    #[serde(default = "default_task_retry_delay")]
    pub task_retry_delay_seconds: u64,
    #[serde(default)]
    pub fail_fast_on_permanent_errors: bool,
    #[serde(default = "default_requeue_delay_ms")]
    pub requeue_delay_ms: u64,

    #[serde(default)]
    pub template_cache_ttl_seconds: u64,

    pub email_gateway_url: Option<String>,
    pub sms_gateway_url: Option<String>,
    pub email_fallback_address: Option<String>,
    pub sms_fallback_address: Option<String>,

    #[serde(default = "default_max_retry_attempts")]
    pub max_retry_attempts: u32,
    #[serde(default = "default_initial_retry_delay_ms")]
    pub initial_retry_delay_ms: u64,
    #[serde(default = "default_max_retry_delay_ms")]
    pub max_retry_delay_ms: u64,
    #[serde(default = "default_backoff_multiplier")]
    pub retry_backoff_multiplier: u64,

    #[serde(default = "default_worker_concurrency")]
    pub worker_concurrency: usize,

    #[serde(default)]
    pub report_scheduler_enabled: bool,
    #[serde(default = "default_report_interval")]
    pub report_interval_seconds: u64,
    #[serde(default = "default_report_template")]
    pub report_template_name: String,
    #[serde(default = "default_report_mediums")]
    pub report_mediums: String,

    #[serde(default = "default_server_port")]
    pub server_port: u16,
}

fn default_storage_backend() -> StorageBackend {
    StorageBackend::Postgres
}

fn default_dispatch_queue() -> String {
    "notification.dispatch".to_string()
}

fn default_retry_queue() -> String {
    "notification.dispatch.retry".to_string()
}

fn default_failed_queue() -> String {
    "notification.dispatch.failed".to_string()
}

fn default_prefetch_count() -> u16 {
    10
}

fn default_lease_ttl() -> u64 {
    300
}

fn default_max_task_retries() -> u32 {
    3
}

fn default_task_retry_delay() -> u64 {
    60
}

fn default_requeue_delay_ms() -> u64 {
    5_000
}

fn default_max_retry_attempts() -> u32 {
    3
}

fn default_initial_retry_delay_ms() -> u64 {
    200
}

fn default_max_retry_delay_ms() -> u64 {
    2_000
}

fn default_backoff_multiplier() -> u64 {
    2
}

fn default_worker_concurrency() -> usize {
    10
}

fn default_report_interval() -> u64 {
    86_400
}

fn default_report_template() -> String {
    "daily_report".to_string()
}

fn default_report_mediums() -> String {
    "email,sms".to_string()
}

fn default_server_port() -> u16 {
    8080
}

impl Config {
    pub fn load() -> Result<Self, Error> {
        dotenv().ok();

        let config = envy::from_env::<Self>()
            .map_err(|e| anyhow!("Invalid or missing environmental variable: {}", e))?;
        config.validate()
    }

    fn validate(self) -> Result<Self, Error> {
        if self.report_interval_seconds == 0 {
            return Err(anyhow!("REPORT_INTERVAL_SECONDS must be greater than zero"));
        }
        if self.worker_concurrency == 0 {
            return Err(anyhow!("WORKER_CONCURRENCY must be greater than zero"));
        }
        Ok(self)
    }

    pub fn report_interval(&self) -> Duration {
        Duration::from_secs(self.report_interval_seconds)
    }

    pub fn requeue_delay(&self) -> Duration {
        Duration::from_millis(self.requeue_delay_ms)
    }

    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig {
            max_attempts: self.max_retry_attempts,
            initial_delay_ms: self.initial_retry_delay_ms,
            max_delay_ms: self.max_retry_delay_ms,
            backoff_multiplier: self.retry_backoff_multiplier,
        }
    }

    pub fn task_retry_policy(&self) -> TaskRetryPolicy {
        TaskRetryPolicy {
            max_retries: self.max_task_retries,
            retry_delay: Duration::from_secs(self.task_retry_delay_seconds),
            fail_fast_on_permanent: self.fail_fast_on_permanent_errors,
        }
    }

    pub fn email_missing_address(&self) -> MissingAddressPolicy {
        MissingAddressPolicy::from_fallback(self.email_fallback_address.clone())
    }

    pub fn sms_missing_address(&self) -> MissingAddressPolicy {
        MissingAddressPolicy::from_fallback(self.sms_fallback_address.clone())
    }

    pub fn template_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.template_cache_ttl_seconds)
    }

    pub fn report_mediums(&self) -> Vec<String> {
        self.report_mediums
            .split(',')
            .map(str::trim)
            .filter(|m| !m.is_empty())
            .map(str::to_string)
            .collect()
    }
}
