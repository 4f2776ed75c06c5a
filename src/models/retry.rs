use std::time::Duration;

use serde::{Deserialize, Serialize};

/// In-call backoff for a single transport request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub backoff_multiplier: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay_ms: 200,
            max_delay_ms: 2_000,
            backoff_multiplier: 2,
        }
    }
}

/// Task-level policy: how many times a whole dispatch is rescheduled.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskRetryPolicy {
    pub max_retries: u32,
    pub retry_delay: Duration,
    /// Dead-letter permanent failures right away and mark the notification
    /// failed instead of spending the remaining retries.
    pub fail_fast_on_permanent: bool,
}

impl Default for TaskRetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_delay: Duration::from_secs(60),
            fail_fast_on_permanent: false,
        }
    }
}
