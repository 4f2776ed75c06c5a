use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::status::DeliveryStatus;

/// Per-(notification, medium) checkpoint. A retried dispatch reads it to
/// skip mediums that already went out.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliveryLog {
    pub id: Uuid,
    pub notification_id: Uuid,
    pub medium: String,
    pub status: DeliveryStatus,
    pub attempts: u32,
    pub last_attempt_at: Option<DateTime<Utc>>,
    pub response: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl DeliveryLog {
    pub fn new(notification_id: Uuid, medium: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            notification_id,
            medium: medium.to_string(),
            status: DeliveryStatus::Pending,
            attempts: 0,
            last_attempt_at: None,
            response: None,
            created_at: Utc::now(),
        }
    }

    pub fn is_sent(&self) -> bool {
        self.status == DeliveryStatus::Sent
    }

    pub fn record_success(&mut self, message: String, at: DateTime<Utc>) {
        self.record_attempt(DeliveryStatus::Sent, message, at);
    }

    pub fn record_failure(&mut self, error: String, at: DateTime<Utc>) {
        self.record_attempt(DeliveryStatus::Failed, error, at);
    }

    fn record_attempt(&mut self, status: DeliveryStatus, response: String, at: DateTime<Utc>) {
        self.status = status;
        self.response = Some(response);
        self.last_attempt_at = Some(at);
        self.attempts += 1;
    }
}
