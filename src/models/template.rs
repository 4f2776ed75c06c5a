use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::status::DeliveryStatus;

/// Medium-scoped template; `(name, medium)` is unique.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Template {
    pub id: Uuid,
    pub name: String,
    pub medium: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

impl Template {
    pub fn new(name: &str, medium: &str, content: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.to_string(),
            medium: medium.to_string(),
            content: content.to_string(),
            created_at: Utc::now(),
        }
    }
}

/// What a medium hands to its transport after rendering.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OutboundMessage {
    pub notification_id: Uuid,
    pub medium: String,
    pub to: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,

    pub body: String,
}

/// Outcome reported by a medium on success.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeliveryResult {
    pub status: DeliveryStatus,
    pub message: String,
}
