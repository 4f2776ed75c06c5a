use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::status::DeliveryStatus;

/// Durable unit of work: send the rendered template to one recipient via
/// every listed medium.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub id: Uuid,
    pub recipient_id: String,
    pub recipient_contact: HashMap<String, String>,
    pub mediums: Vec<String>,
    pub template_name: String,
    pub context_data: HashMap<String, serde_json::Value>,
    pub status: DeliveryStatus,
    pub created_at: DateTime<Utc>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
}

impl Notification {
    pub fn new(
        recipient_id: String,
        recipient_contact: HashMap<String, String>,
        mediums: Vec<String>,
        template_name: String,
        context_data: HashMap<String, serde_json::Value>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            recipient_id,
            recipient_contact,
            mediums: dedup_mediums(mediums),
            template_name,
            context_data,
            status: DeliveryStatus::Pending,
            created_at: Utc::now(),
            task_id: None,
        }
    }

    /// Non-empty address for a contact channel such as `email` or `phone`.
    pub fn contact(&self, channel: &str) -> Option<&str> {
        self.recipient_contact
            .get(channel)
            .map(String::as_str)
            .filter(|address| !address.trim().is_empty())
    }
}

/// Keeps the first occurrence of each medium, preserving order.
pub fn dedup_mediums(mediums: Vec<String>) -> Vec<String> {
    let mut unique: Vec<String> = Vec::with_capacity(mediums.len());
    for medium in mediums {
        if !unique.contains(&medium) {
            unique.push(medium);
        }
    }
    unique
}

/// Producer-side request; becomes a [`Notification`] once validated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewNotification {
    pub recipient_id: String,
    pub recipient_contact: HashMap<String, String>,
    pub mediums: Vec<String>,
    pub template_name: String,

    #[serde(default)]
    pub context_data: HashMap<String, serde_json::Value>,
}

impl From<NewNotification> for Notification {
    fn from(new: NewNotification) -> Self {
        Notification::new(
            new.recipient_id,
            new.recipient_contact,
            new.mediums,
            new.template_name,
            new.context_data,
        )
    }
}
