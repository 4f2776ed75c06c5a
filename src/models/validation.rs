use anyhow::{Result, anyhow};

use crate::models::notification::NewNotification;

pub fn validate_new_notification(notification: &NewNotification) -> Result<()> {
    if notification.recipient_id.trim().is_empty() {
        return Err(anyhow!("Recipient id cannot be empty"));
    }

    if notification.mediums.is_empty() {
        return Err(anyhow!("At least one medium is required"));
    }

    if let Some(medium) = notification.mediums.iter().find(|m| !is_medium_name(m)) {
        return Err(anyhow!("Invalid medium name '{}'", medium));
    }

    if notification.template_name.trim().is_empty() {
        return Err(anyhow!("Template name cannot be empty"));
    }

    Ok(())
}

fn is_medium_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '-')
}
