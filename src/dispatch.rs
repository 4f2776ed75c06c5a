//! Dispatch orchestrator.
//!
//! One call to [`Dispatcher::dispatch`] walks a notification's mediums in
//! order. Each medium's progress is checkpointed in its delivery log before
//! anything else happens, so a later call picks up at the first medium that
//! has not been sent yet. The dispatcher never reschedules itself; a returned
//! error means "run the whole task again" and the caller owns that decision.

use std::{collections::HashSet, sync::Arc};

use chrono::Utc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    error::DispatchError,
    mediums::MediumRegistry,
    models::{notification::Notification, status::DeliveryStatus},
    store::{DeliveryLogStore, NotificationStore},
};

#[derive(Debug, Clone, PartialEq)]
pub enum DispatchOutcome {
    /// The notification no longer exists; nothing to do.
    NotFound,
    /// Already fully delivered by an earlier run.
    AlreadySent,
    Completed(DispatchReport),
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DispatchReport {
    pub delivered: Vec<String>,
    pub already_sent: Vec<String>,
    pub unregistered: Vec<String>,
}

/// Result of one medium step when it does not need a retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    Delivered,
    AlreadySent,
    Unregistered,
}

pub struct Dispatcher {
    notifications: Arc<dyn NotificationStore>,
    delivery_logs: Arc<dyn DeliveryLogStore>,
    registry: Arc<MediumRegistry>,
}

impl Dispatcher {
    pub fn new(
        notifications: Arc<dyn NotificationStore>,
        delivery_logs: Arc<dyn DeliveryLogStore>,
        registry: Arc<MediumRegistry>,
    ) -> Self {
        Self {
            notifications,
            delivery_logs,
            registry,
        }
    }

    pub async fn dispatch(&self, notification_id: Uuid) -> Result<DispatchOutcome, DispatchError> {
        let Some(mut notification) = self.notifications.get_notification(notification_id).await?
        else {
            info!(notification_id = %notification_id, "Notification not found, nothing to dispatch");
            return Ok(DispatchOutcome::NotFound);
        };

        if notification.status == DeliveryStatus::Sent {
            info!(notification_id = %notification_id, "Notification already sent, skipping");
            return Ok(DispatchOutcome::AlreadySent);
        }

        let mut report = DispatchReport::default();
        {
            let mut seen = HashSet::new();
            for medium in &notification.mediums {
                if !seen.insert(medium.as_str()) {
                    continue;
                }

                match self.deliver_via(&notification, medium).await? {
                    StepOutcome::Delivered => report.delivered.push(medium.clone()),
                    StepOutcome::AlreadySent => report.already_sent.push(medium.clone()),
                    StepOutcome::Unregistered => report.unregistered.push(medium.clone()),
                }
            }
        }

        notification.status = DeliveryStatus::Sent;
        self.notifications.save_notification(&notification).await?;

        info!(
            notification_id = %notification_id,
            delivered = ?report.delivered,
            already_sent = ?report.already_sent,
            unregistered = ?report.unregistered,
            "Notification fully dispatched"
        );

        Ok(DispatchOutcome::Completed(report))
    }

    /// Runs one medium. A send failure is written to the log before it is
    /// returned.
    pub async fn deliver_via(
        &self,
        notification: &Notification,
        medium_name: &str,
    ) -> Result<StepOutcome, DispatchError> {
        let Some(medium) = self.registry.get(medium_name) else {
            warn!(
                notification_id = %notification.id,
                medium = medium_name,
                "No handler registered for medium, skipping"
            );
            return Ok(StepOutcome::Unregistered);
        };

        let mut log = self
            .delivery_logs
            .find_or_create_log(notification.id, medium_name)
            .await?;

        if log.is_sent() {
            debug!(
                notification_id = %notification.id,
                medium = medium_name,
                "Medium already delivered, skipping"
            );
            return Ok(StepOutcome::AlreadySent);
        }

        match medium.send(notification).await {
            Ok(result) => {
                log.record_success(result.message, Utc::now());
                self.delivery_logs.save_log(&log).await?;

                info!(
                    notification_id = %notification.id,
                    medium = medium_name,
                    attempts = log.attempts,
                    "Medium delivered"
                );
                Ok(StepOutcome::Delivered)
            }
            Err(e) => {
                log.record_failure(e.to_string(), Utc::now());
                self.delivery_logs.save_log(&log).await?;

                warn!(
                    notification_id = %notification.id,
                    medium = medium_name,
                    attempts = log.attempts,
                    error = %e,
                    "Medium delivery failed"
                );
                Err(DispatchError::Medium {
                    medium: medium_name.to_string(),
                    source: e,
                })
            }
        }
    }

    /// Terminal failure: used when the runner gives up on a permanent error.
    pub async fn mark_failed(&self, notification_id: Uuid) -> Result<(), DispatchError> {
        if let Some(mut notification) = self.notifications.get_notification(notification_id).await? {
            if notification.status == DeliveryStatus::Pending {
                notification.status = DeliveryStatus::Failed;
                self.notifications.save_notification(&notification).await?;
                warn!(notification_id = %notification_id, "Notification marked as failed");
            }
        }
        Ok(())
    }
}
