//! Process-local store used by tests and by `STORAGE_BACKEND=memory`.

use std::collections::{HashMap, hash_map::Entry};

use async_trait::async_trait;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::{
    error::StorageError,
    models::{delivery_log::DeliveryLog, notification::Notification, template::Template},
    store::{DeliveryLogStore, NotificationStore, TemplateStore},
};

#[derive(Default)]
pub struct MemoryStore {
    notifications: RwLock<HashMap<Uuid, Notification>>,
    logs: RwLock<HashMap<(Uuid, String), DeliveryLog>>,
    templates: RwLock<HashMap<(String, String), Template>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl NotificationStore for MemoryStore {
    async fn get_notification(&self, id: Uuid) -> Result<Option<Notification>, StorageError> {
        Ok(self.notifications.read().await.get(&id).cloned())
    }

    async fn save_notification(&self, notification: &Notification) -> Result<(), StorageError> {
        let mut notifications = self.notifications.write().await;
        let mut record = notification.clone();
        if let Some(existing) = notifications.get(&notification.id) {
            record.created_at = existing.created_at;
        }
        notifications.insert(record.id, record);
        Ok(())
    }

    async fn create_notification(
        &self,
        notification: &Notification,
    ) -> Result<bool, StorageError> {
        match self.notifications.write().await.entry(notification.id) {
            Entry::Occupied(_) => Ok(false),
            Entry::Vacant(slot) => {
                slot.insert(notification.clone());
                Ok(true)
            }
        }
    }
}

#[async_trait]
impl DeliveryLogStore for MemoryStore {
    async fn find_or_create_log(
        &self,
        notification_id: Uuid,
        medium: &str,
    ) -> Result<DeliveryLog, StorageError> {
        let mut logs = self.logs.write().await;
        let log = logs
            .entry((notification_id, medium.to_string()))
            .or_insert_with(|| DeliveryLog::new(notification_id, medium));
        Ok(log.clone())
    }

    async fn save_log(&self, log: &DeliveryLog) -> Result<(), StorageError> {
        let mut logs = self.logs.write().await;
        let key = (log.notification_id, log.medium.clone());
        match logs.get(&key) {
            Some(existing) if existing.id != log.id => Err(StorageError::Corrupt(format!(
                "delivery log for {}/{} already exists with id {}",
                log.notification_id, log.medium, existing.id
            ))),
            _ => {
                logs.insert(key, log.clone());
                Ok(())
            }
        }
    }

    async fn list_logs(&self, notification_id: Uuid) -> Result<Vec<DeliveryLog>, StorageError> {
        let mut logs: Vec<DeliveryLog> = self
            .logs
            .read()
            .await
            .values()
            .filter(|log| log.notification_id == notification_id)
            .cloned()
            .collect();
        logs.sort_by_key(|log| log.created_at);
        Ok(logs)
    }
}

#[async_trait]
impl TemplateStore for MemoryStore {
    async fn find_template(
        &self,
        name: &str,
        medium: &str,
    ) -> Result<Option<Template>, StorageError> {
        let key = (name.to_string(), medium.to_string());
        Ok(self.templates.read().await.get(&key).cloned())
    }

    async fn save_template(&self, template: &Template) -> Result<(), StorageError> {
        let key = (template.name.clone(), template.medium.clone());
        self.templates.write().await.insert(key, template.clone());
        Ok(())
    }
}
