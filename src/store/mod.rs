//! Storage contracts consumed by the dispatch engine.
//!
//! Every write is a single-document create-or-update. The only uniqueness the
//! engine relies on is one delivery log per (notification, medium), which
//! implementations must enforce atomically in `find_or_create_log`.

pub mod memory;

use async_trait::async_trait;
use chrono::NaiveDate;
use uuid::Uuid;

use crate::{
    error::StorageError,
    models::{
        delivery_log::DeliveryLog,
        notification::Notification,
        summary::{MerchantContact, TransactionSummary},
        template::Template,
    },
};

#[async_trait]
pub trait NotificationStore: Send + Sync {
    async fn get_notification(&self, id: Uuid) -> Result<Option<Notification>, StorageError>;

    async fn save_notification(&self, notification: &Notification) -> Result<(), StorageError>;

    /// Inserts `notification` unless a record with its id already exists.
    /// Returns whether this call created it.
    async fn create_notification(
        &self,
        notification: &Notification,
    ) -> Result<bool, StorageError>;
}

#[async_trait]
pub trait DeliveryLogStore: Send + Sync {
    /// Returns the existing log for the pair or atomically creates a pending
    /// one. Concurrent callers always observe the same row.
    async fn find_or_create_log(
        &self,
        notification_id: Uuid,
        medium: &str,
    ) -> Result<DeliveryLog, StorageError>;

    async fn save_log(&self, log: &DeliveryLog) -> Result<(), StorageError>;

    async fn list_logs(&self, notification_id: Uuid) -> Result<Vec<DeliveryLog>, StorageError>;
}

#[async_trait]
pub trait TemplateStore: Send + Sync {
    async fn find_template(
        &self,
        name: &str,
        medium: &str,
    ) -> Result<Option<Template>, StorageError>;

    /// Seeding/administration only; the dispatcher never writes templates.
    async fn save_template(&self, template: &Template) -> Result<(), StorageError>;
}

/// Read side of the aggregation job's output.
#[async_trait]
pub trait SummarySource: Send + Sync {
    async fn daily_summaries(
        &self,
        date: NaiveDate,
    ) -> Result<Vec<TransactionSummary>, StorageError>;
}

#[async_trait]
pub trait MerchantDirectory: Send + Sync {
    async fn merchant_contact(
        &self,
        merchant_id: &str,
    ) -> Result<Option<MerchantContact>, StorageError>;
}
