use std::collections::HashMap;

use anyhow::{Error, Result, anyhow};
use async_trait::async_trait;
use chrono::NaiveDate;
use tokio_postgres::{Client, NoTls, Row};
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::{
    error::StorageError,
    models::{
        delivery_log::DeliveryLog,
        notification::{Notification, dedup_mediums},
        status::DeliveryStatus,
        summary::{MerchantContact, StatType, TransactionSummary},
        template::Template,
    },
    store::{DeliveryLogStore, MerchantDirectory, NotificationStore, SummarySource, TemplateStore},
};

const SCHEMA: &str = include_str!("../../migrations/0001_init.sql");

const LOG_COLUMNS: &str =
    "id, notification_id, medium, status, attempts, last_attempt_at, response, created_at";

/// PostgreSQL-backed store. Document-shaped fields (contact map, context) are
/// kept in JSONB columns.
pub struct DatabaseClient {
    client: Client,
}

impl DatabaseClient {
    pub async fn connect(database_url: &str) -> Result<Self, Error> {
        info!("Connecting to PostgreSQL database");

        let (client, connection) = tokio_postgres::connect(database_url, NoTls)
            .await
            .map_err(|e| anyhow!("Failed to connect to database: {}", e))?;

        tokio::spawn(async move {
            if let Err(e) = connection.await {
                error!(error = %e, "PostgreSQL connection closed with error");
            }
        });

        info!("PostgreSQL connection established");

        Ok(Self { client })
    }

    pub async fn migrate(&self) -> Result<(), Error> {
        self.client
            .batch_execute(SCHEMA)
            .await
            .map_err(|e| anyhow!("Failed to apply schema: {}", e))?;

        info!("Database schema applied");
        Ok(())
    }

    pub async fn health_check(&self) -> Result<(), Error> {
        self.client
            .query_one("SELECT 1", &[])
            .await
            .map_err(|e| anyhow!("Database health check failed: {}", e))?;

        Ok(())
    }
}

fn parse_status(value: &str) -> Result<DeliveryStatus, StorageError> {
    value.parse().map_err(StorageError::Corrupt)
}

fn notification_from_row(row: &Row) -> Result<Notification, StorageError> {
    let contact: serde_json::Value = row.try_get("recipient_contact")?;
    let context: serde_json::Value = row.try_get("context_data")?;
    let status: String = row.try_get("status")?;
    let mediums: Vec<String> = row.try_get("mediums")?;

    Ok(Notification {
        id: row.try_get("id")?,
        recipient_id: row.try_get("recipient_id")?,
        recipient_contact: serde_json::from_value(contact)?,
        mediums: dedup_mediums(mediums),
        template_name: row.try_get("template_name")?,
        context_data: serde_json::from_value::<HashMap<String, serde_json::Value>>(context)?,
        status: parse_status(&status)?,
        created_at: row.try_get("created_at")?,
        task_id: row.try_get("task_id")?,
    })
}

fn log_from_row(row: &Row) -> Result<DeliveryLog, StorageError> {
    let status: String = row.try_get("status")?;
    let attempts: i32 = row.try_get("attempts")?;

    Ok(DeliveryLog {
        id: row.try_get("id")?,
        notification_id: row.try_get("notification_id")?,
        medium: row.try_get("medium")?,
        status: parse_status(&status)?,
        attempts: u32::try_from(attempts)
            .map_err(|_| StorageError::Corrupt(format!("negative attempts: {}", attempts)))?,
        last_attempt_at: row.try_get("last_attempt_at")?,
        response: row.try_get("response")?,
        created_at: row.try_get("created_at")?,
    })
}

#[async_trait]
impl NotificationStore for DatabaseClient {
    async fn get_notification(&self, id: Uuid) -> Result<Option<Notification>, StorageError> {
        let row = self
            .client
            .query_opt(
                "SELECT id, recipient_id, recipient_contact, mediums, template_name, \
                 context_data, status, created_at, task_id \
                 FROM notifications WHERE id = $1",
                &[&id],
            )
            .await?;

        row.as_ref().map(notification_from_row).transpose()
    }

    async fn save_notification(&self, notification: &Notification) -> Result<(), StorageError> {
        let contact = serde_json::to_value(&notification.recipient_contact)?;
        let context = serde_json::to_value(&notification.context_data)?;

        self.client
            .execute(
                "INSERT INTO notifications (id, recipient_id, recipient_contact, mediums, \
                 template_name, context_data, status, created_at, task_id) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9) \
                 ON CONFLICT (id) DO UPDATE SET \
                 recipient_id = EXCLUDED.recipient_id, \
                 recipient_contact = EXCLUDED.recipient_contact, \
                 mediums = EXCLUDED.mediums, \
                 template_name = EXCLUDED.template_name, \
                 context_data = EXCLUDED.context_data, \
                 status = EXCLUDED.status, \
                 task_id = EXCLUDED.task_id",
                &[
                    &notification.id,
                    &notification.recipient_id,
                    &contact,
                    &notification.mediums,
                    &notification.template_name,
                    &context,
                    &notification.status.as_str(),
                    &notification.created_at,
                    &notification.task_id,
                ],
            )
            .await?;

        debug!(
            notification_id = %notification.id,
            status = %notification.status,
            "Notification saved"
        );

        Ok(())
    }

    async fn create_notification(
        &self,
        notification: &Notification,
    ) -> Result<bool, StorageError> {
        let contact = serde_json::to_value(&notification.recipient_contact)?;
        let context = serde_json::to_value(&notification.context_data)?;

        let inserted = self
            .client
            .execute(
                "INSERT INTO notifications (id, recipient_id, recipient_contact, mediums, \
                 template_name, context_data, status, created_at, task_id) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9) \
                 ON CONFLICT (id) DO NOTHING",
                &[
                    &notification.id,
                    &notification.recipient_id,
                    &contact,
                    &notification.mediums,
                    &notification.template_name,
                    &context,
                    &notification.status.as_str(),
                    &notification.created_at,
                    &notification.task_id,
                ],
            )
            .await?;

        Ok(inserted == 1)
    }
}

#[async_trait]
impl DeliveryLogStore for DatabaseClient {
    async fn find_or_create_log(
        &self,
        notification_id: Uuid,
        medium: &str,
    ) -> Result<DeliveryLog, StorageError> {
        let fresh = DeliveryLog::new(notification_id, medium);

        // The no-op update makes RETURNING yield the existing row on conflict.
        let query = format!(
            "INSERT INTO delivery_logs (id, notification_id, medium, status, attempts, created_at) \
             VALUES ($1, $2, $3, $4, 0, $5) \
             ON CONFLICT (notification_id, medium) DO UPDATE SET medium = EXCLUDED.medium \
             RETURNING {}",
            LOG_COLUMNS
        );
        let row = self
            .client
            .query_one(
                query.as_str(),
                &[
                    &fresh.id,
                    &notification_id,
                    &medium,
                    &fresh.status.as_str(),
                    &fresh.created_at,
                ],
            )
            .await?;

        log_from_row(&row)
    }

    async fn save_log(&self, log: &DeliveryLog) -> Result<(), StorageError> {
        let attempts = i32::try_from(log.attempts)
            .map_err(|_| StorageError::Corrupt(format!("attempts overflow: {}", log.attempts)))?;

        let updated = self
            .client
            .execute(
                "UPDATE delivery_logs SET status = $2, attempts = $3, last_attempt_at = $4, \
                 response = $5 WHERE id = $1",
                &[
                    &log.id,
                    &log.status.as_str(),
                    &attempts,
                    &log.last_attempt_at,
                    &log.response,
                ],
            )
            .await?;

        if updated == 0 {
            return Err(StorageError::Corrupt(format!(
                "delivery log {} does not exist",
                log.id
            )));
        }

        debug!(
            notification_id = %log.notification_id,
            medium = %log.medium,
            status = %log.status,
            attempts = log.attempts,
            "Delivery log saved"
        );

        Ok(())
    }

    async fn list_logs(&self, notification_id: Uuid) -> Result<Vec<DeliveryLog>, StorageError> {
        let query = format!(
            "SELECT {} FROM delivery_logs WHERE notification_id = $1 ORDER BY created_at",
            LOG_COLUMNS
        );
        let rows = self.client.query(query.as_str(), &[&notification_id]).await?;

        rows.iter().map(log_from_row).collect()
    }
}

#[async_trait]
impl TemplateStore for DatabaseClient {
    async fn find_template(
        &self,
        name: &str,
        medium: &str,
    ) -> Result<Option<Template>, StorageError> {
        let row = self
            .client
            .query_opt(
                "SELECT id, name, medium, content, created_at FROM notification_templates \
                 WHERE name = $1 AND medium = $2",
                &[&name, &medium],
            )
            .await?;

        row.map(|row| -> Result<Template, StorageError> {
            Ok(Template {
                id: row.try_get("id")?,
                name: row.try_get("name")?,
                medium: row.try_get("medium")?,
                content: row.try_get("content")?,
                created_at: row.try_get("created_at")?,
            })
        })
        .transpose()
    }

    async fn save_template(&self, template: &Template) -> Result<(), StorageError> {
        self.client
            .execute(
                "INSERT INTO notification_templates (id, name, medium, content, created_at) \
                 VALUES ($1, $2, $3, $4, $5) \
                 ON CONFLICT (name, medium) DO UPDATE SET content = EXCLUDED.content",
                &[
                    &template.id,
                    &template.name,
                    &template.medium,
                    &template.content,
                    &template.created_at,
                ],
            )
            .await?;

        Ok(())
    }
}

#[async_trait]
impl SummarySource for DatabaseClient {
    async fn daily_summaries(
        &self,
        date: NaiveDate,
    ) -> Result<Vec<TransactionSummary>, StorageError> {
        let rows = self
            .client
            .query(
                "SELECT merchant_id, stat_type, to_jsonb(value) AS value, date \
                 FROM transaction_summaries \
                 WHERE mode = 'daily' AND date = $1 AND merchant_id IS NOT NULL",
                &[&date],
            )
            .await?;

        rows.iter()
            .map(|row| -> Result<TransactionSummary, StorageError> {
                let stat_type: String = row.try_get("stat_type")?;
                let stat_type = match stat_type.as_str() {
                    "count" => StatType::Count,
                    "amount" => StatType::Amount,
                    other => {
                        return Err(StorageError::Corrupt(format!(
                            "unknown stat_type '{}'",
                            other
                        )));
                    }
                };

                Ok(TransactionSummary {
                    merchant_id: row.try_get("merchant_id")?,
                    stat_type,
                    value: row.try_get("value")?,
                    date: row.try_get("date")?,
                })
            })
            .collect()
    }
}

#[async_trait]
impl MerchantDirectory for DatabaseClient {
    async fn merchant_contact(
        &self,
        merchant_id: &str,
    ) -> Result<Option<MerchantContact>, StorageError> {
        let row = self
            .client
            .query_opt(
                "SELECT id, name, email, phone FROM merchants WHERE id = $1",
                &[&merchant_id],
            )
            .await?;

        row.map(|row| -> Result<MerchantContact, StorageError> {
            Ok(MerchantContact {
                merchant_id: row.try_get("id")?,
                name: row.try_get("name")?,
                email: row.try_get("email")?,
                phone: row.try_get("phone")?,
            })
        })
        .transpose()
    }
}
