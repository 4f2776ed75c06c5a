//! Notification producers: the generic submit path and the daily merchant
//! report built on top of it.

use std::{
    collections::{BTreeMap, HashMap},
    sync::Arc,
    time::Duration,
};

use chrono::{Days, NaiveDate, Utc};
use serde_json::json;
use tokio::{sync::watch, time::MissedTickBehavior};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::{
    error::ProducerError,
    models::{
        notification::{NewNotification, Notification},
        summary::{StatType, TransactionSummary},
        task::DispatchTask,
        validation::validate_new_notification,
    },
    queue::TaskQueue,
    store::{MerchantDirectory, NotificationStore, SummarySource},
};

pub struct NotificationProducer {
    notifications: Arc<dyn NotificationStore>,
    queue: Arc<dyn TaskQueue>,
}

impl NotificationProducer {
    pub fn new(notifications: Arc<dyn NotificationStore>, queue: Arc<dyn TaskQueue>) -> Self {
        Self {
            notifications,
            queue,
        }
    }

    /// Persists a pending notification, enqueues its dispatch task and
    /// stores the task id back on the record.
    pub async fn submit(&self, request: NewNotification) -> Result<Notification, ProducerError> {
        validate_new_notification(&request).map_err(|e| ProducerError::Invalid(e.to_string()))?;

        let notification = Notification::from(request);
        self.notifications.save_notification(&notification).await?;

        self.enqueue(notification).await
    }

    /// Like [`submit`](Self::submit) but under a caller-chosen id. Returns
    /// `None` when a notification with that id was already submitted. A
    /// record left without a task by an interrupted earlier call is enqueued.
    pub async fn submit_once(
        &self,
        id: Uuid,
        request: NewNotification,
    ) -> Result<Option<Notification>, ProducerError> {
        validate_new_notification(&request).map_err(|e| ProducerError::Invalid(e.to_string()))?;

        let mut notification = Notification::from(request);
        notification.id = id;

        if !self.notifications.create_notification(&notification).await? {
            match self.notifications.get_notification(id).await? {
                Some(existing) if existing.task_id.is_none() => notification = existing,
                _ => {
                    info!(notification_id = %id, "Notification already submitted, skipping");
                    return Ok(None);
                }
            }
        }

        self.enqueue(notification).await.map(Some)
    }

    async fn enqueue(&self, mut notification: Notification) -> Result<Notification, ProducerError> {
        let handle = self
            .queue
            .enqueue(&DispatchTask::new(notification.id))
            .await?;

        notification.task_id = Some(handle.id);
        self.notifications.save_notification(&notification).await?;

        info!(
            notification_id = %notification.id,
            task_id = ?notification.task_id,
            mediums = ?notification.mediums,
            template = %notification.template_name,
            "Notification submitted"
        );

        Ok(notification)
    }
}

/// Stable id of one merchant's report for one day. Running the report again
/// for the same date maps onto the same notification.
pub fn report_notification_id(
    template_name: &str,
    merchant_id: &str,
    report_date: NaiveDate,
) -> Uuid {
    let key = format!(
        "{}/{}/{}",
        template_name,
        merchant_id,
        report_date.format("%Y-%m-%d")
    );
    Uuid::new_v5(&Uuid::NAMESPACE_OID, key.as_bytes())
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReportRun {
    pub submitted: Vec<Notification>,
    pub skipped_merchants: Vec<String>,
    /// Merchants whose report for the date had been submitted by an earlier run.
    pub already_submitted: Vec<String>,
}

#[derive(Debug, Default)]
struct MerchantTotals {
    count: Option<serde_json::Value>,
    amount: Option<serde_json::Value>,
}

pub struct DailyReportProducer {
    producer: NotificationProducer,
    summaries: Arc<dyn SummarySource>,
    merchants: Arc<dyn MerchantDirectory>,
    template_name: String,
    mediums: Vec<String>,
}

impl DailyReportProducer {
    pub fn new(
        producer: NotificationProducer,
        summaries: Arc<dyn SummarySource>,
        merchants: Arc<dyn MerchantDirectory>,
        template_name: String,
        mediums: Vec<String>,
    ) -> Self {
        Self {
            producer,
            summaries,
            merchants,
            template_name,
            mediums,
        }
    }

    /// One notification per merchant that has both a count and an amount
    /// summary for `report_date` and known contact details. Safe to repeat
    /// for a date: each merchant's report is submitted at most once.
    pub async fn run(&self, report_date: NaiveDate) -> Result<ReportRun, ProducerError> {
        let summaries = self.summaries.daily_summaries(report_date).await?;
        let totals = group_by_merchant(summaries);
        let date_str = report_date.format("%Y-%m-%d").to_string();

        let mut run = ReportRun::default();

        for (merchant_id, totals) in totals {
            let (Some(count), Some(amount)) = (totals.count, totals.amount) else {
                info!(merchant_id = %merchant_id, "Incomplete summaries, skipping merchant");
                run.skipped_merchants.push(merchant_id);
                continue;
            };

            let Some(merchant) = self.merchants.merchant_contact(&merchant_id).await? else {
                warn!(merchant_id = %merchant_id, "No contact info for merchant, skipping");
                run.skipped_merchants.push(merchant_id);
                continue;
            };

            let mut recipient_contact = HashMap::new();
            if let Some(email) = merchant.email {
                recipient_contact.insert("email".to_string(), email);
            }
            if let Some(phone) = merchant.phone {
                recipient_contact.insert("phone".to_string(), phone);
            }

            let context_data = HashMap::from([
                ("merchant_name".to_string(), json!(merchant.name)),
                ("transaction_count".to_string(), count),
                ("transaction_amount".to_string(), amount),
                ("date".to_string(), json!(date_str)),
            ]);

            let id = report_notification_id(&self.template_name, &merchant_id, report_date);
            let submitted = self
                .producer
                .submit_once(
                    id,
                    NewNotification {
                        recipient_id: merchant_id.clone(),
                        recipient_contact,
                        mediums: self.mediums.clone(),
                        template_name: self.template_name.clone(),
                        context_data,
                    },
                )
                .await?;

            match submitted {
                Some(notification) => run.submitted.push(notification),
                None => run.already_submitted.push(merchant_id),
            }
        }

        info!(
            report_date = %date_str,
            submitted = run.submitted.len(),
            skipped = run.skipped_merchants.len(),
            already_submitted = run.already_submitted.len(),
            "Daily report run finished"
        );

        Ok(run)
    }

    pub async fn run_for_yesterday(&self) -> Result<ReportRun, ProducerError> {
        let report_date = Utc::now()
            .date_naive()
            .checked_sub_days(Days::new(1))
            .ok_or_else(|| ProducerError::Invalid("report date out of range".to_string()))?;

        self.run(report_date).await
    }
}

fn group_by_merchant(summaries: Vec<TransactionSummary>) -> BTreeMap<String, MerchantTotals> {
    let mut totals: BTreeMap<String, MerchantTotals> = BTreeMap::new();
    for summary in summaries {
        let entry = totals.entry(summary.merchant_id).or_default();
        match summary.stat_type {
            StatType::Count => entry.count = Some(summary.value),
            StatType::Amount => entry.amount = Some(summary.value),
        }
    }
    totals
}

/// Runs the daily report on start and then every `interval` until
/// `shutdown` flips. A failed run is logged and retried on the next tick.
pub async fn run_report_scheduler(
    producer: Arc<DailyReportProducer>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    if interval.is_zero() {
        error!("Report interval must be greater than zero, scheduler not started");
        return;
    }

    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    info!(interval_secs = interval.as_secs(), "Daily report scheduler started");

    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = ticker.tick() => {
                if let Err(e) = producer.run_for_yesterday().await {
                    error!(error = %e, "Daily report run failed");
                }
            }
        }
    }

    info!("Daily report scheduler stopped");
}
