//! Task-queue side of dispatch: runs one task, applies the retry policy and
//! drives the broker consumer loop.

use std::{sync::Arc, time::Duration};

use anyhow::{Error, Result, anyhow};
use async_trait::async_trait;
use futures_util::StreamExt;
use lapin::{
    Consumer,
    message::Delivery,
    options::{BasicAckOptions, BasicNackOptions, BasicRejectOptions},
};
use tokio::sync::{Semaphore, watch};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::{
    dispatch::{DispatchOutcome, Dispatcher},
    error::{DispatchError, QueueError},
    models::{
        retry::TaskRetryPolicy,
        task::{DeadLetter, DispatchTask},
    },
    queue::TaskQueue,
};

/// Mutual exclusion per notification across workers. `owner` is the task id,
/// and re-acquiring a lease one already owns succeeds.
#[async_trait]
pub trait DispatchLease: Send + Sync {
    async fn try_acquire(&self, notification_id: Uuid, owner: &str) -> Result<bool, DispatchError>;

    async fn release(&self, notification_id: Uuid, owner: &str) -> Result<(), DispatchError>;
}

#[derive(Debug, Clone, PartialEq)]
pub enum TaskDisposition {
    Completed(DispatchOutcome),
    /// Another task currently holds the notification's lease.
    Duplicate,
    RetryScheduled { retries: u32, delay: Duration },
    DeadLettered { reason: String, permanent: bool },
}

const DEFAULT_REQUEUE_DELAY: Duration = Duration::from_secs(5);

pub struct TaskRunner {
    dispatcher: Arc<Dispatcher>,
    queue: Arc<dyn TaskQueue>,
    lease: Option<Arc<dyn DispatchLease>>,
    policy: TaskRetryPolicy,
    requeue_delay: Duration,
}

impl TaskRunner {
    pub fn new(
        dispatcher: Arc<Dispatcher>,
        queue: Arc<dyn TaskQueue>,
        policy: TaskRetryPolicy,
    ) -> Self {
        Self {
            dispatcher,
            queue,
            lease: None,
            policy,
            requeue_delay: DEFAULT_REQUEUE_DELAY,
        }
    }

    pub fn with_lease(mut self, lease: Arc<dyn DispatchLease>) -> Self {
        self.lease = Some(lease);
        self
    }

    /// Pause before reporting a queue failure, so a message handed straight
    /// back to the broker is not redelivered in a tight loop.
    pub fn with_requeue_delay(mut self, delay: Duration) -> Self {
        self.requeue_delay = delay;
        self
    }

    /// Errors only when the queue itself could not take a retry or dead
    /// letter, after waiting out the requeue delay; the caller should then
    /// hand the message back to the broker.
    pub async fn run(&self, task: DispatchTask) -> Result<TaskDisposition, QueueError> {
        info!(
            task_id = %task.task_id,
            notification_id = %task.notification_id,
            retries = task.retries,
            "Running dispatch task"
        );

        match self.dispatch_leased(&task).await {
            Ok(Some(outcome)) => Ok(TaskDisposition::Completed(outcome)),
            Ok(None) => {
                info!(
                    task_id = %task.task_id,
                    notification_id = %task.notification_id,
                    "Notification is being dispatched elsewhere, skipping"
                );
                Ok(TaskDisposition::Duplicate)
            }
            Err(e) => {
                let result = self.handle_failure(task, e).await;
                if let Err(e) = &result {
                    warn!(
                        error = %e,
                        delay_ms = self.requeue_delay.as_millis() as u64,
                        "Queue rejected the follow-up, backing off before requeue"
                    );
                    tokio::time::sleep(self.requeue_delay).await;
                }
                result
            }
        }
    }

    async fn dispatch_leased(
        &self,
        task: &DispatchTask,
    ) -> Result<Option<DispatchOutcome>, DispatchError> {
        let Some(lease) = &self.lease else {
            return self.dispatcher.dispatch(task.notification_id).await.map(Some);
        };

        if !lease.try_acquire(task.notification_id, &task.task_id).await? {
            return Ok(None);
        }

        let result = self.dispatcher.dispatch(task.notification_id).await;

        // An unreleased lease expires on its own.
        if let Err(e) = lease.release(task.notification_id, &task.task_id).await {
            warn!(
                notification_id = %task.notification_id,
                error = %e,
                "Failed to release dispatch lease"
            );
        }

        result.map(Some)
    }

    async fn handle_failure(
        &self,
        task: DispatchTask,
        error: DispatchError,
    ) -> Result<TaskDisposition, QueueError> {
        let reason = error.to_string();

        if self.policy.fail_fast_on_permanent && error.is_permanent() {
            if let Err(e) = self.dispatcher.mark_failed(task.notification_id).await {
                warn!(
                    notification_id = %task.notification_id,
                    error = %e,
                    "Failed to mark notification as failed"
                );
            }

            error!(
                task_id = %task.task_id,
                notification_id = %task.notification_id,
                error = %reason,
                "Permanent dispatch failure, dead-lettering without retry"
            );
            self.queue
                .dead_letter(&DeadLetter::new(task, reason.clone()))
                .await?;
            return Ok(TaskDisposition::DeadLettered {
                reason,
                permanent: true,
            });
        }

        if task.retries < self.policy.max_retries {
            let next = task.next_attempt();
            self.queue
                .schedule_retry(&next, self.policy.retry_delay)
                .await?;

            warn!(
                task_id = %next.task_id,
                notification_id = %next.notification_id,
                retries = next.retries,
                max_retries = self.policy.max_retries,
                delay_secs = self.policy.retry_delay.as_secs(),
                error = %reason,
                "Dispatch failed, retry scheduled"
            );
            return Ok(TaskDisposition::RetryScheduled {
                retries: next.retries,
                delay: self.policy.retry_delay,
            });
        }

        error!(
            task_id = %task.task_id,
            notification_id = %task.notification_id,
            max_retries = self.policy.max_retries,
            error = %reason,
            "Dispatch retries exhausted, notification left pending"
        );
        self.queue
            .dead_letter(&DeadLetter::new(task, reason.clone()))
            .await?;

        Ok(TaskDisposition::DeadLettered {
            reason,
            permanent: false,
        })
    }
}

/// Consumes dispatch tasks until `shutdown` flips, running at most
/// `concurrency` of them at a time.
pub async fn run_worker(
    mut consumer: Consumer,
    runner: Arc<TaskRunner>,
    concurrency: usize,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), Error> {
    let concurrency = concurrency.max(1);
    let semaphore = Arc::new(Semaphore::new(concurrency));

    info!(concurrency, "Dispatch worker started");

    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                info!("Shutdown requested, stopping consumer");
                break;
            }
            next = consumer.next() => {
                let delivery = match next {
                    Some(Ok(delivery)) => delivery,
                    Some(Err(e)) => {
                        error!(error = %e, "Failed to receive delivery");
                        continue;
                    }
                    None => {
                        warn!("Consumer stream closed");
                        break;
                    }
                };

                let permit = Arc::clone(&semaphore)
                    .acquire_owned()
                    .await
                    .map_err(|_| anyhow!("Worker semaphore closed"))?;
                let runner = Arc::clone(&runner);

                tokio::spawn(async move {
                    handle_delivery(&runner, delivery).await;
                    drop(permit);
                });
            }
        }
    }

    // Wait for in-flight tasks.
    let _ = semaphore
        .acquire_many(concurrency as u32)
        .await
        .map_err(|_| anyhow!("Worker semaphore closed"))?;

    info!("Dispatch worker stopped");
    Ok(())
}

async fn handle_delivery(runner: &TaskRunner, delivery: Delivery) {
    let task = match serde_json::from_slice::<DispatchTask>(&delivery.data) {
        Ok(task) => task,
        Err(e) => {
            error!(error = %e, "Malformed dispatch task, rejecting");
            if let Err(e) = delivery
                .acker
                .reject(BasicRejectOptions { requeue: false })
                .await
            {
                error!(error = %e, "Failed to reject message");
            }
            return;
        }
    };

    match runner.run(task).await {
        Ok(_) => {
            if let Err(e) = delivery.acker.ack(BasicAckOptions::default()).await {
                error!(error = %e, "Failed to acknowledge message");
            }
        }
        Err(e) => {
            error!(error = %e, "Could not reschedule task, returning it to the queue");
            let requeue = BasicNackOptions {
                requeue: true,
                ..Default::default()
            };
            if let Err(e) = delivery.acker.nack(requeue).await {
                error!(error = %e, "Failed to nack message");
            }
        }
    }
}
