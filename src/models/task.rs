use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One scheduled execution of the dispatcher for a notification. The
/// `task_id` stays stable across retries so it can be traced from the
/// notification record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispatchTask {
    pub task_id: String,
    pub notification_id: Uuid,

    #[serde(default)]
    pub retries: u32,

    pub enqueued_at: DateTime<Utc>,
}

impl DispatchTask {
    pub fn new(notification_id: Uuid) -> Self {
        Self {
            task_id: Uuid::new_v4().to_string(),
            notification_id,
            retries: 0,
            enqueued_at: Utc::now(),
        }
    }

    pub fn next_attempt(&self) -> Self {
        Self {
            task_id: self.task_id.clone(),
            notification_id: self.notification_id,
            retries: self.retries + 1,
            enqueued_at: Utc::now(),
        }
    }
}

/// Handle returned by the queue on enqueue.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskHandle {
    pub id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeadLetter {
    pub task: DispatchTask,
    pub failure_reason: String,
    pub failed_at: String,
}

impl DeadLetter {
    pub fn new(task: DispatchTask, failure_reason: String) -> Self {
        Self {
            task,
            failure_reason,
            failed_at: Utc::now().to_rfc3339(),
        }
    }
}
