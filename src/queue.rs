//! Task queue contract for dispatch tasks.

use std::{sync::Mutex, time::Duration};

use async_trait::async_trait;

use crate::{
    error::QueueError,
    models::task::{DeadLetter, DispatchTask, TaskHandle},
};

#[async_trait]
pub trait TaskQueue: Send + Sync {
    async fn enqueue(&self, task: &DispatchTask) -> Result<TaskHandle, QueueError>;

    /// Makes `task` visible to workers again once `delay` has passed.
    async fn schedule_retry(&self, task: &DispatchTask, delay: Duration) -> Result<(), QueueError>;

    async fn dead_letter(&self, letter: &DeadLetter) -> Result<(), QueueError>;
}

/// Records everything it is given. Nothing is ever delivered to a worker;
/// callers drain it explicitly.
#[derive(Default)]
pub struct MemoryQueue {
    enqueued: Mutex<Vec<DispatchTask>>,
    retries: Mutex<Vec<(DispatchTask, Duration)>>,
    dead_letters: Mutex<Vec<DeadLetter>>,
}

impl MemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enqueued(&self) -> Vec<DispatchTask> {
        lock(&self.enqueued).clone()
    }

    pub fn retries(&self) -> Vec<(DispatchTask, Duration)> {
        lock(&self.retries).clone()
    }

    pub fn dead_letters(&self) -> Vec<DeadLetter> {
        lock(&self.dead_letters).clone()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[async_trait]
impl TaskQueue for MemoryQueue {
    async fn enqueue(&self, task: &DispatchTask) -> Result<TaskHandle, QueueError> {
        lock(&self.enqueued).push(task.clone());
        Ok(TaskHandle {
            id: task.task_id.clone(),
        })
    }

    async fn schedule_retry(&self, task: &DispatchTask, delay: Duration) -> Result<(), QueueError> {
        lock(&self.retries).push((task.clone(), delay));
        Ok(())
    }

    async fn dead_letter(&self, letter: &DeadLetter) -> Result<(), QueueError> {
        lock(&self.dead_letters).push(letter.clone());
        Ok(())
    }
}
