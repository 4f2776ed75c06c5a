use std::{
    collections::HashMap,
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, AtomicU32, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use dispatch_service::{
    clients::template::TemplateResolver,
    dispatch::Dispatcher,
    error::{DispatchError, MediumError, QueueError, StorageError, TransportError},
    mediums::{EmailMedium, Medium, MediumRegistry, MissingAddressPolicy, SmsMedium, Transport},
    models::{
        delivery_log::DeliveryLog,
        notification::Notification,
        status::DeliveryStatus,
        task::{DeadLetter, DispatchTask, TaskHandle},
        template::{DeliveryResult, OutboundMessage, Template},
    },
    queue::TaskQueue,
    store::{DeliveryLogStore, NotificationStore, TemplateStore, memory::MemoryStore},
    worker::DispatchLease,
};
use serde_json::{Value, json};
use uuid::Uuid;

pub const EMAIL_TEMPLATE: &str = "Dear {{ merchant_name }}, you processed {{ transaction_count }} transactions worth {{ transaction_amount }} on {{ date }}.";
pub const SMS_TEMPLATE: &str = "{{merchant_name}}: {{transaction_count}} txns, {{transaction_amount}} on {{date}}";

pub async fn seeded_store() -> Arc<MemoryStore> {
    let store = Arc::new(MemoryStore::new());
    store
        .save_template(&Template::new("daily_report", "email", EMAIL_TEMPLATE))
        .await
        .unwrap();
    store
        .save_template(&Template::new("daily_report", "sms", SMS_TEMPLATE))
        .await
        .unwrap();
    store
}

pub fn report_context() -> HashMap<String, Value> {
    HashMap::from([
        ("merchant_name".to_string(), json!("Acme")),
        ("transaction_count".to_string(), json!(5)),
        ("transaction_amount".to_string(), json!(1000)),
        ("date".to_string(), json!("2024-01-01")),
    ])
}

pub fn contact(pairs: &[(&str, &str)]) -> HashMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

/// The `daily_report` notification over email then sms.
pub fn daily_report(recipient_contact: HashMap<String, String>) -> Notification {
    notification_via(&["email", "sms"], recipient_contact)
}

pub fn notification_via(mediums: &[&str], recipient_contact: HashMap<String, String>) -> Notification {
    Notification::new(
        "merchant-42".to_string(),
        recipient_contact,
        mediums.iter().map(|m| m.to_string()).collect(),
        "daily_report".to_string(),
        report_context(),
    )
}

pub async fn stored(store: &MemoryStore, notification: Notification) -> Uuid {
    let id = notification.id;
    store.save_notification(&notification).await.unwrap();
    id
}

pub async fn status_of(store: &MemoryStore, id: Uuid) -> DeliveryStatus {
    store.get_notification(id).await.unwrap().unwrap().status
}

pub async fn log_for(
    store: &MemoryStore,
    id: Uuid,
    medium: &str,
) -> Result<Option<DeliveryLog>, StorageError> {
    Ok(store
        .list_logs(id)
        .await?
        .into_iter()
        .find(|log| log.medium == medium))
}

/// Transport that records every message it is handed, optionally rejecting
/// all of them with a fixed gateway status.
#[derive(Default)]
pub struct RecordingTransport {
    sent: Mutex<Vec<OutboundMessage>>,
    reject_with: Option<u16>,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rejecting(status: u16) -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
            reject_with: Some(status),
        }
    }

    pub fn sent(&self) -> Vec<OutboundMessage> {
        self.sent.lock().unwrap().clone()
    }

    pub fn calls(&self) -> usize {
        self.sent.lock().unwrap().len()
    }
}

#[async_trait]
impl Transport for RecordingTransport {
    async fn deliver(&self, message: &OutboundMessage) -> Result<String, TransportError> {
        self.sent.lock().unwrap().push(message.clone());
        match self.reject_with {
            Some(status) => Err(TransportError::Rejected {
                status,
                body: "rejected by test gateway".to_string(),
            }),
            None => Ok(Uuid::new_v4().to_string()),
        }
    }
}

/// Email and sms wired to recording transports over a seeded memory store.
pub struct Harness {
    pub store: Arc<MemoryStore>,
    pub dispatcher: Arc<Dispatcher>,
    pub email: Arc<RecordingTransport>,
    pub sms: Arc<RecordingTransport>,
}

impl Harness {
    pub async fn new() -> Self {
        Self::with_transports(
            RecordingTransport::new(),
            RecordingTransport::new(),
            MissingAddressPolicy::Fail,
        )
        .await
    }

    pub async fn with_transports(
        email: RecordingTransport,
        sms: RecordingTransport,
        sms_missing_address: MissingAddressPolicy,
    ) -> Self {
        let store = seeded_store().await;
        let templates = Arc::new(TemplateResolver::uncached(store.clone()));
        let email = Arc::new(email);
        let sms = Arc::new(sms);

        let registry = MediumRegistry::builder()
            .register(Arc::new(EmailMedium::new(
                templates.clone(),
                email.clone(),
                MissingAddressPolicy::Fail,
            )))
            .register(Arc::new(SmsMedium::new(
                templates,
                sms.clone(),
                sms_missing_address,
            )))
            .build();

        let dispatcher = Arc::new(Dispatcher::new(
            store.clone(),
            store.clone(),
            Arc::new(registry),
        ));

        Self {
            store,
            dispatcher,
            email,
            sms,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub enum Script {
    /// Fails with a transient transport error this many times, then succeeds.
    FailTimes(u32),
    /// Always fails with a render error.
    Broken,
}

/// Medium with scripted outcomes, for exercising the dispatcher without
/// templates or contact details.
pub struct ScriptedMedium {
    name: String,
    script: Script,
    calls: AtomicU32,
}

impl ScriptedMedium {
    pub fn new(name: &str, script: Script) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            script,
            calls: AtomicU32::new(0),
        })
    }

    pub fn reliable(name: &str) -> Arc<Self> {
        Self::new(name, Script::FailTimes(0))
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Medium for ScriptedMedium {
    fn name(&self) -> &str {
        &self.name
    }

    async fn send(&self, _notification: &Notification) -> Result<DeliveryResult, MediumError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        match self.script {
            Script::FailTimes(failures) if call < failures => Err(MediumError::Transport {
                medium: self.name.clone(),
                source: TransportError::Unreachable(format!("{} outage", self.name)),
            }),
            Script::FailTimes(_) => Ok(DeliveryResult {
                status: DeliveryStatus::Sent,
                message: format!("{} delivered", self.name),
            }),
            Script::Broken => Err(MediumError::Render("unclosed placeholder".to_string())),
        }
    }
}

pub fn scripted_registry(mediums: &[Arc<ScriptedMedium>]) -> Arc<MediumRegistry> {
    let registry = mediums
        .iter()
        .fold(MediumRegistry::builder(), |builder, medium| {
            builder.register(medium.clone())
        })
        .build();
    Arc::new(registry)
}

pub fn scripted_dispatcher(store: Arc<MemoryStore>, mediums: &[Arc<ScriptedMedium>]) -> Dispatcher {
    Dispatcher::new(store.clone(), store, scripted_registry(mediums))
}

/// Memory store whose writes can be switched off as if the database had
/// gone away. Reads always succeed.
pub struct FailingStore {
    pub inner: Arc<MemoryStore>,
    fail_log_saves: AtomicBool,
    fail_notification_saves: AtomicBool,
}

impl FailingStore {
    pub fn new(inner: Arc<MemoryStore>) -> Arc<Self> {
        Arc::new(Self {
            inner,
            fail_log_saves: AtomicBool::new(false),
            fail_notification_saves: AtomicBool::new(false),
        })
    }

    pub fn fail_log_saves(&self, fail: bool) {
        self.fail_log_saves.store(fail, Ordering::SeqCst);
    }

    pub fn fail_notification_saves(&self, fail: bool) {
        self.fail_notification_saves.store(fail, Ordering::SeqCst);
    }

    pub fn dispatcher(self: &Arc<Self>, mediums: &[Arc<ScriptedMedium>]) -> Dispatcher {
        Dispatcher::new(self.clone(), self.clone(), scripted_registry(mediums))
    }

    fn check(flag: &AtomicBool) -> Result<(), StorageError> {
        if flag.load(Ordering::SeqCst) {
            return Err(StorageError::Unavailable("connection refused".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl NotificationStore for FailingStore {
    async fn get_notification(&self, id: Uuid) -> Result<Option<Notification>, StorageError> {
        self.inner.get_notification(id).await
    }

    async fn save_notification(&self, notification: &Notification) -> Result<(), StorageError> {
        Self::check(&self.fail_notification_saves)?;
        self.inner.save_notification(notification).await
    }

    async fn create_notification(
        &self,
        notification: &Notification,
    ) -> Result<bool, StorageError> {
        Self::check(&self.fail_notification_saves)?;
        self.inner.create_notification(notification).await
    }
}

#[async_trait]
impl DeliveryLogStore for FailingStore {
    async fn find_or_create_log(
        &self,
        notification_id: Uuid,
        medium: &str,
    ) -> Result<DeliveryLog, StorageError> {
        self.inner.find_or_create_log(notification_id, medium).await
    }

    async fn save_log(&self, log: &DeliveryLog) -> Result<(), StorageError> {
        Self::check(&self.fail_log_saves)?;
        self.inner.save_log(log).await
    }

    async fn list_logs(&self, notification_id: Uuid) -> Result<Vec<DeliveryLog>, StorageError> {
        self.inner.list_logs(notification_id).await
    }
}

/// Queue whose broker is down for every operation.
pub struct BrokenQueue;

#[async_trait]
impl TaskQueue for BrokenQueue {
    async fn enqueue(&self, _task: &DispatchTask) -> Result<TaskHandle, QueueError> {
        Err(QueueError::Broker("channel closed".to_string()))
    }

    async fn schedule_retry(&self, _task: &DispatchTask, _delay: Duration) -> Result<(), QueueError> {
        Err(QueueError::Broker("channel closed".to_string()))
    }

    async fn dead_letter(&self, _letter: &DeadLetter) -> Result<(), QueueError> {
        Err(QueueError::Broker("channel closed".to_string()))
    }
}

/// Process-local lease with the same owner semantics as the Redis one.
#[derive(Default)]
pub struct MemoryLease {
    holders: Mutex<HashMap<Uuid, String>>,
}

impl MemoryLease {
    pub fn holder(&self, notification_id: Uuid) -> Option<String> {
        self.holders.lock().unwrap().get(&notification_id).cloned()
    }

    pub fn hold(&self, notification_id: Uuid, owner: &str) {
        self.holders
            .lock()
            .unwrap()
            .insert(notification_id, owner.to_string());
    }
}

#[async_trait]
impl DispatchLease for MemoryLease {
    async fn try_acquire(&self, notification_id: Uuid, owner: &str) -> Result<bool, DispatchError> {
        let mut holders = self.holders.lock().unwrap();
        match holders.get(&notification_id) {
            Some(current) => Ok(current == owner),
            None => {
                holders.insert(notification_id, owner.to_string());
                Ok(true)
            }
        }
    }

    async fn release(&self, notification_id: Uuid, owner: &str) -> Result<(), DispatchError> {
        let mut holders = self.holders.lock().unwrap();
        if holders.get(&notification_id).is_some_and(|current| current == owner) {
            holders.remove(&notification_id);
        }
        Ok(())
    }
}
