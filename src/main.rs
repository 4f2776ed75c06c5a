use std::sync::Arc;

use anyhow::{Error, Result, anyhow};
use dispatch_service::{
    api::{AppState, run_api_server},
    clients::{
        database::DatabaseClient, gateway::HttpGateway, health::HealthChecker,
        rbmq::RabbitMqClient, redis::RedisClient, template::TemplateResolver,
    },
    config::{Config, StorageBackend},
    dispatch::Dispatcher,
    mediums::{EmailMedium, LogTransport, MediumRegistry, SmsMedium, Transport},
    producer::{DailyReportProducer, NotificationProducer, run_report_scheduler},
    queue::TaskQueue,
    store::{
        DeliveryLogStore, MerchantDirectory, NotificationStore, SummarySource, TemplateStore,
        memory::MemoryStore,
    },
    worker::{TaskRunner, run_worker},
};
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

struct Stores {
    notifications: Arc<dyn NotificationStore>,
    delivery_logs: Arc<dyn DeliveryLogStore>,
    templates: Arc<dyn TemplateStore>,
    reports: Option<(Arc<dyn SummarySource>, Arc<dyn MerchantDirectory>)>,
    database: Option<Arc<DatabaseClient>>,
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    init_tracing();

    let config = Config::load()?;
    info!(storage_backend = ?config.storage_backend, "Configuration loaded");

    let stores = build_stores(&config).await?;
    let rabbitmq = Arc::new(RabbitMqClient::connect(&config).await?);

    let mut health_checker = HealthChecker::new().with_probe("message_broker", rabbitmq.clone(), true);
    if let Some(database) = &stores.database {
        health_checker = health_checker.with_probe("database", database.clone(), true);
    }

    let templates = Arc::new(TemplateResolver::new(
        stores.templates.clone(),
        config.template_cache_ttl(),
    ));
    let email_transport = build_transport(&config, config.email_gateway_url.as_deref(), "email")?;
    let sms_transport = build_transport(&config, config.sms_gateway_url.as_deref(), "sms")?;

    let registry = MediumRegistry::builder()
        .register(Arc::new(EmailMedium::new(
            templates.clone(),
            email_transport,
            config.email_missing_address(),
        )))
        .register(Arc::new(SmsMedium::new(
            templates,
            sms_transport,
            config.sms_missing_address(),
        )))
        .build();
    info!(mediums = ?registry.names(), "Medium registry built");

    let dispatcher = Arc::new(Dispatcher::new(
        stores.notifications.clone(),
        stores.delivery_logs.clone(),
        Arc::new(registry),
    ));

    let queue: Arc<dyn TaskQueue> = rabbitmq.clone();
    let mut runner = TaskRunner::new(dispatcher, queue.clone(), config.task_retry_policy())
        .with_requeue_delay(config.requeue_delay());

    if config.dispatch_lease_enabled {
        let redis = Arc::new(RedisClient::connect(&config).await?);
        health_checker = health_checker.with_probe("cache_service", redis.clone(), false);
        runner = runner.with_lease(redis);
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let state = Arc::new(AppState {
        health_checker,
        notifications: stores.notifications.clone(),
        delivery_logs: stores.delivery_logs.clone(),
    });
    let api_shutdown = shutdown_rx.clone();
    let server_port = config.server_port;
    let api_handle = tokio::spawn(async move {
        if let Err(e) = run_api_server(state, server_port, api_shutdown).await {
            error!(error = %e, "Status API server failed");
        }
    });

    let scheduler_handle = if config.report_scheduler_enabled {
        match stores.reports {
            Some((summaries, merchants)) => {
                let report = Arc::new(DailyReportProducer::new(
                    NotificationProducer::new(stores.notifications.clone(), queue),
                    summaries,
                    merchants,
                    config.report_template_name.clone(),
                    config.report_mediums(),
                ));
                Some(tokio::spawn(run_report_scheduler(
                    report,
                    config.report_interval(),
                    shutdown_rx.clone(),
                )))
            }
            None => {
                warn!("Report scheduler needs the postgres backend, not starting it");
                None
            }
        }
    } else {
        None
    };

    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for shutdown signal");
            return;
        }
        info!("Shutdown signal received");
        let _ = shutdown_tx.send(true);
    });

    let consumer = rabbitmq.create_consumer().await?;
    run_worker(
        consumer,
        Arc::new(runner),
        config.worker_concurrency,
        shutdown_rx,
    )
    .await?;

    let _ = api_handle.await;
    if let Some(handle) = scheduler_handle {
        let _ = handle.await;
    }

    info!("Dispatch service stopped");
    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    if std::env::var("LOG_FORMAT").is_ok_and(|format| format == "json") {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

async fn build_stores(config: &Config) -> Result<Stores, Error> {
    match config.storage_backend {
        StorageBackend::Memory => {
            warn!("Using in-memory storage; state is lost on restart");
            let store = Arc::new(MemoryStore::new());
            Ok(Stores {
                notifications: store.clone(),
                delivery_logs: store.clone(),
                templates: store,
                reports: None,
                database: None,
            })
        }
        StorageBackend::Postgres => {
            let database = Arc::new(DatabaseClient::connect(&config.database_url).await?);
            database.migrate().await?;
            let summaries: Arc<dyn SummarySource> = database.clone();
            let merchants: Arc<dyn MerchantDirectory> = database.clone();
            Ok(Stores {
                notifications: database.clone(),
                delivery_logs: database.clone(),
                templates: database.clone(),
                reports: Some((summaries, merchants)),
                database: Some(database),
            })
        }
    }
}

fn build_transport(
    config: &Config,
    gateway_url: Option<&str>,
    medium: &str,
) -> Result<Arc<dyn Transport>, Error> {
    match gateway_url.filter(|url| !url.trim().is_empty()) {
        Some(url) => {
            info!(medium, url, "Using HTTP gateway transport");
            let gateway = HttpGateway::new(url, config.retry_config())
                .map_err(|e| anyhow!("Failed to build {} gateway: {}", medium, e))?;
            Ok(Arc::new(gateway))
        }
        None => {
            info!(medium, "No gateway configured, using logging transport");
            Ok(Arc::new(LogTransport))
        }
    }
}
