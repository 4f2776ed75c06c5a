use std::sync::Arc;

use axum::{
    Router,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json},
    routing::get,
};
use tokio::{net::TcpListener, sync::watch};
use tower_http::trace::TraceLayer;
use tracing::{error, info};
use uuid::Uuid;

use crate::{
    clients::health::HealthChecker,
    models::{
        health::HealthStatus,
        response::{ApiResponse, NotificationDetail},
    },
    store::{DeliveryLogStore, NotificationStore},
};

pub struct AppState {
    pub health_checker: HealthChecker,
    pub notifications: Arc<dyn NotificationStore>,
    pub delivery_logs: Arc<dyn DeliveryLogStore>,
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/notifications/{id}", get(notification_detail))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn run_api_server(
    state: Arc<AppState>,
    port: u16,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let addr = format!("0.0.0.0:{}", port);
    let listener = TcpListener::bind(&addr).await?;

    info!(address = %addr, "Status API server started");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move {
            let _ = shutdown.changed().await;
        })
        .await?;

    Ok(())
}

async fn health_check(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let health = state.health_checker.check_all().await;

    let status_code = match health.status {
        HealthStatus::Healthy => StatusCode::OK,
        HealthStatus::Degraded => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };

    (status_code, Json(health))
}

async fn notification_detail(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> (StatusCode, Json<ApiResponse<NotificationDetail>>) {
    let notification = match state.notifications.get_notification(id).await {
        Ok(Some(notification)) => notification,
        Ok(None) => {
            return (
                StatusCode::NOT_FOUND,
                Json(ApiResponse::error(
                    "not_found".to_string(),
                    format!("Notification {} not found", id),
                )),
            );
        }
        Err(e) => return storage_failure(id, e.to_string()),
    };

    let deliveries = match state.delivery_logs.list_logs(id).await {
        Ok(logs) => logs,
        Err(e) => return storage_failure(id, e.to_string()),
    };

    (
        StatusCode::OK,
        Json(ApiResponse::success(
            NotificationDetail {
                notification,
                deliveries,
            },
            "Notification retrieved".to_string(),
        )),
    )
}

fn storage_failure(
    id: Uuid,
    error: String,
) -> (StatusCode, Json<ApiResponse<NotificationDetail>>) {
    error!(notification_id = %id, error = %error, "Failed to load notification");
    (
        StatusCode::SERVICE_UNAVAILABLE,
        Json(ApiResponse::error(
            error,
            "Storage unavailable".to_string(),
        )),
    )
}
