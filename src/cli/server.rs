//! HTTP server mode for health and reconciliation access

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::RwLock;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::error::{Error, Result};
use crate::pipeline::TenantPipeline;
use crate::reconcile::ReconciliationReport;
use crate::types::HealthStatus;

/// App state shared across handlers
pub struct AppState {
    pipeline: Arc<TenantPipeline>,
    /// Last finished report; replaced whole, never edited
    report: RwLock<Arc<ReconciliationReport>>,
}

impl AppState {
    pub fn new(pipeline: Arc<TenantPipeline>) -> Self {
        let empty = ReconciliationReport {
            tenant_id: pipeline.tenant_id().to_string(),
            ..ReconciliationReport::default()
        };
        Self {
            pipeline,
            report: RwLock::new(Arc::new(empty)),
        }
    }

    pub async fn report(&self) -> Arc<ReconciliationReport> {
        Arc::clone(&*self.report.read().await)
    }

    async fn replace_report(&self, report: ReconciliationReport) -> Arc<ReconciliationReport> {
        let report = Arc::new(report);
        *self.report.write().await = Arc::clone(&report);
        report
    }
}

/// Response wrapper
#[derive(Debug, Serialize)]
struct ApiResponse<T> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    fn error(msg: impl Into<String>) -> ApiResponse<()> {
        ApiResponse {
            success: false,
            data: None,
            error: Some(msg.into()),
        }
    }
}

/// Routes over shared state
pub fn router(state: Arc<AppState>) -> Router {
    // Build CORS layer - allow all origins for development
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health))
        .route("/report", get(report))
        .route("/entities/:name", get(entity))
        .route("/reconcile", post(reconcile))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Start the HTTP server
pub async fn serve(pipeline: Arc<TenantPipeline>, port: u16) -> Result<()> {
    let app = router(Arc::new(AppState::new(pipeline)));

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!("Starting HTTP server on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| Error::config(format!("Failed to bind to port {port}: {e}")))?;

    axum::serve(listener, app)
        .await
        .map_err(|e| Error::config(format!("Server error: {e}")))?;

    Ok(())
}

/// Health of every connected source, keyed by provider
async fn health(State(state): State<Arc<AppState>>) -> Response {
    let registry = state.pipeline.registry();
    let sources = registry.tenant_health(state.pipeline.tenant_id()).await;
    let status = if sources.values().all(|r| r.status == HealthStatus::Healthy) {
        "ok"
    } else {
        "degraded"
    };

    Json(ApiResponse::success(serde_json::json!({
        "status": status,
        "sources": sources,
    })))
    .into_response()
}

/// Last reconciliation report
async fn report(State(state): State<Arc<AppState>>) -> Response {
    let report = state.report().await;
    Json(ApiResponse::success(report.as_ref())).into_response()
}

/// One unified entity of the last report
async fn entity(State(state): State<Arc<AppState>>, Path(name): Path<String>) -> Response {
    let report = state.report().await;
    match report.entity(&name) {
        Some(entity) => Json(ApiResponse::success(entity)).into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(ApiResponse::<()>::error(format!("Unknown entity: {name}"))),
        )
            .into_response(),
    }
}

/// Run a reconciliation and publish its report
async fn reconcile(State(state): State<Arc<AppState>>) -> Response {
    let report = state.pipeline.run().await;
    let report = state.replace_report(report).await;
    let status = if report.timed_out {
        StatusCode::GATEWAY_TIMEOUT
    } else {
        StatusCode::OK
    };
    (status, Json(ApiResponse::success(report.as_ref()))).into_response()
}
