//! HTTP-сервер хранилища: сигналинг, агрегат дисплея, SSE-уведомления.
//!
//! Доступ по bearer-токену; токен однозначно задаёт организацию.

mod display;
mod events;
mod signaling;

use crate::config::AppConfig;
use crate::error::StoreError;
use crate::model::OrganizationId;
use crate::notifier::ChangeNotifier;
use crate::store::SignalingHub;
use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{header::AUTHORIZATION, request::Parts, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, put},
    Json, Router,
};
use serde::Serialize;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{info, warn};

#[derive(Clone)]
pub struct AppState {
    hub: Arc<SignalingHub>,
    tokens: Arc<HashMap<String, OrganizationId>>,
}

impl AppState {
    pub fn new(hub: Arc<SignalingHub>, tokens: HashMap<String, OrganizationId>) -> Self {
        Self {
            hub,
            tokens: Arc::new(tokens),
        }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        let hub = Arc::new(SignalingHub::new(Arc::new(ChangeNotifier::new())));
        let tokens = config
            .tokens
            .iter()
            .map(|grant| (grant.token.clone(), grant.organization.clone()))
            .collect();
        Self::new(hub, tokens)
    }

    pub fn hub(&self) -> &Arc<SignalingHub> {
        &self.hub
    }
}

/// Организация запроса, извлечённая из `Authorization: Bearer ...`
pub struct Org(pub OrganizationId);

#[async_trait]
impl FromRequestParts<AppState> for Org {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let token = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.strip_prefix("Bearer "))
            .ok_or(ApiError::Unauthorized)?;
        match state.tokens.get(token) {
            Some(org) => Ok(Org(org.clone())),
            None => {
                warn!(path = %parts.uri.path(), "request with unknown token");
                Err(ApiError::Unauthorized)
            }
        }
    }
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: &'static str,
    message: String,
}

#[derive(Debug)]
pub enum ApiError {
    Unauthorized,
    /// Тело разобрано, но не подходит по смыслу (не тот тип SDP)
    Unprocessable(&'static str),
    Store(StoreError),
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        ApiError::Store(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error, message) = match self {
            ApiError::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                "unauthorized",
                "missing or unknown bearer token".to_string(),
            ),
            ApiError::Unprocessable(message) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                "unprocessable",
                message.to_string(),
            ),
            ApiError::Store(e @ StoreError::Conflict) => {
                (StatusCode::CONFLICT, "conflict", e.to_string())
            }
            ApiError::Store(e) => (StatusCode::INTERNAL_SERVER_ERROR, "store", e.to_string()),
        };
        (status, Json(ErrorBody { error, message })).into_response()
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/health", get(health))
        .route("/api/signaling", get(signaling::get_record))
        .route("/api/signaling/offer", put(signaling::put_offer))
        .route("/api/signaling/answer", put(signaling::put_answer))
        .route("/api/signaling/clear", put(signaling::clear))
        .route("/api/display", get(display::get_aggregate))
        .route("/api/display/content", put(display::put_content))
        .route("/api/display/settings", put(display::put_settings))
        .route("/api/events", get(events::stream))
        .with_state(state)
}

/// Обслуживает уже открытый сокет до сигнала остановки
pub async fn serve_on<F>(listener: TcpListener, state: AppState, shutdown: F) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    info!(addr = ?listener.local_addr().ok(), "signaling server listening");
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await
}

pub async fn serve<F>(config: &AppConfig, shutdown: F) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    if config.tokens.is_empty() {
        warn!("no tokens configured, every request will be rejected");
    }
    let listener = TcpListener::bind(&config.server.bind).await?;
    serve_on(listener, AppState::from_config(config), shutdown).await
}

async fn health() -> &'static str {
    "ok"
}
