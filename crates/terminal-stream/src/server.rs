//! HTTP/WebSocket 서버.
//!
//! - `GET /ws`: WebSocket 업그레이드 후 클라이언트 세션 실행
//! - `GET /health`: liveness probe
//! - `GET /health/ready`: 저장소, 피드 전송, Hub 상태를 포함한 readiness probe
//! - `GET /metrics`: Prometheus 메트릭

use std::sync::Arc;

use axum::{
    extract::{ws::WebSocketUpgrade, State},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use chrono::{DateTime, Utc};
use futures::StreamExt;
use metrics_exporter_prometheus::PrometheusHandle;
use serde::{Deserialize, Serialize};
use terminal_data::{FeedTransport, OhlcvStore};
use tower_http::trace::TraceLayer;

use crate::config::SessionConfig;
use crate::hub::HubHandle;
use crate::session::ClientSession;

/// 라우터 공유 상태.
#[derive(Clone)]
pub struct AppState {
    pub hub: HubHandle,
    pub store: Arc<dyn OhlcvStore>,
    pub transport: Arc<dyn FeedTransport>,
    pub session: SessionConfig,
    pub metrics: Option<PrometheusHandle>,
    pub started_at: DateTime<Utc>,
}

impl AppState {
    /// 서버 업타임(초).
    pub fn uptime_secs(&self) -> i64 {
        (Utc::now() - self.started_at).num_seconds()
    }
}

/// 헬스 체크 응답 구조체.
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    /// 전체 서비스 상태 ("healthy" | "degraded" | "unhealthy")
    pub status: String,

    /// 서비스 버전
    pub version: String,

    /// 서버 업타임(초)
    pub uptime_secs: i64,

    /// 현재 시간 (ISO 8601)
    pub timestamp: String,

    /// 개별 컴포넌트 상태
    pub components: ComponentHealth,
}

/// 개별 컴포넌트 상태.
#[derive(Debug, Serialize, Deserialize)]
pub struct ComponentHealth {
    /// OHLCV 저장소
    pub store: ComponentStatus,

    /// 업스트림 피드 전송
    pub transport: ComponentStatus,

    /// Hub 이벤트 루프
    pub hub: ComponentStatus,
}

/// 컴포넌트 상태.
#[derive(Debug, Serialize, Deserialize)]
pub struct ComponentStatus {
    /// 상태 ("up" | "down")
    pub status: String,

    /// 추가 정보 (선택적)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl ComponentStatus {
    /// 정상 상태.
    pub fn up() -> Self {
        Self {
            status: "up".to_string(),
            message: None,
        }
    }

    /// 비정상 상태.
    pub fn down(message: impl Into<String>) -> Self {
        Self {
            status: "down".to_string(),
            message: Some(message.into()),
        }
    }

    /// 정보 포함 정상 상태.
    pub fn up_with_info(message: impl Into<String>) -> Self {
        Self {
            status: "up".to_string(),
            message: Some(message.into()),
        }
    }

    fn is_up(&self) -> bool {
        self.status == "up"
    }
}

/// 전체 라우터 생성.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/ws", get(websocket_handler))
        .route("/health", get(health_check))
        .route("/health/ready", get(health_ready))
        .route("/metrics", get(metrics_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// WebSocket 업그레이드 핸들러.
///
/// 수신 프레임 크기 제한은 업그레이드 단계에서도 적용합니다.
pub async fn websocket_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
) -> impl IntoResponse {
    let limit = state.session.max_message_size;
    ws.max_message_size(limit)
        .max_frame_size(limit)
        .on_upgrade(move |socket| async move {
            let (sink, stream) = socket.split();
            ClientSession::new(state.hub, state.session)
                .run(stream, sink)
                .await;
        })
}

/// 간단한 헬스 체크 (liveness probe용).
///
/// GET /health
pub async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

/// 상세 헬스 체크 (readiness probe용).
///
/// GET /health/ready
pub async fn health_ready(State(state): State<AppState>) -> impl IntoResponse {
    let store = match state.store.health_check().await {
        Ok(true) => ComponentStatus::up(),
        Ok(false) => ComponentStatus::down("health check failed"),
        Err(e) => ComponentStatus::down(e.to_string()),
    };

    let transport = match state.transport.health_check().await {
        Ok(true) => ComponentStatus::up(),
        Ok(false) => ComponentStatus::down("health check failed"),
        Err(e) => ComponentStatus::down(e.to_string()),
    };

    let hub = match state.hub.stats().await {
        Ok(stats) => ComponentStatus::up_with_info(format!(
            "{} clients, {} markets, {} listeners",
            stats.clients,
            stats.markets(),
            stats.listeners
        )),
        Err(e) => ComponentStatus::down(e.to_string()),
    };

    // 저장소 장애는 degraded, Hub 정지는 unhealthy
    let (overall_status, status_code) = if !hub.is_up() {
        ("unhealthy", StatusCode::SERVICE_UNAVAILABLE)
    } else if !store.is_up() || !transport.is_up() {
        ("degraded", StatusCode::SERVICE_UNAVAILABLE)
    } else {
        ("healthy", StatusCode::OK)
    };

    let response = HealthResponse {
        status: overall_status.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_secs: state.uptime_secs(),
        timestamp: Utc::now().to_rfc3339(),
        components: ComponentHealth {
            store,
            transport,
            hub,
        },
    };

    (status_code, Json(response))
}

/// Prometheus 메트릭 엔드포인트.
///
/// GET /metrics
pub async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    match &state.metrics {
        Some(handle) => (StatusCode::OK, handle.render()),
        None => (
            StatusCode::NOT_FOUND,
            "metrics recorder not installed".to_string(),
        ),
    }
}
