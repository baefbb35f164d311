//! Prometheus 메트릭 설정 및 유틸리티.
//!
//! WebSocket 연결, Hub 팬아웃, 피드 수신, 봉 저장 메트릭을 수집하고
//! `/metrics` 엔드포인트로 노출합니다. 레코더가 설치되지 않은 경우 기록은 무시됩니다.

use metrics::{counter, gauge};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use terminal_core::Resolution;

use crate::error::{Result, StreamError};

/// Prometheus 메트릭 레코더를 설치하고 핸들을 반환합니다.
///
/// # 반환값
///
/// `/metrics` 엔드포인트에서 메트릭을 렌더링하기 위한 `PrometheusHandle`
pub fn setup_metrics_recorder() -> Result<PrometheusHandle> {
    PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| StreamError::Metrics(e.to_string()))
}

// ============================================================================
// WebSocket / Hub 메트릭
// ============================================================================

/// WebSocket 연결 수 증가.
pub fn increment_websocket_connections() {
    gauge!("websocket_connections_active").increment(1.0);
}

/// WebSocket 연결 수 감소.
pub fn decrement_websocket_connections() {
    gauge!("websocket_connections_active").decrement(1.0);
}

/// 브로드캐스트 처리 횟수 증가.
pub fn record_broadcast() {
    counter!("hub_broadcasts_total").increment(1);
}

/// 느린 클라이언트 축출 횟수 증가.
pub fn record_eviction() {
    counter!("hub_evictions_total").increment(1);
}

/// 실행 중인 마켓 리스너 수 설정.
pub fn set_market_listeners(count: usize) {
    gauge!("hub_market_listeners_active").set(count as f64);
}

// ============================================================================
// 피드 / 집계 메트릭
// ============================================================================

/// 업스트림 피드 메시지 수신 횟수 증가.
pub fn record_feed_message() {
    counter!("feed_messages_total").increment(1);
}

/// 해석할 수 없는 업스트림 메시지 횟수 증가.
pub fn record_feed_malformed() {
    counter!("feed_malformed_total").increment(1);
}

/// 저장된 봉 수 증가.
pub fn record_bar_persisted(resolution: Resolution) {
    counter!("ohlcv_bars_persisted_total", "resolution" => resolution.as_str()).increment(1);
}

/// 재시도 후에도 저장에 실패한 봉 수 증가.
pub fn record_persist_failure(resolution: Resolution) {
    counter!("ohlcv_persist_failures_total", "resolution" => resolution.as_str()).increment(1);
}

/// 이미 확정된 버킷을 다시 연 횟수 증가.
pub fn record_bar_reopened(resolution: Resolution) {
    counter!("ohlcv_bars_reopened_total", "resolution" => resolution.as_str()).increment(1);
}
