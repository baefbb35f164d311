//! 스트리밍 서비스 수명 주기.
//!
//! 하나의 루트 `CancellationToken` 아래에서 Hub, 집계기 스윕과 저장 워커, 가격 탭을 시작하고
//! 종료 시 역순으로 정리합니다. 종료 순서는 다음과 같습니다.
//!
//! 1. 루트 토큰 취소 (Hub가 모든 클라이언트 큐를 닫고 리스너가 멈춤)
//! 2. 백그라운드 태스크 종료 대기 (저장 워커는 큐에 남은 봉까지 저장)
//! 3. 집계기 `flush_all`로 열린 봉 저장

use std::sync::Arc;

use chrono::Utc;
use metrics_exporter_prometheus::PrometheusHandle;
use terminal_data::{FeedTransport, OhlcvStore};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::aggregator::OhlcvAggregator;
use crate::bridge::MarketBridge;
use crate::config::{AggregatorConfig, HubConfig, SessionConfig, StreamConfig};
use crate::hub::{Hub, HubHandle};
use crate::server::{self, AppState};
use crate::tap::PriceTap;

/// 서비스 구성 요소 설정.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub channel_prefix: String,
    pub hub: HubConfig,
    pub session: SessionConfig,
    pub aggregator: AggregatorConfig,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            channel_prefix: "orderbook:".to_string(),
            hub: HubConfig::default(),
            session: SessionConfig::default(),
            aggregator: AggregatorConfig::default(),
        }
    }
}

impl From<&StreamConfig> for ServiceConfig {
    fn from(config: &StreamConfig) -> Self {
        Self {
            channel_prefix: config.channel_prefix.clone(),
            hub: config.hub.clone(),
            session: config.session.clone(),
            aggregator: config.aggregator.clone(),
        }
    }
}

/// 실행 중인 스트리밍 코어.
pub struct StreamService {
    hub: HubHandle,
    aggregator: Arc<OhlcvAggregator>,
    store: Arc<dyn OhlcvStore>,
    transport: Arc<dyn FeedTransport>,
    session: SessionConfig,
    cancel: CancellationToken,
    tasks: Vec<(&'static str, JoinHandle<()>)>,
}

impl StreamService {
    /// Hub, 스윕 루프, 저장 워커, 가격 탭을 시작합니다.
    ///
    /// tokio 런타임 안에서 호출해야 합니다.
    pub fn start(
        config: ServiceConfig,
        store: Arc<dyn OhlcvStore>,
        transport: Arc<dyn FeedTransport>,
    ) -> Self {
        let cancel = CancellationToken::new();

        let bridge = MarketBridge::new(transport.clone(), config.channel_prefix.clone());
        let (hub, hub_task) = Hub::spawn(&config.hub, bridge, cancel.clone());

        let aggregator = Arc::new(OhlcvAggregator::new(store.clone(), config.aggregator));
        let sweeper_task = aggregator.spawn_sweeper(cancel.clone());
        let persister_task = aggregator.spawn_persister(cancel.clone());

        let tap = PriceTap::new(transport.clone(), &config.channel_prefix, aggregator.clone());
        let tap_task = tap.spawn(cancel.clone());

        info!(channel_prefix = %config.channel_prefix, "Stream service started");

        Self {
            hub,
            aggregator,
            store,
            transport,
            session: config.session,
            cancel,
            tasks: vec![
                ("hub", hub_task),
                ("sweeper", sweeper_task),
                ("price_tap", tap_task),
                ("persister", persister_task),
            ],
        }
    }

    /// Hub 핸들.
    pub fn hub(&self) -> HubHandle {
        self.hub.clone()
    }

    /// 집계기.
    pub fn aggregator(&self) -> Arc<OhlcvAggregator> {
        self.aggregator.clone()
    }

    /// 루트 취소 토큰.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// HTTP/WebSocket 라우터.
    pub fn router(&self, metrics: Option<PrometheusHandle>) -> axum::Router {
        server::router(AppState {
            hub: self.hub.clone(),
            store: self.store.clone(),
            transport: self.transport.clone(),
            session: self.session.clone(),
            metrics,
            started_at: Utc::now(),
        })
    }

    /// 서비스를 멈추고 열린 봉을 모두 저장합니다.
    ///
    /// 저장에 성공한 봉의 수를 반환합니다.
    pub async fn shutdown(self) -> usize {
        info!("Stream service shutting down");
        self.cancel.cancel();

        for (name, task) in self.tasks {
            if let Err(e) = task.await {
                warn!(task = name, error = %e, "Background task failed");
            }
        }

        self.aggregator.flush_all().await
    }
}
