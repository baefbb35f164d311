//! 스트리밍 서비스 진입점.
//!
//! 환경변수에서 설정을 읽어 저장소와 피드 전송을 연결하고,
//! 스트리밍 코어를 axum 서버 뒤에 띄웁니다.

use std::sync::Arc;

use anyhow::Context;
use terminal_core::init_logging;
use terminal_data::{
    Database, FeedTransport, MemoryFeed, MemoryOhlcvStore, OhlcvStore, RedisFeed,
    TimescaleOhlcvStore,
};
use terminal_stream::metrics::setup_metrics_recorder;
use terminal_stream::{StoreConfig, StreamConfig, StreamService, TransportConfig};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = StreamConfig::from_env().context("설정 로드 실패")?;

    init_logging(config.logging.clone())
        .map_err(|e| anyhow::anyhow!("로깅 초기화 실패: {}", e))?;
    info!(version = env!("CARGO_PKG_VERSION"), "Starting terminal-stream");

    let metrics_handle = setup_metrics_recorder()?;

    let store: Arc<dyn OhlcvStore> = match &config.store {
        StoreConfig::Timescale(db_config) => {
            let db = Database::connect(db_config).await?;
            db.migrate().await?;
            Arc::new(TimescaleOhlcvStore::new(db))
        }
        StoreConfig::Memory => {
            warn!("In-memory OHLCV store selected, bars are not durable");
            Arc::new(MemoryOhlcvStore::new())
        }
    };

    let transport: Arc<dyn FeedTransport> = match &config.transport {
        TransportConfig::Redis(redis_config) => {
            Arc::new(RedisFeed::connect(redis_config).await?)
        }
        TransportConfig::Memory => Arc::new(MemoryFeed::default()),
    };

    let service = StreamService::start((&config).into(), store, transport);
    let app = service.router(Some(metrics_handle));

    let addr = config.server.bind_addr();
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("{} 바인드 실패", addr))?;
    info!(addr = %addr, "Listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(service.cancel_token()))
        .await?;

    let flushed = service.shutdown().await;
    info!(flushed, "Server stopped");
    Ok(())
}

/// Ctrl+C 또는 SIGTERM을 기다린 뒤 루트 토큰을 취소합니다.
async fn shutdown_signal(shutdown_token: CancellationToken) {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            warn!("Received Ctrl+C, initiating graceful shutdown...");
        }
        _ = terminate => {
            warn!("Received SIGTERM, initiating graceful shutdown...");
        }
        _ = shutdown_token.cancelled() => {}
    }

    shutdown_token.cancel();
    info!("Shutdown signal propagated to background tasks");
}
