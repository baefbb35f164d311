//! 마켓 채널 브리지.
//!
//! 외부 pub/sub 전송의 마켓별 채널(`접두사 + market_id`)을 구독해
//! 받은 페이로드를 변환 없이 Hub 브로드캐스트로 넘깁니다.
//! 재연결은 전송 클라이언트의 책임이며, 이 계층은 실패를 기록만 합니다.

use std::sync::Arc;

use terminal_core::MarketId;
use terminal_data::{channel_key, FeedTransport};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::hub::HubHandle;
use crate::metrics;

/// 마켓 리스너를 생성하는 브리지.
#[derive(Clone)]
pub struct MarketBridge {
    transport: Arc<dyn FeedTransport>,
    channel_prefix: String,
}

impl MarketBridge {
    /// 새로운 브리지 생성.
    pub fn new(transport: Arc<dyn FeedTransport>, channel_prefix: impl Into<String>) -> Self {
        Self {
            transport,
            channel_prefix: channel_prefix.into(),
        }
    }

    /// 마켓의 전송 채널 키.
    pub fn channel_for(&self, market_id: &str) -> String {
        channel_key(&self.channel_prefix, market_id)
    }

    /// 마켓 리스너 태스크를 시작합니다.
    pub fn spawn(
        &self,
        market_id: MarketId,
        hub: HubHandle,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        let bridge = self.clone();
        tokio::spawn(async move { bridge.listen(market_id, hub, cancel).await })
    }

    /// 취소될 때까지 마켓 채널을 Hub로 전달합니다.
    ///
    /// 마켓 내 메시지 순서는 전송의 전달 순서를 그대로 따릅니다.
    pub async fn listen(&self, market_id: MarketId, hub: HubHandle, cancel: CancellationToken) {
        let channel = self.channel_for(&market_id);

        let subscribed = tokio::select! {
            _ = cancel.cancelled() => return,
            result = self.transport.subscribe(&channel) => result,
        };
        let mut subscription = match subscribed {
            Ok(subscription) => subscription,
            Err(e) => {
                error!(market_id = %market_id, channel = %channel, error = %e, "Market listener subscribe failed");
                return;
            }
        };
        info!(market_id = %market_id, channel = %channel, "Market listener started");

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                message = subscription.next_message() => match message {
                    Some(message) => {
                        metrics::record_feed_message();
                        if hub.broadcast(market_id.clone(), message.payload).await.is_err() {
                            debug!(market_id = %market_id, "Hub closed, market listener exiting");
                            break;
                        }
                    }
                    None => {
                        warn!(market_id = %market_id, channel = %channel, "Feed subscription closed by transport");
                        break;
                    }
                },
            }
        }

        if let Err(e) = subscription.unsubscribe().await {
            warn!(market_id = %market_id, error = %e, "Market listener unsubscribe failed");
        }
        info!(market_id = %market_id, "Market listener stopped");
    }
}
