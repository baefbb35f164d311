//! 집계기용 가격 탭.
//!
//! 모든 마켓 채널(`접두사*`)을 패턴 구독해 호가 메시지에서 가격과 관측 시각을 뽑아
//! 집계기에 넘깁니다. 팬아웃 경로와는 독립적으로 동작합니다.

use std::sync::Arc;

use terminal_core::BookMessage;
use terminal_data::FeedTransport;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::aggregator::OhlcvAggregator;
use crate::metrics;

/// 피드 → 집계기 가격 탭.
pub struct PriceTap {
    transport: Arc<dyn FeedTransport>,
    pattern: String,
    aggregator: Arc<OhlcvAggregator>,
}

impl PriceTap {
    /// 새로운 가격 탭 생성.
    pub fn new(
        transport: Arc<dyn FeedTransport>,
        channel_prefix: &str,
        aggregator: Arc<OhlcvAggregator>,
    ) -> Self {
        Self {
            transport,
            pattern: format!("{}*", channel_prefix),
            aggregator,
        }
    }

    /// 백그라운드 태스크로 시작합니다.
    pub fn spawn(self, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move { self.run(cancel).await })
    }

    /// 취소되거나 전송이 닫힐 때까지 가격을 집계기로 보냅니다.
    pub async fn run(self, cancel: CancellationToken) {
        let subscribed = tokio::select! {
            _ = cancel.cancelled() => return,
            result = self.transport.subscribe_pattern(&self.pattern) => result,
        };
        let mut subscription = match subscribed {
            Ok(subscription) => subscription,
            Err(e) => {
                error!(pattern = %self.pattern, error = %e, "Price tap subscribe failed");
                return;
            }
        };
        info!(pattern = %self.pattern, "Price tap started");

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                message = subscription.next_message() => match message {
                    Some(message) => {
                        self.handle_payload(&message.payload).await;
                    }
                    None => {
                        warn!(pattern = %self.pattern, "Price tap subscription closed by transport");
                        break;
                    }
                },
            }
        }

        if let Err(e) = subscription.unsubscribe().await {
            warn!(error = %e, "Price tap unsubscribe failed");
        }
        info!("Price tap stopped");
    }

    /// 호가 메시지 하나를 집계기에 반영합니다.
    ///
    /// 해석할 수 없거나 가격을 도출할 수 없는 메시지는 건너뛰고 `false`를 반환합니다.
    pub async fn handle_payload(&self, payload: &str) -> bool {
        let book = match BookMessage::from_json(payload) {
            Ok(book) => book,
            Err(e) => {
                metrics::record_feed_malformed();
                debug!(error = %e, "Unparseable book message skipped");
                return false;
            }
        };

        let observed_at = match book.observed_at() {
            Ok(observed_at) => observed_at,
            Err(e) => {
                metrics::record_feed_malformed();
                debug!(market_id = %book.market, error = %e, "Book message without valid timestamp skipped");
                return false;
            }
        };

        let Some(price) = book.derive_price(self.aggregator.price_source()) else {
            debug!(market_id = %book.market, "Empty book, no price derived");
            return false;
        };

        self.aggregator
            .update_price(&book.market, price, observed_at)
            .await;
        true
    }
}
