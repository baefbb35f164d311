//! 마켓별 키 기반 pub/sub 전송.
//!
//! 업스트림 호가 피드는 `prefix + market_id` 채널로 발행됩니다.
//! 브리지는 마켓 하나당 `subscribe`를, 집계기 탭은 `subscribe_pattern`으로
//! 모든 마켓 채널을 구독합니다. 재연결/백오프는 전송 클라이언트의 책임입니다.

pub mod memory;
pub mod redis;

use async_trait::async_trait;

use crate::error::Result;

/// 전송 채널에서 수신한 메시지.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedMessage {
    /// 메시지가 발행된 채널
    pub channel: String,
    /// 원본 페이로드
    pub payload: String,
}

/// 마켓 ID에 대한 채널 키.
pub fn channel_key(prefix: &str, market_id: &str) -> String {
    format!("{}{}", prefix, market_id)
}

/// 키 기반 pub/sub 전송.
#[async_trait]
pub trait FeedTransport: Send + Sync {
    /// 단일 채널 구독.
    async fn subscribe(&self, channel: &str) -> Result<Box<dyn FeedSubscription>>;

    /// 패턴(`prefix*`) 구독.
    async fn subscribe_pattern(&self, pattern: &str) -> Result<Box<dyn FeedSubscription>>;

    /// 채널에 페이로드를 발행하고 수신자 수를 반환합니다.
    async fn publish(&self, channel: &str, payload: &str) -> Result<usize>;

    /// 전송 연결 상태 확인.
    async fn health_check(&self) -> Result<bool> {
        Ok(true)
    }
}

/// 열린 구독 하나.
#[async_trait]
pub trait FeedSubscription: Send {
    /// 다음 메시지를 기다립니다. 전송이 닫히면 `None`.
    async fn next_message(&mut self) -> Option<FeedMessage>;

    /// 구독을 해제합니다. 이후 `next_message`는 `None`을 반환합니다.
    async fn unsubscribe(&mut self) -> Result<()>;
}
