//! Hub 메시지 패싱 진입점.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Serialize;
use terminal_core::MarketId;
use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

use crate::error::{Result, StreamError};

/// 세션 식별자.
pub type SessionId = Uuid;

/// 세션 송신 큐로 전달되는 원본 페이로드.
pub type Payload = Arc<str>;

/// Hub 이벤트 루프가 처리하는 명령.
#[derive(Debug)]
pub enum HubCommand {
    /// 세션 등록
    Register {
        session_id: SessionId,
        sender: mpsc::Sender<Payload>,
    },
    /// 세션 해제 (모든 구독 포함)
    Unregister { session_id: SessionId },
    /// 마켓 구독
    Subscribe {
        session_id: SessionId,
        market_id: MarketId,
    },
    /// 마켓 구독 해제
    Unsubscribe {
        session_id: SessionId,
        market_id: MarketId,
    },
    /// 마켓 구독자 전체에 페이로드 전달
    Broadcast { market_id: MarketId, payload: Payload },
    /// 상태 스냅샷 요청
    Stats { reply: oneshot::Sender<HubStats> },
}

/// Hub 상태 스냅샷.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct HubStats {
    /// 등록된 세션 수
    pub clients: usize,
    /// 실행 중인 마켓 리스너 수
    pub listeners: usize,
    /// 마켓별 구독자 수
    pub subscribers: BTreeMap<MarketId, usize>,
}

impl HubStats {
    /// 구독자가 있는 마켓 수.
    pub fn markets(&self) -> usize {
        self.subscribers.len()
    }

    /// 마켓의 구독자 수.
    pub fn subscriber_count(&self, market_id: &str) -> usize {
        self.subscribers.get(market_id).copied().unwrap_or(0)
    }
}

/// Hub 이벤트 루프로 명령을 보내는 핸들.
///
/// 복제해서 여러 태스크에서 사용할 수 있습니다. Hub 상태는 이 핸들을 통해서만 변경됩니다.
#[derive(Debug, Clone)]
pub struct HubHandle {
    tx: mpsc::Sender<HubCommand>,
}

impl HubHandle {
    pub(crate) fn new(tx: mpsc::Sender<HubCommand>) -> Self {
        Self { tx }
    }

    /// 이벤트 루프 없이 명령 수신단과 함께 핸들을 만듭니다.
    #[cfg(test)]
    pub(crate) fn detached(capacity: usize) -> (Self, mpsc::Receiver<HubCommand>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self::new(tx), rx)
    }

    /// 세션과 송신 큐를 등록합니다.
    pub async fn register(
        &self,
        session_id: SessionId,
        sender: mpsc::Sender<Payload>,
    ) -> Result<()> {
        self.send(HubCommand::Register { session_id, sender }).await
    }

    /// 세션을 해제합니다.
    pub async fn unregister(&self, session_id: SessionId) -> Result<()> {
        self.send(HubCommand::Unregister { session_id }).await
    }

    /// 세션을 마켓에 구독시킵니다.
    pub async fn subscribe(
        &self,
        session_id: SessionId,
        market_id: impl Into<MarketId>,
    ) -> Result<()> {
        self.send(HubCommand::Subscribe {
            session_id,
            market_id: market_id.into(),
        })
        .await
    }

    /// 세션의 마켓 구독을 해제합니다.
    pub async fn unsubscribe(
        &self,
        session_id: SessionId,
        market_id: impl Into<MarketId>,
    ) -> Result<()> {
        self.send(HubCommand::Unsubscribe {
            session_id,
            market_id: market_id.into(),
        })
        .await
    }

    /// 마켓 구독자 전체에 페이로드를 전달합니다.
    pub async fn broadcast(
        &self,
        market_id: impl Into<MarketId>,
        payload: impl Into<Payload>,
    ) -> Result<()> {
        self.send(HubCommand::Broadcast {
            market_id: market_id.into(),
            payload: payload.into(),
        })
        .await
    }

    /// 현재 상태 스냅샷을 조회합니다.
    ///
    /// 앞서 보낸 명령이 모두 처리된 뒤의 상태를 돌려줍니다.
    pub async fn stats(&self) -> Result<HubStats> {
        let (reply, rx) = oneshot::channel();
        self.send(HubCommand::Stats { reply }).await?;
        rx.await.map_err(|_| StreamError::HubClosed)
    }

    /// 이벤트 루프가 종료되었는지 여부.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    async fn send(&self, command: HubCommand) -> Result<()> {
        self.tx
            .send(command)
            .await
            .map_err(|_| StreamError::HubClosed)
    }
}
