//! Hub: 연결 레지스트리와 마켓 구독 인덱스의 단일 소유자.
//!
//! 모든 상태 변경은 하나의 이벤트 루프 안에서만 일어나므로 잠금이 필요 없습니다.
//! 외부에서는 [`HubHandle`]로 명령을 보내는 방식으로만 상호작용합니다.
//!
//! # 역압 정책
//!
//! 브로드캐스트는 세션 송신 큐에 `try_send`로 넣습니다. 큐가 가득 찬 세션은
//! 느린 클라이언트로 보고 즉시 축출합니다. 큐 송신단을 버려 writer에 종료를 알리고
//! 레지스트리와 모든 구독에서 제거합니다. 다른 세션은 영향을 받지 않습니다.

mod handle;

pub use handle::{HubCommand, HubHandle, HubStats, Payload, SessionId};

use std::collections::{HashMap, HashSet};

use terminal_core::MarketId;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::bridge::MarketBridge;
use crate::config::HubConfig;
use crate::metrics;

/// 레지스트리에 등록된 세션.
struct SessionEntry {
    sender: mpsc::Sender<Payload>,
    markets: HashSet<MarketId>,
}

/// Hub 이벤트 루프.
pub struct Hub {
    rx: mpsc::Receiver<HubCommand>,
    handle: HubHandle,
    bridge: MarketBridge,
    cancel: CancellationToken,
    sessions: HashMap<SessionId, SessionEntry>,
    index: HashMap<MarketId, HashSet<SessionId>>,
    listeners: HashMap<MarketId, CancellationToken>,
}

impl Hub {
    /// 새로운 Hub와 핸들 생성.
    ///
    /// # Arguments
    ///
    /// * `config` - 명령 수신함 크기
    /// * `bridge` - 첫 구독 시 마켓 리스너를 띄울 브리지
    /// * `cancel` - 루트 취소 토큰 (마켓 리스너는 이 토큰의 자식을 받습니다)
    pub fn new(
        config: &HubConfig,
        bridge: MarketBridge,
        cancel: CancellationToken,
    ) -> (Self, HubHandle) {
        let (tx, rx) = mpsc::channel(config.command_capacity.max(1));
        let handle = HubHandle::new(tx);

        let hub = Self {
            rx,
            handle: handle.clone(),
            bridge,
            cancel,
            sessions: HashMap::new(),
            index: HashMap::new(),
            listeners: HashMap::new(),
        };
        (hub, handle)
    }

    /// Hub를 생성하고 이벤트 루프를 백그라운드 태스크로 시작합니다.
    pub fn spawn(
        config: &HubConfig,
        bridge: MarketBridge,
        cancel: CancellationToken,
    ) -> (HubHandle, JoinHandle<()>) {
        let (hub, handle) = Self::new(config, bridge, cancel);
        let task = tokio::spawn(hub.run());
        (handle, task)
    }

    /// 취소될 때까지 명령을 순서대로 처리합니다.
    pub async fn run(mut self) {
        info!("Hub event loop started");

        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                command = self.rx.recv() => match command {
                    Some(command) => self.handle_command(command),
                    None => break,
                },
            }
        }

        self.shutdown();
        info!("Hub event loop stopped");
    }

    fn handle_command(&mut self, command: HubCommand) {
        match command {
            HubCommand::Register { session_id, sender } => self.register(session_id, sender),
            HubCommand::Unregister { session_id } => {
                if self.remove_session(session_id) {
                    debug!(session_id = %session_id, "Session unregistered");
                }
            }
            HubCommand::Subscribe {
                session_id,
                market_id,
            } => self.subscribe(session_id, market_id),
            HubCommand::Unsubscribe {
                session_id,
                market_id,
            } => self.unsubscribe(session_id, &market_id),
            HubCommand::Broadcast { market_id, payload } => self.broadcast(&market_id, payload),
            HubCommand::Stats { reply } => {
                let _ = reply.send(self.stats());
            }
        }
    }

    fn register(&mut self, session_id: SessionId, sender: mpsc::Sender<Payload>) {
        if self.sessions.contains_key(&session_id) {
            warn!(session_id = %session_id, "Session registered twice, replacing");
            self.remove_session(session_id);
        }
        self.sessions.insert(
            session_id,
            SessionEntry {
                sender,
                markets: HashSet::new(),
            },
        );
        debug!(session_id = %session_id, clients = self.sessions.len(), "Session registered");
    }

    fn subscribe(&mut self, session_id: SessionId, market_id: MarketId) {
        // 축출된 세션의 reader가 뒤늦게 보낸 구독은 무시
        let Some(entry) = self.sessions.get_mut(&session_id) else {
            debug!(session_id = %session_id, market_id = %market_id, "Subscribe from unknown session ignored");
            return;
        };
        if !entry.markets.insert(market_id.clone()) {
            return;
        }

        self.index
            .entry(market_id.clone())
            .or_default()
            .insert(session_id);

        if !self.listeners.contains_key(&market_id) {
            self.start_listener(market_id.clone());
        }
        debug!(session_id = %session_id, market_id = %market_id, "Session subscribed");
    }

    fn unsubscribe(&mut self, session_id: SessionId, market_id: &str) {
        let Some(entry) = self.sessions.get_mut(&session_id) else {
            return;
        };
        if entry.markets.remove(market_id) {
            self.detach(session_id, market_id);
            debug!(session_id = %session_id, market_id = %market_id, "Session unsubscribed");
        }
    }

    fn broadcast(&mut self, market_id: &str, payload: Payload) {
        let Some(subscribers) = self.index.get(market_id) else {
            return;
        };
        metrics::record_broadcast();

        let mut evicted = Vec::new();
        for session_id in subscribers {
            let Some(entry) = self.sessions.get(session_id) else {
                continue;
            };
            match entry.sender.try_send(payload.clone()) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    warn!(session_id = %session_id, market_id = %market_id, "Outbound queue full, evicting slow client");
                    metrics::record_eviction();
                    evicted.push(*session_id);
                }
                Err(TrySendError::Closed(_)) => {
                    debug!(session_id = %session_id, "Outbound queue closed, dropping session");
                    evicted.push(*session_id);
                }
            }
        }

        for session_id in evicted {
            self.remove_session(session_id);
        }
    }

    /// 세션을 레지스트리와 모든 구독에서 제거합니다.
    ///
    /// 세션 항목과 함께 큐 송신단이 버려지므로 writer는 큐 종료를 관측합니다.
    fn remove_session(&mut self, session_id: SessionId) -> bool {
        let Some(entry) = self.sessions.remove(&session_id) else {
            return false;
        };
        for market_id in &entry.markets {
            self.detach(session_id, market_id);
        }
        true
    }

    /// 인덱스에서 세션을 빼고, 구독자가 없어진 마켓은 리스너까지 정리합니다.
    fn detach(&mut self, session_id: SessionId, market_id: &str) {
        let Some(subscribers) = self.index.get_mut(market_id) else {
            return;
        };
        subscribers.remove(&session_id);
        if subscribers.is_empty() {
            self.index.remove(market_id);
            self.stop_listener(market_id);
        }
    }

    fn start_listener(&mut self, market_id: MarketId) {
        let token = self.cancel.child_token();
        self.bridge
            .spawn(market_id.clone(), self.handle.clone(), token.clone());
        debug!(market_id = %market_id, "Market listener spawned");
        self.listeners.insert(market_id, token);
        metrics::set_market_listeners(self.listeners.len());
    }

    fn stop_listener(&mut self, market_id: &str) {
        if let Some(token) = self.listeners.remove(market_id) {
            token.cancel();
            debug!(market_id = %market_id, "Market listener torn down");
            metrics::set_market_listeners(self.listeners.len());
        }
    }

    fn stats(&self) -> HubStats {
        HubStats {
            clients: self.sessions.len(),
            listeners: self.listeners.len(),
            subscribers: self
                .index
                .iter()
                .map(|(market_id, sessions)| (market_id.clone(), sessions.len()))
                .collect(),
        }
    }

    /// 모든 세션 큐를 닫고 리스너를 멈춥니다.
    fn shutdown(&mut self) {
        let clients = self.sessions.len();
        self.sessions.clear();
        self.index.clear();
        for (_, token) in self.listeners.drain() {
            token.cancel();
        }
        self.rx.close();
        metrics::set_market_listeners(0);
        info!(clients, "Hub closed all client queues");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use terminal_data::MemoryFeed;

    fn spawn_hub() -> (HubHandle, CancellationToken, MemoryFeed) {
        let feed = MemoryFeed::default();
        let bridge = MarketBridge::new(Arc::new(feed.clone()), "orderbook:");
        let cancel = CancellationToken::new();
        let (handle, _task) = Hub::spawn(&HubConfig::default(), bridge, cancel.clone());
        (handle, cancel, feed)
    }

    async fn session(hub: &HubHandle, capacity: usize) -> (SessionId, mpsc::Receiver<Payload>) {
        let (tx, rx) = mpsc::channel(capacity);
        let id = SessionId::new_v4();
        hub.register(id, tx).await.unwrap();
        (id, rx)
    }

    #[tokio::test]
    async fn test_subscribe_is_idempotent() {
        let (hub, _cancel, _feed) = spawn_hub();
        let (id, _rx) = session(&hub, 4).await;

        hub.subscribe(id, "M1").await.unwrap();
        hub.subscribe(id, "M1").await.unwrap();

        let stats = hub.stats().await.unwrap();
        assert_eq!(stats.clients, 1);
        assert_eq!(stats.subscriber_count("M1"), 1);
        assert_eq!(stats.listeners, 1);
    }

    #[tokio::test]
    async fn test_broadcast_only_reaches_subscribers() {
        let (hub, _cancel, _feed) = spawn_hub();
        let (a, mut rx_a) = session(&hub, 4).await;
        let (_b, mut rx_b) = session(&hub, 4).await;

        hub.subscribe(a, "M1").await.unwrap();
        hub.broadcast("M1", "m1-update").await.unwrap();
        hub.broadcast("M2", "m2-update").await.unwrap();
        hub.stats().await.unwrap();

        assert_eq!(&*rx_a.recv().await.unwrap(), "m1-update");
        assert!(rx_a.try_recv().is_err());
        assert!(rx_b.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_full_queue_evicts_only_slow_session() {
        let (hub, _cancel, _feed) = spawn_hub();
        let (slow, mut slow_rx) = session(&hub, 1).await;
        let (fast, mut fast_rx) = session(&hub, 8).await;

        for market in ["M1", "M2"] {
            hub.subscribe(slow, market).await.unwrap();
        }
        hub.subscribe(fast, "M1").await.unwrap();

        hub.broadcast("M1", "first").await.unwrap();
        hub.broadcast("M1", "second").await.unwrap();
        hub.broadcast("M1", "third").await.unwrap();

        let stats = hub.stats().await.unwrap();
        assert_eq!(stats.clients, 1);
        assert_eq!(stats.subscriber_count("M1"), 1);
        assert_eq!(stats.subscriber_count("M2"), 0);
        assert_eq!(stats.listeners, 1);

        assert_eq!(&*slow_rx.recv().await.unwrap(), "first");
        assert!(slow_rx.recv().await.is_none());

        for expected in ["first", "second", "third"] {
            assert_eq!(&*fast_rx.recv().await.unwrap(), expected);
        }
    }

    #[tokio::test]
    async fn test_unregister_removes_every_subscription() {
        let (hub, _cancel, _feed) = spawn_hub();
        let (id, mut rx) = session(&hub, 4).await;
        hub.subscribe(id, "M1").await.unwrap();
        hub.subscribe(id, "M2").await.unwrap();

        hub.unregister(id).await.unwrap();
        let stats = hub.stats().await.unwrap();

        assert_eq!(stats, HubStats::default());
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_subscribe_after_eviction_is_ignored() {
        let (hub, _cancel, _feed) = spawn_hub();
        let (id, _rx) = session(&hub, 4).await;
        hub.unregister(id).await.unwrap();
        hub.subscribe(id, "M1").await.unwrap();

        let stats = hub.stats().await.unwrap();
        assert_eq!(stats.markets(), 0);
        assert_eq!(stats.listeners, 0);
    }

    #[tokio::test]
    async fn test_cancel_closes_client_queues() {
        let (hub, cancel, _feed) = spawn_hub();
        let (id, mut rx) = session(&hub, 4).await;
        hub.subscribe(id, "M1").await.unwrap();
        hub.stats().await.unwrap();

        cancel.cancel();

        assert!(rx.recv().await.is_none());
        while !hub.is_closed() {
            tokio::task::yield_now().await;
        }
        assert!(hub.stats().await.is_err());
    }
}
